//! Configuration layering and validation.

use std::io::Write;

use tollgate::config::RateLimitConfig;
use tollgate::{Config, ConfigLoader, Error, Mode};

#[test]
fn file_env_and_cli_layer_in_order() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[app]
name = "edge"

[server]
host = "10.0.0.5"
port = 7000

[log]
level = "debug"

[rate_limit]
mode = "reject"
client_rate = 5.0
client_burst = 8
"#
    )
    .unwrap();

    // SAFETY: the prefix is unique to this test.
    unsafe {
        std::env::set_var("LAYERTEST_PORT", "7100");
        std::env::set_var("LAYERTEST_LOG_LEVEL", "warn");
    }

    let config = ConfigLoader::new("LAYERTEST")
        .load(Some(file.path()), Some("127.0.0.1"), None)
        .unwrap();

    unsafe {
        std::env::remove_var("LAYERTEST_PORT");
        std::env::remove_var("LAYERTEST_LOG_LEVEL");
    }

    assert_eq!(config.app.name, "edge");
    assert_eq!(config.server.host, "127.0.0.1", "CLI beats file");
    assert_eq!(config.server.port, 7100, "env beats file");
    assert_eq!(config.log.level, "warn");
    assert_eq!(config.rate_limit.mode, Mode::Reject);
    assert_eq!(config.rate_limit.client_burst, 8);
    assert_eq!(config.rate_limit.global_burst, 200, "unset keys keep defaults");
}

#[test]
fn missing_file_is_a_config_error() {
    let err = ConfigLoader::new("MISSINGTEST")
        .load(Some(std::path::Path::new("/definitely/not/here.toml")), None, None)
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}

#[tokio::test]
async fn server_refuses_invalid_rate_limit() {
    let config = Config {
        rate_limit: RateLimitConfig {
            client_burst: 0,
            ..Default::default()
        },
        ..Default::default()
    };

    let router = tollgate::Router::new().into_handle();
    match tollgate::server::start(config, router).await {
        Err(Error::Config(msg)) => assert!(msg.contains("rate_limit.client"), "{msg}"),
        Err(other) => panic!("expected config error, got {other}"),
        Ok(_) => panic!("server started with a zero burst"),
    }
}

#[tokio::test]
async fn server_refuses_oversized_cleanup_interval() {
    let config = Config {
        rate_limit: RateLimitConfig {
            cleanup_interval_secs: u64::MAX,
            ..Default::default()
        },
        ..Default::default()
    };

    let router = tollgate::Router::new().into_handle();
    match tollgate::server::start(config, router).await {
        Err(Error::Config(msg)) => assert!(msg.contains("cleanup_interval_secs"), "{msg}"),
        Err(other) => panic!("expected config error, got {other}"),
        Ok(_) => panic!("server started with an unbounded cleanup interval"),
    }
}

#[test]
fn effective_config_renders_as_toml() {
    let rendered = toml::to_string_pretty(&Config::default()).unwrap();
    assert!(rendered.contains("[rate_limit]"));
    assert!(rendered.contains("mode = \"wait\""));

    let parsed: Config = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed.rate_limit.client_burst, 20);
}
