//! Tollgate - HTTP API service with token-bucket admission control.
//!
//! Every request passes two token buckets before it reaches a handler: one
//! shared by all traffic, and one per client identity. Per-client buckets are
//! created on first use and evicted by a background task once idle.
//!
//! - **Config**: Layered configuration (file → env → CLI)
//! - **Rate limit**: Token buckets, client registry, admission gate
//! - **Identity**: Client address resolution behind trusted proxies
//! - **Router**: HTTP routing with path parameters
//! - **Server**: Hyper-based HTTP server with graceful drain
//!
//! # Example
//!
//! ```ignore
//! use tollgate::{ConfigLoader, Router};
//!
//! #[tokio::main]
//! async fn main() -> tollgate::Result<()> {
//!     let config = ConfigLoader::new("MYAPP").load(None, None, None)?;
//!     tollgate::logging::init(&config)?;
//!
//!     let mut router = Router::new();
//!     tollgate::routes::register(&mut router);
//!     router.get("/api/hello", |_ctx| async move {
//!         tollgate::response::ok(&tollgate::json!({ "message": "Hello!" }))
//!     });
//!
//!     tollgate::server::run(config, router.into_handle(), async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod rate_limit;
pub mod response;
pub mod router;
pub mod routes;
pub mod server;
pub mod trace;

// Re-export main types at crate root
pub use config::{Config, ConfigLoader};
pub use error::{Error, Result};
pub use rate_limit::{Denial, Gate, Mode};
pub use router::{Context, Router};

// Re-export commonly used dependencies for convenience
pub use hyper::Method;
pub use serde_json::json;
