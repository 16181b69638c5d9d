//! HTTP server implementation using hyper.
//!
//! Every request is traced, attributed to a client, and passed through the
//! admission [`Gate`] before its body is read or a handler is looked up.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, HeaderValue};
use hyper::service::service_fn;
use hyper::{Request, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SharedConfig};
use crate::error::{Code, Error};
use crate::identity::Resolver;
use crate::rate_limit::{Denial, Gate};
use crate::response::{self, HttpResponse};
use crate::router::{Context, RouteMatch, RouterHandle};
use crate::trace;

/// Maximum request body size in bytes (1 MB).
const MAX_BODY_SIZE: usize = 1_048_576;

/// Maximum number of concurrent connections.
const MAX_CONNECTIONS: u32 = 128;

/// Timeout for reading request headers (slowloris protection).
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared server state.
pub struct State {
    pub config: SharedConfig,
    pub router: Arc<RouterHandle>,
    /// `None` when rate limiting is disabled.
    pub gate: Option<Gate>,
    pub resolver: Resolver,
    /// Cancelled when the server shuts down; parent of every admission wait.
    pub shutdown: CancellationToken,
}

/// Handle to a running server instance.
pub struct Server {
    addr: SocketAddr,
    gate: Option<Gate>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Server {
    /// The address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The admission gate in front of the router, if rate limiting is enabled.
    pub fn gate(&self) -> Option<&Gate> {
        self.gate.as_ref()
    }

    /// Stop accepting, drain open connections, then stop bucket eviction.
    pub async fn shutdown(self) -> crate::Result<()> {
        self.shutdown.cancel();
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Server task failed: {e}")))
    }
}

/// Add security and tracing headers to a response.
fn add_standard_headers(response: &mut HttpResponse, trace_id: &str) {
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        headers.insert(trace::TRACE_ID_HEADER, value);
    }
}

/// Run the request through the gate, bounded by `max_wait` and server shutdown.
async fn admit(state: &State, client: &str) -> Result<(), Denial> {
    let Some(gate) = &state.gate else {
        return Ok(());
    };

    let cancel = state.shutdown.child_token();
    let max_wait = state.config.rate_limit.max_wait();
    match tokio::time::timeout(max_wait, gate.admit(client, &cancel)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(client, "Admission wait exceeded {max_wait:?}");
            Err(Denial::CancelledWhileWaiting)
        }
    }
}

/// Handle an incoming HTTP request.
async fn handle_request(
    req: Request<Incoming>,
    peer: SocketAddr,
    state: Arc<State>,
) -> Result<HttpResponse, std::convert::Infallible> {
    let started = Instant::now();
    let (parts, body) = req.into_parts();

    let trace_id = trace::from_headers(&parts.headers);
    let client = state.resolver.resolve(peer, &parts.headers);
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    debug!(%trace_id, %method, %path, %client, "HTTP request received");

    let mut response = match admit(&state, &client).await {
        Err(denial) => Error::from(denial).into_response(),
        Ok(()) => dispatch(parts, body, client.clone(), trace_id.clone(), &state).await,
    };

    add_standard_headers(&mut response, &trace_id);

    info!(
        %trace_id,
        %method,
        %path,
        %client,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "HTTP response sent"
    );
    Ok(response)
}

/// Read the body and hand the request to its route handler.
async fn dispatch(
    parts: hyper::http::request::Parts,
    body: Incoming,
    client: String,
    trace_id: String,
    state: &Arc<State>,
) -> HttpResponse {
    // Reject oversized bodies early via Content-Length header
    if let Some(len) = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        && len > MAX_BODY_SIZE
    {
        return Error::PayloadTooLarge.into_response();
    }

    // Read body with size limit (fallback for chunked encoding)
    let body = match Limited::new(body, MAX_BODY_SIZE).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Error::PayloadTooLarge.into_response(),
    };

    let path = parts.uri.path().to_string();
    match state.router.match_route(&parts.method, &path) {
        RouteMatch::Matched { handler, params } => {
            let ctx = Context {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                params,
                body,
                client,
                trace_id,
                config: Arc::clone(&state.config),
            };
            let trace_id = ctx.trace_id.clone();

            // Run the handler on its own task so a panic becomes a 500
            // instead of tearing down the connection.
            match tokio::spawn(handler(ctx)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => e.into_response(),
                Err(e) => {
                    error!(%trace_id, %path, "Handler failed: {e}");
                    response::fail(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Code::ServerError,
                        "Internal server error",
                    )
                }
            }
        }
        RouteMatch::MethodNotAllowed => Error::MethodNotAllowed.into_response(),
        RouteMatch::NotFound => Error::NotFound(path).into_response(),
    }
}

fn connection_builder() -> auto::Builder<TokioExecutor> {
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(HEADER_READ_TIMEOUT);
    builder
}

/// Serve one admitted connection until it closes or the server shuts down.
fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<State>,
    permit: OwnedSemaphorePermit,
) {
    tokio::spawn(async move {
        let io = TokioIo::new(stream);
        let service_state = Arc::clone(&state);
        let service = service_fn(move |req| handle_request(req, peer, Arc::clone(&service_state)));

        let builder = connection_builder();
        let conn = builder.serve_connection(io, service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = state.shutdown.cancelled() => {
                // Let in-flight requests finish, refuse new ones on this connection.
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };
        if let Err(e) = result {
            debug!("Error serving connection from {}: {}", peer, e);
        }

        drop(permit);
    });
}

/// Answer every request on an over-limit connection with 503.
fn refuse_connection(stream: TcpStream, peer: SocketAddr) {
    warn!("Connection limit reached, rejecting {}", peer);
    tokio::spawn(async move {
        let service = service_fn(|_req: Request<Incoming>| async {
            Ok::<_, std::convert::Infallible>(response::fail(
                StatusCode::SERVICE_UNAVAILABLE,
                Code::ServerError,
                "Service unavailable",
            ))
        });

        let _ = connection_builder()
            .serve_connection(TokioIo::new(stream), service)
            .await;
    });
}

/// Wait for every connection permit to come back, up to `timeout`.
async fn drain(semaphore: &Semaphore, timeout: Duration) {
    match tokio::time::timeout(timeout, semaphore.acquire_many(MAX_CONNECTIONS)).await {
        Ok(_) => debug!("All connections drained"),
        Err(_) => warn!("Shutdown timeout elapsed with connections still open"),
    }
}

/// Bind, start accepting connections, and return a handle.
///
/// Builds the admission gate from `config.rate_limit` (unless disabled) and
/// starts its eviction task. Fails on invalid configuration.
pub async fn start(config: Config, router: Arc<RouterHandle>) -> crate::Result<Server> {
    config.validate()?;
    let gate = if config.rate_limit.enabled {
        Some(Gate::from_config(&config.rate_limit)?)
    } else {
        None
    };
    start_with_gate(config, router, gate).await
}

/// Like [`start`], with an explicitly constructed gate.
///
/// The gate's client eviction runs on the schedule in `config.rate_limit`
/// and stops when the server shuts down.
pub async fn start_with_gate(
    config: Config,
    router: Arc<RouterHandle>,
    gate: Option<Gate>,
) -> crate::Result<Server> {
    let resolver = Resolver::new(&config.server.trusted_proxies)?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;

    let drain_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    let eviction = gate
        .as_ref()
        .map(|gate| gate.start_eviction(&config.rate_limit));

    let shutdown = CancellationToken::new();
    let state = Arc::new(State {
        config: Arc::new(config),
        router,
        gate: gate.clone(),
        resolver,
        shutdown: shutdown.clone(),
    });

    info!("Server listening on http://{}", addr);

    let semaphore = Arc::new(Semaphore::new(MAX_CONNECTIONS as usize));

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept connection: {e}");
                            continue;
                        }
                    };

                    match Arc::clone(&semaphore).try_acquire_owned() {
                        Ok(permit) => serve_connection(stream, peer, Arc::clone(&state), permit),
                        Err(_) => refuse_connection(stream, peer),
                    }
                }
                _ = state.shutdown.cancelled() => {
                    break;
                }
            }
        }

        drop(listener);
        info!("Server shutting down, draining connections");
        drain(&semaphore, drain_timeout).await;

        if let Some(eviction) = eviction {
            eviction.stop().await;
        }
        info!("Server stopped");
    });

    Ok(Server {
        addr,
        gate,
        shutdown,
        task,
    })
}

/// Run the HTTP server until `signal` resolves, then shut down gracefully.
///
/// # Arguments
/// * `config` - Service configuration
/// * `router` - Router handle with registered routes
/// * `signal` - Future that completes when the process should stop
pub async fn run(
    config: Config,
    router: Arc<RouterHandle>,
    signal: impl Future<Output = ()>,
) -> crate::Result<()> {
    let server = start(config, router).await?;
    signal.await;
    server.shutdown().await
}
