//! Mock server lifecycle and request interception.
//!
//! A single fallback handler resolves every request against the shared
//! registry, so interactions added while running take effect immediately.

use crate::config::{Interaction, MockServerConfig, ResponseDescriptor, Settings, UnmatchedQuery};
use crate::error::{MockError, Result};
use crate::matcher::Signature;
use crate::registry::{Registry, Resolution};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Request counters since the last start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStats {
    pub total: u64,
    pub matched: u64,
    pub unmatched: u64,
}

/// State shared between the server handle and the request handler.
struct ServerState {
    registry: RwLock<Registry>,
    settings: Settings,
    requests_total: AtomicU64,
    requests_matched: AtomicU64,
    requests_unmatched: AtomicU64,
}

impl ServerState {
    fn stats(&self) -> RequestStats {
        RequestStats {
            total: self.requests_total.load(Ordering::Relaxed),
            matched: self.requests_matched.load(Ordering::Relaxed),
            unmatched: self.requests_unmatched.load(Ordering::Relaxed),
        }
    }

    fn reset_stats(&self) {
        self.requests_total.store(0, Ordering::Relaxed);
        self.requests_matched.store(0, Ordering::Relaxed);
        self.requests_unmatched.store(0, Ordering::Relaxed);
    }
}

struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

/// Mock HTTP server answering declared interactions.
///
/// Lifecycle is `stopped -> start() -> running -> stop() -> stopped`. Stopping
/// clears every registered interaction, so each start begins fresh.
///
/// # Example
///
/// ```ignore
/// use mock_interaction_server::{Interaction, MockServer, MockServerConfig};
///
/// let mut server = MockServer::new(MockServerConfig::default());
/// server.start().await?;
/// server.add_interaction(&interaction).await?;
///
/// // point the system under test at server.url()
///
/// server.stop().await?;
/// ```
pub struct MockServer {
    config: MockServerConfig,
    state: Arc<ServerState>,
    running: Option<RunningServer>,
}

impl MockServer {
    /// Create a stopped server.
    pub fn new(config: MockServerConfig) -> Self {
        let registry = Registry::new(config.host.clone(), config.settings.query_signature);
        let state = Arc::new(ServerState {
            registry: RwLock::new(registry),
            settings: config.settings.clone(),
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
        });

        Self {
            config,
            state,
            running: None,
        }
    }

    /// Register the configured interactions and start serving.
    ///
    /// Fails with [`MockError::AlreadyRunning`] if called twice without a stop.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.running.is_some() {
            return Err(MockError::AlreadyRunning);
        }

        let bind_addr = SocketAddr::new(self.config.listen, self.config.port);
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| MockError::Bind {
                addr: bind_addr,
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| MockError::Bind {
            addr: bind_addr,
            source,
        })?;

        // Registry stays empty unless the server actually starts
        {
            let mut registry = self.state.registry.write().await;
            for interaction in &self.config.interactions {
                if let Err(e) = registry.register(interaction) {
                    registry.clear();
                    return Err(e);
                }
            }
        }

        let app = Router::new()
            .fallback(intercept)
            .with_state(Arc::clone(&self.state));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
        });

        info!(
            addr = %addr,
            host = %self.config.host,
            preloaded = self.config.interactions.len(),
            "Mock server started"
        );

        self.running = Some(RunningServer {
            addr,
            shutdown_tx,
            handle,
        });
        Ok(addr)
    }

    /// Stop serving and wait until the listener is released.
    ///
    /// Clears every registered interaction and resets the request counters.
    pub async fn stop(&mut self) -> Result<()> {
        let running = self.running.take().ok_or(MockError::NotRunning)?;

        let _ = running.shutdown_tx.send(());
        let served = running.handle.await;

        self.state.registry.write().await.clear();
        self.state.reset_stats();

        info!(addr = %running.addr, "Mock server stopped");
        served??;
        Ok(())
    }

    /// Register an interaction. It is answered from the next request on.
    pub async fn add_interaction(&self, interaction: &Interaction) -> Result<Signature> {
        self.state.registry.write().await.register(interaction)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address the listener is bound to, while running.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Base URL to point the system under test at, while running.
    pub fn url(&self) -> Option<String> {
        self.addr().map(|addr| format!("http://{}", addr))
    }

    pub fn config(&self) -> &MockServerConfig {
        &self.config
    }

    /// Number of registered responses.
    pub async fn interaction_count(&self) -> usize {
        self.state.registry.read().await.len()
    }

    pub fn stats(&self) -> RequestStats {
        self.state.stats()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(());
            running.handle.abort();
        }
    }
}

enum Outcome {
    Respond(ResponseDescriptor),
    EmptyBody,
    NotFound,
}

/// Fallback handler: every request lands here.
async fn intercept(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()));
    let path = uri.path();

    let outcome = {
        let registry = state.registry.read().await;
        let resolution = registry.resolve(method.as_str(), host, path, uri.query());
        match resolution {
            Resolution::Matched {
                signature,
                response,
                path_params,
            } => {
                if state.settings.log_matches {
                    info!(
                        signature = %signature,
                        method = %method,
                        path = %path,
                        path_params = ?path_params,
                        "Request matched interaction"
                    );
                }
                Outcome::Respond(response.clone())
            }
            Resolution::UnmatchedQuery { signature } => {
                if state.settings.log_unmatched {
                    warn!(
                        signature = %signature,
                        method = %method,
                        path = %path,
                        "No interaction declared for query"
                    );
                }
                match state.settings.unmatched_query {
                    UnmatchedQuery::NotFound => Outcome::NotFound,
                    UnmatchedQuery::EmptyBody => Outcome::EmptyBody,
                }
            }
            Resolution::NoRoute => {
                if state.settings.log_unmatched {
                    warn!(method = %method, path = %path, "No matching interaction found");
                }
                Outcome::NotFound
            }
        }
    };

    match outcome {
        Outcome::Respond(descriptor) => {
            state.requests_matched.fetch_add(1, Ordering::Relaxed);
            build_response(&descriptor)
        }
        Outcome::EmptyBody => {
            state.requests_unmatched.fetch_add(1, Ordering::Relaxed);
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
            )
                .into_response()
        }
        Outcome::NotFound => {
            state.requests_unmatched.fetch_add(1, Ordering::Relaxed);
            not_found()
        }
    }
}

/// Build the HTTP response for a declared interaction.
fn build_response(descriptor: &ResponseDescriptor) -> Response {
    // 204 and 304 carry no body
    let body = match descriptor.status {
        204 | 304 => Ok(Vec::new()),
        _ => serde_json::to_vec(&descriptor.body),
    };
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "Failed to serialize response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut builder = Response::builder().status(descriptor.status);

    if !descriptor
        .headers
        .keys()
        .any(|name| name.eq_ignore_ascii_case("content-type"))
    {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
    }
    for (name, value) in &descriptor.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder.body(Body::from(body)).unwrap_or_else(|e| {
        error!(error = %e, "Failed to build response");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "not_found",
            "message": "No matching interaction found"
        })),
    )
        .into_response()
}
