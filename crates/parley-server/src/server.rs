//! `ChatServer`: axum HTTP + WebSocket front end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures::StreamExt;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use parley_core::Clock;
use parley_history::{HistoryStore, MemoryHistoryStore, TtlPolicy, spawn_janitor};
use parley_settings::ParleySettings;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::{Authenticator, HandshakeQuery, JwtAuthenticator, authorize_handshake};
use crate::errors::{MirrorError, ServerError};
use crate::health::HealthResponse;
use crate::history_api::{ApiError, HistoryQuery, read_history};
use crate::membership::{GroupMembership, StaticGroupMembership};
use crate::metrics::WS_HANDSHAKE_REJECTED_TOTAL;
use crate::mirror::{BroadcastMirror, MirrorConfig};
use crate::presence::{MemoryPresenceStore, PresenceStore};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::dispatcher::Dispatcher;
use crate::websocket::heartbeat::{HeartbeatSweeper, SweepConfig};
use crate::websocket::registry::{ConnectionRegistry, Registry};
use crate::websocket::session::{SessionContext, run_session};

/// Listener and per-connection settings.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port (0 picks an ephemeral port).
    pub port: u16,
    /// Largest inbound WebSocket message.
    pub max_message_size: usize,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// Presence record lifetime.
    pub presence_ttl: Duration,
    /// Idle sweep timing.
    pub sweep: SweepConfig,
    /// History janitor period.
    pub purge_interval: Duration,
}

impl ServerConfig {
    /// Config from resolved settings.
    pub fn from_settings(settings: &ParleySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            queue_capacity: settings.connection.queue_capacity,
            presence_ttl: settings.connection.presence_ttl(),
            sweep: SweepConfig::from_settings(&settings.heartbeat),
            purge_interval: settings.history.purge_interval(),
        }
    }
}

impl Default for ServerConfig {
    /// Loopback on an ephemeral port, everything else from default settings.
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Self::from_settings(&ParleySettings::default())
        }
    }
}

/// Collaborators the server is built from.
pub struct ServerDeps {
    /// Live connections.
    pub registry: Arc<dyn Registry>,
    /// Message router.
    pub dispatcher: Arc<Dispatcher>,
    /// History cache.
    pub history: Arc<dyn HistoryStore>,
    /// Group membership lookup.
    pub groups: Arc<dyn GroupMembership>,
    /// Presence records.
    pub presence: Arc<dyn PresenceStore>,
    /// Token verifier.
    pub auth: Arc<dyn Authenticator>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl ServerDeps {
    /// Single-process collaborators: in-memory registry, history, presence and
    /// static groups, JWT auth from settings.
    pub fn in_memory(settings: &ParleySettings, clock: Arc<dyn Clock>) -> Self {
        let ttl = TtlPolicy {
            direct: settings.history.direct_ttl(),
            group: settings.history.group_ttl(),
            assistant: settings.history.assistant_ttl(),
        };
        let registry: Arc<dyn Registry> = Arc::new(ConnectionRegistry::new());
        let history: Arc<dyn HistoryStore> =
            Arc::new(MemoryHistoryStore::with_clock(ttl, clock.clone()));
        let groups: Arc<dyn GroupMembership> =
            Arc::new(StaticGroupMembership::from_seed(&settings.groups));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            history.clone(),
            groups.clone(),
        ));
        Self {
            registry,
            dispatcher,
            history,
            groups,
            presence: Arc::new(MemoryPresenceStore::new(clock.clone())),
            auth: Arc::new(JwtAuthenticator::new(
                settings.auth.jwt_secret.as_bytes(),
                settings.auth.leeway_secs,
            )),
            clock,
            metrics: None,
        }
    }

    /// Attach a Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Everything sessions share.
    pub session: Arc<SessionContext>,
    /// Token verifier.
    pub auth: Arc<dyn Authenticator>,
    /// History cache.
    pub history: Arc<dyn HistoryStore>,
    /// Group membership lookup.
    pub groups: Arc<dyn GroupMembership>,
    /// Prometheus handle.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
    /// Largest inbound WebSocket message.
    pub max_message_size: usize,
}

/// The chat relay server.
pub struct ChatServer {
    config: ServerConfig,
    deps: ServerDeps,
    mirror: Arc<BroadcastMirror>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl ChatServer {
    /// Create a new server. The mirror starts disabled.
    pub fn new(config: ServerConfig, deps: ServerDeps) -> Self {
        Self {
            config,
            deps,
            mirror: Arc::new(BroadcastMirror::disabled()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Bind the LAN mirror and route what it receives.
    ///
    /// Call before [`router`](Self::router) / [`listen`](Self::listen) so
    /// sessions publish to it.
    pub async fn start_mirror(
        &mut self,
        config: MirrorConfig,
    ) -> Result<Vec<JoinHandle<()>>, MirrorError> {
        let handle = BroadcastMirror::start(
            config,
            self.deps.dispatcher.clone(),
            self.shutdown.token(),
        )
        .await?;
        self.mirror = handle.mirror;
        Ok(handle.tasks)
    }

    /// Spawn the idle sweeper and the history janitor.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let sweeper = HeartbeatSweeper::new(
            self.deps.registry.clone(),
            self.deps.clock.clone(),
            self.config.sweep,
        )
        .spawn(self.shutdown.token());
        let janitor = spawn_janitor(
            self.deps.history.clone(),
            self.config.purge_interval,
            self.shutdown.token(),
        );
        vec![sweeper, janitor]
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let session = Arc::new(SessionContext {
            registry: self.deps.registry.clone(),
            dispatcher: self.deps.dispatcher.clone(),
            presence: self.deps.presence.clone(),
            mirror: self.mirror.clone(),
            clock: self.deps.clock.clone(),
            queue_capacity: self.config.queue_capacity,
            presence_ttl: self.config.presence_ttl,
            shutdown: self.shutdown.token(),
        });
        let state = AppState {
            session,
            auth: self.deps.auth.clone(),
            history: self.deps.history.clone(),
            groups: self.deps.groups.clone(),
            metrics: self.deps.metrics.clone(),
            start_time: self.start_time,
            max_message_size: self.config.max_message_size,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/history", get(history_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve until shutdown. Returns the bound address and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
            {
                error!(error = %e, "server error");
            }
        });

        info!(%local_addr, "parley server listening");
        Ok((local_addr, handle))
    }

    /// Signal shutdown and close every live connection.
    pub fn begin_shutdown(&self) -> usize {
        self.shutdown.begin(self.deps.registry.as_ref())
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.deps.registry
    }

    /// Get the history store.
    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.deps.history
    }

    /// Get the mirror publisher.
    pub fn mirror(&self) -> &Arc<BroadcastMirror> {
        &self.mirror
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws?userId=&token=
async fn ws_handler(
    Query(query): Query<HandshakeQuery>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let identity = match authorize_handshake(&query, state.auth.as_ref()) {
        Ok(identity) => identity,
        Err(e) => {
            counter!(WS_HANDSHAKE_REJECTED_TOTAL).increment(1);
            info!(%remote_addr, error = %e, "handshake rejected");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };
    if state.session.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let ctx = state.session.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            run_session(sink, stream, identity, remote_addr, ctx).await;
        })
}

/// GET /health. 503 while draining so balancers stop routing handshakes here.
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let draining = state.session.shutdown.is_cancelled();
    let body = HealthResponse::snapshot(
        state.start_time,
        state.session.registry.as_ref(),
        &state.session.mirror,
        draining,
    );
    let status = if draining {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(body))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map_or_else(String::new, PrometheusHandle::render)
}

/// GET /history
async fn history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    read_history(
        &query,
        state.auth.as_ref(),
        state.history.as_ref(),
        state.groups.as_ref(),
    )
    .await
    .map(Json)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use parley_core::{Envelope, HistoryKey, SystemClock, UserId};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::{Claims, issue_token};

    fn make_server() -> ChatServer {
        let settings = ParleySettings::default();
        let deps = ServerDeps::in_memory(&settings, Arc::new(SystemClock));
        ChatServer::new(ServerConfig::default(), deps)
    }

    fn app(server: &ChatServer) -> Router {
        server
            .router()
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 9999))))
    }

    fn token_for(user: i64) -> String {
        let settings = ParleySettings::default();
        issue_token(
            settings.auth.jwt_secret.as_bytes(),
            &Claims {
                user_id: user,
                username: format!("user{user}"),
                exp: (chrono::Utc::now().timestamp() + 3600) as u64,
            },
        )
        .unwrap()
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        (status, body.to_vec())
    }

    #[test]
    fn default_config_is_ephemeral_loopback() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.queue_capacity, 50);
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let (status, body) = get(app(&server), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["mirror"]["enabled"], false);
    }

    #[tokio::test]
    async fn health_reports_draining_after_shutdown() {
        let server = make_server();
        let _ = server.begin_shutdown();
        let (status, body) = get(app(&server), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "draining");
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_handle() {
        let settings = ParleySettings::default();
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let deps = ServerDeps::in_memory(&settings, Arc::new(SystemClock)).with_metrics(handle);
        let server = ChatServer::new(ServerConfig::default(), deps);
        let (status, _) = get(app(&server), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_without_token_is_unauthorized() {
        let server = make_server();
        let (status, body) = get(app(&server), "/ws?userId=5").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(String::from_utf8(body).unwrap(), "missing token");
    }

    #[tokio::test]
    async fn ws_with_bad_token_is_unauthorized() {
        let server = make_server();
        let (status, _) = get(app(&server), "/ws?userId=5&token=garbage").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ws_with_someone_elses_token_is_unauthorized() {
        let server = make_server();
        let uri = format!("/ws?userId=5&token={}", token_for(6));
        let (status, body) = get(app(&server), &uri).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(String::from_utf8(body).unwrap().contains("not 5"));
    }

    #[tokio::test]
    async fn ws_with_valid_token_needs_upgrade_headers() {
        let server = make_server();
        let uri = format!("/ws?userId=5&token={}", token_for(5));
        let (status, _) = get(app(&server), &uri).await;
        assert_ne!(status, StatusCode::UNAUTHORIZED);
        assert!(status.is_client_error());
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn history_endpoint_reads_store() {
        let server = make_server();
        let frame = Envelope::direct(UserId::new(5), UserId::new(7), "stored")
            .encode()
            .unwrap();
        let _ = server
            .history()
            .append(&HistoryKey::direct(UserId::new(5), UserId::new(7)), frame)
            .await
            .unwrap();

        let uri = format!("/history?token={}&peer=7", token_for(5));
        let (status, body) = get(app(&server), &uri).await;
        assert_eq!(status, StatusCode::OK);
        let parsed: Vec<Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["Content"], "stored");
    }

    #[tokio::test]
    async fn history_endpoint_rejects_missing_token() {
        let server = make_server();
        let (status, _) = get(app(&server), "/history?peer=7").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let (status, _) = get(app(&server), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn begin_shutdown_cancels_token() {
        let server = make_server();
        let token = server.shutdown().token();
        assert_eq!(server.begin_shutdown(), 0);
        assert!(token.is_cancelled());
        assert!(server.shutdown().is_shutting_down());
    }
}
