use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use {
    albumrelay_config::RelayConfig,
    albumrelay_engine::{Disposition, PushRelay},
    albumrelay_telegram::Update,
    axum::{
        Json, Router,
        body::Bytes,
        extract::State,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{get, post},
    },
    secrecy::{ExposeSecret, Secret},
    tokio_util::sync::CancellationToken,
    tower_http::trace::TraceLayer,
    tracing::{debug, info, warn},
};

/// Header Telegram sets to the secret given in `setWebhook`.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<PushRelay>,
    pub webhook_secret: Option<Arc<Secret<String>>>,
    /// Where the last raw update is written, when enabled.
    pub dump_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(config: &RelayConfig, relay: Arc<PushRelay>) -> Self {
        Self {
            relay,
            webhook_secret: config
                .telegram
                .webhook_secret
                .clone()
                .filter(|s| !s.expose_secret().is_empty())
                .map(Arc::new),
            dump_path: config
                .server
                .dump_last_update
                .then(|| config.storage.last_update_path()),
        }
    }

    fn secret_matches(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.webhook_secret else {
            return true;
        };
        headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|got| got == expected.expose_secret())
    }
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the router (shared between production startup and tests).
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/telegram/webhook", post(telegram_webhook_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `cancel` fires, then drain in-flight requests.
pub async fn start_server(
    config: &RelayConfig,
    state: AppState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "webhook server listening");

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("webhook server stopped");
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Always answers 200 once the update is accepted; relay failures are logged,
/// never surfaced to Telegram, so it does not redeliver.
async fn telegram_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if !state.secret_matches(&headers) {
        warn!("webhook call with missing or wrong secret token");
        return (StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let Some(update) = parse_update(&body) else {
        debug!(bytes = body.len(), "rejecting malformed update");
        return (StatusCode::BAD_REQUEST, "bad json");
    };

    if let Some(path) = &state.dump_path
        && let Err(e) = write_dump(path, &body).await
    {
        debug!(path = %path.display(), error = %e, "failed to write last update");
    }

    let update_id = update.update_id;
    let message = update.into_message();
    let report = state.relay.handle_message(message.as_ref()).await;
    match &report.disposition {
        Disposition::Ignored => debug!(update_id, "update carried no relayable image"),
        disposition => info!(update_id, ?disposition, sweep = ?report.sweep, "update handled"),
    }
    (StatusCode::OK, "ok")
}

fn parse_update(body: &[u8]) -> Option<Update> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

async fn write_dump(path: &std::path::Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body).await
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        albumrelay_common::{
            Error as CommonError, Result as CommonResult,
            sink::{RelaySink, UnitFile},
            source::{FileResolver, ResolvedFile},
            types::MessageId,
        },
        albumrelay_engine::RelayThrottle,
        async_trait::async_trait,
        axum::{body::Body, http::Request},
        std::{sync::Mutex, time::Duration},
        tower::ServiceExt,
    };

    struct StaticResolver;

    #[async_trait]
    impl FileResolver for StaticResolver {
        async fn resolve(&self, file_ref: &str) -> CommonResult<ResolvedFile> {
            if file_ref == "missing" {
                return Err(CommonError::message("no such file"));
            }
            Ok(ResolvedFile {
                file_path: format!("photos/{file_ref}.jpg"),
            })
        }

        async fn fetch(&self, _file: &ResolvedFile) -> CommonResult<Vec<u8>> {
            Ok(b"jpeg".to_vec())
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        units: Mutex<Vec<Vec<MessageId>>>,
    }

    #[async_trait]
    impl RelaySink for CollectingSink {
        async fn send_unit(&self, files: &[UnitFile], _caption: &str) -> CommonResult<()> {
            self.units
                .lock()
                .unwrap()
                .push(files.iter().map(|f| f.message_id).collect());
            Ok(())
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        config: RelayConfig,
        sink: Arc<CollectingSink>,
        app: Router,
    }

    fn fixture(secret: Option<&str>, dump: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = RelayConfig::default();
        config.storage.data_dir = tmp.path().to_path_buf();
        config.telegram.webhook_secret = secret.map(|s| Secret::new(s.to_string()));
        config.server.dump_last_update = dump;

        let sink = Arc::new(CollectingSink::default());
        let throttle = RelayThrottle::new(0, Duration::from_secs(60), CancellationToken::new()).shared();
        let relay = Arc::new(PushRelay::new(&config, Arc::new(StaticResolver), sink.clone(), throttle));
        let app = build_app(AppState::new(&config, relay));
        Fixture {
            _tmp: tmp,
            config,
            sink,
            app,
        }
    }

    fn webhook_request(body: &str, secret: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/telegram/webhook")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    const PHOTO_UPDATE: &str = r#"{
        "update_id": 1,
        "channel_post": {
            "message_id": 5,
            "caption": "hello",
            "photo": [{"file_id": "p5", "file_size": 10, "width": 1, "height": 1}]
        }
    }"#;

    #[tokio::test]
    async fn health_reports_ok() {
        let f = fixture(None, false);
        let response = f
            .app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"ok\""));
    }

    #[tokio::test]
    async fn standalone_photo_is_relayed() {
        let f = fixture(None, false);
        let response = f.app.oneshot(webhook_request(PHOTO_UPDATE, None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
        assert_eq!(*f.sink.units.lock().unwrap(), vec![vec![5]]);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let f = fixture(None, false);
        for body in ["{oops", "[1, 2]", "\"text\""] {
            let response = f.app.clone().oneshot(webhook_request(body, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_text(response).await, "bad json");
        }
    }

    #[tokio::test]
    async fn wrong_secret_is_unauthorized() {
        let f = fixture(Some("s3cret"), false);

        let missing = f.app.clone().oneshot(webhook_request(PHOTO_UPDATE, None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = f
            .app
            .clone()
            .oneshot(webhook_request(PHOTO_UPDATE, Some("nope")))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert!(f.sink.units.lock().unwrap().is_empty());

        let right = f
            .app
            .oneshot(webhook_request(PHOTO_UPDATE, Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(right.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn relay_failure_still_answers_ok() {
        let f = fixture(None, false);
        let body = r#"{"update_id": 2, "message": {"message_id": 9,
            "photo": [{"file_id": "missing", "width": 1, "height": 1}]}}"#;
        let response = f.app.oneshot(webhook_request(body, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(f.sink.units.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_update_is_dumped_when_enabled() {
        let f = fixture(None, true);
        let body = r#"{"update_id": 3}"#;
        let response = f.app.oneshot(webhook_request(body, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let dumped = std::fs::read_to_string(f.config.storage.last_update_path()).unwrap();
        assert_eq!(dumped, body);
    }
}
