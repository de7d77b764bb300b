//! Climate Readings API Server
//!
//! REST API over the reading service plus a WebSocket live feed.

use anyhow::Context;
use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_governor::GovernorLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, Level};

pub mod error;
pub mod live;
pub mod rate_limit;
mod routes;
pub mod settings;

pub use error::ApiError;
pub use live::ReadingEvent;
pub use settings::Settings;

use readings::{fixtures, ReadingService};
use settings::{DatabaseSettings, LoggingSettings, MEMORY_DATABASE};
use storage::{MemoryStore, ReadingStore, SqliteStore};

/// Application state shared across handlers
pub struct AppState {
    /// Reading service
    pub service: ReadingService,
    /// Live feed of writes
    pub events: broadcast::Sender<ReadingEvent>,
    /// Prometheus handle, when metrics are enabled
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(service: ReadingService) -> Self {
        let (events, _) = broadcast::channel(live::EVENT_CAPACITY);
        Self {
            service,
            events,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }

    /// Broadcast a write to live feed subscribers, if any
    pub fn publish(&self, event: ReadingEvent) {
        // Sending only fails when nobody is listening
        let _ = self.events.send(event);
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>, settings: &Settings) -> anyhow::Result<Router> {
    let mut router = Router::new()
        .route(
            "/api/sensors",
            get(routes::sensors::list).post(routes::sensors::create),
        )
        .route("/api/sensors/latest", get(routes::sensors::latest))
        .route("/api/sensors/ingest", post(routes::sensors::ingest))
        .route(
            "/api/sensors/:id",
            get(routes::sensors::get_one)
                .put(routes::sensors::update)
                .delete(routes::sensors::delete),
        )
        .route("/api/health", get(routes::health::health))
        .route("/metrics", get(routes::health::metrics))
        .route("/ws/sensors", get(live::subscribe))
        .with_state(state);

    if settings.rate_limit.enabled {
        let config = rate_limit::create_governor_config(&settings.rate_limit)?;
        router = router.layer(GovernorLayer { config });
    }

    if let Some(origin) = &settings.cors.allowed_origin {
        router = router.layer(cors_layer(origin)?);
        info!("Cross-origin access allowed for {}", origin);
    }

    Ok(router.layer(TraceLayer::new_for_http()))
}

/// CORS layer admitting exactly one origin. Requests from any other origin
/// get no `Access-Control-Allow-Origin` header.
pub fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let origin = HeaderValue::from_str(origin)
        .with_context(|| format!("invalid cors.allowed_origin {:?}", origin))?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list([origin]))
        .allow_methods(Any)
        .allow_headers(Any))
}

/// Initialize logging
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<()> {
    let level = Level::from_str(&settings.level)
        .with_context(|| format!("invalid logging.level {:?}", settings.level))?;

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true);

    let result = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to set tracing subscriber: {}", e))
}

/// Opened storage backend. The SQLite pool is kept to close it on shutdown.
struct Backend {
    store: Arc<dyn ReadingStore>,
    sqlite: Option<SqliteStore>,
}

impl Backend {
    async fn open(settings: &DatabaseSettings) -> anyhow::Result<Self> {
        if settings.url == MEMORY_DATABASE {
            return Ok(Self {
                store: Arc::new(MemoryStore::new()),
                sqlite: None,
            });
        }

        let sqlite = SqliteStore::connect(&settings.url, settings.max_connections)
            .await
            .with_context(|| format!("failed to open database {}", settings.url))?;
        Ok(Self {
            store: Arc::new(sqlite.clone()),
            sqlite: Some(sqlite),
        })
    }

    async fn close(self) {
        if let Some(sqlite) = self.sqlite {
            sqlite.close().await;
        }
    }
}

/// Insert the demo readings into an empty store
pub async fn seed_if_empty(service: &ReadingService) -> anyhow::Result<()> {
    if service.count().await? > 0 {
        info!("Store already populated, skipping seed");
        return Ok(());
    }
    service.save_all(fixtures::seed_readings()).await?;
    Ok(())
}

/// Run the server until Ctrl-C or SIGTERM
pub async fn run_server(settings: Settings) -> anyhow::Result<()> {
    let backend = Backend::open(&settings.database).await?;
    let service = ReadingService::new(Arc::clone(&backend.store));

    if settings.seed.enabled {
        seed_if_empty(&service).await?;
    }

    let mut state = AppState::new(service);
    if settings.metrics.enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install Prometheus recorder")?;
        state.metrics = Some(handle);
    }

    let app = create_router(Arc::new(state), &settings)?;

    let listener = tokio::net::TcpListener::bind(&settings.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.server.bind_addr))?;
    info!("Starting API server on {}", listener.local_addr()?);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    backend.close().await;
    served?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{CorsSettings, DEV_ORIGIN};
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let service = ReadingService::new(Arc::new(MemoryStore::new()));
        Arc::new(AppState::new(service))
    }

    fn test_app(state: Arc<AppState>) -> Router {
        create_router(state, &Settings::default()).unwrap()
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let app = test_app(test_state());

        let (status, created) = send(
            &app,
            Method::POST,
            "/api/sensors",
            Some(json!({"temperature": 21.5, "humidity": 45.0, "sensorDateTime": "2025-10-15"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["temperature"], 21.5);
        assert_eq!(created["humidity"], 45.0);
        assert_eq!(created["sensorDateTime"], "2025-10-15");
        let id = created["sensorId"].as_i64().unwrap();

        let (status, fetched) = send(&app, Method::GET, &format!("/api/sensors/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_get_missing_and_invalid_ids() {
        let app = test_app(test_state());

        let (status, body) = send(&app, Method::GET, "/api/sensors/77", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, body) = send(&app, Method::GET, "/api/sensors/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "malformed_request");
    }

    #[tokio::test]
    async fn test_latest_ordering() {
        let state = test_state();
        state.service.save_all(fixtures::seed_readings()).await.unwrap();
        let app = test_app(state);

        let (status, body) = send(&app, Method::GET, "/api/sensors/latest", None).await;
        assert_eq!(status, StatusCode::OK);
        let dates: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["sensorDateTime"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(dates, vec!["2025-12-17", "2025-11-16", "2025-10-15", "2025-09-12"]);
    }

    #[tokio::test]
    async fn test_update_replaces_values() {
        let app = test_app(test_state());
        let (_, created) = send(
            &app,
            Method::POST,
            "/api/sensors",
            Some(json!({"temperature": 21.5, "humidity": 45.0, "sensorDateTime": "2025-10-15"})),
        )
        .await;
        let uri = format!("/api/sensors/{}", created["sensorId"]);

        let (status, updated) = send(
            &app,
            Method::PUT,
            &uri,
            Some(json!({"sensorId": 999, "temperature": 3.0, "humidity": -1.0, "sensorDateTime": "2025-11-01"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["sensorId"], created["sensorId"]);
        assert_eq!(updated["humidity"], -1.0);

        let (_, fetched) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(fetched, updated);

        let (status, _) = send(
            &app,
            Method::PUT,
            "/api/sensors/12345",
            Some(json!({"temperature": 3.0, "humidity": 1.0, "sensorDateTime": "2025-11-01"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_then_lookup() {
        let app = test_app(test_state());
        let (_, created) = send(
            &app,
            Method::POST,
            "/api/sensors",
            Some(json!({"temperature": 1.0, "humidity": 2.0, "sensorDateTime": "2025-01-01"})),
        )
        .await;
        let uri = format!("/api/sensors/{}", created["sensorId"]);

        let (status, body) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (status, _) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_malformed_bodies() {
        let app = test_app(test_state());

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/sensors",
            Some(json!({"temperature": "hot", "humidity": 45.0, "sensorDateTime": "2025-10-15"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "malformed_request");

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/sensors",
            Some(json!({"temperature": 1.0, "humidity": 45.0, "sensorDateTime": "15/10/2025"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/sensors")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_with_date_range() {
        let state = test_state();
        state.service.save_all(fixtures::seed_readings()).await.unwrap();
        let app = test_app(state);

        let (status, all) = send(&app, Method::GET, "/api/sensors", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(all.as_array().unwrap().len(), 4);

        let (status, autumn) =
            send(&app, Method::GET, "/api/sensors?from=2025-10-01&to=2025-11-30", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(autumn.as_array().unwrap().len(), 2);

        let (status, _) =
            send(&app, Method::GET, "/api/sensors?from=2025-12-01&to=2025-01-01", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::GET, "/api/sensors?from=yesterday", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ingest_publishes_event() {
        let state = test_state();
        let mut events = state.events.subscribe();
        let app = test_app(Arc::clone(&state));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/sensors/ingest")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(
                "date = Tue Oct 14 09:30:00 2025 temperature = 21.5 humidity = 45.0 \
                 heater state = OFF power 48V state = ON power LCU state = ON lightning state = N.A.",
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["temperature"], 21.5);
        assert_eq!(body["sensorDateTime"], "2025-10-14");
        assert_eq!(
            body["stationStatus"],
            json!({"heater": "OFF", "power48v": "ON", "powerLcu": "ON", "lightning": "NOT_AVAILABLE"})
        );

        match events.recv().await.unwrap() {
            ReadingEvent::Created { reading } => {
                assert_eq!(reading.temperature, 21.5);
                assert_eq!(reading.recorded_date.to_string(), "2025-10-14");
            }
            other => panic!("unexpected event {:?}", other),
        }

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/sensors/ingest")
            .body(Body::from("temperature = 1"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ingest_rejects_non_utf8_body() {
        let state = test_state();
        let app = test_app(Arc::clone(&state));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/sensors/ingest")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(vec![0xff, 0xfe, 0x00, 0x64]))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "malformed_request");
        assert_eq!(state.service.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dates_beyond_year_9999_rejected() {
        let app = test_app(test_state());

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/sensors",
            Some(json!({"temperature": 1.0, "humidity": 2.0, "sensorDateTime": "+10000-01-01"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "malformed_request");

        let (status, body) =
            send(&app, Method::GET, "/api/sensors?from=%2B10000-01-01", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "malformed_request");

        let (status, _) = send(&app, Method::GET, "/api/sensors?to=9999-12-31", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app = test_app(test_state());

        let (status, body) = send(&app, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"]["status"], "ok");
        assert_eq!(body["reading_count"], 0);

        let response = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_only_for_configured_origin() {
        let settings = Settings {
            cors: CorsSettings {
                allowed_origin: Some(DEV_ORIGIN.to_string()),
            },
            ..Settings::default()
        };
        let app = create_router(test_state(), &settings).unwrap();

        let allowed = app
            .clone()
            .oneshot(
                Request::get("/api/sensors")
                    .header(header::ORIGIN, DEV_ORIGIN)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            allowed.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            DEV_ORIGIN
        );

        let denied = app
            .clone()
            .oneshot(
                Request::get("/api/sensors")
                    .header(header::ORIGIN, "http://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(denied.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        let plain = test_app(test_state())
            .oneshot(
                Request::get("/api/sensors")
                    .header(header::ORIGIN, DEV_ORIGIN)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(plain.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[test]
    fn test_invalid_origin_rejected() {
        assert!(cors_layer("bad\norigin").is_err());
    }
}
