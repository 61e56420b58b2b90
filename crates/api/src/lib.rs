//! Sensor Hub API Server
//!
//! REST API and WebSocket server for sensor registration, record queries,
//! live tails, and runtime ingestion reconfiguration.

use anyhow::Context;
use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use ingestion::{ActiveConfig, IngestionConsumer, IngestionController, MqttTransport};
use live_tail::LiveTail;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::Arc;
use storage::Repository;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod error;
mod routes;
pub mod settings;

pub use settings::Settings;

use settings::LoggingSettings;

/// Application state shared across handlers
pub struct AppState {
    /// Sensor registry and record store
    pub repository: Repository,
    /// Owner of the ingestion subscription
    pub controller: Arc<IngestionController>,
    /// Live tail poller
    pub live_tail: Arc<LiveTail>,
    /// Cancelled on server shutdown; live tails hang child tokens off it
    pub shutdown: CancellationToken,
    /// Prometheus exposition, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(
        repository: Repository,
        controller: Arc<IngestionController>,
        live_tail: Arc<LiveTail>,
    ) -> Self {
        Self {
            repository,
            controller,
            live_tail,
            shutdown: CancellationToken::new(),
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
    pub metrics: SystemMetrics,
}

/// Component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub database: String,
    pub ingestion: IngestionStatus,
}

/// Ingestion subscription status
#[derive(Debug, Serialize)]
pub struct IngestionStatus {
    pub status: String,
    pub config: Option<ActiveConfig>,
}

/// System metrics
#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub sensor_count: u64,
    pub record_count: u64,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route(
            "/mqtt-config",
            get(routes::ingestion::get_config).post(routes::ingestion::set_config),
        )
        .route(
            "/sensors",
            get(routes::sensors::list_sensors).post(routes::sensors::create_sensor),
        )
        .route(
            "/sensors/:id",
            get(routes::sensors::get_sensor)
                .put(routes::sensors::update_sensor)
                .delete(routes::sensors::delete_sensor),
        )
        .route("/records/:sensor_id", get(routes::records::list_records))
        .route("/ws/records/:sensor_id", get(routes::live::live_records))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counts = tokio::try_join!(
        state.repository.sensor_count(),
        state.repository.total_record_count()
    );
    let config = state.controller.current().await;

    let (database, sensor_count, record_count) = match counts {
        Ok((sensors, records)) => ("ok", sensors, records),
        Err(e) => {
            warn!(error = %e, "Health check could not reach the database");
            ("error", 0, 0)
        }
    };

    let response = HealthResponse {
        status: if database == "ok" { "healthy" } else { "degraded" }.to_string(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: ComponentStatus {
            database: database.to_string(),
            ingestion: IngestionStatus {
                status: if config.is_some() { "subscribed" } else { "idle" }.to_string(),
                config,
            },
        },
        metrics: SystemMetrics {
            sensor_count,
            record_count,
        },
    };

    Json(response)
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}

/// Initialize logging. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {e}");
    }
}

/// Run the server until `shutdown` is cancelled
pub async fn run_server(settings: Settings, shutdown: CancellationToken) -> anyhow::Result<()> {
    let repository =
        Repository::with_sqlite(&settings.database.url, settings.database.max_connections)
            .await
            .with_context(|| format!("opening database {}", settings.database.url))?;

    let consumer = Arc::new(IngestionConsumer::new(repository.clone()));
    let transport = Arc::new(MqttTransport::new(settings.mqtt.to_mqtt_settings()));
    let controller = Arc::new(IngestionController::new(
        transport,
        consumer,
        settings.mqtt.disconnect_grace(),
    ));

    if let Some(initial) = settings.mqtt.initial() {
        // Not fatal: the subscription can be supplied later via POST /mqtt-config.
        if let Err(e) = controller.reconfigure(initial).await {
            warn!(error = %e, "Startup ingestion configuration failed");
        }
    } else {
        info!("No MQTT broker configured; waiting for POST /mqtt-config");
    }

    let live_tail = Arc::new(LiveTail::new(
        repository.clone(),
        settings.live_tail.to_config(),
    ));

    let mut state = AppState::new(repository.clone(), Arc::clone(&controller), live_tail)
        .with_shutdown(shutdown.clone());
    if settings.metrics.enabled {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => state = state.with_metrics(handle),
            Err(e) => warn!(error = %e, "Failed to install metrics recorder"),
        }
    }

    let app = create_router(Arc::new(state));

    info!("Starting API server on {}", settings.server.bind_addr);
    let listener = tokio::net::TcpListener::bind(&settings.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.server.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("serving HTTP")?;

    info!("HTTP server stopped, closing ingestion");
    controller.shutdown().await;
    repository.close().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use ingestion::{ConfigError, IngestionConfig, Subscription, Transport};
    use live_tail::LiveTailConfig;
    use serde_json::{json, Value};
    use std::time::Duration;
    use storage::{NewRecord, SensorFields};
    use tower::ServiceExt;

    /// Accepts any `tcp://ok-broker` subscription without delivering anything
    struct StubTransport;

    struct StubSubscription;

    #[async_trait]
    impl Transport for StubTransport {
        async fn subscribe(
            &self,
            config: &IngestionConfig,
            _consumer: Arc<IngestionConsumer>,
        ) -> Result<Box<dyn Subscription>, ConfigError> {
            let address = config.validate()?;
            if address.host == "ok-broker" {
                Ok(Box::new(StubSubscription))
            } else {
                Err(ConfigError::Connection(format!("{address} refused")))
            }
        }
    }

    #[async_trait]
    impl Subscription for StubSubscription {
        async fn shutdown(self: Box<Self>, _grace: Duration) {}
    }

    async fn test_app() -> (Router, Repository) {
        let repository = Repository::in_memory().await.unwrap();
        let controller = Arc::new(IngestionController::new(
            Arc::new(StubTransport),
            Arc::new(IngestionConsumer::new(repository.clone())),
            Duration::from_millis(10),
        ));
        let live_tail = Arc::new(LiveTail::new(repository.clone(), LiveTailConfig::default()));
        let state = AppState::new(repository.clone(), controller, live_tail);
        (create_router(Arc::new(state)), repository)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn sensor_body(kind: &str) -> Value {
        json!({
            "type": kind,
            "unit": "C",
            "latitude": 48.1,
            "longitude": 11.5,
            "details": "north wall"
        })
    }

    #[tokio::test]
    async fn test_sensor_crud() {
        let (app, _) = test_app().await;

        let (status, created) = send(&app, "POST", "/sensors", Some(sensor_body("temperature"))).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["type"], "temperature");

        let (status, listed) = send(&app, "GET", "/sensors", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["id"], id.as_str());

        let (status, updated) = send(
            &app,
            "PUT",
            &format!("/sensors/{id}"),
            Some(sensor_body("pressure")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["type"], "pressure");
        assert_eq!(updated["created_at"], created["created_at"]);

        let (status, _) = send(&app, "DELETE", &format!("/sensors/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, "GET", &format!("/sensors/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_sensor_is_404() {
        let (app, _) = test_app().await;

        let (status, body) = send(&app, "PUT", "/sensors/nope", Some(sensor_body("x"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Sensor not found");

        let (status, _) = send(&app, "DELETE", "/sensors/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sensor_paging_falls_back_to_defaults() {
        let (app, _) = test_app().await;
        for i in 0..12 {
            send(&app, "POST", "/sensors", Some(sensor_body(&format!("k{i}")))).await;
        }

        let (_, page) = send(&app, "GET", "/sensors?limit=abc&offset=-4", None).await;
        assert_eq!(page.as_array().unwrap().len(), 10);

        let (_, page) = send(&app, "GET", "/sensors?limit=5&offset=10", None).await;
        assert_eq!(page.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_records_window_and_limit() {
        let (app, repo) = test_app().await;
        let sensor = repo.create_sensor(SensorFields::default()).await.unwrap();
        for hour in 0..6 {
            repo.insert_record(NewRecord {
                sensor_id: sensor.id.clone(),
                value: hour as f64,
                timestamp: format!("2024-03-01T{hour:02}:00:00Z").parse().unwrap(),
            })
            .await
            .unwrap();
        }

        let uri = format!(
            "/records/{}?start_time=2024-03-01T01:00:00Z&end_time=2024-03-01T05:00:00Z",
            sensor.id
        );
        let (status, records) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let values: Vec<f64> = records
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["value"].as_f64().unwrap())
            .collect();
        assert_eq!(values, vec![4.0, 3.0, 2.0, 1.0]);

        let (_, records) = send(&app, "GET", &format!("/records/{}?limit=2", sensor.id), None).await;
        assert_eq!(records.as_array().unwrap().len(), 2);
        assert_eq!(records[0]["value"], 5.0);
    }

    #[tokio::test]
    async fn test_reconfigure_endpoint() {
        let (app, _) = test_app().await;

        let (status, body) = send(&app, "GET", "/mqtt-config", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);

        let (status, body) = send(
            &app,
            "POST",
            "/mqtt-config",
            Some(json!({"broker": "tcp://ok-broker:1883", "topic": "sensors"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 1);
        assert_eq!(body["topic"], "sensors");

        let (_, body) = send(&app, "GET", "/mqtt-config", None).await;
        assert_eq!(body["broker"], "tcp://ok-broker:1883");
    }

    #[tokio::test]
    async fn test_reconfigure_failures_are_reported() {
        let (app, _) = test_app().await;

        let (status, body) = send(
            &app,
            "POST",
            "/mqtt-config",
            Some(json!({"broker": "tcp://down-broker", "topic": "sensors"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("refused"));

        let (status, _) = send(
            &app,
            "POST",
            "/mqtt-config",
            Some(json!({"broker": "ws://ok-broker", "topic": "sensors"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(&app, "GET", "/mqtt-config", None).await;
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_invalid_bodies_are_bad_requests() {
        let (app, _) = test_app().await;

        let (status, body) = send(&app, "POST", "/mqtt-config", Some(json!({"broker": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));

        let (status, _) = send(&app, "POST", "/sensors", Some(json!({"latitude": "north"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "PUT", "/sensors/any", Some(json!(["not", "an", "object"]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sensors")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let (app, repo) = test_app().await;
        repo.create_sensor(SensorFields::default()).await.unwrap();

        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["metrics"]["sensor_count"], 1);
        assert_eq!(body["components"]["ingestion"]["status"], "idle");
    }

    #[tokio::test]
    async fn test_metrics_disabled_without_recorder() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
