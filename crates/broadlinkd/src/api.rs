use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    entities: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            entities: state.engine.entity_ids().len(),
        }),
    )
}

/// Handler for GET /v1/states
#[tracing::instrument(skip(state))]
async fn states(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.state_snapshot();
    (StatusCode::OK, Json(snapshot.sensors.clone()))
}

/// Handler for GET /v1/states/:entity_id
#[tracing::instrument(skip(state))]
async fn entity_state(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Response {
    let snapshot = state.engine.state_snapshot();
    match snapshot.sensors.get(&entity_id) {
        Some(sensor) => (StatusCode::OK, Json(sensor.clone())).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("entity {} not found", entity_id),
            }),
        )
            .into_response(),
    }
}

/// Handler for GET /v1/devices/:device_id
#[tracing::instrument(skip(state))]
async fn device(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Response {
    match state.engine.device(&device_id) {
        Some(device) => (StatusCode::OK, Json(device)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("device {} not found", device_id),
            }),
        )
            .into_response(),
    }
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/states", get(states))
        .route("/v1/states/:entity_id", get(entity_state))
        .route("/v1/devices/:device_id", get(device))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires. Entity state is
/// read from `engine` on every request.
pub async fn serve(
    listen: String,
    port: u16,
    engine: Arc<Engine>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, engine });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::engine::Device;
    use crate::engine::FromIntegrationMessage;
    use crate::engine::FromIntegrationSender;
    use crate::engine::Integration;
    use crate::engine::SensorState;
    use crate::engine::ToIntegrationMessage;

    /// Publishes a single humidity reading on setup
    struct OneSensor;

    #[async_trait]
    impl Integration for OneSensor {
        fn name(&self) -> &str {
            "one"
        }

        async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
            let msgs = [
                FromIntegrationMessage::DeviceDiscovered {
                    device: Device::new("34ea34b43c01".to_string(), "Office".to_string()),
                    integration_name: "one".to_string(),
                },
                FromIntegrationMessage::EntityDiscovered {
                    entity_id: "sensor.office_humidity".to_string(),
                    integration_name: "one".to_string(),
                    device_id: Some("34ea34b43c01".to_string()),
                },
                FromIntegrationMessage::SensorStateChanged {
                    entity_id: "sensor.office_humidity".to_string(),
                    state: SensorState {
                        value: Some(41.0),
                        friendly_name: "Office Humidity".to_string(),
                        unit_of_measurement: Some("%".to_string()),
                        device_class: Some("humidity".to_string()),
                        state_class: Some("measurement".to_string()),
                    },
                },
            ];
            for msg in msgs {
                tx.send(msg)
                    .await
                    .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;
            }
            Ok(())
        }

        async fn handle_message(
            &mut self,
            _msg: ToIntegrationMessage,
        ) -> Result<(), Box<dyn Error + Send>> {
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
            Ok(())
        }
    }

    async fn router_with_sensor() -> Router {
        let engine = Arc::new(Engine::new());
        let mut events = engine.subscribe();

        let runner = engine.clone();
        tokio::spawn(async move { runner.run().await });
        engine.register_integration("one".to_string(), Box::new(OneSensor));

        tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();

        create_router(Arc::new(AppState {
            version: "test",
            engine,
        }))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_ping() {
        let app = create_router(Arc::new(AppState {
            version: "test",
            engine: Arc::new(Engine::new()),
        }));
        let (status, body) = get_json(app, "/v1/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_info_counts_entities() {
        let (status, body) = get_json(router_with_sensor().await, "/v1/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], "test");
        assert_eq!(body["entities"], 1);
    }

    #[tokio::test]
    async fn test_states() {
        let (status, body) = get_json(router_with_sensor().await, "/v1/states").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sensor.office_humidity"]["value"], 41.0);
        assert_eq!(body["sensor.office_humidity"]["unit_of_measurement"], "%");
    }

    #[tokio::test]
    async fn test_entity_state() {
        let app = router_with_sensor().await;

        let (status, body) = get_json(app.clone(), "/v1/states/sensor.office_humidity").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["friendly_name"], "Office Humidity");

        let (status, body) = get_json(app, "/v1/states/sensor.missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "entity sensor.missing not found");
    }

    #[tokio::test]
    async fn test_device() {
        let app = router_with_sensor().await;

        let (status, body) = get_json(app.clone(), "/v1/devices/34ea34b43c01").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Office");
        assert_eq!(body["entity_ids"][0], "sensor.office_humidity");

        let (status, _) = get_json(app, "/v1/devices/000000000000").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
