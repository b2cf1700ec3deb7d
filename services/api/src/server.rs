use crate::cli::ServeArgs;
use crate::infra::AppState;
use crate::routes::with_service_routes;
use ai_track::config::AppConfig;
use ai_track::error::AppError;
use ai_track::gateway::{self, Gateway};
use ai_track::scoring::WeightModel;
use ai_track::telemetry::{self, EventSink, ServiceEvent, TracingSink};
use ai_track::transit::TransitService;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(credentials) = args.credentials.take() {
        config.gateway.credentials = Some(credentials);
    }
    if let Some(weights) = args.weights.take() {
        config.model.weights_path = weights;
    }

    telemetry::init(&config.telemetry)?;
    let events: Arc<dyn EventSink> = Arc::new(TracingSink);

    // A missing or malformed model is fatal; nothing is served without it.
    let model = WeightModel::load(&config.model.weights_path)?;
    events.emit(ServiceEvent::ModelLoaded {
        path: config.model.weights_path.display().to_string(),
        weights: model.weights().len(),
    });

    let gateway = connect_gateway(&config, events.as_ref()).await;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let service = Arc::new(TransitService::new(Arc::new(model), gateway, events));
    let persistent = service.is_persistent();

    let app = with_service_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, persistent, "ai-track api ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// The API keeps serving without a store; registrations are then not persisted.
async fn connect_gateway(config: &AppConfig, events: &dyn EventSink) -> Gateway {
    match gateway::connect(&config.gateway).await {
        Ok(Some(gateway)) => {
            let credentials = config
                .gateway
                .credentials
                .as_deref()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            events.emit(ServiceEvent::GatewayConnected { credentials });
            Some(gateway)
        }
        Ok(None) => {
            events.emit(ServiceEvent::GatewayUnavailable {
                reason: "no service account credentials configured".to_string(),
            });
            None
        }
        Err(err) => {
            events.emit(ServiceEvent::GatewayUnavailable {
                reason: err.to_string(),
            });
            None
        }
    }
}
