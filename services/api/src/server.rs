use crate::cli::ServeArgs;
use crate::infra::{in_memory_dependencies, AppState};
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use compliance_engine::config::AppConfig;
use compliance_engine::engine::{engine_router, ComplianceEngine};
use compliance_engine::error::AppError;
use compliance_engine::obligations::{EntityRoster, StaticRulesProvider};
use compliance_engine::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let entities = match args.roster.take() {
        Some(path) => EntityRoster::from_path(path)?,
        None => Vec::new(),
    };
    info!(entities = entities.len(), "entity roster loaded");

    let engine = Arc::new(ComplianceEngine::new(
        config.engine.clone(),
        in_memory_dependencies(Arc::new(StaticRulesProvider::standard()), entities),
    ));

    let app = with_operational_routes(engine_router(engine))
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "compliance engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}
