use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{ComplianceEngine, EngineError};
use crate::notifications::domain::{InteractionKind, RecordId};
use crate::obligations::domain::{EntityId, EventId, UserId};
use crate::obligations::lifecycle::LifecycleError;
use crate::repository::RepositoryError;

/// HTTP surface of the engine.
pub fn engine_router(engine: Arc<ComplianceEngine>) -> Router {
    Router::new()
        .route(
            "/api/v1/entities/:entity_id/events/upcoming",
            get(upcoming_handler),
        )
        .route(
            "/api/v1/entities/:entity_id/events/overdue",
            get(overdue_handler),
        )
        .route("/api/v1/entities/:entity_id/dashboard", get(dashboard_handler))
        .route("/api/v1/events/:event_id/complete", post(complete_handler))
        .route("/api/v1/events/:event_id/waive", post(waive_handler))
        .route(
            "/api/v1/notifications/:record_id/interactions",
            post(interaction_handler),
        )
        .route(
            "/api/v1/users/:user_id/notifications",
            get(history_handler),
        )
        .route("/api/v1/sweep", post(sweep_handler))
        .with_state(engine)
}

/// `as_of` pins the evaluation date; the current time is used otherwise.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct AsOfQuery {
    #[serde(default)]
    as_of: Option<NaiveDate>,
    #[serde(default)]
    within_days: Option<u32>,
}

impl AsOfQuery {
    fn now(&self) -> DateTime<Utc> {
        match self.as_of {
            Some(date) => Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)),
            None => Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompleteRequest {
    by: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WaiveRequest {
    by: String,
    reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InteractionRequest {
    kind: InteractionKind,
}

const DEFAULT_WITHIN_DAYS: u32 = 30;

pub(crate) async fn upcoming_handler(
    State(engine): State<Arc<ComplianceEngine>>,
    Path(entity_id): Path<String>,
    Query(query): Query<AsOfQuery>,
) -> Response {
    let within_days = query.within_days.unwrap_or(DEFAULT_WITHIN_DAYS);
    match engine.list_upcoming(&EntityId(entity_id), within_days, query.now()) {
        Ok(events) => (StatusCode::OK, axum::Json(events)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn overdue_handler(
    State(engine): State<Arc<ComplianceEngine>>,
    Path(entity_id): Path<String>,
    Query(query): Query<AsOfQuery>,
) -> Response {
    match engine.list_overdue(&EntityId(entity_id), query.now()) {
        Ok(events) => (StatusCode::OK, axum::Json(events)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn dashboard_handler(
    State(engine): State<Arc<ComplianceEngine>>,
    Path(entity_id): Path<String>,
    Query(query): Query<AsOfQuery>,
) -> Response {
    match engine.dashboard(&EntityId(entity_id), query.now()) {
        Ok(dashboard) => (StatusCode::OK, axum::Json(dashboard)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn complete_handler(
    State(engine): State<Arc<ComplianceEngine>>,
    Path(event_id): Path<String>,
    Query(query): Query<AsOfQuery>,
    axum::Json(request): axum::Json<CompleteRequest>,
) -> Response {
    match engine.mark_completed(&EventId(event_id), &request.by, query.now()) {
        Ok(transition) => (StatusCode::OK, axum::Json(transition)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn waive_handler(
    State(engine): State<Arc<ComplianceEngine>>,
    Path(event_id): Path<String>,
    Query(query): Query<AsOfQuery>,
    axum::Json(request): axum::Json<WaiveRequest>,
) -> Response {
    match engine.mark_waived(
        &EventId(event_id),
        &request.by,
        &request.reason,
        query.now(),
    ) {
        Ok(transition) => (StatusCode::OK, axum::Json(transition)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn interaction_handler(
    State(engine): State<Arc<ComplianceEngine>>,
    Path(record_id): Path<String>,
    axum::Json(request): axum::Json<InteractionRequest>,
) -> Response {
    match engine.record_interaction(&RecordId(record_id), request.kind, Utc::now()) {
        Ok(interaction) => (StatusCode::CREATED, axum::Json(interaction)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn history_handler(
    State(engine): State<Arc<ComplianceEngine>>,
    Path(user_id): Path<String>,
) -> Response {
    match engine.notification_history(&UserId(user_id)) {
        Ok(records) => (StatusCode::OK, axum::Json(records)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn sweep_handler(
    State(engine): State<Arc<ComplianceEngine>>,
    Query(query): Query<AsOfQuery>,
) -> Response {
    let now = query.now();
    match tokio::task::spawn_blocking(move || engine.run_sweep(now)).await {
        Ok(Ok(report)) => (StatusCode::OK, axum::Json(report)).into_response(),
        Ok(Err(err)) => error_response(err),
        Err(join_error) => {
            let payload = json!({
                "error": format!("sweep task aborted: {join_error}"),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

fn error_response(err: EngineError) -> Response {
    let status = match &err {
        EngineError::EntityNotFound(_)
        | EngineError::EventNotFound(_)
        | EngineError::RecordNotFound(_)
        | EngineError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        EngineError::Lifecycle(LifecycleError::InvalidTransition { .. })
        | EngineError::ConcurrentUpdate(_)
        | EngineError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        EngineError::Lifecycle(LifecycleError::MissingWaiverReason) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::Repository(RepositoryError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    let payload = json!({
        "error": err.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}
