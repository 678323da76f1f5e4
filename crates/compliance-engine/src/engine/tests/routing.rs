use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use super::common::*;
use crate::engine::engine_router;

fn post_json(uri: &str, payload: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&payload).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn dashboard_route_returns_grouped_events() {
    let harness = harness();
    let router = engine_router(harness.engine.clone());

    let response = router
        .oneshot(
            Request::get("/api/v1/entities/ent-harbor/dashboard?as_of=2024-01-01")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["entity_id"], "ent-harbor");
    assert_eq!(body["due_soon"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["due_soon"][0]["status"], "due_soon");
}

#[tokio::test]
async fn unknown_entity_is_not_found() {
    let harness = harness();
    let response = engine_router(harness.engine.clone())
        .oneshot(
            Request::get("/api/v1/entities/ent-missing/events/overdue")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn completing_twice_conflicts() {
    let harness = harness();
    let upcoming = harness
        .engine
        .list_upcoming(&harbor_labs().id, 30, at(2024, 1, 1))
        .expect("upcoming");
    let uri = format!(
        "/api/v1/events/{}/complete?as_of=2024-01-05",
        upcoming[0].id
    );

    let first = engine_router(harness.engine.clone())
        .oneshot(post_json(&uri, json!({ "by": "owner@harborlabs.test" })))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let body = read_json_body(first).await;
    assert_eq!(body["change"]["to"], "completed");
    assert_eq!(body["next_cycle"]["due_date"], "2025-01-10");

    let second = engine_router(harness.engine.clone())
        .oneshot(post_json(&uri, json!({ "by": "owner@harborlabs.test" })))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn blank_waiver_reason_is_unprocessable() {
    let harness = harness();
    let upcoming = harness
        .engine
        .list_upcoming(&harbor_labs().id, 30, at(2024, 1, 1))
        .expect("upcoming");

    let response = engine_router(harness.engine.clone())
        .oneshot(post_json(
            &format!("/api/v1/events/{}/waive", upcoming[0].id),
            json!({ "by": "counsel", "reason": " " }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test(flavor = "multi_thread")]
async fn sweep_route_reports_and_history_lists_records() {
    let harness = harness();

    let response = engine_router(harness.engine.clone())
        .oneshot(
            Request::post("/api/v1/sweep?as_of=2024-01-01")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = read_json_body(response).await;
    assert_eq!(report["notifications_sent"], 1);
    assert_eq!(report["run_date"], "2024-01-01");

    let history = engine_router(harness.engine.clone())
        .oneshot(
            Request::get(format!("/api/v1/users/{OWNER}/notifications"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(history.status(), StatusCode::OK);
    let records = read_json_body(history).await;
    assert_eq!(records.as_array().map(Vec::len), Some(1));
    assert_eq!(records[0]["reason"], "deadline_approaching");
    assert_eq!(records[0]["channel"], "in_app");
}

#[tokio::test]
async fn interaction_on_unknown_record_is_not_found() {
    let harness = harness();
    let response = engine_router(harness.engine.clone())
        .oneshot(post_json(
            "/api/v1/notifications/ntf-missing/interactions",
            json!({ "kind": "dismissed" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
