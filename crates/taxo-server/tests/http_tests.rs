//! HTTP contract of the taxonomy server, driven in-process through `oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use taxo_kernel::change_set::ChangeSet;
use taxo_kernel::engine::TaxonomyEngine;
use taxo_kernel::persistence::MemoryBackend;
use taxo_server::build_router;
use taxo_test_utils::{
    add_child, engine_at_v1, open_engine, root_and_child, test_config, SlowBackend, A, B, R,
};
use tower::ServiceExt;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-actor", "alice")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn app_at_v1() -> (Router, Arc<TaxonomyEngine>, Arc<taxo_kernel::logging::AuditLog>) {
    let t = engine_at_v1(Arc::new(MemoryBackend::new())).await;
    (build_router(t.engine.clone()), t.engine, t.audit)
}

#[tokio::test]
async fn health_reports_active_version() {
    let (app, _, _) = app_at_v1().await;
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_version"], "1.0");
    assert_eq!(body["rollback_phase"], "idle");
}

#[tokio::test]
async fn versions_and_trees_are_readable() {
    let (app, _, _) = app_at_v1().await;

    let (status, body) = send(&app, get("/taxonomy/versions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], "1.0");
    assert_eq!(body["versions"].as_array().unwrap().len(), 2);

    let (status, active) = send(&app, get("/taxonomy/tree")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["version"], "1.0");
    assert_eq!(active["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(active["edges"].as_array().unwrap().len(), 1);

    let (status, named) = send(&app, get("/taxonomy/1.0/tree")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(named, active);

    let (status, _) = send(&app, get("/taxonomy/7.3/tree")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/taxonomy/not-a-version/tree")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, get("/taxonomy/1.8.1/tree")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("<major>.<minor>"));
}

#[tokio::test]
async fn migrate_then_diff_then_activate() {
    let (app, engine, audit) = app_at_v1().await;
    let request = json!({
        "base_version": "1.0",
        "change_set": serde_json::to_value(add_child(A, B, "B")).unwrap(),
    });

    let (status, body) = send(&app, post("/taxonomy/migrate", &request)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["version_id"], "1.1");

    let (status, diff) = send(&app, get("/taxonomy/diff?from=1.0&to=1.1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(diff["added_nodes"].as_array().unwrap().len(), 1);
    assert_eq!(diff["added_edges"][0]["child"], json!(B));

    let (status, body) = send(&app, post("/taxonomy/1.1/activate", &Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_version"], "1.1");
    assert_eq!(engine.active_version().to_string(), "1.1");

    // The header names the actor on both events.
    let events = audit.events();
    let last_two = &events[events.len() - 2..];
    assert!(last_two.iter().all(|e| e.actor.as_str() == "alice"));
}

#[tokio::test]
async fn rejected_migration_returns_the_validation_result() {
    let (app, _, _) = app_at_v1().await;
    let cycle = ChangeSet::default().add_edge(A, R);
    let request = json!({ "base_version": "1.0", "change_set": cycle });

    let (status, body) = send(&app, post("/taxonomy/migrate", &request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["validation"]["is_valid"], false);
    assert_eq!(body["validation"]["cycles"].as_array().unwrap().len(), 1);

    let (status, preview) = send(&app, post("/taxonomy/migrate/preview", &request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["validation"]["is_valid"], false);
    assert_eq!(preview["hypothetical_version"], "1.1");
}

#[tokio::test]
async fn activating_unknown_version_is_404() {
    let (app, _, _) = app_at_v1().await;
    let (status, body) = send(&app, post("/taxonomy/4.4/activate", &Value::Null)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("4.4"));
}

#[tokio::test]
async fn rollback_statuses() {
    let (app, engine, _) = app_at_v1().await;
    engine
        .apply(taxo_kernel::VersionId::new(1, 0), &add_child(A, B, "B"))
        .await
        .unwrap();

    let (status, body) = send(
        &app,
        post("/taxonomy/rollback", &json!({ "target_version": "1.1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["succeeded"], true);
    assert_eq!(body["previous_version"], "1.0");

    let (status, body) = send(
        &app,
        post("/taxonomy/rollback", &json!({ "target_version": "9.9" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["succeeded"], false);
    assert_eq!(body["failure"]["kind"], "target_not_found");
}

#[tokio::test]
async fn rollback_past_deadline_is_504() {
    let backend = Arc::new(SlowBackend::new());
    let t = open_engine(
        test_config().with_ttr_budget(Duration::from_millis(50)),
        backend.clone(),
    )
    .await;
    let v1 = t
        .engine
        .apply(taxo_kernel::VersionId::BOOTSTRAP, &root_and_child())
        .await
        .unwrap();
    let app = build_router(t.engine.clone());

    backend.set_active_delay(Duration::from_secs(2));
    let (status, body) = send(
        &app,
        post("/taxonomy/rollback", &json!({ "target_version": v1 })),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["failure"]["kind"], "deadline_exceeded");
    assert_eq!(body["failure"]["budget_ms"], 50);
}

#[tokio::test]
async fn prune_via_delete() {
    let t = open_engine(
        test_config().with_rollback_targets(1),
        Arc::new(MemoryBackend::new()),
    )
    .await;
    let v1 = t
        .engine
        .apply(taxo_kernel::VersionId::BOOTSTRAP, &root_and_child())
        .await
        .unwrap();
    t.engine.activate(v1, taxo_test_utils::curator()).await.unwrap();
    let app = build_router(t.engine.clone());

    let delete = |uri: &str| {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };
    let (status, _) = send(&app, delete("/taxonomy/1.0/tree")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, delete("/taxonomy/0.0/tree")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = send(&app, get("/taxonomy/0.0/tree")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
