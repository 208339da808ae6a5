// tests/api_http.rs
//
// HTTP-level tests for the control Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use common::{query, record, source, ts, Harness};
use issue_watch::api::{self, AppState};
use issue_watch::model::Source;
use issue_watch::PollEngine;

const BODY_LIMIT: usize = 1024 * 1024;

fn setup() -> (Harness, Arc<PollEngine>, Source) {
    let h = Harness::new();
    let src = source("Work", 1, vec![query("Mine", "m")]);
    h.exec.set("m", vec![record("1", "Open", ts(0))]);
    let engine = Arc::new(h.engine(vec![src.clone()], Duration::from_secs(3600)));
    (h, engine, src)
}

fn app(engine: &Arc<PollEngine>) -> Router {
    api::router(AppState::new(Arc::clone(engine)))
}

async fn call(app: Router, method: &str, uri: &str, body: Option<Json>) -> (StatusCode, String) {
    let req = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => req
            .header("content-type", "application/json")
            .body(Body::from(b.to_string())),
        None => req.body(Body::empty()),
    }
    .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.expect("read body");
    (status, String::from_utf8(bytes.to_vec()).expect("utf8"))
}

#[tokio::test]
async fn health_is_ok() {
    let (_h, engine, _) = setup();
    let (status, body) = call(app(&engine), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.trim(), "ok");
}

#[tokio::test]
async fn poll_now_then_status_and_issues() {
    let (_h, engine, src) = setup();

    let (status, body) = call(app(&engine), "POST", "/poll-now", None).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v[0]["change_count"], 1);

    let (_, body) = call(app(&engine), "GET", "/status", None).await;
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["running"], false);
    assert_eq!(v["sources"][0]["source_name"], "Work");
    assert_eq!(v["sources"][0]["has_changes"], true);

    let (status, body) = call(app(&engine), "GET", &format!("/status/{}", src.id), None).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["change_count"], 1);

    let (_, body) = call(app(&engine), "GET", "/issues", None).await;
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v[0]["key"], "OPS-1");
    assert_eq!(v[0]["is_new"], true);

    let (_, body) = call(app(&engine), "POST", "/issues/read", Some(json!(["1"]))).await;
    assert_eq!(serde_json::from_str::<Json>(&body).unwrap()["updated"], 1);
    let (_, body) = call(app(&engine), "GET", "/issues", None).await;
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v[0]["is_read"], true);
}

#[tokio::test]
async fn reset_counter_and_unknown_ids() {
    let (_h, engine, src) = setup();
    engine.poll_now().await;

    let (status, _) = call(app(&engine), "POST", &format!("/status/{}/reset", src.id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(engine.status(src.id).unwrap().change_count, 0);

    let unknown = issue_watch::model::SourceId::new();
    let (status, _) = call(app(&engine), "GET", &format!("/status/{unknown}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(app(&engine), "POST", &format!("/status/{unknown}/reset"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(app(&engine), "GET", "/status/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn restart_starts_the_engine() {
    let (_h, engine, _) = setup();
    let (status, body) = call(app(&engine), "POST", "/restart", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(serde_json::from_str::<Json>(&body).unwrap()["running"], true);
    engine.stop();
}

#[tokio::test]
async fn activity_filters_by_level() {
    let (h, engine, _) = setup();
    h.exec.fail("m", "unauthorized");
    engine.poll_now().await;

    let (status, body) = call(app(&engine), "GET", "/activity?level=error&limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).unwrap();
    let entries = v.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["level"], "ERROR");

    let (status, _) = call(app(&engine), "GET", "/activity?level=loud", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(app(&engine), "DELETE", "/activity", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = call(app(&engine), "GET", "/activity", None).await;
    assert_eq!(serde_json::from_str::<Json>(&body).unwrap(), json!([]));
}
