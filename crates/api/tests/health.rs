//! Integration tests for the health check endpoint and general HTTP behaviour.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{body_json, get, scripted_registry, submit_tts, user_token, ScriptedWorker, Script};
use tower::ServiceExt;

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let test_app = common::build_test_app().await;
    let response = get(test_app.app(), "/health").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["db_healthy"], true);

    let names: Vec<&str> = json["capabilities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["noise_removal", "stt", "tts"]);
    let stt = &json["capabilities"][1];
    assert!(stt["models"]
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m == "whisper-base"));
    assert_eq!(stt["waiting"], 0);
    assert_eq!(stt["in_flight"], 0);

    test_app.shutdown().await;
}

#[tokio::test]
async fn health_reports_queue_occupancy() {
    let worker = ScriptedWorker::new([Script::Hang, Script::Hang]);
    let (_tx, rx) = sonora_workers::event_channel();
    let test_app = common::spawn_engine(scripted_registry(worker.clone(), 1, 10), rx).await;
    let token = user_token("alice");

    submit_tts(test_app.app(), &token, "scripted", "first").await;
    submit_tts(test_app.app(), &token, "scripted", "second").await;
    common::eventually(|| {
        let worker = worker.clone();
        async move { worker.submit_count() >= 1 }
    })
    .await;

    let json = body_json(get(test_app.app(), "/health").await).await;
    let tts = &json["capabilities"][0];
    assert_eq!(tts["name"], "tts");
    assert_eq!(tts["models"], serde_json::json!(["scripted"]));
    assert_eq!(tts["concurrency_limit"], 1);
    assert_eq!(tts["queue_depth_limit"], 10);
    assert_eq!(tts["in_flight"], 1);
    assert_eq!(tts["waiting"], 1);

    test_app.shutdown().await;
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let test_app = common::build_test_app().await;
    let response = get(test_app.app(), "/this-route-does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    test_app.shutdown().await;
}

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let test_app = common::build_test_app().await;
    let response = get(test_app.app(), "/health").await;

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("Response must contain an x-request-id header");
    assert_eq!(request_id.to_str().unwrap().len(), 36);

    test_app.shutdown().await;
}

#[tokio::test]
async fn cors_preflight_returns_correct_headers() {
    let test_app = common::build_test_app().await;

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/v1/jobs")
        .header("Origin", "http://localhost:5173")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "content-type")
        .body(Body::empty())
        .unwrap();

    let response = test_app.app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let allow_origin = response
        .headers()
        .get("access-control-allow-origin")
        .expect("Missing Access-Control-Allow-Origin header")
        .to_str()
        .unwrap();
    assert_eq!(allow_origin, "http://localhost:5173");

    test_app.shutdown().await;
}
