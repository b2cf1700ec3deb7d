use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request builds")
}

fn registration_body() -> Value {
    json!({
        "transitName": "Harbor Express",
        "transitType": "bus",
        "licenseId": "LIC-2231",
        "plateNumber": "KDA 123X"
    })
}

#[tokio::test]
async fn health_reports_ok_with_timestamp() {
    let (service, _) = build_service(None);
    let router = router_with_service(service);

    let response = router.oneshot(get("/health")).await.expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["status"], json!("ok"));
    assert!(payload["time"].as_i64().is_some_and(|millis| millis > 0));
}

#[tokio::test]
async fn predict_route_returns_score() {
    let (service, _) = build_service(None);
    let router = router_with_service(service);

    let response = router
        .oneshot(post_json("/predict", json!({ "features": [1, 2, 3] })))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["success"], json!(true));
    let score = payload["score"].as_f64().expect("numeric score");
    assert!(score > 0.0 && score < 1.0);
}

#[tokio::test]
async fn predict_route_rejects_bad_feature_shapes() {
    for body in [
        json!({}),
        json!({ "features": "1,2,3" }),
        json!({ "features": [1, "two", 3] }),
    ] {
        let (service, _) = build_service(None);
        let response = router_with_service(service)
            .oneshot(post_json("/predict", body))
            .await
            .expect("route executes");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload = read_json_body(response).await;
        assert!(payload["error"].is_string());
    }
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let (service, _) = build_service(None);
    let router = router_with_service(service);

    let request = Request::post("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"features\": [1, 2"))
        .expect("request builds");
    let response = router.oneshot(request).await.expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn predict_route_rejects_forged_tokens() {
    let (service, _, _) = memory_service();
    let router = router_with_service(service);

    let response = router
        .oneshot(post_json(
            "/predict",
            json!({ "features": [1], "token": "forged" }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let payload = read_json_body(response).await;
    assert_eq!(payload, json!({ "error": "Invalid auth token" }));
}

#[tokio::test]
async fn register_route_lists_missing_fields() {
    let (service, _) = build_service(None);
    let router = router_with_service(service);

    let response = router
        .oneshot(post_json(
            "/transit/register",
            json!({ "transitName": "Harbor Express", "licenseId": "" }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json_body(response).await;
    let message = payload["error"].as_str().expect("error message");
    assert!(message.contains("transitType"));
    assert!(message.contains("licenseId"));
    assert!(message.contains("plateNumber"));
    assert!(!message.contains("transitName"));
}

#[tokio::test]
async fn register_route_without_store_is_not_persisted() {
    let (service, _) = build_service(None);
    let router = router_with_service(service);

    let response = router
        .oneshot(post_json("/transit/register", registration_body()))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["success"], json!(true));
    assert_eq!(payload["persisted"], json!(false));
    assert!(payload["id"]
        .as_str()
        .is_some_and(|id| id.starts_with("transit-")));
}

#[tokio::test]
async fn register_route_persists_with_store() {
    let (service, gateway, _) = memory_service();
    let router = router_with_service(service);

    let mut body = registration_body();
    body["token"] = json!(OPERATOR_TOKEN);
    let response = router
        .oneshot(post_json("/transit/register", body))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["persisted"], json!(true));
    let id = payload["id"].as_str().expect("document id");
    let stored = gateway.document("transit", id).expect("document stored");
    assert_eq!(stored.get("operatorUid"), Some(&json!(OPERATOR_UID)));
}

#[tokio::test]
async fn register_route_hides_store_failures() {
    let (service, _) = build_service(Some(Arc::new(UnavailableGateway)));
    let router = router_with_service(service);

    let response = router
        .oneshot(post_json("/transit/register", registration_body()))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload = read_json_body(response).await;
    assert_eq!(payload, json!({ "error": "internal error" }));
}

#[tokio::test]
async fn routes_route_requires_both_query_parameters() {
    let (service, _, _) = memory_service();
    let router = router_with_service(service);

    let response = router
        .oneshot(get("/routes?vehicle=bus"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn routes_route_returns_matching_documents() {
    let (service, _, _) = memory_service();
    let router = router_with_service(service);

    let response = router
        .oneshot(get("/routes?vehicle=tram&type=express"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(
        payload,
        json!([{ "id": "r3", "vehicle": "tram", "type": "express", "name": "Riverside" }])
    );
}

#[tokio::test]
async fn routes_route_without_store_is_empty() {
    let (service, _) = build_service(None);
    let router = router_with_service(service);

    let response = router
        .oneshot(get("/routes?vehicle=bus&type=express"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json_body(response).await, json!([]));
}
