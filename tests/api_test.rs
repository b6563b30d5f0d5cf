use std::{io::Cursor, sync::Arc};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use image::{DynamicImage, ImageFormat, RgbaImage};
use serde_json::{Value, json};
use tower::ServiceExt;

use sign_recognizer::{
    LabelVocabulary, LandmarkVector, LogitModel, Recognizer, SignClassifier,
    error::InferenceError,
    landmarks::LANDMARK_VALUES,
    pipeline::{HandDetector, Orientation},
    server::build_app,
    types::Frame,
};

/// Reports a hand only in frames wider than they are tall.
struct LandscapeHandDetector;

impl HandDetector for LandscapeHandDetector {
    fn detect(&self, frame: &Frame) -> anyhow::Result<Option<LandmarkVector>> {
        if frame.width <= frame.height {
            return Ok(None);
        }
        let mut raw = vec![0.2_f32; LANDMARK_VALUES];
        // Point 1 sits far to the right of the wrist.
        raw[3] = 0.9;
        Ok(Some(LandmarkVector::from_slice(&raw)?))
    }
}

/// Scores label `i` with the x offset of point `i`.
struct OffsetModel;

impl LogitModel for OffsetModel {
    fn logits(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError> {
        Ok(vec![features[0], features[3], features[6], features[9]])
    }
}

fn app_with(origins: Vec<String>, max_payload_size: usize) -> Router {
    let labels = LabelVocabulary::new(vec!["A".into(), "B".into(), "C".into(), "D".into()]).unwrap();
    let classifier = SignClassifier::new(Box::new(OffsetModel), labels).unwrap();
    let recognizer = Recognizer::new(
        Arc::new(LandscapeHandDetector),
        Arc::new(classifier),
        Orientation::default(),
        2,
    )
    .unwrap();
    build_app(Arc::new(recognizer), max_payload_size, origins)
}

fn app() -> Router {
    app_with(Vec::new(), 16 * 1024 * 1024)
}

fn png_base64(width: u32, height: u32) -> String {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(RgbaImage::new(width, height))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    BASE64_STANDARD.encode(buf.into_inner())
}

fn predict_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_and_root_report_running() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "status": "healthy" }));

    let response = app()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "running");
    assert!(body["message"].as_str().unwrap().contains("Sign Language"));
}

#[tokio::test]
async fn labels_lists_the_vocabulary() {
    let response = app()
        .oneshot(Request::builder().uri("/labels").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({ "labels": ["A", "B", "C", "D"], "top_k": 2 })
    );
}

#[tokio::test]
async fn predict_returns_ranked_letters() {
    let response = app()
        .oneshot(predict_request(json!({ "image": png_base64(8, 4) })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["letter"], "B");
    assert_eq!(body["landmarks_detected"], true);
    assert_eq!(body["error"], Value::Null);
    assert!(body["processing_time_ms"].as_f64().unwrap() >= 0.0);

    let top = body["top_predictions"].as_array().unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0]["letter"], "B");
    assert_eq!(top[0]["confidence"], body["confidence"]);
    assert!(top[0]["confidence"].as_f64().unwrap() > top[1]["confidence"].as_f64().unwrap());
}

#[tokio::test]
async fn predict_accepts_data_urls() {
    let url = format!("data:image/png;base64,{}", png_base64(8, 4));
    let response = app()
        .oneshot(predict_request(json!({ "image": url })))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["letter"], "B");
}

#[tokio::test]
async fn predict_without_hand_is_still_ok() {
    let response = app()
        .oneshot(predict_request(json!({ "image": png_base64(4, 8) })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["letter"], "");
    assert_eq!(body["confidence"], 0.0);
    assert_eq!(body["landmarks_detected"], false);
    assert_eq!(body["error"], "No hand detected in image");
    assert_eq!(body["top_predictions"], json!([]));
}

#[tokio::test]
async fn predict_reports_undecodable_images_in_body() {
    let response = app()
        .oneshot(predict_request(json!({ "image": "not an image" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["landmarks_detected"], false);
    assert!(body["error"].as_str().unwrap().contains("base64"));
}

#[tokio::test]
async fn predict_rejects_malformed_json() {
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"picture\": 1}"))
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn oversized_bodies_are_refused() {
    let response = app_with(Vec::new(), 1024)
        .oneshot(predict_request(json!({ "image": "A".repeat(4096) })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn cors_allows_any_origin_by_default() {
    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "http://phone.local")
        .body(Body::empty())
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn cors_allow_list_is_enforced() {
    let app = app_with(vec!["http://allowed.test".into()], 1024 * 1024);

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/predict")
        .header(header::ORIGIN, "http://allowed.test")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://allowed.test"
    );

    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "http://elsewhere.test")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}
