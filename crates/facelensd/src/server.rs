//! HTTP surface: `POST /analyze` and `GET /health`.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use facelens_core::Outcome;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::EngineHandle;

const BODY_TOO_LARGE_MESSAGE: &str = "Request body too large";

/// Build the application router around a running engine.
pub fn router(engine: EngineHandle, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/analyze", post(analyze))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn analyze(
    State(engine): State<EngineHandle>,
    body: Result<Bytes, BytesRejection>,
) -> (StatusCode, Json<Value>) {
    let image = match body {
        Ok(body) => image_field(&body),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            tracing::warn!(error = %rejection, "request body over limit");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({ "error": BODY_TOO_LARGE_MESSAGE })),
            );
        }
        Err(rejection) => {
            tracing::debug!(error = %rejection, "unreadable request body");
            None
        }
    };

    let outcome = match engine.analyze(image).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(error = %err, "engine unavailable");
            Outcome::InternalFailure
        }
    };

    respond(&outcome)
}

async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "facelensd",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Extract the `image` string from a JSON request body.
///
/// Anything that is not a JSON object with a string `image` member yields
/// `None`, which the pipeline reports as bad input.
fn image_field(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value.get("image")?.as_str().map(str::to_owned)
}

fn respond(outcome: &Outcome) -> (StatusCode, Json<Value>) {
    let status = StatusCode::from_u16(outcome.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome.body()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use axum::body::Body;
    use axum::http::{header, Request};
    use facelens_core::classifier::{ClassifierError, DemographicClassifier};
    use facelens_core::decode::encode_data_url;
    use facelens_core::detector::{DetectorError, FaceLocator};
    use facelens_core::emotion::{EmotionAnalyzer, EmotionError};
    use facelens_core::{AgeBracket, BoundingBox, Demographics, Gender, ModelBundle};
    use http_body_util::BodyExt;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use tower::ServiceExt;

    /// Finds one face in bright images and none in dark ones.
    struct BrightnessLocator;

    impl FaceLocator for BrightnessLocator {
        fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            if image.get_pixel(0, 0)[0] > 127 {
                Ok(vec![BoundingBox { x1: 0, y1: 0, x2: 30, y2: 30, confidence: 0.98 }])
            } else {
                Ok(Vec::new())
            }
        }
    }

    struct FixedClassifier;

    impl DemographicClassifier for FixedClassifier {
        fn classify(&mut self, _face: &RgbImage) -> Result<Demographics, ClassifierError> {
            Ok(Demographics { gender: Gender::Male, age: AgeBracket::Adult })
        }
    }

    struct FixedEmotion(bool);

    impl EmotionAnalyzer for FixedEmotion {
        fn dominant_emotion(&mut self, _face: &RgbImage) -> Result<String, EmotionError> {
            if self.0 {
                Ok("happy".into())
            } else {
                Err(EmotionError::MalformedResult("injected".into()))
            }
        }
    }

    fn app(emotion_ok: bool) -> Router {
        app_with_limit(emotion_ok, 1024 * 1024)
    }

    fn app_with_limit(emotion_ok: bool, max_body_bytes: usize) -> Router {
        let bundle = ModelBundle::new(
            Box::new(BrightnessLocator),
            Box::new(FixedClassifier),
            Box::new(FixedEmotion(emotion_ok)),
            20,
        );
        router(spawn_engine(bundle).unwrap(), max_body_bytes)
    }

    fn data_url(value: u8) -> String {
        let img = RgbImage::from_pixel(64, 64, Rgb([value, value, value]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        encode_data_url(&buf.into_inner(), "image/png")
    }

    async fn post_analyze(app: Router, body: String) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method("POST")
            .uri("/analyze")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    fn json(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_success() {
        let body = serde_json::json!({ "image": data_url(255) }).to_string();
        let (status, bytes) = post_analyze(app(true), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json(&bytes),
            serde_json::json!({ "gender": "Male", "age": "25-32", "emotion": "happy" })
        );
    }

    #[tokio::test]
    async fn test_no_face_is_ok_status() {
        let body = serde_json::json!({ "image": data_url(0) }).to_string();
        let (status, bytes) = post_analyze(app(true), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&bytes), serde_json::json!({ "error": "No face detected" }));
    }

    #[tokio::test]
    async fn test_missing_and_empty_image_are_bad_request() {
        for body in [r#"{}"#, r#"{"image": ""}"#, r#"{"image": 42}"#, "not json"] {
            let (status, bytes) = post_analyze(app(true), body.to_string()).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
            assert_eq!(json(&bytes), serde_json::json!({ "error": "No image data provided" }));
        }
    }

    #[tokio::test]
    async fn test_data_url_without_comma_is_bad_request() {
        let body = serde_json::json!({ "image": "data:image/png;base64" }).to_string();
        let (status, _) = post_analyze(app(true), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_generic_500() {
        for image in ["data:image/png;base64,%%%%", "data:image/png;base64,aGVsbG8="] {
            let body = serde_json::json!({ "image": image }).to_string();
            let (status, bytes) = post_analyze(app(true), body).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(json(&bytes), serde_json::json!({ "error": "Internal server error" }));
        }
    }

    #[tokio::test]
    async fn test_oversized_body_is_json_413() {
        let body = serde_json::json!({ "image": data_url(255) }).to_string();
        assert!(body.len() > 64);
        let (status, bytes) = post_analyze(app_with_limit(true, 64), body).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json(&bytes), serde_json::json!({ "error": "Request body too large" }));
    }

    #[tokio::test]
    async fn test_emotion_failure_still_succeeds() {
        let body = serde_json::json!({ "image": data_url(200) }).to_string();
        let (status, bytes) = post_analyze(app(false), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&bytes)["emotion"], "Unknown");
        assert_eq!(json(&bytes)["gender"], "Male");
    }

    #[tokio::test]
    async fn test_same_input_same_bytes() {
        let app = app(true);
        let body = serde_json::json!({ "image": data_url(255) }).to_string();
        let (_, first) = post_analyze(app.clone(), body.clone()).await;
        let (_, second) = post_analyze(app, body).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/analyze")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let response = app(true).oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn test_health() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app(true).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(json(&bytes)["status"], "ok");
    }

    #[test]
    fn test_image_field_extraction() {
        assert_eq!(image_field(br#"{"image":"data:x,abc"}"#).as_deref(), Some("data:x,abc"));
        assert_eq!(image_field(br#"{"other":1}"#), None);
        assert_eq!(image_field(br#"["image"]"#), None);
        assert_eq!(image_field(b""), None);
    }
}
