//! Serves a `FaceAuthBackend` over the external face-service JSON protocol,
//! so `RemoteBackend` can be exercised end to end without the real service.

use crate::common::AuthError;
use crate::core::CapturedImage;
use crate::face::protocol::{DetectResponse, FaceServiceRequest, RegisterResponse, VerifyResponse};
use crate::face::FaceAuthBackend;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const NO_FACE: &str = "No face detected in image";

type Backend = Arc<dyn FaceAuthBackend>;

pub fn router(backend: Backend, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/detect", post(detect))
        .route("/register", post(register))
        .route("/verify", post(verify))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(backend)
}

pub async fn serve(bind: &str, backend: Backend, max_upload_bytes: usize) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Face service ({}) listening on {}", backend.name(), listener.local_addr()?);

    axum::serve(listener, router(backend, max_upload_bytes))
        .with_graceful_shutdown(crate::service::server::shutdown_signal())
        .await?;
    Ok(())
}

/// Failures the service reports in-band, with `success: false` and a message.
fn in_band(error: &AuthError) -> Option<String> {
    match error {
        AuthError::NoFaceDetected => Some(NO_FACE.to_string()),
        AuthError::InvalidInput(msg) => Some(msg.clone()),
        _ => None,
    }
}

fn internal(error: AuthError) -> Response {
    tracing::error!("Face backend failed: {}", error);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "success": false, "message": format!("Error processing image: {}", error) })),
    )
        .into_response()
}

fn decode(request: &FaceServiceRequest) -> Result<CapturedImage, String> {
    if request.image.is_empty() {
        return Err("No image provided".into());
    }
    CapturedImage::from_base64(&request.image).map_err(|e| e.to_string())
}

async fn detect(State(backend): State<Backend>, Json(request): Json<FaceServiceRequest>) -> Response {
    let image = match decode(&request) {
        Ok(image) => image,
        Err(message) => return rejected_detect(message),
    };
    match backend.detect(&image).await {
        Ok(result) => Json(DetectResponse {
            detected: result.detected,
            position: result.bounding_box.map(Into::into),
            confidence: result.confidence,
            message: (!result.detected).then(|| NO_FACE.to_string()),
        })
        .into_response(),
        Err(e) => match in_band(&e) {
            Some(message) => rejected_detect(message),
            None => internal(e),
        },
    }
}

fn rejected_detect(message: String) -> Response {
    Json(DetectResponse { detected: false, position: None, confidence: None, message: Some(message) }).into_response()
}

async fn register(State(backend): State<Backend>, Json(request): Json<FaceServiceRequest>) -> Response {
    let image = match decode(&request) {
        Ok(image) => image,
        Err(message) => return rejected_register(message),
    };
    let identity = request.user_id.as_deref().unwrap_or("anonymous");
    match backend.register(identity, &image).await {
        Ok(registration) => Json(RegisterResponse {
            registered: registration.success,
            reference: registration.reference,
            message: Some(registration.message),
        })
        .into_response(),
        Err(e) => match in_band(&e) {
            Some(message) => rejected_register(message),
            None => internal(e),
        },
    }
}

fn rejected_register(message: String) -> Response {
    Json(RegisterResponse { registered: false, reference: None, message: Some(message) }).into_response()
}

async fn verify(State(backend): State<Backend>, Json(request): Json<FaceServiceRequest>) -> Response {
    let image = match decode(&request) {
        Ok(image) => image,
        Err(message) => return rejected_verify(message),
    };
    if request.user_id.is_none() {
        return rejected_verify("No user ID provided".into());
    }
    match backend.verify(request.user_id.as_deref(), &image).await {
        Ok(outcome) => Json(VerifyResponse {
            verified: outcome.success,
            confidence: outcome.confidence,
            message: Some(outcome.message),
        })
        .into_response(),
        Err(e) => match in_band(&e) {
            Some(message) => rejected_verify(message),
            None => internal(e),
        },
    }
}

fn rejected_verify(message: String) -> Response {
    Json(VerifyResponse { verified: false, confidence: None, message: Some(message) }).into_response()
}
