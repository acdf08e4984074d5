//! JSON wire format of the external face-recognition service.
//!
//! Older deployments answer with `success` instead of `registered`/`verified`
//! and use `user_id` instead of `userId`; both spellings are accepted.

use serde::{Deserialize, Serialize};
use crate::core::BoundingBox;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FaceServiceRequest {
    /// Base64 image, without any data-URL prefix.
    pub image: String,
    #[serde(default, alias = "user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct FacePosition {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl From<FacePosition> for BoundingBox {
    fn from(p: FacePosition) -> Self {
        BoundingBox { x: p.x, y: p.y, width: p.width, height: p.height }
    }
}

impl From<BoundingBox> for FacePosition {
    fn from(b: BoundingBox) -> Self {
        FacePosition { x: b.x, y: b.y, width: b.width, height: b.height }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DetectResponse {
    #[serde(alias = "success")]
    pub detected: bool,
    #[serde(default)]
    pub position: Option<FacePosition>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterResponse {
    #[serde(alias = "success")]
    pub registered: bool,
    #[serde(default, rename = "embedding_id", alias = "reference")]
    pub reference: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VerifyResponse {
    #[serde(alias = "success")]
    pub verified: bool,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The service reports a missing face as a failed call with a message.
pub fn reports_no_face(message: Option<&str>) -> bool {
    message
        .map(|m| m.to_ascii_lowercase().contains("no face"))
        .unwrap_or(false)
}
