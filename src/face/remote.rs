use crate::common::{AuthError, Result};
use crate::core::{CapturedImage, FaceDetectionResult};
use crate::face::protocol::{
    reports_no_face, DetectResponse, FaceServiceRequest, RegisterResponse, VerifyResponse,
};
use crate::face::{FaceAuthBackend, FaceRegistration, FaceVerification};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Proxy to an external face-recognition service speaking the JSON protocol
/// in [`crate::face::protocol`].
pub struct RemoteBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl RemoteBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: &FaceServiceRequest) -> Result<T> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::ServiceUnavailable(format!("{} request failed: {}", endpoint, e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AuthError::ServiceUnavailable(format!("{} returned {}", endpoint, status)));
        }
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| format!("API error: {}", status.as_u16()));
            return Err(AuthError::FaceServiceRejected(message));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AuthError::FaceServiceRejected(format!("Invalid {} response: {}", endpoint, e)))
    }

    fn request(image: &CapturedImage, user_id: Option<&str>) -> FaceServiceRequest {
        FaceServiceRequest {
            image: image.to_base64(),
            user_id: user_id.map(str::to_string),
        }
    }
}

#[async_trait]
impl FaceAuthBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn detect(&self, image: &CapturedImage) -> Result<FaceDetectionResult> {
        let response: DetectResponse = self.post("detect", &Self::request(image, None)).await?;
        if !response.detected {
            return Ok(FaceDetectionResult::none());
        }
        Ok(FaceDetectionResult {
            detected: true,
            bounding_box: response.position.map(Into::into),
            confidence: response.confidence,
        })
    }

    async fn register(&self, identity: &str, image: &CapturedImage) -> Result<FaceRegistration> {
        let response: RegisterResponse = self.post("register", &Self::request(image, Some(identity))).await?;
        if !response.registered && reports_no_face(response.message.as_deref()) {
            return Err(AuthError::NoFaceDetected);
        }
        Ok(FaceRegistration {
            success: response.registered,
            reference: response.reference,
            message: response.message.unwrap_or_else(|| {
                if response.registered { "Face registered successfully" } else { "Face registration failed" }.to_string()
            }),
        })
    }

    async fn verify(&self, reference: Option<&str>, image: &CapturedImage) -> Result<FaceVerification> {
        let reference = match reference {
            Some(reference) => reference,
            None => return Ok(FaceVerification::rejected("User ID is required for verification")),
        };

        let response: VerifyResponse = self.post("verify", &Self::request(image, Some(reference))).await?;
        if !response.verified && reports_no_face(response.message.as_deref()) {
            return Err(AuthError::NoFaceDetected);
        }
        Ok(FaceVerification {
            success: response.verified,
            confidence: response.confidence,
            message: response.message.unwrap_or_else(|| {
                if response.verified { "Face verification successful" } else { "Face verification failed" }.to_string()
            }),
        })
    }
}
