//! Face authentication: one backend interface, a mock and a remote
//! implementation, and the client that applies timeout and retry policy.

pub mod mock;
pub mod protocol;
pub mod remote;

pub use mock::MockBackend;
pub use remote::RemoteBackend;

use crate::common::config::{FaceBackendKind, FaceConfig};
use crate::common::{AuthError, DevMode, Result};
use crate::core::{CapturedImage, FaceDetectionResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceRegistration {
    pub success: bool,
    pub reference: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceVerification {
    pub success: bool,
    pub confidence: Option<f32>,
    pub message: String,
}

impl FaceVerification {
    pub fn rejected(message: &str) -> Self {
        Self { success: false, confidence: None, message: message.to_string() }
    }
}

/// The face-recognition capability. Feature extraction and comparison live
/// behind this trait; nothing in the crate does biometric matching itself.
#[async_trait]
pub trait FaceAuthBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn detect(&self, image: &CapturedImage) -> Result<FaceDetectionResult>;

    async fn register(&self, identity: &str, image: &CapturedImage) -> Result<FaceRegistration>;

    /// An unknown or missing reference is a non-match, not an error.
    async fn verify(&self, reference: Option<&str>, image: &CapturedImage) -> Result<FaceVerification>;
}

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FaceConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Exponential backoff before retry number `attempt + 1`, capped at
    /// `MAX_BACKOFF`.
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.backoff.checked_mul(factor))
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FaceConfig::default())
    }
}

#[derive(Clone)]
pub struct FaceAuthClient {
    backend: Arc<dyn FaceAuthBackend>,
    policy: RetryPolicy,
}

impl FaceAuthClient {
    pub fn new(backend: Arc<dyn FaceAuthBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// Builds the backend selected by `[face] backend`. The mock backend
    /// keeps its references under the data directory unless
    /// `mock_references` points elsewhere.
    pub fn from_config(config: &FaceConfig, dev_mode: &DevMode) -> Result<Self> {
        let backend: Arc<dyn FaceAuthBackend> = match config.backend {
            FaceBackendKind::Mock => {
                let table = config
                    .mock_references
                    .clone()
                    .unwrap_or_else(|| dev_mode.face_references_path());
                Arc::new(MockBackend::open(config.mock_match_threshold, table)?)
            }
            FaceBackendKind::Remote => Arc::new(RemoteBackend::new(
                &config.service_url,
                Duration::from_millis(config.timeout_ms),
            )?),
        };
        tracing::info!("Face backend: {}", backend.name());
        Ok(Self::new(backend, RetryPolicy::from_config(config)))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn detect(&self, image: &CapturedImage) -> Result<FaceDetectionResult> {
        let backend = &self.backend;
        self.call("detect", move || backend.detect(image)).await
    }

    pub async fn register(&self, identity: &str, image: &CapturedImage) -> Result<FaceRegistration> {
        let backend = &self.backend;
        self.call("register", move || backend.register(identity, image)).await
    }

    pub async fn verify(&self, reference: Option<&str>, image: &CapturedImage) -> Result<FaceVerification> {
        let backend = &self.backend;
        self.call("verify", move || backend.verify(reference, image)).await
    }

    /// Like [`verify`](Self::verify) but a non-match is `VerificationFailed`.
    pub async fn require_match(&self, reference: Option<&str>, image: &CapturedImage) -> Result<FaceVerification> {
        let outcome = self.verify(reference, image).await?;
        if !outcome.success {
            tracing::info!("Face verification failed: {}", outcome.message);
            return Err(AuthError::VerificationFailed);
        }
        Ok(outcome)
    }

    async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let err = match tokio::time::timeout(self.policy.timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => AuthError::ServiceUnavailable(format!(
                    "{} timed out after {}ms", op, self.policy.timeout.as_millis()
                )),
            };

            if !err.is_transient() || attempt >= self.policy.max_retries {
                return Err(err);
            }

            let delay = self.policy.delay(attempt);
            tracing::warn!("Face {} failed (attempt {}): {}. Retrying in {:?}", op, attempt + 1, err, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
