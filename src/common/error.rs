use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email is already registered: {0}")]
    EmailAlreadyRegistered(String),

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("No face detected")]
    NoFaceDetected,

    #[error("Face verification failed")]
    VerificationFailed,

    #[error("Face service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Face service rejected request: {0}")]
    FaceServiceRejected(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("An authentication attempt is already in progress")]
    AttemptInProgress,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AuthError>;

impl AuthError {
    /// Failures worth retrying: the remote side may answer next time.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::ServiceUnavailable(_))
    }

    /// Stable identifier carried in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::EmailAlreadyRegistered(_) => "email_already_registered",
            AuthError::CameraUnavailable(_) => "camera_unavailable",
            AuthError::NoFaceDetected => "no_face_detected",
            AuthError::VerificationFailed => "verification_failed",
            AuthError::ServiceUnavailable(_) => "service_unavailable",
            AuthError::FaceServiceRejected(_) => "face_service_rejected",
            AuthError::SessionExpired(_) => "session_expired",
            AuthError::AttemptInProgress => "attempt_in_progress",
            AuthError::InvalidInput(_) => "invalid_input",
            _ => "internal",
        }
    }

    /// Rebuild a typed error from an HTTP error body.
    pub fn from_code(code: &str, message: &str) -> Self {
        match code {
            "invalid_credentials" => AuthError::InvalidCredentials,
            "email_already_registered" => AuthError::EmailAlreadyRegistered(message.to_string()),
            "camera_unavailable" => AuthError::CameraUnavailable(message.to_string()),
            "no_face_detected" => AuthError::NoFaceDetected,
            "verification_failed" => AuthError::VerificationFailed,
            "service_unavailable" => AuthError::ServiceUnavailable(message.to_string()),
            "face_service_rejected" => AuthError::FaceServiceRejected(message.to_string()),
            "session_expired" => AuthError::SessionExpired(message.to_string()),
            "attempt_in_progress" => AuthError::AttemptInProgress,
            "invalid_input" => AuthError::InvalidInput(message.to_string()),
            _ => AuthError::Other(anyhow::anyhow!("Server error: {}", message)),
        }
    }
}
