pub mod auth;
pub mod camera;
pub mod chat;
pub mod common;
pub mod core;
pub mod face;
pub mod service;
pub mod session;
pub mod storage;

pub use auth::{AuthGrant, AuthService, LoginForm, SignupForm};
pub use camera::{CameraDevice, FaceCaptureController};
pub use common::{AuthError, Config, DevMode, Result};
pub use core::{CapturedImage, FaceDetectionResult, PublicUser, Role, UserRecord};
pub use face::{FaceAuthBackend, FaceAuthClient};
pub use service::ApiClient;
pub use session::{Authenticator, Session, SessionManager, SessionState};
pub use storage::CredentialStore;
