pub mod frame;
pub mod user;

pub use frame::{BoundingBox, CapturedImage, FaceDetectionResult};
pub use user::{normalize_email, validate_email, PublicUser, Role, UserRecord};
