pub mod client;
pub mod face_server;
pub mod protocol;
pub mod server;

pub use client::ApiClient;
pub use server::{router, AppState};
