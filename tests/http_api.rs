use foodgate::auth::TokenIssuer;
use foodgate::face::{FaceAuthBackend, FaceAuthClient, MockBackend, RemoteBackend, RetryPolicy};
use foodgate::service::{face_server, router, AppState};
use foodgate::session::{FileSessionStorage, SessionManager, SessionState};
use foodgate::storage::MemoryUserStore;
use foodgate::{ApiClient, AuthError, AuthService, Authenticator, CapturedImage, LoginForm, Role, SignupForm};
use image::{DynamicImage, GrayImage, Luma};
use std::sync::Arc;
use std::time::Duration;

fn face_a() -> CapturedImage {
    let img = GrayImage::from_fn(64, 64, |x, _| Luma([(x * 4) as u8]));
    CapturedImage::from_dynamic(&DynamicImage::ImageLuma8(img)).unwrap()
}

fn face_b() -> CapturedImage {
    let img = GrayImage::from_fn(64, 64, |_, y| Luma([(y * 4) as u8]));
    CapturedImage::from_dynamic(&DynamicImage::ImageLuma8(img)).unwrap()
}

fn blank() -> CapturedImage {
    let img = GrayImage::from_pixel(64, 64, Luma([128]));
    CapturedImage::from_dynamic(&DynamicImage::ImageLuma8(img)).unwrap()
}

async fn spawn(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        timeout: Duration::from_secs(5),
        max_retries: 1,
        backoff: Duration::from_millis(10),
    }
}

/// Face service, then an auth API using it through `RemoteBackend`.
async fn stack() -> (String, String) {
    let face_url = spawn(face_server::router(Arc::new(MockBackend::new(0.9)), 1024 * 1024)).await;

    let remote = RemoteBackend::new(&face_url, Duration::from_secs(5)).unwrap();
    let face = FaceAuthClient::new(Arc::new(remote), policy());
    let auth = AuthService::new(
        Arc::new(MemoryUserStore::new()),
        face,
        TokenIssuer::new(b"integration-test-secret-key", 3600),
    );
    let api_url = spawn(router(AppState::new(auth), 4 * 1024 * 1024)).await;
    (face_url, api_url)
}

fn signup_form(email: &str, face_image: Option<CapturedImage>) -> SignupForm {
    SignupForm {
        name: "Rosa".into(),
        email: email.into(),
        password: "pizza-margherita".into(),
        role: Role::Customer,
        face_image,
    }
}

#[tokio::test]
async fn face_signup_and_login_end_to_end() {
    let (_, api_url) = stack().await;
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileSessionStorage::new(dir.path().to_path_buf()).unwrap());
    let manager = SessionManager::new(Arc::new(ApiClient::new(&api_url).unwrap()), storage.clone());

    let session = manager.signup(signup_form("rosa@example.com", Some(face_a()))).await.unwrap();
    assert!(session.has_face_id);
    manager.logout().unwrap();

    let session = manager.login(LoginForm::with_face("rosa@example.com", face_a())).await.unwrap();
    assert_eq!(session.email, "rosa@example.com");
    manager.logout().unwrap();

    let err = manager.login(LoginForm::with_face("rosa@example.com", face_b())).await.unwrap_err();
    assert!(matches!(err, AuthError::VerificationFailed));
    assert_eq!(manager.state(), SessionState::Anonymous);
}

#[tokio::test]
async fn password_session_survives_restart_and_validates() {
    let (_, api_url) = stack().await;
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileSessionStorage::new(dir.path().to_path_buf()).unwrap());
    let api = Arc::new(ApiClient::new(&api_url).unwrap());

    let manager = SessionManager::new(api.clone(), storage.clone());
    manager.signup(signup_form("luigi@example.com", None)).await.unwrap();
    manager.logout().unwrap();
    let session = manager
        .login(LoginForm::with_password("LUIGI@example.com", "pizza-margherita"))
        .await
        .unwrap();
    assert!(!session.has_face_id);

    let restarted = SessionManager::new(api.clone(), storage);
    assert_eq!(restarted.restore().unwrap(), Some(session.clone()));
    assert_eq!(restarted.validate().await.unwrap(), Some(session));
}

#[tokio::test]
async fn api_errors_come_back_typed() {
    let (_, api_url) = stack().await;
    let api = ApiClient::new(&api_url).unwrap();

    api.signup(signup_form("mario@example.com", None)).await.unwrap();
    let duplicate = api.signup(signup_form("mario@example.com", None)).await.unwrap_err();
    assert!(matches!(duplicate, AuthError::EmailAlreadyRegistered(_)));

    let wrong = api.login(LoginForm::with_password("mario@example.com", "calzone")).await.unwrap_err();
    assert!(matches!(wrong, AuthError::InvalidCredentials));

    let no_face = api.signup(signup_form("peach@example.com", Some(blank()))).await.unwrap_err();
    assert!(matches!(no_face, AuthError::NoFaceDetected));

    let bad_token = api.profile("not-a-token").await.unwrap_err();
    assert!(matches!(bad_token, AuthError::InvalidCredentials));
}

#[tokio::test]
async fn chat_over_http() {
    let (_, api_url) = stack().await;
    let api = ApiClient::new(&api_url).unwrap();

    let reply = api.chat("How long will delivery take?").await.unwrap();
    assert!(reply.contains("minutes"));

    let empty = api.chat("").await.unwrap_err();
    assert!(matches!(empty, AuthError::InvalidInput(msg) if msg == "Please enter a message"));
}

#[tokio::test]
async fn remote_backend_speaks_the_face_protocol() {
    let (face_url, _) = stack().await;
    let remote = RemoteBackend::new(&face_url, Duration::from_secs(5)).unwrap();

    assert!(remote.detect(&face_a()).await.unwrap().detected);
    assert!(!remote.detect(&blank()).await.unwrap().detected);

    let registration = remote.register("toad@example.com", &face_a()).await.unwrap();
    let reference = registration.reference.unwrap();
    assert!(remote.verify(Some(&reference), &face_a()).await.unwrap().success);
    assert!(!remote.verify(Some("unknown"), &face_a()).await.unwrap().success);
    assert!(!remote.verify(None, &face_a()).await.unwrap().success);

    let err = remote.register("toad@example.com", &blank()).await.unwrap_err();
    assert!(matches!(err, AuthError::NoFaceDetected));
}

#[tokio::test]
async fn unreachable_face_service_is_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let remote = RemoteBackend::new(&url, Duration::from_secs(2)).unwrap();
    let client = FaceAuthClient::new(Arc::new(remote), policy());
    let err = client.detect(&face_a()).await.unwrap_err();
    assert!(matches!(err, AuthError::ServiceUnavailable(_)));
}
