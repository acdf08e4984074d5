use crate::auth::{AuthService, LoginForm, SignupForm};
use crate::chat::ChatResponder;
use crate::common::{AuthError, Config};
use crate::core::{CapturedImage, Role};
use crate::service::protocol::{ApiResponse, ChatRequest, ChatResponse, HealthResponse, FACE_IMAGE_FIELD};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub chat: ChatResponder,
}

impl AppState {
    pub fn new(auth: AuthService) -> Self {
        Self {
            auth: Arc::new(auth),
            chat: ChatResponder::new(),
        }
    }
}

/// An `AuthError` on its way out as an HTTP response.
pub struct ApiError(AuthError);

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError(e)
    }
}

pub fn status_for(error: &AuthError) -> StatusCode {
    match error {
        AuthError::InvalidCredentials | AuthError::VerificationFailed | AuthError::SessionExpired(_) => {
            StatusCode::UNAUTHORIZED
        }
        AuthError::EmailAlreadyRegistered(_) | AuthError::AttemptInProgress => StatusCode::CONFLICT,
        AuthError::NoFaceDetected => StatusCode::UNPROCESSABLE_ENTITY,
        AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        AuthError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::FaceServiceRejected(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self.0);
            "Server error".to_string()
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self.0);
            match &self.0 {
                AuthError::EmailAlreadyRegistered(_) => "Email is already registered".to_string(),
                AuthError::InvalidInput(msg) | AuthError::SessionExpired(msg) => msg.clone(),
                other => other.to_string(),
            }
        };
        (status, Json(ApiResponse::failure(self.0.code(), message))).into_response()
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/user/profile", get(profile))
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `[server] bind` and serves until ctrl-c.
pub async fn serve(config: &Config, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("Auth service listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state, config.server.max_upload_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Auth service stopped");
    Ok(())
}

pub(crate) async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

struct UploadForm {
    fields: HashMap<String, String>,
    face_image: Option<CapturedImage>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut fields = HashMap::new();
        let mut face_image = None;

        while let Some(field) = multipart.next_field().await.map_err(bad_upload)? {
            let name = field.name().unwrap_or_default().to_string();
            if name == FACE_IMAGE_FIELD {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(bad_upload)?;
                if !bytes.is_empty() {
                    face_image = Some(CapturedImage::from_upload(bytes.to_vec(), content_type.as_deref())?);
                }
            } else {
                let value = field.text().await.map_err(bad_upload)?;
                fields.insert(name, value);
            }
        }

        Ok(Self { fields, face_image })
    }

    fn text(&self, name: &str) -> String {
        self.fields.get(name).map(|v| v.trim().to_string()).unwrap_or_default()
    }

    /// Passwords are taken verbatim.
    fn secret(&self, name: &str) -> Option<String> {
        self.fields.get(name).filter(|v| !v.is_empty()).cloned()
    }
}

fn bad_upload(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError(AuthError::InvalidInput(format!("Malformed upload: {}", e.body_text())))
}

async fn signup(State(state): State<AppState>, multipart: Multipart) -> Result<impl IntoResponse, ApiError> {
    let form = UploadForm::read(multipart).await?;
    let role: Role = form.text("role").parse()?;

    let grant = state
        .auth
        .signup(SignupForm {
            name: form.text("name"),
            email: form.text("email"),
            password: form.secret("password").unwrap_or_default(),
            role,
            face_image: form.face_image,
        })
        .await?;

    let body = ApiResponse {
        success: true,
        message: Some("User registered successfully".into()),
        token: Some(grant.token),
        user_id: Some(grant.user.id.clone()),
        user: Some(grant.user),
        ..ApiResponse::default()
    };
    Ok((StatusCode::CREATED, Json(body)))
}

async fn login(State(state): State<AppState>, multipart: Multipart) -> Result<impl IntoResponse, ApiError> {
    let form = UploadForm::read(multipart).await?;
    let grant = state
        .auth
        .login(LoginForm {
            email: form.text("email"),
            password: form.secret("password"),
            face_image: form.face_image,
        })
        .await?;

    Ok(Json(ApiResponse {
        success: true,
        message: Some("Login successful".into()),
        token: Some(grant.token),
        user: Some(grant.user),
        ..ApiResponse::default()
    }))
}

async fn profile(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::SessionExpired("No authentication token provided".into()))?;

    let user = state.auth.profile(token).await?;
    Ok(Json(ApiResponse {
        success: true,
        user: Some(user),
        ..ApiResponse::default()
    }))
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> impl IntoResponse {
    match state.chat.reply(&request.message) {
        Ok(reply) => (
            StatusCode::OK,
            Json(ChatResponse {
                success: true,
                response: Some(reply.to_string()),
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ChatResponse {
                success: false,
                response: None,
                message: Some(match e {
                    AuthError::InvalidInput(msg) => msg,
                    other => other.to_string(),
                }),
            }),
        ),
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        face_backend: state.auth.face_client().backend_name().to_string(),
    })
}
