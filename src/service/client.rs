use crate::auth::{AuthGrant, LoginForm, SignupForm};
use crate::common::{AuthError, Result};
use crate::core::{CapturedImage, PublicUser};
use crate::service::protocol::{ApiResponse, ChatRequest, ChatResponse, FACE_IMAGE_FIELD};
use crate::session::Authenticator;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the auth HTTP API.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn face_part(image: CapturedImage) -> Result<Part> {
        let media_type = image.media_type().to_string();
        Part::bytes(image.into_bytes())
            .file_name("face.png")
            .mime_str(&media_type)
            .map_err(|e| AuthError::InvalidInput(format!("Bad image type {}: {}", media_type, e)))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ApiResponse> {
        let response = request
            .send()
            .await
            .map_err(|e| AuthError::ServiceUnavailable(format!("Auth service unreachable: {}", e)))?;
        let status = response.status();

        let body: ApiResponse = match response.json().await {
            Ok(body) => body,
            Err(e) if status.is_server_error() => {
                return Err(AuthError::ServiceUnavailable(format!("Auth service returned {}: {}", status, e)))
            }
            Err(e) => return Err(AuthError::Other(anyhow::anyhow!("Unreadable response ({}): {}", status, e))),
        };

        if !body.success {
            let message = body.message.unwrap_or_else(|| format!("Request failed with {}", status));
            return Err(AuthError::from_code(body.code.as_deref().unwrap_or("internal"), &message));
        }
        Ok(body)
    }

    fn grant(body: ApiResponse) -> Result<AuthGrant> {
        match (body.token, body.user) {
            (Some(token), Some(user)) => Ok(AuthGrant { token, user }),
            _ => Err(AuthError::Other(anyhow::anyhow!("Auth response is missing the token or user"))),
        }
    }

    pub async fn chat(&self, message: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&ChatRequest { message: message.to_string() })
            .send()
            .await
            .map_err(|e| AuthError::ServiceUnavailable(format!("Auth service unreachable: {}", e)))?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Other(anyhow::anyhow!("Unreadable chat response: {}", e)))?;
        match (body.success, body.response) {
            (true, Some(reply)) => Ok(reply),
            _ => Err(AuthError::InvalidInput(
                body.message.unwrap_or_else(|| "Failed to get a response".into()),
            )),
        }
    }
}

#[async_trait]
impl Authenticator for ApiClient {
    async fn signup(&self, form: SignupForm) -> Result<AuthGrant> {
        let mut multipart = Form::new()
            .text("name", form.name)
            .text("email", form.email)
            .text("password", form.password)
            .text("role", form.role.as_str());
        if let Some(image) = form.face_image {
            multipart = multipart.part(FACE_IMAGE_FIELD, Self::face_part(image)?);
        }

        let body = self.send(self.client.post(self.url("/auth/signup")).multipart(multipart)).await?;
        Self::grant(body)
    }

    async fn login(&self, form: LoginForm) -> Result<AuthGrant> {
        let mut multipart = Form::new().text("email", form.email);
        if let Some(password) = form.password {
            multipart = multipart.text("password", password);
        }
        if let Some(image) = form.face_image {
            multipart = multipart.part(FACE_IMAGE_FIELD, Self::face_part(image)?);
        }

        let body = self.send(self.client.post(self.url("/auth/login")).multipart(multipart)).await?;
        Self::grant(body)
    }

    async fn profile(&self, token: &str) -> Result<PublicUser> {
        let body = self
            .send(self.client.get(self.url("/user/profile")).bearer_auth(token))
            .await?;
        body.user
            .ok_or_else(|| AuthError::Other(anyhow::anyhow!("Profile response has no user")))
    }
}
