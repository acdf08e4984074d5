use crate::common::config::AuthConfig;
use crate::common::{AuthError, Result};
use crate::core::{Role, UserRecord};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Signs and checks session tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_secs: i64,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl_secs,
        }
    }

    /// Without a configured secret a random one is generated, so tokens do
    /// not survive a restart.
    pub fn from_config(config: &AuthConfig) -> Self {
        let ttl_secs = i64::from(config.token_ttl_hours) * 3600;
        match &config.jwt_secret {
            Some(secret) => Self::new(secret.as_bytes(), ttl_secs),
            None => {
                tracing::warn!("No jwt_secret configured; using an ephemeral signing key");
                let secret: [u8; 32] = rand::random();
                Self::new(&secret, ttl_secs)
            }
        }
    }

    pub fn issue(&self, user: &UserRecord) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            iat: now,
            exp: now + self.ttl_secs,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Other(anyhow::anyhow!("Failed to sign token: {}", e)))
    }

    /// Expired tokens fail with `SessionExpired`; anything else unreadable is
    /// `InvalidCredentials`.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::SessionExpired("Token has expired".into()),
                _ => {
                    tracing::debug!("Rejected token: {}", e);
                    AuthError::InvalidCredentials
                }
            })
    }
}
