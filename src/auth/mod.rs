//! Server-side authentication: signup, password or face login, and token
//! checks, over an injected credential store and face client.

pub mod token;

pub use token::{Claims, TokenIssuer};

use crate::common::config::AuthConfig;
use crate::common::{AuthError, Result};
use crate::core::{normalize_email, validate_email, CapturedImage, PublicUser, Role, UserRecord};
use crate::face::FaceAuthClient;
use crate::session::Authenticator;
use crate::storage::{password, CredentialStore};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub face_image: Option<CapturedImage>,
}

impl fmt::Debug for SignupForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignupForm")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .field("face_image", &self.face_image)
            .finish()
    }
}

#[derive(Clone)]
pub struct LoginForm {
    pub email: String,
    pub password: Option<String>,
    pub face_image: Option<CapturedImage>,
}

impl LoginForm {
    pub fn with_password(email: &str, password: &str) -> Self {
        Self {
            email: email.to_string(),
            password: Some(password.to_string()),
            face_image: None,
        }
    }

    pub fn with_face(email: &str, image: CapturedImage) -> Self {
        Self {
            email: email.to_string(),
            password: None,
            face_image: Some(image),
        }
    }
}

impl fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginForm")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("face_image", &self.face_image)
            .finish()
    }
}

/// A successful signup or login.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthGrant {
    pub token: String,
    pub user: PublicUser,
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    face: FaceAuthClient,
    tokens: TokenIssuer,
    require_face_on_signup: bool,
}

impl AuthService {
    pub fn new(store: Arc<dyn CredentialStore>, face: FaceAuthClient, tokens: TokenIssuer) -> Self {
        Self {
            store,
            face,
            tokens,
            require_face_on_signup: false,
        }
    }

    pub fn from_config(config: &AuthConfig, store: Arc<dyn CredentialStore>, face: FaceAuthClient) -> Self {
        Self::new(store, face, TokenIssuer::from_config(config))
            .require_face_on_signup(config.require_face_on_signup)
    }

    pub fn require_face_on_signup(mut self, required: bool) -> Self {
        self.require_face_on_signup = required;
        self
    }

    pub fn face_client(&self) -> &FaceAuthClient {
        &self.face
    }

    pub async fn signup(&self, form: SignupForm) -> Result<AuthGrant> {
        let name = form.name.trim();
        let email = form.email.trim();
        if name.is_empty() || email.is_empty() || form.password.is_empty() {
            return Err(AuthError::InvalidInput("Missing required fields".into()));
        }
        validate_email(email)?;
        if self.require_face_on_signup && form.face_image.is_none() {
            return Err(AuthError::InvalidInput("A face image is required to sign up".into()));
        }

        if self.store.find_by_email(email).await?.is_some() {
            tracing::info!("Signup rejected, email taken: {}", email);
            return Err(AuthError::EmailAlreadyRegistered(email.to_string()));
        }

        let password = form.password;
        let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&password))
            .await
            .map_err(|e| AuthError::Other(anyhow::anyhow!("Hashing task failed: {}", e)))??;

        let face_reference = match &form.face_image {
            Some(image) => {
                let registration = self.face.register(&normalize_email(email), image).await?;
                if !registration.success {
                    return Err(AuthError::FaceServiceRejected(format!(
                        "Face registration failed: {}",
                        registration.message
                    )));
                }
                registration.reference
            }
            None => None,
        };

        let record = UserRecord {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            display_name: name.to_string(),
            role: form.role,
            password_hash: Some(password_hash),
            face_reference,
            created_at: chrono::Utc::now(),
        };
        let orphaned = record.face_reference.clone();
        let record = match self.store.create(record).await {
            Ok(record) => record,
            Err(e) => {
                if let Some(reference) = orphaned {
                    tracing::warn!("Face reference {} for {} left without a user: {}", reference, email, e);
                }
                return Err(e);
            }
        };
        tracing::info!("Registered user {} ({}, face id: {})", record.id, record.role, record.has_face_id());

        self.grant(&record)
    }

    /// A face image takes precedence over a password when both are given.
    pub async fn login(&self, form: LoginForm) -> Result<AuthGrant> {
        let email = form.email.trim();
        if email.is_empty() {
            return Err(AuthError::InvalidInput("Email is required".into()));
        }

        let record = match self.store.find_by_email(email).await? {
            Some(record) => record,
            None => {
                tracing::debug!("Login for unknown email {}", email);
                return Err(AuthError::InvalidCredentials);
            }
        };

        if let Some(image) = &form.face_image {
            self.face.require_match(record.face_reference.as_deref(), image).await?;
            tracing::info!("Face login for {}", record.id);
        } else if let Some(candidate) = form.password {
            let store = Arc::clone(&self.store);
            let checked = record.clone();
            let valid = tokio::task::spawn_blocking(move || store.verify_password(&checked, &candidate))
                .await
                .map_err(|e| AuthError::Other(anyhow::anyhow!("Password check failed: {}", e)))?;
            if !valid {
                tracing::info!("Wrong password for {}", record.id);
                return Err(AuthError::InvalidCredentials);
            }
            tracing::info!("Password login for {}", record.id);
        } else {
            return Err(AuthError::InvalidInput("Password or face image required".into()));
        }

        self.grant(&record)
    }

    pub async fn profile(&self, token: &str) -> Result<PublicUser> {
        let claims = self.tokens.validate(token)?;
        match self.store.find_by_id(&claims.sub).await? {
            Some(record) => Ok(PublicUser::from(&record)),
            None => Err(AuthError::InvalidCredentials),
        }
    }

    fn grant(&self, record: &UserRecord) -> Result<AuthGrant> {
        Ok(AuthGrant {
            token: self.tokens.issue(record)?,
            user: PublicUser::from(record),
        })
    }
}

#[async_trait]
impl Authenticator for AuthService {
    async fn signup(&self, form: SignupForm) -> Result<AuthGrant> {
        AuthService::signup(self, form).await
    }

    async fn login(&self, form: LoginForm) -> Result<AuthGrant> {
        AuthService::login(self, form).await
    }

    async fn profile(&self, token: &str) -> Result<PublicUser> {
        AuthService::profile(self, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::mock::tests::{blank, face_a, face_b};
    use crate::face::{MockBackend, RetryPolicy};
    use crate::storage::{FileUserStore, MemoryUserStore};

    fn service() -> (AuthService, Arc<MemoryUserStore>, Arc<MockBackend>) {
        let store = Arc::new(MemoryUserStore::new());
        let backend = Arc::new(MockBackend::new(0.9));
        let face = FaceAuthClient::new(backend.clone(), RetryPolicy::default());
        let tokens = TokenIssuer::new(b"test-secret-key-for-testing", 3600);
        (AuthService::new(store.clone(), face, tokens), store, backend)
    }

    fn signup_form(email: &str, face_image: Option<CapturedImage>) -> SignupForm {
        SignupForm {
            name: "Alice".into(),
            email: email.into(),
            password: "s3cret-pass".into(),
            role: Role::Customer,
            face_image,
        }
    }

    #[tokio::test]
    async fn password_signup_then_login() {
        let (service, _, _) = service();
        let signed_up = service.signup(signup_form("alice@example.com", None)).await.unwrap();
        assert!(!signed_up.user.has_face_id);

        let logged_in = service
            .login(LoginForm::with_password("Alice@Example.com", "s3cret-pass"))
            .await
            .unwrap();
        assert_eq!(logged_in.user.id, signed_up.user.id);
        assert_eq!(logged_in.user.role, Role::Customer);
        assert!(!logged_in.user.has_face_id);
    }

    #[tokio::test]
    async fn duplicate_email_leaves_store_untouched() {
        let (service, store, _) = service();
        service.signup(signup_form("alice@example.com", None)).await.unwrap();

        let err = service.signup(signup_form("ALICE@example.com", Some(face_a()))).await.unwrap_err();
        assert!(matches!(err, AuthError::EmailAlreadyRegistered(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn face_signup_then_face_login() {
        let (service, _, backend) = service();
        let grant = service.signup(signup_form("bob@example.com", Some(face_a()))).await.unwrap();
        assert!(grant.user.has_face_id);
        assert_eq!(backend.reference_count(), 1);

        let same = service.login(LoginForm::with_face("bob@example.com", face_a())).await.unwrap();
        assert_eq!(same.user.id, grant.user.id);

        let other = service.login(LoginForm::with_face("bob@example.com", face_b())).await.unwrap_err();
        assert!(matches!(other, AuthError::VerificationFailed));
    }

    #[tokio::test]
    async fn face_login_without_reference_fails() {
        let (service, _, _) = service();
        service.signup(signup_form("carol@example.com", None)).await.unwrap();

        let err = service.login(LoginForm::with_face("carol@example.com", face_a())).await.unwrap_err();
        assert!(matches!(err, AuthError::VerificationFailed));
    }

    #[tokio::test]
    async fn blank_face_at_signup_creates_nothing() {
        let (service, store, _) = service();
        let err = service.signup(signup_form("dan@example.com", Some(blank()))).await.unwrap_err();
        assert!(matches!(err, AuthError::NoFaceDetected));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn bad_credentials() {
        let (service, _, _) = service();
        service.signup(signup_form("erin@example.com", None)).await.unwrap();

        let wrong = service.login(LoginForm::with_password("erin@example.com", "nope")).await;
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));

        let unknown = service.login(LoginForm::with_password("nobody@example.com", "s3cret-pass")).await;
        assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));

        let neither = service
            .login(LoginForm { email: "erin@example.com".into(), password: None, face_image: None })
            .await;
        assert!(matches!(neither, Err(AuthError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn signup_validates_fields() {
        let (service, store, _) = service();
        let mut form = signup_form("not-an-email", None);
        assert!(matches!(service.signup(form.clone()).await, Err(AuthError::InvalidInput(_))));

        form.email = "frank@example.com".into();
        form.password.clear();
        assert!(matches!(service.signup(form).await, Err(AuthError::InvalidInput(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn face_can_be_required_at_signup() {
        let (service, _, _) = service();
        let service = service.require_face_on_signup(true);
        let err = service.signup(signup_form("gina@example.com", None)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidInput(_)));
        assert!(service.signup(signup_form("gina@example.com", Some(face_a()))).await.is_ok());
    }

    #[tokio::test]
    async fn profile_from_token() {
        let (service, _, _) = service();
        let grant = service.signup(signup_form("hana@example.com", None)).await.unwrap();

        let profile = service.profile(&grant.token).await.unwrap();
        assert_eq!(profile, grant.user);
        assert!(matches!(service.profile("garbage").await, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn face_login_after_restart_with_file_store() {
        let tmp = tempfile::tempdir().unwrap();
        let users = tmp.path().join("users");
        let faces = tmp.path().join("face_references.bincode");
        let open = || {
            let store = Arc::new(FileUserStore::open(users.clone()).unwrap());
            let backend = Arc::new(MockBackend::open(0.9, faces.clone()).unwrap());
            let face = FaceAuthClient::new(backend, RetryPolicy::default());
            AuthService::new(store, face, TokenIssuer::new(b"test-secret-key-for-testing", 3600))
        };

        open().signup(signup_form("ann@example.com", Some(face_a()))).await.unwrap();

        let restarted = open();
        let grant = restarted.login(LoginForm::with_face("ann@example.com", face_a())).await.unwrap();
        assert!(grant.user.has_face_id);
        let err = restarted.login(LoginForm::with_face("ann@example.com", face_b())).await.unwrap_err();
        assert!(matches!(err, AuthError::VerificationFailed));
    }

    /// Finds nothing and refuses every write.
    struct ReadOnlyStore;

    #[async_trait]
    impl CredentialStore for ReadOnlyStore {
        async fn find_by_email(&self, _email: &str) -> Result<Option<UserRecord>> {
            Ok(None)
        }

        async fn find_by_id(&self, _id: &str) -> Result<Option<UserRecord>> {
            Ok(None)
        }

        async fn create(&self, _record: UserRecord) -> Result<UserRecord> {
            Err(AuthError::Storage("read-only".into()))
        }
    }

    #[tokio::test]
    async fn failed_create_after_face_registration_is_reported() {
        let backend = Arc::new(MockBackend::new(0.9));
        let face = FaceAuthClient::new(backend.clone(), RetryPolicy::default());
        let service = AuthService::new(
            Arc::new(ReadOnlyStore),
            face,
            TokenIssuer::new(b"test-secret-key-for-testing", 3600),
        );

        let err = service.signup(signup_form("bea@example.com", Some(face_a()))).await.unwrap_err();
        assert!(matches!(err, AuthError::Storage(_)));
        // The face service has no removal call, so the reference stays behind.
        assert_eq!(backend.reference_count(), 1);
    }

    #[test]
    fn debug_hides_passwords() {
        let form = signup_form("ivy@example.com", None);
        assert!(!format!("{:?}", form).contains("s3cret-pass"));
        let login = LoginForm::with_password("ivy@example.com", "s3cret-pass");
        assert!(!format!("{:?}", login).contains("s3cret-pass"));
    }
}
