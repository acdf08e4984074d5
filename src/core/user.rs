use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::common::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Customer,
    RestaurantOwner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::RestaurantOwner => "restaurant_owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "" | "customer" => Ok(Role::Customer),
            "restaurant_owner" | "restaurant" | "owner" => Ok(Role::RestaurantOwner),
            other => Err(AuthError::InvalidInput(format!("Unknown role: {}", other))),
        }
    }
}

/// Stored user. Holds the password hash, so it never leaves the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub password_hash: Option<String>,
    pub face_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn has_face_id(&self) -> bool {
        self.face_reference.is_some()
    }
}

/// What clients get to see of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub has_face_id: bool,
}

impl From<&UserRecord> for PublicUser {
    fn from(record: &UserRecord) -> Self {
        Self {
            id: record.id.clone(),
            email: record.email.clone(),
            name: record.display_name.clone(),
            role: record.role,
            has_face_id: record.has_face_id(),
        }
    }
}

/// Store key for an email address. Lookups are case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> Result<(), AuthError> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'),
        None => false,
    };
    if !valid || email.chars().any(char::is_whitespace) {
        return Err(AuthError::InvalidInput(format!("Invalid email address: {}", email)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_roles() {
        assert_eq!("customer".parse::<Role>().unwrap(), Role::Customer);
        assert_eq!("restaurant-owner".parse::<Role>().unwrap(), Role::RestaurantOwner);
        assert_eq!("".parse::<Role>().unwrap(), Role::Customer);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn public_user_drops_password_hash() {
        let record = UserRecord {
            id: "u1".into(),
            email: "a@x.com".into(),
            display_name: "Ana".into(),
            role: Role::Customer,
            password_hash: Some("$argon2id$secret".into()),
            face_reference: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&PublicUser::from(&record)).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"hasFaceId\":false"));
    }

    #[test]
    fn email_checks() {
        assert!(validate_email("a@x.com").is_ok());
        assert!(validate_email(" a@x.com ").is_ok());
        assert!(validate_email("ax.com").is_err());
        assert!(validate_email("a@xcom").is_err());
        assert!(validate_email("a b@x.com").is_err());
        assert_eq!(normalize_email(" A@X.com"), "a@x.com");
    }
}
