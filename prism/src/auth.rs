//! Static credentials.
//!
//! Two scopes: service keys for model services (registration and result
//! callbacks) and bearer tokens mapping end users to usernames.

use std::collections::{HashMap, HashSet};

/// Header carrying a service key.
pub const SERVICE_KEY_HEADER: &str = "api_key";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    Missing,
    #[error("Invalid service key")]
    InvalidServiceKey,
    #[error("Invalid or expired token")]
    InvalidToken,
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    service_keys: HashSet<String>,
    /// token -> username
    users: HashMap<String, String>,
}

impl Credentials {
    pub fn new<K, U>(service_keys: K, users: U) -> Self
    where
        K: IntoIterator<Item = String>,
        U: IntoIterator<Item = (String, String)>,
    {
        Self {
            service_keys: service_keys
                .into_iter()
                .filter(|k| !k.is_empty())
                .collect(),
            users: users
                .into_iter()
                .filter(|(token, _)| !token.is_empty())
                .collect(),
        }
    }

    pub fn has_users(&self) -> bool {
        !self.users.is_empty()
    }

    pub fn authorize_service(&self, key: Option<&str>) -> Result<(), AuthError> {
        let key = key.ok_or(AuthError::Missing)?;
        if self.service_keys.contains(key) {
            Ok(())
        } else {
            Err(AuthError::InvalidServiceKey)
        }
    }

    /// Resolve an `Authorization` header value to the username it belongs to.
    pub fn authenticate_user(&self, authorization: Option<&str>) -> Result<String, AuthError> {
        let value = authorization.ok_or(AuthError::Missing)?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .unwrap_or(value)
            .trim();
        self.users
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}
