use crate::errors::{AppError, AppResult};
use crate::models::{AuthCredentials, AuthorizationLevel};
use crate::store::{RecordStore, StorePath};

/// Checks a passkey against the prime and family passkeys kept in the store.
#[derive(Debug, Clone)]
pub struct PasskeyValidator {
    credentials_path: StorePath,
}

impl PasskeyValidator {
    pub fn new(credentials_path: StorePath) -> Self {
        Self { credentials_path }
    }

    pub fn credentials_path(&self) -> &StorePath {
        &self.credentials_path
    }

    /// `Ok(Invalid)` means the passkey matched neither role. Blank input is
    /// rejected before the store is touched; anything else is compared as typed.
    pub async fn validate(&self, store: &dyn RecordStore, passkey: &str) -> AppResult<AuthorizationLevel> {
        if passkey.trim().is_empty() {
            return Err(AppError::Validation("Please enter your passkey.".to_string()));
        }

        let credentials = self.load_credentials(store).await?;
        let level = classify(passkey, credentials.as_ref());
        tracing::info!(level = level.as_str(), "passkey checked");
        Ok(level)
    }

    pub async fn load_credentials(&self, store: &dyn RecordStore) -> AppResult<Option<AuthCredentials>> {
        let Some(raw) = store.read(&self.credentials_path).await? else {
            tracing::warn!(path = %self.credentials_path, "no passkeys stored; every passkey will be rejected");
            return Ok(None);
        };
        let credentials = serde_json::from_value::<AuthCredentials>(raw).map_err(|error| {
            AppError::Store(format!("stored passkeys at {} are malformed: {}", self.credentials_path, error))
        })?;
        Ok(Some(credentials))
    }
}

pub fn classify(passkey: &str, credentials: Option<&AuthCredentials>) -> AuthorizationLevel {
    let Some(credentials) = credentials else {
        return AuthorizationLevel::Invalid;
    };
    if passkey.is_empty() {
        return AuthorizationLevel::Invalid;
    }
    if !credentials.prime.is_empty() && passkey == credentials.prime {
        AuthorizationLevel::Prime
    } else if !credentials.non_prime.is_empty() && passkey == credentials.non_prime {
        AuthorizationLevel::NonPrime
    } else {
        AuthorizationLevel::Invalid
    }
}

pub fn greeting(level: AuthorizationLevel) -> &'static str {
    match level {
        AuthorizationLevel::Prime => "Welcome back! Full access: you can correct entries and pick any past date.",
        AuthorizationLevel::NonPrime => "Welcome! You can add today's morning and evening entries.",
        AuthorizationLevel::Invalid => "Wrong passkey. Please try again.",
    }
}

#[cfg(test)]
mod tests {
    use super::{classify, PasskeyValidator};
    use crate::models::{AuthCredentials, AuthorizationLevel};
    use crate::store::{MemoryStore, StorePath};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn credentials() -> AuthCredentials {
        AuthCredentials {
            prime: "owner-key".to_string(),
            non_prime: "family-key".to_string(),
        }
    }

    fn validator() -> PasskeyValidator {
        PasskeyValidator::new(StorePath::parse("validation").expect("path"))
    }

    #[test]
    fn classifies_roles() {
        let stored = credentials();
        assert_eq!(classify("owner-key", Some(&stored)), AuthorizationLevel::Prime);
        assert_eq!(classify("family-key", Some(&stored)), AuthorizationLevel::NonPrime);
        assert_eq!(classify("nope", Some(&stored)), AuthorizationLevel::Invalid);
        assert_eq!(classify("owner-key", None), AuthorizationLevel::Invalid);
    }

    #[test]
    fn blank_stored_role_never_matches() {
        let stored = AuthCredentials {
            prime: "owner-key".to_string(),
            non_prime: String::new(),
        };
        assert_eq!(classify("", Some(&stored)), AuthorizationLevel::Invalid);
    }

    #[tokio::test]
    async fn empty_passkey_skips_the_store() {
        let store = MemoryStore::new();
        let error = validator().validate(&store, "   ").await.expect_err("empty passkey");
        assert!(error.to_string().starts_with("VALIDATION"));
        assert_eq!(store.read_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn validates_against_stored_credentials() {
        let store = MemoryStore::with_root(json!({
            "validation": { "prime": "owner-key", "nonPrime": "family-key" }
        }));
        assert_eq!(
            validator().validate(&store, "family-key").await.expect("validate"),
            AuthorizationLevel::NonPrime
        );
        assert_eq!(
            validator().validate(&store, "bad").await.expect("validate"),
            AuthorizationLevel::Invalid
        );
        assert_eq!(
            validator().validate(&store, " owner-key ").await.expect("validate"),
            AuthorizationLevel::Invalid
        );
        assert_eq!(store.subscribe_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_credentials_reject_everything() {
        let store = MemoryStore::new();
        assert_eq!(
            validator().validate(&store, "owner-key").await.expect("validate"),
            AuthorizationLevel::Invalid
        );
    }

    #[tokio::test]
    async fn malformed_credentials_are_a_store_error() {
        let store = MemoryStore::with_root(json!({ "validation": "owner-key" }));
        let error = validator().validate(&store, "owner-key").await.expect_err("malformed");
        assert!(error.to_string().starts_with("STORE_FAILURE"));
    }
}
