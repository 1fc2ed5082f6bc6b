use serde::{Deserialize, Serialize};

pub const MORNING_FIELD: &str = "Morning";
pub const EVENING_FIELD: &str = "Evening";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorizationLevel {
    #[default]
    Invalid,
    NonPrime,
    Prime,
}

impl AuthorizationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::NonPrime => "non-prime",
            Self::Prime => "prime",
        }
    }

    pub fn is_prime(self) -> bool {
        matches!(self, Self::Prime)
    }

    pub fn is_authorized(self) -> bool {
        !matches!(self, Self::Invalid)
    }
}

/// The two valid passkeys, stored as a single object in the record store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCredentials {
    #[serde(default)]
    pub prime: String,
    #[serde(default)]
    pub non_prime: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryField {
    Morning,
    Evening,
}

impl EntryField {
    pub fn key(self) -> &'static str {
        match self {
            Self::Morning => MORNING_FIELD,
            Self::Evening => EVENING_FIELD,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Evening => "evening",
        }
    }
}

/// Ephemeral per-session input state, as a front end binds it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormState {
    pub morning: String,
    pub evening: String,
    pub date: String,
    pub passkey: String,
    pub level: AuthorizationLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SubmitOutcome {
    Saved { path: String, fields: Vec<String> },
    Updated { path: String, fields: Vec<String> },
    Cancelled { path: String },
    /// Another submission from the same session was still in flight.
    Ignored,
}

impl SubmitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Saved { .. } | Self::Updated { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthCredentials, AuthorizationLevel};

    #[test]
    fn credentials_use_stored_field_names() {
        let credentials: AuthCredentials =
            serde_json::from_value(serde_json::json!({ "prime": "p", "nonPrime": "f" })).expect("decode");
        assert_eq!(credentials.prime, "p");
        assert_eq!(credentials.non_prime, "f");
    }

    #[test]
    fn only_prime_is_prime() {
        assert!(AuthorizationLevel::Prime.is_prime());
        assert!(!AuthorizationLevel::NonPrime.is_prime());
        assert!(!AuthorizationLevel::Invalid.is_authorized());
    }
}
