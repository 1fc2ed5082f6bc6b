use crate::errors::{AppError, AppResult};
use crate::store::StorePath;
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

pub const DEFAULT_COLLECTION: &str = "Dairy";
pub const DEFAULT_CREDENTIALS_PATH: &str = "validation";
pub const DEFAULT_DATA_DIR: &str = "./dairy-data";

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub collection: String,
    pub credentials_path: StorePath,
    pub data_dir: PathBuf,
    /// Only used to seed an empty credentials record.
    pub seed_prime_passkey: Option<String>,
    pub seed_family_passkey: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            credentials_path: StorePath::from_segments([DEFAULT_CREDENTIALS_PATH]),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            seed_prime_passkey: None,
            seed_family_passkey: None,
        }
    }
}

impl TrackerConfig {
    pub fn load() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let collection = try_load(&lookup, "DAIRY_COLLECTION", DEFAULT_COLLECTION);
        if collection.contains('/') || StorePath::parse(&collection).is_err() {
            return Err(AppError::Validation(format!(
                "DAIRY_COLLECTION '{}' must be a single path segment",
                collection
            )));
        }
        let credentials_path = StorePath::parse(&try_load(&lookup, "DAIRY_CREDENTIALS_PATH", DEFAULT_CREDENTIALS_PATH))?;
        let data_dir = PathBuf::from(try_load(&lookup, "DAIRY_DATA_DIR", DEFAULT_DATA_DIR));

        Ok(Self {
            collection,
            credentials_path,
            data_dir,
            seed_prime_passkey: secret(&lookup, "DAIRY_PRIME_PASSKEY"),
            seed_family_passkey: secret(&lookup, "DAIRY_FAMILY_PASSKEY"),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("dairy.sqlite")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn try_load(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    match lookup(key).map(|value| value.trim().to_string()) {
        Some(value) if !value.is_empty() => value,
        Some(_) => {
            warn!("{key} is blank, using default: {default}");
            default.to_string()
        }
        None => {
            info!("{key} not set, using default: {default}");
            default.to_string()
        }
    }
}

fn secret(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::TrackerConfig;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = TrackerConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.collection, "Dairy");
        assert_eq!(config.credentials_path.to_string(), "validation");
        assert_eq!(config.database_path(), PathBuf::from("./dairy-data").join("dairy.sqlite"));
        assert!(config.seed_prime_passkey.is_none());
    }

    #[test]
    fn reads_overrides_and_seeds() {
        let config = TrackerConfig::from_lookup(lookup(&[
            ("DAIRY_COLLECTION", "Goat"),
            ("DAIRY_DATA_DIR", "/var/lib/dairy"),
            ("DAIRY_PRIME_PASSKEY", " owner "),
            ("DAIRY_FAMILY_PASSKEY", ""),
        ]))
        .expect("config");
        assert_eq!(config.collection, "Goat");
        assert_eq!(config.log_dir(), PathBuf::from("/var/lib/dairy/logs"));
        assert_eq!(config.seed_prime_passkey.as_deref(), Some("owner"));
        assert!(config.seed_family_passkey.is_none());
    }

    #[test]
    fn rejects_nested_collection() {
        assert!(TrackerConfig::from_lookup(lookup(&[("DAIRY_COLLECTION", "a/b")])).is_err());
    }
}
