use crate::auth::{greeting, PasskeyValidator};
use crate::calendar::{Clock, DateContext, SystemClock};
use crate::config::TrackerConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{AuthCredentials, AuthorizationLevel, SubmitOutcome};
use crate::month_feed::MonthFeed;
use crate::notify::Notifier;
use crate::session::{Session, SessionManager};
use crate::store::RecordStore;
use crate::workflow::WriteWorkflow;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct TrackerCore {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    sessions: SessionManager,
    validator: PasskeyValidator,
    config: TrackerConfig,
}

impl TrackerCore {
    pub fn new(config: TrackerConfig, store: Arc<dyn RecordStore>, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Self::with_clock(config, store, notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: TrackerConfig,
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            notifier,
            clock,
            sessions: SessionManager::new(),
            validator: PasskeyValidator::new(config.credentials_path.clone()),
            config,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Recomputed on every call so a long-running session rolls over at midnight.
    pub fn dates(&self) -> DateContext {
        DateContext::from_clock(self.config.collection.clone(), self.clock.as_ref())
    }

    pub async fn open_session(&self) -> Arc<Session> {
        let session = self.sessions.open_session(self.dates().default_form_date()).await;
        tracing::info!(session_id = session.id(), "session opened");
        session
    }

    pub async fn session(&self, session_id: &str) -> AppResult<Arc<Session>> {
        self.sessions.get(session_id).await
    }

    pub async fn close_session(&self, session_id: &str) -> bool {
        self.sessions.close_session(session_id).await
    }

    /// Checks the passkey typed into the session form and moves the session
    /// to the matching role.
    pub async fn validate_passkey(&self, session: &Session) -> AppResult<AuthorizationLevel> {
        let passkey = session.form()?.passkey;
        let level = match self.validator.validate(self.store.as_ref(), &passkey).await {
            Ok(level) => level,
            Err(error) => {
                tracing::info!(session_id = session.id(), error = %error, "passkey check failed");
                self.notifier.error(&error.user_message());
                return Err(error);
            }
        };

        if !level.is_authorized() {
            self.notifier.error(greeting(level));
            return Ok(session.level());
        }

        let current = session.apply_validation(level)?;
        tracing::info!(session_id = session.id(), level = current.as_str(), "session authorized");
        self.notifier.success(greeting(current));
        Ok(current)
    }

    pub async fn submit(&self, session: &Session) -> AppResult<SubmitOutcome> {
        let dates = self.dates();
        let workflow = WriteWorkflow::new(self.store.as_ref(), self.notifier.as_ref(), &dates);
        workflow.submit_session(session).await
    }

    pub async fn month_feed(&self, month_index: u32) -> AppResult<MonthFeed> {
        MonthFeed::open(
            self.store.clone(),
            self.config.collection.clone(),
            self.clock.clone(),
            month_index,
        )
        .await
    }

    pub async fn current_month_feed(&self) -> AppResult<MonthFeed> {
        self.month_feed(self.dates().current_month_index()).await
    }

    /// Writes the configured seed passkeys when the store holds none yet.
    /// Stored credentials are never overwritten.
    pub async fn seed_credentials_if_missing(&self) -> AppResult<bool> {
        if self.validator.load_credentials(self.store.as_ref()).await?.is_some() {
            return Ok(false);
        }
        let (Some(prime), Some(non_prime)) = (
            self.config.seed_prime_passkey.clone(),
            self.config.seed_family_passkey.clone(),
        ) else {
            return Ok(false);
        };
        if prime == non_prime {
            return Err(AppError::Validation(
                "The prime and family passkeys must differ".to_string(),
            ));
        }

        let credentials = AuthCredentials { prime, non_prime };
        let fields = match serde_json::to_value(&credentials)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.store
            .merge_write(self.validator.credentials_path(), &fields)
            .await?;
        tracing::info!(path = %self.validator.credentials_path(), "seeded passkeys");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::TrackerCore;
    use crate::calendar::FixedClock;
    use crate::config::TrackerConfig;
    use crate::models::AuthorizationLevel;
    use crate::notify::{NoticeKind, RecordingNotifier};
    use crate::store::{MemoryStore, RecordStore, StorePath};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::Arc;

    fn tracker_core(store: Arc<MemoryStore>, notifier: Arc<RecordingNotifier>, config: TrackerConfig) -> Arc<TrackerCore> {
        TrackerCore::with_clock(
            config,
            store,
            notifier,
            Arc::new(FixedClock(NaiveDate::from_ymd_opt(2024, 6, 3).expect("date"))),
        )
    }

    fn credentials_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_root(json!({
            "validation": { "prime": "owner-key", "nonPrime": "family-key" }
        })))
    }

    #[tokio::test]
    async fn validation_greets_and_clears_passkey() {
        let notifier = Arc::new(RecordingNotifier::new());
        let core = tracker_core(credentials_store(), notifier.clone(), TrackerConfig::default());
        let session = core.open_session().await;
        assert_eq!(session.form().expect("form").date, "2024-06-03");

        session.set_passkey("family-key").expect("passkey");
        let level = core.validate_passkey(&session).await.expect("validate");
        assert_eq!(level, AuthorizationLevel::NonPrime);
        assert!(session.form().expect("form").passkey.is_empty());
        assert_eq!(notifier.last().expect("notice").kind, NoticeKind::Success);
    }

    #[tokio::test]
    async fn wrong_passkey_notifies_and_keeps_level() {
        let notifier = Arc::new(RecordingNotifier::new());
        let core = tracker_core(credentials_store(), notifier.clone(), TrackerConfig::default());
        let session = core.open_session().await;

        session.set_passkey("nope").expect("passkey");
        let level = core.validate_passkey(&session).await.expect("validate");
        assert_eq!(level, AuthorizationLevel::Invalid);
        let notice = notifier.last().expect("notice");
        assert_eq!(notice.kind, NoticeKind::Error);
        assert!(notice.message.contains("Wrong passkey"));
    }

    #[tokio::test]
    async fn empty_passkey_is_a_validation_error() {
        let store = credentials_store();
        let notifier = Arc::new(RecordingNotifier::new());
        let core = tracker_core(store.clone(), notifier.clone(), TrackerConfig::default());
        let session = core.open_session().await;

        assert!(core.validate_passkey(&session).await.is_err());
        assert_eq!(store.total_calls(), 0);
        assert_eq!(notifier.last().expect("notice").kind, NoticeKind::Error);
    }

    #[tokio::test]
    async fn seeds_credentials_only_once() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let config = TrackerConfig {
            seed_prime_passkey: Some("owner-key".to_string()),
            seed_family_passkey: Some("family-key".to_string()),
            ..TrackerConfig::default()
        };
        let core = tracker_core(store.clone(), notifier, config);

        assert!(core.seed_credentials_if_missing().await.expect("seed"));
        assert!(!core.seed_credentials_if_missing().await.expect("seed again"));
        let stored = store
            .read(&StorePath::parse("validation").expect("path"))
            .await
            .expect("read")
            .expect("credentials");
        assert_eq!(stored, json!({ "prime": "owner-key", "nonPrime": "family-key" }));
    }

    #[tokio::test]
    async fn sessions_are_tracked_by_id() {
        let notifier = Arc::new(RecordingNotifier::new());
        let core = tracker_core(credentials_store(), notifier, TrackerConfig::default());
        let session = core.open_session().await;
        assert_eq!(core.session(session.id()).await.expect("session").id(), session.id());
        assert!(core.close_session(session.id()).await);
        assert!(core.session(session.id()).await.is_err());
    }

    #[tokio::test]
    async fn current_month_feed_follows_the_clock() {
        let notifier = Arc::new(RecordingNotifier::new());
        let core = tracker_core(credentials_store(), notifier, TrackerConfig::default());
        let feed = core.current_month_feed().await.expect("feed");
        assert_eq!(feed.path().expect("path").to_string(), "Dairy/2024/June");
        assert_eq!(core.month_feed(0).await.expect("feed").ledger().month_name, "January");
    }
}
