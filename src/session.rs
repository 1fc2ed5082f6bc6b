use crate::errors::{AppError, AppResult};
use crate::models::{AuthorizationLevel, FormState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use uuid::Uuid;

/// One household member's tracker session: form inputs, authorization level
/// and the in-flight submission flag.
#[derive(Debug)]
pub struct Session {
    id: String,
    form: StdMutex<FormState>,
    submitting: AtomicBool,
}

impl Session {
    pub fn new(default_date: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            form: StdMutex::new(FormState {
                date: default_date,
                ..FormState::default()
            }),
            submitting: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn form(&self) -> AppResult<FormState> {
        self.with_form(|form| form.clone())
    }

    pub fn level(&self) -> AuthorizationLevel {
        self.with_form(|form| form.level).unwrap_or_default()
    }

    pub fn set_morning(&self, value: &str) -> AppResult<()> {
        self.with_form(|form| form.morning = value.to_string())
    }

    pub fn set_evening(&self, value: &str) -> AppResult<()> {
        self.with_form(|form| form.evening = value.to_string())
    }

    pub fn set_passkey(&self, value: &str) -> AppResult<()> {
        self.with_form(|form| form.passkey = value.to_string())
    }

    /// The date field is only editable with prime rights.
    pub fn set_date(&self, value: &str) -> AppResult<()> {
        self.with_form(|form| {
            if !form.level.is_prime() {
                return Err(AppError::Authorization(
                    "Only the prime passkey can change the entry date.".to_string(),
                ));
            }
            form.date = value.trim().to_string();
            Ok(())
        })?
    }

    /// A correct passkey moves the session to its role; a wrong one never
    /// takes an authorized session back to `Invalid`.
    pub(crate) fn apply_validation(&self, level: AuthorizationLevel) -> AppResult<AuthorizationLevel> {
        self.with_form(|form| {
            if level.is_authorized() {
                form.level = level;
                form.passkey.clear();
            }
            form.level
        })
    }

    /// Non-prime sessions cannot edit the date, so one left open past
    /// midnight is moved onto the new day. Returns the form as it now stands.
    pub(crate) fn roll_date_forward(&self, today: &str) -> AppResult<FormState> {
        self.with_form(|form| {
            if !form.level.is_prime() && form.date != today {
                tracing::info!(stale_date = %form.date, today, "form date moved to today");
                form.date = today.to_string();
            }
            form.clone()
        })
    }

    pub(crate) fn reset_after_write(&self, default_date: String) -> AppResult<()> {
        self.with_form(|form| {
            form.morning.clear();
            form.evening.clear();
            form.date = default_date;
        })
    }

    /// `None` while another submission from this session is still running.
    pub fn try_begin_submit(&self) -> Option<SubmitGuard<'_>> {
        self.submitting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SubmitGuard { flag: &self.submitting })
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::Acquire)
    }

    fn with_form<T>(&self, apply: impl FnOnce(&mut FormState) -> T) -> AppResult<T> {
        let mut form = self
            .form
            .lock()
            .map_err(|_| AppError::Internal("session form mutex poisoned".to_string()))?;
        Ok(apply(&mut form))
    }
}

/// Clears the in-flight flag when the submission finishes, however it ends.
pub struct SubmitGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<String, Arc<Session>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open_session(&self, default_date: String) -> Arc<Session> {
        let session = Arc::new(Session::new(default_date));
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session.id().to_string(), session.clone());
        session
    }

    pub async fn get(&self, session_id: &str) -> AppResult<Arc<Session>> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("No active session {}", session_id)))
    }

    pub async fn close_session(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
