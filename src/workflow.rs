use crate::calendar::{display_date, parse_form_date, DateContext};
use crate::errors::{AppError, AppResult};
use crate::ledger::is_valid_volume;
use crate::models::{AuthorizationLevel, EntryField, SubmitOutcome};
use crate::notify::{ConfirmChoice, ConfirmPrompt, Notifier};
use crate::session::Session;
use crate::store::{RecordStore, StorePath};
use chrono::NaiveDate;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySubmission {
    pub date: NaiveDate,
    pub morning: String,
    pub evening: String,
}

/// What a submission will write, decided before any write is issued.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    pub path: StorePath,
    pub staged: Map<String, Value>,
    pub record_exists: bool,
}

impl MergePlan {
    pub fn field_names(&self) -> Vec<String> {
        self.staged.keys().cloned().collect()
    }
}

/// Stages the non-empty inputs. Overwriting a stored value needs prime rights;
/// one conflicting field rejects the whole submission.
pub fn plan_merge(
    path: StorePath,
    existing: Option<&Value>,
    morning: &str,
    evening: &str,
    level: AuthorizationLevel,
) -> AppResult<MergePlan> {
    let mut staged = Map::new();
    let mut conflicts = Vec::new();

    for (field, incoming) in [(EntryField::Morning, morning), (EntryField::Evening, evening)] {
        let incoming = incoming.trim();
        if incoming.is_empty() {
            continue;
        }
        if has_value(existing, field) && !level.is_prime() {
            conflicts.push(field);
            continue;
        }
        staged.insert(field.key().to_string(), Value::String(incoming.to_string()));
    }

    if !conflicts.is_empty() {
        let names = conflicts.iter().map(|field| field.key()).collect::<Vec<_>>().join(" and ");
        let verb = if conflicts.len() > 1 { "entries already exist" } else { "entry already exists" };
        return Err(AppError::Authorization(format!(
            "{} {} for this date. Only the prime passkey can change it.",
            names, verb
        )));
    }

    Ok(MergePlan {
        path,
        staged,
        record_exists: existing.is_some(),
    })
}

/// Any stored non-null value counts, including an empty string.
fn has_value(existing: Option<&Value>, field: EntryField) -> bool {
    !matches!(existing.and_then(|record| record.get(field.key())), None | Some(Value::Null))
}

pub struct WriteWorkflow<'a> {
    store: &'a dyn RecordStore,
    notifier: &'a dyn Notifier,
    dates: &'a DateContext,
}

impl<'a> WriteWorkflow<'a> {
    pub fn new(store: &'a dyn RecordStore, notifier: &'a dyn Notifier, dates: &'a DateContext) -> Self {
        Self {
            store,
            notifier,
            dates,
        }
    }

    /// Submits the session's current form. A second call while one is in
    /// flight returns `Ignored` without touching anything.
    pub async fn submit_session(&self, session: &Session) -> AppResult<SubmitOutcome> {
        let Some(_guard) = session.try_begin_submit() else {
            tracing::debug!(session_id = session.id(), "submission already in flight; ignored");
            return Ok(SubmitOutcome::Ignored);
        };

        let form = session.roll_date_forward(&self.dates.default_form_date())?;
        let submission = match parse_form_date(&form.date) {
            Ok(date) => EntrySubmission {
                date,
                morning: form.morning,
                evening: form.evening,
            },
            Err(error) => {
                self.report(&error);
                return Err(error);
            }
        };

        let outcome = self.submit(form.level, &submission).await?;
        if outcome.is_committed() {
            session.reset_after_write(self.dates.default_form_date())?;
        }
        Ok(outcome)
    }

    /// Every failure is also shown through the notifier before it is returned.
    pub async fn submit(&self, level: AuthorizationLevel, submission: &EntrySubmission) -> AppResult<SubmitOutcome> {
        match self.run(level, submission).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                self.report(&error);
                Err(error)
            }
        }
    }

    async fn run(&self, level: AuthorizationLevel, submission: &EntrySubmission) -> AppResult<SubmitOutcome> {
        self.check_inputs(level, submission)?;

        let path = self.dates.write_path(submission.date);
        let existing = self.store.read(&path).await?;
        let plan = plan_merge(
            path,
            existing.as_ref(),
            &submission.morning,
            &submission.evening,
            level,
        )?;
        let shown_date = display_date(submission.date);

        if plan.record_exists && level.is_prime() {
            let prompt = ConfirmPrompt {
                title: "Update existing entry?".to_string(),
                message: format!(
                    "An entry for {} already exists. Overwrite {}?",
                    shown_date,
                    plan.field_names().join(" and ")
                ),
                confirm_label: "Update".to_string(),
                cancel_label: "Cancel".to_string(),
            };
            if self.notifier.confirm(&prompt).await == ConfirmChoice::Cancel {
                tracing::info!(path = %plan.path, "update cancelled");
                self.notifier.info("Update cancelled. Nothing was changed.");
                return Ok(SubmitOutcome::Cancelled {
                    path: plan.path.to_string(),
                });
            }
        }

        self.store.merge_write(&plan.path, &plan.staged).await?;

        let fields = plan.field_names();
        let path = plan.path.to_string();
        tracing::info!(path = %path, fields = ?fields, updated = plan.record_exists, "entry committed");
        if plan.record_exists {
            self.notifier.success(&format!("Entry for {} updated.", shown_date));
            Ok(SubmitOutcome::Updated { path, fields })
        } else {
            self.notifier.success(&format!("Entry for {} saved.", shown_date));
            Ok(SubmitOutcome::Saved { path, fields })
        }
    }

    fn check_inputs(&self, level: AuthorizationLevel, submission: &EntrySubmission) -> AppResult<()> {
        let morning = submission.morning.trim();
        let evening = submission.evening.trim();
        if morning.is_empty() && evening.is_empty() {
            return Err(AppError::Validation(
                "Both fields are empty. Fill in the morning or evening volume.".to_string(),
            ));
        }
        for (field, value) in [(EntryField::Morning, morning), (EntryField::Evening, evening)] {
            if !value.is_empty() && !is_valid_volume(value) {
                return Err(AppError::Validation(format!(
                    "The {} volume '{}' is not a number of litres.",
                    field.label(),
                    value
                )));
            }
        }

        if submission.date > self.dates.max_date() {
            return Err(AppError::Validation("Entries cannot be dated after today.".to_string()));
        }
        if submission.date != self.dates.today() && !level.is_prime() {
            return Err(AppError::Authorization(
                "Only the prime passkey can add entries for another date.".to_string(),
            ));
        }
        Ok(())
    }

    fn report(&self, error: &AppError) {
        match error {
            AppError::Store(_) | AppError::Internal(_) => {
                tracing::warn!(error = %error, "submission failed");
            }
            _ => {
                tracing::info!(error = %error, "submission rejected");
            }
        }
        self.notifier.error(&error.user_message());
    }
}
