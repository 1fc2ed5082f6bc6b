use crate::calendar::{month_name, Clock, DateContext};
use crate::errors::{AppError, AppResult};
use crate::ledger::MonthlyLedger;
use crate::store::{RecordStore, SnapshotEvent, StorePath, Subscription};
use std::sync::Arc;

/// Live ledger for the selected month. Owns at most one subscription; picking
/// another month releases the old stream before the new one is opened, so a
/// late snapshot for the previous month can never reach the ledger.
pub struct MonthFeed {
    store: Arc<dyn RecordStore>,
    collection: String,
    clock: Arc<dyn Clock>,
    month_index: u32,
    subscription: Option<Subscription>,
    ledger: MonthlyLedger,
}

impl MonthFeed {
    pub async fn open(
        store: Arc<dyn RecordStore>,
        collection: impl Into<String>,
        clock: Arc<dyn Clock>,
        month_index: u32,
    ) -> AppResult<Self> {
        let mut feed = Self {
            store,
            collection: collection.into(),
            clock,
            month_index,
            subscription: None,
            ledger: MonthlyLedger::default(),
        };
        feed.select_month(month_index).await?;
        Ok(feed)
    }

    /// The year comes from the clock at selection time, so a feed kept open
    /// over New Year reads the new year's months on the next selection.
    pub async fn select_month(&mut self, month_index: u32) -> AppResult<()> {
        let name = month_name(month_index)?;
        let dates = DateContext::from_clock(self.collection.clone(), self.clock.as_ref());
        let path = dates.fetch_path(month_index)?;

        if let Some(previous) = self.subscription.take() {
            tracing::debug!(path = %previous.path(), "month subscription released");
        }
        self.month_index = month_index;
        self.ledger = MonthlyLedger::empty(name);

        let subscription = self.store.subscribe(&path).await?;
        tracing::info!(path = %path, backend = self.store.backend_tag(), "month subscription active");
        self.subscription = Some(subscription);
        Ok(())
    }

    pub fn month_index(&self) -> u32 {
        self.month_index
    }

    pub fn path(&self) -> Option<&StorePath> {
        self.subscription.as_ref().map(Subscription::path)
    }

    pub fn ledger(&self) -> &MonthlyLedger {
        &self.ledger
    }

    /// Waits for the next snapshot and recomputes the ledger. `None` once the
    /// stream has ended or no month could be subscribed.
    pub async fn next_update(&mut self) -> Option<AppResult<&MonthlyLedger>> {
        let subscription = self.subscription.as_mut()?;
        match subscription.next().await? {
            SnapshotEvent::Value(snapshot) => {
                let month_name = self.ledger.month_name.clone();
                self.ledger = MonthlyLedger::from_snapshot(&month_name, snapshot.as_ref());
                Some(Ok(&self.ledger))
            }
            SnapshotEvent::Error(message) => {
                tracing::warn!(error = %message, month = self.month_index, "month subscription reported an error");
                Some(Err(AppError::Store(message)))
            }
        }
    }
}
