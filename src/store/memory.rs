use super::{is_empty_node, node_at, object_at_mut, RecordStore, StorePath, SubscriberHub, Subscription};
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// JSON tree held in memory. Counts calls and can be told to fail, which is
/// what the workflow tests lean on.
pub struct MemoryStore {
    root: Mutex<Value>,
    hub: SubscriberHub,
    write_log: Mutex<Vec<(StorePath, Map<String, Value>)>>,
    pub read_calls: AtomicU64,
    pub write_calls: AtomicU64,
    pub subscribe_calls: AtomicU64,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            root: Mutex::new(Value::Object(Map::new())),
            hub: SubscriberHub::new(),
            write_log: Mutex::new(Vec::new()),
            read_calls: AtomicU64::new(0),
            write_calls: AtomicU64::new(0),
            subscribe_calls: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: Value) -> Self {
        Self {
            root: Mutex::new(root),
            ..Self::default()
        }
    }

    pub fn total_calls(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
            + self.write_calls.load(Ordering::SeqCst)
            + self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(StorePath, Map<String, Value>)> {
        self.write_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.hub.active_count()
    }

    fn snapshot(&self, path: &StorePath) -> AppResult<Option<Value>> {
        let root = self
            .root
            .lock()
            .map_err(|_| AppError::Internal("memory store mutex poisoned".to_string()))?;
        Ok(node_at(&root, path.segments())
            .filter(|node| !is_empty_node(node))
            .cloned())
    }

    fn apply(&self, path: &StorePath, fields: &Map<String, Value>) -> AppResult<()> {
        let mut root = self
            .root
            .lock()
            .map_err(|_| AppError::Internal("memory store mutex poisoned".to_string()))?;
        let target = object_at_mut(&mut root, path.segments());
        for (key, value) in fields {
            if value.is_null() {
                target.remove(key);
            } else {
                target.insert(key.clone(), value.clone());
            }
        }
        drop(root);

        if let Ok(mut log) = self.write_log.lock() {
            log.push((path.clone(), fields.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn read(&self, path: &StorePath) -> AppResult<Option<Value>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Store(format!("injected read failure at {}", path)));
        }
        self.snapshot(path)
    }

    async fn subscribe(&self, path: &StorePath) -> AppResult<Subscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let subscription = self.hub.register(path.clone())?;
        let initial = self.snapshot(path)?;
        self.hub
            .publish(subscription.id(), super::SnapshotEvent::Value(initial));
        Ok(subscription)
    }

    async fn merge_write(&self, path: &StorePath, fields: &Map<String, Value>) -> AppResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Store(format!("injected write failure at {}", path)));
        }
        self.apply(path, fields)?;
        self.hub.fan_out(path, |target| {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(AppError::Store(format!("injected read failure at {}", target)));
            }
            self.snapshot(target)
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::store::{RecordStore, SnapshotEvent, StorePath};
    use serde_json::{json, Map, Value};
    use std::sync::atomic::Ordering;

    fn fields(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), json!(value)))
            .collect()
    }

    #[tokio::test]
    async fn merge_write_preserves_sibling_fields() {
        let store = MemoryStore::with_root(json!({
            "Dairy": { "2024": { "June": { "3": { "Morning": "5" } } } }
        }));
        let path = StorePath::parse("Dairy/2024/June/3").expect("path");

        store
            .merge_write(&path, &fields(&[("Evening", "7")]))
            .await
            .expect("write");

        let record = store.read(&path).await.expect("read").expect("record");
        assert_eq!(record, json!({ "Morning": "5", "Evening": "7" }));
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn missing_node_reads_as_none() {
        let store = MemoryStore::new();
        let path = StorePath::parse("Dairy/2024/June/3").expect("path");
        assert!(store.read(&path).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn subscribers_get_initial_and_updated_snapshots() {
        let store = MemoryStore::new();
        let month = StorePath::parse("Dairy/2024/June").expect("path");
        let mut subscription = store.subscribe(&month).await.expect("subscribe");
        assert_eq!(subscription.next().await, Some(SnapshotEvent::Value(None)));

        store
            .merge_write(&month.child("3"), &fields(&[("Morning", "4")]))
            .await
            .expect("write");
        assert_eq!(
            subscription.next().await,
            Some(SnapshotEvent::Value(Some(json!({ "3": { "Morning": "4" } }))))
        );

        let july = StorePath::parse("Dairy/2024/July/1").expect("path");
        store
            .merge_write(&july, &fields(&[("Morning", "1")]))
            .await
            .expect("write");
        assert!(subscription.try_next().is_none());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_store_errors() {
        let store = MemoryStore::new();
        store.fail_reads.store(true, Ordering::SeqCst);
        let path = StorePath::parse("Dairy/2024/June/3").expect("path");
        let error = store.read(&path).await.expect_err("read should fail");
        assert!(error.to_string().starts_with("STORE_FAILURE"));
    }
}
