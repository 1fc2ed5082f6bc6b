pub mod memory;
pub mod sqlite;

use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

const RESERVED_SEGMENT_CHARS: [char; 5] = ['.', '#', '$', '[', ']'];

/// Slash-separated key addressing a node in the record tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let segments = raw
            .split('/')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        if segments.is_empty() {
            return Err(AppError::Validation("Store path cannot be empty".to_string()));
        }
        if let Some(bad) = segments
            .iter()
            .find(|segment| segment.contains(RESERVED_SEGMENT_CHARS))
        {
            return Err(AppError::Validation(format!(
                "Store path segment '{}' contains a reserved character",
                bad
            )));
        }
        Ok(Self { segments })
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    pub fn starts_with(&self, prefix: &StorePath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// True when a write at one path can change the snapshot at the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    Value(Option<Value>),
    Error(String),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    /// One-shot read. `None` when nothing is stored at or below `path`.
    async fn read(&self, path: &StorePath) -> AppResult<Option<Value>>;

    /// Live feed of snapshots at `path`. The current value is delivered first;
    /// dropping the subscription unsubscribes.
    async fn subscribe(&self, path: &StorePath) -> AppResult<Subscription>;

    /// Sets each key of `fields` under `path`, leaving sibling keys untouched.
    /// A `null` value removes that key.
    async fn merge_write(&self, path: &StorePath, fields: &Map<String, Value>) -> AppResult<()>;
}

/// Holds only the latest snapshot; a slow reader skips straight to it.
struct Subscriber {
    path: StorePath,
    sender: watch::Sender<Option<SnapshotEvent>>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

/// Registry of live subscriptions shared by the store backends.
#[derive(Clone, Default)]
pub struct SubscriberHub {
    inner: Arc<Mutex<HubInner>>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: StorePath) -> AppResult<Subscription> {
        let (sender, receiver) = watch::channel::<Option<SnapshotEvent>>(None);
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| AppError::Internal("subscriber hub mutex poisoned".to_string()))?;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.insert(
            id,
            Subscriber {
                path: path.clone(),
                sender,
            },
        );
        tracing::debug!(subscription_id = id, path = %path, "subscription registered");

        Ok(Subscription {
            id,
            path,
            receiver,
            hub: self.clone(),
        })
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.subscribers.len())
            .unwrap_or_default()
    }

    pub fn publish(&self, id: u64, event: SnapshotEvent) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let closed = match inner.subscribers.get(&id) {
            Some(subscriber) => subscriber.sender.send(Some(event)).is_err(),
            None => return,
        };
        if closed {
            inner.subscribers.remove(&id);
        }
    }

    /// Pushes a fresh snapshot to every subscriber whose path overlaps `written`.
    pub fn fan_out<F>(&self, written: &StorePath, snapshot: F)
    where
        F: Fn(&StorePath) -> AppResult<Option<Value>>,
    {
        let targets = match self.inner.lock() {
            Ok(inner) => inner
                .subscribers
                .iter()
                .filter(|(_, subscriber)| subscriber.path.overlaps(written))
                .map(|(id, subscriber)| (*id, subscriber.path.clone()))
                .collect::<Vec<_>>(),
            Err(_) => return,
        };

        for (id, path) in targets {
            let event = match snapshot(&path) {
                Ok(value) => SnapshotEvent::Value(value),
                Err(error) => {
                    tracing::warn!(error = %error, path = %path, "snapshot for subscriber failed");
                    SnapshotEvent::Error(error.to_string())
                }
            };
            self.publish(id, event);
        }
    }

    fn unregister(&self, id: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.subscribers.remove(&id).is_some() {
                tracing::debug!(subscription_id = id, "subscription released");
            }
        }
    }
}

impl fmt::Debug for SubscriberHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberHub")
            .field("active", &self.active_count())
            .finish()
    }
}

/// A live feed for one path. Dropping it releases the registration.
pub struct Subscription {
    id: u64,
    path: StorePath,
    receiver: watch::Receiver<Option<SnapshotEvent>>,
    hub: SubscriberHub,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Waits for a snapshot newer than the last one returned. Snapshots
    /// published in between are skipped.
    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        loop {
            self.receiver.changed().await.ok()?;
            if let Some(event) = self.receiver.borrow_and_update().clone() {
                return Some(event);
            }
        }
    }

    pub fn try_next(&mut self) -> Option<SnapshotEvent> {
        if !self.receiver.has_changed().unwrap_or(false) {
            return None;
        }
        self.receiver.borrow_and_update().clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

pub(crate) fn node_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

/// Creates intermediate objects as needed; a scalar in the way is replaced.
pub(crate) fn object_at_mut<'a>(root: &'a mut Value, segments: &[String]) -> &'a mut Map<String, Value> {
    let mut node = root;
    for segment in segments {
        node = ensure_object(node)
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(node)
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just made an object"),
    }
}

pub(crate) fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.values().all(is_empty_node),
        _ => false,
    }
}
