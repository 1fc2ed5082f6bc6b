use super::{object_at_mut, RecordStore, SnapshotEvent, StorePath, SubscriberHub, Subscription, RESERVED_SEGMENT_CHARS};
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Durable record tree. Every scalar leaf is one row keyed by its full slash
/// path; reading a node reassembles the JSON object below it.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    hub: SubscriberHub,
}

impl SqliteStore {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Store(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
            hub: SubscriberHub::new(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn snapshot(&self, path: &StorePath) -> AppResult<Option<Value>> {
        let prefix = path.to_string();
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT path, value_json FROM nodes
             WHERE path = ?1 OR substr(path, 1, ?2) = ?3
             ORDER BY path",
        )?;
        let rows = stmt
            .query_map(
                params![prefix, prefix.chars().count() as i64 + 1, format!("{}/", prefix)],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut root = Value::Object(Map::new());
        for (row_path, raw) in rows {
            let value: Value = serde_json::from_str(&raw)?;
            let relative = row_path[prefix.len()..].trim_start_matches('/');
            if relative.is_empty() {
                return Ok(Some(value));
            }
            let segments = relative.split('/').map(ToString::to_string).collect::<Vec<_>>();
            let Some((leaf, parents)) = segments.split_last() else {
                continue;
            };
            object_at_mut(&mut root, parents).insert(leaf.clone(), value);
        }
        Ok(Some(root))
    }

    fn apply(&self, path: &StorePath, fields: &Map<String, Value>) -> AppResult<()> {
        for key in fields.keys() {
            validate_key(key)?;
        }

        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let tx = conn.transaction()?;

        // A scalar stored at the target or above it would shadow the new children.
        let segments = path.segments();
        for depth in 1..=segments.len() {
            tx.execute("DELETE FROM nodes WHERE path = ?1", [segments[..depth].join("/")])?;
        }

        for (key, value) in fields {
            let child = path.child(key).to_string();
            tx.execute(
                "DELETE FROM nodes WHERE path = ?1 OR substr(path, 1, ?2) = ?3",
                params![child, child.chars().count() as i64 + 1, format!("{}/", child)],
            )?;

            let mut leaves = Vec::new();
            flatten_leaves(&child, value, &mut leaves);
            for (leaf_path, leaf_value) in leaves {
                tx.execute(
                    "INSERT INTO nodes (path, value_json, updated_at) VALUES (?1, ?2, ?3)",
                    params![leaf_path, serde_json::to_string(&leaf_value)?, now],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn backend_tag(&self) -> &'static str {
        "sqlite"
    }

    async fn read(&self, path: &StorePath) -> AppResult<Option<Value>> {
        self.snapshot(path)
    }

    async fn subscribe(&self, path: &StorePath) -> AppResult<Subscription> {
        let subscription = self.hub.register(path.clone())?;
        let event = match self.snapshot(path) {
            Ok(value) => SnapshotEvent::Value(value),
            Err(error) => SnapshotEvent::Error(error.to_string()),
        };
        self.hub.publish(subscription.id(), event);
        Ok(subscription)
    }

    async fn merge_write(&self, path: &StorePath, fields: &Map<String, Value>) -> AppResult<()> {
        self.apply(path, fields)?;
        self.hub.fan_out(path, |target| self.snapshot(target));
        Ok(())
    }
}

fn validate_key(key: &str) -> AppResult<()> {
    if key.is_empty() || key.contains('/') || key.contains(RESERVED_SEGMENT_CHARS) {
        return Err(AppError::Validation(format!("'{}' is not a valid field name", key)));
    }
    Ok(())
}

fn flatten_leaves(path: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, child) in map {
                flatten_leaves(&format!("{}/{}", path, key), child, out);
            }
        }
        other => out.push((path.to_string(), other.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteStore;
    use crate::store::{RecordStore, SnapshotEvent, StorePath};
    use serde_json::{json, Map, Value};

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[tokio::test]
    async fn write_then_read_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(&dir.path().join("dairy.sqlite")).expect("store");
        let path = StorePath::parse("Dairy/2024/June/3").expect("path");

        store
            .merge_write(&path, &fields(json!({ "Morning": "5" })))
            .await
            .expect("write");
        store
            .merge_write(&path, &fields(json!({ "Evening": "7" })))
            .await
            .expect("write");

        let record = store.read(&path).await.expect("read").expect("record");
        assert_eq!(record, json!({ "Morning": "5", "Evening": "7" }));
    }

    #[tokio::test]
    async fn month_read_assembles_days() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(&dir.path().join("dairy.sqlite")).expect("store");
        let month = StorePath::parse("Dairy/2024/June").expect("path");

        for (day, morning) in [("3", "5"), ("12", "6")] {
            store
                .merge_write(&month.child(day), &fields(json!({ "Morning": morning })))
                .await
                .expect("write");
        }
        // Sibling month with a shared name prefix must not leak in.
        let junes = StorePath::parse("Dairy/2024/Junes/1").expect("path");
        store
            .merge_write(&junes, &fields(json!({ "Morning": "9" })))
            .await
            .expect("write");

        let snapshot = store.read(&month).await.expect("read").expect("month");
        assert_eq!(
            snapshot,
            json!({ "3": { "Morning": "5" }, "12": { "Morning": "6" } })
        );
    }

    #[tokio::test]
    async fn nested_objects_and_null_removal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(&dir.path().join("dairy.sqlite")).expect("store");
        let root = StorePath::parse("validation").expect("path");

        store
            .merge_write(&root, &fields(json!({ "prime": "p", "nonPrime": "f" })))
            .await
            .expect("write");
        store
            .merge_write(&root, &fields(json!({ "nonPrime": null })))
            .await
            .expect("write");

        let stored = store.read(&root).await.expect("read").expect("credentials");
        assert_eq!(stored, json!({ "prime": "p" }));
        assert!(store
            .merge_write(&root, &fields(json!({ "a/b": "x" })))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn subscription_sees_writes_below_its_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(&dir.path().join("dairy.sqlite")).expect("store");
        let month = StorePath::parse("Dairy/2024/June").expect("path");
        let mut subscription = store.subscribe(&month).await.expect("subscribe");
        assert_eq!(subscription.next().await, Some(SnapshotEvent::Value(None)));

        store
            .merge_write(&month.child("3"), &fields(json!({ "Evening": "2.5" })))
            .await
            .expect("write");
        assert_eq!(
            subscription.next().await,
            Some(SnapshotEvent::Value(Some(json!({ "3": { "Evening": "2.5" } }))))
        );
    }

    #[test]
    fn reopening_keeps_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("dairy.sqlite");
        let path = StorePath::parse("Dairy/2024/June/3").expect("path");
        let runtime = tokio::runtime::Runtime::new().expect("runtime");

        runtime.block_on(async {
            let store = SqliteStore::new(&db_path).expect("store");
            store
                .merge_write(&path, &fields(json!({ "Morning": "5" })))
                .await
                .expect("write");
        });

        let reopened = SqliteStore::new(&db_path).expect("store");
        assert_eq!(reopened.db_path(), db_path.as_path());
        let record = runtime
            .block_on(reopened.read(&path))
            .expect("read")
            .expect("record");
        assert_eq!(record, json!({ "Morning": "5" }));
    }
}
