use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::tickets::TicketConfig;

/// Per-workspace configuration blob. Only the `tickets` sub-object is
/// owned by this crate; other subsystems keep their own top-level keys in
/// the same blob, so unknown keys must survive a round trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuildConfig {
    pub tickets: TicketConfig,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt workspace config: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Opaque get/patch store keyed by workspace id. `patch` merges the given
/// partial object into the stored blob at the top level only: a key
/// present in the partial replaces the stored key wholesale.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, workspace_id: &str) -> Result<GuildConfig, StoreError>;
    async fn patch(&self, workspace_id: &str, partial: Value) -> Result<GuildConfig, StoreError>;
}

pub fn shallow_merge(base: &mut Value, partial: Value) {
    let Value::Object(partial) = partial else {
        return;
    };
    match base {
        Value::Object(target) => {
            for (key, value) in partial {
                target.insert(key, value);
            }
        }
        other => *other = Value::Object(partial),
    }
}

fn decode(value: &Value) -> Result<GuildConfig, StoreError> {
    Ok(serde_json::from_value(value.clone())?)
}

/// In-memory store, used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get(&self, workspace_id: &str) -> Result<GuildConfig, StoreError> {
        let blobs = self.blobs.read().await;
        match blobs.get(workspace_id) {
            Some(value) => decode(value),
            None => Ok(GuildConfig::default()),
        }
    }

    async fn patch(&self, workspace_id: &str, partial: Value) -> Result<GuildConfig, StoreError> {
        let mut blobs = self.blobs.write().await;
        let entry = blobs
            .entry(workspace_id.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        shallow_merge(entry, partial);
        decode(entry)
    }
}

/// File-backed store: one `<workspace_id>.json` per workspace under the
/// state directory. Writers are serialized and writes go through a temp
/// file plus rename so a crash never leaves a half-written blob.
pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, workspace_id: &str) -> PathBuf {
        // Workspace ids are platform snowflakes; keep anything else from
        // escaping the state directory.
        let safe: String = workspace_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    async fn read_blob(&self, workspace_id: &str) -> Result<Value, StoreError> {
        match tokio::fs::read(self.path_for(workspace_id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Value::Object(serde_json::Map::new()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn get(&self, workspace_id: &str) -> Result<GuildConfig, StoreError> {
        decode(&self.read_blob(workspace_id).await?)
    }

    async fn patch(&self, workspace_id: &str, partial: Value) -> Result<GuildConfig, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut blob = self.read_blob(workspace_id).await?;
        shallow_merge(&mut blob, partial);

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(workspace_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&blob)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        decode(&blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn patch_is_shallow_at_top_level() {
        let store = MemoryStore::new();
        store
            .patch("g1", json!({"tickets": {"enabled": true, "nextNumber": 7}}))
            .await
            .unwrap();

        // Patching `tickets` again replaces the whole sub-object.
        let cfg = store
            .patch("g1", json!({"tickets": {"enabled": false}}))
            .await
            .unwrap();
        assert!(!cfg.tickets.enabled);
        assert_eq!(cfg.tickets.next_number, 1);
    }

    #[tokio::test]
    async fn foreign_top_level_keys_survive() {
        let store = MemoryStore::new();
        store
            .patch("g1", json!({"starboard": {"threshold": 5}}))
            .await
            .unwrap();
        let cfg = store
            .patch("g1", json!({"tickets": {"enabled": true}}))
            .await
            .unwrap();

        assert!(cfg.tickets.enabled);
        assert_eq!(cfg.rest["starboard"]["threshold"], 5);
    }

    #[tokio::test]
    async fn missing_workspace_yields_defaults() {
        let store = MemoryStore::new();
        let cfg = store.get("nope").await.unwrap();
        assert!(!cfg.tickets.enabled);
        assert!(cfg.tickets.by_channel.is_empty());
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        store
            .patch("123", json!({"tickets": {"enabled": true, "staffRoleId": "r1"}}))
            .await
            .unwrap();

        let cfg = store.get("123").await.unwrap();
        assert!(cfg.tickets.enabled);
        assert_eq!(cfg.tickets.staff_role_id.as_deref(), Some("r1"));

        // A second store over the same directory sees the same data.
        let reopened = JsonFileStore::new(dir.path());
        let cfg = reopened.get("123").await.unwrap();
        assert_eq!(cfg.tickets.staff_role_id.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn file_store_sanitizes_workspace_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store
            .patch("../evil", json!({"tickets": {"enabled": true}}))
            .await
            .unwrap();

        assert!(dir.path().join("evil.json").exists());
    }
}
