use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Advisory lock registry keyed by (workspace id, channel id). Every
/// transition holds the lock across its read-validate-mutate-persist
/// sequence so that two in-flight transitions for the same ticket are
/// serialized. Owned by the manager instance, never a global, so tests
/// can build isolated managers.
#[derive(Default)]
pub struct TicketLocks {
    inner: StdMutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl TicketLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, workspace_id: &str, channel_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().expect("lock registry poisoned");
        map.entry((workspace_id.to_string(), channel_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for the per-ticket lock. Callers must re-read state after
    /// acquisition; anything observed before is stale.
    pub async fn acquire(&self, workspace_id: &str, channel_id: &str) -> OwnedMutexGuard<()> {
        self.entry(workspace_id, channel_id).lock_owned().await
    }

    /// Bounded wait; `None` means the ticket is busy.
    pub async fn acquire_timeout(
        &self,
        workspace_id: &str,
        channel_id: &str,
        wait: Duration,
    ) -> Option<OwnedMutexGuard<()>> {
        let entry = self.entry(workspace_id, channel_id);
        tokio::time::timeout(wait, entry.lock_owned()).await.ok()
    }

    /// Drop the registry entry once a ticket is gone. Holders keep their
    /// guard alive through the Arc; only the map shrinks.
    pub fn forget(&self, workspace_id: &str, channel_id: &str) {
        let mut map = self.inner.lock().expect("lock registry poisoned");
        map.remove(&(workspace_id.to_string(), channel_id.to_string()));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
