use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Notify, RwLock};

static NEXT_WAITER_ID: AtomicU64 = AtomicU64::new(1);

/// A blocked reader's wake-up handle, shared across every key it waits on.
#[derive(Debug, Clone)]
pub struct Waiter {
    id: u64,
    notify: Arc<Notify>,
}

impl Waiter {
    /// Resolves once any of the registered keys is appended to. A notification
    /// that fires before this is awaited is not lost.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Registry of clients blocked on stream keys. XADD calls `notify` after
/// appending so blocked XREADs re-check their streams.
#[derive(Debug, Default)]
pub struct KeyWatcher {
    waiters: HashMap<String, Vec<Waiter>>,
}

impl KeyWatcher {
    pub fn new() -> Self {
        KeyWatcher {
            waiters: HashMap::new(),
        }
    }

    /// Register one waiter across several keys.
    pub fn register_many(&mut self, keys: &[String]) -> Waiter {
        let waiter = Waiter {
            id: NEXT_WAITER_ID.fetch_add(1, Ordering::Relaxed),
            notify: Arc::new(Notify::new()),
        };
        for key in keys {
            self.waiters
                .entry(key.clone())
                .or_default()
                .push(waiter.clone());
        }
        waiter
    }

    /// Wake every waiter on `key` and forget them; a woken reader registers
    /// again if it still has nothing to deliver. Returns the number woken.
    pub fn notify(&mut self, key: &str) -> usize {
        let Some(waiters) = self.waiters.remove(key) else {
            return 0;
        };
        for w in &waiters {
            w.notify.notify_one();
        }
        waiters.len()
    }

    pub fn unregister_many(&mut self, keys: &[String], waiter: &Waiter) {
        for key in keys {
            if let Some(waiters) = self.waiters.get_mut(key) {
                waiters.retain(|w| w.id != waiter.id);
                if waiters.is_empty() {
                    self.waiters.remove(key);
                }
            }
        }
    }

    /// Number of waiters registered on `key`.
    pub fn waiting_on(&self, key: &str) -> usize {
        self.waiters.get(key).map_or(0, Vec::len)
    }
}

pub type SharedKeyWatcher = Arc<RwLock<KeyWatcher>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_notify_wakes_registered_waiter() {
        let mut watcher = KeyWatcher::new();
        let waiter = watcher.register_many(&["a".to_string(), "b".to_string()]);
        assert_eq!(watcher.notify("b"), 1);
        // permit is stored even though nobody was polling yet
        tokio::time::timeout(Duration::from_millis(100), waiter.notified())
            .await
            .unwrap();
        assert_eq!(watcher.waiting_on("b"), 0);
    }

    #[test]
    fn test_unregister_removes_only_that_waiter() {
        let mut watcher = KeyWatcher::new();
        let keys = vec!["s".to_string()];
        let first = watcher.register_many(&keys);
        let _second = watcher.register_many(&keys);
        watcher.unregister_many(&keys, &first);
        assert_eq!(watcher.waiting_on("s"), 1);
        assert_eq!(watcher.notify("s"), 1);
        assert_eq!(watcher.notify("s"), 0);
    }
}
