//! Process-wide state shared by all client connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fnv::FnvHashMap as HashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::task::TaskTracker;

static COMMS: Lazy<Comms> = Lazy::new(Comms::new);

/// Get the global communication channel.
pub fn comms() -> Comms {
    COMMS.clone()
}

struct Global {
    shutdown: Notify,
    /// Signaled after successful writes; wakes replication streams early.
    change_wake: Notify,
    tracker: TaskTracker,
    next_connection_id: AtomicU64,
    /// Open client sockets per database name.
    active: Mutex<HashMap<String, usize>>,
}

/// Handle on the shared state. Cheap to clone.
#[derive(Clone)]
pub struct Comms {
    global: Arc<Global>,
}

impl Default for Comms {
    fn default() -> Self {
        Self::new()
    }
}

impl Comms {
    fn new() -> Self {
        Self {
            global: Arc::new(Global {
                shutdown: Notify::new(),
                change_wake: Notify::new(),
                tracker: TaskTracker::new(),
                next_connection_id: AtomicU64::new(1),
                active: Mutex::new(HashMap::default()),
            }),
        }
    }

    /// Connection id for logging.
    pub fn next_connection_id(&self) -> u64 {
        self.global.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Client connected to `database`. Returns the new count.
    pub fn connect(&self, database: &str) -> usize {
        let mut active = self.global.active.lock();
        let count = active.entry(database.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Client left `database`. Returns how many remain; the session reset
    /// fires if and only if this hits zero.
    pub fn disconnect(&self, database: &str) -> usize {
        let mut active = self.global.active.lock();

        match active.get_mut(database) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                active.remove(database);
                0
            }
            None => 0,
        }
    }

    /// Open connections for `database`.
    pub fn active(&self, database: &str) -> usize {
        self.global.active.lock().get(database).copied().unwrap_or(0)
    }

    /// Task tracker for client connections; awaited on shutdown.
    pub fn tracker(&self) -> &TaskTracker {
        &self.global.tracker
    }

    pub fn notify_shutdown(&self) {
        self.global.shutdown.notify_waiters();
    }

    pub async fn on_shutdown(&self) {
        self.global.shutdown.notified().await;
    }

    /// A write went through; replication streams should poll now.
    pub fn wake_replication(&self) {
        self.global.change_wake.notify_waiters();
    }

    pub async fn on_change(&self) {
        self.global.change_wake.notified().await;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn connection_counts_by_database() {
        let comms = Comms::new();

        assert_eq!(comms.connect("postgres"), 1);
        assert_eq!(comms.connect("postgres"), 2);
        assert_eq!(comms.connect("zero_cvr"), 1);

        assert_eq!(comms.disconnect("postgres"), 1);
        assert_eq!(comms.active("postgres"), 1);
        assert_eq!(comms.disconnect("postgres"), 0);
        assert_eq!(comms.active("postgres"), 0);

        // Unbalanced disconnects stay at zero.
        assert_eq!(comms.disconnect("postgres"), 0);
        assert_eq!(comms.active("zero_cvr"), 1);
    }

    #[test]
    fn connection_ids_increment() {
        let comms = Comms::new();
        let first = comms.next_connection_id();
        assert_eq!(comms.next_connection_id(), first + 1);
    }
}
