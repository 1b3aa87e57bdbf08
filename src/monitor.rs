use std::sync::mpsc;
use std::sync::Weak;
use std::thread;

use papaya::HashMap;
use parking_lot::Mutex;

use crate::registry::BindingRegistry;
use crate::runtime::RuntimeInner;
use crate::ContainerId;

/// LifecycleMonitor tracks which container identities appear in the
/// binding registry and purges their entries once the containers are gone.
///
/// Containers enqueue their identity from `Drop`; a background thread
/// drains the queue and clears registry state for every departed identity
/// it is watching. Cleanup is best-effort and asynchronous: between a drop
/// and its purge, fan-out still sees the identity's entries and skips them
/// because the receiver handle is dead.
pub(crate) struct LifecycleMonitor {
    watched_tx: HashMap<ContainerId, (), ahash::RandomState>,
    watched_rx: HashMap<ContainerId, (), ahash::RandomState>,
    queue: Mutex<mpsc::Sender<ContainerId>>,
}

impl LifecycleMonitor {
    pub(crate) fn new(queue: mpsc::Sender<ContainerId>) -> Self {
        LifecycleMonitor {
            watched_tx: HashMap::with_hasher(ahash::RandomState::new()),
            watched_rx: HashMap::with_hasher(ahash::RandomState::new()),
            queue: Mutex::new(queue),
        }
    }

    /// Start watching an identity that now transmits to someone. Watch
    /// entries are per identity, not per binding; rebinding is idempotent.
    pub(crate) fn watch_transmitter(&self, id: ContainerId) {
        self.watched_tx.pin().insert(id, ());
    }

    /// Start watching an identity that now receives from someone.
    pub(crate) fn watch_receiver(&self, id: ContainerId) {
        self.watched_rx.pin().insert(id, ());
    }

    /// Queue a departed identity for purging. A send failure means the
    /// monitor thread is gone, and with it everything worth purging.
    pub(crate) fn notify_dropped(&self, id: ContainerId) {
        let _ = self.queue.lock().send(id);
    }

    /// The number of watch entries across both sides.
    pub(crate) fn monitored_count(&self) -> usize {
        self.watched_tx.pin().len() + self.watched_rx.pin().len()
    }

    /// Purge registry state for one departed identity. Identities that were
    /// never watched, or were purged already, are quietly skipped.
    pub(crate) fn purge(&self, id: ContainerId, registry: &BindingRegistry) {
        let was_tx = self.watched_tx.pin().remove(&id).is_some();
        if was_tx {
            registry.remove_transmitter(id);
        }
        let was_rx = self.watched_rx.pin().remove(&id).is_some();
        if was_rx {
            registry.remove_receiver(id);
        }
        if was_tx || was_rx {
            tracing::debug!(container = %id, "purged bindings of a dropped container");
        }
    }
}

/// Start the monitor thread for a runtime. On spawn failure the runtime
/// still works, but dropped containers keep their registry entries until
/// they are unbound manually.
pub(crate) fn spawn(queue: mpsc::Receiver<ContainerId>, runtime: Weak<RuntimeInner>) {
    let spawned = thread::Builder::new()
        .name("fieldsync-monitor".into())
        .spawn(move || monitor_loop(queue, runtime));
    if let Err(error) = spawned {
        tracing::error!(%error, "failed to spawn the lifecycle monitor");
    }
}

/// Drain the drop queue until every sender is gone.
///
/// The thread holds only a weak handle to the runtime, so it never keeps
/// the runtime alive; once the last strong handle disappears the channel
/// disconnects and the loop ends.
fn monitor_loop(queue: mpsc::Receiver<ContainerId>, runtime: Weak<RuntimeInner>) {
    while let Ok(id) = queue.recv() {
        let Some(inner) = runtime.upgrade() else {
            break;
        };
        inner.monitor.purge(id, &inner.registry);
    }
    tracing::debug!("lifecycle monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn equal(a: &Value, b: &Value) -> bool {
        a == b
    }

    #[test]
    fn test_watch_entries_are_deduped_per_side() {
        let (sender, _receiver) = mpsc::channel();
        let monitor = LifecycleMonitor::new(sender);
        let id = ContainerId::generate();
        monitor.watch_transmitter(id);
        monitor.watch_transmitter(id);
        monitor.watch_receiver(id);
        assert_eq!(monitor.monitored_count(), 2);
    }

    #[test]
    fn test_purge_clears_watch_entries_once() {
        let (sender, _receiver) = mpsc::channel();
        let monitor = LifecycleMonitor::new(sender);
        let registry = BindingRegistry::new(equal);
        let id = ContainerId::generate();
        monitor.watch_transmitter(id);
        monitor.watch_receiver(id);
        monitor.purge(id, &registry);
        assert_eq!(monitor.monitored_count(), 0);
        // Purging an identity twice is a quiet no-op.
        monitor.purge(id, &registry);
        assert_eq!(monitor.monitored_count(), 0);
    }

    #[test]
    fn test_dropped_queue_receiver_is_tolerated() {
        let (sender, receiver) = mpsc::channel();
        drop(receiver);
        let monitor = LifecycleMonitor::new(sender);
        monitor.notify_dropped(ContainerId::generate());
    }
}
