use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use crate::factory;
use crate::monitor::{self, LifecycleMonitor};
use crate::registry::BindingRegistry;
use crate::{
    BindingToken, ContainerId, DataContainer, FieldChangeFn, Schema, SyncError, Timestamp,
    UpdateContext, Value,
};

/// Compares two values for the purpose of no-op suppression.
///
/// Used by `SyncRuntimeBuilder::value_comparator` to customize when a write
/// counts as "no change" and skips fan-out entirely. Returns true when the
/// two values are to be treated as equal.
pub type ValueComparator = fn(&Value, &Value) -> bool;

/// Default value comparator: plain structural equality.
fn default_value_comparator(a: &Value, b: &Value) -> bool {
    a == b
}

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct RuntimeInner {
    pub(crate) registry: BindingRegistry,
    pub(crate) monitor: LifecycleMonitor,
    clock: AtomicU64,
    lock_timeout: Duration,
}

/// SyncRuntime owns everything containers share: the binding registry, the
/// logical clock that orders competing writes, and the lifecycle monitor.
///
/// This is cheap to clone; all clones refer to the same shared state. Every
/// container carries the runtime that created it, and containers only
/// synchronize with containers of the same runtime.
#[derive(Clone)]
pub struct SyncRuntime {
    inner: Arc<RuntimeInner>,
}

impl Default for SyncRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncRuntime {
    /// Create a new runtime with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for customizing the runtime.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use fieldsync::SyncRuntime;
    ///
    /// let runtime = SyncRuntime::builder()
    ///     .lock_timeout(Duration::from_millis(200))
    ///     .build();
    /// ```
    pub fn builder() -> SyncRuntimeBuilder {
        SyncRuntimeBuilder::new()
    }

    // ========================================================================
    // Container construction
    // ========================================================================

    /// Create a standalone container and store its initial values.
    ///
    /// Initial values bypass access modes (a read-only field can be seeded
    /// here), carry the pristine stamp zero, and are not propagated:
    /// construction is not mutation. Unknown names and kind mismatches are
    /// rejected.
    ///
    /// # Example
    ///
    /// ```
    /// use fieldsync::{FieldDef, Schema, SyncRuntime, Value, ValueKind};
    ///
    /// let runtime = SyncRuntime::new();
    /// let schema = Schema::new(vec![FieldDef::read_write("name", ValueKind::Text)]);
    /// let root = runtime
    ///     .new_root(schema, &[("name", Value::text("base"))])
    ///     .unwrap();
    /// assert_eq!(root.get("name").unwrap(), Value::text("base"));
    /// ```
    pub fn new_root(
        &self,
        schema: Schema,
        initial: &[(&str, Value)],
    ) -> Result<Arc<DataContainer>, SyncError> {
        let container = Arc::new(DataContainer::new(schema, self.clone()));
        container.store_initial(initial)?;
        Ok(container)
    }

    /// Create a container pre-populated from `source` and wired to it.
    ///
    /// Readable fields shared with the source are copied under a consistent
    /// read snapshot, then bindings are set up in both directions according
    /// to the new schema's access modes: readable fields follow the source,
    /// writable fields transmit back to it.
    pub fn new_replica(
        &self,
        schema: Schema,
        source: &Arc<DataContainer>,
    ) -> Result<Arc<DataContainer>, SyncError> {
        factory::create_replica(self, schema, source, |_| Ok(()))
    }

    /// Create a replica, running `init` after the copy but before any
    /// binding exists.
    ///
    /// `init` runs inside the snapshot window: the copied source fields are
    /// still read-locked, nothing the closure writes is propagated
    /// anywhere, and the wiring only happens once it returns `Ok`.
    pub fn new_replica_with<F>(
        &self,
        schema: Schema,
        source: &Arc<DataContainer>,
        init: F,
    ) -> Result<Arc<DataContainer>, SyncError>
    where
        F: FnOnce(&Arc<DataContainer>) -> Result<(), SyncError>,
    {
        factory::create_replica(self, schema, source, init)
    }

    // ========================================================================
    // Binding management
    // ========================================================================

    /// Register `deliver` to run on behalf of `receiver` whenever `field`
    /// changes on `source`.
    ///
    /// The registration holds only a weak handle to the receiver and never
    /// keeps it alive. Registrations for one field fire in registration
    /// order. Binding a field the source never sets is allowed and simply
    /// never fires. Both containers must belong to this runtime.
    pub fn bind(
        &self,
        source: &DataContainer,
        field: &str,
        receiver: &Arc<DataContainer>,
        deliver: FieldChangeFn,
    ) -> BindingToken {
        debug_assert!(
            self.same_runtime(source) && self.same_runtime(receiver),
            "containers can only be bound within the runtime that created them"
        );
        let token = self
            .inner
            .registry
            .bind(source.id(), field, receiver, deliver);
        self.inner.monitor.watch_transmitter(source.id());
        self.inner.monitor.watch_receiver(receiver.id());
        token
    }

    /// Register `deliver` to run for every field change on `source`.
    ///
    /// Wildcard registrations fire after the field-specific ones of the
    /// same change.
    pub fn bind_any(
        &self,
        source: &DataContainer,
        receiver: &Arc<DataContainer>,
        deliver: FieldChangeFn,
    ) -> BindingToken {
        debug_assert!(
            self.same_runtime(source) && self.same_runtime(receiver),
            "containers can only be bound within the runtime that created them"
        );
        let token = self.inner.registry.bind_any(source.id(), receiver, deliver);
        self.inner.monitor.watch_transmitter(source.id());
        self.inner.monitor.watch_receiver(receiver.id());
        token
    }

    /// Remove the field-specific registration named by `token`. Returns
    /// true if it still existed.
    pub fn unbind(&self, source: ContainerId, field: &str, token: BindingToken) -> bool {
        self.inner.registry.unbind(source, field, token)
    }

    /// Remove the wildcard registration named by `token`. Returns true if
    /// it still existed.
    pub fn unbind_any(&self, source: ContainerId, token: BindingToken) -> bool {
        self.inner.registry.unbind_any(source, token)
    }

    /// Detach an identity from one field on both sides: changes of that
    /// field no longer reach it, and its own changes of that field no
    /// longer reach anyone. Other fields stay wired.
    pub fn unbind_field(&self, id: ContainerId, field: &str) {
        self.inner.registry.unbind_field(id, field);
    }

    /// Detach an identity completely, as a transmitter and as a receiver.
    pub fn unbind_all(&self, id: ContainerId) {
        self.inner.registry.unbind_all(id);
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// The number of identities something is currently bound to. Counts
    /// identities, not registrations.
    pub fn transmitter_count(&self) -> usize {
        self.inner.registry.transmitter_count()
    }

    /// The number of identities currently registered as a receiver
    /// somewhere. Counts identities, not registrations.
    pub fn receiver_count(&self) -> usize {
        self.inner.registry.receiver_count()
    }

    /// The number of lifecycle watch entries across both sides. An identity
    /// bound as transmitter and receiver counts twice.
    pub fn monitored_count(&self) -> usize {
        self.inner.monitor.monitored_count()
    }

    // ========================================================================
    // Internal plumbing
    // ========================================================================

    /// Start a propagation wave: the next clock reading, with `origin`
    /// already marked visited.
    pub(crate) fn begin_wave(&self, origin: ContainerId) -> UpdateContext {
        let time = Timestamp(self.inner.clock.fetch_add(1, Ordering::Relaxed));
        UpdateContext::new(time, origin)
    }

    pub(crate) fn registry(&self) -> &BindingRegistry {
        &self.inner.registry
    }

    pub(crate) fn release(&self, id: ContainerId) {
        self.inner.monitor.notify_dropped(id);
    }

    pub(crate) fn lock_timeout(&self) -> Duration {
        self.inner.lock_timeout
    }

    fn same_runtime(&self, container: &DataContainer) -> bool {
        Arc::ptr_eq(&self.inner, &container.runtime().inner)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`SyncRuntime`] with customizable settings.
///
/// # Example
///
/// ```
/// use fieldsync::{SyncRuntime, Value};
///
/// // Treat any two text values of equal length as "no change".
/// fn by_length(a: &Value, b: &Value) -> bool {
///     match (a, b) {
///         (Value::Text(a), Value::Text(b)) => a.len() == b.len(),
///         _ => a == b,
///     }
/// }
///
/// let runtime = SyncRuntime::builder().value_comparator(by_length).build();
/// ```
pub struct SyncRuntimeBuilder {
    value_comparator: ValueComparator,
    lock_timeout: Duration,
}

impl Default for SyncRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            value_comparator: default_value_comparator,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Set the comparator used for no-op suppression.
    ///
    /// When a write stores a value the comparator considers equal to the
    /// previous one, the slot still takes the new stamp but nothing is
    /// propagated. The default is structural equality.
    pub fn value_comparator(mut self, f: ValueComparator) -> Self {
        self.value_comparator = f;
        self
    }

    /// Set the per-lock timeout for multi-lock batches, used by replica
    /// construction when it snapshots a source. Defaults to five seconds.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Build the runtime with the configured settings.
    pub fn build(self) -> SyncRuntime {
        let (sender, receiver) = mpsc::channel();
        let inner = Arc::new(RuntimeInner {
            registry: BindingRegistry::new(self.value_comparator),
            monitor: LifecycleMonitor::new(sender),
            clock: AtomicU64::new(1),
            lock_timeout: self.lock_timeout,
        });
        monitor::spawn(receiver, Arc::downgrade(&inner));
        SyncRuntime { inner }
    }
}
