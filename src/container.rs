use std::fmt;
use std::mem;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::{FieldDef, Schema, SyncError, SyncRuntime, Timestamp, UpdateContext, Value};

/// ContainerId is the process-unique identity of one data container.
///
/// Identities are generated at construction and never reused; every
/// registry, watch, and visited-set structure keys on them rather than on
/// references, so nothing in the engine keeps a container alive by
/// accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContainerId(Uuid);

impl ContainerId {
    pub(crate) fn generate() -> Self {
        ContainerId(Uuid::new_v4())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One field's storage: the current value and the time of the update that
/// produced it. Guarded by its own lock, independent of every other slot.
#[derive(Debug, Clone, Default)]
pub(crate) struct FieldSlot {
    pub(crate) value: Value,
    pub(crate) stamp: Timestamp,
}

/// FieldSnapshot is one row of a container dump: the field name, its
/// current value, and the time of the last applied update.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSnapshot {
    /// The field name.
    pub name: Arc<str>,
    /// The value at the moment the row was read.
    pub value: Value,
    /// The logical time of the update that produced the value; zero for a
    /// slot nothing has updated yet.
    pub stamp: Timestamp,
}

/// DataContainer is an addressable bundle of schema-defined field slots.
///
/// Every slot carries its own reader-writer lock, so readers of one field
/// never contend with writers of another. A container participates in
/// synchronization purely through the runtime that created it: writes fan
/// out through the runtime's binding registry, and propagated changes
/// arrive through [`DataContainer::receive`].
///
/// Containers are handed out as `Arc<DataContainer>`; dropping the last
/// handle queues the identity for the runtime's lifecycle monitor, which
/// eventually clears any bindings that still mention it.
pub struct DataContainer {
    id: ContainerId,
    schema: Schema,
    slots: Vec<RwLock<FieldSlot>>,
    runtime: SyncRuntime,
}

impl DataContainer {
    pub(crate) fn new(schema: Schema, runtime: SyncRuntime) -> Self {
        let slots = (0..schema.len())
            .map(|_| RwLock::new(FieldSlot::default()))
            .collect();
        DataContainer {
            id: ContainerId::generate(),
            schema,
            slots,
            runtime,
        }
    }

    /// The container's identity.
    pub fn id(&self) -> ContainerId {
        self.id
    }

    /// The schema the container was built from.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn runtime(&self) -> &SyncRuntime {
        &self.runtime
    }

    /// The definition and slot of a field, or `None` if the schema does not
    /// list it.
    fn field_entry(&self, field: &str) -> Option<(&FieldDef, &RwLock<FieldSlot>)> {
        let index = self.schema.index_of(field)?;
        Some((self.schema.get(index)?, self.slots.get(index)?))
    }

    /// The lock of the slot at `index`. Indices come from this container's
    /// schema.
    pub(crate) fn slot(&self, index: usize) -> &RwLock<FieldSlot> {
        &self.slots[index]
    }

    /// Read the current value of a readable field.
    ///
    /// A field nothing has written yet reads as [`Value::None`]. The slot's
    /// lock is held shared only for the duration of the copy.
    pub fn get(&self, field: &str) -> Result<Value, SyncError> {
        let (def, slot) = self
            .field_entry(field)
            .ok_or_else(|| SyncError::unknown_field(field))?;
        if !def.is_readable() {
            return Err(SyncError::not_readable(field));
        }
        Ok(slot.read().value.clone())
    }

    /// Write a writable field and propagate the change to every bound
    /// container.
    ///
    /// The write starts a fresh propagation wave stamped with the next
    /// logical clock reading; this container counts as already visited, so
    /// a binding cycle that loops back here stops instead of recursing.
    /// Setting a field to a value the runtime's comparator considers equal
    /// still advances the slot's stamp but does not notify anyone.
    pub fn set(&self, field: &str, value: Value) -> Result<(), SyncError> {
        let (def, slot) = self
            .field_entry(field)
            .ok_or_else(|| SyncError::unknown_field(field))?;
        if !def.is_writable() {
            return Err(SyncError::not_writable(field));
        }
        if let Some(found) = value.kind() {
            if found != def.kind {
                return Err(SyncError::type_mismatch(field, def.kind, found));
            }
        }
        let ctx = self.runtime.begin_wave(self.id);
        self.apply(&def.name, slot, value, &ctx);
        Ok(())
    }

    /// Accept a change propagated from a container this one is bound to.
    ///
    /// This is the delivery function the replica factory registers for
    /// every binding it creates, and the entry point custom delivery
    /// functions usually forward to. Unlike [`DataContainer::set`] it does
    /// not check writability (a read-only field follows its source), it
    /// silently ignores fields missing from this schema, and it drops
    /// values of the wrong kind with a warning instead of an error. A wave
    /// that has already visited this container stops here.
    pub fn receive(&self, field: &str, old: &Value, new: &Value, ctx: &UpdateContext) {
        if !ctx.visit(self.id) {
            tracing::trace!(container = %self.id, field, "wave already visited this container");
            return;
        }
        let Some((def, slot)) = self.field_entry(field) else {
            return;
        };
        if !new.fits(def.kind) {
            tracing::warn!(
                container = %self.id,
                field,
                expected = %def.kind,
                ?old,
                ?new,
                "dropping a propagated value of the wrong kind"
            );
            return;
        }
        self.apply(&def.name, slot, new.clone(), ctx);
    }

    /// Store `value` under the slot's write lock if the wave is fresh, then
    /// fan the change out through the registry.
    ///
    /// A wave whose time does not exceed the slot's stamp is dropped whole:
    /// no store, no fan-out. The write guard is released before fan-out so
    /// no slot lock is ever held across a delivery call.
    fn apply(&self, name: &Arc<str>, slot: &RwLock<FieldSlot>, value: Value, ctx: &UpdateContext) {
        let old = {
            let mut slot = slot.write();
            if ctx.time() <= slot.stamp {
                tracing::trace!(container = %self.id, field = %name, "dropping stale update");
                return;
            }
            slot.stamp = ctx.time();
            mem::replace(&mut slot.value, value.clone())
        };
        self.runtime
            .registry()
            .notify(self.id, name, &old, &value, ctx);
    }

    /// Store an initial value directly: no stamp, no fan-out. Construction
    /// is not mutation.
    pub(crate) fn store_initial(&self, values: &[(&str, Value)]) -> Result<(), SyncError> {
        for (field, value) in values {
            let (def, slot) = self
                .field_entry(field)
                .ok_or_else(|| SyncError::unknown_field(*field))?;
            if let Some(found) = value.kind() {
                if found != def.kind {
                    return Err(SyncError::type_mismatch(*field, def.kind, found));
                }
            }
            slot.write().value = value.clone();
        }
        Ok(())
    }

    /// Store a copied value into the slot at `index`, leaving the pristine
    /// stamp in place. Indices come from this container's schema.
    pub(crate) fn store_direct(&self, index: usize, value: Value) {
        self.slots[index].write().value = value;
    }

    /// Dump every readable field: name, value, and last-applied time.
    ///
    /// Each row is read under its own slot lock; rows do not form a
    /// cross-field consistent snapshot.
    pub fn snapshot(&self) -> Vec<FieldSnapshot> {
        self.schema
            .iter()
            .enumerate()
            .filter(|(_, def)| def.is_readable())
            .map(|(index, def)| {
                let slot = self.slots[index].read();
                FieldSnapshot {
                    name: def.name.clone(),
                    value: slot.value.clone(),
                    stamp: slot.stamp,
                }
            })
            .collect()
    }
}

impl fmt::Debug for DataContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataContainer")
            .field("id", &self.id)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl Drop for DataContainer {
    fn drop(&mut self) {
        self.runtime.release(self.id);
    }
}
