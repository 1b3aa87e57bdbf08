use std::sync::Arc;

use crate::lock::{lock_all, LockMode};
use crate::{DataContainer, Schema, SyncError, SyncRuntime, ValueKind};

struct CopySlot {
    source_index: usize,
    replica_index: usize,
    kind: ValueKind,
    name: Arc<str>,
}

/// Build a replica of `source` under a consistent read snapshot.
///
/// Field locks are taken in the source schema's declaration order, the one
/// global order every lock batch over this source uses. The copy, the
/// caller's `init` hook, and the wiring of both binding directions all
/// happen while the snapshot is held, so the replica goes live atomically
/// with respect to writers of the copied fields. Copied values keep the
/// pristine stamp: a replica has applied no updates yet.
pub(crate) fn create_replica<F>(
    runtime: &SyncRuntime,
    schema: Schema,
    source: &Arc<DataContainer>,
    init: F,
) -> Result<Arc<DataContainer>, SyncError>
where
    F: FnOnce(&Arc<DataContainer>) -> Result<(), SyncError>,
{
    let replica = Arc::new(DataContainer::new(schema, runtime.clone()));

    let mut plan = Vec::new();
    let mut locks = Vec::new();
    for (source_index, source_def) in source.schema().iter().enumerate() {
        let Some(replica_index) = replica.schema().index_of(&source_def.name) else {
            continue;
        };
        let Some(replica_def) = replica.schema().get(replica_index) else {
            continue;
        };
        if !replica_def.is_readable() {
            continue;
        }
        locks.push(source.slot(source_index));
        plan.push(CopySlot {
            source_index,
            replica_index,
            kind: replica_def.kind,
            name: replica_def.name.clone(),
        });
    }

    let guard = lock_all(LockMode::Read, &locks, runtime.lock_timeout())?;
    for copy in &plan {
        // The batch above already holds this slot shared; a plain read
        // could queue behind a waiting writer and deadlock against our own
        // guard.
        let slot = source.slot(copy.source_index).read_recursive();
        if !slot.value.fits(copy.kind) {
            tracing::warn!(
                replica = %replica.id(),
                field = %copy.name,
                expected = %copy.kind,
                "skipping copy of a field declared with a conflicting kind"
            );
            continue;
        }
        let value = slot.value.clone();
        drop(slot);
        replica.store_direct(copy.replica_index, value);
    }

    init(&replica)?;

    for def in replica.schema().iter() {
        if def.is_readable() {
            runtime.bind(source, &def.name, &replica, DataContainer::receive);
        }
        if def.is_writable() {
            runtime.bind(&replica, &def.name, source, DataContainer::receive);
        }
    }

    drop(guard);
    Ok(replica)
}
