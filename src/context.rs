use parking_lot::Mutex;

use crate::ContainerId;

/// Timestamp is a logical clock reading used to order competing updates.
///
/// Timestamps come from a runtime's clock, which starts at 1, so the
/// pristine stamp 0 on a freshly built slot loses to every real update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timestamp(pub u64);

/// UpdateContext is the token threaded through one propagation wave.
///
/// It carries the wave's creation time, the sole tiebreak between competing
/// writes to the same field, and the set of containers the wave has already
/// touched, which is what stops a binding cycle from recursing forever. One
/// context belongs to exactly one external write; it is never reused.
#[derive(Debug)]
pub struct UpdateContext {
    time: Timestamp,
    visited: Mutex<ahash::HashSet<ContainerId>>,
}

impl UpdateContext {
    /// New context for a wave starting at `origin` with creation time `time`.
    ///
    /// The origin counts as already visited: a wave that loops back to the
    /// container that started it stops there.
    pub fn new(time: Timestamp, origin: ContainerId) -> Self {
        let mut visited = ahash::HashSet::default();
        visited.insert(origin);
        UpdateContext {
            time,
            visited: Mutex::new(visited),
        }
    }

    /// The wave's creation time.
    pub fn time(&self) -> Timestamp {
        self.time
    }

    /// Mark `id` as visited by this wave.
    ///
    /// Returns true if it was not visited before. Check and insertion are a
    /// single atomic step, so two hops racing into the same container agree
    /// on which of them arrived first.
    pub fn visit(&self, id: ContainerId) -> bool {
        self.visited.lock().insert(id)
    }
}
