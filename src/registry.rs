use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use papaya::{Compute, HashMap, Operation};

use crate::{ContainerId, DataContainer, UpdateContext, Value, ValueComparator};

/// FieldChangeFn is the delivery function of one binding, invoked with the
/// receiving container, the field name, the old and new values, and the
/// wave's update context.
///
/// A plain function pointer: a registration cannot capture the receiving
/// container and keep it alive. Forward to [`DataContainer::receive`] for
/// the standard synchronization behavior.
pub type FieldChangeFn = fn(&DataContainer, &str, &Value, &Value, &UpdateContext);

/// BindingToken names one registration for targeted removal.
///
/// Delivery functions are plain function pointers, so two registrations of
/// the same function are indistinguishable by value; the token is what
/// tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingToken(u64);

/// One registration: the token that names it, a non-owning handle to the
/// receiving container, and the delivery function invoked on change.
#[derive(Clone)]
struct BindingEntry {
    token: BindingToken,
    receiver: Weak<DataContainer>,
    deliver: FieldChangeFn,
}

/// CallbackList is an immutable snapshot list of registrations; every
/// mutation clones the backing vector and swaps in a new `Arc`.
///
/// Fan-out iterates whatever snapshot it captured, so a bind or unbind
/// racing a delivery never makes it skip a live entry or invoke one twice.
#[derive(Clone, Default)]
struct CallbackList(Arc<Vec<BindingEntry>>);

impl CallbackList {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn iter(&self) -> impl Iterator<Item = &BindingEntry> + '_ {
        self.0.iter()
    }

    #[must_use]
    fn pushed(&self, entry: BindingEntry) -> Self {
        let mut entries = Vec::clone(&self.0);
        entries.push(entry);
        CallbackList(Arc::new(entries))
    }

    #[must_use]
    fn without(&self, token: BindingToken) -> Self {
        self.retained(|entry| entry.token != token)
    }

    #[must_use]
    fn without_any(&self, tokens: &[BindingToken]) -> Self {
        self.retained(|entry| !tokens.contains(&entry.token))
    }

    #[must_use]
    fn retained(&self, keep: impl Fn(&BindingEntry) -> bool) -> Self {
        CallbackList(Arc::new(
            self.0.iter().filter(|entry| keep(entry)).cloned().collect(),
        ))
    }
}

/// Everything registered against one source container: a callback list per
/// field plus the wildcard list delivered for every field.
#[derive(Clone, Default)]
struct SourceBindings {
    fields: Arc<Vec<(Arc<str>, CallbackList)>>,
    wildcard: CallbackList,
}

impl SourceBindings {
    fn field_list(&self, field: &str) -> Option<&CallbackList> {
        self.fields
            .iter()
            .find(|(name, _)| &**name == field)
            .map(|(_, list)| list)
    }

    fn wildcard(&self) -> &CallbackList {
        &self.wildcard
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.wildcard.is_empty()
    }

    #[must_use]
    fn with_field_entry(&self, field: &str, entry: BindingEntry) -> Self {
        let mut fields = Vec::clone(&self.fields);
        match fields.iter_mut().find(|(name, _)| &**name == field) {
            Some((_, list)) => *list = list.pushed(entry),
            None => fields.push((Arc::from(field), CallbackList::default().pushed(entry))),
        }
        SourceBindings {
            fields: Arc::new(fields),
            wildcard: self.wildcard.clone(),
        }
    }

    #[must_use]
    fn with_wildcard_entry(&self, entry: BindingEntry) -> Self {
        SourceBindings {
            fields: self.fields.clone(),
            wildcard: self.wildcard.pushed(entry),
        }
    }

    /// Replace a field's list, dropping the pair entirely when the new list
    /// is empty.
    #[must_use]
    fn with_field_list(&self, field: &str, list: CallbackList) -> Self {
        let mut fields = Vec::clone(&self.fields);
        if let Some(position) = fields.iter().position(|(name, _)| &**name == field) {
            if list.is_empty() {
                fields.remove(position);
            } else {
                fields[position].1 = list;
            }
        } else if !list.is_empty() {
            fields.push((Arc::from(field), list));
        }
        SourceBindings {
            fields: Arc::new(fields),
            wildcard: self.wildcard.clone(),
        }
    }

    #[must_use]
    fn with_wildcard_list(&self, list: CallbackList) -> Self {
        SourceBindings {
            fields: self.fields.clone(),
            wildcard: list,
        }
    }

    #[must_use]
    fn without_field(&self, field: &str) -> Self {
        self.with_field_list(field, CallbackList::default())
    }

    /// Drop the one registration named by a reverse index link.
    #[must_use]
    fn without_token(&self, field: Option<&str>, token: BindingToken) -> Self {
        match field {
            Some(field) => match self.field_list(field) {
                Some(list) => self.with_field_list(field, list.without(token)),
                None => self.clone(),
            },
            None => self.with_wildcard_list(self.wildcard.without(token)),
        }
    }

    /// Drop every registration that expired during one fan-out pass, from
    /// the notified field's list and the wildcard list alike.
    #[must_use]
    fn scrubbed(&self, field: &str, tokens: &[BindingToken]) -> Self {
        let scrubbed = match self.field_list(field) {
            Some(list) => self.with_field_list(field, list.without_any(tokens)),
            None => self.clone(),
        };
        let wildcard = scrubbed.wildcard.without_any(tokens);
        scrubbed.with_wildcard_list(wildcard)
    }
}

/// Link is one row of the reverse index: where a receiver is registered.
/// `field` is `None` for a wildcard registration.
#[derive(Clone)]
struct Link {
    source: ContainerId,
    field: Option<Arc<str>>,
    token: BindingToken,
}

/// ReceiverLinks is the immutable reverse index row set of one receiver.
///
/// Rows can go stale after a source-side bulk removal; every consumer
/// tolerates links whose target is already gone.
#[derive(Clone, Default)]
struct ReceiverLinks(Arc<Vec<Link>>);

impl ReceiverLinks {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &Link> + '_ {
        self.0.iter()
    }

    #[must_use]
    fn pushed(&self, link: Link) -> Self {
        let mut links = Vec::clone(&self.0);
        links.push(link);
        ReceiverLinks(Arc::new(links))
    }

    #[must_use]
    fn retained(&self, keep: impl Fn(&Link) -> bool) -> Self {
        ReceiverLinks(Arc::new(
            self.0.iter().filter(|link| keep(link)).cloned().collect(),
        ))
    }
}

/// BindingRegistry routes field changes from source containers to every
/// registration interested in them.
///
/// Two lock-free maps: the transmitter table keyed by source identity, and
/// a reverse index keyed by receiver identity so a receiver can be detached
/// in time proportional to its own bindings. All values are copy-on-write;
/// map updates go through atomic compute operations.
pub(crate) struct BindingRegistry {
    transmitters: HashMap<ContainerId, SourceBindings, ahash::RandomState>,
    receivers: HashMap<ContainerId, ReceiverLinks, ahash::RandomState>,
    comparator: ValueComparator,
    next_token: AtomicU64,
}

impl BindingRegistry {
    pub(crate) fn new(comparator: ValueComparator) -> Self {
        BindingRegistry {
            transmitters: HashMap::with_hasher(ahash::RandomState::new()),
            receivers: HashMap::with_hasher(ahash::RandomState::new()),
            comparator,
            next_token: AtomicU64::new(1),
        }
    }

    pub(crate) fn bind(
        &self,
        source: ContainerId,
        field: &str,
        receiver: &Arc<DataContainer>,
        deliver: FieldChangeFn,
    ) -> BindingToken {
        self.register(source, Some(field), receiver, deliver)
    }

    pub(crate) fn bind_any(
        &self,
        source: ContainerId,
        receiver: &Arc<DataContainer>,
        deliver: FieldChangeFn,
    ) -> BindingToken {
        self.register(source, None, receiver, deliver)
    }

    fn register(
        &self,
        source: ContainerId,
        field: Option<&str>,
        receiver: &Arc<DataContainer>,
        deliver: FieldChangeFn,
    ) -> BindingToken {
        let token = BindingToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let entry = BindingEntry {
            token,
            receiver: Arc::downgrade(receiver),
            deliver,
        };
        {
            let transmitters = self.transmitters.pin();
            transmitters.compute(source, |existing| -> Operation<SourceBindings, ()> {
                let bindings = match existing {
                    Some((_, bindings)) => bindings.clone(),
                    None => SourceBindings::default(),
                };
                let bindings = match field {
                    Some(field) => bindings.with_field_entry(field, entry.clone()),
                    None => bindings.with_wildcard_entry(entry.clone()),
                };
                Operation::Insert(bindings)
            });
        }
        let link = Link {
            source,
            field: field.map(Arc::from),
            token,
        };
        let receivers = self.receivers.pin();
        receivers.compute(receiver.id(), |existing| -> Operation<ReceiverLinks, ()> {
            let links = match existing {
                Some((_, links)) => links.clone(),
                None => ReceiverLinks::default(),
            };
            Operation::Insert(links.pushed(link.clone()))
        });
        token
    }

    /// Fan a field change out to every interested registration.
    ///
    /// Suppressed entirely when the old and new values compare equal under
    /// the runtime's comparator. Field-specific registrations fire first,
    /// in registration order, then wildcard registrations. Both lists are
    /// captured as snapshots before the first delivery, and no map guard is
    /// held while delivery functions run, so a delivery that re-enters the
    /// registry cannot deadlock it. Registrations whose receiver is gone
    /// are skipped and removed in the same pass.
    pub(crate) fn notify(
        &self,
        source: ContainerId,
        field: &str,
        old: &Value,
        new: &Value,
        ctx: &UpdateContext,
    ) {
        if (self.comparator)(old, new) {
            return;
        }
        let (field_list, wildcard) = {
            let transmitters = self.transmitters.pin();
            let Some(bindings) = transmitters.get(&source) else {
                return;
            };
            (bindings.field_list(field).cloned(), bindings.wildcard().clone())
        };
        let mut expired = Vec::new();
        if let Some(list) = &field_list {
            Self::deliver(list, field, old, new, ctx, &mut expired);
        }
        Self::deliver(&wildcard, field, old, new, ctx, &mut expired);
        if !expired.is_empty() {
            self.sweep(source, field, &expired);
        }
    }

    fn deliver(
        list: &CallbackList,
        field: &str,
        old: &Value,
        new: &Value,
        ctx: &UpdateContext,
        expired: &mut Vec<BindingToken>,
    ) {
        for entry in list.iter() {
            match entry.receiver.upgrade() {
                Some(receiver) => (entry.deliver)(&receiver, field, old, new, ctx),
                None => expired.push(entry.token),
            }
        }
    }

    /// Remove registrations found expired during fan-out, pruning entries
    /// that end up empty.
    fn sweep(&self, source: ContainerId, field: &str, tokens: &[BindingToken]) {
        let transmitters = self.transmitters.pin();
        transmitters.compute(source, |existing| {
            let Some((_, bindings)) = existing else {
                return Operation::Abort(());
            };
            let bindings = bindings.scrubbed(field, tokens);
            if bindings.is_empty() {
                Operation::Remove
            } else {
                Operation::Insert(bindings)
            }
        });
    }

    /// Remove one field-specific registration. Returns true if it existed.
    pub(crate) fn unbind(&self, source: ContainerId, field: &str, token: BindingToken) -> bool {
        let transmitters = self.transmitters.pin();
        let result = transmitters.compute(source, |existing| {
            let Some((_, bindings)) = existing else {
                return Operation::Abort(());
            };
            let Some(list) = bindings.field_list(field) else {
                return Operation::Abort(());
            };
            let kept = list.without(token);
            if kept.len() == list.len() {
                return Operation::Abort(());
            }
            let bindings = bindings.with_field_list(field, kept);
            if bindings.is_empty() {
                Operation::Remove
            } else {
                Operation::Insert(bindings)
            }
        });
        !matches!(result, Compute::Aborted(_))
    }

    /// Remove one wildcard registration. Returns true if it existed.
    pub(crate) fn unbind_any(&self, source: ContainerId, token: BindingToken) -> bool {
        let transmitters = self.transmitters.pin();
        let result = transmitters.compute(source, |existing| {
            let Some((_, bindings)) = existing else {
                return Operation::Abort(());
            };
            let kept = bindings.wildcard().without(token);
            if kept.len() == bindings.wildcard().len() {
                return Operation::Abort(());
            }
            let bindings = bindings.with_wildcard_list(kept);
            if bindings.is_empty() {
                Operation::Remove
            } else {
                Operation::Insert(bindings)
            }
        });
        !matches!(result, Compute::Aborted(_))
    }

    /// Detach an identity from one field on both sides: its own transmitter
    /// list for the field, and its receiver-side registrations for that
    /// field on every source the reverse index knows about.
    pub(crate) fn unbind_field(&self, id: ContainerId, field: &str) {
        {
            let transmitters = self.transmitters.pin();
            transmitters.compute(id, |existing| {
                let Some((_, bindings)) = existing else {
                    return Operation::Abort(());
                };
                let bindings = bindings.without_field(field);
                if bindings.is_empty() {
                    Operation::Remove
                } else {
                    Operation::Insert(bindings)
                }
            });
        }
        let Some(links) = self.receiver_links(id) else {
            return;
        };
        for link in links.iter().filter(|link| link.field.as_deref() == Some(field)) {
            self.remove_remote_entry(link);
        }
        let receivers = self.receivers.pin();
        receivers.compute(id, |existing| {
            let Some((_, links)) = existing else {
                return Operation::Abort(());
            };
            let kept = links.retained(|link| link.field.as_deref() != Some(field));
            if kept.is_empty() {
                Operation::Remove
            } else {
                Operation::Insert(kept)
            }
        });
    }

    /// Detach an identity completely, as a transmitter and as a receiver.
    pub(crate) fn unbind_all(&self, id: ContainerId) {
        self.remove_transmitter(id);
        self.remove_receiver(id);
    }

    /// Drop an identity's transmitter table entry. Reverse index rows on
    /// other receivers that still point here go stale and are tolerated.
    pub(crate) fn remove_transmitter(&self, id: ContainerId) -> bool {
        self.transmitters.pin().remove(&id).is_some()
    }

    /// Drop an identity's receiver-side registrations everywhere the
    /// reverse index points, then its reverse index entry.
    pub(crate) fn remove_receiver(&self, id: ContainerId) -> bool {
        let Some(links) = self.receiver_links(id) else {
            return false;
        };
        for link in links.iter() {
            self.remove_remote_entry(link);
        }
        self.receivers.pin().remove(&id).is_some()
    }

    fn receiver_links(&self, id: ContainerId) -> Option<ReceiverLinks> {
        self.receivers.pin().get(&id).cloned()
    }

    /// Drop one registration from the transmitter table, targeted by a
    /// reverse index link. Tolerates sources that are already gone.
    fn remove_remote_entry(&self, link: &Link) {
        let transmitters = self.transmitters.pin();
        transmitters.compute(link.source, |existing| {
            let Some((_, bindings)) = existing else {
                return Operation::Abort(());
            };
            let bindings = bindings.without_token(link.field.as_deref(), link.token);
            if bindings.is_empty() {
                Operation::Remove
            } else {
                Operation::Insert(bindings)
            }
        });
    }

    /// The number of identities with at least one registration against them.
    pub(crate) fn transmitter_count(&self) -> usize {
        self.transmitters.pin().len()
    }

    /// The number of identities registered as a receiver somewhere.
    pub(crate) fn receiver_count(&self) -> usize {
        self.receivers.pin().len()
    }
}
