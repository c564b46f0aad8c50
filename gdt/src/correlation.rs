//! Correlation map (C11, spec.md §4.7): how a bridge daemon (gRPC,
//! JSON-RPC/WS, HTTP — out of scope here, but the map they rely on is
//! in-scope ambient plumbing) matches an external request to the GDT
//! ServiceMessage reply that eventually answers it.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Whatever the external side needs to resume a suspended caller. Kept
/// opaque and type-erased here (`Arc<dyn Any + Send + Sync>`) since the
/// concrete caller type belongs to whichever bridge daemon owns this
/// entry, not to the GDT core.
pub type CallerRef = Weak<dyn std::any::Any + Send + Sync>;

struct Entry {
    caller: CallerRef,
    user_id: String,
    created_at: Instant,
    persistent: bool,
    data_timeout: Duration,
}

/// `{guid -> (caller_weak_ref, user_id, timestamp, persistent_flag,
/// data_timeout)}` (spec.md §4.7). Non-persistent entries are consumed
/// (removed) by `resolve`; persistent ones survive until explicitly
/// removed or until `sweep` expires them.
#[derive(Default)]
pub struct CorrelationMap {
    entries: HashMap<Uuid, Entry>,
}

impl CorrelationMap {
    pub fn new() -> Self {
        CorrelationMap::default()
    }

    pub fn insert(
        &mut self,
        guid: Uuid,
        caller: CallerRef,
        user_id: impl Into<String>,
        persistent: bool,
        data_timeout: Duration,
    ) {
        self.entries.insert(
            guid,
            Entry {
                caller,
                user_id: user_id.into(),
                created_at: Instant::now(),
                persistent,
                data_timeout,
            },
        );
    }

    /// Looks up `guid`. Non-persistent entries are removed on a
    /// successful lookup (a normal reply consumes them); persistent
    /// entries remain for subsequent replies.
    pub fn resolve(&mut self, guid: &Uuid) -> Option<(CallerRef, String)> {
        let persistent = self.entries.get(guid)?.persistent;
        if persistent {
            let entry = self.entries.get(guid)?;
            Some((entry.caller.clone(), entry.user_id.clone()))
        } else {
            let entry = self.entries.remove(guid)?;
            Some((entry.caller, entry.user_id))
        }
    }

    pub fn remove(&mut self, guid: &Uuid) {
        self.entries.remove(guid);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expires entries older than their own `data_timeout`, returning the
    /// still-live caller refs and user ids so the owner can notify each
    /// with a timeout error (spec.md §4.7). Dead (already-dropped)
    /// callers are dropped silently.
    pub fn sweep(&mut self) -> Vec<(CallerRef, String)> {
        let expired: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|(_, e)| e.created_at.elapsed() >= e.data_timeout)
            .map(|(guid, _)| *guid)
            .collect();
        expired
            .into_iter()
            .filter_map(|guid| {
                let entry = self.entries.remove(&guid)?;
                Some((entry.caller, entry.user_id))
            })
            .collect()
    }
}

#[cfg(test)]
mod correlation_test {
    use super::*;

    struct Caller;

    #[test]
    fn non_persistent_entry_is_consumed_on_resolve() {
        let mut map = CorrelationMap::new();
        let guid = Uuid::new_v4();
        let caller = Arc::new(Caller) as Arc<dyn std::any::Any + Send + Sync>;
        map.insert(guid, Arc::downgrade(&caller), "user-1", false, Duration::from_secs(30));
        assert!(map.resolve(&guid).is_some());
        assert!(map.resolve(&guid).is_none());
    }

    #[test]
    fn persistent_entry_survives_resolve() {
        let mut map = CorrelationMap::new();
        let guid = Uuid::new_v4();
        let caller = Arc::new(Caller) as Arc<dyn std::any::Any + Send + Sync>;
        map.insert(guid, Arc::downgrade(&caller), "user-1", true, Duration::from_secs(30));
        assert!(map.resolve(&guid).is_some());
        assert!(map.resolve(&guid).is_some());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn sweep_expires_stale_entries() {
        let mut map = CorrelationMap::new();
        let guid = Uuid::new_v4();
        let caller = Arc::new(Caller) as Arc<dyn std::any::Any + Send + Sync>;
        map.insert(guid, Arc::downgrade(&caller), "user-1", false, Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        let expired = map.sweep();
        assert_eq!(expired.len(), 1);
        assert!(map.is_empty());
    }
}
