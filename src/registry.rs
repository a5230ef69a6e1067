use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::errors::{ProviderError, PskError};
use crate::provider::Provider;

/// Process-unique identifier correlating a native PSK callback invocation
/// with the provider registered for that connection.
///
/// The raw `SSL*` pointer is not a usable lookup key (it can be reallocated
/// at the same address), so an identifier is minted instead and carried in
/// the connection's ex-data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Mints the next identifier. The 64-bit space never wraps in practice,
    /// so identifiers are unique for the process lifetime.
    pub(crate) fn allocate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One registered connection: the provider plus a slot for the last provider
/// failure, captured at the trampoline (where errors cannot cross the C
/// boundary) and replayed by the handshake interceptor.
pub(crate) struct RegistryEntry {
    provider: Provider,
    failure: Mutex<Option<ProviderError>>,
}

impl RegistryEntry {
    pub(crate) fn provider(&self) -> &Provider {
        &self.provider
    }

    pub(crate) fn record_failure(&self, error: ProviderError) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    fn take_failure(&self) -> Option<ProviderError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Concurrent map from connection identifier to registered provider.
///
/// Connections handshake on independent threads, so all operations must be
/// safe without caller-side coordination; dashmap gives per-shard locking so
/// unrelated identifiers do not contend.
pub(crate) struct Registry {
    entries: DashMap<ConnectionId, Arc<RegistryEntry>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Registers `provider` under `id` and returns the guard that owns the
    /// entry. An existing entry is never overwritten.
    pub(crate) fn register(
        &self,
        id: ConnectionId,
        provider: Provider,
    ) -> Result<Registration, PskError> {
        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(PskError::DuplicateRegistration(id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RegistryEntry {
                    provider,
                    failure: Mutex::new(None),
                }));
                debug!(connection = %id, "registered PSK provider");
                Ok(Registration { id })
            }
        }
    }

    /// Looks up the entry for `id`. `None` is a normal outcome: the
    /// connection may have been torn down while the native layer was still
    /// in its handshake.
    pub(crate) fn resolve(&self, id: ConnectionId) -> Option<Arc<RegistryEntry>> {
        // Clone the Arc out so no map shard lock is held while the provider
        // runs.
        self.entries.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes the entry for `id`. Idempotent: a missing entry is a no-op.
    pub(crate) fn unregister(&self, id: ConnectionId) {
        if self.entries.remove(&id).is_some() {
            debug!(connection = %id, "unregistered PSK provider");
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub(crate) fn global() -> &'static Registry {
    static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);
    &REGISTRY
}

/// Number of currently registered PSK providers.
///
/// Every registration is scoped to a handshake, so a steady-state value
/// above the number of in-flight handshakes indicates a leaked
/// [`Registration`].
pub fn active_registrations() -> usize {
    global().len()
}

/// Owns a registry entry for the duration of one handshake.
///
/// Dropping the guard removes the entry, after which the trampolines answer
/// the native layer with the "no key" sentinel for this connection.
#[must_use = "the PSK registration is removed when this guard is dropped"]
pub struct Registration {
    id: ConnectionId,
}

impl Registration {
    /// The identifier minted for this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Pulls the provider error captured during the handshake, if any.
    pub fn take_failure(&self) -> Option<ProviderError> {
        global().resolve(self.id).and_then(|e| e.take_failure())
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        global().unregister(self.id);
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Registration").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ServerPsk;

    fn provider() -> Provider {
        ServerPsk::Key(b"secret".to_vec()).into_provider()
    }

    #[test]
    fn allocator_mints_unique_identifiers() {
        let ids: Vec<_> = (0..100).map(|_| ConnectionId::allocate()).collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn resolve_returns_the_registered_entry() {
        let id = ConnectionId::allocate();
        let registration = global().register(id, provider()).unwrap();
        let first = global().resolve(id).expect("entry must be resolvable");
        let second = global().resolve(id).expect("repeated resolve must work");
        assert!(Arc::ptr_eq(&first, &second));
        drop(registration);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let id = ConnectionId::allocate();
        let registration = global().register(id, provider()).unwrap();
        let err = global().register(id, provider()).unwrap_err();
        assert!(matches!(err, PskError::DuplicateRegistration(dup) if dup == id));
        // The original entry survives the failed attempt.
        assert!(global().resolve(id).is_some());
        drop(registration);
    }

    #[test]
    fn dropping_the_guard_unregisters() {
        let id = ConnectionId::allocate();
        let registration = global().register(id, provider()).unwrap();
        assert!(global().resolve(id).is_some());
        drop(registration);
        assert!(global().resolve(id).is_none());
    }

    #[test]
    fn unregister_is_idempotent() {
        let id = ConnectionId::allocate();
        let registration = global().register(id, provider()).unwrap();
        drop(registration);
        // A second removal (e.g. a double-fired cleanup) is a no-op.
        global().unregister(id);
        assert!(global().resolve(id).is_none());
    }

    #[test]
    fn captured_failures_are_taken_once() {
        let id = ConnectionId::allocate();
        let registration = global().register(id, provider()).unwrap();
        let entry = global().resolve(id).unwrap();
        assert!(registration.take_failure().is_none());
        entry.record_failure("keystore offline".into());
        let failure = registration.take_failure().expect("failure was recorded");
        assert_eq!(failure.to_string(), "keystore offline");
        assert!(registration.take_failure().is_none());
        drop(registration);
    }
}
