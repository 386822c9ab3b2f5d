//! Frozen lookup registries
//!
//! A [`Registry`] is the immutable-after-build index of a locked container. Each
//! entry gets a stable integer slot at build time; lookups map an identity to its
//! slot and then index an array. Two interchangeable backends implement the
//! identity-to-slot step:
//!
//! - [`Backend::Hashed`]: an `ahash` map, used for small containers.
//! - [`Backend::Compiled`]: a precomputed table, used above the configured
//!   threshold. With the `perfect-hash` feature it is a minimal perfect hash
//!   (`boomphf`); otherwise a sorted array of fixed-seed hashes searched by bisection.
//!
//! Open generic definitions live in a separate index. Closed specializations are
//! cached per closed identity with a lazy-once-per-key guarantee, so concurrent
//! first requests never run the specializer twice for the same key.

use crate::sync::OncePerKey;
use crate::{CancellationToken, Entry, Result, ScopeId, ServiceId};
use ahash::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Which identity-to-slot structure a registry uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Hashed,
    Compiled,
}

// =============================================================================
// Backends
// =============================================================================

enum Lookup {
    Hashed(HashMap<ServiceId, usize, RandomState>),
    Compiled(CompiledLookup),
}

impl Lookup {
    fn slot_of(&self, id: &ServiceId, slots: &[Arc<Entry>]) -> Option<usize> {
        match self {
            Lookup::Hashed(map) => map.get(id).copied(),
            Lookup::Compiled(compiled) => compiled.slot_of(id, slots),
        }
    }
}

#[cfg(not(feature = "perfect-hash"))]
mod compiled {
    use super::*;

    // Fixed seeds: the table is built once and probed with the same hasher.
    const SEEDS: (u64, u64, u64, u64) = (
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    );

    /// Sorted `(hash, slot)` pairs searched by bisection.
    pub(super) struct CompiledLookup {
        hasher: RandomState,
        table: Vec<(u64, usize)>,
    }

    impl CompiledLookup {
        pub(super) fn build(slots: &[Arc<Entry>]) -> Self {
            let hasher = RandomState::with_seeds(SEEDS.0, SEEDS.1, SEEDS.2, SEEDS.3);
            let mut table: Vec<(u64, usize)> = slots
                .iter()
                .enumerate()
                .map(|(slot, entry)| (hasher.hash_one(entry.id()), slot))
                .collect();
            table.sort_unstable();
            Self { hasher, table }
        }

        pub(super) fn slot_of(&self, id: &ServiceId, slots: &[Arc<Entry>]) -> Option<usize> {
            let hash = self.hasher.hash_one(id);
            let start = self.table.partition_point(|(h, _)| *h < hash);
            self.table[start..]
                .iter()
                .take_while(|(h, _)| *h == hash)
                .map(|(_, slot)| *slot)
                .find(|slot| slots[*slot].id() == id)
        }
    }
}

#[cfg(feature = "perfect-hash")]
mod compiled {
    use super::*;
    use boomphf::Mphf;

    const GAMMA: f64 = 1.7;

    /// Minimal perfect hash from identity to slot.
    pub(super) struct CompiledLookup {
        mphf: Mphf<ServiceId>,
        table: Vec<usize>,
    }

    impl CompiledLookup {
        pub(super) fn build(slots: &[Arc<Entry>]) -> Self {
            let keys: Vec<ServiceId> = slots.iter().map(|e| e.id().clone()).collect();
            let mphf = Mphf::new(GAMMA, &keys);
            let mut table = vec![0; keys.len()];
            for (slot, key) in keys.iter().enumerate() {
                table[mphf.hash(key) as usize] = slot;
            }
            Self { mphf, table }
        }

        pub(super) fn slot_of(&self, id: &ServiceId, slots: &[Arc<Entry>]) -> Option<usize> {
            // Unknown keys may hash to any position; confirm the identity.
            let position = self.mphf.try_hash(id)? as usize;
            let slot = *self.table.get(position)?;
            (slots[slot].id() == id).then_some(slot)
        }
    }
}

use compiled::CompiledLookup;

// =============================================================================
// Registry
// =============================================================================

/// Immutable index of a frozen container.
pub struct Registry {
    scope: ScopeId,
    slots: Vec<Arc<Entry>>,
    lookup: Lookup,
    open: HashMap<ServiceId, Arc<Entry>, RandomState>,
    specialized: OncePerKey<ServiceId, Arc<Entry>>,
}

impl Registry {
    /// Index `regular` and `open`, choosing the backend by entry count.
    ///
    /// Checks `token` between entries; a cancelled build returns `Cancelled`.
    pub(crate) fn build(
        scope: ScopeId,
        mut regular: Vec<Arc<Entry>>,
        open: Vec<Arc<Entry>>,
        threshold: usize,
        token: &CancellationToken,
    ) -> Result<Self> {
        // Stable slot order regardless of map iteration order
        regular.sort_by_cached_key(|e| e.id().to_string());

        let mut hashed = HashMap::with_capacity_and_hasher(regular.len(), RandomState::new());
        for (slot, entry) in regular.iter().enumerate() {
            if let Err(err) = token.check() {
                #[cfg(feature = "logging")]
                warn!(
                    target: "injection_engine",
                    scope = %scope,
                    indexed = slot,
                    "Registry build cancelled"
                );
                return Err(err);
            }
            hashed.insert(entry.id().clone(), slot);
        }

        let lookup = if regular.len() > threshold {
            Lookup::Compiled(CompiledLookup::build(&regular))
        } else {
            Lookup::Hashed(hashed)
        };

        let mut open_index = HashMap::with_capacity_and_hasher(open.len(), RandomState::new());
        for entry in open {
            token.check()?;
            open_index.insert(entry.id().clone(), entry);
        }

        let registry = Self {
            scope,
            slots: regular,
            lookup,
            open: open_index,
            specialized: OncePerKey::new(),
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "injection_engine",
            scope = %scope,
            entries = registry.slots.len(),
            open = registry.open.len(),
            backend = ?registry.backend(),
            "Built registry"
        );

        Ok(registry)
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        match self.lookup {
            Lookup::Hashed(_) => Backend::Hashed,
            Lookup::Compiled(_) => Backend::Compiled,
        }
    }

    /// The slot assigned to `id`.
    ///
    /// Slots are stable for the life of the registry. Look one up once and use
    /// [`entry_at`](Self::entry_at) to skip hashing on repeat access.
    #[inline]
    pub fn slot_of(&self, id: &ServiceId) -> Option<usize> {
        self.lookup.slot_of(id, &self.slots)
    }

    #[inline]
    pub fn entry_at(&self, slot: usize) -> Option<&Arc<Entry>> {
        self.slots.get(slot)
    }

    /// Exact lookup among regular entries.
    #[inline]
    pub fn find(&self, id: &ServiceId) -> Option<&Arc<Entry>> {
        self.slot_of(id).and_then(|slot| self.slots.get(slot))
    }

    #[inline]
    pub fn find_open(&self, id: &ServiceId) -> Option<&Arc<Entry>> {
        self.open.get(id)
    }

    /// A specialization already cached under its closed identity.
    #[inline]
    pub fn cached_specialization(&self, id: &ServiceId) -> Option<Arc<Entry>> {
        self.specialized.get(id)
    }

    /// Cached specialization for `id`, running `init` at most once per key.
    pub(crate) fn specialize<F>(&self, id: &ServiceId, init: F) -> Result<Arc<Entry>>
    where
        F: FnOnce() -> Result<Arc<Entry>>,
    {
        self.specialized.get_or_try_init(id, init)
    }

    /// Cached specializations declared by this registry's container.
    pub(crate) fn owned_specializations(&self) -> Vec<Arc<Entry>> {
        self.specialized
            .values()
            .into_iter()
            .filter(|e| e.owner_scope() == self.scope)
            .collect()
    }

    /// Number of regular entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of cached specializations.
    #[inline]
    pub fn specializations(&self) -> usize {
        self.specialized.len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("scope", &self.scope)
            .field("backend", &self.backend())
            .field("entries", &self.slots.len())
            .field("open", &self.open.len())
            .field("specialized", &self.specialized.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Producer, Visibility};
    use crate::{Activator, Container, DiError, Lifetime};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    struct Probe;

    fn entries(container: &Container, count: usize) -> Vec<Arc<Entry>> {
        (0..count)
            .map(|i| {
                let producer = Producer::Activator(Activator::factory(|_| Ok(Arc::new(Probe))));
                Arc::new(Entry::new(
                    ServiceId::named::<Probe>(format!("probe-{i}")),
                    Lifetime::Singleton,
                    container,
                    producer,
                    Visibility::Public,
                    None,
                ))
            })
            .collect()
    }

    fn registry(count: usize, threshold: usize) -> (Container, Registry) {
        let container = Container::new();
        let regular = entries(&container, count);
        let registry =
            Registry::build(container.scope_id(), regular, Vec::new(), threshold, &CancellationToken::new()).unwrap();
        (container, registry)
    }

    #[test]
    fn test_backend_selection() {
        assert_eq!(registry(10, 30).1.backend(), Backend::Hashed);
        assert_eq!(registry(31, 30).1.backend(), Backend::Compiled);
    }

    #[test]
    fn test_backends_agree() {
        let (_small_owner, small) = registry(40, 1000);
        let (_large_owner, large) = registry(40, 0);
        for i in 0..40 {
            let id = ServiceId::named::<Probe>(format!("probe-{i}"));
            let a = small.find(&id).unwrap();
            let b = large.find(&id).unwrap();
            assert_eq!(a.id(), b.id());
            assert_eq!(small.slot_of(&id), large.slot_of(&id));
        }
        let missing = ServiceId::named::<Probe>("missing");
        assert!(small.find(&missing).is_none());
        assert!(large.find(&missing).is_none());
        assert!(large.find(&ServiceId::of::<u8>()).is_none());
    }

    #[test]
    fn test_slots_are_stable_indices() {
        let (_owner, registry) = registry(5, 30);
        let id = ServiceId::named::<Probe>("probe-3");
        let slot = registry.slot_of(&id).unwrap();
        assert_eq!(registry.entry_at(slot).unwrap().id(), &id);
        assert!(registry.entry_at(registry.len()).is_none());
    }

    #[test]
    fn test_cancelled_build() {
        let container = Container::new();
        let token = CancellationToken::new();
        token.cancel();
        let err = Registry::build(container.scope_id(), entries(&container, 3), Vec::new(), 30, &token).unwrap_err();
        assert!(matches!(err, DiError::Cancelled));
    }

    #[test]
    fn test_specialization_runs_once_per_key() {
        static RUNS: AtomicU32 = AtomicU32::new(0);
        let (container, registry) = registry(1, 30);
        let registry = Arc::new(registry);
        let template = Arc::clone(&entries(&container, 1)[0]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let template = Arc::clone(&template);
                thread::spawn(move || {
                    registry
                        .specialize(&ServiceId::of::<u64>(), || {
                            RUNS.fetch_add(1, Ordering::SeqCst);
                            Ok(template)
                        })
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert!(Arc::ptr_eq(&handle.join().unwrap(), &template));
        }
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
        assert_eq!(registry.specializations(), 1);
        assert_eq!(registry.owned_specializations().len(), 1);
    }
}
