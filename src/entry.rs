//! Entries - stored registrations
//!
//! An [`Entry`] pairs an immutable identity, lifetime and owner with a producer
//! (activator, specializer or supplied value) and a write-once reference slot.
//! Shared lifetimes fill the slot at most once under the entry's own lock.

use crate::container::ContainerInner;
use crate::proxy::{InterceptorFactory, ProxyEngine};
use crate::sync::EntryLock;
use crate::{
    Activator, Arguments, Container, Dependency, DiError, Lifetime, Result, ScopeId, ServiceId,
    RequestChain, ServiceReference, ServiceType, Specializer,
};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// What an entry runs to obtain its instance.
#[derive(Clone)]
pub(crate) enum Producer {
    /// Placeholder awaiting a concrete override; never producible.
    Abstract,
    Activator(Activator),
    /// Open generic definition; specialized per closed type.
    Open(Arc<dyn Specializer>),
    /// Value supplied at registration.
    Supplied,
}

/// Whether normal lookups can see an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    /// Infrastructure services, reachable only through exact internal lookups.
    Hidden,
}

/// A registration stored in a container.
pub struct Entry {
    id: ServiceId,
    lifetime: Lifetime,
    owner: Weak<ContainerInner>,
    owner_scope: ScopeId,
    visibility: Visibility,
    producer: RwLock<Producer>,
    arguments: Option<Arguments>,
    reference: OnceCell<Arc<ServiceReference>>,
    lock: EntryLock,
    disposed: AtomicBool,
}

impl Entry {
    pub(crate) fn new(
        id: ServiceId,
        lifetime: Lifetime,
        owner: &Container,
        producer: Producer,
        visibility: Visibility,
        arguments: Option<Arguments>,
    ) -> Self {
        Self {
            id,
            lifetime,
            owner: owner.downgrade(),
            owner_scope: owner.scope_id(),
            visibility,
            producer: RwLock::new(producer),
            arguments,
            reference: OnceCell::new(),
            lock: EntryLock::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// An Instance entry whose reference is populated up front.
    pub(crate) fn supplied(id: ServiceId, owner: &Container, reference: Arc<ServiceReference>) -> Self {
        let entry = Self::new(id, Lifetime::Instance, owner, Producer::Supplied, Visibility::Public, None);
        let _ = entry.reference.set(reference);
        entry
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    #[inline]
    pub fn service_type(&self) -> &ServiceType {
        self.id.service_type()
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.id.name()
    }

    #[inline]
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// The scope of the container that declared (or adopted) this entry.
    #[inline]
    pub fn owner_scope(&self) -> ScopeId {
        self.owner_scope
    }

    #[inline]
    pub fn is_hidden(&self) -> bool {
        self.visibility == Visibility::Hidden
    }

    #[inline]
    pub fn is_abstract(&self) -> bool {
        matches!(*self.producer.read(), Producer::Abstract)
    }

    /// Whether a resolution can obtain an instance from this entry directly.
    pub fn is_producible(&self) -> bool {
        match *self.producer.read() {
            Producer::Activator(_) => true,
            Producer::Supplied => self.reference.get().is_some(),
            Producer::Abstract | Producer::Open(_) => false,
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(*self.producer.read(), Producer::Open(_))
    }

    /// Whether a shared reference has been built (or supplied).
    #[inline]
    pub fn is_built(&self) -> bool {
        self.reference.get().is_some()
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// The implementation type, when the producer is an activator.
    pub fn implementation(&self) -> Option<ServiceType> {
        match &*self.producer.read() {
            Producer::Activator(activator) => Some(activator.target().clone()),
            _ => None,
        }
    }

    /// Declared dependencies of the producer.
    pub fn dependencies(&self) -> Vec<Dependency> {
        match &*self.producer.read() {
            Producer::Activator(activator) => activator.dependencies().to_vec(),
            _ => Vec::new(),
        }
    }

    /// The cached shared reference.
    #[inline]
    pub fn reference(&self) -> Option<Arc<ServiceReference>> {
        self.reference.get().cloned()
    }

    #[inline]
    pub(crate) fn arguments(&self) -> Option<&Arguments> {
        self.arguments.as_ref()
    }

    pub(crate) fn activator(&self) -> Result<Activator> {
        match &*self.producer.read() {
            Producer::Activator(activator) => Ok(activator.clone()),
            Producer::Abstract => Err(DiError::cannot_instantiate(
                &self.id,
                "abstract placeholder was never overridden",
            )),
            Producer::Open(_) => Err(DiError::cannot_instantiate(
                &self.id,
                "open generic definitions must be closed before resolution",
            )),
            Producer::Supplied => Err(DiError::cannot_instantiate(&self.id, "supplied instance is missing")),
        }
    }

    /// The declaring container.
    pub(crate) fn owner(&self) -> Result<Container> {
        Container::from_weak(&self.owner).ok_or_else(DiError::parent_dropped)
    }

    #[inline]
    pub(crate) fn held_by_current_thread(&self) -> bool {
        self.lock.held_by_current_thread()
    }

    // =========================================================================
    // Derived entries
    // =========================================================================

    /// An unbuilt copy owned by `scope`, used for per-scope lifetimes.
    pub(crate) fn copy_for(&self, scope: &Container) -> Arc<Entry> {
        let producer = self.producer.read().clone();
        Arc::new(Self::new(
            self.id.clone(),
            self.lifetime,
            scope,
            producer,
            self.visibility,
            self.arguments.clone(),
        ))
    }

    /// Close this open generic definition over `closed`, owned by `owner`.
    pub(crate) fn specialize(&self, closed: &ServiceType, owner: &Container) -> Result<Arc<Entry>> {
        let specializer = match &*self.producer.read() {
            Producer::Open(specializer) => Arc::clone(specializer),
            _ => {
                return Err(DiError::cannot_instantiate(&self.id, "entry is not an open generic definition"));
            }
        };
        let activator = specializer.specialize(closed)?;
        if let (Some(produced), Some(expected)) = (activator.produces(), closed.holder()) {
            if produced != expected {
                return Err(DiError::not_assignable(closed, activator.target()));
            }
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "injection_engine",
            definition = %self.id,
            closed = %closed,
            scope = %owner.scope_id(),
            "Specialized open generic definition"
        );

        Ok(Arc::new(Self::new(
            self.id.specialized(closed),
            self.lifetime,
            owner,
            Producer::Activator(activator),
            self.visibility,
            self.arguments.clone(),
        )))
    }

    /// Wrap the activator through `engine`.
    ///
    /// Only unbuilt activator entries whose lifetime supports decoration qualify.
    pub(crate) fn decorate(&self, engine: &dyn ProxyEngine, interceptors: &[InterceptorFactory]) -> Result<()> {
        if !self.lifetime.supports_decoration() {
            return Err(DiError::cannot_instantiate(&self.id, "lifetime does not support decoration"));
        }
        if self.is_built() {
            return Err(DiError::cannot_instantiate(&self.id, "entry was already built"));
        }
        let mut producer = self.producer.write();
        let Producer::Activator(inner) = &*producer else {
            return Err(DiError::cannot_instantiate(&self.id, "only activator entries can be decorated"));
        };
        let wrapped = engine.wrap(self.id.service_type(), inner.clone(), interceptors)?;
        *producer = Producer::Activator(wrapped);
        Ok(())
    }

    // =========================================================================
    // Shared instantiation
    // =========================================================================

    /// Return the cached reference, building it with `build` on first use.
    ///
    /// Double-checked: the unlocked read serves the hot path, the entry lock
    /// serializes first-time builds. A thread already holding the lock skips it.
    pub(crate) fn shared<F>(&self, build: F) -> Result<Arc<ServiceReference>>
    where
        F: FnOnce() -> Result<Arc<ServiceReference>>,
    {
        if let Some(reference) = self.reference.get() {
            return Ok(Arc::clone(reference));
        }

        let _guard = self.lock.acquire();
        if let Some(reference) = self.reference.get() {
            #[cfg(feature = "logging")]
            trace!(
                target: "injection_engine",
                service = %self.id,
                "Shared entry built by another thread"
            );
            return Ok(Arc::clone(reference));
        }
        if self.is_disposed() {
            return Err(DiError::disposed(self.owner_scope));
        }

        let reference = build()?;
        match self.reference.set(Arc::clone(&reference)) {
            Ok(()) => Ok(reference),
            Err(_) => {
                reference.release();
                Err(DiError::ValueAlreadySet {
                    service: self.id.clone(),
                    chain: RequestChain::default(),
                })
            }
        }
    }

    /// Release the cached reference. Runs at most once.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(reference) = self.reference.get() {
            #[cfg(feature = "logging")]
            trace!(
                target: "injection_engine",
                service = %self.id,
                lifetime = %self.lifetime,
                scope = %self.owner_scope,
                "Disposing entry"
            );
            reference.release();
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("lifetime", &self.lifetime)
            .field("owner_scope", &self.owner_scope)
            .field("visibility", &self.visibility)
            .field("built", &self.is_built())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Descriptor, FnProxyEngine, GenericDef, Ownership, erase};
    use std::sync::atomic::AtomicU32;
    use std::thread;

    struct Widget(u32);
    struct Family;

    fn widget_entry(container: &Container, lifetime: Lifetime) -> Arc<Entry> {
        let activator = Activator::factory(|_| Ok(Arc::new(Widget(1))));
        Arc::new(Entry::new(
            ServiceId::of::<Widget>(),
            lifetime,
            container,
            Producer::Activator(activator),
            Visibility::Public,
            None,
        ))
    }

    fn reference_for(entry: &Entry) -> Arc<ServiceReference> {
        let reference = ServiceReference::new(
            entry.id().clone(),
            entry.lifetime(),
            entry.owner_scope(),
            Ownership::Owned,
            None,
        );
        reference.set_value(erase(Arc::new(Widget(7)))).unwrap();
        reference
    }

    #[test]
    fn test_producibility() {
        let container = Container::new();
        let entry = widget_entry(&container, Lifetime::Singleton);
        assert!(entry.is_producible());
        assert!(!entry.is_abstract());
        assert_eq!(entry.implementation(), Some(ServiceType::of::<Widget>()));

        let placeholder = Entry::new(
            ServiceId::of::<Widget>(),
            Lifetime::Singleton,
            &container,
            Producer::Abstract,
            Visibility::Public,
            None,
        );
        assert!(placeholder.is_abstract());
        assert!(!placeholder.is_producible());
        assert!(matches!(placeholder.activator(), Err(DiError::CannotInstantiate { .. })));
    }

    #[test]
    fn test_shared_builds_once_across_threads() {
        static BUILDS: AtomicU32 = AtomicU32::new(0);
        let container = Container::new();
        let entry = widget_entry(&container, Lifetime::Singleton);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let entry = Arc::clone(&entry);
                thread::spawn(move || {
                    entry
                        .shared(|| {
                            BUILDS.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(5));
                            Ok(reference_for(&entry))
                        })
                        .unwrap()
                })
            })
            .collect();

        let refs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        assert!(refs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(entry.is_built());
    }

    #[test]
    fn test_shared_reentry_does_not_block() {
        let container = Container::new();
        let entry = widget_entry(&container, Lifetime::Singleton);
        let err = entry
            .shared(|| {
                assert!(entry.held_by_current_thread());
                entry.shared(|| Err(DiError::failed("inner")))
            })
            .unwrap_err();
        assert!(matches!(err, DiError::CreationFailed { .. }));
        assert!(!entry.is_built());
    }

    #[test]
    fn test_dispose_releases_once() {
        let container = Container::new();
        let entry = widget_entry(&container, Lifetime::Singleton);
        let reference = entry.shared(|| Ok(reference_for(&entry))).unwrap();
        entry.dispose();
        entry.dispose();
        assert!(reference.is_released());
        assert!(entry.is_disposed());
    }

    #[test]
    fn test_copy_for_is_unbuilt_and_rehomed() {
        let root = Container::new();
        let child = root.child();
        let entry = widget_entry(&root, Lifetime::Scoped);
        entry.shared(|| Ok(reference_for(&entry))).unwrap();

        let copy = entry.copy_for(&child);
        assert_eq!(copy.id(), entry.id());
        assert_eq!(copy.owner_scope(), child.scope_id());
        assert!(!copy.is_built());
    }

    #[test]
    fn test_specialize_requires_open_producer() {
        let container = Container::new();
        let entry = widget_entry(&container, Lifetime::Singleton);
        let closed = ServiceType::of::<u32>();
        assert!(matches!(entry.specialize(&closed, &container), Err(DiError::CannotInstantiate { .. })));

        let open = Entry::new(
            ServiceId::new(ServiceType::open(GenericDef::of::<Family>(1)), None),
            Lifetime::Singleton,
            &container,
            Producer::Open(Arc::new(|_: &ServiceType| -> Result<Activator> {
                Ok(Activator::factory(|_| Ok(Arc::new(Widget(3)))))
            })),
            Visibility::Public,
            None,
        );
        // Activator produces Widget, not u32
        assert!(matches!(open.specialize(&closed, &container), Err(DiError::NotAssignable { .. })));
    }

    #[test]
    fn test_decorate_rejects_built_and_instance_entries() {
        let container = Container::new();
        let engine = FnProxyEngine::new(|_, inner, _| Ok(inner));

        let entry = widget_entry(&container, Lifetime::Singleton);
        assert!(entry.decorate(&engine, &[]).is_ok());
        entry.shared(|| Ok(reference_for(&entry))).unwrap();
        assert!(entry.decorate(&engine, &[]).is_err());

        container.add(Descriptor::instance(Arc::new(Widget(2))).named("fixed")).unwrap();
        let fixed = container
            .get(&ServiceId::named::<Widget>("fixed"), crate::LookupMode::EXACT)
            .unwrap()
            .unwrap();
        assert!(fixed.decorate(&engine, &[]).is_err());
    }
}
