//! Service references
//!
//! A [`ServiceReference`] binds one built instance to the references of the
//! dependencies that were resolved to build it. References are explicitly counted:
//! the entry slot, a scope's transient tracker and every dependent each hold one
//! count. When the count reaches zero the instance is disposed (unless externally
//! owned) and its dependencies are released in the order they were attached.

use crate::{DiError, Disposer, Instance, Lifetime, RequestChain, Result, ScopeId, ServiceId, downcast};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[cfg(feature = "logging")]
use tracing::trace;

/// Who tears down the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ownership {
    /// The engine runs the disposer when the last count is released.
    #[default]
    Owned,
    /// The caller keeps ownership; no disposer runs.
    External,
}

/// Runs instead of the disposer, e.g. to return an instance to its pool.
pub(crate) type ReleaseHook = Box<dyn FnOnce(&Instance) + Send>;

/// Reference-counted handle to a built instance and its resolved dependencies.
pub struct ServiceReference {
    id: ServiceId,
    lifetime: Lifetime,
    scope: ScopeId,
    ownership: Ownership,
    value: OnceCell<Instance>,
    dependencies: Mutex<Vec<Arc<ServiceReference>>>,
    count: AtomicUsize,
    disposer: Option<Disposer>,
    release_hook: Mutex<Option<ReleaseHook>>,
    released: AtomicBool,
}

impl ServiceReference {
    /// An empty reference holding one count.
    pub(crate) fn new(
        id: ServiceId,
        lifetime: Lifetime,
        scope: ScopeId,
        ownership: Ownership,
        disposer: Option<Disposer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            lifetime,
            scope,
            ownership,
            value: OnceCell::new(),
            dependencies: Mutex::new(Vec::new()),
            count: AtomicUsize::new(1),
            disposer,
            release_hook: Mutex::new(None),
            released: AtomicBool::new(false),
        })
    }

    /// A reference whose value is supplied up front.
    pub(crate) fn with_value(
        id: ServiceId,
        scope: ScopeId,
        ownership: Ownership,
        disposer: Option<Disposer>,
        value: Instance,
    ) -> Arc<Self> {
        let reference = Self::new(id, Lifetime::Instance, scope, ownership, disposer);
        // A fresh cell cannot already hold a value.
        let _ = reference.value.set(value);
        reference
    }

    #[inline]
    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    #[inline]
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// The scope that built this reference.
    #[inline]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    #[inline]
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// The built instance, once set.
    #[inline]
    pub fn value(&self) -> Option<&Instance> {
        self.value.get()
    }

    /// The instance as `Arc<T>`.
    #[inline]
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.value.get().and_then(downcast::<T>)
    }

    /// Current count of holders.
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Identities of the attached dependencies, in attachment order.
    pub fn dependencies(&self) -> Vec<ServiceId> {
        self.dependencies.lock().iter().map(|d| d.id.clone()).collect()
    }

    /// Write the value. A reference value is write-once.
    pub(crate) fn set_value(&self, value: Instance) -> Result<()> {
        self.value.set(value).map_err(|_| DiError::ValueAlreadySet {
            service: self.id.clone(),
            chain: RequestChain::default(),
        })
    }

    pub(crate) fn set_release_hook(&self, hook: ReleaseHook) {
        *self.release_hook.lock() = Some(hook);
    }

    #[inline]
    pub(crate) fn acquire(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Attach `dependency`, taking one count on it.
    pub(crate) fn add_dependency(&self, dependency: Arc<ServiceReference>) {
        dependency.acquire();
        self.dependencies.lock().push(dependency);
    }

    /// Attach `dependency`, taking over the count its creator holds.
    pub(crate) fn adopt_dependency(&self, dependency: Arc<ServiceReference>) {
        self.dependencies.lock().push(dependency);
    }

    /// Give up one count; tears down every reference that reaches zero.
    ///
    /// Teardown walks an explicit work list instead of recursing, and each
    /// reference is torn down at most once.
    pub(crate) fn release(self: &Arc<Self>) {
        let mut pending = vec![Arc::clone(self)];
        while let Some(reference) = pending.pop() {
            if !reference.decrement() || reference.released.swap(true, Ordering::AcqRel) {
                continue;
            }
            reference.teardown();
            let dependencies = std::mem::take(&mut *reference.dependencies.lock());
            // Reversed so that popping visits them in attachment order.
            pending.extend(dependencies.into_iter().rev());
        }
    }

    /// Returns true when this call took the count to zero.
    fn decrement(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            == Ok(1)
    }

    fn teardown(&self) {
        let Some(value) = self.value.get() else {
            return;
        };
        #[cfg(feature = "logging")]
        trace!(
            target: "injection_engine",
            service = %self.id,
            scope = %self.scope,
            "Releasing service reference"
        );
        let hook = self.release_hook.lock().take();
        if let Some(hook) = hook {
            hook(value);
            return;
        }
        if self.ownership == Ownership::Owned {
            if let Some(disposer) = &self.disposer {
                disposer(value);
            }
        }
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.id)
            .field("lifetime", &self.lifetime)
            .field("scope", &self.scope)
            .field("count", &self.ref_count())
            .field("built", &self.value.get().is_some())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{disposer, erase};

    struct A;
    struct B;
    struct C;

    fn tracked(
        id: ServiceId,
        log: &Arc<Mutex<Vec<String>>>,
        label: &'static str,
    ) -> Arc<ServiceReference> {
        let log = Arc::clone(log);
        let reference = ServiceReference::new(
            id,
            Lifetime::Transient,
            ScopeId::next(),
            Ownership::Owned,
            Some(disposer::<u32, _>(move |_| log.lock().push(label.to_string()))),
        );
        reference.set_value(erase(Arc::new(0u32))).unwrap();
        reference
    }

    #[test]
    fn test_value_is_write_once() {
        let reference = ServiceReference::new(
            ServiceId::of::<A>(),
            Lifetime::Singleton,
            ScopeId::next(),
            Ownership::Owned,
            None,
        );
        reference.set_value(erase(Arc::new(1u32))).unwrap();
        let err = reference.set_value(erase(Arc::new(2u32))).unwrap_err();
        assert!(matches!(err, DiError::ValueAlreadySet { .. }));
        assert_eq!(*reference.get::<u32>().unwrap(), 1);
    }

    #[test]
    fn test_release_cascades_in_attachment_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = tracked(ServiceId::of::<A>(), &log, "A");
        let b = tracked(ServiceId::of::<B>(), &log, "B");
        let c = tracked(ServiceId::of::<C>(), &log, "C");

        a.add_dependency(Arc::clone(&b));
        a.add_dependency(Arc::clone(&c));
        assert_eq!(a.dependencies(), vec![ServiceId::of::<B>(), ServiceId::of::<C>()]);

        // Drop the creators' own counts on B and C
        b.release();
        c.release();
        assert!(log.lock().is_empty());

        a.release();
        assert_eq!(*log.lock(), vec!["A", "B", "C"]);
        assert!(a.is_released() && b.is_released() && c.is_released());
    }

    #[test]
    fn test_shared_dependency_disposed_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = tracked(ServiceId::of::<A>(), &log, "first");
        let second = tracked(ServiceId::of::<B>(), &log, "second");
        let shared = tracked(ServiceId::of::<C>(), &log, "shared");

        first.add_dependency(Arc::clone(&shared));
        second.add_dependency(Arc::clone(&shared));
        shared.release();

        first.release();
        assert_eq!(*log.lock(), vec!["first"]);
        second.release();
        assert_eq!(*log.lock(), vec!["first", "second", "shared"]);

        // Extra releases are ignored
        shared.release();
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn test_external_ownership_skips_disposer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let reference = ServiceReference::with_value(
            ServiceId::of::<A>(),
            ScopeId::next(),
            Ownership::External,
            Some(disposer::<u32, _>(move |_| sink.lock().push("disposed"))),
            erase(Arc::new(5u32)),
        );
        reference.release();
        assert!(reference.is_released());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_release_hook_replaces_disposer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reference = tracked(ServiceId::of::<A>(), &log, "disposed");
        let sink = Arc::clone(&log);
        reference.set_release_hook(Box::new(move |_| sink.lock().push("returned".to_string())));
        reference.release();
        assert_eq!(*log.lock(), vec!["returned"]);
    }
}
