//! Registration descriptors
//!
//! A [`Descriptor`] is the data the engine accepts from whatever registration API
//! the host builds: identity, lifetime, and an implementation, factory, instance or
//! specializer, plus optional explicit arguments. Validation happens when the
//! descriptor is added to a container.

use crate::pool::PoolConfig;
use crate::{
    Activator, Arguments, DiError, Disposer, GenericDef, Injectable, Instance, Lifetime, ObjectPool,
    Ownership, Resolver, Result, ServiceId, ServiceType, Specializer, disposer, erase,
};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) enum Source {
    Abstract,
    Activator(Activator),
    Open(Arc<dyn Specializer>),
    Instance(Instance),
    /// Construction already failed; surfaced when the descriptor is added.
    Invalid(DiError),
}

/// A service registration.
///
/// # Examples
///
/// ```rust
/// use injection_engine::{Container, Descriptor, Lifetime};
/// use std::sync::Arc;
///
/// trait Clock: Send + Sync {
///     fn now(&self) -> u64;
/// }
///
/// struct Fixed;
/// impl Clock for Fixed {
///     fn now(&self) -> u64 { 42 }
/// }
///
/// let container = Container::new();
/// container
///     .add(Descriptor::factory(Lifetime::Singleton, |_| Ok(Arc::new(Fixed) as Arc<dyn Clock>)))
///     .unwrap();
///
/// let clock = container.injector().get::<dyn Clock>().unwrap();
/// assert_eq!(clock.now(), 42);
/// ```
#[derive(Clone)]
pub struct Descriptor {
    pub(crate) id: ServiceId,
    pub(crate) lifetime: Lifetime,
    pub(crate) source: Source,
    pub(crate) arguments: Option<Arguments>,
    pub(crate) ownership: Ownership,
    pub(crate) disposer: Option<Disposer>,
    pub(crate) pool: PoolConfig,
}

impl Descriptor {
    fn with_source(id: ServiceId, lifetime: Lifetime, source: Source) -> Self {
        Self {
            id,
            lifetime,
            source,
            arguments: None,
            ownership: Ownership::Owned,
            disposer: None,
            pool: PoolConfig::default(),
        }
    }

    fn from_activator(id: ServiceId, lifetime: Lifetime, activator: Result<Activator>) -> Self {
        let source = match activator {
            Ok(activator) => Source::Activator(activator),
            Err(err) => Source::Invalid(err),
        };
        Self::with_source(id, lifetime, source)
    }

    /// Register `T` as itself, built through its declared constructor.
    pub fn of<T: Injectable>(lifetime: Lifetime) -> Self {
        Self::from_activator(ServiceId::of::<T>(), lifetime, Activator::of::<T>())
    }

    /// Register implementation `T` under interface `I`.
    ///
    /// `coerce` is usually `|t| t as Arc<dyn Interface>`.
    pub fn bind<I, T, C>(lifetime: Lifetime, coerce: C) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        T: Injectable,
        C: Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    {
        Self::from_activator(ServiceId::of::<I>(), lifetime, Activator::implementation::<I, T, C>(coerce))
    }

    /// Register a factory function for `I`.
    pub fn factory<I, F>(lifetime: Lifetime, factory: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(&mut Resolver<'_>) -> Result<Arc<I>> + Send + Sync + 'static,
    {
        Self::with_source(ServiceId::of::<I>(), lifetime, Source::Activator(Activator::factory(factory)))
    }

    /// Register a caller-supplied instance.
    pub fn instance<I: ?Sized + Send + Sync + 'static>(value: Arc<I>) -> Self {
        Self::with_source(ServiceId::of::<I>(), Lifetime::Instance, Source::Instance(erase(value)))
    }

    /// Register an erased instance; assignability is checked when added.
    pub fn erased_instance(id: ServiceId, value: Instance) -> Self {
        Self::with_source(id, Lifetime::Instance, Source::Instance(value))
    }

    /// Register an erased activator under `id`.
    pub fn erased(id: ServiceId, lifetime: Lifetime, activator: Activator) -> Self {
        Self::with_source(id, lifetime, Source::Activator(activator))
    }

    /// Register an open generic definition.
    ///
    /// Requests for closed forms of `definition` are specialized on first use.
    pub fn open_generic<S: Specializer>(definition: GenericDef, lifetime: Lifetime, specializer: S) -> Self {
        let id = ServiceId::new(ServiceType::open(definition), None);
        Self::with_source(id, lifetime, Source::Open(Arc::new(specializer)))
    }

    /// Register an abstract placeholder for `I`, to be overridden exactly once.
    pub fn placeholder<I: ?Sized + 'static>(lifetime: Lifetime) -> Self {
        Self::with_source(ServiceId::of::<I>(), lifetime, Source::Abstract)
    }

    /// Register under `name`.
    pub fn named(mut self, name: &str) -> Self {
        self.id = self.id.with_name(name);
        self
    }

    /// Override this entry's dependencies with ready instances.
    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// The caller keeps ownership of a supplied instance; no disposer runs.
    pub fn externally_owned(mut self) -> Self {
        self.ownership = Ownership::External;
        self
    }

    /// Run `dispose` when an owned instance is torn down.
    pub fn dispose_with<I, F>(mut self, dispose: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(&I) + Send + Sync + 'static,
    {
        self.disposer = Some(disposer::<I, F>(dispose));
        self
    }

    /// Idle instances a pooled registration keeps for reuse.
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool.capacity = Some(capacity);
        self
    }

    /// Use a custom pool for a pooled registration.
    pub fn with_pool(mut self, pool: Arc<dyn ObjectPool>) -> Self {
        self.pool.pool = Some(pool);
        self
    }

    #[inline]
    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    #[inline]
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Abstract => "abstract",
            Source::Activator(_) => "activator",
            Source::Open(_) => "specializer",
            Source::Instance(_) => "instance",
            Source::Invalid(_) => "invalid",
        };
        f.debug_struct("Descriptor")
            .field("id", &self.id)
            .field("lifetime", &self.lifetime)
            .field("source", &source)
            .field("ownership", &self.ownership)
            .finish()
    }
}
