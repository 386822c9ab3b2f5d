//! Activators - type-erased producers for entries
//!
//! An [`Activator`] is what an entry runs to build an instance: an implementation
//! name, the declared dependency list, a build function and an optional disposer.
//! Instances are stored as [`Instance`], an `Arc<dyn Any>` holding an `Arc<I>` of
//! the interface `I`, so trait-object interfaces survive type erasure.

use crate::provider::select_constructor;
use crate::{Dependency, Injectable, Resolver, Result, ServiceType};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// A built service: an `Arc<I>` behind `dyn Any`.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Called once when an owned instance is torn down.
pub type Disposer = Arc<dyn Fn(&Instance) + Send + Sync>;

type BuildFn = Arc<dyn Fn(&mut Resolver<'_>) -> Result<Instance> + Send + Sync>;

/// Erase an `Arc<I>` into an [`Instance`].
#[inline]
pub fn erase<I: ?Sized + Send + Sync + 'static>(value: Arc<I>) -> Instance {
    Arc::new(value)
}

/// Recover the `Arc<I>` stored in an [`Instance`].
#[inline]
pub fn downcast<I: ?Sized + Send + Sync + 'static>(instance: &Instance) -> Option<Arc<I>> {
    instance.downcast_ref::<Arc<I>>().cloned()
}

/// Wrap a typed disposal callback into a [`Disposer`].
pub fn disposer<I, F>(dispose: F) -> Disposer
where
    I: ?Sized + Send + Sync + 'static,
    F: Fn(&I) + Send + Sync + 'static,
{
    Arc::new(move |instance: &Instance| {
        if let Some(value) = downcast::<I>(instance) {
            dispose(&value);
        }
    })
}

// =============================================================================
// Activator
// =============================================================================

/// Builds instances for one entry.
#[derive(Clone)]
pub struct Activator {
    target: ServiceType,
    produces: Option<TypeId>,
    dependencies: Arc<[Dependency]>,
    build: BuildFn,
    disposer: Option<Disposer>,
}

impl Activator {
    /// An erased activator. The produced instance is checked against the entry's
    /// interface when it is built.
    pub fn new<F>(target: ServiceType, dependencies: Vec<Dependency>, build: F) -> Self
    where
        F: Fn(&mut Resolver<'_>) -> Result<Instance> + Send + Sync + 'static,
    {
        Self {
            target,
            produces: None,
            dependencies: dependencies.into(),
            build: Arc::new(build),
            disposer: None,
        }
    }

    /// Construct `T` through its selected constructor and expose it as itself.
    #[inline]
    pub fn of<T: Injectable>() -> Result<Self> {
        Self::implementation::<T, T, _>(|value| value)
    }

    /// Construct `T` through its selected constructor and expose it as `I`.
    ///
    /// Fails with `MultipleConstructors` unless `T` declares exactly one
    /// constructor or exactly one preferred constructor.
    pub fn implementation<I, T, C>(coerce: C) -> Result<Self>
    where
        I: ?Sized + Send + Sync + 'static,
        T: Injectable,
        C: Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    {
        let constructor = select_constructor(T::constructors())?;
        Ok(Self {
            target: ServiceType::of::<T>(),
            produces: Some(TypeId::of::<Arc<I>>()),
            dependencies: constructor.dependencies().into(),
            build: Arc::new(move |resolver| {
                let value = constructor.construct(resolver)?;
                Ok(erase(coerce(Arc::new(value))))
            }),
            disposer: None,
        })
    }

    /// A factory function producing `I` directly.
    pub fn factory<I, F>(factory: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(&mut Resolver<'_>) -> Result<Arc<I>> + Send + Sync + 'static,
    {
        Self {
            target: ServiceType::of::<I>(),
            produces: Some(TypeId::of::<Arc<I>>()),
            dependencies: Arc::from(Vec::new()),
            build: Arc::new(move |resolver| factory(resolver).map(erase)),
            disposer: None,
        }
    }

    /// Declare the dependencies a factory function requests (diagnostics only).
    #[inline]
    pub fn with_dependencies(mut self, dependencies: Vec<Dependency>) -> Self {
        self.dependencies = dependencies.into();
        self
    }

    #[inline]
    pub fn with_disposer(mut self, disposer: Disposer) -> Self {
        self.disposer = Some(disposer);
        self
    }

    /// The implementation type.
    #[inline]
    pub fn target(&self) -> &ServiceType {
        &self.target
    }

    #[inline]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    #[inline]
    pub fn disposer(&self) -> Option<&Disposer> {
        self.disposer.as_ref()
    }

    /// `TypeId` of the `Arc<I>` this activator stores, when known statically.
    #[inline]
    pub(crate) fn produces(&self) -> Option<TypeId> {
        self.produces
    }

    /// Run the build function.
    #[inline]
    pub fn activate(&self, resolver: &mut Resolver<'_>) -> Result<Instance> {
        (self.build)(resolver)
    }
}

impl fmt::Debug for Activator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activator")
            .field("target", &self.target.name())
            .field("dependencies", &self.dependencies)
            .field("disposer", &self.disposer.is_some())
            .finish()
    }
}

// =============================================================================
// Specializer
// =============================================================================

/// Turns an open generic registration into an activator for one closed type.
///
/// Rust cannot instantiate generics at runtime, so a specializer dispatches on
/// [`ServiceType::type_args`] to activators that were monomorphized at compile time.
pub trait Specializer: Send + Sync + 'static {
    fn specialize(&self, closed: &ServiceType) -> Result<Activator>;
}

impl<F> Specializer for F
where
    F: Fn(&ServiceType) -> Result<Activator> + Send + Sync + 'static,
{
    #[inline]
    fn specialize(&self, closed: &ServiceType) -> Result<Activator> {
        self(closed)
    }
}
