//! Constructor descriptors
//!
//! Instead of discovering constructors by reflection, every implementation type
//! declares its constructors once through [`Injectable`]. A [`Constructor`] is plain
//! data: the ordered list of dependency identities plus a build function that pulls
//! those dependencies from a [`Resolver`].

use crate::{DiError, Lazy, Resolver, Result, ServiceId};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Dependency
// =============================================================================

/// How a constructor consumes a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "graph-export", derive(serde::Serialize, serde::Deserialize))]
pub enum DependencyKind {
    /// Resolution fails if the dependency cannot be resolved.
    Required,
    /// Missing registrations resolve to `None`.
    Optional,
    /// Resolved on first use through [`Lazy`].
    Lazy,
}

/// One declared constructor parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    id: ServiceId,
    kind: DependencyKind,
}

impl Dependency {
    #[inline]
    pub fn new(id: ServiceId, kind: DependencyKind) -> Self {
        Self { id, kind }
    }

    #[inline]
    pub fn required<T: ?Sized + 'static>() -> Self {
        Self::new(ServiceId::of::<T>(), DependencyKind::Required)
    }

    #[inline]
    pub fn optional<T: ?Sized + 'static>() -> Self {
        Self::new(ServiceId::of::<T>(), DependencyKind::Optional)
    }

    #[inline]
    pub fn lazy<T: ?Sized + 'static>() -> Self {
        Self::new(ServiceId::of::<T>(), DependencyKind::Lazy)
    }

    /// Same dependency, resolved under `name`.
    #[inline]
    pub fn named(self, name: &str) -> Self {
        Self {
            id: self.id.with_name(name),
            kind: self.kind,
        }
    }

    #[inline]
    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    #[inline]
    pub fn kind(&self) -> DependencyKind {
        self.kind
    }
}

// =============================================================================
// Constructor
// =============================================================================

type BuildFn<T> = Arc<dyn Fn(&mut Resolver<'_>) -> Result<T> + Send + Sync>;

/// A constructor descriptor for `T`.
///
/// # Examples
///
/// ```rust
/// use injection_engine::{Constructor, Dependency, Injectable};
/// use std::sync::Arc;
///
/// struct Config;
/// struct Server {
///     config: Arc<Config>,
/// }
///
/// impl Injectable for Server {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![Constructor::from_fn(|config: Arc<Config>| Server { config })]
///     }
/// }
///
/// let ctor = &Server::constructors()[0];
/// assert_eq!(ctor.dependencies(), &[Dependency::required::<Config>()]);
/// ```
pub struct Constructor<T> {
    dependencies: Vec<Dependency>,
    build: BuildFn<T>,
    preferred: bool,
}

impl<T: 'static> Constructor<T> {
    /// A constructor with an explicit dependency list.
    ///
    /// The list is metadata (diagnostics, graph export); `build` is what actually
    /// requests the dependencies, in the same order.
    pub fn new<F>(dependencies: Vec<Dependency>, build: F) -> Self
    where
        F: Fn(&mut Resolver<'_>) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            dependencies,
            build: Arc::new(build),
            preferred: false,
        }
    }

    /// A constructor whose dependency list is derived from its parameter type.
    pub fn from_fn<D, F>(build: F) -> Self
    where
        D: Resolvable,
        F: Fn(D) -> T + Send + Sync + 'static,
    {
        Self::new(D::dependencies(), move |resolver| D::resolve(resolver).map(&build))
    }

    /// Mark this constructor as the one to use when several are declared.
    #[inline]
    pub fn preferred(mut self) -> Self {
        self.preferred = true;
        self
    }

    #[inline]
    pub fn is_preferred(&self) -> bool {
        self.preferred
    }

    #[inline]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Run the build function.
    #[inline]
    pub fn construct(&self, resolver: &mut Resolver<'_>) -> Result<T> {
        (self.build)(resolver)
    }
}

impl<T> Clone for Constructor<T> {
    fn clone(&self) -> Self {
        Self {
            dependencies: self.dependencies.clone(),
            build: Arc::clone(&self.build),
            preferred: self.preferred,
        }
    }
}

impl<T> fmt::Debug for Constructor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("dependencies", &self.dependencies)
            .field("preferred", &self.preferred)
            .finish()
    }
}

/// Pick the constructor to use: the only one, or the only preferred one.
pub(crate) fn select_constructor<T: 'static>(constructors: Vec<Constructor<T>>) -> Result<Constructor<T>> {
    let found = constructors.len();
    let mut constructors = constructors.into_iter();
    if found == 1 {
        if let Some(only) = constructors.next() {
            return Ok(only);
        }
    }
    let mut preferred = constructors.filter(Constructor::is_preferred);
    match (preferred.next(), preferred.next()) {
        (Some(constructor), None) => Ok(constructor),
        _ => Err(DiError::MultipleConstructors {
            implementation: std::any::type_name::<T>(),
            found,
        }),
    }
}

// =============================================================================
// Injectable
// =============================================================================

/// Implementation types that declare how they are constructed.
///
/// Usually generated with `#[derive(Inject)]` (feature `derive`).
pub trait Injectable: Send + Sync + Sized + 'static {
    /// Declared constructors. Exactly one, or exactly one marked preferred.
    fn constructors() -> Vec<Constructor<Self>>;
}

// =============================================================================
// Resolvable - constructor parameter shapes
// =============================================================================

/// Constructor parameter types that can be pulled from a [`Resolver`].
///
/// Implemented for:
/// - `()` - No dependencies
/// - `Arc<T>` - Required service (trait objects included)
/// - `Option<Arc<T>>` - Optional service
/// - `Lazy<T>` - Deferred service
/// - Tuples of the above (up to 12)
pub trait Resolvable: Sized {
    /// The declared dependencies, in resolution order.
    fn dependencies() -> Vec<Dependency>;

    /// Resolve the parameter.
    fn resolve(resolver: &mut Resolver<'_>) -> Result<Self>;
}

impl Resolvable for () {
    #[inline]
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    #[inline]
    fn resolve(_resolver: &mut Resolver<'_>) -> Result<Self> {
        Ok(())
    }
}

impl<T: ?Sized + Send + Sync + 'static> Resolvable for Arc<T> {
    #[inline]
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::required::<T>()]
    }

    #[inline]
    fn resolve(resolver: &mut Resolver<'_>) -> Result<Self> {
        resolver.get::<T>()
    }
}

impl<T: ?Sized + Send + Sync + 'static> Resolvable for Option<Arc<T>> {
    #[inline]
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::optional::<T>()]
    }

    #[inline]
    fn resolve(resolver: &mut Resolver<'_>) -> Result<Self> {
        resolver.get_optional::<T>()
    }
}

impl<T: ?Sized + Send + Sync + 'static> Resolvable for Lazy<T> {
    #[inline]
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::lazy::<T>()]
    }

    #[inline]
    fn resolve(resolver: &mut Resolver<'_>) -> Result<Self> {
        Ok(resolver.lazy::<T>())
    }
}

macro_rules! impl_resolvable_tuple {
    ($($T:ident),+) => {
        impl<$($T: Resolvable),+> Resolvable for ($($T,)+) {
            fn dependencies() -> Vec<Dependency> {
                let mut dependencies = Vec::new();
                $(dependencies.extend($T::dependencies());)+
                dependencies
            }

            #[inline]
            fn resolve(resolver: &mut Resolver<'_>) -> Result<Self> {
                Ok(($($T::resolve(resolver)?,)+))
            }
        }
    };
}

impl_resolvable_tuple!(A);
impl_resolvable_tuple!(A, B);
impl_resolvable_tuple!(A, B, C);
impl_resolvable_tuple!(A, B, C, D);
impl_resolvable_tuple!(A, B, C, D, E);
impl_resolvable_tuple!(A, B, C, D, E, F);
impl_resolvable_tuple!(A, B, C, D, E, F, G);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H, I);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H, I, J);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H, I, J, K);
impl_resolvable_tuple!(A, B, C, D, E, F, G, H, I, J, K, L);

#[cfg(test)]
mod tests {
    use super::*;

    struct Config;
    struct Cache;
    trait Clock: Send + Sync {}

    struct Service;

    #[test]
    fn test_tuple_dependencies_in_order() {
        let deps = <(Arc<Config>, Option<Arc<Cache>>, Lazy<dyn Clock>)>::dependencies();
        assert_eq!(
            deps,
            vec![
                Dependency::required::<Config>(),
                Dependency::optional::<Cache>(),
                Dependency::lazy::<dyn Clock>(),
            ]
        );
    }

    #[test]
    fn test_named_dependency() {
        let dep = Dependency::required::<Config>().named("primary");
        assert_eq!(dep.id().name(), Some("primary"));
        assert_eq!(dep.kind(), DependencyKind::Required);
    }

    #[test]
    fn test_select_single_constructor() {
        let ctor = select_constructor(vec![Constructor::from_fn(|_: Arc<Config>| Service)]).unwrap();
        assert_eq!(ctor.dependencies().len(), 1);
    }

    #[test]
    fn test_select_preferred_constructor() {
        let ctor = select_constructor(vec![
            Constructor::from_fn(|_: ()| Service),
            Constructor::from_fn(|_: (Arc<Config>, Arc<Cache>)| Service).preferred(),
        ])
        .unwrap();
        assert!(ctor.is_preferred());
        assert_eq!(ctor.dependencies().len(), 2);
    }

    #[test]
    fn test_multiple_constructors_rejected() {
        let err = select_constructor(vec![
            Constructor::from_fn(|_: ()| Service),
            Constructor::from_fn(|_: Arc<Config>| Service),
        ])
        .unwrap_err();
        assert!(matches!(err, DiError::MultipleConstructors { found: 2, .. }));

        let err = select_constructor(Vec::<Constructor<Service>>::new()).unwrap_err();
        assert!(matches!(err, DiError::MultipleConstructors { found: 0, .. }));

        let err = select_constructor(vec![
            Constructor::from_fn(|_: ()| Service).preferred(),
            Constructor::from_fn(|_: Arc<Config>| Service).preferred(),
        ])
        .unwrap_err();
        assert!(matches!(err, DiError::MultipleConstructors { found: 2, .. }));
    }
}
