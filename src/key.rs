//! Service identity
//!
//! A service is identified by its interface type plus an optional name. Interface
//! types are plain (`dyn Logger`, `Database`), open generic definitions
//! (`Repository<_>`) or closed generics (`Repository<User>`).

use crate::Instance;
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// =============================================================================
// Generic definitions
// =============================================================================

/// Identity of an open generic definition such as `Repository<_>`.
///
/// Rust has no runtime type constructors, so a definition is named by a marker
/// type chosen by the registering code. Every closed form implements [`Closed`]
/// and points back at the same definition.
#[derive(Debug, Clone, Copy)]
pub struct GenericDef {
    id: TypeId,
    name: &'static str,
    arity: usize,
}

impl GenericDef {
    /// A definition keyed by the marker type `F`.
    #[inline]
    pub fn of<F: ?Sized + 'static>(arity: usize) -> Self {
        Self {
            id: TypeId::of::<F>(),
            name: std::any::type_name::<F>(),
            arity,
        }
    }

    /// A definition keyed by `F` but displayed as `name`.
    #[inline]
    pub fn named<F: ?Sized + 'static>(name: &'static str, arity: usize) -> Self {
        Self {
            id: TypeId::of::<F>(),
            name,
            arity,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of type parameters.
    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl PartialEq for GenericDef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for GenericDef {}

impl Hash for GenericDef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A closed generic interface type.
///
/// ```rust
/// use injection_engine::{Closed, GenericDef, ServiceType};
///
/// trait Repository<T>: Send + Sync {}
/// struct RepositoryFamily;
///
/// impl<T: Send + Sync + 'static> Closed for dyn Repository<T> {
///     fn definition() -> GenericDef {
///         GenericDef::of::<RepositoryFamily>(1)
///     }
///     fn type_args() -> Vec<ServiceType> {
///         vec![ServiceType::of::<T>()]
///     }
/// }
///
/// let closed = ServiceType::closed::<dyn Repository<u32>>();
/// assert_eq!(closed.type_args()[0], ServiceType::of::<u32>());
/// ```
pub trait Closed: 'static {
    /// The open definition this type closes.
    fn definition() -> GenericDef;

    /// The type arguments, in declaration order.
    fn type_args() -> Vec<ServiceType>;
}

// =============================================================================
// ServiceType
// =============================================================================

#[derive(Debug, Clone)]
enum Shape {
    Plain,
    Open(GenericDef),
    Closed(GenericDef, Arc<[ServiceType]>),
}

/// Runtime description of an interface type.
#[derive(Debug, Clone)]
pub struct ServiceType {
    id: TypeId,
    name: &'static str,
    /// `TypeId` of `Arc<T>`, the form instances are stored in.
    holder: Option<TypeId>,
    shape: Shape,
}

impl ServiceType {
    /// Describe a non-generic interface (or a closed generic that is never
    /// specialized from an open definition).
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            holder: Some(TypeId::of::<Arc<T>>()),
            shape: Shape::Plain,
        }
    }

    /// Describe a closed generic interface.
    #[inline]
    pub fn closed<T: ?Sized + Closed>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            holder: Some(TypeId::of::<Arc<T>>()),
            shape: Shape::Closed(T::definition(), T::type_args().into()),
        }
    }

    /// Describe an open generic definition.
    #[inline]
    pub fn open(definition: GenericDef) -> Self {
        Self {
            id: definition.id,
            name: definition.name,
            holder: None,
            shape: Shape::Open(definition),
        }
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name with module paths stripped.
    pub fn short_name(&self) -> String {
        short_type_name(self.name)
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self.shape, Shape::Open(_))
    }

    #[inline]
    pub fn is_closed_generic(&self) -> bool {
        matches!(self.shape, Shape::Closed(..))
    }

    /// The generic definition of an open or closed generic type.
    #[inline]
    pub fn definition(&self) -> Option<GenericDef> {
        match &self.shape {
            Shape::Plain => None,
            Shape::Open(def) | Shape::Closed(def, _) => Some(*def),
        }
    }

    /// Type arguments of a closed generic; empty otherwise.
    #[inline]
    pub fn type_args(&self) -> &[ServiceType] {
        match &self.shape {
            Shape::Closed(_, args) => args,
            _ => &[],
        }
    }

    /// Whether `instance` holds an `Arc` of this interface.
    ///
    /// Open definitions accept nothing; they must be specialized first.
    #[inline]
    pub fn accepts(&self, instance: &Instance) -> bool {
        self.holder
            .is_some_and(|holder| (**instance).type_id() == holder)
    }

    #[inline]
    pub(crate) fn holder(&self) -> Option<TypeId> {
        self.holder
    }
}

impl PartialEq for ServiceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.is_open() == other.is_open()
    }
}

impl Eq for ServiceType {}

impl Hash for ServiceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.is_open().hash(state);
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())?;
        if self.is_open() {
            f.write_str("<_>")?;
        }
        Ok(())
    }
}

/// Strip module paths from every path segment of a type name.
///
/// `alloc::sync::Arc<dyn app::Repo<i32>>` becomes `Arc<dyn Repo<i32>>`.
pub(crate) fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment_start = 0;
    let mut chars = full.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ':' && chars.peek() == Some(&':') {
            chars.next();
            out.truncate(segment_start);
        } else {
            out.push(c);
            if !(c.is_alphanumeric() || c == '_') {
                segment_start = out.len();
            }
        }
    }
    out
}

// =============================================================================
// ServiceId
// =============================================================================

/// Service identity: interface type plus optional registration name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId {
    ty: ServiceType,
    name: Option<Arc<str>>,
}

impl ServiceId {
    #[inline]
    pub fn new(ty: ServiceType, name: Option<&str>) -> Self {
        Self {
            ty,
            name: name.map(Arc::from),
        }
    }

    /// Unnamed identity of `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            ty: ServiceType::of::<T>(),
            name: None,
        }
    }

    /// Named identity of `T`.
    #[inline]
    pub fn named<T: ?Sized + 'static>(name: impl Into<Arc<str>>) -> Self {
        Self {
            ty: ServiceType::of::<T>(),
            name: Some(name.into()),
        }
    }

    /// Unnamed identity of a closed generic.
    #[inline]
    pub fn closed<T: ?Sized + Closed>() -> Self {
        Self {
            ty: ServiceType::closed::<T>(),
            name: None,
        }
    }

    /// Same type, different name.
    #[inline]
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[inline]
    pub fn service_type(&self) -> &ServiceType {
        &self.ty
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// For a closed generic, the identity of its open definition under the same name.
    pub fn open_id(&self) -> Option<ServiceId> {
        if !self.ty.is_closed_generic() {
            return None;
        }
        let definition = self.ty.definition()?;
        Some(Self {
            ty: ServiceType::open(definition),
            name: self.name.clone(),
        })
    }

    /// This identity with its type replaced by a specialization of it.
    pub(crate) fn specialized(&self, closed: &ServiceType) -> ServiceId {
        Self {
            ty: closed.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty)?;
        if let Some(name) = &self.name {
            write!(f, "({name:?})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Repository<T>: Send + Sync {}
    struct RepositoryFamily;

    impl<T: Send + Sync + 'static> Closed for dyn Repository<T> {
        fn definition() -> GenericDef {
            GenericDef::of::<RepositoryFamily>(1)
        }
        fn type_args() -> Vec<ServiceType> {
            vec![ServiceType::of::<T>()]
        }
    }

    struct Database;

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("alloc::sync::Arc<dyn app::Repo<i32>>"), "Arc<dyn Repo<i32>>");
        assert_eq!(short_type_name("u32"), "u32");
        assert_eq!(short_type_name("(a::B, c::D)"), "(B, D)");
    }

    #[test]
    fn test_identity_equality() {
        assert_eq!(ServiceId::of::<Database>(), ServiceId::of::<Database>());
        assert_ne!(ServiceId::of::<Database>(), ServiceId::named::<Database>("replica"));
        assert_ne!(ServiceId::of::<Database>(), ServiceId::of::<u32>());
    }

    #[test]
    fn test_closed_points_at_open() {
        let closed = ServiceId::closed::<dyn Repository<u32>>();
        assert!(closed.service_type().is_closed_generic());
        assert_eq!(closed.service_type().type_args(), &[ServiceType::of::<u32>()]);

        let open = closed.open_id().unwrap();
        assert!(open.service_type().is_open());
        assert_eq!(open, ServiceId::new(ServiceType::open(GenericDef::of::<RepositoryFamily>(1)), None));
        assert!(ServiceId::of::<Database>().open_id().is_none());
    }

    #[test]
    fn test_accepts_checks_holder() {
        let db: Instance = Arc::new(Arc::new(Database));
        assert!(ServiceType::of::<Database>().accepts(&db));
        assert!(!ServiceType::of::<u32>().accepts(&db));
        assert!(!ServiceType::open(GenericDef::of::<RepositoryFamily>(1)).accepts(&db));
    }

    #[test]
    fn test_display() {
        assert_eq!(ServiceId::of::<Database>().to_string(), "Database");
        assert_eq!(ServiceType::open(GenericDef::named::<RepositoryFamily>("Repository", 1)).to_string(), "Repository<_>");
    }
}
