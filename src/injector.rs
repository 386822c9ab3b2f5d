//! Injectors - units of resolution
//!
//! An [`Injector`] resolves identities against one container. Every root request
//! starts a fresh [`RequestPath`]; factories pull their own dependencies through a
//! [`Resolver`] that extends the same path, so cycles and strict-ownership
//! violations are detected with the full identity chain at hand.
//!
//! Shared entries are always built by an injector bound to their declaring
//! container, so a singleton's dependencies come from the container that owns it.

use crate::container::ContainerInner;
use crate::reference::ReleaseHook;
use crate::{
    Activator, Arguments, Closed, Container, DiError, Entry, Instance, Lifetime, LookupMode, Ownership,
    RequestChain, Result, ScopeId, ServiceId, ServiceReference, downcast,
};
use once_cell::sync::OnceCell;
use parking_lot::ReentrantMutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

// =============================================================================
// Request path
// =============================================================================

struct Frame {
    id: ServiceId,
    /// Longevity rank used by strict checks; transients inherit their requestor's.
    rank: u8,
    owner: Container,
    reference: Arc<ServiceReference>,
    arguments: Option<Arguments>,
}

/// Entries currently being built by one root request, outermost first.
#[derive(Default)]
struct RequestPath {
    frames: Vec<Frame>,
}

impl RequestPath {
    fn new() -> Self {
        Self::default()
    }

    fn contains(&self, id: &ServiceId) -> bool {
        self.frames.iter().any(|f| &f.id == id)
    }

    /// The current chain followed by `id`.
    fn chain_with(&self, id: &ServiceId) -> RequestChain {
        let mut ids: Vec<ServiceId> = self.frames.iter().map(|f| f.id.clone()).collect();
        ids.push(id.clone());
        RequestChain::new(ids)
    }

    #[inline]
    fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    fn effective_rank(&self, lifetime: Lifetime) -> u8 {
        match lifetime {
            Lifetime::Transient => self.top().map_or(0, |f| f.rank),
            other => other.precedence(),
        }
    }

    #[inline]
    fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    #[inline]
    fn pop(&mut self) {
        self.frames.pop();
    }

    #[inline]
    fn len(&self) -> usize {
        self.frames.len()
    }
}

// =============================================================================
// Injector
// =============================================================================

/// A disposable unit of resolution bound to one container.
///
/// Calls through one injector are serialized; use one injector per logical
/// request and create more with [`Injector::scope`] or [`Container::create_scope`].
///
/// # Examples
///
/// ```rust
/// use injection_engine::{Container, Constructor, Descriptor, Injectable, Lifetime};
/// use std::sync::Arc;
///
/// struct Database;
/// struct UserService { db: Arc<Database> }
///
/// impl Injectable for UserService {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![Constructor::from_fn(|db: Arc<Database>| UserService { db })]
///     }
/// }
///
/// let container = Container::new();
/// container.add(Descriptor::factory(Lifetime::Singleton, |_| Ok(Arc::new(Database)))).unwrap();
/// container.add(Descriptor::of::<UserService>(Lifetime::Scoped)).unwrap();
///
/// let request = container.create_scope();
/// let users = request.get::<UserService>().unwrap();
/// assert!(Arc::ptr_eq(&users.db, &request.get::<Database>().unwrap()));
/// ```
#[derive(Clone)]
pub struct Injector {
    inner: Arc<InjectorInner>,
}

struct InjectorInner {
    scope: Container,
    gate: ReentrantMutex<()>,
    owns_scope: bool,
    disposed: AtomicBool,
}

impl Injector {
    /// Resolve against `scope` without owning it.
    pub(crate) fn bound(scope: Container) -> Self {
        Self::with_scope(scope, false)
    }

    /// Resolve against `scope` and dispose it with the injector.
    pub(crate) fn owning(scope: Container) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "injection_engine",
            scope = %scope.scope_id(),
            depth = scope.depth(),
            "Creating scope injector"
        );
        Self::with_scope(scope, true)
    }

    fn with_scope(scope: Container, owns_scope: bool) -> Self {
        Self {
            inner: Arc::new(InjectorInner {
                scope,
                gate: ReentrantMutex::new(()),
                owns_scope,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    // =========================================================================
    // Typed resolution
    // =========================================================================

    /// Resolve the unnamed service `T`.
    #[inline]
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.get_by_id(&ServiceId::of::<T>())
    }

    /// Resolve the service `T` registered under `name`.
    #[inline]
    pub fn get_named<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.get_by_id(&ServiceId::named::<T>(name))
    }

    /// Resolve a closed generic, specializing its open definition on first use.
    #[inline]
    pub fn get_generic<T: ?Sized + Closed + Send + Sync>(&self) -> Result<Arc<T>> {
        self.get_by_id(&ServiceId::closed::<T>())
    }

    pub fn get_by_id<T: ?Sized + Send + Sync + 'static>(&self, id: &ServiceId) -> Result<Arc<T>> {
        let instance = self.resolve(id)?;
        typed(id, &instance).map_err(|err| err.within(|| RequestChain::single(id), id))
    }

    /// Like [`get`](Self::get), but `None` when `T` itself is not registered.
    ///
    /// Missing dependencies of `T` still fail.
    pub fn try_get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        let id = ServiceId::of::<T>();
        match self.resolve_root(&id, LookupMode::DEFAULT, None)? {
            Some(instance) => typed(&id, &instance)
                .map(Some)
                .map_err(|err| err.within(|| RequestChain::single(&id), &id)),
            None => Ok(None),
        }
    }

    /// Resolve `T`, overriding its direct dependencies with `arguments`.
    ///
    /// A shared entry that is already built ignores the arguments.
    pub fn get_with<T: ?Sized + Send + Sync + 'static>(&self, arguments: Arguments) -> Result<Arc<T>> {
        let id = ServiceId::of::<T>();
        let instance = self.resolve_with(&id, arguments)?;
        typed(&id, &instance).map_err(|err| err.within(|| RequestChain::single(&id), &id))
    }

    // =========================================================================
    // Erased resolution
    // =========================================================================

    /// Resolve `id` to its erased instance.
    pub fn resolve(&self, id: &ServiceId) -> Result<Instance> {
        self.resolve_root(id, LookupMode::REQUIRED, None)?
            .ok_or_else(|| not_found(id))
    }

    pub fn resolve_with(&self, id: &ServiceId, arguments: Arguments) -> Result<Instance> {
        self.resolve_root(id, LookupMode::REQUIRED, Some(arguments))?
            .ok_or_else(|| not_found(id))
    }

    fn resolve_root(&self, id: &ServiceId, mode: LookupMode, overrides: Option<Arguments>) -> Result<Option<Instance>> {
        if self.is_disposed() {
            return Err(DiError::disposed(self.scope_id()).within(|| RequestChain::single(id), id));
        }
        let _gate = self.inner.gate.lock();

        #[cfg(feature = "logging")]
        trace!(
            target: "injection_engine",
            service = %id,
            scope = %self.scope_id(),
            "Resolving service"
        );

        let mut path = RequestPath::new();
        match self.resolve_in(id, &mut path, mode, overrides)? {
            Some(reference) => value_of(&reference).map(Some),
            None => Ok(None),
        }
    }

    /// Release a transient instance obtained from this injector before the
    /// injector is disposed. Returns false if it is not tracked here.
    pub fn release<T: ?Sized + Send + Sync + 'static>(&self, instance: &Arc<T>) -> bool {
        let target = Arc::as_ptr(instance).cast::<()>();
        let found = self.inner.scope.untrack_transient(|reference| {
            reference
                .get::<T>()
                .is_some_and(|value| Arc::as_ptr(&value).cast::<()>() == target)
        });
        match found {
            Some(reference) => {
                reference.release();
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    /// A child scope of this injector's container.
    pub fn scope(&self) -> Injector {
        self.inner.scope.create_scope()
    }

    #[inline]
    pub fn container(&self) -> &Container {
        &self.inner.scope
    }

    #[inline]
    pub fn scope_id(&self) -> ScopeId {
        self.inner.scope.scope_id()
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Dispose the injector and, if it owns one, its scope.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    // =========================================================================
    // Engine
    // =========================================================================

    fn resolve_in(
        &self,
        id: &ServiceId,
        path: &mut RequestPath,
        mode: LookupMode,
        overrides: Option<Arguments>,
    ) -> Result<Option<Arc<ServiceReference>>> {
        let found = self
            .resolve_found(id, path, mode, overrides)
            .map_err(|err| err.within(|| path.chain_with(id), id))?;
        let Some(reference) = found else {
            return Ok(None);
        };

        if let Some(top) = path.top() {
            // A transient built for a requestor hands its creation count over.
            if reference.lifetime().is_shared() {
                top.reference.add_dependency(Arc::clone(&reference));
            } else {
                top.reference.adopt_dependency(Arc::clone(&reference));
            }
        }
        Ok(Some(reference))
    }

    fn resolve_found(
        &self,
        id: &ServiceId,
        path: &mut RequestPath,
        mode: LookupMode,
        overrides: Option<Arguments>,
    ) -> Result<Option<Arc<ServiceReference>>> {
        let lookup = LookupMode {
            required: false,
            ..mode
        };
        let Some(entry) = self.inner.scope.get(id, lookup)? else {
            if mode.required {
                return Err(DiError::ServiceNotFound {
                    service: id.clone(),
                    chain: path.chain_with(id),
                });
            }
            return Ok(None);
        };

        if self.inner.scope.options().strict {
            self.check_ownership(&entry, path)?;
        }

        self.resolve_entry(&entry, path, overrides).map(Some)
    }

    /// A requested entry must live at least as long as its requestor, and a shared
    /// one must belong to the requestor's container or an ancestor of it.
    fn check_ownership(&self, entry: &Arc<Entry>, path: &RequestPath) -> Result<()> {
        let Some(top) = path.top() else {
            return Ok(());
        };
        let lifetime = entry.lifetime();
        if lifetime == Lifetime::Transient {
            return Ok(());
        }

        let allowed = if lifetime.precedence() < top.rank {
            false
        } else if lifetime.is_per_scope() {
            self.inner.scope.is_same_or_ancestor_of(&top.owner)
        } else {
            entry.owner()?.is_same_or_ancestor_of(&top.owner)
        };
        if allowed {
            return Ok(());
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "injection_engine",
            requestor = %top.id,
            requested = %entry.id(),
            lifetime = %lifetime,
            "Strict ownership check failed"
        );

        Err(DiError::RequestNotAllowed {
            requestor: top.id.clone(),
            requested: entry.id().clone(),
            chain: path.chain_with(entry.id()),
        })
    }

    fn resolve_entry(
        &self,
        entry: &Arc<Entry>,
        path: &mut RequestPath,
        overrides: Option<Arguments>,
    ) -> Result<Arc<ServiceReference>> {
        if entry.is_disposed() {
            return Err(DiError::disposed(entry.owner_scope()));
        }

        if !entry.lifetime().is_shared() {
            let reference = self.build(entry, path, overrides)?;
            // Only root transients are tracked; nested ones belong to their requestor.
            if path.top().is_some() {
                return Ok(reference);
            }
            if let Err(err) = self.inner.scope.track_transient(&reference) {
                reference.release();
                return Err(err);
            }
            return Ok(reference);
        }

        let entry = if entry.lifetime().is_per_scope() {
            self.inner.scope.adopt(entry)?
        } else {
            Arc::clone(entry)
        };
        if let Some(reference) = entry.reference() {
            return Ok(reference);
        }

        if entry.owner_scope() != self.scope_id() && !entry.held_by_current_thread() {
            let owner = entry.owner()?;

            #[cfg(feature = "logging")]
            trace!(
                target: "injection_engine",
                service = %entry.id(),
                owner = %owner.scope_id(),
                scope = %self.scope_id(),
                "Delegating shared entry to its owner"
            );

            return Injector::bound(owner).resolve_entry(&entry, path, overrides);
        }

        entry.shared(|| self.build(&entry, path, overrides))
    }

    fn build(&self, entry: &Arc<Entry>, path: &mut RequestPath, overrides: Option<Arguments>) -> Result<Arc<ServiceReference>> {
        if path.contains(entry.id()) {
            return Err(DiError::CircularReference {
                chain: path.chain_with(entry.id()),
            });
        }
        let activator = entry.activator()?;
        let arguments = Arguments::merge(entry.arguments(), overrides);
        self.construct(&self.inner.scope, entry.id(), entry.lifetime(), &activator, arguments, path)
    }

    /// Run `activator` as `id` on top of `path`.
    ///
    /// On failure the partially built reference is released, which releases any
    /// dependency already attached to it.
    fn construct(
        &self,
        owner: &Container,
        id: &ServiceId,
        lifetime: Lifetime,
        activator: &Activator,
        arguments: Option<Arguments>,
        path: &mut RequestPath,
    ) -> Result<Arc<ServiceReference>> {
        let reference = ServiceReference::new(
            id.clone(),
            lifetime,
            owner.scope_id(),
            Ownership::Owned,
            activator.disposer().cloned(),
        );
        let rank = path.effective_rank(lifetime);
        path.push(Frame {
            id: id.clone(),
            rank,
            owner: owner.clone(),
            reference: Arc::clone(&reference),
            arguments,
        });

        let result = {
            let mut resolver = Resolver {
                injector: self,
                path: &mut *path,
            };
            activator.activate(&mut resolver)
        };
        path.pop();

        let outcome = result
            .and_then(|value| {
                if !id.service_type().accepts(&value) {
                    return Err(DiError::not_assignable(id, activator.target()));
                }
                reference.set_value(value)
            })
            .map_err(|err| err.within(|| path.chain_with(id), id));

        match outcome {
            Ok(()) => {
                #[cfg(feature = "logging")]
                trace!(
                    target: "injection_engine",
                    service = %id,
                    lifetime = %lifetime,
                    scope = %owner.scope_id(),
                    depth = path.len(),
                    "Built service"
                );
                Ok(reference)
            }
            Err(err) => {
                reference.release();
                Err(err)
            }
        }
    }
}

impl InjectorInner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.owns_scope {
            self.scope.dispose();
        }
    }
}

impl Drop for InjectorInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("scope", &self.scope_id())
            .field("owns_scope", &self.inner.owns_scope)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn typed<T: ?Sized + Send + Sync + 'static>(id: &ServiceId, instance: &Instance) -> Result<Arc<T>> {
    downcast::<T>(instance).ok_or_else(|| DiError::not_assignable(std::any::type_name::<T>(), id))
}

fn value_of(reference: &ServiceReference) -> Result<Instance> {
    reference
        .value()
        .cloned()
        .ok_or_else(|| DiError::Internal(format!("reference for {} has no value", reference.id())))
}

fn not_found(id: &ServiceId) -> DiError {
    DiError::ServiceNotFound {
        service: id.clone(),
        chain: RequestChain::single(id),
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Handed to factories and constructors to pull their dependencies.
///
/// Each call resolves within the request that is building the current service,
/// attaching the result to it as a dependency.
pub struct Resolver<'a> {
    injector: &'a Injector,
    path: &'a mut RequestPath,
}

impl<'a> Resolver<'a> {
    /// Resolve `id` as a required dependency.
    ///
    /// Explicit arguments of the service being built take precedence.
    pub fn resolve(&mut self, id: &ServiceId) -> Result<Instance> {
        if let Some(value) = self.argument(id) {
            return Ok(value);
        }
        match self.injector.resolve_in(id, self.path, LookupMode::REQUIRED, None)? {
            Some(reference) => value_of(&reference),
            None => Err(DiError::ServiceNotFound {
                service: id.clone(),
                chain: self.path.chain_with(id),
            }),
        }
    }

    /// Resolve `id`, or `None` if it is not registered.
    pub fn resolve_optional(&mut self, id: &ServiceId) -> Result<Option<Instance>> {
        if let Some(value) = self.argument(id) {
            return Ok(Some(value));
        }
        match self.injector.resolve_in(id, self.path, LookupMode::DEFAULT, None)? {
            Some(reference) => value_of(&reference).map(Some),
            None => Ok(None),
        }
    }

    fn argument(&self, id: &ServiceId) -> Option<Instance> {
        self.path
            .top()
            .and_then(|frame| frame.arguments.as_ref())
            .and_then(|arguments| arguments.get(id))
            .cloned()
    }

    #[inline]
    pub fn get<T: ?Sized + Send + Sync + 'static>(&mut self) -> Result<Arc<T>> {
        self.get_by_id(&ServiceId::of::<T>())
    }

    #[inline]
    pub fn get_named<T: ?Sized + Send + Sync + 'static>(&mut self, name: &str) -> Result<Arc<T>> {
        self.get_by_id(&ServiceId::named::<T>(name))
    }

    #[inline]
    pub fn get_generic<T: ?Sized + Closed + Send + Sync>(&mut self) -> Result<Arc<T>> {
        self.get_by_id(&ServiceId::closed::<T>())
    }

    pub fn get_by_id<T: ?Sized + Send + Sync + 'static>(&mut self, id: &ServiceId) -> Result<Arc<T>> {
        let instance = self.resolve(id)?;
        typed(id, &instance).map_err(|err| err.within(|| self.path.chain_with(id), id))
    }

    #[inline]
    pub fn get_optional<T: ?Sized + Send + Sync + 'static>(&mut self) -> Result<Option<Arc<T>>> {
        self.get_optional_by_id(&ServiceId::of::<T>())
    }

    pub fn get_optional_by_id<T: ?Sized + Send + Sync + 'static>(&mut self, id: &ServiceId) -> Result<Option<Arc<T>>> {
        match self.resolve_optional(id)? {
            Some(instance) => typed(id, &instance)
                .map(Some)
                .map_err(|err| err.within(|| self.path.chain_with(id), id)),
            None => Ok(None),
        }
    }

    /// A handle that resolves `T` on first use.
    #[inline]
    pub fn lazy<T: ?Sized + Send + Sync + 'static>(&mut self) -> Lazy<T> {
        self.lazy_by_id(ServiceId::of::<T>())
    }

    pub fn lazy_by_id<T: ?Sized + Send + Sync + 'static>(&mut self, id: ServiceId) -> Lazy<T> {
        Lazy {
            container: self.injector.inner.scope.downgrade(),
            id,
            value: OnceCell::new(),
        }
    }

    /// The identity of the service being built.
    pub fn service(&self) -> Option<&ServiceId> {
        self.path.top().map(|frame| &frame.id)
    }

    #[inline]
    pub fn injector(&self) -> &Injector {
        self.injector
    }

    #[inline]
    pub fn scope(&self) -> ScopeId {
        self.injector.scope_id()
    }

    /// Resolve an infrastructure entry hidden from normal lookups.
    pub(crate) fn resolve_hidden(&mut self, id: &ServiceId) -> Result<Instance> {
        match self.injector.resolve_in(id, self.path, LookupMode::INTERNAL, None)? {
            Some(reference) => value_of(&reference),
            None => Err(not_found(id)),
        }
    }

    /// Run `hook` instead of the disposer when the service being built is released.
    pub(crate) fn on_release(&mut self, hook: ReleaseHook) {
        if let Some(frame) = self.path.top() {
            frame.reference.set_release_hook(hook);
        }
    }

    /// Build `id` with `activator` on behalf of `owner`, outside any entry.
    pub(crate) fn construct_in(
        &mut self,
        owner: &Container,
        id: &ServiceId,
        lifetime: Lifetime,
        activator: &Activator,
        arguments: Option<Arguments>,
    ) -> Result<Arc<ServiceReference>> {
        let injector = Injector::bound(owner.clone());
        injector.construct(owner, id, lifetime, activator, arguments, self.path)
    }
}

impl fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("scope", &self.scope())
            .field("service", &self.service())
            .field("depth", &self.path.len())
            .finish()
    }
}

// =============================================================================
// Lazy
// =============================================================================

/// A dependency resolved on first [`get`](Lazy::get).
///
/// Holds only a weak handle to the container it was created in; resolution is a
/// fresh root request there.
pub struct Lazy<T: ?Sized> {
    container: Weak<ContainerInner>,
    id: ServiceId,
    value: OnceCell<Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Lazy<T> {
    pub fn get(&self) -> Result<Arc<T>> {
        self.value
            .get_or_try_init(|| {
                let container = Container::from_weak(&self.container)
                    .ok_or_else(|| DiError::parent_dropped().within(|| RequestChain::single(&self.id), &self.id))?;
                container.injector().get_by_id::<T>(&self.id)
            })
            .cloned()
    }

    #[inline]
    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.value.get().is_some()
    }
}

impl<T: ?Sized> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("id", &self.id)
            .field("resolved", &self.value.get().is_some())
            .finish()
    }
}
