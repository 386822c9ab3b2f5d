//! Service containers
//!
//! A [`Container`] stores and owns entries. Child containers copy every parent
//! entry by reference at construction; a child disposes only what it declared,
//! adopted or specialized itself. Entry tables sit behind a reader/writer lock:
//! lookups share it, registration and specialization insertion take it exclusively.

use crate::graph::DependencyGraph;
use crate::proxy::{InterceptorFactory, ProxyEngine};
use crate::storage::EntryTable;
use crate::{
    CancellationToken, Descriptor, DiError, Entry, Injector, Registry, RequestChain, Result, ScopeId,
    ServiceId, ServiceReference,
};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

// =============================================================================
// Options
// =============================================================================

/// Default per-scope ceiling on tracked transient references.
pub const DEFAULT_TRANSIENT_LIMIT: usize = 4096;

/// Default entry count above which a frozen registry uses the compiled backend.
pub const DEFAULT_LOOKUP_THRESHOLD: usize = 30;

/// Settings shared by a container and all of its children.
///
/// # Examples
///
/// ```rust
/// use injection_engine::{Container, ContainerOptions};
///
/// let container = Container::with_options(ContainerOptions::default().strict(true).transient_limit(64));
/// assert!(container.options().strict);
/// ```
#[derive(Clone)]
pub struct ContainerOptions {
    /// Validate lifetime ownership between dependent and dependency.
    pub strict: bool,
    /// Maximum transient references a scope tracks before failing.
    pub transient_limit: usize,
    /// Entry count above which [`Container::freeze`] builds the compiled backend.
    pub lookup_threshold: usize,
    /// Collaborator used by [`Container::decorate`].
    pub proxy_engine: Option<Arc<dyn ProxyEngine>>,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            strict: false,
            transient_limit: DEFAULT_TRANSIENT_LIMIT,
            lookup_threshold: DEFAULT_LOOKUP_THRESHOLD,
            proxy_engine: None,
        }
    }
}

impl ContainerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn transient_limit(mut self, limit: usize) -> Self {
        self.transient_limit = limit;
        self
    }

    pub fn lookup_threshold(mut self, threshold: usize) -> Self {
        self.lookup_threshold = threshold;
        self
    }

    pub fn proxy_engine(mut self, engine: Arc<dyn ProxyEngine>) -> Self {
        self.proxy_engine = Some(engine);
        self
    }

    /// Defaults overridden by `INJECTION_ENGINE_STRICT`,
    /// `INJECTION_ENGINE_TRANSIENT_LIMIT` and `INJECTION_ENGINE_LOOKUP_THRESHOLD`.
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        if let Some(value) = lookup("INJECTION_ENGINE_STRICT") {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => options.strict = true,
                "0" | "false" | "no" | "off" => options.strict = false,
                _ => ignored("INJECTION_ENGINE_STRICT", &value),
            }
        }
        if let Some(value) = lookup("INJECTION_ENGINE_TRANSIENT_LIMIT") {
            match value.trim().parse() {
                Ok(limit) => options.transient_limit = limit,
                Err(_) => ignored("INJECTION_ENGINE_TRANSIENT_LIMIT", &value),
            }
        }
        if let Some(value) = lookup("INJECTION_ENGINE_LOOKUP_THRESHOLD") {
            match value.trim().parse() {
                Ok(threshold) => options.lookup_threshold = threshold,
                Err(_) => ignored("INJECTION_ENGINE_LOOKUP_THRESHOLD", &value),
            }
        }
        options
    }
}

#[cfg_attr(not(feature = "logging"), allow(unused_variables))]
fn ignored(key: &str, value: &str) {
    #[cfg(feature = "logging")]
    warn!(target: "injection_engine", key, value, "Ignoring invalid configuration value");
}

impl fmt::Debug for ContainerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerOptions")
            .field("strict", &self.strict)
            .field("transient_limit", &self.transient_limit)
            .field("lookup_threshold", &self.lookup_threshold)
            .field("proxy_engine", &self.proxy_engine.is_some())
            .finish()
    }
}

// =============================================================================
// Lookup modes
// =============================================================================

/// How [`Container::get`] treats misses and hidden entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupMode {
    /// Close open generic definitions for closed generic requests.
    pub specialize: bool,
    /// Fail with `ServiceNotFound` instead of returning `None`.
    pub required: bool,
    /// See infrastructure entries.
    pub include_hidden: bool,
}

impl LookupMode {
    /// Specialize on miss, `None` when absent.
    pub const DEFAULT: Self = Self {
        specialize: true,
        required: false,
        include_hidden: false,
    };

    /// Specialize on miss, error when absent.
    pub const REQUIRED: Self = Self {
        specialize: true,
        required: true,
        include_hidden: false,
    };

    /// Exact match only.
    pub const EXACT: Self = Self {
        specialize: false,
        required: false,
        include_hidden: false,
    };

    /// Companion services of pooled registrations.
    pub(crate) const INTERNAL: Self = Self {
        specialize: false,
        required: true,
        include_hidden: true,
    };

    /// Diagnostics: never mutates the container.
    pub(crate) const INSPECT: Self = Self {
        specialize: false,
        required: false,
        include_hidden: true,
    };
}

impl Default for LookupMode {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// =============================================================================
// Container
// =============================================================================

/// A node in the container hierarchy.
///
/// Cloning is cheap and yields a handle to the same container.
///
/// # Examples
///
/// ```rust
/// use injection_engine::{Container, Descriptor, Lifetime};
/// use std::sync::Arc;
///
/// struct Config { port: u16 }
///
/// let root = Container::new();
/// root.add(Descriptor::instance(Arc::new(Config { port: 8080 }))).unwrap();
///
/// let request = root.create_scope();
/// assert_eq!(request.get::<Config>().unwrap().port, 8080);
/// ```
#[derive(Clone)]
pub struct Container {
    pub(crate) inner: Arc<ContainerInner>,
}

pub(crate) struct ContainerInner {
    scope: ScopeId,
    parent: Option<Container>,
    depth: u32,
    options: Arc<ContainerOptions>,
    table: RwLock<EntryTable>,
    transients: Mutex<Vec<Arc<ServiceReference>>>,
    registry: OnceCell<Registry>,
    locked: AtomicBool,
    disposed: AtomicBool,
}

impl Container {
    /// Create a root container with default options.
    #[inline]
    pub fn new() -> Self {
        Self::with_options(ContainerOptions::default())
    }

    /// Create a root container.
    pub fn with_options(options: ContainerOptions) -> Self {
        let container = Self::from_parts(None, 0, Arc::new(options), EntryTable::new());

        #[cfg(feature = "logging")]
        debug!(
            target: "injection_engine",
            scope = %container.scope_id(),
            depth = 0,
            strict = container.inner.options.strict,
            "Creating new root container"
        );

        container
    }

    fn from_parts(parent: Option<Container>, depth: u32, options: Arc<ContainerOptions>, table: EntryTable) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                scope: ScopeId::next(),
                parent,
                depth,
                options,
                table: RwLock::new(table),
                transients: Mutex::new(Vec::new()),
                registry: OnceCell::new(),
                locked: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a child container inheriting every entry of this one.
    ///
    /// The child may register entries of its own, including ones that shadow
    /// inherited identities.
    pub fn child(&self) -> Self {
        let table = self.inner.table.read().inherit();
        let child = Self::from_parts(Some(self.clone()), self.inner.depth + 1, Arc::clone(&self.inner.options), table);

        #[cfg(feature = "logging")]
        debug!(
            target: "injection_engine",
            parent = %self.scope_id(),
            scope = %child.scope_id(),
            depth = child.inner.depth,
            "Creating child container"
        );

        child
    }

    /// A child scope and an injector that disposes it when disposed.
    pub fn create_scope(&self) -> Injector {
        Injector::owning(self.child())
    }

    /// An injector resolving against this container.
    ///
    /// Every injector from `injector()` shares this container's scope, so they all
    /// see the same Scoped instances. Use [`create_scope`](Self::create_scope) for an
    /// isolated scope. Disposing the injector does not dispose the container.
    pub fn injector(&self) -> Injector {
        Injector::bound(self.clone())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Validate `descriptor` and add its entries.
    ///
    /// Fails with `AlreadyRegistered` when this container already declares the
    /// identity, unless the existing entry is an abstract placeholder, which is
    /// replaced and disposed.
    pub fn add(&self, descriptor: Descriptor) -> Result<()> {
        self.check_writable()?;
        let lifetime = descriptor.lifetime();

        #[cfg(feature = "logging")]
        debug!(
            target: "injection_engine",
            service = %descriptor.id(),
            lifetime = %lifetime,
            scope = %self.scope_id(),
            depth = self.inner.depth,
            "Registering service"
        );

        let entries = lifetime.create_entries(descriptor, self)?;
        self.insert_entries(entries)
    }

    /// Add several descriptors, stopping at the first failure.
    pub fn add_all<I>(&self, descriptors: I) -> Result<()>
    where
        I: IntoIterator<Item = Descriptor>,
    {
        descriptors.into_iter().try_for_each(|descriptor| self.add(descriptor))
    }

    /// Insert entries atomically: all are validated before any is stored.
    pub(crate) fn insert_entries(&self, entries: Vec<Arc<Entry>>) -> Result<()> {
        let mut table = self.inner.table.write();
        for entry in &entries {
            self.check_insert(&table, entry)?;
        }
        let mut replaced = Vec::new();
        for entry in entries {
            if let Some(previous) = table.insert(entry, true) {
                replaced.push(previous);
            }
        }
        drop(table);

        for previous in replaced {
            if previous.owner_scope() == self.scope_id() {
                previous.dispose();
            }
        }
        Ok(())
    }

    fn check_insert(&self, table: &EntryTable, entry: &Entry) -> Result<()> {
        let existing = table.get(entry.id()).or_else(|| table.get_open(entry.id()));
        let Some(existing) = existing else {
            return Ok(());
        };
        // Inherited entries may be shadowed
        if existing.owner_scope() != self.scope_id() {
            return Ok(());
        }
        if !existing.is_abstract() || entry.is_abstract() {
            return Err(DiError::already_registered(entry.id()));
        }
        if !existing.lifetime().is_compatible(entry) {
            return Err(DiError::IncompatibleLifetime {
                service: entry.id().clone(),
                expected: existing.lifetime(),
                found: entry.lifetime(),
            });
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(DiError::disposed(self.scope_id()));
        }
        if self.is_locked() {
            return Err(DiError::Locked);
        }
        Ok(())
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Find the entry for `id`.
    ///
    /// On a miss for a closed generic identity (and `mode.specialize`), the open
    /// definition is specialized by its declaring container and the result copied
    /// into this one as if inherited.
    pub fn get(&self, id: &ServiceId, mode: LookupMode) -> Result<Option<Arc<Entry>>> {
        if self.is_disposed() {
            return Err(DiError::disposed(self.scope_id()));
        }
        if id.service_type().is_open() {
            return Err(DiError::cannot_instantiate(
                id,
                "open generic definitions must be closed before resolution",
            ));
        }

        let found = self.lookup(id).filter(|e| mode.include_hidden || !e.is_hidden());
        if found.is_some() {
            return Ok(found);
        }
        if mode.specialize {
            if let Some(entry) = self.specialize(id)? {
                return Ok(Some(entry));
            }
        }
        if mode.required {
            return Err(DiError::ServiceNotFound {
                service: id.clone(),
                chain: RequestChain::single(id),
            });
        }
        Ok(None)
    }

    fn lookup(&self, id: &ServiceId) -> Option<Arc<Entry>> {
        match self.inner.registry.get() {
            Some(registry) => registry
                .find(id)
                .cloned()
                .or_else(|| registry.cached_specialization(id)),
            None => self.inner.table.read().get(id).cloned(),
        }
    }

    fn lookup_open(&self, id: &ServiceId) -> Option<Arc<Entry>> {
        match self.inner.registry.get() {
            Some(registry) => registry.find_open(id).cloned(),
            None => self.inner.table.read().get_open(id).cloned(),
        }
    }

    fn specialize(&self, id: &ServiceId) -> Result<Option<Arc<Entry>>> {
        let Some(open_id) = id.open_id() else {
            return Ok(None);
        };
        let Some(definition) = self.lookup_open(&open_id) else {
            return Ok(None);
        };
        let owner = definition.owner()?;
        let specialized = owner.specialize_owned(&definition, id)?;
        if owner.scope_id() == self.scope_id() {
            return Ok(Some(specialized));
        }
        self.inherit_specialized(id, specialized).map(Some)
    }

    /// Specialize `definition` for `id` as its declaring container.
    fn specialize_owned(&self, definition: &Arc<Entry>, id: &ServiceId) -> Result<Arc<Entry>> {
        if let Some(registry) = self.inner.registry.get() {
            return registry.specialize(id, || definition.specialize(id.service_type(), self));
        }

        // Double-checked: the upgradable read admits readers but no second specializer
        let table = self.inner.table.upgradable_read();
        if let Some(existing) = table.get(id) {
            return Ok(Arc::clone(existing));
        }
        let entry = definition.specialize(id.service_type(), self)?;
        let mut table = RwLockUpgradableReadGuard::upgrade(table);
        table.insert(Arc::clone(&entry), true);
        Ok(entry)
    }

    fn inherit_specialized(&self, id: &ServiceId, entry: Arc<Entry>) -> Result<Arc<Entry>> {
        if let Some(registry) = self.inner.registry.get() {
            return registry.specialize(id, || Ok(entry));
        }
        let mut table = self.inner.table.write();
        if let Some(existing) = table.get(id) {
            return Ok(Arc::clone(existing));
        }
        table.insert(Arc::clone(&entry), false);
        Ok(entry)
    }

    /// The copy of a per-scope `entry` owned by this container, created on first use.
    pub(crate) fn adopt(&self, entry: &Arc<Entry>) -> Result<Arc<Entry>> {
        if entry.owner_scope() == self.scope_id() {
            return Ok(Arc::clone(entry));
        }
        if self.is_disposed() {
            return Err(DiError::disposed(self.scope_id()));
        }
        let local = |table: &EntryTable| {
            table
                .get(entry.id())
                .filter(|e| e.owner_scope() == self.scope_id())
                .cloned()
        };
        if let Some(existing) = local(&self.inner.table.read()) {
            return Ok(existing);
        }

        let mut table = self.inner.table.write();
        if let Some(existing) = local(&table) {
            return Ok(existing);
        }
        let copy = entry.copy_for(self);
        table.insert(Arc::clone(&copy), true);

        #[cfg(feature = "logging")]
        trace!(
            target: "injection_engine",
            service = %entry.id(),
            from = %entry.owner_scope(),
            scope = %self.scope_id(),
            "Adopted per-scope entry"
        );

        Ok(copy)
    }

    /// Whether `id` resolves here, counting open definitions for closed generics.
    pub fn contains(&self, id: &ServiceId) -> bool {
        if self.lookup(id).is_some_and(|e| !e.is_hidden()) {
            return true;
        }
        id.open_id().is_some_and(|open| self.lookup_open(&open).is_some())
    }

    /// Number of visible entries.
    pub fn len(&self) -> usize {
        self.inner.table.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identities of visible entries.
    pub fn service_ids(&self) -> Vec<ServiceId> {
        self.inner.table.read().ids()
    }

    // =========================================================================
    // Transients
    // =========================================================================

    pub(crate) fn track_transient(&self, reference: &Arc<ServiceReference>) -> Result<()> {
        let limit = self.inner.options.transient_limit;
        let mut transients = self.inner.transients.lock();
        if transients.len() >= limit {
            transients.retain(|r| !r.is_released());
        }
        if transients.len() >= limit {
            #[cfg(feature = "logging")]
            warn!(
                target: "injection_engine",
                service = %reference.id(),
                scope = %self.scope_id(),
                limit,
                "Transient limit exceeded"
            );
            return Err(DiError::TransientLimitExceeded {
                service: reference.id().clone(),
                limit,
                scope: self.scope_id(),
                chain: RequestChain::default(),
            });
        }
        transients.push(Arc::clone(reference));
        Ok(())
    }

    pub(crate) fn untrack_transient<F>(&self, matches: F) -> Option<Arc<ServiceReference>>
    where
        F: Fn(&ServiceReference) -> bool,
    {
        let mut transients = self.inner.transients.lock();
        let position = transients.iter().position(|r| matches(r))?;
        Some(transients.remove(position))
    }

    /// Transient references currently tracked by this scope.
    pub fn tracked_transients(&self) -> usize {
        self.inner.transients.lock().len()
    }

    // =========================================================================
    // Locking and freezing
    // =========================================================================

    /// Reject further registrations.
    pub fn lock(&self) {
        self.inner.locked.store(true, Ordering::Release);

        #[cfg(feature = "logging")]
        debug!(
            target: "injection_engine",
            scope = %self.scope_id(),
            services = self.len(),
            "Container locked"
        );
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.inner.locked.load(Ordering::Acquire)
    }

    /// Lock the container and build its lookup registry.
    ///
    /// The backend is chosen by [`ContainerOptions::lookup_threshold`]. A cancelled
    /// build leaves the container locked but unfrozen; freezing again retries.
    pub fn freeze(&self, token: &CancellationToken) -> Result<&Registry> {
        self.lock();
        self.inner.registry.get_or_try_init(|| {
            let (regular, open) = self.inner.table.read().snapshot();
            Registry::build(self.scope_id(), regular, open, self.inner.options.lookup_threshold, token)
        })
    }

    /// The registry, once frozen.
    #[inline]
    pub fn registry(&self) -> Option<&Registry> {
        self.inner.registry.get()
    }

    // =========================================================================
    // Decoration and diagnostics
    // =========================================================================

    /// Wrap the activator of an entry declared here through the proxy engine.
    pub fn decorate(&self, id: &ServiceId, interceptors: Vec<InterceptorFactory>) -> Result<()> {
        self.check_writable()?;
        let engine = self
            .inner
            .options
            .proxy_engine
            .clone()
            .ok_or_else(|| DiError::NoProxyEngine { service: id.clone() })?;
        let entry = self.lookup(id).ok_or_else(|| DiError::ServiceNotFound {
            service: id.clone(),
            chain: RequestChain::single(id),
        })?;
        if entry.owner_scope() != self.scope_id() {
            return Err(DiError::cannot_instantiate(id, "only entries declared by this container can be decorated"));
        }
        entry.decorate(engine.as_ref(), &interceptors)?;

        #[cfg(feature = "logging")]
        debug!(
            target: "injection_engine",
            service = %id,
            interceptors = interceptors.len(),
            "Decorated service"
        );

        Ok(())
    }

    /// Transitive dependency graph of `id`.
    pub fn dependency_graph(&self, id: &ServiceId) -> Result<DependencyGraph> {
        DependencyGraph::build(self, id)
    }

    // =========================================================================
    // Hierarchy
    // =========================================================================

    #[inline]
    pub fn scope_id(&self) -> ScopeId {
        self.inner.scope
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.inner.depth
    }

    #[inline]
    pub fn parent(&self) -> Option<&Container> {
        self.inner.parent.as_ref()
    }

    #[inline]
    pub fn options(&self) -> &ContainerOptions {
        &self.inner.options
    }

    /// Whether `self` is `other` or one of its ancestors.
    pub fn is_same_or_ancestor_of(&self, other: &Container) -> bool {
        let mut current = Some(other);
        while let Some(container) = current {
            if container.scope_id() == self.scope_id() {
                return true;
            }
            current = container.parent();
        }
        false
    }

    #[inline]
    pub(crate) fn downgrade(&self) -> Weak<ContainerInner> {
        Arc::downgrade(&self.inner)
    }

    #[inline]
    pub(crate) fn from_weak(weak: &Weak<ContainerInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    // =========================================================================
    // Disposal
    // =========================================================================

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Dispose everything this container created. Runs at most once.
    ///
    /// Tracked transients go first, newest first, then owned entries in reverse
    /// registration order. Inherited entries are left alone.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl ContainerInner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let transients = std::mem::take(&mut *self.transients.lock());
        let transient_count = transients.len();
        for reference in transients.into_iter().rev() {
            reference.release();
        }

        let mut owned = self.table.write().take_owned();
        if let Some(registry) = self.registry.get() {
            owned.extend(registry.owned_specializations());
        }
        let owned_count = owned.len();
        for entry in owned.into_iter().rev() {
            entry.dispose();
        }
        self.table.write().clear();

        #[cfg(feature = "logging")]
        debug!(
            target: "injection_engine",
            scope = %self.scope,
            depth = self.depth,
            transients = transient_count,
            entries = owned_count,
            "Container disposed"
        );
        #[cfg(not(feature = "logging"))]
        let _ = (transient_count, owned_count);
    }
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("scope", &self.scope_id())
            .field("depth", &self.inner.depth)
            .field("services", &self.len())
            .field("locked", &self.is_locked())
            .field("frozen", &self.inner.registry.get().is_some())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
