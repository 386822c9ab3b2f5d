//! Pooled lifetime support
//!
//! A pooled registration becomes three entries: a hidden Permanent factory service
//! that builds fresh items, a hidden Singleton pool service holding idle items, and
//! the visible per-scope entry. Resolving the visible entry checks an item out of
//! the pool (or builds one); releasing it checks the item back in.
//!
//! The pool itself is a collaborator behind [`ObjectPool`]; [`BoundedPool`] is the
//! default.

use crate::container::ContainerInner;
use crate::entry::{Producer, Visibility};
use crate::{
    Activator, Arguments, Container, DiError, Entry, Instance, Lifetime, Resolver, Result, ServiceId,
    ServiceReference, disposer, downcast,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::trace;

/// Idle items kept per pooled registration unless configured otherwise.
pub const DEFAULT_POOL_CAPACITY: usize = 16;

// =============================================================================
// Items and pools
// =============================================================================

/// One pooled instance and the reference that owns its dependencies.
pub struct PooledItem {
    reference: Arc<ServiceReference>,
    instance: Instance,
}

impl PooledItem {
    fn new(reference: Arc<ServiceReference>) -> Result<Self> {
        let instance = reference
            .value()
            .cloned()
            .ok_or_else(|| DiError::Internal(format!("pooled item for {} has no value", reference.id())))?;
        Ok(Self { reference, instance })
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    #[inline]
    pub fn id(&self) -> &ServiceId {
        self.reference.id()
    }

    /// Tear the item down: dispose it and release its dependencies.
    pub fn discard(self) {
        self.reference.release();
    }
}

impl fmt::Debug for PooledItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledItem").field("id", self.id()).finish()
    }
}

/// Storage for idle pooled items.
pub trait ObjectPool: Send + Sync + 'static {
    /// Take an idle item, if any.
    fn checkout(&self) -> Option<PooledItem>;

    /// Return an item. A full pool hands it back so the caller can discard it.
    fn checkin(&self, item: PooledItem) -> Option<PooledItem>;

    /// Remove every idle item.
    fn drain(&self) -> Vec<PooledItem>;

    /// Number of idle items.
    fn idle(&self) -> usize;
}

/// A LIFO pool keeping at most `capacity` idle items.
pub struct BoundedPool {
    capacity: usize,
    idle: Mutex<Vec<PooledItem>>,
}

impl BoundedPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            idle: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for BoundedPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl ObjectPool for BoundedPool {
    fn checkout(&self) -> Option<PooledItem> {
        self.idle.lock().pop()
    }

    fn checkin(&self, item: PooledItem) -> Option<PooledItem> {
        let mut idle = self.idle.lock();
        if idle.len() >= self.capacity {
            return Some(item);
        }
        idle.push(item);
        None
    }

    fn drain(&self) -> Vec<PooledItem> {
        std::mem::take(&mut *self.idle.lock())
    }

    fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

impl fmt::Debug for BoundedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedPool")
            .field("capacity", &self.capacity)
            .field("idle", &self.idle())
            .finish()
    }
}

/// Pool settings carried by a descriptor.
#[derive(Clone, Default)]
pub(crate) struct PoolConfig {
    pub(crate) capacity: Option<usize>,
    pub(crate) pool: Option<Arc<dyn ObjectPool>>,
}

// =============================================================================
// Companion services
// =============================================================================

/// Hidden Permanent service that builds fresh items in the declaring container.
pub(crate) struct PoolFactory {
    id: ServiceId,
    activator: Activator,
    arguments: Option<Arguments>,
    owner: Weak<ContainerInner>,
}

impl PoolFactory {
    fn create(&self, resolver: &mut Resolver<'_>) -> Result<PooledItem> {
        let owner = Container::from_weak(&self.owner).ok_or_else(DiError::parent_dropped)?;
        let reference = resolver.construct_in(&owner, &self.id, Lifetime::Pooled, &self.activator, self.arguments.clone())?;

        #[cfg(feature = "logging")]
        trace!(
            target: "injection_engine",
            service = %self.id,
            scope = %owner.scope_id(),
            "Created pooled item"
        );

        PooledItem::new(reference)
    }
}

/// Hidden Singleton service wrapping the pool.
pub(crate) struct PoolHandle {
    pool: Arc<dyn ObjectPool>,
}

pub(crate) fn factory_id(id: &ServiceId) -> ServiceId {
    ServiceId::named::<PoolFactory>(format!("{id}#factory"))
}

pub(crate) fn pool_id(id: &ServiceId) -> ServiceId {
    ServiceId::named::<PoolHandle>(format!("{id}#pool"))
}

fn companion<T: Send + Sync + 'static>(resolver: &mut Resolver<'_>, id: &ServiceId) -> Result<Arc<T>> {
    let instance = resolver.resolve_hidden(id)?;
    downcast::<T>(&instance).ok_or_else(|| DiError::Internal(format!("companion service {id} has the wrong type")))
}

/// The factory, pool and visible entries for a pooled registration, in that order.
pub(crate) fn companion_entries(
    id: ServiceId,
    activator: Activator,
    config: PoolConfig,
    arguments: Option<Arguments>,
    owner: &Container,
) -> Result<Vec<Arc<Entry>>> {
    let factory_id = factory_id(&id);
    let pool_id = pool_id(&id);

    let factory = Arc::new(PoolFactory {
        id: id.clone(),
        activator: activator.clone(),
        arguments,
        owner: owner.downgrade(),
    });
    let factory_entry = Entry::new(
        factory_id.clone(),
        Lifetime::Permanent,
        owner,
        Producer::Activator(Activator::factory(move |_| Ok(Arc::clone(&factory)))),
        Visibility::Hidden,
        None,
    );

    let pool: Arc<dyn ObjectPool> = match config.pool {
        Some(pool) => pool,
        None => Arc::new(BoundedPool::new(config.capacity.unwrap_or(DEFAULT_POOL_CAPACITY))),
    };
    let drain = disposer::<PoolHandle, _>(|handle| {
        for item in handle.pool.drain() {
            item.discard();
        }
    });
    let pool_entry = Entry::new(
        pool_id.clone(),
        Lifetime::Singleton,
        owner,
        Producer::Activator(
            Activator::factory(move |_| Ok(Arc::new(PoolHandle { pool: Arc::clone(&pool) }))).with_disposer(drain),
        ),
        Visibility::Hidden,
        None,
    );

    let checkout = Activator::new(activator.target().clone(), activator.dependencies().to_vec(), move |resolver| {
        let factory = companion::<PoolFactory>(resolver, &factory_id)?;
        let handle = companion::<PoolHandle>(resolver, &pool_id)?;
        let item = match handle.pool.checkout() {
            Some(item) => item,
            None => factory.create(resolver)?,
        };
        let instance = item.instance().clone();
        let pool = Arc::clone(&handle.pool);
        resolver.on_release(Box::new(move |_| {
            if let Some(rejected) = pool.checkin(item) {
                rejected.discard();
            }
        }));
        Ok(instance)
    });
    let visible = Entry::new(id, Lifetime::Pooled, owner, Producer::Activator(checkout), Visibility::Public, None);

    Ok(vec![Arc::new(factory_entry), Arc::new(pool_entry), Arc::new(visible)])
}
