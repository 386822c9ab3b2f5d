//! # Injection Engine - Dependency-Injection Resolution Core
//!
//! A dependency-injection resolution engine: given declared services (interface to
//! implementation, factory or instance, with a lifetime policy) it builds object
//! graphs on demand, enforces ownership between dependent and dependency, detects
//! cyclic requests and disposes everything it created deterministically.
//!
//! ## Features
//!
//! - 🔁 **Lifetime policies** - Transient, Scoped, Singleton, Pooled and Instance
//! - 🌳 **Container hierarchy** - Children inherit entries; shared entries are built by their declaring container
//! - 🧬 **Open generics** - `Repository<_>` specialized per closed type, cached once per key
//! - 🛡️ **Strict ownership** - Optional check that no service captures a shorter-lived one
//! - 🔍 **Cycle detection** - Errors carry the full request chain (`A -> B -> A`)
//! - ♻️ **Reference-counted disposal** - Cascades through resolved dependencies, each instance once
//! - ⚡ **Frozen registries** - Slot-indexed lookup with hash or compiled backends
//! - 📊 **Observable** - Optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use injection_engine::prelude::*;
//!
//! trait Clock: Send + Sync {
//!     fn now(&self) -> u64;
//! }
//!
//! struct FixedClock;
//! impl Clock for FixedClock {
//!     fn now(&self) -> u64 { 42 }
//! }
//!
//! struct Scheduler {
//!     clock: Arc<dyn Clock>,
//! }
//!
//! impl Injectable for Scheduler {
//!     fn constructors() -> Vec<Constructor<Self>> {
//!         vec![Constructor::from_fn(|clock: Arc<dyn Clock>| Scheduler { clock })]
//!     }
//! }
//!
//! let container = Container::new();
//! container.add(Descriptor::factory(Lifetime::Singleton, |_| Ok(Arc::new(FixedClock) as Arc<dyn Clock>))).unwrap();
//! container.add(Descriptor::of::<Scheduler>(Lifetime::Scoped)).unwrap();
//!
//! let request = container.create_scope();
//! assert_eq!(request.get::<Scheduler>().unwrap().clock.now(), 42);
//! ```
//!
//! ## Scopes
//!
//! ```rust
//! use injection_engine::prelude::*;
//!
//! struct RequestId(u32);
//!
//! let root = Container::new();
//! root.add(Descriptor::factory(Lifetime::Scoped, |_| Ok(Arc::new(RequestId(7))))).unwrap();
//!
//! let left = root.create_scope();
//! let right = root.create_scope();
//! let a = left.get::<RequestId>().unwrap();
//! assert!(Arc::ptr_eq(&a, &left.get::<RequestId>().unwrap()));
//! assert!(!Arc::ptr_eq(&a, &right.get::<RequestId>().unwrap()));
//!
//! // Disposing a scope disposes what it built, never what it inherited
//! left.dispose();
//! ```
//!
//! ## Derive
//!
//! With the `derive` feature, `#[derive(Inject)]` generates [`Injectable`]:
//!
//! ```rust,ignore
//! #[derive(Inject)]
//! struct UserService {
//!     #[inject]
//!     db: Arc<Database>,
//!     #[inject(optional)]
//!     cache: Option<Arc<Cache>>,
//!     #[inject(name = "audit")]
//!     audit: Arc<dyn Logger>,
//!     requests: AtomicU64, // Default::default()
//! }
//! ```

extern crate self as injection_engine;

mod arguments;
mod cancellation;
mod container;
mod entry;
mod error;
mod factory;
mod graph;
mod injector;
mod key;
mod lifetime;
#[cfg(feature = "logging")]
pub mod logging;
mod pool;
mod provider;
mod proxy;
mod reference;
mod registration;
mod registry;
mod scope;
mod storage;
mod sync;

pub use arguments::*;
pub use cancellation::*;
pub use container::*;
pub use entry::{Entry, Visibility};
pub use error::*;
pub use factory::*;
pub use graph::*;
pub use injector::*;
pub use key::*;
pub use lifetime::*;
pub use pool::{BoundedPool, DEFAULT_POOL_CAPACITY, ObjectPool, PooledItem};
pub use provider::*;
pub use proxy::*;
pub use reference::*;
pub use registration::*;
pub use registry::*;
pub use scope::*;

#[cfg(feature = "derive")]
pub use injection_engine_derive::Inject;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Arguments, Constructor, Container, ContainerOptions, Descriptor, DiError, Injectable, Injector, Lazy,
        Lifetime, Resolver, Result, ServiceId,
    };
    #[cfg(feature = "derive")]
    pub use crate::Inject;
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use injection_engine_derive::Inject;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    // =========================================================================
    // Shared fixtures
    // =========================================================================

    #[derive(Default)]
    struct Database {
        url: String,
    }

    struct Cache;

    struct Metrics;

    trait Generic<T>: Send + Sync {
        fn value(&self) -> usize;
    }

    struct GenericFamily;

    impl<T: Send + Sync + 'static> Closed for dyn Generic<T> {
        fn definition() -> GenericDef {
            GenericDef::named::<GenericFamily>("Generic", 1)
        }
        fn type_args() -> Vec<ServiceType> {
            vec![ServiceType::of::<T>()]
        }
    }

    struct SizeOf<T>(std::marker::PhantomData<T>);

    impl<T: Send + Sync + 'static> Generic<T> for SizeOf<T> {
        fn value(&self) -> usize {
            std::mem::size_of::<T>()
        }
    }

    fn size_of_activator<T: Send + Sync + 'static>() -> Activator {
        Activator::factory(|_| Ok(Arc::new(SizeOf::<T>(std::marker::PhantomData)) as Arc<dyn Generic<T>>))
    }

    fn generic_descriptor(lifetime: Lifetime) -> Descriptor {
        Descriptor::open_generic(GenericDef::named::<GenericFamily>("Generic", 1), lifetime, |closed: &ServiceType| {
            let arg = &closed.type_args()[0];
            if *arg == ServiceType::of::<i32>() {
                Ok(size_of_activator::<i32>())
            } else if *arg == ServiceType::of::<u64>() {
                Ok(size_of_activator::<u64>())
            } else {
                Err(DiError::not_assignable(closed, "SizeOf"))
            }
        })
    }

    // =========================================================================
    // Lifetimes
    // =========================================================================

    #[test]
    fn test_singleton_uniqueness_from_descendants() {
        let root = Container::new();
        root.add(Descriptor::factory(Lifetime::Singleton, |_| Ok(Arc::new(Cache))))
            .unwrap();
        let child = root.child();
        let grandchild = child.child();

        let a = grandchild.injector().get::<Cache>().unwrap();
        let b = child.create_scope().get::<Cache>().unwrap();
        let c = root.injector().get::<Cache>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_singleton_in_child_owned_by_child() {
        static DISPOSED: AtomicU32 = AtomicU32::new(0);
        let root = Container::new();
        let child = root.child();
        child
            .add(
                Descriptor::factory(Lifetime::Singleton, |_| Ok(Arc::new(Metrics))).dispose_with::<Metrics, _>(|_| {
                    DISPOSED.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let scope = child.create_scope();
        scope.get::<Metrics>().unwrap();
        scope.dispose();
        assert_eq!(DISPOSED.load(Ordering::SeqCst), 0);
        child.dispose();
        assert_eq!(DISPOSED.load(Ordering::SeqCst), 1);
        assert!(!root.contains(&ServiceId::of::<Metrics>()));
    }

    #[test]
    fn test_instance_ownership() {
        static DISPOSED: AtomicU32 = AtomicU32::new(0);
        let owned = Container::new();
        owned
            .add(Descriptor::instance(Arc::new(Database::default())).dispose_with::<Database, _>(|_| {
                DISPOSED.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        owned.dispose();
        assert_eq!(DISPOSED.load(Ordering::SeqCst), 1);

        let external = Container::new();
        external
            .add(
                Descriptor::instance(Arc::new(Database::default()))
                    .externally_owned()
                    .dispose_with::<Database, _>(|_| {
                        DISPOSED.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();
        external.dispose();
        assert_eq!(DISPOSED.load(Ordering::SeqCst), 1);
    }

    // =========================================================================
    // Generic specialization
    // =========================================================================

    #[test]
    fn test_generic_specialization_idempotent() {
        let container = Container::new();
        container.add(generic_descriptor(Lifetime::Singleton)).unwrap();
        let injector = container.injector();

        let first = injector.get_generic::<dyn Generic<i32>>().unwrap();
        let second = injector.get_generic::<dyn Generic<i32>>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.value(), 4);
        assert_eq!(injector.get_generic::<dyn Generic<u64>>().unwrap().value(), 8);

        let id = ServiceId::closed::<dyn Generic<i32>>();
        let a = container.get(&id, LookupMode::DEFAULT).unwrap().unwrap();
        let b = container.get(&id, LookupMode::DEFAULT).unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_generic_transient_shares_entry_not_instance() {
        let container = Container::new();
        container.add(generic_descriptor(Lifetime::Transient)).unwrap();
        let injector = container.injector();
        let first = injector.get_generic::<dyn Generic<i32>>().unwrap();
        let second = injector.get_generic::<dyn Generic<i32>>().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_open_generic_requested_directly() {
        let container = Container::new();
        container.add(generic_descriptor(Lifetime::Singleton)).unwrap();
        let open = ServiceId::new(ServiceType::open(GenericDef::of::<GenericFamily>(1)), None);
        assert!(matches!(
            container.injector().resolve(&open),
            Err(DiError::CannotInstantiate { .. })
        ));
    }

    #[test]
    fn test_concurrent_specialization_runs_once() {
        static SPECIALIZED: AtomicU32 = AtomicU32::new(0);
        let container = Container::new();
        container
            .add(Descriptor::open_generic(
                GenericDef::named::<GenericFamily>("Generic", 1),
                Lifetime::Singleton,
                |_: &ServiceType| {
                    SPECIALIZED.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    Ok(size_of_activator::<i32>())
                },
            ))
            .unwrap();
        container.freeze(&CancellationToken::new()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scope = container.create_scope();
                std::thread::spawn(move || scope.get_generic::<dyn Generic<i32>>().unwrap())
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(SPECIALIZED.load(Ordering::SeqCst), 1);
    }

    // =========================================================================
    // Disposal
    // =========================================================================

    #[test]
    fn test_shared_dependency_disposed_once() {
        struct Left(#[allow(dead_code)] Arc<Database>);
        struct Right(#[allow(dead_code)] Arc<Database>);
        struct Top(#[allow(dead_code)] Arc<Left>, #[allow(dead_code)] Arc<Right>);

        let disposed = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&disposed);
        let root = Container::new();
        let scope = root.child();
        scope
            .add(
                Descriptor::factory(Lifetime::Scoped, |_| Ok(Arc::new(Database::default())))
                    .dispose_with::<Database, _>(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();
        scope
            .add(Descriptor::factory(Lifetime::Transient, |r| Ok(Arc::new(Left(r.get()?)))))
            .unwrap();
        scope
            .add(Descriptor::factory(Lifetime::Transient, |r| Ok(Arc::new(Right(r.get()?)))))
            .unwrap();
        scope
            .add(Descriptor::factory(Lifetime::Transient, |r| Ok(Arc::new(Top(r.get()?, r.get()?)))))
            .unwrap();

        scope.injector().get::<Top>().unwrap();
        scope.dispose();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scope_disposal_leaves_parent_intact() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let root = Container::new();
        let log = Arc::clone(&order);
        root.add(
            Descriptor::factory(Lifetime::Scoped, |_| Ok(Arc::new(Cache))).dispose_with::<Cache, _>(move |_| {
                log.lock().push("cache");
            }),
        )
        .unwrap();

        let root_injector = root.injector();
        root_injector.get::<Cache>().unwrap();
        let scope = root.create_scope();
        scope.get::<Cache>().unwrap();
        drop(scope);
        assert_eq!(*order.lock(), vec!["cache"]);

        root.dispose();
        assert_eq!(*order.lock(), vec!["cache", "cache"]);
    }

    // =========================================================================
    // Derive
    // =========================================================================

    #[derive(Inject)]
    struct UserService {
        #[inject]
        db: Arc<Database>,
        #[inject(optional)]
        cache: Option<Arc<Cache>>,
        #[inject(lazy)]
        metrics: Lazy<Metrics>,
        #[inject(name = "replica")]
        replica: Arc<Database>,
        requests: AtomicU32,
    }

    #[test]
    fn test_derived_constructor() {
        let constructors = UserService::constructors();
        assert_eq!(constructors.len(), 1);
        assert_eq!(
            constructors[0].dependencies(),
            &[
                Dependency::required::<Database>(),
                Dependency::optional::<Cache>(),
                Dependency::lazy::<Metrics>(),
                Dependency::required::<Database>().named("replica"),
            ]
        );
    }

    #[test]
    fn test_derived_resolution() {
        let container = Container::new();
        container
            .add(Descriptor::instance(Arc::new(Database {
                url: "postgres://primary".into(),
            })))
            .unwrap();
        container
            .add(
                Descriptor::instance(Arc::new(Database {
                    url: "postgres://replica".into(),
                }))
                .named("replica"),
            )
            .unwrap();
        container
            .add(Descriptor::factory(Lifetime::Singleton, |_| Ok(Arc::new(Metrics))))
            .unwrap();
        container.add(Descriptor::of::<UserService>(Lifetime::Scoped)).unwrap();

        let scope = container.create_scope();
        let users = scope.get::<UserService>().unwrap();
        assert_eq!(users.db.url, "postgres://primary");
        assert_eq!(users.replica.url, "postgres://replica");
        assert!(users.cache.is_none());
        assert!(!users.metrics.is_resolved());
        assert!(users.metrics.get().is_ok());
        assert_eq!(users.requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_derived_lazy_outlived_by_scope() {
        let container = Container::new();
        container.add(Descriptor::instance(Arc::new(Database::default()))).unwrap();
        container
            .add(Descriptor::instance(Arc::new(Database::default())).named("replica"))
            .unwrap();
        container
            .add(Descriptor::factory(Lifetime::Singleton, |_| Ok(Arc::new(Metrics))))
            .unwrap();
        container.add(Descriptor::of::<UserService>(Lifetime::Scoped)).unwrap();

        let users = {
            let scope = container.create_scope();
            scope.get::<UserService>().unwrap()
        };
        assert!(matches!(users.metrics.get(), Err(DiError::ParentDropped { .. })));
    }

    // =========================================================================
    // Diagnostics and configuration
    // =========================================================================

    #[test]
    fn test_error_chain_is_structured() {
        #[derive(Debug)]
        struct Handler;
        let container = Container::new();
        container
            .add(Descriptor::factory(Lifetime::Transient, |r| {
                r.get::<Database>()?;
                Ok(Arc::new(Handler))
            }))
            .unwrap();
        let err = container.injector().get::<Handler>().unwrap_err();
        let chain = err.chain().unwrap();
        assert_eq!(chain.ids(), &[ServiceId::of::<Handler>(), ServiceId::of::<Database>()]);
        assert_eq!(chain.to_string(), "Handler -> Database");
    }

    #[test]
    fn test_frozen_compiled_lookup_resolves() {
        let container = Container::with_options(ContainerOptions::new().lookup_threshold(0));
        container.add(Descriptor::instance(Arc::new(Database::default()))).unwrap();
        container.add(Descriptor::factory(Lifetime::Singleton, |_| Ok(Arc::new(Cache)))).unwrap();
        let registry = container.freeze(&CancellationToken::new()).unwrap();
        assert_eq!(registry.backend(), Backend::Compiled);

        let slot = registry.slot_of(&ServiceId::of::<Cache>()).unwrap();
        assert_eq!(registry.entry_at(slot).map(|e| e.id().clone()), Some(ServiceId::of::<Cache>()));
        assert!(container.create_scope().get::<Cache>().is_ok());
    }

    #[test]
    fn test_prelude_exports() {
        use crate::prelude::*;
        let container = Container::with_options(ContainerOptions::default());
        let _: Result<()> = container.add(Descriptor::instance(Arc::new(Cache)));
        assert_eq!(container.service_ids(), vec![ServiceId::of::<Cache>()]);
    }
}
