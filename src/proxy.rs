//! Decoration through a proxy collaborator
//!
//! The engine never generates wrapper code. [`Container::decorate`](crate::Container::decorate)
//! hands an entry's activator and a list of interceptor factories to the configured
//! [`ProxyEngine`], which returns an activator building the decorated instance.

use crate::{Activator, DiError, Instance, Resolver, Result, ServiceType, downcast, erase};
use std::fmt;
use std::sync::Arc;

/// Builds one interceptor for one decorated instance.
pub type InterceptorFactory = Arc<dyn Fn(&mut Resolver<'_>) -> Result<Instance> + Send + Sync>;

/// Wrap a typed interceptor constructor into an [`InterceptorFactory`].
pub fn interceptor<I, F>(factory: F) -> InterceptorFactory
where
    I: ?Sized + Send + Sync + 'static,
    F: Fn(&mut Resolver<'_>) -> Result<Arc<I>> + Send + Sync + 'static,
{
    Arc::new(move |resolver: &mut Resolver<'_>| factory(resolver).map(erase))
}

/// Produces decorating activators.
pub trait ProxyEngine: Send + Sync + 'static {
    /// An activator that builds `target`'s instance and wraps it for `interface`.
    fn wrap(&self, interface: &ServiceType, target: Activator, interceptors: &[InterceptorFactory]) -> Result<Activator>;
}

type WrapFn = dyn Fn(&ServiceType, Instance, Vec<Instance>) -> Result<Instance> + Send + Sync;

/// A proxy engine backed by a hand-written decorator function.
///
/// The function receives the interface, the undecorated instance and the built
/// interceptors, in registration order.
///
/// # Examples
///
/// ```rust
/// use injection_engine::{
///     Container, ContainerOptions, Descriptor, FnProxyEngine, Lifetime, ServiceId, downcast, erase,
/// };
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync { fn greet(&self) -> String; }
/// struct Plain;
/// impl Greeter for Plain { fn greet(&self) -> String { "hi".into() } }
/// struct Loud(Arc<dyn Greeter>);
/// impl Greeter for Loud { fn greet(&self) -> String { self.0.greet().to_uppercase() } }
///
/// let engine = FnProxyEngine::new(|_, inner, _| {
///     let inner = downcast::<dyn Greeter>(&inner).unwrap();
///     Ok(erase(Arc::new(Loud(inner)) as Arc<dyn Greeter>))
/// });
/// let container = Container::with_options(ContainerOptions::new().proxy_engine(Arc::new(engine)));
/// container.add(Descriptor::factory(Lifetime::Singleton, |_| Ok(Arc::new(Plain) as Arc<dyn Greeter>))).unwrap();
/// container.decorate(&ServiceId::of::<dyn Greeter>(), Vec::new()).unwrap();
///
/// assert_eq!(container.injector().get::<dyn Greeter>().unwrap().greet(), "HI");
/// ```
pub struct FnProxyEngine {
    wrap: Arc<WrapFn>,
}

impl FnProxyEngine {
    pub fn new<F>(wrap: F) -> Self
    where
        F: Fn(&ServiceType, Instance, Vec<Instance>) -> Result<Instance> + Send + Sync + 'static,
    {
        Self { wrap: Arc::new(wrap) }
    }
}

impl ProxyEngine for FnProxyEngine {
    fn wrap(&self, interface: &ServiceType, target: Activator, interceptors: &[InterceptorFactory]) -> Result<Activator> {
        let wrap = Arc::clone(&self.wrap);
        let interface = interface.clone();
        let interceptors: Vec<InterceptorFactory> = interceptors.to_vec();
        let inner = target.clone();

        let activator = Activator::new(target.target().clone(), target.dependencies().to_vec(), move |resolver| {
            let instance = inner.activate(resolver)?;
            let built = interceptors
                .iter()
                .map(|factory| factory(resolver))
                .collect::<Result<Vec<_>>>()?;
            wrap(&interface, instance, built)
        });
        Ok(match target.disposer() {
            Some(disposer) => activator.with_disposer(Arc::clone(disposer)),
            None => activator,
        })
    }
}

impl fmt::Debug for FnProxyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProxyEngine").finish_non_exhaustive()
    }
}

/// Recover a typed interceptor inside a wrap function.
pub fn interceptor_as<I: ?Sized + Send + Sync + 'static>(instance: &Instance) -> Result<Arc<I>> {
    downcast::<I>(instance).ok_or_else(|| DiError::not_assignable(std::any::type_name::<I>(), "interceptor"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Container, ContainerOptions, Descriptor, Lifetime, ServiceId};
    use parking_lot::Mutex;

    trait Store: Send + Sync {
        fn put(&self, key: &str) -> String;
    }

    struct Memory;

    impl Store for Memory {
        fn put(&self, key: &str) -> String {
            format!("stored {key}")
        }
    }

    struct Audit {
        log: Mutex<Vec<String>>,
    }

    struct Audited {
        inner: Arc<dyn Store>,
        audit: Arc<Audit>,
    }

    impl Store for Audited {
        fn put(&self, key: &str) -> String {
            self.audit.log.lock().push(key.to_string());
            self.inner.put(key)
        }
    }

    fn audit_engine() -> Arc<dyn ProxyEngine> {
        Arc::new(FnProxyEngine::new(|_, inner, interceptors| {
            let inner = interceptor_as::<dyn Store>(&inner)?;
            let audit = interceptor_as::<Audit>(&interceptors[0])?;
            Ok(erase(Arc::new(Audited { inner, audit }) as Arc<dyn Store>))
        }))
    }

    #[test]
    fn test_decorated_resolution() {
        let container = Container::with_options(ContainerOptions::new().proxy_engine(audit_engine()));
        container
            .add(Descriptor::instance(Arc::new(Audit {
                log: Mutex::new(Vec::new()),
            })))
            .unwrap();
        container
            .add(Descriptor::factory(Lifetime::Singleton, |_| Ok(Arc::new(Memory) as Arc<dyn Store>)))
            .unwrap();
        container
            .decorate(&ServiceId::of::<dyn Store>(), vec![interceptor(|r| r.get::<Audit>())])
            .unwrap();

        let injector = container.injector();
        assert_eq!(injector.get::<dyn Store>().unwrap().put("a"), "stored a");
        assert_eq!(*injector.get::<Audit>().unwrap().log.lock(), vec!["a".to_string()]);
    }

    #[test]
    fn test_decoration_requires_engine() {
        let container = Container::new();
        container
            .add(Descriptor::factory(Lifetime::Singleton, |_| Ok(Arc::new(Memory) as Arc<dyn Store>)))
            .unwrap();
        let id = ServiceId::of::<dyn Store>();
        assert!(matches!(container.decorate(&id, Vec::new()), Err(DiError::NoProxyEngine { .. })));
        // Plain resolution is unaffected
        assert!(container.injector().get::<dyn Store>().is_ok());
    }

    #[test]
    fn test_decoration_rejected_after_build_or_lock() {
        let container = Container::with_options(ContainerOptions::new().proxy_engine(audit_engine()));
        container
            .add(Descriptor::factory(Lifetime::Singleton, |_| Ok(Arc::new(Memory) as Arc<dyn Store>)))
            .unwrap();
        let id = ServiceId::of::<dyn Store>();
        container.injector().get::<dyn Store>().unwrap();
        assert!(matches!(container.decorate(&id, Vec::new()), Err(DiError::CannotInstantiate { .. })));

        container.lock();
        assert!(matches!(container.decorate(&id, Vec::new()), Err(DiError::Locked)));
    }

    #[test]
    fn test_inherited_entries_not_decorated() {
        let root = Container::with_options(ContainerOptions::new().proxy_engine(audit_engine()));
        root.add(Descriptor::factory(Lifetime::Singleton, |_| Ok(Arc::new(Memory) as Arc<dyn Store>)))
            .unwrap();
        let child = root.child();
        assert!(matches!(
            child.decorate(&ServiceId::of::<dyn Store>(), Vec::new()),
            Err(DiError::CannotInstantiate { .. })
        ));
    }
}
