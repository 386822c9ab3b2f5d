//! Explicit-argument overrides
//!
//! Arguments supply ready-made instances for dependency identities. Attached to a
//! registration they override that entry's dependencies; passed at resolution time
//! they override the direct dependencies of the root request only.

use crate::{Instance, ServiceId, erase};
use ahash::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Instances keyed by the dependency identity they replace.
///
/// # Examples
///
/// ```rust
/// use injection_engine::{Arguments, ServiceId};
/// use std::sync::Arc;
///
/// struct Config { port: u16 }
///
/// let args = Arguments::new().with(Arc::new(Config { port: 8080 }));
/// assert!(args.contains(&ServiceId::of::<Config>()));
/// ```
#[derive(Clone, Default)]
pub struct Arguments {
    values: HashMap<ServiceId, Instance, RandomState>,
}

impl Arguments {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply the unnamed `T` dependency.
    pub fn with<T: ?Sized + Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
        self.values.insert(ServiceId::of::<T>(), erase(value));
        self
    }

    /// Supply the `T` dependency registered under `name`.
    pub fn with_named<T: ?Sized + Send + Sync + 'static>(mut self, name: &str, value: Arc<T>) -> Self {
        self.values.insert(ServiceId::named::<T>(name), erase(value));
        self
    }

    /// Supply an already erased instance.
    pub fn insert(&mut self, id: ServiceId, value: Instance) {
        self.values.insert(id, value);
    }

    #[inline]
    pub fn get(&self, id: &ServiceId) -> Option<&Instance> {
        self.values.get(id)
    }

    #[inline]
    pub fn contains(&self, id: &ServiceId) -> bool {
        self.values.contains_key(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Combine two argument sets; `overrides` wins on conflicts.
    pub(crate) fn merge(base: Option<&Arguments>, overrides: Option<Arguments>) -> Option<Arguments> {
        match (base, overrides) {
            (None, overrides) => overrides,
            (Some(base), None) => Some(base.clone()),
            (Some(base), Some(overrides)) => {
                let mut merged = base.clone();
                merged.values.extend(overrides.values);
                Some(merged)
            }
        }
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downcast;

    struct Port(u16);

    #[test]
    fn test_named_and_unnamed_are_distinct() {
        let args = Arguments::new()
            .with(Arc::new(Port(1)))
            .with_named("admin", Arc::new(Port(2)));
        assert_eq!(args.len(), 2);
        let admin = args.get(&ServiceId::named::<Port>("admin")).unwrap();
        assert_eq!(downcast::<Port>(admin).unwrap().0, 2);
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let base = Arguments::new().with(Arc::new(Port(1)));
        let overrides = Arguments::new().with(Arc::new(Port(9)));

        let merged = Arguments::merge(Some(&base), Some(overrides)).unwrap();
        let port = merged.get(&ServiceId::of::<Port>()).unwrap();
        assert_eq!(downcast::<Port>(port).unwrap().0, 9);

        assert!(Arguments::merge(None, None).is_none());
        assert_eq!(Arguments::merge(Some(&base), None).unwrap().len(), 1);
    }
}
