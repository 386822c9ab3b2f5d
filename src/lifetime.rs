//! Lifetime policies
//!
//! A closed set of policies deciding when an entry's activator runs, where the
//! produced reference is cached and who disposes it. Policies are plain enum
//! values; there is no process-wide policy registry to initialize.
//!
//! | Lifetime  | Instances                 | Cached on                         | Disposed when                  |
//! |-----------|---------------------------|-----------------------------------|--------------------------------|
//! | Transient | one per request           | nowhere (tracked per scope)       | released, or scope disposes    |
//! | Scoped    | one per scope             | the entry copy owned by the scope | scope disposes                 |
//! | Singleton | one per declaring container | the entry                       | declaring container disposes   |
//! | Pooled    | checked out per scope     | the scope copy; items in a pool   | item returns to the pool       |
//! | Instance  | supplied by the caller    | the entry, at registration        | container disposes, if owned   |
//! | Permanent | one per declaring container | the entry                       | declaring container disposes   |

use crate::entry::{Producer, Visibility};
use crate::pool;
use crate::registration::{Descriptor, Source};
use crate::{Container, DiError, Entry, Result, ServiceReference};
use std::fmt;
use std::sync::Arc;

/// Service lifetime policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "graph-export", derive(serde::Serialize, serde::Deserialize))]
pub enum Lifetime {
    /// New instance on every request
    #[default]
    Transient,
    /// One instance per scope
    Scoped,
    /// One instance per declaring container
    Singleton,
    /// Instances checked out of a pool, one checkout per scope
    Pooled,
    /// Caller-supplied instance
    Instance,
    /// Singleton-like, used for hidden infrastructure services
    Permanent,
}

impl Lifetime {
    /// Whether the instance may be handed to more than one requestor.
    #[inline]
    pub fn is_shared(self) -> bool {
        !matches!(self, Lifetime::Transient)
    }

    /// Whether each scope caches its own instance on a copy of the entry.
    #[inline]
    pub fn is_per_scope(self) -> bool {
        matches!(self, Lifetime::Scoped | Lifetime::Pooled)
    }

    /// Longevity rank used by strict ownership checks.
    ///
    /// A service may only depend on shared services of equal or higher rank.
    /// Pooled ranks with Singleton: its items are owned by the declaring container.
    #[inline]
    pub fn precedence(self) -> u8 {
        match self {
            Lifetime::Transient => 0,
            Lifetime::Scoped => 1,
            Lifetime::Singleton | Lifetime::Pooled => 3,
            Lifetime::Instance | Lifetime::Permanent => 4,
        }
    }

    /// Whether the activator may be wrapped by a proxy engine.
    #[inline]
    pub fn supports_decoration(self) -> bool {
        !matches!(self, Lifetime::Instance)
    }

    /// Whether `entry` may stand in for a placeholder declared with this lifetime.
    ///
    /// The replacement must live at least as long as the placeholder promised.
    #[inline]
    pub fn is_compatible(self, entry: &Entry) -> bool {
        entry.lifetime().precedence() >= self.precedence()
    }

    /// Build the entries for `descriptor`, owned by `owner`.
    ///
    /// Most lifetimes produce one entry; Pooled also produces its hidden
    /// companion factory and pool services, registered first.
    pub(crate) fn create_entries(self, descriptor: Descriptor, owner: &Container) -> Result<Vec<Arc<Entry>>> {
        let Descriptor {
            id,
            source,
            arguments,
            ownership,
            disposer,
            pool,
            ..
        } = descriptor;
        let open_interface = id.service_type().is_open();

        match source {
            Source::Invalid(err) => Err(err),
            Source::Abstract => {
                if self == Lifetime::Instance {
                    return Err(DiError::cannot_instantiate(&id, "instance registrations need a value"));
                }
                let entry = Entry::new(id, self, owner, Producer::Abstract, Visibility::Public, arguments);
                Ok(vec![Arc::new(entry)])
            }
            Source::Open(specializer) => {
                if !open_interface {
                    return Err(DiError::cannot_instantiate(
                        &id,
                        "specializers can only be registered for open generic definitions",
                    ));
                }
                if matches!(self, Lifetime::Instance | Lifetime::Pooled) {
                    return Err(DiError::cannot_instantiate(
                        &id,
                        "open generic definitions cannot be instance or pooled registrations",
                    ));
                }
                let entry = Entry::new(id, self, owner, Producer::Open(specializer), Visibility::Public, arguments);
                Ok(vec![Arc::new(entry)])
            }
            _ if open_interface => Err(DiError::cannot_instantiate(
                &id,
                "open generic definitions need a specializer",
            )),
            Source::Instance(value) => {
                if self != Lifetime::Instance {
                    return Err(DiError::cannot_instantiate(&id, "supplied values require the Instance lifetime"));
                }
                if !id.service_type().accepts(&value) {
                    return Err(DiError::not_assignable(&id, "supplied instance"));
                }
                let reference = ServiceReference::with_value(id.clone(), owner.scope_id(), ownership, disposer, value);
                Ok(vec![Arc::new(Entry::supplied(id, owner, reference))])
            }
            Source::Activator(activator) => {
                if let (Some(produced), Some(expected)) = (activator.produces(), id.service_type().holder()) {
                    if produced != expected {
                        return Err(DiError::not_assignable(&id, activator.target()));
                    }
                }
                let activator = match disposer {
                    Some(disposer) => activator.with_disposer(disposer),
                    None => activator,
                };
                match self {
                    Lifetime::Instance => Err(DiError::cannot_instantiate(&id, "instance registrations need a value")),
                    Lifetime::Pooled => pool::companion_entries(id, activator, pool, arguments, owner),
                    _ => {
                        let producer = Producer::Activator(activator);
                        Ok(vec![Arc::new(Entry::new(id, self, owner, producer, Visibility::Public, arguments))])
                    }
                }
            }
        }
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifetime::Transient => "transient",
            Lifetime::Scoped => "scoped",
            Lifetime::Singleton => "singleton",
            Lifetime::Pooled => "pooled",
            Lifetime::Instance => "instance",
            Lifetime::Permanent => "permanent",
        };
        f.write_str(name)
    }
}
