//! Error types for dependency resolution

use crate::{Lifetime, ScopeId, ServiceId};
use std::fmt;
use thiserror::Error;

/// Ordered identities of an in-flight request, root first.
///
/// Rendered as `A -> B -> A`; hosts that need structure use [`RequestChain::ids`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestChain(Vec<ServiceId>);

impl RequestChain {
    /// Create a chain from identities ordered root first.
    #[inline]
    pub fn new(ids: Vec<ServiceId>) -> Self {
        Self(ids)
    }

    /// A chain consisting only of the given identity.
    #[inline]
    pub fn single(id: &ServiceId) -> Self {
        Self(vec![id.clone()])
    }

    /// The identities, root first.
    #[inline]
    pub fn ids(&self) -> &[ServiceId] {
        &self.0
    }

    /// The root request.
    #[inline]
    pub fn first(&self) -> Option<&ServiceId> {
        self.0.first()
    }

    /// The identity that failed.
    #[inline]
    pub fn last(&self) -> Option<&ServiceId> {
        self.0.last()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RequestChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// Errors that can occur while registering or resolving services
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// No entry exists for the identity
    #[error("Service not found: {service} (request: {chain})")]
    ServiceNotFound {
        service: ServiceId,
        chain: RequestChain,
    },

    /// The identity reappeared in the active request path
    #[error("Circular reference detected: {chain}")]
    CircularReference { chain: RequestChain },

    /// A shorter-lived service was requested by a longer-lived one
    #[error("Request not allowed: {requested} cannot be injected into {requestor} (request: {chain})")]
    RequestNotAllowed {
        requestor: ServiceId,
        requested: ServiceId,
        chain: RequestChain,
    },

    /// Implementation exposes zero or several constructors and none is uniquely preferred
    #[error("{implementation} must expose exactly one constructor or one preferred constructor, found {found}")]
    MultipleConstructors {
        implementation: &'static str,
        found: usize,
    },

    /// Implementation or instance does not produce the declared interface
    #[error("{implementation} is not assignable to {interface}{}", request_suffix(.chain))]
    NotAssignable {
        interface: String,
        implementation: String,
        chain: RequestChain,
    },

    /// Entry cannot produce an instance
    #[error("Cannot instantiate {service}: {reason}{}", request_suffix(.chain))]
    CannotInstantiate {
        service: ServiceId,
        reason: &'static str,
        chain: RequestChain,
    },

    /// Attempted to register a duplicate identity
    #[error("Service already registered: {service}")]
    AlreadyRegistered { service: ServiceId },

    /// An abstract placeholder was overridden with a shorter lifetime
    #[error("Cannot override {service}: placeholder declared {expected}, registration is {found}")]
    IncompatibleLifetime {
        service: ServiceId,
        expected: Lifetime,
        found: Lifetime,
    },

    /// Factory failed to create service
    #[error("Failed to create service{}: {reason}", service_suffix(.service, .chain))]
    CreationFailed {
        service: Option<ServiceId>,
        reason: String,
        chain: RequestChain,
    },

    /// A scope tracked more transient references than its configured ceiling
    #[error("Transient limit of {limit} exceeded in {scope} while creating {service}{}", request_suffix(.chain))]
    TransientLimitExceeded {
        service: ServiceId,
        limit: usize,
        scope: ScopeId,
        chain: RequestChain,
    },

    /// A reference value was written twice
    #[error("Reference for {service} already holds a value{}", request_suffix(.chain))]
    ValueAlreadySet { service: ServiceId, chain: RequestChain },

    /// Container is locked and cannot be modified
    #[error("Container is locked - cannot register new services")]
    Locked,

    /// Container or injector was disposed
    #[error("{scope} has been disposed{}", request_suffix(.chain))]
    Disposed { scope: ScopeId, chain: RequestChain },

    /// The container that declared an entry was dropped
    #[error("Owning container has been dropped{}", request_suffix(.chain))]
    ParentDropped { chain: RequestChain },

    /// Registry construction was cancelled
    #[error("Registry build cancelled")]
    Cancelled,

    /// Decoration requested without a proxy engine
    #[error("No proxy engine configured to decorate {service}")]
    NoProxyEngine { service: ServiceId },

    /// Internal error
    #[error("Internal DI error: {0}")]
    Internal(String),
}

fn service_suffix(service: &Option<ServiceId>, chain: &RequestChain) -> String {
    match service {
        Some(service) if chain.is_empty() => format!(" {service}"),
        Some(service) => format!(" {service} (request: {chain})"),
        None => String::new(),
    }
}

fn request_suffix(chain: &RequestChain) -> String {
    if chain.is_empty() {
        String::new()
    } else {
        format!(" (request: {chain})")
    }
}

impl DiError {
    /// Failure reported by a factory; the injector attaches identity and chain.
    #[inline]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            service: None,
            reason: reason.into(),
            chain: RequestChain::default(),
        }
    }

    /// Create a CannotInstantiate error
    #[inline]
    pub fn cannot_instantiate(service: &ServiceId, reason: &'static str) -> Self {
        Self::CannotInstantiate {
            service: service.clone(),
            reason,
            chain: RequestChain::default(),
        }
    }

    /// Create an AlreadyRegistered error
    #[inline]
    pub fn already_registered(service: &ServiceId) -> Self {
        Self::AlreadyRegistered {
            service: service.clone(),
        }
    }

    /// Create a NotAssignable error
    #[inline]
    pub fn not_assignable(interface: impl fmt::Display, implementation: impl fmt::Display) -> Self {
        Self::NotAssignable {
            interface: interface.to_string(),
            implementation: implementation.to_string(),
            chain: RequestChain::default(),
        }
    }

    /// Create a Disposed error
    #[inline]
    pub fn disposed(scope: ScopeId) -> Self {
        Self::Disposed {
            scope,
            chain: RequestChain::default(),
        }
    }

    /// Create a ParentDropped error
    #[inline]
    pub fn parent_dropped() -> Self {
        Self::ParentDropped {
            chain: RequestChain::default(),
        }
    }

    /// The request chain carried by this error, if any.
    ///
    /// Errors raised while resolving always carry one; registration errors do not.
    pub fn chain(&self) -> Option<&RequestChain> {
        let chain = match self {
            Self::ServiceNotFound { chain, .. }
            | Self::CircularReference { chain }
            | Self::RequestNotAllowed { chain, .. }
            | Self::NotAssignable { chain, .. }
            | Self::CannotInstantiate { chain, .. }
            | Self::CreationFailed { chain, .. }
            | Self::TransientLimitExceeded { chain, .. }
            | Self::ValueAlreadySet { chain, .. }
            | Self::Disposed { chain, .. }
            | Self::ParentDropped { chain } => chain,
            _ => return None,
        };
        (!chain.is_empty()).then_some(chain)
    }

    fn chain_slot_mut(&mut self) -> Option<&mut RequestChain> {
        match self {
            Self::ServiceNotFound { chain, .. }
            | Self::CircularReference { chain }
            | Self::RequestNotAllowed { chain, .. }
            | Self::NotAssignable { chain, .. }
            | Self::CannotInstantiate { chain, .. }
            | Self::CreationFailed { chain, .. }
            | Self::TransientLimitExceeded { chain, .. }
            | Self::ValueAlreadySet { chain, .. }
            | Self::Disposed { chain, .. }
            | Self::ParentDropped { chain } => Some(chain),
            _ => None,
        }
    }

    /// Attach the request chain to an error raised while resolving `service`.
    ///
    /// The innermost request to see an error fills its chain; outer requests leave it
    /// alone. A factory failure also records `service` as the failing identity.
    pub(crate) fn within(mut self, chain: impl FnOnce() -> RequestChain, service: &ServiceId) -> Self {
        if let Self::CreationFailed { service: slot @ None, .. } = &mut self {
            *slot = Some(service.clone());
        }
        if let Some(slot) = self.chain_slot_mut() {
            if slot.is_empty() {
                *slot = chain();
            }
        }
        self
    }
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Alpha;
    struct Beta;

    #[test]
    fn test_chain_display() {
        let chain = RequestChain::new(vec![
            ServiceId::of::<Alpha>(),
            ServiceId::of::<Beta>(),
            ServiceId::of::<Alpha>(),
        ]);
        assert_eq!(chain.to_string(), "Alpha -> Beta -> Alpha");
        assert_eq!(chain.first(), Some(&ServiceId::of::<Alpha>()));
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_named_identity_in_chain() {
        let chain = RequestChain::new(vec![ServiceId::named::<Alpha>("primary")]);
        assert_eq!(chain.to_string(), "Alpha(\"primary\")");
    }

    #[test]
    fn test_failed_is_annotated_once() {
        let service = ServiceId::of::<Alpha>();
        let err = DiError::failed("boom").within(|| RequestChain::single(&service), &service);
        match &err {
            DiError::CreationFailed { service: Some(s), chain, .. } => {
                assert_eq!(s, &service);
                assert_eq!(chain.len(), 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("boom"));

        let other = ServiceId::of::<Beta>();
        let again = err.within(RequestChain::default, &other);
        assert!(matches!(again, DiError::CreationFailed { service: Some(s), .. } if s == service));
    }

    #[test]
    fn test_chain_accessor() {
        let err = DiError::CircularReference {
            chain: RequestChain::single(&ServiceId::of::<Alpha>()),
        };
        assert_eq!(err.chain().map(RequestChain::len), Some(1));
        assert!(DiError::Locked.chain().is_none());
        // Registration-time errors have no request
        assert!(DiError::not_assignable("Store", "Memory").chain().is_none());
    }

    #[test]
    fn test_within_fills_empty_chain_only() {
        let inner = ServiceId::of::<Beta>();
        let outer = ServiceId::of::<Alpha>();
        let err = DiError::cannot_instantiate(&inner, "abstract placeholder was never overridden")
            .within(|| RequestChain::new(vec![outer.clone(), inner.clone()]), &inner)
            .within(|| RequestChain::single(&outer), &outer);
        assert_eq!(err.chain().map(RequestChain::ids), Some(&[outer.clone(), inner][..]));
        assert!(err.to_string().ends_with("(request: Alpha -> Beta)"));

        let disposed = DiError::disposed(ScopeId::next()).within(|| RequestChain::single(&outer), &outer);
        assert_eq!(disposed.chain().map(RequestChain::len), Some(1));
    }
}
