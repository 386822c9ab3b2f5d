#![no_main]

//! Fuzz target for registration and resolution
//!
//! Registers named services under random lifetimes, resolves them through the
//! hashed table and the frozen registry, and checks sharing and error kinds.

use arbitrary::Arbitrary;
use injection_engine::{
    CancellationToken, Container, ContainerOptions, Descriptor, DiError, Lifetime, ServiceId, downcast,
};
use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;
use std::sync::Arc;

const NAMES: usize = 8;

#[derive(Debug)]
struct Payload {
    #[allow(dead_code)]
    value: u32,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum FuzzLifetime {
    Transient,
    Scoped,
    Singleton,
    Instance,
}

impl From<FuzzLifetime> for Lifetime {
    fn from(lifetime: FuzzLifetime) -> Self {
        match lifetime {
            FuzzLifetime::Transient => Lifetime::Transient,
            FuzzLifetime::Scoped => Lifetime::Scoped,
            FuzzLifetime::Singleton => Lifetime::Singleton,
            FuzzLifetime::Instance => Lifetime::Instance,
        }
    }
}

/// Operations to perform on the container
#[derive(Debug, Arbitrary)]
enum ContainerOp {
    Register { slot: u8, lifetime: FuzzLifetime, value: u32 },
    Resolve { slot: u8 },
    TryResolve { slot: u8 },
    Contains { slot: u8 },
    Lock,
    Freeze,
    Len,
}

#[derive(Debug, Arbitrary)]
struct Input {
    lookup_threshold: u8,
    ops: Vec<ContainerOp>,
}

fn name(slot: u8) -> String {
    format!("svc-{}", slot as usize % NAMES)
}

fuzz_target!(|input: Input| {
    let container =
        Container::with_options(ContainerOptions::new().lookup_threshold(input.lookup_threshold as usize));
    let injector = container.injector();

    let mut registered: HashMap<String, Lifetime> = HashMap::new();
    let mut resolved: HashMap<String, Arc<Payload>> = HashMap::new();

    for op in input.ops {
        match op {
            ContainerOp::Register { slot, lifetime, value } => {
                let name = name(slot);
                let lifetime = Lifetime::from(lifetime);
                let descriptor = match lifetime {
                    Lifetime::Instance => Descriptor::instance(Arc::new(Payload { value })),
                    _ => Descriptor::factory(lifetime, move |_| Ok(Arc::new(Payload { value }))),
                }
                .named(&name);

                match container.add(descriptor) {
                    Ok(()) => {
                        assert!(!container.is_locked());
                        assert!(registered.insert(name, lifetime).is_none());
                    }
                    Err(DiError::Locked) => assert!(container.is_locked()),
                    Err(DiError::AlreadyRegistered { .. }) => assert!(registered.contains_key(&name)),
                    Err(other) => panic!("unexpected registration error: {other}"),
                }
            }
            ContainerOp::Resolve { slot } => {
                let name = name(slot);
                match (injector.get_named::<Payload>(&name), registered.get(&name)) {
                    (Ok(payload), Some(lifetime)) => {
                        if lifetime.is_shared() {
                            if let Some(previous) = resolved.get(&name) {
                                assert!(Arc::ptr_eq(previous, &payload));
                            }
                            resolved.insert(name, payload);
                        } else {
                            assert!(injector.release(&payload));
                        }
                    }
                    (Err(DiError::ServiceNotFound { service, .. }), None) => {
                        assert_eq!(service, ServiceId::named::<Payload>(name));
                    }
                    (result, expected) => panic!("resolution mismatch: {result:?} vs {expected:?}"),
                }
            }
            ContainerOp::TryResolve { slot } => {
                let name = name(slot);
                let id = ServiceId::named::<Payload>(name.clone());
                let found = injector.resolve(&id).ok();
                assert_eq!(found.is_some(), registered.contains_key(&name));
                if registered.get(&name) == Some(&Lifetime::Transient) {
                    let payload = found.as_ref().and_then(downcast::<Payload>);
                    assert!(payload.is_some_and(|payload| injector.release(&payload)));
                }
            }
            ContainerOp::Contains { slot } => {
                let name = name(slot);
                assert_eq!(
                    container.contains(&ServiceId::named::<Payload>(name.clone())),
                    registered.contains_key(&name)
                );
            }
            ContainerOp::Lock => container.lock(),
            ContainerOp::Freeze => {
                let registry = container.freeze(&CancellationToken::new()).unwrap();
                assert_eq!(registry.len(), registered.len());
                assert!(container.is_locked());
            }
            ContainerOp::Len => assert_eq!(container.len(), registered.len()),
        }
    }

    container.dispose();
    assert!(container.is_disposed());
});
