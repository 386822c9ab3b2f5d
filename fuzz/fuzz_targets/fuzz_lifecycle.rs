#![no_main]

//! Fuzz target for scope lifecycle and disposal
//!
//! Builds a random tree of scopes, resolves singleton, scoped and transient
//! services in them, releases and disposes in random order, and checks that
//! every instance the engine created is disposed exactly once.

use arbitrary::Arbitrary;
use injection_engine::{Container, Descriptor, DiError, Injector, Lifetime};
use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Tracker {
    next: AtomicU64,
    disposed: Mutex<HashSet<u64>>,
}

impl Tracker {
    fn create(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    fn dispose(&self, id: u64) {
        let fresh = self.disposed.lock().unwrap().insert(id);
        assert!(fresh, "instance {id} disposed twice");
    }

    fn is_disposed(&self, id: u64) -> bool {
        self.disposed.lock().unwrap().contains(&id)
    }
}

struct Shared {
    id: u64,
}

struct PerScope {
    id: u64,
}

struct Work {
    id: u64,
    _scope: Arc<PerScope>,
    _shared: Arc<Shared>,
}

/// Lifecycle operations
#[derive(Debug, Arbitrary)]
enum LifecycleOp {
    CreateScope { parent: Option<u8> },
    ResolveShared { scope: u8 },
    ResolvePerScope { scope: u8 },
    ResolveWork { scope: u8 },
    ReleaseWork { scope: u8 },
    DisposeScope { scope: u8 },
}

struct ScopeState {
    injector: Injector,
    disposed: bool,
    per_scope: Option<u64>,
    work: Vec<Arc<Work>>,
}

fn register(container: &Container, tracker: &Arc<Tracker>) {
    let (create, dispose) = (Arc::clone(tracker), Arc::clone(tracker));
    container
        .add(
            Descriptor::factory(Lifetime::Singleton, move |_| Ok(Arc::new(Shared { id: create.create() })))
                .dispose_with::<Shared, _>(move |s| dispose.dispose(s.id)),
        )
        .unwrap();

    let (create, dispose) = (Arc::clone(tracker), Arc::clone(tracker));
    container
        .add(
            Descriptor::factory(Lifetime::Scoped, move |_| Ok(Arc::new(PerScope { id: create.create() })))
                .dispose_with::<PerScope, _>(move |s| dispose.dispose(s.id)),
        )
        .unwrap();

    let (create, dispose) = (Arc::clone(tracker), Arc::clone(tracker));
    container
        .add(
            Descriptor::factory(Lifetime::Transient, move |r| {
                Ok(Arc::new(Work {
                    id: create.create(),
                    _scope: r.get()?,
                    _shared: r.get()?,
                }))
            })
            .dispose_with::<Work, _>(move |w| dispose.dispose(w.id)),
        )
        .unwrap();
}

fn pick(scopes: &mut [ScopeState], index: u8) -> Option<&mut ScopeState> {
    if scopes.is_empty() {
        return None;
    }
    let len = scopes.len();
    scopes.get_mut(index as usize % len)
}

fuzz_target!(|ops: Vec<LifecycleOp>| {
    let tracker = Arc::new(Tracker::default());
    let root = Container::new();
    register(&root, &tracker);

    let mut scopes: Vec<ScopeState> = Vec::new();
    let mut shared: Option<u64> = None;

    for op in ops.into_iter().take(256) {
        match op {
            LifecycleOp::CreateScope { parent } => {
                let injector = match parent.and_then(|p| pick(&mut scopes, p)) {
                    Some(state) if !state.disposed => state.injector.scope(),
                    _ => root.create_scope(),
                };
                scopes.push(ScopeState {
                    injector,
                    disposed: false,
                    per_scope: None,
                    work: Vec::new(),
                });
            }
            LifecycleOp::ResolveShared { scope } => {
                let Some(state) = pick(&mut scopes, scope) else { continue };
                match state.injector.get::<Shared>() {
                    Ok(value) => {
                        assert!(!state.disposed);
                        assert_eq!(*shared.get_or_insert(value.id), value.id);
                    }
                    Err(DiError::Disposed { .. }) => assert!(state.disposed),
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            LifecycleOp::ResolvePerScope { scope } => {
                let Some(state) = pick(&mut scopes, scope) else { continue };
                match state.injector.get::<PerScope>() {
                    Ok(value) => {
                        assert!(!state.disposed);
                        assert_eq!(*state.per_scope.get_or_insert(value.id), value.id);
                    }
                    Err(DiError::Disposed { .. }) => assert!(state.disposed),
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            LifecycleOp::ResolveWork { scope } => {
                let Some(state) = pick(&mut scopes, scope) else { continue };
                match state.injector.get::<Work>() {
                    Ok(work) => {
                        assert!(!state.disposed);
                        state.work.push(work);
                    }
                    Err(DiError::Disposed { .. }) => assert!(state.disposed),
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            LifecycleOp::ReleaseWork { scope } => {
                let Some(state) = pick(&mut scopes, scope) else { continue };
                if let Some(work) = state.work.pop() {
                    let released = state.injector.release(&work);
                    assert_eq!(released, !state.disposed);
                    assert!(tracker.is_disposed(work.id));
                }
            }
            LifecycleOp::DisposeScope { scope } => {
                let Some(state) = pick(&mut scopes, scope) else { continue };
                state.injector.dispose();
                state.disposed = true;
                for work in &state.work {
                    assert!(tracker.is_disposed(work.id));
                }
                if let Some(id) = state.per_scope {
                    assert!(tracker.is_disposed(id));
                }
            }
        }
    }

    for state in scopes.iter().rev() {
        state.injector.dispose();
    }
    if let Some(id) = shared {
        assert!(!tracker.is_disposed(id));
    }
    root.dispose();

    let created = tracker.next.load(Ordering::SeqCst);
    assert_eq!(tracker.disposed.lock().unwrap().len() as u64, created);
});
