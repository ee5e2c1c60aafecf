//! Resource routers: interceptors which can rewrite or deny a name before it is looked up.
use std::cell::Cell;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};

/// What the routed name is about to be used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteKind {
    CheckExists,
    GetFile,
}

pub trait ResourceRouter: Send + Sync {
    /// Rewrite `name` in place, or clear it to deny the request.
    fn route(&self, name: &mut String, kind: RouteKind);
}

/// Ends the pass, even if a router panics.
struct EndPassOnDrop<'a>(&'a Cell<bool>);

impl Drop for EndPassOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// An ordered chain of routers.
///
/// One routing pass runs at a time.  A request made from inside a router, on the thread running the pass, sees the
/// name unrouted instead of recursing.  Requests from other threads wait for the pass to end and are then routed
/// normally.
#[derive(Default)]
pub struct RouterChain {
    routers: RwLock<Vec<Arc<dyn ResourceRouter>>>,
    /// Held for the whole pass; the flag is set while the owning thread is inside it.
    pass: ReentrantMutex<Cell<bool>>,
}

impl RouterChain {
    pub fn new() -> RouterChain {
        Default::default()
    }

    pub fn add(&self, router: Arc<dyn ResourceRouter>, add_first: bool) {
        let mut routers = self.routers.write();
        if add_first {
            routers.insert(0, router);
        } else {
            routers.push(router);
        }
    }

    /// Remove a router, identified by pointer.  Returns whether it was present.
    pub fn remove(&self, router: &Arc<dyn ResourceRouter>) -> bool {
        let mut routers = self.routers.write();
        let before = routers.len();
        routers.retain(|r| !Arc::ptr_eq(r, router));
        routers.len() != before
    }

    pub fn len(&self) -> usize {
        self.routers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `name` through every router in order.  Returns `None` if a router denied it.
    pub fn route(&self, name: String, kind: RouteKind) -> Option<String> {
        let pass = self.pass.lock();
        if pass.get() {
            tracing::trace!("Skipping nested routing of {}", name);
            return Some(name);
        }
        pass.set(true);
        let _end = EndPassOnDrop(&pass);

        // Snapshot, so routers may add or remove routers without deadlocking.
        let routers = self.routers.read().clone();
        let mut name = name;
        for r in routers.iter() {
            r.route(&mut name, kind);
            if name.is_empty() {
                break;
            }
        }

        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}
