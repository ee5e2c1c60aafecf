//! Traits for the pieces the cache is assembled from.
//!
//! A [ResourceLoader] knows how to get from a [FileStream] to a loaded [Resource] in two phases: [ResourceLoader::begin_load]
//! parses bytes and may run on a worker thread, while [ResourceLoader::end_load] finishes the object on the main thread.
//! Everything else here is a collaborator handed to the cache at construction time rather than looked up globally.
use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::*;

/// Identity of a resource type, usually the type's name.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ResourceType(&'static str);

impl ResourceType {
    pub const fn new(name: &'static str) -> ResourceType {
        ResourceType(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Lets `Arc<dyn Resource>` be turned back into the concrete type.  Implemented for everything.
pub trait AsAnyArc {
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAnyArc for T {
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A loaded resource.
pub trait Resource: AsAnyArc + fmt::Debug + Send + Sync + 'static {
    /// Approximate in-memory size in bytes, counted against the type's memory budget.
    fn memory_use(&self) -> u64;
}

/// A resource with a statically known type identity, which allows typed lookups through
/// [ResourceCache::get_typed].
pub trait TypedResource: Resource {
    const TYPE: ResourceType;
}

/// Two-phase loader for one resource type.
pub trait ResourceLoader: Send + Sync + 'static {
    /// The output of phase one, carried to the main thread.
    type Staged: Send + 'static;

    fn resource_type(&self) -> ResourceType;

    /// Read and parse bytes.  May run on a background thread, so must not touch main-thread-only state.
    fn begin_load(&self, name: &str, stream: &mut FileStream) -> Result<Self::Staged, LoadError>;

    /// Finish the resource.  Always runs on the main thread.
    fn end_load(&self, name: &str, staged: Self::Staged) -> Result<Arc<dyn Resource>, LoadError>;
}

pub(crate) type Staged = Box<dyn Any + Send>;

/// Object-safe form of [ResourceLoader], so loaders of different types can live in one map.
pub(crate) trait ErasedLoader: Send + Sync {
    fn begin_load(&self, name: &str, stream: &mut FileStream) -> Result<Staged, LoadError>;
    fn end_load(&self, name: &str, staged: Staged) -> Result<Arc<dyn Resource>, LoadError>;
}

impl<L: ResourceLoader> ErasedLoader for L {
    fn begin_load(&self, name: &str, stream: &mut FileStream) -> Result<Staged, LoadError> {
        let staged = ResourceLoader::begin_load(self, name, stream)?;
        Ok(Box::new(staged))
    }

    fn end_load(&self, name: &str, staged: Staged) -> Result<Arc<dyn Resource>, LoadError> {
        let staged = staged
            .downcast::<L::Staged>()
            .map_err(|_| LoadError::Invalid("staged data has the wrong type".to_string()))?;
        ResourceLoader::end_load(self, name, *staged)
    }
}

/// Receives the notifications the cache raises.  Only ever called from the main thread.
pub trait EventSink: Send + Sync {
    fn send_event(&self, event: ResourceEvent);
}

/// Drops every event.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn send_event(&self, _event: ResourceEvent) {}
}

impl EventSink for crossbeam_channel::Sender<ResourceEvent> {
    fn send_event(&self, event: ResourceEvent) {
        if self.send(event).is_err() {
            tracing::trace!("Event receiver is gone; dropping resource event");
        }
    }
}

/// Decides whether a filesystem path may be touched at all.
pub trait PathAccess: Send + Sync {
    fn check_access(&self, path: &Path) -> bool;
}

/// Allows paths under any of a set of roots.  An empty set allows everything.
#[derive(Clone, Debug, Default)]
pub struct AllowedPaths {
    roots: Vec<PathBuf>,
}

impl AllowedPaths {
    pub fn new() -> AllowedPaths {
        Default::default()
    }

    pub fn allow(mut self, root: impl Into<PathBuf>) -> AllowedPaths {
        self.roots.push(root.into());
        self
    }
}

impl PathAccess for AllowedPaths {
    fn check_access(&self, path: &Path) -> bool {
        self.roots.is_empty() || self.roots.iter().any(|r| path.starts_with(r))
    }
}

/// Millisecond time source used for use timers.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> SystemClock {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
