//! Notifications raised by the cache.
//!
//! Events reach the [EventSink] on the main thread only.  Anything raised on another thread waits in a queue until
//! the main thread next calls [ResourceCache::update].
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::*;

/// Opaque identity of whoever asked for a background load, echoed back in the completion event.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct CallerId(pub u64);

#[derive(Clone, Debug)]
pub enum ResourceEvent {
    ResourceNotFound {
        name: String,
    },
    UnknownResourceType {
        resource_type: ResourceType,
        name: String,
    },
    LoadFailed {
        resource_type: ResourceType,
        name: String,
    },
    BackgroundLoadFinished {
        resource_type: ResourceType,
        name: String,
        success: bool,
        resource: Option<Arc<dyn Resource>>,
        caller: Option<CallerId>,
    },
    ReloadStarted {
        resource_type: ResourceType,
        name: String,
    },
    ReloadFinished {
        resource_type: ResourceType,
        name: String,
    },
    ReloadFailed {
        resource_type: ResourceType,
        name: String,
    },
}

pub(crate) struct EventDispatcher {
    sink: Arc<dyn EventSink>,
    main_thread: ThreadId,
    deferred: Mutex<Vec<ResourceEvent>>,
}

impl EventDispatcher {
    /// The calling thread becomes the main thread.
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> EventDispatcher {
        EventDispatcher {
            sink,
            main_thread: std::thread::current().id(),
            deferred: Default::default(),
        }
    }

    pub(crate) fn is_main_thread(&self) -> bool {
        std::thread::current().id() == self.main_thread
    }

    pub(crate) fn send(&self, event: ResourceEvent) {
        if self.is_main_thread() {
            self.flush();
            self.sink.send_event(event);
        } else {
            self.deferred.lock().push(event);
        }
    }

    /// Deliver queued events.  Does nothing off the main thread.
    pub(crate) fn flush(&self) {
        if !self.is_main_thread() {
            return;
        }
        let pending = std::mem::take(&mut *self.deferred.lock());
        for e in pending {
            self.sink.send_event(e);
        }
    }
}
