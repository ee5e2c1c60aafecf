//! Shared fixtures for the unit tests.
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::*;

pub(crate) const MESH: ResourceType = ResourceType::new("Mesh");

#[derive(Debug, Default)]
pub(crate) struct ManualClock(AtomicU64);

impl ManualClock {
    pub(crate) fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub(crate) struct TestResource {
    pub(crate) name: String,
    pub(crate) bytes: Vec<u8>,
    size: AtomicU64,
    _held: Option<Arc<dyn Resource>>,
}

impl TestResource {
    pub(crate) fn new(name: &str, size: u64) -> TestResource {
        TestResource {
            name: name.to_string(),
            bytes: vec![],
            size: AtomicU64::new(size),
            _held: None,
        }
    }

    pub(crate) fn holding(name: &str, size: u64, held: Arc<dyn Resource>) -> TestResource {
        TestResource {
            _held: Some(held),
            ..TestResource::new(name, size)
        }
    }

    pub(crate) fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::SeqCst);
    }
}

impl Resource for TestResource {
    fn memory_use(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }
}

impl TypedResource for TestResource {
    const TYPE: ResourceType = MESH;
}

pub(crate) fn blob(name: &str, size: u64) -> Arc<dyn Resource> {
    Arc::new(TestResource::new(name, size))
}

/// Loads a file's bytes into a [TestResource], recording which threads ran each phase.
///
/// Contents starting with `!begin` fail in phase one and `!end` in phase two.
#[derive(Default)]
pub(crate) struct BytesLoader {
    pub(crate) begin_calls: AtomicUsize,
    pub(crate) end_calls: AtomicUsize,
    pub(crate) begin_threads: Mutex<Vec<ThreadId>>,
    pub(crate) end_threads: Mutex<Vec<ThreadId>>,
    /// When set, each phase one waits for a message first.
    pub(crate) gate: Option<crossbeam_channel::Receiver<()>>,
}

impl BytesLoader {
    pub(crate) fn gated() -> (crossbeam_channel::Sender<()>, BytesLoader) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            tx,
            BytesLoader {
                gate: Some(rx),
                ..Default::default()
            },
        )
    }

    pub(crate) fn begins(&self) -> usize {
        self.begin_calls.load(Ordering::SeqCst)
    }
}

impl ResourceLoader for Arc<BytesLoader> {
    type Staged = Vec<u8>;

    fn resource_type(&self) -> ResourceType {
        MESH
    }

    fn begin_load(&self, _name: &str, stream: &mut FileStream) -> Result<Vec<u8>, LoadError> {
        if let Some(gate) = &self.gate {
            gate.recv()
                .map_err(|_| LoadError::Invalid("gate closed".to_string()))?;
        }
        self.begin_calls.fetch_add(1, Ordering::SeqCst);
        self.begin_threads.lock().push(std::thread::current().id());
        let bytes = stream.read_all()?;
        if bytes.starts_with(b"!begin") {
            return Err(LoadError::Invalid("refusing to parse".to_string()));
        }
        Ok(bytes)
    }

    fn end_load(&self, name: &str, staged: Vec<u8>) -> Result<Arc<dyn Resource>, LoadError> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        self.end_threads.lock().push(std::thread::current().id());
        if staged.starts_with(b"!end") {
            return Err(LoadError::Invalid("refusing to finish".to_string()));
        }
        Ok(Arc::new(TestResource {
            size: AtomicU64::new(staged.len() as u64),
            bytes: staged,
            ..TestResource::new(name, 0)
        }))
    }
}

pub(crate) type EventLog = crossbeam_channel::Receiver<ResourceEvent>;

pub(crate) fn event_sink() -> (Arc<dyn EventSink>, EventLog) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Arc::new(tx), rx)
}
