//! Worker threads for phase one of background loads.
//!
//! The main thread queues a key; a worker searches for the file and runs [ResourceLoader::begin_load], then hands
//! the staged data back over a bounded channel.  Nothing here touches the registry: finalization is a callback the
//! main thread supplies to [BackgroundLoader::finish_resources] and friends.
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::*;

pub(crate) type LoaderMap = HashMap<ResourceType, Arc<dyn ErasedLoader>, ahash::RandomState>;
pub(crate) type SharedLoaders = Arc<RwLock<LoaderMap>>;

/// Output of a worker, waiting for the main thread.
pub(crate) struct Finished {
    pub(crate) key: ResourceKey,
    pub(crate) result: Result<Staged, ResourceError>,
}

/// Who is waiting on a job.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub(crate) callers: Vec<Option<CallerId>>,
    /// Whether failure events should be raised; set if any coalesced request asked for them.
    pub(crate) notify: bool,
}

/// Run search and phase one for `key`.  Safe to call from any thread.
pub(crate) fn begin_load(
    search: &SearchEngine,
    loaders: &RwLock<LoaderMap>,
    key: &ResourceKey,
) -> Result<Staged, ResourceError> {
    let (ty, name) = key;
    let loader = loaders
        .read()
        .get(ty)
        .cloned()
        .ok_or(ResourceError::UnknownType(*ty))?;
    let mut stream = search.find(name)?;
    loader
        .begin_load(name, &mut stream)
        .map_err(|source| ResourceError::ParseFailure {
            name: name.clone(),
            source,
        })
}

fn worker(
    requests: Receiver<ResourceKey>,
    finished: Sender<Finished>,
    search: Arc<SearchEngine>,
    loaders: SharedLoaders,
) {
    for key in requests.iter() {
        tracing::trace!(resource_type = %key.0, "Background loading {}", key.1);
        // A panicking loader must not take the job with it, or anyone waiting on the key waits forever.
        let result =
            std::panic::catch_unwind(AssertUnwindSafe(|| begin_load(&search, &loaders, &key)))
                .unwrap_or_else(|_| {
                    Err(ResourceError::ParseFailure {
                        name: key.1.clone(),
                        source: LoadError::Invalid("loader panicked".to_string()),
                    })
                });
        if finished.send(Finished { key, result }).is_err() {
            break;
        }
    }
}

pub struct BackgroundLoader {
    requests: Option<Sender<ResourceKey>>,
    finished: Option<Receiver<Finished>>,
    in_flight: Mutex<HashMap<ResourceKey, InFlight, ahash::RandomState>>,
    workers: Vec<JoinHandle<()>>,
}

impl BackgroundLoader {
    pub(crate) fn new(
        threads: usize,
        finished_capacity: usize,
        search: Arc<SearchEngine>,
        loaders: SharedLoaders,
    ) -> std::io::Result<BackgroundLoader> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let (finished_tx, finished_rx) = crossbeam_channel::bounded(finished_capacity.max(1));

        let mut workers = vec![];
        for i in 0..threads.max(1) {
            let requests = request_rx.clone();
            let finished = finished_tx.clone();
            let search = search.clone();
            let loaders = loaders.clone();
            let handle = std::thread::Builder::new()
                .name(format!("resource-loader-{}", i))
                .spawn(move || worker(requests, finished, search, loaders))?;
            workers.push(handle);
        }

        Ok(BackgroundLoader {
            requests: Some(request_tx),
            finished: Some(finished_rx),
            in_flight: Default::default(),
            workers,
        })
    }

    /// Queue a job, or join the one already running for this key.  Returns true if a new job was queued.
    pub(crate) fn queue(
        &self,
        key: ResourceKey,
        caller: Option<CallerId>,
        notify: bool,
    ) -> Result<bool, ResourceError> {
        let mut in_flight = self.in_flight.lock();
        if let Some(job) = in_flight.get_mut(&key) {
            tracing::debug!(
                resource_type = %key.0,
                "Joining in-flight background load of {}",
                key.1
            );
            job.callers.push(caller);
            job.notify |= notify;
            return Ok(false);
        }

        let sent = self
            .requests
            .as_ref()
            .map(|r| r.send(key.clone()).is_ok())
            .unwrap_or(false);
        if !sent {
            tracing::error!("Background loader has shut down; dropping request for {}", key.1);
            return Err(ResourceError::LoaderShutDown(key.1));
        }
        in_flight.insert(
            key,
            InFlight {
                callers: vec![caller],
                notify,
            },
        );
        Ok(true)
    }

    pub fn is_loading(&self, key: &ResourceKey) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    pub fn num_pending(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Jobs whose phase one is done, waiting to be finalized.
    pub fn num_ready(&self) -> usize {
        self.finished.as_ref().map(|f| f.len()).unwrap_or(0)
    }

    /// Stop accepting requests.  Workers exit once the queue is drained.
    pub(crate) fn close_requests(&mut self) {
        self.requests.take();
    }

    fn take_job(&self, key: &ResourceKey) -> InFlight {
        self.in_flight.lock().remove(key).unwrap_or(InFlight {
            callers: vec![None],
            notify: true,
        })
    }

    /// Finalize finished jobs until none are ready or `budget` has passed.  At least one ready job is always
    /// finalized, so a zero budget still makes progress.  Returns how many were finalized.
    pub(crate) fn finish_resources<F>(&self, budget: Duration, mut finalize: F) -> usize
    where
        F: FnMut(Finished, InFlight),
    {
        let finished = match self.finished.as_ref() {
            Some(f) => f,
            None => return 0,
        };
        let deadline = Instant::now() + budget;
        let mut done = 0;
        while let Ok(item) = finished.try_recv() {
            let job = self.take_job(&item.key);
            finalize(item, job);
            done += 1;
            if Instant::now() >= deadline {
                break;
            }
        }
        done
    }

    /// Block until the job for `key` is finalized, finalizing whatever else finishes first along the way.
    pub(crate) fn wait_for_resource<F>(&self, key: &ResourceKey, mut finalize: F)
    where
        F: FnMut(Finished, InFlight),
    {
        while self.is_loading(key) {
            if !self.recv_one(&mut finalize) {
                break;
            }
        }
    }

    /// Block until every in-flight job is finalized.
    pub(crate) fn wait_for_all<F>(&self, mut finalize: F)
    where
        F: FnMut(Finished, InFlight),
    {
        while self.num_pending() > 0 {
            if !self.recv_one(&mut finalize) {
                break;
            }
        }
    }

    fn recv_one<F>(&self, finalize: &mut F) -> bool
    where
        F: FnMut(Finished, InFlight),
    {
        let item = match self.finished.as_ref().map(|f| f.recv()) {
            Some(Ok(item)) => item,
            _ => {
                tracing::error!("Background workers are gone with jobs still in flight");
                return false;
            }
        };
        let job = self.take_job(&item.key);
        finalize(item, job);
        true
    }
}

impl Drop for BackgroundLoader {
    fn drop(&mut self) {
        // Closing the finished side too unblocks any worker stuck sending into a full queue.
        self.close_requests();
        self.finished.take();
        for w in self.workers.drain(..) {
            if w.join().is_err() {
                tracing::error!("Resource loader thread panicked");
            }
        }
    }
}
