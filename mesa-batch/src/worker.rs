//! Fixed-size worker thread pool.
//!
//! Units of work outnumber threads in the interesting case, so threads are
//! reused across submissions. That reuse is load-bearing for the affinity
//! layer: a thread picking up a later unit of work still carries its cached
//! thread-bound provider.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::error::{BatchError, BatchResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of named OS worker threads.
pub struct WorkerPool {
    workers: Vec<Worker>,
    sender: Option<Sender<Job>>,
}

struct Worker {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool of `size` worker threads.
    pub fn new(size: usize) -> BatchResult<Self> {
        if size == 0 {
            return Err(BatchError::config("worker pool size must be at least 1"));
        }
        info!(size, "Worker pool starting");

        let (sender, receiver) = channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|i| Worker::spawn(format!("mesa-worker-{i}"), receiver.clone()))
            .collect::<BatchResult<Vec<_>>>()?;

        Ok(Self {
            workers,
            sender: Some(sender),
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Submit a unit of work.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> BatchResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| BatchError::worker("worker pool is shut down"))?;
        sender
            .send(Box::new(job))
            .map_err(|_| BatchError::worker("all worker threads have exited"))
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.workers.len())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets each worker drain and exit.
        drop(self.sender.take());
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                debug!(worker = %worker.name, "Joining worker");
                let _ = handle.join();
            }
        }
        info!("Worker pool shut down");
    }
}

impl Worker {
    fn spawn(name: String, receiver: Arc<Mutex<Receiver<Job>>>) -> BatchResult<Self> {
        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                loop {
                    // Hold the lock only while receiving, not while running.
                    let job = {
                        let receiver = receiver.lock();
                        receiver.recv()
                    };
                    match job {
                        Ok(job) => {
                            trace!(worker = %thread_name, "Picked up job");
                            job();
                        }
                        Err(_) => break, // channel closed
                    }
                }
            })
            .map_err(|e| BatchError::worker(format!("failed to spawn {name}: {e}")))?;

        Ok(Self {
            name,
            handle: Some(handle),
        })
    }
}
