//! Fixed-size worker pool for blocking inference
//!
//! Jobs are queued on a channel shared by a fixed set of named OS threads and
//! executed first-come first-served. Each submission hands back a oneshot
//! receiver the async side can await without tying up the runtime.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::models::{EmbeddingError, EmbeddingResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` worker threads
    pub fn new(size: usize) -> EmbeddingResult<Self> {
        if size == 0 {
            return Err(EmbeddingError::ConfigError {
                message: "worker pool needs at least one thread".to_string(),
            });
        }

        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("embed-worker-{}", id))
                .spawn(move || worker_loop(id, receiver))?;
            workers.push(handle);
        }

        info!("Worker pool started with {} threads", size);
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue `task` and return a receiver for its result.
    ///
    /// Fails with [`EmbeddingError::NotInitialized`] once the pool is shut
    /// down. If the task panics the receiver resolves to an error.
    pub fn submit<T, F>(&self, task: F) -> EmbeddingResult<oneshot::Receiver<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            // Caller may have gone away; the work still ran to completion.
            let _ = result_tx.send(task());
        });

        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => sender.send(job).map_err(|_| EmbeddingError::NotInitialized)?,
            None => return Err(EmbeddingError::NotInitialized),
        }
        Ok(result_rx)
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Stop accepting work and block until queued and running jobs finish.
    /// Later calls are no-ops.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in workers {
            if handle.join().is_err() {
                error!("Worker thread exited abnormally");
            }
        }
        info!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets idle workers exit; they are not joined here.
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

fn worker_loop(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = {
            let receiver = receiver.lock().unwrap_or_else(PoisonError::into_inner);
            receiver.recv()
        };
        match job {
            Ok(job) => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("Worker {} recovered from a panicking task", id);
                }
            }
            Err(_) => break,
        }
    }
    debug!("Worker {} exiting", id);
}
