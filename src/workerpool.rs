//! CPU-offload worker pool for envelope validation and signature verification (C12, §4.11).
//!
//! Validation and Ed25519/Schnorr verification are CPU-bound; running them inline on the
//! async runtime's worker threads would starve request handling under load. This pool is
//! a fixed set of plain OS threads fed by an `mpsc` channel; handlers submit a boxed
//! closure and `.await` a oneshot reply, suspending without blocking the executor.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use tokio::sync::oneshot;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: std_mpsc::Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` worker threads (default `max(2, cores-1)`, see
    /// `RouterConfig::worker_pool_size`).
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = std_mpsc::channel::<Job>();
        let receiver = std::sync::Arc::new(std::sync::Mutex::new(receiver));
        let mut handles = Vec::with_capacity(size);
        for index in 0..size.max(1) {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("router-worker-{index}"))
                .spawn(move || {
                    loop {
                        let job = {
                            let receiver = receiver.lock().expect("worker pool mutex poisoned");
                            receiver.recv()
                        };
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    }
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
        WorkerPool { sender, handles }
    }

    /// Submits `f` to the pool and suspends until it completes. Ordering between
    /// concurrently-submitted tasks is irrelevant (§4.11).
    pub async fn submit<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let result = f();
            let _ = tx.send(result);
        });
        self.sender.send(job).expect("worker pool channel closed");
        rx.await.expect("worker pool dropped the job without responding")
    }

    /// Closes the submission channel and joins every worker thread. Intended for the
    /// graceful-shutdown path; blocking joins are acceptable there since shutdown itself
    /// runs off the async runtime's hot path.
    pub fn shutdown(self) {
        drop(self.sender);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}
