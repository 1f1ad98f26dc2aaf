//! Serial background execution context shared by every session on a backend.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::debug;

use crate::engine::SqlEngine;

/// A unit of background work. The job borrows the engine for its whole run,
/// so jobs on one context never observe each other mid-statement.
pub type Job = Box<dyn FnOnce(&mut dyn SqlEngine) + Send>;

/// Owns the worker thread that holds the engine. Jobs submitted from the
/// owning thread run strictly in submission order. Sessions share one
/// context through `Arc`; when the last handle drops, the queue closes,
/// remaining jobs drain, and the thread is joined.
pub struct Exec {
    tx: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl Exec {
    /// Move `engine` onto a fresh worker thread and return a shared handle.
    pub fn spawn(engine: Box<dyn SqlEngine>) -> Arc<Exec> {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = std::thread::spawn(move || {
            let mut engine = engine;
            while let Ok(job) = rx.recv() {
                job(engine.as_mut());
            }
            debug!("execution context worker stopped");
        });
        Arc::new(Exec {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue a job behind everything already submitted. A job submitted
    /// after the context starts tearing down is silently dropped; sessions
    /// guard against that with their own shutdown flag first.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce(&mut dyn SqlEngine) + Send + 'static,
    {
        if let Some(tx) = &self.tx {
            if tx.send(Box::new(job)).is_err() {
                debug!("job dropped; execution context worker is gone");
            }
        }
    }
}

impl Drop for Exec {
    fn drop(&mut self) {
        // Closing the sender lets the worker drain the queue and exit.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
