//! FIFO work queue processed by exactly one worker task.
//!
//! Admission and teardown of connections both run through one of these, so
//! at most one job per queue is ever in flight. Items already waiting in the
//! queue (by key) are ignored when enqueued again.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub trait Keyed {
    fn key(&self) -> &str;
}

type Pending = Arc<Mutex<HashSet<String>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashSet<String>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Releases a key from the pending set when dropped
struct PendingKey {
    pending: Pending,
    key: String,
}

impl Drop for PendingKey {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.key);
    }
}

/// Producer side of a serial queue
pub struct SerialQueue<T> {
    name: &'static str,
    tx: mpsc::UnboundedSender<T>,
    pending: Pending,
}

/// Consumer side; turned into the worker task with [`SerialWorker::spawn`]
pub struct SerialWorker<T> {
    name: &'static str,
    rx: mpsc::UnboundedReceiver<T>,
    pending: Pending,
}

impl<T: Keyed + Send + 'static> SerialQueue<T> {
    pub fn channel(name: &'static str) -> (SerialQueue<T>, SerialWorker<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(HashSet::new()));
        (
            SerialQueue { name, tx, pending: pending.clone() },
            SerialWorker { name, rx, pending },
        )
    }

    /// Returns false when the key is already queued or in flight, or the
    /// worker has stopped.
    pub fn enqueue(&self, item: T) -> bool {
        let key = item.key().to_string();
        if !lock(&self.pending).insert(key.clone()) {
            debug!("{} queue: ignoring duplicate {}", self.name, key);
            return false;
        }
        if self.tx.send(item).is_err() {
            error!("{} queue: worker stopped, dropping {}", self.name, key);
            lock(&self.pending).remove(&key);
            return false;
        }
        true
    }

    /// Jobs queued or in flight
    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// False once the worker task has gone away
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl<T: Keyed + Send + 'static> SerialWorker<T> {
    /// Run `handler` on every item, one at a time, in arrival order. The key
    /// is released when the job ends, including when it panics.
    pub fn spawn<F, Fut>(self, handler: F) -> JoinHandle<()>
    where
        F: Fn(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let SerialWorker { name, mut rx, pending } = self;
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let release = PendingKey {
                    pending: pending.clone(),
                    key: item.key().to_string(),
                };

                if let Err(e) = tokio::spawn(handler(item)).await {
                    error!("{} queue: job {} failed: {}", name, release.key, e);
                }
                drop(release);
            }
            debug!("{} queue: worker stopped", name);
        })
    }
}
