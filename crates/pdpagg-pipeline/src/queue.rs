//! Queue seam between stages.
//!
//! Delivery is at-least-once: consumers must tolerate seeing a message again,
//! which every stage does because its writes are content-keyed.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Publishing half of a queue.
pub trait Queue<M>: Send + Sync {
    /// Append `message`.
    fn publish(&self, message: &M) -> Result<()>;
}

/// In-memory FIFO.
#[derive(Debug)]
pub struct MemoryQueue<M> {
    inner: Mutex<VecDeque<M>>,
}

impl<M> Default for MemoryQueue<M> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }
}

impl<M> MemoryQueue<M> {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything queued, oldest first.
    pub fn drain(&self) -> Vec<M> {
        self.inner
            .lock()
            .map(|mut q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map_or(0, |q| q.len())
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M: Clone + Send> Queue<M> for MemoryQueue<M> {
    fn publish(&self, message: &M) -> Result<()> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("queue lock poisoned"))?
            .push_back(message.clone());
        Ok(())
    }
}
