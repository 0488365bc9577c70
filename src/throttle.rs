//! Per-connection limit on outstanding requests.
//!
//! Backed by tokio's `Semaphore`, which queues acquirers FIFO and drops a
//! cancelled acquirer from the queue without consuming a permit.

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::ClientError;

/// Counting gate bounding how many requests may await a reply at once.
#[derive(Debug)]
pub struct RequestThrottle {
    semaphore: Semaphore,
    capacity: usize,
}

/// One unit of allowance to have a request outstanding.
///
/// Released when dropped, on every exit path of the request.
#[derive(Debug)]
pub struct RequestPermit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl RequestThrottle {
    /// Create a throttle with `capacity` permits (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Semaphore::new(capacity),
            capacity,
        }
    }

    /// Wait for a free permit.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionLost`] once the throttle is closed.
    pub async fn acquire(&self) -> Result<RequestPermit<'_>, ClientError> {
        match self.semaphore.acquire().await {
            Ok(permit) => Ok(RequestPermit { _permit: permit }),
            Err(_closed) => Err(ClientError::ConnectionLost),
        }
    }

    /// Fail all current and future acquirers.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Total permits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
