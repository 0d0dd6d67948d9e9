//! Per-order mutual exclusion.
//!
//! Writes to one work order are serialized; writes to different orders never
//! contend. A caller that finds the order already locked fails immediately
//! with `ConcurrentModification` instead of queueing behind the winner.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{Error, Result};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Registry of per-order locks.
#[derive(Clone, Default)]
pub struct OrderLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `order_id` without waiting.
    pub fn try_acquire(&self, order_id: &str) -> Result<OrderGuard> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                locks
                    .entry(order_id.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };

        let guard = lock
            .try_lock_owned()
            .map_err(|_| Error::ConcurrentModification(order_id.to_string()))?;

        Ok(OrderGuard {
            order_id: order_id.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        })
    }

    /// Number of orders with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held while a write to one order is in flight.
pub struct OrderGuard {
    order_id: String,
    locks: Arc<Mutex<LockMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl OrderGuard {
    pub fn order_id(&self) -> &str {
        &self.order_id
    }
}

impl Drop for OrderGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Map entry + our owned guard: nobody else is waiting on this lock.
        if let Some(entry) = locks.get(&self.order_id) {
            if Arc::strong_count(entry) <= 2 {
                locks.remove(&self.order_id);
            }
        }
        self.guard.take();
    }
}
