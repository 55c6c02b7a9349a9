//! Per-train mutual exclusion.
//!
//! Every mutation of a train's cars and every merge attempt happens while
//! holding that train's lock. Acquisition is bounded; a caller that times
//! out re-enqueues its work instead of waiting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::types::TrainKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for the lock on train {key}")]
    Timeout { key: TrainKey, waited: Duration },
}

pub type Result<T> = std::result::Result<T, LockError>;

/// Proof that the holder owns a train. Released on drop.
#[derive(Debug)]
pub struct TrainGuard {
    key: TrainKey,
    _guard: OwnedMutexGuard<()>,
}

impl TrainGuard {
    pub fn key(&self) -> &TrainKey {
        &self.key
    }
}

#[derive(Debug)]
pub struct TrainLocks {
    locks: Mutex<HashMap<TrainKey, Arc<Mutex<()>>>>,
    timeout: Duration,
}

impl TrainLocks {
    pub fn new(timeout: Duration) -> Self {
        TrainLocks {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// The mutex for `key`. Entries nobody holds or waits on are pruned, so
    /// the map stays as large as the number of trains currently in use.
    async fn lock_for(&self, key: &TrainKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Waits up to the configured timeout for the train's lock.
    pub async fn acquire(&self, key: &TrainKey) -> Result<TrainGuard> {
        let lock = self.lock_for(key).await;
        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => {
                trace!(train = %key, "Acquired train lock");
                Ok(TrainGuard {
                    key: key.clone(),
                    _guard: guard,
                })
            }
            Err(_) => Err(LockError::Timeout {
                key: key.clone(),
                waited: self.timeout,
            }),
        }
    }

    /// Takes the lock only if nobody holds it.
    pub async fn try_acquire(&self, key: &TrainKey) -> Option<TrainGuard> {
        let lock = self.lock_for(key).await;
        lock.try_lock_owned().ok().map(|guard| TrainGuard {
            key: key.clone(),
            _guard: guard,
        })
    }
}
