//! Run-wide provider call budget.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::ProviderError;

/// Caps total provider calls per run and calls in flight at once.
///
/// Shared by every file of a batch; each attempt (retries included) spends
/// one call.
#[derive(Debug)]
pub struct CallBudget {
    limit: Option<usize>,
    used: AtomicUsize,
    in_flight: Semaphore,
}

impl CallBudget {
    pub fn new(limit: Option<usize>, max_concurrent: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
            in_flight: Semaphore::new(max_concurrent.max(1)),
        }
    }

    /// Reserve one call, or fail once the limit is reached.
    pub fn try_spend(&self) -> Result<(), ProviderError> {
        let Some(limit) = self.limit else {
            self.used.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        };
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| ProviderError::BudgetExhausted)
    }

    pub fn is_exhausted(&self) -> bool {
        self.limit
            .map(|l| self.used.load(Ordering::SeqCst) >= l)
            .unwrap_or(false)
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> Option<usize> {
        self.limit.map(|l| l.saturating_sub(self.used()))
    }

    /// Wait for a concurrency slot.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, ProviderError> {
        self.in_flight
            .acquire()
            .await
            .map_err(|_| ProviderError::Unavailable("call budget closed".to_string()))
    }
}
