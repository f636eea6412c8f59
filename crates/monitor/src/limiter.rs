use crate::error::{CheckError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencySnapshot {
    pub limit: usize,
    pub in_flight: usize,
    pub waiters: usize,
    /// Highest `in_flight` observed since creation
    pub peak_in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    waiters: AtomicUsize,
    peak: AtomicUsize,
}

/// Bounds the number of checks one orchestrator runs at once.
#[derive(Debug, Clone)]
pub struct CheckLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
    counters: Arc<Counters>,
}

impl CheckLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn snapshot(&self) -> ConcurrencySnapshot {
        ConcurrencySnapshot {
            limit: self.limit,
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
            waiters: self.counters.waiters.load(Ordering::Relaxed),
            peak_in_flight: self.counters.peak.load(Ordering::Relaxed),
        }
    }

    /// Stop handing out permits; pending and later acquires fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub async fn acquire(&self) -> Result<CheckPermit> {
        let waiter = WaiterGuard::new(Arc::clone(&self.counters));
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| CheckError::Task("check limiter is closed".into()))?;
        drop(waiter);

        let now = self.counters.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.peak.fetch_max(now, Ordering::Relaxed);
        Ok(CheckPermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }
}

pub struct CheckPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for CheckPermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

struct WaiterGuard {
    counters: Arc<Counters>,
}

impl WaiterGuard {
    fn new(counters: Arc<Counters>) -> Self {
        counters.waiters.fetch_add(1, Ordering::Relaxed);
        Self { counters }
    }
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.counters.waiters.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn permits_bound_in_flight_work() {
        let limiter = CheckLimiter::new(2);
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            tasks.spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.limit, 2);
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.waiters, 0);
        assert!(snapshot.peak_in_flight <= 2);
        assert!(snapshot.peak_in_flight >= 1);
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        assert_eq!(CheckLimiter::new(0).snapshot().limit, 1);
    }

    #[tokio::test]
    async fn closed_limiter_refuses_permits() {
        let limiter = CheckLimiter::new(1);
        let held = limiter.acquire().await.unwrap();
        let waiting = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        limiter.close();

        let err = waiting.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "task");
        assert!(limiter.acquire().await.is_err());
        drop(held);
        assert_eq!(limiter.snapshot().waiters, 0);
        assert_eq!(limiter.snapshot().in_flight, 0);
    }
}
