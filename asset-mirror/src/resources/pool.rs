//! Resource-aware worker pool sizing and admission.
//!
//! [`recommended_workers`] turns a [`ResourceSample`] into a concurrency
//! target:
//!
//! | CPU load        | Workers              |
//! |-----------------|----------------------|
//! | < 30 %          | 2 × logical cores    |
//! | 30 – 60 %       | logical cores        |
//! | ≥ 60 %          | physical cores       |
//!
//! Memory above 80 % caps the result at the physical core count. The result
//! is never below one.
//!
//! [`WorkerPool`] enforces the target. Resizing only changes how many new
//! tasks may start; work already admitted keeps its slot until it finishes.

use super::monitor::{ResourceMonitor, ResourceSample};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

const LOW_CPU_PERCENT: f64 = 30.0;
const HIGH_CPU_PERCENT: f64 = 60.0;
const HIGH_MEM_PERCENT: f64 = 80.0;

/// Concurrency target for a resource sample.
pub fn recommended_workers(sample: &ResourceSample) -> usize {
    let workers = if sample.cpu_percent < LOW_CPU_PERCENT {
        sample.logical_cores * 2
    } else if sample.cpu_percent < HIGH_CPU_PERCENT {
        sample.logical_cores
    } else {
        sample.physical_cores
    };

    let workers = if sample.mem_percent > HIGH_MEM_PERCENT {
        workers.min(sample.physical_cores)
    } else {
        workers
    };

    workers.max(1)
}

struct PoolInner {
    permits: Arc<Semaphore>,
    limit: AtomicUsize,
    in_flight: AtomicUsize,
    /// Permits still to be retired as in-flight work finishes after a shrink
    debt: AtomicUsize,
}

impl PoolInner {
    /// Retire one unit of debt, if any is owed.
    fn pay_debt(&self) -> bool {
        self.debt
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |owed| owed.checked_sub(1))
            .is_ok()
    }
}

/// Admission gate with a limit that can change while work is running.
///
/// Backed by a [`Semaphore`]. Growing adds permits. Shrinking forgets idle
/// permits right away and retires the rest as their holders finish.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(limit)),
                limit: AtomicUsize::new(limit),
                in_flight: AtomicUsize::new(0),
                debt: AtomicUsize::new(0),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Change the limit. Never below one; in-flight work is untouched.
    pub fn resize(&self, limit: usize) {
        let limit = limit.max(1);
        let previous = self.inner.limit.swap(limit, Ordering::SeqCst);
        if limit == previous {
            return;
        }
        info!(from = previous, to = limit, in_flight = self.in_flight(), "Worker limit changed");

        if limit > previous {
            let grow = limit - previous;
            let owed = self
                .inner
                .debt
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |owed| Some(owed.saturating_sub(grow)))
                .unwrap_or(0);
            self.inner.permits.add_permits(grow - owed.min(grow));
        } else {
            let mut shrink = previous - limit;
            while shrink > 0 {
                match Arc::clone(&self.inner.permits).try_acquire_owned() {
                    Ok(idle) => {
                        idle.forget();
                        shrink -= 1;
                    }
                    Err(_) => break,
                }
            }
            self.inner.debt.fetch_add(shrink, Ordering::SeqCst);
        }
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<WorkerPermit> {
        Arc::clone(&self.inner.permits)
            .try_acquire_owned()
            .ok()
            .map(|permit| self.admit(permit))
    }

    /// Wait for a free slot. `None` only if the underlying semaphore closed.
    pub async fn acquire(&self) -> Option<WorkerPermit> {
        let permit = Arc::clone(&self.inner.permits).acquire_owned().await.ok()?;
        Some(self.admit(permit))
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> WorkerPermit {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        WorkerPermit {
            permit: Some(permit),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("limit", &self.limit())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// A running slot in a [`WorkerPool`]; released on drop.
pub struct WorkerPermit {
    permit: Option<OwnedSemaphorePermit>,
    inner: Arc<PoolInner>,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(permit) = self.permit.take() {
            if self.inner.pay_debt() {
                permit.forget();
            }
        }
    }
}

/// A [`WorkerPool`] sized from a [`ResourceMonitor`].
pub struct AdaptiveWorkerPool<M> {
    monitor: M,
    pool: WorkerPool,
    override_workers: Option<usize>,
}

impl<M: ResourceMonitor> AdaptiveWorkerPool<M> {
    /// `override_workers` replaces the recommendation when set.
    pub fn new(monitor: M, override_workers: Option<usize>) -> Self {
        Self {
            monitor,
            pool: WorkerPool::new(override_workers.unwrap_or(1)),
            override_workers,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Take a fresh sample and resize the pool to match it.
    ///
    /// On an overloaded host the target is halved, but never below the
    /// physical core count and never above the unhalved target.
    pub async fn resample(&self, phase: &str) -> ResourceSample {
        let sample = self.monitor.sample().await;
        let recommended = recommended_workers(&sample);
        let mut target = self.override_workers.unwrap_or(recommended).max(1);

        info!(
            phase,
            cpu_percent = sample.cpu_percent,
            mem_percent = sample.mem_percent,
            logical_cores = sample.logical_cores,
            physical_cores = sample.physical_cores,
            recommended,
            workers = target,
            "Sampled system resources"
        );
        if target > recommended * 3 / 2 {
            warn!(phase, workers = target, recommended, "Worker override is well above the recommendation");
        }
        if sample.is_overloaded() {
            let eased = (target / 2).max(sample.physical_cores).clamp(1, target);
            warn!(
                phase,
                cpu_percent = sample.cpu_percent,
                mem_percent = sample.mem_percent,
                from = target,
                to = eased,
                "System resources are heavily loaded, easing workers"
            );
            target = eased;
        }

        self.pool.resize(target);
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::monitor::FixedMonitor;
    use std::time::Duration;

    fn sample(cpu: f64, mem: f64) -> ResourceSample {
        ResourceSample {
            cpu_percent: cpu,
            mem_percent: mem,
            logical_cores: 8,
            physical_cores: 4,
        }
    }

    #[test]
    fn test_recommended_workers_by_cpu() {
        assert_eq!(recommended_workers(&sample(10.0, 20.0)), 16);
        assert_eq!(recommended_workers(&sample(29.9, 20.0)), 16);
        assert_eq!(recommended_workers(&sample(30.0, 20.0)), 8);
        assert_eq!(recommended_workers(&sample(59.9, 20.0)), 8);
        assert_eq!(recommended_workers(&sample(60.0, 20.0)), 4);
        assert_eq!(recommended_workers(&sample(75.0, 20.0)), 4);
        assert_eq!(recommended_workers(&sample(75.0, 95.0)), 4);
    }

    #[test]
    fn test_recommended_workers_memory_clamp() {
        assert_eq!(recommended_workers(&sample(10.0, 85.0)), 4);
        assert_eq!(recommended_workers(&sample(45.0, 80.1)), 4);
        assert_eq!(recommended_workers(&sample(10.0, 80.0)), 16);
    }

    #[test]
    fn test_recommended_workers_never_zero() {
        let empty = ResourceSample {
            cpu_percent: 99.0,
            mem_percent: 99.0,
            logical_cores: 0,
            physical_cores: 0,
        };
        assert_eq!(recommended_workers(&empty), 1);
    }

    #[test]
    fn test_pool_limits_admission() {
        let pool = WorkerPool::new(2);
        let a = pool.try_acquire().unwrap();
        let _b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.in_flight(), 2);

        drop(a);
        assert_eq!(pool.in_flight(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn test_shrink_keeps_in_flight_work() {
        let pool = WorkerPool::new(3);
        let permits: Vec<_> = (0..3).map(|_| pool.try_acquire().unwrap()).collect();

        pool.resize(1);
        assert_eq!(pool.limit(), 1);
        assert_eq!(pool.in_flight(), 3);
        assert!(pool.try_acquire().is_none());

        drop(permits);
        assert_eq!(pool.in_flight(), 0);
        let _one = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
    }

    #[test]
    fn test_resize_clamps_to_one() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.limit(), 1);
        pool.resize(0);
        assert_eq!(pool.limit(), 1);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let pool = WorkerPool::new(1);
        let held = pool.acquire().await.unwrap();

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move {
            let _permit = waiter_pool.acquire().await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should be admitted after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_acquire_wakes_on_grow() {
        let pool = WorkerPool::new(1);
        let _held = pool.acquire().await.unwrap();

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move {
            let _permit = waiter_pool.acquire().await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.resize(2);

        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should be admitted after growth")
            .unwrap();
    }

    #[test]
    fn test_grow_while_in_debt_cancels_debt() {
        let pool = WorkerPool::new(4);
        let permits: Vec<_> = (0..4).map(|_| pool.try_acquire().unwrap()).collect();

        // All four are busy, so the shrink is owed rather than taken now
        pool.resize(1);
        pool.resize(3);
        drop(permits);

        let held: Vec<_> = (0..3).map(|_| pool.try_acquire().unwrap()).collect();
        assert!(pool.try_acquire().is_none());
        assert_eq!(held.len(), 3);
    }

    #[test]
    fn test_shrink_takes_idle_permits_immediately() {
        let pool = WorkerPool::new(4);
        let busy = pool.try_acquire().unwrap();

        pool.resize(2);
        let second = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());

        drop(busy);
        drop(second);
        let _a = pool.try_acquire().unwrap();
        let _b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_many_waiters_drain_under_limit() {
        let pool = WorkerPool::new(4);
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5_000)
            .map(|_| {
                let pool = pool.clone();
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _permit = pool.acquire().await.unwrap();
                    peak.fetch_max(pool.in_flight(), Ordering::SeqCst);
                    tokio::task::yield_now().await;
                })
            })
            .collect();

        tokio::time::timeout(Duration::from_secs(10), async {
            for handle in handles {
                handle.await.unwrap();
            }
        })
        .await
        .expect("all waiters should be admitted");

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_adaptive_pool_resamples() {
        let adaptive = AdaptiveWorkerPool::new(FixedMonitor(sample(10.0, 20.0)), None);
        assert_eq!(adaptive.pool().limit(), 1);

        adaptive.resample("download").await;
        assert_eq!(adaptive.pool().limit(), 16);
    }

    #[tokio::test]
    async fn test_adaptive_pool_override() {
        let adaptive = AdaptiveWorkerPool::new(FixedMonitor(sample(10.0, 20.0)), Some(3));
        adaptive.resample("download").await;
        assert_eq!(adaptive.pool().limit(), 3);
    }

    #[tokio::test]
    async fn test_overload_eases_workers() {
        let recommended = AdaptiveWorkerPool::new(FixedMonitor(sample(95.0, 20.0)), None);
        recommended.resample("download").await;
        assert_eq!(recommended.pool().limit(), 4);

        let overridden = AdaptiveWorkerPool::new(FixedMonitor(sample(95.0, 20.0)), Some(16));
        overridden.resample("download").await;
        assert_eq!(overridden.pool().limit(), 8);

        let small = AdaptiveWorkerPool::new(FixedMonitor(sample(95.0, 20.0)), Some(2));
        small.resample("extract").await;
        assert_eq!(small.pool().limit(), 2);
    }
}
