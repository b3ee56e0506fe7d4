//! Scheduler - concurrency caps, priority waiters and rate limiting
//!
//! Enforces, at every instant:
//! - the global cap `max_concurrent_tasks`
//! - per-kind caps (`agent`, `tool`, ...)
//! - per-resource caps (one model limited to K concurrent)
//!
//! Slot acquisition is all-or-nothing under one lock, so a task never
//! holds a partial reservation (no deadlock between caps). Rate-limit
//! tokens are taken BEFORE slots, so waiting on a token bucket never
//! occupies a concurrency slot. Waiters are granted in
//! `(priority desc, enqueue seq asc)` order as slots free up; a waiter
//! whose caps are still busy is skipped in favor of the next eligible
//! one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, StrandError};
use crate::resilience::{RateLimitConfig, RateLimiterRegistry};

use super::queue::PriorityQueue;

/// What a task needs from the scheduler
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub node_id: Arc<str>,
    /// Node kind name (`agent`, `tool`, ...) for per-kind caps
    pub kind: &'static str,
    /// Resource keys (`agent:<id>`, `tool:<id>`) for per-resource caps
    /// and rate limits
    pub resource_keys: Vec<String>,
    pub priority: i32,
}

/// Scheduler limits. Absent entries mean "unlimited".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    #[serde(default)]
    pub max_per_kind: FxHashMap<String, usize>,
    #[serde(default)]
    pub max_per_resource: FxHashMap<String, usize>,
    #[serde(default)]
    pub rate_limits: FxHashMap<String, RateLimitConfig>,
}

fn default_max_concurrent() -> usize {
    16
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            max_per_kind: FxHashMap::default(),
            max_per_resource: FxHashMap::default(),
            rate_limits: FxHashMap::default(),
        }
    }
}

struct Waiter {
    desc: TaskDescriptor,
    granted: AtomicBool,
    cancelled: AtomicBool,
    notify: Notify,
}

struct SchedState {
    running_total: usize,
    per_kind: FxHashMap<String, usize>,
    per_resource: FxHashMap<String, usize>,
    waiters: PriorityQueue<Arc<Waiter>>,
}

struct SchedInner {
    config: SchedulerConfig,
    state: Mutex<SchedState>,
    limiters: RateLimiterRegistry,
}

impl SchedInner {
    fn fits(&self, state: &SchedState, desc: &TaskDescriptor) -> bool {
        if state.running_total >= self.config.max_concurrent_tasks {
            return false;
        }
        if let Some(cap) = self.config.max_per_kind.get(desc.kind) {
            if state.per_kind.get(desc.kind).copied().unwrap_or(0) >= *cap {
                return false;
            }
        }
        for key in &desc.resource_keys {
            if let Some(cap) = self.config.max_per_resource.get(key) {
                if state.per_resource.get(key).copied().unwrap_or(0) >= *cap {
                    return false;
                }
            }
        }
        true
    }

    fn take(&self, state: &mut SchedState, desc: &TaskDescriptor) {
        state.running_total += 1;
        *state.per_kind.entry(desc.kind.to_string()).or_insert(0) += 1;
        for key in &desc.resource_keys {
            *state.per_resource.entry(key.clone()).or_insert(0) += 1;
        }
    }

    fn give_back(&self, state: &mut SchedState, desc: &TaskDescriptor) {
        state.running_total = state.running_total.saturating_sub(1);
        if let Some(count) = state.per_kind.get_mut(desc.kind) {
            *count = count.saturating_sub(1);
        }
        for key in &desc.resource_keys {
            if let Some(count) = state.per_resource.get_mut(key) {
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Release slots and hand them to the best eligible waiter(s)
    fn release(&self, desc: &TaskDescriptor) {
        let mut state = self.state.lock();
        self.give_back(&mut state, desc);
        self.grant_waiters(&mut state);
    }

    /// Grant as many waiters as now fit, in priority order. Skipped
    /// waiters (caps still busy) keep their queue position.
    fn grant_waiters(&self, state: &mut SchedState) {
        let pending = state.waiters.drain_sorted();
        let mut keep: Vec<Arc<Waiter>> = Vec::new();

        for waiter in pending {
            if waiter.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            if self.fits(state, &waiter.desc) {
                self.take(state, &waiter.desc);
                waiter.granted.store(true, Ordering::SeqCst);
                waiter.notify.notify_one();
            } else {
                keep.push(waiter);
            }
        }
        for waiter in keep {
            let priority = waiter.desc.priority;
            state.waiters.push(priority, waiter);
        }
    }
}

/// RAII slot reservation; dropping releases every held slot atomically
pub struct SchedulePermit {
    inner: Arc<SchedInner>,
    desc: TaskDescriptor,
}

impl Drop for SchedulePermit {
    fn drop(&mut self) {
        self.inner.release(&self.desc);
    }
}

impl std::fmt::Debug for SchedulePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulePermit")
            .field("node_id", &self.desc.node_id)
            .finish()
    }
}

/// Single-process cooperative scheduler
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedInner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let limiters = RateLimiterRegistry::new();
        for (key, limit) in &config.rate_limits {
            limiters.configure(key, limit.clone());
        }
        Self {
            inner: Arc::new(SchedInner {
                config,
                state: Mutex::new(SchedState {
                    running_total: 0,
                    per_kind: FxHashMap::default(),
                    per_resource: FxHashMap::default(),
                    waiters: PriorityQueue::new(),
                }),
                limiters,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SchedulerConfig::default())
    }

    /// Acquire rate tokens, then concurrency slots. Returns a permit
    /// whose drop releases the slots. Cancellation aborts the wait.
    pub async fn acquire(
        &self,
        desc: TaskDescriptor,
        cancel: &CancellationToken,
    ) -> Result<SchedulePermit> {
        // Rate tokens first: waiting here must not hold any slot
        for key in &desc.resource_keys {
            if let Some(limiter) = self.inner.limiters.get(key) {
                tokio::select! {
                    acquired = limiter.acquire() => acquired?,
                    _ = cancel.cancelled() => {
                        return Err(StrandError::Cancelled {
                            node_id: Some(desc.node_id.to_string()),
                        });
                    }
                }
            }
        }

        // Fast path: slots available now
        {
            let mut state = self.inner.state.lock();
            if self.inner.fits(&state, &desc) {
                self.inner.take(&mut state, &desc);
                return Ok(SchedulePermit {
                    inner: Arc::clone(&self.inner),
                    desc,
                });
            }
        }

        debug!(node_id = %desc.node_id, "waiting for scheduler slots");

        // Slow path: wait in the priority queue until granted
        let waiter = Arc::new(Waiter {
            desc: desc.clone(),
            granted: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        });
        {
            let mut state = self.inner.state.lock();
            // Re-check under the lock: a release may have happened
            if self.inner.fits(&state, &desc) {
                self.inner.take(&mut state, &desc);
                return Ok(SchedulePermit {
                    inner: Arc::clone(&self.inner),
                    desc,
                });
            }
            let priority = desc.priority;
            state.waiters.push(priority, Arc::clone(&waiter));
        }

        tokio::select! {
            _ = waiter.notify.notified() => {
                // Slots were taken on our behalf inside grant_waiters
                Ok(SchedulePermit {
                    inner: Arc::clone(&self.inner),
                    desc,
                })
            }
            _ = cancel.cancelled() => {
                waiter.cancelled.store(true, Ordering::SeqCst);
                // A grant may have raced the cancellation: give it back
                if waiter.granted.load(Ordering::SeqCst) {
                    self.inner.release(&desc);
                }
                Err(StrandError::Cancelled {
                    node_id: Some(desc.node_id.to_string()),
                })
            }
        }
    }

    /// Currently running tasks (for tests and introspection)
    pub fn running(&self) -> usize {
        self.inner.state.lock().running_total
    }

    /// Currently running tasks of one kind
    pub fn running_kind(&self, kind: &str) -> usize {
        self.inner
            .state
            .lock()
            .per_kind
            .get(kind)
            .copied()
            .unwrap_or(0)
    }

    /// Currently running tasks holding one resource key
    pub fn running_resource(&self, key: &str) -> usize {
        self.inner
            .state
            .lock()
            .per_resource
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}
