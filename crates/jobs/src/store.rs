// crates/jobs/src/store.rs
//! Registry of live jobs plus the background eviction sweep.

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock, Weak};
use std::thread;
use std::time::Duration;

use crate::job::{Job, JobStatus, JobType};

const JOB_ID_LEN: usize = 12;
const HEX: &[u8; 16] = b"0123456789abcdef";

/// Tuning knobs for a [`JobStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Soft cap on stored jobs. Only terminal jobs are evicted to get back
    /// under it, so active jobs can push the store past the cap.
    pub max_jobs: usize,
    /// Age (from `created_at`) after which a terminal job expires. Zero
    /// means every terminal job is removed by the next sweep.
    pub ttl_hours: i64,
    /// How long the sweep thread sleeps between passes.
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_jobs: 200,
            ttl_hours: 24,
            sweep_interval: Duration::from_secs(300),
        }
    }
}

/// Stats surface for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_jobs: usize,
    pub status_counts: BTreeMap<&'static str, usize>,
    pub max_jobs: usize,
    pub ttl_hours: i64,
}

/// What one eviction pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Terminal jobs past their TTL.
    pub expired: usize,
    /// Terminal jobs removed in LRU order to get back under `max_jobs`.
    pub evicted: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.expired + self.evicted
    }
}

struct StoreInner {
    jobs: RwLock<HashMap<String, Arc<Job>>>,
    config: StoreConfig,
}

/// Owns the collection of jobs. Cheap to clone; all clones share state.
///
/// Locking is two-tier: this map-level lock guards only the id→job mapping
/// and is never held while a job's own lock is taken, so there is no lock
/// order to get wrong.
///
/// Construction spawns the `job-sweeper` thread, which wakes every
/// `sweep_interval` and runs a TTL pass then an LRU pass (see [`Self::sweep`]).
/// The thread holds only a weak reference and exits once the last store
/// handle is dropped.
#[derive(Clone)]
pub struct JobStore {
    inner: Arc<StoreInner>,
}

impl JobStore {
    pub fn new(config: StoreConfig) -> Self {
        let inner = Arc::new(StoreInner {
            jobs: RwLock::new(HashMap::new()),
            config,
        });
        spawn_sweeper(&inner);
        Self { inner }
    }

    pub fn with_defaults() -> Self {
        Self::new(StoreConfig::default())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Create a fresh job in state `queued` and return a handle to it.
    ///
    /// When the store is already at `max_jobs`, an eager eviction pass runs
    /// first; if every held job is active the insert still goes through
    /// (the cap is soft, never a rejection).
    pub fn create(&self, job_type: JobType) -> Arc<Job> {
        if self.len() >= self.inner.config.max_jobs {
            let swept = self.sweep();
            tracing::debug!(
                expired = swept.expired,
                evicted = swept.evicted,
                "eager eviction before insert"
            );
        }

        loop {
            let id = new_job_id();
            let mut jobs = self
                .inner
                .jobs
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            // Collision on a 48-bit token: retry with a new one.
            if jobs.contains_key(&id) {
                continue;
            }
            let job = Arc::new(Job::new(id.clone(), job_type));
            jobs.insert(id.clone(), Arc::clone(&job));
            drop(jobs);
            tracing::info!(job_id = %id, job_type = %job_type, "job created");
            return job;
        }
    }

    /// Look up a job and bump its `last_accessed_at`.
    pub fn get(&self, id: &str) -> Option<Arc<Job>> {
        let job = {
            let jobs = self
                .inner
                .jobs
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            jobs.get(id).cloned()
        };
        if let Some(job) = &job {
            let _ = job.status();
        }
        job
    }

    pub fn len(&self) -> usize {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All current jobs, in no particular order. Read-only consumers
    /// (dashboards) snapshot from here.
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        let mut status_counts: BTreeMap<&'static str, usize> =
            JobStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
        let jobs = self.jobs();
        for job in &jobs {
            // sweep_view avoids bumping last_accessed_at from the stats path.
            *status_counts.entry(job.sweep_view().status.as_str()).or_default() += 1;
        }
        StoreStats {
            total_jobs: jobs.len(),
            status_counts,
            max_jobs: self.inner.config.max_jobs,
            ttl_hours: self.inner.config.ttl_hours,
        }
    }

    /// One eviction pass: TTL first, then LRU down to `max_jobs`.
    ///
    /// Jobs in `queued` or `running` are never touched by either pass, so the
    /// store may stay above the cap while enough jobs are active. Normally
    /// driven by the sweeper thread; `create` also calls it under pressure.
    pub fn sweep(&self) -> SweepStats {
        self.inner.sweep()
    }
}

impl StoreInner {
    fn sweep(&self) -> SweepStats {
        let now = Utc::now();
        let ttl = chrono::Duration::hours(self.config.ttl_hours);

        // Inspect outside the map lock; per-job locks are taken one at a time.
        let views: Vec<_> = {
            let jobs = self
                .jobs
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            jobs.iter()
                .map(|(id, job)| (id.clone(), job.sweep_view()))
                .collect()
        };

        let mut stats = SweepStats::default();
        let mut doomed: Vec<String> = Vec::new();

        for (id, view) in &views {
            if view.status.is_terminal() && now - view.created_at >= ttl {
                doomed.push(id.clone());
            }
        }
        stats.expired = doomed.len();

        let remaining = views.len() - stats.expired;
        if remaining > self.config.max_jobs {
            let mut lru: Vec<_> = views
                .iter()
                .filter(|(id, view)| view.status.is_terminal() && !doomed.contains(id))
                .collect();
            lru.sort_by_key(|(_, view)| view.last_accessed_at);
            let excess = remaining - self.config.max_jobs;
            for (id, _) in lru.into_iter().take(excess) {
                doomed.push(id.clone());
                stats.evicted += 1;
            }
        }

        if !doomed.is_empty() {
            let mut jobs = self
                .jobs
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for id in &doomed {
                jobs.remove(id);
            }
            drop(jobs);
            tracing::info!(
                expired = stats.expired,
                evicted = stats.evicted,
                "sweep removed terminal jobs"
            );
        }

        stats
    }
}

fn spawn_sweeper(inner: &Arc<StoreInner>) {
    let weak: Weak<StoreInner> = Arc::downgrade(inner);
    let interval = inner.config.sweep_interval;
    let spawned = thread::Builder::new()
        .name("job-sweeper".to_string())
        .spawn(move || loop {
            thread::sleep(interval);
            let Some(store) = weak.upgrade() else {
                break;
            };
            run_guarded(|| {
                store.sweep();
            });
        });
    if let Err(error) = spawned {
        tracing::error!(%error, "failed to spawn job-sweeper thread");
    }
}

/// Run one sweep pass, discarding a panic so the next tick still fires.
fn run_guarded<F: FnOnce()>(pass: F) {
    if panic::catch_unwind(AssertUnwindSafe(pass)).is_err() {
        tracing::warn!("job sweep panicked; next pass runs on schedule");
    }
}

fn new_job_id() -> String {
    let mut rng = rand::thread_rng();
    (0..JOB_ID_LEN)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}
