//! Periodic job scheduler
//!
//! Fires named jobs on a fixed interval. Each job runs as a spawned task
//! that sleeps between firings and reacts to cancellation, so `remove` and
//! `stop` take effect immediately.

use crate::clock::BoundedClock;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A named periodic job.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub interval: Duration,
}

impl Job {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
        }
    }
}

/// A single firing of a job.
#[derive(Debug, Clone)]
pub struct SchedulerEvent {
    pub job_name: String,
    pub scheduled_time: DateTime<Utc>,
    pub triggered_time: DateTime<Utc>,
}

/// Receives job firings. Implementations must not block; long work should be
/// handed off to the runtime.
pub trait SchedulerListener: Send + Sync {
    fn triggered(&self, event: SchedulerEvent);
}

/// Scheduler engine managing named interval jobs.
pub struct SchedulerEngine {
    clock: Arc<BoundedClock>,
    listeners: RwLock<Vec<Arc<dyn SchedulerListener>>>,
    jobs: Mutex<HashMap<String, CancellationToken>>,
}

impl SchedulerEngine {
    pub fn new(clock: Arc<BoundedClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            listeners: RwLock::new(Vec::new()),
            jobs: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, listener: Arc<dyn SchedulerListener>) {
        self.listeners.write().push(listener);
    }

    /// Add a job, replacing any existing job with the same name. The first
    /// firing happens one full interval after registration.
    pub fn add(self: &Arc<Self>, job: Job) {
        let token = CancellationToken::new();
        if let Some(previous) = self.jobs.lock().insert(job.name.clone(), token.clone()) {
            previous.cancel();
        }
        debug!(job = %job.name, interval = ?job.interval, "scheduling job");

        let engine = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(job.interval) => {
                        let Some(engine) = engine.upgrade() else { break };
                        engine.fire(&job.name);
                    }
                }
            }
        });
    }

    /// Remove a job; returns whether a job with that name was scheduled.
    pub fn remove(&self, name: &str) -> bool {
        match self.jobs.lock().remove(name) {
            Some(token) => {
                token.cancel();
                debug!(job = %name, "removed job");
                true
            }
            None => false,
        }
    }

    /// Cancel all jobs.
    pub fn stop(&self) {
        let mut jobs = self.jobs.lock();
        for (name, token) in jobs.drain() {
            trace!(job = %name, "stopping job");
            token.cancel();
        }
    }

    pub fn scheduled_job_names(&self) -> Vec<String> {
        self.jobs.lock().keys().cloned().collect()
    }

    fn fire(&self, job_name: &str) {
        let now = self.clock.now();
        let event = SchedulerEvent {
            job_name: job_name.to_string(),
            scheduled_time: now,
            triggered_time: now,
        };
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener.triggered(event.clone());
        }
    }
}
