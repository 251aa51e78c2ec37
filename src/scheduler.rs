//! Recurring-job port and its cron-backed adapter.
//!
//! The mailing service only ever sees [`Scheduler`]: register a job against a
//! [`YearlySchedule`], get a [`JobHandle`] back, cancel it later. The
//! [`CronScheduler`] adapter runs one timer task per job on the tokio runtime
//! and spawns every fire as its own task, so a slow send never delays the
//! next timer.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::BirthDate;

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Work performed on every fire. Called once per fire; each call produces an
/// independent future.
pub type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(u64);

impl JobHandle {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Once-a-year recurrence: minute and hour come from the birth timestamp,
/// day and month from its calendar date, day-of-week is wildcarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearlySchedule {
    pub minute: u32,
    pub hour: u32,
    pub day: u32,
    pub month: u32,
}

impl YearlySchedule {
    /// Six-field expression understood by the `cron` crate (seconds first).
    pub fn cron_expression(&self) -> String {
        format!("0 {self}")
    }
}

impl From<&BirthDate> for YearlySchedule {
    fn from(date: &BirthDate) -> Self {
        Self {
            minute: date.minute(),
            hour: date.hour(),
            day: date.day(),
            month: date.month(),
        }
    }
}

/// Classic five-field crontab form, `minute hour day month *`.
impl fmt::Display for YearlySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {} *", self.minute, self.hour, self.day, self.month)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("The scheduler has been shut down.")]
    Stopped,
    #[error("Invalid schedule `{spec}`: {reason}")]
    InvalidSpec { spec: String, reason: String },
}

pub trait Scheduler: Send + Sync {
    fn schedule(&self, spec: &YearlySchedule, job: Job) -> Result<JobHandle, SchedulerError>;

    /// Unknown, already-cancelled and finished handles are ignored.
    fn cancel(&self, handle: JobHandle);
}

pub struct CronScheduler {
    runtime: Handle,
    jobs: Mutex<HashMap<JobHandle, JoinHandle<()>>>,
    next_id: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl CronScheduler {
    pub fn new(runtime: Handle) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            runtime,
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown,
        }
    }

    /// Stops every timer. Fires that already started keep running to
    /// completion on their own tasks.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let timers: Vec<_> = self.jobs.lock().drain().collect();
        tracing::info!(jobs = timers.len(), "Scheduler stopped");
        for (_, timer) in timers {
            timer.abort();
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.lock().len()
    }
}

impl Scheduler for CronScheduler {
    fn schedule(&self, spec: &YearlySchedule, job: Job) -> Result<JobHandle, SchedulerError> {
        if self.is_stopped() {
            return Err(SchedulerError::Stopped);
        }
        let expression = spec.cron_expression();
        let schedule =
            cron::Schedule::from_str(&expression).map_err(|e| SchedulerError::InvalidSpec {
                spec: spec.to_string(),
                reason: e.to_string(),
            })?;

        let handle = JobHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let timer = self.runtime.spawn(run_timer(
            handle,
            schedule,
            job,
            self.shutdown.subscribe(),
        ));
        self.jobs.lock().insert(handle, timer);
        tracing::debug!(job = %handle, schedule = %spec, "Job scheduled");
        Ok(handle)
    }

    fn cancel(&self, handle: JobHandle) {
        if let Some(timer) = self.jobs.lock().remove(&handle) {
            timer.abort();
            tracing::debug!(job = %handle, "Job cancelled");
        }
    }
}

async fn run_timer(
    handle: JobHandle,
    schedule: cron::Schedule,
    job: Job,
    mut shutdown: watch::Receiver<bool>,
) {
    // Occurrences are taken strictly after the last fire so an early wake-up
    // can never fire the same occurrence twice.
    let mut cursor = Utc::now();
    while let Some(next) = schedule.after(&cursor).next() {
        let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                tracing::info!(job = %handle, fired_at = %next, "Scheduled job fired");
                tokio::spawn(job());
                cursor = next;
            }
            _ = shutdown.changed() => break,
        }
    }
}
