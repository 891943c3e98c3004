//! Deferred jobs.
//!
//! Event receivers must return quickly, so anything that touches the store is
//! handed to the job service as a [`Job`]. Jobs are fire-and-forget: there is
//! no ordering between them and no retry. Each job runs as its own task, its
//! store call goes to the blocking pool, and it is bounded by a deadline.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::boot::{restore_armed_triggers, BootReport};
use crate::db::ReminderStore;
use crate::error::QueueError;
use crate::scheduler::TriggerScheduler;
use crate::types::{Place, ReminderId};

/// Override deadline for a single-field update job.
pub const RECONCILE_DEADLINE: Duration = Duration::from_secs(10);
/// Override deadline for the boot job.
pub const BOOT_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Flip the date-time armed flag, keeping the stored timestamp.
    SetDateTimeArmed { id: ReminderId, armed: bool },
    /// Set the location armed flag together with the place (cleared when `None`).
    SetLocationArmed {
        id: ReminderId,
        armed: bool,
        place: Option<Place>,
    },
    SetCompleted { id: ReminderId, completed: bool },
    /// Re-create the alarms and geofences lost at shutdown.
    RestoreAfterBoot,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::SetDateTimeArmed { .. } => "set_date_time_armed",
            Job::SetLocationArmed { .. } => "set_location_armed",
            Job::SetCompleted { .. } => "set_completed",
            Job::RestoreAfterBoot => "restore_after_boot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobDeadlines {
    pub reconcile: Duration,
    pub boot: Duration,
}

impl Default for JobDeadlines {
    fn default() -> Self {
        Self {
            reconcile: RECONCILE_DEADLINE,
            boot: BOOT_DEADLINE,
        }
    }
}

impl JobDeadlines {
    fn for_job(&self, job: &Job) -> Duration {
        match job {
            Job::RestoreAfterBoot => self.boot,
            _ => self.reconcile,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// A store update ran; zero rows means the reminder was already gone.
    Applied { rows: usize },
    Restored(BootReport),
    TimedOut,
    Failed(String),
}

/// Sent once per finished job, the equivalent of telling the OS scheduler
/// the job is done.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job: Job,
    pub outcome: JobOutcome,
}

/// Cheap, cloneable handle for handing jobs to the [`JobService`].
#[derive(Clone)]
pub struct JobScheduler {
    tx: mpsc::Sender<Job>,
}

impl JobScheduler {
    /// Enqueue without waiting. Fails if the queue is full or the service is gone.
    pub fn schedule(&self, job: Job) -> Result<(), QueueError> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => QueueError::Full(job),
            mpsc::error::TrySendError::Closed(job) => QueueError::Closed(job),
        })
    }

    /// Enqueue and log instead of failing. For receivers, which cannot do
    /// anything about a full queue.
    pub fn schedule_or_log(&self, job: Job) {
        if let Err(e) = self.schedule(job) {
            tracing::warn!("Dropping job: {e}");
        }
    }
}

struct JobContext {
    store: Arc<dyn ReminderStore>,
    triggers: Arc<TriggerScheduler>,
    deadlines: JobDeadlines,
}

/// Executes jobs handed over through a [`JobScheduler`].
pub struct JobService {
    rx: mpsc::Receiver<Job>,
    ctx: Arc<JobContext>,
    finished: Option<mpsc::UnboundedSender<JobReport>>,
}

/// Create a bounded job queue and the service that drains it.
pub fn job_queue(
    capacity: usize,
    store: Arc<dyn ReminderStore>,
    triggers: Arc<TriggerScheduler>,
    deadlines: JobDeadlines,
) -> (JobScheduler, JobService) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let service = JobService {
        rx,
        ctx: Arc::new(JobContext {
            store,
            triggers,
            deadlines,
        }),
        finished: None,
    };
    (JobScheduler { tx }, service)
}

impl JobService {
    /// Receive a [`JobReport`] for every job that finishes.
    pub fn report_to(mut self, finished: mpsc::UnboundedSender<JobReport>) -> Self {
        self.finished = Some(finished);
        self
    }

    /// Run until every [`JobScheduler`] is dropped (in-flight jobs are drained)
    /// or `shutdown` flips to true (in-flight jobs are aborted and their
    /// mutations never land).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut running: JoinSet<JobReport> = JoinSet::new();
        let mut watching = true;

        loop {
            tokio::select! {
                job = self.rx.recv() => match job {
                    Some(job) => {
                        tracing::debug!("Starting job {}", job.name());
                        running.spawn(execute(Arc::clone(&self.ctx), job));
                    }
                    None => break,
                },
                Some(done) = running.join_next(), if !running.is_empty() => {
                    self.finish(done);
                }
                changed = shutdown.changed(), if watching => match changed {
                    Ok(()) if *shutdown.borrow() => {
                        let aborted = running.len();
                        running.shutdown().await;
                        tracing::info!("Job service torn down, {aborted} job(s) aborted");
                        return;
                    }
                    Ok(()) => {}
                    Err(_) => watching = false,
                },
            }
        }

        while let Some(done) = running.join_next().await {
            self.finish(done);
        }
        tracing::debug!("Job queue closed");
    }

    fn finish(&self, done: Result<JobReport, tokio::task::JoinError>) {
        match done {
            Ok(report) => {
                match &report.outcome {
                    JobOutcome::Applied { rows: 0 } => tracing::debug!(
                        "Job {} finished, reminder no longer exists",
                        report.job.name()
                    ),
                    JobOutcome::TimedOut => {
                        tracing::warn!("Job {} missed its deadline", report.job.name())
                    }
                    JobOutcome::Failed(e) => {
                        tracing::warn!("Job {} failed: {e}", report.job.name())
                    }
                    outcome => tracing::debug!("Job {} finished: {outcome:?}", report.job.name()),
                }
                if let Some(finished) = &self.finished {
                    let _ = finished.send(report);
                }
            }
            Err(e) => tracing::error!("Job task join error: {e}"),
        }
    }
}

async fn execute(ctx: Arc<JobContext>, job: Job) -> JobReport {
    let deadline = ctx.deadlines.for_job(&job);
    let outcome = match tokio::time::timeout(deadline, apply(&ctx, &job)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => JobOutcome::Failed(e.to_string()),
        Err(_) => JobOutcome::TimedOut,
    };
    JobReport { job, outcome }
}

async fn apply(ctx: &JobContext, job: &Job) -> Result<JobOutcome> {
    let store = Arc::clone(&ctx.store);
    let rows = match job.clone() {
        Job::SetDateTimeArmed { id, armed } => {
            tokio::task::spawn_blocking(move || store.set_date_time_armed_flag(id, armed)).await??
        }
        Job::SetLocationArmed { id, armed, place } => {
            tokio::task::spawn_blocking(move || {
                store.set_location_armed(id, armed, place.as_ref())
            })
            .await??
        }
        Job::SetCompleted { id, completed } => {
            tokio::task::spawn_blocking(move || store.set_completed(id, completed)).await??
        }
        Job::RestoreAfterBoot => {
            let report = restore_armed_triggers(store, &ctx.triggers).await?;
            return Ok(JobOutcome::Restored(report));
        }
    };
    Ok(JobOutcome::Applied { rows })
}
