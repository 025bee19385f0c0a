// GPU-memory-aware job scheduling
//
// Jobs declare how much card memory they need. The scheduler checks up front
// that every job fits on at least one card, then runs a single control loop:
// - reap finished jobs and release their cards
// - dispatch pending jobs onto the first free card that fits
// - sleep for the poll interval
//
// External processes are only observed through non-blocking exit polling.

pub mod process;

use std::fmt;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub use process::{ProcessCommand, ProcessHandle};

use crate::error::{Result, Stage, SubtitleError};
use crate::gpu::{GraphicsCard, ResourcePool};
use crate::shutdown::ShutdownSignal;

/// Something the scheduler can start once a card has been assigned
pub trait JobCommand: Send {
    /// Start the work on `card` without waiting for it to finish
    fn spawn(&mut self, card: &GraphicsCard) -> Result<Box<dyn RunningJob>>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// A started job, observed through non-blocking polling
pub trait RunningJob: Send {
    /// `Some(exit_code)` once the job has exited, `None` while it still runs
    fn try_wait(&mut self) -> Result<Option<i32>>;

    /// Request termination without waiting for the job to exit
    fn kill(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Finished,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "Pending"),
            JobState::Running => write!(f, "Running"),
            JobState::Finished => write!(f, "Finished"),
        }
    }
}

/// A unit of work submitted to the scheduler
pub struct JobRequest {
    pub label: String,
    pub required_memory_gb: f64,
    pub command: Box<dyn JobCommand>,
}

impl JobRequest {
    pub fn new<S: Into<String>>(label: S, required_memory_gb: f64, command: Box<dyn JobCommand>) -> Self {
        Self {
            label: label.into(),
            required_memory_gb,
            command,
        }
    }
}

/// Outcome of one job, reported after the batch ends
#[derive(Debug, Clone)]
pub struct JobReport {
    pub id: usize,
    pub label: String,
    pub required_memory_gb: f64,
    pub state: JobState,
    pub card: Option<u32>,
    pub exit_code: Option<i32>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Finished && self.exit_code == Some(0)
    }
}

struct Job {
    id: usize,
    label: String,
    required_memory_gb: f64,
    command: Box<dyn JobCommand>,
    state: JobState,
    assigned_card: Option<u32>,
    exit_code: Option<i32>,
    handle: Option<Box<dyn RunningJob>>,
}

impl Job {
    fn report(&self) -> JobReport {
        JobReport {
            id: self.id,
            label: self.label.clone(),
            required_memory_gb: self.required_memory_gb,
            state: self.state,
            card: self.assigned_card,
            exit_code: self.exit_code,
        }
    }
}

/// Drives job batches to completion against a fixed card pool
pub struct JobScheduler {
    pool: ResourcePool,
    poll_interval: Duration,
    last_report: Vec<JobReport>,
}

impl JobScheduler {
    pub fn new(pool: ResourcePool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
            last_report: Vec::new(),
        }
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Per-job report of the most recent `run`, however it ended.
    ///
    /// After an interrupt this is the only place jobs that completed before
    /// the signal show up.
    pub fn last_report(&self) -> &[JobReport] {
        &self.last_report
    }

    /// Fail the whole batch if any job cannot fit on any card of the pool
    pub fn admission_check(&self, requests: &[JobRequest]) -> Result<()> {
        let max_capacity = self.pool.max_capacity_gb();
        for request in requests {
            if request.required_memory_gb > max_capacity {
                error!(
                    "Job '{}' needs {:.1} GB, largest card has {:.1} GB",
                    request.label, request.required_memory_gb, max_capacity
                );
                return Err(SubtitleError::InsufficientResources {
                    job: request.label.clone(),
                    required_gb: request.required_memory_gb,
                    available_gb: max_capacity,
                });
            }
        }
        Ok(())
    }

    /// Run a batch until every job has finished.
    ///
    /// Returns the per-job report, or `JobBatchFailed` carrying that report
    /// when at least one job exited unsuccessfully.
    pub async fn run(
        &mut self,
        requests: Vec<JobRequest>,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Vec<JobReport>> {
        self.last_report.clear();
        self.admission_check(&requests)?;

        let mut jobs: Vec<Job> = requests
            .into_iter()
            .enumerate()
            .map(|(id, request)| Job {
                id,
                label: request.label,
                required_memory_gb: request.required_memory_gb,
                command: request.command,
                state: JobState::Pending,
                assigned_card: None,
                exit_code: None,
                handle: None,
            })
            .collect();

        info!("Scheduling {} job(s) on {} card(s)", jobs.len(), self.pool.cards().len());

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if shutdown.is_triggered() {
                return Err(self.abort(&mut jobs));
            }

            self.reap(&mut jobs);
            let dispatched = self.dispatch(&mut jobs);

            let running = count(&jobs, JobState::Running);
            let pending = count(&jobs, JobState::Pending);

            if running == 0 && pending == 0 {
                break;
            }

            if running == 0 && dispatched == 0 {
                // Admission passed but nothing fits anymore; treat as fatal.
                let stuck = jobs
                    .iter()
                    .find(|j| j.state == JobState::Pending)
                    .map(|j| (j.label.clone(), j.required_memory_gb))
                    .unwrap_or_default();
                error!("{} pending job(s) can never be placed", pending);
                self.last_report = jobs.iter().map(Job::report).collect();
                return Err(SubtitleError::InsufficientResources {
                    job: stuck.0,
                    required_gb: stuck.1,
                    available_gb: self.pool.max_free_capacity_gb(),
                });
            }

            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.triggered() => {}
            }
        }

        let report: Vec<JobReport> = jobs.iter().map(Job::report).collect();
        self.last_report = report.clone();
        let failed = report.iter().filter(|r| !r.succeeded()).count();
        if failed > 0 {
            for r in report.iter().filter(|r| !r.succeeded()) {
                error!("Job '{}' failed with exit code {:?}", r.label, r.exit_code);
            }
            return Err(SubtitleError::JobBatchFailed { failed, report });
        }

        info!("All {} job(s) finished successfully", report.len());
        Ok(report)
    }

    fn reap(&mut self, jobs: &mut [Job]) {
        for job in jobs.iter_mut().filter(|j| j.state == JobState::Running) {
            let Some(handle) = job.handle.as_mut() else {
                continue;
            };

            let exit_code = match handle.try_wait() {
                Ok(Some(code)) => Some(code),
                Ok(None) => continue,
                Err(e) => {
                    warn!("Lost track of job '{}': {}", job.label, e);
                    None
                }
            };

            info!("Job '{}' finished with exit code {:?}", job.label, exit_code);
            job.exit_code = exit_code;
            job.state = JobState::Finished;
            job.handle = None;
            if let Some(card) = job.assigned_card {
                self.pool.release(card);
            }
        }
    }

    fn dispatch(&mut self, jobs: &mut [Job]) -> usize {
        let mut dispatched = 0;
        for job in jobs.iter_mut().filter(|j| j.state == JobState::Pending) {
            let Some(card) = self.pool.find_feasible(job.required_memory_gb).cloned() else {
                continue;
            };
            if self.pool.acquire(card.id).is_err() {
                continue;
            }

            job.assigned_card = Some(card.id);
            dispatched += 1;

            match job.command.spawn(&card) {
                Ok(handle) => {
                    info!(
                        "Started job '{}' ({:.1} GB) on card [{}] {}",
                        job.label, job.required_memory_gb, card.id, card.name
                    );
                    debug!("Command: {}", job.command.describe());
                    job.handle = Some(handle);
                    job.state = JobState::Running;
                }
                Err(e) => {
                    error!("Failed to start job '{}': {}", job.label, e);
                    job.state = JobState::Finished;
                    self.pool.release(card.id);
                }
            }
        }
        dispatched
    }

    fn abort(&mut self, jobs: &mut [Job]) -> SubtitleError {
        warn!("Interrupt received, no further jobs will be started");
        // Jobs that exited since the last poll still count as done
        self.reap(jobs);
        for job in jobs.iter_mut().filter(|j| j.state == JobState::Running) {
            if let Some(mut handle) = job.handle.take() {
                handle.kill();
            }
            job.state = JobState::Finished;
            if let Some(card) = job.assigned_card {
                self.pool.release(card);
            }
        }

        self.last_report = jobs.iter().map(Job::report).collect();
        SubtitleError::Interrupted {
            stage: Stage::Scheduling,
            finished: count(jobs, JobState::Finished),
            pending: count(jobs, JobState::Pending),
        }
    }
}

fn count(jobs: &[Job], state: JobState) -> usize {
    jobs.iter().filter(|j| j.state == state).count()
}
