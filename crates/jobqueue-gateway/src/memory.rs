//! In-memory scheduler: a programmable stand-in for the real one.
//!
//! Jobs live in a map and move from PENDING to RUNNING either when a test
//! says so or, with `start_after`, once enough (tokio) time has passed
//! since submission. Works with paused time in tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use jobqueue_core::{JobFilter, JobRecord, JobState};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{CancelReport, ReservationInfo, SchedulerGateway, cancel_matching};
use crate::script::JobScript;

#[derive(Debug, Clone)]
struct FakeJob {
    name: String,
    user: String,
    state: JobState,
    submitted_at: Instant,
    start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    jobs: BTreeMap<u64, FakeJob>,
    reservations: HashMap<String, ReservationInfo>,
    start_after: Option<Duration>,
    failing_lists: u32,
    broken: bool,
    reject_submissions: bool,
    submissions: Vec<JobScript>,
    cancel_requests: Vec<Option<String>>,
    cancelled: Vec<String>,
}

impl Inner {
    /// Promote pending jobs whose start delay has elapsed.
    fn refresh(&mut self) {
        let Some(delay) = self.start_after else {
            return;
        };
        for job in self.jobs.values_mut() {
            if job.state == JobState::Pending && job.submitted_at.elapsed() >= delay {
                job.state = JobState::Running;
                job.start_time = Some(Utc::now());
            }
        }
    }

    fn check_broken(&self, program: &str) -> GatewayResult<()> {
        if self.broken {
            return Err(GatewayError::Spawn {
                program: program.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Ok(())
    }
}

fn record(id: u64, job: &FakeJob) -> JobRecord {
    JobRecord {
        job_id: id.to_string(),
        name: job.name.clone(),
        state: job.state.clone(),
        start_time: job.start_time,
    }
}

/// A scheduler that lives entirely in memory.
#[derive(Debug)]
pub struct InMemoryScheduler {
    user: String,
    inner: Mutex<Inner>,
}

impl InMemoryScheduler {
    /// Create an empty scheduler whose jobs belong to `user`.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            inner: Mutex::new(Inner {
                next_id: 1000,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock only happens in a failing test.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Submitted jobs start running once `delay` has passed.
    pub fn with_start_after(self, delay: Duration) -> Self {
        self.lock().start_after = Some(delay);
        self
    }

    pub fn set_start_after(&self, delay: Option<Duration>) {
        self.lock().start_after = delay;
    }

    /// Seed a job directly, bypassing submission.
    pub fn add_job(
        &self,
        name: impl Into<String>,
        state: JobState,
        start_time: Option<DateTime<Utc>>,
    ) -> String {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let user = self.user.clone();
        inner.jobs.insert(
            id,
            FakeJob {
                name: name.into(),
                user,
                state,
                submitted_at: Instant::now(),
                start_time,
            },
        );
        id.to_string()
    }

    /// Force a job into `state`.
    pub fn set_state(&self, job_id: &str, state: JobState) {
        let mut inner = self.lock();
        if let Some(job) = job_id.parse::<u64>().ok().and_then(|id| inner.jobs.get_mut(&id)) {
            if state == JobState::Running && job.start_time.is_none() {
                job.start_time = Some(Utc::now());
            }
            job.state = state;
        }
    }

    /// Mark every pending job whose name starts with `prefix` as running.
    pub fn start_jobs(&self, prefix: &str) -> usize {
        let mut inner = self.lock();
        let mut started = 0;
        for job in inner.jobs.values_mut() {
            if job.name.starts_with(prefix) && job.state == JobState::Pending {
                job.state = JobState::Running;
                job.start_time = Some(Utc::now());
                started += 1;
            }
        }
        started
    }

    /// Define or replace a reservation.
    pub fn set_reservation(&self, name: &str, partition: Option<&str>, active: bool) {
        self.lock().reservations.insert(
            name.to_string(),
            ReservationInfo {
                name: name.to_string(),
                partition: partition.map(str::to_string),
                active,
            },
        );
    }

    /// The next `count` job listings fail with a transient error.
    pub fn fail_next_lists(&self, count: u32) {
        self.lock().failing_lists = count;
    }

    /// Every call fails as if the scheduler CLI were missing.
    pub fn set_broken(&self, broken: bool) {
        self.lock().broken = broken;
    }

    pub fn set_reject_submissions(&self, reject: bool) {
        self.lock().reject_submissions = reject;
    }

    /// Every script submitted, in order.
    pub fn submissions(&self) -> Vec<JobScript> {
        self.lock().submissions.clone()
    }

    /// Name prefixes passed to `cancel_jobs`, in call order.
    pub fn cancel_requests(&self) -> Vec<Option<String>> {
        self.lock().cancel_requests.clone()
    }

    /// Ids of jobs cancelled so far, in order.
    pub fn cancelled(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    /// Jobs still known to the scheduler.
    pub fn jobs(&self) -> Vec<JobRecord> {
        let mut inner = self.lock();
        inner.refresh();
        inner.jobs.iter().map(|(id, job)| record(*id, job)).collect()
    }
}

#[async_trait]
impl SchedulerGateway for InMemoryScheduler {
    fn user(&self) -> &str {
        &self.user
    }

    async fn list_jobs(&self, filter: &JobFilter) -> GatewayResult<Vec<JobRecord>> {
        let mut inner = self.lock();
        inner.check_broken("squeue")?;
        if inner.failing_lists > 0 {
            inner.failing_lists -= 1;
            return Err(GatewayError::CommandFailed {
                program: "squeue".to_string(),
                status: Some(1),
                stderr: "Unable to contact slurm controller".to_string(),
            });
        }
        inner.refresh();

        Ok(inner
            .jobs
            .iter()
            .filter(|(_, job)| filter.user.as_ref().is_none_or(|u| *u == job.user))
            .filter(|(_, job)| filter.matches_name(&job.name))
            .map(|(id, job)| record(*id, job))
            .collect())
    }

    async fn describe_job(&self, job_id: &str) -> GatewayResult<JobRecord> {
        let mut inner = self.lock();
        inner.check_broken("squeue")?;
        inner.refresh();
        job_id
            .parse::<u64>()
            .ok()
            .and_then(|id| inner.jobs.get(&id).map(|job| record(id, job)))
            .ok_or_else(|| GatewayError::NotFound(job_id.to_string()))
    }

    async fn submit(&self, script: &JobScript) -> GatewayResult<String> {
        let mut inner = self.lock();
        inner.check_broken("sbatch")?;
        if inner.reject_submissions {
            return Err(GatewayError::Rejected(format!(
                "invalid partition specified: {}",
                script.resources.queue()
            )));
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.jobs.insert(
            id,
            FakeJob {
                name: script.name.clone(),
                user: self.user.clone(),
                state: JobState::Pending,
                submitted_at: Instant::now(),
                start_time: None,
            },
        );
        inner.submissions.push(script.clone());
        Ok(id.to_string())
    }

    async fn cancel_job(&self, job_id: &str) -> GatewayResult<()> {
        let mut inner = self.lock();
        inner.check_broken("scancel")?;
        let removed = job_id
            .parse::<u64>()
            .ok()
            .and_then(|id| inner.jobs.remove(&id));
        match removed {
            Some(_) => {
                inner.cancelled.push(job_id.to_string());
                Ok(())
            }
            None => Err(GatewayError::NotFound(job_id.to_string())),
        }
    }

    async fn reservation(&self, name: &str) -> GatewayResult<Option<ReservationInfo>> {
        let inner = self.lock();
        inner.check_broken("scontrol")?;
        Ok(inner.reservations.get(name).cloned())
    }

    async fn cancel_jobs(&self, filter: &JobFilter) -> CancelReport {
        self.lock().cancel_requests.push(filter.name_prefix.clone());
        cancel_matching(self, filter).await
    }
}
