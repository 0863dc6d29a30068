//! Classification of a job listing for one readiness check.

use std::time::Duration;

use chrono::{DateTime, Utc};

use jobqueue_core::{JobRecord, JobState};

/// Whether a job counts for the current attempt.
///
/// Jobs without a start time are always recent. A start time in the future
/// (clock skew between us and the scheduler) also counts. The window
/// boundary is inclusive.
pub fn is_recent(job: &JobRecord, now: DateTime<Utc>, window: Duration) -> bool {
    let Some(started) = job.start_time else {
        return true;
    };
    match (now - started).to_std() {
        Ok(age) => age <= window,
        Err(_) => true,
    }
}

/// Recent jobs, split by state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobCensus {
    pub running: Vec<String>,
    pub pending: Vec<String>,
    /// Finished or failed jobs.
    pub finished: Vec<String>,
    /// Jobs in a state we do not recognise; ignored for this cycle.
    pub unrecognized: Vec<String>,
    /// Jobs skipped because they started outside the window.
    pub stale: usize,
}

impl JobCensus {
    /// Sort `jobs` into buckets, dropping those outside the recency window.
    pub fn take(jobs: &[JobRecord], now: DateTime<Utc>, window: Duration) -> Self {
        let mut census = Self::default();
        for job in jobs {
            if !is_recent(job, now, window) {
                census.stale += 1;
                continue;
            }
            let id = job.job_id.clone();
            match &job.state {
                JobState::Running => census.running.push(id),
                JobState::Pending => census.pending.push(id),
                state if state.is_finished() => census.finished.push(id),
                _ => census.unrecognized.push(id),
            }
        }
        census
    }

    /// Number of recent jobs of any state.
    pub fn recent(&self) -> usize {
        self.running.len() + self.pending.len() + self.finished.len() + self.unrecognized.len()
    }
}
