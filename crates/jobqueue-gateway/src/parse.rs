//! Parsers for scheduler CLI output.
//!
//! Each parser works on plain strings so it can be tested against
//! captured output without a scheduler.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

use jobqueue_core::{JobRecord, JobState};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::ReservationInfo;

/// `squeue --format` string matching [`parse_squeue_line`]:
/// job id, job name, long state, start time.
pub const SQUEUE_FORMAT: &str = "%i|%j|%T|%S";

const SCHEDULER_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse one line of `squeue --noheader --format=%i|%j|%T|%S`.
///
/// Returns `None` for lines that do not have that shape.
pub fn parse_squeue_line(line: &str) -> Option<JobRecord> {
    let fields: Vec<&str> = line.trim().split('|').collect();
    let [job_id, name, state, start] = fields.as_slice() else {
        return None;
    };

    let job_id = job_id.trim();
    if job_id.is_empty() {
        return None;
    }

    Some(JobRecord {
        job_id: job_id.to_string(),
        name: name.trim().to_string(),
        state: JobState::parse(state),
        start_time: parse_start_time(start).ok()?,
    })
}

/// Parse a whole squeue listing, skipping blank and malformed lines.
pub fn parse_squeue_output(stdout: &str) -> Vec<JobRecord> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let record = parse_squeue_line(line);
            if record.is_none() {
                warn!(%line, "skipping malformed squeue line");
            }
            record
        })
        .collect()
}

/// Parse a scheduler start time. `N/A`, `Unknown` and `None` mean the job
/// has not been scheduled yet. Times are in the scheduler host's local zone.
pub fn parse_start_time(raw: &str) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    let raw = raw.trim();
    if matches!(raw, "N/A" | "Unknown" | "None" | "") {
        return Ok(None);
    }

    let naive = NaiveDateTime::parse_from_str(raw, SCHEDULER_TIME_FORMAT)?;
    Ok(Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc)))
}

/// Extract the job id from `sbatch --parsable` output (`id` or `id;cluster`).
pub fn parse_sbatch_output(stdout: &str) -> GatewayResult<String> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| GatewayError::Parse("empty sbatch output".to_string()))?;

    let job_id = line.split(';').next().unwrap_or(line).trim();
    if job_id.is_empty() || !job_id.chars().all(|c| c.is_ascii_digit() || c == '_') {
        return Err(GatewayError::Parse(format!("unexpected sbatch output: {line}")));
    }
    Ok(job_id.to_string())
}

/// Parse `scontrol show reservation <name> --oneliner`.
///
/// Returns `None` when the output names no matching reservation.
pub fn parse_reservation(stdout: &str, name: &str) -> Option<ReservationInfo> {
    stdout.lines().find_map(|line| {
        let mut reservation_name = None;
        let mut partition = None;
        let mut state = None;

        for token in line.split_whitespace() {
            match token.split_once('=') {
                Some(("ReservationName", v)) => reservation_name = Some(v),
                Some(("PartitionName", v)) if !v.is_empty() && v != "(null)" => {
                    partition = Some(v.to_string())
                }
                Some(("State", v)) => state = Some(v),
                _ => {}
            }
        }

        (reservation_name? == name).then(|| ReservationInfo {
            name: name.to_string(),
            partition,
            active: state.is_some_and(|s| s.eq_ignore_ascii_case("ACTIVE")),
        })
    })
}
