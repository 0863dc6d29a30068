//! Quantities used in resource requests: memory, walltime, durations.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::{ConfigError, ConfigResult};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;

/// A memory amount, stored in bytes.
///
/// Single-letter suffixes (`4G`) follow the scheduler convention and are
/// binary; two-letter decimal suffixes (`4GB`) are powers of ten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryQuantity {
    bytes: u64,
}

impl MemoryQuantity {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self { bytes }
    }

    pub const fn from_gib(gib: u64) -> Self {
        Self { bytes: gib * GIB }
    }

    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Half of this amount, never below one mebibyte.
    pub fn halved(&self) -> Self {
        Self {
            bytes: (self.bytes / 2).max(MIB),
        }
    }

    /// Divide evenly across `parts` (e.g. per worker process).
    pub fn split(&self, parts: u32) -> Self {
        Self {
            bytes: self.bytes / u64::from(parts.max(1)),
        }
    }

    /// Render as an sbatch `--mem` value in mebibytes, rounded up.
    pub fn to_slurm(&self) -> String {
        format!("{}M", self.bytes.div_ceil(MIB))
    }
}

impl FromStr for MemoryQuantity {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);

        let value: f64 = number
            .parse()
            .map_err(|_| ConfigError::InvalidMemory(s.to_string()))?;

        let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "ki" | "kib" => KIB,
            "kb" => 1_000,
            "m" | "mi" | "mib" => MIB,
            "mb" => 1_000_000,
            "g" | "gi" | "gib" => GIB,
            "gb" => 1_000_000_000,
            "t" | "ti" | "tib" => TIB,
            "tb" => 1_000_000_000_000,
            _ => return Err(ConfigError::InvalidMemory(s.to_string())),
        };

        let bytes = (value * multiplier as f64).round() as u64;
        if bytes == 0 {
            return Err(ConfigError::InvalidMemory(s.to_string()));
        }
        Ok(Self { bytes })
    }
}

impl fmt::Display for MemoryQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, name) in [(TIB, "TiB"), (GIB, "GiB"), (MIB, "MiB"), (KIB, "KiB")] {
            if self.bytes >= unit && self.bytes % unit == 0 {
                return write!(f, "{} {name}", self.bytes / unit);
            }
        }
        write!(f, "{} B", self.bytes)
    }
}

impl Serialize for MemoryQuantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Maximum run time of a scheduler job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Walltime(Duration);

impl Walltime {
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub const fn as_duration(&self) -> Duration {
        self.0
    }

    /// Whole hours, rounded down.
    pub const fn hours(&self) -> u64 {
        self.0.as_secs() / 3600
    }
}

impl FromStr for Walltime {
    type Err = ConfigError;

    /// Accepts the scheduler's forms: `MM`, `MM:SS`, `HH:MM:SS`,
    /// `D-HH`, `D-HH:MM`, `D-HH:MM:SS`.
    fn from_str(s: &str) -> ConfigResult<Self> {
        let s = s.trim();
        let invalid = || ConfigError::InvalidWalltime(s.to_string());

        let (days, rest) = match s.split_once('-') {
            Some((d, rest)) => (d.parse::<u64>().map_err(|_| invalid())?, Some(rest)),
            None => (0, None),
        };

        let fields: Vec<u64> = rest
            .unwrap_or(s)
            .split(':')
            .map(|part| part.parse::<u64>().map_err(|_| invalid()))
            .collect::<ConfigResult<_>>()?;

        let secs = match (rest.is_some(), fields.as_slice()) {
            (false, [m]) => m * 60,
            (false, [m, sec]) => m * 60 + sec,
            (false, [h, m, sec]) => h * 3600 + m * 60 + sec,
            (true, [h]) => h * 3600,
            (true, [h, m]) => h * 3600 + m * 60,
            (true, [h, m, sec]) => h * 3600 + m * 60 + sec,
            _ => return Err(invalid()),
        };

        let total = days * 86_400 + secs;
        if total == 0 {
            return Err(invalid());
        }
        Ok(Self(Duration::from_secs(total)))
    }
}

impl fmt::Display for Walltime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        write!(
            f,
            "{:02}:{:02}:{:02}",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    }
}

impl Serialize for Walltime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "2h" or bare seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| invalid())
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .map(|h| Duration::from_secs(h * 3600))
            .map_err(|_| invalid())
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_memory_values() {
        assert_eq!("20 GiB".parse::<MemoryQuantity>().unwrap(), MemoryQuantity::from_gib(20));
        assert_eq!("512MiB".parse::<MemoryQuantity>().unwrap().bytes(), 512 * MIB);
        assert_eq!("4G".parse::<MemoryQuantity>().unwrap(), MemoryQuantity::from_gib(4));
        assert_eq!("2 GB".parse::<MemoryQuantity>().unwrap().bytes(), 2_000_000_000);
        assert_eq!("1.5GiB".parse::<MemoryQuantity>().unwrap().bytes(), 1536 * MIB);
        assert!("lots".parse::<MemoryQuantity>().is_err());
        assert!("0 GiB".parse::<MemoryQuantity>().is_err());
        assert!("10 parsecs".parse::<MemoryQuantity>().is_err());
    }

    #[test]
    fn memory_display_and_slurm_form() {
        let mem = MemoryQuantity::from_gib(20);
        assert_eq!(mem.to_string(), "20 GiB");
        assert_eq!(mem.to_slurm(), "20480M");
        assert_eq!(mem.halved().to_string(), "10 GiB");
        assert_eq!(MemoryQuantity::from_gib(5).halved().to_string(), "2560 MiB");
        assert_eq!(MemoryQuantity::from_bytes(1_000_000).to_slurm(), "1M");
    }

    #[test]
    fn parse_walltime_forms() {
        assert_eq!("00:30:00".parse::<Walltime>().unwrap(), Walltime::from_secs(1800));
        assert_eq!("45".parse::<Walltime>().unwrap(), Walltime::from_secs(2700));
        assert_eq!("10:30".parse::<Walltime>().unwrap(), Walltime::from_secs(630));
        assert_eq!("1-02:00:00".parse::<Walltime>().unwrap(), Walltime::from_secs(93_600));
        assert_eq!("2-12".parse::<Walltime>().unwrap(), Walltime::from_secs(216_000));
        assert!("ab:cd:ef".parse::<Walltime>().is_err());
        assert!("00:00:00".parse::<Walltime>().is_err());
        assert!("1:2:3:4".parse::<Walltime>().is_err());
    }

    #[test]
    fn walltime_display_and_hours() {
        let wt = "1-02:03:04".parse::<Walltime>().unwrap();
        assert_eq!(wt.to_string(), "26:03:04");
        assert_eq!(wt.hours(), 26);
        assert_eq!(Walltime::from_secs(1800).hours(), 0);
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("120").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("soon").is_err());
    }
}
