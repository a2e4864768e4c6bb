use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

// 1970-01-05 was the first Monday after the Unix epoch.
const MONDAY_ORIGIN_MS: i64 = 4 * 86_400_000;

/// Candle bucket widths supported by the aggregation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interval {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
}

impl Interval {
    pub const ALL: [Interval; 9] = [
        Interval::M1,
        Interval::M3,
        Interval::M5,
        Interval::M15,
        Interval::M30,
        Interval::H1,
        Interval::H4,
        Interval::D1,
        Interval::W1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M3 => "3m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
            Interval::W1 => "1w",
        }
    }

    /// Bucket width in milliseconds.
    pub fn ms(&self) -> i64 {
        match self {
            Interval::M1 => 60_000,
            Interval::M3 => 180_000,
            Interval::M5 => 300_000,
            Interval::M15 => 900_000,
            Interval::M30 => 1_800_000,
            Interval::H1 => 3_600_000,
            Interval::H4 => 14_400_000,
            Interval::D1 => 86_400_000,
            Interval::W1 => 7 * 86_400_000,
        }
    }

    /// Truncate a millisecond timestamp to this interval's bucket start.
    /// All intervals align to the Unix epoch except weeks, which open on
    /// Monday 00:00 UTC per exchange convention.
    pub fn bucket_open(&self, time_ms: i64) -> i64 {
        let origin = match self {
            Interval::W1 => MONDAY_ORIGIN_MS,
            _ => 0,
        };
        time_ms - (time_ms - origin).rem_euclid(self.ms())
    }
}

impl FromStr for Interval {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Interval::M1),
            "3m" => Ok(Interval::M3),
            "5m" => Ok(Interval::M5),
            "15m" => Ok(Interval::M15),
            "30m" => Ok(Interval::M30),
            "1h" => Ok(Interval::H1),
            "4h" => Ok(Interval::H4),
            "1d" => Ok(Interval::D1),
            "1w" => Ok(Interval::W1),
            other => Err(AppError::UnsupportedInterval(other.to_string())),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
