//! View models and conversions used by repositories.
//!
//! Keep these focused on the shape of stored data. Business rules live in the
//! processors.

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// Schedule totals by status, for progress reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleCounts {
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
    pub leased: i64,
}

pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow!("timestamp {} out of range", ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trip() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(from_millis(to_millis(at)).unwrap(), at);
        assert!(from_millis(i64::MAX).is_err());
    }
}
