//! Microsecond timestamps. The wire format and the PTP state machine both work in
//! `i64` microseconds since the Unix epoch; this module is the single place that
//! talks to the system clock so the rest of the stack can stay deterministic in
//! tests.

use chrono::Utc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub type TimestampUs = i64;

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn now_us() -> TimestampUs {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0));
    now.as_micros() as i64
}

/// Same reading, formatted for log lines (`chrono`, matching the rest of the
/// stack's log timestamps).
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn micros_to_duration(micros: i64) -> Duration {
    if micros <= 0 {
        Duration::from_micros(0)
    } else {
        Duration::from_micros(micros as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_us_is_monotonically_plausible() {
        let a = now_us();
        let b = now_us();
        assert!(b >= a);
    }

    #[test]
    fn micros_to_duration_clamps_negative() {
        assert_eq!(micros_to_duration(-5), Duration::from_micros(0));
        assert_eq!(micros_to_duration(10), Duration::from_micros(10));
    }
}
