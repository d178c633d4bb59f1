//! Interval alignment for periodic loops.
//!
//! Both the count generator and the aggregator wake on wall-clock
//! boundaries of their interval, shifted by an offset. With the same
//! interval on both sides, an aggregator offset of a few seconds lets
//! it read counts shortly after every generator has exported them.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Loop timing a periodic task cannot run with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimingError {
    #[error("interval must be positive, got {0}")]
    Interval(f64),

    #[error("offset must not be negative, got {0}")]
    Offset(f64),
}

/// Check an interval/offset pair shared by the generator and the
/// aggregator loops.
pub fn check_timing(interval_sec: f64, offset_sec: f64) -> Result<(), TimingError> {
    if !(interval_sec.is_finite() && interval_sec > 0.0) {
        return Err(TimingError::Interval(interval_sec));
    }
    if !(offset_sec.is_finite() && offset_sec >= 0.0) {
        return Err(TimingError::Offset(offset_sec));
    }
    Ok(())
}

/// Time to wait from `now` until the next `k * interval + offset` boundary.
///
/// The returned duration is always positive: a `now` sitting exactly on
/// a boundary waits a full interval. Non-positive intervals fall back to
/// one second. Waits too long for a `Duration` of nanoseconds saturate.
pub fn wait_time(now: SystemTime, interval_sec: f64, offset_sec: f64) -> Duration {
    let interval_ns = if interval_sec.is_finite() && interval_sec > 0.0 {
        ((interval_sec * 1e9) as i128).max(1)
    } else {
        1_000_000_000
    };
    let offset_ns = if offset_sec.is_finite() {
        ((offset_sec * 1e9) as i128).rem_euclid(interval_ns)
    } else {
        0
    };
    let now_ns = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i128;

    let into_interval = (now_ns - offset_ns).rem_euclid(interval_ns);
    let wait_ns = interval_ns - into_interval;
    Duration::from_nanos(u64::try_from(wait_ns).unwrap_or(u64::MAX))
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: f64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs_f64(secs)
    }

    #[test]
    fn waits_until_next_boundary() {
        assert_eq!(wait_time(at(105.0), 10.0, 0.0), Duration::from_secs(5));
        assert_eq!(wait_time(at(109.5), 10.0, 0.0), Duration::from_millis(500));
    }

    #[test]
    fn on_boundary_waits_full_interval() {
        assert_eq!(wait_time(at(100.0), 10.0, 0.0), Duration::from_secs(10));
    }

    #[test]
    fn offset_shifts_boundary() {
        assert_eq!(wait_time(at(101.0), 10.0, 2.0), Duration::from_secs(1));
        assert_eq!(wait_time(at(102.0), 10.0, 2.0), Duration::from_secs(10));
        assert_eq!(wait_time(at(103.0), 10.0, 2.0), Duration::from_secs(9));
    }

    #[test]
    fn fractional_interval() {
        let wait = wait_time(at(100.1), 0.5, 0.0);
        let diff = wait.as_secs_f64() - 0.4;
        assert!(diff.abs() < 1e-6, "wait was {wait:?}");
    }

    #[test]
    fn invalid_interval_falls_back_to_one_second() {
        assert_eq!(wait_time(at(100.5), 0.0, 0.0), Duration::from_millis(500));
        assert_eq!(wait_time(at(100.5), -3.0, 0.0), Duration::from_millis(500));
    }

    #[test]
    fn huge_interval_saturates() {
        // Roughly 3000 years, more nanoseconds than fit in a u64.
        let interval = 1e11;
        assert_eq!(wait_time(at(100.0), interval, 0.0), Duration::from_nanos(u64::MAX));
        assert_eq!(wait_time(at(100.0), f64::MAX, 0.0), Duration::from_nanos(u64::MAX));
        // Just under the limit is still exact.
        assert_eq!(wait_time(at(0.0), 500.0 * 365.0 * 86400.0, 0.0).as_secs(), 500 * 365 * 86400);
    }

    #[test]
    fn check_timing_rejects_bad_values() {
        assert!(check_timing(0.5, 0.0).is_ok());
        assert!(check_timing(300.0, 2.0).is_ok());
        assert_eq!(check_timing(0.0, 0.0), Err(TimingError::Interval(0.0)));
        assert_eq!(check_timing(-1.0, 0.0), Err(TimingError::Interval(-1.0)));
        assert!(matches!(check_timing(f64::NAN, 0.0), Err(TimingError::Interval(_))));
        assert!(matches!(check_timing(f64::INFINITY, 0.0), Err(TimingError::Interval(_))));
        assert_eq!(check_timing(10.0, -1.0), Err(TimingError::Offset(-1.0)));
        assert!(matches!(check_timing(10.0, f64::NAN), Err(TimingError::Offset(_))));
    }
}
