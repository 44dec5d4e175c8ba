//! Per-minute transaction rate buckets.
//!
//! A bucket covers one minute boundary aligned window `[start, start + 60)`
//! and carries the number of transactions observed in that window. Windows
//! are persisted oldest first, so chart series and TPS reads come straight
//! off the stored order.

use serde::{Deserialize, Serialize};

/// One minute of transaction activity starting at `start` (unix seconds,
/// aligned to a minute boundary).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBucket {
    pub start: u64,
    pub count: u64,
}

impl RateBucket {
    /// Width of every bucket window in seconds.
    pub const WIDTH_SECS: u64 = 60;

    pub fn new(start: u64, count: u64) -> Self {
        RateBucket { start, count }
    }

    /// Floor a timestamp to the minute boundary of the bucket containing it.
    pub fn window_floor(unix_secs: u64) -> u64 {
        unix_secs - unix_secs % Self::WIDTH_SECS
    }

    /// Exclusive end of this bucket's window.
    pub fn end(&self) -> u64 {
        self.start + Self::WIDTH_SECS
    }

    pub fn contains(&self, unix_secs: u64) -> bool {
        unix_secs >= self.start && unix_secs < self.end()
    }

    /// Displayed transaction rate for this bucket.
    pub fn tps_string(&self) -> String {
        tps_string(self.count)
    }
}

/// Format a per-minute transaction count as a transactions-per-second
/// string with two decimal places. Display only; stored counts stay
/// integral.
pub fn tps_string(count_per_minute: u64) -> String {
    format!(
        "{:.2}",
        count_per_minute as f64 / RateBucket::WIDTH_SECS as f64
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_floor_aligns_to_minute() {
        assert_eq!(RateBucket::window_floor(659), 600);
        assert_eq!(RateBucket::window_floor(660), 660);
        assert_eq!(RateBucket::window_floor(0), 0);
    }

    #[test]
    fn contains_is_half_open() {
        let bucket = RateBucket::new(600, 5);
        assert!(bucket.contains(600));
        assert!(bucket.contains(659));
        assert!(!bucket.contains(660));
        assert!(!bucket.contains(599));
    }

    #[test]
    fn tps_string_is_two_decimal_places() {
        assert_eq!(RateBucket::new(720, 3).tps_string(), "0.05");
        assert_eq!(tps_string(0), "0.00");
        assert_eq!(tps_string(8), "0.13");
        assert_eq!(tps_string(600), "10.00");
    }
}
