//! Segment file naming
//!
//! `{root}/{yyyy-MM}/{yyyy-MM-dd HH.mm.ss.fff}.{ext}`

use chrono::{DateTime, Duration, Local, SubsecRound};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Wall clock used for segment names
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Path of the segment starting at `at`
pub fn segment_path(root: &Path, at: DateTime<Local>, extension: &str) -> PathBuf {
    root.join(at.format("%Y-%m").to_string()).join(format!(
        "{}.{}",
        at.format("%Y-%m-%d %H.%M.%S%.3f"),
        extension
    ))
}

/// Hands out strictly increasing segment start times and their paths
pub struct SegmentPlanner {
    clock: Arc<dyn Clock>,
    root: PathBuf,
    extension: String,
    last: Option<DateTime<Local>>,
}

impl SegmentPlanner {
    pub fn new(clock: Arc<dyn Clock>, root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            clock,
            root: root.into(),
            extension: extension.into(),
            last: None,
        }
    }

    /// Sample the clock for the next segment. A clock that did not move past
    /// the previous segment (same millisecond, or stepped backwards) is
    /// bumped one millisecond past it so no file is ever reused.
    pub fn next(&mut self) -> (DateTime<Local>, PathBuf) {
        let mut at = self.clock.now().trunc_subsecs(3);
        if let Some(last) = self.last {
            if at <= last {
                at = last + Duration::milliseconds(1);
            }
        }
        self.last = Some(at);
        (at, segment_path(&self.root, at, &self.extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    struct FixedClock(Mutex<DateTime<Local>>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Local> {
            *self.0.lock()
        }
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap() + Duration::milliseconds(ms)
    }

    #[test]
    fn test_segment_path_layout() {
        let path = segment_path(Path::new("/rec"), at(2024, 3, 9, 14, 5, 7, 42), "mp4");
        assert_eq!(path, PathBuf::from("/rec/2024-03/2024-03-09 14.05.07.042.mp4"));
    }

    #[test]
    fn test_planner_bumps_stalled_clock() {
        let clock = Arc::new(FixedClock(Mutex::new(at(2024, 3, 9, 14, 5, 7, 42))));
        let mut planner = SegmentPlanner::new(clock.clone(), "/rec", "mp4");

        let (first_at, first) = planner.next();
        let (second_at, second) = planner.next();
        assert_eq!(second_at - first_at, Duration::milliseconds(1));
        assert!(second > first);

        // Clock stepping backwards still yields a later name.
        *clock.0.lock() = at(2024, 3, 9, 13, 0, 0, 0);
        let (_, third) = planner.next();
        assert!(third > second);
    }

    #[test]
    fn test_paths_increase_across_months() {
        let clock = Arc::new(FixedClock(Mutex::new(at(2024, 9, 30, 23, 59, 59, 999))));
        let mut planner = SegmentPlanner::new(clock.clone(), "/rec", "mp4");
        let (_, september) = planner.next();

        *clock.0.lock() = at(2024, 10, 1, 0, 0, 0, 0);
        let (_, october) = planner.next();

        assert!(september.starts_with("/rec/2024-09"));
        assert!(october.starts_with("/rec/2024-10"));
        assert!(october > september);
    }

    #[test]
    fn test_sub_millisecond_precision_is_truncated() {
        let clock = Arc::new(FixedClock(Mutex::new(
            at(2024, 1, 2, 3, 4, 5, 0) + Duration::microseconds(123_456),
        )));
        let mut planner = SegmentPlanner::new(clock, "/rec", "mkv");
        let (_, path) = planner.next();
        assert_eq!(path, PathBuf::from("/rec/2024-01/2024-01-02 03.04.05.123.mkv"));
    }
}
