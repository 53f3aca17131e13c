//! Coverage checks over unordered on-call intervals.
//!
//! Intervals are sorted by `(start, end)` and merged into maximal runs. A run
//! absorbs the next interval when it overlaps or merely touches, so a shift
//! handoff at 12:00 is not a gap.

use chrono::{DateTime, Utc};

use crate::models::TimeInterval;

/// Merge overlapping or touching intervals into sorted, disjoint runs.
pub fn merge_runs(intervals: &[TimeInterval]) -> Vec<TimeInterval> {
    let mut sorted = intervals.to_vec();
    sorted.sort_by_key(|interval| (interval.start, interval.end));

    let mut runs: Vec<TimeInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        if let Some(last) = runs.last_mut() {
            if interval.start <= last.end {
                last.end = last.end.max(interval.end);
                continue;
            }
        }
        runs.push(interval);
    }

    runs
}

/// Whether one merged run spans the whole window.
///
/// A missing bound falls back to the observed earliest start or latest end,
/// so with no bounds this asks whether the data is gap-free across its own
/// span. Empty input is never covered.
pub fn is_covered(
    intervals: &[TimeInterval],
    range_start: Option<DateTime<Utc>>,
    range_stop: Option<DateTime<Utc>>,
) -> bool {
    let runs = merge_runs(intervals);
    let (Some(first), Some(last)) = (runs.first(), runs.last()) else {
        return false;
    };

    let window_start = range_start.unwrap_or(first.start);
    let window_stop = range_stop.unwrap_or(last.end).max(window_start);

    runs.iter().any(|run| run.start <= window_start && run.end >= window_stop)
}

/// Sub-intervals of `[window_start, window_stop)` not covered by any run.
pub fn find_gaps(
    intervals: &[TimeInterval],
    window_start: DateTime<Utc>,
    window_stop: DateTime<Utc>,
) -> Vec<TimeInterval> {
    let mut gaps = Vec::new();
    let mut cursor = window_start;

    for run in merge_runs(intervals) {
        if run.end <= cursor {
            continue;
        }
        if run.start >= window_stop {
            break;
        }
        if cursor < run.start {
            gaps.push(TimeInterval {
                start: cursor,
                end: run.start,
            });
        }
        cursor = run.end;
    }

    if cursor < window_stop {
        gaps.push(TimeInterval {
            start: cursor,
            end: window_stop,
        });
    }

    gaps
}
