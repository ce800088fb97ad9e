//! Common free time across participants.
//!
//! Busy intervals from every participant are flattened, sorted by start and
//! swept with a cursor from the window start. Gaps at least `min_duration`
//! long become [`FreeSlot`]s.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::time::TimeWindow;

/// A period during which a participant is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Portion of the interval inside `window`, if any.
    fn clip(&self, window: &TimeWindow) -> Option<Self> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        (start < end).then_some(Self { start, end })
    }
}

/// A period during which every participant is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FreeSlot {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Finds the gaps in `window` left free by all participants.
///
/// Intervals are clipped to the window, overlapping and duplicate intervals
/// behave as if merged, and a gap is only reported when it is non-empty and
/// at least `min_duration` long. An inverted window yields nothing.
pub fn find_free_slots(
    intervals_by_participant: &[Vec<BusyInterval>],
    window: &TimeWindow,
    min_duration: Duration,
) -> Vec<FreeSlot> {
    if window.is_empty() {
        return Vec::new();
    }

    let mut busy: Vec<BusyInterval> = intervals_by_participant
        .iter()
        .flatten()
        .filter_map(|interval| interval.clip(window))
        .collect();
    // Vec::sort_by_key is stable.
    busy.sort_by_key(|interval| interval.start);

    let min_duration = min_duration.max(Duration::zero());
    let mut slots = Vec::new();
    let mut cursor = window.start;
    let mut emit = |start: DateTime<Utc>, end: DateTime<Utc>| {
        if end > start && end - start >= min_duration {
            slots.push(FreeSlot { start, end });
        }
    };

    for interval in &busy {
        if interval.start > cursor {
            emit(cursor, interval.start);
        }
        cursor = cursor.max(interval.end);
    }
    emit(cursor, window.end);

    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn busy(from: (u32, u32), to: (u32, u32)) -> BusyInterval {
        BusyInterval::new(at(from.0, from.1), at(to.0, to.1))
    }

    fn slot(from: (u32, u32), to: (u32, u32)) -> FreeSlot {
        FreeSlot {
            start: at(from.0, from.1),
            end: at(to.0, to.1),
        }
    }

    fn window(from: (u32, u32), to: (u32, u32)) -> TimeWindow {
        TimeWindow::new(at(from.0, from.1), at(to.0, to.1)).unwrap()
    }

    #[test]
    fn single_busy_block_splits_window() {
        let slots = find_free_slots(
            &[vec![busy((10, 0), (10, 30))]],
            &window((9, 0), (12, 0)),
            Duration::minutes(30),
        );
        assert_eq!(slots, vec![slot((9, 0), (10, 0)), slot((10, 30), (12, 0))]);
    }

    #[test]
    fn overlapping_busy_covers_whole_window() {
        let slots = find_free_slots(
            &[vec![busy((9, 0), (9, 30))], vec![busy((9, 15), (10, 0))]],
            &window((9, 0), (10, 0)),
            Duration::minutes(15),
        );
        assert!(slots.is_empty());
    }

    #[test]
    fn no_busy_intervals_returns_whole_window() {
        let slots = find_free_slots(&[], &window((9, 0), (17, 0)), Duration::minutes(60));
        assert_eq!(slots, vec![slot((9, 0), (17, 0))]);
    }

    #[test]
    fn short_gaps_are_dropped() {
        let slots = find_free_slots(
            &[vec![busy((9, 0), (9, 50)), busy((10, 0), (11, 0))]],
            &window((9, 0), (12, 0)),
            Duration::minutes(30),
        );
        assert_eq!(slots, vec![slot((11, 0), (12, 0))]);
    }

    #[test]
    fn duplicates_match_pre_merged_input() {
        let raw = [
            vec![busy((10, 0), (11, 0)), busy((13, 0), (14, 0))],
            vec![busy((10, 30), (11, 30)), busy((10, 0), (11, 0))],
            vec![busy((13, 0), (14, 0))],
        ];
        let merged = [vec![busy((10, 0), (11, 30)), busy((13, 0), (14, 0))]];
        let win = window((9, 0), (17, 0));
        let min = Duration::minutes(15);

        assert_eq!(
            find_free_slots(&raw, &win, min),
            find_free_slots(&merged, &win, min)
        );
    }

    #[test]
    fn contained_interval_does_not_rewind_cursor() {
        let slots = find_free_slots(
            &[vec![busy((9, 0), (12, 0))], vec![busy((10, 0), (10, 30))]],
            &window((9, 0), (13, 0)),
            Duration::minutes(10),
        );
        assert_eq!(slots, vec![slot((12, 0), (13, 0))]);
    }

    #[test]
    fn intervals_are_clipped_to_window() {
        let slots = find_free_slots(
            &[vec![busy((7, 0), (9, 30)), busy((11, 30), (14, 0)), busy((15, 0), (16, 0))]],
            &window((9, 0), (12, 0)),
            Duration::minutes(30),
        );
        assert_eq!(slots, vec![slot((9, 30), (11, 30))]);
    }

    #[test]
    fn zero_min_duration_never_emits_empty_slots() {
        let slots = find_free_slots(
            &[vec![busy((9, 0), (10, 0)), busy((10, 0), (11, 0))]],
            &window((9, 0), (11, 0)),
            Duration::zero(),
        );
        assert!(slots.is_empty());
    }

    #[test]
    fn inverted_window_yields_nothing() {
        let inverted = TimeWindow {
            start: at(12, 0),
            end: at(9, 0),
        };
        assert!(find_free_slots(&[], &inverted, Duration::zero()).is_empty());
    }

    #[test]
    fn slots_and_busy_cover_window() {
        let intervals = [
            vec![busy((9, 15), (9, 45)), busy((13, 0), (14, 0))],
            vec![busy((11, 0), (12, 0))],
        ];
        let win = window((9, 0), (15, 0));
        let slots = find_free_slots(&intervals, &win, Duration::zero());

        let free: Duration = slots.iter().map(FreeSlot::duration).sum();
        let taken: Duration = intervals
            .iter()
            .flatten()
            .map(|interval| interval.end - interval.start)
            .sum();
        assert_eq!(free + taken, win.duration());
    }
}
