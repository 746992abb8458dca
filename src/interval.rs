/*
Interval math over [start, end) time ranges.
Pure functions, shared by the store, the projection and the discount engine.
*/

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};

// Closed-open time range [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl Interval {
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        Interval { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        overlaps(self, other)
    }
}

// Touching endpoints do not overlap.
pub fn overlaps(a: &Interval, b: &Interval) -> bool {
    a.start < b.end && b.start < a.end
}

// Gap between two intervals; zero when they touch or overlap.
pub fn gap_between(a: &Interval, b: &Interval) -> Duration {
    if overlaps(a, b) {
        return Duration::zero();
    }
    if a.end <= b.start {
        b.start - a.end
    } else {
        a.start - b.end
    }
}

/// Free sub-intervals of `block` not covered by any busy interval.
///
/// Busy intervals are sorted by start, then swept with a cursor starting at
/// `block.start`. A free piece is emitted before each busy interval that
/// begins past the cursor, and the cursor jumps to the end of every busy
/// interval it reaches. Busy intervals that merely touch the block are
/// ignored, ones that stick out of it are clipped.
pub fn split_around_busy(block: &Interval, busy: &[Interval]) -> Vec<Interval> {
    let mut sorted: Vec<Interval> = busy
        .iter()
        .filter(|b| !b.is_empty() && overlaps(block, b))
        .copied()
        .collect();
    sorted.sort_by_key(|b| b.start);

    let mut free = Vec::new();
    let mut cursor = block.start;

    for b in sorted {
        if cursor >= block.end {
            break;
        }
        if b.start > cursor {
            let piece_end = if b.start < block.end { b.start } else { block.end };
            free.push(Interval::new(cursor, piece_end));
        }
        if b.end > cursor {
            cursor = b.end;
        }
    }

    if cursor < block.end {
        free.push(Interval::new(cursor, block.end));
    }

    free
}

// Shorter candidates are pushed forward to exactly `min` from their start.
pub fn enforce_min_duration(candidate: Interval, min: Duration) -> Interval {
    if candidate.duration() < min {
        Interval::new(candidate.start, candidate.start + min)
    } else {
        candidate
    }
}

// Instant `minutes` after local midnight of `day`
pub fn local_time(day: NaiveDate, minutes: i64, offset: FixedOffset) -> DateTime<FixedOffset> {
    let midnight = day.and_time(NaiveTime::MIN);
    offset.from_utc_datetime(&(midnight - offset)) + Duration::minutes(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 2, h, m, 0)
            .unwrap()
    }

    fn iv(sh: u32, sm: u32, eh: u32, em: u32) -> Interval {
        Interval::new(at(sh, sm), at(eh, em))
    }

    #[test]
    fn overlap_is_symmetric_and_reflexive() {
        let samples = [
            iv(9, 0, 10, 0),
            iv(9, 30, 11, 0),
            iv(10, 0, 12, 0),
            iv(8, 0, 9, 0),
            iv(8, 0, 13, 0),
        ];
        for a in &samples {
            assert!(overlaps(a, a));
            for b in &samples {
                assert_eq!(overlaps(a, b), overlaps(b, a));
            }
        }
    }

    #[test]
    fn touching_endpoints_do_not_overlap() {
        assert!(!overlaps(&iv(9, 0, 10, 0), &iv(10, 0, 11, 0)));
        assert!(overlaps(&iv(9, 0, 10, 1), &iv(10, 0, 11, 0)));
    }

    #[test]
    fn gap_is_zero_when_touching() {
        assert_eq!(gap_between(&iv(9, 0, 10, 0), &iv(10, 0, 11, 0)), Duration::zero());
        assert_eq!(gap_between(&iv(9, 0, 10, 0), &iv(10, 30, 11, 0)), Duration::minutes(30));
        assert_eq!(gap_between(&iv(12, 0, 13, 0), &iv(10, 30, 11, 0)), Duration::minutes(60));
    }

    #[test]
    fn split_with_no_busy_returns_whole_block() {
        let block = iv(9, 0, 17, 0);
        assert_eq!(split_around_busy(&block, &[]), vec![block]);
    }

    #[test]
    fn split_around_contained_busy_reconstructs_block() {
        let block = iv(9, 0, 17, 0);
        let busy = vec![iv(13, 0, 14, 0), iv(10, 0, 11, 0), iv(10, 30, 11, 30)];
        let free = split_around_busy(&block, &busy);

        assert_eq!(free, vec![iv(9, 0, 10, 0), iv(11, 30, 13, 0), iv(14, 0, 17, 0)]);

        // no two free pieces overlap
        for (i, a) in free.iter().enumerate() {
            for b in free.iter().skip(i + 1) {
                assert!(!overlaps(a, b));
            }
            for b in &busy {
                assert!(!overlaps(a, b));
            }
        }

        // free + busy covers the block minute by minute
        let mut t = block.start;
        while t < block.end {
            let minute = Interval::new(t, t + Duration::minutes(1));
            let covered = free.iter().chain(busy.iter()).any(|p| overlaps(p, &minute));
            assert!(covered, "minute at {t} not covered");
            t += Duration::minutes(1);
        }
    }

    #[test]
    fn split_clips_busy_sticking_out() {
        let block = iv(9, 0, 12, 0);
        let busy = vec![iv(8, 0, 9, 30), iv(11, 30, 13, 0)];
        assert_eq!(split_around_busy(&block, &busy), vec![iv(9, 30, 11, 30)]);
    }

    #[test]
    fn split_fully_busy_block_is_empty() {
        let block = iv(9, 0, 10, 0);
        assert!(split_around_busy(&block, &[iv(9, 0, 10, 0)]).is_empty());
        assert!(split_around_busy(&block, &[iv(8, 0, 11, 0)]).is_empty());
    }

    #[test]
    fn split_drops_empty_pieces_between_adjacent_busy() {
        let block = iv(9, 0, 12, 0);
        let busy = vec![iv(9, 0, 10, 0), iv(10, 0, 11, 0)];
        assert_eq!(split_around_busy(&block, &busy), vec![iv(11, 0, 12, 0)]);
    }

    #[test]
    fn local_time_respects_offset() {
        let est = FixedOffset::west_opt(5 * 3600).unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let t = local_time(day, 9 * 60 + 30, est);
        assert_eq!(t.to_rfc3339(), "2026-03-02T09:30:00-05:00");
        assert_eq!(local_time(day, 24 * 60, est).date_naive(), day.succ_opt().unwrap());
    }

    #[test]
    fn min_duration_extends_forward() {
        let short = iv(9, 5, 9, 12);
        assert_eq!(enforce_min_duration(short, Duration::minutes(15)), iv(9, 5, 9, 20));
        let long = iv(9, 0, 10, 0);
        assert_eq!(enforce_min_duration(long, Duration::minutes(15)), long);
    }
}
