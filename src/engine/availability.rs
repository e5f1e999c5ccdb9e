use std::collections::BTreeSet;

use crate::limits::{SAME_DAY_LEAD_MINUTES, SLOT_STEP_MINUTES};
use crate::model::*;

/// Start times on the fixed step grid, from each window's start up to its
/// cutoff (`end - duration`) inclusive. Ascending and deduplicated across
/// overlapping windows.
pub fn candidate_starts(windows: &[Span], duration: Minute) -> Vec<Minute> {
    let mut starts = BTreeSet::new();
    for window in windows {
        if window.duration() < duration {
            continue;
        }
        let cutoff = window.end - duration;
        let mut t = window.start;
        while t <= cutoff {
            starts.insert(t);
            t += SLOT_STEP_MINUTES;
        }
    }
    starts.into_iter().collect()
}

/// Same-day candidates must start strictly later than `now + lead`.
pub fn meets_lead_time(start: Minute, now_minute: Minute) -> bool {
    start > now_minute + SAME_DAY_LEAD_MINUTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_to_cutoff_inclusive() {
        let starts = candidate_starts(&[Span::new(540, 1020)], 30);
        assert_eq!(starts.first(), Some(&540));
        assert_eq!(starts.last(), Some(&990));
        assert_eq!(starts.len(), 16);
    }

    #[test]
    fn step_is_independent_of_duration() {
        let starts = candidate_starts(&[Span::new(540, 660)], 60);
        assert_eq!(starts, vec![540, 570, 600]);
    }

    #[test]
    fn offgrid_window_keeps_its_own_phase() {
        let starts = candidate_starts(&[Span::new(555, 660)], 30);
        assert_eq!(starts, vec![555, 585, 615]);
    }

    #[test]
    fn overlapping_windows_dedupe_and_sort() {
        let starts = candidate_starts(&[Span::new(660, 780), Span::new(540, 720)], 60);
        assert_eq!(starts, vec![540, 570, 600, 630, 660, 690, 720]);
    }

    #[test]
    fn window_shorter_than_lesson_yields_nothing() {
        assert!(candidate_starts(&[Span::new(540, 570)], 60).is_empty());
        assert!(candidate_starts(&[], 30).is_empty());
    }

    #[test]
    fn lead_time_is_strict() {
        assert!(!meets_lead_time(600, 540));
        assert!(meets_lead_time(601, 540));
        assert!(meets_lead_time(630, 540));
    }
}
