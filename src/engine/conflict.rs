use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

pub const NO_AVAILABILITY: &str = "No availability set for this day";
pub const OUTSIDE_HOURS: &str = "Booking extends beyond available hours";
pub const DEFAULT_BLOCK_REASON: &str = "Unavailable";
pub const ALREADY_BOOKED: &str = "Time slot already booked";
pub const TEMPORARILY_RESERVED: &str = "Time slot is temporarily reserved";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    pub fn available() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason.into()),
        }
    }
}

/// Everything the checker needs about one date, read once.
#[derive(Debug, Clone, Default)]
pub struct DayView {
    /// Available weekly windows for the date's weekday.
    pub windows: Vec<Span>,
    /// Blocking exceptions with their reason.
    pub blocks: Vec<(Span, Option<String>)>,
    /// Bookings that still occupy their slot.
    pub bookings: Vec<(Ulid, Span)>,
    /// Unexpired holds with their owning session.
    pub holds: Vec<(Span, String)>,
}

impl DayView {
    pub fn build(
        weekday: u8,
        weekly: &[WeeklySlot],
        exceptions: &[AvailabilityException],
        bookings: &[Booking],
        holds: &[Hold],
        now: Ms,
    ) -> Self {
        Self {
            windows: weekly
                .iter()
                .filter(|w| w.day_of_week == weekday && w.is_available)
                .map(|w| w.window)
                .collect(),
            blocks: exceptions
                .iter()
                .filter(|e| !e.is_available)
                .map(|e| (e.window, e.reason.clone()))
                .collect(),
            bookings: bookings
                .iter()
                .filter(|b| b.occupies_slot())
                .map(|b| (b.id, b.span()))
                .collect(),
            holds: holds
                .iter()
                .filter(|h| h.is_active(now))
                .map(|h| (h.span(), h.session_id.clone()))
                .collect(),
        }
    }
}

/// Who is asking, so their own hold or booking doesn't count against them.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions<'a> {
    pub hold_session: Option<&'a str>,
    pub exclude_booking: Option<Ulid>,
}

/// The authoritative availability predicate. Checks run in a fixed order
/// and stop at the first failure.
pub fn check(view: &DayView, candidate: &Span, opts: &CheckOptions<'_>) -> Verdict {
    if view.windows.is_empty() {
        return Verdict::rejected(NO_AVAILABILITY);
    }
    if !view.windows.iter().any(|w| w.contains_span(candidate)) {
        return Verdict::rejected(OUTSIDE_HOURS);
    }

    if let Some((_, reason)) = view.blocks.iter().find(|(span, _)| span.overlaps(candidate)) {
        let reason = reason
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(DEFAULT_BLOCK_REASON);
        return Verdict::rejected(reason);
    }

    let booked = view
        .bookings
        .iter()
        .filter(|(id, _)| Some(*id) != opts.exclude_booking)
        .any(|(_, span)| span.overlaps(candidate));
    if booked {
        return Verdict::rejected(ALREADY_BOOKED);
    }

    let reserved = view
        .holds
        .iter()
        .filter(|(_, session)| Some(session.as_str()) != opts.hold_session)
        .any(|(span, _)| span.overlaps(candidate));
    if reserved {
        return Verdict::rejected(TEMPORARILY_RESERVED);
    }

    Verdict::available()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> DayView {
        DayView {
            windows: vec![Span::new(540, 1020)],
            ..Default::default()
        }
    }

    fn at(start: Minute, duration: Minute) -> Span {
        Span::starting_at(start, duration)
    }

    #[test]
    fn no_window_for_weekday() {
        let v = check(&DayView::default(), &at(600, 30), &CheckOptions::default());
        assert_eq!(v, Verdict::rejected(NO_AVAILABILITY));
    }

    #[test]
    fn must_fit_entirely_inside_a_window() {
        let opts = CheckOptions::default();
        assert!(check(&view(), &at(990, 30), &opts).available);
        assert_eq!(check(&view(), &at(990, 60), &opts), Verdict::rejected(OUTSIDE_HOURS));
        assert_eq!(check(&view(), &at(510, 60), &opts), Verdict::rejected(OUTSIDE_HOURS));
    }

    #[test]
    fn split_windows_do_not_merge() {
        let v = DayView {
            windows: vec![Span::new(540, 720), Span::new(720, 1020)],
            ..Default::default()
        };
        // Straddles the seam: neither window contains it on its own.
        assert_eq!(
            check(&v, &at(690, 60), &CheckOptions::default()),
            Verdict::rejected(OUTSIDE_HOURS)
        );
    }

    #[test]
    fn block_reason_and_default() {
        let mut v = view();
        v.blocks.push((Span::new(720, 780), Some("Staff training".into())));
        v.blocks.push((Span::new(900, 930), None));
        let opts = CheckOptions::default();
        assert_eq!(check(&v, &at(720, 30), &opts), Verdict::rejected("Staff training"));
        assert_eq!(check(&v, &at(900, 30), &opts), Verdict::rejected(DEFAULT_BLOCK_REASON));
        // Touching the block's start is fine under half-open spans.
        assert!(check(&v, &at(690, 30), &opts).available);
        assert!(check(&v, &at(780, 30), &opts).available);
    }

    #[test]
    fn bookings_block_overlaps_and_can_be_excluded() {
        let mut v = view();
        let id = Ulid::new();
        v.bookings.push((id, Span::new(600, 630)));
        let opts = CheckOptions::default();
        assert_eq!(check(&v, &at(600, 60), &opts), Verdict::rejected(ALREADY_BOOKED));
        assert_eq!(check(&v, &at(570, 60), &opts), Verdict::rejected(ALREADY_BOOKED));
        assert!(check(&v, &at(630, 60), &opts).available);

        let own = CheckOptions {
            exclude_booking: Some(id),
            ..Default::default()
        };
        assert!(check(&v, &at(600, 60), &own).available);
    }

    #[test]
    fn holds_checked_last_and_own_session_ignored() {
        let mut v = view();
        v.holds.push((Span::new(660, 720), "cs_other".into()));
        assert_eq!(
            check(&v, &at(690, 30), &CheckOptions::default()),
            Verdict::rejected(TEMPORARILY_RESERVED)
        );
        let mine = CheckOptions {
            hold_session: Some("cs_other"),
            ..Default::default()
        };
        assert!(check(&v, &at(690, 30), &mine).available);

        // A booking on the same span wins over the hold.
        v.bookings.push((Ulid::new(), Span::new(660, 690)));
        assert_eq!(check(&v, &at(660, 30), &mine), Verdict::rejected(ALREADY_BOOKED));
    }

    #[test]
    fn build_filters_inputs() {
        let date = chrono::NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
        let weekly = vec![
            WeeklySlot {
                id: Ulid::new(),
                day_of_week: 1,
                window: Span::new(540, 1020),
                is_recurring: true,
                is_available: true,
            },
            WeeklySlot {
                id: Ulid::new(),
                day_of_week: 1,
                window: Span::new(1020, 1200),
                is_recurring: true,
                is_available: false,
            },
            WeeklySlot {
                id: Ulid::new(),
                day_of_week: 2,
                window: Span::new(540, 1020),
                is_recurring: true,
                is_available: true,
            },
        ];
        let exceptions = vec![AvailabilityException {
            id: Ulid::new(),
            date,
            window: Span::new(600, 660),
            is_available: true,
            reason: Some("extra hours".into()),
        }];
        let holds = vec![
            Hold {
                id: Ulid::new(),
                date,
                start: 600,
                duration_minutes: 30,
                session_id: "expired".into(),
                expires_at: 1_000,
            },
            Hold {
                id: Ulid::new(),
                date,
                start: 700,
                duration_minutes: 30,
                session_id: "live".into(),
                expires_at: 5_000,
            },
        ];
        let v = DayView::build(1, &weekly, &exceptions, &[], &holds, 1_000);
        assert_eq!(v.windows, vec![Span::new(540, 1020)]);
        assert!(v.blocks.is_empty());
        assert_eq!(v.holds, vec![(Span::new(700, 730), "live".to_string())]);
    }
}
