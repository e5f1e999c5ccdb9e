use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, Timelike, Utc};

use crate::model::{Minute, Ms};

/// Source of "now". Everything time-dependent reads through this.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        Utc::now().timestamp_millis()
    }
}

/// Virtual clock for tests and the bench: only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Ms) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, at: Ms) {
        self.now.store(at, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}

/// The single civil timezone all dates and "today" comparisons use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessZone {
    offset: FixedOffset,
}

impl Default for BusinessZone {
    fn default() -> Self {
        Self::pacific_standard()
    }
}

impl BusinessZone {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    pub fn pacific_standard() -> Self {
        FixedOffset::west_opt(8 * 3600)
            .map(Self::new)
            .unwrap_or_else(Self::utc)
    }

    /// Parse `+HH:MM` / `-HH:MM` (or `Z`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
            return Some(Self::utc());
        }
        let (sign, rest) = match s.as_bytes().first()? {
            b'+' => (1, &s[1..]),
            b'-' => (-1, &s[1..]),
            _ => return None,
        };
        let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
        let h: i32 = h.parse().ok()?;
        let m: i32 = m.parse().ok()?;
        if h > 14 || m >= 60 {
            return None;
        }
        FixedOffset::east_opt(sign * (h * 3600 + m * 60)).map(Self::new)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local calendar date and minute-of-day for an instant.
    pub fn local(&self, at: Ms) -> (NaiveDate, Minute) {
        let utc = DateTime::from_timestamp_millis(at).unwrap_or_default();
        let local = utc.with_timezone(&self.offset);
        (local.date_naive(), local.hour() * 60 + local.minute())
    }

    pub fn today(&self, now: Ms) -> NaiveDate {
        self.local(now).0
    }

    /// Instant at which `minute` of local `date` begins.
    pub fn instant(&self, date: NaiveDate, minute: Minute) -> Ms {
        let midnight_as_utc = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        midnight_as_utc - i64::from(self.offset.local_minus_utc()) * 1000
            + i64::from(minute) * 60_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn local_and_instant_are_inverse() {
        let zone = BusinessZone::pacific_standard();
        let at = zone.instant(d(2030, 1, 7), 9 * 60 + 30);
        assert_eq!(zone.local(at), (d(2030, 1, 7), 570));
    }

    #[test]
    fn date_boundary_depends_on_offset() {
        // 2030-01-08T05:00Z is still the 7th in the evening at -08:00.
        let at = BusinessZone::utc().instant(d(2030, 1, 8), 5 * 60);
        let pst = BusinessZone::pacific_standard();
        assert_eq!(pst.local(at), (d(2030, 1, 7), 21 * 60));
        assert_eq!(pst.today(at), d(2030, 1, 7));
    }

    #[test]
    fn end_of_day_minute_rolls_to_next_midnight() {
        let zone = BusinessZone::pacific_standard();
        assert_eq!(zone.instant(d(2030, 1, 7), 1440), zone.instant(d(2030, 1, 8), 0));
    }

    #[test]
    fn parse_offsets() {
        assert_eq!(BusinessZone::parse("-08:00"), Some(BusinessZone::pacific_standard()));
        assert_eq!(BusinessZone::parse("Z"), Some(BusinessZone::utc()));
        assert_eq!(
            BusinessZone::parse("+05:30").map(|z| z.offset().local_minus_utc()),
            Some(5 * 3600 + 30 * 60)
        );
        assert_eq!(BusinessZone::parse("08:00"), None);
        assert_eq!(BusinessZone::parse("+15:00"), None);
        assert_eq!(BusinessZone::parse(""), None);
    }
}
