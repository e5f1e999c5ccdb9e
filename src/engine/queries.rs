use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::limits::MINUTES_PER_DAY;
use crate::model::*;

use super::availability::{candidate_starts, meets_lead_time};
use super::conflict::{check, CheckOptions, DayView, Verdict};
use super::{Engine, EngineError};

/// 0 = Sunday … 6 = Saturday, matching `WeeklySlot::day_of_week`.
pub(super) fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub(super) fn lesson_span(start: Minute, duration: Minute) -> Result<Span, EngineError> {
    if duration == 0 || duration > MINUTES_PER_DAY {
        return Err(EngineError::Validation(format!(
            "duration must be between 1 and {MINUTES_PER_DAY} minutes"
        )));
    }
    match start.checked_add(duration) {
        Some(end) if start < MINUTES_PER_DAY && end <= MINUTES_PER_DAY => {
            Ok(Span::new(start, end))
        }
        _ => Err(EngineError::Validation("lesson must end by midnight".into())),
    }
}

impl Engine {
    pub(super) async fn load_day(&self, date: NaiveDate, now: Ms) -> Result<DayView, EngineError> {
        let weekly = self.stores.availability.weekly_slots().await?;
        let exceptions = self.stores.exceptions.exceptions_on(date).await?;
        let bookings = self.stores.bookings.active_on(date).await?;
        let holds = self.stores.holds.holds_on(date).await?;
        Ok(DayView::build(
            weekday_index(date),
            &weekly,
            &exceptions,
            &bookings,
            &holds,
            now,
        ))
    }

    pub(super) async fn verdict_for(
        &self,
        date: NaiveDate,
        span: &Span,
        opts: &CheckOptions<'_>,
    ) -> Result<Verdict, EngineError> {
        let view = self.load_day(date, self.now()).await?;
        Ok(check(&view, span, opts))
    }

    /// Bookable start times for `lesson_type` on `date`, as ascending `HH:MM`.
    pub async fn available_slots(
        &self,
        date: NaiveDate,
        lesson_type: &str,
    ) -> Result<Vec<String>, EngineError> {
        let duration = self.duration_of(lesson_type)?;
        let now = self.now();
        let view = self.load_day(date, now).await?;
        let (today, now_minute) = self.zone.local(now);
        let opts = CheckOptions::default();

        let slots: Vec<String> = candidate_starts(&view.windows, duration)
            .into_iter()
            .filter(|&t| date != today || meets_lead_time(t, now_minute))
            .filter(|&t| check(&view, &Span::starting_at(t, duration), &opts).available)
            .map(format_time_of_day)
            .collect();

        tracing::debug!(%date, lesson_type, count = slots.len(), "computed available slots");
        Ok(slots)
    }

    /// Authoritative yes/no for one candidate.
    pub async fn validate(
        &self,
        date: NaiveDate,
        start: Minute,
        duration: Minute,
    ) -> Result<Verdict, EngineError> {
        let span = lesson_span(start, duration)?;
        self.verdict_for(date, &span, &CheckOptions::default()).await
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.stores
            .bookings
            .get(id)
            .await?
            .ok_or(EngineError::BookingNotFound(id))
    }

    pub async fn payment_log(&self, id: Ulid) -> Result<Vec<PaymentLogEntry>, EngineError> {
        Ok(self.stores.bookings.payment_log(id).await?)
    }
}
