use chrono::NaiveDate;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::CheckOptions;
use super::lifecycle::transition;
use super::queries::lesson_span;
use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub preferred_date: NaiveDate,
    pub preferred_time: Minute,
    pub lesson_type: String,
    pub parent: ParentContact,
    pub athletes: Vec<AthleteInfo>,
    /// Payment-provider session, persisted so webhooks can find the booking.
    pub external_session_id: Option<String>,
    /// Checkout session whose hold on this slot should not count as a conflict.
    pub hold_session_id: Option<String>,
}

/// Result of applying one lifecycle event. `changed == false` is a no-op,
/// never a failure.
#[derive(Debug, Clone)]
pub struct Applied {
    pub booking: Booking,
    pub changed: bool,
}

impl Applied {
    pub fn snapshot(&self) -> BookingSnapshot {
        self.booking.snapshot()
    }
}

fn check_name(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(EngineError::Validation(format!("{field} too long")));
    }
    Ok(())
}

fn check_new_booking(req: &NewBooking) -> Result<(), EngineError> {
    let email = req.parent.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(EngineError::Validation("parent email is required".into()));
    }
    check_name("parent email", email)?;
    check_name("parent first name", &req.parent.first_name)?;
    check_name("parent last name", &req.parent.last_name)?;
    if req.parent.phone.len() > MAX_NAME_LEN {
        return Err(EngineError::Validation("parent phone too long".into()));
    }
    if req.athletes.len() > MAX_ATHLETES_PER_BOOKING {
        return Err(EngineError::Validation(format!(
            "at most {MAX_ATHLETES_PER_BOOKING} athletes per booking"
        )));
    }
    for athlete in &req.athletes {
        check_name("athlete name", &athlete.name)?;
    }
    Ok(())
}

fn check_weekly_slot(slot: &WeeklySlot) -> Result<(), EngineError> {
    if slot.day_of_week > 6 {
        return Err(EngineError::Validation("day of week must be 0-6".into()));
    }
    check_window(&slot.window)
}

fn check_window(window: &Span) -> Result<(), EngineError> {
    if window.start >= window.end || window.end > MINUTES_PER_DAY {
        return Err(EngineError::Validation("start time must be before end time".into()));
    }
    Ok(())
}

impl Engine {
    /// Re-validates inside the per-date lock, then inserts as
    /// `reservation-pending` / `pending`.
    pub async fn create_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        check_new_booking(&req)?;
        let duration = self.duration_of(&req.lesson_type)?;
        let span = lesson_span(req.preferred_time, duration)?;
        let date = req.preferred_date;

        let date_lock = self.date_lock(date);
        let _guard = date_lock.lock().await;

        let opts = CheckOptions {
            hold_session: req.hold_session_id.as_deref(),
            exclude_booking: None,
        };
        let verdict = self.verdict_for(date, &span, &opts).await?;
        if !verdict.available {
            let reason = verdict.reason.unwrap_or_default();
            metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL).increment(1);
            info!(%date, time = %format_time_of_day(span.start), %reason, "booking rejected at write time");
            return Err(EngineError::SlotUnavailable(format!(
                "slot no longer available: {reason}"
            )));
        }

        let booking = Booking {
            id: Ulid::new(),
            preferred_date: date,
            preferred_time: span.start,
            lesson_type: req.lesson_type.trim().to_string(),
            duration_minutes: duration,
            payment_status: PaymentStatus::ReservationPending,
            attendance_status: AttendanceStatus::Pending,
            external_session_id: req.external_session_id.clone(),
            paid_amount: None,
            created_at: self.now(),
            parent: req.parent,
            athletes: req.athletes,
        };
        self.stores.bookings.insert(booking.clone()).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(booking_id = %booking.id, %date, time = %format_time_of_day(span.start), "booking created");

        // The booking is committed; a stale hold only costs its TTL.
        if let Some(session) = req.hold_session_id.as_deref()
            && let Err(e) = self.remove_hold_locked(date, span.start, session).await
            && !e.is_not_found()
        {
            warn!(booking_id = %booking.id, session_id = session, "hold release failed: {e}");
        }
        Ok(booking)
    }

    /// Reserve a slot for a checkout session. Placing again refreshes expiry.
    pub async fn place_hold(
        &self,
        date: NaiveDate,
        start: Minute,
        lesson_type: &str,
        session_id: &str,
    ) -> Result<Hold, EngineError> {
        check_name("session id", session_id)?;
        let duration = self.duration_of(lesson_type)?;
        let span = lesson_span(start, duration)?;

        let date_lock = self.date_lock(date);
        let _guard = date_lock.lock().await;

        let opts = CheckOptions {
            hold_session: Some(session_id),
            exclude_booking: None,
        };
        let verdict = self.verdict_for(date, &span, &opts).await?;
        if !verdict.available {
            return Err(EngineError::SlotUnavailable(verdict.reason.unwrap_or_default()));
        }

        let existing = self.stores.holds.find_hold(date, start, session_id).await?;
        let hold = Hold {
            id: existing.map_or_else(Ulid::new, |h| h.id),
            date,
            start,
            duration_minutes: duration,
            session_id: session_id.to_string(),
            expires_at: self.now() + HOLD_TTL_MS,
        };
        self.stores.holds.put_hold(hold.clone()).await?;
        debug!(%date, time = %format_time_of_day(start), session_id, "hold placed");
        Ok(hold)
    }

    /// Only the owning session can release its hold.
    pub async fn release_hold(
        &self,
        date: NaiveDate,
        start: Minute,
        session_id: &str,
    ) -> Result<(), EngineError> {
        let date_lock = self.date_lock(date);
        let _guard = date_lock.lock().await;
        self.remove_hold_locked(date, start, session_id).await
    }

    async fn remove_hold_locked(
        &self,
        date: NaiveDate,
        start: Minute,
        session_id: &str,
    ) -> Result<(), EngineError> {
        let hold = self
            .stores
            .holds
            .find_hold(date, start, session_id)
            .await?
            .ok_or(EngineError::HoldNotFound { date, start })?;
        self.stores.holds.remove_hold(hold.id).await?;
        Ok(())
    }

    /// Apply one lifecycle event under the booking's lock.
    pub async fn apply(&self, event: LifecycleEvent) -> Result<Applied, EngineError> {
        let id = event.booking_id();
        let lock = self.booking_lock(id);
        let _guard = lock.lock().await;

        let booking = self.get_booking(id).await?;
        let Some(patch) = transition(&booking, &event, self.session_start(&booking))? else {
            metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "event" => event.label(), "outcome" => "noop")
                .increment(1);
            debug!(booking_id = %id, event = event.label(), "no transition");
            return Ok(Applied {
                booking,
                changed: false,
            });
        };

        let revives = booking.attendance_status == AttendanceStatus::Cancelled
            && patch
                .attendance_status
                .is_some_and(|a| a != AttendanceStatus::Cancelled);
        if !revives {
            return self.commit_patch(booking, patch, &event).await;
        }

        // Un-cancelling claims the slot again.
        let date_lock = self.date_lock(booking.preferred_date);
        let _date_guard = date_lock.lock().await;
        let opts = CheckOptions {
            hold_session: None,
            exclude_booking: Some(id),
        };
        let verdict = self
            .verdict_for(booking.preferred_date, &booking.span(), &opts)
            .await?;
        if !verdict.available {
            return Err(EngineError::TransitionRejected(format!(
                "cannot restore booking: {}",
                verdict.reason.unwrap_or_default()
            )));
        }
        self.commit_patch(booking, patch, &event).await
    }

    async fn commit_patch(
        &self,
        before: Booking,
        patch: BookingPatch,
        event: &LifecycleEvent,
    ) -> Result<Applied, EngineError> {
        let after = self
            .stores
            .bookings
            .update(before.id, patch)
            .await?
            .ok_or(EngineError::BookingNotFound(before.id))?;
        let changed = after != before;
        let outcome = if changed { "changed" } else { "noop" };
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "event" => event.label(), "outcome" => outcome)
            .increment(1);
        if changed {
            info!(
                booking_id = %after.id,
                event = event.label(),
                from = %format!("{}/{}", before.payment_status, before.attendance_status),
                to = %format!("{}/{}", after.payment_status, after.attendance_status),
                "booking transitioned"
            );
        }
        Ok(Applied {
            booking: after,
            changed,
        })
    }

    /// Manual escalation path: set the target state directly.
    pub async fn admin_override(
        &self,
        booking_id: Ulid,
        target: StatusTarget,
    ) -> Result<Applied, EngineError> {
        let applied = self
            .apply(LifecycleEvent::AdminOverride { booking_id, target })
            .await?;
        warn!(
            booking_id = %booking_id,
            payment = ?target.payment,
            attendance = ?target.attendance,
            changed = applied.changed,
            "admin status override"
        );
        Ok(applied)
    }

    pub async fn replace_weekly_slots(&self, slots: Vec<WeeklySlot>) -> Result<(), EngineError> {
        for slot in &slots {
            check_weekly_slot(slot)?;
        }
        let count = slots.len();
        self.stores.availability.replace_weekly_slots(slots).await?;
        info!(count, "weekly availability replaced");
        Ok(())
    }

    pub async fn add_exception(&self, exception: AvailabilityException) -> Result<(), EngineError> {
        check_window(&exception.window)?;
        if exception.reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::Validation("reason too long".into()));
        }
        info!(date = %exception.date, blocked = !exception.is_available, "availability exception added");
        self.stores.exceptions.add_exception(exception).await?;
        Ok(())
    }
}
