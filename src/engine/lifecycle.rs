use crate::limits::PENDING_EXPIRY_MS;
use crate::model::*;

use super::EngineError;

/// The one transition table for the (payment, attendance) pair.
///
/// `Ok(None)` is a no-op: the event doesn't apply to the booking's current
/// state. Only an admin override with nothing to set is an error.
/// `session_start` is the instant the lesson begins.
pub fn transition(
    booking: &Booking,
    event: &LifecycleEvent,
    session_start: Ms,
) -> Result<Option<BookingPatch>, EngineError> {
    use AttendanceStatus as A;
    use PaymentStatus as P;

    let pay = booking.payment_status;
    let att = booking.attendance_status;

    let patch = match event {
        LifecycleEvent::PaymentSucceeded {
            session_id, amount, ..
        } if pay == P::ReservationPending => BookingPatch {
            payment_status: Some(P::ReservationPaid),
            attendance_status: (att == A::Pending).then_some(A::Confirmed),
            external_session_id: Some(session_id.clone()),
            paid_amount: *amount,
        },
        LifecycleEvent::PaymentFailedOrExpired { .. } if pay == P::ReservationPending => {
            failed_and_cancelled()
        }
        LifecycleEvent::TimeTick { now, .. } if att == A::Confirmed && session_start < *now => {
            BookingPatch {
                attendance_status: Some(A::Completed),
                payment_status: (pay == P::ReservationPaid).then_some(P::SessionPaid),
                ..Default::default()
            }
        }
        // Paid by some other route (admin mark, manual payment): catch up.
        // Completion, if due, happens on the following tick.
        LifecycleEvent::TimeTick { .. } if pay.is_paid() && att == A::Pending => BookingPatch {
            attendance_status: Some(A::Confirmed),
            ..Default::default()
        },
        LifecycleEvent::TimeTick { now, .. }
            if pay == P::ReservationPending && *now - booking.created_at > PENDING_EXPIRY_MS =>
        {
            failed_and_cancelled()
        }
        LifecycleEvent::AdminOverride { target, .. } => {
            if target.payment.is_none() && target.attendance.is_none() {
                return Err(EngineError::TransitionRejected(
                    "override must set a payment or attendance status".into(),
                ));
            }
            BookingPatch {
                payment_status: target.payment,
                attendance_status: target.attendance,
                ..Default::default()
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(patch))
}

fn failed_and_cancelled() -> BookingPatch {
    BookingPatch {
        payment_status: Some(PaymentStatus::ReservationFailed),
        attendance_status: Some(AttendanceStatus::Cancelled),
        ..Default::default()
    }
}
