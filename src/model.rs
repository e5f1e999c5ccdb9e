use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MINUTES_PER_DAY;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

/// Minutes since local midnight in the business zone.
pub type Minute = u32;

/// Half-open interval `[start, end)` of local minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn starting_at(start: Minute, duration: Minute) -> Self {
        Self::new(start, start + duration)
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Minute) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Parse `HH:MM`, `HH:MM:SS` or `h:MM AM/PM` into local minutes.
/// `24:00` is accepted so it can close a window.
pub fn parse_time_of_day(s: &str) -> Option<Minute> {
    let s = s.trim();
    let (clock, meridiem) = match s.rsplit_once(' ') {
        Some((clock, m)) => (clock.trim(), Some(m.trim().to_ascii_uppercase())),
        None => (s, None),
    };
    let mut parts = clock.split(':');
    let hours: Minute = parts.next()?.parse().ok()?;
    let minutes: Minute = parts.next()?.parse().ok()?;
    if let Some(secs) = parts.next() {
        let secs: u32 = secs.parse().ok()?;
        if secs >= 60 {
            return None;
        }
    }
    if parts.next().is_some() || minutes >= 60 {
        return None;
    }
    let hours = match meridiem.as_deref() {
        None => hours,
        Some("AM") if (1..=12).contains(&hours) => hours % 12,
        Some("PM") if (1..=12).contains(&hours) => hours % 12 + 12,
        Some(_) => return None,
    };
    let total = hours * 60 + minutes;
    (total <= MINUTES_PER_DAY).then_some(total)
}

pub fn format_time_of_day(minute: Minute) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

// ── Statuses ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentStatus {
    ReservationPending,
    ReservationPaid,
    ReservationFailed,
    SessionPaid,
    ReservationRefunded,
    SessionRefunded,
    Unpaid,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 10] = [
        Self::ReservationPending,
        Self::ReservationPaid,
        Self::ReservationFailed,
        Self::SessionPaid,
        Self::ReservationRefunded,
        Self::SessionRefunded,
        Self::Unpaid,
        Self::Paid,
        Self::Failed,
        Self::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReservationPending => "reservation-pending",
            Self::ReservationPaid => "reservation-paid",
            Self::ReservationFailed => "reservation-failed",
            Self::SessionPaid => "session-paid",
            Self::ReservationRefunded => "reservation-refunded",
            Self::SessionRefunded => "session-refunded",
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Self::ReservationPaid | Self::SessionPaid | Self::Paid)
    }

    pub fn is_refunded(&self) -> bool {
        matches!(
            self,
            Self::ReservationRefunded | Self::SessionRefunded | Self::Refunded
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown payment status: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttendanceStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
    Manual,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 6] = [
        Self::Pending,
        Self::Confirmed,
        Self::Completed,
        Self::Cancelled,
        Self::NoShow,
        Self::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no-show",
            Self::Manual => "manual",
        }
    }

    /// Archived bookings are never visited by the sweep.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NoShow)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown attendance status: {s}"))
    }
}

/// Single display status derived from the (payment, attendance) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Pending,
    Paid,
    Confirmed,
    Completed,
    Failed,
    Cancelled,
}

impl BookingStatus {
    pub fn derive(payment: PaymentStatus, attendance: AttendanceStatus) -> Self {
        if payment == PaymentStatus::ReservationFailed {
            return Self::Failed;
        }
        if payment.is_refunded() || attendance == AttendanceStatus::Cancelled {
            return Self::Cancelled;
        }
        match attendance {
            AttendanceStatus::Completed | AttendanceStatus::NoShow => Self::Completed,
            AttendanceStatus::Confirmed => Self::Confirmed,
            AttendanceStatus::Manual if payment.is_paid() => Self::Confirmed,
            _ if payment.is_paid() => Self::Paid,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPair {
    pub payment: PaymentStatus,
    pub attendance: AttendanceStatus,
}

// ── Lesson catalog ───────────────────────────────────────────────

/// Lesson type → duration in minutes.
#[derive(Debug, Clone)]
pub struct LessonCatalog {
    durations: HashMap<String, Minute>,
}

impl Default for LessonCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl LessonCatalog {
    pub fn empty() -> Self {
        Self {
            durations: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        Self::empty()
            .with_lesson("quick-journey", 30)
            .with_lesson("dual-quest", 30)
            .with_lesson("deep-dive", 60)
            .with_lesson("partner-progression", 60)
    }

    pub fn with_lesson(mut self, key: impl Into<String>, minutes: Minute) -> Self {
        self.durations.insert(key.into(), minutes);
        self
    }

    pub fn duration_of(&self, lesson_type: &str) -> Option<Minute> {
        self.durations.get(lesson_type.trim()).copied()
    }
}

// ── Records ──────────────────────────────────────────────────────

/// Recurring weekly open window. `day_of_week` is 0 = Sunday … 6 = Saturday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklySlot {
    pub id: Ulid,
    pub day_of_week: u8,
    pub window: Span,
    pub is_recurring: bool,
    pub is_available: bool,
}

/// Date-specific override. `is_available = false` blocks the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityException {
    pub id: Ulid,
    pub date: NaiveDate,
    pub window: Span,
    pub is_available: bool,
    pub reason: Option<String>,
}

/// Short-lived checkout hold. Void once `expires_at <= now`, deleted or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hold {
    pub id: Ulid,
    pub date: NaiveDate,
    pub start: Minute,
    pub duration_minutes: Minute,
    pub session_id: String,
    pub expires_at: Ms,
}

impl Hold {
    pub fn span(&self) -> Span {
        Span::starting_at(self.start, self.duration_minutes)
    }

    pub fn is_active(&self, now: Ms) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentContact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AthleteInfo {
    pub name: String,
    pub date_of_birth: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Ulid,
    pub preferred_date: NaiveDate,
    pub preferred_time: Minute,
    pub lesson_type: String,
    pub duration_minutes: Minute,
    pub payment_status: PaymentStatus,
    pub attendance_status: AttendanceStatus,
    pub external_session_id: Option<String>,
    /// Smallest currency unit.
    pub paid_amount: Option<i64>,
    pub created_at: Ms,
    pub parent: ParentContact,
    pub athletes: Vec<AthleteInfo>,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::starting_at(self.preferred_time, self.duration_minutes)
    }

    /// Cancelled bookings no longer occupy their slot.
    pub fn occupies_slot(&self) -> bool {
        self.attendance_status != AttendanceStatus::Cancelled
    }

    pub fn status_pair(&self) -> StatusPair {
        StatusPair {
            payment: self.payment_status,
            attendance: self.attendance_status,
        }
    }

    pub fn snapshot(&self) -> BookingSnapshot {
        BookingSnapshot {
            id: self.id,
            payment_status: self.payment_status,
            attendance_status: self.attendance_status,
            status: BookingStatus::derive(self.payment_status, self.attendance_status),
            external_session_id: self.external_session_id.clone(),
            paid_amount: self.paid_amount,
        }
    }
}

/// The lifecycle-relevant view of a booking returned by every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSnapshot {
    pub id: Ulid,
    pub payment_status: PaymentStatus,
    pub attendance_status: AttendanceStatus,
    pub status: BookingStatus,
    pub external_session_id: Option<String>,
    pub paid_amount: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPatch {
    pub payment_status: Option<PaymentStatus>,
    pub attendance_status: Option<AttendanceStatus>,
    pub external_session_id: Option<String>,
    pub paid_amount: Option<i64>,
}

impl BookingPatch {
    pub fn is_empty(&self) -> bool {
        self.payment_status.is_none()
            && self.attendance_status.is_none()
            && self.external_session_id.is_none()
            && self.paid_amount.is_none()
    }

    pub fn apply_to(&self, booking: &mut Booking) {
        if let Some(p) = self.payment_status {
            booking.payment_status = p;
        }
        if let Some(a) = self.attendance_status {
            booking.attendance_status = a;
        }
        if let Some(ref s) = self.external_session_id {
            booking.external_session_id = Some(s.clone());
        }
        if let Some(amount) = self.paid_amount {
            booking.paid_amount = Some(amount);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLogEntry {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub provider_event: String,
    pub error_message: Option<String>,
    pub at: Ms,
}

// ── Lifecycle events ─────────────────────────────────────────────

/// Explicit target state for the manual escalation path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTarget {
    pub payment: Option<PaymentStatus>,
    pub attendance: Option<AttendanceStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    PaymentSucceeded {
        booking_id: Ulid,
        session_id: String,
        amount: Option<i64>,
    },
    PaymentFailedOrExpired {
        booking_id: Ulid,
    },
    TimeTick {
        booking_id: Ulid,
        now: Ms,
    },
    AdminOverride {
        booking_id: Ulid,
        target: StatusTarget,
    },
}

impl LifecycleEvent {
    pub fn booking_id(&self) -> Ulid {
        match self {
            Self::PaymentSucceeded { booking_id, .. }
            | Self::PaymentFailedOrExpired { booking_id }
            | Self::TimeTick { booking_id, .. }
            | Self::AdminOverride { booking_id, .. } => *booking_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::PaymentSucceeded { .. } => "payment_succeeded",
            Self::PaymentFailedOrExpired { .. } => "payment_failed_or_expired",
            Self::TimeTick { .. } => "time_tick",
            Self::AdminOverride { .. } => "admin_override",
        }
    }
}

/// Journal record: one variant per store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    WeeklySlotsReplaced { slots: Vec<WeeklySlot> },
    ExceptionAdded { exception: AvailabilityException },
    ExceptionRemoved { id: Ulid },
    HoldPlaced { hold: Hold },
    HoldReleased { id: Ulid },
    BookingInserted { booking: Booking },
    BookingUpdated { id: Ulid, patch: BookingPatch },
    PaymentLogged { entry: PaymentLogEntry },
}
