mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod store;

pub use availability::{candidate_starts, meets_lead_time};
pub use conflict::{check, CheckOptions, DayView, Verdict};
pub use error::{EngineError, StoreError};
pub use lifecycle::transition;
pub use mutations::{Applied, NewBooking};
pub use store::{
    AvailabilityStore, BookingRepository, ExceptionStore, InMemoryStore, ReservationLedger, Stores,
};

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::clock::{BusinessZone, Clock};
use crate::model::*;

/// Scheduling and lifecycle core. Cheap to share behind an `Arc`; there is no
/// global lock, only one mutex per booking and one per date.
pub struct Engine {
    pub stores: Stores,
    pub catalog: LessonCatalog,
    pub zone: BusinessZone,
    clock: Arc<dyn Clock>,
    booking_locks: DashMap<Ulid, Arc<Mutex<()>>>,
    date_locks: DashMap<NaiveDate, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(
        stores: Stores,
        catalog: LessonCatalog,
        zone: BusinessZone,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stores,
            catalog,
            zone,
            clock,
            booking_locks: DashMap::new(),
            date_locks: DashMap::new(),
        }
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    pub fn duration_of(&self, lesson_type: &str) -> Result<Minute, EngineError> {
        self.catalog
            .duration_of(lesson_type)
            .ok_or_else(|| EngineError::Validation(format!("unknown lesson type: {lesson_type}")))
    }

    /// Serializes every read-modify-write of one booking.
    pub(super) fn booking_lock(&self, id: Ulid) -> Arc<Mutex<()>> {
        self.booking_locks.entry(id).or_default().value().clone()
    }

    /// Serializes writes that claim time on one date (creation, holds,
    /// un-cancelling). Taken after the booking lock when both are needed.
    pub(super) fn date_lock(&self, date: NaiveDate) -> Arc<Mutex<()>> {
        self.date_locks.entry(date).or_default().value().clone()
    }

    /// Drop lock entries nobody is holding. Safe while writers run: a lock
    /// that's been handed out has a strong count above one.
    pub fn prune_locks(&self) -> usize {
        let before = self.booking_locks.len() + self.date_locks.len();
        self.booking_locks.retain(|_, l| Arc::strong_count(l) > 1);
        self.date_locks.retain(|_, l| Arc::strong_count(l) > 1);
        before.saturating_sub(self.booking_locks.len() + self.date_locks.len())
    }

    /// Session start instant in the business zone.
    pub fn session_start(&self, booking: &Booking) -> Ms {
        self.zone.instant(booking.preferred_date, booking.preferred_time)
    }
}
