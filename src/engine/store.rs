use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;
use crate::wal::{Journal, Wal};

use super::StoreError;

// ── Leaf store traits ────────────────────────────────────────────

#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    async fn weekly_slots(&self) -> Result<Vec<WeeklySlot>, StoreError>;
    async fn replace_weekly_slots(&self, slots: Vec<WeeklySlot>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ExceptionStore: Send + Sync {
    async fn exceptions_on(&self, date: NaiveDate) -> Result<Vec<AvailabilityException>, StoreError>;
    async fn add_exception(&self, exception: AvailabilityException) -> Result<(), StoreError>;
    async fn remove_exception(&self, id: Ulid) -> Result<bool, StoreError>;
}

/// Checkout holds. Returned holds may already be expired; readers decide.
#[async_trait]
pub trait ReservationLedger: Send + Sync {
    async fn holds_on(&self, date: NaiveDate) -> Result<Vec<Hold>, StoreError>;
    async fn find_hold(
        &self,
        date: NaiveDate,
        start: Minute,
        session_id: &str,
    ) -> Result<Option<Hold>, StoreError>;
    /// Insert, or replace the hold with the same id.
    async fn put_hold(&self, hold: Hold) -> Result<(), StoreError>;
    async fn remove_hold(&self, id: Ulid) -> Result<bool, StoreError>;
    async fn purge_expired(&self, now: Ms) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn get(&self, id: Ulid) -> Result<Option<Booking>, StoreError>;
    /// Bookings on `date` that still occupy their slot.
    async fn active_on(&self, date: NaiveDate) -> Result<Vec<Booking>, StoreError>;
    async fn list_non_terminal(&self) -> Result<Vec<Booking>, StoreError>;
    async fn find_by_session(&self, session_id: &str) -> Result<Option<Booking>, StoreError>;
    async fn insert(&self, booking: Booking) -> Result<(), StoreError>;
    /// `Ok(None)` when no booking has this id.
    async fn update(&self, id: Ulid, patch: BookingPatch) -> Result<Option<Booking>, StoreError>;
    async fn log_payment_event(&self, entry: PaymentLogEntry) -> Result<(), StoreError>;
    async fn payment_log(&self, booking_id: Ulid) -> Result<Vec<PaymentLogEntry>, StoreError>;
}

/// The four leaf providers the engine reads and writes through.
#[derive(Clone)]
pub struct Stores {
    pub availability: Arc<dyn AvailabilityStore>,
    pub exceptions: Arc<dyn ExceptionStore>,
    pub holds: Arc<dyn ReservationLedger>,
    pub bookings: Arc<dyn BookingRepository>,
}

impl Stores {
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            availability: store.clone(),
            exceptions: store.clone(),
            holds: store.clone(),
            bookings: store,
        }
    }
}

// ── In-memory implementation ─────────────────────────────────────

/// DashMap-backed store implementing every leaf trait. With a journal
/// attached, each mutation is made durable before it becomes visible.
pub struct InMemoryStore {
    weekly: RwLock<Vec<WeeklySlot>>,
    exceptions: DashMap<Ulid, AvailabilityException>,
    holds: DashMap<Ulid, Hold>,
    bookings: DashMap<Ulid, Booking>,
    /// date → booking ids
    by_date: DashMap<NaiveDate, Vec<Ulid>>,
    /// external session id → booking id
    by_session: DashMap<String, Ulid>,
    payment_log: DashMap<Ulid, Vec<PaymentLogEntry>>,
    journal: Option<Journal>,
    /// Mutations hold this shared; compaction takes it exclusively so the
    /// snapshot never misses an entry that is journaled but not yet applied.
    gate: tokio::sync::RwLock<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            weekly: RwLock::new(Vec::new()),
            exceptions: DashMap::new(),
            holds: DashMap::new(),
            bookings: DashMap::new(),
            by_date: DashMap::new(),
            by_session: DashMap::new(),
            payment_log: DashMap::new(),
            journal: None,
            gate: tokio::sync::RwLock::new(()),
        }
    }

    /// Replay the journal at `path`, then keep appending to it.
    /// Must be called inside a tokio runtime (spawns the writer task).
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let (wal, entries) = Wal::recover(path)?;
        let mut store = Self::new();
        for entry in &entries {
            store.apply(entry);
        }
        store.journal = Some(Journal::spawn(wal));
        tracing::info!(path = %path.display(), entries = entries.len(), "journal replayed");
        Ok(store)
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    async fn commit(&self, entry: JournalEntry) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        if let Some(journal) = &self.journal {
            journal.append(entry.clone()).await?;
        }
        self.apply(&entry);
        Ok(())
    }

    fn apply(&self, entry: &JournalEntry) {
        match entry {
            JournalEntry::WeeklySlotsReplaced { slots } => {
                *self.weekly.write().unwrap_or_else(PoisonError::into_inner) = slots.clone();
            }
            JournalEntry::ExceptionAdded { exception } => {
                self.exceptions.insert(exception.id, exception.clone());
            }
            JournalEntry::ExceptionRemoved { id } => {
                self.exceptions.remove(id);
            }
            JournalEntry::HoldPlaced { hold } => {
                self.holds.insert(hold.id, hold.clone());
            }
            JournalEntry::HoldReleased { id } => {
                self.holds.remove(id);
            }
            JournalEntry::BookingInserted { booking } => {
                self.by_date.entry(booking.preferred_date).or_default().push(booking.id);
                if let Some(session) = &booking.external_session_id {
                    self.by_session.insert(session.clone(), booking.id);
                }
                self.bookings.insert(booking.id, booking.clone());
            }
            JournalEntry::BookingUpdated { id, patch } => {
                if let Some(mut booking) = self.bookings.get_mut(id) {
                    patch.apply_to(&mut booking);
                }
                if let Some(session) = &patch.external_session_id {
                    self.by_session.insert(session.clone(), *id);
                }
            }
            JournalEntry::PaymentLogged { entry } => {
                self.payment_log.entry(entry.booking_id).or_default().push(entry.clone());
            }
        }
    }

    /// Entries that rebuild the current state from nothing.
    fn snapshot(&self) -> Vec<JournalEntry> {
        let weekly = self.weekly.read().unwrap_or_else(PoisonError::into_inner).clone();
        let mut out = vec![JournalEntry::WeeklySlotsReplaced { slots: weekly }];
        out.extend(self.exceptions.iter().map(|e| JournalEntry::ExceptionAdded {
            exception: e.value().clone(),
        }));
        out.extend(self.holds.iter().map(|h| JournalEntry::HoldPlaced {
            hold: h.value().clone(),
        }));
        let mut bookings: Vec<Booking> = self.bookings.iter().map(|b| b.value().clone()).collect();
        bookings.sort_by_key(|b| b.id);
        out.extend(bookings.into_iter().map(|booking| JournalEntry::BookingInserted { booking }));
        for log in self.payment_log.iter() {
            out.extend(log.value().iter().map(|entry| JournalEntry::PaymentLogged {
                entry: entry.clone(),
            }));
        }
        out
    }

    /// Rewrite the journal as a snapshot once it has grown past `threshold`
    /// appends. Returns whether it compacted.
    pub async fn compact_if_needed(&self, threshold: u64) -> Result<bool, StoreError> {
        let Some(journal) = &self.journal else {
            return Ok(false);
        };
        if journal.appends_since_compact().await? < threshold {
            return Ok(false);
        }
        let _gate = self.gate.write().await;
        let snapshot = self.snapshot();
        let entries = snapshot.len();
        journal.compact(snapshot).await?;
        tracing::info!(entries, "journal compacted");
        metrics::counter!(crate::observability::JOURNAL_COMPACTIONS_TOTAL).increment(1);
        Ok(true)
    }
}

#[async_trait]
impl AvailabilityStore for InMemoryStore {
    async fn weekly_slots(&self) -> Result<Vec<WeeklySlot>, StoreError> {
        Ok(self.weekly.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn replace_weekly_slots(&self, slots: Vec<WeeklySlot>) -> Result<(), StoreError> {
        self.commit(JournalEntry::WeeklySlotsReplaced { slots }).await
    }
}

#[async_trait]
impl ExceptionStore for InMemoryStore {
    async fn exceptions_on(&self, date: NaiveDate) -> Result<Vec<AvailabilityException>, StoreError> {
        Ok(self
            .exceptions
            .iter()
            .filter(|e| e.date == date)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn add_exception(&self, exception: AvailabilityException) -> Result<(), StoreError> {
        self.commit(JournalEntry::ExceptionAdded { exception }).await
    }

    async fn remove_exception(&self, id: Ulid) -> Result<bool, StoreError> {
        if !self.exceptions.contains_key(&id) {
            return Ok(false);
        }
        self.commit(JournalEntry::ExceptionRemoved { id }).await?;
        Ok(true)
    }
}

#[async_trait]
impl ReservationLedger for InMemoryStore {
    async fn holds_on(&self, date: NaiveDate) -> Result<Vec<Hold>, StoreError> {
        Ok(self
            .holds
            .iter()
            .filter(|h| h.date == date)
            .map(|h| h.value().clone())
            .collect())
    }

    async fn find_hold(
        &self,
        date: NaiveDate,
        start: Minute,
        session_id: &str,
    ) -> Result<Option<Hold>, StoreError> {
        Ok(self
            .holds
            .iter()
            .find(|h| h.date == date && h.start == start && h.session_id == session_id)
            .map(|h| h.value().clone()))
    }

    async fn put_hold(&self, hold: Hold) -> Result<(), StoreError> {
        self.commit(JournalEntry::HoldPlaced { hold }).await
    }

    async fn remove_hold(&self, id: Ulid) -> Result<bool, StoreError> {
        if !self.holds.contains_key(&id) {
            return Ok(false);
        }
        self.commit(JournalEntry::HoldReleased { id }).await?;
        Ok(true)
    }

    async fn purge_expired(&self, now: Ms) -> Result<usize, StoreError> {
        let expired: Vec<Ulid> = self
            .holds
            .iter()
            .filter(|h| !h.is_active(now))
            .map(|h| h.id)
            .collect();
        let mut purged = 0;
        for id in expired {
            if self.remove_hold(id).await? {
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn get(&self, id: Ulid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(&id).map(|b| b.value().clone()))
    }

    async fn active_on(&self, date: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        let ids = self.by_date.get(&date).map(|e| e.value().clone()).unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.bookings.get(id).map(|b| b.value().clone()))
            .filter(Booking::occupies_slot)
            .collect())
    }

    async fn list_non_terminal(&self) -> Result<Vec<Booking>, StoreError> {
        let mut out: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| !b.attendance_status.is_terminal())
            .map(|b| b.value().clone())
            .collect();
        out.sort_by_key(|b| b.id);
        Ok(out)
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Booking>, StoreError> {
        let Some(id) = self.by_session.get(session_id).map(|e| *e.value()) else {
            return Ok(None);
        };
        self.get(id).await
    }

    async fn insert(&self, booking: Booking) -> Result<(), StoreError> {
        self.commit(JournalEntry::BookingInserted { booking }).await
    }

    async fn update(&self, id: Ulid, patch: BookingPatch) -> Result<Option<Booking>, StoreError> {
        if !self.bookings.contains_key(&id) {
            return Ok(None);
        }
        self.commit(JournalEntry::BookingUpdated { id, patch }).await?;
        self.get(id).await
    }

    async fn log_payment_event(&self, entry: PaymentLogEntry) -> Result<(), StoreError> {
        self.commit(JournalEntry::PaymentLogged { entry }).await
    }

    async fn payment_log(&self, booking_id: Ulid) -> Result<Vec<PaymentLogEntry>, StoreError> {
        Ok(self
            .payment_log
            .get(&booking_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}
