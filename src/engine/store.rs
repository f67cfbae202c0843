use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::{Booking, DayKey, DayRow};

pub type SharedDayRow = Arc<RwLock<DayRow>>;
pub type SharedBooking = Arc<RwLock<Booking>>;

/// The two shared mutable resources of the system: the inventory ledger and
/// the booking record store. Rows are individually lockable; the maps
/// themselves only ever see short, non-awaiting accesses.
pub struct LedgerStore {
    rows: DashMap<DayKey, SharedDayRow>,
    bookings: DashMap<Ulid, SharedBooking>,
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            bookings: DashMap::new(),
        }
    }

    // ── Ledger rows ──────────────────────────────────────────

    pub fn get_row(&self, key: &DayKey) -> Option<SharedDayRow> {
        self.rows.get(key).map(|e| e.value().clone())
    }

    /// Fetch the row for `key`, creating an empty one if absent.
    /// Only provisioning creates rows; booking operations use `get_row`.
    pub fn get_or_insert_row(&self, key: DayKey) -> SharedDayRow {
        self.rows
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(DayRow::new(0))))
            .value()
            .clone()
    }

    /// Snapshot of all ledger row handles. Used by compaction.
    pub fn all_rows(&self) -> Vec<(DayKey, SharedDayRow)> {
        self.rows
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    // ── Booking rows ─────────────────────────────────────────

    pub fn get_booking(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn insert_booking(&self, booking: Booking) {
        self.bookings
            .insert(booking.id, Arc::new(RwLock::new(booking)));
    }

    /// Snapshot of all booking handles. Callers lock (or try-lock) each row
    /// individually; no map guard is held across an await.
    pub fn all_bookings(&self) -> Vec<SharedBooking> {
        self.bookings.iter().map(|e| e.value().clone()).collect()
    }
}
