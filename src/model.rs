use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time-of-day type in the system.
/// Calendar days are `NaiveDate`; the two never mix.
pub type Ms = i64;

pub type HotelId = u32;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Key of one inventory ledger row: one (hotel, room type, calendar day).
///
/// The derived lexicographic order is the global lock order; every operation
/// that locks more than one ledger row acquires them in ascending `DayKey`
/// order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayKey {
    pub hotel_id: HotelId,
    pub room_type: String,
    pub day: NaiveDate,
}

impl std::fmt::Display for DayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.hotel_id, self.room_type, self.day)
    }
}

/// Half-open stay interval `[check_in, check_out)`. Checkout day is not
/// occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayRange {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self { check_in, check_out }
    }

    /// Number of occupied nights. Negative for an inverted range.
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    /// Occupied days in ascending order, checkout excluded.
    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        let check_in = self.check_in;
        (0..self.nights().max(0) as u64).map(move |n| check_in + Days::new(n))
    }

    /// Ledger keys for every occupied day, already in lock order.
    pub fn day_keys(&self, hotel_id: HotelId, room_type: &str) -> Vec<DayKey> {
        self.days()
            .map(|day| DayKey {
                hotel_id,
                room_type: room_type.to_string(),
                day,
            })
            .collect()
    }
}

/// One inventory ledger row. `total_qty` is set by provisioning and immutable
/// to the booking operations; `held_qty`/`booked_qty` are mutated only by the
/// engine. Invariant: `held_qty + booked_qty <= total_qty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRow {
    pub total_qty: u32,
    pub held_qty: u32,
    pub booked_qty: u32,
}

impl DayRow {
    pub fn new(total_qty: u32) -> Self {
        Self {
            total_qty,
            held_qty: 0,
            booked_qty: 0,
        }
    }

    /// Units still free to hold.
    pub fn available(&self) -> u32 {
        self.total_qty
            .saturating_sub(self.held_qty.saturating_add(self.booked_qty))
    }

    /// Units currently committed to live bookings.
    pub fn outstanding(&self) -> u32 {
        self.held_qty.saturating_add(self.booked_qty)
    }
}

/// Booking lifecycle. Legal transitions: hold -> confirmed, hold -> cancelled,
/// hold -> expired, confirmed -> cancelled. Nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Hold,
    Confirmed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Hold => "hold",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub phone: String,
}

/// One reservation attempt. While `status` is `Hold` the ledger carries one
/// `held_qty` unit per occupied day for this booking; while `Confirmed`, one
/// `booked_qty` unit; terminal states carry nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub hotel_id: HotelId,
    pub room_type: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub contact: Contact,
    pub status: BookingStatus,
    /// Set only while `status` is `Hold`.
    pub hold_expires_at: Option<Ms>,
    pub created_at: Ms,
}

impl Booking {
    pub fn stay(&self) -> StayRange {
        StayRange::new(self.check_in, self.check_out)
    }

    /// Ledger keys for every occupied day, in lock order.
    pub fn day_keys(&self) -> Vec<DayKey> {
        self.stay().day_keys(self.hotel_id, &self.room_type)
    }
}

/// Explicit partial update of a booking row, applied while the row lock is
/// held. Fields left `None` are untouched; `hold_expires_at: Some(None)`
/// clears the deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingUpdate {
    pub status: Option<BookingStatus>,
    pub hold_expires_at: Option<Option<Ms>>,
}

impl BookingUpdate {
    /// Transition into a state that carries no deadline.
    pub fn settle(status: BookingStatus) -> Self {
        Self {
            status: Some(status),
            hold_expires_at: Some(None),
        }
    }

    pub fn apply(&self, booking: &mut Booking) {
        if let Some(status) = self.status {
            booking.status = status;
        }
        if let Some(deadline) = self.hold_expires_at {
            booking.hold_expires_at = deadline;
        }
    }
}

/// The event types. This is the WAL record format; replaying the sequence
/// reproduces ledger counters and booking states exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    InventoryProvisioned {
        hotel_id: HotelId,
        room_type: String,
        day: NaiveDate,
        total_qty: u32,
    },
    HoldPlaced {
        booking: Booking,
    },
    HoldConfirmed {
        id: Ulid,
    },
    BookingCancelled {
        id: Ulid,
    },
    HoldExpired {
        id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Per-day availability snapshot for one provisioned ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub day: NaiveDate,
    pub total_qty: u32,
    pub held_qty: u32,
    pub booked_qty: u32,
    pub available: u32,
}
