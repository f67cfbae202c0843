use chrono::NaiveDate;
use tokio::sync::{oneshot, OwnedRwLockWriteGuard};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{
    alarm_missing_row, charge_hold, move_held_to_booked, release_pool, release_unit, Engine,
    EngineError, Pool, WalCommand,
};

/// Write guards over a booking's ledger rows, in lock order. `None` marks a
/// day whose row has gone missing; the alarm fired when it was discovered.
type DayGuards = Vec<Option<OwnedRwLockWriteGuard<DayRow>>>;

impl Engine {
    /// Upsert `total_qty` across `[from, to)`. Admin-only; booking operations
    /// never create or resize ledger rows.
    pub async fn provision(
        &self,
        hotel_id: HotelId,
        room_type: &str,
        from: NaiveDate,
        to: NaiveDate,
        total_qty: u32,
    ) -> Result<usize, EngineError> {
        let window = StayRange::new(from, to);
        if window.nights() <= 0 {
            return Err(EngineError::InvalidRange);
        }
        if window.nights() > MAX_PROVISION_DAYS {
            return Err(EngineError::LimitExceeded("provision window too wide"));
        }
        validate_room_type(room_type)?;
        if total_qty > MAX_TOTAL_QTY {
            return Err(EngineError::LimitExceeded("total_qty too large"));
        }

        let keys = window.day_keys(hotel_id, room_type);
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let row = self.store.get_or_insert_row(key.clone());
            guards.push(row.write_owned().await);
        }

        // Validate the whole window before touching anything: shrinking a row
        // below its outstanding units would break the ledger invariant.
        for guard in &guards {
            if guard.outstanding() > total_qty {
                return Err(EngineError::LimitExceeded(
                    "total_qty below outstanding units",
                ));
            }
        }

        for (key, guard) in keys.iter().zip(guards.iter_mut()) {
            let event = Event::InventoryProvisioned {
                hotel_id,
                room_type: room_type.to_string(),
                day: key.day,
                total_qty,
            };
            self.wal_append(&event).await?;
            guard.total_qty = total_qty;
        }

        Ok(keys.len())
    }

    /// Reserve one unit for every night of the stay, all-or-nothing. Returns
    /// the new hold with its generated id and deadline.
    pub async fn create_hold(
        &self,
        hotel_id: HotelId,
        room_type: &str,
        stay: StayRange,
        contact: Contact,
    ) -> Result<Booking, EngineError> {
        if stay.nights() <= 0 {
            return Err(EngineError::InvalidRange);
        }
        if stay.nights() > MAX_STAY_NIGHTS {
            return Err(EngineError::LimitExceeded("stay too long"));
        }
        validate_room_type(room_type)?;
        validate_contact(&contact)?;

        // Lock every ledger row for the stay in ascending day order; two
        // holds on overlapping ranges always meet at their first shared day,
        // so there is no circular wait. An unprovisioned day fails the whole
        // request.
        let keys = stay.day_keys(hotel_id, room_type);
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let row = self
                .store
                .get_row(key)
                .ok_or(EngineError::Unavailable(key.day))?;
            guards.push(row.write_owned().await);
        }

        // Availability is recomputed under the locks: one short day anywhere
        // fails the request with nothing incremented.
        for (key, guard) in keys.iter().zip(&guards) {
            if guard.available() < 1 {
                return Err(EngineError::Unavailable(key.day));
            }
        }

        let now = now_ms();
        let booking = Booking {
            id: Ulid::new(),
            hotel_id,
            room_type: room_type.to_string(),
            check_in: stay.check_in,
            check_out: stay.check_out,
            contact,
            status: BookingStatus::Hold,
            hold_expires_at: Some(now + self.config.hold_ttl_ms),
            created_at: now,
        };

        self.wal_append(&Event::HoldPlaced {
            booking: booking.clone(),
        })
        .await?;

        for guard in guards.iter_mut() {
            charge_hold(guard);
        }
        self.store.insert_booking(booking.clone());

        Ok(booking)
    }

    /// Transition hold -> confirmed, moving the booking's unit from held to
    /// booked on every night. Confirming an already-confirmed booking is a
    /// no-op success.
    pub async fn confirm(&self, id: Ulid) -> Result<Booking, EngineError> {
        let handle = self
            .store
            .get_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let mut booking = handle.write_owned().await;

        match booking.status {
            BookingStatus::Confirmed => return Ok(booking.clone()), // idempotent
            BookingStatus::Hold => {}
            status => return Err(EngineError::InvalidState(status)),
        }
        if let Some(deadline) = booking.hold_expires_at
            && now_ms() > deadline
        {
            // Logically dead even though the sweeper has not reclaimed it
            // yet; the ledger stays charged to held_qty until a sweep runs.
            return Err(EngineError::Expired(id));
        }

        let keys = booking.day_keys();
        let mut guards = self.lock_day_rows(&keys).await;

        self.wal_append(&Event::HoldConfirmed { id }).await?;

        for (key, guard) in keys.iter().zip(guards.iter_mut()) {
            if let Some(guard) = guard {
                move_held_to_booked(key, guard);
            }
        }
        BookingUpdate::settle(BookingStatus::Confirmed).apply(&mut booking);

        Ok(booking.clone())
    }

    /// Transition any non-terminal state to cancelled, releasing whatever the
    /// booking currently occupies. Cancelling a terminal booking is a no-op
    /// success; cancellation never fails on timing.
    pub async fn cancel(&self, id: Ulid) -> Result<Booking, EngineError> {
        let handle = self
            .store
            .get_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let mut booking = handle.write_owned().await;

        if booking.status.is_terminal() {
            return Ok(booking.clone()); // idempotent
        }
        let pool = release_pool(booking.status);

        let keys = booking.day_keys();
        let mut guards = self.lock_day_rows(&keys).await;

        self.wal_append(&Event::BookingCancelled { id }).await?;

        if let Some(pool) = pool {
            for (key, guard) in keys.iter().zip(guards.iter_mut()) {
                if let Some(guard) = guard {
                    release_unit(key, guard, pool);
                }
            }
        }
        BookingUpdate::settle(BookingStatus::Cancelled).apply(&mut booking);

        Ok(booking.clone())
    }

    /// Reclaim inventory from every hold whose deadline passed before `now`.
    /// Returns the count reclaimed; zero is the expected common case.
    ///
    /// Safe to run from multiple workers at once: candidates are claimed with
    /// try-lock-and-skip, so a row another transaction holds (a concurrent
    /// confirm, cancel, or sweep) is skipped in this pass instead of awaited,
    /// and the status re-check under the claimed lock prevents any
    /// double-release.
    pub async fn expire_due_holds(&self, now: Ms) -> Result<usize, EngineError> {
        let mut released = 0usize;

        for handle in self.store.all_bookings() {
            let Ok(mut booking) = handle.try_write() else {
                continue; // locked by live traffic, next pass will see it
            };
            if booking.status != BookingStatus::Hold {
                continue;
            }
            let Some(deadline) = booking.hold_expires_at else {
                continue;
            };
            if deadline >= now {
                continue;
            }

            let keys = booking.day_keys();
            let mut guards = self.lock_day_rows(&keys).await;

            self.wal_append(&Event::HoldExpired { id: booking.id }).await?;

            for (key, guard) in keys.iter().zip(guards.iter_mut()) {
                if let Some(guard) = guard {
                    release_unit(key, guard, Pool::Held);
                }
            }
            BookingUpdate::settle(BookingStatus::Expired).apply(&mut booking);
            released += 1;
        }

        Ok(released)
    }

    /// Acquire write locks on the given ledger rows, in the given (already
    /// sorted) order. A missing row is alarmed and yields `None`.
    async fn lock_day_rows(&self, keys: &[DayKey]) -> DayGuards {
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            match self.store.get_row(key) {
                Some(row) => guards.push(Some(row.write_owned().await)),
                None => {
                    alarm_missing_row(key);
                    guards.push(None);
                }
            }
        }
        guards
    }

    /// Rewrite the WAL as the minimal event sequence recreating current
    /// state: provisioning for every row, then each booking's hold placement
    /// plus the transition that led to its current status. Counters are
    /// derived from bookings on replay, so rows only contribute `total_qty`.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let mut rows = self.store.all_rows();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, row) in rows {
            let total_qty = row.read().await.total_qty;
            events.push(Event::InventoryProvisioned {
                hotel_id: key.hotel_id,
                room_type: key.room_type,
                day: key.day,
                total_qty,
            });
        }

        let mut bookings = Vec::new();
        for handle in self.store.all_bookings() {
            bookings.push(handle.read().await.clone());
        }
        bookings.sort_by_key(|b| (b.created_at, b.id));

        for booking in bookings {
            let (id, status) = (booking.id, booking.status);
            let mut as_hold = booking;
            as_hold.status = BookingStatus::Hold;
            events.push(Event::HoldPlaced { booking: as_hold });
            match status {
                BookingStatus::Hold => {}
                BookingStatus::Confirmed => events.push(Event::HoldConfirmed { id }),
                BookingStatus::Cancelled => events.push(Event::BookingCancelled { id }),
                BookingStatus::Expired => events.push(Event::HoldExpired { id }),
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Persistence("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn validate_room_type(room_type: &str) -> Result<(), EngineError> {
    if room_type.trim().is_empty() {
        return Err(EngineError::LimitExceeded("room_type must not be empty"));
    }
    if room_type.len() > MAX_ROOM_TYPE_LEN {
        return Err(EngineError::LimitExceeded("room_type too long"));
    }
    Ok(())
}

fn validate_contact(contact: &Contact) -> Result<(), EngineError> {
    if contact.name.trim().is_empty() {
        return Err(EngineError::InvalidContact("name must not be empty"));
    }
    if contact.phone.trim().is_empty() {
        return Err(EngineError::InvalidContact("phone must not be empty"));
    }
    if contact.name.len() > MAX_CONTACT_FIELD_LEN || contact.phone.len() > MAX_CONTACT_FIELD_LEN {
        return Err(EngineError::LimitExceeded("contact field too long"));
    }
    Ok(())
}
