use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let handle = self.store.get_booking(&id)?;
        let booking = handle.read().await.clone();
        Some(booking)
    }

    /// Per-day availability snapshot over `[from, to)`. Read locks only;
    /// unprovisioned days are omitted from the result.
    ///
    /// Days are read one at a time, so a concurrent multi-day mutation may be
    /// half-visible across the window. Each returned row is internally
    /// consistent; hold creation never trusts this, it recomputes under
    /// write locks.
    pub async fn availability(
        &self,
        hotel_id: HotelId,
        room_type: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DayAvailability>, EngineError> {
        let window = StayRange::new(from, to);
        if window.nights() <= 0 {
            return Err(EngineError::InvalidRange);
        }
        if window.nights() > MAX_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }

        let mut days = Vec::new();
        for key in window.day_keys(hotel_id, room_type) {
            if let Some(row) = self.store.get_row(&key) {
                let row = *row.read().await;
                days.push(DayAvailability {
                    day: key.day,
                    total_qty: row.total_qty,
                    held_qty: row.held_qty,
                    booked_qty: row.booked_qty,
                    available: row.available(),
                });
            }
        }
        Ok(days)
    }
}
