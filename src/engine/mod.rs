mod error;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use store::{LedgerStore, SharedBooking, SharedDayRow};

use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::model::*;
use crate::wal::Wal;

/// Policy knobs injected at construction. Values come from the environment in
/// `main`; tests construct them directly.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// How long a fresh hold keeps its inventory before it is reclaimable.
    pub hold_ttl_ms: Ms,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold_ttl_ms: 15 * 60 * 1000,
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the current batch first, then handle the
                            // non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes don't
    // leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Ledger counter helpers ───────────────────────────────
//
// Both live operations and WAL replay mutate counters through these, so the
// two paths cannot drift apart.

/// Which counter a release takes its unit from.
#[derive(Debug, Clone, Copy)]
pub(super) enum Pool {
    Held,
    Booked,
}

/// Ledger effect of leaving `status`: which pool gives a unit back.
pub(super) fn release_pool(status: BookingStatus) -> Option<Pool> {
    match status {
        BookingStatus::Hold => Some(Pool::Held),
        BookingStatus::Confirmed => Some(Pool::Booked),
        BookingStatus::Cancelled | BookingStatus::Expired => None,
    }
}

pub(super) fn charge_hold(row: &mut DayRow) {
    row.held_qty += 1;
}

/// Decrement one unit from the given pool, floored at zero. A floored
/// decrement means booking state and ledger counters disagree; keep serving
/// but raise the drift alarm.
pub(super) fn release_unit(key: &DayKey, row: &mut DayRow, pool: Pool) {
    let counter = match pool {
        Pool::Held => &mut row.held_qty,
        Pool::Booked => &mut row.booked_qty,
    };
    if *counter == 0 {
        metrics::counter!(crate::observability::LEDGER_DRIFT_TOTAL).increment(1);
        warn!(row = %key, ?pool, "ledger drift: release from an empty pool");
        return;
    }
    *counter -= 1;
}

pub(super) fn move_held_to_booked(key: &DayKey, row: &mut DayRow) {
    release_unit(key, row, Pool::Held);
    row.booked_qty += 1;
}

pub(super) fn alarm_missing_row(key: &DayKey) {
    metrics::counter!(crate::observability::LEDGER_DRIFT_TOTAL).increment(1);
    warn!(row = %key, "ledger drift: no inventory row for a booked day");
}

/// The inventory/hold/booking engine. All mutation of ledger counters and
/// booking status goes through its operations; each operation is one atomic
/// unit of row locks + WAL append + in-memory apply.
pub struct Engine {
    pub(super) store: LedgerStore,
    pub(super) config: EngineConfig,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, config: EngineConfig) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: LedgerStore::new(),
            config,
            wal_tx,
        };

        // Replay is single-owner: nothing else can hold these locks yet, so
        // try_write always succeeds instantly. Never block here; this may run
        // inside an async context.
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::InventoryProvisioned {
                hotel_id,
                room_type,
                day,
                total_qty,
            } => {
                let key = DayKey {
                    hotel_id: *hotel_id,
                    room_type: room_type.clone(),
                    day: *day,
                };
                let row = self.store.get_or_insert_row(key);
                row.try_write().expect("replay: uncontended write").total_qty = *total_qty;
            }
            Event::HoldPlaced { booking } => {
                for key in booking.day_keys() {
                    match self.store.get_row(&key) {
                        Some(row) => {
                            charge_hold(&mut row.try_write().expect("replay: uncontended write"));
                        }
                        None => alarm_missing_row(&key),
                    }
                }
                self.store.insert_booking(booking.clone());
            }
            Event::HoldConfirmed { id } => self.replay_transition(id, BookingStatus::Confirmed),
            Event::BookingCancelled { id } => self.replay_transition(id, BookingStatus::Cancelled),
            Event::HoldExpired { id } => self.replay_transition(id, BookingStatus::Expired),
        }
    }

    fn replay_transition(&self, id: &ulid::Ulid, to: BookingStatus) {
        let Some(handle) = self.store.get_booking(id) else {
            warn!(booking = %id, "replay: transition for unknown booking");
            return;
        };
        let mut booking = handle.try_write().expect("replay: uncontended write");

        for key in booking.day_keys() {
            match self.store.get_row(&key) {
                Some(row) => {
                    let mut row = row.try_write().expect("replay: uncontended write");
                    match to {
                        BookingStatus::Confirmed => move_held_to_booked(&key, &mut row),
                        _ => {
                            if let Some(pool) = release_pool(booking.status) {
                                release_unit(&key, &mut row, pool);
                            }
                        }
                    }
                }
                None => alarm_missing_row(&key),
            }
        }

        BookingUpdate::settle(to).apply(&mut booking);
    }

    /// Write an event to the WAL via the background group-commit writer.
    /// An error here means the transaction never happened.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Persistence("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }
}
