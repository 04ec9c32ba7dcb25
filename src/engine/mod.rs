mod availability;
mod conflict;
mod error;
mod mutations;
mod pricing;
mod queries;

pub use availability::{booked_days, has_overlap};
pub use error::EngineError;
pub use mutations::Checkout;
pub use pricing::{quote, Quote};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::payment::PaymentGateway;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

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
/// 2. Drain every Append already queued behind it.
/// 3. One fsync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
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

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes never leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Lookup tables from reservation-level keys back to the owning room.
#[derive(Default)]
pub(super) struct ReservationIndex {
    pub(super) room_of: DashMap<Ulid, Ulid>,
    pub(super) by_intent: DashMap<String, Ulid>,
}

pub struct Engine {
    pub(super) hotels: DashMap<Ulid, Hotel>,
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    /// Hotel → rooms index.
    pub(super) hotel_rooms: DashMap<Ulid, Vec<Ulid>>,
    pub(super) index: ReservationIndex,
    /// Serializes hotel and room creation/deletion against each other.
    pub(super) catalog_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) gateway: Arc<dyn PaymentGateway>,
    pub(super) pending_ttl_ms: Ms,
}

/// Apply a room-scoped event (no locking, caller holds the room lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, index: &ReservationIndex) {
    match event {
        Event::RoomUpdated { details, .. } => {
            rs.details = details.clone();
        }
        Event::CheckoutStarted { reservation } => {
            index.room_of.insert(reservation.id, rs.id);
            index
                .by_intent
                .insert(reservation.payment_intent_id.clone(), reservation.id);
            rs.insert_reservation(reservation.clone());
        }
        Event::CheckoutReleased { id, .. } => {
            if let Some(r) = rs.remove_reservation(*id) {
                index.room_of.remove(id);
                index.by_intent.remove_if(&r.payment_intent_id, |_, v| v == id);
            }
        }
        Event::PaymentConfirmed { id, .. } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.payment_confirmed = true;
            }
        }
        // Catalog-level events are handled on the DashMaps, not here
        Event::HotelCreated { .. }
        | Event::HotelUpdated { .. }
        | Event::HotelDeleted { .. }
        | Event::RoomCreated { .. }
        | Event::RoomDeleted { .. } => {}
    }
}

/// The room a room-scoped event belongs to.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomUpdated { id, .. } => Some(*id),
        Event::CheckoutStarted { reservation } => Some(reservation.room_id),
        Event::CheckoutReleased { room_id, .. } | Event::PaymentConfirmed { room_id, .. } => {
            Some(*room_id)
        }
        Event::HotelCreated { .. }
        | Event::HotelUpdated { .. }
        | Event::HotelDeleted { .. }
        | Event::RoomCreated { .. }
        | Event::RoomDeleted { .. } => None,
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        gateway: Arc<dyn PaymentGateway>,
        pending_ttl_ms: Ms,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            hotels: DashMap::new(),
            rooms: DashMap::new(),
            hotel_rooms: DashMap::new(),
            index: ReservationIndex::default(),
            catalog_lock: Mutex::new(()),
            wal_tx,
            gateway,
            pending_ttl_ms,
        };
        for event in &events {
            engine.replay_event(event);
        }
        Ok(engine)
    }

    /// Nobody else holds these Arcs during startup, so `try_write` never
    /// fails here; blocking_write would panic inside the runtime.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::HotelCreated { hotel } => {
                self.hotels.insert(hotel.id, hotel.clone());
            }
            Event::HotelUpdated { id, details } => {
                if let Some(mut h) = self.hotels.get_mut(id) {
                    h.details = details.clone();
                }
            }
            Event::HotelDeleted { id } => {
                self.hotels.remove(id);
                self.hotel_rooms.remove(id);
            }
            Event::RoomCreated { id, hotel_id, details } => {
                let rs = RoomState::new(*id, *hotel_id, details.clone());
                self.rooms.insert(*id, Arc::new(RwLock::new(rs)));
                self.hotel_rooms.entry(*hotel_id).or_default().push(*id);
            }
            Event::RoomDeleted { id, hotel_id } => {
                if let Some((_, rs)) = self.rooms.remove(id)
                    && let Ok(guard) = rs.try_read()
                {
                    self.forget_reservations(&guard);
                }
                if let Some(mut ids) = self.hotel_rooms.get_mut(hotel_id) {
                    ids.retain(|r| r != id);
                }
            }
            other => {
                if let Some(room_id) = event_room_id(other)
                    && let Some(rs) = self.get_room_state(&room_id)
                    && let Ok(mut guard) = rs.try_write()
                {
                    apply_to_room(&mut guard, other, &self.index);
                }
            }
        }
    }

    pub(super) fn forget_reservations(&self, rs: &RoomState) {
        for r in &rs.reservations {
            self.index.room_of.remove(&r.id);
            self.index.by_intent.remove_if(&r.payment_intent_id, |_, v| *v == r.id);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// Write-lock a room. Fails if the room was deleted while we waited.
    pub(super) async fn room_write(
        &self,
        room_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        if !self.rooms.contains_key(&room_id) {
            return Err(EngineError::NotFound(room_id));
        }
        Ok(guard)
    }

    /// Lookup reservation → room, then write-lock that room.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let room_id = self
            .index
            .room_of
            .get(reservation_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let guard = self.room_write(room_id).await?;
        if guard.reservation(*reservation_id).is_none() {
            return Err(EngineError::NotFound(*reservation_id));
        }
        Ok(guard)
    }

    /// WAL-append then apply, under the caller's room lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.index);
        Ok(())
    }

    pub(super) fn owner_of(&self, hotel_id: &Ulid) -> Result<String, EngineError> {
        self.hotels
            .get(hotel_id)
            .map(|h| h.owner_id.clone())
            .ok_or(EngineError::NotFound(*hotel_id))
    }
}
