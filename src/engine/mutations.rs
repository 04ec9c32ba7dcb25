use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{oneshot, OwnedRwLockReadGuard, RwLock};
use dashmap::mapref::entry::Entry;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::payment::PaymentStatus;

use super::conflict::{check_no_conflict, validate_hotel, validate_room, validate_stay, validate_user};
use super::pricing::{quote, Quote};
use super::{Engine, EngineError, WalCommand};

/// A started checkout: the pending reservation plus what the client needs to
/// finish payment.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub reservation: Reservation,
    pub client_secret: String,
    pub quote: Quote,
}

/// A checkout being replaced must be the user's own and still unpaid.
fn ensure_releasable(r: &Reservation, user: &str) -> Result<(), EngineError> {
    if r.user_id != user {
        return Err(EngineError::Forbidden(r.id));
    }
    if r.payment_confirmed {
        return Err(EngineError::Invalid(format!(
            "payment intent {} is already settled",
            r.payment_intent_id
        )));
    }
    Ok(())
}

fn ensure_owner(hotel: &Hotel, user: &str) -> Result<(), EngineError> {
    if hotel.owner_id != user {
        return Err(EngineError::Forbidden(hotel.id));
    }
    Ok(())
}

impl Engine {
    // ── Hotels ───────────────────────────────────────────────────

    pub async fn create_hotel(
        &self,
        owner: &str,
        id: Ulid,
        details: HotelDetails,
    ) -> Result<(), EngineError> {
        validate_user(owner)?;
        validate_hotel(&details)?;
        let _catalog = self.catalog_lock.lock().await;
        if self.hotels.len() >= MAX_HOTELS {
            return Err(EngineError::LimitExceeded("too many hotels"));
        }
        if self.hotels.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let hotel = Hotel {
            id,
            owner_id: owner.to_string(),
            details,
        };
        self.wal_append(&Event::HotelCreated { hotel: hotel.clone() }).await?;
        self.hotels.insert(id, hotel);
        Ok(())
    }

    pub async fn update_hotel(
        &self,
        user: &str,
        id: Ulid,
        patch: HotelPatch,
    ) -> Result<Hotel, EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let mut hotel = self
            .hotels
            .get(&id)
            .map(|h| h.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        ensure_owner(&hotel, user)?;
        let details = patch.apply(&hotel.details);
        validate_hotel(&details)?;

        self.wal_append(&Event::HotelUpdated { id, details: details.clone() })
            .await?;
        hotel.details = details;
        self.hotels.insert(id, hotel.clone());
        Ok(hotel)
    }

    /// Remove a hotel with no rooms left. Returns it so the caller can drop
    /// its image.
    pub async fn delete_hotel(&self, user: &str, id: Ulid) -> Result<Hotel, EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let hotel = self
            .hotels
            .get(&id)
            .map(|h| h.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        ensure_owner(&hotel, user)?;
        if let Some(rooms) = self.hotel_rooms.get(&id)
            && !rooms.is_empty()
        {
            return Err(EngineError::HasRooms(id));
        }

        self.wal_append(&Event::HotelDeleted { id }).await?;
        self.hotels.remove(&id);
        self.hotel_rooms.remove(&id);
        Ok(hotel)
    }

    // ── Rooms ────────────────────────────────────────────────────

    pub async fn create_room(
        &self,
        user: &str,
        id: Ulid,
        hotel_id: Ulid,
        details: RoomDetails,
    ) -> Result<(), EngineError> {
        validate_room(&details)?;
        let _catalog = self.catalog_lock.lock().await;
        let hotel = self
            .hotels
            .get(&hotel_id)
            .map(|h| h.value().clone())
            .ok_or(EngineError::NotFound(hotel_id))?;
        ensure_owner(&hotel, user)?;
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.hotel_rooms.get(&hotel_id).is_some_and(|r| r.len() >= MAX_ROOMS_PER_HOTEL) {
            return Err(EngineError::LimitExceeded("too many rooms in hotel"));
        }

        let event = Event::RoomCreated { id, hotel_id, details: details.clone() };
        self.wal_append(&event).await?;
        let rs = RoomState::new(id, hotel_id, details);
        self.rooms.insert(id, Arc::new(RwLock::new(rs)));
        self.hotel_rooms.entry(hotel_id).or_default().push(id);
        Ok(())
    }

    pub async fn update_room(
        &self,
        user: &str,
        id: Ulid,
        patch: RoomPatch,
    ) -> Result<RoomInfo, EngineError> {
        let mut guard = self.room_write(id).await?;
        if self.owner_of(&guard.hotel_id)? != user {
            return Err(EngineError::Forbidden(id));
        }
        let details = patch.apply(&guard.details);
        validate_room(&details)?;

        let event = Event::RoomUpdated { id, details };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(RoomInfo {
            id,
            hotel_id: guard.hotel_id,
            details: guard.details.clone(),
        })
    }

    /// Remove a room unless a confirmed stay ends today or later. Past stays
    /// and pending checkouts go with it.
    pub async fn delete_room(&self, user: &str, id: Ulid) -> Result<RoomInfo, EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let guard = self.room_write(id).await?;
        if self.owner_of(&guard.hotel_id)? != user {
            return Err(EngineError::Forbidden(id));
        }
        let today = Utc::now().date_naive();
        if guard.confirmed().any(|r| r.stay.end() >= today) {
            return Err(EngineError::HasUpcomingStays(id));
        }

        let hotel_id = guard.hotel_id;
        self.wal_append(&Event::RoomDeleted { id, hotel_id }).await?;
        self.forget_reservations(&guard);
        self.rooms.remove(&id);
        if let Some(mut ids) = self.hotel_rooms.get_mut(&hotel_id) {
            ids.retain(|r| *r != id);
        }
        Ok(RoomInfo {
            id,
            hotel_id,
            details: guard.details.clone(),
        })
    }

    // ── Checkout ─────────────────────────────────────────────────

    /// Create (or re-price) a pending reservation and its payment intent.
    ///
    /// Passing the intent of one of the user's own pending reservations
    /// replaces that reservation and keeps the intent, so a guest who changes
    /// dates mid-checkout pays through the same intent.
    pub async fn start_checkout(
        &self,
        user: &str,
        id: Ulid,
        room_id: Ulid,
        stay: DateRange,
        breakfast: bool,
        payment_intent_id: Option<String>,
    ) -> Result<Checkout, EngineError> {
        validate_user(user)?;
        validate_stay(&stay)?;
        if let Some(intent) = &payment_intent_id
            && intent.len() > MAX_PAYMENT_INTENT_LEN
        {
            return Err(EngineError::LimitExceeded("payment intent id too long"));
        }

        // Claim the id up front; concurrent checkouts on other rooms lock
        // different rooms and would otherwise both pass.
        match self.index.room_of.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(room_id);
            }
        }
        let result = self
            .start_checkout_claimed(user, id, room_id, stay, breakfast, payment_intent_id)
            .await;
        if result.is_err() {
            self.index.room_of.remove_if(&id, |_, r| *r == room_id);
        }
        result
    }

    async fn start_checkout_claimed(
        &self,
        user: &str,
        id: Ulid,
        room_id: Ulid,
        stay: DateRange,
        breakfast: bool,
        payment_intent_id: Option<String>,
    ) -> Result<Checkout, EngineError> {
        // The reservation a reused intent currently pays for.
        let prior = match &payment_intent_id {
            Some(intent) => {
                let prior_id = self
                    .index
                    .by_intent
                    .get(intent)
                    .map(|e| *e.value())
                    .ok_or_else(|| EngineError::UnknownPaymentIntent(intent.clone()))?;
                let prior_room = self
                    .index
                    .room_of
                    .get(&prior_id)
                    .map(|e| *e.value())
                    .ok_or_else(|| EngineError::UnknownPaymentIntent(intent.clone()))?;
                Some((prior_id, prior_room))
            }
            None => None,
        };

        // A prior checkout on another room is only inspected here and released
        // once the new one is stored, so at most one room lock is held at a time
        // and a failed move leaves the prior hold untouched.
        if let Some((prior_id, prior_room)) = prior
            && prior_room != room_id
        {
            let rs = self
                .get_room_state(&prior_room)
                .ok_or(EngineError::NotFound(prior_id))?;
            let guard = rs.read().await;
            let r = guard.reservation(prior_id).ok_or(EngineError::NotFound(prior_id))?;
            ensure_releasable(r, user)?;
        }

        let mut guard = self.room_write(room_id).await?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }
        let replaced = match prior {
            Some((prior_id, prior_room)) if prior_room == room_id => {
                let r = guard.reservation(prior_id).ok_or(EngineError::NotFound(prior_id))?;
                ensure_releasable(r, user)?;
                Some(prior_id)
            }
            _ => None,
        };

        check_no_conflict(&guard, &stay, None)?;

        let hotel_owner_id = self.owner_of(&guard.hotel_id)?;
        let breakfast = breakfast && guard.details.breakfast_price > 0;
        let q = quote(&guard.details, &stay, breakfast);
        let intent = match &payment_intent_id {
            Some(intent_id) => self.gateway.update_intent(intent_id, q.total).await?,
            None => self.gateway.create_intent(q.total, id).await?,
        };

        if let Some(prior_id) = replaced {
            let event = Event::CheckoutReleased { id: prior_id, room_id };
            self.persist_and_apply(&mut guard, &event).await?;
        }

        let now = now_ms();
        let reservation = Reservation {
            id,
            room_id,
            hotel_id: guard.hotel_id,
            hotel_owner_id,
            user_id: user.to_string(),
            stay,
            breakfast_included: breakfast,
            total_price: q.total,
            payment_intent_id: intent.id,
            payment_confirmed: false,
            created_at: now,
            expires_at: now + self.pending_ttl_ms,
        };
        let event = Event::CheckoutStarted { reservation: reservation.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        if let Some((prior_id, prior_room)) = prior
            && prior_room != room_id
        {
            // The intent already points at the new reservation; the old one
            // can only be reaped if this fails.
            if let Err(e) = self.release_checkout(user, prior_id).await {
                warn!("checkout {id} moved from {prior_id}, release failed: {e}");
            }
        }

        Ok(Checkout {
            reservation,
            client_secret: intent.client_secret,
            quote: q,
        })
    }

    /// Abandon one of the user's own pending checkouts.
    pub async fn release_checkout(&self, user: &str, id: Ulid) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let r = guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))?;
        if r.user_id != user {
            return Err(EngineError::Forbidden(id));
        }
        if r.payment_confirmed {
            return Err(EngineError::Invalid("confirmed stays cannot be cancelled".into()));
        }

        let event = Event::CheckoutReleased { id, room_id: r.room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(r)
    }

    /// Finalize a paid reservation.
    ///
    /// Runs under the room's write lock for the whole sequence: collect the
    /// room's confirmed stays, test for overlap, ask the payment processor for
    /// the outcome, persist. Two overlapping checkouts can therefore never
    /// both end up confirmed. Confirming twice returns the same reservation.
    pub async fn confirm_payment(
        &self,
        user: &str,
        payment_intent_id: &str,
    ) -> Result<Reservation, EngineError> {
        let unknown = || EngineError::UnknownPaymentIntent(payment_intent_id.to_string());
        let id = self
            .index
            .by_intent
            .get(payment_intent_id)
            .map(|e| *e.value())
            .ok_or_else(unknown)?;
        let mut guard = self.resolve_reservation_write(&id).await.map_err(|_| unknown())?;
        let r = guard.reservation(id).cloned().ok_or_else(unknown)?;
        if r.user_id != user {
            return Err(EngineError::Forbidden(id));
        }
        if r.payment_confirmed {
            return Ok(r);
        }

        check_no_conflict(&guard, &r.stay, Some(id))?;

        let status = self.gateway.confirm(payment_intent_id).await?;
        if status != PaymentStatus::Succeeded {
            return Err(EngineError::PaymentDeclined(status));
        }

        let event = Event::PaymentConfirmed { id, room_id: r.room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::STAYS_CONFIRMED_TOTAL).increment(1);
        info!("confirmed stay {id} on room {} for {}", r.room_id, r.stay);

        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Drop a pending checkout whose hold ran out. Returns false when it was
    /// already gone, confirmed, or renewed.
    pub async fn expire_checkout(&self, id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let Some(r) = guard.reservation(id) else {
            return Ok(false);
        };
        if r.payment_confirmed || r.expires_at > now {
            return Ok(false);
        }
        let event = Event::CheckoutReleased { id, room_id: r.room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::PENDING_EXPIRED_TOTAL).increment(1);
        Ok(true)
    }

    /// Pending reservations past their expiry. Rooms locked right now are
    /// skipped and picked up on the next sweep.
    pub fn collect_expired_pending(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.rooms.iter() {
            if let Ok(guard) = entry.value().try_read() {
                for r in &guard.reservations {
                    if r.is_pending() && r.expires_at <= now {
                        expired.push((r.id, guard.id));
                    }
                }
            }
        }
        expired
    }

    // ── WAL maintenance ──────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to rebuild current state.
    ///
    /// Holds the catalog lock and a read lock on every room until the
    /// rewritten file is in place, so no write can slip in between snapshot
    /// and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;

        let mut hotels: Vec<Hotel> = self.hotels.iter().map(|e| e.value().clone()).collect();
        hotels.sort_by_key(|h| h.id);
        let mut events: Vec<Event> = hotels
            .into_iter()
            .map(|hotel| Event::HotelCreated { hotel })
            .collect();

        let mut room_arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut guards: Vec<OwnedRwLockReadGuard<RoomState>> = Vec::with_capacity(room_arcs.len());
        for rs in room_arcs.drain(..) {
            guards.push(rs.read_owned().await);
        }
        guards.sort_by_key(|g| g.id);

        for g in &guards {
            events.push(Event::RoomCreated {
                id: g.id,
                hotel_id: g.hotel_id,
                details: g.details.clone(),
            });
            for r in &g.reservations {
                events.push(Event::CheckoutStarted { reservation: r.clone() });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
