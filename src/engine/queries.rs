use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{booked_days, has_overlap};
use super::pricing::{quote, Quote};
use super::{Engine, EngineError};

impl Engine {
    pub fn get_hotel(&self, id: &Ulid) -> Option<Hotel> {
        self.hotels.get(id).map(|h| h.value().clone())
    }

    /// Hotels matching every set filter field, oldest first.
    pub fn list_hotels(&self, filter: &HotelFilter) -> Vec<Hotel> {
        let mut hotels: Vec<Hotel> = self
            .hotels
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        hotels.sort_by_key(|h| h.id);
        hotels
    }

    pub async fn get_room(&self, id: &Ulid) -> Option<RoomInfo> {
        let rs = self.get_room_state(id)?;
        let guard = rs.read().await;
        Some(RoomInfo {
            id: guard.id,
            hotel_id: guard.hotel_id,
            details: guard.details.clone(),
        })
    }

    pub async fn list_rooms(&self, hotel_id: &Ulid) -> Vec<RoomInfo> {
        let ids: Vec<Ulid> = self
            .hotel_rooms
            .get(hotel_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        let mut rooms = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(info) = self.get_room(&id).await {
                rooms.push(info);
            }
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    /// All reservations of one room, pending and confirmed, by stay start.
    pub async fn reservations_for_room(&self, room_id: &Ulid) -> Result<Vec<Reservation>, EngineError> {
        let rs = self
            .get_room_state(room_id)
            .ok_or(EngineError::NotFound(*room_id))?;
        let guard = rs.read().await;
        Ok(guard.reservations.clone())
    }

    async fn reservations_where(&self, keep: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for rs in arcs {
            let guard = rs.read().await;
            out.extend(guard.reservations.iter().filter(|r| keep(r)).cloned());
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    /// A guest's trips, newest first.
    pub async fn reservations_for_user(&self, user: &str) -> Vec<Reservation> {
        self.reservations_where(|r| r.user_id == user).await
    }

    /// Reservations across every hotel the user owns, newest first.
    pub async fn reservations_for_owner(&self, owner: &str) -> Vec<Reservation> {
        self.reservations_where(|r| r.hotel_owner_id == owner).await
    }

    pub async fn reservation(&self, id: &Ulid) -> Option<Reservation> {
        let room_id = self.index.room_of.get(id).map(|e| *e.value())?;
        let rs = self.get_room_state(&room_id)?;
        let guard = rs.read().await;
        guard.reservation(*id).cloned()
    }

    pub async fn reservation_by_intent(&self, payment_intent_id: &str) -> Option<Reservation> {
        let id = self.index.by_intent.get(payment_intent_id).map(|e| *e.value())?;
        self.reservation(&id).await
    }

    /// Days a date picker must grey out for this room.
    pub async fn booked_dates(&self, room_id: &Ulid) -> Result<Vec<NaiveDate>, EngineError> {
        let rs = self
            .get_room_state(room_id)
            .ok_or(EngineError::NotFound(*room_id))?;
        let guard = rs.read().await;
        let stays: Vec<DateRange> = guard.confirmed().map(|r| r.stay).collect();
        Ok(booked_days(&stays))
    }

    /// Price a stay and report whether it is currently free.
    pub async fn quote_stay(
        &self,
        room_id: &Ulid,
        stay: &DateRange,
        breakfast: bool,
    ) -> Result<(Quote, bool), EngineError> {
        let rs = self
            .get_room_state(room_id)
            .ok_or(EngineError::NotFound(*room_id))?;
        let guard = rs.read().await;
        let breakfast = breakfast && guard.details.breakfast_price > 0;
        let stays: Vec<DateRange> = guard.confirmed().map(|r| r.stay).collect();
        Ok((quote(&guard.details, stay, breakfast), !has_overlap(stay, &stays)))
    }
}
