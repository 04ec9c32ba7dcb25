use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for bookkeeping timestamps (creation, hold expiry).
pub type Ms = i64;

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

// ── Date ranges ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid date range: start {} is after end {}", self.start, self.end)
    }
}

impl std::error::Error for InvalidRange {}

/// Inclusive span of calendar days `[start, end]`.
///
/// A stay from the 10th to the 15th blocks both the 10th and the 15th, so two
/// stays sharing a boundary day overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidRange> {
        if start > end {
            return Err(InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Build a range from two instants, keeping only their UTC calendar days.
    pub fn from_instants(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, InvalidRange> {
        Self::new(start.date_naive(), end.date_naive())
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Calendar days between start and end. A same-day range has zero nights.
    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Every calendar day in the range, both ends included.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// Start floored to 00:00 and end ceiled to the last instant of its day.
    pub fn bounds(&self) -> (NaiveDateTime, NaiveDateTime) {
        (start_of_day(self.start), end_of_day(self.end))
    }

    pub fn contains_instant(&self, t: NaiveDateTime) -> bool {
        let (start, end) = self.bounds();
        start <= t && t <= end
    }

    /// Four-way inclusive test: either range has an endpoint inside the other.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        let (a_start, a_end) = self.bounds();
        let (b_start, b_end) = other.bounds();
        other.contains_instant(a_start)
            || other.contains_instant(a_end)
            || self.contains_instant(b_start)
            || self.contains_instant(b_end)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_nano_opt(23, 59, 59, 999_999_999)
        .unwrap_or(NaiveDateTime::MAX)
}

// ── Amenities ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmenityScope {
    Hotel,
    Room,
}

/// Flat set of boolean features a hotel or room can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Amenity {
    // hotel
    Gym,
    Spa,
    Bar,
    Laundry,
    Restaurant,
    Shopping,
    Parking,
    MovieNights,
    // room
    RoomService,
    Tv,
    Balcony,
    CityView,
    OceanView,
    ForestView,
    MountainView,
    SoundProof,
    AirCondition,
    // both
    Wifi,
    CoffeeShop,
}

impl Amenity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Amenity::Gym => "gym",
            Amenity::Spa => "spa",
            Amenity::Bar => "bar",
            Amenity::Laundry => "laundry",
            Amenity::Restaurant => "restaurant",
            Amenity::Shopping => "shopping",
            Amenity::Parking => "parking",
            Amenity::MovieNights => "movie_nights",
            Amenity::RoomService => "room_service",
            Amenity::Tv => "tv",
            Amenity::Balcony => "balcony",
            Amenity::CityView => "city_view",
            Amenity::OceanView => "ocean_view",
            Amenity::ForestView => "forest_view",
            Amenity::MountainView => "mountain_view",
            Amenity::SoundProof => "sound_proof",
            Amenity::AirCondition => "air_condition",
            Amenity::Wifi => "wifi",
            Amenity::CoffeeShop => "coffee_shop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let a = match s.trim().to_lowercase().as_str() {
            "gym" => Amenity::Gym,
            "spa" => Amenity::Spa,
            "bar" => Amenity::Bar,
            "laundry" => Amenity::Laundry,
            "restaurant" => Amenity::Restaurant,
            "shopping" => Amenity::Shopping,
            "parking" => Amenity::Parking,
            "movie_nights" => Amenity::MovieNights,
            "room_service" => Amenity::RoomService,
            "tv" => Amenity::Tv,
            "balcony" => Amenity::Balcony,
            "city_view" => Amenity::CityView,
            "ocean_view" => Amenity::OceanView,
            "forest_view" => Amenity::ForestView,
            "mountain_view" => Amenity::MountainView,
            "sound_proof" => Amenity::SoundProof,
            "air_condition" => Amenity::AirCondition,
            "wifi" => Amenity::Wifi,
            "coffee_shop" => Amenity::CoffeeShop,
            _ => return None,
        };
        Some(a)
    }

    pub fn applies_to(&self, scope: AmenityScope) -> bool {
        match self {
            Amenity::Wifi | Amenity::CoffeeShop => true,
            Amenity::Gym
            | Amenity::Spa
            | Amenity::Bar
            | Amenity::Laundry
            | Amenity::Restaurant
            | Amenity::Shopping
            | Amenity::Parking
            | Amenity::MovieNights => scope == AmenityScope::Hotel,
            _ => scope == AmenityScope::Room,
        }
    }
}

pub type AmenitySet = BTreeSet<Amenity>;

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotelDetails {
    pub title: String,
    pub description: String,
    pub image: String,
    pub country: String,
    pub state: Option<String>,
    pub city: Option<String>,
    pub location_description: String,
    pub amenities: AmenitySet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotel {
    pub id: Ulid,
    pub owner_id: String,
    pub details: HotelDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDetails {
    pub title: String,
    pub description: String,
    pub image: String,
    pub bed_count: u32,
    pub guest_count: u32,
    pub bathroom_count: u32,
    pub king_bed_count: u32,
    pub queen_bed_count: u32,
    /// Price per night, whole currency units.
    pub room_price: u32,
    /// Breakfast price per night; 0 means breakfast is not offered.
    pub breakfast_price: u32,
    pub amenities: AmenitySet,
}

/// Partial update for a hotel. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotelPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub country: Option<String>,
    pub state: Option<Option<String>>,
    pub city: Option<Option<String>>,
    pub location_description: Option<String>,
    pub amenities: Option<AmenitySet>,
}

impl HotelPatch {
    pub fn apply(self, current: &HotelDetails) -> HotelDetails {
        HotelDetails {
            title: self.title.unwrap_or_else(|| current.title.clone()),
            description: self.description.unwrap_or_else(|| current.description.clone()),
            image: self.image.unwrap_or_else(|| current.image.clone()),
            country: self.country.unwrap_or_else(|| current.country.clone()),
            state: self.state.unwrap_or_else(|| current.state.clone()),
            city: self.city.unwrap_or_else(|| current.city.clone()),
            location_description: self
                .location_description
                .unwrap_or_else(|| current.location_description.clone()),
            amenities: self.amenities.unwrap_or_else(|| current.amenities.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub bed_count: Option<u32>,
    pub guest_count: Option<u32>,
    pub bathroom_count: Option<u32>,
    pub king_bed_count: Option<u32>,
    pub queen_bed_count: Option<u32>,
    pub room_price: Option<u32>,
    pub breakfast_price: Option<u32>,
    pub amenities: Option<AmenitySet>,
}

impl RoomPatch {
    pub fn apply(self, current: &RoomDetails) -> RoomDetails {
        RoomDetails {
            title: self.title.unwrap_or_else(|| current.title.clone()),
            description: self.description.unwrap_or_else(|| current.description.clone()),
            image: self.image.unwrap_or_else(|| current.image.clone()),
            bed_count: self.bed_count.unwrap_or(current.bed_count),
            guest_count: self.guest_count.unwrap_or(current.guest_count),
            bathroom_count: self.bathroom_count.unwrap_or(current.bathroom_count),
            king_bed_count: self.king_bed_count.unwrap_or(current.king_bed_count),
            queen_bed_count: self.queen_bed_count.unwrap_or(current.queen_bed_count),
            room_price: self.room_price.unwrap_or(current.room_price),
            breakfast_price: self.breakfast_price.unwrap_or(current.breakfast_price),
            amenities: self.amenities.unwrap_or_else(|| current.amenities.clone()),
        }
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub hotel_id: Ulid,
    pub hotel_owner_id: String,
    pub user_id: String,
    pub stay: DateRange,
    pub breakfast_included: bool,
    pub total_price: u64,
    pub payment_intent_id: String,
    pub payment_confirmed: bool,
    pub created_at: Ms,
    /// When an unconfirmed reservation is dropped. Ignored once confirmed.
    pub expires_at: Ms,
}

impl Reservation {
    pub fn is_pending(&self) -> bool {
        !self.payment_confirmed
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub details: RoomDetails,
    /// All reservations, pending and confirmed, sorted by stay start.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(id: Ulid, hotel_id: Ulid, details: RoomDetails) -> Self {
        Self {
            id,
            hotel_id,
            details,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by stay start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.stay.start(), |r| r.stay.start())
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations that actually hold the room.
    pub fn confirmed(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(|r| r.payment_confirmed)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HotelCreated {
        hotel: Hotel,
    },
    HotelUpdated {
        id: Ulid,
        details: HotelDetails,
    },
    HotelDeleted {
        id: Ulid,
    },
    RoomCreated {
        id: Ulid,
        hotel_id: Ulid,
        details: RoomDetails,
    },
    RoomUpdated {
        id: Ulid,
        details: RoomDetails,
    },
    RoomDeleted {
        id: Ulid,
        hotel_id: Ulid,
    },
    CheckoutStarted {
        reservation: Reservation,
    },
    CheckoutReleased {
        id: Ulid,
        room_id: Ulid,
    },
    PaymentConfirmed {
        id: Ulid,
        room_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub details: RoomDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotelFilter {
    /// Case-insensitive substring of the title.
    pub title: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub owner_id: Option<String>,
}

impl HotelFilter {
    pub fn matches(&self, hotel: &Hotel) -> bool {
        let d = &hotel.details;
        if let Some(t) = &self.title
            && !d.title.to_lowercase().contains(&t.to_lowercase())
        {
            return false;
        }
        if let Some(c) = &self.country
            && !d.country.eq_ignore_ascii_case(c)
        {
            return false;
        }
        if let Some(s) = &self.state
            && !d.state.as_deref().is_some_and(|v| v.eq_ignore_ascii_case(s))
        {
            return false;
        }
        if let Some(c) = &self.city
            && !d.city.as_deref().is_some_and(|v| v.eq_ignore_ascii_case(c))
        {
            return false;
        }
        if let Some(o) = &self.owner_id
            && hotel.owner_id != *o
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn range(a: &str, b: &str) -> DateRange {
        DateRange::new(d(a), d(b)).unwrap()
    }

    #[test]
    fn range_rejects_reversed_dates() {
        let err = DateRange::new(d("2024-06-15"), d("2024-06-10")).unwrap_err();
        assert_eq!(err.start, d("2024-06-15"));
        assert!(err.to_string().contains("after end"));
    }

    #[test]
    fn single_day_range_is_valid() {
        let r = range("2024-06-10", "2024-06-10");
        assert_eq!(r.nights(), 0);
        assert_eq!(r.days().count(), 1);
    }

    #[test]
    fn nights_and_days() {
        let r = range("2024-06-10", "2024-06-15");
        assert_eq!(r.nights(), 5);
        let days: Vec<_> = r.days().collect();
        assert_eq!(days.len(), 6);
        assert_eq!(days[0], d("2024-06-10"));
        assert_eq!(days[5], d("2024-06-15"));
    }

    #[test]
    fn nights_across_month_end() {
        let r = range("2024-02-27", "2024-03-02");
        assert_eq!(r.nights(), 4); // leap year
    }

    #[test]
    fn instants_normalize_to_calendar_days() {
        let start = DateTime::parse_from_rfc3339("2024-06-10T23:30:00Z").unwrap().with_timezone(&Utc);
        let end = DateTime::parse_from_rfc3339("2024-06-12T00:15:00Z").unwrap().with_timezone(&Utc);
        let r = DateRange::from_instants(start, end).unwrap();
        assert_eq!(r, range("2024-06-10", "2024-06-12"));
    }

    #[test]
    fn bounds_cover_whole_days() {
        let r = range("2024-06-10", "2024-06-11");
        let (s, e) = r.bounds();
        assert_eq!(s, d("2024-06-10").and_hms_opt(0, 0, 0).unwrap());
        assert!(r.contains_instant(d("2024-06-11").and_hms_opt(23, 59, 59).unwrap()));
        assert!(!r.contains_instant(d("2024-06-12").and_hms_opt(0, 0, 0).unwrap()));
        assert!(e < d("2024-06-12").and_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn overlaps_shared_boundary_day() {
        let a = range("2024-06-10", "2024-06-15");
        let b = range("2024-06-15", "2024-06-18");
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn overlaps_containment_both_ways() {
        let outer = range("2024-06-01", "2024-06-30");
        let inner = range("2024-06-10", "2024-06-12");
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn adjacent_days_do_not_overlap() {
        let a = range("2024-01-01", "2024-01-05");
        let b = range("2024-01-06", "2024-01-10");
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn amenity_names_roundtrip() {
        for a in [Amenity::Gym, Amenity::MovieNights, Amenity::OceanView, Amenity::CoffeeShop] {
            assert_eq!(Amenity::parse(a.as_str()), Some(a));
        }
        assert_eq!(Amenity::parse(" WiFi "), Some(Amenity::Wifi));
        assert_eq!(Amenity::parse("helipad"), None);
    }

    #[test]
    fn amenity_scope() {
        assert!(Amenity::Gym.applies_to(AmenityScope::Hotel));
        assert!(!Amenity::Gym.applies_to(AmenityScope::Room));
        assert!(Amenity::Balcony.applies_to(AmenityScope::Room));
        assert!(Amenity::Wifi.applies_to(AmenityScope::Hotel));
        assert!(Amenity::Wifi.applies_to(AmenityScope::Room));
    }

    fn reservation(start: &str, end: &str, confirmed: bool) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id: Ulid::new(),
            hotel_id: Ulid::new(),
            hotel_owner_id: "owner".into(),
            user_id: "guest".into(),
            stay: range(start, end),
            breakfast_included: false,
            total_price: 0,
            payment_intent_id: "pi_1".into(),
            payment_confirmed: confirmed,
            created_at: 0,
            expires_at: 0,
        }
    }

    fn room_details() -> RoomDetails {
        RoomDetails {
            title: "Deluxe".into(),
            description: "A deluxe double room".into(),
            image: "https://cdn.example/f/abc.png".into(),
            bed_count: 1,
            guest_count: 2,
            bathroom_count: 1,
            king_bed_count: 1,
            queen_bed_count: 0,
            room_price: 120,
            breakfast_price: 15,
            amenities: AmenitySet::new(),
        }
    }

    #[test]
    fn room_reservations_stay_sorted() {
        let mut room = RoomState::new(Ulid::new(), Ulid::new(), room_details());
        room.insert_reservation(reservation("2024-07-01", "2024-07-03", true));
        room.insert_reservation(reservation("2024-05-01", "2024-05-03", false));
        room.insert_reservation(reservation("2024-06-01", "2024-06-03", true));
        let starts: Vec<_> = room.reservations.iter().map(|r| r.stay.start()).collect();
        assert_eq!(starts, vec![d("2024-05-01"), d("2024-06-01"), d("2024-07-01")]);
        assert_eq!(room.confirmed().count(), 2);
    }

    #[test]
    fn room_remove_reservation() {
        let mut room = RoomState::new(Ulid::new(), Ulid::new(), room_details());
        let r = reservation("2024-07-01", "2024-07-03", false);
        let id = r.id;
        room.insert_reservation(r);
        assert!(room.remove_reservation(Ulid::new()).is_none());
        assert_eq!(room.remove_reservation(id).map(|r| r.id), Some(id));
        assert!(room.reservations.is_empty());
    }

    #[test]
    fn room_patch_keeps_untouched_fields() {
        let current = room_details();
        let patched = RoomPatch {
            room_price: Some(150),
            ..Default::default()
        }
        .apply(&current);
        assert_eq!(patched.room_price, 150);
        assert_eq!(patched.title, current.title);
        assert_eq!(patched.breakfast_price, current.breakfast_price);
    }

    #[test]
    fn hotel_filter_title_is_substring_case_insensitive() {
        let hotel = Hotel {
            id: Ulid::new(),
            owner_id: "owner".into(),
            details: HotelDetails {
                title: "Seaside Palace".into(),
                description: "Rooms by the sea".into(),
                image: "x".into(),
                country: "PT".into(),
                state: None,
                city: Some("Lisbon".into()),
                location_description: "Right on the beach".into(),
                amenities: AmenitySet::new(),
            },
        };
        let by_title = HotelFilter { title: Some("palace".into()), ..Default::default() };
        assert!(by_title.matches(&hotel));
        let by_state = HotelFilter { state: Some("X".into()), ..Default::default() };
        assert!(!by_state.matches(&hotel));
        let by_city = HotelFilter { city: Some("lisbon".into()), ..Default::default() };
        assert!(by_city.matches(&hotel));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::CheckoutStarted {
            reservation: reservation("2024-06-10", "2024-06-15", false),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
