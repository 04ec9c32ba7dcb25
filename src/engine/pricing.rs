use crate::model::{DateRange, RoomDetails};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub nights: u64,
    pub room_total: u64,
    pub breakfast_total: u64,
    pub total: u64,
}

/// Price a stay: nights × nightly rate, plus nights × breakfast price when
/// breakfast is requested and the room offers it.
pub fn quote(room: &RoomDetails, stay: &DateRange, breakfast: bool) -> Quote {
    let nights = stay.nights().max(0) as u64;
    let room_total = nights * u64::from(room.room_price);
    let breakfast_total = if breakfast {
        nights * u64::from(room.breakfast_price)
    } else {
        0
    };
    Quote {
        nights,
        room_total,
        breakfast_total,
        total: room_total + breakfast_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AmenitySet;
    use chrono::NaiveDate;

    fn room(price: u32, breakfast: u32) -> RoomDetails {
        RoomDetails {
            title: "Twin".into(),
            description: "Two single beds".into(),
            image: "img".into(),
            bed_count: 2,
            guest_count: 2,
            bathroom_count: 1,
            king_bed_count: 0,
            queen_bed_count: 0,
            room_price: price,
            breakfast_price: breakfast,
            amenities: AmenitySet::new(),
        }
    }

    fn stay(a: &str, b: &str) -> DateRange {
        DateRange::new(
            NaiveDate::parse_from_str(a, "%Y-%m-%d").unwrap(),
            NaiveDate::parse_from_str(b, "%Y-%m-%d").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn room_only() {
        let q = quote(&room(100, 20), &stay("2024-06-10", "2024-06-13"), false);
        assert_eq!(q.nights, 3);
        assert_eq!(q.room_total, 300);
        assert_eq!(q.breakfast_total, 0);
        assert_eq!(q.total, 300);
    }

    #[test]
    fn with_breakfast() {
        let q = quote(&room(100, 20), &stay("2024-06-10", "2024-06-13"), true);
        assert_eq!(q.breakfast_total, 60);
        assert_eq!(q.total, 360);
    }

    #[test]
    fn breakfast_not_offered_costs_nothing() {
        let q = quote(&room(100, 0), &stay("2024-06-10", "2024-06-12"), true);
        assert_eq!(q.total, 200);
    }

    #[test]
    fn same_day_is_zero_nights() {
        let q = quote(&room(100, 20), &stay("2024-06-10", "2024-06-10"), true);
        assert_eq!(q.nights, 0);
        assert_eq!(q.total, 0);
    }
}
