use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::has_overlap;
use super::EngineError;

/// Run the availability check against the confirmed stays of one room.
///
/// `ignore` skips a reservation by id, so a reservation being confirmed is not
/// compared against itself on a repeated confirm.
pub(crate) fn check_no_conflict(
    room: &RoomState,
    stay: &DateRange,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    let confirmed: Vec<DateRange> = room
        .confirmed()
        .filter(|r| Some(r.id) != ignore)
        .map(|r| r.stay)
        .collect();
    if has_overlap(stay, &confirmed) {
        metrics::counter!(crate::observability::OVERLAP_REJECTIONS_TOTAL).increment(1);
        return Err(EngineError::Unavailable {
            room_id: room.id,
            stay: *stay,
        });
    }
    Ok(())
}

pub(crate) fn validate_stay(stay: &DateRange) -> Result<(), EngineError> {
    let nights = stay.nights();
    if nights < 1 {
        return Err(EngineError::EmptyStay(*stay));
    }
    if nights > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

pub(crate) fn validate_user(user: &str) -> Result<(), EngineError> {
    if user.is_empty() {
        return Err(EngineError::Invalid("user id is required".into()));
    }
    if user.len() > MAX_USER_ID_LEN {
        return Err(EngineError::LimitExceeded("user id too long"));
    }
    Ok(())
}

fn require_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), EngineError> {
    let len = value.trim().chars().count();
    if len < min {
        return Err(EngineError::Invalid(format!(
            "{field} must be at least {min} characters long"
        )));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(())
}

fn require_count(field: &str, value: u32, min: u32) -> Result<(), EngineError> {
    if value < min {
        return Err(EngineError::Invalid(format!("{field} must be at least {min}")));
    }
    if value > MAX_COUNT_FIELD {
        return Err(EngineError::LimitExceeded("count too large"));
    }
    Ok(())
}

fn require_scope(amenities: &AmenitySet, scope: AmenityScope) -> Result<(), EngineError> {
    if let Some(a) = amenities.iter().find(|a| !a.applies_to(scope)) {
        return Err(EngineError::Invalid(format!(
            "amenity {} is not available for a {}",
            a.as_str(),
            match scope {
                AmenityScope::Hotel => "hotel",
                AmenityScope::Room => "room",
            }
        )));
    }
    Ok(())
}

pub(crate) fn validate_hotel(d: &HotelDetails) -> Result<(), EngineError> {
    require_len("title", &d.title, MIN_TITLE_LEN, MAX_TITLE_LEN)?;
    require_len("description", &d.description, MIN_DESCRIPTION_LEN, MAX_DESCRIPTION_LEN)?;
    require_len("image", &d.image, 1, MAX_IMAGE_URL_LEN)?;
    require_len("country", &d.country, 1, MAX_LOCATION_LEN)?;
    if let Some(state) = &d.state {
        require_len("state", state, 0, MAX_LOCATION_LEN)?;
    }
    if let Some(city) = &d.city {
        require_len("city", city, 0, MAX_LOCATION_LEN)?;
    }
    require_len(
        "location_description",
        &d.location_description,
        MIN_DESCRIPTION_LEN,
        MAX_DESCRIPTION_LEN,
    )?;
    require_scope(&d.amenities, AmenityScope::Hotel)
}

pub(crate) fn validate_room(d: &RoomDetails) -> Result<(), EngineError> {
    require_len("title", &d.title, MIN_TITLE_LEN, MAX_TITLE_LEN)?;
    require_len("description", &d.description, MIN_DESCRIPTION_LEN, MAX_DESCRIPTION_LEN)?;
    require_len("image", &d.image, 1, MAX_IMAGE_URL_LEN)?;
    require_count("bed_count", d.bed_count, 1)?;
    require_count("guest_count", d.guest_count, 1)?;
    require_count("bathroom_count", d.bathroom_count, 1)?;
    require_count("king_bed_count", d.king_bed_count, 0)?;
    require_count("queen_bed_count", d.queen_bed_count, 0)?;
    if d.room_price < 1 {
        return Err(EngineError::Invalid("room_price must be at least 1".into()));
    }
    if d.room_price > MAX_PRICE || d.breakfast_price > MAX_PRICE {
        return Err(EngineError::LimitExceeded("price too large"));
    }
    require_scope(&d.amenities, AmenityScope::Room)
}
