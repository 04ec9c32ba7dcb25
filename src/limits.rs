//! Hard caps that keep a single process bounded no matter what clients send.

pub const MAX_HOTELS: usize = 10_000;
pub const MAX_ROOMS_PER_HOTEL: usize = 1_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 20_000;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;
pub const MAX_LOCATION_LEN: usize = 200;
pub const MAX_IMAGE_URL_LEN: usize = 2_048;
pub const MAX_USER_ID_LEN: usize = 256;
pub const MAX_PAYMENT_INTENT_LEN: usize = 255;

pub const MIN_TITLE_LEN: usize = 3;
pub const MIN_DESCRIPTION_LEN: usize = 10;

/// Longest stay a single reservation may cover.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Earliest and latest calendar years accepted on the wire.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2200;

pub const MAX_COUNT_FIELD: u32 = 1_000;
pub const MAX_PRICE: u32 = 10_000_000;
