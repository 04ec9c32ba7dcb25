use ulid::Ulid;

use crate::model::{DateRange, InvalidRange};
use crate::payment::{PaymentError, PaymentStatus};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Acting user does not own the hotel / reservation.
    Forbidden(Ulid),
    InvalidRange(InvalidRange),
    /// Check-in and check-out on the same day.
    EmptyStay(DateRange),
    /// Requested dates overlap a confirmed stay on the room.
    Unavailable { room_id: Ulid, stay: DateRange },
    UnknownPaymentIntent(String),
    PaymentDeclined(PaymentStatus),
    Payment(PaymentError),
    HasRooms(Ulid),
    HasUpcomingStays(Ulid),
    Invalid(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Forbidden(id) => write!(f, "not allowed to modify {id}"),
            EngineError::InvalidRange(e) => write!(f, "{e}"),
            EngineError::EmptyStay(stay) => {
                write!(f, "stay {stay} has no nights: check-out must be after check-in")
            }
            EngineError::Unavailable { room_id, stay } => write!(
                f,
                "room {room_id}: some of the days in {stay} have already been booked, \
                 please choose a different date range"
            ),
            EngineError::UnknownPaymentIntent(id) => write!(f, "unknown payment intent: {id}"),
            EngineError::PaymentDeclined(status) => write!(f, "payment not completed: {status}"),
            EngineError::Payment(e) => write!(f, "payment error: {e}"),
            EngineError::HasRooms(id) => write!(f, "cannot delete hotel {id}: has rooms"),
            EngineError::HasUpcomingStays(id) => {
                write!(f, "cannot delete room {id}: has current or upcoming stays")
            }
            EngineError::Invalid(msg) => write!(f, "invalid: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<InvalidRange> for EngineError {
    fn from(e: InvalidRange) -> Self {
        EngineError::InvalidRange(e)
    }
}

impl From<PaymentError> for EngineError {
    fn from(e: PaymentError) -> Self {
        EngineError::Payment(e)
    }
}
