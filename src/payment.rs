use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    RequiresPaymentMethod,
    Processing,
    Succeeded,
    Canceled,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::RequiresPaymentMethod => "requires_payment_method",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: u64,
    pub status: PaymentStatus,
}

#[derive(Debug)]
pub enum PaymentError {
    UnknownIntent(String),
    /// Intent already settled; its amount can no longer change.
    AlreadySettled(String),
    Unavailable(String),
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentError::UnknownIntent(id) => write!(f, "unknown payment intent: {id}"),
            PaymentError::AlreadySettled(id) => write!(f, "payment intent {id} already settled"),
            PaymentError::Unavailable(msg) => write!(f, "payment processor unavailable: {msg}"),
        }
    }
}

impl std::error::Error for PaymentError {}

/// The payment processor as seen by the booking engine.
///
/// The engine creates one intent per checkout, re-prices it when the guest
/// changes dates, and asks for its final status while holding the room lock.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, amount: u64, reservation_id: Ulid) -> Result<PaymentIntent, PaymentError>;

    async fn update_intent(&self, intent_id: &str, amount: u64) -> Result<PaymentIntent, PaymentError>;

    async fn confirm(&self, intent_id: &str) -> Result<PaymentStatus, PaymentError>;
}

/// In-process ledger. Every intent succeeds on confirm unless it was declined
/// with [`LocalGateway::decline`] or the gateway is switched offline.
#[derive(Default)]
pub struct LocalGateway {
    intents: DashMap<String, PaymentIntent>,
    declined: DashSet<String>,
    offline: AtomicBool,
}

impl LocalGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decline(&self, intent_id: &str) {
        self.declined.insert(intent_id.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn intent(&self, intent_id: &str) -> Option<PaymentIntent> {
        self.intents.get(intent_id).map(|e| e.value().clone())
    }

    fn check_online(&self) -> Result<(), PaymentError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(PaymentError::Unavailable("gateway offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for LocalGateway {
    async fn create_intent(&self, amount: u64, reservation_id: Ulid) -> Result<PaymentIntent, PaymentError> {
        self.check_online()?;
        let id = format!("pi_{reservation_id}");
        let intent = PaymentIntent {
            client_secret: format!("{id}_secret_{}", Ulid::new()),
            id: id.clone(),
            amount,
            status: PaymentStatus::RequiresPaymentMethod,
        };
        self.intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn update_intent(&self, intent_id: &str, amount: u64) -> Result<PaymentIntent, PaymentError> {
        self.check_online()?;
        let mut entry = self
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| PaymentError::UnknownIntent(intent_id.to_string()))?;
        if entry.status == PaymentStatus::Succeeded {
            return Err(PaymentError::AlreadySettled(intent_id.to_string()));
        }
        entry.amount = amount;
        Ok(entry.clone())
    }

    async fn confirm(&self, intent_id: &str) -> Result<PaymentStatus, PaymentError> {
        self.check_online()?;
        let mut entry = self
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| PaymentError::UnknownIntent(intent_id.to_string()))?;
        entry.status = if self.declined.contains(intent_id) {
            PaymentStatus::RequiresPaymentMethod
        } else {
            PaymentStatus::Succeeded
        };
        Ok(entry.status)
    }
}
