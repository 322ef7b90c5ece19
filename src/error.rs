use crate::remote::RemoteError;
use crate::storage::StorageError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Every failure the core reports, either as a return value (purchases) or
/// through the session error slot (persistence).
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum PetError {
    #[error("sign in to use the shop")]
    AuthRequired,

    #[error("item {0} is not in the active catalog")]
    ItemNotFound(String),

    #[error("item {0} is already owned")]
    AlreadyOwned(String),

    #[error("need {needed} coins, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("invalid stored state: {0}")]
    Validation(String),

    #[error("remote store unreachable: {0}")]
    RemoteConnection(String),

    #[error("remote write failed: {0}")]
    RemoteWrite(String),

    #[error("{cost} coins debited for {item_id} but ownership was not recorded: {reason}")]
    PartialPurchase {
        item_id: String,
        cost: u64,
        reason: String,
    },

    #[error("a purchase is already in progress")]
    PurchaseInProgress,

    #[error("local storage: {0}")]
    LocalStorage(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl PetError {
    pub fn code(&self) -> &'static str {
        match self {
            PetError::AuthRequired => "AUTH_REQUIRED",
            PetError::ItemNotFound(_) => "ITEM_NOT_FOUND",
            PetError::AlreadyOwned(_) => "ALREADY_OWNED",
            PetError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            PetError::Validation(_) => "VALIDATION_ERROR",
            PetError::RemoteConnection(_) => "NETWORK_ERROR",
            PetError::RemoteWrite(_) => "REMOTE_WRITE_ERROR",
            PetError::PartialPurchase { .. } => "PARTIAL_PURCHASE",
            PetError::PurchaseInProgress => "PURCHASE_IN_PROGRESS",
            PetError::LocalStorage(_) => "LOCAL_STORAGE_ERROR",
            PetError::SessionExpired(_) => "SESSION_EXPIRED",
            PetError::PermissionDenied(_) => "PERMISSION_DENIED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            PetError::PurchaseInProgress
            | PetError::LocalStorage(_)
            | PetError::AlreadyOwned(_)
            | PetError::InsufficientFunds { .. } => Severity::Low,
            PetError::PartialPurchase { .. }
            | PetError::SessionExpired(_)
            | PetError::PermissionDenied(_)
            | PetError::AuthRequired => Severity::High,
            _ => Severity::Medium,
        }
    }

    /// Message shown to the player. Details stay in the log.
    pub fn user_message(&self) -> &'static str {
        match self {
            PetError::AuthRequired => "Sign in to buy items.",
            PetError::ItemNotFound(_) => "That item is no longer available.",
            PetError::AlreadyOwned(_) => "You already own this item.",
            PetError::InsufficientFunds { .. } => "Not enough coins.",
            PetError::Validation(_) => "Saved data was damaged and has been repaired.",
            PetError::RemoteConnection(_) => {
                "Connection problem. Progress is kept on this device."
            }
            PetError::RemoteWrite(_) => "Could not save to the server. Will retry.",
            PetError::PartialPurchase { .. } => {
                "Coins were spent but the item was not delivered. Please contact support."
            }
            PetError::PurchaseInProgress => "Hold on, a purchase is already running.",
            PetError::LocalStorage(_) => "Could not save on this device.",
            PetError::SessionExpired(_) => "Your session expired. Sign in again.",
            PetError::PermissionDenied(_) => "You are not allowed to do that.",
        }
    }

    /// Classify a failed remote read.
    pub fn from_remote_read(err: RemoteError) -> Self {
        Self::classify(err, PetError::RemoteConnection)
    }

    /// Classify a failed remote write.
    pub fn from_remote_write(err: RemoteError) -> Self {
        Self::classify(err, PetError::RemoteWrite)
    }

    fn classify(err: RemoteError, fallback: fn(String) -> PetError) -> Self {
        match err {
            RemoteError::Unauthorized(msg) => PetError::SessionExpired(msg),
            RemoteError::Forbidden(msg) => PetError::PermissionDenied(msg),
            RemoteError::Rejected { code, message } if code == "23514" => {
                PetError::Validation(message)
            }
            RemoteError::Connection(msg) => PetError::RemoteConnection(msg),
            other => fallback(other.to_string()),
        }
    }
}

impl From<StorageError> for PetError {
    fn from(err: StorageError) -> Self {
        PetError::LocalStorage(err.to_string())
    }
}
