//! Error taxonomy for the duelpvp client core
//!
//! Every failure a player can trigger is recoverable: validation and state
//! errors are rejected locally, remote failures surface as transient notices.

use thiserror::Error;

/// Root error type for all duelpvp operations
#[derive(Debug, Error)]
pub enum DuelError {
    /// Bad bet amount or malformed input, rejected before any remote call
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Rejected locally using the cached balance
    #[error("Insufficient funds: balance {balance} GC, required {required} GC")]
    InsufficientFunds { balance: u64, required: u64 },

    /// Acting on a resolved, missing or busy session
    #[error("Session state error: {0}")]
    SessionState(#[from] SessionStateError),

    /// Network or backend failure
    #[error("Remote failure: {0}")]
    Remote(#[from] RemoteError),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Local cache mirror errors
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Input errors the player can correct
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("bet of {amount} GC is outside [{min}, {max}]")]
    BetOutOfRange { amount: u64, min: u64, max: u64 },

    #[error("mine count {count} is outside [{min}, {max}]")]
    MineCountOutOfRange { count: u8, min: u8, max: u8 },

    #[error("cell {0} does not exist on the board")]
    CellOutOfRange(usize),

    #[error("auto cashout target {0} must be above 1.00x")]
    AutoCashoutTooLow(String),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("round config does not match game {0}")]
    ConfigMismatch(String),

    #[error("display name must be {min} to {max} characters")]
    DisplayNameLength { min: usize, max: usize },

    #[error("code must not be empty")]
    EmptyCode,
}

/// Operations that do not fit the current state machine phase
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionStateError {
    #[error("no active session")]
    NoActiveSession,

    #[error("another wager session is already active")]
    SessionConflict,

    #[error("a request for this session is still pending")]
    Busy,

    #[error("session already resolved")]
    AlreadyResolved,

    #[error("expected phase {expected}, engine is {actual}")]
    WrongPhase { expected: String, actual: String },

    #[error("a bet has already been placed this round")]
    BetAlreadyPlaced,

    #[error("no bet to cash out")]
    NoBet,

    #[error("nothing revealed yet; reveal a cell before cashing out")]
    NothingToCashOut,

    #[error("cooling down for another {remaining_ms}ms")]
    CoolingDown { remaining_ms: u64 },

    #[error("no round in progress")]
    NoRound,

    #[error("player session expired or missing")]
    NotLoggedIn,

    #[error("quest {0} is not claimable")]
    QuestNotClaimable(String),

    #[error("deck exhausted")]
    DeckExhausted,
}

/// Errors reported by the remote game service boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("invalid bet")]
    InvalidBet,

    #[error("another session is active for this player")]
    SessionConflict,

    #[error("unknown session {0}")]
    UnknownSession(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("session is not active")]
    NotActive,

    #[error("unknown user {0}")]
    UnknownUser(String),

    #[error("transport failure: {0}")]
    Transport(String),

    /// The service refused a registration or code check, with its reason
    #[error("{0}")]
    Rejected(String),
}

/// Configuration and validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue { field: String, value: String, reason: String },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

impl DuelError {
    /// Transient errors may succeed on retry without any player correction
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DuelError::Remote(RemoteError::Transport(_)) | DuelError::SessionState(SessionStateError::Busy)
        )
    }

    /// Short title and message pair for a toast notification
    pub fn notice(&self) -> (&'static str, String) {
        let title = match self {
            DuelError::Validation(ValidationError::BetOutOfRange { .. }) => "INVALID BET",
            DuelError::Validation(_) => "INVALID",
            DuelError::InsufficientFunds { .. } => "INSUFFICIENT FUNDS",
            DuelError::SessionState(SessionStateError::CoolingDown { .. }) => "COOLDOWN",
            DuelError::SessionState(_) => "TOO LATE",
            DuelError::Remote(RemoteError::InsufficientBalance) => "INSUFFICIENT FUNDS",
            DuelError::Remote(_) => "ERROR",
            DuelError::Configuration(_) | DuelError::Storage(_) => "ERROR",
        };
        (title, self.to_string())
    }
}

impl From<serde_json::Error> for DuelError {
    fn from(e: serde_json::Error) -> Self {
        DuelError::Storage(format!("serialization failed: {}", e))
    }
}

impl From<rocksdb::Error> for DuelError {
    fn from(e: rocksdb::Error) -> Self {
        DuelError::Storage(e.to_string())
    }
}

// Convenience type alias for Results
pub type DuelResult<T> = Result<T, DuelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DuelError::from(ValidationError::BetOutOfRange { amount: 5, min: 10, max: 10_000 });
        assert!(err.to_string().contains("Validation error"));
        assert!(err.to_string().contains("[10, 10000]"));
    }

    #[test]
    fn test_error_conversion() {
        let err: DuelError = RemoteError::NotActive.into();
        match err {
            DuelError::Remote(RemoteError::NotActive) => {}
            _ => panic!("Expected remote error"),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(DuelError::from(RemoteError::Transport("timeout".into())).is_transient());
        assert!(DuelError::from(SessionStateError::Busy).is_transient());
        assert!(!DuelError::from(RemoteError::InvalidBet).is_transient());
    }

    #[test]
    fn test_notice_titles() {
        let (title, _) = DuelError::InsufficientFunds { balance: 5, required: 10 }.notice();
        assert_eq!(title, "INSUFFICIENT FUNDS");
        let (title, msg) = DuelError::from(SessionStateError::CoolingDown { remaining_ms: 1200 }).notice();
        assert_eq!(title, "COOLDOWN");
        assert!(msg.contains("1200ms"));
    }
}
