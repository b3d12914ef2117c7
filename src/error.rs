use crate::db::RepoError;
use crate::domain::{MemberId, Money, Period};
use thiserror::Error;

/// Error taxonomy for every core operation.
///
/// All variants are raised before any state is written, so a failed
/// operation never leaves partial effects behind.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("No eligible members for period {0}")]
    NoEligibleMembers(Period),
    #[error("Member {0} is not part of this group")]
    NotMember(MemberId),
    #[error("Member {0} is excluded from this auction")]
    MemberExcluded(MemberId),
    #[error("Member {0} has already placed a bid")]
    DuplicateBid(MemberId),
    #[error("Bid {amount} is below the starting bid {floor}")]
    BidTooLow { amount: Money, floor: Money },
    #[error("Auction has no bids")]
    NoBids,
    #[error("Chosen winner {0} did not bid in this auction")]
    WinnerHasNoBid(MemberId),
    #[error("Invalid amount: {0}")]
    InvalidAmount(Money),
    #[error("Payment {amount} exceeds outstanding balance {outstanding}")]
    ExceedsOutstanding { amount: Money, outstanding: Money },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Concurrent modification of {0}; retry the operation")]
    ConcurrencyConflict(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Coarse classification of [`EngineError`] for callers mapping errors onto
/// their own surface (status codes, retry policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    State,
    BusinessRule,
    NotFound,
    Concurrency,
    Storage,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) | EngineError::InvalidAmount(_) => ErrorKind::Validation,
            EngineError::InvalidState(_) | EngineError::NoEligibleMembers(_) => ErrorKind::State,
            EngineError::NotMember(_)
            | EngineError::MemberExcluded(_)
            | EngineError::DuplicateBid(_)
            | EngineError::BidTooLow { .. }
            | EngineError::NoBids
            | EngineError::WinnerHasNoBid(_)
            | EngineError::ExceedsOutstanding { .. } => ErrorKind::BusinessRule,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::ConcurrencyConflict(_) => ErrorKind::Concurrency,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Only version conflicts are worth retrying; the core never retries itself.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Concurrency
    }
}

impl From<RepoError> for EngineError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(what) => EngineError::NotFound(what),
            RepoError::Conflict(what) => EngineError::ConcurrencyConflict(what),
            err @ RepoError::Duplicate(_) => EngineError::InvalidState(err.to_string()),
            other => EngineError::Storage(other.to_string()),
        }
    }
}
