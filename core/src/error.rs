use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("User '{user_id}' cannot refer itself")]
    SelfReferral { user_id: String },

    #[error("Unknown ancestor '{user_id}'")]
    UnknownAncestor { user_id: String },

    #[error("Unknown descendant '{user_id}'")]
    UnknownDescendant { user_id: String },

    #[error("Unknown user '{user_id}'")]
    UnknownUser { user_id: String },

    #[error("User '{descendant_id}' was already referred by '{existing_ancestor}'")]
    AlreadyReferred {
        descendant_id:     String,
        existing_ancestor: String,
    },

    #[error("Placing '{descendant_id}' under '{ancestor_id}' would create a cycle")]
    ReferralCycle {
        ancestor_id:   String,
        descendant_id: String,
    },

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: i64 },

    #[error("Insufficient balance for '{user_id}': requested {requested}, available {available}")]
    InsufficientBalance {
        user_id:   String,
        requested: i64,
        available: i64,
    },

    #[error("Write conflict on {entity}")]
    Conflict { entity: String },

    #[error("Gave up '{operation}' after {attempts} conflicting attempts")]
    ConcurrencyExhausted { operation: String, attempts: u32 },

    #[error("Ledger invariant violated: {detail}")]
    InvariantViolation { detail: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        let unavailable = matches!(
            err.sqlite_error_code(),
            Some(
                ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DiskFull
                    | ErrorCode::NotADatabase
                    | ErrorCode::OperationInterrupted
            )
        );
        if unavailable {
            Self::StorageUnavailable(err)
        } else {
            Self::Database(err)
        }
    }
}

impl LedgerError {
    /// Errors the store retries immediately inside `LedgerStore::write`.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Database(err) => matches!(
                err.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    /// Errors the calling service should requeue with backoff.
    pub fn is_transient(&self) -> bool {
        self.is_retryable()
            || matches!(self, Self::ConcurrencyExhausted { .. } | Self::StorageUnavailable(_))
    }

    /// Caller errors: the event should be rejected, not retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::SelfReferral { .. }
                | Self::UnknownAncestor { .. }
                | Self::UnknownDescendant { .. }
                | Self::UnknownUser { .. }
                | Self::AlreadyReferred { .. }
                | Self::ReferralCycle { .. }
                | Self::InvalidAmount { .. }
                | Self::InsufficientBalance { .. }
        )
    }

    /// Build an invariant violation and log it loudly.
    pub fn invariant(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        log::error!("ledger invariant violated: {detail}");
        Self::InvariantViolation { detail }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
