use crate::domain::{Money, TransferId, UserId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("User {user_id} not found")]
    UserNotFound { user_id: UserId },

    #[error("Insufficient funds for user {user_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        user_id: UserId,
        balance: Money,
        requested: Money,
    },

    #[error("User {user_id} cannot transfer funds to themselves")]
    SelfTransfer { user_id: UserId },

    #[error("Validation failed with: {0}")]
    Validation(String),

    #[error("Transfer {transfer_id} not found")]
    TransferNotFound { transfer_id: TransferId },

    /// Store I/O, lock acquisition or commit failure. The unit-of-work was rolled back.
    #[error("Storage failed with: {0}")]
    Storage(String),

    #[error("Ingestion failed with: {0}")]
    Ingestion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

impl Error {
    /// Infrastructure faults may succeed on retry; business-rule violations never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_failures_are_retryable() {
        assert!(Error::Storage("connection reset".to_string()).is_retryable());
        assert!(!Error::UserNotFound { user_id: 7 }.is_retryable());
        assert!(!Error::SelfTransfer { user_id: 7 }.is_retryable());
        assert!(
            !Error::InsufficientFunds {
                user_id: 1,
                balance: Money::from_minor(100),
                requested: Money::from_minor(200),
            }
            .is_retryable()
        );
    }

    #[test]
    fn insufficient_funds_message_carries_diagnostics() {
        let err = Error::InsufficientFunds {
            user_id: 1,
            balance: Money::from_minor(10_000),
            requested: Money::from_minor(15_000),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds for user 1: balance 100.00, requested 150.00"
        );
    }
}
