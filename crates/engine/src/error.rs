//! The module contains the error the engine can throw.
//!
//! The errors are:
//!
//! - [`NotFound`] thrown when a referenced row does not exist.
//! - [`ConstraintViolation`] thrown when the storage rejects a write.
//! - [`RollbackFailed`] thrown when a transaction could not be rolled back
//!   after a failure. It wraps both the original cause and the rollback error
//!   and must be treated as more severe than any business error.
//! - [`Cancelled`] thrown when the caller's cancellation token or deadline
//!   fired before the transaction committed.
//!
//!  [`NotFound`]: EngineError::NotFound
//!  [`ConstraintViolation`]: EngineError::ConstraintViolation
//!  [`RollbackFailed`]: EngineError::RollbackFailed
//!  [`Cancelled`]: EngineError::Cancelled
use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("\"{0}\" not found!")]
    NotFound(String),
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid owner: {0}")]
    InvalidOwner(String),
    #[error("Transfer from account {0} to itself")]
    SameAccount(i64),
    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Rollback failed ({rollback}) after: {cause}")]
    RollbackFailed {
        cause: Box<EngineError>,
        rollback: Box<EngineError>,
    },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Database(DbErr),
}

impl EngineError {
    /// Errors that signal the transaction boundary itself is unreliable.
    pub fn is_transaction_abort(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }

    /// Lock contention or busy-database errors a caller may retry with
    /// backoff. The engine never retries on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(DbErr::ConnectionAcquire(_)) => true,
            Self::Database(err) => {
                let msg = err.to_string().to_lowercase();
                msg.contains("database is locked")
                    || msg.contains("database table is locked")
                    || msg.contains("deadlock detected")
                    || msg.contains("could not serialize access")
            }
            _ => false,
        }
    }
}

impl From<DbErr> for EngineError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(msg)) => return Self::ConstraintViolation(msg),
            Some(SqlErr::ForeignKeyConstraintViolation(msg)) => {
                return Self::ConstraintViolation(msg);
            }
            _ => {}
        }
        match err {
            DbErr::RecordNotFound(msg) => Self::NotFound(msg),
            DbErr::RecordNotUpdated => Self::NotFound("record not updated".to_string()),
            other => {
                let msg = other.to_string();
                let constraint = [
                    "CHECK constraint failed",
                    "FOREIGN KEY constraint failed",
                    "UNIQUE constraint failed",
                    "violates check",
                    "violates foreign key",
                ];
                if constraint.iter().any(|needle| msg.contains(needle)) {
                    Self::ConstraintViolation(msg)
                } else {
                    Self::Database(other)
                }
            }
        }
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NotFound(a), Self::NotFound(b)) => a == b,
            (Self::ConstraintViolation(a), Self::ConstraintViolation(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InvalidOwner(a), Self::InvalidOwner(b)) => a == b,
            (Self::SameAccount(a), Self::SameAccount(b)) => a == b,
            (Self::CurrencyMismatch(a), Self::CurrencyMismatch(b)) => a == b,
            (Self::InsufficientFunds(a), Self::InsufficientFunds(b)) => a == b,
            (Self::Cancelled, Self::Cancelled) => true,
            (
                Self::RollbackFailed {
                    cause: a,
                    rollback: ra,
                },
                Self::RollbackFailed {
                    cause: b,
                    rollback: rb,
                },
            ) => a == b && ra == rb,
            (Self::Storage(a), Self::Storage(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_not_found_maps_to_not_found() {
        let err = EngineError::from(DbErr::RecordNotFound("account 7".to_string()));
        assert_eq!(err, EngineError::NotFound("account 7".to_string()));
    }

    #[test]
    fn check_failure_maps_to_constraint_violation() {
        let err = EngineError::from(DbErr::Custom(
            "CHECK constraint failed: amount > 0".to_string(),
        ));
        assert!(matches!(err, EngineError::ConstraintViolation(_)));
    }

    #[test]
    fn other_db_errors_stay_database_errors() {
        let err = EngineError::from(DbErr::Custom("disk I/O error".to_string()));
        assert!(matches!(err, EngineError::Database(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn locked_database_is_transient() {
        let err = EngineError::Database(DbErr::Custom("database is locked".to_string()));
        assert!(err.is_transient());
        assert!(!EngineError::Cancelled.is_transient());
    }

    #[test]
    fn rollback_failure_is_a_transaction_abort() {
        let err = EngineError::RollbackFailed {
            cause: Box::new(EngineError::Cancelled),
            rollback: Box::new(EngineError::Storage("connection reset".to_string())),
        };
        assert!(err.is_transaction_abort());
        assert!(!EngineError::Cancelled.is_transaction_abort());
        assert!(err.to_string().contains("connection reset"));
    }
}
