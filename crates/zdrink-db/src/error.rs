//! # Storage Errors
//!
//! [`DbError`] is what every repository and engine returns. Business-rule
//! failures from `zdrink-core` pass through unchanged as [`DbError::Domain`];
//! the remaining variants describe what SQLite or the pool did. Callers
//! branch on [`DbError::kind`], which folds both into the shared
//! [`ErrorKind`] taxonomy.
//!
//! ```text
//! CoreError ──────────────► DbError::Domain ─┐
//! sqlx::Error ─► message / code analysis ────┼─► kind() ─► caller
//! MigrateError ─► MigrationFailed ───────────┘
//! ```

use thiserror::Error;
use zdrink_core::{CoreError, ErrorKind, ValidationError};

#[derive(Debug, Error)]
pub enum DbError {
    /// A business rule rejected the operation. Nothing was written.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// No row with this id in the shop.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A UNIQUE constraint fired: duplicate SKU code, coupon code, or a
    /// second cart line for the same product and SKU.
    #[error("{field} '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// A row referenced a product, order or coupon that does not exist.
    #[error("Dangling reference: {message}")]
    ForeignKeyViolation { message: String },

    /// Another writer held the SQLite lock past `busy_timeout`. Safe to retry.
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Cannot connect: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A stored value did not decode into its domain type.
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Every pooled connection stayed checked out past the acquire timeout.
    #[error("No free database connection")]
    PoolExhausted,

    #[error("Internal storage error: {0}")]
    Internal(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Where this error sits in the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Domain(e) => e.kind(),
            DbError::NotFound { .. } => ErrorKind::NotFound,
            DbError::UniqueViolation { .. } | DbError::ForeignKeyViolation { .. } => {
                ErrorKind::Validation
            }
            DbError::Busy(_) | DbError::PoolExhausted => ErrorKind::ConcurrencyConflict,
            DbError::ConnectionFailed(_)
            | DbError::MigrationFailed(_)
            | DbError::QueryFailed(_)
            | DbError::Corrupt(_)
            | DbError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The business-rule error inside, if that is what this is.
    pub fn as_domain(&self) -> Option<&CoreError> {
        match self {
            DbError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::Domain(CoreError::Validation(err))
    }
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6). Extended result codes keep the
/// primary code in the low byte.
fn is_lock_contention(code: Option<&str>, message: &str) -> bool {
    let by_code = code
        .and_then(|c| c.parse::<i32>().ok())
        .is_some_and(|c| matches!(c & 0xff, 5 | 6));
    by_code || message.contains("database is locked")
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("row", "?"),
            sqlx::Error::Database(db_err) => {
                let message = db_err.message();
                if is_lock_contention(db_err.code().as_deref(), message) {
                    DbError::Busy(message.to_string())
                } else if let Some(columns) = message.strip_prefix("UNIQUE constraint failed: ") {
                    DbError::duplicate(columns, "?")
                } else if message.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: message.to_string(),
                    }
                } else {
                    DbError::QueryFailed(message.to_string())
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DbError::Corrupt(err.to_string())
            }
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool closed".to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}
