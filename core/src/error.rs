use thiserror::Error;

/// Errors surfaced by ledger operations.
///
/// Remote synchronization failures are deliberately absent: they are reported
/// as [`crate::sync::SyncWarning`] values and never fail a local mutation.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Input rejected before any state was touched.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The primary store failed. For writes, nothing was committed.
    #[error("Storage failure for {key}: {source:#}")]
    Persistence {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// A persisted value exists but could not be decoded.
    #[error("Stored value for {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn persistence(key: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Persistence {
            key: key.into(),
            source,
        }
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
