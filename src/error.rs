//! Error types for phdeem
//!
//! The four call outcomes (success, not-leader, sensor failure, group failure)
//! travel inside [`UnifiedStatus`](crate::UnifiedStatus). The errors here cover
//! everything else: lifecycle misuse, facade buffer misuse, and conversions.

use thiserror::Error;

use crate::sensor::SensorOp;

/// Result type alias for phdeem operations
pub type Result<T> = std::result::Result<T, PhdeemError>;

/// Which facade read buffer an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Buffer filled by `read_global`
    Global,
    /// Buffer filled by `read_stats`
    Stats,
}

impl std::fmt::Display for BufferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferKind::Global => f.write_str("global reading"),
            BufferKind::Stats => f.write_str("stats reading"),
        }
    }
}

/// Main error type for phdeem operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhdeemError {
    /// The caller info was closed; no driver or substrate call was made
    #[error("Caller info is closed")]
    Closed,

    /// `init` never completed for this caller info
    #[error("Caller info is not initialized")]
    Uninitialized,

    /// The facade already holds a live caller info
    #[error("Connection is already initialized")]
    AlreadyInitialized,

    /// A read was requested while the previous reading was not freed yet
    #[error("Buffer in use: free the {0} before reading again")]
    BufferInUse(BufferKind),

    /// The sensor driver reported a nonzero status
    #[error("Sensor driver error during {op}: code {code}")]
    Sensor { op: SensorOp, code: i32 },

    /// The group substrate reported a failure
    #[error("Group substrate error: code {code}")]
    Group { code: i32 },

    /// An integer outcome code outside the known range
    #[error("Unknown outcome code: {0}")]
    UnknownOutcome(i32),
}

impl PhdeemError {
    /// Lifecycle misuse rather than a failure reported by a collaborator
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Uninitialized | Self::AlreadyInitialized
        )
    }
}
