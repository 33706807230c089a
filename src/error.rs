//! Error taxonomy for the session core.
//!
//! Operations return `anyhow::Result` with context describing the operation and
//! its target. Failures a caller may want to match on are raised as
//! [`SessionError`] and can be recovered with `downcast_ref`. [`ErrorCode`]
//! gives the layer above a stable numeric code and category for any error chain.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Invalid input and state failures surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("invalid cell reference '{0}'")]
    InvalidCellReference(String),

    #[error("invalid range '{range}': {reason}")]
    InvalidRange { range: String, reason: String },

    #[error("invalid column name '{0}'")]
    InvalidColumn(String),

    #[error("sheet '{sheet}' not found. Available sheets: [{}]", .available.join(", "))]
    SheetNotFound {
        sheet: String,
        available: Vec<String>,
    },

    #[error("no sheets found in workbook")]
    NoSheets,

    #[error("no rows found in sheet '{0}'")]
    EmptySheet(String),

    #[error("cell {sheet}!{cell} does not contain a formula")]
    NoFormula { sheet: String, cell: String },

    #[error("row number must be greater than 0")]
    InvalidRow,

    #[error("row {row} does not exist (sheet has {available} rows)")]
    RowOutOfBounds { row: u32, available: usize },

    #[error("workbook handle for {0} has been released")]
    HandleClosed(String),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::InvalidCellReference(_) | SessionError::InvalidColumn(_) => {
                ErrorCode::InvalidParams
            }
            SessionError::InvalidRange { .. } => ErrorCode::InvalidRange,
            SessionError::SheetNotFound { .. } | SessionError::NoSheets => ErrorCode::SheetNotFound,
            SessionError::EmptySheet(_) | SessionError::RowOutOfBounds { .. } => {
                ErrorCode::OutOfBounds
            }
            SessionError::NoFormula { .. } => ErrorCode::FormulaNotFound,
            SessionError::InvalidRow => ErrorCode::ValidationError,
            SessionError::HandleClosed(_) => ErrorCode::HandleReleased,
        }
    }
}

/// Numeric error codes, JSON-RPC flavoured so a protocol layer can forward them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    /// Invalid method parameter(s)
    InvalidParams = -32602,
    /// Internal error
    InternalError = -32603,
    /// Workbook file not found or not accessible
    WorkbookNotFound = -32001,
    /// Parameter validation failed
    ValidationError = -32004,
    /// Sheet not found in workbook
    SheetNotFound = -32006,
    /// Range address is invalid
    InvalidRange = -32007,
    /// File I/O error
    IoError = -32012,
    /// Requested row or cell lies outside the sheet
    OutOfBounds = -32018,
    /// Cell holds no formula
    FormulaNotFound = -32019,
    /// Cached handle was released underneath the caller
    HandleReleased = -32021,
}

impl ErrorCode {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParams
            | ErrorCode::ValidationError
            | ErrorCode::InvalidRange
            | ErrorCode::OutOfBounds => "validation_error",
            ErrorCode::WorkbookNotFound | ErrorCode::SheetNotFound | ErrorCode::FormulaNotFound => {
                "resource_not_found"
            }
            ErrorCode::IoError => "io_error",
            ErrorCode::HandleReleased => "stale_handle",
            ErrorCode::InternalError => "server_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// True when any cause in the chain is [`SessionError::HandleClosed`].
pub fn is_handle_closed(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<SessionError>(),
            Some(SessionError::HandleClosed(_))
        )
    })
}

/// Classifies an error chain by its outermost recognised cause.
pub fn error_code(error: &anyhow::Error) -> ErrorCode {
    for cause in error.chain() {
        if let Some(session) = cause.downcast_ref::<SessionError>() {
            return session.code();
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return match io.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::WorkbookNotFound,
                _ => ErrorCode::IoError,
            };
        }
    }
    ErrorCode::InternalError
}
