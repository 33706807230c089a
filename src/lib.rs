//! Cached, expiring access to spreadsheet workbooks with formula explanations.
//!
//! [`SessionManager`] opens workbooks through a bounded [`HandleCache`], tracks
//! a current sheet per file, and rewrites formulas such as `=B2*2` into their
//! labeled form (`=Age*2`) using headers found near each referenced cell.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod state;
pub mod utils;
pub mod workbook;

pub use cache::{HandleCache, Release};
pub use config::{CacheConfig, CliArgs, Command, SessionConfig};
pub use error::{ErrorCode, SessionError, error_code, is_handle_closed};
pub use logging::{LoggingConfig, init_logging};
pub use model::{CacheStats, CellRange, CellRef, DataType, FormulaRecord, SheetStatistics};
pub use state::SessionManager;
pub use workbook::{CellSource, WorkbookHandle};
