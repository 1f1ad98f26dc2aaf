//! Data session and query engine for browsing large tables interactively:
//! declarative view state compiled to SQL, a bounded page cache, and
//! asynchronous querying with staleness control.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod expr;
pub mod session;
pub mod sql;
pub mod summary;
pub mod view;

pub use cache::{Page, RowCache, DEFAULT_CACHE_CAPACITY, DEFAULT_PAGE_SIZE};
pub use config::{SessionConfig, DEFAULT_PREVIEW_ROWS};
pub use engine::{engine_with_frame, CellValue, PolarsEngine, QueryColumn, QueryRows, SqlEngine};
pub use error::{EngineError, SessionError};
pub use exec::Exec;
pub use session::{Session, SessionState};
pub use summary::{Aggregate, AggregateSpec, ColumnSummary, SummaryDefinition};
pub use view::{
    ColumnDescriptor, ColumnFilter, ComputedColumn, DisplayType, FilterOperator, FilterValue,
    SortColumn, SortDirection, ViewState,
};

/// Application name used for the configuration directory and other
/// app-specific paths.
pub const APP_NAME: &str = "tablature";

/// Injected row-identity column present on every registered table. Stable
/// across sorts and filters, so edits address rows by it.
pub const ROW_IDENTITY_COLUMN: &str = "__row_id";
