//! Embedded SQL engine boundary: execute SQL text, get typed columnar rows.
//! Ships a polars-backed implementation; anything satisfying `SqlEngine` works.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use polars::prelude::{AnyValue, DataFrame, IntoLazy, LazyFrame, TimeUnit};
use polars_sql::SQLContext;

use crate::error::EngineError;
use crate::view::ColumnDescriptor;
use crate::ROW_IDENTITY_COLUMN;

/// One typed cell. The closed union every engine backend converges to.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Date(NaiveDateTime),
    Null,
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Presentation text; nulls render empty, midnight datetimes as plain dates.
    pub fn render(&self) -> String {
        match self {
            CellValue::String(s) => s.clone(),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Double(d) => format!("{d}"),
            CellValue::Boolean(b) => b.to_string(),
            CellValue::Date(dt) => {
                if dt.time() == NaiveTime::MIN {
                    dt.format("%Y-%m-%d").to_string()
                } else {
                    dt.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            }
            CellValue::Null => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryColumn {
    pub name: String,
    pub engine_type: String,
}

/// Result of one engine execution: column metadata plus row-major values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryRows {
    pub columns: Vec<QueryColumn>,
    pub rows: Vec<Vec<CellValue>>,
}

impl QueryRows {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Schema descriptors derived from result metadata, in result order.
    pub fn descriptors(&self) -> Vec<ColumnDescriptor> {
        descriptors_from(&self.columns)
    }
}

pub fn descriptors_from(columns: &[QueryColumn]) -> Vec<ColumnDescriptor> {
    columns
        .iter()
        .enumerate()
        .map(|(index, c)| ColumnDescriptor::new(c.name.clone(), c.engine_type.clone(), index))
        .collect()
}

/// The embedded engine as the session sees it. Execution is synchronous on the
/// calling (background) context; no transactions or prepared statements are
/// assumed. Implementations move into the worker thread, hence `Send`.
pub trait SqlEngine: Send {
    fn execute(&mut self, sql: &str) -> Result<QueryRows, EngineError>;
}

/// Polars-backed engine: frames registered as named tables, SQL dispatched
/// through `SQLContext`. Read-only; DML/DDL statements surface engine errors.
pub struct PolarsEngine {
    ctx: SQLContext,
}

impl PolarsEngine {
    pub fn new() -> Self {
        PolarsEngine {
            ctx: SQLContext::new(),
        }
    }

    /// Registers a frame under a table name, replacing any previous registration.
    pub fn register(&mut self, name: &str, frame: LazyFrame) {
        self.ctx.register(name, frame);
    }

    /// Registers a frame with the row-identity column prepended, the form the
    /// session expects for its base table.
    pub fn register_with_row_index(&mut self, name: &str, frame: LazyFrame) {
        self.ctx
            .register(name, frame.with_row_index(ROW_IDENTITY_COLUMN, None));
    }
}

impl Default for PolarsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlEngine for PolarsEngine {
    fn execute(&mut self, sql: &str) -> Result<QueryRows, EngineError> {
        let lazy = self
            .ctx
            .execute(sql)
            .map_err(|e| EngineError::new(e.to_string()))?;
        let df = lazy
            .collect()
            .map_err(|e| EngineError::new(e.to_string()))?;
        Ok(rows_from_frame(&df))
    }
}

/// Row-major conversion of a collected frame.
pub fn rows_from_frame(df: &DataFrame) -> QueryRows {
    let columns: Vec<QueryColumn> = df
        .get_columns()
        .iter()
        .map(|c| QueryColumn {
            name: c.name().to_string(),
            engine_type: c.dtype().to_string(),
        })
        .collect();
    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let mut row = Vec::with_capacity(columns.len());
        for col in df.get_columns() {
            match col.get(i) {
                Ok(value) => row.push(cell_from_any(value)),
                Err(_) => row.push(CellValue::Null),
            }
        }
        rows.push(row);
    }
    QueryRows { columns, rows }
}

const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

fn date_from_days(days: i32) -> CellValue {
    match NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_CE_DAYS.saturating_add(days)) {
        Some(d) => CellValue::Date(d.and_time(NaiveTime::MIN)),
        None => CellValue::Null,
    }
}

fn datetime_from_timestamp(value: i64, unit: TimeUnit) -> CellValue {
    let parsed = match unit {
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
    };
    match parsed {
        Some(dt) => CellValue::Date(dt.naive_utc()),
        None => CellValue::Null,
    }
}

fn cell_from_any(value: AnyValue) -> CellValue {
    match value {
        AnyValue::Null => CellValue::Null,
        AnyValue::Boolean(b) => CellValue::Boolean(b),
        AnyValue::String(s) => CellValue::String(s.to_string()),
        AnyValue::StringOwned(s) => CellValue::String(s.to_string()),
        AnyValue::Int8(v) => CellValue::Integer(v as i64),
        AnyValue::Int16(v) => CellValue::Integer(v as i64),
        AnyValue::Int32(v) => CellValue::Integer(v as i64),
        AnyValue::Int64(v) => CellValue::Integer(v),
        AnyValue::UInt8(v) => CellValue::Integer(v as i64),
        AnyValue::UInt16(v) => CellValue::Integer(v as i64),
        AnyValue::UInt32(v) => CellValue::Integer(v as i64),
        AnyValue::UInt64(v) => i64::try_from(v)
            .map(CellValue::Integer)
            .unwrap_or(CellValue::Double(v as f64)),
        AnyValue::Float32(v) => CellValue::Double(v as f64),
        AnyValue::Float64(v) => CellValue::Double(v),
        AnyValue::Date(days) => date_from_days(days),
        AnyValue::Datetime(v, unit, _) => datetime_from_timestamp(v, unit),
        AnyValue::DatetimeOwned(v, unit, _) => datetime_from_timestamp(v, unit),
        other => CellValue::String(other.str_value().to_string()),
    }
}

/// Convenience for tests and hosts: a ready engine with `frame` registered as
/// table `data` including the row-identity column.
pub fn engine_with_frame(df: DataFrame) -> PolarsEngine {
    let mut engine = PolarsEngine::new();
    engine.register_with_row_index("data", df.lazy());
    engine
}
