//! Declarative view state: sort, filter, search, and computed-column configuration.

use std::ops::Range;

use chrono::NaiveDate;

/// Presentation-oriented column classification derived from the engine's native type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DisplayType {
    Text,
    Integer,
    Float,
    Date,
    Boolean,
    Unknown,
}

impl DisplayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayType::Text => "text",
            DisplayType::Integer => "integer",
            DisplayType::Float => "float",
            DisplayType::Date => "date",
            DisplayType::Boolean => "boolean",
            DisplayType::Unknown => "unknown",
        }
    }

    /// Classifies an engine type name using string parsing only. Accepts both
    /// engine-native names (`i64`, `str`, `datetime[us]`) and SQL names
    /// (`BIGINT`, `VARCHAR`, `TIMESTAMP`), case-insensitively.
    pub fn from_engine_type(engine_type: &str) -> DisplayType {
        let lower = engine_type.trim().to_lowercase();
        // Parameterized types like decimal(10,2) or datetime[ns, UTC] classify by base name.
        let base = lower
            .split(['(', '['])
            .next()
            .unwrap_or(&lower)
            .trim()
            .to_string();
        match base.as_str() {
            "str" | "string" | "varchar" | "text" | "char" | "bpchar" | "cat" | "enum" => {
                DisplayType::Text
            }
            "i8" | "i16" | "i32" | "i64" | "i128" | "u8" | "u16" | "u32" | "u64" | "tinyint"
            | "smallint" | "int" | "integer" | "bigint" | "hugeint" | "utinyint" | "usmallint"
            | "uinteger" | "ubigint" => DisplayType::Integer,
            "f32" | "f64" | "float" | "float4" | "float8" | "real" | "double" | "decimal"
            | "numeric" => DisplayType::Float,
            "date" | "datetime" | "timestamp" | "timestamptz" | "time" => DisplayType::Date,
            "bool" | "boolean" | "logical" => DisplayType::Boolean,
            _ => DisplayType::Unknown,
        }
    }
}

/// One column of the session schema as reported by the ingestion collaborator or
/// derived from engine result metadata. Replaced wholesale on schema changes.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub engine_type: String,
    pub display_type: DisplayType,
    pub index: usize,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, engine_type: impl Into<String>, index: usize) -> Self {
        let engine_type = engine_type.into();
        let display_type = DisplayType::from_engine_type(&engine_type);
        ColumnDescriptor {
            name: name.into(),
            engine_type,
            display_type,
            index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

/// One entry of the ordered sort-key list; earlier entries take precedence.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SortColumn {
    pub column: String,
    pub direction: SortDirection,
}

impl SortColumn {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        SortColumn {
            column: column.into(),
            direction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FilterOperator {
    Contains,
    Equals,
    StartsWith,
    EndsWith,
    Regex,
    IsEmpty,
    IsNotEmpty,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Between,
    IsNull,
    IsNotNull,
    IsTrue,
    IsFalse,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Contains => "contains",
            FilterOperator::Equals => "=",
            FilterOperator::StartsWith => "starts with",
            FilterOperator::EndsWith => "ends with",
            FilterOperator::Regex => "regex",
            FilterOperator::IsEmpty => "is empty",
            FilterOperator::IsNotEmpty => "is not empty",
            FilterOperator::GreaterThan => ">",
            FilterOperator::LessThan => "<",
            FilterOperator::GreaterOrEqual => ">=",
            FilterOperator::LessOrEqual => "<=",
            FilterOperator::Between => "between",
            FilterOperator::IsNull => "is null",
            FilterOperator::IsNotNull => "is not null",
            FilterOperator::IsTrue => "is true",
            FilterOperator::IsFalse => "is false",
        }
    }

    pub fn iterator() -> impl Iterator<Item = FilterOperator> {
        [
            FilterOperator::Contains,
            FilterOperator::Equals,
            FilterOperator::StartsWith,
            FilterOperator::EndsWith,
            FilterOperator::Regex,
            FilterOperator::IsEmpty,
            FilterOperator::IsNotEmpty,
            FilterOperator::GreaterThan,
            FilterOperator::LessThan,
            FilterOperator::GreaterOrEqual,
            FilterOperator::LessOrEqual,
            FilterOperator::Between,
            FilterOperator::IsNull,
            FilterOperator::IsNotNull,
            FilterOperator::IsTrue,
            FilterOperator::IsFalse,
        ]
        .iter()
        .copied()
    }

    /// Operators that take no user value and compile to fixed predicates.
    pub fn takes_no_value(&self) -> bool {
        matches!(
            self,
            FilterOperator::IsEmpty
                | FilterOperator::IsNotEmpty
                | FilterOperator::IsNull
                | FilterOperator::IsNotNull
                | FilterOperator::IsTrue
                | FilterOperator::IsFalse
        )
    }
}

/// Value payload of a filter. A combination that mismatches its operator produces
/// no SQL condition (the filter is dropped, not an error).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum FilterValue {
    None,
    String(String),
    Number(f64),
    DateRange(NaiveDate, NaiveDate),
    Boolean(bool),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnFilter {
    pub column: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
    pub negate: bool,
}

impl ColumnFilter {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: FilterValue) -> Self {
        ColumnFilter {
            column: column.into(),
            operator,
            value,
            negate: false,
        }
    }

    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }
}

/// A user-defined scalar SQL expression exposed as an additional named column.
/// Declaration order is evaluation order inside the wrapping subquery.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComputedColumn {
    pub name: String,
    pub expression: String,
}

impl ComputedColumn {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        ComputedColumn {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

/// The declarative description of what the current virtual result set should
/// contain. A value type: every mutation replaces the whole struct, and the
/// session diffs old against new to decide what to invalidate.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct ViewState {
    pub sort_columns: Vec<SortColumn>,
    pub filters: Vec<ColumnFilter>,
    pub search_term: Option<String>,
    /// Advisory last-requested viewport; never affects the compiled query shape.
    pub visible_range: Range<u64>,
    pub computed_columns: Vec<ComputedColumn>,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// True when the mutation changes which rows qualify or how they are ordered,
/// i.e. anything except the advisory `visible_range`.
pub fn query_shape_changed(old: &ViewState, new: &ViewState) -> bool {
    old.sort_columns != new.sort_columns
        || old.filters != new.filters
        || old.search_term != new.search_term
        || old.computed_columns != new.computed_columns
}
