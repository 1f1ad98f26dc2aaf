//! Column summaries and derived group-by summary tables.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::{CellValue, QueryRows};
use crate::sql::{base_from, build_where_sql, quote_identifier};
use crate::view::{ColumnDescriptor, DisplayType, ViewState};

/// Process-wide counter backing summary table names. Intentionally not
/// per-session: two sessions allocating at the same time must never
/// collide on a table name.
static SUMMARY_IDENTITY: AtomicU64 = AtomicU64::new(0);

/// Issue the next summary identity. Unique for the process lifetime.
pub fn next_summary_identity() -> u64 {
    SUMMARY_IDENTITY.fetch_add(1, Ordering::Relaxed) + 1
}

/// Backing table name for a summary identity.
pub fn summary_table_name(identity: u64) -> String {
    format!("__summary_{identity}")
}

/// Aggregation applied to one column of a summary definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Count => "COUNT",
            Aggregate::Sum => "SUM",
            Aggregate::Avg => "AVG",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
        }
    }

    pub fn iterator() -> impl Iterator<Item = Aggregate> {
        [
            Aggregate::Count,
            Aggregate::Sum,
            Aggregate::Avg,
            Aggregate::Min,
            Aggregate::Max,
        ]
        .iter()
        .copied()
    }
}

/// One aggregated output column of a summary definition.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub aggregate: Aggregate,
    pub column: String,
}

impl AggregateSpec {
    pub fn new(aggregate: Aggregate, column: impl Into<String>) -> Self {
        AggregateSpec {
            aggregate,
            column: column.into(),
        }
    }

    /// Output column name, e.g. `sum_amount`.
    pub fn alias(&self) -> String {
        format!(
            "{}_{}",
            self.aggregate.as_str().to_lowercase(),
            self.column
        )
    }

    fn as_sql(&self) -> String {
        format!(
            "{}({}) AS {}",
            self.aggregate.as_str(),
            quote_identifier(&self.column),
            quote_identifier(&self.alias())
        )
    }
}

/// Shape of a derived summary session: group keys plus aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryDefinition {
    pub group_columns: Vec<String>,
    pub aggregates: Vec<AggregateSpec>,
}

/// `CREATE TABLE .. AS SELECT` statement materializing a summary definition
/// over the current view (filters and search included, computed columns
/// available as group keys).
pub fn build_create_summary_table(
    name: &str,
    base_table: &str,
    state: &ViewState,
    columns: &[ColumnDescriptor],
    definition: &SummaryDefinition,
) -> String {
    let mut selected: Vec<String> = definition
        .group_columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect();
    selected.extend(definition.aggregates.iter().map(|a| a.as_sql()));
    let mut sql = format!(
        "CREATE TABLE {} AS SELECT {} FROM {}",
        quote_identifier(name),
        selected.join(", "),
        base_from(base_table, state)
    );
    if let Some(where_sql) = build_where_sql(state, columns) {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    if !definition.group_columns.is_empty() {
        let keys: Vec<String> = definition
            .group_columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect();
        sql.push_str(" GROUP BY ");
        sql.push_str(&keys.join(", "));
    }
    sql
}

/// Per-column statistics over the filtered view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSummary {
    pub total_count: u64,
    pub null_count: u64,
    pub distinct_count: Option<u64>,
    pub min: Option<CellValue>,
    pub max: Option<CellValue>,
    pub mean: Option<f64>,
}

fn wants_distinct(display_type: DisplayType) -> bool {
    // Distinct counts are cheap for low-cardinality shapes; skip floats and
    // dates where the count is rarely meaningful and never cheap.
    matches!(display_type, DisplayType::Text | DisplayType::Boolean | DisplayType::Integer)
}

fn wants_min_max(display_type: DisplayType) -> bool {
    !matches!(display_type, DisplayType::Boolean | DisplayType::Unknown)
}

fn wants_mean(display_type: DisplayType) -> bool {
    matches!(display_type, DisplayType::Integer | DisplayType::Float)
}

/// One-statement summary query for a single column, shaped by its display
/// type. Shares WHERE construction with the data query so the summary always
/// describes the rows the user is looking at.
pub fn build_column_summary_query(
    table: &str,
    state: &ViewState,
    columns: &[ColumnDescriptor],
    target: &ColumnDescriptor,
) -> String {
    let col = quote_identifier(&target.name);
    let mut selected = vec![
        "COUNT(*) AS \"total_count\"".to_string(),
        format!("COUNT({col}) AS \"non_null_count\""),
    ];
    if wants_distinct(target.display_type) {
        selected.push(format!("COUNT(DISTINCT {col}) AS \"distinct_count\""));
    }
    if wants_min_max(target.display_type) {
        selected.push(format!("MIN({col}) AS \"min\""));
        selected.push(format!("MAX({col}) AS \"max\""));
    }
    if wants_mean(target.display_type) {
        selected.push(format!("AVG({col}) AS \"mean\""));
    }
    let mut sql = format!(
        "SELECT {} FROM {}",
        selected.join(", "),
        base_from(table, state)
    );
    if let Some(where_sql) = build_where_sql(state, columns) {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    sql
}

fn value_at(rows: &QueryRows, name: &str) -> Option<CellValue> {
    let idx = rows.columns.iter().position(|c| c.name == name)?;
    rows.rows.first()?.get(idx).cloned()
}

fn count_at(rows: &QueryRows, name: &str) -> Option<u64> {
    match value_at(rows, name)? {
        CellValue::Integer(n) => u64::try_from(n).ok(),
        CellValue::Double(f) if f >= 0.0 => Some(f as u64),
        _ => None,
    }
}

/// Fold a one-row summary query result into a `ColumnSummary`. Returns
/// `None` when the result carries no counts at all (empty result set).
pub fn summary_from_rows(rows: &QueryRows) -> Option<ColumnSummary> {
    let total_count = count_at(rows, "total_count")?;
    let non_null = count_at(rows, "non_null_count").unwrap_or(0);
    let mean = match value_at(rows, "mean") {
        Some(CellValue::Double(f)) => Some(f),
        Some(CellValue::Integer(n)) => Some(n as f64),
        _ => None,
    };
    let keep = |v: Option<CellValue>| v.filter(|v| !v.is_null());
    Some(ColumnSummary {
        total_count,
        null_count: total_count.saturating_sub(non_null),
        distinct_count: count_at(rows, "distinct_count"),
        min: keep(value_at(rows, "min")),
        max: keep(value_at(rows, "max")),
        mean,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::QueryColumn;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    fn descriptor(name: &str, engine_type: &str) -> ColumnDescriptor {
        ColumnDescriptor::new(name, engine_type, 0)
    }

    #[test]
    fn identities_are_unique_under_concurrent_issuance() {
        let issued: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let issued = Arc::clone(&issued);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let id = next_summary_identity();
                    assert!(issued.lock().unwrap().insert(id), "duplicate identity {id}");
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(issued.lock().unwrap().len(), 400);
    }

    #[test]
    fn table_names_embed_the_identity() {
        assert_eq!(summary_table_name(7), "__summary_7");
    }

    #[test]
    fn aggregate_names_cover_every_variant() {
        let names: Vec<&str> = Aggregate::iterator().map(|a| a.as_str()).collect();
        assert_eq!(names, vec!["COUNT", "SUM", "AVG", "MIN", "MAX"]);
    }

    #[test]
    fn create_summary_table_groups_and_aggregates() {
        let definition = SummaryDefinition {
            group_columns: vec!["region".to_string()],
            aggregates: vec![
                AggregateSpec::new(Aggregate::Sum, "amount"),
                AggregateSpec::new(Aggregate::Count, "id"),
            ],
        };
        let sql = build_create_summary_table(
            "__summary_3",
            "data",
            &ViewState::default(),
            &[],
            &definition,
        );
        assert_eq!(
            sql,
            "CREATE TABLE \"__summary_3\" AS SELECT \"region\", \
             SUM(\"amount\") AS \"sum_amount\", COUNT(\"id\") AS \"count_id\" \
             FROM data GROUP BY \"region\""
        );
    }

    #[test]
    fn create_summary_table_without_group_keys_skips_group_by() {
        let definition = SummaryDefinition {
            group_columns: vec![],
            aggregates: vec![AggregateSpec::new(Aggregate::Avg, "amount")],
        };
        let sql = build_create_summary_table(
            "__summary_1",
            "data",
            &ViewState::default(),
            &[],
            &definition,
        );
        assert_eq!(
            sql,
            "CREATE TABLE \"__summary_1\" AS SELECT AVG(\"amount\") AS \"avg_amount\" FROM data"
        );
    }

    #[test]
    fn numeric_summary_query_includes_mean_and_extremes() {
        let target = descriptor("age", "i64");
        let sql = build_column_summary_query("data", &ViewState::default(), &[], &target);
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS \"total_count\", COUNT(\"age\") AS \"non_null_count\", \
             COUNT(DISTINCT \"age\") AS \"distinct_count\", MIN(\"age\") AS \"min\", \
             MAX(\"age\") AS \"max\", AVG(\"age\") AS \"mean\" FROM data"
        );
    }

    #[test]
    fn text_summary_query_skips_mean() {
        let target = descriptor("name", "str");
        let sql = build_column_summary_query("data", &ViewState::default(), &[], &target);
        assert!(sql.contains("COUNT(DISTINCT \"name\")"));
        assert!(sql.contains("MIN(\"name\")"));
        assert!(!sql.contains("AVG"));
    }

    #[test]
    fn boolean_summary_query_is_counts_only() {
        let target = descriptor("active", "bool");
        let sql = build_column_summary_query("data", &ViewState::default(), &[], &target);
        assert!(sql.contains("COUNT(DISTINCT \"active\")"));
        assert!(!sql.contains("MIN("));
        assert!(!sql.contains("AVG"));
    }

    fn one_row(names: &[&str], values: Vec<CellValue>) -> QueryRows {
        QueryRows {
            columns: names
                .iter()
                .map(|n| QueryColumn {
                    name: n.to_string(),
                    engine_type: "i64".to_string(),
                })
                .collect(),
            rows: vec![values],
        }
    }

    #[test]
    fn summary_parses_counts_and_extremes() {
        let rows = one_row(
            &[
                "total_count",
                "non_null_count",
                "distinct_count",
                "min",
                "max",
                "mean",
            ],
            vec![
                CellValue::Integer(10),
                CellValue::Integer(8),
                CellValue::Integer(4),
                CellValue::Integer(1),
                CellValue::Integer(9),
                CellValue::Double(4.5),
            ],
        );
        let summary = summary_from_rows(&rows).unwrap();
        assert_eq!(summary.total_count, 10);
        assert_eq!(summary.null_count, 2);
        assert_eq!(summary.distinct_count, Some(4));
        assert_eq!(summary.min, Some(CellValue::Integer(1)));
        assert_eq!(summary.max, Some(CellValue::Integer(9)));
        assert_eq!(summary.mean, Some(4.5));
    }

    #[test]
    fn summary_treats_null_extremes_as_absent() {
        let rows = one_row(
            &["total_count", "non_null_count", "min", "max"],
            vec![
                CellValue::Integer(3),
                CellValue::Integer(0),
                CellValue::Null,
                CellValue::Null,
            ],
        );
        let summary = summary_from_rows(&rows).unwrap();
        assert_eq!(summary.null_count, 3);
        assert_eq!(summary.min, None);
        assert_eq!(summary.max, None);
        assert_eq!(summary.mean, None);
    }

    #[test]
    fn summary_requires_a_result_row() {
        let rows = QueryRows::default();
        assert!(summary_from_rows(&rows).is_none());
    }
}
