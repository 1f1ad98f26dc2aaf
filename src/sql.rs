//! Query coordinator: compiles view state into SQL text. Pure string building,
//! no engine access; every user-supplied value is quoted or escaped here.

use std::ops::Range;

use chrono::NaiveTime;

use crate::engine::CellValue;
use crate::view::{
    ColumnDescriptor, ColumnFilter, DisplayType, FilterOperator, FilterValue, ViewState,
};
use crate::ROW_IDENTITY_COLUMN;

/// Quotes an identifier with `"`, doubling embedded quote characters.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal with `'`, doubling embedded quote characters.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Backslash-escapes LIKE wildcards (`%`, `_`) and the backslash itself so a
/// user substring never acts as a wildcard. Returns the escaped value and
/// whether anything was rewritten (which decides the `ESCAPE` clause).
pub fn escape_like_pattern(value: &str) -> (String, bool) {
    let mut escaped = String::with_capacity(value.len());
    let mut changed = false;
    for c in value.chars() {
        if c == '%' || c == '_' || c == '\\' {
            escaped.push('\\');
            changed = true;
        }
        escaped.push(c);
    }
    (escaped, changed)
}

/// SQL literal for a cell value, or None when the value has no valid literal
/// form (non-finite numbers).
pub fn literal_for(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Null => Some("NULL".to_string()),
        CellValue::String(s) => Some(quote_literal(s)),
        CellValue::Integer(i) => Some(i.to_string()),
        CellValue::Double(d) => format_number(*d),
        CellValue::Boolean(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        CellValue::Date(dt) => {
            let text = if dt.time() == NaiveTime::MIN {
                dt.format("%Y-%m-%d").to_string()
            } else {
                dt.format("%Y-%m-%d %H:%M:%S").to_string()
            };
            Some(quote_literal(&text))
        }
    }
}

// Integral values print without a trailing .0 so comparisons read naturally.
fn format_number(n: f64) -> Option<String> {
    if !n.is_finite() {
        return None;
    }
    if n == n.trunc() && n.abs() < 9_007_199_254_740_992.0 {
        Some(format!("{}", n as i64))
    } else {
        Some(format!("{n}"))
    }
}

fn display_type_for(column: &str, columns: &[ColumnDescriptor]) -> DisplayType {
    columns
        .iter()
        .find(|c| c.name == column)
        .map(|c| c.display_type)
        .unwrap_or(DisplayType::Unknown)
}

// Pattern operators and search act on text; non-text columns are cast first.
fn text_target(column: &str, columns: &[ColumnDescriptor]) -> String {
    let quoted = quote_identifier(column);
    if display_type_for(column, columns) == DisplayType::Text {
        quoted
    } else {
        format!("CAST({quoted} AS VARCHAR)")
    }
}

fn like_condition(target: &str, pattern_body: &str, changed: bool) -> String {
    let escape = if changed { " ESCAPE '\\'" } else { "" };
    format!("{target} ILIKE {}{escape}", quote_literal(pattern_body))
}

fn comparison_sql(operator: FilterOperator) -> Option<&'static str> {
    match operator {
        FilterOperator::GreaterThan => Some(">"),
        FilterOperator::LessThan => Some("<"),
        FilterOperator::GreaterOrEqual => Some(">="),
        FilterOperator::LessOrEqual => Some("<="),
        _ => None,
    }
}

/// Compiles one filter to a predicate, or None when the operator/value
/// combination type-mismatches (the filter is dropped, never an error).
fn filter_condition(filter: &ColumnFilter, columns: &[ColumnDescriptor]) -> Option<String> {
    let quoted = quote_identifier(&filter.column);
    let condition = match (filter.operator, &filter.value) {
        (FilterOperator::Contains, FilterValue::String(v)) => {
            let (escaped, changed) = escape_like_pattern(v);
            like_condition(
                &text_target(&filter.column, columns),
                &format!("%{escaped}%"),
                changed,
            )
        }
        (FilterOperator::StartsWith, FilterValue::String(v)) => {
            let (escaped, changed) = escape_like_pattern(v);
            like_condition(
                &text_target(&filter.column, columns),
                &format!("{escaped}%"),
                changed,
            )
        }
        (FilterOperator::EndsWith, FilterValue::String(v)) => {
            let (escaped, changed) = escape_like_pattern(v);
            like_condition(
                &text_target(&filter.column, columns),
                &format!("%{escaped}"),
                changed,
            )
        }
        (FilterOperator::Regex, FilterValue::String(v)) => {
            // A pattern the regex engine rejects would only come back as a
            // confusing execution error; drop it like any mismatched filter.
            if regex::Regex::new(v).is_err() {
                return None;
            }
            format!(
                "REGEXP_LIKE({}, {})",
                text_target(&filter.column, columns),
                quote_literal(v)
            )
        }
        (FilterOperator::Equals, FilterValue::String(v)) => {
            format!("{quoted} = {}", quote_literal(v))
        }
        (FilterOperator::Equals, FilterValue::Number(n)) => {
            format!("{quoted} = {}", format_number(*n)?)
        }
        (FilterOperator::Equals, FilterValue::Boolean(b)) => {
            format!("{quoted} = {}", if *b { "TRUE" } else { "FALSE" })
        }
        (op, FilterValue::Number(n)) if comparison_sql(op).is_some() => {
            format!("{quoted} {} {}", comparison_sql(op)?, format_number(*n)?)
        }
        (op, FilterValue::String(v)) if comparison_sql(op).is_some() => {
            // Date columns compare against their string form.
            format!("{quoted} {} {}", comparison_sql(op)?, quote_literal(v))
        }
        (FilterOperator::Between, FilterValue::DateRange(lo, hi)) => {
            format!(
                "{quoted} BETWEEN {} AND {}",
                quote_literal(&lo.format("%Y-%m-%d").to_string()),
                quote_literal(&hi.format("%Y-%m-%d").to_string())
            )
        }
        (FilterOperator::IsEmpty, _) => {
            format!("({quoted} = '' OR {quoted} IS NULL)")
        }
        (FilterOperator::IsNotEmpty, _) => {
            format!("({quoted} <> '' AND {quoted} IS NOT NULL)")
        }
        (FilterOperator::IsNull, _) => format!("{quoted} IS NULL"),
        (FilterOperator::IsNotNull, _) => format!("{quoted} IS NOT NULL"),
        (FilterOperator::IsTrue, _) => format!("{quoted} = TRUE"),
        (FilterOperator::IsFalse, _) => format!("{quoted} = FALSE"),
        _ => return None,
    };
    if filter.negate {
        Some(format!("NOT ({condition})"))
    } else {
        Some(condition)
    }
}

// Disjunction of case-insensitive substring matches over every column except
// the row-identity column; computed columns participate like ordinary ones.
fn search_condition(
    term: &str,
    state: &ViewState,
    columns: &[ColumnDescriptor],
) -> Option<String> {
    if term.is_empty() {
        return None;
    }
    let (escaped, changed) = escape_like_pattern(term);
    let pattern = format!("%{escaped}%");
    let escape = if changed { " ESCAPE '\\'" } else { "" };
    let mut parts: Vec<String> = Vec::new();
    for col in columns.iter().filter(|c| c.name != ROW_IDENTITY_COLUMN) {
        parts.push(format!(
            "CAST({} AS VARCHAR) ILIKE {}{escape}",
            quote_identifier(&col.name),
            quote_literal(&pattern)
        ));
    }
    for computed in &state.computed_columns {
        parts.push(format!(
            "CAST({} AS VARCHAR) ILIKE {}{escape}",
            quote_identifier(&computed.name),
            quote_literal(&pattern)
        ));
    }
    if parts.is_empty() {
        None
    } else {
        Some(format!("({})", parts.join(" OR ")))
    }
}

/// WHERE fragment for the current filters and search term, or None when nothing
/// qualifies rows. The count query and the data query both use this verbatim.
pub fn build_where_sql(state: &ViewState, columns: &[ColumnDescriptor]) -> Option<String> {
    let mut conditions: Vec<String> = state
        .filters
        .iter()
        .filter_map(|f| filter_condition(f, columns))
        .collect();
    if let Some(term) = &state.search_term {
        if let Some(search) = search_condition(term, state, columns) {
            conditions.push(search);
        }
    }
    if conditions.is_empty() {
        None
    } else {
        Some(conditions.join(" AND "))
    }
}

// With computed columns the base is wrapped so filters, sort, and search can
// reference them as ordinary columns.
pub(crate) fn base_from(table: &str, state: &ViewState) -> String {
    if state.computed_columns.is_empty() {
        return table.to_string();
    }
    let mut defs = String::new();
    for computed in &state.computed_columns {
        defs.push_str(&format!(
            ", ({}) AS {}",
            computed.expression,
            quote_identifier(&computed.name)
        ));
    }
    format!("(SELECT *{defs} FROM {table}) AS computed")
}

fn order_by_sql(state: &ViewState) -> Option<String> {
    if state.sort_columns.is_empty() {
        return None;
    }
    let keys: Vec<String> = state
        .sort_columns
        .iter()
        .map(|s| {
            format!(
                "{} {} NULLS LAST",
                quote_identifier(&s.column),
                s.direction.as_sql()
            )
        })
        .collect();
    Some(format!("ORDER BY {}", keys.join(", ")))
}

/// Data query for one row range of the current view.
pub fn build_query(
    table: &str,
    state: &ViewState,
    columns: &[ColumnDescriptor],
    range: Range<u64>,
) -> String {
    let mut sql = format!("SELECT * FROM {}", base_from(table, state));
    if let Some(where_sql) = build_where_sql(state, columns) {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    if let Some(order) = order_by_sql(state) {
        sql.push(' ');
        sql.push_str(&order);
    }
    let limit = range.end.saturating_sub(range.start);
    sql.push_str(&format!(" LIMIT {limit} OFFSET {}", range.start));
    sql
}

/// Count query; shares WHERE construction with `build_query` exactly so the
/// two always classify the same row set.
pub fn build_count_query(table: &str, state: &ViewState, columns: &[ColumnDescriptor]) -> String {
    let mut sql = format!("SELECT COUNT(*) FROM {}", base_from(table, state));
    if let Some(where_sql) = build_where_sql(state, columns) {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    sql
}

/// Small uncached preview of a candidate computed-column expression.
pub fn build_expression_preview(
    table: &str,
    state: &ViewState,
    name: &str,
    expression: &str,
    limit: usize,
) -> String {
    format!(
        "SELECT ({expression}) AS {} FROM {} LIMIT {limit}",
        quote_identifier(name),
        base_from(table, state)
    )
}

/// INSERT for a new row; pairs without a literal form are skipped. None when no
/// column remains.
pub fn build_insert(table: &str, values: &[(String, CellValue)]) -> Option<String> {
    let mut names: Vec<String> = Vec::new();
    let mut literals: Vec<String> = Vec::new();
    for (column, value) in values {
        if let Some(literal) = literal_for(value) {
            names.push(quote_identifier(column));
            literals.push(literal);
        }
    }
    if names.is_empty() {
        return None;
    }
    Some(format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        names.join(", "),
        literals.join(", ")
    ))
}

/// UPDATE of one cell addressed by the row-identity column.
pub fn build_update_cell(
    table: &str,
    row_id: i64,
    column: &str,
    value: &CellValue,
) -> Option<String> {
    let literal = literal_for(value)?;
    Some(format!(
        "UPDATE {table} SET {} = {literal} WHERE {} = {row_id}",
        quote_identifier(column),
        quote_identifier(ROW_IDENTITY_COLUMN)
    ))
}

pub fn build_drop_column(table: &str, column: &str) -> String {
    format!("ALTER TABLE {table} DROP COLUMN {}", quote_identifier(column))
}

pub fn build_rename_column(table: &str, old: &str, new: &str) -> String {
    format!(
        "ALTER TABLE {table} RENAME COLUMN {} TO {}",
        quote_identifier(old),
        quote_identifier(new)
    )
}

/// Fixed engine type name per display type; the name never comes from caller
/// text. Unknown has no engine name.
pub fn cast_type_name(target: DisplayType) -> Option<&'static str> {
    match target {
        DisplayType::Text => Some("VARCHAR"),
        DisplayType::Integer => Some("BIGINT"),
        DisplayType::Float => Some("DOUBLE"),
        DisplayType::Date => Some("DATE"),
        DisplayType::Boolean => Some("BOOLEAN"),
        DisplayType::Unknown => None,
    }
}

pub fn build_change_column_type(
    table: &str,
    column: &str,
    target: DisplayType,
) -> Option<String> {
    let type_name = cast_type_name(target)?;
    Some(format!(
        "ALTER TABLE {table} ALTER COLUMN {} SET DATA TYPE {type_name}",
        quote_identifier(column)
    ))
}

pub fn build_drop_table(name: &str) -> String {
    format!("DROP TABLE {}", quote_identifier(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{ComputedColumn, SortColumn, SortDirection};
    use chrono::NaiveDate;

    fn people_columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new(ROW_IDENTITY_COLUMN, "u32", 0),
            ColumnDescriptor::new("name", "str", 1),
            ColumnDescriptor::new("age", "i64", 2),
            ColumnDescriptor::new("score", "f64", 3),
            ColumnDescriptor::new("active", "bool", 4),
        ]
    }

    fn filter(column: &str, operator: FilterOperator, value: FilterValue) -> ColumnFilter {
        ColumnFilter::new(column, operator, value)
    }

    #[test]
    fn quotes_identifiers_doubling_embedded_quotes() {
        assert_eq!(quote_identifier("name"), "\"name\"");
        assert_eq!(quote_identifier("col\"name"), "\"col\"\"name\"");
    }

    #[test]
    fn quotes_literals_doubling_embedded_quotes() {
        assert_eq!(quote_literal("O'Malley"), "'O''Malley'");
        assert_eq!(quote_literal(""), "''");
    }

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(escape_like_pattern("100%"), ("100\\%".to_string(), true));
        assert_eq!(escape_like_pattern("a_b"), ("a\\_b".to_string(), true));
        assert_eq!(escape_like_pattern("a\\b"), ("a\\\\b".to_string(), true));
        assert_eq!(escape_like_pattern("plain"), ("plain".to_string(), false));
    }

    #[test]
    fn end_to_end_reference_query() {
        let mut state = ViewState::new();
        state.filters.push(filter(
            "age",
            FilterOperator::GreaterThan,
            FilterValue::Number(30.0),
        ));
        state
            .sort_columns
            .push(SortColumn::new("name", SortDirection::Ascending));
        let sql = build_query("data", &state, &people_columns(), 0..500);
        assert_eq!(
            sql,
            "SELECT * FROM data WHERE \"age\" > 30 ORDER BY \"name\" ASC NULLS LAST LIMIT 500 OFFSET 0"
        );
    }

    #[test]
    fn no_conditions_means_no_where() {
        let state = ViewState::new();
        assert_eq!(build_where_sql(&state, &people_columns()), None);
        assert_eq!(
            build_query("data", &state, &people_columns(), 1000..1500),
            "SELECT * FROM data LIMIT 500 OFFSET 1000"
        );
    }

    #[test]
    fn count_query_shares_where_fragment() {
        let mut state = ViewState::new();
        state.filters.push(filter(
            "name",
            FilterOperator::Contains,
            FilterValue::String("ali".into()),
        ));
        state.filters.push(filter(
            "age",
            FilterOperator::LessOrEqual,
            FilterValue::Number(65.0),
        ));
        state.search_term = Some("smith".to_string());
        let columns = people_columns();
        let where_sql = build_where_sql(&state, &columns).expect("conditions exist");
        let count = build_count_query("data", &state, &columns);
        let data = build_query("data", &state, &columns, 0..500);
        assert_eq!(count, format!("SELECT COUNT(*) FROM data WHERE {where_sql}"));
        assert!(data.contains(&format!(" WHERE {where_sql} LIMIT")));
    }

    #[test]
    fn contains_without_wildcards_has_no_escape_clause() {
        let mut state = ViewState::new();
        state.filters.push(filter(
            "name",
            FilterOperator::Contains,
            FilterValue::String("ali".into()),
        ));
        assert_eq!(
            build_where_sql(&state, &people_columns()),
            Some("\"name\" ILIKE '%ali%'".to_string())
        );
    }

    #[test]
    fn contains_escapes_literal_percent() {
        let mut state = ViewState::new();
        state.filters.push(filter(
            "name",
            FilterOperator::Contains,
            FilterValue::String("100%".into()),
        ));
        assert_eq!(
            build_where_sql(&state, &people_columns()),
            Some("\"name\" ILIKE '%100\\%%' ESCAPE '\\'".to_string())
        );
    }

    #[test]
    fn starts_and_ends_with_shape() {
        let columns = people_columns();
        let mut state = ViewState::new();
        state.filters.push(filter(
            "name",
            FilterOperator::StartsWith,
            FilterValue::String("Al".into()),
        ));
        assert_eq!(
            build_where_sql(&state, &columns),
            Some("\"name\" ILIKE 'Al%'".to_string())
        );

        state.filters[0] = filter(
            "name",
            FilterOperator::EndsWith,
            FilterValue::String("son".into()),
        );
        assert_eq!(
            build_where_sql(&state, &columns),
            Some("\"name\" ILIKE '%son'".to_string())
        );
    }

    #[test]
    fn pattern_match_on_non_text_column_casts() {
        let mut state = ViewState::new();
        state.filters.push(filter(
            "age",
            FilterOperator::Contains,
            FilterValue::String("3".into()),
        ));
        assert_eq!(
            build_where_sql(&state, &people_columns()),
            Some("CAST(\"age\" AS VARCHAR) ILIKE '%3%'".to_string())
        );
    }

    #[test]
    fn equals_compiles_per_value_kind() {
        let columns = people_columns();
        let mut state = ViewState::new();
        state.filters.push(filter(
            "name",
            FilterOperator::Equals,
            FilterValue::String("O'Malley".into()),
        ));
        assert_eq!(
            build_where_sql(&state, &columns),
            Some("\"name\" = 'O''Malley'".to_string())
        );

        state.filters[0] = filter("age", FilterOperator::Equals, FilterValue::Number(30.0));
        assert_eq!(
            build_where_sql(&state, &columns),
            Some("\"age\" = 30".to_string())
        );

        state.filters[0] = filter("active", FilterOperator::Equals, FilterValue::Boolean(true));
        assert_eq!(
            build_where_sql(&state, &columns),
            Some("\"active\" = TRUE".to_string())
        );
    }

    #[test]
    fn fractional_numbers_keep_their_fraction() {
        let mut state = ViewState::new();
        state.filters.push(filter(
            "score",
            FilterOperator::GreaterOrEqual,
            FilterValue::Number(99.5),
        ));
        assert_eq!(
            build_where_sql(&state, &people_columns()),
            Some("\"score\" >= 99.5".to_string())
        );
    }

    #[test]
    fn comparison_against_string_bound() {
        let mut state = ViewState::new();
        state.filters.push(filter(
            "name",
            FilterOperator::GreaterOrEqual,
            FilterValue::String("2024-01-01".into()),
        ));
        assert_eq!(
            build_where_sql(&state, &people_columns()),
            Some("\"name\" >= '2024-01-01'".to_string())
        );
    }

    #[test]
    fn between_date_range() {
        let mut state = ViewState::new();
        state.filters.push(filter(
            "name",
            FilterOperator::Between,
            FilterValue::DateRange(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            ),
        ));
        assert_eq!(
            build_where_sql(&state, &people_columns()),
            Some("\"name\" BETWEEN '2024-01-01' AND '2024-12-31'".to_string())
        );
    }

    #[test]
    fn mismatched_combinations_are_dropped() {
        let columns = people_columns();
        let cases = vec![
            filter("age", FilterOperator::GreaterThan, FilterValue::Boolean(true)),
            filter("age", FilterOperator::GreaterThan, FilterValue::None),
            filter("age", FilterOperator::Between, FilterValue::Number(3.0)),
            filter("name", FilterOperator::Contains, FilterValue::Number(1.0)),
            filter("age", FilterOperator::Equals, FilterValue::None),
            filter(
                "score",
                FilterOperator::LessThan,
                FilterValue::Number(f64::NAN),
            ),
        ];
        for case in cases {
            let mut state = ViewState::new();
            state.filters.push(case.clone());
            assert_eq!(
                build_where_sql(&state, &columns),
                None,
                "expected drop for {case:?}"
            );
        }
    }

    #[test]
    fn dropped_filter_does_not_break_neighbors() {
        let mut state = ViewState::new();
        state.filters.push(filter(
            "age",
            FilterOperator::GreaterThan,
            FilterValue::Boolean(true),
        ));
        state.filters.push(filter(
            "age",
            FilterOperator::LessThan,
            FilterValue::Number(50.0),
        ));
        assert_eq!(
            build_where_sql(&state, &people_columns()),
            Some("\"age\" < 50".to_string())
        );
    }

    #[test]
    fn empty_and_null_predicates() {
        let columns = people_columns();
        let mut state = ViewState::new();
        state
            .filters
            .push(filter("name", FilterOperator::IsEmpty, FilterValue::None));
        assert_eq!(
            build_where_sql(&state, &columns),
            Some("(\"name\" = '' OR \"name\" IS NULL)".to_string())
        );

        state.filters[0] = filter("name", FilterOperator::IsNotEmpty, FilterValue::None);
        assert_eq!(
            build_where_sql(&state, &columns),
            Some("(\"name\" <> '' AND \"name\" IS NOT NULL)".to_string())
        );

        state.filters[0] = filter("name", FilterOperator::IsNull, FilterValue::None);
        assert_eq!(
            build_where_sql(&state, &columns),
            Some("\"name\" IS NULL".to_string())
        );

        state.filters[0] = filter("active", FilterOperator::IsFalse, FilterValue::None);
        assert_eq!(
            build_where_sql(&state, &columns),
            Some("\"active\" = FALSE".to_string())
        );
    }

    #[test]
    fn negate_wraps_in_not() {
        let mut state = ViewState::new();
        state.filters.push(
            filter("age", FilterOperator::Equals, FilterValue::Number(30.0)).negated(),
        );
        assert_eq!(
            build_where_sql(&state, &people_columns()),
            Some("NOT (\"age\" = 30)".to_string())
        );
    }

    #[test]
    fn filters_combine_with_and_in_order() {
        let mut state = ViewState::new();
        state.filters.push(filter(
            "age",
            FilterOperator::GreaterThan,
            FilterValue::Number(30.0),
        ));
        state.filters.push(filter(
            "active",
            FilterOperator::IsTrue,
            FilterValue::None,
        ));
        assert_eq!(
            build_where_sql(&state, &people_columns()),
            Some("\"age\" > 30 AND \"active\" = TRUE".to_string())
        );
    }

    #[test]
    fn regex_filter_compiles_and_invalid_pattern_drops() {
        let columns = people_columns();
        let mut state = ViewState::new();
        state.filters.push(filter(
            "name",
            FilterOperator::Regex,
            FilterValue::String("^A.*n$".into()),
        ));
        assert_eq!(
            build_where_sql(&state, &columns),
            Some("REGEXP_LIKE(\"name\", '^A.*n$')".to_string())
        );

        state.filters[0] = filter("name", FilterOperator::Regex, FilterValue::String("[".into()));
        assert_eq!(build_where_sql(&state, &columns), None);
    }

    #[test]
    fn search_spans_all_columns_except_row_identity() {
        let mut state = ViewState::new();
        state.search_term = Some("smith".to_string());
        let where_sql = build_where_sql(&state, &people_columns()).expect("search present");
        assert!(where_sql.starts_with('('));
        assert!(where_sql.ends_with(')'));
        assert!(where_sql.contains("CAST(\"name\" AS VARCHAR) ILIKE '%smith%'"));
        assert!(where_sql.contains("CAST(\"active\" AS VARCHAR) ILIKE '%smith%'"));
        assert!(!where_sql.contains(ROW_IDENTITY_COLUMN));
        assert_eq!(where_sql.matches(" OR ").count(), 3);
    }

    #[test]
    fn search_includes_computed_columns_and_ands_with_filters() {
        let mut state = ViewState::new();
        state
            .computed_columns
            .push(ComputedColumn::new("double_age", "\"age\" * 2"));
        state.filters.push(filter(
            "age",
            FilterOperator::GreaterThan,
            FilterValue::Number(30.0),
        ));
        state.search_term = Some("6".to_string());
        let where_sql = build_where_sql(&state, &people_columns()).expect("conditions");
        assert!(where_sql.starts_with("\"age\" > 30 AND ("));
        assert!(where_sql.contains("CAST(\"double_age\" AS VARCHAR) ILIKE '%6%'"));
    }

    #[test]
    fn empty_search_term_adds_nothing() {
        let mut state = ViewState::new();
        state.search_term = Some(String::new());
        assert_eq!(build_where_sql(&state, &people_columns()), None);
    }

    #[test]
    fn computed_columns_wrap_the_base_table() {
        let mut state = ViewState::new();
        state
            .computed_columns
            .push(ComputedColumn::new("double_age", "\"age\" * 2"));
        state
            .computed_columns
            .push(ComputedColumn::new("tag", "'x'"));
        state.filters.push(filter(
            "double_age",
            FilterOperator::GreaterThan,
            FilterValue::Number(60.0),
        ));
        let sql = build_query("data", &state, &people_columns(), 0..500);
        assert!(sql.starts_with(
            "SELECT * FROM (SELECT *, (\"age\" * 2) AS \"double_age\", ('x') AS \"tag\" FROM data) AS computed WHERE \"double_age\" > 60"
        ));
        let count = build_count_query("data", &state, &people_columns());
        assert!(count.starts_with(
            "SELECT COUNT(*) FROM (SELECT *, (\"age\" * 2) AS \"double_age\", ('x') AS \"tag\" FROM data) AS computed"
        ));
    }

    #[test]
    fn multi_column_order_by() {
        let mut state = ViewState::new();
        state
            .sort_columns
            .push(SortColumn::new("age", SortDirection::Descending));
        state
            .sort_columns
            .push(SortColumn::new("name", SortDirection::Ascending));
        let sql = build_query("data", &state, &people_columns(), 0..500);
        assert!(sql.contains("ORDER BY \"age\" DESC NULLS LAST, \"name\" ASC NULLS LAST"));
    }

    #[test]
    fn expression_preview_selects_only_the_candidate() {
        let state = ViewState::new();
        assert_eq!(
            build_expression_preview("data", &state, "bonus", "\"score\" * 0.1", 50),
            "SELECT (\"score\" * 0.1) AS \"bonus\" FROM data LIMIT 50"
        );
    }

    #[test]
    fn cell_literals() {
        assert_eq!(literal_for(&CellValue::Null), Some("NULL".to_string()));
        assert_eq!(
            literal_for(&CellValue::String("O'Malley".into())),
            Some("'O''Malley'".to_string())
        );
        assert_eq!(literal_for(&CellValue::Integer(-3)), Some("-3".to_string()));
        assert_eq!(
            literal_for(&CellValue::Boolean(false)),
            Some("FALSE".to_string())
        );
        assert_eq!(literal_for(&CellValue::Double(f64::INFINITY)), None);
        let midnight = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            literal_for(&CellValue::Date(midnight)),
            Some("'2024-05-01'".to_string())
        );
        let afternoon = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(13, 45, 0)
            .unwrap();
        assert_eq!(
            literal_for(&CellValue::Date(afternoon)),
            Some("'2024-05-01 13:45:00'".to_string())
        );
    }

    #[test]
    fn mutation_statements() {
        let insert = build_insert(
            "data",
            &[
                ("name".to_string(), CellValue::String("Ada".into())),
                ("age".to_string(), CellValue::Integer(36)),
            ],
        );
        assert_eq!(
            insert,
            Some("INSERT INTO data (\"name\", \"age\") VALUES ('Ada', 36)".to_string())
        );
        assert_eq!(build_insert("data", &[]), None);

        assert_eq!(
            build_update_cell("data", 7, "name", &CellValue::String("Grace".into())),
            Some(format!(
                "UPDATE data SET \"name\" = 'Grace' WHERE \"{ROW_IDENTITY_COLUMN}\" = 7"
            ))
        );

        assert_eq!(
            build_drop_column("data", "score"),
            "ALTER TABLE data DROP COLUMN \"score\""
        );
        assert_eq!(
            build_rename_column("data", "name", "full_name"),
            "ALTER TABLE data RENAME COLUMN \"name\" TO \"full_name\""
        );
        assert_eq!(
            build_change_column_type("data", "age", DisplayType::Float),
            Some("ALTER TABLE data ALTER COLUMN \"age\" SET DATA TYPE DOUBLE".to_string())
        );
        assert_eq!(build_change_column_type("data", "age", DisplayType::Unknown), None);
        assert_eq!(build_drop_table("__summary_3"), "DROP TABLE \"__summary_3\"");
    }
}
