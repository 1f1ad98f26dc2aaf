//! Session orchestration: owns the view state, the row cache, and the
//! asynchronous query lifecycle against the background execution context.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::cache::{Page, RowCache};
use crate::config::SessionConfig;
use crate::engine::{descriptors_from, CellValue, QueryColumn, QueryRows};
use crate::error::{EngineError, SessionError};
use crate::exec::Exec;
use crate::expr;
use crate::sql;
use crate::summary::{self, ColumnSummary, SummaryDefinition};
use crate::view::{query_shape_changed, ColumnDescriptor, ComputedColumn, DisplayType, ViewState};
use crate::ROW_IDENTITY_COLUMN;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned lock only means a panicking thread held it; the data is a
    // plain counter or map and stays usable.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Monotonic counter with a lock cheap enough to hold across a
/// compare-then-store. The owning thread advances it on shape changes;
/// whoever applies a result gates its store on the captured value.
#[derive(Clone)]
struct Generation {
    value: Arc<Mutex<u64>>,
}

impl Generation {
    fn new() -> Self {
        Generation {
            value: Arc::new(Mutex::new(0)),
        }
    }

    fn current(&self) -> u64 {
        *lock(&self.value)
    }

    fn advance(&self) -> u64 {
        let mut guard = lock(&self.value);
        *guard += 1;
        *guard
    }

    /// Runs `f` under the lock iff `captured` is still current. Returns
    /// whether `f` ran.
    fn gate<F: FnOnce()>(&self, captured: u64, f: F) -> bool {
        let guard = lock(&self.value);
        if *guard == captured {
            f();
            true
        } else {
            false
        }
    }
}

/// Lifecycle of a session. Shut-down is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Previewing,
    FullyLoaded,
    ShutDown,
}

type PageCompletion = Box<dyn FnOnce(Result<Arc<Page>, SessionError>)>;
type UnitCompletion = Box<dyn FnOnce(Result<(), SessionError>)>;
type CountCompletion = Box<dyn FnOnce(Result<u64, SessionError>)>;
type SessionCompletion = Box<dyn FnOnce(Result<Session, SessionError>)>;

enum PendingCompletion {
    Page(PageCompletion),
    Unit(UnitCompletion),
    Count(CountCompletion),
    Session(SessionCompletion),
}

/// Schema, rows, and counts carried back from a load-shaped job.
struct LoadReply {
    columns: Vec<QueryColumn>,
    rows: Vec<Vec<CellValue>>,
    total_rows: Option<u64>,
    total_filtered_rows: Option<u64>,
}

enum MutationKind {
    AddRow,
    UpdateCell {
        row_id: i64,
        column: String,
        value: CellValue,
    },
    DeleteColumn {
        column: String,
    },
    RenameColumn {
        old: String,
        new: String,
    },
    ChangeColumnType {
        column: String,
        display_type: DisplayType,
    },
}

enum Reply {
    PreviewLoaded {
        request: u64,
        generation: u64,
        result: Result<LoadReply, EngineError>,
    },
    FullyLoaded {
        request: u64,
        generation: u64,
        result: Result<LoadReply, EngineError>,
    },
    PageFetched {
        request: u64,
        generation: u64,
        start_row: u64,
        result: Result<QueryRows, EngineError>,
    },
    Counted {
        request: u64,
        generation: u64,
        result: Result<u64, EngineError>,
    },
    ExpressionPreviewed {
        request: u64,
        result: Result<QueryRows, EngineError>,
    },
    Mutated {
        request: u64,
        kind: MutationKind,
        result: Result<(), EngineError>,
    },
    SummariesStored {
        stored: bool,
        error: Option<EngineError>,
    },
    SummaryCreated {
        request: u64,
        identity: u64,
        result: Result<LoadReply, EngineError>,
    },
}

fn count_from(rows: &QueryRows) -> u64 {
    match rows.rows.first().and_then(|r| r.first()) {
        Some(CellValue::Integer(n)) => u64::try_from(*n).unwrap_or(0),
        Some(CellValue::Double(f)) if *f >= 0.0 => *f as u64,
        _ => 0,
    }
}

/// One browsable table. All methods are called from a single owning thread;
/// queries run on the shared execution context and completions fire from
/// `drain_completions` / `wait_for_completion` back on the owning thread.
pub struct Session {
    exec: Arc<Exec>,
    table: String,
    config: SessionConfig,
    state: SessionState,
    view: ViewState,
    columns: Vec<ColumnDescriptor>,
    total_rows: u64,
    total_filtered_rows: u64,
    cache: RowCache,
    preview_page: Option<Arc<Page>>,
    edited_cells: HashMap<(i64, String), CellValue>,
    generation: Generation,
    summary_generation: Generation,
    summaries: Arc<Mutex<HashMap<String, ColumnSummary>>>,
    shut_down: Arc<AtomicBool>,
    reply_tx: Sender<Reply>,
    reply_rx: Receiver<Reply>,
    pending: HashMap<u64, PendingCompletion>,
    next_request: u64,
    on_summaries_computed: Option<Box<dyn FnMut()>>,
    last_error: Option<String>,
    owns_summary_table: bool,
}

impl Session {
    /// Bind a session to a table registered on the execution context's
    /// engine. No query runs until a load is requested.
    pub fn open(exec: Arc<Exec>, table: impl Into<String>, config: SessionConfig) -> Session {
        let (reply_tx, reply_rx) = mpsc::channel();
        let cache = RowCache::new(config.page_size, config.cache_capacity);
        Session {
            exec,
            table: table.into(),
            config,
            state: SessionState::Created,
            view: ViewState::new(),
            columns: Vec::new(),
            total_rows: 0,
            total_filtered_rows: 0,
            cache,
            preview_page: None,
            edited_cells: HashMap::new(),
            generation: Generation::new(),
            summary_generation: Generation::new(),
            summaries: Arc::new(Mutex::new(HashMap::new())),
            shut_down: Arc::new(AtomicBool::new(false)),
            reply_tx,
            reply_rx,
            pending: HashMap::new(),
            next_request: 0,
            on_summaries_computed: None,
            last_error: None,
            owns_summary_table: false,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Base table schema. Computed columns live in the view state instead.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Row count for the current filters and search term.
    pub fn total_filtered_rows(&self) -> u64 {
        self.total_filtered_rows
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.state == SessionState::FullyLoaded
    }

    pub fn is_shut_down(&self) -> bool {
        self.state == SessionState::ShutDown
    }

    pub fn page_size(&self) -> u64 {
        self.cache.page_size()
    }

    pub fn has_cached_page(&self, page_index: u64) -> bool {
        self.cache.has_page(page_index)
    }

    /// Rows retained by `load_preview`, outside the page cache.
    pub fn preview(&self) -> Option<&Arc<Page>> {
        self.preview_page.as_ref()
    }

    /// Most recent asynchronous failure, for UI polling.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn column_summaries(&self) -> HashMap<String, ColumnSummary> {
        lock(&self.summaries).clone()
    }

    pub fn set_on_summaries_computed(&mut self, callback: impl FnMut() + 'static) {
        self.on_summaries_computed = Some(Box::new(callback));
    }

    /// Locally recorded cell edit, if any.
    pub fn edited_cell(&self, row_id: i64, column: &str) -> Option<&CellValue> {
        self.edited_cells.get(&(row_id, column.to_string()))
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_request += 1;
        self.next_request
    }

    // ---- loading ----

    /// Fetch the first rows to learn the schema without waiting for a full
    /// count over a possibly enormous table.
    pub fn load_preview(
        &mut self,
        completion: impl FnOnce(Result<Arc<Page>, SessionError>) + 'static,
    ) {
        if self.is_shut_down() {
            completion(Err(SessionError::ShutDown));
            return;
        }
        if self.state == SessionState::Created {
            self.state = SessionState::Previewing;
        }
        let request = self.next_request_id();
        self.pending
            .insert(request, PendingCompletion::Page(Box::new(completion)));
        let generation = self.generation.current();
        let sql = sql::build_query(
            &self.table,
            &self.view,
            &self.columns,
            0..self.config.preview_rows,
        );
        let tx = self.reply_tx.clone();
        trace!(%sql, "dispatching preview load");
        self.exec.submit(move |engine| {
            let result = engine.execute(&sql).map(|r| LoadReply {
                columns: r.columns,
                rows: r.rows,
                total_rows: None,
                total_filtered_rows: None,
            });
            tx.send(Reply::PreviewLoaded {
                request,
                generation,
                result,
            })
            .ok();
        });
    }

    /// Compute the authoritative schema and row counts and mark the session
    /// fully loaded.
    pub fn load_full(&mut self, completion: impl FnOnce(Result<(), SessionError>) + 'static) {
        if self.is_shut_down() {
            completion(Err(SessionError::ShutDown));
            return;
        }
        let request = self.next_request_id();
        self.pending
            .insert(request, PendingCompletion::Unit(Box::new(completion)));
        let generation = self.generation.current();
        // The probe and total count are shape-independent on purpose; only the
        // filtered count can go stale.
        let probe_sql = sql::build_query(&self.table, &ViewState::default(), &[], 0..0);
        let total_sql = sql::build_count_query(&self.table, &ViewState::default(), &[]);
        let filtered_sql = sql::build_count_query(&self.table, &self.view, &self.columns);
        let needs_filtered = filtered_sql != total_sql;
        let tx = self.reply_tx.clone();
        trace!(table = %self.table, "dispatching full load");
        self.exec.submit(move |engine| {
            let result: Result<LoadReply, EngineError> = (|| {
                let probe = engine.execute(&probe_sql)?;
                let total = count_from(&engine.execute(&total_sql)?);
                let filtered = if needs_filtered {
                    count_from(&engine.execute(&filtered_sql)?)
                } else {
                    total
                };
                Ok(LoadReply {
                    columns: probe.columns,
                    rows: Vec::new(),
                    total_rows: Some(total),
                    total_filtered_rows: Some(filtered),
                })
            })();
            tx.send(Reply::FullyLoaded {
                request,
                generation,
                result,
            })
            .ok();
        });
    }

    // ---- paging ----

    /// Deliver one page, from cache when possible. On a miss the query runs in
    /// the background and the completion fires from a later drain.
    pub fn fetch_page(
        &mut self,
        page_index: u64,
        completion: impl FnOnce(Result<Arc<Page>, SessionError>) + 'static,
    ) {
        if self.is_shut_down() {
            completion(Err(SessionError::ShutDown));
            return;
        }
        if let Some(page) = self.cache.page(page_index) {
            completion(Ok(page));
            return;
        }
        let request = self.next_request_id();
        self.pending
            .insert(request, PendingCompletion::Page(Box::new(completion)));
        let generation = self.generation.current();
        let range = self.cache.page_range(page_index);
        let start_row = range.start;
        let sql = sql::build_query(&self.table, &self.view, &self.columns, range);
        let tx = self.reply_tx.clone();
        trace!(%sql, page = page_index, "dispatching page fetch");
        self.exec.submit(move |engine| {
            let result = engine.execute(&sql);
            tx.send(Reply::PageFetched {
                request,
                generation,
                start_row,
                result,
            })
            .ok();
        });
    }

    /// Value for an absolute row, reading through the edited-cells overlay,
    /// then the page cache, then the preview rows.
    pub fn cell_value(&mut self, row: u64, column: &str) -> Option<CellValue> {
        let index = self.cache.page_index(row);
        let page = match self.cache.page(index) {
            Some(page) => page,
            None => {
                let preview = self.preview_page.clone()?;
                if !preview.row_range().contains(&row) {
                    return None;
                }
                preview
            }
        };
        let offset = (row - page.start_row) as usize;
        if let Some(CellValue::Integer(row_id)) = page.value(offset, ROW_IDENTITY_COLUMN) {
            if let Some(edited) = self.edited_cells.get(&(*row_id, column.to_string())) {
                return Some(edited.clone());
            }
        }
        page.value(offset, column).cloned()
    }

    /// Clamp a possibly stale page's row range to the current filtered total
    /// before it is used to refresh any presentation surface.
    pub fn clamped_reload_range(&self, page: &Page) -> Range<u64> {
        let end = page.row_range().end.min(self.total_filtered_rows);
        let start = page.start_row.min(end);
        start..end
    }

    // ---- view state ----

    /// Replace the view state. A query-shape change advances the generation
    /// and clears the cache; any change triggers a recount.
    pub fn update_view_state(&mut self, new_state: ViewState) {
        let changed = query_shape_changed(&self.view, &new_state);
        self.view = new_state;
        if changed {
            let generation = self.generation.advance();
            self.cache.invalidate_all();
            debug!(generation, "query shape changed");
        }
        self.requery_filtered_count(|_| {});
    }

    /// Wholesale schema replacement from the ingestion collaborator. Treated
    /// as a shape change: cached pages no longer match the table.
    pub fn update_schema(&mut self, columns: Vec<ColumnDescriptor>) {
        self.columns = columns;
        self.generation.advance();
        self.cache.invalidate_all();
        self.requery_filtered_count(|_| {});
    }

    /// Recompute `total_filtered_rows` for the current filters and search.
    pub fn requery_filtered_count(
        &mut self,
        completion: impl FnOnce(Result<u64, SessionError>) + 'static,
    ) {
        if self.is_shut_down() {
            completion(Err(SessionError::ShutDown));
            return;
        }
        let request = self.next_request_id();
        self.pending
            .insert(request, PendingCompletion::Count(Box::new(completion)));
        let generation = self.generation.current();
        let sql = sql::build_count_query(&self.table, &self.view, &self.columns);
        let tx = self.reply_tx.clone();
        trace!(%sql, "dispatching recount");
        self.exec.submit(move |engine| {
            let result = engine.execute(&sql).map(|rows| count_from(&rows));
            tx.send(Reply::Counted {
                request,
                generation,
                result,
            })
            .ok();
        });
    }

    // ---- computed columns ----

    fn validate_expression(&self, name: &str, expression: &str) -> Result<(), SessionError> {
        if expr::is_unsafe(expression) {
            return Err(SessionError::InvalidExpression {
                name: name.to_string(),
            });
        }
        let exists = self.columns.iter().any(|c| c.name == name)
            || self.view.computed_columns.iter().any(|c| c.name == name);
        if exists {
            return Err(SessionError::DuplicateColumn(name.to_string()));
        }
        Ok(())
    }

    /// Add a computed column to the view. Validation is synchronous and no
    /// SQL runs until the resulting shape change requeries.
    pub fn add_computed_column(
        &mut self,
        name: &str,
        expression: &str,
    ) -> Result<(), SessionError> {
        self.validate_expression(name, expression)?;
        let mut state = self.view.clone();
        state
            .computed_columns
            .push(ComputedColumn::new(name, expression));
        self.update_view_state(state);
        Ok(())
    }

    /// Evaluate an expression over the first rows without caching anything.
    /// Validation failures complete synchronously, before any SQL runs.
    pub fn preview_expression(
        &mut self,
        name: &str,
        expression: &str,
        completion: impl FnOnce(Result<Arc<Page>, SessionError>) + 'static,
    ) {
        if self.is_shut_down() {
            completion(Err(SessionError::ShutDown));
            return;
        }
        if let Err(e) = self.validate_expression(name, expression) {
            completion(Err(e));
            return;
        }
        let request = self.next_request_id();
        self.pending
            .insert(request, PendingCompletion::Page(Box::new(completion)));
        let sql = sql::build_expression_preview(
            &self.table,
            &self.view,
            name,
            expression,
            self.config.preview_rows as usize,
        );
        let tx = self.reply_tx.clone();
        trace!(%sql, "dispatching expression preview");
        self.exec.submit(move |engine| {
            let result = engine.execute(&sql);
            tx.send(Reply::ExpressionPreviewed { request, result }).ok();
        });
    }

    // ---- mutations ----

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    fn submit_mutation(&mut self, sql: String, kind: MutationKind, completion: UnitCompletion) {
        let request = self.next_request_id();
        self.pending
            .insert(request, PendingCompletion::Unit(completion));
        let tx = self.reply_tx.clone();
        trace!(%sql, "dispatching mutation");
        self.exec.submit(move |engine| {
            let result = engine.execute(&sql).map(|_| ());
            tx.send(Reply::Mutated {
                request,
                kind,
                result,
            })
            .ok();
        });
    }

    /// Insert a row. Values with no SQL literal form are skipped; an entirely
    /// empty insert completes as a no-op.
    pub fn add_row(
        &mut self,
        values: Vec<(String, CellValue)>,
        completion: impl FnOnce(Result<(), SessionError>) + 'static,
    ) {
        if self.is_shut_down() {
            completion(Err(SessionError::ShutDown));
            return;
        }
        let Some(sql) = sql::build_insert(&self.table, &values) else {
            completion(Ok(()));
            return;
        };
        self.submit_mutation(sql, MutationKind::AddRow, Box::new(completion));
    }

    /// Write one cell, addressed by row identity. The edit is also recorded
    /// locally so cached pages render the new value without a refetch.
    pub fn update_cell(
        &mut self,
        row_id: i64,
        column: &str,
        value: CellValue,
        completion: impl FnOnce(Result<(), SessionError>) + 'static,
    ) {
        if self.is_shut_down() {
            completion(Err(SessionError::ShutDown));
            return;
        }
        if !self.has_column(column) {
            completion(Err(SessionError::UnknownColumn(column.to_string())));
            return;
        }
        let Some(sql) = sql::build_update_cell(&self.table, row_id, column, &value) else {
            completion(Err(SessionError::Unrepresentable(format!(
                "value for '{column}'"
            ))));
            return;
        };
        self.submit_mutation(
            sql,
            MutationKind::UpdateCell {
                row_id,
                column: column.to_string(),
                value,
            },
            Box::new(completion),
        );
    }

    pub fn delete_column(
        &mut self,
        column: &str,
        completion: impl FnOnce(Result<(), SessionError>) + 'static,
    ) {
        if self.is_shut_down() {
            completion(Err(SessionError::ShutDown));
            return;
        }
        if !self.has_column(column) {
            completion(Err(SessionError::UnknownColumn(column.to_string())));
            return;
        }
        let sql = sql::build_drop_column(&self.table, column);
        self.submit_mutation(
            sql,
            MutationKind::DeleteColumn {
                column: column.to_string(),
            },
            Box::new(completion),
        );
    }

    pub fn rename_column(
        &mut self,
        old: &str,
        new: &str,
        completion: impl FnOnce(Result<(), SessionError>) + 'static,
    ) {
        if self.is_shut_down() {
            completion(Err(SessionError::ShutDown));
            return;
        }
        if !self.has_column(old) {
            completion(Err(SessionError::UnknownColumn(old.to_string())));
            return;
        }
        if old == new {
            completion(Ok(()));
            return;
        }
        if self.has_column(new) || self.view.computed_columns.iter().any(|c| c.name == new) {
            completion(Err(SessionError::DuplicateColumn(new.to_string())));
            return;
        }
        let sql = sql::build_rename_column(&self.table, old, new);
        self.submit_mutation(
            sql,
            MutationKind::RenameColumn {
                old: old.to_string(),
                new: new.to_string(),
            },
            Box::new(completion),
        );
    }

    pub fn change_column_type(
        &mut self,
        column: &str,
        display_type: DisplayType,
        completion: impl FnOnce(Result<(), SessionError>) + 'static,
    ) {
        if self.is_shut_down() {
            completion(Err(SessionError::ShutDown));
            return;
        }
        if !self.has_column(column) {
            completion(Err(SessionError::UnknownColumn(column.to_string())));
            return;
        }
        let Some(sql) = sql::build_change_column_type(&self.table, column, display_type) else {
            completion(Err(SessionError::Unrepresentable(format!(
                "target type {}",
                display_type.as_str()
            ))));
            return;
        };
        self.submit_mutation(
            sql,
            MutationKind::ChangeColumnType {
                column: column.to_string(),
                display_type,
            },
            Box::new(completion),
        );
    }

    fn apply_mutation(&mut self, kind: MutationKind) {
        match kind {
            MutationKind::AddRow => {
                self.total_rows += 1;
            }
            MutationKind::UpdateCell {
                row_id,
                column,
                value,
            } => {
                self.edited_cells.insert((row_id, column), value);
            }
            MutationKind::DeleteColumn { column } => {
                self.columns.retain(|c| c.name != column);
                self.view.filters.retain(|f| f.column != column);
                self.view.sort_columns.retain(|s| s.column != column);
                self.edited_cells.retain(|(_, c), _| *c != column);
            }
            MutationKind::RenameColumn { old, new } => {
                for c in &mut self.columns {
                    if c.name == old {
                        c.name = new.clone();
                    }
                }
                for f in &mut self.view.filters {
                    if f.column == old {
                        f.column = new.clone();
                    }
                }
                for s in &mut self.view.sort_columns {
                    if s.column == old {
                        s.column = new.clone();
                    }
                }
                let edited = std::mem::take(&mut self.edited_cells);
                self.edited_cells = edited
                    .into_iter()
                    .map(|((id, c), v)| {
                        let c = if c == old { new.clone() } else { c };
                        ((id, c), v)
                    })
                    .collect();
            }
            MutationKind::ChangeColumnType {
                column,
                display_type,
            } => {
                if let Some(type_name) = sql::cast_type_name(display_type) {
                    for c in &mut self.columns {
                        if c.name == column {
                            c.display_type = display_type;
                            c.engine_type = type_name.to_string();
                        }
                    }
                }
            }
        }
    }

    // ---- summaries ----

    /// Recompute per-column summaries over the filtered view. The store
    /// happens on the background context, gated by the summary generation;
    /// the `on_summaries_computed` callback fires from a later drain.
    pub fn compute_column_summaries(&mut self) {
        if self.is_shut_down() {
            return;
        }
        let targets: Vec<(String, String)> = self
            .columns
            .iter()
            .filter(|c| c.name != ROW_IDENTITY_COLUMN)
            .map(|c| {
                (
                    c.name.clone(),
                    summary::build_column_summary_query(&self.table, &self.view, &self.columns, c),
                )
            })
            .collect();
        if targets.is_empty() {
            return;
        }
        let captured = self.summary_generation.current();
        let gate = self.summary_generation.clone();
        let store = Arc::clone(&self.summaries);
        let shut_down = Arc::clone(&self.shut_down);
        let tx = self.reply_tx.clone();
        trace!(columns = targets.len(), "dispatching column summaries");
        self.exec.submit(move |engine| {
            let mut computed: HashMap<String, ColumnSummary> = HashMap::new();
            let mut first_error: Option<EngineError> = None;
            for (name, sql) in targets {
                match engine.execute(&sql) {
                    Ok(rows) => {
                        if let Some(summary) = summary::summary_from_rows(&rows) {
                            computed.insert(name, summary);
                        }
                    }
                    Err(e) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
            // The store runs right here on the worker, under the generation
            // lock. Waiting on the owning thread from this side is how the
            // old cycle deadlocked.
            let mut stored = false;
            if first_error.is_none() {
                gate.gate(captured, || {
                    if !shut_down.load(Ordering::SeqCst) {
                        *lock(&store) = computed;
                        stored = true;
                    }
                });
            }
            tx.send(Reply::SummariesStored {
                stored,
                error: first_error,
            })
            .ok();
        });
    }

    /// Discard stored summaries and mark any in-flight computation stale.
    pub fn invalidate_column_summaries(&mut self) {
        self.summary_generation.advance();
        lock(&self.summaries).clear();
    }

    /// Materialize a grouped/aggregated view as a uniquely named temporary
    /// table and hand back a fully loaded session over it.
    pub fn create_summary_session(
        &mut self,
        definition: SummaryDefinition,
        completion: impl FnOnce(Result<Session, SessionError>) + 'static,
    ) {
        if self.is_shut_down() {
            completion(Err(SessionError::ShutDown));
            return;
        }
        let identity = summary::next_summary_identity();
        let name = summary::summary_table_name(identity);
        let request = self.next_request_id();
        self.pending
            .insert(request, PendingCompletion::Session(Box::new(completion)));
        let create_sql = summary::build_create_summary_table(
            &name,
            &self.table,
            &self.view,
            &self.columns,
            &definition,
        );
        let probe_sql = sql::build_query(&name, &ViewState::default(), &[], 0..0);
        let count_sql = sql::build_count_query(&name, &ViewState::default(), &[]);
        let tx = self.reply_tx.clone();
        debug!(table = %name, "creating summary session");
        self.exec.submit(move |engine| {
            let result: Result<LoadReply, EngineError> = (|| {
                engine.execute(&create_sql)?;
                let probe = engine.execute(&probe_sql)?;
                let total = count_from(&engine.execute(&count_sql)?);
                Ok(LoadReply {
                    columns: probe.columns,
                    rows: Vec::new(),
                    total_rows: Some(total),
                    total_filtered_rows: Some(total),
                })
            })();
            tx.send(Reply::SummaryCreated {
                request,
                identity,
                result,
            })
            .ok();
        });
    }

    fn submit_drop_table(&self, name: &str) {
        let sql = sql::build_drop_table(name);
        self.exec.submit(move |engine| {
            if let Err(e) = engine.execute(&sql) {
                debug!(error = %e, "summary table drop failed");
            }
        });
    }

    /// Release the backing table of a summary session. Safe to call on any
    /// session; only an owner actually drops anything.
    pub fn drop_summary_table(&mut self) {
        if self.owns_summary_table {
            self.owns_summary_table = false;
            let table = self.table.clone();
            self.submit_drop_table(&table);
        }
    }

    // ---- lifecycle ----

    /// Idempotent. In-flight work still completes, but applies nothing.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::ShutDown {
            return;
        }
        self.state = SessionState::ShutDown;
        self.shut_down.store(true, Ordering::SeqCst);
        debug!(table = %self.table, "session shut down");
    }

    // ---- completion delivery ----

    /// Apply every queued background reply, firing completions. Returns how
    /// many replies were applied.
    pub fn drain_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(reply) = self.reply_rx.try_recv() {
            self.apply(reply);
            applied += 1;
        }
        applied
    }

    /// Wait for one background reply and apply it. Returns whether a reply
    /// arrived within the timeout.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> bool {
        match self.reply_rx.recv_timeout(timeout) {
            Ok(reply) => {
                self.apply(reply);
                true
            }
            Err(_) => false,
        }
    }

    fn take_page(&mut self, request: u64) -> Option<PageCompletion> {
        match self.pending.remove(&request) {
            Some(PendingCompletion::Page(completion)) => Some(completion),
            Some(_) => {
                warn!(request, "mismatched completion kind");
                None
            }
            None => None,
        }
    }

    fn take_unit(&mut self, request: u64) -> Option<UnitCompletion> {
        match self.pending.remove(&request) {
            Some(PendingCompletion::Unit(completion)) => Some(completion),
            Some(_) => {
                warn!(request, "mismatched completion kind");
                None
            }
            None => None,
        }
    }

    fn take_count(&mut self, request: u64) -> Option<CountCompletion> {
        match self.pending.remove(&request) {
            Some(PendingCompletion::Count(completion)) => Some(completion),
            Some(_) => {
                warn!(request, "mismatched completion kind");
                None
            }
            None => None,
        }
    }

    fn take_session(&mut self, request: u64) -> Option<SessionCompletion> {
        match self.pending.remove(&request) {
            Some(PendingCompletion::Session(completion)) => Some(completion),
            Some(_) => {
                warn!(request, "mismatched completion kind");
                None
            }
            None => None,
        }
    }

    fn record_error(&mut self, error: &EngineError) {
        self.last_error = Some(error.to_string());
    }

    fn apply(&mut self, reply: Reply) {
        match reply {
            Reply::PreviewLoaded {
                request,
                generation,
                result,
            } => {
                let completion = self.take_page(request);
                if self.is_shut_down() {
                    if let Some(completion) = completion {
                        completion(Err(SessionError::ShutDown));
                    }
                    return;
                }
                match result {
                    Ok(load) => {
                        let page = Arc::new(Page {
                            start_row: 0,
                            column_names: load.columns.iter().map(|c| c.name.clone()).collect(),
                            rows: load.rows,
                        });
                        let computed: Vec<String> = self
                            .view
                            .computed_columns
                            .iter()
                            .map(|c| c.name.clone())
                            .collect();
                        let cell = self.generation.clone();
                        let fresh = cell.gate(generation, || {
                            self.columns = descriptors_from(&load.columns)
                                .into_iter()
                                .filter(|c| !computed.contains(&c.name))
                                .collect();
                            self.preview_page = Some(Arc::clone(&page));
                        });
                        if !fresh {
                            trace!(request, "discarding stale preview");
                        }
                        if let Some(completion) = completion {
                            completion(Ok(page));
                        }
                    }
                    Err(e) => {
                        self.record_error(&e);
                        if let Some(completion) = completion {
                            completion(Err(SessionError::Query(e)));
                        }
                    }
                }
            }
            Reply::FullyLoaded {
                request,
                generation,
                result,
            } => {
                let completion = self.take_unit(request);
                if self.is_shut_down() {
                    if let Some(completion) = completion {
                        completion(Err(SessionError::ShutDown));
                    }
                    return;
                }
                match result {
                    Ok(load) => {
                        self.columns = descriptors_from(&load.columns);
                        if let Some(total) = load.total_rows {
                            self.total_rows = total;
                        }
                        if let Some(filtered) = load.total_filtered_rows {
                            let cell = self.generation.clone();
                            let fresh = cell.gate(generation, || {
                                self.total_filtered_rows = filtered;
                            });
                            if !fresh {
                                // Shape changed while loading; count again.
                                self.requery_filtered_count(|_| {});
                            }
                        }
                        self.state = SessionState::FullyLoaded;
                        if let Some(completion) = completion {
                            completion(Ok(()));
                        }
                    }
                    Err(e) => {
                        self.record_error(&e);
                        if let Some(completion) = completion {
                            completion(Err(SessionError::Query(e)));
                        }
                    }
                }
            }
            Reply::PageFetched {
                request,
                generation,
                start_row,
                result,
            } => {
                let completion = self.take_page(request);
                if self.is_shut_down() {
                    if let Some(completion) = completion {
                        completion(Err(SessionError::ShutDown));
                    }
                    return;
                }
                match result {
                    Ok(rows) => {
                        let page = Arc::new(Page {
                            start_row,
                            column_names: rows.column_names(),
                            rows: rows.rows,
                        });
                        let cell = self.generation.clone();
                        let fresh = cell.gate(generation, || {
                            self.cache.insert_shared(Arc::clone(&page));
                        });
                        if !fresh {
                            trace!(request, start_row, "discarding stale page");
                        }
                        // The completion fires exactly once either way; the
                        // caller clamps stale ranges before using them.
                        if let Some(completion) = completion {
                            completion(Ok(page));
                        }
                    }
                    Err(e) => {
                        self.record_error(&e);
                        if let Some(completion) = completion {
                            completion(Err(SessionError::Query(e)));
                        }
                    }
                }
            }
            Reply::Counted {
                request,
                generation,
                result,
            } => {
                let completion = self.take_count(request);
                if self.is_shut_down() {
                    if let Some(completion) = completion {
                        completion(Err(SessionError::ShutDown));
                    }
                    return;
                }
                match result {
                    Ok(count) => {
                        let cell = self.generation.clone();
                        cell.gate(generation, || {
                            self.total_filtered_rows = count;
                        });
                        if let Some(completion) = completion {
                            completion(Ok(count));
                        }
                    }
                    Err(e) => {
                        self.record_error(&e);
                        if let Some(completion) = completion {
                            completion(Err(SessionError::Query(e)));
                        }
                    }
                }
            }
            Reply::ExpressionPreviewed { request, result } => {
                let completion = self.take_page(request);
                if self.is_shut_down() {
                    if let Some(completion) = completion {
                        completion(Err(SessionError::ShutDown));
                    }
                    return;
                }
                match result {
                    Ok(rows) => {
                        let page = Arc::new(Page {
                            start_row: 0,
                            column_names: rows.column_names(),
                            rows: rows.rows,
                        });
                        if let Some(completion) = completion {
                            completion(Ok(page));
                        }
                    }
                    Err(e) => {
                        self.record_error(&e);
                        if let Some(completion) = completion {
                            completion(Err(SessionError::Query(e)));
                        }
                    }
                }
            }
            Reply::Mutated {
                request,
                kind,
                result,
            } => {
                let completion = self.take_unit(request);
                if self.is_shut_down() {
                    if let Some(completion) = completion {
                        completion(Err(SessionError::ShutDown));
                    }
                    return;
                }
                match result {
                    Ok(()) => {
                        self.apply_mutation(kind);
                        self.generation.advance();
                        self.cache.invalidate_all();
                        self.requery_filtered_count(|_| {});
                        if let Some(completion) = completion {
                            completion(Ok(()));
                        }
                    }
                    Err(e) => {
                        self.record_error(&e);
                        if let Some(completion) = completion {
                            completion(Err(SessionError::Query(e)));
                        }
                    }
                }
            }
            Reply::SummariesStored { stored, error } => {
                if self.is_shut_down() {
                    return;
                }
                if let Some(e) = error {
                    self.record_error(&e);
                } else if !stored {
                    debug!("column summaries not stored; superseded");
                } else if let Some(callback) = self.on_summaries_computed.as_mut() {
                    callback();
                }
            }
            Reply::SummaryCreated {
                request,
                identity,
                result,
            } => {
                let completion = self.take_session(request);
                let name = summary::summary_table_name(identity);
                if self.is_shut_down() {
                    if result.is_ok() {
                        // The table exists but nobody will own it; release it.
                        self.submit_drop_table(&name);
                    }
                    if let Some(completion) = completion {
                        completion(Err(SessionError::ShutDown));
                    }
                    return;
                }
                match result {
                    Ok(load) => {
                        let mut session =
                            Session::open(Arc::clone(&self.exec), name, self.config.clone());
                        session.columns = descriptors_from(&load.columns);
                        session.total_rows = load.total_rows.unwrap_or(0);
                        session.total_filtered_rows = load.total_filtered_rows.unwrap_or(0);
                        session.state = SessionState::FullyLoaded;
                        session.owns_summary_table = true;
                        if let Some(completion) = completion {
                            completion(Ok(session));
                        }
                    }
                    Err(e) => {
                        self.record_error(&e);
                        if let Some(completion) = completion {
                            completion(Err(SessionError::Query(e)));
                        }
                    }
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.drop_summary_table();
    }
}
