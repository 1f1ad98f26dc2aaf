//! Bounded page cache for fetched query results. Pages are the atomic unit of
//! fetch and storage; eviction is pure LRU by last touch.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use crate::engine::CellValue;

pub const DEFAULT_PAGE_SIZE: u64 = 500;
pub const DEFAULT_CACHE_CAPACITY: usize = 20;

/// One fetched row range. Immutable after insertion; a re-fetch replaces the
/// whole page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub start_row: u64,
    /// Column order within `rows`.
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Page {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row range actually covered by this page. May be shorter than the page
    /// size at the tail of the result set.
    pub fn row_range(&self) -> Range<u64> {
        self.start_row..self.start_row + self.rows.len() as u64
    }

    /// Value at a page-relative row offset, by column name.
    pub fn value(&self, offset: usize, column: &str) -> Option<&CellValue> {
        let col = self.column_names.iter().position(|c| c == column)?;
        self.rows.get(offset)?.get(col)
    }
}

struct Entry {
    page: Arc<Page>,
    last_accessed: u64,
}

/// Maps page index to page, bounded by capacity. The stamp is a logical tick
/// advanced on every insert and read, so LRU order is total.
pub struct RowCache {
    page_size: u64,
    capacity: usize,
    tick: u64,
    pages: HashMap<u64, Entry>,
}

impl RowCache {
    pub fn new(page_size: u64, capacity: usize) -> Self {
        RowCache {
            page_size: page_size.max(1),
            capacity: capacity.max(1),
            tick: 0,
            pages: HashMap::new(),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_index(&self, row: u64) -> u64 {
        row / self.page_size
    }

    pub fn page_range(&self, page_index: u64) -> Range<u64> {
        let start = page_index * self.page_size;
        start..start + self.page_size
    }

    pub fn has_page(&self, page_index: u64) -> bool {
        self.pages.contains_key(&page_index)
    }

    /// The cached page covering `page_index`, touching its LRU stamp.
    pub fn page(&mut self, page_index: u64) -> Option<Arc<Page>> {
        self.tick += 1;
        let entry = self.pages.get_mut(&page_index)?;
        entry.last_accessed = self.tick;
        Some(Arc::clone(&entry.page))
    }

    /// Value for an absolute row and column name, touching the page's LRU
    /// stamp. Rows the stored page does not actually cover are misses.
    pub fn value(&mut self, row: u64, column: &str) -> Option<CellValue> {
        let index = self.page_index(row);
        let page = self.page(index)?;
        let offset = row.checked_sub(page.start_row)? as usize;
        page.value(offset, column).cloned()
    }

    /// Inserts a page at the index derived from its start row, evicting the
    /// least recently touched page when at capacity.
    pub fn insert_page(&mut self, page: Page) -> Arc<Page> {
        let page = Arc::new(page);
        self.insert_shared(Arc::clone(&page));
        page
    }

    /// Like `insert_page` for a page the caller already shares.
    pub fn insert_shared(&mut self, page: Arc<Page>) {
        let index = self.page_index(page.start_row);
        self.tick += 1;
        if !self.pages.contains_key(&index) && self.pages.len() >= self.capacity {
            if let Some(oldest) = self
                .pages
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| *k)
            {
                debug!(page = oldest, "evicting least recently used page");
                self.pages.remove(&oldest);
            }
        }
        self.pages.insert(
            index,
            Entry {
                page,
                last_accessed: self.tick,
            },
        );
    }

    /// Drops every page. Called whenever the generation advances; cached pages
    /// were computed against the old query shape.
    pub fn invalidate_all(&mut self) {
        if !self.pages.is_empty() {
            debug!(pages = self.pages.len(), "invalidating row cache");
        }
        self.pages.clear();
    }
}
