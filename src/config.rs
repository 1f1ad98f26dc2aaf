//! Session configuration loaded from the user's config directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{DEFAULT_CACHE_CAPACITY, DEFAULT_PAGE_SIZE};

/// Rows fetched by `load_preview` before the full count is known.
pub const DEFAULT_PREVIEW_ROWS: u64 = 50;

/// Tunables for one session. Every field has a safe default, so a partial
/// config file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Rows per cached page.
    pub page_size: u64,
    /// Pages held before least-recently-used eviction kicks in.
    pub cache_capacity: usize,
    /// Rows fetched for the initial preview.
    pub preview_rows: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            preview_rows: DEFAULT_PREVIEW_ROWS,
        }
    }
}

impl SessionConfig {
    /// Load from `<config_dir>/<app_name>/config.toml`, falling back to
    /// defaults when the file is missing or unreadable.
    pub fn load(app_name: &str) -> Self {
        let Some(path) = Self::config_path(app_name) else {
            return Self::default();
        };
        Self::load_from(&path)
    }

    /// Load from an explicit path. A missing file is not an error; a file
    /// that fails to parse logs a warning and yields defaults.
    pub fn load_from(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        Self::from_toml(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring unreadable config");
            Self::default()
        })
    }

    /// Parse a TOML document. Out-of-range values are clamped, not rejected.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let config: SessionConfig = toml::from_str(content)?;
        Ok(config.clamped())
    }

    fn config_path(app_name: &str) -> Option<PathBuf> {
        Some(dirs::config_dir()?.join(app_name).join("config.toml"))
    }

    fn clamped(mut self) -> Self {
        if self.page_size == 0 {
            warn!("page_size 0 is not usable; using 1");
            self.page_size = 1;
        }
        if self.cache_capacity == 0 {
            warn!("cache_capacity 0 is not usable; using 1");
            self.cache_capacity = 1;
        }
        if self.preview_rows == 0 {
            warn!("preview_rows 0 is not usable; using 1");
            self.preview_rows = 1;
        }
        self
    }
}
