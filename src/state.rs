use crate::analysis::formula::FormulaTranslator;
use crate::analysis::stats::compute_statistics;
use crate::cache::HandleCache;
use crate::config::SessionConfig;
use crate::error::{SessionError, is_handle_closed};
use crate::model::{CacheStats, CellRange, CellRef, FormulaRecord, SheetStatistics};
use crate::utils::{column_name_to_number, column_number_to_name};
use crate::workbook::{CellSource, WorkbookHandle};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Ties the handle cache, per-file sheet selection and formula analysis together.
///
/// Every operation takes a file path and re-acquires the workbook from the
/// cache, opening it on a miss. Handles are never kept across calls.
pub struct SessionManager {
    config: SessionConfig,
    cache: Arc<HandleCache<WorkbookHandle>>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Builds the manager and starts the expiry sweep. Must be called from
    /// within a tokio runtime.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("session manager requires a running tokio runtime for its expiry sweep")?;

        let cache = Arc::new(HandleCache::new(&config.cache));
        let shutdown = CancellationToken::new();
        let sweeper = runtime.spawn(run_sweeper(
            cache.clone(),
            config.cleanup_interval,
            shutdown.clone(),
        ));

        info!(
            max_size = config.cache.max_size,
            ttl_secs = config.cache.ttl.as_secs(),
            cleanup_interval_secs = config.cleanup_interval.as_secs(),
            header_search_depth = config.header_search_depth,
            "session manager started"
        );

        Ok(Self {
            config,
            cache,
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(SessionConfig::from_env())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the cached handle for `path`, opening and caching it on a miss.
    pub async fn open_file(&self, path: impl AsRef<Path>) -> Result<Arc<WorkbookHandle>> {
        let path = path.as_ref();
        let canonical = fs::canonicalize(path)
            .with_context(|| format!("failed to resolve workbook path {:?}", path))?;

        if let Some(handle) = self.cache.get(&canonical) {
            return Ok(handle);
        }

        let depth = self.config.header_search_depth;
        let load_path = canonical.clone();
        let handle = task::spawn_blocking(move || WorkbookHandle::open(&load_path, depth))
            .await
            .context("workbook loader task failed")??;

        // another caller may have opened the same file meanwhile
        let handle = self.cache.insert_or_get(&canonical, Arc::new(handle));
        debug!(path = ?canonical, "workbook opened and cached");
        Ok(handle)
    }

    /// The session-selected sheet, or the workbook's first sheet.
    pub async fn current_sheet(&self, path: impl AsRef<Path>) -> Result<String> {
        self.with_handle(path.as_ref(), |handle| self.sheet_for(handle, None))
            .await
    }

    /// Records `sheet` as the current sheet for `path` after checking it exists.
    pub async fn select_sheet(&self, path: impl AsRef<Path>, sheet: &str) -> Result<()> {
        let path = path.as_ref();
        for _ in 0..2 {
            let handle = self.open_file(path).await?;
            let available = handle
                .sheet_names()
                .with_context(|| format!("failed to list sheets in {:?}", handle.path()))?;
            if !available.iter().any(|name| name == sheet) {
                return Err(SessionError::SheetNotFound {
                    sheet: sheet.to_string(),
                    available,
                }
                .into());
            }
            if self.cache.select(handle.path(), sheet) {
                debug!(path = ?handle.path(), sheet, "sheet selected");
                return Ok(());
            }
            debug!(path = ?handle.path(), "workbook evicted before selection, reopening");
        }
        anyhow::bail!("workbook {:?} was evicted before sheet '{sheet}' could be selected", path)
    }

    /// Opens `path` and resolves the sheet an operation should act on.
    pub async fn resolve_sheet(
        &self,
        path: impl AsRef<Path>,
        sheet: Option<&str>,
    ) -> Result<(Arc<WorkbookHandle>, String)> {
        let handle = self.open_file(path).await?;
        let sheet = self.sheet_for(&handle, sheet)?;
        Ok((handle, sheet))
    }

    pub async fn sheet_names(&self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        self.with_handle(path.as_ref(), |handle| {
            let names = handle.sheet_names()?;
            if names.is_empty() {
                return Err(SessionError::NoSheets.into());
            }
            Ok(names)
        })
        .await
    }

    pub async fn sheet_stats(
        &self,
        path: impl AsRef<Path>,
        sheet: Option<&str>,
    ) -> Result<SheetStatistics> {
        self.with_sheet(path.as_ref(), sheet, |handle, sheet| {
            let rows = handle
                .rows(sheet)
                .with_context(|| format!("failed to read rows of sheet '{sheet}'"))?;
            Ok(compute_statistics(&rows))
        })
        .await
    }

    /// Column letters for every cell in the first row.
    pub async fn columns(&self, path: impl AsRef<Path>, sheet: Option<&str>) -> Result<Vec<String>> {
        self.with_sheet(path.as_ref(), sheet, |handle, sheet| {
            let rows = handle
                .rows(sheet)
                .with_context(|| format!("failed to read rows of sheet '{sheet}'"))?;
            let first = rows
                .first()
                .ok_or_else(|| SessionError::EmptySheet(sheet.to_string()))?;
            Ok((1..=first.len() as u32).map(column_number_to_name).collect())
        })
        .await
    }

    pub async fn row_count(&self, path: impl AsRef<Path>, sheet: Option<&str>) -> Result<usize> {
        self.with_sheet(path.as_ref(), sheet, |handle, sheet| {
            let rows = handle
                .rows(sheet)
                .with_context(|| format!("failed to read rows of sheet '{sheet}'"))?;
            Ok(rows.len())
        })
        .await
    }

    pub async fn cell_value(
        &self,
        path: impl AsRef<Path>,
        cell: &str,
        sheet: Option<&str>,
    ) -> Result<String> {
        let cell: CellRef = cell.parse()?;
        self.with_sheet(path.as_ref(), sheet, |handle, sheet| {
            handle
                .cell_value(sheet, cell)
                .with_context(|| format!("failed to read {sheet}!{cell}"))
        })
        .await
    }

    /// Row-major values for an `A1:C3` range.
    pub async fn range_values(
        &self,
        path: impl AsRef<Path>,
        range: &str,
        sheet: Option<&str>,
    ) -> Result<Vec<Vec<String>>> {
        let range: CellRange = range.parse()?;
        self.with_sheet(path.as_ref(), sheet, |handle, sheet| {
            (range.start.row..=range.end.row)
                .map(|row| {
                    (range.start.col..=range.end.col)
                        .map(|col| {
                            let cell = CellRef { col, row };
                            handle
                                .cell_value(sheet, cell)
                                .with_context(|| format!("failed to read {sheet}!{cell}"))
                        })
                        .collect()
                })
                .collect()
        })
        .await
    }

    /// One value per row; rows too short to reach the column yield `""`.
    pub async fn column_values(
        &self,
        path: impl AsRef<Path>,
        column: &str,
        sheet: Option<&str>,
    ) -> Result<Vec<String>> {
        let index = column_name_to_number(column)? as usize - 1;
        self.with_sheet(path.as_ref(), sheet, |handle, sheet| {
            let rows = handle
                .rows(sheet)
                .with_context(|| format!("failed to read rows of sheet '{sheet}'"))?;
            Ok(rows
                .into_iter()
                .map(|mut row| {
                    if index < row.len() {
                        row.swap_remove(index)
                    } else {
                        String::new()
                    }
                })
                .collect())
        })
        .await
    }

    /// Values of a 1-based row.
    pub async fn row_values(
        &self,
        path: impl AsRef<Path>,
        row: u32,
        sheet: Option<&str>,
    ) -> Result<Vec<String>> {
        if row == 0 {
            return Err(SessionError::InvalidRow.into());
        }
        self.with_sheet(path.as_ref(), sheet, |handle, sheet| {
            let mut rows = handle
                .rows(sheet)
                .with_context(|| format!("failed to read rows of sheet '{sheet}'"))?;
            let available = rows.len();
            if row as usize > available {
                return Err(SessionError::RowOutOfBounds { row, available }.into());
            }
            Ok(rows.swap_remove(row as usize - 1))
        })
        .await
    }

    /// Formulas from every sheet.
    pub async fn explain_formulas(&self, path: impl AsRef<Path>) -> Result<Vec<FormulaRecord>> {
        self.with_handle(path.as_ref(), |handle| {
            FormulaTranslator::new(handle, handle.headers()).extract_all()
        })
        .await
    }

    pub async fn explain_sheet_formulas(
        &self,
        path: impl AsRef<Path>,
        sheet: Option<&str>,
    ) -> Result<Vec<FormulaRecord>> {
        self.with_sheet(path.as_ref(), sheet, |handle, sheet| {
            FormulaTranslator::new(handle, handle.headers()).extract_sheet(sheet)
        })
        .await
    }

    pub async fn explain_range_formulas(
        &self,
        path: impl AsRef<Path>,
        range: &str,
        sheet: Option<&str>,
    ) -> Result<Vec<FormulaRecord>> {
        let range: CellRange = range.parse()?;
        self.with_sheet(path.as_ref(), sheet, |handle, sheet| {
            FormulaTranslator::new(handle, handle.headers()).extract_range(sheet, &range)
        })
        .await
    }

    pub async fn explain_formula(
        &self,
        path: impl AsRef<Path>,
        cell: &str,
        sheet: Option<&str>,
    ) -> Result<FormulaRecord> {
        let cell: CellRef = cell.parse()?;
        self.with_sheet(path.as_ref(), sheet, |handle, sheet| {
            FormulaTranslator::new(handle, handle.headers()).explain(sheet, cell)
        })
        .await
    }

    /// Releases every cached workbook and forgets all sheet selections in one
    /// step. Returns the number of workbooks released.
    pub fn flush(&self) -> usize {
        let released = self.cache.clear();
        info!(released, "workbook cache flushed");
        released
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Cached paths, most recently used first.
    pub fn cached_paths(&self) -> Vec<PathBuf> {
        self.cache.keys()
    }

    /// Changes the cache capacity, evicting at once if it is now over.
    pub fn set_cache_capacity(&self, max_size: usize) {
        self.cache.set_capacity(max_size);
    }

    /// Stops the expiry sweep, waits for it to exit and releases every handle.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.await.context("expiry sweep task failed")?;
        }
        let released = self.cache.clear();
        info!(released, "session manager shut down");
        Ok(())
    }

    pub fn sweeper_finished(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_none_or(|sweeper| sweeper.is_finished())
    }

    fn sheet_for(&self, handle: &WorkbookHandle, sheet: Option<&str>) -> Result<String> {
        if let Some(sheet) = sheet {
            return Ok(sheet.to_string());
        }
        if let Some(selected) = self.cache.selection(handle.path()) {
            return Ok(selected);
        }
        handle
            .sheet_names()?
            .into_iter()
            .next()
            .ok_or_else(|| SessionError::NoSheets.into())
    }

    /// Runs `op` against the cached handle, reopening once if the handle was
    /// released underneath it.
    async fn with_handle<T, F>(&self, path: &Path, op: F) -> Result<T>
    where
        F: Fn(&WorkbookHandle) -> Result<T>,
    {
        let handle = self.open_file(path).await?;
        match op(&handle) {
            Err(error) if is_handle_closed(&error) => {
                debug!(path = ?handle.path(), "handle released mid-operation, reopening");
                let handle = self.open_file(path).await?;
                op(&handle)
            }
            outcome => outcome,
        }
    }

    async fn with_sheet<T, F>(&self, path: &Path, sheet: Option<&str>, op: F) -> Result<T>
    where
        F: Fn(&WorkbookHandle, &str) -> Result<T>,
    {
        self.with_handle(path, |handle| {
            let sheet = self.sheet_for(handle, sheet)?;
            op(handle, &sheet)
        })
        .await
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_sweeper(
    cache: Arc<HandleCache<WorkbookHandle>>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("expiry sweep stopped");
                break;
            }
            _ = interval.tick() => {
                let removed = cache.clean_expired();
                if removed > 0 {
                    debug!(removed, remaining = cache.size(), "expired workbooks released");
                }
            }
        }
    }
}
