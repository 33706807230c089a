use crate::analysis::header::HeaderResolver;
use crate::cache::Release;
use crate::error::SessionError;
use crate::model::{CellRange, CellRef};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::debug;
use umya_spreadsheet::reader::xlsx;
use umya_spreadsheet::{Spreadsheet, Worksheet};

/// Read access to a workbook's cells, as text.
///
/// Everything above this trait (header search, formula translation,
/// statistics) works against it, so it can be exercised against an in-memory
/// grid without touching the filesystem.
pub trait CellSource {
    fn sheet_names(&self) -> Result<Vec<String>>;

    /// Row-major cell text with trailing blank cells trimmed from each row.
    fn rows(&self, sheet: &str) -> Result<Vec<Vec<String>>>;

    /// Bounding box of occupied cells, `None` for an empty sheet.
    fn used_range(&self, sheet: &str) -> Result<Option<CellRange>>;

    /// Display value; `""` for an empty or missing cell.
    fn cell_value(&self, sheet: &str, cell: CellRef) -> Result<String>;

    /// Formula text with a leading `=`, or `""` when the cell holds no formula.
    fn cell_formula(&self, sheet: &str, cell: CellRef) -> Result<String>;
}

/// An open workbook parsed into memory.
///
/// The parsed workbook sits behind a lock so that [`Release::release`] waits
/// for in-flight reads before dropping it. Reads after release fail with
/// [`SessionError::HandleClosed`].
#[derive(Debug)]
pub struct WorkbookHandle {
    path: PathBuf,
    book: RwLock<Option<Spreadsheet>>,
    headers: HeaderResolver,
}

impl WorkbookHandle {
    pub fn open(path: &Path, header_search_depth: u32) -> Result<Self> {
        let spreadsheet =
            xlsx::read(path).with_context(|| format!("failed to parse workbook {:?}", path))?;
        Ok(Self::from_spreadsheet(path, spreadsheet, header_search_depth))
    }

    pub fn from_spreadsheet(path: &Path, spreadsheet: Spreadsheet, header_search_depth: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            book: RwLock::new(Some(spreadsheet)),
            headers: HeaderResolver::new(header_search_depth),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Memoized label lookups, scoped to this handle's lifetime.
    pub fn headers(&self) -> &HeaderResolver {
        &self.headers
    }

    pub fn is_released(&self) -> bool {
        self.book.read().is_none()
    }

    fn with_book<T, F>(&self, func: F) -> Result<T>
    where
        F: FnOnce(&Spreadsheet) -> Result<T>,
    {
        let guard = self.book.read();
        let book = guard
            .as_ref()
            .ok_or_else(|| SessionError::HandleClosed(self.path.display().to_string()))?;
        func(book)
    }

    fn with_sheet<T, F>(&self, sheet_name: &str, func: F) -> Result<T>
    where
        F: FnOnce(&Worksheet) -> T,
    {
        self.with_book(|book| {
            let sheet = book.get_sheet_by_name(sheet_name).ok_or_else(|| {
                SessionError::SheetNotFound {
                    sheet: sheet_name.to_string(),
                    available: sheet_names_of(book),
                }
            })?;
            Ok(func(sheet))
        })
    }
}

fn sheet_names_of(book: &Spreadsheet) -> Vec<String> {
    book.get_sheet_collection()
        .iter()
        .map(|sheet| sheet.get_name().to_string())
        .collect()
}

fn value_at(sheet: &Worksheet, col: u32, row: u32) -> String {
    sheet
        .get_cell((col, row))
        .map(|cell| cell.get_value().to_string())
        .unwrap_or_default()
}

fn normalize_formula(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("={}", trimmed.trim_start_matches('='))
}

impl CellSource for WorkbookHandle {
    fn sheet_names(&self) -> Result<Vec<String>> {
        self.with_book(|book| Ok(sheet_names_of(book)))
    }

    fn rows(&self, sheet: &str) -> Result<Vec<Vec<String>>> {
        self.with_sheet(sheet, |sheet| {
            let (max_col, max_row) = sheet.get_highest_column_and_row();
            (1..=max_row)
                .map(|row| {
                    let mut cells: Vec<String> =
                        (1..=max_col).map(|col| value_at(sheet, col, row)).collect();
                    while cells.last().is_some_and(|cell| cell.is_empty()) {
                        cells.pop();
                    }
                    cells
                })
                .collect()
        })
    }

    fn used_range(&self, sheet: &str) -> Result<Option<CellRange>> {
        self.with_sheet(sheet, |sheet| {
            let (max_col, max_row) = sheet.get_highest_column_and_row();
            if max_col == 0 || max_row == 0 {
                return None;
            }
            Some(CellRange {
                start: CellRef { col: 1, row: 1 },
                end: CellRef {
                    col: max_col,
                    row: max_row,
                },
            })
        })
    }

    fn cell_value(&self, sheet: &str, cell: CellRef) -> Result<String> {
        self.with_sheet(sheet, |sheet| value_at(sheet, cell.col, cell.row))
    }

    fn cell_formula(&self, sheet: &str, cell: CellRef) -> Result<String> {
        self.with_sheet(sheet, |sheet| {
            sheet
                .get_cell((cell.col, cell.row))
                .filter(|cell| cell.is_formula())
                .map(|cell| normalize_formula(cell.get_formula()))
                .unwrap_or_default()
        })
    }
}

impl Release for WorkbookHandle {
    fn release(&self) -> Result<()> {
        let released = self.book.write().take();
        if released.is_none() {
            debug!(path = ?self.path, "workbook handle already released");
        }
        self.headers.clear();
        Ok(())
    }
}
