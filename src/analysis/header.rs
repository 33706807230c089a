use crate::error::is_handle_closed;
use crate::model::CellRef;
use crate::workbook::CellSource;
use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

pub const DEFAULT_HEADER_SEARCH_DEPTH: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SearchDirection {
    Column,
    Row,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HeaderKey {
    sheet: String,
    direction: SearchDirection,
    col: u32,
    row: u32,
}

/// Finds the nearest text label above or to the left of a cell.
///
/// Searches stop after `max_depth` cells. Every lookup is memoized, misses
/// included, until [`HeaderResolver::clear`] is called.
#[derive(Debug)]
pub struct HeaderResolver {
    max_depth: u32,
    memo: RwLock<HashMap<HeaderKey, Option<String>>>,
}

impl Default for HeaderResolver {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_SEARCH_DEPTH)
    }
}

impl HeaderResolver {
    pub fn new(max_depth: u32) -> Self {
        Self {
            max_depth,
            memo: RwLock::new(HashMap::new()),
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Column header first, then row header. Empty when neither exists.
    pub fn label_for<S: CellSource + ?Sized>(
        &self,
        source: &S,
        sheet: &str,
        cell: CellRef,
    ) -> Result<String> {
        if let Some(label) = self.search_column_upward(source, sheet, cell)? {
            return Ok(label);
        }
        Ok(self
            .search_row_leftward(source, sheet, cell)?
            .unwrap_or_default())
    }

    pub fn search_column_upward<S: CellSource + ?Sized>(
        &self,
        source: &S,
        sheet: &str,
        cell: CellRef,
    ) -> Result<Option<String>> {
        self.memoized_search(sheet, SearchDirection::Column, cell, || {
            let floor = search_floor(cell.row, self.max_depth);
            for row in (floor..cell.row).rev() {
                if let Some(text) = header_text(source, sheet, CellRef { col: cell.col, row })? {
                    return Ok(Some(text));
                }
            }
            Ok(None)
        })
    }

    pub fn search_row_leftward<S: CellSource + ?Sized>(
        &self,
        source: &S,
        sheet: &str,
        cell: CellRef,
    ) -> Result<Option<String>> {
        self.memoized_search(sheet, SearchDirection::Row, cell, || {
            let floor = search_floor(cell.col, self.max_depth);
            for col in (floor..cell.col).rev() {
                if let Some(text) = header_text(source, sheet, CellRef { col, row: cell.row })? {
                    return Ok(Some(text));
                }
            }
            Ok(None)
        })
    }

    /// Number of memoized lookups, hits and misses alike.
    pub fn memoized(&self) -> usize {
        self.memo.read().len()
    }

    pub fn clear(&self) {
        self.memo.write().clear();
    }

    fn memoized_search<F>(
        &self,
        sheet: &str,
        direction: SearchDirection,
        cell: CellRef,
        search: F,
    ) -> Result<Option<String>>
    where
        F: FnOnce() -> Result<Option<String>>,
    {
        let key = HeaderKey {
            sheet: sheet.to_string(),
            direction,
            col: cell.col,
            row: cell.row,
        };
        if let Some(found) = self.memo.read().get(&key) {
            return Ok(found.clone());
        }

        // nothing is memoized when the search failed
        let found = search()?;
        self.memo.write().insert(key, found.clone());
        Ok(found)
    }
}

fn search_floor(position: u32, depth: u32) -> u32 {
    position.saturating_sub(depth).max(1)
}

/// Trimmed cell text if it reads as a header. Unreadable cells count as blank;
/// a released handle does not.
fn header_text<S: CellSource + ?Sized>(
    source: &S,
    sheet: &str,
    cell: CellRef,
) -> Result<Option<String>> {
    let value = match source.cell_value(sheet, cell) {
        Ok(value) => value,
        Err(error) if is_handle_closed(&error) => return Err(error),
        Err(_) => return Ok(None),
    };
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.parse::<f64>().is_ok() {
        return Ok(None);
    }
    Ok(Some(trimmed.to_string()))
}
