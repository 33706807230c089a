use crate::error::SessionError;
use crate::utils::{
    MAX_COLUMNS, MAX_ROWS, cell_address, column_name_to_number, column_number_to_name,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A 1-based cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub col: u32,
    pub row: u32,
}

impl CellRef {
    pub fn new(col: u32, row: u32) -> Result<Self, SessionError> {
        if col == 0 || col > MAX_COLUMNS || row == 0 || row > MAX_ROWS {
            return Err(SessionError::InvalidCellReference(cell_address(col, row)));
        }
        Ok(Self { col, row })
    }

    pub fn column_name(&self) -> String {
        column_number_to_name(self.col)
    }
}

impl FromStr for CellRef {
    type Err = SessionError;

    /// Parses `B2`, `$B$2` or `b2`. Absolute markers are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SessionError::InvalidCellReference(s.to_string());
        let cleaned: String = s
            .chars()
            .filter(|ch| *ch != '$' && !ch.is_whitespace())
            .collect();

        let split = cleaned
            .find(|ch: char| ch.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (letters, digits) = cleaned.split_at(split);
        if letters.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(invalid());
        }

        let col = column_name_to_number(letters).map_err(|_| invalid())?;
        let row: u32 = digits.parse().map_err(|_| invalid())?;
        CellRef::new(col, row).map_err(|_| invalid())
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&cell_address(self.col, self.row))
    }
}

/// Rectangular `A1:C3` range; `start` never lies after `end` on either axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    pub fn new(start: CellRef, end: CellRef) -> Result<Self, SessionError> {
        if start.col > end.col || start.row > end.row {
            return Err(SessionError::InvalidRange {
                range: format!("{start}:{end}"),
                reason: "start cell must precede end cell".to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn width(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    pub fn height(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    /// Row-major walk over every coordinate in the range.
    pub fn cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        (self.start.row..=self.end.row).flat_map(move |row| {
            (self.start.col..=self.end.col).map(move |col| CellRef { col, row })
        })
    }
}

impl FromStr for CellRange {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| SessionError::InvalidRange {
            range: s.to_string(),
            reason,
        };

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 {
            return Err(invalid("expected format 'A1:C3'".to_string()));
        }
        let start: CellRef = parts[0]
            .parse()
            .map_err(|err: SessionError| invalid(format!("invalid start cell: {err}")))?;
        let end: CellRef = parts[1]
            .parse()
            .map_err(|err: SessionError| invalid(format!("invalid end cell: {err}")))?;

        CellRange::new(start, end).map_err(|_| invalid("start cell must precede end cell".to_string()))
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Snapshot of one formula cell with its labeled rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaRecord {
    pub sheet: String,
    pub cell: String,
    pub raw_formula: String,
    pub computed_value: String,
    pub translated_formula: String,
    pub label: String,
}

impl FormulaRecord {
    /// True when at least one reference was replaced by a label.
    pub fn was_translated(&self) -> bool {
        !self.translated_formula.is_empty() && self.translated_formula != self.raw_formula
    }
}

impl fmt::Display for FormulaRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}!{}: {} = {}",
            self.sheet, self.cell, self.raw_formula, self.computed_value
        )?;
        if !self.label.is_empty() {
            write!(f, " ({})", self.label)?;
        }
        if self.was_translated() {
            write!(f, " | Translated: {}", self.translated_formula)?;
        }
        Ok(())
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    Empty,
    Integer,
    Number,
    Boolean,
    Date,
    Text,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetStatistics {
    pub row_count: usize,
    pub column_count: usize,
    pub non_empty_rows: usize,
    pub non_empty_cells: usize,
    pub data_types: BTreeMap<DataType, usize>,
    /// 1-based; 0 when the sheet holds no data.
    pub first_data_row: usize,
    pub last_data_row: usize,
    pub first_data_col: String,
    pub last_data_col: String,
}

impl SheetStatistics {
    pub fn count_of(&self, data_type: DataType) -> usize {
        self.data_types.get(&data_type).copied().unwrap_or(0)
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}
