use crate::model::{DataType, SheetStatistics};
use crate::utils::column_number_to_name;

/// Tags a cell's text. The checks run in a fixed order, so `"1"` is an
/// integer rather than a number and `"2024-01-15"` is a date only because it
/// fails both numeric parses first.
pub fn classify_data_type(value: &str) -> DataType {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return DataType::Empty;
    }
    if trimmed.parse::<i64>().is_ok() {
        return DataType::Integer;
    }
    if trimmed.parse::<f64>().is_ok() {
        return DataType::Number;
    }
    if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
        return DataType::Boolean;
    }
    if trimmed.len() >= 8 && (trimmed.contains('/') || trimmed.contains('-')) {
        return DataType::Date;
    }
    DataType::Text
}

/// Single pass over row-major cell text.
pub fn compute_statistics(rows: &[Vec<String>]) -> SheetStatistics {
    let mut stats = SheetStatistics {
        row_count: rows.len(),
        ..SheetStatistics::default()
    };

    let mut first_col: Option<usize> = None;
    let mut last_col: Option<usize> = None;

    for (row_idx, row) in rows.iter().enumerate() {
        stats.column_count = stats.column_count.max(row.len());

        let mut occupied = row
            .iter()
            .enumerate()
            .filter(|(_, cell)| !cell.trim().is_empty())
            .peekable();
        let Some(&(row_first, _)) = occupied.peek() else {
            continue;
        };

        let mut row_last = row_first;
        for (col_idx, cell) in occupied {
            stats.non_empty_cells += 1;
            *stats.data_types.entry(classify_data_type(cell)).or_insert(0) += 1;
            row_last = col_idx;
        }

        stats.non_empty_rows += 1;
        if stats.first_data_row == 0 {
            stats.first_data_row = row_idx + 1;
        }
        stats.last_data_row = row_idx + 1;
        first_col = Some(first_col.map_or(row_first, |col| col.min(row_first)));
        last_col = Some(last_col.map_or(row_last, |col| col.max(row_last)));
    }

    if let Some(col) = first_col {
        stats.first_data_col = column_number_to_name(col as u32 + 1);
    }
    if let Some(col) = last_col {
        stats.last_data_col = column_number_to_name(col as u32 + 1);
    }
    stats
}
