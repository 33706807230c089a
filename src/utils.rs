use crate::error::SessionError;

/// Highest column an xlsx sheet can address (`XFD`).
pub const MAX_COLUMNS: u32 = 16_384;
/// Highest row an xlsx sheet can address.
pub const MAX_ROWS: u32 = 1_048_576;

pub fn column_number_to_name(column: u32) -> String {
    let mut column = column;
    let mut name = String::new();
    while column > 0 {
        let rem = ((column - 1) % 26) as u8;
        name.insert(0, (b'A' + rem) as char);
        column = (column - 1) / 26;
    }
    name
}

/// Converts column letters (`A`, `bc`, `XFD`) to a 1-based column number.
pub fn column_name_to_number(name: &str) -> Result<u32, SessionError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.len() > 3 {
        return Err(SessionError::InvalidColumn(name.to_string()));
    }

    let mut column = 0u32;
    for ch in trimmed.chars() {
        if !ch.is_ascii_alphabetic() {
            return Err(SessionError::InvalidColumn(name.to_string()));
        }
        column = column * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }

    if column > MAX_COLUMNS {
        return Err(SessionError::InvalidColumn(name.to_string()));
    }
    Ok(column)
}

pub fn cell_address(column: u32, row: u32) -> String {
    format!("{}{}", column_number_to_name(column), row)
}
