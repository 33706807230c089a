use crate::analysis::header::HeaderResolver;
use crate::error::{SessionError, is_handle_closed};
use crate::model::{CellRange, CellRef, FormulaRecord};
use crate::workbook::CellSource;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static CELL_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$?[A-Z]+\$?\d+").expect("valid cell reference pattern"));

/// Rewrites every cell reference in `formula` with the label `resolve` returns.
///
/// References that do not parse, or whose label is empty, are left untouched.
/// The formula is never evaluated.
pub fn translate_formula<F>(formula: &str, mut resolve: F) -> String
where
    F: FnMut(CellRef) -> Option<String>,
{
    CELL_REFERENCE
        .replace_all(formula, |caps: &regex::Captures<'_>| {
            let matched = &caps[0];
            matched
                .parse::<CellRef>()
                .ok()
                .and_then(&mut resolve)
                .filter(|label| !label.is_empty())
                .unwrap_or_else(|| matched.to_string())
        })
        .into_owned()
}

/// Formula extraction and labeling over one workbook.
pub struct FormulaTranslator<'a, S: CellSource + ?Sized> {
    source: &'a S,
    headers: &'a HeaderResolver,
}

impl<'a, S: CellSource + ?Sized> FormulaTranslator<'a, S> {
    pub fn new(source: &'a S, headers: &'a HeaderResolver) -> Self {
        Self { source, headers }
    }

    pub fn label_for(&self, sheet: &str, cell: CellRef) -> Result<String> {
        self.headers.label_for(self.source, sheet, cell)
    }

    pub fn translate(&self, sheet: &str, formula: &str) -> Result<String> {
        let mut failure = None;
        let translated = translate_formula(formula, |cell| {
            if failure.is_some() {
                return None;
            }
            self.label_for(sheet, cell)
                .map_err(|error| failure = Some(error))
                .ok()
        });
        match failure {
            Some(error) => Err(error),
            None => Ok(translated),
        }
    }

    /// Every formula cell in every sheet, sheets in workbook order.
    pub fn extract_all(&self) -> Result<Vec<FormulaRecord>> {
        let mut records = Vec::new();
        for sheet in self.source.sheet_names()? {
            records.extend(self.extract_sheet(&sheet)?);
        }
        Ok(records)
    }

    pub fn extract_sheet(&self, sheet: &str) -> Result<Vec<FormulaRecord>> {
        let used = self
            .source
            .used_range(sheet)
            .with_context(|| format!("failed to scan sheet '{sheet}' for formulas"))?;
        match used {
            Some(range) => self.collect(sheet, &range),
            None => Ok(Vec::new()),
        }
    }

    pub fn extract_range(&self, sheet: &str, range: &CellRange) -> Result<Vec<FormulaRecord>> {
        // surfaces SheetNotFound before walking the range
        self.source
            .used_range(sheet)
            .with_context(|| format!("failed to scan {sheet}!{range} for formulas"))?;
        self.collect(sheet, range)
    }

    /// Explains a single cell. Fails with [`SessionError::NoFormula`] when the
    /// cell holds a plain value.
    pub fn explain(&self, sheet: &str, cell: CellRef) -> Result<FormulaRecord> {
        let formula = self
            .source
            .cell_formula(sheet, cell)
            .with_context(|| format!("failed to read formula at {sheet}!{cell}"))?;
        if formula.is_empty() {
            return Err(SessionError::NoFormula {
                sheet: sheet.to_string(),
                cell: cell.to_string(),
            }
            .into());
        }
        let value = self
            .source
            .cell_value(sheet, cell)
            .with_context(|| format!("failed to read value at {sheet}!{cell}"))?;
        self.record(sheet, cell, formula, value)
    }

    /// Unreadable cells are skipped. A released handle aborts the scan so the
    /// caller can reopen rather than get a partial result.
    fn collect(&self, sheet: &str, range: &CellRange) -> Result<Vec<FormulaRecord>> {
        let mut records = Vec::new();
        for cell in range.cells() {
            let formula = match self.source.cell_formula(sheet, cell) {
                Ok(formula) if !formula.is_empty() => formula,
                Ok(_) => continue,
                Err(error) if is_handle_closed(&error) => return Err(error),
                Err(error) => {
                    debug!(sheet, %cell, %error, "skipping unreadable formula cell");
                    continue;
                }
            };
            let value = match self.source.cell_value(sheet, cell) {
                Ok(value) => value,
                Err(error) if is_handle_closed(&error) => return Err(error),
                Err(_) => String::new(),
            };
            records.push(self.record(sheet, cell, formula, value)?);
        }
        Ok(records)
    }

    fn record(
        &self,
        sheet: &str,
        cell: CellRef,
        formula: String,
        value: String,
    ) -> Result<FormulaRecord> {
        Ok(FormulaRecord {
            sheet: sheet.to_string(),
            cell: cell.to_string(),
            translated_formula: self.translate(sheet, &formula)?,
            raw_formula: formula,
            computed_value: value,
            label: self.label_for(sheet, cell)?,
        })
    }
}

/// Records whose translation differs from the raw formula.
pub fn translated(records: &[FormulaRecord]) -> Vec<&FormulaRecord> {
    records.iter().filter(|record| record.was_translated()).collect()
}

/// Records that resolved a label for their own cell.
pub fn labeled(records: &[FormulaRecord]) -> Vec<&FormulaRecord> {
    records
        .iter()
        .filter(|record| !record.label.is_empty())
        .collect()
}

/// Case-insensitive search over raw and translated formula text.
pub fn containing<'r>(records: &'r [FormulaRecord], needle: &str) -> Vec<&'r FormulaRecord> {
    let needle = needle.to_lowercase();
    records
        .iter()
        .filter(|record| {
            record.raw_formula.to_lowercase().contains(&needle)
                || record.translated_formula.to_lowercase().contains(&needle)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::header::tests::Grid;
    use crate::cache::HandleCache;
    use crate::config::CacheConfig;
    use crate::workbook::WorkbookHandle;
    use assert_matches::assert_matches;
    use std::path::Path;
    use std::sync::Arc;

    fn people() -> Grid {
        Grid::default()
            .sheet("Sheet1")
            .value("A1", "Name")
            .value("B1", "Age")
            .value("A2", "John")
            .value("B2", "30")
            .formula("C2", "=B2*2", "60")
            .value("A3", "Jane")
            .value("B3", "41")
            .formula("C3", "=$B$3+B2", "71")
            .sheet("Sheet2")
            .formula("A1", "=SUM(Z9:Z10)", "0")
    }

    fn at(addr: &str) -> CellRef {
        addr.parse().unwrap()
    }

    #[test]
    fn pure_translation_leaves_unresolved_references() {
        let out = translate_formula("=A1+$B$2*C3", |cell| match cell.to_string().as_str() {
            "A1" => Some("Price".to_string()),
            "B2" => Some("Rate".to_string()),
            _ => None,
        });
        assert_eq!(out, "=Price+Rate*C3");
    }

    #[test]
    fn unlabeled_references_translate_to_themselves() {
        let out = translate_formula("=SUM(D4:D9)/2", |_| Some(String::new()));
        assert_eq!(out, "=SUM(D4:D9)/2");
    }

    #[test]
    fn explains_a_single_cell() {
        let grid = people();
        let headers = HeaderResolver::default();
        let translator = FormulaTranslator::new(&grid, &headers);

        let record = translator.explain("Sheet1", at("C2")).unwrap();
        assert_eq!(record.raw_formula, "=B2*2");
        assert_eq!(record.translated_formula, "=Age*2");
        assert_eq!(record.computed_value, "60");
        assert_eq!(record.label, "John");
    }

    #[test]
    fn explaining_a_value_cell_fails() {
        let grid = people();
        let headers = HeaderResolver::default();
        let translator = FormulaTranslator::new(&grid, &headers);
        let err = translator.explain("Sheet1", at("B2")).unwrap_err();
        assert_matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::NoFormula { cell, .. }) if cell == "B2"
        );
    }

    #[test]
    fn extracts_across_sheets_and_ranges() {
        let grid = people();
        let headers = HeaderResolver::default();
        let translator = FormulaTranslator::new(&grid, &headers);

        let all = translator.extract_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].translated_formula, "=Age+Age");
        assert_eq!(all[2].sheet, "Sheet2");
        assert!(!all[2].was_translated());

        let range: CellRange = "C3:C9".parse().unwrap();
        let subset = translator.extract_range("Sheet1", &range).unwrap();
        assert_eq!(subset.len(), 1);
        assert_eq!(subset[0].cell, "C3");

        assert!(translator.extract_sheet("Nope").is_err());
    }

    /// Wraps a real workbook and flushes its cache on the second formula read.
    struct FlushMidScan<'a> {
        handle: &'a WorkbookHandle,
        cache: &'a HandleCache<WorkbookHandle>,
        formula_reads: std::cell::Cell<usize>,
    }

    impl CellSource for FlushMidScan<'_> {
        fn sheet_names(&self) -> Result<Vec<String>> {
            self.handle.sheet_names()
        }

        fn rows(&self, sheet: &str) -> Result<Vec<Vec<String>>> {
            self.handle.rows(sheet)
        }

        fn used_range(&self, sheet: &str) -> Result<Option<CellRange>> {
            self.handle.used_range(sheet)
        }

        fn cell_value(&self, sheet: &str, cell: CellRef) -> Result<String> {
            self.handle.cell_value(sheet, cell)
        }

        fn cell_formula(&self, sheet: &str, cell: CellRef) -> Result<String> {
            let reads = self.formula_reads.get() + 1;
            self.formula_reads.set(reads);
            if reads == 2 {
                self.cache.clear();
            }
            self.handle.cell_formula(sheet, cell)
        }
    }

    #[test]
    fn flush_during_a_scan_surfaces_the_released_handle() {
        let mut book = umya_spreadsheet::new_file();
        let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
        sheet.get_cell_mut("A1").set_value("Qty");
        sheet.get_cell_mut("A2").set_value_number(4);
        sheet.get_cell_mut("B2").set_formula("A2*2");
        let path = Path::new("scan.xlsx");
        let handle = Arc::new(WorkbookHandle::from_spreadsheet(path, book, 10));
        let cache = HandleCache::new(&CacheConfig::default());
        cache.put(path, handle.clone());

        let source = FlushMidScan {
            handle: &handle,
            cache: &cache,
            formula_reads: std::cell::Cell::new(0),
        };
        let err = FormulaTranslator::new(&source, handle.headers())
            .extract_sheet("Sheet1")
            .unwrap_err();
        assert_matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::HandleClosed(_))
        );
        assert!(handle.is_released());
        assert_eq!(handle.headers().memoized(), 0);
    }

    #[test]
    fn record_filters() {
        let grid = people();
        let headers = HeaderResolver::default();
        let records = FormulaTranslator::new(&grid, &headers).extract_all().unwrap();

        assert_eq!(translated(&records).len(), 2);
        assert_eq!(labeled(&records).len(), 2);
        let sums = containing(&records, "sum(");
        assert_eq!(sums.len(), 1);
        assert_eq!(sums[0].cell, "A1");
        assert_eq!(containing(&records, "AGE").len(), 2);
    }
}
