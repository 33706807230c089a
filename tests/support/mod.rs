#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use spreadsheet_session::{CacheConfig, SessionConfig, SessionManager};
use tempfile::{TempDir, tempdir};
use umya_spreadsheet::{self, Spreadsheet};

pub fn write_workbook_to_path<F>(path: &Path, f: F)
where
    F: FnOnce(&mut Spreadsheet),
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create dir");
    }
    let mut book = umya_spreadsheet::new_file();
    f(&mut book);
    umya_spreadsheet::writer::xlsx::write(&book, path).expect("write workbook");
}

/// Sheet1 holds a small people table with `C2 = B2*2`; Sheet2 holds one
/// unlabeled formula.
pub fn people_workbook(book: &mut Spreadsheet) {
    let sheet = book.get_sheet_by_name_mut("Sheet1").expect("default sheet");
    sheet.get_cell_mut("A1").set_value("Name");
    sheet.get_cell_mut("B1").set_value("Age");
    sheet.get_cell_mut("A2").set_value("John");
    sheet.get_cell_mut("B2").set_value_number(30);
    let c2 = sheet.get_cell_mut("C2");
    c2.set_formula("B2*2");
    c2.set_formula_result_default("60");
    sheet.get_cell_mut("A3").set_value("Jane");
    sheet.get_cell_mut("B3").set_value_number(41);

    let other = book.new_sheet("Sheet2").expect("add sheet");
    other.get_cell_mut("B5").set_value_number(7);
    let a7 = other.get_cell_mut("A7");
    a7.set_formula("B5+1");
    a7.set_formula_result_default("8");
}

pub struct TestWorkspace {
    _tempdir: TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let tempdir = tempdir().expect("tempdir");
        let root = tempdir.path().to_path_buf();
        Self {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn create_workbook<F>(&self, name: &str, f: F) -> PathBuf
    where
        F: FnOnce(&mut Spreadsheet),
    {
        let path = self.path(name);
        write_workbook_to_path(&path, f);
        path
    }

    pub fn people(&self, name: &str) -> PathBuf {
        self.create_workbook(name, people_workbook)
    }
}

pub fn config(max_size: usize, ttl: Duration) -> SessionConfig {
    SessionConfig {
        cache: CacheConfig { max_size, ttl },
        ..SessionConfig::default()
    }
}

pub fn manager() -> SessionManager {
    SessionManager::new(SessionConfig::default()).expect("session manager")
}

pub fn manager_with(config: SessionConfig) -> SessionManager {
    SessionManager::new(config).expect("session manager")
}
