mod support;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use spreadsheet_session::{DataType, ErrorCode, SessionConfig, SessionError, error_code};
use support::TestWorkspace;

fn session_error(error: &anyhow::Error) -> Option<&SessionError> {
    error.downcast_ref::<SessionError>()
}

#[tokio::test]
async fn explains_a_formula_with_labels() {
    let workspace = TestWorkspace::new();
    let path = workspace.people("people.xlsx");
    let manager = support::manager();

    let record = manager
        .explain_formula(&path, "C2", Some("Sheet1"))
        .await
        .expect("explain C2");
    assert_eq!(record.sheet, "Sheet1");
    assert_eq!(record.cell, "C2");
    assert_eq!(record.raw_formula, "=B2*2");
    assert_eq!(record.translated_formula, "=Age*2");
    assert_eq!(record.label, "John");
    assert!(record.was_translated());
}

#[tokio::test]
async fn explain_requires_a_formula() {
    let workspace = TestWorkspace::new();
    let path = workspace.people("people.xlsx");
    let manager = support::manager();

    let err = manager
        .explain_formula(&path, "B2", None)
        .await
        .unwrap_err();
    assert_matches!(session_error(&err), Some(SessionError::NoFormula { .. }));
    assert_eq!(error_code(&err), ErrorCode::FormulaNotFound);

    let err = manager
        .explain_formula(&path, "not-a-cell", None)
        .await
        .unwrap_err();
    assert_matches!(
        session_error(&err),
        Some(SessionError::InvalidCellReference(_))
    );
}

#[tokio::test]
async fn extracts_formulas_by_scope() {
    let workspace = TestWorkspace::new();
    let path = workspace.people("people.xlsx");
    let manager = support::manager();

    let all = manager.explain_formulas(&path).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].cell, "C2");
    assert_eq!(all[1].sheet, "Sheet2");
    assert_eq!(all[1].raw_formula, "=B5+1");
    assert_eq!(all[1].translated_formula, all[1].raw_formula);

    let sheet2 = manager
        .explain_sheet_formulas(&path, Some("Sheet2"))
        .await
        .unwrap();
    assert_eq!(sheet2.len(), 1);

    let current = manager.explain_sheet_formulas(&path, None).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].sheet, "Sheet1");

    let none = manager
        .explain_range_formulas(&path, "A1:B3", Some("Sheet1"))
        .await
        .unwrap();
    assert!(none.is_empty());

    let column_c = manager
        .explain_range_formulas(&path, "C1:C3", None)
        .await
        .unwrap();
    assert_eq!(column_c.len(), 1);

    let err = manager
        .explain_range_formulas(&path, "C3:A1", None)
        .await
        .unwrap_err();
    assert_matches!(session_error(&err), Some(SessionError::InvalidRange { .. }));
}

#[tokio::test]
async fn sheet_selection_is_validated() {
    let workspace = TestWorkspace::new();
    let path = workspace.people("people.xlsx");
    let manager = support::manager();

    assert_eq!(manager.current_sheet(&path).await.unwrap(), "Sheet1");

    let err = manager.select_sheet(&path, "Missing").await.unwrap_err();
    assert_matches!(
        session_error(&err),
        Some(SessionError::SheetNotFound { available, .. })
            if available == &vec!["Sheet1".to_string(), "Sheet2".to_string()]
    );
    assert!(err.to_string().contains("Sheet1, Sheet2"));

    // exact, case-sensitive match
    assert!(manager.select_sheet(&path, "sheet2").await.is_err());

    manager.select_sheet(&path, "Sheet2").await.unwrap();
    assert_eq!(manager.current_sheet(&path).await.unwrap(), "Sheet2");
    assert_eq!(manager.row_count(&path, None).await.unwrap(), 7);

    manager.select_sheet(&path, "Sheet1").await.unwrap();
    assert_eq!(manager.current_sheet(&path).await.unwrap(), "Sheet1");
}

#[tokio::test]
async fn computes_sheet_statistics() {
    let workspace = TestWorkspace::new();
    let path = workspace.create_workbook("table.xlsx", |book| {
        let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
        sheet.get_cell_mut("A1").set_value("Name");
        sheet.get_cell_mut("B1").set_value("Age");
        sheet.get_cell_mut("C1").set_value("City");
        sheet.get_cell_mut("A2").set_value("John");
        sheet.get_cell_mut("B2").set_value_number(30);
        sheet.get_cell_mut("C2").set_value("Boston");
        sheet.get_cell_mut("A3").set_value("Jane");
        sheet.get_cell_mut("B3").set_value_number(41);
        sheet.get_cell_mut("C3").set_value("Denver");
    });
    let manager = support::manager();

    let stats = manager.sheet_stats(&path, None).await.unwrap();
    assert_eq!(stats.row_count, 3);
    assert_eq!(stats.column_count, 3);
    assert_eq!(stats.non_empty_rows, 3);
    assert_eq!(stats.non_empty_cells, 9);
    assert_eq!(stats.first_data_row, 1);
    assert_eq!(stats.last_data_row, 3);
    assert_eq!(stats.first_data_col, "A");
    assert_eq!(stats.last_data_col, "C");
    assert_eq!(stats.count_of(DataType::Text), 7);
    assert_eq!(stats.count_of(DataType::Integer), 2);

    let err = manager
        .sheet_stats(&path, Some("Nope"))
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), ErrorCode::SheetNotFound);
}

#[tokio::test]
async fn reads_cells_rows_and_columns() {
    let workspace = TestWorkspace::new();
    let path = workspace.people("people.xlsx");
    let manager = support::manager();

    assert_eq!(
        manager.sheet_names(&path).await.unwrap(),
        vec!["Sheet1".to_string(), "Sheet2".to_string()]
    );
    assert_eq!(manager.columns(&path, None).await.unwrap(), vec!["A", "B"]);
    assert_eq!(manager.row_count(&path, None).await.unwrap(), 3);
    assert_eq!(manager.cell_value(&path, "B2", None).await.unwrap(), "30");
    assert_eq!(manager.cell_value(&path, "$A$3", None).await.unwrap(), "Jane");
    assert_eq!(manager.cell_value(&path, "Z99", None).await.unwrap(), "");

    assert_eq!(
        manager.range_values(&path, "A1:B2", None).await.unwrap(),
        vec![vec!["Name", "Age"], vec!["John", "30"]]
    );
    assert_eq!(
        manager.column_values(&path, "b", None).await.unwrap(),
        vec!["Age", "30", "41"]
    );
    assert_eq!(
        manager.column_values(&path, "E", None).await.unwrap(),
        vec!["", "", ""]
    );
    assert_eq!(
        manager.row_values(&path, 1, None).await.unwrap(),
        vec!["Name", "Age"]
    );

    let err = manager.row_values(&path, 0, None).await.unwrap_err();
    assert_matches!(session_error(&err), Some(SessionError::InvalidRow));
    let err = manager.row_values(&path, 9, None).await.unwrap_err();
    assert_matches!(
        session_error(&err),
        Some(SessionError::RowOutOfBounds {
            row: 9,
            available: 3
        })
    );
    let err = manager
        .column_values(&path, "A1", None)
        .await
        .unwrap_err();
    assert_matches!(session_error(&err), Some(SessionError::InvalidColumn(_)));
}

#[tokio::test]
async fn empty_sheet_has_no_columns() {
    let workspace = TestWorkspace::new();
    let path = workspace.create_workbook("blank.xlsx", |_| {});
    let manager = support::manager();

    assert_eq!(manager.row_count(&path, None).await.unwrap(), 0);
    let err = manager.columns(&path, None).await.unwrap_err();
    assert_matches!(session_error(&err), Some(SessionError::EmptySheet(_)));
    assert!(manager.explain_formulas(&path).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_files_are_reported() {
    let workspace = TestWorkspace::new();
    let manager = support::manager();

    let err = manager
        .open_file(workspace.path("absent.xlsx"))
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), ErrorCode::WorkbookNotFound);

    let bogus = workspace.path("bogus.xlsx");
    std::fs::write(&bogus, b"not a workbook").unwrap();
    assert!(manager.open_file(&bogus).await.is_err());
    assert_eq!(manager.cache_stats().size, 0);
}

#[tokio::test]
async fn reopening_hits_the_cache() {
    let workspace = TestWorkspace::new();
    let path = workspace.people("people.xlsx");
    let manager = support::manager();

    let first = manager.open_file(&path).await.unwrap();
    let second = manager.open_file(&path).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let stats = manager.cache_stats();
    assert_eq!(stats.size, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn flush_releases_handles_and_selections() {
    let workspace = TestWorkspace::new();
    let first = workspace.people("first.xlsx");
    let second = workspace.people("second.xlsx");
    let manager = support::manager();

    let handle = manager.open_file(&first).await.unwrap();
    manager.select_sheet(&second, "Sheet2").await.unwrap();
    assert_eq!(manager.cache_stats().size, 2);

    assert_eq!(manager.flush(), 2);
    assert_eq!(manager.cache_stats().size, 0);
    assert!(handle.is_released());
    assert_eq!(manager.current_sheet(&second).await.unwrap(), "Sheet1");
    assert_eq!(manager.flush(), 1);
}

#[tokio::test]
async fn eviction_drops_the_sheet_selection() {
    let workspace = TestWorkspace::new();
    let first = workspace.people("first.xlsx");
    let second = workspace.people("second.xlsx");
    let manager = support::manager_with(support::config(1, Duration::from_secs(300)));

    manager.select_sheet(&first, "Sheet2").await.unwrap();
    manager.open_file(&second).await.unwrap();

    let stats = manager.cache_stats();
    assert_eq!(stats.size, 1);
    assert_eq!(stats.evictions, 1);
    assert_eq!(manager.current_sheet(&first).await.unwrap(), "Sheet1");
}

#[tokio::test]
async fn shrinking_capacity_evicts_least_recent() {
    let workspace = TestWorkspace::new();
    let paths: Vec<_> = ["a.xlsx", "b.xlsx", "c.xlsx"]
        .iter()
        .map(|name| workspace.people(name))
        .collect();
    let manager = support::manager();
    for path in &paths {
        manager.open_file(path).await.unwrap();
    }
    manager.open_file(&paths[0]).await.unwrap();

    manager.set_cache_capacity(2);
    let cached = manager.cached_paths();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[0], std::fs::canonicalize(&paths[0]).unwrap());
    assert_eq!(cached[1], std::fs::canonicalize(&paths[2]).unwrap());
}

#[tokio::test]
async fn background_sweep_expires_idle_workbooks() {
    let workspace = TestWorkspace::new();
    let path = workspace.people("people.xlsx");
    let manager = support::manager_with(SessionConfig {
        cleanup_interval: Duration::from_millis(20),
        ..support::config(4, Duration::from_millis(50))
    });

    let handle = manager.open_file(&path).await.unwrap();
    drop(handle);
    assert_eq!(manager.cache_stats().size, 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(manager.cache_stats().size, 0);
    assert!(manager.cache_stats().evictions >= 1);
}

#[tokio::test]
async fn shutdown_stops_the_sweep() {
    let workspace = TestWorkspace::new();
    let path = workspace.people("people.xlsx");
    let manager = support::manager();

    let handle = manager.open_file(&path).await.unwrap();
    assert!(!manager.sweeper_finished());

    manager.shutdown().await.unwrap();
    assert!(manager.sweeper_finished());
    assert!(handle.is_released());
    assert_eq!(manager.cache_stats().size, 0);

    // shutting down twice is harmless
    manager.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_share_one_handle() {
    let workspace = TestWorkspace::new();
    let path = workspace.people("people.xlsx");
    let manager = Arc::new(support::manager());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            let path = path.clone();
            tokio::spawn(async move { manager.open_file(&path).await })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }
    assert_eq!(manager.cache_stats().size, 1);

    let cached = manager.open_file(&path).await.unwrap();
    assert!(handles.iter().all(|handle| Arc::ptr_eq(handle, &cached)));
    assert!(!cached.is_released());
}

#[test]
fn manager_requires_a_runtime() {
    assert!(spreadsheet_session::SessionManager::new(SessionConfig::default()).is_err());
}
