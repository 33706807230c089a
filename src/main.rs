use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use spreadsheet_session::analysis::formula::{containing, labeled, translated};
use spreadsheet_session::{
    CliArgs, Command, LoggingConfig, SessionConfig, SessionManager, error_code, init_logging,
};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let _guard = match init_logging(LoggingConfig::from_env()) {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("error: {error:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let code = error_code(&error);
            tracing::error!(code = code.code(), category = code.category(), "{error:#}");
            eprintln!("error [{code}]: {error:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: CliArgs) -> Result<()> {
    let config = SessionConfig::from_args(&cli)?;
    let manager = SessionManager::new(config)?;
    let outcome = dispatch(&manager, cli.command).await;
    manager.shutdown().await?;
    outcome
}

async fn dispatch(manager: &SessionManager, command: Command) -> Result<()> {
    match command {
        Command::Sheets { file } => print_json(&manager.sheet_names(&file).await?),
        Command::Columns { file, sheet } => {
            print_json(&manager.columns(&file, sheet.sheet.as_deref()).await?)
        }
        Command::Rows { file, sheet } => {
            print_json(&manager.row_count(&file, sheet.sheet.as_deref()).await?)
        }
        Command::Stats { file, sheet } => {
            print_json(&manager.sheet_stats(&file, sheet.sheet.as_deref()).await?)
        }
        Command::Cell { file, cell, sheet } => print_json(
            &manager
                .cell_value(&file, &cell, sheet.sheet.as_deref())
                .await?,
        ),
        Command::Range { file, range, sheet } => print_json(
            &manager
                .range_values(&file, &range, sheet.sheet.as_deref())
                .await?,
        ),
        Command::Column {
            file,
            column,
            sheet,
        } => print_json(
            &manager
                .column_values(&file, &column, sheet.sheet.as_deref())
                .await?,
        ),
        Command::Row { file, row, sheet } => print_json(
            &manager
                .row_values(&file, row, sheet.sheet.as_deref())
                .await?,
        ),
        Command::Formulas {
            file,
            sheet,
            range,
            translated_only,
            labeled_only,
            containing: needle,
            plain,
        } => {
            let records = match (range, sheet) {
                (Some(range), sheet) => {
                    manager
                        .explain_range_formulas(&file, &range, sheet.as_deref())
                        .await?
                }
                (None, Some(sheet)) => manager.explain_sheet_formulas(&file, Some(&sheet)).await?,
                (None, None) => manager.explain_formulas(&file).await?,
            };

            let mut selected: Vec<_> = records.iter().collect();
            if translated_only {
                let keep = translated(&records);
                selected.retain(|record| keep.contains(record));
            }
            if labeled_only {
                let keep = labeled(&records);
                selected.retain(|record| keep.contains(record));
            }
            if let Some(needle) = needle.as_deref() {
                let keep = containing(&records, needle);
                selected.retain(|record| keep.contains(record));
            }

            if plain {
                for record in selected {
                    println!("{record}");
                }
                Ok(())
            } else {
                print_json(&selected)
            }
        }
        Command::Explain { file, cell, sheet } => print_json(
            &manager
                .explain_formula(&file, &cell, sheet.sheet.as_deref())
                .await?,
        ),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
