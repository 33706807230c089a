use crate::analysis::header::DEFAULT_HEADER_SEARCH_DEPTH;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CACHE_MAX_SIZE: usize = 10;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

pub const CACHE_MAX_SIZE_ENV: &str = "EXCEL_CACHE_MAX_SIZE";
pub const CACHE_TTL_MINUTES_ENV: &str = "EXCEL_CACHE_TTL_MINUTES";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_CACHE_MAX_SIZE,
            ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. Values that are
    /// missing, unparsable or not positive fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(max_size) = positive(lookup(CACHE_MAX_SIZE_ENV)) {
            config.max_size = max_size as usize;
        }
        if let Some(ttl) =
            positive(lookup(CACHE_TTL_MINUTES_ENV)).and_then(minutes_to_duration)
        {
            config.ttl = ttl;
        }
        config
    }
}

fn positive(raw: Option<String>) -> Option<u64> {
    raw?.trim().parse::<u64>().ok().filter(|value| *value > 0)
}

/// `None` when the minute count does not fit in a `Duration` of seconds.
fn minutes_to_duration(minutes: u64) -> Option<Duration> {
    minutes.checked_mul(60).map(Duration::from_secs)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub cache: CacheConfig,
    /// How often the background sweep evicts expired handles.
    pub cleanup_interval: Duration,
    pub header_search_depth: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            header_search_depth: DEFAULT_HEADER_SEARCH_DEPTH,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self {
            cache: CacheConfig::from_env(),
            ..Self::default()
        }
    }

    pub fn from_args(args: &CliArgs) -> Result<Self> {
        Self::from_sources(&args.overrides, args.config.as_deref(), |name| {
            std::env::var(name).ok()
        })
    }

    /// Layers CLI overrides over an optional config file over the environment.
    pub fn from_sources<F>(
        overrides: &CacheOverrides,
        config_file: Option<&Path>,
        lookup: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = CacheConfig::from_lookup(lookup);
        let file = match config_file {
            Some(path) => load_config_file(path)?,
            None => PartialConfig::default(),
        };

        let PartialConfig {
            cache_size: file_cache_size,
            cache_ttl_minutes: file_cache_ttl,
            cleanup_interval_secs: file_cleanup_interval,
            header_search_depth: file_header_depth,
        } = file;

        let max_size = overrides
            .cache_size
            .filter(|size| *size > 0)
            .or(file_cache_size.filter(|size| *size > 0))
            .unwrap_or(env.max_size);

        let ttl = overrides
            .cache_ttl
            .filter(|minutes| *minutes > 0)
            .or(file_cache_ttl.filter(|minutes| *minutes > 0))
            .and_then(minutes_to_duration)
            .unwrap_or(env.ttl);

        let cleanup_interval = file_cleanup_interval
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CLEANUP_INTERVAL);

        let header_search_depth = overrides
            .header_depth
            .filter(|depth| *depth > 0)
            .or(file_header_depth.filter(|depth| *depth > 0))
            .unwrap_or(DEFAULT_HEADER_SEARCH_DEPTH);

        Ok(Self {
            cache: CacheConfig { max_size, ttl },
            cleanup_interval,
            header_search_depth,
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "spreadsheet-session",
    about = "Inspect spreadsheets and explain their formulas",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: CacheOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Default, Clone)]
pub struct CacheOverrides {
    #[arg(
        long,
        value_name = "N",
        help = "Maximum number of workbooks kept open",
        global = true
    )]
    pub cache_size: Option<usize>,

    #[arg(
        long,
        value_name = "MINUTES",
        help = "Minutes an idle workbook stays cached",
        global = true
    )]
    pub cache_ttl: Option<u64>,

    #[arg(
        long,
        value_name = "N",
        help = "How far to search above or left of a cell for its header",
        global = true
    )]
    pub header_depth: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct SheetArg {
    #[arg(long, short, help = "Sheet to read (defaults to the first sheet)")]
    pub sheet: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the workbook's sheets
    Sheets { file: PathBuf },
    /// Column letters of the first row
    Columns {
        file: PathBuf,
        #[command(flatten)]
        sheet: SheetArg,
    },
    /// Number of rows in a sheet
    Rows {
        file: PathBuf,
        #[command(flatten)]
        sheet: SheetArg,
    },
    /// Row, cell and data type statistics for a sheet
    Stats {
        file: PathBuf,
        #[command(flatten)]
        sheet: SheetArg,
    },
    /// Value of one cell
    Cell {
        file: PathBuf,
        cell: String,
        #[command(flatten)]
        sheet: SheetArg,
    },
    /// Values of an A1:C3 range
    Range {
        file: PathBuf,
        range: String,
        #[command(flatten)]
        sheet: SheetArg,
    },
    /// Every value in a column
    Column {
        file: PathBuf,
        column: String,
        #[command(flatten)]
        sheet: SheetArg,
    },
    /// Every value in a 1-based row
    Row {
        file: PathBuf,
        row: u32,
        #[command(flatten)]
        sheet: SheetArg,
    },
    /// Extract formulas with their labeled translations
    Formulas {
        file: PathBuf,
        #[arg(long, short, help = "Restrict to one sheet")]
        sheet: Option<String>,
        #[arg(long, requires = "sheet", help = "Restrict to an A1:C3 range")]
        range: Option<String>,
        #[arg(long, help = "Only formulas whose translation differs")]
        translated_only: bool,
        #[arg(long, help = "Only formulas whose cell has a label")]
        labeled_only: bool,
        #[arg(long, value_name = "TEXT", help = "Only formulas containing TEXT")]
        containing: Option<String>,
        #[arg(long, help = "Print one line per formula instead of JSON")]
        plain: bool,
    },
    /// Explain the formula in one cell
    Explain {
        file: PathBuf,
        cell: String,
        #[command(flatten)]
        sheet: SheetArg,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    cache_size: Option<usize>,
    cache_ttl_minutes: Option<u64>,
    cleanup_interval_secs: Option<u64>,
    header_search_depth: Option<u32>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
