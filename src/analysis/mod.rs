pub mod formula;
pub mod header;
pub mod stats;

pub use formula::{FormulaTranslator, translate_formula};
pub use header::HeaderResolver;
pub use stats::{classify_data_type, compute_statistics};
