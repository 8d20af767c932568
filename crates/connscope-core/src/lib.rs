pub mod models;
pub mod classify;
pub mod timestamp;
pub mod stats;
pub mod dimensions;
pub mod detect;
pub mod analyzer;
pub mod threatintel;
pub mod config;
pub mod ingest;
pub mod report;

pub use analyzer::{summary_text, LogAnalyzer};
pub use config::Config;
pub use models::{AnalysisResult, Record};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
