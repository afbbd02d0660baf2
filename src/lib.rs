pub mod compare;
pub mod config;
pub mod cycle;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod stats;
pub mod storage;
pub mod structs;

// Re-export public API
pub use compare::compare;
pub use config::{AppConfig, load_from_env};
pub use cycle::Tracker;
pub use error::{Result, WeatherError};
pub use fetch::{OpenWeatherMapSource, ReadingSource};
pub use ingest::{Ingestor, SkipReason};
pub use storage::HistoryStore;
pub use structs::{
    ComparisonResult, CycleReport, DeltaLabel, ExternalCityReading, Reading, SimpleLogger,
    Statistics, TempComparison, or_unknown,
};
