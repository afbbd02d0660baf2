use chrono::{DateTime, Local, Utc};
use log::{Log, Metadata, Record as LogRecord};
use serde::{Serialize, Serializer};
use std::fmt;

/// Marker rendered in place of a value that is not known.
pub const UNKNOWN: &str = "--";

/// Simple logger implementation, writes to stderr so reports on stdout stay clean
pub struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &LogRecord) {
        eprintln!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Renders an optional value, or the unknown marker when absent.
pub fn or_unknown<T: fmt::Display>(value: Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => UNKNOWN.to_string(),
    }
}

/// Converts an already-rounded float to an integer. Non-finite values and
/// values outside the `i64` range yield `None` instead of saturating.
pub fn whole_number(value: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range
    (value.is_finite() && value >= i64::MIN as f64 && value < i64::MAX as f64)
        .then(|| value as i64)
}

/// Relative humidity, in percent, kept only when it lies in `0..=100`.
pub fn humidity_percent(value: i64) -> Option<i64> {
    (0..=100).contains(&value).then_some(value)
}

/// One weather observation for the home location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub city: String,
    pub state: Option<String>,
    pub temperature: Option<i64>,
    pub feels_like: Option<i64>,
    pub humidity: Option<i64>,
    pub description: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub date: Option<String>,
    pub time: Option<String>,
}

impl Reading {
    /// Builds a reading stamped at `at`, deriving the local date and time strings.
    pub fn observed_at(city: impl Into<String>, temperature: i64, at: DateTime<Utc>) -> Self {
        let local = at.with_timezone(&Local);
        Self {
            city: city.into(),
            state: None,
            temperature: Some(temperature),
            feels_like: None,
            humidity: None,
            description: None,
            timestamp: Some(at),
            date: Some(local.format("%Y-%m-%d").to_string()),
            time: Some(local.format("%H:%M:%S").to_string()),
        }
    }
}

/// Weather for a comparison city, taken from the first data row of one external file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalCityReading {
    pub source_file: String,
    pub city: String,
    pub state: Option<String>,
    pub temperature: i64,
    pub feels_like: Option<i64>,
    pub humidity: Option<i64>,
    pub description: Option<String>,
}

/// How an external city's temperature relates to the home reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempComparison {
    Warmer(i64),
    Cooler(i64),
    Same,
}

impl fmt::Display for TempComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TempComparison::Warmer(diff) => write!(f, "+{}°F warmer", diff),
            // diff is already negative
            TempComparison::Cooler(diff) => write!(f, "{}°F cooler", diff),
            TempComparison::Same => write!(f, "Same temperature"),
        }
    }
}

impl Serialize for TempComparison {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// External reading joined against the home reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    #[serde(flatten)]
    pub external: ExternalCityReading,
    pub temp_difference: Option<i64>,
    pub humidity_difference: Option<i64>,
    pub temp_comparison: Option<TempComparison>,
}

/// Change since the previous reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeltaLabel {
    Warmer(f64),
    Cooler(f64),
    NoChange,
    NoData,
}

impl fmt::Display for DeltaLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaLabel::Warmer(delta) => write!(f, "+{:.1}°F (warmer)", delta),
            DeltaLabel::Cooler(delta) => write!(f, "{:.1}°F (cooler)", delta),
            DeltaLabel::NoChange => write!(f, "No change"),
            DeltaLabel::NoData => write!(f, "No previous data"),
        }
    }
}

impl Serialize for DeltaLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Rolling statistics over recent history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub readings: usize,
    pub weekly_average: Option<f64>,
    pub min_temp: Option<i64>,
    pub max_temp: Option<i64>,
    pub previous_temperature: Option<i64>,
    pub delta: DeltaLabel,
}

/// Everything one refresh cycle produced
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub current: Reading,
    pub statistics: Statistics,
    pub comparisons: Vec<ComparisonResult>,
}
