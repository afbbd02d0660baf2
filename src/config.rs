//! Runtime configuration for the tracker.
//!
//! Values come from environment variables (the binary loads an optional
//! `.env` first) layered over defaults, and the resulting [`AppConfig`] is
//! handed to every component at construction. Nothing below this module
//! reads the environment.
use std::path::{Path, PathBuf};

use crate::error::{Result, WeatherError};

pub const PLACEHOLDER_API_KEY: &str = "your_api_key_here";
pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
pub const DEFAULT_DATA_FILE: &str = "data/weather_data.csv";

/// Parse an optional numeric variable, falling back to a default.
macro_rules! parse_var {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| WeatherError::Config(format!("Invalid {}: {}", $var_name, e)))?
            .unwrap_or($default)
    };
}

/// Read an optional string variable, treating blank values as unset.
macro_rules! string_var {
    ($lookup:expr, $var_name:expr) => {
        $lookup($var_name).filter(|v: &String| !v.trim().is_empty())
    };
}

/// Application configuration, immutable once loaded.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // ---
    /// OpenWeatherMap API key. `None` or the placeholder blocks fetching.
    pub api_key: Option<String>,

    /// Current-weather endpoint.
    pub base_url: String,

    pub city: String,
    pub state: String,
    pub country: String,

    /// CSV file holding the bounded history.
    pub data_file: PathBuf,

    /// Directory scanned for comparison files.
    pub comparison_dir: PathBuf,

    /// Auto-refresh period in milliseconds.
    pub refresh_interval_ms: u64,

    /// Maximum number of readings kept in history.
    pub history_capacity: usize,

    /// Window, in days, used for statistics.
    pub recent_days: i64,

    pub request_timeout_secs: u64,

    /// File extensions (lowercase, no dot) treated as tabular data.
    pub extensions: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_file = PathBuf::from(DEFAULT_DATA_FILE);
        let comparison_dir = parent_dir(&data_file);
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            city: "Sacramento".to_string(),
            state: "CA".to_string(),
            country: "US".to_string(),
            data_file,
            comparison_dir,
            refresh_interval_ms: 300_000,
            history_capacity: 100,
            recent_days: 7,
            request_timeout_secs: 10,
            extensions: vec!["csv".to_string(), "tsv".to_string()],
        }
    }
}

/// Load configuration from the process environment.
///
/// Recognized variables: `WEATHER_API_KEY`, `WEATHER_BASE_URL`,
/// `WEATHER_CITY`, `WEATHER_STATE`, `WEATHER_COUNTRY`, `WEATHER_DATA_FILE`,
/// `WEATHER_COMPARISON_DIR`, `WEATHER_REFRESH_INTERVAL_MS`,
/// `WEATHER_HISTORY_CAPACITY`, `WEATHER_RECENT_DAYS`,
/// `WEATHER_REQUEST_TIMEOUT_SECS`.
///
/// Returns an error if a numeric variable does not parse.
pub fn load_from_env() -> Result<AppConfig> {
    load_from(|name| std::env::var(name).ok())
}

/// Load configuration through an arbitrary variable lookup.
pub fn load_from<F>(lookup: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let defaults = AppConfig::default();

    let data_file = string_var!(lookup, "WEATHER_DATA_FILE")
        .map(PathBuf::from)
        .unwrap_or(defaults.data_file);
    let comparison_dir = string_var!(lookup, "WEATHER_COMPARISON_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| parent_dir(&data_file));

    let history_capacity = parse_var!(lookup, "WEATHER_HISTORY_CAPACITY", usize, 100);
    if history_capacity == 0 {
        return Err(WeatherError::Config(
            "WEATHER_HISTORY_CAPACITY must be at least 1".to_string(),
        ));
    }

    Ok(AppConfig {
        api_key: string_var!(lookup, "WEATHER_API_KEY"),
        base_url: string_var!(lookup, "WEATHER_BASE_URL").unwrap_or(defaults.base_url),
        city: string_var!(lookup, "WEATHER_CITY").unwrap_or(defaults.city),
        state: string_var!(lookup, "WEATHER_STATE").unwrap_or(defaults.state),
        country: string_var!(lookup, "WEATHER_COUNTRY").unwrap_or(defaults.country),
        data_file,
        comparison_dir,
        refresh_interval_ms: parse_var!(lookup, "WEATHER_REFRESH_INTERVAL_MS", u64, 300_000),
        history_capacity,
        recent_days: parse_var!(lookup, "WEATHER_RECENT_DAYS", i64, 7),
        request_timeout_secs: parse_var!(lookup, "WEATHER_REQUEST_TIMEOUT_SECS", u64, 10),
        extensions: defaults.extensions,
    })
}

impl AppConfig {
    /// True when a real API key is configured.
    pub fn has_valid_api_key(&self) -> bool {
        match self.api_key.as_deref() {
            Some(key) => !key.trim().is_empty() && key != PLACEHOLDER_API_KEY,
            None => false,
        }
    }

    /// Moves the history file. The comparison directory follows it unless
    /// `comparison_dir` is given.
    pub fn with_data_file(mut self, data_file: PathBuf, comparison_dir: Option<PathBuf>) -> Self {
        self.comparison_dir = comparison_dir.unwrap_or_else(|| parent_dir(&data_file));
        self.data_file = data_file;
        self
    }

    /// `city,state,country` query for the weather endpoint.
    pub fn location_query(&self) -> String {
        format!("{},{},{}", self.city, self.state, self.country)
    }

    /// Log the loaded configuration with the API key masked.
    pub fn log_config(&self) {
        // ---
        let masked_key = match self.api_key.as_deref() {
            Some(key) if key.chars().count() > 4 => {
                format!("{}****", key.chars().take(4).collect::<String>())
            }
            Some(_) => "****".to_string(),
            None => "<unset>".to_string(),
        };

        log::info!("Configuration loaded:");
        log::info!("  WEATHER_API_KEY        : {}", masked_key);
        log::info!("  WEATHER_BASE_URL       : {}", self.base_url);
        log::info!("  Location               : {}", self.location_query());
        log::info!("  WEATHER_DATA_FILE      : {}", self.data_file.display());
        log::info!("  WEATHER_COMPARISON_DIR : {}", self.comparison_dir.display());
        log::info!("  Refresh interval       : {} ms", self.refresh_interval_ms);
        log::info!("  History capacity       : {}", self.history_capacity);
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
