#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP Error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Configuration Error: {0}")]
    Config(String),
    #[error("Source Error: {0}")]
    Source(String),
    #[error("Data Error: {0}")]
    Data(String),
}

pub type Result<T> = std::result::Result<T, WeatherError>;
