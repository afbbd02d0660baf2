use crate::config::AppConfig;
use crate::error::{Result, WeatherError};
use crate::structs::{Reading, humidity_percent, whole_number};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use std::time::Duration;

/// Supplies the current reading for the home location.
#[async_trait::async_trait]
pub trait ReadingSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Checks that the source is able to fetch at all. Called before every
    /// cycle so a configuration problem blocks the fetch without touching
    /// any state.
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_current(&self) -> Result<Reading>;
}

/// Current-weather response, reduced to the fields the tracker uses.
#[derive(Debug, Deserialize)]
pub struct CurrentWeather {
    pub name: String,
    pub main: MainBlock,
    #[serde(default)]
    pub weather: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
pub struct MainBlock {
    pub temp: f64,
    pub feels_like: Option<f64>,
    pub humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct Condition {
    pub description: String,
}

/// OpenWeatherMap current-weather client, imperial units.
#[derive(Debug, Clone)]
pub struct OpenWeatherMapSource {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    location: String,
    state: String,
}

impl OpenWeatherMapSource {
    /// A missing or placeholder API key is accepted here and reported by
    /// [`ReadingSource::ensure_ready`] instead.
    ///
    /// # Errors
    /// Returns `WeatherError::Http` if the client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = config
            .has_valid_api_key()
            .then(|| config.api_key.clone())
            .flatten();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_key,
            location: config.location_query(),
            state: config.state.clone(),
        })
    }
}

#[async_trait::async_trait]
impl ReadingSource for OpenWeatherMapSource {
    fn source_name(&self) -> &'static str {
        "openweathermap"
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.api_key {
            Some(_) => Ok(()),
            None => Err(WeatherError::Config(
                "OpenWeatherMap API key is not configured (set WEATHER_API_KEY)".to_string(),
            )),
        }
    }

    async fn fetch_current(&self) -> Result<Reading> {
        self.ensure_ready()?;
        let api_key = self.api_key.as_deref().unwrap_or_default();
        debug!("Fetching current weather for {}", self.location);

        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("q", self.location.as_str()),
                ("appid", api_key),
                ("units", "imperial"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        let weather: CurrentWeather = serde_json::from_value(body)
            .map_err(|e| WeatherError::Source(format!("malformed weather response: {}", e)))?;

        to_reading(weather, Some(self.state.clone()), Utc::now())
    }
}

/// Converts a current-weather response into a reading stamped at `at`.
///
/// # Errors
/// Returns `WeatherError::Source` when the response has no condition or a
/// temperature that is non-finite or out of range.
pub fn to_reading(
    weather: CurrentWeather,
    state: Option<String>,
    at: DateTime<Utc>,
) -> Result<Reading> {
    let temperature = round_temp(weather.main.temp)
        .ok_or_else(|| WeatherError::Source("temperature is not a usable number".to_string()))?;
    let description = weather
        .weather
        .first()
        .map(|condition| title_case(&condition.description))
        .ok_or_else(|| WeatherError::Source("response has no weather condition".to_string()))?;

    let mut reading = Reading::observed_at(weather.name, temperature, at);
    reading.state = state.filter(|s| !s.trim().is_empty());
    reading.feels_like = weather.main.feels_like.and_then(round_temp);
    reading.humidity = weather
        .main
        .humidity
        .and_then(|h| whole_number(h.trunc()))
        .and_then(humidity_percent);
    reading.description = Some(description);
    Ok(reading)
}

fn round_temp(value: f64) -> Option<i64> {
    whole_number(value.round_ties_even())
}

/// Capitalizes the first letter of every word: `"broken clouds"` → `"Broken Clouds"`.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn sample_body() -> serde_json::Value {
        serde_json::json!({
            "name": "Sacramento",
            "main": { "temp": 72.5, "feels_like": 70.6, "humidity": 41, "pressure": 1012 },
            "weather": [{ "id": 800, "main": "Clear", "description": "clear sky" }],
            "wind": { "speed": 4.1 }
        })
    }

    #[test]
    fn test_response_to_reading() {
        // ---
        let at = Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap();
        let weather: CurrentWeather = serde_json::from_value(sample_body()).unwrap();
        let reading = to_reading(weather, Some("CA".to_string()), at).unwrap();

        assert_eq!(reading.city, "Sacramento");
        assert_eq!(reading.state.as_deref(), Some("CA"));
        assert_eq!(reading.temperature, Some(72));
        assert_eq!(reading.feels_like, Some(71));
        assert_eq!(reading.humidity, Some(41));
        assert_eq!(reading.description.as_deref(), Some("Clear Sky"));
        assert_eq!(reading.timestamp, Some(at));
        assert!(reading.date.is_some());
        assert!(reading.time.is_some());
    }

    #[test]
    fn test_missing_condition_is_source_error() {
        // ---
        let mut body = sample_body();
        body["weather"] = serde_json::json!([]);
        let weather: CurrentWeather = serde_json::from_value(body).unwrap();
        let err = to_reading(weather, None, Utc::now()).unwrap_err();
        assert!(matches!(err, WeatherError::Source(_)));
    }

    #[test]
    fn test_out_of_range_values() {
        // ---
        let mut body = sample_body();
        body["main"]["humidity"] = serde_json::json!(250);
        body["main"]["feels_like"] = serde_json::json!(1e300);
        let weather: CurrentWeather = serde_json::from_value(body).unwrap();
        let reading = to_reading(weather, None, Utc::now()).unwrap();
        assert_eq!(reading.humidity, None);
        assert_eq!(reading.feels_like, None);

        let mut body = sample_body();
        body["main"]["temp"] = serde_json::json!(-1e300);
        let weather: CurrentWeather = serde_json::from_value(body).unwrap();
        let err = to_reading(weather, None, Utc::now()).unwrap_err();
        assert!(matches!(err, WeatherError::Source(_)));
    }

    #[test]
    fn test_missing_main_block_does_not_deserialize() {
        // ---
        let body = serde_json::json!({ "name": "Sacramento", "cod": 401 });
        assert!(serde_json::from_value::<CurrentWeather>(body).is_err());
    }

    #[test]
    fn test_title_case() {
        // ---
        assert_eq!(title_case("broken clouds"), "Broken Clouds");
        assert_eq!(title_case("LIGHT rain"), "Light Rain");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn test_source_requires_api_key() {
        // ---
        let source = OpenWeatherMapSource::from_config(&AppConfig::default()).unwrap();
        assert!(matches!(source.ensure_ready(), Err(WeatherError::Config(_))));

        let config = AppConfig {
            api_key: Some(crate::config::PLACEHOLDER_API_KEY.to_string()),
            ..AppConfig::default()
        };
        let source = OpenWeatherMapSource::from_config(&config).unwrap();
        assert!(source.ensure_ready().is_err());

        let config = AppConfig {
            api_key: Some("abc123def".to_string()),
            ..AppConfig::default()
        };
        let source = OpenWeatherMapSource::from_config(&config).unwrap();
        assert!(source.ensure_ready().is_ok());
        assert_eq!(source.source_name(), "openweathermap");
    }

    #[tokio::test]
    async fn test_fetch_without_key_fails_before_any_request() {
        // ---
        let config = AppConfig {
            base_url: "http://127.0.0.1:9/unreachable".to_string(),
            ..AppConfig::default()
        };
        let source = OpenWeatherMapSource::from_config(&config).unwrap();
        let err = source.fetch_current().await.unwrap_err();
        assert!(matches!(err, WeatherError::Config(_)));
    }
}
