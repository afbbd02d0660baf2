use crate::error::Result;
use crate::structs::{Reading, or_unknown};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use csv::{ReaderBuilder, Writer};
use log::{debug, warn};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Column order of the persisted history file.
pub const HISTORY_HEADER: [&str; 9] = [
    "city",
    "temperature",
    "feels_like",
    "humidity",
    "description",
    "timestamp",
    "date",
    "time",
    "state",
];

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Raw history row. Every cell is optional so that hand-edited or older
/// files still load; coercion happens in [`HistoryRow::into_reading`].
#[derive(Debug, Default, Deserialize)]
struct HistoryRow {
    city: Option<String>,
    temperature: Option<String>,
    feels_like: Option<String>,
    humidity: Option<String>,
    description: Option<String>,
    timestamp: Option<String>,
    date: Option<String>,
    time: Option<String>,
    state: Option<String>,
}

impl HistoryRow {
    fn into_reading(self) -> Reading {
        Reading {
            city: self.city.unwrap_or_default(),
            state: non_empty(self.state),
            temperature: self.temperature.as_deref().and_then(parse_int),
            feels_like: self.feels_like.as_deref().and_then(parse_int),
            humidity: self.humidity.as_deref().and_then(parse_int),
            description: non_empty(self.description),
            timestamp: self.timestamp.as_deref().and_then(parse_timestamp),
            date: non_empty(self.date),
            time: non_empty(self.time),
        }
    }
}

/// Append-only weather history persisted as CSV, capped at `capacity` rows.
///
/// The file is opened and closed inside every call; no handle is held
/// between calls.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    capacity: usize,
}

impl HistoryStore {
    /// Store over `path` without touching the filesystem.
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity: capacity.max(1),
        }
    }

    /// Opens the store at `path`, creating parent directories and a
    /// header-only file when nothing exists yet.
    ///
    /// # Errors
    /// Returns error if the directory or the skeleton file cannot be created.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let store = Self::new(path, capacity);

        if let Some(parent) = store.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        if store.path.exists() {
            debug!("History file already exists: {}", store.path.display());
        } else {
            write_history(&store.path, &[])?;
            debug!("Created history file with header: {}", store.path.display());
        }

        Ok(store)
    }

    /// Appends one reading and rewrites the whole file.
    ///
    /// When the store already holds `capacity` or more readings, only the
    /// newest `capacity - 1` are kept before the new one is added, so at most
    /// `capacity` remain. The file is replaced atomically: readers see either
    /// the old or the new collection.
    ///
    /// # Errors
    /// Returns error if an existing file cannot be read in full, in which
    /// case it is left untouched, or if the updated history cannot be written.
    pub fn append(&self, reading: &Reading) -> Result<()> {
        let mut readings = if self.path.exists() {
            read_history(&self.path)?
        } else {
            Vec::new()
        };

        if readings.len() >= self.capacity {
            let excess = readings.len() - (self.capacity - 1);
            readings.drain(..excess);
            debug!("Trimmed {} oldest readings from history", excess);
        }
        readings.push(reading.clone());

        write_history(&self.path, &readings)?;
        debug!(
            "Saved reading: {}, {}°F ({} in history)",
            reading.city,
            or_unknown(reading.temperature),
            readings.len()
        );
        Ok(())
    }

    /// Returns every stored reading in insertion order.
    ///
    /// Never fails: a missing, unreadable or corrupt file yields an empty
    /// history and a logged warning.
    pub fn load_all(&self) -> Vec<Reading> {
        if !self.path.exists() {
            debug!("No history file at {}", self.path.display());
            return Vec::new();
        }

        match read_history(&self.path) {
            Ok(readings) => readings,
            Err(e) => {
                warn!(
                    "Could not load history from {}: {}",
                    self.path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Readings taken within the last `days` days.
    pub fn recent(&self, days: i64) -> Vec<Reading> {
        self.recent_at(days, Utc::now())
    }

    /// Readings whose timestamp is at most `days` whole days before `now`.
    /// Readings without a usable timestamp are skipped.
    pub fn recent_at(&self, days: i64, now: DateTime<Utc>) -> Vec<Reading> {
        self.load_all()
            .into_iter()
            .filter(|reading| match reading.timestamp {
                Some(ts) => (now - ts).num_days() <= days,
                None => false,
            })
            .collect()
    }
}

fn read_history(path: &Path) -> Result<Vec<Reading>> {
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut readings = Vec::new();
    for row in reader.deserialize::<HistoryRow>() {
        readings.push(row?.into_reading());
    }
    Ok(readings)
}

/// Writes the full history to a sibling temp file, then renames it over `path`.
fn write_history(path: &Path, readings: &[Reading]) -> Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        let mut writer = Writer::from_path(&tmp_path)?;
        writer.write_record(HISTORY_HEADER)?;
        for reading in readings {
            writer.write_record(to_record(reading))?;
        }
        writer.flush()?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn to_record(reading: &Reading) -> [String; 9] {
    let int = |v: Option<i64>| v.map(|n| n.to_string()).unwrap_or_default();
    [
        reading.city.clone(),
        int(reading.temperature),
        int(reading.feels_like),
        int(reading.humidity),
        reading.description.clone().unwrap_or_default(),
        reading
            .timestamp
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_default(),
        reading.date.clone().unwrap_or_default(),
        reading.time.clone().unwrap_or_default(),
        reading.state.clone().unwrap_or_default(),
    ]
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Integer cell, accepting float notation (`72.0`) by truncation.
fn parse_int(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Some(n);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64)
}

/// Parses an RFC 3339 instant, or a naive ISO-8601 timestamp taken as local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS.iter().find_map(|format| {
        let naive = NaiveDateTime::parse_from_str(raw, format).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|ts| ts.with_timezone(&Utc))
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn reading(temp: i64, at: DateTime<Utc>) -> Reading {
        Reading::observed_at("Sacramento", temp, at)
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap()
    }

    #[test]
    fn test_open_creates_header_only_file() {
        // ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("weather_data.csv");
        let store = HistoryStore::open(&path, 100).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim_end(), HISTORY_HEADER.join(","));
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn test_open_leaves_existing_file_alone() {
        // ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("weather_data.csv");
        fs::write(&path, "city,temperature\nReno,61\n").unwrap();

        let store = HistoryStore::open(&path, 100).unwrap();
        let readings = store.load_all();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].city, "Reno");
        assert_eq!(readings[0].temperature, Some(61));
        assert_eq!(readings[0].timestamp, None);
    }

    #[test]
    fn test_append_then_load_round_trips_all_fields() {
        // ---
        let dir = tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("h.csv"), 100).unwrap();

        let mut r = Reading::observed_at("Sacramento", 72, Utc::now());
        r.state = Some("CA".to_string());
        r.feels_like = Some(70);
        r.humidity = Some(41);
        r.description = Some("Clear Sky, Light Breeze".to_string());
        store.append(&r).unwrap();

        let loaded = store.load_all();
        assert_eq!(loaded, vec![r]);
    }

    #[test]
    fn test_unknown_fields_stay_unknown() {
        // ---
        let dir = tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("h.csv"), 100).unwrap();

        let r = reading(65, base_time());
        store.append(&r).unwrap();

        let loaded = &store.load_all()[0];
        assert_eq!(loaded.feels_like, None);
        assert_eq!(loaded.humidity, None);
        assert_eq!(loaded.description, None);
        assert_eq!(loaded.state, None);
    }

    #[test]
    fn test_more_than_capacity_keeps_last_hundred_in_order() {
        // ---
        let dir = tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("h.csv"), 100).unwrap();

        for i in 0..105 {
            store
                .append(&reading(i, base_time() + Duration::minutes(i)))
                .unwrap();
        }

        let temps: Vec<i64> = store
            .load_all()
            .iter()
            .map(|r| r.temperature.unwrap())
            .collect();
        assert_eq!(temps.len(), 100);
        assert_eq!(temps, (5..105).collect::<Vec<_>>());
    }

    #[test]
    fn test_trim_boundary_at_ninety_nine_and_hundred() {
        // ---
        let dir = tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("h.csv"), 100).unwrap();

        for i in 0..99 {
            store.append(&reading(i, base_time())).unwrap();
        }
        assert_eq!(store.load_all().len(), 99);

        // 99 -> 100: plain append, nothing evicted
        store.append(&reading(99, base_time())).unwrap();
        let loaded = store.load_all();
        assert_eq!(loaded.len(), 100);
        assert_eq!(loaded[0].temperature, Some(0));

        // 100 -> trim to 99, then append
        store.append(&reading(100, base_time())).unwrap();
        let loaded = store.load_all();
        assert_eq!(loaded.len(), 100);
        assert_eq!(loaded[0].temperature, Some(1));
        assert_eq!(loaded[99].temperature, Some(100));
    }

    #[test]
    fn test_oversized_file_is_trimmed_on_append() {
        // ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("h.csv");
        let mut contents = String::from("city,temperature\n");
        for i in 0..150 {
            contents.push_str(&format!("Sacramento,{}\n", i));
        }
        fs::write(&path, contents).unwrap();

        let store = HistoryStore::open(&path, 100).unwrap();
        store.append(&reading(999, base_time())).unwrap();

        let loaded = store.load_all();
        assert_eq!(loaded.len(), 100);
        assert_eq!(loaded[0].temperature, Some(51));
        assert_eq!(loaded[99].temperature, Some(999));
    }

    #[test]
    fn test_corrupt_file_loads_as_empty() {
        // ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("h.csv");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x63, 0x69, 0x74, 0x79, 0x0a, 0xc3, 0x28]).unwrap();

        let store = HistoryStore::new(path, 100);
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn test_append_refuses_to_overwrite_unreadable_history() {
        // ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("h.csv");
        let mut contents = b"city,temperature\n".to_vec();
        for i in 0..50 {
            contents.extend_from_slice(format!("Sacramento,{}\n", i).as_bytes());
        }
        contents.extend_from_slice(b"Sacr\xc3\x28mento,51\n");
        fs::write(&path, &contents).unwrap();

        let store = HistoryStore::new(&path, 100);
        assert!(store.load_all().is_empty());
        assert!(store.append(&reading(99, base_time())).is_err());
        assert_eq!(fs::read(&path).unwrap(), contents);
    }

    #[test]
    fn test_missing_or_directory_path_loads_as_empty() {
        // ---
        let dir = tempdir().unwrap();
        let missing = HistoryStore::new(dir.path().join("nope.csv"), 100);
        assert!(missing.load_all().is_empty());

        let directory = HistoryStore::new(dir.path(), 100);
        assert!(directory.load_all().is_empty());
    }

    #[test]
    fn test_loads_rows_written_by_older_versions() {
        // ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("h.csv");
        fs::write(
            &path,
            "city,temperature,feels_like,humidity,description,timestamp,date,time\n\
             Sacramento,72.0,70,abc,Clear Sky,2024-05-01T12:30:00.123456,2024-05-01,12:30:00\n",
        )
        .unwrap();

        let store = HistoryStore::open(&path, 100).unwrap();
        let loaded = store.load_all();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].temperature, Some(72));
        assert_eq!(loaded[0].feels_like, Some(70));
        assert_eq!(loaded[0].humidity, None);
        assert_eq!(loaded[0].description.as_deref(), Some("Clear Sky"));
        assert!(loaded[0].timestamp.is_some());
    }

    #[test]
    fn test_recent_filters_by_age_and_skips_bad_timestamps() {
        // ---
        let dir = tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("h.csv"), 100).unwrap();
        let now = base_time();

        store.append(&reading(50, now - Duration::days(10))).unwrap();
        store.append(&reading(60, now - Duration::days(7))).unwrap();
        store.append(&reading(70, now - Duration::hours(3))).unwrap();
        let mut undated = reading(80, now);
        undated.timestamp = None;
        store.append(&undated).unwrap();

        let temps: Vec<i64> = store
            .recent_at(7, now)
            .iter()
            .map(|r| r.temperature.unwrap())
            .collect();
        assert_eq!(temps, vec![60, 70]);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        // ---
        assert_eq!(
            parse_timestamp("2025-03-26T18:45:00+00:00"),
            Some(base_time())
        );
        assert!(parse_timestamp("2024-05-01T12:30:00").is_some());
        assert!(parse_timestamp("2024-05-01 12:30:00.5").is_some());
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }
}
