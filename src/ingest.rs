use crate::config::AppConfig;
use crate::structs::{ExternalCityReading, humidity_percent, whole_number};
use csv::{ReaderBuilder, StringRecord};
use log::{debug, warn};
use rayon::prelude::*;
use std::{
    collections::HashMap,
    ffi::OsString,
    fs::{self, File},
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

/// Number of leading bytes inspected when sniffing a file.
pub const SAMPLE_SIZE: usize = 1024;

/// Rows after the first one that take part in header voting.
const MAX_VOTING_ROWS: usize = 20;

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Canonical schema slot a heterogeneous column is normalized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Temperature,
    FeelsLike,
    City,
    State,
    Description,
    Humidity,
    WindSpeed,
    Date,
    Time,
}

/// Accepted lowercase header labels per canonical field.
const SYNONYMS: &[(Field, &[&str])] = &[
    (Field::Temperature, &["temp", "temperature"]),
    (Field::FeelsLike, &["feels_like", "feels like", "apparent_temp"]),
    (Field::City, &["city", "location", "place"]),
    (Field::State, &["state", "region"]),
    (
        Field::Description,
        &["description", "desc", "conditions", "weather", "summary"],
    ),
    (Field::Humidity, &["humidity", "humid"]),
    (Field::WindSpeed, &["wind_speed", "wind speed", "wind"]),
    (Field::Date, &["date", "weather_date", "timestamp"]),
    (Field::Time, &["time"]),
];

/// Column index per canonical field.
pub type ColumnMap = HashMap<Field, usize>;

/// Why a file produced no reading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    #[error("Missing required columns")]
    MissingColumns,
    #[error("No data rows")]
    NoDataRows,
    #[error("Too few columns")]
    TooFewColumns,
    #[error("Could not determine format")]
    UnknownFormat,
    #[error("Missing city value")]
    MissingCity,
    #[error("Invalid temperature: {0:?}")]
    InvalidTemperature(String),
    #[error("Unreadable file: {0}")]
    Unreadable(String),
}

/// Structure guessed from the leading bytes of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sniffed {
    pub delimiter: u8,
    pub has_header: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Numeric,
    Text(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnVote {
    Unset,
    Typed(ColumnType),
    Mixed,
}

/// Discovers comparison files and turns each into at most one reading.
#[derive(Debug, Clone)]
pub struct Ingestor {
    dir: PathBuf,
    extensions: Vec<String>,
    excluded: Option<OsString>,
}

impl Ingestor {
    /// Builds an ingestor over the configured comparison directory. The
    /// history file is excluded by name.
    pub fn new(config: &AppConfig) -> Self {
        Self {
            dir: config.comparison_dir.clone(),
            extensions: config
                .extensions
                .iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
            excluded: config.data_file.file_name().map(|name| name.to_os_string()),
        }
    }

    /// Lists candidate files sorted by name.
    ///
    /// A missing or unreadable directory yields an empty list.
    pub fn comparison_files(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(
                    "Cannot list comparison directory {}: {}",
                    self.dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .filter(|path| self.has_tabular_extension(path))
            .filter(|path| path.file_name() != self.excluded.as_deref())
            .collect();
        files.sort();
        files
    }

    /// Ingests every comparison file, keeping enumeration order.
    ///
    /// Files are parsed in parallel; a file that cannot be parsed is logged
    /// and left out without affecting the others.
    pub fn ingest_all(&self) -> Vec<ExternalCityReading> {
        let files = self.comparison_files();
        debug!("Found {} comparison files", files.len());

        files
            .par_iter()
            .filter_map(|path| match ingest_file(path) {
                Ok(reading) => {
                    debug!(
                        "Ingested {}: {}, {}°F",
                        reading.source_file, reading.city, reading.temperature
                    );
                    Some(reading)
                }
                Err(reason) => {
                    warn!("Skipping {}: {}", path.display(), reason);
                    None
                }
            })
            .collect()
    }

    fn has_tabular_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// Parses the first data row of one file.
///
/// The leading [`SAMPLE_SIZE`] bytes are sniffed for delimiter and header,
/// then at most two records are read.
pub fn ingest_file(path: &Path) -> Result<ExternalCityReading, SkipReason> {
    let source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut file = File::open(path).map_err(unreadable)?;
    let mut sample = Vec::with_capacity(SAMPLE_SIZE + 1);
    file.by_ref()
        .take(SAMPLE_SIZE as u64 + 1)
        .read_to_end(&mut sample)
        .map_err(unreadable)?;
    let truncated = sample.len() > SAMPLE_SIZE;
    sample.truncate(SAMPLE_SIZE);
    file.seek(SeekFrom::Start(0)).map_err(unreadable)?;

    let sniffed = sniff(&sample, truncated);
    debug!(
        "Sniffed {}: delimiter={:?} header={}",
        source, sniffed.delimiter as char, sniffed.has_header
    );

    let mut records = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(sniffed.delimiter)
        .from_reader(file)
        .into_records();

    let first = match records.next() {
        Some(record) => record.map_err(unreadable)?,
        None => return Err(SkipReason::NoDataRows),
    };

    if !sniffed.has_header {
        return guess_positional(&first, &source);
    }

    let columns = normalize_headers(first.iter());
    if !columns.contains_key(&Field::City) || !columns.contains_key(&Field::Temperature) {
        return Err(SkipReason::MissingColumns);
    }

    match records.next() {
        Some(record) => extract_with_columns(&record.map_err(unreadable)?, &columns, &source),
        None => Err(SkipReason::NoDataRows),
    }
}

/// Guesses delimiter and header presence from a byte sample.
///
/// `truncated` marks a sample cut short of the end of the file; its last,
/// possibly partial, line is ignored.
pub fn sniff(sample: &[u8], truncated: bool) -> Sniffed {
    let text = String::from_utf8_lossy(sample);
    let mut lines: Vec<&str> = text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .collect();
    if truncated && lines.len() > 1 {
        lines.pop();
    }

    let delimiter = sniff_delimiter(&lines);
    let joined = lines.join("\n");
    let rows: Vec<Vec<String>> = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(joined.as_bytes())
        .into_records()
        .filter_map(|record| record.ok())
        .take(MAX_VOTING_ROWS + 1)
        .map(|record| record.iter().map(str::to_string).collect())
        .collect();

    Sniffed {
        delimiter,
        has_header: detect_header(&rows),
    }
}

/// Picks the delimiter that splits every sampled line into the same number
/// of fields, falling back to the most frequent one on the first line.
fn sniff_delimiter(lines: &[&str]) -> u8 {
    let Some(first) = lines.first() else {
        return b',';
    };

    let consistent = DELIMITERS.iter().copied().find(|&d| {
        let expected = count_unquoted(first, d);
        expected > 0 && lines.iter().all(|line| count_unquoted(line, d) == expected)
    });

    consistent.unwrap_or_else(|| {
        DELIMITERS
            .iter()
            .copied()
            .map(|d| (count_unquoted(first, d), d))
            .filter(|(count, _)| *count > 0)
            .max_by_key(|(count, _)| *count)
            .map(|(_, d)| d)
            .unwrap_or(b',')
    })
}

fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for byte in line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
        } else if byte == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Decides whether the first row is a header.
///
/// A first row holding a number is data. Otherwise each column of the
/// following rows is typed (numeric, or text of a fixed length); a column
/// whose label does not fit its type votes for a header, one that fits votes
/// against, and columns of mixed type abstain. Ties go to a header when a
/// numeric column supports it. A lone non-numeric row is a header.
fn detect_header(rows: &[Vec<String>]) -> bool {
    let Some(header) = rows.first() else {
        return false;
    };
    if header.iter().any(|cell| is_numeric(cell)) {
        return false;
    }
    if rows.len() == 1 {
        return true;
    }

    let mut votes = vec![ColumnVote::Unset; header.len()];
    for row in rows.iter().skip(1).take(MAX_VOTING_ROWS) {
        if row.len() != header.len() {
            continue;
        }
        for (vote, cell) in votes.iter_mut().zip(row) {
            let this = column_type(cell);
            *vote = match *vote {
                ColumnVote::Unset => ColumnVote::Typed(this),
                ColumnVote::Typed(seen) if seen == this => ColumnVote::Typed(seen),
                _ => ColumnVote::Mixed,
            };
        }
    }

    let mut score = 0i32;
    let mut numeric_support = false;
    for (vote, label) in votes.iter().zip(header) {
        match vote {
            ColumnVote::Typed(ColumnType::Numeric) => {
                score += 1;
                numeric_support = true;
            }
            ColumnVote::Typed(ColumnType::Text(len)) => {
                if label.chars().count() != *len {
                    score += 1;
                } else {
                    score -= 1;
                }
            }
            ColumnVote::Unset | ColumnVote::Mixed => {}
        }
    }

    score > 0 || (score == 0 && numeric_support)
}

fn column_type(cell: &str) -> ColumnType {
    if is_numeric(cell) {
        ColumnType::Numeric
    } else {
        ColumnType::Text(cell.chars().count())
    }
}

fn is_numeric(cell: &str) -> bool {
    parse_number(cell).is_some()
}

/// Maps header labels to canonical fields. Unknown labels are ignored.
pub fn normalize_headers<I, S>(headers: I) -> ColumnMap
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut columns = ColumnMap::new();
    for (index, label) in headers.into_iter().enumerate() {
        if let Some(field) = canonical_field(label.as_ref()) {
            columns.insert(field, index);
        }
    }
    columns
}

/// Canonical field for a single header label.
pub fn canonical_field(label: &str) -> Option<Field> {
    let label = label.trim().to_lowercase();
    SYNONYMS
        .iter()
        .find(|(_, names)| names.contains(&label.as_str()))
        .map(|(field, _)| *field)
}

/// Builds a reading from a data row using named columns.
pub fn extract_with_columns(
    row: &StringRecord,
    columns: &ColumnMap,
    source: &str,
) -> Result<ExternalCityReading, SkipReason> {
    let cell = |field: Field| columns.get(&field).and_then(|&i| row.get(i));

    let city = cell(Field::City)
        .map(str::trim)
        .filter(|city| !city.is_empty())
        .ok_or(SkipReason::MissingCity)?;

    let raw_temp = cell(Field::Temperature).unwrap_or_default();
    let temperature = coerce_rounded(raw_temp)
        .ok_or_else(|| SkipReason::InvalidTemperature(raw_temp.trim().to_string()))?;

    Ok(ExternalCityReading {
        source_file: source.to_string(),
        city: city.to_string(),
        state: cell(Field::State).and_then(text),
        temperature,
        feels_like: cell(Field::FeelsLike).and_then(coerce_rounded),
        humidity: cell(Field::Humidity).and_then(coerce_humidity),
        description: cell(Field::Description).and_then(text),
    })
}

/// Reads a headerless row as `city, temperature, description`.
pub fn guess_positional(
    row: &StringRecord,
    source: &str,
) -> Result<ExternalCityReading, SkipReason> {
    if row.len() < 2 {
        return Err(SkipReason::TooFewColumns);
    }
    if row.len() < 3 {
        return Err(SkipReason::UnknownFormat);
    }

    let city = row[0].trim();
    if city.is_empty() {
        return Err(SkipReason::MissingCity);
    }
    let temperature = coerce_rounded(&row[1]).ok_or(SkipReason::UnknownFormat)?;

    Ok(ExternalCityReading {
        source_file: source.to_string(),
        city: city.to_string(),
        state: None,
        temperature,
        feels_like: None,
        humidity: None,
        description: text(&row[2]),
    })
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Nearest whole number, ties to even.
pub fn coerce_rounded(raw: &str) -> Option<i64> {
    parse_number(raw).and_then(|v| whole_number(v.round_ties_even()))
}

/// Whole number toward zero.
pub fn coerce_truncated(raw: &str) -> Option<i64> {
    parse_number(raw).and_then(|v| whole_number(v.trunc()))
}

/// Truncated humidity percent; anything outside `0..=100` is unknown.
pub fn coerce_humidity(raw: &str) -> Option<i64> {
    coerce_truncated(raw).and_then(humidity_percent)
}

fn text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn unreadable(e: impl std::fmt::Display) -> SkipReason {
    SkipReason::Unreadable(e.to_string())
}
