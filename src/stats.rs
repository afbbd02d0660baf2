use crate::structs::{DeltaLabel, Reading, Statistics};
use std::cmp::Reverse;

/// Calculates the mean temperature over a set of readings.
///
/// Readings without a temperature are skipped rather than counted as zero.
///
/// # Arguments
///
/// * `readings` - Slice of readings, usually the last week of history
///
/// # Returns
///
/// Returns the mean rounded to one decimal place, or `None` when no reading
/// carries a temperature.
pub fn weekly_average(readings: &[Reading]) -> Option<f64> {
    let temps: Vec<f64> = usable_temps(readings).map(|t| t as f64).collect();
    if temps.is_empty() {
        return None;
    }
    Some(round_one(temps.iter().sum::<f64>() / temps.len() as f64))
}

/// Finds the lowest and highest temperature.
///
/// # Returns
///
/// Returns `(min, max)`, or `None` when no reading carries a temperature.
pub fn min_max(readings: &[Reading]) -> Option<(i64, i64)> {
    usable_temps(readings).fold(None, |acc, t| match acc {
        None => Some((t, t)),
        Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
    })
}

/// Temperature of the second most recent reading.
///
/// The most recent reading is taken to be the one already on display, so the
/// "previous" reading is the next one back in time. Readings are ordered by
/// timestamp, newest first; readings sharing a timestamp keep their stored
/// order.
///
/// # Returns
///
/// Returns `None` when there are fewer than two readings, when any reading
/// lacks a timestamp, or when the previous reading has no temperature.
pub fn previous_temperature(readings: &[Reading]) -> Option<i64> {
    if readings.len() < 2 {
        return None;
    }

    let mut dated = Vec::with_capacity(readings.len());
    for reading in readings {
        dated.push((reading.timestamp?, reading.temperature));
    }
    dated.sort_by_key(|(ts, _)| Reverse(*ts));

    dated[1].1
}

/// `current - previous`, rounded to one decimal place.
pub fn temperature_delta(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    Some(round_one(current? - previous?))
}

/// Classifies a temperature change for display.
pub fn format_delta(delta: Option<f64>) -> DeltaLabel {
    match delta {
        None => DeltaLabel::NoData,
        Some(d) if d > 0.0 => DeltaLabel::Warmer(d),
        Some(d) if d < 0.0 => DeltaLabel::Cooler(d),
        Some(_) => DeltaLabel::NoChange,
    }
}

impl Statistics {
    /// Computes the rolling statistics over `recent` history.
    ///
    /// `current` is the temperature on display; the delta compares it against
    /// [`previous_temperature`] of the history.
    pub fn from_history(recent: &[Reading], current: Option<i64>) -> Self {
        let previous = previous_temperature(recent);
        let delta = temperature_delta(current.map(|t| t as f64), previous.map(|t| t as f64));
        let range = min_max(recent);

        Statistics {
            readings: recent.len(),
            weekly_average: weekly_average(recent),
            min_temp: range.map(|(lo, _)| lo),
            max_temp: range.map(|(_, hi)| hi),
            previous_temperature: previous,
            delta: format_delta(delta),
        }
    }
}

fn usable_temps(readings: &[Reading]) -> impl Iterator<Item = i64> + '_ {
    readings.iter().filter_map(|r| r.temperature)
}

fn round_one(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 26, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn readings(temps: &[i64]) -> Vec<Reading> {
        temps
            .iter()
            .enumerate()
            .map(|(i, &t)| Reading::observed_at("Sacramento", t, at(i as i64)))
            .collect()
    }

    #[test]
    fn test_weekly_average() {
        // ---
        assert_eq!(weekly_average(&readings(&[60, 70, 80])), Some(70.0));
        assert_eq!(weekly_average(&readings(&[60, 61, 61])), Some(60.7));
        assert_eq!(weekly_average(&[]), None);
    }

    #[test]
    fn test_missing_temperatures_are_skipped() {
        // ---
        let mut data = readings(&[60, 0, 80]);
        data[1].temperature = None;
        assert_eq!(weekly_average(&data), Some(70.0));
        assert_eq!(min_max(&data), Some((60, 80)));

        data[0].temperature = None;
        data[2].temperature = None;
        assert_eq!(weekly_average(&data), None);
        assert_eq!(min_max(&data), None);
    }

    #[test]
    fn test_min_max() {
        // ---
        assert_eq!(min_max(&readings(&[55, 90, 72])), Some((55, 90)));
        assert_eq!(min_max(&readings(&[-4])), Some((-4, -4)));
        assert_eq!(min_max(&[]), None);
    }

    #[test]
    fn test_previous_temperature_is_the_older_reading() {
        // ---
        let older = Reading::observed_at("Sacramento", 60, at(0));
        let newer = Reading::observed_at("Sacramento", 65, at(30));

        assert_eq!(previous_temperature(&[older.clone(), newer.clone()]), Some(60));
        // Stored order does not matter, timestamps do
        assert_eq!(previous_temperature(&[newer, older]), Some(60));
    }

    #[test]
    fn test_previous_temperature_without_enough_data() {
        // ---
        assert_eq!(previous_temperature(&readings(&[70])), None);
        assert_eq!(previous_temperature(&[]), None);

        let mut data = readings(&[70, 71, 72]);
        data[0].timestamp = None;
        assert_eq!(previous_temperature(&data), None);
    }

    #[test]
    fn test_temperature_delta() {
        // ---
        assert_eq!(temperature_delta(Some(72.0), Some(70.0)), Some(2.0));
        assert_eq!(temperature_delta(Some(68.0), Some(70.5)), Some(-2.5));
        assert_eq!(temperature_delta(None, Some(70.0)), None);
        assert_eq!(temperature_delta(Some(70.0), None), None);
    }

    #[test]
    fn test_format_delta() {
        // ---
        assert_eq!(format_delta(Some(2.0)), DeltaLabel::Warmer(2.0));
        assert_eq!(format_delta(Some(-3.0)), DeltaLabel::Cooler(-3.0));
        assert_eq!(format_delta(Some(0.0)), DeltaLabel::NoChange);
        assert_eq!(format_delta(None), DeltaLabel::NoData);

        assert_eq!(DeltaLabel::Warmer(2.0).to_string(), "+2.0°F (warmer)");
        assert_eq!(DeltaLabel::Cooler(-3.0).to_string(), "-3.0°F (cooler)");
        assert_eq!(DeltaLabel::NoChange.to_string(), "No change");
        assert_eq!(DeltaLabel::NoData.to_string(), "No previous data");
    }

    #[test]
    fn test_statistics_from_history() {
        // ---
        let history = readings(&[60, 66, 72]);
        let stats = Statistics::from_history(&history, Some(72));

        assert_eq!(stats.readings, 3);
        assert_eq!(stats.weekly_average, Some(66.0));
        assert_eq!(stats.min_temp, Some(60));
        assert_eq!(stats.max_temp, Some(72));
        assert_eq!(stats.previous_temperature, Some(66));
        assert_eq!(stats.delta, DeltaLabel::Warmer(6.0));

        let empty = Statistics::from_history(&[], None);
        assert_eq!(empty.weekly_average, None);
        assert_eq!(empty.delta, DeltaLabel::NoData);
    }
}
