use crate::structs::{ComparisonResult, ExternalCityReading, Reading, TempComparison};

/// Compares external city readings against the home reading.
///
/// # Arguments
///
/// * `primary` - The latest home reading, if any
/// * `externals` - Readings ingested from comparison files
///
/// # Returns
///
/// Returns one result per external reading, closest temperature first.
/// Results with an unknown difference sort last; ties keep input order.
/// Returns an empty list when there is no home temperature to compare with.
pub fn compare(
    primary: Option<&Reading>,
    externals: Vec<ExternalCityReading>,
) -> Vec<ComparisonResult> {
    let Some(primary) = primary else {
        return Vec::new();
    };
    let Some(home_temp) = primary.temperature else {
        return Vec::new();
    };

    let mut results: Vec<ComparisonResult> = externals
        .into_iter()
        .map(|external| {
            let temp_difference = external.temperature.checked_sub(home_temp);
            let humidity_difference = primary
                .humidity
                .zip(external.humidity)
                .and_then(|(home, other)| other.checked_sub(home));

            ComparisonResult {
                temp_comparison: temp_difference.map(classify),
                temp_difference,
                humidity_difference,
                external,
            }
        })
        .collect();

    sort_closest_first(&mut results);
    results
}

/// Stable sort by absolute temperature difference; unknown differences go last.
pub fn sort_closest_first(results: &mut [ComparisonResult]) {
    results.sort_by_key(|r| match r.temp_difference {
        Some(diff) => (false, diff.unsigned_abs()),
        None => (true, 0),
    });
}

/// Labels a signed temperature difference.
pub fn classify(diff: i64) -> TempComparison {
    match diff {
        d if d > 0 => TempComparison::Warmer(d),
        d if d < 0 => TempComparison::Cooler(d),
        _ => TempComparison::Same,
    }
}
