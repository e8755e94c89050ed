//! Per-record feature vectors built from the history table.
//!
//! Rows are sorted by date once; windowed statistics then run over each
//! site's own sub-sequence in that order.

use std::collections::HashMap;
use std::f64::consts::PI;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PlannerError, Result};
use crate::model::HistoryRecord;

/// Number of model inputs per record.
pub const FEATURE_COUNT: usize = 14;

/// Column names, in the order of [`FeatureVector::to_array`].
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "site_index",
    "capacity",
    "fill_ratio",
    "latitude",
    "longitude",
    "year",
    "month",
    "month_index",
    "sin_month",
    "cos_month",
    "site_mean",
    "site_std",
    "rolling_3_mean",
    "trend_slope",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureOptions {
    /// Trailing window for the rolling mean (minimum one observation).
    pub rolling_window: usize,
    /// Trailing window for the trend slope.
    pub slope_window: usize,
    /// Observations needed before a slope is produced; below it the slope is 0.
    pub slope_min_periods: usize,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self {
            rolling_window: 3,
            slope_window: 3,
            slope_min_periods: 2,
        }
    }
}

/// Model inputs for one record. Missing source values are stored as NaN
/// and become 0 in [`FeatureVector::to_array`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub site_index: f64,
    pub capacity: f64,
    pub fill_ratio: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub year: f64,
    pub month: f64,
    pub month_index: f64,
    pub sin_month: f64,
    pub cos_month: f64,
    pub site_mean: f64,
    pub site_std: f64,
    pub rolling_mean: f64,
    pub trend_slope: f64,
}

impl FeatureVector {
    /// Model-ready row with non-finite values replaced by 0.
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.site_index,
            self.capacity,
            self.fill_ratio,
            self.latitude,
            self.longitude,
            self.year,
            self.month,
            self.month_index,
            self.sin_month,
            self.cos_month,
            self.site_mean,
            self.site_std,
            self.rolling_mean,
            self.trend_slope,
        ]
        .map(|value| if value.is_finite() { value } else { 0.0 })
    }

    /// Overwrite the calendar features for `date`.
    pub fn set_calendar(&mut self, date: NaiveDate, month_index: i32) {
        let (sin_month, cos_month) = cyclical_month(date.month());
        self.year = f64::from(date.year());
        self.month = f64::from(date.month());
        self.month_index = f64::from(month_index);
        self.sin_month = sin_month;
        self.cos_month = cos_month;
    }
}

/// A cleaned history row with its features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineeredRecord {
    pub site_id: String,
    pub date: NaiveDate,
    pub volume_kg: f64,
    pub features: FeatureVector,
}

/// Engineered dataset, sorted ascending by date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSet {
    pub records: Vec<EngineeredRecord>,
    /// Site ids in first-seen order; position is the site index feature.
    pub sites: Vec<String>,
    pub min_year: i32,
    pub min_month: u32,
    pub latest_date: NaiveDate,
    /// Input rows dropped for a bad date, volume or site id.
    pub dropped: usize,
}

impl FeatureSet {
    /// Position on the global monthly time axis.
    pub fn month_index(&self, date: NaiveDate) -> i32 {
        month_index(date, self.min_year, self.min_month)
    }

    /// Records of one site, oldest first.
    pub fn site_records<'a>(&'a self, site_id: &'a str) -> impl Iterator<Item = &'a EngineeredRecord> + 'a {
        self.records.iter().filter(move |record| record.site_id == site_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Clean, sort and featurize the history table.
///
/// # Errors
///
/// [`PlannerError::InputValidation`] when the table is empty or no row
/// survives cleaning.
pub fn engineer_features(history: &[HistoryRecord], options: &FeatureOptions) -> Result<FeatureSet> {
    if history.is_empty() {
        return Err(PlannerError::InputValidation("history table is empty".to_string()));
    }

    let mut rows: Vec<(&HistoryRecord, String, NaiveDate, f64)> = Vec::with_capacity(history.len());
    for record in history {
        let site_id = record.site_id.as_deref().map(str::trim).filter(|id| !id.is_empty());
        let volume = record.volume_kg.filter(|volume| volume.is_finite());
        let date = parse_date(&record.date);
        if let (Some(site_id), Some(volume), Some(date)) = (site_id, volume, date) {
            rows.push((record, site_id.to_string(), date, volume));
        }
    }

    let dropped = history.len() - rows.len();
    if dropped > 0 {
        warn!(dropped, "history rows without a parseable date, volume or site id dropped");
    }
    if rows.is_empty() {
        return Err(PlannerError::InputValidation(
            "no history row has a parseable date, a volume and a site id".to_string(),
        ));
    }

    // Stable: rows sharing a date keep their input order.
    rows.sort_by_key(|(_, _, date, _)| *date);

    let min_year = rows.iter().map(|(_, _, date, _)| date.year()).min().unwrap_or_default();
    let min_month = rows.iter().map(|(_, _, date, _)| date.month()).min().unwrap_or(1);
    let latest_date = rows.last().map_or(NaiveDate::MIN, |(_, _, date, _)| *date);

    let mut sites: Vec<String> = Vec::new();
    let mut site_lookup: HashMap<String, usize> = HashMap::new();
    let mut positions: Vec<Vec<usize>> = Vec::new();
    for (row, (_, site_id, _, _)) in rows.iter().enumerate() {
        let index = *site_lookup.entry(site_id.clone()).or_insert_with(|| {
            sites.push(site_id.clone());
            positions.push(Vec::new());
            sites.len() - 1
        });
        positions[index].push(row);
    }

    let mut site_index = vec![0usize; rows.len()];
    let mut site_mean = vec![0.0; rows.len()];
    let mut site_std = vec![0.0; rows.len()];
    let mut rolling = vec![0.0; rows.len()];
    let mut slope = vec![0.0; rows.len()];

    for (index, rows_of_site) in positions.iter().enumerate() {
        let volumes: Vec<f64> = rows_of_site.iter().map(|&row| rows[row].3).collect();
        let (mean, std) = mean_std(&volumes);
        let means = rolling_mean(&volumes, options.rolling_window);
        let slopes = rolling_slope(&volumes, options.slope_window, options.slope_min_periods);

        for (offset, &row) in rows_of_site.iter().enumerate() {
            site_index[row] = index;
            site_mean[row] = mean;
            site_std[row] = std;
            rolling[row] = means[offset];
            slope[row] = slopes[offset];
        }
    }

    let records: Vec<EngineeredRecord> = rows
        .into_iter()
        .enumerate()
        .map(|(row, (source, site_id, date, volume_kg))| {
            let mut features = FeatureVector {
                site_index: site_index[row] as f64,
                capacity: source.capacity.unwrap_or(f64::NAN),
                fill_ratio: source.fill_ratio.unwrap_or(f64::NAN),
                latitude: source.latitude.unwrap_or(f64::NAN),
                longitude: source.longitude.unwrap_or(f64::NAN),
                site_mean: site_mean[row],
                site_std: site_std[row],
                rolling_mean: rolling[row],
                trend_slope: slope[row],
                ..FeatureVector::default()
            };
            features.set_calendar(date, month_index(date, min_year, min_month));

            EngineeredRecord {
                site_id,
                date,
                volume_kg,
                features,
            }
        })
        .collect();

    debug!(records = records.len(), sites = sites.len(), "features engineered");

    Ok(FeatureSet {
        records,
        sites,
        min_year,
        min_month,
        latest_date,
        dropped,
    })
}

/// Parse a calendar date, accepting a few common layouts and datetimes.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
                .map(|datetime| datetime.date())
        })
}

/// `(year - min_year) * 12 + (month - min_month)`, with both minima taken
/// independently over the whole dataset.
pub fn month_index(date: NaiveDate, min_year: i32, min_month: u32) -> i32 {
    (date.year() - min_year) * 12 + (date.month() as i32 - min_month as i32)
}

/// `(sin, cos)` of `2π·month/12`.
pub fn cyclical_month(month: u32) -> (f64, f64) {
    let angle = 2.0 * PI * f64::from(month) / 12.0;
    (angle.sin(), angle.cos())
}

/// Mean and sample standard deviation; std is 0 below two observations.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

/// Trailing mean over at most `window` values, defined from the first value.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|end| {
            let tail = &values[(end + 1).saturating_sub(window)..=end];
            tail.iter().sum::<f64>() / tail.len() as f64
        })
        .collect()
}

/// Trailing least-squares slope; 0 until `min_periods` values are available.
pub fn rolling_slope(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|end| {
            let tail = &values[(end + 1).saturating_sub(window)..=end];
            if tail.len() < min_periods.max(2) {
                0.0
            } else {
                trend_slope(tail)
            }
        })
        .collect()
}

/// Slope of the least-squares line through `(i, values[i])`; 0 below two points.
pub fn trend_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, value) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        numerator += dx * (value - mean_y);
        denominator += dx * dx;
    }

    numerator / denominator
}

/// Training target: `ln(1 + volume)`.
pub fn log_target(volume_kg: f64) -> f64 {
    volume_kg.ln_1p()
}

/// Back-transform a prediction, floored so no volume is reported as non-positive.
pub fn inverse_target(prediction: f64, floor: f64) -> f64 {
    prediction.exp_m1().max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(site: &str, volumes: &[(&str, f64)]) -> Vec<HistoryRecord> {
        volumes
            .iter()
            .map(|(date, volume)| HistoryRecord::new(site, *date, *volume).with_site(28.6, 77.2, 500.0, 40.0))
            .collect()
    }

    #[test]
    fn test_rolling_mean_and_slope_three_months() {
        let records = history("X", &[("2020-01-01", 100.0), ("2020-02-01", 110.0), ("2020-03-01", 120.0)]);
        let set = engineer_features(&records, &FeatureOptions::default()).unwrap();

        let last = &set.records[2].features;
        assert!((last.rolling_mean - 110.0).abs() < 1e-9);
        assert!((last.trend_slope - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_record_has_zero_slope_and_own_mean() {
        let records = history("X", &[("2020-01-01", 100.0), ("2020-02-01", 130.0)]);
        let set = engineer_features(&records, &FeatureOptions::default()).unwrap();

        assert_eq!(set.records[0].features.trend_slope, 0.0);
        assert_eq!(set.records[0].features.rolling_mean, 100.0);
        assert!((set.records[1].features.trend_slope - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_site_std_single_observation_is_zero() {
        let records = history("X", &[("2020-01-01", 100.0)]);
        let set = engineer_features(&records, &FeatureOptions::default()).unwrap();
        assert_eq!(set.records[0].features.site_std, 0.0);
        assert_eq!(set.records[0].features.site_mean, 100.0);
    }

    #[test]
    fn test_month_index_uses_global_minima() {
        let mut records = history("A", &[("2019-11-01", 1.0), ("2020-02-01", 2.0)]);
        records.extend(history("B", &[("2019-12-01", 3.0)]));
        let set = engineer_features(&records, &FeatureOptions::default()).unwrap();

        // min_year = 2019, min_month = 2 (February appears in the data)
        assert_eq!(set.min_year, 2019);
        assert_eq!(set.min_month, 2);
        assert_eq!(set.records[0].features.month_index, 9.0);
        assert_eq!(set.records[2].features.month_index, 12.0);
    }

    #[test]
    fn test_site_index_in_first_seen_order_after_sort() {
        let mut records = history("late", &[("2020-05-01", 1.0)]);
        records.extend(history("early", &[("2020-01-01", 1.0)]));
        let set = engineer_features(&records, &FeatureOptions::default()).unwrap();

        assert_eq!(set.sites, vec!["early".to_string(), "late".to_string()]);
        assert_eq!(set.records[1].features.site_index, 1.0);
    }

    #[test]
    fn test_bad_rows_dropped() {
        let mut records = history("X", &[("2020-01-01", 1.0), ("not a date", 2.0)]);
        records.push(HistoryRecord {
            volume_kg: None,
            ..HistoryRecord::new("X", "2020-02-01", 0.0)
        });
        records.push(HistoryRecord {
            site_id: None,
            ..HistoryRecord::new("X", "2020-03-01", 5.0)
        });
        let set = engineer_features(&records, &FeatureOptions::default()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.dropped, 3);
    }

    #[test]
    fn test_all_dates_unparseable_is_rejected() {
        let records = history("X", &[("yesterday", 1.0)]);
        assert!(matches!(
            engineer_features(&records, &FeatureOptions::default()),
            Err(PlannerError::InputValidation(_))
        ));
        assert!(matches!(
            engineer_features(&[], &FeatureOptions::default()),
            Err(PlannerError::InputValidation(_))
        ));
    }

    #[test]
    fn test_missing_attributes_fill_with_zero() {
        let records = vec![HistoryRecord::new("X", "2020-01-01", 10.0)];
        let set = engineer_features(&records, &FeatureOptions::default()).unwrap();
        let row = set.records[0].features.to_array();
        assert_eq!(row[1], 0.0);
        assert_eq!(row[3], 0.0);
        assert!(set.records[0].features.capacity.is_nan());
    }

    #[test]
    fn test_parse_date_layouts() {
        let expected = NaiveDate::from_ymd_opt(2020, 3, 15);
        assert_eq!(parse_date("2020-03-15"), expected);
        assert_eq!(parse_date("2020-03-15 08:30:00"), expected);
        assert_eq!(parse_date("15/03/2020"), expected);
        assert_eq!(parse_date("March"), None);
    }

    #[test]
    fn test_target_round_trip_with_floor() {
        assert!((inverse_target(log_target(250.0), 0.1) - 250.0).abs() < 1e-9);
        assert_eq!(inverse_target(-5.0, 0.1), 0.1);
    }

    #[test]
    fn test_trend_slope_flat_and_short() {
        assert_eq!(trend_slope(&[5.0]), 0.0);
        assert_eq!(trend_slope(&[5.0, 5.0, 5.0]), 0.0);
        assert!((trend_slope(&[3.0, 1.0]) + 2.0).abs() < 1e-12);
    }
}
