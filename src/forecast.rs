//! Monthly volume forecasting per collection site.
//!
//! Training uses a chronological split: the oldest `train_fraction` of the
//! engineered rows fit the forest, the rest are held out for evaluation so no
//! future observation leaks into training. The forest predicts `ln(1 + kg)`;
//! every reported volume is back-transformed and floored.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PlannerError, Result};
use crate::features::{self, EngineeredRecord, FEATURE_COUNT, FeatureOptions, FeatureSet, FeatureVector};
use crate::forest::{ForestParams, RandomForest};
use crate::model::{ForecastRecord, HistoryRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastOptions {
    pub n_estimators: usize,
    pub seed: u64,
    /// Share of date-ordered rows used for training.
    pub train_fraction: f64,
    /// Smallest training split that is still fitted.
    pub min_training_rows: usize,
    /// Months projected by [`ForecastModel::project`] when the caller has no preference.
    pub horizon_months: u32,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Residuals above `mean + outlier_sigma * std` are outliers.
    pub outlier_sigma: f64,
    /// Lowest volume ever reported.
    pub volume_floor: f64,
    pub features: FeatureOptions,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        Self {
            n_estimators: 300,
            seed: 42,
            train_fraction: 0.8,
            min_training_rows: 10,
            horizon_months: 6,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            outlier_sigma: 2.0,
            volume_floor: 0.1,
            features: FeatureOptions::default(),
        }
    }
}

impl ForecastOptions {
    fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_estimators: self.n_estimators,
            seed: self.seed,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
        }
    }
}

/// Reporting label for R².
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelQuality {
    Excellent,
    Good,
    Fair,
    NeedsImprovement,
}

impl ModelQuality {
    pub fn from_r2(r2: f64) -> Self {
        if r2 >= 0.9 {
            Self::Excellent
        } else if r2 >= 0.75 {
            Self::Good
        } else if r2 >= 0.5 {
            Self::Fair
        } else {
            Self::NeedsImprovement
        }
    }
}

impl fmt::Display for ModelQuality {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::NeedsImprovement => "needs improvement",
        };
        formatter.write_str(label)
    }
}

/// Actual against predicted volume for one held-out row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub date: NaiveDate,
    pub site_id: String,
    pub actual_kg: f64,
    pub predicted_kg: f64,
    pub residual_kg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub mae: f64,
    pub r2: f64,
    /// Percent; `None` when every held-out actual is zero.
    pub mape: Option<f64>,
    pub quality: ModelQuality,
    pub comparisons: Vec<Comparison>,
    /// Residual above which a row counts as an outlier for this run.
    pub outlier_threshold: f64,
    /// Outlying comparisons, oldest first.
    pub outliers: Vec<Comparison>,
}

/// Forest trained on the history table, with its held-out evaluation.
#[derive(Debug, Clone)]
pub struct ForecastModel {
    forest: RandomForest,
    features: FeatureSet,
    options: ForecastOptions,
    training_rows: usize,
    evaluation: Evaluation,
}

impl ForecastModel {
    /// Engineer features, split chronologically, fit and evaluate.
    ///
    /// # Errors
    ///
    /// - [`PlannerError::InputValidation`] for an empty or unusable history.
    /// - [`PlannerError::InsufficientData`] when the training split is below
    ///   `min_training_rows`, or nothing is left to evaluate on.
    pub fn train(history: &[HistoryRecord], options: &ForecastOptions) -> Result<Self> {
        let features = features::engineer_features(history, &options.features)?;

        let fraction = options.train_fraction.clamp(0.0, 1.0);
        let split = (features.len() as f64 * fraction).floor() as usize;
        if split < options.min_training_rows {
            return Err(PlannerError::InsufficientData {
                context: "forecast training split".to_string(),
                required: options.min_training_rows,
                available: split,
            });
        }
        if split >= features.len() {
            return Err(PlannerError::InsufficientData {
                context: "forecast evaluation split".to_string(),
                required: 1,
                available: 0,
            });
        }

        let (train, test) = features.records.split_at(split);
        let rows: Vec<[f64; FEATURE_COUNT]> = train.iter().map(|record| record.features.to_array()).collect();
        let targets: Vec<f64> = train.iter().map(|record| features::log_target(record.volume_kg)).collect();
        let forest = RandomForest::fit(&rows, &targets, &options.forest_params())?;

        let evaluation = evaluate(&forest, test, options);
        info!(
            train_rows = split,
            test_rows = test.len(),
            mae = evaluation.mae,
            r2 = evaluation.r2,
            quality = %evaluation.quality,
            outliers = evaluation.outliers.len(),
            "forecast model trained"
        );

        Ok(Self {
            forest,
            features,
            options: options.clone(),
            training_rows: split,
            evaluation,
        })
    }

    pub fn evaluation(&self) -> &Evaluation {
        &self.evaluation
    }

    pub fn feature_set(&self) -> &FeatureSet {
        &self.features
    }

    pub fn options(&self) -> &ForecastOptions {
        &self.options
    }

    pub fn training_rows(&self) -> usize {
        self.training_rows
    }

    /// Back-transformed, floored volume for one feature vector.
    pub fn predict_volume(&self, features: &FeatureVector) -> f64 {
        features::inverse_target(self.forest.predict(&features.to_array()), self.options.volume_floor)
    }

    /// Project every site with history over the next `horizon_months`
    /// calendar months after the latest historical date.
    ///
    /// # Errors
    ///
    /// See [`ForecastModel::project_sites`].
    pub fn project(&self, horizon_months: u32) -> Result<Forecast> {
        let sites: Vec<&str> = self.features.sites.iter().map(String::as_str).collect();
        self.project_sites(&sites, horizon_months)
    }

    /// Project the given sites; sites without history are skipped and listed.
    /// A site named more than once is projected once.
    ///
    /// # Errors
    ///
    /// [`PlannerError::InputValidation`] for a zero horizon or one that runs
    /// past the calendar.
    pub fn project_sites(&self, site_ids: &[&str], horizon_months: u32) -> Result<Forecast> {
        let months = future_months(self.features.latest_date, horizon_months)?;

        let mut seen: HashSet<&str> = HashSet::with_capacity(site_ids.len());
        let mut keys: Vec<(String, NaiveDate)> = Vec::new();
        let mut rows: Vec<[f64; FEATURE_COUNT]> = Vec::new();
        let mut skipped_sites = Vec::new();

        for &site_id in site_ids {
            if !seen.insert(site_id) {
                continue;
            }
            let Some(vectors) = self.projection_features(site_id, &months) else {
                skipped_sites.push(site_id.to_string());
                continue;
            };
            for (&month, vector) in months.iter().zip(&vectors) {
                keys.push((site_id.to_string(), month));
                rows.push(vector.to_array());
            }
        }

        if !skipped_sites.is_empty() {
            warn!(skipped = ?skipped_sites, "sites without history excluded from projection");
        }

        let records: Vec<ForecastRecord> = keys
            .into_iter()
            .zip(self.forest.predict_batch(&rows))
            .map(|((site_id, date), prediction)| ForecastRecord {
                site_id,
                date,
                predicted_volume_kg: features::inverse_target(prediction, self.options.volume_floor),
            })
            .collect();

        info!(records = records.len(), months = months.len(), "forecast projected");

        Ok(Forecast {
            months,
            records,
            skipped_sites,
        })
    }

    /// Feature rows for one site over `months`, or `None` without history.
    ///
    /// Each row keeps the static features of the site's latest record and a
    /// trend slope refitted over its last `slope_window` volumes; only the
    /// calendar features move with the month, continuing the global
    /// month index.
    pub fn projection_features(&self, site_id: &str, months: &[NaiveDate]) -> Option<Vec<FeatureVector>> {
        let history: Vec<&EngineeredRecord> = self.features.site_records(site_id).collect();
        let latest = history.last()?;

        let slope_window = self.options.features.slope_window.max(1);
        let recent: Vec<f64> = history[history.len().saturating_sub(slope_window)..]
            .iter()
            .map(|record| record.volume_kg)
            .collect();
        let mut carrier = latest.features;
        carrier.trend_slope = features::trend_slope(&recent);

        let rows = months
            .iter()
            .map(|&month| {
                let mut row = carrier;
                row.set_calendar(month, self.features.month_index(month));
                row
            })
            .collect();
        Some(rows)
    }

    /// Aggregate a projection for reporting.
    ///
    /// The baseline compares against history in the trailing window with the
    /// same number of days as the forecast span. Months differ in length, so
    /// this is an approximation of "the same calendar months", not an exact
    /// normalization.
    pub fn summarize(&self, forecast: &Forecast, top_n: usize) -> ForecastSummary {
        let months = forecast.monthly_totals();
        let trend_change_kg = match (months.first(), months.last()) {
            (Some(first), Some(last)) => last.total_kg - first.total_kg,
            _ => 0.0,
        };

        ForecastSummary {
            trend: Trend::from_change(trend_change_kg),
            trend_change_kg,
            top_sites: forecast.top_sites(top_n),
            baseline: self.baseline(forecast),
            months,
        }
    }

    fn baseline(&self, forecast: &Forecast) -> Option<BaselineComparison> {
        let (first, last) = (forecast.months.first()?, forecast.months.last()?);
        let span_end = last.checked_add_months(Months::new(1))?.pred_opt()?;
        let span_days = (span_end - *first).num_days() + 1;

        let window_end = self.features.latest_date;
        let window_start = window_end - chrono::Duration::days(span_days - 1);
        let actual: Vec<f64> = self
            .features
            .records
            .iter()
            .filter(|record| record.date >= window_start && record.date <= window_end)
            .map(|record| record.volume_kg)
            .collect();
        if actual.is_empty() || forecast.records.is_empty() {
            return None;
        }

        let actual_mean_kg = actual.iter().sum::<f64>() / actual.len() as f64;
        let predicted_mean_kg = forecast.records.iter().map(|record| record.predicted_volume_kg).sum::<f64>()
            / forecast.records.len() as f64;

        Some(BaselineComparison {
            window_start,
            window_end,
            actual_mean_kg,
            predicted_mean_kg,
            difference_kg: predicted_mean_kg - actual_mean_kg,
        })
    }
}

/// Output of a projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// First day of each forecast month, ascending.
    pub months: Vec<NaiveDate>,
    /// One record per (site, month), grouped by site.
    pub records: Vec<ForecastRecord>,
    pub skipped_sites: Vec<String>,
}

impl Forecast {
    /// City-wide totals per month with month-over-month change.
    pub fn monthly_totals(&self) -> Vec<MonthlyForecast> {
        let mut previous: Option<f64> = None;
        self.months
            .iter()
            .map(|&month| {
                let volumes: Vec<f64> = self
                    .records
                    .iter()
                    .filter(|record| record.date == month)
                    .map(|record| record.predicted_volume_kg)
                    .collect();
                let total_kg: f64 = volumes.iter().sum();
                let mean_kg = if volumes.is_empty() {
                    0.0
                } else {
                    total_kg / volumes.len() as f64
                };
                let change_kg = previous.map(|prior| total_kg - prior);
                previous = Some(total_kg);

                MonthlyForecast {
                    month,
                    total_kg,
                    mean_kg,
                    change_kg,
                }
            })
            .collect()
    }

    /// Sites ranked by mean predicted volume, highest first.
    pub fn top_sites(&self, n: usize) -> Vec<SiteVolume> {
        let mut order: Vec<&str> = Vec::new();
        let mut sums: HashMap<&str, (f64, usize)> = HashMap::new();
        for record in &self.records {
            let entry = sums.entry(record.site_id.as_str()).or_insert_with(|| {
                order.push(record.site_id.as_str());
                (0.0, 0)
            });
            entry.0 += record.predicted_volume_kg;
            entry.1 += 1;
        }

        let mut ranked: Vec<SiteVolume> = order
            .into_iter()
            .map(|site_id| {
                let (sum, count) = sums[site_id];
                SiteVolume {
                    site_id: site_id.to_string(),
                    mean_kg: sum / count as f64,
                }
            })
            .collect();
        ranked.sort_by(|a, b| b.mean_kg.total_cmp(&a.mean_kg));
        ranked.truncate(n);
        ranked
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyForecast {
    pub month: NaiveDate,
    pub total_kg: f64,
    pub mean_kg: f64,
    /// Change against the previous forecast month; `None` for the first.
    pub change_kg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteVolume {
    pub site_id: String,
    pub mean_kg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Increasing,
    Decreasing,
    Flat,
}

impl Trend {
    fn from_change(change: f64) -> Self {
        if change > 0.0 {
            Self::Increasing
        } else if change < 0.0 {
            Self::Decreasing
        } else {
            Self::Flat
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineComparison {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub actual_mean_kg: f64,
    pub predicted_mean_kg: f64,
    pub difference_kg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub months: Vec<MonthlyForecast>,
    pub trend: Trend,
    /// Last month total minus first month total.
    pub trend_change_kg: f64,
    pub top_sites: Vec<SiteVolume>,
    pub baseline: Option<BaselineComparison>,
}

/// First day of each of the `horizon` months following `latest`.
///
/// # Errors
///
/// [`PlannerError::InputValidation`] for a zero horizon or a date past the
/// calendar range.
pub fn future_months(latest: NaiveDate, horizon: u32) -> Result<Vec<NaiveDate>> {
    if horizon == 0 {
        return Err(PlannerError::InputValidation("forecast horizon must be at least one month".to_string()));
    }
    let month_start = latest
        .with_day(1)
        .ok_or_else(|| PlannerError::InputValidation(format!("no month start for {latest}")))?;

    (1..=horizon)
        .map(|offset| {
            month_start
                .checked_add_months(Months::new(offset))
                .ok_or_else(|| PlannerError::InputValidation("forecast horizon runs past the calendar".to_string()))
        })
        .collect()
}

fn evaluate(forest: &RandomForest, test: &[EngineeredRecord], options: &ForecastOptions) -> Evaluation {
    let rows: Vec<[f64; FEATURE_COUNT]> = test.iter().map(|record| record.features.to_array()).collect();
    let predicted: Vec<f64> = forest
        .predict_batch(&rows)
        .into_iter()
        .map(|prediction| features::inverse_target(prediction, options.volume_floor))
        .collect();
    let actual: Vec<f64> = test.iter().map(|record| record.volume_kg).collect();

    let comparisons: Vec<Comparison> = test
        .iter()
        .zip(&predicted)
        .map(|(record, &predicted_kg)| Comparison {
            date: record.date,
            site_id: record.site_id.clone(),
            actual_kg: record.volume_kg,
            predicted_kg,
            residual_kg: (record.volume_kg - predicted_kg).abs(),
        })
        .collect();

    let residuals: Vec<f64> = comparisons.iter().map(|comparison| comparison.residual_kg).collect();
    let (residual_mean, residual_std) = features::mean_std(&residuals);
    let outlier_threshold = residual_mean + options.outlier_sigma * residual_std;
    let mut outliers: Vec<Comparison> = comparisons
        .iter()
        .filter(|comparison| comparison.residual_kg > outlier_threshold)
        .cloned()
        .collect();
    outliers.sort_by_key(|comparison| comparison.date);

    let r2 = r2_score(&actual, &predicted);
    Evaluation {
        mae: residual_mean,
        r2,
        mape: mape(&actual, &predicted),
        quality: ModelQuality::from_r2(r2),
        comparisons,
        outlier_threshold,
        outliers,
    }
}

/// Coefficient of determination. A constant target scores 1 when matched
/// exactly and 0 otherwise.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_res: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum();
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Mean absolute percentage error over non-zero actuals.
pub fn mape(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    let errors: Vec<f64> = actual
        .iter()
        .zip(predicted)
        .filter(|(a, _)| **a != 0.0)
        .map(|(a, p)| ((a - p) / a).abs())
        .collect();
    if errors.is_empty() {
        return None;
    }
    Some(errors.iter().sum::<f64>() / errors.len() as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_thresholds() {
        assert_eq!(ModelQuality::from_r2(0.95), ModelQuality::Excellent);
        assert_eq!(ModelQuality::from_r2(0.9), ModelQuality::Excellent);
        assert_eq!(ModelQuality::from_r2(0.8), ModelQuality::Good);
        assert_eq!(ModelQuality::from_r2(0.5), ModelQuality::Fair);
        assert_eq!(ModelQuality::from_r2(-1.0), ModelQuality::NeedsImprovement);
        assert_eq!(ModelQuality::NeedsImprovement.to_string(), "needs improvement");
    }

    #[test]
    fn test_r2_perfect_and_mean() {
        assert_eq!(r2_score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0);
        assert!(r2_score(&[1.0, 2.0, 3.0], &[2.0, 2.0, 2.0]).abs() < 1e-12);
        assert_eq!(r2_score(&[4.0, 4.0], &[4.0, 4.0]), 1.0);
        assert_eq!(r2_score(&[4.0, 4.0], &[3.0, 4.0]), 0.0);
    }

    #[test]
    fn test_mape_skips_zero_actuals() {
        let value = mape(&[100.0, 0.0, 200.0], &[110.0, 5.0, 180.0]).unwrap();
        assert!((value - 10.0).abs() < 1e-9);
        assert_eq!(mape(&[0.0], &[1.0]), None);
    }

    #[test]
    fn test_future_months_follow_latest_date() {
        let latest = NaiveDate::from_ymd_opt(2020, 11, 17).unwrap();
        let months = future_months(latest, 3).unwrap();
        assert_eq!(
            months,
            vec![
                NaiveDate::from_ymd_opt(2020, 12, 1).unwrap(),
                NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2021, 2, 1).unwrap(),
            ]
        );
        assert!(matches!(future_months(latest, 0), Err(PlannerError::InputValidation(_))));
    }

    #[test]
    fn test_monthly_totals_and_top_sites() {
        let jan = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let feb = NaiveDate::from_ymd_opt(2021, 2, 1).unwrap();
        let record = |site: &str, date, kg| ForecastRecord {
            site_id: site.to_string(),
            date,
            predicted_volume_kg: kg,
        };
        let forecast = Forecast {
            months: vec![jan, feb],
            records: vec![
                record("A", jan, 10.0),
                record("A", feb, 20.0),
                record("B", jan, 30.0),
                record("B", feb, 50.0),
            ],
            skipped_sites: Vec::new(),
        };

        let totals = forecast.monthly_totals();
        assert_eq!(totals[0].total_kg, 40.0);
        assert_eq!(totals[0].change_kg, None);
        assert_eq!(totals[1].total_kg, 70.0);
        assert_eq!(totals[1].mean_kg, 35.0);
        assert_eq!(totals[1].change_kg, Some(30.0));

        let top = forecast.top_sites(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].site_id, "B");
        assert_eq!(top[0].mean_kg, 40.0);
    }
}
