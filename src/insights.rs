//! Summary statistics over the site and history tables.
//!
//! These back the dashboard panels: fill alerts, top-N rankings, the monthly
//! city-wide trend and the capacity/volume relationship.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::features::parse_date;
use crate::model::{CollectionSite, HistoryRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightOptions {
    /// Fill ratio (percent) at which a site counts as full.
    pub fill_threshold: f64,
    /// Width of the "near full" band below the threshold.
    pub near_band: f64,
}

impl Default for InsightOptions {
    fn default() -> Self {
        Self {
            fill_threshold: 85.0,
            near_band: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillLevel {
    Full,
    NearFull,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillAlert {
    pub site_id: String,
    pub fill_ratio: f64,
    pub level: FillLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    pub threshold: f64,
    pub average_fill: f64,
    /// Every site, in input order.
    pub alerts: Vec<FillAlert>,
}

impl FillReport {
    pub fn at_level(&self, level: FillLevel) -> impl Iterator<Item = &FillAlert> {
        self.alerts.iter().filter(move |alert| alert.level == level)
    }
}

/// Classify every site against the fill threshold.
///
/// # Errors
///
/// [`PlannerError::InputValidation`] when the threshold is outside `50..=100`
/// or the band is negative.
pub fn fill_report(sites: &[CollectionSite], options: &InsightOptions) -> Result<FillReport> {
    let threshold = options.fill_threshold;
    if !(50.0..=100.0).contains(&threshold) {
        return Err(PlannerError::InputValidation(format!(
            "fill threshold must be within 50..=100, got {threshold}"
        )));
    }
    if options.near_band.is_nan() || options.near_band < 0.0 {
        return Err(PlannerError::InputValidation("near-full band must not be negative".to_string()));
    }

    let alerts: Vec<FillAlert> = sites
        .iter()
        .map(|site| {
            let fill_ratio = site.fill_ratio();
            let level = if fill_ratio >= threshold {
                FillLevel::Full
            } else if fill_ratio >= threshold - options.near_band {
                FillLevel::NearFull
            } else {
                FillLevel::Normal
            };
            FillAlert {
                site_id: site.id.clone(),
                fill_ratio,
                level,
            }
        })
        .collect();

    let average_fill = if alerts.is_empty() {
        0.0
    } else {
        alerts.iter().map(|alert| alert.fill_ratio).sum::<f64>() / alerts.len() as f64
    };

    Ok(FillReport {
        threshold,
        average_fill,
        alerts,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankingCriterion {
    CurrentVolume,
    /// Sum of `volume_kg` over the history table.
    HistoricalVolume,
    FillRatio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSite {
    pub site_id: String,
    pub value: f64,
}

/// The `n` highest sites by `criterion`, ties kept in input order.
pub fn top_sites(
    sites: &[CollectionSite],
    history: &[HistoryRecord],
    criterion: RankingCriterion,
    n: usize,
) -> Vec<RankedSite> {
    let mut ranked: Vec<RankedSite> = match criterion {
        RankingCriterion::CurrentVolume => sites
            .iter()
            .map(|site| RankedSite {
                site_id: site.id.clone(),
                value: site.current_volume.filter(|volume| volume.is_finite()).unwrap_or(0.0),
            })
            .collect(),
        RankingCriterion::FillRatio => sites
            .iter()
            .map(|site| RankedSite {
                site_id: site.id.clone(),
                value: site.fill_ratio(),
            })
            .collect(),
        RankingCriterion::HistoricalVolume => historical_totals(history),
    };

    ranked.sort_by(|a, b| b.value.total_cmp(&a.value));
    ranked.truncate(n);
    ranked
}

fn historical_totals(history: &[HistoryRecord]) -> Vec<RankedSite> {
    let mut order: Vec<&str> = Vec::new();
    let mut totals: HashMap<&str, f64> = HashMap::new();
    for record in history {
        let (Some(site_id), Some(volume)) = (record.site_id.as_deref(), record.volume_kg) else {
            continue;
        };
        if !volume.is_finite() {
            continue;
        }
        *totals.entry(site_id).or_insert_with(|| {
            order.push(site_id);
            0.0
        }) += volume;
    }

    order
        .into_iter()
        .map(|site_id| RankedSite {
            site_id: site_id.to_string(),
            value: totals[site_id],
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyVolume {
    /// First day of the month.
    pub month: NaiveDate,
    pub total_kg: f64,
}

/// City-wide volume per calendar month, oldest first. Rows with an
/// unparseable date or no volume are ignored.
pub fn monthly_totals(history: &[HistoryRecord]) -> Vec<MonthlyVolume> {
    let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for record in history {
        let Some(volume) = record.volume_kg.filter(|volume| volume.is_finite()) else {
            continue;
        };
        let Some(month) = parse_date(&record.date).and_then(|date| date.with_day(1)) else {
            continue;
        };
        *totals.entry(month).or_insert(0.0) += volume;
    }

    totals
        .into_iter()
        .map(|(month, total_kg)| MonthlyVolume { month, total_kg })
        .collect()
}

/// Pearson correlation of capacity against current volume.
///
/// `None` with fewer than two complete sites or when either column is constant.
pub fn capacity_volume_correlation(sites: &[CollectionSite]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = sites
        .iter()
        .filter_map(|site| Some((site.capacity?, site.current_volume?)))
        .filter(|(capacity, volume)| capacity.is_finite() && volume.is_finite())
        .collect();
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in &pairs {
        covariance += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }

    Some(covariance / (var_x.sqrt() * var_y.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sites() -> Vec<CollectionSite> {
        vec![
            CollectionSite::new("A", 28.61, 77.20, 100.0, 90.0),
            CollectionSite::new("B", 28.62, 77.21, 200.0, 160.0),
            CollectionSite::new("C", 28.63, 77.22, 400.0, 100.0),
        ]
    }

    #[test]
    fn test_fill_levels() {
        let report = fill_report(&sites(), &InsightOptions::default()).unwrap();
        let levels: Vec<FillLevel> = report.alerts.iter().map(|alert| alert.level).collect();
        assert_eq!(levels, vec![FillLevel::Full, FillLevel::NearFull, FillLevel::Normal]);
        assert!((report.average_fill - 65.0).abs() < 1e-9);
        assert_eq!(report.at_level(FillLevel::Full).count(), 1);
    }

    #[test]
    fn test_fill_threshold_validated() {
        let options = InsightOptions {
            fill_threshold: 120.0,
            ..InsightOptions::default()
        };
        assert!(fill_report(&sites(), &options).is_err());
        let options = InsightOptions {
            fill_threshold: 40.0,
            ..InsightOptions::default()
        };
        assert!(fill_report(&sites(), &options).is_err());
    }

    #[test]
    fn test_top_sites_by_criterion() {
        let history = vec![
            HistoryRecord::new("C", "2020-01-01", 50.0),
            HistoryRecord::new("A", "2020-01-01", 70.0),
            HistoryRecord::new("C", "2020-02-01", 30.0),
        ];

        let by_volume = top_sites(&sites(), &history, RankingCriterion::CurrentVolume, 2);
        assert_eq!(by_volume[0].site_id, "B");
        assert_eq!(by_volume[1].site_id, "C");

        let by_history = top_sites(&sites(), &history, RankingCriterion::HistoricalVolume, 5);
        assert_eq!(by_history.len(), 2);
        assert_eq!(by_history[0].site_id, "C");
        assert_eq!(by_history[0].value, 80.0);

        let by_fill = top_sites(&sites(), &history, RankingCriterion::FillRatio, 1);
        assert_eq!(by_fill[0].site_id, "A");
    }

    #[test]
    fn test_monthly_totals_bucket_by_month() {
        let history = vec![
            HistoryRecord::new("A", "2020-02-14", 5.0),
            HistoryRecord::new("A", "2020-01-03", 1.0),
            HistoryRecord::new("B", "2020-01-28", 2.0),
            HistoryRecord::new("B", "garbage", 100.0),
        ];
        let totals = monthly_totals(&history);
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].month, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(totals[0].total_kg, 3.0);
        assert_eq!(totals[1].total_kg, 5.0);
    }

    #[test]
    fn test_correlation() {
        let linear = vec![
            CollectionSite::new("A", 0.0, 0.0, 100.0, 10.0),
            CollectionSite::new("B", 0.0, 0.0, 200.0, 20.0),
            CollectionSite::new("C", 0.0, 0.0, 300.0, 30.0),
        ];
        let r = capacity_volume_correlation(&linear).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        assert_eq!(capacity_volume_correlation(&linear[..1]), None);
    }
}
