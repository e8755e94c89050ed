//! Table rows and the per-session context.
//!
//! Rows mirror the tabular contracts the dashboard loads: optional cells
//! stay `Option` so a missing value is never confused with zero.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::forecast::{ForecastModel, ForecastOptions};
use crate::geo::Coordinate;
use crate::route::{self, NearestDisposal, RouteOptions, RouteResult};
use crate::schedule::{self, Schedule, ScheduleOptions};
use crate::traits::Located;

/// Columns every collection-site table must carry.
pub const COLLECTION_SITE_COLUMNS: &[&str] = &["id", "latitude", "longitude", "capacity", "current_volume"];

/// Columns every disposal-site table must carry.
pub const DISPOSAL_SITE_COLUMNS: &[&str] = &["name", "latitude", "longitude"];

/// Columns every history table must carry.
pub const HISTORY_COLUMNS: &[&str] = &[
    "site_id",
    "date",
    "volume_kg",
    "latitude",
    "longitude",
    "capacity",
    "fill_ratio",
];

/// Reference fleet size when no roster is supplied.
pub const DEFAULT_FLEET_SIZE: usize = 10;

/// Check a table header against its required columns.
///
/// # Errors
///
/// Returns [`PlannerError::InputValidation`] naming every missing column.
pub fn require_columns<S: AsRef<str>>(table: &str, available: &[S], required: &[&str]) -> Result<()> {
    let present: HashSet<&str> = available.iter().map(|column| column.as_ref().trim()).collect();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|column| !present.contains(column))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PlannerError::InputValidation(format!(
            "{table} table is missing required columns: {}",
            missing.join(", ")
        )))
    }
}

/// Fill ratio in percent; zero when capacity is missing, zero or negative.
pub fn fill_ratio(current_volume: Option<f64>, capacity: Option<f64>) -> f64 {
    match (current_volume, capacity) {
        (Some(volume), Some(capacity)) if volume.is_finite() && capacity.is_finite() && capacity > 0.0 => {
            volume / capacity * 100.0
        }
        _ => 0.0,
    }
}

/// A collection point (TPS).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSite {
    pub id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub capacity: Option<f64>,
    pub current_volume: Option<f64>,
    #[serde(default)]
    pub nearest_disposal_site: Option<String>,
}

impl CollectionSite {
    pub fn new(id: impl Into<String>, lat: f64, lon: f64, capacity: f64, current_volume: f64) -> Self {
        Self {
            id: id.into(),
            latitude: Some(lat),
            longitude: Some(lon),
            capacity: Some(capacity),
            current_volume: Some(current_volume),
            nearest_disposal_site: None,
        }
    }

    pub fn with_disposal_site(mut self, name: impl Into<String>) -> Self {
        self.nearest_disposal_site = Some(name.into());
        self
    }

    /// Current volume over capacity, in percent. Always derived, never stored.
    pub fn fill_ratio(&self) -> f64 {
        fill_ratio(self.current_volume, self.capacity)
    }
}

impl Located for CollectionSite {
    fn id(&self) -> &str {
        &self.id
    }

    fn location(&self) -> Option<Coordinate> {
        Coordinate::from_parts(self.latitude, self.longitude)
    }
}

/// A disposal site (TPA).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisposalSite {
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl DisposalSite {
    pub fn new(name: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            name: name.into(),
            latitude: Some(lat),
            longitude: Some(lon),
        }
    }
}

impl Located for DisposalSite {
    fn id(&self) -> &str {
        &self.name
    }

    fn location(&self) -> Option<Coordinate> {
        Coordinate::from_parts(self.latitude, self.longitude)
    }
}

/// One historical observation, with the site attributes as they were then.
///
/// `date` stays raw text; rows whose date does not parse are dropped by
/// feature engineering rather than at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub site_id: Option<String>,
    pub date: String,
    pub volume_kg: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub fill_ratio: Option<f64>,
}

impl HistoryRecord {
    pub fn new(site_id: impl Into<String>, date: impl Into<String>, volume_kg: f64) -> Self {
        Self {
            site_id: Some(site_id.into()),
            date: date.into(),
            volume_kg: Some(volume_kg),
            latitude: None,
            longitude: None,
            capacity: None,
            fill_ratio: None,
        }
    }

    pub fn with_site(mut self, lat: f64, lon: f64, capacity: f64, fill_ratio: f64) -> Self {
        self.latitude = Some(lat);
        self.longitude = Some(lon);
        self.capacity = Some(capacity);
        self.fill_ratio = Some(fill_ratio);
        self
    }
}

/// A truck and the disposal-site territory it serves for the horizon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Truck {
    pub id: String,
    #[serde(default)]
    pub territory: Option<String>,
}

impl Truck {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            territory: None,
        }
    }

    /// `Truck 1` .. `Truck n`.
    pub fn fleet(size: usize) -> Vec<Self> {
        (1..=size).map(|n| Self::new(format!("Truck {n}"))).collect()
    }
}

/// Predicted volume for one site in one future month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub site_id: String,
    /// First day of the forecast month.
    pub date: NaiveDate,
    pub predicted_volume_kg: f64,
}

/// Tables loaded once per session and shared read-only by every operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteTables {
    collection_sites: Vec<CollectionSite>,
    disposal_sites: Vec<DisposalSite>,
    history: Vec<HistoryRecord>,
    trucks: Vec<Truck>,
}

impl SiteTables {
    /// Bundle the site tables, with the reference fleet and no history.
    ///
    /// # Errors
    ///
    /// Returns [`PlannerError::InputValidation`] when a site id or disposal
    /// site name appears twice.
    pub fn new(collection_sites: Vec<CollectionSite>, disposal_sites: Vec<DisposalSite>) -> Result<Self> {
        ensure_unique("collection site", collection_sites.iter().map(|site| site.id.as_str()))?;
        ensure_unique("disposal site", disposal_sites.iter().map(|site| site.name.as_str()))?;

        Ok(Self {
            collection_sites,
            disposal_sites,
            history: Vec::new(),
            trucks: Truck::fleet(DEFAULT_FLEET_SIZE),
        })
    }

    pub fn with_history(mut self, history: Vec<HistoryRecord>) -> Self {
        self.history = history;
        self
    }

    pub fn with_trucks(mut self, trucks: Vec<Truck>) -> Self {
        self.trucks = trucks;
        self
    }

    pub fn collection_sites(&self) -> &[CollectionSite] {
        &self.collection_sites
    }

    pub fn disposal_sites(&self) -> &[DisposalSite] {
        &self.disposal_sites
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    pub fn trucks(&self) -> &[Truck] {
        &self.trucks
    }

    pub fn collection_site(&self, id: &str) -> Option<&CollectionSite> {
        self.collection_sites.iter().find(|site| site.id == id)
    }

    /// Resolve ids to sites, keeping the caller's order.
    ///
    /// # Errors
    ///
    /// [`PlannerError::InsufficientData`] for an empty selection,
    /// [`PlannerError::InputValidation`] for an unknown or repeated id.
    pub fn select(&self, ids: &[&str]) -> Result<Vec<&CollectionSite>> {
        if ids.is_empty() {
            return Err(PlannerError::InsufficientData {
                context: "route selection".to_string(),
                required: 1,
                available: 0,
            });
        }
        ensure_unique("selected site", ids.iter().copied())?;

        ids.iter()
            .map(|id| {
                self.collection_site(id)
                    .ok_or_else(|| PlannerError::InputValidation(format!("unknown collection site '{id}'")))
            })
            .collect()
    }

    /// Greedy route over the selected ids, in selection order.
    ///
    /// # Errors
    ///
    /// See [`SiteTables::select`] and [`route::build_route`].
    pub fn route(&self, ids: &[&str], options: &RouteOptions) -> Result<RouteResult> {
        let selection = self.select(ids)?;
        route::build_route(&selection, &self.disposal_sites, options)
    }

    /// Closest disposal site to one collection site.
    ///
    /// # Errors
    ///
    /// See [`route::nearest_disposal`].
    pub fn nearest_disposal(&self, id: &str, options: &RouteOptions) -> Result<NearestDisposal> {
        let site = self
            .collection_site(id)
            .ok_or_else(|| PlannerError::InputValidation(format!("unknown collection site '{id}'")))?;
        route::nearest_disposal(site, &self.disposal_sites, options)
    }

    /// Truck assignment over the whole collection-site table.
    ///
    /// # Errors
    ///
    /// See [`schedule::assign_trucks`].
    pub fn schedule(&self, options: &ScheduleOptions) -> Result<Schedule> {
        schedule::assign_trucks(&self.collection_sites, &self.disposal_sites, &self.trucks, options)
    }

    /// Train a forecast model on the history table.
    ///
    /// # Errors
    ///
    /// See [`ForecastModel::train`].
    pub fn train_forecast(&self, options: &ForecastOptions) -> Result<ForecastModel> {
        ForecastModel::train(&self.history, options)
    }
}

fn ensure_unique<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(PlannerError::InputValidation(format!("duplicate {kind} id '{id}'")));
        }
    }
    Ok(())
}
