//! Greedy nearest-neighbour route construction.
//!
//! The route starts at the first selected site (never a spatially chosen
//! one), repeatedly steps to the closest unvisited site by planar distance,
//! and ends at the disposal site closest to the last visited site. Reported
//! distances are great-circle.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PlannerError, Result};
use crate::geo::{Coordinate, Haversine, Planar};
use crate::traits::{DistanceMetric, Located};

/// Average truck speed assumption for time estimation.
const DEFAULT_SPEED_KMH: f64 = 40.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteOptions {
    /// Assumed average driving speed in km/h.
    pub speed_kmh: f64,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
        }
    }
}

/// One leg of a route with its great-circle length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSegment {
    pub from: String,
    pub to: String,
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    /// Visiting order; the first entry is the first selected site.
    pub site_ids: Vec<String>,
    /// Terminal disposal site.
    pub disposal_site: String,
    /// Site-to-site legs followed by the final leg to the disposal site.
    pub segments: Vec<RouteSegment>,
    pub total_distance_km: f64,
    pub average_segment_km: f64,
    pub estimated_minutes: f64,
    /// Selected sites left out for missing coordinates.
    pub excluded: Vec<String>,
}

impl RouteResult {
    /// Length of the final leg to the disposal site.
    pub fn disposal_distance_km(&self) -> f64 {
        self.segments.last().map_or(0.0, |segment| segment.distance_km)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestDisposal {
    pub site_id: String,
    pub disposal_site: String,
    pub distance_km: f64,
    pub estimated_minutes: f64,
}

/// Build a single route through `selection` ending at the nearest disposal site.
///
/// Sites without usable coordinates are dropped (and listed in
/// [`RouteResult::excluded`]) before the search runs.
///
/// # Errors
///
/// - [`PlannerError::InsufficientData`] when `selection` is empty.
/// - [`PlannerError::InputValidation`] when a site id appears twice.
/// - [`PlannerError::DegenerateGeometry`] when no selected site, or no
///   disposal site, has valid coordinates.
pub fn build_route<S, D>(selection: &[S], disposal_sites: &[D], options: &RouteOptions) -> Result<RouteResult>
where
    S: Located,
    D: Located,
{
    if selection.is_empty() {
        return Err(PlannerError::InsufficientData {
            context: "route selection".to_string(),
            required: 1,
            available: 0,
        });
    }
    let mut seen = HashSet::with_capacity(selection.len());
    if let Some(repeated) = selection.iter().map(Located::id).find(|id| !seen.insert(*id)) {
        return Err(PlannerError::InputValidation(format!(
            "site '{repeated}' is selected more than once"
        )));
    }

    let (stops, excluded) = split_valid(selection);
    if !excluded.is_empty() {
        warn!(excluded = ?excluded, "selected sites without coordinates left out of route");
    }
    if stops.is_empty() {
        return Err(PlannerError::DegenerateGeometry(
            "no selected collection site has valid coordinates".to_string(),
        ));
    }

    let (terminals, _) = split_valid(disposal_sites);
    if terminals.is_empty() {
        return Err(PlannerError::DegenerateGeometry(
            "no disposal site has valid coordinates".to_string(),
        ));
    }

    let locations: Vec<Coordinate> = stops.iter().map(|(_, location)| *location).collect();
    let matrix = Planar.matrix_for(&locations);
    let order = greedy_order(&matrix);

    let last = order.last().copied().unwrap_or(0);
    let terminal_locations: Vec<Coordinate> = terminals.iter().map(|(_, location)| *location).collect();
    let terminal = nearest_index(&Planar, locations[last], &terminal_locations).unwrap_or(0);
    let (terminal_site, terminal_location) = terminals[terminal];

    let mut segments: Vec<RouteSegment> = order
        .windows(2)
        .map(|pair| RouteSegment {
            from: stops[pair[0]].0.id().to_string(),
            to: stops[pair[1]].0.id().to_string(),
            distance_km: Haversine.distance_km(locations[pair[0]], locations[pair[1]]),
        })
        .collect();
    segments.push(RouteSegment {
        from: stops[last].0.id().to_string(),
        to: terminal_site.id().to_string(),
        distance_km: Haversine.distance_km(locations[last], terminal_location),
    });

    let total_distance_km: f64 = segments.iter().map(|segment| segment.distance_km).sum();
    let average_segment_km = total_distance_km / segments.len() as f64;

    let result = RouteResult {
        site_ids: order.iter().map(|&i| stops[i].0.id().to_string()).collect(),
        disposal_site: terminal_site.id().to_string(),
        segments,
        total_distance_km,
        average_segment_km,
        estimated_minutes: travel_minutes(total_distance_km, options.speed_kmh),
        excluded,
    };

    info!(
        sites = result.site_ids.len(),
        disposal_site = %result.disposal_site,
        total_km = result.total_distance_km,
        "route built"
    );

    Ok(result)
}

/// Closest disposal site to a single collection site.
///
/// # Errors
///
/// [`PlannerError::DegenerateGeometry`] when the site, or every disposal
/// site, lacks coordinates.
pub fn nearest_disposal<S, D>(site: &S, disposal_sites: &[D], options: &RouteOptions) -> Result<NearestDisposal>
where
    S: Located,
    D: Located,
{
    let origin = site.location().ok_or_else(|| {
        PlannerError::DegenerateGeometry(format!("collection site '{}' has no valid coordinates", site.id()))
    })?;

    let (terminals, _) = split_valid(disposal_sites);
    let terminal_locations: Vec<Coordinate> = terminals.iter().map(|(_, location)| *location).collect();
    let Some(index) = nearest_index(&Planar, origin, &terminal_locations) else {
        return Err(PlannerError::DegenerateGeometry(
            "no disposal site has valid coordinates".to_string(),
        ));
    };

    let (terminal, location) = terminals[index];
    let distance_km = Haversine.distance_km(origin, location);

    Ok(NearestDisposal {
        site_id: site.id().to_string(),
        disposal_site: terminal.id().to_string(),
        distance_km,
        estimated_minutes: travel_minutes(distance_km, options.speed_kmh),
    })
}

/// Convert a distance in km to driving minutes.
pub fn travel_minutes(km: f64, speed_kmh: f64) -> f64 {
    if speed_kmh > 0.0 {
        km / speed_kmh * 60.0
    } else {
        0.0
    }
}

/// Index of the candidate closest to `from`; ties go to the earliest candidate.
pub(crate) fn nearest_index<M: DistanceMetric>(metric: &M, from: Coordinate, candidates: &[Coordinate]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let distance = metric.distance_km(from, *candidate);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((index, distance)),
        }
    }
    best.map(|(index, _)| index)
}

/// Visiting order over matrix indices, starting at index 0.
fn greedy_order(matrix: &[Vec<f64>]) -> Vec<usize> {
    let n = matrix.len();
    let mut order = Vec::with_capacity(n);
    if n == 0 {
        return order;
    }

    let mut current = 0;
    order.push(current);
    let mut remaining: Vec<usize> = (1..n).collect();

    while !remaining.is_empty() {
        let mut best_position = 0;
        let mut best_distance = f64::INFINITY;
        for (position, &candidate) in remaining.iter().enumerate() {
            let distance = matrix[current][candidate];
            // Strict comparison keeps the first-encountered candidate on ties.
            if distance < best_distance {
                best_distance = distance;
                best_position = position;
            }
        }

        current = remaining.remove(best_position);
        debug!(next = current, distance_km = best_distance, "greedy hop");
        order.push(current);
    }

    order
}

fn split_valid<L: Located>(items: &[L]) -> (Vec<(&L, Coordinate)>, Vec<String>) {
    let mut valid = Vec::with_capacity(items.len());
    let mut excluded = Vec::new();
    for item in items {
        match item.location() {
            Some(location) => valid.push((item, location)),
            None => excluded.push(item.id().to_string()),
        }
    }
    (valid, excluded)
}
