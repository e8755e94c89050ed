//! Deterministic truck-to-site assignment.
//!
//! Sites are grouped by disposal-site territory. Within a territory they are
//! ranked by descending fill ratio (stable, so equal ratios keep input order)
//! and dealt round-robin over the trucks the fleet partition gives that
//! territory. No randomness: identical inputs give identical schedules.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PlannerError, Result};
use crate::geo::{Coordinate, Planar};
use crate::model::{CollectionSite, DisposalSite, Truck};
use crate::route::nearest_index;
use crate::traits::Located;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOptions {
    /// Trucks per territory, in disposal-site table order.
    pub truck_partition: Vec<usize>,
    /// Truck id for territories without an allocation.
    pub reserve_truck_id: String,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            truck_partition: vec![3, 3, 4],
            reserve_truck_id: "RESERVE".to_string(),
        }
    }
}

/// One row of the schedule table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub site_id: String,
    /// Disposal site the site drains to; `None` when it cannot be resolved.
    pub territory: Option<String>,
    /// Zero-based priority within the territory.
    pub rank: usize,
    pub fill_ratio: f64,
    pub capacity: Option<f64>,
    pub current_volume: Option<f64>,
    pub truck_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Grouped by territory, then by rank.
    pub entries: Vec<ScheduleEntry>,
    /// The roster with each truck's territory filled in.
    pub fleet: Vec<Truck>,
}

impl Schedule {
    pub fn entries_for_truck<'a>(&'a self, truck_id: &'a str) -> impl Iterator<Item = &'a ScheduleEntry> + 'a {
        self.entries.iter().filter(move |entry| entry.truck_id == truck_id)
    }

    pub fn truck_for(&self, site_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.site_id == site_id)
            .map(|entry| entry.truck_id.as_str())
    }
}

struct Territory<'a> {
    name: Option<String>,
    sites: Vec<&'a CollectionSite>,
    trucks: Vec<String>,
}

/// Assign every collection site to one truck.
///
/// A site's territory is its `nearest_disposal_site` when set, otherwise the
/// planar-nearest disposal site. Territories follow disposal-site table
/// order, then unknown territory names in first-seen order, then sites with
/// no territory at all. Only table territories receive trucks.
///
/// # Errors
///
/// [`PlannerError::InputValidation`] when `sites` is empty.
pub fn assign_trucks(
    sites: &[CollectionSite],
    disposal_sites: &[DisposalSite],
    trucks: &[Truck],
    options: &ScheduleOptions,
) -> Result<Schedule> {
    if sites.is_empty() {
        return Err(PlannerError::InputValidation("collection site table is empty".to_string()));
    }

    let mut territories: Vec<Territory<'_>> = disposal_sites
        .iter()
        .map(|disposal| Territory {
            name: Some(disposal.name.clone()),
            sites: Vec::new(),
            trucks: Vec::new(),
        })
        .collect();

    let terminals: Vec<(usize, Coordinate)> = disposal_sites
        .iter()
        .enumerate()
        .filter_map(|(index, disposal)| disposal.location().map(|location| (index, location)))
        .collect();
    let terminal_locations: Vec<Coordinate> = terminals.iter().map(|(_, location)| *location).collect();

    for site in sites {
        let name = territory_of(site, disposal_sites, &terminals, &terminal_locations);
        let slot = match territories.iter().position(|territory| territory.name == name) {
            Some(slot) => slot,
            None => {
                territories.push(Territory {
                    name,
                    sites: Vec::new(),
                    trucks: Vec::new(),
                });
                territories.len() - 1
            }
        };
        territories[slot].sites.push(site);
    }
    // Sites without any territory always go last.
    territories.sort_by_key(|territory| territory.name.is_none());

    let mut fleet: Vec<Truck> = trucks.to_vec();
    let mut next_truck = 0;
    for (territory, &allocation) in territories
        .iter_mut()
        .take(disposal_sites.len())
        .zip(&options.truck_partition)
    {
        let end = (next_truck + allocation).min(fleet.len());
        for truck in &mut fleet[next_truck..end] {
            truck.territory = territory.name.clone();
            territory.trucks.push(truck.id.clone());
        }
        next_truck = end;
    }

    let mut entries = Vec::with_capacity(sites.len());
    for territory in &mut territories {
        territory
            .sites
            .sort_by(|a, b| b.fill_ratio().total_cmp(&a.fill_ratio()));

        if territory.trucks.is_empty() && !territory.sites.is_empty() {
            warn!(
                territory = territory.name.as_deref().unwrap_or("-"),
                sites = territory.sites.len(),
                "territory has no trucks, using reserve"
            );
        }

        for (rank, site) in territory.sites.iter().enumerate() {
            let truck_id = if territory.trucks.is_empty() {
                options.reserve_truck_id.clone()
            } else {
                territory.trucks[rank % territory.trucks.len()].clone()
            };
            entries.push(ScheduleEntry {
                site_id: site.id.clone(),
                territory: territory.name.clone(),
                rank,
                fill_ratio: site.fill_ratio(),
                capacity: site.capacity,
                current_volume: site.current_volume,
                truck_id,
            });
        }
    }

    info!(sites = entries.len(), trucks = next_truck, "schedule assigned");

    Ok(Schedule { entries, fleet })
}

fn territory_of(
    site: &CollectionSite,
    disposal_sites: &[DisposalSite],
    terminals: &[(usize, Coordinate)],
    terminal_locations: &[Coordinate],
) -> Option<String> {
    if let Some(name) = site
        .nearest_disposal_site
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        return Some(name.to_string());
    }

    let origin = site.location()?;
    let nearest = nearest_index(&Planar, origin, terminal_locations)?;
    let (index, _) = terminals[nearest];
    Some(disposal_sites[index].name.clone())
}
