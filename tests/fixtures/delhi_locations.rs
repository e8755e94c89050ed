//! Delhi collection points and landfills for realistic fixtures.
//!
//! Coordinates are approximate neighbourhood centres; good enough for
//! city-scale distances.

use waste_planner::{CollectionSite, DisposalSite, HistoryRecord};

/// A named location with coordinates.
#[derive(Debug, Clone)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lng: f64) -> Self {
        Self { name, lat, lng }
    }
}

// ============================================================================
// Collection points (TPS)
// ============================================================================

pub const COLLECTION_POINTS: &[Location] = &[
    Location::new("TPS-CP", 28.6315, 77.2167),
    Location::new("TPS-KB", 28.6519, 77.1909),
    Location::new("TPS-LN", 28.5677, 77.2433),
    Location::new("TPS-RH", 28.7495, 77.0565),
    Location::new("TPS-DW", 28.5921, 77.0460),
    Location::new("TPS-SK", 28.5245, 77.2066),
    Location::new("TPS-MV", 28.6090, 77.2950),
    Location::new("TPS-CC", 28.6506, 77.2303),
    Location::new("TPS-JP", 28.6219, 77.0878),
    Location::new("TPS-SH", 28.6735, 77.2894),
];

// ============================================================================
// Landfills (TPA)
// ============================================================================

pub const LANDFILLS: &[Location] = &[
    Location::new("Ghazipur", 28.6250, 77.3260),
    Location::new("Bhalswa", 28.7407, 77.1650),
    Location::new("Okhla", 28.5120, 77.2830),
];

/// Collection sites with capacities 400..=850 kg and varied fill levels.
pub fn delhi_sites() -> Vec<CollectionSite> {
    COLLECTION_POINTS
        .iter()
        .enumerate()
        .map(|(i, location)| {
            let capacity = 400.0 + 50.0 * i as f64;
            let volume = capacity * (0.35 + 0.06 * ((i * 7) % 10) as f64);
            CollectionSite::new(location.name, location.lat, location.lng, capacity, volume)
        })
        .collect()
}

pub fn delhi_landfills() -> Vec<DisposalSite> {
    LANDFILLS
        .iter()
        .map(|location| DisposalSite::new(location.name, location.lat, location.lng))
        .collect()
}

/// Monthly history for the first `sites` collection points over `months`
/// months starting January 2019.
///
/// Each site has its own level (`300 + 150·i` kg), a mild seasonal swing and
/// a small upward trend, so the forecast has something to learn.
pub fn monthly_history(sites: usize, months: u32) -> Vec<HistoryRecord> {
    let mut records = Vec::new();
    for month in 0..months {
        let year = 2019 + (month / 12) as i32;
        let month_of_year = month % 12 + 1;
        let date = format!("{year:04}-{month_of_year:02}-01");
        for (i, location) in COLLECTION_POINTS.iter().take(sites).enumerate() {
            let level = 300.0 + 150.0 * i as f64;
            let season = 20.0 * (2.0 * std::f64::consts::PI * f64::from(month_of_year) / 12.0).sin();
            let volume = level + season + 2.0 * f64::from(month);
            let capacity = 400.0 + 50.0 * i as f64 + 600.0;
            records.push(
                HistoryRecord::new(location.name, date.clone(), volume).with_site(
                    location.lat,
                    location.lng,
                    capacity,
                    volume / capacity * 100.0,
                ),
            );
        }
    }
    records
}
