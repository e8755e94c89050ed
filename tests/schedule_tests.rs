//! Truck schedule tests on the Delhi fixtures.

mod fixtures;

use std::collections::HashSet;

use waste_planner::schedule::{ScheduleOptions, assign_trucks};
use waste_planner::{SiteTables, Truck};

use fixtures::{delhi_landfills, delhi_sites};

fn delhi_tables() -> SiteTables {
    SiteTables::new(delhi_sites(), delhi_landfills()).unwrap()
}

#[test]
fn test_every_site_scheduled_once() {
    let schedule = delhi_tables().schedule(&ScheduleOptions::default()).unwrap();

    assert_eq!(schedule.entries.len(), 10);
    let unique: HashSet<&str> = schedule.entries.iter().map(|entry| entry.site_id.as_str()).collect();
    assert_eq!(unique.len(), 10);
}

#[test]
fn test_schedule_is_deterministic() {
    let tables = delhi_tables();
    let first = tables.schedule(&ScheduleOptions::default()).unwrap();
    let second = tables.schedule(&ScheduleOptions::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_default_partition_over_delhi_landfills() {
    let schedule = delhi_tables().schedule(&ScheduleOptions::default()).unwrap();

    let territory_of = |truck: &str| {
        schedule
            .fleet
            .iter()
            .find(|candidate| candidate.id == truck)
            .and_then(|candidate| candidate.territory.clone())
    };
    for index in 1..=3 {
        assert_eq!(territory_of(&format!("Truck {index}")).as_deref(), Some("Ghazipur"));
    }
    for index in 4..=6 {
        assert_eq!(territory_of(&format!("Truck {index}")).as_deref(), Some("Bhalswa"));
    }
    for index in 7..=10 {
        assert_eq!(territory_of(&format!("Truck {index}")).as_deref(), Some("Okhla"));
    }

    // Every site is served by a truck of its own territory.
    for entry in &schedule.entries {
        assert_eq!(territory_of(&entry.truck_id), entry.territory, "{}", entry.site_id);
    }

    let territory_for = |site: &str| {
        schedule
            .entries
            .iter()
            .find(|entry| entry.site_id == site)
            .and_then(|entry| entry.territory.clone())
    };
    assert_eq!(territory_for("TPS-RH").as_deref(), Some("Bhalswa"));
    assert_eq!(territory_for("TPS-MV").as_deref(), Some("Ghazipur"));
    assert_eq!(territory_for("TPS-SK").as_deref(), Some("Okhla"));
}

#[test]
fn test_ranks_follow_fill_ratio_within_territory() {
    let schedule = delhi_tables().schedule(&ScheduleOptions::default()).unwrap();

    for pair in schedule.entries.windows(2) {
        if pair[0].territory == pair[1].territory {
            assert_eq!(pair[1].rank, pair[0].rank + 1);
            assert!(pair[0].fill_ratio >= pair[1].fill_ratio);
        } else {
            assert_eq!(pair[1].rank, 0);
        }
    }
}

#[test]
fn test_custom_partition() {
    let options = ScheduleOptions {
        truck_partition: vec![1, 1, 1],
        ..ScheduleOptions::default()
    };
    let schedule = assign_trucks(&delhi_sites(), &delhi_landfills(), &Truck::fleet(3), &options).unwrap();

    let used: HashSet<&str> = schedule.entries.iter().map(|entry| entry.truck_id.as_str()).collect();
    assert!(used.iter().all(|truck| ["Truck 1", "Truck 2", "Truck 3"].contains(truck)));
    assert!(schedule.entries_for_truck("Truck 2").count() > 0);
}

#[test]
fn test_short_roster_leaves_later_territories_on_reserve() {
    // Three trucks all go to Ghazipur; Bhalswa and Okhla get none.
    let schedule = assign_trucks(
        &delhi_sites(),
        &delhi_landfills(),
        &Truck::fleet(3),
        &ScheduleOptions::default(),
    )
    .unwrap();

    for entry in &schedule.entries {
        match entry.territory.as_deref() {
            Some("Ghazipur") => assert!(entry.truck_id.starts_with("Truck ")),
            _ => assert_eq!(entry.truck_id, "RESERVE"),
        }
    }
}

#[test]
fn test_empty_roster_puts_everything_on_reserve() {
    let tables = delhi_tables().with_trucks(Vec::new());
    let schedule = tables.schedule(&ScheduleOptions::default()).unwrap();

    assert!(schedule.fleet.is_empty());
    assert!(schedule.entries.iter().all(|entry| entry.truck_id == "RESERVE"));
}
