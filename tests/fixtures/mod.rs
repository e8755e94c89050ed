//! Test fixtures for waste-planner.
//!
//! Provides realistic test data including:
//! - Delhi collection points and landfills
//! - Synthetic monthly history with per-site level, seasonality and trend

#![allow(dead_code)]

pub mod delhi_locations;

pub use delhi_locations::*;
