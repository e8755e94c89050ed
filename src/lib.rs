//! waste-planner core
//!
//! Route construction and volume forecasting for waste collection: greedy
//! pickup routes over collection sites (TPS) ending at a disposal site (TPA),
//! deterministic truck schedules, and per-site monthly volume forecasts.
//! Loading tables and drawing them is left to the caller.

pub mod error;
pub mod features;
pub mod forecast;
pub mod forest;
pub mod geo;
pub mod insights;
pub mod model;
pub mod route;
pub mod schedule;
pub mod traits;

pub use error::{PlannerError, Result};
pub use model::{CollectionSite, DisposalSite, ForecastRecord, HistoryRecord, SiteTables, Truck};
