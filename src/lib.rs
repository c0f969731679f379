//! Used-car market price estimation engine.
//!
//! Looks up average price/mileage statistics for a (brand, model, variant,
//! year) key and applies a two-layer percentage reduction: mileage excess
//! over the population average (layer 1) and vehicle condition plus
//! auto-detected brand-category and price-tier classifications (layer 2).
//! The result carries a full auditable breakdown.
//!
//! The surrounding web application (forms, OTP gate, admin CRUD) lives
//! elsewhere and calls [`service::EstimationService`] in-process.

pub mod domain;
pub mod infra;
pub mod service;
pub mod util;

pub use domain::{
    estimate, CalculationResult, CarQuery, CarStatistics, Estimate, EstimateError, MileageConfig,
    NoDataReason, PricingRules,
};
pub use infra::{CalculationLog, StatsApiError, StatsClient};
pub use service::{EstimationService, ServiceError};
