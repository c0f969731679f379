//! Domain logic for used-car price estimation lives here.

pub mod entities;
pub mod estimation;
pub mod rules;

pub use entities::{
    BrandCategoryInfo, BrandCategoryRule, CalculationResult, CarQuery, CarStatistics,
    ConditionCategory, ConditionOption, MileageConfig, NoDataReason, PriceTier, PriceTierInfo,
    BRAND_CATEGORY_KEY, PRICE_TIER_KEY,
};
pub use estimation::{estimate, Estimate, EstimateError};
pub use rules::{PricingRules, RulesError, SelectionError};
