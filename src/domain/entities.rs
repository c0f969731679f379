use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Condition category resolved automatically from the brand mapping table.
pub const BRAND_CATEGORY_KEY: &str = "brand_category";
/// Condition category resolved automatically from the price-tier table.
pub const PRICE_TIER_KEY: &str = "price_tier";

/// Lookup key for one standardized car.
///
/// Brand/model/variant are the *normalized* forms produced by the upstream
/// listing aggregation; matching against rules and statistics is exact.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CarQuery {
    pub brand: String,
    pub model: String,
    pub variant: String,
    pub year: i32,
}

impl CarQuery {
    pub fn new(
        brand: impl Into<String>,
        model: impl Into<String>,
        variant: impl Into<String>,
        year: i32,
    ) -> Self {
        Self {
            brand: brand.into(),
            model: model.into(),
            variant: variant.into(),
            year,
        }
    }

    /// Human-readable label, e.g. "Perodua Myvi 1.5 AV (2019)".
    pub fn display(&self) -> String {
        format!(
            "{} {} {} ({})",
            self.brand, self.model, self.variant, self.year
        )
    }
}

/// Aggregated listing statistics for one [`CarQuery`], resolved externally.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CarStatistics {
    pub average_price: f64,
    pub average_mileage: f64,
    pub sample_count: u32,
}

impl CarStatistics {
    /// Why this record cannot back a price, if it can't.
    ///
    /// A zero average mileage would make the excess-mileage ratio undefined,
    /// so it is treated the same as having no data at all.
    pub fn unusable_reason(&self) -> Option<NoDataReason> {
        if self.sample_count == 0 {
            Some(NoDataReason::EmptySample)
        } else if !self.average_mileage.is_finite() || self.average_mileage <= 0.0 {
            Some(NoDataReason::ZeroAverageMileage)
        } else {
            None
        }
    }
}

/// Why an estimation produced no price. Surfaced to the caller as a value,
/// not an error, so the web layer can render a plain "no data" message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoDataReason {
    /// The (brand, model, variant, year) key resolved to no statistics record.
    MissingStatistics,
    /// A record exists but aggregates zero listings.
    EmptySample,
    /// Average mileage is zero or not a usable number.
    ZeroAverageMileage,
}

impl NoDataReason {
    pub fn message(&self) -> &'static str {
        match self {
            NoDataReason::MissingStatistics => "No statistics found for this car",
            NoDataReason::EmptySample => "No listings recorded for this car",
            NoDataReason::ZeroAverageMileage => "Statistics for this car are incomplete",
        }
    }
}

/// Admin-editable knobs for both reduction layers.
///
/// Every `threshold_percent` of mileage above the population average costs
/// `reduction_percent`, up to `max_reduction_cap` (layer 1). Condition,
/// brand-category and price-tier reductions together are capped at
/// `layer2_max_cap` (layer 2). The two layers are capped independently.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MileageConfig {
    pub threshold_percent: f64,
    pub reduction_percent: f64,
    pub max_reduction_cap: f64,
    pub layer2_max_cap: f64,
    /// Optional ceiling on layer 1 + layer 2 combined. Off by default; an
    /// earlier versioned configuration capped the total at 85.
    #[serde(default)]
    pub total_max_cap: Option<f64>,
}

impl Default for MileageConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 10.0,
            reduction_percent: 2.0,
            max_reduction_cap: 15.0,
            layer2_max_cap: 70.0,
            total_max_cap: None,
        }
    }
}

/// One selectable answer inside a condition category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditionOption {
    /// Display label (e.g. "Excellent", "Minor").
    pub label: String,
    pub reduction_percentage: f64,
    pub order: u32,
}

/// A group of mutually exclusive condition options ("Exterior Condition",
/// "Accident History", ...). Exactly one option is selected per category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditionCategory {
    pub key: String,
    pub display_name: String,
    pub order: u32,
    pub is_active: bool,
    pub options: Vec<ConditionOption>,
}

impl ConditionCategory {
    /// Whether this category is filled in by the engine rather than the user.
    pub fn is_auto_detected(&self) -> bool {
        self.key == BRAND_CATEGORY_KEY || self.key == PRICE_TIER_KEY
    }

    /// True if `value` matches one of this category's option percentages.
    pub fn offers_value(&self, value: f64) -> bool {
        self.options
            .iter()
            .any(|opt| (opt.reduction_percentage - value).abs() < 1e-9)
    }
}

/// Brand → category classification, flattened to carry the category's own
/// reduction percentage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrandCategoryRule {
    pub brand: String,
    pub category: String,
    pub reduction_percentage: f64,
}

/// A price-range bucket carrying a flat reduction percentage.
/// `max_price = None` means unbounded above.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceTier {
    pub name: String,
    pub min_price: f64,
    pub max_price: Option<f64>,
    pub reduction_percentage: f64,
    pub order: u32,
    pub is_active: bool,
}

impl PriceTier {
    /// True if `price` falls inside this tier's range (inclusive bounds).
    pub fn contains(&self, price: f64) -> bool {
        self.min_price <= price && self.max_price.map(|max| price <= max).unwrap_or(true)
    }

    /// Display form of the range, e.g. "20000 - 50000" or "50000+".
    pub fn price_range_display(&self) -> String {
        match self.max_price {
            Some(max) => format!("{:.0} - {:.0}", self.min_price, max),
            None => format!("{:.0}+", self.min_price),
        }
    }
}

/// How the brand-category reduction was resolved, for display and audit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrandCategoryInfo {
    pub brand: String,
    pub category: String,
    pub reduction: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub warning: Option<String>,
}

/// How the price-tier reduction was resolved, for display and audit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceTierInfo {
    pub average_price: f64,
    pub tier_name: String,
    pub price_range: String,
    pub reduction: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub warning: Option<String>,
}

/// Full auditable output of one estimation.
///
/// Serializes straight to the shape the web layer renders; the `rata_rata_*`
/// names are kept for compatibility with existing consumers. Percentages are
/// rounded to one decimal place, prices to whole currency units, both half
/// away from zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub brand_norm: String,
    pub model_norm: String,
    pub variant_norm: String,
    pub year: i32,
    #[serde(rename = "rata_rata_mileage_bulat")]
    pub average_mileage: f64,
    #[serde(rename = "rata_rata_price_bulat")]
    pub average_price: f64,
    pub total_data: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_mileage: Option<f64>,
    /// Reported even when the car is *below* average (negative), for
    /// transparency; absent when no mileage was supplied.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mileage_diff_percent: Option<f64>,
    pub layer1_reduction: f64,
    pub layer2_reduction: f64,
    pub total_reduction: f64,
    pub adjusted_price: f64,
    pub price_savings: f64,
    /// Raw per-category contributions *before* the layer-2 cap, including the
    /// auto-detected `brand_category` and `price_tier` entries.
    pub condition_breakdown: BTreeMap<String, f64>,
    pub brand_category_info: BrandCategoryInfo,
    pub price_tier_info: PriceTierInfo,
}
