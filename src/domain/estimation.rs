//! The two-layer price-reduction engine.
//!
//! Layer 1 cuts the price for mileage above the population average, layer 2
//! for vehicle condition plus the auto-detected brand-category and price-tier
//! classifications. Each layer is capped on its own; the layers are then
//! summed (optionally capped again) and applied to the average price.
//!
//! Everything here is pure: statistics and rules come in as already-resolved
//! values, one result comes out, and identical inputs always produce an
//! identical result.

use std::collections::BTreeMap;

use thiserror::Error;

use super::entities::{
    BrandCategoryInfo, CalculationResult, CarQuery, CarStatistics, NoDataReason, PriceTierInfo,
    BRAND_CATEGORY_KEY, PRICE_TIER_KEY,
};
use super::rules::{PricingRules, RulesError, SelectionError};

/// Outcome of an estimation. "No data" is an expected state the web layer
/// renders as a message, so it lives here rather than in the error channel.
#[derive(Clone, Debug, PartialEq)]
pub enum Estimate {
    Priced(CalculationResult),
    NoData(NoDataReason),
}

impl Estimate {
    pub fn as_priced(&self) -> Option<&CalculationResult> {
        match self {
            Estimate::Priced(result) => Some(result),
            Estimate::NoData(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EstimateError {
    #[error("invalid pricing rules: {0}")]
    Configuration(#[from] RulesError),
    #[error("invalid input: {0}")]
    Validation(#[from] SelectionError),
}

/// Estimate the market price for `query` given its statistics, the user's
/// mileage and condition selections, and one consistent rules snapshot.
///
/// Returns `Estimate::NoData` when the statistics cannot back a price
/// (missing record, empty sample, zero average mileage). Misconfigured rules
/// and invalid inputs are hard errors.
pub fn estimate(
    query: &CarQuery,
    stats: Option<&CarStatistics>,
    user_mileage: Option<f64>,
    selections: Option<&BTreeMap<String, f64>>,
    rules: &PricingRules,
) -> Result<Estimate, EstimateError> {
    rules.validate()?;
    if let Some(mileage) = user_mileage {
        if !mileage.is_finite() || mileage < 0.0 {
            return Err(SelectionError::InvalidMileage.into());
        }
    }
    if let Some(selections) = selections {
        rules.validate_selections(selections)?;
    }

    let Some(stats) = stats else {
        return Ok(Estimate::NoData(NoDataReason::MissingStatistics));
    };
    if let Some(reason) = stats.unusable_reason() {
        return Ok(Estimate::NoData(reason));
    }

    let cfg = &rules.mileage;
    let average_mileage = stats.average_mileage;
    let average_price = stats.average_price;

    // Layer 1: mileage. The diff percentage is reported even when the car is
    // below average, but only excess mileage reduces the price.
    let mut layer1_reduction = 0.0;
    let mut mileage_diff_percent = None;
    if let Some(mileage) = user_mileage {
        let diff = (mileage - average_mileage) / average_mileage * 100.0;
        mileage_diff_percent = Some(diff);
        if mileage > average_mileage {
            let raw = (diff / cfg.threshold_percent) * cfg.reduction_percent;
            layer1_reduction = raw.clamp(0.0, cfg.max_reduction_cap);
        }
    }

    // Layer 2: manual condition selections plus the two auto-detected
    // classifications. The cap truncates the sum, not the addends, so the
    // breakdown keeps every raw contribution for audit.
    let mut condition_breakdown: BTreeMap<String, f64> = selections.cloned().unwrap_or_default();
    let manual_total: f64 = condition_breakdown.values().sum();

    let brand_category_info = match rules.brand_category_for(&query.brand) {
        Some(rule) => BrandCategoryInfo {
            brand: query.brand.clone(),
            category: rule.category.clone(),
            reduction: rule.reduction_percentage,
            warning: None,
        },
        None => BrandCategoryInfo {
            brand: query.brand.clone(),
            category: "Unclassified".to_string(),
            reduction: 0.0,
            warning: Some("Brand not classified - admin should classify this brand".to_string()),
        },
    };

    let price_tier_info = match rules.tier_for_price(average_price) {
        Some(tier) => PriceTierInfo {
            average_price,
            tier_name: tier.name.clone(),
            price_range: tier.price_range_display(),
            reduction: tier.reduction_percentage,
            warning: None,
        },
        None => PriceTierInfo {
            average_price,
            tier_name: "No Tier Match".to_string(),
            price_range: "N/A".to_string(),
            reduction: 0.0,
            warning: Some("No price tier configured for this price range".to_string()),
        },
    };

    condition_breakdown.insert(BRAND_CATEGORY_KEY.to_string(), brand_category_info.reduction);
    condition_breakdown.insert(PRICE_TIER_KEY.to_string(), price_tier_info.reduction);

    let layer2_unclamped = manual_total + brand_category_info.reduction + price_tier_info.reduction;
    let layer2_reduction = layer2_unclamped.clamp(0.0, cfg.layer2_max_cap);

    // Both layers are already capped; the combined cap is optional and off in
    // the current single-row configuration.
    let mut total_reduction = layer1_reduction + layer2_reduction;
    if let Some(total_cap) = cfg.total_max_cap {
        total_reduction = total_reduction.min(total_cap);
    }
    // A total above 100% would price the car below zero. validate() rules
    // this out up front, so reaching it means the configuration is broken.
    if total_reduction > 100.0 {
        return Err(RulesError::TotalExceedsFullPrice(total_reduction).into());
    }

    // The adjusted price uses the unrounded total; rounding is display-only.
    let adjusted_price = average_price * (1.0 - total_reduction / 100.0);
    let price_savings = average_price - adjusted_price;

    Ok(Estimate::Priced(CalculationResult {
        brand_norm: query.brand.clone(),
        model_norm: query.model.clone(),
        variant_norm: query.variant.clone(),
        year: query.year,
        average_mileage,
        average_price,
        total_data: stats.sample_count,
        user_mileage: user_mileage.map(f64::round),
        mileage_diff_percent: mileage_diff_percent.map(round_percent),
        layer1_reduction: round_percent(layer1_reduction),
        layer2_reduction: round_percent(layer2_reduction),
        total_reduction: round_percent(total_reduction),
        adjusted_price: adjusted_price.round(),
        price_savings: price_savings.round(),
        condition_breakdown,
        brand_category_info,
        price_tier_info,
    }))
}

/// One decimal place, half away from zero (`f64::round` semantics).
fn round_percent(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::MileageConfig;

    fn stats(average_price: f64, average_mileage: f64, sample_count: u32) -> CarStatistics {
        CarStatistics {
            average_price,
            average_mileage,
            sample_count,
        }
    }

    fn query() -> CarQuery {
        CarQuery::new("Toyota", "Vios", "1.5 G", 2018)
    }

    fn rules() -> PricingRules {
        PricingRules::seeded()
    }

    fn priced(estimate_result: Result<Estimate, EstimateError>) -> CalculationResult {
        match estimate_result.expect("estimate failed") {
            Estimate::Priced(result) => result,
            Estimate::NoData(reason) => panic!("expected a price, got NoData({reason:?})"),
        }
    }

    #[test]
    fn mileage_at_or_below_average_never_reduces() {
        let stats = stats(50_000.0, 100_000.0, 40);
        for mileage in [0.0, 55_000.0, 100_000.0] {
            let result = priced(estimate(&query(), Some(&stats), Some(mileage), None, &rules()));
            assert_eq!(result.layer1_reduction, 0.0);
        }

        // Diff is still reported for transparency, as a negative value.
        let result = priced(estimate(&query(), Some(&stats), Some(80_000.0), None, &rules()));
        assert_eq!(result.mileage_diff_percent, Some(-20.0));
    }

    #[test]
    fn thirty_percent_excess_at_default_config_costs_six_percent() {
        // threshold 10, reduction 2, cap 15: 30% over → (30/10)*2 = 6.0
        let stats = stats(50_000.0, 100_000.0, 40);
        let result = priced(estimate(&query(), Some(&stats), Some(130_000.0), None, &rules()));
        assert_eq!(result.mileage_diff_percent, Some(30.0));
        assert_eq!(result.layer1_reduction, 6.0);
    }

    #[test]
    fn extreme_excess_clamps_to_the_layer1_cap() {
        // 200% over → raw (200/10)*2 = 40, clamped to 15.
        let stats = stats(50_000.0, 100_000.0, 40);
        let result = priced(estimate(&query(), Some(&stats), Some(300_000.0), None, &rules()));
        assert_eq!(result.mileage_diff_percent, Some(200.0));
        assert_eq!(result.layer1_reduction, 15.0);
    }

    #[test]
    fn layer1_is_monotonic_in_user_mileage_and_capped() {
        let stats = stats(50_000.0, 100_000.0, 40);
        let mut previous = 0.0;
        for mileage in (100..=400).step_by(10).map(|k| k as f64 * 1_000.0) {
            let result = priced(estimate(&query(), Some(&stats), Some(mileage), None, &rules()));
            assert!(result.layer1_reduction >= previous);
            assert!(result.layer1_reduction <= 15.0);
            previous = result.layer1_reduction;
        }
    }

    #[test]
    fn layer2_clamps_the_sum_but_keeps_raw_addends() {
        // Manual 50 (mechanical 20 + accident 15 + exterior 10 + service 5),
        // Ferrari brand 30, <RM20k tier 12: unclamped 92 → capped at 70.
        let ferrari = CarQuery::new("Ferrari", "458", "Italia", 2015);
        let stats = stats(15_000.0, 100_000.0, 12);
        let mut selections = BTreeMap::new();
        selections.insert("mechanical_condition".to_string(), 20.0);
        selections.insert("accident_history".to_string(), 15.0);
        selections.insert("exterior_condition".to_string(), 10.0);
        selections.insert("service_history".to_string(), 5.0);

        let result = priced(estimate(&ferrari, Some(&stats), None, Some(&selections), &rules()));
        assert_eq!(result.layer2_reduction, 70.0);
        assert_eq!(result.condition_breakdown["brand_category"], 30.0);
        assert_eq!(result.condition_breakdown["price_tier"], 12.0);
        assert_eq!(result.condition_breakdown["mechanical_condition"], 20.0);
        assert_eq!(result.condition_breakdown["accident_history"], 15.0);
        assert_eq!(result.brand_category_info.reduction, 30.0);
        assert_eq!(result.price_tier_info.reduction, 12.0);
    }

    #[test]
    fn adjusted_price_applies_the_summed_layers() {
        // layer1 6.0; layer2 = exterior 6 + Toyota 0 + RM20k-50k tier 6
        // (50k sits on the tier's inclusive upper bound).
        let stats = stats(50_000.0, 100_000.0, 40);
        let mut selections = BTreeMap::new();
        selections.insert("exterior_condition".to_string(), 6.0);
        let result = priced(estimate(
            &query(),
            Some(&stats),
            Some(130_000.0),
            Some(&selections),
            &rules(),
        ));
        assert_eq!(result.layer1_reduction, 6.0);
        assert_eq!(result.layer2_reduction, 12.0);
        assert_eq!(result.total_reduction, 18.0);
        // 50_000 * (1 - 18/100), rounded to whole currency units.
        assert_eq!(result.adjusted_price, 41_000.0);
        assert_eq!(result.price_savings, 9_000.0);
    }

    #[test]
    fn unclassified_brand_warns_and_contributes_zero() {
        let unknown = CarQuery::new("Koenigsegg", "Jesko", "Absolut", 2022);
        let stats = stats(60_000.0, 50_000.0, 5);
        let result = priced(estimate(&unknown, Some(&stats), None, None, &rules()));
        assert_eq!(result.brand_category_info.reduction, 0.0);
        assert_eq!(result.brand_category_info.category, "Unclassified");
        assert!(result.brand_category_info.warning.is_some());
    }

    #[test]
    fn missing_price_tier_warns_and_contributes_zero() {
        let mut rules = rules();
        rules.price_tiers.clear();
        let stats = stats(60_000.0, 50_000.0, 5);
        let result = priced(estimate(&query(), Some(&stats), None, None, &rules));
        assert_eq!(result.price_tier_info.reduction, 0.0);
        assert_eq!(result.price_tier_info.tier_name, "No Tier Match");
        assert!(result.price_tier_info.warning.is_some());
        assert_eq!(result.condition_breakdown["price_tier"], 0.0);
    }

    #[test]
    fn no_mileage_means_no_layer1_and_no_diff() {
        let stats = stats(50_000.0, 100_000.0, 40);
        let result = priced(estimate(&query(), Some(&stats), None, None, &rules()));
        assert_eq!(result.layer1_reduction, 0.0);
        assert_eq!(result.mileage_diff_percent, None);
        assert_eq!(result.user_mileage, None);
    }

    #[test]
    fn missing_or_unusable_statistics_yield_no_data() {
        assert_eq!(
            estimate(&query(), None, Some(120_000.0), None, &rules()).unwrap(),
            Estimate::NoData(NoDataReason::MissingStatistics)
        );
        assert_eq!(
            estimate(&query(), Some(&stats(50_000.0, 100_000.0, 0)), None, None, &rules()).unwrap(),
            Estimate::NoData(NoDataReason::EmptySample)
        );
        // Zero average mileage must never reach the division.
        assert_eq!(
            estimate(&query(), Some(&stats(50_000.0, 0.0, 10)), Some(120_000.0), None, &rules())
                .unwrap(),
            Estimate::NoData(NoDataReason::ZeroAverageMileage)
        );
    }

    #[test]
    fn negative_or_non_finite_mileage_is_rejected() {
        let stats = stats(50_000.0, 100_000.0, 40);
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            let err = estimate(&query(), Some(&stats), Some(bad), None, &rules()).unwrap_err();
            assert!(matches!(
                err,
                EstimateError::Validation(SelectionError::InvalidMileage)
            ));
        }
    }

    #[test]
    fn misconfigured_caps_are_a_hard_error() {
        let mut rules = rules();
        rules.mileage.max_reduction_cap = 50.0;
        rules.mileage.layer2_max_cap = 80.0;
        let stats = stats(50_000.0, 100_000.0, 40);
        let err = estimate(&query(), Some(&stats), None, None, &rules).unwrap_err();
        assert!(matches!(
            err,
            EstimateError::Configuration(RulesError::TotalExceedsFullPrice(_))
        ));
    }

    #[test]
    fn optional_combined_cap_truncates_the_total() {
        let mut rules = rules();
        rules.mileage.total_max_cap = Some(10.0);
        let stats = stats(50_000.0, 100_000.0, 40);
        let mut selections = BTreeMap::new();
        selections.insert("exterior_condition".to_string(), 10.0);
        selections.insert("interior_condition".to_string(), 10.0);
        // layer1 6 + layer2 26 = 32, combined cap pulls it down to 10.
        let result = priced(estimate(
            &query(),
            Some(&stats),
            Some(130_000.0),
            Some(&selections),
            &rules,
        ));
        assert_eq!(result.layer1_reduction, 6.0);
        assert_eq!(result.layer2_reduction, 26.0);
        assert_eq!(result.total_reduction, 10.0);
        assert_eq!(result.adjusted_price, 45_000.0);
    }

    #[test]
    fn identical_inputs_produce_identical_results() {
        let stats = stats(48_750.0, 103_333.0, 17);
        let mut selections = BTreeMap::new();
        selections.insert("market_demand".to_string(), 5.0);
        let first = estimate(&query(), Some(&stats), Some(151_000.0), Some(&selections), &rules())
            .unwrap();
        let second = estimate(&query(), Some(&stats), Some(151_000.0), Some(&selections), &rules())
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn displayed_figures_round_half_away_from_zero() {
        // 25% over at threshold 10 / reduction 2.5 → raw layer1 6.25 → 6.3.
        let mut rules = rules();
        rules.mileage = MileageConfig {
            reduction_percent: 2.5,
            ..MileageConfig::default()
        };
        let stats = stats(33_333.0, 100_000.0, 9);
        let result = priced(estimate(&query(), Some(&stats), Some(125_000.0), None, &rules));
        assert_eq!(result.layer1_reduction, 6.3);
        // Prices land on whole currency units.
        assert_eq!(result.adjusted_price, result.adjusted_price.round());
        assert_eq!(result.price_savings, result.price_savings.round());
    }

    #[test]
    fn breakdown_without_selections_still_carries_auto_entries() {
        let stats = stats(50_000.0, 100_000.0, 40);
        let result = priced(estimate(&query(), Some(&stats), None, None, &rules()));
        assert_eq!(result.condition_breakdown.len(), 2);
        assert!(result.condition_breakdown.contains_key("brand_category"));
        assert!(result.condition_breakdown.contains_key("price_tier"));
    }
}
