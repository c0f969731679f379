//! The admin-editable rule tables, read as one consistent snapshot.
//!
//! A calculation must never mix an old cap with a new threshold, so the
//! estimator takes a whole [`PricingRules`] value loaded at the start of a
//! request instead of querying tables mid-calculation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::entities::{
    BrandCategoryRule, ConditionCategory, ConditionOption, MileageConfig, PriceTier,
};

/// Configuration problems an admin has to fix. These are surfaced, never
/// silently papered over, since they change every displayed price.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RulesError {
    #[error("mileage threshold must be positive, got {0}")]
    NonPositiveThreshold(f64),
    #[error("reduction percentage for '{0}' must be a finite, non-negative number")]
    NegativeReduction(String),
    #[error("layer caps must stay within 0-100, got layer1={layer1} layer2={layer2}")]
    CapOutOfRange { layer1: f64, layer2: f64 },
    #[error("worst-case total reduction {0}% exceeds 100% and would price cars below zero")]
    TotalExceedsFullPrice(f64),
    #[error("condition category '{0}' has no options")]
    EmptyCategory(String),
    #[error("price tier '{name}' has max_price {max} not above min_price {min}")]
    InvalidTierRange { name: String, min: f64, max: f64 },
}

/// Invalid user input. Preventing these is the caller's job; the engine
/// rejects them instead of letting NaN or nonsense flow into a price.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SelectionError {
    #[error("unknown condition category '{0}'")]
    UnknownCategory(String),
    #[error("'{key}' is auto-detected and cannot be selected manually")]
    AutoDetectedCategory { key: String },
    #[error("category '{key}' has no {value}% option")]
    UnknownOption { key: String, value: f64 },
    #[error("condition value for '{0}' must be a finite, non-negative number")]
    InvalidValue(String),
    #[error("user mileage must be a finite, non-negative number")]
    InvalidMileage,
}

/// One consistent snapshot of every rule table the estimator reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingRules {
    pub mileage: MileageConfig,
    pub brand_categories: Vec<BrandCategoryRule>,
    pub price_tiers: Vec<PriceTier>,
    pub condition_categories: Vec<ConditionCategory>,
}

impl PricingRules {
    /// Resolve the brand classification, if the brand has one.
    /// Matching is exact on the normalized brand string.
    pub fn brand_category_for(&self, brand: &str) -> Option<&BrandCategoryRule> {
        self.brand_categories.iter().find(|rule| rule.brand == brand)
    }

    /// First active tier (by ascending `min_price`) whose range contains
    /// `price`. Returns `None` when no tier matches.
    pub fn tier_for_price(&self, price: f64) -> Option<&PriceTier> {
        let mut tiers: Vec<&PriceTier> =
            self.price_tiers.iter().filter(|t| t.is_active).collect();
        tiers.sort_by(|a, b| a.min_price.total_cmp(&b.min_price));
        tiers.into_iter().find(|tier| tier.contains(price))
    }

    /// Active categories the user fills in on the form, in display order.
    /// `brand_category` and `price_tier` are excluded; those are auto-detected.
    pub fn manual_categories(&self) -> impl Iterator<Item = &ConditionCategory> {
        self.condition_categories
            .iter()
            .filter(|cat| cat.is_active && !cat.is_auto_detected())
    }

    /// Check the snapshot is internally consistent before any math runs.
    pub fn validate(&self) -> Result<(), RulesError> {
        let cfg = &self.mileage;
        if !cfg.threshold_percent.is_finite() || cfg.threshold_percent <= 0.0 {
            return Err(RulesError::NonPositiveThreshold(cfg.threshold_percent));
        }
        if !cfg.reduction_percent.is_finite() || cfg.reduction_percent < 0.0 {
            return Err(RulesError::NegativeReduction("mileage".into()));
        }
        let caps_ok = |cap: f64| cap.is_finite() && (0.0..=100.0).contains(&cap);
        if !caps_ok(cfg.max_reduction_cap) || !caps_ok(cfg.layer2_max_cap) {
            return Err(RulesError::CapOutOfRange {
                layer1: cfg.max_reduction_cap,
                layer2: cfg.layer2_max_cap,
            });
        }

        // Worst case the engine can emit: both layers at their caps, further
        // limited by the optional combined cap.
        let combined = cfg.max_reduction_cap + cfg.layer2_max_cap;
        let worst = cfg.total_max_cap.map(|t| t.min(combined)).unwrap_or(combined);
        if worst > 100.0 {
            return Err(RulesError::TotalExceedsFullPrice(worst));
        }

        for rule in &self.brand_categories {
            if !rule.reduction_percentage.is_finite() || rule.reduction_percentage < 0.0 {
                return Err(RulesError::NegativeReduction(rule.brand.clone()));
            }
        }

        for tier in &self.price_tiers {
            if !tier.reduction_percentage.is_finite() || tier.reduction_percentage < 0.0 {
                return Err(RulesError::NegativeReduction(tier.name.clone()));
            }
            if let Some(max) = tier.max_price {
                if max <= tier.min_price {
                    return Err(RulesError::InvalidTierRange {
                        name: tier.name.clone(),
                        min: tier.min_price,
                        max,
                    });
                }
            }
        }

        // A category must always keep at least one option; deletion of the
        // last one is rejected at admin time, so an empty set here means the
        // snapshot is corrupt.
        for category in &self.condition_categories {
            if category.options.is_empty() {
                return Err(RulesError::EmptyCategory(category.key.clone()));
            }
            for option in &category.options {
                if !option.reduction_percentage.is_finite() || option.reduction_percentage < 0.0 {
                    return Err(RulesError::NegativeReduction(category.key.clone()));
                }
            }
        }

        Ok(())
    }

    /// Check manual selections against the active condition categories: every
    /// key must name a manually-selectable category and carry one of its
    /// option values.
    pub fn validate_selections(
        &self,
        selections: &BTreeMap<String, f64>,
    ) -> Result<(), SelectionError> {
        for (key, value) in selections {
            let Some(category) = self
                .condition_categories
                .iter()
                .find(|cat| cat.is_active && cat.key == *key)
            else {
                return Err(SelectionError::UnknownCategory(key.clone()));
            };
            if category.is_auto_detected() {
                return Err(SelectionError::AutoDetectedCategory { key: key.clone() });
            }
            if !value.is_finite() || *value < 0.0 {
                return Err(SelectionError::InvalidValue(key.clone()));
            }
            if !category.offers_value(*value) {
                return Err(SelectionError::UnknownOption {
                    key: key.clone(),
                    value: *value,
                });
            }
        }
        Ok(())
    }

    /// The stock rule set shipped with a fresh install: the historical
    /// condition categories, brand classes and RM price tiers.
    pub fn seeded() -> Self {
        let condition_categories = vec![
            category("exterior_condition", "Exterior Condition", 1, &[
                ("Excellent", 0.0),
                ("Good", 3.0),
                ("Fair", 6.0),
                ("Poor", 10.0),
            ]),
            category("interior_condition", "Interior Condition", 2, &[
                ("Excellent", 0.0),
                ("Good", 3.0),
                ("Fair", 6.0),
                ("Poor", 10.0),
            ]),
            category("mechanical_condition", "Mechanical Condition", 3, &[
                ("Excellent", 0.0),
                ("Good", 7.0),
                ("Fair", 13.0),
                ("Poor", 20.0),
            ]),
            category("accident_history", "Accident History", 4, &[
                ("None", 0.0),
                ("Minor", 8.0),
                ("Major", 15.0),
            ]),
            category("service_history", "Service History", 5, &[
                ("Full", 0.0),
                ("Partial", 3.0),
                ("None", 5.0),
            ]),
            category("number_of_owners", "Number of Owners", 6, &[
                ("1 Owner", 0.0),
                ("2 Owners", 2.0),
                ("3+ Owners", 5.0),
            ]),
            category("tires_brakes", "Tires & Brakes", 7, &[
                ("New", 0.0),
                ("Fair", 2.5),
                ("Needs Replacement", 5.0),
            ]),
            category("modifications", "Modifications", 8, &[
                ("None", 0.0),
                ("Minor", 2.5),
                ("Major", 5.0),
            ]),
            category("market_demand", "Market Demand", 9, &[
                ("High", 0.0),
                ("Average", 5.0),
                ("Low", 10.0),
            ]),
        ];

        let brand_categories = vec![
            brand_rule("Toyota", "Japanese Car", 0.0),
            brand_rule("Honda", "Japanese Car", 0.0),
            brand_rule("Mazda", "Japanese Car", 0.0),
            brand_rule("Nissan", "Japanese Car", 0.0),
            brand_rule("Perodua", "Local Car", 8.0),
            brand_rule("Proton", "Local Car", 8.0),
            brand_rule("BMW", "Continental", 10.0),
            brand_rule("Mercedes-Benz", "Continental", 10.0),
            brand_rule("Audi", "Continental", 10.0),
            brand_rule("Volkswagen", "Continental", 10.0),
            brand_rule("Ferrari", "Super Car", 30.0),
            brand_rule("Lamborghini", "Super Car", 30.0),
            brand_rule("McLaren", "Super Car", 30.0),
        ];

        let price_tiers = vec![
            PriceTier {
                name: "<RM20k".into(),
                min_price: 0.0,
                max_price: Some(20_000.0),
                reduction_percentage: 12.0,
                order: 0,
                is_active: true,
            },
            PriceTier {
                name: "RM20k-50k".into(),
                min_price: 20_000.0,
                max_price: Some(50_000.0),
                reduction_percentage: 6.0,
                order: 1,
                is_active: true,
            },
            PriceTier {
                name: ">RM50k".into(),
                min_price: 50_000.0,
                max_price: None,
                reduction_percentage: 0.0,
                order: 2,
                is_active: true,
            },
        ];

        Self {
            mileage: MileageConfig::default(),
            brand_categories,
            price_tiers,
            condition_categories,
        }
    }
}

impl Default for PricingRules {
    fn default() -> Self {
        Self::seeded()
    }
}

fn category(key: &str, display: &str, order: u32, options: &[(&str, f64)]) -> ConditionCategory {
    ConditionCategory {
        key: key.into(),
        display_name: display.into(),
        order,
        is_active: true,
        options: options
            .iter()
            .enumerate()
            .map(|(idx, (label, pct))| ConditionOption {
                label: (*label).into(),
                reduction_percentage: *pct,
                order: idx as u32,
            })
            .collect(),
    }
}

fn brand_rule(brand: &str, cat: &str, pct: f64) -> BrandCategoryRule {
    BrandCategoryRule {
        brand: brand.into(),
        category: cat.into(),
        reduction_percentage: pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_rules_validate_cleanly() {
        let rules = PricingRules::seeded();
        assert_eq!(rules.validate(), Ok(()));
        assert_eq!(rules.manual_categories().count(), 9);
    }

    #[test]
    fn tier_selection_uses_first_match_by_ascending_min_price() {
        let rules = PricingRules::seeded();
        assert_eq!(rules.tier_for_price(5_000.0).unwrap().name, "<RM20k");
        // Inclusive upper bound: 20k still belongs to the first tier.
        assert_eq!(rules.tier_for_price(20_000.0).unwrap().name, "<RM20k");
        assert_eq!(rules.tier_for_price(35_000.0).unwrap().name, "RM20k-50k");
        // Unbounded tier catches everything above.
        assert_eq!(rules.tier_for_price(900_000.0).unwrap().name, ">RM50k");
    }

    #[test]
    fn tier_selection_skips_inactive_and_reports_gaps() {
        let mut rules = PricingRules::seeded();
        rules.price_tiers[0].is_active = false;
        // 5k only matched the now-inactive tier.
        assert!(rules.tier_for_price(5_000.0).is_none());
        assert_eq!(rules.tier_for_price(30_000.0).unwrap().name, "RM20k-50k");
    }

    #[test]
    fn brand_lookup_is_exact() {
        let rules = PricingRules::seeded();
        assert_eq!(
            rules.brand_category_for("Perodua").unwrap().category,
            "Local Car"
        );
        assert!(rules.brand_category_for("perodua").is_none());
        assert!(rules.brand_category_for("Koenigsegg").is_none());
    }

    #[test]
    fn selections_must_match_an_offered_option() {
        let rules = PricingRules::seeded();
        let mut selections = BTreeMap::new();
        selections.insert("exterior_condition".to_string(), 6.0);
        selections.insert("accident_history".to_string(), 8.0);
        assert_eq!(rules.validate_selections(&selections), Ok(()));

        selections.insert("exterior_condition".to_string(), 4.2);
        assert_eq!(
            rules.validate_selections(&selections),
            Err(SelectionError::UnknownOption {
                key: "exterior_condition".into(),
                value: 4.2
            })
        );
    }

    #[test]
    fn auto_detected_categories_cannot_be_selected() {
        let mut rules = PricingRules::seeded();
        rules.condition_categories.push(category(
            "brand_category",
            "Brand Category",
            10,
            &[("Japanese Car", 0.0)],
        ));
        let mut selections = BTreeMap::new();
        selections.insert("brand_category".to_string(), 0.0);
        assert_eq!(
            rules.validate_selections(&selections),
            Err(SelectionError::AutoDetectedCategory {
                key: "brand_category".into()
            })
        );
    }

    #[test]
    fn unknown_category_is_rejected() {
        let rules = PricingRules::seeded();
        let mut selections = BTreeMap::new();
        selections.insert("paint_depth".to_string(), 1.0);
        assert_eq!(
            rules.validate_selections(&selections),
            Err(SelectionError::UnknownCategory("paint_depth".into()))
        );
    }

    #[test]
    fn validation_rejects_bad_threshold_and_caps() {
        let mut rules = PricingRules::seeded();
        rules.mileage.threshold_percent = 0.0;
        assert_eq!(
            rules.validate(),
            Err(RulesError::NonPositiveThreshold(0.0))
        );

        let mut rules = PricingRules::seeded();
        rules.mileage.layer2_max_cap = 120.0;
        assert!(matches!(
            rules.validate(),
            Err(RulesError::CapOutOfRange { .. })
        ));
    }

    #[test]
    fn validation_rejects_caps_summing_past_full_price() {
        let mut rules = PricingRules::seeded();
        rules.mileage.max_reduction_cap = 40.0;
        rules.mileage.layer2_max_cap = 70.0;
        assert_eq!(
            rules.validate(),
            Err(RulesError::TotalExceedsFullPrice(110.0))
        );

        // A combined cap below 100 makes the same configuration legal again.
        rules.mileage.total_max_cap = Some(85.0);
        assert_eq!(rules.validate(), Ok(()));
    }

    #[test]
    fn validation_rejects_empty_categories_and_inverted_tiers() {
        let mut rules = PricingRules::seeded();
        rules.condition_categories[0].options.clear();
        assert_eq!(
            rules.validate(),
            Err(RulesError::EmptyCategory("exterior_condition".into()))
        );

        let mut rules = PricingRules::seeded();
        rules.price_tiers[1].max_price = Some(10_000.0);
        assert!(matches!(
            rules.validate(),
            Err(RulesError::InvalidTierRange { .. })
        ));
    }
}
