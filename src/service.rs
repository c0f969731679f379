//! In-process facade the web layer calls.
//!
//! One request = one consistent rules snapshot + one statistics lookup + one
//! pure calculation. The service owns no mutable state of its own; concurrent
//! requests only share the client's read-through cache.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{estimate, CarQuery, Estimate, EstimateError, PricingRules};
use crate::infra::{CalculationLog, StatsApiError, StatsClient};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("statistics lookup failed: {0}")]
    Api(#[from] StatsApiError),
    #[error(transparent)]
    Estimate(#[from] EstimateError),
}

pub struct EstimationService {
    stats: StatsClient,
    log: Option<CalculationLog>,
}

impl EstimationService {
    pub fn new(stats: StatsClient) -> Self {
        Self { stats, log: None }
    }

    /// Record every priced calculation in `log` for analytics.
    pub fn with_log(mut self, log: CalculationLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn stats_client(&self) -> &StatsClient {
        &self.stats
    }

    /// Resolve statistics for `query` and run the two-layer estimation
    /// against the given rules snapshot.
    ///
    /// Logging the result is best-effort: a failed append is warned about but
    /// never fails the request.
    pub async fn estimate(
        &self,
        query: &CarQuery,
        user_mileage: Option<f64>,
        selections: Option<&BTreeMap<String, f64>>,
        rules: &PricingRules,
    ) -> Result<Estimate, ServiceError> {
        let stats = self.stats.get_statistics(query).await?;
        let outcome = estimate(query, stats.as_ref(), user_mileage, selections, rules)?;

        match &outcome {
            Estimate::Priced(result) => {
                info!(
                    car = %query.display(),
                    total_reduction = result.total_reduction,
                    adjusted_price = result.adjusted_price,
                    "calculation complete"
                );
                if let Some(log) = &self.log {
                    if let Err(error) = log.append(query, result) {
                        warn!(%error, "failed to record calculation");
                    }
                }
            }
            Estimate::NoData(reason) => {
                info!(car = %query.display(), reason = ?reason, "no data for estimation");
            }
        }

        Ok(outcome)
    }
}
