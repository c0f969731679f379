//! Thin asynchronous client for the car statistics service.
//!
//! - Typed accessors for the brand/model/variant/year listings and the
//!   price-estimation statistics lookup.
//! - Simple in-memory cache with a 5-minute TTL, matching what the previous
//!   web layer cached per endpoint.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime},
};

use reqwest::{Client, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{CarQuery, CarStatistics};

const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/";
const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
const USER_AGENT: &str = "car-value-estimator/1.0";

/// Upstream responses without a statistics block only carry a point estimate;
/// average mileage then falls back to this historical default.
const DEFAULT_AVERAGE_MILEAGE: f64 = 100_000.0;

#[derive(Debug, Error)]
pub enum StatsApiError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error: {0}")]
    Api(String),
}

#[derive(Default)]
struct StatsCache {
    brands: Option<Cached<Vec<String>>>,
    models: HashMap<String, Cached<Vec<String>>>,
    variants: HashMap<(String, String), Cached<Vec<String>>>,
    years: HashMap<(String, String, String), Cached<Vec<i32>>>,
    statistics: HashMap<CarQuery, Cached<Option<CarStatistics>>>,
}

impl StatsCache {
    fn clear(&mut self) {
        self.brands = None;
        self.models.clear();
        self.variants.clear();
        self.years.clear();
        self.statistics.clear();
    }
}

#[derive(Clone)]
pub struct StatsClient {
    http: Client,
    base_url: Url,
    service_key: Option<String>,
    cache: Arc<Mutex<StatsCache>>,
    ttl: Duration,
}

impl StatsClient {
    pub fn new() -> Result<Self, StatsApiError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base: &str) -> Result<Self, StatsApiError> {
        let base_url = Url::parse(base)?;
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            base_url,
            service_key: None,
            cache: Arc::new(Mutex::new(StatsCache::default())),
            ttl: DEFAULT_TTL,
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Shared-secret key sent as `X-Service-Key` on every request.
    pub fn with_service_key(mut self, key: impl Into<String>) -> Self {
        self.service_key = Some(key.into());
        self
    }

    /// All known brands.
    pub async fn get_brands(&self) -> Result<Vec<String>, StatsApiError> {
        {
            let cache = self.cache.lock().await;
            if let Some(brands) = cache.brands.as_ref().and_then(|e| e.if_fresh(self.ttl)) {
                return Ok(brands);
            }
        }

        let url = self.url("django/brands")?;
        let brands: Vec<String> = self.fetch_json(self.http.get(url)).await?;
        let mut cache = self.cache.lock().await;
        cache.brands = Some(Cached::now(brands.clone()));
        Ok(brands)
    }

    /// Models offered for one brand.
    pub async fn get_models(&self, brand: &str) -> Result<Vec<String>, StatsApiError> {
        {
            let cache = self.cache.lock().await;
            if let Some(models) = cache
                .models
                .get(brand)
                .and_then(|e| e.if_fresh(self.ttl))
            {
                return Ok(models);
            }
        }

        let mut url = self.url("django/models")?;
        url.query_pairs_mut().append_pair("brand", brand);
        let models: Vec<String> = self.fetch_json(self.http.get(url)).await?;
        let mut cache = self.cache.lock().await;
        cache
            .models
            .insert(brand.to_string(), Cached::now(models.clone()));
        Ok(models)
    }

    /// Variants offered for one brand + model.
    pub async fn get_variants(
        &self,
        brand: &str,
        model: &str,
    ) -> Result<Vec<String>, StatsApiError> {
        let key = (brand.to_string(), model.to_string());
        {
            let cache = self.cache.lock().await;
            if let Some(variants) = cache.variants.get(&key).and_then(|e| e.if_fresh(self.ttl)) {
                return Ok(variants);
            }
        }

        let mut url = self.url("django/variants")?;
        url.query_pairs_mut()
            .append_pair("brand", brand)
            .append_pair("model", model);
        let variants: Vec<String> = self.fetch_json(self.http.get(url)).await?;
        let mut cache = self.cache.lock().await;
        cache.variants.insert(key, Cached::now(variants.clone()));
        Ok(variants)
    }

    /// Years with listings for one brand + model + variant.
    pub async fn get_years(
        &self,
        brand: &str,
        model: &str,
        variant: &str,
    ) -> Result<Vec<i32>, StatsApiError> {
        let key = (brand.to_string(), model.to_string(), variant.to_string());
        {
            let cache = self.cache.lock().await;
            if let Some(years) = cache.years.get(&key).and_then(|e| e.if_fresh(self.ttl)) {
                return Ok(years);
            }
        }

        let mut url = self.url("django/years")?;
        url.query_pairs_mut()
            .append_pair("brand", brand)
            .append_pair("model", model)
            .append_pair("variant", variant);
        let years: Vec<i32> = self.fetch_json(self.http.get(url)).await?;
        let mut cache = self.cache.lock().await;
        cache.years.insert(key, Cached::now(years.clone()));
        Ok(years)
    }

    /// Average price/mileage statistics for one car key.
    ///
    /// `Ok(None)` means the service has no data for this car — a normal state
    /// the caller renders as "no data", not a transport failure.
    pub async fn get_statistics(
        &self,
        query: &CarQuery,
    ) -> Result<Option<CarStatistics>, StatsApiError> {
        {
            let cache = self.cache.lock().await;
            if let Some(stats) = cache.statistics.get(query).and_then(|e| e.if_fresh(self.ttl)) {
                debug!(car = %query.display(), "serving cached statistics");
                return Ok(stats);
            }
        }

        let mut url = self.url("django/price-estimation")?;
        url.query_pairs_mut()
            .append_pair("brand", &query.brand)
            .append_pair("model", &query.model)
            .append_pair("variant", &query.variant)
            .append_pair("year", &query.year.to_string());

        debug!(%url, "requesting statistics");
        let mut request = self.http.post(url);
        if let Some(key) = &self.service_key {
            request = request.header("X-Service-Key", key);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(self.store_statistics(query, None).await);
        }
        let response = response.error_for_status()?;
        let dto: EstimationDto = response.json().await?;

        let stats = dto.into_statistics();
        if stats.is_none() {
            warn!(car = %query.display(), "statistics response carried no usable price data");
        }
        Ok(self.store_statistics(query, stats).await)
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    async fn store_statistics(
        &self,
        query: &CarQuery,
        stats: Option<CarStatistics>,
    ) -> Option<CarStatistics> {
        let mut cache = self.cache.lock().await;
        cache.statistics.insert(query.clone(), Cached::now(stats));
        stats
    }

    async fn fetch_json<T>(&self, mut builder: reqwest::RequestBuilder) -> Result<T, StatsApiError>
    where
        T: DeserializeOwned,
    {
        if let Some(key) = &self.service_key {
            builder = builder.header("X-Service-Key", key);
        }
        let response = builder.send().await?;
        if response.status().is_server_error() {
            return Err(StatsApiError::Api(format!(
                "statistics service error ({})",
                response.status()
            )));
        }
        let response = response.error_for_status()?;
        Ok(response.json().await?)
    }

    fn url(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }
}

struct Cached<T> {
    value: T,
    fetched_at: SystemTime,
}

impl<T: Clone> Cached<T> {
    fn now(value: T) -> Self {
        Self {
            value,
            fetched_at: SystemTime::now(),
        }
    }

    fn if_fresh(&self, ttl: Duration) -> Option<T> {
        self.fetched_at
            .elapsed()
            .ok()
            .filter(|elapsed| *elapsed <= ttl)
            .map(|_| self.value.clone())
    }
}

#[derive(Debug, Deserialize)]
struct EstimationDto {
    #[serde(default)]
    statistics: Option<StatisticsDto>,
    #[serde(default)]
    estimated_price: Option<f64>,
    #[serde(default)]
    price_range: Option<PriceRangeDto>,
    #[serde(default)]
    sample_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StatisticsDto {
    #[serde(default)]
    average_price: Option<f64>,
    #[serde(default)]
    average_mileage: Option<f64>,
    #[serde(default)]
    data_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PriceRangeDto {
    #[serde(default)]
    avg: Option<f64>,
}

impl EstimationDto {
    /// Extract statistics, tolerating the older response shape that only
    /// carried a point estimate.
    fn into_statistics(self) -> Option<CarStatistics> {
        if let Some(stats) = self.statistics {
            let sample_count = stats.data_count.unwrap_or(0);
            if sample_count == 0 {
                return None;
            }
            return Some(CarStatistics {
                average_price: stats.average_price?,
                average_mileage: stats.average_mileage.unwrap_or(DEFAULT_AVERAGE_MILEAGE),
                sample_count,
            });
        }

        let estimated = self.estimated_price?;
        let average_price = self.price_range.and_then(|r| r.avg).unwrap_or(estimated);
        Some(CarStatistics {
            average_price,
            average_mileage: DEFAULT_AVERAGE_MILEAGE,
            sample_count: self.sample_size.unwrap_or(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_block_is_preferred() {
        let dto: EstimationDto = serde_json::from_str(
            r#"{
                "statistics": {"average_price": 52000.5, "average_mileage": 98000.0, "data_count": 34},
                "estimated_price": 47000.0
            }"#,
        )
        .unwrap();
        let stats = dto.into_statistics().unwrap();
        assert_eq!(stats.average_price, 52000.5);
        assert_eq!(stats.average_mileage, 98000.0);
        assert_eq!(stats.sample_count, 34);
    }

    #[test]
    fn point_estimate_fallback_fills_defaults() {
        let dto: EstimationDto = serde_json::from_str(
            r#"{"estimated_price": 47000.0, "price_range": {"avg": 48500.0}, "sample_size": 7}"#,
        )
        .unwrap();
        let stats = dto.into_statistics().unwrap();
        assert_eq!(stats.average_price, 48500.0);
        assert_eq!(stats.average_mileage, DEFAULT_AVERAGE_MILEAGE);
        assert_eq!(stats.sample_count, 7);
    }

    #[test]
    fn empty_or_zero_count_responses_mean_no_data() {
        let empty: EstimationDto = serde_json::from_str("{}").unwrap();
        assert!(empty.into_statistics().is_none());

        let zero: EstimationDto = serde_json::from_str(
            r#"{"statistics": {"average_price": 52000.0, "average_mileage": 98000.0, "data_count": 0}}"#,
        )
        .unwrap();
        assert!(zero.into_statistics().is_none());
    }

    #[test]
    fn cache_entries_expire_after_ttl() {
        let entry = Cached {
            value: 1_u32,
            fetched_at: SystemTime::now() - Duration::from_secs(600),
        };
        assert_eq!(entry.if_fresh(Duration::from_secs(300)), None);
        assert_eq!(entry.if_fresh(Duration::from_secs(3600)), Some(1));
    }
}
