//! PagerDuty REST API v2 access.
//!
//! Listing calls page through `limit`/`offset` until `more` is false. Any
//! listing failure is fatal; a failed schedule detail is reported as
//! [`CoverageError::DetailFetchFailure`] so the caller can skip it.

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde_json::Value;
use tracing::debug;

use crate::dates::ReportWindow;
use crate::error::{CoverageError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.pagerduty.com";
pub const MAX_QUERY_LIMIT: usize = 100;

const ACCEPT_V2: &str = "application/vnd.pagerduty+json;version=2";

/// Where schedules and escalation policies come from.
#[async_trait]
pub trait CoverageSource: Send + Sync {
    /// Every schedule id in scope.
    async fn list_schedule_ids(&self) -> Result<BTreeSet<String>>;

    /// Raw schedule detail rendered over `window` in UTC.
    async fn fetch_schedule(&self, schedule_id: &str, window: &ReportWindow) -> Result<Value>;

    /// Every escalation policy in scope, as raw payloads.
    async fn list_escalation_policies(&self) -> Result<Vec<Value>>;
}

pub struct PagerDutyClient {
    client: reqwest::Client,
    base_url: String,
    limit: usize,
}

impl PagerDutyClient {
    pub fn new(token: &str, base_url: &str, max_query_limit: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(auth_headers(token)?)
            .build()
            .map_err(|err| CoverageError::Config(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limit: clamp_limit(max_query_limit),
        })
    }

    async fn list_all(&self, path: &str, key: &str) -> Result<Vec<Value>> {
        let url = format!("{}{}", self.base_url, path);
        let query_failure = |status: u16, body: String| CoverageError::QueryFailure {
            path: path.to_string(),
            status,
            body,
        };

        let mut items = Vec::new();
        let mut offset = 0usize;

        loop {
            debug!(%path, offset, limit = self.limit, "requesting page");
            let response = self
                .client
                .get(&url)
                .query(&[("limit", self.limit), ("offset", offset)])
                .send()
                .await
                .map_err(|err| query_failure(0, err.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(query_failure(status.as_u16(), body));
            }

            let page: Value = response
                .json()
                .await
                .map_err(|err| query_failure(status.as_u16(), err.to_string()))?;
            let (batch, more) = read_page(&page, key).ok_or_else(|| {
                query_failure(status.as_u16(), format!("response has no {key:?} array"))
            })?;

            let received = batch.len();
            items.extend(batch);
            if !more || received == 0 {
                break;
            }
            offset += received;
        }

        Ok(items)
    }
}

#[async_trait]
impl CoverageSource for PagerDutyClient {
    async fn list_schedule_ids(&self) -> Result<BTreeSet<String>> {
        let schedules = self.list_all("/schedules", "schedules").await?;
        let ids = schedules
            .iter()
            .filter_map(|schedule| schedule["id"].as_str().map(str::to_string))
            .collect();
        Ok(ids)
    }

    async fn fetch_schedule(&self, schedule_id: &str, window: &ReportWindow) -> Result<Value> {
        let detail_failure = |reason: String| CoverageError::DetailFetchFailure {
            schedule_id: schedule_id.to_string(),
            reason,
        };

        let response = self
            .client
            .get(format!("{}/schedules/{}", self.base_url, schedule_id))
            .query(&[
                ("since", window.since_iso()),
                ("until", window.until_iso()),
                ("time_zone", "UTC".to_string()),
            ])
            .send()
            .await
            .map_err(|err| detail_failure(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(detail_failure(format!("status {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|err| detail_failure(err.to_string()))
    }

    async fn list_escalation_policies(&self) -> Result<Vec<Value>> {
        self.list_all("/escalation_policies", "escalation_policies")
            .await
    }
}

pub fn auth_headers(token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_V2));

    let mut auth = HeaderValue::from_str(&format!("Token token={token}"))
        .map_err(|_| CoverageError::Config("API token contains invalid characters".to_string()))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    Ok(headers)
}

pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_QUERY_LIMIT)
}

/// Split a listing page into its items and the `more` flag.
fn read_page(page: &Value, key: &str) -> Option<(Vec<Value>, bool)> {
    let items = page.get(key)?.as_array()?.clone();
    let more = page.get("more").and_then(Value::as_bool).unwrap_or(false);
    Some((items, more))
}
