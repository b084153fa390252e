//! Resilient upstream client: POSTs to the Species-Observation
//! aggregation endpoint, recursively splitting oversized bbox requests and
//! backing off on throttling signals.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::{merge_grid_cells, GeoGridResponse, GridCell};
use crate::tiles::{split_bbox_quadrants, BBox};

const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_secs(15);
const MAX_BACKOFF_WAIT: Duration = Duration::from_secs(120);
const MAX_BACKOFF_RETRIES: u32 = 8;

/// Phrases the upstream uses to signal "the requested grid is too coarse
/// for this bbox" rather than a hard failure.
const TOO_MANY_CELLS_PHRASES: &[&str] = &[
    "number of cells",
    "too large",
    "limit is 65535 cells",
];

fn looks_like_too_many_cells(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    TOO_MANY_CELLS_PHRASES.iter().any(|p| lower.contains(p))
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub subscription_key: String,
    pub authorization: String,
    pub translation_culture_code: String,
    pub sensitive_observations: bool,
    pub timeout: Duration,
}

impl UpstreamConfig {
    pub fn new(base_url: String, subscription_key: String, authorization: String) -> Self {
        Self {
            base_url,
            subscription_key,
            authorization,
            translation_culture_code: "sv-SE".to_string(),
            sensitive_observations: false,
            timeout: Duration::from_secs(180),
        }
    }
}

/// Date filter fragment for the upstream request body.
#[derive(Debug, Clone)]
pub struct DateFilter {
    pub start_date: String,
    pub end_date: String,
}

impl DateFilter {
    pub fn to_body_fragment(&self) -> Value {
        json!({
            "date": {
                "startDate": self.start_date,
                "endDate": self.end_date,
                "dateFilterType": "BetweenStartDateAndEndDate",
            }
        })
    }
}

fn bbox_fragment(bbox: BBox) -> Value {
    let (top_lat, left_lon, bottom_lat, right_lon) = bbox;
    json!({
        "geographics": {
            "boundingBox": {
                "topLeft": { "latitude": top_lat, "longitude": left_lon },
                "bottomRight": { "latitude": bottom_lat, "longitude": right_lon },
            }
        }
    })
}

fn merge_json_objects(base: &mut Value, extra: &Value) {
    if let (Value::Object(base_map), Value::Object(extra_map)) = (base, extra) {
        for (k, v) in extra_map {
            base_map.insert(k.clone(), v.clone());
        }
    }
}

/// Process-wide throttle timestamp plus a process-wide HTTP client,
/// encapsulated so the only global mutable state in this module has a
/// clear lifecycle.
pub struct UpstreamClient {
    http: Client,
    config: UpstreamConfig,
    last_request: Mutex<Option<Instant>>,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Arc<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("reqwest client builds with valid config");
        Arc::new(Self {
            http,
            config,
            last_request: Mutex::new(None),
        })
    }

    /// A single, non-resilient call: `{taxon:{ids, includeUnderlyingTaxa:false}, ...extra_filter}`.
    pub async fn geogrid(
        &self,
        taxa: &[i64],
        zoom: u32,
        extra_filter: Option<&Value>,
    ) -> Result<GeoGridResponse, CoreError> {
        self.post_with_backoff(taxa, zoom, extra_filter).await
    }

    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < DEFAULT_THROTTLE_INTERVAL {
                tokio::time::sleep(DEFAULT_THROTTLE_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn post_with_backoff(
        &self,
        taxa: &[i64],
        zoom: u32,
        extra_filter: Option<&Value>,
    ) -> Result<GeoGridResponse, CoreError> {
        let url = format!("{}/Observations/GeoGridAggregation", self.config.base_url.trim_end_matches('/'));

        let mut body = json!({
            "taxon": { "ids": taxa, "includeUnderlyingTaxa": false },
        });
        if let Some(extra) = extra_filter {
            merge_json_objects(&mut body, extra);
        }

        let mut attempt: u32 = 0;
        loop {
            self.throttle().await;

            let response = self
                .http
                .post(&url)
                .query(&[
                    ("zoom", zoom.to_string()),
                    ("validateSearchFilter", "false".to_string()),
                    ("translationCultureCode", self.config.translation_culture_code.clone()),
                    ("sensitiveObservations", self.config.sensitive_observations.to_string()),
                    ("skipCache", "false".to_string()),
                ])
                .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
                .header("Authorization", &self.config.authorization)
                .json(&body)
                .send()
                .await
                .map_err(|e| CoreError::UpstreamTransient(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::OK {
                return response
                    .json::<GeoGridResponse>()
                    .await
                    .map_err(|e| CoreError::Internal(format!("invalid upstream payload: {e}")));
            }

            let retry_after = parse_retry_after(&response);
            let body_text = response.text().await.unwrap_or_default();

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                attempt += 1;
                if attempt > MAX_BACKOFF_RETRIES {
                    return Err(CoreError::UpstreamFatal {
                        status: status.as_u16(),
                        body_snippet: snippet(&body_text),
                    });
                }
                let wait = retry_after
                    .or_else(|| parse_retry_hint_from_body(&body_text))
                    .unwrap_or_else(|| Duration::from_secs(2u64.pow(attempt.min(6))))
                    .min(MAX_BACKOFF_WAIT);
                warn!("Upstream throttled (HTTP {}), retrying in {:?}", status, wait);
                tokio::time::sleep(wait).await;
                continue;
            }

            return Err(CoreError::UpstreamFatal {
                status: status.as_u16(),
                body_snippet: snippet(&body_text),
            });
        }
    }

    /// Wraps [`Self::geogrid`]: if the upstream refuses because the bbox
    /// spans too many cells at this zoom, splits the bbox into quadrants
    /// and recurses, merging sub-payloads by `(x, y)` on the way back up.
    pub async fn geogrid_resilient(
        &self,
        taxa: &[i64],
        zoom: u32,
        date_filter: Option<&DateFilter>,
        bbox: BBox,
        max_depth: u32,
    ) -> Result<Vec<GridCell>, CoreError> {
        self.geogrid_resilient_at_depth(taxa, zoom, date_filter, bbox, max_depth, 0)
            .await
    }

    fn geogrid_resilient_at_depth<'a>(
        &'a self,
        taxa: &'a [i64],
        zoom: u32,
        date_filter: Option<&'a DateFilter>,
        bbox: BBox,
        max_depth: u32,
        depth: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<GridCell>, CoreError>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut filter = json!({});
            if let Some(df) = date_filter {
                merge_json_objects(&mut filter, &df.to_body_fragment());
            }
            merge_json_objects(&mut filter, &bbox_fragment(bbox));

            match self.geogrid(taxa, zoom, Some(&filter)).await {
                Ok(payload) => Ok(payload.grid_cells),
                Err(CoreError::UpstreamFatal { status, body_snippet }) if looks_like_too_many_cells(&body_snippet) => {
                    if depth >= max_depth {
                        return Err(CoreError::UpstreamTooBig { depth });
                    }
                    debug!(
                        "Upstream too-many-cells (HTTP {}) at depth {}, splitting bbox",
                        status, depth
                    );
                    let quadrants = split_bbox_quadrants(bbox);
                    let mut merged_inputs = Vec::with_capacity(4);
                    for quadrant in quadrants {
                        let cells = self
                            .geogrid_resilient_at_depth(taxa, zoom, date_filter, quadrant, max_depth, depth + 1)
                            .await?;
                        merged_inputs.push(cells);
                    }
                    Ok(merge_grid_cells(merged_inputs))
                }
                Err(other) => Err(other),
            }
        })
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(500).collect()
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    let header = response.headers().get(reqwest::header::RETRY_AFTER)?;
    let value = header.to_str().ok()?;
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Parses a "Try again in N seconds" style hint out of a response body.
fn parse_retry_hint_from_body(body: &str) -> Option<Duration> {
    let lower = body.to_ascii_lowercase();
    let marker = "try again in ";
    let start = lower.find(marker)? + marker.len();
    let rest = &lower[start..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<u64>().ok().map(Duration::from_secs)
}

pub fn log_client_ready(config: &UpstreamConfig) {
    info!("Upstream client configured for {}", config.base_url);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_too_many_cells_phrase() {
        let body = "The number of cells that can be returned is too large for this area";
        assert!(looks_like_too_many_cells(body));
    }

    #[test]
    fn recognizes_limit_phrase_alone() {
        assert!(looks_like_too_many_cells("the limit is 65535 cells per request"));
    }

    #[test]
    fn ignores_unrelated_bad_request_bodies() {
        assert!(!looks_like_too_many_cells("invalid taxon id supplied"));
    }

    #[test]
    fn parses_try_again_hint() {
        let body = "Rate limited. Try again in 42 seconds please.";
        assert_eq!(parse_retry_hint_from_body(body), Some(Duration::from_secs(42)));
    }

    #[test]
    fn bbox_fragment_shape() {
        let value = bbox_fragment((69.6, 10.0, 55.0, 25.0));
        assert_eq!(value["geographics"]["boundingBox"]["topLeft"]["latitude"], 69.6);
        assert_eq!(value["geographics"]["boundingBox"]["bottomRight"]["longitude"], 25.0);
    }
}
