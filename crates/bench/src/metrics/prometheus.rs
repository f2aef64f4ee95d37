//! Prometheus range queries over HTTP

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{MetricsError, MetricsSource, MetricsWindow};
use crate::config::MetricsConfig;

/// [`MetricsSource`] backed by the Prometheus `query_range` API
#[derive(Debug, Clone)]
pub struct PrometheusMetricsSource {
    client: reqwest::Client,
    endpoint: String,
}

impl PrometheusMetricsSource {
    pub fn new(config: &MetricsConfig) -> Result<Self, MetricsError> {
        let client = reqwest::Client::builder()
            .timeout(config.query_timeout)
            .build()
            .map_err(|e| MetricsError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MetricsSource for PrometheusMetricsSource {
    async fn query_range(
        &self,
        query: &str,
        window: &MetricsWindow,
    ) -> Result<Vec<f64>, MetricsError> {
        let url = format!("{}/api/v1/query_range", self.endpoint);
        let step = format!("{}s", window.step.as_secs().max(1));
        debug!(%url, query, %step, "prometheus range query");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query.to_string()),
                ("start", window.start.to_rfc3339()),
                ("end", window.end.to_rfc3339()),
                ("step", step),
            ])
            .send()
            .await
            .map_err(|e| MetricsError::Request(format!("query {query:?}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MetricsError::Request(e.to_string()))?;

        // Prometheus reports bad queries as 400/422 with an error body
        if !status.is_success() && !body.trim_start().starts_with('{') {
            return Err(MetricsError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_query_range(query, &body)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    #[serde(default)]
    result: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Flatten a `query_range` response body into its sample values
///
/// Samples of all returned series are concatenated in series order. Values such
/// as `"NaN"` parse to NaN.
pub fn parse_query_range(query: &str, body: &str) -> Result<Vec<f64>, MetricsError> {
    let response: QueryResponse =
        serde_json::from_str(body).map_err(|e| MetricsError::Decode(e.to_string()))?;

    if response.status != "success" {
        return Err(MetricsError::Query {
            query: query.to_string(),
            message: response.error.unwrap_or(response.status),
        });
    }

    let data = response
        .data
        .filter(|d| d.result_type == "matrix")
        .ok_or_else(|| MetricsError::NoResults(query.to_string()))?;

    data.result
        .iter()
        .flat_map(|series| series.values.iter())
        .map(|(_, raw)| {
            raw.parse::<f64>()
                .map_err(|_| MetricsError::Decode(format!("sample {raw:?} is not a number")))
        })
        .collect()
}
