//! HTTP client for the upstream identity server.
//!
//! Keeps upstream connectivity in one place so the refresh orchestrator and
//! the proxy handlers share request construction, timeouts, and error
//! handling. Timeouts are mandatory: a hung upstream must surface as a
//! refresh failure, never as a hung request.

use anyhow::{anyhow, Context, Result};
use axum::http::StatusCode;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info_span, Instrument};

const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const UPSTREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fresh token pair returned by the upstream `/refresh` endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RefreshedSession {
    pub sub: String,
    pub token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub ttl: i64,
    #[serde(rename = "refreshTtl")]
    pub refresh_ttl: i64,
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    base_url: String,
    client: Client,
}

fn upstream_error_message(json_response: &Value) -> &str {
    json_response
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("")
}

impl UpstreamClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .timeout(UPSTREAM_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Exchange a service assertion (proving possession of a rotation
    /// credential) for a fresh token pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, times out, upstream returns a
    /// non-success status, or the response body is missing expected fields.
    pub async fn refresh(&self, assertion: &str) -> Result<RefreshedSession> {
        let url = self.endpoint("/refresh");

        let span = info_span!(
            "upstream.refresh",
            http.method = "GET",
            url = %url
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(assertion)
            .send()
            .instrument(span)
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let json_response: Value = response.json().await.unwrap_or(Value::Null);

            return Err(anyhow!(
                "{} - {}, {}",
                url,
                status,
                upstream_error_message(&json_response)
            ));
        }

        let session: RefreshedSession = response
            .json()
            .await
            .context("Error parsing JSON response: invalid refresh body")?;

        debug!(sub = %session.sub, "upstream refresh succeeded");

        Ok(session)
    }

    /// Proxy a GET to the identity server, returning its status and body.
    ///
    /// # Errors
    ///
    /// Returns an error only on transport failure; upstream error statuses
    /// are returned to the caller for mirroring.
    pub async fn get(&self, path: &str, authorization: Option<&str>) -> Result<(StatusCode, Value)> {
        let url = self.endpoint(path);

        let span = info_span!(
            "upstream.get",
            http.method = "GET",
            url = %url
        );
        let mut request = self.client.get(&url);
        if let Some(authorization) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }
        let response = request.send().instrument(span).await?;

        Self::status_and_body(response).await
    }

    /// Proxy a JSON POST to the identity server, returning its status and
    /// body.
    ///
    /// # Errors
    ///
    /// Returns an error only on transport failure.
    pub async fn post(
        &self,
        path: &str,
        body: &Value,
        authorization: Option<&str>,
    ) -> Result<(StatusCode, Value)> {
        let url = self.endpoint(path);

        let span = info_span!(
            "upstream.post",
            http.method = "POST",
            url = %url
        );
        let mut request = self.client.post(&url).json(body);
        if let Some(authorization) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }
        let response = request.send().instrument(span).await?;

        Self::status_and_body(response).await
    }

    async fn status_and_body(response: reqwest::Response) -> Result<(StatusCode, Value)> {
        let status =
            StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let text = response.text().await.unwrap_or_default();
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::Null)
        };
        Ok((status, body))
    }
}
