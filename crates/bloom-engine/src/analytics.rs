use std::cmp::Ordering;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

pub const DEFAULT_CAPTURE_HOST: &str = "https://us.i.posthog.com";
pub const DEFAULT_QUERY_HOST: &str = "https://us.posthog.com";
pub const SHOW_EVENT: &str = "bloom-app-show";
pub const SELECT_EVENT: &str = "bloom-app-select";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct AnalyticsSettings {
    /// Project key used for server-side capture.
    pub private_key: Option<String>,
    pub private_host: Option<String>,
    /// Personal API key used to query events.
    pub personal_api_key: Option<String>,
    pub project_id: Option<String>,
    pub public_key: Option<String>,
    pub public_host: Option<String>,
}

impl AnalyticsSettings {
    fn capture_host(&self) -> String {
        host_or(self.private_host.as_deref(), DEFAULT_CAPTURE_HOST)
    }

    fn query_host(&self) -> String {
        host_or(self.private_host.as_deref(), DEFAULT_QUERY_HOST)
    }

    fn public_host(&self) -> String {
        host_or(self.public_host.as_deref(), DEFAULT_CAPTURE_HOST)
    }
}

/// Status and body of a proxied upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}

/// PostHog-compatible analytics client.
///
/// `capture` never fails: transport and HTTP errors are logged and dropped.
/// `fetch_events` returns errors to the caller.
#[derive(Debug, Clone)]
pub struct AnalyticsClient {
    settings: AnalyticsSettings,
    http: HttpClient,
}

impl AnalyticsClient {
    pub fn new(settings: AnalyticsSettings) -> Result<Self> {
        if settings.private_key.is_none() {
            warn!("PRIVATE_POSTHOG_KEY not set; analytics events will not be sent");
        }
        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build analytics http client")?;
        Ok(Self { settings, http })
    }

    pub fn capture_enabled(&self) -> bool {
        self.settings.private_key.is_some()
    }

    pub fn public_key_configured(&self) -> bool {
        self.settings.public_key.is_some()
    }

    pub async fn capture(
        &self,
        event: &str,
        distinct_id: &str,
        properties: Map<String, Value>,
        timestamp: Option<String>,
    ) {
        let Some(api_key) = self.settings.private_key.as_deref() else {
            let properties = Value::Object(properties);
            info!(
                event,
                distinct_id,
                %properties,
                "analytics disabled, event not sent"
            );
            return;
        };
        let payload = capture_payload(api_key, event, distinct_id, properties, timestamp);
        match self.send_capture(&payload).await {
            Ok(()) => info!(event, distinct_id, "analytics event sent"),
            Err(err) => warn!(event, distinct_id, error = %format!("{err:#}"), "analytics capture failed"),
        }
    }

    async fn send_capture(&self, payload: &Value) -> Result<()> {
        let url = format!("{}/i/v0/e/", self.settings.capture_host());
        let response = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .json(payload)
            .send()
            .await
            .with_context(|| format!("analytics capture request to {url} failed"))?;
        response_json_or_error("analytics capture", response).await?;
        Ok(())
    }

    pub async fn fetch_events(
        &self,
        event_name: Option<&str>,
        after: Option<&str>,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Value> {
        let Some(personal_api_key) = self.settings.personal_api_key.as_deref() else {
            bail!("POSTHOG_PERSONAL_API_KEY environment variable is not set");
        };
        let Some(project_id) = self.settings.project_id.as_deref() else {
            bail!("POSTHOG_PROJECT_ID environment variable is not set");
        };

        let url = format!(
            "{}/api/projects/{project_id}/events/",
            self.settings.query_host()
        );
        let query = events_query(event_name, after, before, limit);
        info!(url = %url, ?query, "fetching analytics events");
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {personal_api_key}"))
            .header(CONTENT_TYPE, "application/json")
            .query(&query)
            .send()
            .await
            .with_context(|| format!("analytics events request to {url} failed"))?;
        response_json_or_error("analytics events", response).await
    }

    /// Show and select events merged into one list, newest first.
    pub async fn fetch_ab_test_events(
        &self,
        after: Option<&str>,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Value> {
        let shows = self.fetch_events(Some(SHOW_EVENT), after, before, limit).await?;
        let selects = self
            .fetch_events(Some(SELECT_EVENT), after, before, limit)
            .await?;
        Ok(json!({ "results": merge_event_results([shows, selects]) }))
    }

    pub async fn project_info(&self) -> Result<UpstreamResponse> {
        let Some(public_key) = self.settings.public_key.as_deref() else {
            bail!("PUBLIC_POSTHOG_KEY not set");
        };
        let url = format!("{}/api/projects/", self.settings.public_host());
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {public_key}"))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .with_context(|| format!("project info request to {url} failed"))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .context("project info response body read failed")?;
        info!(status, "project info response");
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(UpstreamResponse { status, body })
    }
}

pub fn capture_payload(
    api_key: &str,
    event: &str,
    distinct_id: &str,
    properties: Map<String, Value>,
    timestamp: Option<String>,
) -> Value {
    let mut payload = Map::new();
    payload.insert("api_key".to_string(), Value::String(api_key.to_string()));
    payload.insert("event".to_string(), Value::String(event.to_string()));
    payload.insert(
        "distinct_id".to_string(),
        Value::String(distinct_id.to_string()),
    );
    payload.insert("properties".to_string(), Value::Object(properties));
    if let Some(timestamp) = timestamp {
        payload.insert("timestamp".to_string(), Value::String(timestamp));
    }
    Value::Object(payload)
}

pub fn events_query(
    event_name: Option<&str>,
    after: Option<&str>,
    before: Option<&str>,
    limit: u32,
) -> Vec<(&'static str, String)> {
    let mut query = vec![("limit", limit.to_string()), ("format", "json".to_string())];
    for (key, value) in [("event", event_name), ("after", after), ("before", before)] {
        if let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) {
            query.push((key, value.to_string()));
        }
    }
    query
}

/// Concatenates the `results` arrays of several event pages and orders them by
/// `timestamp`, newest first. Rows without a parseable timestamp go last.
pub fn merge_event_results<I>(pages: I) -> Vec<Value>
where
    I: IntoIterator<Item = Value>,
{
    let mut rows: Vec<Value> = pages
        .into_iter()
        .filter_map(|page| match page {
            Value::Object(mut page) => page.remove("results"),
            _ => None,
        })
        .filter_map(|results| match results {
            Value::Array(rows) => Some(rows),
            _ => None,
        })
        .flatten()
        .collect();
    rows.sort_by(|left, right| match (event_timestamp(left), event_timestamp(right)) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    rows
}

fn event_timestamp(event: &Value) -> Option<DateTime<FixedOffset>> {
    event
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
}

async fn response_json_or_error(label: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .await
        .with_context(|| format!("{label} response body read failed"))?;
    if !status.is_success() {
        bail!("{label} request failed ({code}): {}", truncate_text(&body, 512));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{label} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn host_or(raw: Option<&str>, default: &str) -> String {
    raw.map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
