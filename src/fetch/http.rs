//! Generic JSON-over-HTTP fetch adapter
//!
//! POSTs `{"query": "<query> since:<start> until:<end>", "count": n, ...extra}`
//! to `base_url/endpoint` and reads the `data` array of the JSON response.
//! Transport failures and non-2xx statuses become classified failures.

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use url::Url;

use super::{Fetch, FetchOutcome, FetchRequest, Item};
use crate::config::HttpSourceConfig;
use crate::error::{Error, Result};
use crate::retry::classify_status;
use crate::types::{ErrorClass, Window};

/// Fetch adapter for a JSON search API
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpFetcher {
    /// Build the client from configuration
    pub fn new(config: &HttpSourceConfig) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            Error::config("http_source.base_url", format!("invalid URL '{}': {e}", base))
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::config("http_source.headers", format!("invalid header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                Error::config("http_source.headers", format!("invalid value for '{name}': {e}"))
            })?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, base_url })
    }

    fn endpoint_url(&self, endpoint: &str) -> std::result::Result<Url, url::ParseError> {
        self.base_url.join(endpoint.trim_start_matches('/'))
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let url = match self.endpoint_url(&request.endpoint) {
            Ok(url) => url,
            Err(e) => {
                return FetchOutcome::failure(
                    ErrorClass::ApiError,
                    format!("invalid endpoint '{}': {e}", request.endpoint),
                    None,
                );
            }
        };
        let body = request_body(request);

        tracing::debug!(
            request_id = %request.request_id,
            url = %url,
            query = %body["query"],
            "fetching window"
        );

        let response = match self.client.post(url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                return FetchOutcome::failure(ErrorClass::Network, e.to_string(), None);
            }
        };

        let status = response.status().as_u16();
        if let Some(class) = classify_status(status) {
            let text = response.text().await.unwrap_or_default();
            return FetchOutcome::failure(class, format!("HTTP {status}: {text}"), Some(status));
        }

        match response.json::<Value>().await {
            Ok(json) => match extract_items(json) {
                Some(items) => FetchOutcome::success(items),
                None => FetchOutcome::failure(
                    ErrorClass::ApiError,
                    "response body has no 'data' field",
                    Some(status),
                ),
            },
            Err(e) => FetchOutcome::failure(
                ErrorClass::ApiError,
                format!("unreadable response body: {e}"),
                Some(status),
            ),
        }
    }
}

/// JSON body for one window
fn request_body(request: &FetchRequest) -> Value {
    let mut body: Map<String, Value> = request
        .params
        .extra
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    body.insert(
        "query".to_string(),
        Value::String(windowed_query(&request.params.query, &request.window)),
    );
    if let Some(count) = request.params.count {
        body.insert("count".to_string(), Value::from(count));
    }
    Value::Object(body)
}

/// `<query> since:<start> until:<end>`
///
/// Day-aligned windows use plain dates; anything finer uses the
/// `YYYY-MM-DD_HH:MM:SS_UTC` form.
pub fn windowed_query(query: &str, window: &Window) -> String {
    let day_aligned = is_midnight(&window.start) && is_midnight(&window.end);
    let format = |t: &DateTime<Utc>| {
        if day_aligned {
            t.format("%Y-%m-%d").to_string()
        } else {
            t.format("%Y-%m-%d_%H:%M:%S_UTC").to_string()
        }
    };
    format!(
        "{} since:{} until:{}",
        query.trim(),
        format(&window.start),
        format(&window.end)
    )
}

fn is_midnight(t: &DateTime<Utc>) -> bool {
    t.num_seconds_from_midnight() == 0 && t.nanosecond() == 0
}

/// Items of a success body; `None` when the body carries no `data`
///
/// An explicit `"data": null` means the window had no results.
fn extract_items(json: Value) -> Option<Vec<Item>> {
    match json {
        Value::Object(mut map) => match map.remove("data")? {
            Value::Array(items) => Some(items),
            Value::Null => Some(Vec::new()),
            single => Some(vec![single]),
        },
        Value::Array(items) => Some(items),
        _ => None,
    }
}
