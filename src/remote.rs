//! API-Football provider client
//!
//! Thin HTTP client used as the remote source behind `CachedFetcher`. Each
//! resource name maps to a path under the provider's base URL and the
//! parameter set becomes the query string.

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::cache::ParamSet;

/// Base URL for the API-Football v3 API
pub const DEFAULT_BASE_URL: &str = "https://v3.football.api-sports.io";

/// Header carrying the provider API key
const API_KEY_HEADER: &str = "x-apisports-key";

/// Errors that can occur when calling the provider
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Provider answered with a non-success status
    #[error("Provider returned HTTP {0}")]
    Status(u16),

    /// Provider answered 200 but reported errors in the body
    #[error("Provider reported errors: {0}")]
    Provider(String),
}

/// Client for the sports-data provider
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ApiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
        }
    }

    /// Points the client at a different host (mirrors, test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Full URL for a resource name, e.g. `fixtures/statistics`
    pub fn endpoint_url(&self, resource_name: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            resource_name.trim_start_matches('/')
        )
    }

    /// Fetches a resource and returns the raw JSON body
    ///
    /// # Returns
    /// * `Ok(Value)` - The provider's response body
    /// * `Err(ApiError)` - On transport failure, non-2xx status, or a
    ///   non-empty `errors` field in the body
    pub async fn fetch(&self, resource_name: &str, params: &ParamSet) -> Result<Value, ApiError> {
        let query: Vec<(&str, &str)> = params.iter().collect();
        let mut request = self
            .client
            .get(self.endpoint_url(resource_name))
            .query(&query);
        if let Some(ref key) = self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        if let Some(message) = provider_errors(&body) {
            return Err(ApiError::Provider(message));
        }

        tracing::debug!(resource = resource_name, "fetched from provider");
        Ok(body)
    }
}

/// Extracts the provider's `errors` field when it is non-empty
///
/// The provider sends `[]` when there are no errors and an object such as
/// `{"token": "..."}` otherwise.
fn provider_errors(body: &Value) -> Option<String> {
    match body.get("errors")? {
        Value::Array(items) if items.is_empty() => None,
        Value::Object(map) if map.is_empty() => None,
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
