//! Resolver backed by the IP2Location.io web service

use std::net::IpAddr;
use std::time::Duration;

use ipproxycache::{Event, ResolveError, Resolver};
use ipproxydb::ProxyRecord;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::debug;

/// IP2Location.io lookup endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.ip2location.io/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum WebServiceError {
    #[error(
        "an IP2Location.io API key is required; a free key is available at https://www.ip2location.io/pricing"
    )]
    MissingApiKey,

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiProxy {
    #[serde(default)]
    proxy_type: Option<String>,
}

/// The parts of an IP2Location.io reply the filter reports
#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    country_code: Option<String>,
    country_name: Option<String>,
    region_name: Option<String>,
    city_name: Option<String>,
    isp: Option<String>,
    is_proxy: Option<bool>,
    proxy: Option<ApiProxy>,
    error: Option<ApiError>,
}

impl ApiResponse {
    /// Result fields, or `None` when the service knows nothing about the IP
    fn into_fields(self, hide_unsupported: bool) -> Result<Option<Map<String, Value>>, ResolveError> {
        if let Some(error) = self.error {
            return Err(ResolveError::Unavailable(format!(
                "IP2Location.io error {}: {}",
                error.error_code.unwrap_or_default(),
                error.error_message.unwrap_or_default()
            )));
        }

        let Some(country_short) = self.country_code else {
            return Ok(None);
        };

        let record = ProxyRecord {
            proxy_type: self.proxy.and_then(|p| p.proxy_type),
            country_long: self.country_name.unwrap_or_default(),
            country_short,
            region: self.region_name,
            city: self.city_name,
            isp: self.isp,
        };

        let mut fields = record.to_fields(hide_unsupported);
        if record.proxy_type.is_none() {
            let is_proxy = u8::from(self.is_proxy.unwrap_or(false));
            fields.insert("is_proxy".to_string(), Value::from(is_proxy));
        }
        Ok(Some(fields))
    }
}

/// Queries IP2Location.io for every lookup
///
/// `resolve` blocks on the runtime behind `handle`; call it from a blocking
/// context such as `spawn_blocking`.
pub struct WebServiceResolver {
    client: reqwest::Client,
    handle: Handle,
    endpoint: String,
    api_key: String,
    target: String,
    hide_unsupported_fields: bool,
}

impl WebServiceResolver {
    pub fn new(
        api_key: impl Into<String>,
        target: impl Into<String>,
        hide_unsupported_fields: bool,
        handle: Handle,
    ) -> Result<Self, WebServiceError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(WebServiceError::MissingApiKey);
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("ipproxyd/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            handle,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
            target: target.into(),
            hide_unsupported_fields,
        })
    }

    /// Point the resolver at another endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn fetch(&self, ip: IpAddr) -> Result<ApiResponse, ResolveError> {
        let ip = ip.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("key", self.api_key.as_str()), ("ip", ip.as_str()), ("format", "json")])
            .send()
            .await
            .map_err(|e| ResolveError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::Unavailable(format!("HTTP {}: {}", status, e)))?;

        // Error replies carry a JSON body; keep its message when there is one
        if !status.is_success() && body.error.is_none() {
            return Err(ResolveError::Unavailable(format!("HTTP {}", status)));
        }
        Ok(body)
    }
}

impl Resolver for WebServiceResolver {
    fn resolve(&self, key: &str, event: &mut Event) -> Result<bool, ResolveError> {
        let ip: IpAddr = key
            .trim()
            .parse()
            .map_err(|_| ResolveError::InvalidKey(key.to_string()))?;

        let response = self.handle.block_on(self.fetch(ip))?;
        match response.into_fields(self.hide_unsupported_fields)? {
            Some(fields) => {
                event.set(self.target.as_str(), Value::Object(fields));
                Ok(true)
            }
            None => {
                debug!(ip = %ip, "IP2Location.io returned no country");
                Ok(false)
            }
        }
    }
}
