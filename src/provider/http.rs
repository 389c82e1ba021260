//! Configuration-driven REST adapter.
//!
//! An [`HttpProvider`] maps each endpoint id onto a GET against the upstream
//! base URL. Parameters are merged over the endpoint defaults, page/size
//! pairs are folded into an offset, names are renamed to the upstream's
//! vocabulary and empty values are dropped.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::IgnoredAny;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::{ProviderAdapter, UpstreamError};
use crate::domain::{EndpointId, Params, ProviderId, ValidationError};

const BODY_SNIPPET_LEN: usize = 200;

/// Page/size parameters folded into an upstream offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub page_param: String,
    pub size_param: String,
    pub offset_param: String,
    pub default_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page_param: "page".to_string(),
            size_param: "size".to_string(),
            offset_param: "offset".to_string(),
            default_size: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Path relative to the provider base URL.
    pub path: String,
    /// Inbound parameter name to upstream parameter name.
    pub rename: BTreeMap<String, String>,
    pub defaults: BTreeMap<String, String>,
    pub required: Vec<String>,
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub id: ProviderId,
    pub base_url: Url,
    pub token: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Pass the caller's preferred language upstream as `Accept-Language`.
    pub forward_language: bool,
    pub endpoints: HashMap<EndpointId, EndpointSpec>,
}

#[derive(Debug, Error)]
pub enum HttpProviderError {
    #[error("provider `{provider}` base url cannot be a base: {url}")]
    BaseUrl { provider: ProviderId, url: Url },
    #[error("provider `{provider}` endpoint `{endpoint}` path `{path}` is invalid: {source}")]
    Path {
        provider: ProviderId,
        endpoint: EndpointId,
        path: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug)]
struct ResolvedEndpoint {
    url: Url,
    spec: EndpointSpec,
}

#[derive(Debug)]
pub struct HttpProvider {
    id: ProviderId,
    token: Option<String>,
    headers: Vec<(String, String)>,
    forward_language: bool,
    endpoints: HashMap<EndpointId, ResolvedEndpoint>,
    client: reqwest::Client,
}

impl HttpProvider {
    /// Resolve every endpoint URL up front so a bad path fails at startup.
    pub fn new(config: HttpProviderConfig, client: reqwest::Client) -> Result<Self, HttpProviderError> {
        let HttpProviderConfig {
            id,
            mut base_url,
            token,
            headers,
            forward_language,
            endpoints,
        } = config;

        if base_url.cannot_be_a_base() {
            return Err(HttpProviderError::BaseUrl { provider: id, url: base_url });
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut resolved = HashMap::with_capacity(endpoints.len());
        for (endpoint, spec) in endpoints {
            let url = base_url
                .join(spec.path.trim_start_matches('/'))
                .map_err(|source| HttpProviderError::Path {
                    provider: id.clone(),
                    endpoint: endpoint.clone(),
                    path: spec.path.clone(),
                    source,
                })?;
            resolved.insert(endpoint, ResolvedEndpoint { url, spec });
        }

        Ok(Self {
            id,
            token,
            headers,
            forward_language,
            endpoints: resolved,
            client,
        })
    }

    fn endpoint(&self, endpoint: &EndpointId) -> Result<&ResolvedEndpoint, ValidationError> {
        self.endpoints
            .get(endpoint)
            .ok_or_else(|| ValidationError::UnknownEndpoint {
                provider: self.id.to_string(),
                endpoint: endpoint.to_string(),
            })
    }

    /// Upstream URL for a request, query included.
    pub fn request_url(&self, endpoint: &EndpointId, params: &Params) -> Result<Url, ValidationError> {
        let resolved = self.endpoint(endpoint)?;
        let query = upstream_query(&resolved.spec, params)?;

        let mut url = resolved.url.clone();
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(&query);
        }
        Ok(url)
    }
}

/// Merge defaults, fold pagination, rename and drop empty values.
fn upstream_query(spec: &EndpointSpec, params: &Params) -> Result<Vec<(String, String)>, ValidationError> {
    let mut merged = spec.defaults.clone();
    merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));

    if let Some(pagination) = &spec.pagination {
        let page = parse_positive(&merged, &pagination.page_param)?.unwrap_or(1);
        let size = parse_positive(&merged, &pagination.size_param)?
            .unwrap_or(u64::from(pagination.default_size));
        let offset = page
            .checked_sub(1)
            .and_then(|skipped| skipped.checked_mul(size))
            .ok_or_else(|| ValidationError::param(pagination.page_param.as_str(), "out of range"))?;
        merged.remove(&pagination.page_param);
        merged.remove(&pagination.size_param);
        merged.insert(pagination.offset_param.clone(), offset.to_string());
    }

    let mut query: Vec<(String, String)> = merged
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| match spec.rename.get(&name) {
            Some(renamed) => (renamed.clone(), value),
            None => (name, value),
        })
        .collect();
    query.sort();
    Ok(query)
}

fn parse_positive(params: &BTreeMap<String, String>, name: &str) -> Result<Option<u64>, ValidationError> {
    match params.get(name).map(String::as_str) {
        None | Some("") => Ok(None),
        Some(raw) => match raw.parse::<u64>() {
            Ok(value) if value >= 1 => Ok(Some(value)),
            _ => Err(ValidationError::param(name, "must be a positive integer")),
        },
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn snippet(body: &str) -> &str {
    match body.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Classify a non-success upstream status.
fn status_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> UpstreamError {
    let message = format!("upstream returned {status}: {}", snippet(body.trim()));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UpstreamError::authentication(message),
        StatusCode::NOT_FOUND => UpstreamError::not_found(message),
        StatusCode::TOO_MANY_REQUESTS => UpstreamError::rate_limited(message, retry_after),
        status if status.is_client_error() => UpstreamError::rejected(message),
        status if status.is_server_error() => UpstreamError::network(message),
        _ => UpstreamError::malformed(message),
    }
}

fn transport_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::timeout(err.to_string())
    } else {
        UpstreamError::network(err.to_string())
    }
}

#[async_trait]
impl ProviderAdapter for HttpProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn varies_by_language(&self) -> bool {
        self.forward_language
    }

    fn validate(&self, endpoint: &EndpointId, params: &Params) -> Result<(), ValidationError> {
        let resolved = self.endpoint(endpoint)?;
        for name in &resolved.spec.required {
            if params.get(name).is_none_or(|value| value.is_empty()) {
                return Err(ValidationError::missing(name.clone()));
            }
        }
        upstream_query(&resolved.spec, params).map(|_| ())
    }

    async fn invoke(
        &self,
        endpoint: &EndpointId,
        params: &Params,
        language: Option<&str>,
    ) -> Result<Bytes, UpstreamError> {
        let url = self
            .request_url(endpoint, params)
            .map_err(|err| UpstreamError::rejected(err.to_string()))?;
        debug!(provider = %self.id, endpoint = %endpoint, url = %url.path(), "calling upstream");

        let mut request = self.client.get(url);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if self.forward_language
            && let Some(language) = language
        {
            request = request.header(reqwest::header::ACCEPT_LANGUAGE, language);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, &body));
        }

        let body = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice::<IgnoredAny>(&body)
            .map_err(|err| UpstreamError::malformed(format!("response is not valid JSON: {err}")))?;
        Ok(body)
    }
}
