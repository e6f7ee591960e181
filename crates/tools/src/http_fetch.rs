//! HTTP fetcher — the reqwest-backed collaborator behind `consulta`.
//!
//! Turns a declarative [`FetchRequest`] into a real HTTP call. The request
//! races the evaluation's cancellation token, so a cancelled evaluation
//! never waits on the network.

use std::time::Duration;

use async_trait::async_trait;
use moldeo_config::FetchConfig;
use moldeo_core::error::{Error, Result};
use moldeo_core::fetch::{FetchRequest, FetchResponse, Fetcher};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Option<String>,
    headers: HeaderMap,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let mut fetcher = Self {
            client,
            base_url: config.base_url.clone(),
            headers: HeaderMap::new(),
        };
        for (name, value) in &config.headers {
            insert_header(&mut fetcher.headers, name, value)?;
        }
        Ok(fetcher)
    }

    /// Absolute URL for `url`, joined onto the base URL when relative.
    pub fn resolve_url(&self, url: &str) -> Result<String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        match &self.base_url {
            Some(base) => Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            )),
            None => Err(Error::validation(format!(
                "relative request url '{url}' needs fetch.base_url"
            ))),
        }
    }

    /// Build the reqwest request without sending it.
    pub fn build_request(&self, request: &FetchRequest) -> Result<reqwest::Request> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| Error::validation(format!("invalid HTTP method: {}", request.method)))?;
        let url = self.resolve_url(&request.url)?;

        let mut headers = self.headers.clone();
        for (name, value) in &request.headers {
            insert_header(&mut headers, name, value)?;
        }

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(query) = &request.query {
            builder = builder.query(&pairs(query));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(form) = &request.form_data {
            builder = builder.form(&pairs(form));
        }

        builder
            .build()
            .map_err(|e| Error::validation(format!("invalid request: {e}")))
    }

    async fn send(&self, request: reqwest::Request) -> Result<FetchResponse> {
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| Error::UpstreamFailed {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| Error::UpstreamFailed {
            status: Some(status),
            message: e.to_string(),
        })?;

        let fetched = FetchResponse::from_text(status, &text);
        if !fetched.ok {
            warn!(status, "Fetch returned non-success status");
        }
        Ok(fetched)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse> {
        let built = self.build_request(&request)?;
        debug!(method = %built.method(), url = %built.url(), "Sending fetch request");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.send(built) => result,
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Error::validation(format!("invalid header name: {name}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| Error::validation(format!("invalid value for header {name}")))?;
    headers.insert(name, value);
    Ok(())
}

/// Flatten a mapping into string pairs for query strings and forms.
fn pairs(map: &serde_json::Map<String, Value>) -> Vec<(String, String)> {
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), text)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fetcher(base_url: Option<&str>) -> HttpFetcher {
        let mut config = FetchConfig::default();
        config.base_url = base_url.map(String::from);
        config.headers.insert("X-Client".into(), "moldeo".into());
        HttpFetcher::new(&config).unwrap()
    }

    #[test]
    fn relative_urls_join_base() {
        let f = fetcher(Some("https://api.example.com/"));
        assert_eq!(
            f.resolve_url("/v1/items").unwrap(),
            "https://api.example.com/v1/items"
        );
        assert_eq!(
            f.resolve_url("http://other.test/x").unwrap(),
            "http://other.test/x"
        );
    }

    #[test]
    fn relative_url_without_base_is_invalid() {
        assert!(fetcher(None).resolve_url("v1/items").is_err());
    }

    #[test]
    fn builds_query_and_headers() {
        let f = fetcher(None);
        let request = FetchRequest::from_value(json!({
            "url": "https://api.example.com/search",
            "query": {"q": "rust", "page": 2, "skip": null},
            "headers": {"Accept": "application/json"}
        }))
        .unwrap();
        let built = f.build_request(&request).unwrap();
        assert_eq!(*built.method(), reqwest::Method::GET);
        assert_eq!(built.url().query(), Some("q=rust&page=2"));
        assert_eq!(built.headers()["accept"], "application/json");
        assert_eq!(built.headers()["x-client"], "moldeo");
    }

    #[test]
    fn builds_json_body() {
        let f = fetcher(None);
        let request = FetchRequest::from_value(json!({
            "url": "https://api.example.com/items",
            "method": "post",
            "body": {"name": "x"}
        }))
        .unwrap();
        let built = f.build_request(&request).unwrap();
        assert_eq!(*built.method(), reqwest::Method::POST);
        assert_eq!(built.headers()["content-type"], "application/json");
        let body = built.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(body).unwrap(), json!({"name": "x"}));
    }

    #[test]
    fn invalid_method_rejected() {
        let f = fetcher(None);
        let mut request = FetchRequest::get("https://api.example.com");
        request.method = "BAD METHOD".into();
        assert!(f.build_request(&request).is_err());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let f = fetcher(None);
        let token = CancellationToken::new();
        token.cancel();
        let err = f
            .fetch(FetchRequest::get("https://unreachable.invalid/"), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
