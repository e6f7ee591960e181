//! Fetch collaborator contract used by the `consulta` / `request` key.
//!
//! The engine hands a declarative [`FetchRequest`] and the evaluation's
//! cancellation token to a [`Fetcher`] and substitutes the resulting
//! [`FetchResponse`] as the new value.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A declarative HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".into()
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            query: None,
            body: None,
            form_data: None,
            headers: BTreeMap::new(),
        }
    }

    /// Parse an evaluated request description.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut request: FetchRequest = serde_json::from_value(value)
            .map_err(|e| Error::validation(format!("invalid request description: {e}")))?;
        request.method = request.method.to_uppercase();
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::validation("request url cannot be empty"));
        }
        if self.body.is_some() && self.form_data.is_some() {
            return Err(Error::validation(
                "request cannot carry both 'body' and 'formData'",
            ));
        }
        Ok(())
    }
}

/// The collaborator's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub ok: bool,
    pub status: u16,
    pub data: Value,
}

impl FetchResponse {
    /// Build a response from a raw body; JSON bodies are parsed, anything
    /// else is kept as text.
    pub fn from_text(status: u16, text: &str) -> Self {
        let data = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        };
        Self {
            ok: (200..300).contains(&status),
            status,
            data,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "ok": self.ok,
            "status": self.status,
            "data": self.data,
        })
    }
}

/// The network-fetch collaborator.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Perform the request. Implementations must stop promptly and return
    /// [`Error::Cancelled`] once `cancel` fires.
    async fn fetch(&self, request: FetchRequest, cancel: &CancellationToken)
    -> Result<FetchResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_description() {
        let request = FetchRequest::from_value(json!({
            "url": "https://api.example.com/items",
            "method": "post",
            "formData": {"name": "x"},
            "headers": {"Accept": "application/json"}
        }))
        .unwrap();
        assert_eq!(request.method, "POST");
        assert!(request.form_data.is_some());
        assert_eq!(request.headers["Accept"], "application/json");
    }

    #[test]
    fn rejects_body_and_form_together() {
        let err = FetchRequest::from_value(json!({
            "url": "https://x.test",
            "body": {"a": 1},
            "formData": {"b": 2}
        }))
        .unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));
    }

    #[test]
    fn missing_url_is_invalid() {
        assert!(FetchRequest::from_value(json!({"method": "GET"})).is_err());
    }

    #[test]
    fn response_parses_json_or_keeps_text() {
        let json_response = FetchResponse::from_text(200, r#"{"id": 1}"#);
        assert!(json_response.ok);
        assert_eq!(json_response.data, json!({"id": 1}));

        let text_response = FetchResponse::from_text(404, "not here");
        assert!(!text_response.ok);
        assert_eq!(text_response.data, json!("not here"));
        assert_eq!(text_response.to_value()["status"], 404);
    }
}
