use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestMethod {
    Get,
    Post,
    Delete,
}

impl fmt::Display for RestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestMethod::Get => f.write_str("GET"),
            RestMethod::Post => f.write_str("POST"),
            RestMethod::Delete => f.write_str("DELETE"),
        }
    }
}

/// One HTTP exchange; query parameters are unencoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: RestMethod,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RestRequest {
    pub fn get(url: impl Into<String>) -> Self {
        RestRequest {
            method: RestMethod::Get,
            url: url.into(),
            params: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        RestRequest {
            method: RestMethod::Post,
            url: url.into(),
            params: Vec::new(),
            body: Some(body),
        }
    }

    pub fn delete(url: impl Into<String>) -> Self {
        RestRequest {
            method: RestMethod::Delete,
            url: url.into(),
            params: Vec::new(),
            body: None,
        }
    }

    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    /// Value of the first parameter called `name`.
    pub fn param_value(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: u16,
    pub body: Value,
}

impl RestResponse {
    pub fn ok(body: Value) -> Self {
        RestResponse { status: 200, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests for a `RestStore`. Failing to reach the server is an
/// error; any HTTP status is a response.
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn send(&self, request: RestRequest) -> StoreResult<RestResponse>;
}

#[async_trait]
impl<T: RestTransport + ?Sized> RestTransport for Arc<T> {
    async fn send(&self, request: RestRequest) -> StoreResult<RestResponse> {
        (**self).send(request).await
    }
}

#[cfg(feature = "http")]
mod http {
    use super::*;
    use crate::error::{Operation, StoreError};

    /// `RestTransport` over a shared `reqwest::Client`.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            ReqwestTransport { client }
        }
    }

    fn operation(method: RestMethod) -> Operation {
        match method {
            RestMethod::Get => Operation::Select,
            RestMethod::Post => Operation::Put,
            RestMethod::Delete => Operation::Remove,
        }
    }

    #[async_trait]
    impl RestTransport for ReqwestTransport {
        async fn send(&self, request: RestRequest) -> StoreResult<RestResponse> {
            let op = operation(request.method);
            let builder = match request.method {
                RestMethod::Get => self.client.get(&request.url),
                RestMethod::Post => self.client.post(&request.url),
                RestMethod::Delete => self.client.delete(&request.url),
            };
            let builder = builder.query(&request.params);
            let builder = match &request.body {
                Some(body) => builder.json(body),
                None => builder,
            };

            let response = builder
                .send()
                .await
                .map_err(|e| StoreError::transport(op, e.to_string()))?;
            let status = response.status().as_u16();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| StoreError::transport(op, e.to_string()))?;
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };
            Ok(RestResponse { status, body })
        }
    }
}

#[cfg(feature = "http")]
pub use http::ReqwestTransport;
