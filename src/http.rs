//! The HTTP boundary. Services are only ever queried with `GET`.

use async_trait::async_trait;

use crate::config::FilterConfig;
use crate::error::{FilterError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body of a successful response, an [`FilterError::Http`] otherwise.
    pub fn into_body(self) -> Result<String> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(FilterError::http(self.status, self.body))
        }
    }
}

#[async_trait(?Send)]
pub trait HttpClient {
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// [`HttpClient`] backed by `reqwest` (fetch on wasm).
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(config: &FilterConfig) -> Result<Self> {
        let builder = reqwest::Client::builder();
        #[cfg(not(target_arch = "wasm32"))]
        let builder = builder.timeout(std::time::Duration::from_secs(config.http_timeout_secs));
        #[cfg(target_arch = "wasm32")]
        let _ = config;
        let client = builder.build()?;
        Ok(Self { client })
    }
}

#[async_trait(?Send)]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        tracing::debug!(url, "GET");
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_success_status_is_an_error() {
        assert_eq!(HttpResponse::ok("x").into_body().unwrap(), "x");
        let err = HttpResponse {
            status: 503,
            body: "down".to_string(),
        }
        .into_body()
        .unwrap_err();
        assert!(matches!(err, FilterError::Http { status: 503, .. }));
    }
}
