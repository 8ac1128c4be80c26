//! HTTP transport seam for the upstream fetcher.
//!
//! The fetcher only needs "GET this URL with these query params, give me the
//! status and the body". Keeping that behind a trait lets tests script
//! responses (429 bursts, 5xx, garbage bodies) without a network.

use std::time::Duration;

/// Status, body and the optional `Retry-After` header of one response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub retry_after_secs: Option<u64>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            retry_after_secs: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            retry_after_secs: None,
        }
    }
}

/// Blocking GET transport.
///
/// `Err` means no response was received at all (connect/timeout/DNS).
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, String>;
}

/// Production transport on top of `reqwest::blocking`.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
    api_key: Option<String>,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, api_key: Option<String>) -> Result<Self, String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("coincast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self { client, api_key })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, String> {
        let mut req = self.client.get(url).query(query);
        if let Some(key) = &self.api_key {
            req = req.header("x-cg-demo-api-key", key);
        }

        let resp = req.send().map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let retry_after_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = resp.text().map_err(|e| e.to_string())?;

        Ok(HttpResponse {
            status,
            body,
            retry_after_secs,
        })
    }
}
