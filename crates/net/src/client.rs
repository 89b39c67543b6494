//! Thin JSON-over-HTTP client used for all peer calls.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("POST {url}: status {status}")]
    Status { url: String, status: u16 },
}

/// A pooled HTTP client with a per-request deadline.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self, NetError> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// POST `req` as JSON and decode the 2xx response body.
    pub async fn post_json<Req, Resp>(&self, url: &str, req: &Req) -> Result<Resp, NetError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let resp = self.http.post(url).json(req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NetError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.json().await?)
    }
}
