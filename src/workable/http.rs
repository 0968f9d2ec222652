//! HTTP transport seam for the Workable client.
//!
//! The client builds `reqwest::Request`s and hands them to a [`Transport`].
//! Production uses [`ReqwestTransport`]; tests script responses instead.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Request, StatusCode};
use std::fmt;
use std::time::Duration;

use super::WorkableError;

/// Fully-read HTTP response. Bodies are small JSON documents or single file
/// downloads, so buffering them is fine.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<RawResponse, WorkableError>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, WorkableError> {
        let http = Client::builder()
            .user_agent(concat!("ats-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: Request) -> Result<RawResponse, WorkableError> {
        let res = self.http.execute(request).await?;
        let status = res.status();
        let headers = res.headers().clone();
        let body = res.bytes().await?.to_vec();
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
