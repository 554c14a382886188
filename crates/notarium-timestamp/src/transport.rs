// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transports carrying DER time-stamp queries to a TSA and bringing back the
// reply bytes. Transports know nothing about the protocol beyond media types.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notarium_core::error::{NotariumError, ProtocolReason, Result};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use tracing::{debug, instrument, warn};

/// Media type of a DER `TimeStampReq`.
pub const QUERY_CONTENT_TYPE: &str = "application/timestamp-query";
/// Media type of a DER `TimeStampResp`.
pub const REPLY_CONTENT_TYPE: &str = "application/timestamp-reply";

/// One request/response exchange with a Time-Stamp Authority.
///
/// Implementations must report anything worth retrying (timeouts, refused
/// connections, overloaded servers) as [`NotariumError::Transport`].
#[async_trait]
pub trait TsaTransport: Send + Sync {
    async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: TsaTransport + ?Sized> TsaTransport for Arc<T> {
    async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>> {
        (**self).exchange(request).await
    }
}

/// HTTP(S) transport: POSTs the query and returns the response body.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Build a transport for `url` with a per-attempt `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| NotariumError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TsaTransport for HttpTransport {
    #[instrument(skip_all, fields(url = %self.url, len = request.len()))]
    async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, HeaderValue::from_static(QUERY_CONTENT_TYPE))
            .body(request.to_vec())
            .send()
            .await
            .map_err(|e| NotariumError::Transport(describe(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        if content_type.as_deref() != Some(REPLY_CONTENT_TYPE) {
            warn!(?content_type, "unexpected TSA reply content type");
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| NotariumError::Transport(describe(&e)))?;
        debug!(status = status.as_u16(), len = body.len(), "TSA replied");
        Ok(body.to_vec())
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

/// Map a non-2xx HTTP status to an error.
///
/// Overload and server-side failures are transient; anything else means the
/// endpoint will not accept this request and retrying is pointless.
pub fn status_error(status: StatusCode) -> NotariumError {
    let transient = status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT;
    if transient {
        NotariumError::Transport(format!("TSA answered HTTP {status}"))
    } else {
        NotariumError::protocol(
            ProtocolReason::HttpStatus,
            format!("TSA answered HTTP {status}"),
        )
    }
}
