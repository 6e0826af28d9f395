// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Reqwest-based HTTP transport for s3vfs.
//!
//! `ReqwestHttpSend` implements `HttpSend` on top of a `reqwest::Client`.
//! Timeouts, proxies and TLS settings are configured on the client; s3vfs
//! inherits them for every request it issues.
//!
//! ```no_run
//! use std::time::Duration;
//! use s3vfs_core::Context;
//! use s3vfs_http_send_reqwest::ReqwestHttpSend;
//!
//! let client = reqwest::Client::builder()
//!     .timeout(Duration::from_secs(30))
//!     .build()
//!     .expect("client must build");
//! let ctx = Context::new().with_http_send(ReqwestHttpSend::new(client));
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::BodyExt;
use log::debug;
use reqwest::{Client, Request};
use s3vfs_core::{Error, HttpSend, Result};

/// HttpSend implementation backed by `reqwest`.
#[derive(Debug, Default, Clone)]
pub struct ReqwestHttpSend {
    client: Client,
}

impl ReqwestHttpSend {
    /// Create a new ReqwestHttpSend with a reqwest::Client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpSend for ReqwestHttpSend {
    async fn http_send(&self, req: http::Request<Bytes>) -> Result<http::Response<Bytes>> {
        let req = Request::try_from(req)
            .map_err(|e| Error::request_invalid("failed to convert request").with_source(e))?;
        let url = req.url().to_string();

        let resp: http::Response<_> = self
            .client
            .execute(req)
            .await
            .map_err(|e| {
                debug!("sending request to {url} failed: {e}");
                Error::transient("failed to send http request")
                    .with_context(format!("url: {url}"))
                    .with_source(e)
            })?
            .into();

        let (parts, body) = resp.into_parts();
        let bs = BodyExt::collect(body)
            .await
            .map(|buf| buf.to_bytes())
            .map_err(|e| {
                Error::transient("failed to read http response body")
                    .with_context(format!("url: {url}"))
                    .with_source(e)
            })?;
        Ok(http::Response::from_parts(parts, bs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3vfs_core::{Context, ErrorKind};

    #[tokio::test]
    async fn test_connection_failure_is_transient() {
        let ctx = Context::new().with_http_send(ReqwestHttpSend::default());
        // Port 9 (discard) is closed on any reasonable test host.
        let req = http::Request::get("http://127.0.0.1:9/bucket/key")
            .body(Bytes::new())
            .expect("request must build");

        let err = ctx.http_send(req).await.expect_err("must fail to connect");
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_retryable());
    }
}
