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

//! Scripted HTTP transport for testing s3vfs without a network.
//!
//! Every expected request is registered up front together with the response
//! to replay. A request matches the first pending expectation with the same
//! method and path (query string included, host ignored unless required).
//! Unmatched requests fail with [`ErrorKind::Unexpected`](s3vfs_core::ErrorKind)
//! so the operation under test surfaces them.
//!
//! ```
//! use http::Method;
//! use s3vfs_core::Context;
//! use s3vfs_http_send_mock::{MockHttpSend, MockResponse};
//!
//! let mock = MockHttpSend::new();
//! mock.expect(Method::GET, "/bucket/key", MockResponse::new(200).with_body("foo"));
//! let ctx = Context::new().with_http_send(mock.clone());
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use http::header::HeaderName;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use log::debug;
use s3vfs_core::{Error, HttpSend, Result};
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

/// A request observed by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,
    /// `host[:port]` the request was sent to.
    pub host: String,
    /// Path and query exactly as sent.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Bytes,
}

impl RecordedRequest {
    /// Get a header value as str, empty if absent.
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

/// The canned answer of an expectation.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    transport_error: bool,
}

impl MockResponse {
    /// Create a response with given status and an empty body.
    pub fn new(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            transport_error: false,
        }
    }

    /// Simulate a connection failure instead of a response.
    pub fn transport_error() -> Self {
        Self {
            transport_error: true,
            ..Self::new(500)
        }
    }

    /// Add a response header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(k), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(k, v);
        }
        self
    }

    /// Set the response body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// An expected request.
pub struct Expectation {
    method: Method,
    path: String,
    host: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    response: MockResponse,
}

impl Debug for Expectation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        if let Some(host) = &self.host {
            write!(f, " (host {host})")?;
        }
        Ok(())
    }
}

impl Expectation {
    /// Expect a request with given method and path (query included).
    pub fn new(method: Method, path: &str, response: MockResponse) -> Self {
        Self {
            method,
            path: path.to_string(),
            host: None,
            headers: Vec::new(),
            body: None,
            response,
        }
    }

    /// Only match requests sent to this `host[:port]`.
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Only match requests carrying this header value.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    /// Only match requests with exactly this body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    fn matches(&self, req: &RecordedRequest) -> bool {
        if self.method != req.method || self.path != req.path {
            return false;
        }
        if let Some(host) = &self.host {
            if host != &req.host {
                return false;
            }
        }
        if let Some(body) = &self.body {
            if body != &req.body {
                return false;
            }
        }
        self.headers
            .iter()
            .all(|(k, v)| req.header(k) == v.as_str())
    }
}

#[derive(Default)]
struct State {
    expectations: VecDeque<Expectation>,
    requests: Vec<RecordedRequest>,
}

/// Scripted `HttpSend`; clones share the same script.
#[derive(Clone, Default)]
pub struct MockHttpSend {
    state: Arc<Mutex<State>>,
}

impl Debug for MockHttpSend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHttpSend")
            .field("pending", &self.state().expectations)
            .finish()
    }
}

impl MockHttpSend {
    /// Create an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread poisons the lock; the data stays usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Expect a request with given method and path and answer it with `response`.
    pub fn expect(&self, method: Method, path: &str, response: MockResponse) {
        self.expect_with(Expectation::new(method, path, response));
    }

    /// Register a fully specified expectation.
    pub fn expect_with(&self, expectation: Expectation) {
        self.state().expectations.push_back(expectation);
    }

    /// All requests observed so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    /// Number of expectations not consumed yet.
    pub fn pending(&self) -> usize {
        self.state().expectations.len()
    }

    /// Forget observed requests, keeping pending expectations.
    pub fn reset_requests(&self) {
        self.state().requests.clear();
    }
}

#[async_trait]
impl HttpSend for MockHttpSend {
    async fn http_send(&self, req: http::Request<Bytes>) -> Result<http::Response<Bytes>> {
        let (parts, body) = req.into_parts();
        let recorded = RecordedRequest {
            method: parts.method,
            host: parts
                .uri
                .authority()
                .map(|v| v.to_string())
                .unwrap_or_default(),
            path: parts
                .uri
                .path_and_query()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "/".to_string()),
            headers: parts.headers,
            body,
        };
        debug!("mock received {} {}{}", recorded.method, recorded.host, recorded.path);

        let mut state = self.state();
        state.requests.push(recorded.clone());

        let Some(idx) = state
            .expectations
            .iter()
            .position(|e| e.matches(&recorded))
        else {
            return Err(Error::unexpected(format!(
                "mock: unexpected request {} {}",
                recorded.method, recorded.path
            ))
            .with_context(format!("pending: {:?}", state.expectations)));
        };
        let Some(expectation) = state.expectations.remove(idx) else {
            return Err(Error::unexpected("mock: expectation vanished"));
        };
        let response = expectation.response;

        if response.transport_error {
            return Err(Error::transient("mock: connection reset"));
        }

        let mut resp = http::Response::new(response.body);
        *resp.status_mut() = response.status;
        *resp.headers_mut() = response.headers;
        Ok(resp)
    }
}
