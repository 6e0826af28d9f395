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

use crate::config::Config;
use crate::credential::CredentialStore;
use crate::constants::{X_AMZ_CONTENT_SHA_256, X_AMZ_REQUEST_PAYER};
use crate::endpoint::{Endpoint, EndpointRegistry};
use crate::error::{response_error, ServiceError};
use crate::sign_request::RequestSigner;
use crate::Credential;
use bytes::Bytes;
use http::header::{HeaderName, CONTENT_LENGTH};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use log::{debug, warn};
use s3vfs_core::hash::hex_sha256;
use s3vfs_core::{Context, Error, Result, SignRequest};
use std::time::Duration;

/// Redirects followed within one request chain.
const MAX_REDIRECTS: usize = 3;

/// Immutable description of a request to a bucket.
///
/// Every attempt of the executor builds and signs a fresh request out of it,
/// so the body is kept around for resends.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub bucket: String,
    pub key: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestDescriptor {
    pub fn new(method: Method, bucket: &str, key: &str) -> Self {
        Self {
            method,
            bucket: bucket.to_string(),
            key: key.to_string(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        self.headers.insert(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(value)?,
        );
        Ok(self)
    }

    /// Merge `headers` into the request, replacing existing values.
    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    fn describe(&self) -> String {
        format!("{} {}/{}", self.method, self.bucket, self.key)
    }
}

/// What to do with a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The bucket lives in another region.
    RegionMismatch(String),
    /// The bucket must be reached through another host.
    Redirect { endpoint: String, permanent: bool },
    Retryable,
    Fatal,
}

/// Classify a response by its status and error document.
pub fn classify(status: StatusCode, body: &[u8]) -> Outcome {
    if status.is_success() {
        return Outcome::Success;
    }

    let err = ServiceError::parse(body);
    if let Some(err) = &err {
        match (err.code.as_str(), &err.region, &err.endpoint) {
            ("AuthorizationHeaderMalformed", Some(region), _) => {
                return Outcome::RegionMismatch(region.clone())
            }
            ("PermanentRedirect", _, Some(endpoint)) => {
                return Outcome::Redirect {
                    endpoint: endpoint.clone(),
                    permanent: true,
                }
            }
            ("TemporaryRedirect", _, Some(endpoint)) => {
                return Outcome::Redirect {
                    endpoint: endpoint.clone(),
                    permanent: false,
                }
            }
            ("RequestTimeout" | "SlowDown" | "InternalError", _, _) => return Outcome::Retryable,
            _ => {}
        }
    }

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Outcome::Retryable
    } else {
        Outcome::Fatal
    }
}

/// Executor sends requests for one bucket, recovering from region
/// mismatches, redirects and transient failures.
///
/// The credential is looked up in the store on every attempt, so a long
/// lived handle picks up a fresh one once the old one expires.
#[derive(Debug)]
pub struct Executor<'a> {
    ctx: &'a Context,
    config: &'a Config,
    endpoints: &'a EndpointRegistry,
    credentials: &'a CredentialStore,
    configured: Endpoint,
}

impl<'a> Executor<'a> {
    pub fn new(
        ctx: &'a Context,
        config: &'a Config,
        endpoints: &'a EndpointRegistry,
        credentials: &'a CredentialStore,
        configured: Endpoint,
    ) -> Self {
        Self {
            ctx,
            config,
            endpoints,
            credentials,
            configured,
        }
    }

    async fn credential(&self, bucket: &str) -> Result<Option<Credential>> {
        self.credentials
            .get(self.ctx, bucket, &self.config.credential)
            .await
    }

    /// The endpoint requests for `bucket` currently go to.
    pub fn endpoint(&self, bucket: &str) -> Endpoint {
        self.endpoints.resolve(bucket, self.configured.clone())
    }

    /// Send `desc`, returning the successful response.
    pub async fn send(&self, desc: &RequestDescriptor) -> Result<http::Response<Bytes>> {
        let mut endpoint = self.endpoint(&desc.bucket);
        let mut region_corrected = false;
        let mut redirects = 0;
        let mut attempt = 0;

        loop {
            let req = self.build(desc, &endpoint).await?;
            debug!("sending {} to {}", desc.describe(), req.uri());

            let resp = match self.ctx.http_send(req).await {
                Ok(resp) => resp,
                Err(err) if err.is_retryable() && attempt < self.config.max_retry => {
                    warn!("{} failed, retrying: {err}", desc.describe());
                    self.backoff(attempt).await;
                    attempt += 1;
                    continue;
                }
                Err(err) => return Err(err.with_context(desc.describe())),
            };

            let status = resp.status();
            match classify(status, resp.body()) {
                Outcome::Success => return Ok(resp),
                Outcome::RegionMismatch(region) if !region_corrected => {
                    debug!("bucket {} lives in region {region}", desc.bucket);
                    region_corrected = true;
                    endpoint.region = region;
                    self.endpoints
                        .persist(&desc.bucket, &self.configured, &endpoint);
                }
                Outcome::Redirect {
                    endpoint: target,
                    permanent,
                } if redirects < MAX_REDIRECTS => {
                    debug!("{} redirected to {target}, permanent: {permanent}", desc.describe());
                    redirects += 1;
                    endpoint = endpoint.redirect_to(&desc.bucket, &target);
                    if permanent {
                        self.endpoints
                            .persist(&desc.bucket, &self.configured, &endpoint);
                    }
                }
                Outcome::Retryable if attempt < self.config.max_retry => {
                    warn!("{} returned {status}, retrying", desc.describe());
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                _ => {
                    return Err(response_error(status, resp.body()).with_context(desc.describe()))
                }
            }
        }
    }

    /// Build the pre-signed url of `desc`.
    pub async fn presign(&self, desc: &RequestDescriptor, expires_in: Duration) -> Result<String> {
        let endpoint = self.endpoint(&desc.bucket);
        let req = http::Request::builder()
            .method(desc.method.clone())
            .uri(endpoint.url(&desc.bucket, &desc.key, &desc.query))
            .body(())?;

        let credential = self.credential(&desc.bucket).await?;
        let (mut parts, _) = req.into_parts();
        self.signer(&endpoint)
            .sign_request(self.ctx, &mut parts, credential.as_ref(), Some(expires_in))
            .await?;
        Ok(parts.uri.to_string())
    }

    async fn build(
        &self,
        desc: &RequestDescriptor,
        endpoint: &Endpoint,
    ) -> Result<http::Request<Bytes>> {
        let mut req = http::Request::builder()
            .method(desc.method.clone())
            .uri(endpoint.url(&desc.bucket, &desc.key, &desc.query))
            .body(desc.body.clone())?;

        let headers = req.headers_mut();
        headers.extend(desc.headers.clone());
        headers.insert(
            X_AMZ_CONTENT_SHA_256,
            HeaderValue::try_from(hex_sha256(&desc.body))?,
        );
        if let Some(payer) = &self.config.request_payer {
            headers.insert(X_AMZ_REQUEST_PAYER, HeaderValue::from_str(payer)?);
        }
        if matches!(desc.method, Method::PUT | Method::POST) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(desc.body.len()));
        }

        let credential = self.credential(&desc.bucket).await?;
        let (mut parts, body) = req.into_parts();
        self.signer(endpoint)
            .sign_request(self.ctx, &mut parts, credential.as_ref(), None)
            .await?;
        Ok(http::Request::from_parts(parts, body))
    }

    fn signer(&self, endpoint: &Endpoint) -> RequestSigner {
        let signer = RequestSigner::new("s3", &endpoint.region);
        match self.config.timestamp {
            Some(time) => signer.with_time(time),
            None => signer,
        }
    }

    async fn backoff(&self, attempt: usize) {
        let delay = self.config.backoff.delay(self.config.retry_delay, attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Check that a response was a success, for callers that got it some other way.
pub fn ensure_success(resp: &http::Response<Bytes>) -> Result<()> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(response_error(resp.status(), resp.body()))
    }
}

/// Get a response header as str.
pub fn header_str<'r>(resp: &'r http::Response<Bytes>, name: &str) -> Option<&'r str> {
    resp.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Error for a response body that doesn't carry what we expected.
pub fn protocol_error(what: &str, body: &[u8]) -> Error {
    Error::protocol(format!(
        "{what}: {}",
        String::from_utf8_lossy(body).trim()
    ))
}
