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

use crate::config::CredentialConfig;
use crate::constants::{X_AWS_EC2_METADATA_TOKEN, X_AWS_EC2_METADATA_TOKEN_TTL_SECONDS};
use crate::error::response_error;
use crate::Credential;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{Method, StatusCode};
use log::debug;
use s3vfs_core::time::{now, parse_rfc3339, DateTime};
use s3vfs_core::{Context, Error, ProvideCredential, Result};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// 21600s (6h) is recommended by AWS.
const TOKEN_TTL_SECONDS: i64 = 21600;

/// IMDSv2CredentialProvider loads the credential of the role attached to
/// the EC2 instance.
///
/// A session token is requested first; if that fails (a 403 from a
/// metadata service that only speaks v1, for instance) the credentials are
/// fetched without it.
#[derive(Debug, Clone)]
pub struct IMDSv2CredentialProvider {
    endpoint: String,
    disabled: bool,
    token: Arc<Mutex<Option<(String, DateTime)>>>,
}

impl IMDSv2CredentialProvider {
    /// Create a new provider from the resolved credential configuration.
    pub fn new(config: &CredentialConfig) -> Self {
        Self {
            endpoint: config.ec2_metadata_endpoint.trim_end_matches('/').to_string(),
            disabled: config.ec2_metadata_disabled,
            token: Arc::new(Mutex::new(None)),
        }
    }

    /// Set the endpoint for the metadata service.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    async fn load_token(&self, ctx: &Context) -> Option<String> {
        let mut token = self.token.lock().await;
        if let Some((value, expires_in)) = token.as_ref() {
            if *expires_in > now() {
                return Some(value.clone());
            }
        }

        match self.fetch_token(ctx).await {
            Ok(value) => {
                // Refresh 10 minutes before the token expires.
                let expires_in = now() + chrono::TimeDelta::seconds(TOKEN_TTL_SECONDS - 600);
                *token = Some((value.clone(), expires_in));
                Some(value)
            }
            Err(err) => {
                debug!("failed to fetch imds token, falling back to imdsv1: {err}");
                None
            }
        }
    }

    async fn fetch_token(&self, ctx: &Context) -> Result<String> {
        let req = http::Request::builder()
            .method(Method::PUT)
            .uri(format!("{}/latest/api/token", self.endpoint))
            .header(CONTENT_LENGTH, "0")
            .header(X_AWS_EC2_METADATA_TOKEN_TTL_SECONDS, TOKEN_TTL_SECONDS.to_string())
            .body(Bytes::new())?;

        self.send(ctx, req).await
    }

    async fn get(&self, ctx: &Context, path: &str, token: Option<&str>) -> Result<String> {
        let mut req = http::Request::builder()
            .method(Method::GET)
            .uri(format!("{}{path}", self.endpoint));
        if let Some(token) = token {
            req = req.header(X_AWS_EC2_METADATA_TOKEN, token);
        }

        self.send(ctx, req.body(Bytes::new())?)
            .await
            .map_err(|e| e.with_context(format!("path: {path}")))
    }

    async fn send(&self, ctx: &Context, req: http::Request<Bytes>) -> Result<String> {
        let resp = ctx.http_send(req).await?;
        if resp.status() != StatusCode::OK {
            return Err(response_error(resp.status(), resp.body()));
        }
        Ok(String::from_utf8_lossy(resp.body()).trim().to_string())
    }
}

#[async_trait]
impl ProvideCredential for IMDSv2CredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        if self.disabled {
            debug!("instance metadata service is disabled");
            return Ok(None);
        }

        let token = self.load_token(ctx).await;
        let token = token.as_deref();

        let profiles = self
            .get(ctx, "/latest/meta-data/iam/security-credentials/", token)
            .await?;
        let Some(profile_name) = profiles.lines().map(str::trim).find(|v| !v.is_empty()) else {
            return Err(Error::config_invalid("no IAM role attached to EC2 instance"));
        };

        let content = self
            .get(
                ctx,
                &format!("/latest/meta-data/iam/security-credentials/{profile_name}"),
                token,
            )
            .await?;
        let resp: Ec2MetadataIamSecurityCredentials =
            serde_json::from_str(&content).map_err(|e| {
                Error::protocol("failed to parse imds credentials response")
                    .with_source(e)
                    .with_context(format!("profile: {profile_name}"))
            })?;
        if resp.code != "Success" {
            return Err(Error::auth_unavailable(format!(
                "imds returned error: [{}] {}",
                resp.code, resp.message
            ))
            .with_context(format!("profile: {profile_name}")));
        }

        Ok(Some(Credential {
            access_key_id: resp.access_key_id,
            secret_access_key: resp.secret_access_key,
            session_token: Some(resp.token),
            expires_in: Some(parse_rfc3339(&resp.expiration)?),
        }))
    }
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Ec2MetadataIamSecurityCredentials {
    access_key_id: String,
    secret_access_key: String,
    token: String,
    expiration: String,

    code: String,
    message: String,
}
