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

//! Requests and responses shared by the STS backed providers.

use crate::constants::{AWS_QUERY_ENCODE_SET, DEFAULT_REGION, EMPTY_STRING_SHA256, X_AMZ_CONTENT_SHA_256};
use crate::error::response_error;
use crate::sign_request::RequestSigner;
use crate::Credential;
use bytes::Bytes;
use http::{header, Method, StatusCode};
use log::debug;
use percent_encoding::utf8_percent_encode;
use quick_xml::de;
use s3vfs_core::time::parse_rfc3339;
use s3vfs_core::{Context, Error, Result, SignRequest};
use serde::Deserialize;

/// A role to assume with `AssumeRole`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct RoleStep {
    pub role_arn: String,
    pub role_session_name: String,
    pub external_id: Option<String>,
}

/// Call `AssumeRole`, signing the request with `base`.
pub(super) async fn assume_role(
    ctx: &Context,
    sts_endpoint: &str,
    step: &RoleStep,
    base: &Credential,
) -> Result<Credential> {
    let mut params = vec![
        ("Action", "AssumeRole"),
        ("RoleArn", step.role_arn.as_str()),
        ("RoleSessionName", step.role_session_name.as_str()),
        ("Version", "2011-06-15"),
    ];
    if let Some(id) = &step.external_id {
        params.push(("ExternalId", id.as_str()));
    }

    let req = http::Request::builder()
        .method(Method::GET)
        .uri(sts_url(sts_endpoint, params))
        .header(X_AMZ_CONTENT_SHA_256, EMPTY_STRING_SHA256)
        .body(Bytes::new())?;
    let (mut parts, body) = req.into_parts();
    RequestSigner::new("sts", &sts_signing_region(sts_endpoint))
        .sign_request(ctx, &mut parts, Some(base), None)
        .await?;

    send(ctx, http::Request::from_parts(parts, body))
        .await
        .map_err(|e| e.with_context(format!("role_arn: {}", step.role_arn)))
}

/// Call `AssumeRoleWithWebIdentity`, this request is not signed.
pub(super) async fn assume_role_with_web_identity(
    ctx: &Context,
    sts_endpoint: &str,
    role_arn: &str,
    role_session_name: &str,
    token: &str,
) -> Result<Credential> {
    let params = vec![
        ("Action", "AssumeRoleWithWebIdentity"),
        ("RoleArn", role_arn),
        ("RoleSessionName", role_session_name),
        ("Version", "2011-06-15"),
        ("WebIdentityToken", token),
    ];

    let req = http::Request::builder()
        .method(Method::GET)
        .uri(sts_url(sts_endpoint, params))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Bytes::new())?;

    send(ctx, req)
        .await
        .map_err(|e| e.with_context(format!("role_arn: {role_arn}")))
}

fn sts_url(endpoint: &str, mut params: Vec<(&str, &str)>) -> String {
    params.sort();
    let query = params
        .into_iter()
        .map(|(k, v)| format!("{k}={}", utf8_percent_encode(v, &AWS_QUERY_ENCODE_SET)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}/?{query}", endpoint.trim_end_matches('/'))
}

/// Region used to sign STS requests.
///
/// Regional endpoints look like `https://sts.{region}.amazonaws.com`; the
/// global endpoint is signed for `us-east-1`.
pub(super) fn sts_signing_region(endpoint: &str) -> String {
    let host = endpoint
        .split("://")
        .last()
        .unwrap_or(endpoint)
        .trim_end_matches('/');
    let mut labels = host.split('.');
    match (labels.next(), labels.next(), labels.next()) {
        (Some("sts"), Some(region), Some("amazonaws")) => region.to_string(),
        _ => DEFAULT_REGION.to_string(),
    }
}

async fn send(ctx: &Context, req: http::Request<Bytes>) -> Result<Credential> {
    debug!("sending sts request: {} {}", req.method(), req.uri().path());
    let resp = ctx.http_send(req).await?;
    if resp.status() != StatusCode::OK {
        return Err(response_error(resp.status(), resp.body()));
    }

    let body = String::from_utf8_lossy(resp.body());
    let resp: StsResponse = de::from_str(&body).map_err(|e| {
        Error::protocol("failed to parse sts response")
            .with_source(e)
            .with_context(format!("response_length: {}", body.len()))
    })?;
    let cred = resp.result.credentials;
    if cred.access_key_id.is_empty() || cred.secret_access_key.is_empty() {
        return Err(Error::protocol("sts response carries no credentials"));
    }

    Ok(Credential {
        access_key_id: cred.access_key_id,
        secret_access_key: cred.secret_access_key,
        session_token: Some(cred.session_token.trim().to_string()),
        expires_in: Some(parse_rfc3339(&cred.expiration).map_err(|e| {
            e.with_context(format!("expiration_value: {}", cred.expiration))
        })?),
    })
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct StsResponse {
    #[serde(rename = "AssumeRoleResult", alias = "AssumeRoleWithWebIdentityResult")]
    result: StsResult,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct StsResult {
    credentials: StsCredentials,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct StsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: String,
}
