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

use http::StatusCode;
use quick_xml::de;
use s3vfs_core::Error;
use serde::Deserialize;

/// Error document returned by S3 and STS.
///
/// S3 answers with a bare `<Error>` root while STS wraps it in
/// `<ErrorResponse>`; only the `<Error>` element is looked at, so both
/// shapes and trailing garbage after it are accepted.
#[derive(Default, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ServiceError {
    pub code: String,
    pub message: String,
    /// Region the bucket lives in, set on `AuthorizationHeaderMalformed`.
    pub region: Option<String>,
    /// Host the request should be sent to, set on redirects.
    pub endpoint: Option<String>,
}

impl ServiceError {
    /// Parse an error body, returns `None` if it's not a valid error document.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let body = std::str::from_utf8(body).ok()?;
        let start = body.find("<Error>")?;
        let end = body[start..].find("</Error>")? + start + "</Error>".len();

        let err: ServiceError = de::from_str(&body[start..end]).ok()?;
        if err.code.is_empty() {
            return None;
        }
        Some(err)
    }
}

/// Build the error surfaced for a failed response.
///
/// The message carries the decoded error code and message when the body is a
/// valid error document, the raw body otherwise.
pub fn response_error(status: StatusCode, body: &[u8]) -> Error {
    let detail = match ServiceError::parse(body) {
        Some(err) if err.message.is_empty() => err.code,
        Some(err) => format!("{}: {}", err.code, err.message),
        None => String::from_utf8_lossy(body).trim().to_string(),
    };
    let message = if detail.is_empty() {
        format!("request failed with status {status}")
    } else {
        format!("request failed with status {status}: {detail}")
    };

    let err = match status.as_u16() {
        401 | 403 => Error::auth_rejected(message),
        404 => Error::not_found(message),
        409 | 412 => Error::conflict(message),
        429 => Error::transient(message),
        v if v >= 500 => Error::transient(message),
        _ => Error::unexpected(message),
    };
    err.with_status(status.as_u16())
}
