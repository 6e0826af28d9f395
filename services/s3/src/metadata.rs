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

use crate::constants::{DEFAULT_SIGNED_URL_EXPIRES_SECS, S3_XMLNS, X_AMZ_METADATA_DIRECTIVE};
use crate::executor::{protocol_error, RequestDescriptor};
use crate::fs::S3FileSystem;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use quick_xml::de;
use quick_xml::escape::escape;
use s3vfs_core::hash::base64_md5;
use s3vfs_core::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Metadata domain of the HTTP headers of an object.
pub const HEADERS_DOMAIN: &str = "HEADERS";
/// Metadata domain of the tags of an object.
pub const TAGS_DOMAIN: &str = "TAGS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Domain {
    Headers,
    Tags,
}

impl Domain {
    fn parse(domain: &str) -> Result<Domain> {
        match domain {
            HEADERS_DOMAIN => Ok(Domain::Headers),
            TAGS_DOMAIN => Ok(Domain::Tags),
            v => Err(Error::request_invalid(format!(
                "unsupported metadata domain {v}, expected {HEADERS_DOMAIN} or {TAGS_DOMAIN}"
            ))),
        }
    }
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Tagging {
    tag_set: TagSet,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct TagSet {
    tag: Vec<Tag>,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Tag {
    key: String,
    value: String,
}

fn tagging_body(tags: &BTreeMap<String, String>) -> String {
    let mut body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Tagging xmlns=\"{S3_XMLNS}\">\n  <TagSet>\n"
    );
    for (key, value) in tags {
        body.push_str(&format!(
            "    <Tag>\n      <Key>{}</Key>\n      <Value>{}</Value>\n    </Tag>\n",
            escape(key.as_str()),
            escape(value.as_str())
        ));
    }
    body.push_str("  </TagSet>\n</Tagging>\n");
    body
}

impl S3FileSystem {
    /// Get the metadata of an object in `domain`: `HEADERS` or `TAGS`.
    pub async fn get_metadata(&self, path: &str, domain: &str) -> Result<BTreeMap<String, String>> {
        let domain = Domain::parse(domain)?;
        let session = self.session(path).await?;
        let exec = self.executor(&session);

        match domain {
            Domain::Headers => {
                let desc = RequestDescriptor::new(Method::HEAD, &session.bucket, &session.key);
                let resp = exec.send(&desc).await?;
                Ok(resp
                    .headers()
                    .iter()
                    .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
                    .collect())
            }
            Domain::Tags => {
                let desc = RequestDescriptor::new(Method::GET, &session.bucket, &session.key)
                    .with_query("tagging", "");
                let resp = exec.send(&desc).await?;
                let tagging: Tagging = std::str::from_utf8(resp.body())
                    .ok()
                    .and_then(|body| de::from_str(body).ok())
                    .ok_or_else(|| protocol_error("malformed Tagging", resp.body()))?;
                Ok(tagging
                    .tag_set
                    .tag
                    .into_iter()
                    .map(|t| (t.key, t.value))
                    .collect())
            }
        }
    }

    /// Replace the metadata of an object in `domain`: `HEADERS` or `TAGS`.
    ///
    /// Headers are replaced through a copy of the object onto itself, an
    /// empty tag set removes all tags.
    pub async fn set_metadata(
        &self,
        path: &str,
        domain: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        let domain = Domain::parse(domain)?;
        let session = self.session(path).await?;

        match domain {
            Domain::Headers => {
                let mut headers = HeaderMap::new();
                headers.insert(X_AMZ_METADATA_DIRECTIVE, HeaderValue::from_static("REPLACE"));
                for (k, v) in metadata {
                    headers.insert(HeaderName::from_bytes(k.as_bytes())?, HeaderValue::from_str(v)?);
                }
                self.copy_object(&session.bucket, &session.key, &session, &session.key, &headers)
                    .await?;
            }
            Domain::Tags if metadata.is_empty() => {
                let desc = RequestDescriptor::new(Method::DELETE, &session.bucket, &session.key)
                    .with_query("tagging", "");
                self.executor(&session).send(&desc).await?;
            }
            Domain::Tags => {
                let body = tagging_body(metadata);
                let desc = RequestDescriptor::new(Method::PUT, &session.bucket, &session.key)
                    .with_query("tagging", "")
                    .with_header("content-md5", &base64_md5(body.as_bytes()))?
                    .with_body(body);
                self.executor(&session).send(&desc).await?;
            }
        }

        self.cache().invalidate(&session.path);
        Ok(())
    }

    /// Build a pre-signed GET url, valid for `expires_in` (one hour by default).
    pub async fn signed_url(&self, path: &str, expires_in: Option<Duration>) -> Result<String> {
        let session = self.session(path).await?;
        let desc = RequestDescriptor::new(Method::GET, &session.bucket, &session.key);
        self.executor(&session)
            .presign(
                &desc,
                expires_in.unwrap_or(Duration::from_secs(DEFAULT_SIGNED_URL_EXPIRES_SECS)),
            )
            .await
    }
}
