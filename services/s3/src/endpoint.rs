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
use crate::constants::{AWS_QUERY_ENCODE_SET, AWS_URI_ENCODE_SET};
use log::debug;
use percent_encoding::utf8_percent_encode;
use std::collections::HashMap;
use std::sync::RwLock;

/// Where and how requests for a bucket are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `host[:port]` of the service, without the bucket.
    pub host: String,
    /// Region requests are signed for.
    pub region: String,
    pub https: bool,
    /// Address the bucket as `bucket.host` instead of `host/bucket`.
    pub virtual_hosting: bool,
}

impl Endpoint {
    /// Build the configured endpoint of `bucket`.
    ///
    /// Bucket names containing a dot always use path style addressing since
    /// they would break the TLS wildcard certificate.
    pub fn new(config: &Config, bucket: &str, region: &str) -> Self {
        Self {
            host: config.endpoint.trim_end_matches('/').to_string(),
            region: region.to_string(),
            https: config.https,
            virtual_hosting: config.virtual_hosting && !bucket.is_empty() && !bucket.contains('.'),
        }
    }

    /// The authority a request for `bucket` is sent to.
    pub fn authority(&self, bucket: &str) -> String {
        if self.virtual_hosting {
            format!("{bucket}.{}", self.host)
        } else {
            self.host.clone()
        }
    }

    /// Build the url of `key` in `bucket`.
    ///
    /// An empty key addresses the bucket itself, query pairs are sorted and
    /// percent encoded.
    pub fn url(&self, bucket: &str, key: &str, query: &[(String, String)]) -> String {
        let scheme = if self.https { "https" } else { "http" };
        let key = utf8_percent_encode(key, &AWS_URI_ENCODE_SET);

        let mut url = if self.virtual_hosting || bucket.is_empty() {
            format!("{scheme}://{}/{key}", self.authority(bucket))
        } else {
            format!("{scheme}://{}/{bucket}/{key}", self.host)
        };

        if !query.is_empty() {
            let mut query = query.to_vec();
            query.sort();
            url.push('?');
            url.push_str(
                &query
                    .iter()
                    .map(|(k, v)| {
                        let k = utf8_percent_encode(k, &AWS_QUERY_ENCODE_SET);
                        if v.is_empty() {
                            k.to_string()
                        } else {
                            format!("{k}={}", utf8_percent_encode(v, &AWS_QUERY_ENCODE_SET))
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("&"),
            );
        }
        url
    }

    /// The endpoint to use after a redirect to `target`.
    ///
    /// A target of the form `bucket.host` switches to virtual hosted style,
    /// any other target is addressed path style.
    pub fn redirect_to(&self, bucket: &str, target: &str) -> Endpoint {
        let target = target.trim_end_matches('/');
        match target.strip_prefix(&format!("{bucket}.")) {
            Some(host) if !bucket.is_empty() => Endpoint {
                host: host.to_string(),
                virtual_hosting: true,
                ..self.clone()
            },
            _ => Endpoint {
                host: target.to_string(),
                virtual_hosting: false,
                ..self.clone()
            },
        }
    }
}

/// EndpointRegistry keeps the endpoint corrections learned from region
/// mismatches and permanent redirects, per bucket.
///
/// A correction is only applied while the bucket is configured with the
/// endpoint it was learned from.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    corrections: RwLock<HashMap<String, (Endpoint, Endpoint)>>,
    profile_regions: RwLock<HashMap<(String, String), Option<String>>>,
}

impl EndpointRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The endpoint to use for `bucket` given its configured endpoint.
    pub fn resolve(&self, bucket: &str, configured: Endpoint) -> Endpoint {
        let corrections = self.corrections.read().unwrap_or_else(|e| e.into_inner());
        match corrections.get(bucket) {
            Some((from, corrected)) if *from == configured => corrected.clone(),
            _ => configured,
        }
    }

    /// Remember that requests for `bucket` must go to `corrected`.
    pub fn persist(&self, bucket: &str, configured: &Endpoint, corrected: &Endpoint) {
        debug!("persisting endpoint of bucket {bucket}: {corrected:?}");
        self.corrections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(bucket.to_string(), (configured.clone(), corrected.clone()));
    }

    /// Cached region of a profile, keyed by profile name and config file.
    pub fn profile_region(&self, key: &(String, String)) -> Option<Option<String>> {
        self.profile_regions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Remember the region of a profile.
    pub fn set_profile_region(&self, key: (String, String), region: Option<String>) {
        self.profile_regions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, region);
    }

    /// Forget every correction.
    pub fn clear(&self) {
        self.corrections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.profile_regions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
