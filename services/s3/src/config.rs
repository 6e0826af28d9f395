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

use crate::constants::*;
use s3vfs_core::time::{parse_iso8601, DateTime};
use s3vfs_core::utils::Redact;
use s3vfs_core::{Context, Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::time::Duration;

/// Options is the layered key/value store every operation reads its
/// configuration from.
///
/// Values registered for a path prefix (`bucket` or `bucket/some/dir`) win
/// over global values for every path below that prefix; among several
/// matching prefixes the longest one wins.
#[derive(Clone, Default)]
pub struct Options {
    global: HashMap<String, String>,
    scoped: BTreeMap<String, HashMap<String, String>>,
}

impl Debug for Options {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("global_keys", &self.global.keys().collect::<Vec<_>>())
            .field("scoped_prefixes", &self.scoped.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Options {
    /// Create an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style variant of [`Options::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a global option.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.global.insert(key.into(), value.into());
    }

    /// Remove a global option.
    pub fn unset(&mut self, key: &str) {
        self.global.remove(key);
    }

    /// Set an option for every path under `prefix`.
    pub fn set_for_path(
        &mut self,
        prefix: &str,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.scoped
            .entry(prefix.trim_matches('/').to_string())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Drop all options registered for `prefix`.
    pub fn clear_path(&mut self, prefix: &str) {
        self.scoped.remove(prefix.trim_matches('/'));
    }

    /// Get the value of `key` that applies to `path`.
    pub fn get(&self, path: &str, key: &str) -> Option<&str> {
        let path = path.trim_start_matches('/');
        self.scoped
            .iter()
            .filter(|(prefix, _)| prefix_matches(prefix, path))
            .filter_map(|(prefix, values)| values.get(key).map(|v| (prefix.len(), v)))
            .max_by_key(|(len, _)| *len)
            .map(|(_, v)| v.as_str())
            .or_else(|| self.global.get(key).map(|v| v.as_str()))
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Backoff strategy between retries of transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait the base delay before every retry.
    Fixed,
    /// Double the delay on every retry.
    Exponential,
}

impl Backoff {
    /// Delay before retry number `attempt` (starting at 0).
    pub fn delay(&self, base: Duration, attempt: usize) -> Duration {
        match self {
            Backoff::Fixed => base,
            Backoff::Exponential => base.saturating_mul(1u32 << attempt.min(6)),
        }
    }
}

/// The part of the configuration credential resolution depends on.
///
/// Resolved credentials are cached per bucket together with the
/// `CredentialConfig` they were resolved from; any change triggers a new
/// resolution.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialConfig {
    /// Explicit access key id, from options only.
    pub access_key_id: Option<String>,
    /// Explicit secret access key, from options only.
    pub secret_access_key: Option<String>,
    /// Explicit session token, from options only.
    pub session_token: Option<String>,
    /// Skip signing altogether: [`AWS_NO_SIGN_REQUEST`].
    pub no_sign_request: bool,
    /// `profile` will be loaded from:
    ///
    /// - option or env value: [`AWS_PROFILE`]
    /// - option or env value: [`AWS_DEFAULT_PROFILE`]
    /// - default to: `default`
    pub profile: String,
    /// `config_file` will be load from:
    ///
    /// - option or env value: [`AWS_CONFIG_FILE`]
    /// - default to: `~/.aws/config`
    pub config_file: String,
    /// `shared_credentials_file` will be loaded from:
    ///
    /// - option or env value: [`AWS_SHARED_CREDENTIALS_FILE`]
    /// - default to: `~/.aws/credentials`
    pub shared_credentials_file: String,
    /// `role_arn` used by web identity federation: [`AWS_ROLE_ARN`]
    pub role_arn: Option<String>,
    /// `role_session_name` will be loaded from:
    ///
    /// - option or env value: [`AWS_ROLE_SESSION_NAME`]
    /// - default to `s3vfs`.
    pub role_session_name: String,
    /// Token file for web identity federation: [`AWS_WEB_IDENTITY_TOKEN_FILE`]
    pub web_identity_token_file: Option<String>,
    /// Root url of the STS service.
    ///
    /// - option or env value: [`AWS_STS_ENDPOINT`]
    /// - `https://sts.{region}.amazonaws.com` if [`AWS_STS_REGIONAL_ENDPOINTS`] is `regional`
    /// - default to `https://sts.amazonaws.com`
    pub sts_endpoint: String,
    /// Disable instance metadata: [`AWS_EC2_METADATA_DISABLED`]
    pub ec2_metadata_disabled: bool,
    /// Root url of the instance metadata service: [`AWS_EC2_METADATA_SERVICE_ENDPOINT`]
    pub ec2_metadata_endpoint: String,
}

impl Debug for CredentialConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("access_key_id", &Redact::from(&self.access_key_id))
            .field("secret_access_key", &Redact::from(&self.secret_access_key))
            .field("session_token", &Redact::from(&self.session_token))
            .field("no_sign_request", &self.no_sign_request)
            .field("profile", &self.profile)
            .field("config_file", &self.config_file)
            .field("shared_credentials_file", &self.shared_credentials_file)
            .field("role_arn", &self.role_arn)
            .field("role_session_name", &self.role_session_name)
            .field("web_identity_token_file", &self.web_identity_token_file)
            .field("sts_endpoint", &self.sts_endpoint)
            .field("ec2_metadata_disabled", &self.ec2_metadata_disabled)
            .field("ec2_metadata_endpoint", &self.ec2_metadata_endpoint)
            .finish()
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            no_sign_request: false,
            profile: "default".to_string(),
            config_file: "~/.aws/config".to_string(),
            shared_credentials_file: "~/.aws/credentials".to_string(),
            role_arn: None,
            role_session_name: "s3vfs".to_string(),
            web_identity_token_file: None,
            sts_endpoint: DEFAULT_STS_ENDPOINT.to_string(),
            ec2_metadata_disabled: false,
            ec2_metadata_endpoint: DEFAULT_EC2_METADATA_ENDPOINT.to_string(),
        }
    }
}

/// Config resolved for one path.
#[derive(Clone, Debug)]
pub struct Config {
    /// Inputs of credential resolution.
    pub credential: CredentialConfig,
    /// `region` will be loaded from:
    ///
    /// - option or env value: [`AWS_REGION`]
    /// - option or env value: [`AWS_DEFAULT_REGION`]
    /// - profile config: `region` (resolved later, see `EndpointRegistry`)
    pub region: Option<String>,
    /// Endpoint `host[:port]`: [`AWS_S3_ENDPOINT`], default to `s3.amazonaws.com`.
    pub endpoint: String,
    /// Use https: [`AWS_HTTPS`], default to `true`.
    pub https: bool,
    /// Use virtual hosted style: [`AWS_VIRTUAL_HOSTING`], default to `true`.
    pub virtual_hosting: bool,
    /// Value of the `x-amz-request-payer` header: [`AWS_REQUEST_PAYER`].
    pub request_payer: Option<String>,
    /// Fixed signing time: [`S3VFS_TIMESTAMP`].
    pub timestamp: Option<DateTime>,
    /// Multipart threshold and part size in bytes.
    pub chunk_size: usize,
    /// Range granularity of the reader.
    pub read_chunk_size: usize,
    /// Retry budget for transient failures, default to 0.
    pub max_retry: usize,
    /// Base delay between retries.
    pub retry_delay: Duration,
    /// How the delay grows between retries.
    pub backoff: Backoff,
    /// Path prefixes that bypass the cache.
    pub non_cached: Vec<String>,
    /// Storage classes filtered out of listings.
    pub ignore_storage_classes: Vec<String>,
    /// Keys per batch delete call.
    pub unlink_batch_size: usize,
    /// Skip the existence probe when opening for read.
    pub disable_readdir_on_open: bool,
    /// Allow random access writes buffered in a local temp file.
    pub use_temp_file_for_random_write: bool,
    /// Workers used by sync and concurrent multipart upload.
    pub sync_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credential: CredentialConfig::default(),
            region: None,
            endpoint: DEFAULT_S3_ENDPOINT.to_string(),
            https: true,
            virtual_hosting: true,
            request_payer: None,
            timestamp: None,
            chunk_size: DEFAULT_CHUNK_SIZE_MB * 1024 * 1024,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_retry: 0,
            retry_delay: Duration::from_secs_f64(DEFAULT_RETRY_DELAY_SECS),
            backoff: Backoff::Exponential,
            non_cached: Vec::new(),
            ignore_storage_classes: split_list(DEFAULT_IGNORE_STORAGE_CLASSES),
            unlink_batch_size: DEFAULT_UNLINK_BATCH_SIZE,
            disable_readdir_on_open: false,
            use_temp_file_for_random_write: false,
            sync_threads: DEFAULT_SYNC_THREADS,
        }
    }
}

impl Config {
    /// Resolve the configuration that applies to `path`.
    ///
    /// Path scoped options win over global options, which win over the
    /// environment of `ctx`. Explicit credentials are only taken from
    /// options; credentials in the environment are picked up later by the
    /// environment provider.
    pub fn resolve(ctx: &Context, options: &Options, path: &str) -> Result<Config> {
        let l = Lookup { ctx, options, path };
        let mut cfg = Config::default();

        let cred = &mut cfg.credential;
        cred.access_key_id = l.option(AWS_ACCESS_KEY_ID);
        cred.secret_access_key = l.option(AWS_SECRET_ACCESS_KEY);
        cred.session_token = l.option(AWS_SESSION_TOKEN);
        cred.no_sign_request = l.bool(AWS_NO_SIGN_REQUEST, false)?;
        if let Some(v) = l.get(AWS_PROFILE).or_else(|| l.get(AWS_DEFAULT_PROFILE)) {
            cred.profile = v;
        }
        if let Some(v) = l.get(AWS_CONFIG_FILE) {
            cred.config_file = v;
        }
        if let Some(v) = l.get(AWS_SHARED_CREDENTIALS_FILE) {
            cred.shared_credentials_file = v;
        }
        cred.role_arn = l.get(AWS_ROLE_ARN);
        if let Some(v) = l.get(AWS_ROLE_SESSION_NAME) {
            cred.role_session_name = v;
        }
        cred.web_identity_token_file = l.get(AWS_WEB_IDENTITY_TOKEN_FILE);
        cred.ec2_metadata_disabled = l.bool(AWS_EC2_METADATA_DISABLED, false)?;
        if let Some(v) = l.get(AWS_EC2_METADATA_SERVICE_ENDPOINT) {
            cred.ec2_metadata_endpoint = v.trim_end_matches('/').to_string();
        }

        cfg.region = l.get(AWS_REGION).or_else(|| l.get(AWS_DEFAULT_REGION));

        let regional_sts = l
            .get(AWS_STS_REGIONAL_ENDPOINTS)
            .is_some_and(|v| v.eq_ignore_ascii_case("regional"));
        cfg.credential.sts_endpoint = match l.get(AWS_STS_ENDPOINT) {
            Some(v) => v.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}",
                sts_endpoint(cfg.region.as_deref(), regional_sts)?
            ),
        };

        if let Some(v) = l.get(AWS_S3_ENDPOINT) {
            cfg.endpoint = v;
        }
        cfg.https = l.bool(AWS_HTTPS, true)?;
        cfg.virtual_hosting = l.bool(AWS_VIRTUAL_HOSTING, true)?;
        cfg.request_payer = l.get(AWS_REQUEST_PAYER);
        cfg.timestamp = l
            .get(S3VFS_TIMESTAMP)
            .map(|v| {
                parse_iso8601(&v).map_err(|e| e.with_context(format!("key: {S3VFS_TIMESTAMP}")))
            })
            .transpose()?;

        cfg.chunk_size = match l.get(S3VFS_CHUNK_SIZE_BYTES) {
            Some(_) => l.usize(S3VFS_CHUNK_SIZE_BYTES, 0)?,
            None => l.usize(S3VFS_CHUNK_SIZE, DEFAULT_CHUNK_SIZE_MB)? * 1024 * 1024,
        };
        cfg.read_chunk_size = l.usize(S3VFS_READ_CHUNK_SIZE, DEFAULT_READ_CHUNK_SIZE)?;
        cfg.max_retry = l.usize(S3VFS_MAX_RETRY, 0)?;
        cfg.retry_delay = match l.get(S3VFS_RETRY_DELAY) {
            Some(v) => v
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(Duration::from_secs_f64)
                .ok_or_else(|| invalid(S3VFS_RETRY_DELAY, &v))?,
            None => cfg.retry_delay,
        };
        cfg.backoff = match l.get(S3VFS_RETRY_BACKOFF) {
            None => Backoff::Exponential,
            Some(v) if v.eq_ignore_ascii_case("exponential") => Backoff::Exponential,
            Some(v) if v.eq_ignore_ascii_case("fixed") => Backoff::Fixed,
            Some(v) => return Err(invalid(S3VFS_RETRY_BACKOFF, &v)),
        };
        cfg.non_cached = l
            .get(S3VFS_NON_CACHED)
            .map(|v| {
                split_list(&v)
                    .into_iter()
                    .map(|p| p.trim_matches('/').to_string())
                    .collect()
            })
            .unwrap_or_default();
        if let Some(v) = l.get(S3VFS_IGNORE_STORAGE_CLASSES) {
            cfg.ignore_storage_classes = split_list(&v);
        }
        cfg.unlink_batch_size = l.usize(S3VFS_UNLINK_BATCH_SIZE, DEFAULT_UNLINK_BATCH_SIZE)?;
        cfg.disable_readdir_on_open = l.bool(S3VFS_DISABLE_READDIR_ON_OPEN, false)?;
        cfg.use_temp_file_for_random_write =
            l.bool(S3VFS_USE_TEMP_FILE_FOR_RANDOM_WRITE, false)?;
        cfg.sync_threads = l.usize(S3VFS_SYNC_THREADS, DEFAULT_SYNC_THREADS)?;

        for (key, value) in [
            (S3VFS_CHUNK_SIZE, cfg.chunk_size),
            (S3VFS_READ_CHUNK_SIZE, cfg.read_chunk_size),
            (S3VFS_UNLINK_BATCH_SIZE, cfg.unlink_batch_size),
            (S3VFS_SYNC_THREADS, cfg.sync_threads),
        ] {
            if value == 0 {
                return Err(Error::config_invalid(format!("{key} must be positive")));
            }
        }

        Ok(cfg)
    }

    /// Check whether `path` must bypass the cache.
    pub fn is_non_cached(&self, path: &str) -> bool {
        let path = path.trim_matches('/');
        self.non_cached.iter().any(|p| prefix_matches(p, path))
    }

    /// Check whether objects of `storage_class` are filtered from listings.
    pub fn is_ignored_storage_class(&self, storage_class: Option<&str>) -> bool {
        storage_class.is_some_and(|class| {
            self.ignore_storage_classes
                .iter()
                .any(|v| v.eq_ignore_ascii_case(class))
        })
    }
}

struct Lookup<'a> {
    ctx: &'a Context,
    options: &'a Options,
    path: &'a str,
}

impl Lookup<'_> {
    /// Value from options only.
    fn option(&self, key: &str) -> Option<String> {
        self.options
            .get(self.path, key)
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    }

    /// Value from options, then from the environment.
    fn get(&self, key: &str) -> Option<String> {
        self.option(key)
            .or_else(|| self.ctx.env_var(key).filter(|v| !v.is_empty()))
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => parse_bool(&v).ok_or_else(|| invalid(key, &v)),
        }
    }

    fn usize(&self, key: &str, default: usize) -> Result<usize> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.trim().parse().map_err(|_| invalid(key, &v)),
        }
    }
}

fn invalid(key: &str, value: &str) -> Error {
    Error::config_invalid(format!("invalid value for {key}: {value}"))
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_uppercase().as_str() {
        "YES" | "TRUE" | "ON" | "1" => Some(true),
        "NO" | "FALSE" | "OFF" | "0" => Some(false),
        _ => None,
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Get the sts endpoint host.
///
/// The returning format may look like `sts.{region}.amazonaws.com`
///
/// # Notes
///
/// AWS could have different sts endpoint based on it's region.
/// We can check them by region name.
///
/// ref: <https://github.com/awslabs/aws-sdk-rust/blob/31cfae2cf23be0c68a47357070dea1aee9227e3a/sdk/sts/src/aws_endpoint.rs>
pub fn sts_endpoint(region: Option<&str>, use_regional: bool) -> Result<String> {
    // use regional sts if sts_regional_endpoints has been set.
    if use_regional {
        let region =
            region.ok_or_else(|| Error::config_invalid("regional STS endpoint requires region"))?;
        if region.starts_with("cn-") {
            Ok(format!("sts.{region}.amazonaws.com.cn"))
        } else {
            Ok(format!("sts.{region}.amazonaws.com"))
        }
    } else {
        let region = region.unwrap_or_default();
        if region.starts_with("cn") {
            Ok("sts.amazonaws.com.cn".to_string())
        } else {
            Ok("sts.amazonaws.com".to_string())
        }
    }
}
