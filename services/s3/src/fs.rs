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

use crate::cache::{normalize, CacheLookup, DirEntry, DirStat, FileStat, Stat, StatCache};
use crate::config::{Config, Options};
use crate::constants::{DEFAULT_REGION, STAT_DIR_PROBE_MAX_KEYS, X_AMZ_STORAGE_CLASS};
use crate::credential::CredentialStore;
use crate::endpoint::{Endpoint, EndpointRegistry};
use crate::executor::{header_str, Executor, RequestDescriptor};
use crate::listing::{
    flat_entries, level_entries, list_all, list_page, trim_etag, DirIter, OpenDirOptions,
};
use crate::provide_credential::load_profile_region;
use http::header::{CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use http::{HeaderMap, Method};
use log::{debug, warn};
use s3vfs_core::time::parse_http_date;
use s3vfs_core::{Context, Error, ErrorKind, Result};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct State {
    credentials: CredentialStore,
    endpoints: EndpointRegistry,
    cache: StatCache,
}

/// S3FileSystem exposes buckets of an S3 compatible service as a file system.
///
/// Paths are `bucket/key`, an empty key addresses the bucket itself. Clones
/// share options, credentials, endpoint corrections and the stat cache, so
/// one instance per process (or per test) is enough.
///
/// ```no_run
/// use s3vfs_core::{Context, OsEnv, Result};
/// use s3vfs_s3::S3FileSystem;
///
/// async fn example(ctx: Context) -> Result<()> {
///     let fs = S3FileSystem::new(ctx);
///     let mut r = fs.open_read("bucket/path/to/file").await?;
///     let content = r.read(1024).await?;
///     println!("read {} bytes", content.len());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct S3FileSystem {
    ctx: Context,
    options: Arc<RwLock<Options>>,
    state: Arc<State>,
}

/// Everything needed to send requests for one path.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub path: String,
    pub bucket: String,
    pub key: String,
    pub config: Config,
    pub endpoint: Endpoint,
}

/// Split a path into bucket and key.
pub(crate) fn split_path(path: &str) -> Result<(&str, &str)> {
    let path = normalize(path);
    let (bucket, key) = path.split_once('/').unwrap_or((path, ""));
    if bucket.is_empty() {
        return Err(Error::request_invalid("path must start with a bucket name"));
    }
    Ok((bucket, key))
}

pub(crate) fn not_found(path: &str) -> Error {
    Error::not_found(format!("{path} does not exist"))
}

/// Build a file stat out of the headers of a HEAD or GET response.
pub(crate) fn file_stat(headers: &HeaderMap) -> FileStat {
    fn get<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
        headers.get(name).and_then(|v| v.to_str().ok())
    }

    FileStat {
        size: get(headers, CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse().ok())
            .unwrap_or_default(),
        mtime: get(headers, LAST_MODIFIED.as_str()).and_then(|v| parse_http_date(v).ok()),
        etag: get(headers, ETAG.as_str())
            .map(trim_etag)
            .filter(|v| !v.is_empty()),
        storage_class: get(headers, X_AMZ_STORAGE_CLASS).map(|v| v.to_string()),
    }
}

impl S3FileSystem {
    /// Create a file system using `ctx` for file reads, HTTP and environment.
    pub fn new(ctx: Context) -> Self {
        Self::with_options(ctx, Options::new())
    }

    /// Create a file system with initial options.
    pub fn with_options(ctx: Context, options: Options) -> Self {
        Self {
            ctx,
            options: Arc::new(RwLock::new(options)),
            state: Arc::new(State::default()),
        }
    }

    /// Set a global option.
    pub fn set_option(&self, key: &str, value: &str) {
        self.options
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set(key, value);
    }

    /// Set an option for every path under `prefix`, winning over global options.
    pub fn set_path_option(&self, prefix: &str, key: &str, value: &str) {
        self.options
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set_for_path(prefix, key, value);
    }

    /// Drop the options registered for `prefix`.
    pub fn clear_path_options(&self, prefix: &str) {
        self.options
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear_path(prefix);
    }

    /// Resolved configuration of `path`.
    pub fn config(&self, path: &str) -> Result<Config> {
        let options = self.options.read().unwrap_or_else(|e| e.into_inner());
        Config::resolve(&self.ctx, &options, normalize(path))
    }

    pub(crate) fn context(&self) -> &Context {
        &self.ctx
    }

    pub(crate) fn cache(&self) -> &StatCache {
        &self.state.cache
    }

    pub(crate) async fn session(&self, path: &str) -> Result<Session> {
        let config = self.config(path)?;
        self.session_with(path, config).await
    }

    pub(crate) async fn session_with(&self, path: &str, config: Config) -> Result<Session> {
        let (bucket, key) = split_path(path)?;
        let region = self.region(&config).await;
        // Fail at open when no credential can be found at all.
        self.state
            .credentials
            .get(&self.ctx, bucket, &config.credential)
            .await?;

        Ok(Session {
            path: normalize(path).to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            endpoint: Endpoint::new(&config, bucket, &region),
            config,
        })
    }

    pub(crate) fn executor<'a>(&'a self, session: &'a Session) -> Executor<'a> {
        Executor::new(
            &self.ctx,
            &session.config,
            &self.state.endpoints,
            &self.state.credentials,
            session.endpoint.clone(),
        )
    }

    /// The configured region, the region of the selected profile or the default.
    async fn region(&self, config: &Config) -> String {
        if let Some(region) = &config.region {
            return region.clone();
        }

        let key = (
            config.credential.profile.clone(),
            config.credential.config_file.clone(),
        );
        let region = match self.state.endpoints.profile_region(&key) {
            Some(region) => region,
            None => {
                let region = match load_profile_region(&self.ctx, &config.credential).await {
                    Ok(region) => region,
                    Err(err) => {
                        warn!("failed to load region of profile {}: {err}", key.0);
                        None
                    }
                };
                self.state.endpoints.set_profile_region(key, region.clone());
                region
            }
        };
        region.unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    /// Stat a path, asking the service on a cache miss.
    ///
    /// A missing path fails with [`ErrorKind::NotFound`].
    pub async fn stat(&self, path: &str) -> Result<Stat> {
        let path = normalize(path);
        let config = self.config(path)?;
        let cached = !config.is_non_cached(path);

        if cached {
            match self.state.cache.get(path) {
                CacheLookup::Hit(stat) => return Ok(stat),
                CacheLookup::NotFound => return Err(not_found(path)),
                CacheLookup::Miss => {}
            }
        }

        let session = self.session_with(path, config).await?;
        let result = self.stat_remote(&session, cached).await;
        if cached {
            match &result {
                Ok(stat) => self.state.cache.put(path, stat.clone()),
                Err(err) if err.kind() == ErrorKind::NotFound => self.state.cache.put_not_found(path),
                Err(_) => {}
            }
        }
        result
    }

    async fn stat_remote(&self, session: &Session, cached: bool) -> Result<Stat> {
        let exec = self.executor(session);
        if session.key.is_empty() {
            list_page(&exec, &session.bucket, "", true, None, Some(1)).await?;
            return Ok(Stat::Directory(DirStat::default()));
        }

        let head = RequestDescriptor::new(Method::HEAD, &session.bucket, &session.key);
        match exec.send(&head).await {
            Ok(resp) => return Ok(Stat::File(file_stat(resp.headers()))),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        // No object, look for keys below it.
        let prefix = format!("{}/", session.key);
        let page = list_page(
            &exec,
            &session.bucket,
            &prefix,
            true,
            None,
            Some(STAT_DIR_PROBE_MAX_KEYS),
        )
        .await?;
        let entries = level_entries(&prefix, &page, &session.config);
        if entries.is_empty() {
            return Err(not_found(&session.path));
        }
        if cached && page.next_marker.is_none() {
            self.state.cache.put_listing(&session.path, entries);
        }
        Ok(Stat::Directory(DirStat::default()))
    }

    /// Stat a path from the cache only, never touching the network.
    pub fn stat_cached(&self, path: &str) -> CacheLookup {
        self.state.cache.get(path)
    }

    /// Check whether a path exists.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// List the direct children of a directory.
    ///
    /// An existing empty directory yields a single `.` entry.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let path = normalize(path);
        let config = self.config(path)?;
        let cached = !config.is_non_cached(path);
        if cached {
            if let Some(entries) = self.state.cache.listing(path) {
                return Ok(entries);
            }
        }

        let session = self.session_with(path, config).await?;
        let prefix = dir_prefix(&session.key);
        let page = list_all(&self.executor(&session), &session.bucket, &prefix, true).await?;

        let mut entries = level_entries(&prefix, &page, &session.config);
        if entries.is_empty() {
            if !session.key.is_empty() {
                return Err(not_found(path));
            }
            entries.push(DirEntry::current_dir());
        }
        if cached {
            self.state.cache.put_listing(path, entries.clone());
        }
        Ok(entries)
    }

    /// Open an iterator over the entries below a directory.
    pub async fn open_dir(&self, path: &str, options: OpenDirOptions) -> Result<DirIter> {
        let path = normalize(path);
        if options.depth.is_some() {
            let entries = self.read_dir(path).await?;
            return Ok(DirIter::new(self.clone(), path.to_string(), options, entries));
        }

        let session = self.session(path).await?;
        let base = dir_prefix(&session.key);
        let prefix = format!("{base}{}", options.prefix.as_deref().unwrap_or_default());
        let page = list_all(&self.executor(&session), &session.bucket, &prefix, false).await?;
        if page.objects.is_empty() && options.prefix.is_none() && !session.key.is_empty() {
            return Err(not_found(path));
        }

        let entries = flat_entries(&base, &page, &session.config);
        if !session.config.is_non_cached(path) {
            for entry in &entries {
                self.state
                    .cache
                    .put(&format!("{path}/{}", entry.name), entry.stat.clone());
            }
        }
        debug!("flat listing of {path} yields {} entries", entries.len());
        Ok(DirIter::new(self.clone(), path.to_string(), options, entries))
    }

    /// Create a directory marker.
    ///
    /// Fails with [`ErrorKind::Conflict`] if anything exists at `path`.
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        match self.stat(path).await {
            Ok(_) => return Err(Error::conflict(format!("{path} already exists"))),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        let session = self.session(path).await?;
        if session.key.is_empty() {
            return Err(Error::request_invalid("creating buckets is not supported"));
        }
        let desc = RequestDescriptor::new(Method::PUT, &session.bucket, &dir_prefix(&session.key));
        self.executor(&session).send(&desc).await?;

        self.state.cache.invalidate(path);
        if !session.config.is_non_cached(path) {
            self.state
                .cache
                .put_listing(path, vec![DirEntry::current_dir()]);
        }
        Ok(())
    }

    /// Drop every cached stat, listing, endpoint correction and credential.
    pub fn clear_cache(&self) {
        debug!("clearing all caches");
        self.state.cache.clear();
        self.state.endpoints.clear();
        self.state.credentials.clear();
    }

    /// Drop cached stats and listings of `path` and everything below it.
    pub fn clear_cache_path(&self, path: &str) {
        self.state.cache.invalidate_subtree(path);
    }
}

/// Key prefix of the children of a directory key.
pub(crate) fn dir_prefix(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key.trim_end_matches('/'))
    }
}

/// Etag header of a response.
pub(crate) fn response_etag(resp: &http::Response<bytes::Bytes>) -> Option<String> {
    header_str(resp, ETAG.as_str())
        .map(trim_etag)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_path() -> Result<()> {
        assert_eq!(split_path("bucket/a/b.txt")?, ("bucket", "a/b.txt"));
        assert_eq!(split_path("/bucket/dir/")?, ("bucket", "dir"));
        assert_eq!(split_path("bucket")?, ("bucket", ""));
        assert!(split_path("/").is_err());
        Ok(())
    }

    #[test]
    fn test_file_stat() -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, "3".parse()?);
        headers.insert(LAST_MODIFIED, "Mon, 01 Jan 1970 00:00:01 GMT".parse()?);
        headers.insert(ETAG, "\"acbd18db4cc2f85cedef654fccc4a4d8\"".parse()?);

        let stat = file_stat(&headers);
        assert_eq!(stat.size, 3);
        assert_eq!(stat.mtime.map(|t| t.timestamp()), Some(1));
        assert_eq!(stat.etag.as_deref(), Some("acbd18db4cc2f85cedef654fccc4a4d8"));
        assert_eq!(stat.storage_class, None);
        Ok(())
    }

    #[test]
    fn test_dir_prefix() {
        assert_eq!(dir_prefix(""), "");
        assert_eq!(dir_prefix("a/b"), "a/b/");
        assert_eq!(dir_prefix("a/b/"), "a/b/");
    }
}
