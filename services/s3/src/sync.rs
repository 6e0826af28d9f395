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

use crate::executor::RequestDescriptor;
use crate::fs::{dir_prefix, S3FileSystem};
use crate::listing::list_all;
use crate::writer::MultipartUpload;
use bytes::Bytes;
use futures::{stream, StreamExt};
use http::header::RANGE;
use http::{HeaderMap, Method};
use log::{debug, info};
use s3vfs_core::hash::Md5Hasher;
use s3vfs_core::time::DateTime;
use s3vfs_core::{Error, ErrorKind, Result};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// How to decide that a file is already in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStrategy {
    /// Skip when the target has the same size and isn't older than the source.
    #[default]
    Timestamp,
    /// Skip when the content hashes match.
    ETag,
    /// Always transfer.
    Overwrite,
}

impl FromStr for SyncStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TIMESTAMP" => Ok(SyncStrategy::Timestamp),
            "ETAG" => Ok(SyncStrategy::ETag),
            "OVERWRITE" => Ok(SyncStrategy::Overwrite),
            _ => Err(Error::config_invalid(format!("unknown sync strategy {s}"))),
        }
    }
}

/// One side of a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncLocation {
    Local(PathBuf),
    /// `bucket/key` path.
    Remote(String),
}

impl SyncLocation {
    fn join(&self, rel: &str) -> SyncLocation {
        if rel.is_empty() {
            return self.clone();
        }
        match self {
            SyncLocation::Local(p) => {
                let mut p = p.clone();
                p.extend(rel.split('/'));
                SyncLocation::Local(p)
            }
            SyncLocation::Remote(p) => {
                SyncLocation::Remote(format!("{}/{rel}", p.trim_end_matches('/')))
            }
        }
    }

    fn ends_with_separator(&self) -> bool {
        match self {
            SyncLocation::Local(p) => p.as_os_str().to_string_lossy().ends_with(['/', '\\']),
            SyncLocation::Remote(p) => p.ends_with('/'),
        }
    }

    fn base_name(&self) -> Option<String> {
        match self {
            SyncLocation::Local(p) => p.file_name().map(|v| v.to_string_lossy().to_string()),
            SyncLocation::Remote(p) => p
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string()),
        }
    }
}

/// Options of [`S3FileSystem::sync`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub strategy: SyncStrategy,
    /// Sync directories recursively, on by default.
    pub recursive: bool,
    /// Files larger than this go in concurrent chunks. Defaults to
    /// `S3VFS_CHUNK_SIZE`.
    pub chunk_size: Option<usize>,
    /// Concurrent chunks. Defaults to `S3VFS_SYNC_THREADS`.
    pub threads: Option<usize>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            strategy: SyncStrategy::default(),
            recursive: true,
            chunk_size: None,
            threads: None,
        }
    }
}

/// What a sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub files_transferred: usize,
    pub files_skipped: usize,
    pub bytes_transferred: u64,
}

#[derive(Debug, Clone, Default)]
struct SyncFile {
    rel: String,
    size: u64,
    mtime: Option<DateTime>,
    etag: Option<String>,
}

enum Probe {
    File(SyncFile),
    Dir,
}

struct Progress<F> {
    total: u64,
    done: u64,
    last: f64,
    callback: F,
}

impl<F: FnMut(f64) -> bool> Progress<F> {
    fn report(&mut self, ratio: f64) -> Result<()> {
        self.last = ratio.clamp(self.last, 1.0);
        if (self.callback)(self.last) {
            Ok(())
        } else {
            Err(Error::aborted("sync cancelled by progress callback"))
        }
    }

    fn advance(&mut self, bytes: u64) -> Result<()> {
        self.done += bytes;
        let ratio = if self.total == 0 {
            0.0
        } else {
            self.done as f64 / self.total as f64
        };
        self.report(ratio)
    }
}

fn local_mtime(meta: &std::fs::Metadata) -> Option<DateTime> {
    meta.modified().ok().map(DateTime::from)
}

async fn md5_of_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5Hasher::default();
    let mut buf = vec![0; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(hasher.finish_hex());
        }
        hasher.update(&buf[..n]);
    }
}

async fn read_range(path: &Path, offset: u64, len: usize) -> Result<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0; len];
    file.read_exact(&mut buf).await?;
    Ok(buf.into())
}

async fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Split `size` into `(offset, len)` chunks.
fn chunks(size: u64, chunk_size: usize) -> Vec<(u64, usize)> {
    let chunk_size = chunk_size.max(1) as u64;
    (0..size.div_ceil(chunk_size))
        .map(|i| {
            let offset = i * chunk_size;
            (offset, chunk_size.min(size - offset) as usize)
        })
        .collect()
}

impl S3FileSystem {
    /// Synchronize `source` into `target`.
    ///
    /// When the target is an existing directory or ends with a separator, the
    /// base name of the source is appended to it, unless the source itself
    /// ends with a separator. `progress` gets non-decreasing values up to
    /// `1.0`; returning `false` stops the sync with [`ErrorKind::Aborted`].
    pub async fn sync<F>(
        &self,
        source: &SyncLocation,
        target: &SyncLocation,
        options: SyncOptions,
        progress: F,
    ) -> Result<SyncReport>
    where
        F: FnMut(f64) -> bool,
    {
        let files = match self.probe(source).await? {
            Probe::File(file) => vec![file],
            Probe::Dir if options.recursive => self.enumerate(source).await?,
            Probe::Dir => {
                return Err(Error::request_invalid(
                    "source is a directory and recursive sync is disabled",
                ))
            }
        };
        let target = self.resolve_target(source, target).await?;
        info!("syncing {} files from {source:?} to {target:?}", files.len());

        let mut progress = Progress {
            total: files.iter().map(|f| f.size).sum(),
            done: 0,
            last: 0.0,
            callback: progress,
        };
        let mut report = SyncReport::default();
        for file in &files {
            let src = source.join(&file.rel);
            let dst = target.join(&file.rel);
            if self.in_sync(file, &src, &dst, options.strategy).await? {
                debug!("{dst:?} is in sync, skipped");
                report.files_skipped += 1;
                progress.advance(file.size)?;
                continue;
            }

            self.transfer(file, &src, &dst, &options, &mut progress)
                .await?;
            report.files_transferred += 1;
            report.bytes_transferred += file.size;
        }

        progress.report(1.0)?;
        Ok(report)
    }

    async fn probe(&self, location: &SyncLocation) -> Result<Probe> {
        match location {
            SyncLocation::Local(path) => {
                let meta = tokio::fs::metadata(path).await?;
                if meta.is_dir() {
                    return Ok(Probe::Dir);
                }
                Ok(Probe::File(SyncFile {
                    rel: String::new(),
                    size: meta.len(),
                    mtime: local_mtime(&meta),
                    etag: None,
                }))
            }
            SyncLocation::Remote(path) => {
                let stat = self.stat(path).await?;
                match stat.file() {
                    Some(file) => Ok(Probe::File(SyncFile {
                        rel: String::new(),
                        size: file.size,
                        mtime: file.mtime,
                        etag: file.etag.clone(),
                    })),
                    None => Ok(Probe::Dir),
                }
            }
        }
    }

    async fn resolve_target(
        &self,
        source: &SyncLocation,
        target: &SyncLocation,
    ) -> Result<SyncLocation> {
        if source.ends_with_separator() {
            return Ok(target.clone());
        }

        let is_dir = target.ends_with_separator()
            || match self.probe(target).await {
                Ok(probe) => matches!(probe, Probe::Dir),
                Err(err) if err.kind() == ErrorKind::NotFound => false,
                Err(err) => return Err(err),
            };
        match source.base_name() {
            Some(name) if is_dir => Ok(target.join(&name)),
            _ => Ok(target.clone()),
        }
    }

    /// Every file below a directory, with paths relative to it.
    async fn enumerate(&self, root: &SyncLocation) -> Result<Vec<SyncFile>> {
        match root {
            SyncLocation::Local(root) => {
                let mut files = Vec::new();
                for entry in walkdir::WalkDir::new(root).min_depth(1).sort_by_file_name() {
                    let entry = entry.map_err(|err| {
                        Error::unexpected(format!("failed to walk {}", root.display()))
                            .with_source(err)
                    })?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let meta = entry.metadata().map_err(|err| {
                        Error::unexpected(format!("failed to stat {}", entry.path().display()))
                            .with_source(err)
                    })?;
                    let rel = entry
                        .path()
                        .strip_prefix(root)
                        .map_err(|err| Error::unexpected("walked outside of root").with_source(err))?
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    files.push(SyncFile {
                        rel,
                        size: meta.len(),
                        mtime: local_mtime(&meta),
                        etag: None,
                    });
                }
                Ok(files)
            }
            SyncLocation::Remote(path) => {
                let session = self.session(path).await?;
                let prefix = dir_prefix(&session.key);
                let page =
                    list_all(&self.executor(&session), &session.bucket, &prefix, false).await?;

                let cached = !session.config.is_non_cached(&session.path);
                let mut files = Vec::new();
                for object in page.objects {
                    let Some(rel) = object.key.strip_prefix(&prefix) else {
                        continue;
                    };
                    if rel.is_empty()
                        || rel.ends_with('/')
                        || session
                            .config
                            .is_ignored_storage_class(object.stat.storage_class.as_deref())
                    {
                        continue;
                    }
                    if cached {
                        self.cache().put(
                            &format!("{}/{}", session.bucket, object.key),
                            crate::cache::Stat::File(object.stat.clone()),
                        );
                    }
                    files.push(SyncFile {
                        rel: rel.to_string(),
                        size: object.stat.size,
                        mtime: object.stat.mtime,
                        etag: object.stat.etag,
                    });
                }
                Ok(files)
            }
        }
    }

    /// Content hash of a file: the etag for remote files, the MD5 for
    /// local ones.
    async fn content_hash(&self, location: &SyncLocation, file: &SyncFile) -> Result<Option<String>> {
        match location {
            SyncLocation::Local(path) => Ok(Some(md5_of_file(path).await?)),
            SyncLocation::Remote(_) => Ok(file.etag.clone()),
        }
    }

    async fn in_sync(
        &self,
        file: &SyncFile,
        src: &SyncLocation,
        dst: &SyncLocation,
        strategy: SyncStrategy,
    ) -> Result<bool> {
        if strategy == SyncStrategy::Overwrite {
            return Ok(false);
        }
        let existing = match self.probe(dst).await {
            Ok(Probe::File(existing)) => existing,
            Ok(Probe::Dir) => {
                return Err(Error::conflict(format!("target {dst:?} is a directory")))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };

        match strategy {
            SyncStrategy::Timestamp => Ok(existing.size == file.size
                && matches!(
                    (existing.mtime, file.mtime),
                    (Some(target), Some(source)) if target >= source
                )),
            SyncStrategy::ETag => {
                let Some(dst_hash) = self.content_hash(dst, &existing).await? else {
                    return Ok(false);
                };
                let src_hash = self.content_hash(src, file).await?;
                Ok(src_hash.as_deref() == Some(dst_hash.as_str()))
            }
            SyncStrategy::Overwrite => Ok(false),
        }
    }

    async fn transfer<F: FnMut(f64) -> bool>(
        &self,
        file: &SyncFile,
        src: &SyncLocation,
        dst: &SyncLocation,
        options: &SyncOptions,
        progress: &mut Progress<F>,
    ) -> Result<()> {
        debug!("transferring {src:?} to {dst:?}");
        match (src, dst) {
            (SyncLocation::Local(from), SyncLocation::Remote(to)) => {
                let config = self.config(to)?;
                let chunk_size = options.chunk_size.unwrap_or(config.chunk_size);
                let threads = options.threads.unwrap_or(config.sync_threads);
                if file.size > chunk_size as u64 {
                    return self
                        .upload_chunked(from, to, file.size, chunk_size, threads, progress)
                        .await;
                }
                let content = tokio::fs::read(from).await?;
                let mut w = self.open_write(to).await?;
                w.write(&content).await?;
                w.close().await?;
            }
            (SyncLocation::Remote(from), SyncLocation::Local(to)) => {
                let config = self.config(from)?;
                let chunk_size = options.chunk_size.unwrap_or(config.chunk_size);
                let threads = options.threads.unwrap_or(config.sync_threads);
                create_parent(to).await?;
                if file.size > chunk_size as u64 {
                    return self
                        .download_chunked(from, to, file.size, chunk_size, threads, progress)
                        .await;
                }
                let session = self.session(from).await?;
                let desc = RequestDescriptor::new(Method::GET, &session.bucket, &session.key);
                let resp = self.executor(&session).send(&desc).await?;
                tokio::fs::write(to, resp.body()).await?;
            }
            (SyncLocation::Remote(from), SyncLocation::Remote(to)) => {
                let src = self.session(from).await?;
                let dst = self.session(to).await?;
                self.copy_object(&src.bucket, &src.key, &dst, &dst.key, &HeaderMap::new())
                    .await?;
                self.cache().invalidate(&dst.path);
            }
            (SyncLocation::Local(from), SyncLocation::Local(to)) => {
                create_parent(to).await?;
                tokio::fs::copy(from, to).await?;
            }
        }
        progress.advance(file.size)
    }

    /// Upload a local file as concurrent parts of a multipart upload.
    async fn upload_chunked<F: FnMut(f64) -> bool>(
        &self,
        from: &Path,
        to: &str,
        size: u64,
        chunk_size: usize,
        threads: usize,
        progress: &mut Progress<F>,
    ) -> Result<()> {
        let session = self.session(to).await?;
        let exec = self.executor(&session);
        let mut upload =
            MultipartUpload::initiate(&exec, &session.bucket, &session.key, &HeaderMap::new())
                .await?;

        let result = {
            let (exec, upload) = (&exec, &upload);
            let mut parts = stream::iter(chunks(size, chunk_size).into_iter().enumerate())
                .map(|(idx, (offset, len))| async move {
                    let body = read_range(from, offset, len).await?;
                    let etag = upload.upload_part(exec, idx + 1, body).await?;
                    Ok::<_, Error>((idx + 1, etag, len))
                })
                .buffer_unordered(threads.max(1));

            let mut etags = Vec::new();
            let mut result = Ok(());
            while let Some(part) = parts.next().await {
                match part.and_then(|(number, etag, len)| {
                    etags.push((number, etag));
                    progress.advance(len as u64)
                }) {
                    Ok(()) => {}
                    Err(err) => {
                        result = Err(err);
                        break;
                    }
                }
            }
            result.map(|_| etags)
        };

        let etags = match result {
            Ok(etags) => etags,
            Err(err) => return Err(upload.fail(&exec, err).await),
        };
        for (number, etag) in etags {
            upload.record(number, etag);
        }
        if let Err(err) = upload.complete(&exec).await {
            return Err(upload.fail(&exec, err).await);
        }

        self.cache().invalidate(&session.path);
        Ok(())
    }

    /// Download a remote file through concurrent ranged GETs, written in order.
    async fn download_chunked<F: FnMut(f64) -> bool>(
        &self,
        from: &str,
        to: &Path,
        size: u64,
        chunk_size: usize,
        threads: usize,
        progress: &mut Progress<F>,
    ) -> Result<()> {
        let session = self.session(from).await?;
        let exec = self.executor(&session);
        let mut file = tokio::fs::File::create(to).await?;

        let result = {
            let (exec, session) = (&exec, &session);
            let mut ranges = stream::iter(chunks(size, chunk_size))
                .map(|(offset, len)| async move {
                    let range = format!("bytes={offset}-{}", offset + len as u64 - 1);
                    let desc = RequestDescriptor::new(Method::GET, &session.bucket, &session.key)
                        .with_header(RANGE.as_str(), &range)?;
                    let resp = exec.send(&desc).await?;
                    if resp.body().len() != len {
                        return Err(Error::protocol(format!(
                            "expected {len} bytes for {range}, got {}",
                            resp.body().len()
                        )));
                    }
                    Ok(resp.into_body())
                })
                .buffered(threads.max(1));

            let mut result = Ok(());
            while let Some(chunk) = ranges.next().await {
                let written = match chunk {
                    Ok(chunk) => file
                        .write_all(&chunk)
                        .await
                        .map_err(Error::from)
                        .and_then(|_| progress.advance(chunk.len() as u64)),
                    Err(err) => Err(err),
                };
                if let Err(err) = written {
                    result = Err(err);
                    break;
                }
            }
            result
        };

        match result {
            Ok(()) => {
                file.flush().await?;
                Ok(())
            }
            Err(err) => {
                drop(file);
                let _ = tokio::fs::remove_file(to).await;
                Err(err)
            }
        }
    }
}
