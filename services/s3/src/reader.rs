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

use crate::executor::{header_str, RequestDescriptor};
use crate::fs::{S3FileSystem, Session};
use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_RANGE, RANGE};
use http::{Method, StatusCode};
use log::debug;
use s3vfs_core::{Error, Result};
use std::io::SeekFrom;

/// Options of [`S3FileSystem::open_read_with`].
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Skip the existence and size probe at open, resolving the size on
    /// demand. Defaults to `S3VFS_DISABLE_READDIR_ON_OPEN`.
    pub lazy: Option<bool>,
}

/// ReadHandle reads an object through ranged GETs.
///
/// The last fetched range is kept, reads inside it need no request.
#[derive(Debug)]
pub struct ReadHandle {
    fs: S3FileSystem,
    session: Session,
    size: Option<u64>,
    pos: u64,
    window_start: u64,
    window: Bytes,
}

impl S3FileSystem {
    /// Open an object for reading.
    pub async fn open_read(&self, path: &str) -> Result<ReadHandle> {
        self.open_read_with(path, ReadOptions::default()).await
    }

    /// Open an object for reading with options.
    pub async fn open_read_with(&self, path: &str, options: ReadOptions) -> Result<ReadHandle> {
        let session = self.session(path).await?;
        let lazy = options
            .lazy
            .unwrap_or(session.config.disable_readdir_on_open);

        let size = if lazy {
            None
        } else {
            let stat = self.stat(&session.path).await?;
            match stat.file() {
                Some(file) => Some(file.size),
                None => {
                    return Err(Error::not_found(format!(
                        "{} is a directory, not a file",
                        session.path
                    )))
                }
            }
        };

        debug!("opened {} for reading, size: {size:?}", session.path);
        Ok(ReadHandle {
            fs: self.clone(),
            session,
            size,
            pos: 0,
            window_start: 0,
            window: Bytes::new(),
        })
    }
}

/// Total size out of `bytes 0-2/3`.
fn parse_content_range(v: &str) -> Option<u64> {
    v.rsplit_once('/')?.1.trim().parse().ok()
}

impl ReadHandle {
    /// Read up to `n` bytes, less only at the end of the object.
    ///
    /// On failure the cursor stays where it was before the call.
    pub async fn read(&mut self, n: usize) -> Result<Bytes> {
        let start = self.pos;
        let mut out = BytesMut::new();
        match self.read_into(n, &mut out).await {
            Ok(()) => Ok(out.freeze()),
            Err(err) => {
                self.pos = start;
                Err(err)
            }
        }
    }

    async fn read_into(&mut self, n: usize, out: &mut BytesMut) -> Result<()> {
        while out.len() < n {
            if self.size.is_some_and(|size| self.pos >= size) {
                break;
            }
            if !self.in_window() && !self.fetch(n - out.len()).await? {
                break;
            }

            let offset = (self.pos - self.window_start) as usize;
            let take = (n - out.len()).min(self.window.len() - offset);
            out.extend_from_slice(&self.window[offset..offset + take]);
            self.pos += take as u64;
        }
        Ok(())
    }

    fn in_window(&self) -> bool {
        self.pos >= self.window_start && self.pos < self.window_start + self.window.len() as u64
    }

    /// Fetch a window starting at the cursor, returns false at the end of
    /// the object.
    async fn fetch(&mut self, want: usize) -> Result<bool> {
        let mut len = want.max(self.session.config.read_chunk_size).max(1) as u64;
        if let Some(size) = self.size {
            len = len.min(size.saturating_sub(self.pos)).max(1);
        }
        let end = self.pos.saturating_add(len - 1);

        let desc = RequestDescriptor::new(Method::GET, &self.session.bucket, &self.session.key)
            .with_header(RANGE.as_str(), &format!("bytes={}-{end}", self.pos))?;
        let result = self.fs.executor(&self.session).send(&desc).await;

        let resp = match result {
            Ok(resp) => resp,
            Err(err) if err.status() == Some(StatusCode::RANGE_NOT_SATISFIABLE.as_u16()) => {
                self.size.get_or_insert(self.pos);
                return Ok(false);
            }
            Err(err) => {
                return Err(err.with_context(format!(
                    "reading {} at offset {}",
                    self.session.path, self.pos
                )))
            }
        };

        if resp.status() == StatusCode::PARTIAL_CONTENT {
            if self.size.is_none() {
                self.size = header_str(&resp, CONTENT_RANGE.as_str()).and_then(parse_content_range);
            }
            self.window_start = self.pos;
        } else {
            // The range was ignored, we got the whole object.
            self.window_start = 0;
            self.size = Some(resp.body().len() as u64);
        }
        self.window = resp.into_body();
        Ok(self.in_window())
    }

    /// Move the cursor, returns the new position.
    ///
    /// Seeking past the end is allowed; reads there return nothing.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let new = match pos {
            SeekFrom::Start(v) => Some(v),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.size().await?.checked_add_signed(delta),
        };
        let Some(new) = new else {
            return Err(Error::request_invalid("seek to a negative position"));
        };
        self.pos = new;
        Ok(new)
    }

    /// Current position.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Size of the object, asking the service if it's not known yet.
    pub async fn size(&mut self) -> Result<u64> {
        if let Some(size) = self.size {
            return Ok(size);
        }
        let size = self.fs.stat(&self.session.path).await?.size();
        self.size = Some(size);
        Ok(size)
    }

    pub fn path(&self) -> &str {
        &self.session.path
    }

    pub async fn close(self) -> Result<()> {
        debug!("closed {}", self.session.path);
        Ok(())
    }
}
