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

use crate::cache::{FileStat, Stat};
use crate::constants::X_AMZ_STORAGE_CLASS;
use crate::error::{response_error, ServiceError};
use crate::executor::{header_str, protocol_error, Executor, RequestDescriptor};
use crate::fs::{response_etag, split_path, S3FileSystem, Session};
use crate::listing::trim_etag;
use bytes::{Bytes, BytesMut};
use http::header::ETAG;
use http::{HeaderMap, Method};
use log::{debug, warn};
use quick_xml::de;
use s3vfs_core::time::now;
use s3vfs_core::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Options of [`S3FileSystem::open_write_with`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Headers sent with every request of the upload, like `Content-Type`
    /// or `x-amz-storage-class`.
    pub headers: HeaderMap,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct InitiateMultipartUploadResult {
    upload_id: String,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct CompleteMultipartUploadResult {
    #[serde(rename = "ETag")]
    etag: String,
}

/// A started multipart upload.
///
/// Parts are kept by part number so completion lists them in ascending
/// order whatever order they finished in.
#[derive(Debug)]
pub(crate) struct MultipartUpload {
    bucket: String,
    key: String,
    headers: HeaderMap,
    upload_id: String,
    parts: BTreeMap<usize, String>,
}

impl MultipartUpload {
    pub async fn initiate(
        exec: &Executor<'_>,
        bucket: &str,
        key: &str,
        headers: &HeaderMap,
    ) -> Result<Self> {
        let desc = RequestDescriptor::new(Method::POST, bucket, key)
            .with_query("uploads", "")
            .with_headers(headers);
        let resp = exec.send(&desc).await?;

        let result: InitiateMultipartUploadResult = std::str::from_utf8(resp.body())
            .ok()
            .and_then(|body| de::from_str(body).ok())
            .unwrap_or_default();
        if result.upload_id.is_empty() {
            return Err(protocol_error(
                "initiate multipart upload returned no UploadId",
                resp.body(),
            ));
        }

        debug!("started multipart upload {} of {bucket}/{key}", result.upload_id);
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            headers: headers.clone(),
            upload_id: result.upload_id,
            parts: BTreeMap::new(),
        })
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Upload one part, returning its etag.
    ///
    /// Takes `&self` so that several parts can be in flight at once.
    pub async fn upload_part(
        &self,
        exec: &Executor<'_>,
        part_number: usize,
        body: Bytes,
    ) -> Result<String> {
        let desc = RequestDescriptor::new(Method::PUT, &self.bucket, &self.key)
            .with_query("partNumber", part_number.to_string())
            .with_query("uploadId", self.upload_id.as_str())
            .with_headers(&self.headers)
            .with_body(body);
        let resp = exec.send(&desc).await?;

        match header_str(&resp, ETAG.as_str()) {
            Some(etag) if !etag.is_empty() => Ok(etag.to_string()),
            _ => Err(Error::protocol(format!(
                "upload of part {part_number} returned no ETag"
            ))),
        }
    }

    pub fn record(&mut self, part_number: usize, etag: String) {
        self.parts.insert(part_number, etag);
    }

    /// Number of parts recorded so far.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    fn complete_body(&self) -> String {
        let mut body = String::from("<CompleteMultipartUpload>\n");
        for (number, etag) in &self.parts {
            // Writing into a String never fails.
            let _ = writeln!(
                body,
                "<Part>\n<PartNumber>{number}</PartNumber><ETag>{etag}</ETag></Part>"
            );
        }
        body.push_str("</CompleteMultipartUpload>\n");
        body
    }

    /// Complete the upload, returning the etag of the object if reported.
    pub async fn complete(&self, exec: &Executor<'_>) -> Result<Option<String>> {
        let expected = 1..=self.parts.len();
        if !self.parts.keys().copied().eq(expected) {
            return Err(Error::unexpected(format!(
                "parts of multipart upload {} are not contiguous",
                self.upload_id
            )));
        }

        let desc = RequestDescriptor::new(Method::POST, &self.bucket, &self.key)
            .with_query("uploadId", self.upload_id.as_str())
            .with_headers(&self.headers)
            .with_body(self.complete_body());
        let resp = exec.send(&desc).await?;

        // The service may report a failure in the body of a 200 response.
        if ServiceError::parse(resp.body()).is_some() {
            return Err(response_error(resp.status(), resp.body()));
        }
        let etag = std::str::from_utf8(resp.body())
            .ok()
            .and_then(|body| de::from_str::<CompleteMultipartUploadResult>(body).ok())
            .map(|result| trim_etag(&result.etag))
            .filter(|v| !v.is_empty());

        debug!(
            "completed multipart upload {} of {}/{} with {} parts",
            self.upload_id,
            self.bucket,
            self.key,
            self.parts.len()
        );
        Ok(etag)
    }

    pub async fn abort(&self, exec: &Executor<'_>) -> Result<()> {
        let desc = RequestDescriptor::new(Method::DELETE, &self.bucket, &self.key)
            .with_query("uploadId", self.upload_id.as_str());
        exec.send(&desc).await?;
        debug!("aborted multipart upload {}", self.upload_id);
        Ok(())
    }

    /// Abort the upload after `err`, returning the error to surface.
    pub async fn fail(&self, exec: &Executor<'_>, err: Error) -> Error {
        match self.abort(exec).await {
            Ok(()) => err,
            Err(abort_err) => {
                warn!("failed to abort multipart upload {}: {abort_err}", self.upload_id);
                abort_failed(&self.upload_id, err, abort_err)
            }
        }
    }
}

/// Error reported when aborting an upload failed after `original`.
fn abort_failed(upload_id: &str, original: Error, abort: Error) -> Error {
    Error::new(
        abort.kind(),
        format!("failed to abort multipart upload {upload_id}: {abort}"),
    )
    .with_context(format!("upload failed with: {original}"))
    .with_source(original)
}

/// WriteHandle uploads sequentially written content.
///
/// Content stays in memory until the chunk size is reached, then goes out as
/// parts of a multipart upload. Errors of buffered content surface at
/// [`WriteHandle::close`]. Dropping the handle without closing it discards
/// the content.
#[derive(Debug)]
pub struct WriteHandle {
    fs: S3FileSystem,
    session: Session,
    headers: HeaderMap,
    buffer: BytesMut,
    pos: u64,
    upload: Option<MultipartUpload>,
    failure: Option<String>,
}

impl S3FileSystem {
    /// Open an object for sequential writing.
    pub async fn open_write(&self, path: &str) -> Result<WriteHandle> {
        self.open_write_with(path, WriteOptions::default()).await
    }

    /// Open an object for sequential writing with options.
    pub async fn open_write_with(&self, path: &str, options: WriteOptions) -> Result<WriteHandle> {
        let session = self.session(path).await?;
        if session.key.is_empty() {
            return Err(Error::request_invalid(format!(
                "{path} is a bucket, not a file"
            )));
        }

        debug!("opened {} for writing", session.path);
        Ok(WriteHandle {
            fs: self.clone(),
            session,
            headers: options.headers,
            buffer: BytesMut::new(),
            pos: 0,
            upload: None,
            failure: None,
        })
    }

    /// Open an object for random access writing through a local temp file.
    ///
    /// The content is uploaded on close. Needs
    /// `S3VFS_USE_TEMP_FILE_FOR_RANDOM_WRITE`.
    pub async fn open_random_write(&self, path: &str) -> Result<TempFileHandle> {
        self.open_random_write_with(path, WriteOptions::default())
            .await
    }

    pub async fn open_random_write_with(
        &self,
        path: &str,
        options: WriteOptions,
    ) -> Result<TempFileHandle> {
        let config = self.config(path)?;
        if !config.use_temp_file_for_random_write {
            return Err(Error::request_invalid(
                "random access writing needs S3VFS_USE_TEMP_FILE_FOR_RANDOM_WRITE=YES",
            ));
        }
        let (_, key) = split_path(path)?;
        if key.is_empty() {
            return Err(Error::request_invalid(format!(
                "{path} is a bucket, not a file"
            )));
        }

        let file = tempfile::tempfile()?;
        Ok(TempFileHandle {
            fs: self.clone(),
            path: path.to_string(),
            options,
            chunk_size: config.chunk_size,
            file: tokio::fs::File::from_std(file),
        })
    }
}

impl WriteHandle {
    /// Write `data`, returns the number of bytes accepted.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if let Some(failure) = &self.failure {
            return Err(Error::unexpected(format!(
                "writing to {} already failed: {failure}",
                self.session.path
            )));
        }

        self.buffer.extend_from_slice(data);
        self.pos += data.len() as u64;

        let chunk_size = self.session.config.chunk_size.max(1);
        while self.buffer.len() >= chunk_size {
            let part = self.buffer.split_to(chunk_size).freeze();
            if let Err(err) = self.flush_part(part).await {
                self.failure = Some(err.to_string());
                return Err(err);
            }
        }
        Ok(data.len())
    }

    /// Upload a part, starting the multipart upload if needed. The upload
    /// is aborted on failure.
    async fn flush_part(&mut self, part: Bytes) -> Result<()> {
        let exec = self.fs.executor(&self.session);
        if self.upload.is_none() {
            self.upload = Some(
                MultipartUpload::initiate(
                    &exec,
                    &self.session.bucket,
                    &self.session.key,
                    &self.headers,
                )
                .await?,
            );
        }
        let Some(upload) = self.upload.as_mut() else {
            return Err(Error::unexpected("multipart upload vanished"));
        };

        let number = upload.len() + 1;
        match upload.upload_part(&exec, number, part).await {
            Ok(etag) => {
                upload.record(number, etag);
                Ok(())
            }
            Err(err) => {
                let err = upload.fail(&exec, err).await;
                self.upload = None;
                Err(err)
            }
        }
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Finish the upload.
    ///
    /// On success the written object replaces any cached state of its path.
    pub async fn close(mut self) -> Result<()> {
        if let Some(failure) = &self.failure {
            return Err(Error::unexpected(format!(
                "writing to {} failed: {failure}",
                self.session.path
            )));
        }

        let etag = match self.upload.take() {
            None => self.put_object().await?,
            Some(mut upload) => {
                let exec = self.fs.executor(&self.session);
                if !self.buffer.is_empty() {
                    let number = upload.len() + 1;
                    let part = self.buffer.split().freeze();
                    match upload.upload_part(&exec, number, part).await {
                        Ok(etag) => upload.record(number, etag),
                        Err(err) => return Err(upload.fail(&exec, err).await),
                    }
                }
                match upload.complete(&exec).await {
                    Ok(etag) => etag,
                    Err(err) => return Err(upload.fail(&exec, err).await),
                }
            }
        };

        let path = &self.session.path;
        let cache = self.fs.cache();
        cache.invalidate(path);
        if !self.session.config.is_non_cached(path) {
            cache.put(
                path,
                Stat::File(FileStat {
                    size: self.pos,
                    mtime: Some(now()),
                    etag,
                    storage_class: self
                        .headers
                        .get(X_AMZ_STORAGE_CLASS)
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.to_string()),
                }),
            );
        }
        debug!("closed {} after writing {} bytes", path, self.pos);
        Ok(())
    }

    async fn put_object(&mut self) -> Result<Option<String>> {
        let desc = RequestDescriptor::new(Method::PUT, &self.session.bucket, &self.session.key)
            .with_headers(&self.headers)
            .with_body(self.buffer.split().freeze());
        let resp = self.fs.executor(&self.session).send(&desc).await?;
        Ok(response_etag(&resp))
    }
}

/// TempFileHandle supports reads, writes and seeks on a local temp file that
/// is uploaded on close.
#[derive(Debug)]
pub struct TempFileHandle {
    fs: S3FileSystem,
    path: String,
    options: WriteOptions,
    chunk_size: usize,
    file: tokio::fs::File,
}

impl TempFileHandle {
    /// Read up to `n` bytes at the cursor.
    pub async fn read(&mut self, n: usize) -> Result<Bytes> {
        let mut buf = vec![0; n];
        let mut filled = 0;
        while filled < n {
            let read = self.file.read(&mut buf[filled..]).await?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        buf.truncate(filled);
        Ok(buf.into())
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.file.write_all(data).await?;
        Ok(data.len())
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos).await?)
    }

    /// Upload the content of the temp file.
    pub async fn close(mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.seek(SeekFrom::Start(0)).await?;

        let mut w = self.fs.open_write_with(&self.path, self.options).await?;
        let mut buf = vec![0; self.chunk_size.clamp(1, 8 * 1024 * 1024)];
        loop {
            let n = self.file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            w.write(&buf[..n]).await?;
        }
        w.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLookup;
    use crate::constants::{S3VFS_CHUNK_SIZE_BYTES, S3VFS_USE_TEMP_FILE_FOR_RANDOM_WRITE};
    use crate::test_utils::{mock_fs, test_options};
    use http::HeaderValue;
    use pretty_assertions::assert_eq;
    use s3vfs_core::ErrorKind;
    use s3vfs_http_send_mock::{Expectation, MockResponse};

    const INITIATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult>
  <UploadId>my_id</UploadId>
</InitiateMultipartUploadResult>"#;

    fn part(n: usize, body: &'static str) -> Expectation {
        Expectation::new(
            Method::PUT,
            &format!("/bucket/object?partNumber={n}&uploadId=my_id"),
            MockResponse::new(200).with_header("ETag", &format!("\"etag{n}\"")),
        )
        .with_body(body)
    }

    #[tokio::test]
    async fn test_single_put() -> Result<()> {
        let (fs, mock) = mock_fs(test_options());
        mock.expect_with(
            Expectation::new(
                Method::PUT,
                "/bucket/object",
                MockResponse::new(200).with_header("ETag", "\"acbd18db4cc2f85cedef654fccc4a4d8\""),
            )
            .with_body("foo")
            .with_header("content-type", "text/plain"),
        );

        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        let mut w = fs
            .open_write_with("bucket/object", WriteOptions { headers })
            .await?;
        assert_eq!(w.write(b"fo").await?, 2);
        assert_eq!(w.write(b"o").await?, 1);
        assert_eq!(w.tell(), 3);
        w.close().await?;

        // The written object is known without asking the service.
        match fs.stat_cached("bucket/object") {
            CacheLookup::Hit(Stat::File(stat)) => {
                assert_eq!(stat.size, 3);
                assert_eq!(stat.etag.as_deref(), Some("acbd18db4cc2f85cedef654fccc4a4d8"));
            }
            v => panic!("unexpected lookup {v:?}"),
        }
        assert_eq!(mock.requests().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_put() -> Result<()> {
        let (fs, mock) = mock_fs(test_options());
        mock.expect_with(
            Expectation::new(Method::PUT, "/bucket/object", MockResponse::new(200))
                .with_header("content-length", "0"),
        );

        fs.open_write("bucket/object").await?.close().await?;
        assert_eq!(mock.pending(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_multipart() -> Result<()> {
        let (fs, mock) = mock_fs(test_options().with(S3VFS_CHUNK_SIZE_BYTES, "4"));
        mock.expect(
            Method::POST,
            "/bucket/object?uploads",
            MockResponse::new(200).with_body(INITIATE),
        );
        mock.expect_with(part(1, "0123"));
        mock.expect_with(part(2, "4567"));
        mock.expect_with(part(3, "89"));
        mock.expect_with(
            Expectation::new(
                Method::POST,
                "/bucket/object?uploadId=my_id",
                MockResponse::new(200),
            )
            .with_body(
                concat!(
                    "<CompleteMultipartUpload>\n",
                    "<Part>\n<PartNumber>1</PartNumber><ETag>\"etag1\"</ETag></Part>\n",
                    "<Part>\n<PartNumber>2</PartNumber><ETag>\"etag2\"</ETag></Part>\n",
                    "<Part>\n<PartNumber>3</PartNumber><ETag>\"etag3\"</ETag></Part>\n",
                    "</CompleteMultipartUpload>\n",
                ),
            ),
        );

        let mut w = fs.open_write("bucket/object").await?;
        w.write(b"012345").await?;
        w.write(b"6789").await?;
        // Two full parts are out, two bytes are buffered.
        assert_eq!(mock.requests().len(), 3);
        w.close().await?;
        assert_eq!(mock.pending(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_exact_chunk_uses_multipart() -> Result<()> {
        let (fs, mock) = mock_fs(test_options().with(S3VFS_CHUNK_SIZE_BYTES, "4"));
        mock.expect(
            Method::POST,
            "/bucket/object?uploads",
            MockResponse::new(200).with_body(INITIATE),
        );
        mock.expect_with(part(1, "0123"));
        mock.expect(
            Method::POST,
            "/bucket/object?uploadId=my_id",
            MockResponse::new(200),
        );

        let mut w = fs.open_write("bucket/object").await?;
        w.write(b"0123").await?;
        w.close().await?;
        assert_eq!(mock.pending(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_initiate_response() {
        for body in ["", "foo", "<foo/>"] {
            let (fs, mock) = mock_fs(test_options().with(S3VFS_CHUNK_SIZE_BYTES, "4"));
            mock.expect(
                Method::POST,
                "/bucket/object?uploads",
                MockResponse::new(200).with_body(body),
            );

            let mut w = fs.open_write("bucket/object").await.expect("open must succeed");
            let err = w.write(b"0123").await.expect_err("initiate must fail");
            assert_eq!(err.kind(), ErrorKind::ProtocolError, "{body}");
            assert!(w.close().await.is_err());
        }
    }

    #[tokio::test]
    async fn test_part_failure_aborts() -> Result<()> {
        let (fs, mock) = mock_fs(test_options().with(S3VFS_CHUNK_SIZE_BYTES, "4"));
        mock.expect(
            Method::POST,
            "/bucket/object?uploads",
            MockResponse::new(200).with_body(INITIATE),
        );
        mock.expect(
            Method::PUT,
            "/bucket/object?partNumber=1&uploadId=my_id",
            MockResponse::new(400),
        );
        mock.expect(
            Method::DELETE,
            "/bucket/object?uploadId=my_id",
            MockResponse::new(204),
        );

        let mut w = fs.open_write("bucket/object").await?;
        let err = w.write(b"0123").await.expect_err("part upload fails");
        assert_eq!(err.status(), Some(400));
        assert_eq!(mock.pending(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_abort_failure_is_distinct() -> Result<()> {
        let (fs, mock) = mock_fs(test_options().with(S3VFS_CHUNK_SIZE_BYTES, "4"));
        mock.expect(
            Method::POST,
            "/bucket/object?uploads",
            MockResponse::new(200).with_body(INITIATE),
        );
        mock.expect_with(part(1, "0123"));
        mock.expect(
            Method::POST,
            "/bucket/object?uploadId=my_id",
            MockResponse::new(400).with_body("complete refused"),
        );
        mock.expect(
            Method::DELETE,
            "/bucket/object?uploadId=my_id",
            MockResponse::new(403).with_body("abort refused"),
        );

        let mut w = fs.open_write("bucket/object").await?;
        w.write(b"0123").await?;
        let err = w.close().await.expect_err("complete fails");
        let msg = err.to_string();
        assert!(msg.contains("failed to abort multipart upload my_id"), "{msg}");
        assert!(msg.contains("complete refused"), "{msg}");
        assert_eq!(err.kind(), ErrorKind::AuthRejected);
        Ok(())
    }

    #[tokio::test]
    async fn test_error_in_complete_body() -> Result<()> {
        let (fs, mock) = mock_fs(test_options().with(S3VFS_CHUNK_SIZE_BYTES, "4"));
        mock.expect(
            Method::POST,
            "/bucket/object?uploads",
            MockResponse::new(200).with_body(INITIATE),
        );
        mock.expect_with(part(1, "0123"));
        mock.expect(
            Method::POST,
            "/bucket/object?uploadId=my_id",
            MockResponse::new(200)
                .with_body("<Error><Code>InternalError</Code><Message>oops</Message></Error>"),
        );
        mock.expect(
            Method::DELETE,
            "/bucket/object?uploadId=my_id",
            MockResponse::new(204),
        );

        let mut w = fs.open_write("bucket/object").await?;
        w.write(b"0123").await?;
        let err = w.close().await.expect_err("complete reports an error");
        assert!(err.to_string().contains("InternalError: oops"));
        assert_eq!(mock.pending(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_random_write_needs_option() {
        let (fs, _) = mock_fs(test_options());
        let err = fs
            .open_random_write("bucket/object")
            .await
            .expect_err("option is off");
        assert_eq!(err.kind(), ErrorKind::RequestInvalid);
    }

    #[tokio::test]
    async fn test_random_write() -> Result<()> {
        let (fs, mock) = mock_fs(test_options().with(S3VFS_USE_TEMP_FILE_FOR_RANDOM_WRITE, "YES"));
        mock.expect_with(
            Expectation::new(Method::PUT, "/bucket/object", MockResponse::new(200))
                .with_body("hello world!"),
        );

        let mut f = fs.open_random_write("bucket/object").await?;
        f.write(b"hello there!").await?;
        f.seek(SeekFrom::Start(6)).await?;
        f.write(b"world").await?;
        f.seek(SeekFrom::Start(0)).await?;
        assert_eq!(f.read(5).await?.as_ref(), b"hello");
        // Nothing leaves the machine before close.
        assert!(mock.requests().is_empty());
        f.close().await?;
        assert_eq!(mock.pending(), 0);
        Ok(())
    }
}
