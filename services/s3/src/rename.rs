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

use crate::constants::{AWS_URI_ENCODE_SET, X_AMZ_COPY_SOURCE};
use crate::error::{response_error, ServiceError};
use crate::executor::RequestDescriptor;
use crate::fs::{dir_prefix, S3FileSystem, Session};
use crate::listing::list_all;
use http::{HeaderMap, Method};
use log::debug;
use percent_encoding::utf8_percent_encode;
use s3vfs_core::{Error, ErrorKind, Result};

impl S3FileSystem {
    /// Copy an object inside the service, without downloading it.
    pub(crate) async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst: &Session,
        dst_key: &str,
        headers: &HeaderMap,
    ) -> Result<()> {
        let source = format!(
            "/{src_bucket}/{}",
            utf8_percent_encode(src_key, &AWS_URI_ENCODE_SET)
        );
        let desc = RequestDescriptor::new(Method::PUT, &dst.bucket, dst_key)
            .with_header(X_AMZ_COPY_SOURCE, &source)?
            .with_headers(headers);
        let resp = self.executor(dst).send(&desc).await?;

        // A copy can fail after the service answered 200.
        if ServiceError::parse(resp.body()).is_some() {
            return Err(response_error(resp.status(), resp.body())
                .with_context(format!("copying {source} to {}/{dst_key}", dst.bucket)));
        }
        Ok(())
    }

    /// Rename a file or a directory.
    ///
    /// Objects are copied to the new name and deleted afterwards; directories
    /// have every key below them moved. A path that is both an object and a
    /// directory moves both. Renaming onto an existing directory fails with
    /// [`ErrorKind::Conflict`].
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let stat = self.stat(from).await?;
        match self.stat(to).await {
            Ok(target) if target.is_dir() => {
                return Err(Error::conflict(format!("{to} is an existing directory")))
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        let src = self.session(from).await?;
        let dst = self.session(to).await?;
        if src.key.is_empty() || dst.key.is_empty() {
            return Err(Error::request_invalid("buckets can't be renamed"));
        }

        if stat.is_file() {
            self.copy_object(&src.bucket, &src.key, &dst, &dst.key, &HeaderMap::new())
                .await?;
            let desc = RequestDescriptor::new(Method::DELETE, &src.bucket, &src.key);
            self.executor(&src).send(&desc).await?;
            debug!("renamed {} to {}", src.path, dst.path);
        }
        if !stat.is_dir() {
            self.cache().invalidate(&src.path);
            self.cache().invalidate(&dst.path);
            return Ok(());
        }

        let src_prefix = dir_prefix(&src.key);
        let dst_prefix = dir_prefix(&dst.key);
        let marker = RequestDescriptor::new(Method::PUT, &dst.bucket, &dst_prefix);
        self.executor(&dst).send(&marker).await?;

        let page = list_all(&self.executor(&src), &src.bucket, &src_prefix, false).await?;
        let keys: Vec<String> = page.objects.into_iter().map(|o| o.key).collect();
        let result = self.move_keys(&src, &src_prefix, &dst, &dst_prefix, &keys).await;

        self.cache().invalidate_subtree(&src.path);
        self.cache().invalidate_subtree(&dst.path);
        result?;
        debug!("renamed directory {} to {} ({} keys)", src.path, dst.path, keys.len());
        Ok(())
    }

    async fn move_keys(
        &self,
        src: &Session,
        src_prefix: &str,
        dst: &Session,
        dst_prefix: &str,
        keys: &[String],
    ) -> Result<()> {
        for key in keys {
            let Some(rel) = key.strip_prefix(src_prefix) else {
                continue;
            };
            if rel.is_empty() {
                continue;
            }
            self.copy_object(
                &src.bucket,
                key,
                dst,
                &format!("{dst_prefix}{rel}"),
                &HeaderMap::new(),
            )
            .await?;
        }

        self.delete_all(src, keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheLookup, DirStat, FileStat, Stat};
    use crate::test_utils::{mock_fs, test_options};
    use pretty_assertions::assert_eq;
    use s3vfs_http_send_mock::{Expectation, MockResponse};

    fn head_404_and_empty_probe(mock: &s3vfs_http_send_mock::MockHttpSend, key: &str) {
        mock.expect(Method::HEAD, &format!("/bucket/{key}"), MockResponse::new(404));
        mock.expect(
            Method::GET,
            &format!("/bucket/?delimiter=%2F&max-keys=100&prefix={key}%2F"),
            MockResponse::new(200).with_body("<ListBucketResult/>"),
        );
    }

    #[tokio::test]
    async fn test_rename_file() -> Result<()> {
        let (fs, mock) = mock_fs(test_options());
        mock.expect(
            Method::HEAD,
            "/bucket/source",
            MockResponse::new(200).with_header("Content-Length", "3"),
        );
        head_404_and_empty_probe(&mock, "target");
        mock.expect_with(
            Expectation::new(Method::PUT, "/bucket/target", MockResponse::new(200))
                .with_header("x-amz-copy-source", "/bucket/source"),
        );
        mock.expect(Method::DELETE, "/bucket/source", MockResponse::new(204));

        fs.rename("bucket/source", "bucket/target").await?;
        assert_eq!(mock.pending(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_onto_directory() {
        let (fs, mock) = mock_fs(test_options());
        mock.expect(
            Method::HEAD,
            "/bucket/source",
            MockResponse::new(200).with_header("Content-Length", "3"),
        );
        mock.expect(Method::HEAD, "/bucket/dir", MockResponse::new(404));
        mock.expect(
            Method::GET,
            "/bucket/?delimiter=%2F&max-keys=100&prefix=dir%2F",
            MockResponse::new(200).with_body(
                "<ListBucketResult><Contents><Key>dir/x</Key><Size>1</Size></Contents></ListBucketResult>",
            ),
        );

        let err = fs
            .rename("bucket/source", "bucket/dir")
            .await
            .expect_err("target is a directory");
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_rename_directory() -> Result<()> {
        let (fs, mock) = mock_fs(test_options());
        mock.expect(Method::HEAD, "/bucket/src", MockResponse::new(404));
        mock.expect(
            Method::GET,
            "/bucket/?delimiter=%2F&max-keys=100&prefix=src%2F",
            MockResponse::new(200).with_body(
                "<ListBucketResult><Contents><Key>src/a.txt</Key><Size>1</Size></Contents></ListBucketResult>",
            ),
        );
        head_404_and_empty_probe(&mock, "dst");
        mock.expect(Method::PUT, "/bucket/dst/", MockResponse::new(200));
        mock.expect(
            Method::GET,
            "/bucket/?prefix=src%2F",
            MockResponse::new(200).with_body(
                "<ListBucketResult><Contents><Key>src/</Key><Size>0</Size></Contents><Contents><Key>src/a.txt</Key><Size>1</Size></Contents></ListBucketResult>",
            ),
        );
        mock.expect_with(
            Expectation::new(Method::PUT, "/bucket/dst/a.txt", MockResponse::new(200))
                .with_header("x-amz-copy-source", "/bucket/src/a.txt"),
        );
        mock.expect(
            Method::POST,
            "/bucket/?delete",
            MockResponse::new(200).with_body(
                "<DeleteResult><Deleted><Key>src/</Key></Deleted><Deleted><Key>src/a.txt</Key></Deleted></DeleteResult>",
            ),
        );

        fs.rename("bucket/src", "bucket/dst").await?;
        assert_eq!(mock.pending(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_file_and_directory_of_same_name() -> Result<()> {
        let (fs, mock) = mock_fs(test_options());
        fs.cache().put(
            "bucket/src",
            Stat::Ambiguous {
                file: FileStat {
                    size: 3,
                    ..Default::default()
                },
                dir: DirStat::default(),
            },
        );
        head_404_and_empty_probe(&mock, "dst");
        mock.expect_with(
            Expectation::new(Method::PUT, "/bucket/dst", MockResponse::new(200))
                .with_header("x-amz-copy-source", "/bucket/src"),
        );
        mock.expect(Method::DELETE, "/bucket/src", MockResponse::new(204));
        mock.expect(Method::PUT, "/bucket/dst/", MockResponse::new(200));
        mock.expect(
            Method::GET,
            "/bucket/?prefix=src%2F",
            MockResponse::new(200).with_body(
                "<ListBucketResult><Contents><Key>src/a.txt</Key><Size>1</Size></Contents></ListBucketResult>",
            ),
        );
        mock.expect_with(
            Expectation::new(Method::PUT, "/bucket/dst/a.txt", MockResponse::new(200))
                .with_header("x-amz-copy-source", "/bucket/src/a.txt"),
        );
        mock.expect(
            Method::POST,
            "/bucket/?delete",
            MockResponse::new(200).with_body(
                "<DeleteResult><Deleted><Key>src/a.txt</Key></Deleted></DeleteResult>",
            ),
        );

        fs.rename("bucket/src", "bucket/dst").await?;
        assert_eq!(mock.pending(), 0);
        assert_eq!(fs.stat_cached("bucket/src"), CacheLookup::Miss);
        Ok(())
    }

    #[tokio::test]
    async fn test_copy_error_in_body() {
        let (fs, mock) = mock_fs(test_options());
        mock.expect(
            Method::PUT,
            "/bucket/target",
            MockResponse::new(200)
                .with_body("<Error><Code>InternalError</Code><Message>oops</Message></Error>"),
        );

        let dst = fs.session("bucket/target").await.expect("session");
        let err = fs
            .copy_object("bucket", "source", &dst, "target", &HeaderMap::new())
            .await
            .expect_err("copy failed");
        assert!(err.to_string().contains("InternalError: oops"));
    }
}
