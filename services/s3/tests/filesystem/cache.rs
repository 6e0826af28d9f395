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

use crate::{mock_fs, mock_options};
use http::Method;
use s3vfs_core::Result;
use s3vfs_http_send_mock::MockResponse;
use s3vfs_s3::constants::S3VFS_NON_CACHED;
use s3vfs_s3::CacheLookup;

#[tokio::test]
async fn test_invalidate_then_refetch_once() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options());
    mock.expect(
        Method::HEAD,
        "/bucket/file",
        MockResponse::new(200).with_header("Content-Length", "3"),
    );
    mock.expect(
        Method::HEAD,
        "/bucket/file",
        MockResponse::new(200).with_header("Content-Length", "5"),
    );

    assert_eq!(fs.stat("bucket/file").await?.size(), 3);
    assert_eq!(fs.stat("bucket/file").await?.size(), 3);
    assert_eq!(mock.requests().len(), 1);

    fs.clear_cache_path("bucket/file");
    assert_eq!(fs.stat_cached("bucket/file"), CacheLookup::Miss);
    assert_eq!(fs.stat("bucket/file").await?.size(), 5);
    assert_eq!(fs.stat("bucket/file").await?.size(), 5);
    assert_eq!(mock.requests().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_non_cached_prefix() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options().with(S3VFS_NON_CACHED, "bucket/live"));
    for _ in 0..2 {
        mock.expect(
            Method::HEAD,
            "/bucket/live/file",
            MockResponse::new(200).with_header("Content-Length", "1"),
        );
    }
    mock.expect(
        Method::HEAD,
        "/bucket/static",
        MockResponse::new(200).with_header("Content-Length", "1"),
    );

    fs.stat("bucket/live/file").await?;
    fs.stat("bucket/live/file").await?;
    fs.stat("bucket/static").await?;
    fs.stat("bucket/static").await?;

    assert_eq!(mock.requests().len(), 3);
    assert_eq!(fs.stat_cached("bucket/live/file"), CacheLookup::Miss);
    Ok(())
}
