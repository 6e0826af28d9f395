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
use s3vfs_core::{ErrorKind, Result};
use s3vfs_http_send_mock::{Expectation, MockResponse};
use std::io::SeekFrom;

#[tokio::test]
async fn test_read_past_end() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options());
    mock.expect(
        Method::HEAD,
        "/bucket/foo.txt",
        MockResponse::new(200).with_header("Content-Length", "3"),
    );
    mock.expect_with(
        Expectation::new(
            Method::GET,
            "/bucket/foo.txt",
            MockResponse::new(206)
                .with_header("Content-Range", "bytes 0-2/3")
                .with_body("foo"),
        )
        .with_header("range", "bytes=0-2"),
    );

    let mut r = fs.open_read("bucket/foo.txt").await?;
    assert_eq!(r.size().await?, 3);
    assert_eq!(r.read(4).await?.as_ref(), b"foo");
    assert!(r.read(4).await?.is_empty());

    // Served from the buffered window.
    assert_eq!(r.seek(SeekFrom::Start(1)).await?, 1);
    assert_eq!(r.read(4).await?.as_ref(), b"oo");
    r.close().await?;

    assert_eq!(mock.requests().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_open_directory_for_read() {
    let (fs, mock) = mock_fs(mock_options());
    mock.expect(Method::HEAD, "/bucket/dir", MockResponse::new(404));
    mock.expect(
        Method::GET,
        "/bucket/?delimiter=%2F&max-keys=100&prefix=dir%2F",
        MockResponse::new(200).with_body(
            "<ListBucketResult><Contents><Key>dir/a</Key><Size>1</Size></Contents></ListBucketResult>",
        ),
    );

    let err = fs
        .open_read("bucket/dir")
        .await
        .expect_err("directories can't be read");
    assert!(err.to_string().contains("is a directory"), "{err}");
    assert!(fs.stat("bucket/dir").await.is_ok_and(|s| s.is_dir()));
}

#[tokio::test]
async fn test_open_missing_file() {
    let (fs, mock) = mock_fs(mock_options());
    mock.expect(Method::HEAD, "/bucket/missing", MockResponse::new(404));
    mock.expect(
        Method::GET,
        "/bucket/?delimiter=%2F&max-keys=100&prefix=missing%2F",
        MockResponse::new(200).with_body("<ListBucketResult/>"),
    );

    for _ in 0..2 {
        let err = fs
            .open_read("bucket/missing")
            .await
            .expect_err("object doesn't exist");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    assert_eq!(mock.requests().len(), 2);
}
