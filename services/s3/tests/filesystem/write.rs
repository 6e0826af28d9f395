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
use pretty_assertions::assert_eq;
use s3vfs_core::Result;
use s3vfs_http_send_mock::{Expectation, MockResponse};
use s3vfs_s3::constants::S3VFS_CHUNK_SIZE;

const MIB: usize = 1024 * 1024;

#[tokio::test]
async fn test_multipart_write_of_one_mib_and_one_byte() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options().with(S3VFS_CHUNK_SIZE, "1"));
    mock.expect(
        Method::POST,
        "/bucket/big?uploads",
        MockResponse::new(200).with_body(
            "<InitiateMultipartUploadResult><Bucket>bucket</Bucket><Key>big</Key><UploadId>VXBsb2FkIElE</UploadId></InitiateMultipartUploadResult>",
        ),
    );
    mock.expect(
        Method::PUT,
        "/bucket/big?partNumber=1&uploadId=VXBsb2FkIElE",
        MockResponse::new(200).with_header("ETag", "\"part1\""),
    );
    mock.expect(
        Method::PUT,
        "/bucket/big?partNumber=2&uploadId=VXBsb2FkIElE",
        MockResponse::new(200).with_header("ETag", "\"part2\""),
    );
    mock.expect_with(
        Expectation::new(
            Method::POST,
            "/bucket/big?uploadId=VXBsb2FkIElE",
            MockResponse::new(200).with_body(
                "<CompleteMultipartUploadResult><ETag>\"final-2\"</ETag></CompleteMultipartUploadResult>",
            ),
        )
        .with_body(concat!(
            "<CompleteMultipartUpload>\n",
            "<Part>\n<PartNumber>1</PartNumber><ETag>\"part1\"</ETag></Part>\n",
            "<Part>\n<PartNumber>2</PartNumber><ETag>\"part2\"</ETag></Part>\n",
            "</CompleteMultipartUpload>\n",
        )),
    );

    let mut w = fs.open_write("bucket/big").await?;
    // Feed in uneven pieces.
    let data = vec![b'x'; MIB + 1];
    for piece in data.chunks(100_000) {
        w.write(piece).await?;
    }
    assert_eq!(w.tell(), (MIB + 1) as u64);
    w.close().await?;

    let parts: Vec<usize> = mock
        .requests()
        .iter()
        .filter(|r| r.method == Method::PUT)
        .map(|r| r.body.len())
        .collect();
    assert_eq!(parts, vec![MIB, 1]);
    assert_eq!(mock.pending(), 0);

    // The closed file is known without asking the service.
    mock.reset_requests();
    let stat = fs.stat("bucket/big").await?;
    assert_eq!(stat.size(), (MIB + 1) as u64);
    assert!(mock.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_write_then_mkdir_conflict() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options());
    mock.expect_with(
        Expectation::new(Method::PUT, "/bucket/dir/a.txt", MockResponse::new(200))
            .with_header("content-type", "text/plain")
            .with_body("hello"),
    );

    let mut headers = http::HeaderMap::new();
    headers.insert(http::header::CONTENT_TYPE, "text/plain".parse().expect("valid header"));
    let mut w = fs
        .open_write_with("bucket/dir/a.txt", s3vfs_s3::WriteOptions { headers })
        .await?;
    w.write(b"hello").await?;
    w.close().await?;

    let err = fs
        .mkdir("bucket/dir/a.txt")
        .await
        .expect_err("file already exists");
    assert_eq!(err.kind(), s3vfs_core::ErrorKind::Conflict);
    assert_eq!(mock.requests().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_round_trip_after_clearing_cache() -> Result<()> {
    for content in ["", "round trip content"] {
        let (fs, mock) = mock_fs(mock_options());
        mock.expect_with(
            Expectation::new(Method::PUT, "/bucket/rt", MockResponse::new(200))
                .with_body(content),
        );
        mock.expect(
            Method::HEAD,
            "/bucket/rt",
            MockResponse::new(200).with_header("Content-Length", &content.len().to_string()),
        );
        if !content.is_empty() {
            mock.expect(
                Method::GET,
                "/bucket/rt",
                MockResponse::new(206)
                    .with_header("Content-Range", &format!("bytes 0-{}/{}", content.len() - 1, content.len()))
                    .with_body(content),
            );
        }

        let mut w = fs.open_write("bucket/rt").await?;
        w.write(content.as_bytes()).await?;
        w.close().await?;

        fs.clear_cache();
        let mut r = fs.open_read("bucket/rt").await?;
        assert_eq!(r.read(1024).await?.as_ref(), content.as_bytes());
        assert!(r.read(1024).await?.is_empty());
        assert_eq!(mock.pending(), 0);
    }
    Ok(())
}
