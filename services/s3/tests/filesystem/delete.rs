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
use s3vfs_s3::constants::S3VFS_UNLINK_BATCH_SIZE;
use s3vfs_s3::CacheLookup;

#[tokio::test]
async fn test_unlink_batch_splits_requests() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options().with(S3VFS_UNLINK_BATCH_SIZE, "2"));
    mock.expect_with(
        Expectation::new(
            Method::POST,
            "/bucket/?delete",
            MockResponse::new(200).with_body(
                "<DeleteResult><Deleted><Key>a</Key></Deleted><Deleted><Key>b</Key></Deleted></DeleteResult>",
            ),
        )
        .with_body(concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<Delete xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\n",
            "  <Object>\n    <Key>a</Key>\n  </Object>\n",
            "  <Object>\n    <Key>b</Key>\n  </Object>\n",
            "</Delete>\n",
        )),
    );
    mock.expect(
        Method::POST,
        "/bucket/?delete",
        MockResponse::new(200)
            .with_body("<DeleteResult><Deleted><Key>c</Key></Deleted></DeleteResult>"),
    );

    fs.unlink_batch(&["bucket/a", "bucket/b", "bucket/c"]).await?;

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|r| !r.header("content-md5").is_empty()));
    assert_eq!(mock.pending(), 0);
    assert_eq!(fs.stat_cached("bucket/a"), CacheLookup::Miss);
    Ok(())
}

#[tokio::test]
async fn test_unlink_batch_reports_failures() {
    let (fs, mock) = mock_fs(mock_options());
    mock.expect(
        Method::POST,
        "/bucket/?delete",
        MockResponse::new(200).with_body(concat!(
            "<DeleteResult><Deleted><Key>a</Key></Deleted>",
            "<Error><Key>b</Key><Code>AccessDenied</Code><Message>Access Denied</Message></Error>",
            "</DeleteResult>",
        )),
    );

    let err = fs
        .unlink_batch(&["bucket/a", "bucket/b"])
        .await
        .expect_err("b was not deleted");
    assert!(err.to_string().contains("failed to delete 1 of 2 objects: bucket/b"), "{err}");
}
