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

const REGION_MISMATCH: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>AuthorizationHeaderMalformed</Code><Message>the region 'us-east-1' is wrong; expecting 'eu-central-1'</Message><Region>eu-central-1</Region></Error>"#;

#[tokio::test]
async fn test_region_mismatch_is_transparent() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options());
    mock.expect(
        Method::GET,
        "/bucket/?delimiter=%2F&prefix=dir%2F",
        MockResponse::new(400).with_body(REGION_MISMATCH),
    );
    mock.expect(
        Method::GET,
        "/bucket/?delimiter=%2F&prefix=dir%2F",
        MockResponse::new(200).with_body(
            "<ListBucketResult><Contents><Key>dir/a.txt</Key><Size>1</Size></Contents></ListBucketResult>",
        ),
    );
    mock.expect(
        Method::HEAD,
        "/bucket/other",
        MockResponse::new(200).with_header("Content-Length", "7"),
    );

    let entries = fs.read_dir("bucket/dir").await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "a.txt");

    // The corrected region sticks for later requests to the bucket.
    assert_eq!(fs.stat("bucket/other").await?.size(), 7);
    let requests = mock.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].header("authorization").contains("/us-east-1/s3/"));
    assert!(requests[1].header("authorization").contains("/eu-central-1/s3/"));
    assert!(requests[2].header("authorization").contains("/eu-central-1/s3/"));
    Ok(())
}

#[tokio::test]
async fn test_clear_cache_forgets_region() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options());
    mock.expect(
        Method::HEAD,
        "/bucket/a",
        MockResponse::new(400).with_body(REGION_MISMATCH),
    );
    mock.expect(Method::HEAD, "/bucket/a", MockResponse::new(200));
    mock.expect(Method::HEAD, "/bucket/a", MockResponse::new(200));

    fs.stat("bucket/a").await?;
    fs.clear_cache();
    fs.stat("bucket/a").await?;

    let requests = mock.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[2].header("authorization").contains("/us-east-1/s3/"));
    Ok(())
}
