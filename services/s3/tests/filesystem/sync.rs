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
use s3vfs_http_send_mock::MockResponse;
use s3vfs_s3::{SyncLocation, SyncOptions, SyncReport};

#[tokio::test]
async fn test_download_is_skipped_once_up_to_date() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options());
    let dir = tempfile::tempdir()?;
    mock.expect(
        Method::HEAD,
        "/bucket/data/report.csv",
        MockResponse::new(200)
            .with_header("Content-Length", "7")
            .with_header("Last-Modified", "Thu, 01 Jan 2015 00:00:00 GMT"),
    );
    mock.expect(
        Method::GET,
        "/bucket/data/report.csv",
        MockResponse::new(200).with_body("a,b,c\n\n"),
    );

    let source = SyncLocation::Remote("bucket/data/report.csv".to_string());
    let target = SyncLocation::Local(dir.path().to_path_buf());

    let mut progress = Vec::new();
    let report = fs
        .sync(&source, &target, SyncOptions::default(), |v| {
            progress.push(v);
            true
        })
        .await?;
    assert_eq!(
        report,
        SyncReport {
            files_transferred: 1,
            files_skipped: 0,
            bytes_transferred: 7,
        }
    );
    assert_eq!(progress.last().copied(), Some(1.0));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("report.csv"))?,
        "a,b,c\n\n"
    );

    mock.reset_requests();
    let report = fs
        .sync(&source, &target, SyncOptions::default(), |_| true)
        .await?;
    assert_eq!(report.files_skipped, 1);
    assert!(mock.requests().is_empty());
    Ok(())
}
