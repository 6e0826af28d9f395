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
use s3vfs_core::{ErrorKind, Result};
use s3vfs_http_send_mock::MockResponse;
use s3vfs_s3::{DirIter, OpenDirOptions};

async fn collect(mut iter: DirIter) -> Result<Vec<(String, bool)>> {
    let mut names = Vec::new();
    while let Some(entry) = iter.next_entry().await? {
        names.push((entry.name, entry.stat.is_dir()));
    }
    Ok(names)
}

#[tokio::test]
async fn test_open_dir_synthesizes_implicit_directories() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options());
    mock.expect(
        Method::GET,
        "/bucket/?prefix=dir%2F",
        MockResponse::new(200).with_body(concat!(
            "<ListBucketResult>",
            "<Contents><Key>dir/a/b.txt</Key><Size>2</Size></Contents>",
            "<Contents><Key>dir/c.txt</Key><Size>1</Size></Contents>",
            "</ListBucketResult>",
        )),
    );

    let names = collect(fs.open_dir("bucket/dir", OpenDirOptions::default()).await?).await?;
    assert_eq!(
        names,
        vec![
            ("a".to_string(), true),
            ("a/b.txt".to_string(), false),
            ("c.txt".to_string(), false),
        ]
    );

    // Entries seen by the walk are cached.
    assert!(fs.stat("bucket/dir/a").await?.is_dir());
    assert_eq!(fs.stat("bucket/dir/a/b.txt").await?.size(), 2);
    assert_eq!(mock.requests().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_open_dir_with_depth() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options());
    mock.expect(
        Method::GET,
        "/bucket/?delimiter=%2F&prefix=dir%2F",
        MockResponse::new(200).with_body(concat!(
            "<ListBucketResult>",
            "<Contents><Key>dir/c.txt</Key><Size>1</Size></Contents>",
            "<CommonPrefixes><Prefix>dir/a/</Prefix></CommonPrefixes>",
            "</ListBucketResult>",
        )),
    );
    mock.expect(
        Method::GET,
        "/bucket/?delimiter=%2F&prefix=dir%2Fa%2F",
        MockResponse::new(200).with_body(
            "<ListBucketResult><Contents><Key>dir/a/b.txt</Key><Size>2</Size></Contents></ListBucketResult>",
        ),
    );

    let options = OpenDirOptions {
        depth: Some(1),
        prefix: None,
    };
    let names = collect(fs.open_dir("bucket/dir", options).await?).await?;
    assert_eq!(
        names,
        vec![
            ("a".to_string(), true),
            ("a/b.txt".to_string(), false),
            ("c.txt".to_string(), false),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_empty_directory_marker() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options());
    mock.expect(
        Method::GET,
        "/bucket/?delimiter=%2F&prefix=empty%2F",
        MockResponse::new(200).with_body(
            "<ListBucketResult><Contents><Key>empty/</Key><Size>0</Size></Contents></ListBucketResult>",
        ),
    );

    let entries = fs.read_dir("bucket/empty").await?;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].is_current_dir());

    let err = fs.mkdir("bucket/empty").await.expect_err("already exists");
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(mock.requests().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_mkdir_then_read_dir() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options());
    mock.expect(Method::HEAD, "/bucket/new", MockResponse::new(404));
    mock.expect(
        Method::GET,
        "/bucket/?delimiter=%2F&max-keys=100&prefix=new%2F",
        MockResponse::new(200).with_body("<ListBucketResult/>"),
    );
    mock.expect(Method::PUT, "/bucket/new/", MockResponse::new(200));

    fs.mkdir("bucket/new").await?;
    let entries = fs.read_dir("bucket/new").await?;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].is_current_dir());
    assert!(fs.stat("bucket/new").await?.is_dir());
    assert_eq!(mock.requests().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_read_dir_follows_markers() -> Result<()> {
    let (fs, mock) = mock_fs(mock_options());
    mock.expect(
        Method::GET,
        "/bucket/?delimiter=%2F&prefix=dir%2F",
        MockResponse::new(200).with_body(concat!(
            "<ListBucketResult><IsTruncated>true</IsTruncated><NextMarker>dir/b</NextMarker>",
            "<Contents><Key>dir/a</Key><Size>1</Size></Contents>",
            "<Contents><Key>dir/b</Key><Size>1</Size></Contents>",
            "</ListBucketResult>",
        )),
    );
    mock.expect(
        Method::GET,
        "/bucket/?delimiter=%2F&marker=dir%2Fb&prefix=dir%2F",
        MockResponse::new(200).with_body(
            "<ListBucketResult><Contents><Key>dir/c</Key><Size>1</Size></Contents></ListBucketResult>",
        ),
    );

    let names: Vec<String> = fs
        .read_dir("bucket/dir")
        .await?
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    // The complete listing answers for missing children too.
    let err = fs.stat("bucket/dir/d").await.expect_err("not listed");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(mock.requests().len(), 2);
    Ok(())
}
