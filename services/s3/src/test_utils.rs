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

use crate::config::Options;
use crate::constants::*;
use crate::S3FileSystem;
use s3vfs_core::Context;
use s3vfs_http_send_mock::MockHttpSend;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Options pointing at a local path style endpoint with a fixed signing time.
pub fn test_options() -> Options {
    Options::new()
        .with(AWS_S3_ENDPOINT, "127.0.0.1:8080")
        .with(AWS_HTTPS, "NO")
        .with(AWS_VIRTUAL_HOSTING, "NO")
        .with(AWS_REGION, "us-east-1")
        .with(AWS_ACCESS_KEY_ID, "AWS_ACCESS_KEY_ID")
        .with(AWS_SECRET_ACCESS_KEY, "AWS_SECRET_ACCESS_KEY")
        .with(S3VFS_TIMESTAMP, "20150101T000000Z")
        .with(S3VFS_RETRY_DELAY, "0")
}

pub fn mock_fs(options: Options) -> (S3FileSystem, MockHttpSend) {
    init_logger();
    let mock = MockHttpSend::new();
    let ctx = Context::new().with_http_send(mock.clone());
    (S3FileSystem::with_options(ctx, options), mock)
}
