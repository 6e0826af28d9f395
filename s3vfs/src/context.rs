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

use s3vfs_core::{Context, OsEnv};
use s3vfs_file_read_tokio::TokioFileRead;
use s3vfs_http_send_reqwest::ReqwestHttpSend;
use s3vfs_s3::S3FileSystem;

/// Create a context with tokio file reading, a reqwest client and the
/// process environment.
pub fn default_context() -> Context {
    Context::new()
        .with_file_read(TokioFileRead)
        .with_http_send(ReqwestHttpSend::default())
        .with_env(OsEnv)
}

/// Create a file system over [`default_context`].
///
/// # Example
///
/// ```no_run
/// # #[tokio::main]
/// # async fn main() -> s3vfs::Result<()> {
/// let fs = s3vfs::default_fs();
/// fs.set_option("AWS_REGION", "eu-west-1");
///
/// let stat = fs.stat("my-bucket/data.csv").await?;
/// println!("size: {}", stat.size());
/// # Ok(())
/// # }
/// ```
pub fn default_fs() -> S3FileSystem {
    S3FileSystem::new(default_context())
}
