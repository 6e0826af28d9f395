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

//! Access S3 compatible object storage through file system operations.
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> s3vfs::Result<()> {
//! let fs = s3vfs::default_fs();
//!
//! let mut w = fs.open_write("my-bucket/hello.txt").await?;
//! w.write(b"Hello, World!").await?;
//! w.close().await?;
//!
//! for entry in fs.read_dir("my-bucket").await? {
//!     println!("{} {}", entry.name, entry.stat.size());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Configuration comes from `AWS_*` and `S3VFS_*` environment variables,
//! or from [`Options`] given to [`S3FileSystem::with_options`].

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use s3vfs_core::*;
pub use s3vfs_s3::*;

#[cfg(feature = "default-context")]
mod context;
#[cfg(feature = "default-context")]
pub use context::{default_context, default_fs};
