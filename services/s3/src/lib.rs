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

//! File system operations over S3 compatible object storage.
//!
//! Paths look like `bucket/key`. Directories are key prefixes ending with
//! `/`, either explicit (an empty marker object) or implied by the keys
//! below them.
//!
//! ```no_run
//! use s3vfs_core::Context;
//! use s3vfs_s3::S3FileSystem;
//!
//! # async fn example(ctx: Context) -> s3vfs_core::Result<()> {
//! let fs = S3FileSystem::new(ctx);
//! let mut r = fs.open_read("bucket/hello.txt").await?;
//! let content = r.read(4096).await?;
//! # Ok(())
//! # }
//! ```

mod cache;
pub use cache::CacheLookup;
pub use cache::DirEntry;
pub use cache::DirStat;
pub use cache::FileStat;
pub use cache::Stat;
pub use cache::StatCache;

mod config;
pub use config::Backoff;
pub use config::Config;
pub use config::CredentialConfig;
pub use config::Options;

pub mod constants;

mod credential;
pub use credential::Credential;
pub use credential::CredentialStore;

mod delete;

mod endpoint;
pub use endpoint::Endpoint;
pub use endpoint::EndpointRegistry;

mod error;
pub use error::ServiceError;

mod executor;
pub use executor::classify;
pub use executor::Executor;
pub use executor::Outcome;
pub use executor::RequestDescriptor;

mod fs;
pub use fs::S3FileSystem;

mod listing;
pub use listing::DirIter;
pub use listing::OpenDirOptions;

mod metadata;
pub use metadata::HEADERS_DOMAIN;
pub use metadata::TAGS_DOMAIN;

mod provide_credential;
pub use provide_credential::*;

mod reader;
pub use reader::ReadHandle;
pub use reader::ReadOptions;

mod rename;

mod sign_request;
pub use sign_request::RequestSigner;

mod sync;
pub use sync::SyncLocation;
pub use sync::SyncOptions;
pub use sync::SyncReport;
pub use sync::SyncStrategy;

mod writer;
pub use writer::TempFileHandle;
pub use writer::WriteHandle;
pub use writer::WriteOptions;

#[cfg(test)]
mod test_utils;
