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

//! Tokio-based file reading implementation for s3vfs.
//!
//! This crate provides `TokioFileRead`, an async file reader that implements
//! the `FileRead` trait from `s3vfs_core` using Tokio's file system operations.
//! s3vfs reads shared credential files, config files and web identity tokens
//! through it.
//!
//! ## Example
//!
//! ```no_run
//! use s3vfs_core::{Context, OsEnv};
//! use s3vfs_file_read_tokio::TokioFileRead;
//!
//! #[tokio::main]
//! async fn main() {
//!     let ctx = Context::new()
//!         .with_file_read(TokioFileRead)
//!         .with_env(OsEnv);
//!
//!     match ctx.file_read("/home/alice/.aws/credentials").await {
//!         Ok(content) => println!("Read {} bytes", content.len()),
//!         Err(e) => eprintln!("Failed to read file: {}", e),
//!     }
//! }
//! ```

use async_trait::async_trait;
use s3vfs_core::{Error, FileRead, Result};

/// Tokio-based implementation of the `FileRead` trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileRead;

#[async_trait]
impl FileRead for TokioFileRead {
    async fn file_read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| {
            let err: Error = e.into();
            err.with_context(format!("path: {path}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3vfs_core::{Context, ErrorKind};

    #[tokio::test]
    async fn test_read_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("credentials");
        tokio::fs::write(&path, b"[default]\naws_access_key_id = foo\n").await?;

        let ctx = Context::new().with_file_read(TokioFileRead);
        let content = ctx.file_read_as_string(&path.to_string_lossy()).await?;
        assert!(content.starts_with("[default]"));
        Ok(())
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let ctx = Context::new().with_file_read(TokioFileRead);
        let err = ctx
            .file_read("/this/file/does/not/exist")
            .await
            .expect_err("missing file must fail");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
