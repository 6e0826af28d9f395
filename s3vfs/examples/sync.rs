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

//! Sync a local directory into a bucket, skipping files with the same
//! content.
//!
//! ```shell
//! cargo run --example sync -- ./data my-bucket/backup/
//! ```

use s3vfs::{Result, SyncLocation, SyncOptions, SyncStrategy};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [source, target] = args.as_slice() else {
        eprintln!("usage: sync <local dir> <bucket/prefix>");
        std::process::exit(2);
    };

    let fs = s3vfs::default_fs();
    let options = SyncOptions {
        strategy: SyncStrategy::ETag,
        ..Default::default()
    };
    let report = fs
        .sync(
            &SyncLocation::Local(PathBuf::from(source)),
            &SyncLocation::Remote(target.clone()),
            options,
            |progress| {
                eprint!("\r{:>5.1}%", progress * 100.0);
                true
            },
        )
        .await?;
    eprintln!();
    println!(
        "transferred {} files ({} bytes), skipped {}",
        report.files_transferred, report.bytes_transferred, report.files_skipped
    );
    Ok(())
}
