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

//! Print every entry below a `bucket/prefix` path.
//!
//! ```shell
//! cargo run --example walk -- my-bucket/some/dir
//! ```

use s3vfs::{OpenDirOptions, Result};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: walk <bucket/prefix>");
        std::process::exit(2);
    };

    let fs = s3vfs::default_fs();
    let mut iter = fs.open_dir(&path, OpenDirOptions::default()).await?;
    while let Some(entry) = iter.next_entry().await? {
        if entry.stat.is_dir() {
            println!("{}/", entry.name);
        } else {
            println!("{}\t{}", entry.name, entry.stat.size());
        }
    }
    Ok(())
}
