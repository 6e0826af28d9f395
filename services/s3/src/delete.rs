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

use crate::constants::S3_XMLNS;
use crate::executor::{protocol_error, RequestDescriptor};
use crate::fs::{dir_prefix, not_found, split_path, S3FileSystem, Session};
use crate::listing::list_all;
use http::Method;
use log::{debug, warn};
use quick_xml::de;
use quick_xml::escape::escape;
use s3vfs_core::hash::base64_md5;
use s3vfs_core::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct DeleteResult {
    deleted: Vec<DeletedObject>,
    error: Vec<DeleteError>,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct DeletedObject {
    key: String,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct DeleteError {
    key: String,
    code: String,
    message: String,
}

/// Body of a multi-object delete request.
fn delete_body(keys: &[String]) -> String {
    let mut body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Delete xmlns=\"{S3_XMLNS}\">\n"
    );
    for key in keys {
        body.push_str("  <Object>\n    <Key>");
        body.push_str(&escape(key.as_str()));
        body.push_str("</Key>\n  </Object>\n");
    }
    body.push_str("</Delete>\n");
    body
}

fn failed_error(failed: &[String], total: usize) -> Error {
    Error::unexpected(format!(
        "failed to delete {} of {total} objects: {}",
        failed.len(),
        failed.join(", ")
    ))
}

impl S3FileSystem {
    /// Delete keys of a bucket through multi-object delete calls, returning
    /// the keys that were not deleted.
    async fn delete_keys(&self, session: &Session, keys: &[String]) -> Result<Vec<String>> {
        let exec = self.executor(session);
        let mut failed = Vec::new();

        for batch in keys.chunks(session.config.unlink_batch_size.max(1)) {
            let body = delete_body(batch);
            let desc = RequestDescriptor::new(Method::POST, &session.bucket, "")
                .with_query("delete", "")
                .with_header("content-md5", &base64_md5(body.as_bytes()))?
                .with_body(body);
            let resp = exec.send(&desc).await?;

            let result: DeleteResult = std::str::from_utf8(resp.body())
                .ok()
                .and_then(|body| de::from_str(body).ok())
                .ok_or_else(|| protocol_error("malformed DeleteResult", resp.body()))?;

            for err in &result.error {
                warn!(
                    "failed to delete {}/{}: {}: {}",
                    session.bucket, err.key, err.code, err.message
                );
            }
            let deleted: HashSet<&str> = result.deleted.iter().map(|d| d.key.as_str()).collect();
            failed.extend(
                batch
                    .iter()
                    .filter(|key| !deleted.contains(key.as_str()))
                    .cloned(),
            );
            debug!(
                "deleted {} of {} keys in bucket {}",
                deleted.len(),
                batch.len(),
                session.bucket
            );
        }
        Ok(failed)
    }

    /// Delete a file.
    pub async fn unlink(&self, path: &str) -> Result<()> {
        let stat = self.stat(path).await?;
        if !stat.is_file() {
            return Err(Error::request_invalid(format!(
                "{path} is a directory, not a file"
            )));
        }

        let session = self.session(path).await?;
        let desc = RequestDescriptor::new(Method::DELETE, &session.bucket, &session.key);
        self.executor(&session).send(&desc).await?;
        self.cache().invalidate(&session.path);
        Ok(())
    }

    /// Delete several files, in as few requests as the batch size allows.
    ///
    /// Succeeds only if every file was deleted.
    pub async fn unlink_batch(&self, paths: &[&str]) -> Result<()> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for path in paths {
            let (bucket, key) = split_path(path)?;
            if key.is_empty() {
                return Err(Error::request_invalid(format!("{path} is a bucket")));
            }
            match groups.iter_mut().find(|(b, _)| b == bucket) {
                Some((_, keys)) => keys.push(key.to_string()),
                None => groups.push((bucket.to_string(), vec![key.to_string()])),
            }
        }

        let mut failed = Vec::new();
        for (bucket, keys) in groups {
            let session = self.session(&bucket).await?;
            let result = self.delete_keys(&session, &keys).await;
            for key in &keys {
                self.cache().invalidate(&format!("{bucket}/{key}"));
            }
            failed.extend(result?.into_iter().map(|key| format!("{bucket}/{key}")));
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(failed_error(&failed, paths.len()))
        }
    }

    /// Remove an empty directory.
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        let session = self.session(path).await?;
        if session.key.is_empty() {
            return Err(Error::request_invalid("removing buckets is not supported"));
        }

        let entries = self.read_dir(&session.path).await?;
        if entries.iter().any(|e| !e.is_current_dir()) {
            return Err(Error::conflict(format!("{} is not empty", session.path)));
        }

        let desc =
            RequestDescriptor::new(Method::DELETE, &session.bucket, &dir_prefix(&session.key));
        self.executor(&session).send(&desc).await?;
        self.cache().invalidate_subtree(&session.path);
        Ok(())
    }

    /// Remove a directory and everything below it.
    pub async fn rmdir_recursive(&self, path: &str) -> Result<()> {
        let session = self.session(path).await?;
        if session.key.is_empty() {
            return Err(Error::request_invalid("removing buckets is not supported"));
        }

        let prefix = dir_prefix(&session.key);
        let page = list_all(&self.executor(&session), &session.bucket, &prefix, false).await?;
        let keys: Vec<String> = page.objects.into_iter().map(|o| o.key).collect();
        if keys.is_empty() {
            return Err(not_found(&session.path));
        }

        debug!("removing {} keys under {}", keys.len(), session.path);
        let result = self.delete_all(&session, &keys).await;
        self.cache().invalidate_subtree(&session.path);
        result
    }

    /// Delete raw keys of a bucket, failing unless every key is deleted.
    pub(crate) async fn delete_all(&self, session: &Session, keys: &[String]) -> Result<()> {
        let failed = self.delete_keys(session, keys).await?;
        if failed.is_empty() {
            Ok(())
        } else {
            Err(failed_error(&failed, keys.len()))
        }
    }
}
