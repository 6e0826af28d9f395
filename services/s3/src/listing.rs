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

use crate::cache::{DirEntry, DirStat, FileStat, Stat};
use crate::config::Config;
use crate::executor::{protocol_error, Executor, RequestDescriptor};
use crate::fs::S3FileSystem;
use http::Method;
use log::debug;
use quick_xml::de;
use s3vfs_core::time::parse_rfc3339;
use s3vfs_core::Result;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct ListBucketResult {
    next_marker: Option<String>,
    is_truncated: bool,
    contents: Vec<ListObject>,
    common_prefixes: Vec<CommonPrefix>,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct ListObject {
    key: String,
    last_modified: String,
    size: u64,
    #[serde(rename = "ETag")]
    etag: String,
    storage_class: Option<String>,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct CommonPrefix {
    prefix: String,
}

/// An object returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub stat: FileStat,
}

/// One page of a listing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    pub prefixes: Vec<String>,
    /// Marker to fetch the next page with, `None` on the last page.
    pub next_marker: Option<String>,
}

/// Strip the quotes S3 puts around etags.
pub fn trim_etag(etag: &str) -> String {
    etag.trim().trim_matches('"').to_string()
}

impl ListPage {
    pub fn parse(body: &[u8]) -> Result<ListPage> {
        let text = std::str::from_utf8(body)
            .map_err(|_| protocol_error("listing is not valid utf-8", body))?;
        let result: ListBucketResult = de::from_str(text)
            .map_err(|e| protocol_error("malformed listing", body).with_context(e))?;

        let objects: Vec<ObjectInfo> = result
            .contents
            .into_iter()
            .map(|o| ObjectInfo {
                stat: FileStat {
                    size: o.size,
                    mtime: parse_rfc3339(&o.last_modified).ok(),
                    etag: Some(trim_etag(&o.etag)).filter(|v| !v.is_empty()),
                    storage_class: o.storage_class,
                },
                key: o.key,
            })
            .collect();
        let prefixes: Vec<String> = result.common_prefixes.into_iter().map(|p| p.prefix).collect();

        // Services without NextMarker expect the last key as marker.
        let next_marker = if result.is_truncated {
            result.next_marker.filter(|v| !v.is_empty()).or_else(|| {
                let last_key = objects.last().map(|o| o.key.clone());
                let last_prefix = prefixes.last().cloned();
                last_key.max(last_prefix)
            })
        } else {
            None
        };

        Ok(ListPage {
            objects,
            prefixes,
            next_marker,
        })
    }
}

/// Fetch one page of objects under `prefix`.
pub async fn list_page(
    exec: &Executor<'_>,
    bucket: &str,
    prefix: &str,
    delimiter: bool,
    marker: Option<&str>,
    max_keys: Option<usize>,
) -> Result<ListPage> {
    let mut desc = RequestDescriptor::new(Method::GET, bucket, "").with_query("prefix", prefix);
    if delimiter {
        desc = desc.with_query("delimiter", "/");
    }
    if let Some(marker) = marker {
        desc = desc.with_query("marker", marker);
    }
    if let Some(max_keys) = max_keys {
        desc = desc.with_query("max-keys", max_keys.to_string());
    }

    let resp = exec.send(&desc).await?;
    ListPage::parse(resp.body())
}

/// Fetch every page of objects under `prefix`.
pub async fn list_all(
    exec: &Executor<'_>,
    bucket: &str,
    prefix: &str,
    delimiter: bool,
) -> Result<ListPage> {
    let mut all = ListPage::default();
    let mut marker: Option<String> = None;
    loop {
        let page = list_page(exec, bucket, prefix, delimiter, marker.as_deref(), None).await?;
        debug!(
            "listed {} objects and {} prefixes under {bucket}/{prefix}",
            page.objects.len(),
            page.prefixes.len()
        );
        all.objects.extend(page.objects);
        all.prefixes.extend(page.prefixes);
        match page.next_marker {
            // A marker that doesn't move would loop forever.
            Some(next) if marker.as_deref() != Some(next.as_str()) => marker = Some(next),
            _ => return Ok(all),
        }
    }
}

/// Build the entries of one directory level out of a delimited listing of
/// `prefix`.
///
/// Returns an empty list if nothing lives under the prefix, a lone `.` entry
/// if only the directory marker does.
pub fn level_entries(prefix: &str, page: &ListPage, config: &Config) -> Vec<DirEntry> {
    let mut entries: BTreeMap<String, Stat> = BTreeMap::new();
    let mut exists = false;

    for object in &page.objects {
        let Some(name) = object.key.strip_prefix(prefix) else {
            continue;
        };
        exists = true;
        if name.is_empty() {
            continue;
        }
        if config.is_ignored_storage_class(object.stat.storage_class.as_deref()) {
            continue;
        }
        let stat = match name.strip_suffix('/') {
            Some(dir) if !dir.contains('/') => {
                insert(&mut entries, dir, Stat::Directory(dir_stat(&object.stat)));
                continue;
            }
            _ => Stat::File(object.stat.clone()),
        };
        insert(&mut entries, name, stat);
    }

    for p in &page.prefixes {
        let Some(name) = p.strip_prefix(prefix) else {
            continue;
        };
        exists = true;
        let name = name.trim_end_matches('/');
        if !name.is_empty() {
            insert(&mut entries, name, Stat::Directory(DirStat::default()));
        }
    }

    if entries.is_empty() {
        return if exists {
            vec![DirEntry::current_dir()]
        } else {
            Vec::new()
        };
    }
    entries
        .into_iter()
        .map(|(name, stat)| DirEntry::new(name, stat))
        .collect()
}

/// Build a recursive listing out of a flat listing of `prefix`.
///
/// Every intermediate directory implied by a key is reported once, before
/// its content.
pub fn flat_entries(prefix: &str, page: &ListPage, config: &Config) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    let mut dirs: BTreeSet<String> = BTreeSet::new();

    for object in &page.objects {
        let Some(name) = object.key.strip_prefix(prefix) else {
            continue;
        };
        if config.is_ignored_storage_class(object.stat.storage_class.as_deref()) {
            continue;
        }

        let (parents, file) = match name.strip_suffix('/') {
            Some(dir) => (dir, None),
            None => match name.rsplit_once('/') {
                Some((parents, _)) => (parents, Some(name)),
                None => ("", Some(name)),
            },
        };

        let mut end = 0;
        while end < parents.len() {
            end = parents[end..]
                .find('/')
                .map(|i| end + i)
                .unwrap_or(parents.len());
            let dir = &parents[..end];
            if dirs.insert(dir.to_string()) {
                let stat = if dir == parents && file.is_none() {
                    dir_stat(&object.stat)
                } else {
                    DirStat::default()
                };
                entries.push(DirEntry::new(dir, Stat::Directory(stat)));
            }
            end += 1;
        }

        if let Some(file) = file.filter(|v| !v.is_empty()) {
            entries.push(DirEntry::new(file, Stat::File(object.stat.clone())));
        }
    }
    entries
}

fn dir_stat(marker: &FileStat) -> DirStat {
    DirStat {
        mtime: marker.mtime,
    }
}

fn insert(entries: &mut BTreeMap<String, Stat>, name: &str, stat: Stat) {
    let stat = match entries.remove(name) {
        Some(existing) => existing.merge(stat),
        None => stat,
    };
    entries.insert(name.to_string(), stat);
}

/// Options of [`S3FileSystem::open_dir`].
#[derive(Debug, Clone, Default)]
pub struct OpenDirOptions {
    /// Levels to descend below the opened directory, `None` for unlimited.
    pub depth: Option<usize>,
    /// Only yield top level entries whose name starts with it.
    pub prefix: Option<String>,
}

/// Iterator over the entries below a directory.
///
/// Names are relative to the opened directory, using `/` between levels.
#[derive(Debug)]
pub struct DirIter {
    fs: S3FileSystem,
    root: String,
    options: OpenDirOptions,
    stack: Vec<(String, usize, VecDeque<DirEntry>)>,
}

impl DirIter {
    pub(crate) fn new(
        fs: S3FileSystem,
        root: String,
        options: OpenDirOptions,
        entries: Vec<DirEntry>,
    ) -> Self {
        Self {
            fs,
            root,
            options,
            stack: vec![(String::new(), 0, entries.into())],
        }
    }

    /// Next entry, `None` once the walk is done.
    pub async fn next_entry(&mut self) -> Result<Option<DirEntry>> {
        loop {
            let Some((dir, level, entries)) = self.stack.last_mut() else {
                return Ok(None);
            };
            let Some(entry) = entries.pop_front() else {
                self.stack.pop();
                continue;
            };
            if entry.is_current_dir() {
                continue;
            }
            // Unlimited walks come out of a single flat listing.
            if self.options.depth.is_none() {
                return Ok(Some(entry));
            }

            let (dir, level) = (dir.clone(), *level);
            if level == 0 {
                if let Some(prefix) = &self.options.prefix {
                    if !entry.name.starts_with(prefix.as_str()) {
                        continue;
                    }
                }
            }

            let name = if dir.is_empty() {
                entry.name.clone()
            } else {
                format!("{dir}/{}", entry.name)
            };
            if entry.stat.is_dir() && self.options.depth.is_some_and(|depth| level < depth) {
                let children = self.fs.read_dir(&format!("{}/{name}", self.root)).await?;
                self.stack.push((name.clone(), level + 1, children.into()));
            }
            return Ok(Some(DirEntry::new(name, entry.stat)));
        }
    }
}
