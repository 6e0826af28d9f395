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

use log::debug;
use s3vfs_core::time::DateTime;
use std::collections::HashMap;
use std::sync::RwLock;

/// Stat of an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime: Option<DateTime>,
    /// Content hash reported by the service, without quotes.
    pub etag: Option<String>,
    pub storage_class: Option<String>,
}

/// Stat of a directory, explicit or implied by a key prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirStat {
    pub mtime: Option<DateTime>,
}

/// What lives at a path.
///
/// Object stores allow an object `a` next to keys under `a/`, so a path can
/// be a file and a directory at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stat {
    File(FileStat),
    Directory(DirStat),
    Ambiguous { file: FileStat, dir: DirStat },
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        matches!(self, Stat::Directory(_) | Stat::Ambiguous { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Stat::File(_) | Stat::Ambiguous { .. })
    }

    /// The file side of this stat, if any.
    pub fn file(&self) -> Option<&FileStat> {
        match self {
            Stat::File(f) | Stat::Ambiguous { file: f, .. } => Some(f),
            Stat::Directory(_) => None,
        }
    }

    /// Size of the file side, 0 for directories.
    pub fn size(&self) -> u64 {
        self.file().map(|f| f.size).unwrap_or_default()
    }

    pub fn mtime(&self) -> Option<DateTime> {
        match self {
            Stat::File(f) | Stat::Ambiguous { file: f, .. } => f.mtime,
            Stat::Directory(d) => d.mtime,
        }
    }

    /// Merge the stat of the other side of a path.
    pub fn merge(self, other: Stat) -> Stat {
        match (self, other) {
            (Stat::File(file), Stat::Directory(dir)) | (Stat::Directory(dir), Stat::File(file)) => {
                Stat::Ambiguous { file, dir }
            }
            (Stat::Ambiguous { file, .. }, Stat::Directory(dir))
            | (Stat::Directory(dir), Stat::Ambiguous { file, .. }) => Stat::Ambiguous { file, dir },
            (Stat::Ambiguous { dir, .. }, Stat::File(file))
            | (Stat::File(file), Stat::Ambiguous { dir, .. }) => Stat::Ambiguous { file, dir },
            (_, other) => other,
        }
    }
}

/// An entry of a directory listing, `name` is relative to the listed directory.
///
/// A lone `.` entry marks a directory that exists but has no children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub stat: Stat,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, stat: Stat) -> Self {
        Self {
            name: name.into(),
            stat,
        }
    }

    /// The entry marking an existing empty directory.
    pub fn current_dir() -> Self {
        Self::new(".", Stat::Directory(DirStat::default()))
    }

    pub fn is_current_dir(&self) -> bool {
        self.name == "."
    }
}

/// Result of a cache-only lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(Stat),
    /// The path is known not to exist.
    NotFound,
    /// Nothing is known, the network must be asked.
    Miss,
}

#[derive(Debug, Clone)]
enum Entry {
    Found(Stat),
    NotFound,
}

#[derive(Debug, Default)]
struct Inner {
    stats: HashMap<String, Entry>,
    listings: HashMap<String, Vec<DirEntry>>,
}

/// StatCache memoizes stats and complete directory listings per path.
///
/// Entries never expire, they are dropped by the invalidation entry points
/// only.
#[derive(Debug, Default)]
pub struct StatCache {
    inner: RwLock<Inner>,
}

/// Normalize a path into a cache key: no leading or trailing `/`.
pub fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// Parent of a normalized path, `None` for a bucket.
fn parent(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(parent(path), |p| parent(p))
}

fn child(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

impl StatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look a path up without any network access.
    ///
    /// A cached listing of the parent directory answers for its children,
    /// including the negative answer.
    pub fn get(&self, path: &str) -> CacheLookup {
        let path = normalize(path);
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());

        match inner.stats.get(path) {
            Some(Entry::Found(stat)) => return CacheLookup::Hit(stat.clone()),
            Some(Entry::NotFound) => return CacheLookup::NotFound,
            None => {}
        }

        let Some((dir, name)) = path.rsplit_once('/') else {
            return CacheLookup::Miss;
        };
        match inner.listings.get(dir) {
            Some(entries) => match entries.iter().find(|e| e.name == name) {
                Some(entry) => CacheLookup::Hit(entry.stat.clone()),
                None => CacheLookup::NotFound,
            },
            None => CacheLookup::Miss,
        }
    }

    pub fn put(&self, path: &str, stat: Stat) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .stats
            .insert(normalize(path).to_string(), Entry::Found(stat));
    }

    pub fn put_not_found(&self, path: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .stats
            .insert(normalize(path).to_string(), Entry::NotFound);
    }

    /// Cached complete listing of a directory.
    pub fn listing(&self, path: &str) -> Option<Vec<DirEntry>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.listings.get(normalize(path)).cloned()
    }

    /// Store the complete listing of a directory.
    ///
    /// Every child gets its own stat entry and a non-empty listing records
    /// the directory itself as existing.
    pub fn put_listing(&self, path: &str, entries: Vec<DirEntry>) {
        let path = normalize(path);
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        for entry in entries.iter().filter(|e| !e.is_current_dir()) {
            inner
                .stats
                .insert(child(path, &entry.name), Entry::Found(entry.stat.clone()));
        }
        if !entries.is_empty() {
            let dir = Stat::Directory(DirStat::default());
            let stat = match inner.stats.remove(path) {
                Some(Entry::Found(existing)) => existing.merge(dir),
                _ => dir,
            };
            inner.stats.insert(path.to_string(), Entry::Found(stat));
        }
        inner.listings.insert(path.to_string(), entries);
    }

    /// Drop everything known about `path` and the ancestor state that
    /// would have described it.
    pub fn invalidate(&self, path: &str) {
        let path = normalize(path);
        debug!("invalidating cache of {path}");

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.stats.remove(path);
        inner.listings.remove(path);
        for ancestor in ancestors(path) {
            inner.listings.remove(ancestor);
            if matches!(inner.stats.get(ancestor), Some(Entry::NotFound)) {
                inner.stats.remove(ancestor);
            }
        }
    }

    /// Like [`StatCache::invalidate`], also dropping every descendant.
    pub fn invalidate_subtree(&self, path: &str) {
        self.invalidate(path);

        let path = normalize(path);
        let prefix = format!("{path}/");
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.stats.retain(|k, _| !k.starts_with(&prefix));
        inner.listings.retain(|k, _| !k.starts_with(&prefix));
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.stats.clear();
        inner.listings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn file(size: u64) -> Stat {
        Stat::File(FileStat {
            size,
            ..Default::default()
        })
    }

    fn dir() -> Stat {
        Stat::Directory(DirStat::default())
    }

    #[test]
    fn test_listing_answers_children() {
        let cache = StatCache::new();
        cache.put_listing(
            "bucket/dir",
            vec![DirEntry::new("a.txt", file(3)), DirEntry::new("sub", dir())],
        );

        assert_eq!(cache.get("bucket/dir/a.txt"), CacheLookup::Hit(file(3)));
        assert_eq!(cache.get("bucket/dir/sub/"), CacheLookup::Hit(dir()));
        assert_eq!(cache.get("bucket/dir/missing"), CacheLookup::NotFound);
        assert_eq!(cache.get("bucket/dir"), CacheLookup::Hit(dir()));
        assert_eq!(cache.get("bucket/other"), CacheLookup::Miss);
    }

    #[test]
    fn test_empty_directory_marker() {
        let cache = StatCache::new();
        cache.put_listing("bucket/empty", vec![DirEntry::current_dir()]);

        assert_eq!(cache.get("bucket/empty"), CacheLookup::Hit(dir()));
        assert_eq!(cache.get("bucket/empty/x"), CacheLookup::NotFound);

        // Nothing listed: the directory is not known to exist.
        cache.put_listing("bucket/gone", vec![]);
        assert_eq!(cache.get("bucket/gone"), CacheLookup::Miss);
    }

    #[test]
    fn test_listing_over_file_is_ambiguous() {
        let cache = StatCache::new();
        cache.put("bucket/a", file(1));
        cache.put_listing("bucket/a", vec![DirEntry::new("b", file(2))]);

        match cache.get("bucket/a") {
            CacheLookup::Hit(stat) => {
                assert!(stat.is_file());
                assert!(stat.is_dir());
                assert_eq!(stat.size(), 1);
            }
            v => panic!("unexpected lookup {v:?}"),
        }
    }

    #[test]
    fn test_invalidate_drops_ancestor_listings() {
        let cache = StatCache::new();
        cache.put_listing("bucket", vec![DirEntry::new("dir", dir())]);
        cache.put_listing("bucket/dir", vec![DirEntry::new("a.txt", file(3))]);
        cache.put_not_found("bucket/dir/new");
        cache.put_not_found("bucket/unrelated");

        cache.invalidate("bucket/dir/new");

        assert_eq!(cache.get("bucket/dir/new"), CacheLookup::Miss);
        assert_eq!(cache.listing("bucket/dir"), None);
        assert_eq!(cache.listing("bucket"), None);
        // Stats of siblings survive.
        assert_eq!(cache.get("bucket/dir/a.txt"), CacheLookup::Hit(file(3)));
        assert_eq!(cache.get("bucket/unrelated"), CacheLookup::NotFound);
    }

    #[test]
    fn test_invalidate_drops_negative_ancestors() {
        let cache = StatCache::new();
        cache.put_not_found("bucket/dir");
        cache.invalidate("bucket/dir/a.txt");
        assert_eq!(cache.get("bucket/dir"), CacheLookup::Miss);
    }

    #[test]
    fn test_invalidate_subtree() {
        let cache = StatCache::new();
        cache.put_listing("bucket/dir", vec![DirEntry::new("sub", dir())]);
        cache.put_listing("bucket/dir/sub", vec![DirEntry::new("a", file(1))]);
        cache.put("bucket/dirx", file(1));

        cache.invalidate_subtree("bucket/dir");

        assert_eq!(cache.get("bucket/dir/sub/a"), CacheLookup::Miss);
        assert_eq!(cache.listing("bucket/dir/sub"), None);
        assert_eq!(cache.get("bucket/dirx"), CacheLookup::Hit(file(1)));
    }

    #[test]
    fn test_clear() {
        let cache = StatCache::new();
        cache.put("bucket/a", file(1));
        cache.clear();
        assert_eq!(cache.get("bucket/a"), CacheLookup::Miss);
    }
}
