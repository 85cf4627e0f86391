//! Snapshot Store - artifacts on disk, keyed by (site, path, time)
//!
//! ```text
//! {root}/{host}/{time}/{segment}/screenshot.png
//!                               /tree.json
//!                               /info.json
//! {root}/latest/manifest.json   url → latest time
//! {root}/latest/cache.json      time → path name → [url, ...]
//! {root}/diff/{label}/{segment}.png (+ .html)
//! ```
//!
//! Artifacts are written before the index files that point at them. Index
//! updates are read-modify-write, so they run under one async mutex shared by
//! every clone of the store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use dom::{DomError, DomRect, Side, SnapshotPayload, SnapshotSerializer, SnapshotTree, Timestamp};

use crate::error::{MonitorError, Result};

/// Schema version of `info.json`, `manifest.json` and `cache.json`
pub const INDEX_SCHEMA_VERSION: u32 = 1;

pub const SCREENSHOT_FILE: &str = "screenshot.png";
pub const TREE_FILE: &str = "tree.json";
pub const INFO_FILE: &str = "info.json";

const LATEST_DIR: &str = "latest";
const MANIFEST_FILE: &str = "manifest.json";
const CACHE_FILE: &str = "cache.json";
const DIFF_DIR: &str = "diff";

/// `host[:port]` of a URL
pub fn host_label(url: &Url) -> String {
    let host = url.host_str().unwrap_or("local");
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// File-system-safe form of a URL path: `/a/b` → `_a_b`
pub fn path_segment(path: &str) -> String {
    if path.is_empty() {
        return "_".to_string();
    }
    path.chars()
        .map(|c| match c {
            '/' => '_',
            '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c => c,
        })
        .collect()
}

pub fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| MonitorError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Contents of `info.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureInfo {
    pub version: u32,
    pub time: Timestamp,
    pub url: String,
    pub rect: DomRect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    entries: BTreeMap<String, Timestamp>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: INDEX_SCHEMA_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PairingCache {
    version: u32,
    entries: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// time → URLs of a batch, in the order the caller listed them
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    batches: BTreeMap<String, Vec<String>>,
}

impl Default for PairingCache {
    fn default() -> Self {
        Self {
            version: INDEX_SCHEMA_VERSION,
            entries: BTreeMap::new(),
            batches: BTreeMap::new(),
        }
    }
}

impl PairingCache {
    /// Record `url` under its path at `time`.
    ///
    /// URLs of a reserved batch are kept in batch order whatever order their
    /// saves finish in; other URLs are appended.
    fn insert(&mut self, time: Timestamp, path_name: &str, url: &str) {
        let key = time.to_string();
        let batch = self.batches.get(&key).cloned().unwrap_or_default();
        let rank = |u: &str| batch.iter().position(|b| b == u);

        let urls = self
            .entries
            .entry(key)
            .or_default()
            .entry(path_name.to_string())
            .or_default();
        if urls.iter().any(|u| u == url) {
            return;
        }
        let at = rank(url).and_then(|own| {
            urls.iter()
                .position(|u| rank(u).is_some_and(|other| other > own))
        });
        urls.insert(at.unwrap_or(urls.len()), url.to_string());
    }
}

/// Most recent capture of a URL
#[derive(Debug, Clone, PartialEq)]
pub struct LatestSnapshot {
    pub time: Timestamp,
    pub tree: SnapshotTree,
}

/// Where a `save` put things
#[derive(Debug, Clone, PartialEq)]
pub struct SavedCapture {
    pub time: Timestamp,
    pub dir: PathBuf,
    pub screenshot: PathBuf,
}

#[derive(Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    /// Single writer for the index files
    writer: Arc<Mutex<()>>,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{host}/{time}/{segment}`
    pub fn artifact_dir(&self, url: &str, time: Timestamp) -> Result<PathBuf> {
        let parsed = parse_url(url)?;
        Ok(self
            .root
            .join(host_label(&parsed))
            .join(time.to_string())
            .join(path_segment(parsed.path())))
    }

    /// `{root}/diff/{label}/{segment}.png`
    pub fn overlay_path(&self, label: &str, segment: &str) -> PathBuf {
        self.root
            .join(DIFF_DIR)
            .join(label)
            .join(format!("{}.png", segment))
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(LATEST_DIR).join(MANIFEST_FILE)
    }

    fn cache_path(&self) -> PathBuf {
        self.root.join(LATEST_DIR).join(CACHE_FILE)
    }

    /// Latest capture of `url`, if the manifest knows one and its tree is on disk
    pub async fn get_latest(&self, url: &str) -> Result<Option<LatestSnapshot>> {
        let manifest: Manifest = read_index(&self.manifest_path()).await?;
        let Some(&time) = manifest.entries.get(url) else {
            return Ok(None);
        };

        match self.get_tree(url, time).await? {
            Some(tree) => Ok(Some(LatestSnapshot { time, tree })),
            None => {
                tracing::warn!(url, time, "Manifest points at a missing tree");
                Ok(None)
            }
        }
    }

    pub async fn get_tree(&self, url: &str, time: Timestamp) -> Result<Option<SnapshotTree>> {
        let path = self.artifact_dir(url, time)?.join(TREE_FILE);
        let Some(json) = read_optional(&path).await? else {
            return Ok(None);
        };
        SnapshotSerializer::new()
            .from_json(&json)
            .map(Some)
            .map_err(|source| MonitorError::MalformedArtifact { path, source })
    }

    pub async fn get_info(&self, url: &str, time: Timestamp) -> Result<Option<CaptureInfo>> {
        let path = self.artifact_dir(url, time)?.join(INFO_FILE);
        let Some(json) = read_optional(&path).await? else {
            return Ok(None);
        };
        parse_artifact(&path, &json).map(Some)
    }

    pub async fn read_screenshot(&self, url: &str, time: Timestamp) -> Result<Vec<u8>> {
        let path = self.artifact_dir(url, time)?.join(SCREENSHOT_FILE);
        tokio::fs::read(&path)
            .await
            .map_err(|e| MonitorError::io(path, e))
    }

    /// Persist one capture and index it.
    ///
    /// Fails with `AlreadyExists`, writing nothing, when `(url, time)` was
    /// captured before. Any other failure removes what was written.
    pub async fn save(
        &self,
        url: &str,
        payload: SnapshotPayload,
        rect: DomRect,
        screenshot: &[u8],
        time: Timestamp,
    ) -> Result<SavedCapture> {
        let parsed = parse_url(url)?;
        let serializer = SnapshotSerializer::new();
        let tree = serializer.decode(payload)?;
        let tree_json = serializer.to_json(&tree)?;

        let dir = self.artifact_dir(url, time)?;
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MonitorError::io(parent, e))?;
        }
        // Claiming the directory is the existence check
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(MonitorError::AlreadyExists {
                    url: url.to_string(),
                    time,
                })
            }
            Err(e) => return Err(MonitorError::io(&dir, e)),
        }

        let screenshot_path = dir.join(SCREENSHOT_FILE);
        let written: Result<()> = async {
            write_file(&screenshot_path, screenshot).await?;
            write_file(&dir.join(TREE_FILE), tree_json.as_bytes()).await?;
            let info = CaptureInfo {
                version: INDEX_SCHEMA_VERSION,
                time,
                url: url.to_string(),
                rect,
            };
            write_file(&dir.join(INFO_FILE), &to_json(&info)?).await?;
            self.index(url, parsed.path(), time).await
        }
        .await;
        // A failed save releases its claim so the capture can be retried
        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                tracing::warn!(dir = %dir.display(), "Failed to remove partial capture: {}", cleanup);
            }
            return Err(e);
        }

        tracing::debug!(url, time, dir = %dir.display(), "Saved capture");
        Ok(SavedCapture {
            time,
            dir,
            screenshot: screenshot_path,
        })
    }

    /// Point the manifest and pairing cache at a written capture.
    ///
    /// Both index files are read before either is written, so a malformed
    /// index leaves the other untouched.
    async fn index(&self, url: &str, path_name: &str, time: Timestamp) -> Result<()> {
        let _guard = self.writer.lock().await;

        let manifest_path = self.manifest_path();
        let cache_path = self.cache_path();
        let mut manifest: Manifest = read_index(&manifest_path).await?;
        let mut cache: PairingCache = read_index(&cache_path).await?;

        let latest = manifest.entries.entry(url.to_string()).or_insert(time);
        *latest = (*latest).max(time);
        cache.insert(time, path_name, url);

        write_atomic(&manifest_path, &to_json(&manifest)?).await?;
        write_atomic(&cache_path, &to_json(&cache)?).await
    }

    /// Remember the caller's order of a batch captured at `time`, so that
    /// `resolve_pair` pairs its URLs in that order
    pub async fn reserve_batch(&self, time: Timestamp, urls: &[String]) -> Result<()> {
        let _guard = self.writer.lock().await;

        let cache_path = self.cache_path();
        let mut cache: PairingCache = read_index(&cache_path).await?;
        let batch = cache.batches.entry(time.to_string()).or_default();
        for url in urls {
            if !batch.contains(url) {
                batch.push(url.clone());
            }
        }
        write_atomic(&cache_path, &to_json(&cache)?).await
    }

    /// The two URLs recorded for `path_name` at `time`, left first
    pub async fn resolve_pair(&self, time: Timestamp, path_name: &str) -> Result<(String, String)> {
        let cache: PairingCache = read_index(&self.cache_path()).await?;
        let urls = cache
            .entries
            .get(&time.to_string())
            .and_then(|paths| paths.get(path_name))
            .map(Vec::as_slice)
            .unwrap_or_default();

        let missing = |side| MonitorError::MissingSnapshot {
            side,
            time,
            path_name: path_name.to_string(),
        };
        match urls {
            [] => Err(missing(Side::Left)),
            [_] => Err(missing(Side::Right)),
            [left, right, ..] => Ok((left.clone(), right.clone())),
        }
    }

    /// Every path name recorded at `time`
    pub async fn paths_at(&self, time: Timestamp) -> Result<Vec<String>> {
        let cache: PairingCache = read_index(&self.cache_path()).await?;
        Ok(cache
            .entries
            .get(&time.to_string())
            .map(|paths| paths.keys().cloned().collect())
            .unwrap_or_default())
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| MonitorError::Dom(DomError::from(e)))
}

fn parse_artifact<T: serde::de::DeserializeOwned>(path: &Path, json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| MonitorError::MalformedArtifact {
        path: path.to_path_buf(),
        source: DomError::from(e),
    })
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MonitorError::io(path, e)),
    }
}

/// Index file, or its empty default when it does not exist yet
async fn read_index<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default + Versioned,
{
    let Some(json) = read_optional(path).await? else {
        return Ok(T::default());
    };
    let index: T = parse_artifact(path, &json)?;
    if index.version() != INDEX_SCHEMA_VERSION {
        return Err(MonitorError::MalformedArtifact {
            path: path.to_path_buf(),
            source: DomError::UnsupportedVersion {
                found: index.version().into(),
                expected: INDEX_SCHEMA_VERSION,
            },
        });
    }
    Ok(index)
}

trait Versioned {
    fn version(&self) -> u32;
}

impl Versioned for Manifest {
    fn version(&self) -> u32 {
        self.version
    }
}

impl Versioned for PairingCache {
    fn version(&self) -> u32 {
        self.version
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| MonitorError::io(path, e))
}

/// Write to a sibling temp file, then rename over `path`
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| MonitorError::io(parent, e))?;
    }
    let tmp = path.with_extension(format!("tmp-{}", Uuid::now_v7()));
    write_file(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(MonitorError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dom::{CaptureMeta, SnapshotNode};

    fn tree(url: &str, time: Timestamp, text: &str) -> SnapshotTree {
        SnapshotTree::new(
            SnapshotNode::new("body").with_child(SnapshotNode::new("p").with_text(text)),
            DomRect::new(0.0, 0.0, 375.0, 600.0),
            CaptureMeta {
                url: url.to_string(),
                timestamp: time,
            },
        )
    }

    async fn save(store: &SnapshotStore, url: &str, time: Timestamp, text: &str) -> Result<SavedCapture> {
        store
            .save(
                url,
                tree(url, time, text).into(),
                DomRect::new(0.0, 0.0, 375.0, 600.0),
                b"png",
                time,
            )
            .await
    }

    #[test]
    fn test_naming() {
        assert_eq!(path_segment("/a/b"), "_a_b");
        assert_eq!(path_segment("/"), "_");
        assert_eq!(path_segment(""), "_");
        assert_eq!(path_segment("/x:y*z"), "_x-y-z");
        let url = Url::parse("http://localhost:8080/home").unwrap();
        assert_eq!(host_label(&url), "localhost:8080");
        let url = Url::parse("https://example.com/home").unwrap();
        assert_eq!(host_label(&url), "example.com");
    }

    #[tokio::test]
    async fn test_latest_missing_then_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let url = "http://example.com/home";

        assert!(store.get_latest(url).await.unwrap().is_none());

        let saved = save(&store, url, 1000, "a").await.unwrap();
        assert_eq!(saved.dir, dir.path().join("example.com").join("1000").join("_home"));
        assert!(saved.screenshot.exists());

        let latest = store.get_latest(url).await.unwrap().unwrap();
        assert_eq!(latest.time, 1000);
        assert_eq!(latest.tree, tree(url, 1000, "a"));

        save(&store, url, 2000, "b").await.unwrap();
        assert_eq!(store.get_latest(url).await.unwrap().unwrap().time, 2000);

        let info = store.get_info(url, 1000).await.unwrap().unwrap();
        assert_eq!(info.version, INDEX_SCHEMA_VERSION);
        assert_eq!(info.url, url);
        assert_eq!(store.read_screenshot(url, 2000).await.unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_already_exists_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let url = "http://example.com/";

        let saved = save(&store, url, 5, "original").await.unwrap();
        let tree_path = saved.dir.join(TREE_FILE);
        let before = std::fs::read(&tree_path).unwrap();
        let manifest_before = std::fs::read(store.manifest_path()).unwrap();

        let err = save(&store, url, 5, "changed").await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(std::fs::read(&tree_path).unwrap(), before);
        assert_eq!(std::fs::read(store.manifest_path()).unwrap(), manifest_before);
    }

    #[tokio::test]
    async fn test_concurrent_saves_keep_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let url = format!("http://site{}.test/page", i % 2);
                    let url = format!("{}{}", url, i);
                    save(&store, &url, 42, "x").await.unwrap();
                    url
                })
            })
            .collect();
        let mut urls = Vec::new();
        for handle in handles {
            urls.push(handle.await.unwrap());
        }

        let manifest: Manifest = read_index(&store.manifest_path()).await.unwrap();
        assert_eq!(manifest.entries.len(), 16);
        for url in &urls {
            assert_eq!(manifest.entries.get(url), Some(&42));
        }
        assert_eq!(store.paths_at(42).await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_resolve_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let err = store.resolve_pair(7, "/home").await.unwrap_err();
        assert_eq!(err.missing_side(), Some(Side::Left));

        save(&store, "http://old.example.com/home", 7, "a").await.unwrap();
        let err = store.resolve_pair(7, "/home").await.unwrap_err();
        assert_eq!(err.missing_side(), Some(Side::Right));

        save(&store, "http://new.example.com/home", 7, "b").await.unwrap();
        let (left, right) = store.resolve_pair(7, "/home").await.unwrap();
        assert_eq!(left, "http://old.example.com/home");
        assert_eq!(right, "http://new.example.com/home");
        assert_eq!(store.paths_at(7).await.unwrap(), vec!["/home".to_string()]);
        assert!(store.paths_at(8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_order_beats_completion_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let old = "http://old.example.com/home";
        let new = "http://new.example.com/home";
        let extra = "http://extra.example.com/home";

        // recorded before the batch, stays in front of it
        save(&store, extra, 7, "x").await.unwrap();
        store
            .reserve_batch(7, &[old.to_string(), new.to_string()])
            .await
            .unwrap();
        save(&store, new, 7, "b").await.unwrap();
        save(&store, old, 7, "a").await.unwrap();

        let cache: PairingCache = read_index(&store.cache_path()).await.unwrap();
        assert_eq!(cache.entries["7"]["/home"], vec![extra, old, new]);

        store
            .reserve_batch(8, &[old.to_string(), new.to_string()])
            .await
            .unwrap();
        save(&store, new, 8, "b").await.unwrap();
        save(&store, old, 8, "a").await.unwrap();
        let (left, right) = store.resolve_pair(8, "/home").await.unwrap();
        assert_eq!((left.as_str(), right.as_str()), (old, new));
    }

    #[tokio::test]
    async fn test_failed_save_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let url = "http://example.com/home";

        std::fs::create_dir_all(dir.path().join(LATEST_DIR)).unwrap();
        std::fs::write(store.manifest_path(), "{ broken").unwrap();

        let err = save(&store, url, 3, "a").await.unwrap_err();
        assert!(matches!(err, MonitorError::MalformedArtifact { .. }));
        assert!(!store.artifact_dir(url, 3).unwrap().exists());
        assert!(!store.cache_path().exists());

        std::fs::remove_file(store.manifest_path()).unwrap();
        save(&store, url, 3, "a").await.unwrap();
        assert_eq!(store.get_latest(url).await.unwrap().unwrap().time, 3);
    }

    #[tokio::test]
    async fn test_malformed_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let url = "http://example.com/";
        let saved = save(&store, url, 1, "a").await.unwrap();

        std::fs::write(saved.dir.join(TREE_FILE), "{ not json").unwrap();
        assert!(matches!(
            store.get_tree(url, 1).await,
            Err(MonitorError::MalformedArtifact { .. })
        ));

        std::fs::write(store.cache_path(), r#"{"version": 9, "entries": {}}"#).unwrap();
        assert!(matches!(
            store.paths_at(1).await,
            Err(MonitorError::MalformedArtifact { .. })
        ));
    }

    #[tokio::test]
    async fn test_latest_with_missing_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let url = "http://example.com/";
        let saved = save(&store, url, 1, "a").await.unwrap();

        std::fs::remove_file(saved.dir.join(TREE_FILE)).unwrap();
        assert!(store.get_latest(url).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_serialized_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let url = "http://example.com/x";
        let json = SnapshotSerializer::new().to_json(&tree(url, 3, "hi")).unwrap();

        store
            .save(url, SnapshotPayload::Serialized(json), DomRect::zero(), b"", 3)
            .await
            .unwrap();
        assert_eq!(store.get_tree(url, 3).await.unwrap(), Some(tree(url, 3, "hi")));

        let bad = store
            .save(url, SnapshotPayload::Serialized("[]".to_string()), DomRect::zero(), b"", 4)
            .await;
        assert!(matches!(bad, Err(MonitorError::Dom(_))));
        assert!(!store.artifact_dir(url, 4).unwrap().exists());
    }
}
