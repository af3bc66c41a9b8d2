//! Directory-backed record store.
//!
//! Each record lives in its own manifest file (`.yaml`, `.yml` or `.json`).
//! The directory is rescanned on every read, so owners can add, edit or
//! delete manifests while the operator runs. Parsed manifests are cached by
//! modification time and length; only changed files are parsed again.
//! Writes go back to the file the record was read from, in the same format,
//! via a temp-file rename.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::store::{check_version, merge_owner_write, not_found, should_purge, ResourceStore};
use crate::types::{MonitorResource, ResourceKey};

/// Serialization format of a manifest file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Yaml,
    Json,
}

impl ManifestFormat {
    /// Infer the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Parse a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if `contents` is not a valid manifest.
    pub fn parse(self, contents: &str) -> Result<MonitorResource> {
        match self {
            Self::Yaml => serde_yaml::from_str(contents)
                .map_err(|e| Error::store(format!("invalid YAML manifest: {e}"))),
            Self::Json => serde_json::from_str(contents)
                .map_err(|e| Error::store(format!("invalid JSON manifest: {e}"))),
        }
    }

    /// Render a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the record cannot be encoded.
    pub fn render(self, resource: &MonitorResource) -> Result<String> {
        match self {
            Self::Yaml => serde_yaml::to_string(resource)
                .map_err(|e| Error::store(format!("cannot encode manifest: {e}"))),
            Self::Json => serde_json::to_string_pretty(resource)
                .map(|mut s| {
                    s.push('\n');
                    s
                })
                .map_err(|e| Error::store(format!("cannot encode manifest: {e}"))),
        }
    }
}

/// Read and parse a single manifest file.
///
/// # Errors
///
/// Returns [`Error::Store`] if the extension is unsupported, or the file
/// cannot be read or parsed.
pub async fn load_manifest(path: &Path) -> Result<MonitorResource> {
    let format = ManifestFormat::from_path(path).ok_or_else(|| {
        Error::store(format!("unsupported manifest extension: {}", path.display()))
    })?;
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::store(format!("cannot read {}: {e}", path.display())))?;
    format.parse(&contents)
}

/// Whether `path` names a manifest the store reads: a supported extension
/// and not a hidden (or in-flight temp) file.
pub fn is_manifest_path(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    !hidden && ManifestFormat::from_path(path).is_some()
}

struct Entry {
    path: PathBuf,
    resource: MonitorResource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

struct Cached {
    stamp: Stamp,
    resource: MonitorResource,
}

/// Record store over a directory of manifests.
pub struct FileResourceStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
    cache: Mutex<HashMap<PathBuf, Cached>>,
    parses: AtomicUsize,
}

impl FileResourceStore {
    /// Open a store over `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::store(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
            cache: Mutex::new(HashMap::new()),
            parses: AtomicUsize::new(0),
        })
    }

    /// The manifest directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Owner write: create a record or replace its spec.
    ///
    /// New records are written as `<namespace>.<name>.yaml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be scanned or the manifest
    /// cannot be written.
    pub async fn apply(&self, resource: MonitorResource) -> Result<MonitorResource> {
        let _guard = self.write_lock.lock().await;
        let key = resource.key();
        let existing = self.scan().await?.remove(&key);

        let path = existing
            .as_ref()
            .map_or_else(|| self.default_path(&key), |e| e.path.clone());
        let merged = merge_owner_write(existing.as_ref().map(|e| &e.resource), resource);
        write_manifest(&path, &merged).await?;
        Ok(merged)
    }

    /// Owner write: request removal of a record.
    ///
    /// A record without finalizers is removed at once.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be scanned or the manifest
    /// cannot be rewritten or removed.
    pub async fn request_deletion(&self, key: &ResourceKey) -> Result<Option<MonitorResource>> {
        let _guard = self.write_lock.lock().await;
        let Some(Entry { path, mut resource }) = self.scan().await?.remove(key) else {
            return Ok(None);
        };

        if resource.metadata.deletion_timestamp.is_none() {
            resource.metadata.deletion_timestamp = Some(Utc::now());
            resource.metadata.resource_version =
                resource.metadata.resource_version.saturating_add(1);
        }
        self.persist(&path, &resource).await?;
        Ok(Some(resource))
    }

    fn default_path(&self, key: &ResourceKey) -> PathBuf {
        self.dir.join(format!("{}.{}.yaml", key.namespace, key.name))
    }

    /// Write `resource`, or remove its file if it is due for purge.
    async fn persist(&self, path: &Path, resource: &MonitorResource) -> Result<()> {
        if should_purge(resource) {
            tracing::debug!(key = %resource.key(), path = %path.display(), "Purging record");
            return tokio::fs::remove_file(path)
                .await
                .map_err(|e| Error::store(format!("cannot remove {}: {e}", path.display())));
        }
        write_manifest(path, resource).await
    }

    /// Parse every manifest in the directory.
    ///
    /// Unreadable files are skipped with a warning. When two files claim
    /// the same key, the first in path order wins.
    async fn scan(&self) -> Result<BTreeMap<ResourceKey, Entry>> {
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::store(format!("cannot list {}: {e}", self.dir.display())))?;

        let mut paths = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::store(format!("cannot list {}: {e}", self.dir.display())))?
        {
            let path = entry.path();
            if is_manifest_path(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut cache = self.cache.lock().await;
        cache.retain(|path, _| paths.binary_search(path).is_ok());

        let mut entries = BTreeMap::new();
        for path in paths {
            match self.read_cached(&mut cache, &path).await {
                Ok(resource) => {
                    let key = resource.key();
                    if let Some(Entry { path: first, .. }) = entries.get(&key) {
                        tracing::warn!(
                            key = %key,
                            path = %path.display(),
                            first = %first.display(),
                            "Duplicate manifest ignored"
                        );
                        continue;
                    }
                    entries.insert(key, Entry { path, resource });
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable manifest");
                }
            }
        }
        Ok(entries)
    }

    /// Parse `path` unless the cached copy is still current.
    async fn read_cached(
        &self,
        cache: &mut HashMap<PathBuf, Cached>,
        path: &Path,
    ) -> Result<MonitorResource> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::store(format!("cannot stat {}: {e}", path.display())))?;
        let stamp = Stamp {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        };

        if let Some(cached) = cache.get(path).filter(|c| c.stamp == stamp) {
            return Ok(cached.resource.clone());
        }

        self.parses.fetch_add(1, Ordering::Relaxed);
        let resource = load_manifest(path).await?;
        cache.insert(
            path.to_path_buf(),
            Cached {
                stamp,
                resource: resource.clone(),
            },
        );
        Ok(resource)
    }

    #[cfg(test)]
    fn parse_count(&self) -> usize {
        self.parses.load(Ordering::Relaxed)
    }

    async fn locate(&self, key: &ResourceKey) -> Result<Entry> {
        self.scan().await?.remove(key).ok_or_else(|| not_found(key))
    }
}

async fn write_manifest(path: &Path, resource: &MonitorResource) -> Result<()> {
    let format = ManifestFormat::from_path(path).unwrap_or(ManifestFormat::Yaml);
    let contents = format.render(resource)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::store(format!("invalid manifest path: {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| Error::store(format!("cannot write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::store(format!("cannot replace {}: {e}", path.display())))
}

#[async_trait]
impl ResourceStore for FileResourceStore {
    async fn get(&self, ctx: &Context, key: &ResourceKey) -> Result<Option<MonitorResource>> {
        ctx.run(async { Ok::<_, Error>(self.scan().await?.remove(key).map(|e| e.resource)) })
            .await?
    }

    async fn update_status(
        &self,
        ctx: &Context,
        resource: &MonitorResource,
    ) -> Result<MonitorResource> {
        ctx.run(async {
            let _guard = self.write_lock.lock().await;
            let Entry { path, resource: mut stored } = self.locate(&resource.key()).await?;
            check_version(&stored, resource)?;

            stored.status = resource.status.clone();
            stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
            write_manifest(&path, &stored).await?;
            Ok::<_, Error>(stored)
        })
        .await?
    }

    async fn update_metadata(
        &self,
        ctx: &Context,
        resource: &MonitorResource,
    ) -> Result<MonitorResource> {
        ctx.run(async {
            let _guard = self.write_lock.lock().await;
            let Entry { path, resource: mut stored } = self.locate(&resource.key()).await?;
            check_version(&stored, resource)?;

            stored.metadata.finalizers = resource.metadata.finalizers.clone();
            stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
            self.persist(&path, &stored).await?;
            Ok::<_, Error>(stored)
        })
        .await?
    }

    async fn list(&self, ctx: &Context) -> Result<Vec<ResourceKey>> {
        ctx.run(async { Ok::<_, Error>(self.scan().await?.into_keys().collect()) })
            .await?
    }
}
