//! JSON-backed device cache.
//!
//! The whole store is read once per process, mutated in memory and written
//! back as a unit after each confirmed update.

use chrono::{DateTime, Utc};
use renderctl_core::{CachedDevice, DeviceUpdate, Endpoint, ResolveError, Store};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode cache: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<CacheError> for ResolveError {
    fn from(err: CacheError) -> Self {
        ResolveError::CacheCorrupt(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// One row of the cache listing
#[derive(Clone, Copy, Debug)]
pub struct CacheEntry<'a> {
    /// Zero-based position in IP order
    pub index: usize,
    pub ip: &'a str,
    pub device: &'a CachedDevice,
}

impl<'a> CacheEntry<'a> {
    pub fn primary(&self) -> Option<&'a Endpoint> {
        self.device.primary_endpoint()
    }
}

/// Persistent IP-keyed store of everything learned about renderers
#[derive(Debug)]
pub struct DeviceCache {
    path: PathBuf,
    store: Store,
}

impl DeviceCache {
    /// Empty cache that will be written to `path` on save
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            store: Store::new(),
        }
    }

    /// Load the cache at `path`. A missing, empty or corrupt file yields an
    /// empty cache; corruption is logged, never returned.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match read_store(path).await {
            Ok(store) => Self {
                path: path.to_path_buf(),
                store,
            },
            Err(e) => {
                warn!("Ignoring device cache: {}", e);
                Self::new(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Write the whole store to disk via a temp file and rename
    pub async fn save(&self) -> Result<()> {
        debug!("Writing {} cached devices to {:?}", self.store.len(), self.path);

        let json = serde_json::to_string_pretty(&self.store)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| self.io_err(e))?;
            }
        }

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json).await.map_err(|e| self.io_err(e))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| self.io_err(e))?;

        Ok(())
    }

    /// Merge a partial observation about `ip`, stamping the touched endpoint
    /// with the current time
    pub fn store_update(&mut self, ip: &str, update: DeviceUpdate) {
        merge_update(&mut self.store, ip, update, Utc::now());
    }

    pub fn get(&self, ip: &str) -> Option<&CachedDevice> {
        self.store.get(ip)
    }

    /// Primary endpoint of `ip`, if it has a playable one
    pub fn select_primary(&self, ip: &str) -> Option<&Endpoint> {
        self.store.get(ip).and_then(CachedDevice::primary_endpoint)
    }

    /// All devices in IP order
    pub fn list(&self) -> Vec<CacheEntry<'_>> {
        self.store
            .iter()
            .enumerate()
            .map(|(index, (ip, device))| CacheEntry {
                index,
                ip: ip.as_str(),
                device,
            })
            .collect()
    }

    /// Device at a listing index
    pub fn by_index(&self, index: usize) -> Option<CacheEntry<'_>> {
        self.store
            .iter()
            .nth(index)
            .map(|(ip, device)| CacheEntry {
                index,
                ip: ip.as_str(),
                device,
            })
    }

    /// Look up by listing index or IP string
    pub fn find(&self, key: &str) -> Option<CacheEntry<'_>> {
        if let Ok(index) = key.parse::<usize>() {
            return self.by_index(index);
        }
        self.list().into_iter().find(|entry| entry.ip == key)
    }

    /// Remove one device; returns whether it was present
    pub fn forget(&mut self, ip: &str) -> bool {
        let removed = self.store.remove(ip).is_some();
        if removed {
            info!("Forgot cached device {}", ip);
        }
        removed
    }

    /// Remove every device; returns how many were dropped
    pub fn forget_all(&mut self) -> usize {
        let count = self.store.len();
        self.store.clear();
        info!("Cleared {} cached devices", count);
        count
    }

    fn io_err(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

async fn read_store(path: &Path) -> Result<Store> {
    if !path.exists() {
        debug!("No device cache at {:?}, starting empty", path);
        return Ok(Store::new());
    }

    let contents = fs::read_to_string(path).await.map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if contents.trim().is_empty() {
        return Ok(Store::new());
    }

    let store: Store = serde_json::from_str(&contents).map_err(|source| CacheError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Loaded {} cached devices from {:?}", store.len(), path);
    Ok(store)
}

/// Fold `update` into `store` under `ip`.
///
/// Vendor and identity fields keep the first non-empty value ever seen.
/// Endpoint actions, media and ConnectionManager URL take the latest
/// non-empty value. `seen_at` never moves backwards.
pub fn merge_update(store: &mut Store, ip: &str, update: DeviceUpdate, now: DateTime<Utc>) {
    let device = store.entry(ip.to_string()).or_default();

    let vendor = update.vendor.trim();
    if device.vendor.is_empty() && !vendor.is_empty() {
        device.vendor = vendor.to_string();
    }

    for (key, value) in update.identity {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let slot = device.identity.entry(key).or_default();
        if slot.is_empty() {
            *slot = value.to_string();
        }
    }

    if update.control_url.is_empty() {
        return;
    }

    let endpoint = device
        .endpoints
        .entry(update.control_url.clone())
        .or_insert_with(|| Endpoint::new(update.control_url, now));

    if !update.conn_mgr_url.is_empty() {
        endpoint.conn_mgr_url = update.conn_mgr_url;
    }
    if !update.actions.is_empty() {
        endpoint.actions = update.actions;
    }
    if !update.media.is_empty() {
        endpoint.media = update.media;
    }
    if now > endpoint.seen_at {
        endpoint.seen_at = now;
    }
}
