//! Two-layer payload cache: an in-memory map of handles in front of a
//! sharded directory of entry files.
//!
//! Entry file layout: `<root>/sha256/<aa>/<fingerprint>.entry`, one line of
//! JSON metadata followed by the raw payload bytes. Files are written to a
//! temporary name and renamed into place, so readers see either the whole
//! entry or nothing.
//!
//! Entries never expire by age. They are replaced by a forced refresh,
//! removed explicitly, or left behind when the cache root changes.

use super::fingerprint::Fingerprint;
use crate::constants::{CACHE_ENTRY_EXT, CACHE_SHARD_DIR};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Metadata header stored in front of the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub identifier: String,
    pub fingerprint: Fingerprint,
    pub fetched_at: DateTime<Utc>,
    pub payload_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub identifier: String,
    pub fingerprint: Fingerprint,
    pub fetched_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

impl CacheEntry {
    pub fn meta(&self) -> CacheMeta {
        CacheMeta {
            identifier: self.identifier.clone(),
            fingerprint: self.fingerprint.clone(),
            fetched_at: self.fetched_at,
            payload_len: self.payload.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLayer {
    Memory,
    Disk,
}

impl CacheLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLayer::Memory => "memory",
            CacheLayer::Disk => "disk",
        }
    }
}

pub struct CacheStore {
    root: RwLock<PathBuf>,
    memory: Mutex<HashMap<Fingerprint, Arc<CacheEntry>>>,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: RwLock::new(root.into()),
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.root.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Point the store at a new directory. In-memory handles are dropped;
    /// files under the old root are left untouched.
    pub fn set_root(&self, root: impl Into<PathBuf>) {
        let root = root.into();
        debug!("Cache root changed to {}", root.display());
        *self.root.write().unwrap_or_else(|e| e.into_inner()) = root;
        self.memory.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn entry_path(root: &Path, fingerprint: &Fingerprint) -> PathBuf {
        root.join(CACHE_SHARD_DIR)
            .join(fingerprint.shard())
            .join(format!("{}.{}", fingerprint, CACHE_ENTRY_EXT))
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<(Arc<CacheEntry>, CacheLayer)>> {
        if let Some(entry) = self.memory.lock().unwrap_or_else(|e| e.into_inner()).get(fingerprint) {
            return Ok(Some((entry.clone(), CacheLayer::Memory)));
        }

        let path = Self::entry_path(&self.root(), fingerprint);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(entry) = parse_entry(&bytes) else {
            warn!("Ignoring unreadable cache entry {}", path.display());
            return Ok(None);
        };
        if &entry.fingerprint != fingerprint {
            warn!("Cache entry {} carries a foreign fingerprint, ignoring", path.display());
            return Ok(None);
        }

        let entry = Arc::new(entry);
        self.memory
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(fingerprint.clone(), entry.clone());
        Ok(Some((entry, CacheLayer::Disk)))
    }

    /// Persist an entry, replacing any previous one for the same fingerprint
    pub fn put(&self, entry: CacheEntry) -> Result<Arc<CacheEntry>> {
        let path = Self::entry_path(&self.root(), &entry.fingerprint);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension(format!(
            "tmp-{}-{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let write_result = (|| -> Result<()> {
            let mut file = fs::File::create(&tmp)?;
            let header = serde_json::to_string(&entry.meta())?;
            file.write_all(header.as_bytes())?;
            file.write_all(b"\n")?;
            file.write_all(&entry.payload)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)?;
            Ok(())
        })();
        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        debug!(
            identifier = %entry.identifier,
            fingerprint = %entry.fingerprint,
            bytes = entry.payload.len(),
            "Cached payload"
        );
        let entry = Arc::new(entry);
        self.memory
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry.fingerprint.clone(), entry.clone());
        Ok(entry)
    }

    /// Metadata of every readable entry under the current root
    pub fn list(&self) -> Result<Vec<CacheMeta>> {
        let mut metas: Vec<CacheMeta> = self
            .entry_files()?
            .into_iter()
            .filter_map(|path| read_meta(&path))
            .collect();
        metas.sort_by(|a, b| a.identifier.cmp(&b.identifier).then(a.fetched_at.cmp(&b.fetched_at)));
        Ok(metas)
    }

    /// Remove all entries for `identifier`, or every entry when `None`.
    /// Returns the number of entries removed.
    pub fn remove(&self, identifier: Option<&str>) -> Result<usize> {
        let mut removed = 0;
        for path in self.entry_files()? {
            let matches = match identifier {
                None => true,
                Some(id) => read_meta(&path).map_or(false, |m| m.identifier == id),
            };
            if matches {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        self.memory
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, e| identifier.map_or(false, |id| e.identifier != id));
        Ok(removed)
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let shard_root = self.root().join(CACHE_SHARD_DIR);
        if !shard_root.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for shard in fs::read_dir(&shard_root)? {
            let shard = shard?.path();
            if !shard.is_dir() {
                continue;
            }
            for file in fs::read_dir(&shard)? {
                let file = file?.path();
                if file.extension().and_then(|e| e.to_str()) == Some(CACHE_ENTRY_EXT) {
                    files.push(file);
                }
            }
        }
        Ok(files)
    }
}

fn split_header(bytes: &[u8]) -> Option<(CacheMeta, &[u8])> {
    let newline = bytes.iter().position(|b| *b == b'\n')?;
    let meta: CacheMeta = serde_json::from_slice(&bytes[..newline]).ok()?;
    Some((meta, &bytes[newline + 1..]))
}

fn parse_entry(bytes: &[u8]) -> Option<CacheEntry> {
    let (meta, payload) = split_header(bytes)?;
    if payload.len() != meta.payload_len {
        return None;
    }
    Some(CacheEntry {
        identifier: meta.identifier,
        fingerprint: meta.fingerprint,
        fetched_at: meta.fetched_at,
        payload: payload.to_vec(),
    })
}

fn read_meta(path: &Path) -> Option<CacheMeta> {
    let bytes = fs::read(path).ok()?;
    split_header(&bytes).map(|(meta, _)| meta)
}
