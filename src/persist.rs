//! Persistence collaborators for derived state.
//!
//! The engine treats every write as fire-and-forget: it logs a failure and
//! keeps its in-memory state authoritative. The next successful write carries
//! the latest state, so nothing is queued for retry.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use anyhow::{anyhow, Context, Result};

use crate::cache::CacheSnapshot;
use crate::reactions::ReactionRecord;

/// Sink for flushed reaction aggregates and cache snapshots.
pub trait Persistence: Send + Sync {
    fn write_reactions(&self, target: &str, record: &ReactionRecord) -> Result<()>;
    fn write_cache(&self, snapshot: &CacheSnapshot) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl Persistence for NullStore {
    fn write_reactions(&self, _target: &str, _record: &ReactionRecord) -> Result<()> {
        Ok(())
    }

    fn write_cache(&self, _snapshot: &CacheSnapshot) -> Result<()> {
        Ok(())
    }
}

/// File-backed store rooted at `root`:
///
/// ```text
/// reactions/<ab>/<cd>/<id>.json
/// cache/snapshot.json
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<()> {
        for d in ["reactions", "cache"] {
            fs::create_dir_all(self.root.join(d))?;
        }
        Ok(())
    }

    fn reaction_path(&self, id: &str) -> Result<PathBuf> {
        let (sub1, sub2) = match (id.get(0..2), id.get(2..4)) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(anyhow!("target id too short for sharding: {id:?}")),
        };
        Ok(self
            .root
            .join("reactions")
            .join(sub1)
            .join(sub2)
            .join(format!("{id}.json")))
    }

    fn cache_path(&self) -> PathBuf {
        self.root.join("cache").join("snapshot.json")
    }

    /// Load every persisted reaction record keyed by target id.
    pub fn load_reactions(&self) -> Result<HashMap<String, ReactionRecord>> {
        let mut out = HashMap::new();
        let dir = self.root.join("reactions");
        if !dir.exists() {
            return Ok(out);
        }
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let data = fs::read_to_string(path)?;
            let record: ReactionRecord = serde_json::from_str(&data)
                .with_context(|| format!("parsing {}", path.display()))?;
            out.insert(id.to_string(), record);
        }
        Ok(out)
    }

    /// Load the last cache snapshot, if one was written.
    pub fn load_cache(&self) -> Result<Option<CacheSnapshot>> {
        let path = self.cache_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data).context("parsing cache snapshot")?))
    }
}

/// Write `data` to `path` atomically via a sibling temporary file.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("missing parent directory for {}", path.display()))?;
    fs::create_dir_all(parent)?;
    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    fs::write(tmp.path(), data)?;
    tmp.persist(path)?;
    Ok(())
}

impl Persistence for FileStore {
    fn write_reactions(&self, target: &str, record: &ReactionRecord) -> Result<()> {
        let path = self.reaction_path(target)?;
        write_atomic(&path, &serde_json::to_vec(record)?)
    }

    fn write_cache(&self, snapshot: &CacheSnapshot) -> Result<()> {
        write_atomic(&self.cache_path(), &serde_json::to_vec(snapshot)?)
    }
}

/// Records every write in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    reactions: Mutex<Vec<(String, ReactionRecord)>>,
    cache: Mutex<Option<CacheSnapshot>>,
    cache_writes: AtomicUsize,
    fail: AtomicBool,
}

impl MemoryStore {
    /// Make subsequent writes fail, to exercise the soft-fail paths.
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every successful reaction write, in order.
    pub fn reaction_writes(&self) -> Vec<(String, ReactionRecord)> {
        self.reactions.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Number of cache snapshot writes attempted.
    pub fn cache_writes(&self) -> usize {
        self.cache_writes.load(Ordering::SeqCst)
    }

    pub fn last_cache(&self) -> Option<CacheSnapshot> {
        self.cache.lock().ok().and_then(|c| c.clone())
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(anyhow!("simulated write failure"))
        } else {
            Ok(())
        }
    }
}

impl Persistence for MemoryStore {
    fn write_reactions(&self, target: &str, record: &ReactionRecord) -> Result<()> {
        self.check()?;
        self.reactions
            .lock()
            .map_err(|_| anyhow!("reaction log poisoned"))?
            .push((target.to_string(), record.clone()));
        Ok(())
    }

    fn write_cache(&self, snapshot: &CacheSnapshot) -> Result<()> {
        self.cache_writes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        *self.cache.lock().map_err(|_| anyhow!("cache slot poisoned"))? = Some(snapshot.clone());
        Ok(())
    }
}
