//! Content-addressed analysis cache
//!
//! Layout under the cache root:
//!
//! ```text
//! entries/<hash[0:2]>/<hash>.json      analysis keyed by content hash
//! index/<key[0:2]>/<key>.json          path -> (stamps, hash) hints
//! ```
//!
//! Writes go through a per-shard async lock and an atomic rename. Unreadable
//! entries are misses, never errors.

use crate::cache::atomic::write_atomic;
use crate::cache::entry::{decode, CacheEntry, DecodeError, Decoded};
use crate::cache::hash::{hash_file, is_valid_hash, path_key, shard_of};
use crate::config::{Config, ConfigManager};
use crate::error::{MediagateError, MediagateResult};
use crate::observe::Observable;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SHARDS: usize = 256;

const DEFAULT_RACY_WINDOW: Duration = Duration::from_secs(2);

/// Result of looking a file up in the cache
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub content_hash: String,
    pub size: u64,
    /// Valid entry for this content, if any
    pub entry: Option<CacheEntry>,
    /// The hash came from the path index instead of reading the file
    pub from_index: bool,
}

/// Path index record used to skip rehashing unchanged files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexRecord {
    path: PathBuf,
    file_size: u64,
    modified_ns: u64,
    #[serde(default)]
    changed_ns: Option<u64>,
    #[serde(default)]
    inode: Option<u64>,
    /// Wall clock when the hash was taken
    #[serde(default)]
    indexed_ns: u64,
    content_hash: String,
}

impl IndexRecord {
    /// True when every stamp still matches and the file had been quiet for
    /// `racy_window` before it was hashed. A write inside that window can
    /// leave size and timestamps unchanged at filesystem granularity.
    fn vouches_for(&self, path: &Path, stamp: &FileStamp, racy_window: Duration) -> bool {
        let last_change = stamp.modified_ns.max(stamp.changed_ns.unwrap_or(0));
        let window_ns = u64::try_from(racy_window.as_nanos()).unwrap_or(u64::MAX);
        self.path == path
            && self.file_size == stamp.size
            && self.modified_ns == stamp.modified_ns
            && self.changed_ns == stamp.changed_ns
            && self.inode == stamp.inode
            && self.indexed_ns >= last_change.saturating_add(window_ns)
    }
}

/// Metadata that changes whenever a file is rewritten
#[derive(Debug, Clone, Copy, PartialEq)]
struct FileStamp {
    size: u64,
    modified_ns: u64,
    changed_ns: Option<u64>,
    inode: Option<u64>,
}

impl FileStamp {
    fn of(metadata: &std::fs::Metadata) -> Option<Self> {
        let modified = metadata.modified().ok()?.duration_since(UNIX_EPOCH).ok()?;
        Some(Self {
            size: metadata.len(),
            modified_ns: u64::try_from(modified.as_nanos()).ok()?,
            changed_ns: changed_ns(metadata),
            inode: inode(metadata),
        })
    }
}

#[cfg(unix)]
fn changed_ns(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    let secs = u64::try_from(metadata.ctime()).ok()?;
    let nanos = u64::try_from(metadata.ctime_nsec()).ok()?;
    secs.checked_mul(1_000_000_000)?.checked_add(nanos)
}

#[cfg(not(unix))]
fn changed_ns(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

#[cfg(unix)]
fn inode(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn inode(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_nanos()).ok())
        .unwrap_or(0)
}

/// On-disk cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub complete: usize,
    pub partial: usize,
    pub unreadable: usize,
    pub total_bytes: u64,
    pub index_records: usize,
}

/// What a garbage collection pass removed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GcReport {
    pub scanned: usize,
    /// Hashes of removed (or, on a dry run, removable) entries
    pub removed: Vec<String>,
    pub bytes_freed: u64,
    /// Index records whose file no longer exists
    pub index_pruned: usize,
    pub dry_run: bool,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    corrupt: AtomicU64,
    incompatible: AtomicU64,
    migrations: AtomicU64,
    writes: AtomicU64,
    index_hits: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Persistent analysis cache keyed by content hash
pub struct ContentCache {
    root: PathBuf,
    strict: bool,
    racy_window: Duration,
    locks: Vec<Mutex<()>>,
    counters: Counters,
}

impl ContentCache {
    /// Open (creating if needed) a cache rooted at `root`
    pub async fn open(root: impl Into<PathBuf>, strict: bool) -> MediagateResult<Self> {
        let root = root.into();
        for dir in [root.join("entries"), root.join("index")] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| MediagateError::io(format!("creating {}", dir.display()), e))?;
        }

        debug!("Opened cache at {} (strict: {})", root.display(), strict);
        Ok(Self {
            root,
            strict,
            racy_window: DEFAULT_RACY_WINDOW,
            locks: (0..SHARDS).map(|_| Mutex::new(())).collect(),
            counters: Counters::default(),
        })
    }

    /// Open the cache a configuration points at
    pub async fn from_config(config: &Config) -> MediagateResult<Self> {
        let cache = Self::open(ConfigManager::cache_dir(config), config.cache.strict).await?;
        Ok(cache.with_racy_window(Duration::from_millis(config.cache.racy_window_ms)))
    }

    /// How long a file must have been unchanged before its hash is indexed
    /// as trustworthy
    pub fn with_racy_window(self, racy_window: Duration) -> Self {
        Self {
            racy_window,
            ..self
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Cached entry for the file at `path`, if one is valid
    pub async fn get(&self, path: &Path) -> MediagateResult<Option<CacheEntry>> {
        Ok(self.lookup(path).await?.entry)
    }

    /// Identify a file and fetch its entry.
    ///
    /// Non-strict lookups trust the path index when size, modification time,
    /// change time and inode are unchanged and the file was already settled
    /// when it was hashed. Strict lookups always hash the content.
    pub async fn lookup(&self, path: &Path) -> MediagateResult<CacheLookup> {
        let metadata = fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MediagateError::PathNotFound(path.to_path_buf())
            } else {
                MediagateError::io(format!("reading metadata of {}", path.display()), e)
            }
        })?;
        if !metadata.is_file() {
            return Err(MediagateError::User(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let size = metadata.len();
        let stamp = FileStamp::of(&metadata);

        let indexed = match (self.strict, stamp) {
            (false, Some(stamp)) => self
                .read_index(path)
                .await
                .filter(|r| r.vouches_for(path, &stamp, self.racy_window)),
            _ => None,
        };

        let (content_hash, from_index) = match indexed {
            Some(record) => {
                Counters::bump(&self.counters.index_hits);
                (record.content_hash, true)
            }
            None => {
                let hash = hash_file(path).await?;
                if let Some(stamp) = stamp {
                    self.write_index(path, &stamp, &hash).await;
                }
                (hash, false)
            }
        };

        let entry = self.load_valid(&content_hash, size).await;
        if entry.is_some() {
            Counters::bump(&self.counters.hits);
        } else {
            Counters::bump(&self.counters.misses);
        }

        Ok(CacheLookup {
            content_hash,
            size,
            entry,
            from_index,
        })
    }

    /// Store an entry for the file at `path`.
    ///
    /// `entry.content_hash` must be the hash [`lookup`](Self::lookup)
    /// computed for `path`. Replacing an entry keeps its `created_at` and
    /// bumps `access_count`.
    pub async fn put(&self, path: &Path, mut entry: CacheEntry) -> MediagateResult<CacheEntry> {
        let hash = entry.content_hash.clone();
        if !is_valid_hash(&hash) {
            return Err(MediagateError::InvalidHash(hash));
        }

        let _guard = self.lock(&hash).await;

        if let Some(existing) = self.read_entry(&hash).await.and_then(|d| d.ok()) {
            let existing = existing.into_entry();
            entry.created_at = existing.created_at;
            entry.access_count = existing.access_count.saturating_add(1);
        }
        entry.path = path.to_path_buf();
        entry.last_accessed = Utc::now();

        self.write_entry(&entry).await?;
        Counters::bump(&self.counters.writes);
        info!(
            "Cached {} ({} stage(s), complete: {})",
            &hash[..12],
            entry.stages.len(),
            entry.complete
        );
        Ok(entry)
    }

    /// Record a read of an existing entry
    pub async fn touch(&self, content_hash: &str) -> MediagateResult<()> {
        let _guard = self.lock(content_hash).await;

        let Some(Ok(decoded)) = self.read_entry(content_hash).await else {
            return Ok(());
        };
        let mut entry = decoded.into_entry();
        entry.last_accessed = Utc::now();
        entry.access_count = entry.access_count.saturating_add(1);
        self.write_entry(&entry).await
    }

    /// Remove the entry for a hash, returning whether one existed
    pub async fn invalidate(&self, content_hash: &str) -> MediagateResult<bool> {
        if !is_valid_hash(content_hash) {
            return Err(MediagateError::InvalidHash(content_hash.to_string()));
        }

        let _guard = self.lock(content_hash).await;
        let path = self.entry_path(content_hash);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Invalidated cache entry {}", content_hash);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MediagateError::io(
                format!("removing cache entry {}", path.display()),
                e,
            )),
        }
    }

    /// Count entries and bytes on disk
    pub async fn stats(&self) -> MediagateResult<CacheStats> {
        let mut stats = CacheStats::default();

        for file in list_json(&self.root.join("entries")).await? {
            stats.entries += 1;
            stats.total_bytes += file.size;
            match fs::read(&file.path).await.ok().map(|b| decode(&b)) {
                Some(Ok(decoded)) if decoded_complete(&decoded) => stats.complete += 1,
                Some(Ok(_)) => stats.partial += 1,
                _ => stats.unreadable += 1,
            }
        }
        stats.index_records = list_json(&self.root.join("index")).await?.len();

        Ok(stats)
    }

    /// Remove entries not accessed in `max_age_days`, plus unreadable ones
    pub async fn gc(&self, max_age_days: u32, dry_run: bool) -> MediagateResult<GcReport> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(max_age_days));
        let mut report = GcReport {
            dry_run,
            ..GcReport::default()
        };

        for file in list_json(&self.root.join("entries")).await? {
            report.scanned += 1;
            let Some(hash) = file.stem().filter(|h| is_valid_hash(h)) else {
                continue;
            };

            let expired = match fs::read(&file.path).await.ok().map(|b| decode(&b)) {
                Some(Ok(decoded)) => decoded.into_entry().last_accessed < cutoff,
                // Newer schemas belong to another build; leave them alone
                Some(Err(DecodeError::Incompatible(_))) => false,
                _ => true,
            };
            if !expired {
                continue;
            }

            if dry_run || self.invalidate(&hash).await? {
                report.bytes_freed += file.size;
                report.removed.push(hash);
            }
        }

        for file in list_json(&self.root.join("index")).await? {
            let orphaned = match fs::read(&file.path).await {
                Ok(bytes) => serde_json::from_slice::<IndexRecord>(&bytes)
                    .map(|r| !r.path.exists())
                    .unwrap_or(true),
                Err(_) => false,
            };
            if orphaned {
                if !dry_run {
                    if let Err(e) = fs::remove_file(&file.path).await {
                        warn!("Failed to prune index record {}: {}", file.path.display(), e);
                        continue;
                    }
                }
                report.index_pruned += 1;
            }
        }

        info!(
            "Cache gc: {} scanned, {} removed, {} index record(s) pruned{}",
            report.scanned,
            report.removed.len(),
            report.index_pruned,
            if dry_run { " (dry run)" } else { "" }
        );
        Ok(report)
    }

    fn lock_index(hash: &str) -> usize {
        u8::from_str_radix(shard_of(hash), 16).map_or(0, usize::from)
    }

    async fn lock(&self, hash: &str) -> tokio::sync::MutexGuard<'_, ()> {
        self.locks[Self::lock_index(hash)].lock().await
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        self.root
            .join("entries")
            .join(shard_of(hash))
            .join(format!("{}.json", hash))
    }

    fn index_path(&self, path: &Path) -> PathBuf {
        let key = path_key(path);
        self.root
            .join("index")
            .join(shard_of(&key))
            .join(format!("{}.json", key))
    }

    /// Raw decode of an entry file; `None` when it does not exist
    async fn read_entry(&self, hash: &str) -> Option<Result<Decoded, DecodeError>> {
        let path = self.entry_path(hash);
        match fs::read(&path).await {
            Ok(bytes) => Some(decode(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => Some(Err(DecodeError::Corrupt(e.to_string()))),
        }
    }

    /// Read, migrate and validate an entry. Every failure is a miss.
    async fn load_valid(&self, hash: &str, size: u64) -> Option<CacheEntry> {
        let entry = match self.read_entry(hash).await? {
            Ok(Decoded::Current(entry)) => entry,
            Ok(Decoded::Migrated(entry)) => {
                Counters::bump(&self.counters.migrations);
                self.rewrite_migrated(&entry).await;
                entry
            }
            Err(DecodeError::Incompatible(version)) => {
                Counters::bump(&self.counters.incompatible);
                debug!("Cache entry {} has schema version {}, ignoring", hash, version);
                return None;
            }
            Err(DecodeError::Corrupt(reason)) => {
                Counters::bump(&self.counters.corrupt);
                warn!("Corrupt cache entry {}: {}", self.entry_path(hash).display(), reason);
                return None;
            }
        };

        if entry.content_hash != hash {
            Counters::bump(&self.counters.stale);
            warn!(
                "Cache entry {} records hash {}, ignoring",
                hash, entry.content_hash
            );
            return None;
        }
        if entry.file_size != size {
            Counters::bump(&self.counters.stale);
            debug!(
                "Cache entry {} records {} bytes, file has {}",
                hash, entry.file_size, size
            );
            return None;
        }

        Some(entry)
    }

    async fn rewrite_migrated(&self, entry: &CacheEntry) {
        let _guard = self.lock(&entry.content_hash).await;
        match self.write_entry(entry).await {
            Ok(()) => info!("Migrated cache entry {} to current schema", entry.content_hash),
            Err(e) => warn!("Failed to rewrite migrated entry {}: {}", entry.content_hash, e),
        }
    }

    async fn write_entry(&self, entry: &CacheEntry) -> MediagateResult<()> {
        let bytes = serde_json::to_vec_pretty(entry)?;
        let path = self.entry_path(&entry.content_hash);
        let hash = entry.content_hash.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| MediagateError::Internal(format!("cache write task failed: {}", e)))?
            .map_err(|e| MediagateError::CacheWrite {
                hash,
                reason: e.to_string(),
            })
    }

    async fn read_index(&self, path: &Path) -> Option<IndexRecord> {
        let bytes = fs::read(self.index_path(path)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Best effort: a missing index record only costs a rehash
    async fn write_index(&self, path: &Path, stamp: &FileStamp, hash: &str) {
        let record = IndexRecord {
            path: path.to_path_buf(),
            file_size: stamp.size,
            modified_ns: stamp.modified_ns,
            changed_ns: stamp.changed_ns,
            inode: stamp.inode,
            indexed_ns: now_ns(),
            content_hash: hash.to_string(),
        };
        let target = self.index_path(path);
        let result = match serde_json::to_vec(&record) {
            Ok(bytes) => tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
                .await
                .map_err(|e| e.to_string())
                .and_then(|r| r.map_err(|e| e.to_string())),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = result {
            warn!("Failed to update path index for {}: {}", path.display(), e);
        }
    }
}

fn decoded_complete(decoded: &Decoded) -> bool {
    matches!(decoded, Decoded::Current(entry) if entry.complete)
}

impl Observable for ContentCache {
    fn component(&self) -> &'static str {
        "cache"
    }

    fn stats(&self) -> serde_json::Value {
        let c = &self.counters;
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        json!({
            "hits": load(&c.hits),
            "misses": load(&c.misses),
            "stale": load(&c.stale),
            "corrupt": load(&c.corrupt),
            "incompatible": load(&c.incompatible),
            "migrations": load(&c.migrations),
            "writes": load(&c.writes),
            "index_hits": load(&c.index_hits),
        })
    }
}

struct JsonFile {
    path: PathBuf,
    size: u64,
}

impl JsonFile {
    fn stem(&self) -> Option<String> {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
    }
}

/// JSON files one shard level below `dir`
async fn list_json(dir: &Path) -> MediagateResult<Vec<JsonFile>> {
    let mut files = Vec::new();
    let mut shards = match fs::read_dir(dir).await {
        Ok(shards) => shards,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(MediagateError::io(format!("reading {}", dir.display()), e)),
    };

    while let Some(shard) = shards
        .next_entry()
        .await
        .map_err(|e| MediagateError::io("reading cache shard", e))?
    {
        if !shard.path().is_dir() {
            continue;
        }
        let mut entries = fs::read_dir(shard.path())
            .await
            .map_err(|e| MediagateError::io(format!("reading {}", shard.path().display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MediagateError::io("reading cache entry", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                files.push(JsonFile { path, size });
            }
        }
    }

    Ok(files)
}
