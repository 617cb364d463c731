use std::collections::HashSet;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use snafu::{ResultExt as _, Snafu};
use tracing::{debug, info, warn};

use crate::entry::ArticleHash;
use crate::timestamp::Timestamp;

const LOG_TARGET: &str = "secnews_bot::store";

pub const DEFAULT_STATE_FILE: &str = "posted_articles.json";
pub const DEFAULT_STALE_LOCK_AGE: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("Failed to read posted articles from {}", path.display()))]
    Read { path: PathBuf, source: io::Error },
    #[snafu(display("Posted articles file {} is malformed", path.display()))]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("Failed to write posted articles to {}", path.display()))]
    Write { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to serialize posted articles"))]
    Serialize { source: serde_json::Error },
    #[snafu(display("Another run holds the lock {} (since {since})", path.display()))]
    Locked { path: PathBuf, since: Timestamp },
    #[snafu(display("Failed to manage lock file {}", path.display()))]
    Lock { path: PathBuf, source: io::Error },
    #[snafu(display("Blocking store task failed"))]
    Join { source: tokio::task::JoinError },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable set of hashes of everything already posted.
#[async_trait::async_trait]
pub trait PostedStore: Send + Sync {
    async fn contains(&self, hash: &ArticleHash) -> StoreResult<bool>;
    async fn add(&self, hash: ArticleHash) -> StoreResult<()>;
}

/// Posted set kept as a JSON array of hex strings, oldest first.
///
/// Every `add` re-reads the file, appends and atomically replaces it via a
/// temporary file in the same directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    max_entries: Option<usize>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_entries: None,
        }
    }

    /// Drop the oldest records once more than `max` are kept.
    pub fn with_max_entries(mut self, max: Option<usize>) -> Self {
        self.max_entries = max;
        self
    }

    /// Current records, oldest first. A missing file is an empty set.
    pub fn load(&self) -> StoreResult<Vec<String>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&raw).context(MalformedSnafu { path: &self.path })
    }

    fn save(&self, records: &[String]) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(records).context(SerializeSnafu)?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).context(WriteSnafu { path: dir })?;
        tmp.write_all(&json)
            .and_then(|()| tmp.as_file().sync_all())
            .context(WriteSnafu { path: tmp.path() })?;
        tmp.persist(&self.path)
            .map_err(|err| err.error)
            .context(WriteSnafu { path: &self.path })?;
        Ok(())
    }

    fn add_blocking(&self, hash: &str) -> StoreResult<()> {
        let mut records = self.load()?;
        if records.iter().any(|r| r == hash) {
            return Ok(());
        }
        records.push(hash.to_string());

        if let Some(max) = self.max_entries {
            if max < records.len() {
                let excess = records.len() - max;
                records.drain(..excess);
                debug!(target: LOG_TARGET, dropped = excess, max, "Pruned oldest posted records");
            }
        }

        self.save(&records)?;
        debug!(target: LOG_TARGET, %hash, total = records.len(), path = %self.path.display(), "Recorded posted article");
        Ok(())
    }
}

#[async_trait::async_trait]
impl PostedStore for JsonFileStore {
    async fn contains(&self, hash: &ArticleHash) -> StoreResult<bool> {
        let store = self.clone();
        let hash = hash.to_hex();
        tokio::task::spawn_blocking(move || -> StoreResult<bool> {
            Ok(store.load()?.contains(&hash))
        })
        .await
        .context(JoinSnafu)?
    }

    async fn add(&self, hash: ArticleHash) -> StoreResult<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.add_blocking(&hash.to_hex()))
            .await
            .context(JoinSnafu)?
    }
}

/// In-process posted set, nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    hashes: Mutex<HashSet<ArticleHash>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hashes(hashes: impl IntoIterator<Item = ArticleHash>) -> Self {
        Self {
            hashes: Mutex::new(hashes.into_iter().collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<ArticleHash>> {
        self.hashes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl PostedStore for MemoryStore {
    async fn contains(&self, hash: &ArticleHash) -> StoreResult<bool> {
        Ok(self.lock().contains(hash))
    }

    async fn add(&self, hash: ArticleHash) -> StoreResult<()> {
        self.lock().insert(hash);
        Ok(())
    }
}

/// Exclusive claim on a state file for the duration of one run.
///
/// Implemented as a `<state file>.lock` sibling created with `create_new`.
/// The file holds the acquisition time; a lock older than `stale_after` is
/// considered left behind by a crashed run and taken over.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn lock_path_for(state_file: &Path) -> PathBuf {
        let mut name = state_file.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn acquire(state_file: &Path, now: Timestamp, stale_after: Duration) -> StoreResult<Self> {
        let path = Self::lock_path_for(state_file);

        match Self::try_create(&path, now) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let since = Self::read_since(&path);
                if now.duration_since(since) <= stale_after {
                    return LockedSnafu { path, since }.fail();
                }
                warn!(target: LOG_TARGET, path = %path.display(), %since, "Taking over stale lock");
                fs::remove_file(&path).context(LockSnafu { path: &path })?;
                Self::try_create(&path, now).context(LockSnafu { path: &path })?;
            }
            Err(source) => return Err(StoreError::Lock { path, source }),
        }

        info!(target: LOG_TARGET, path = %path.display(), "Acquired store lock");
        Ok(Self { path })
    }

    /// [`StoreLock::acquire`] on the blocking pool.
    pub async fn acquire_async(
        state_file: PathBuf,
        now: Timestamp,
        stale_after: Duration,
    ) -> StoreResult<Self> {
        tokio::task::spawn_blocking(move || Self::acquire(&state_file, now, stale_after))
            .await
            .context(JoinSnafu)?
    }

    fn try_create(path: &Path, now: Timestamp) -> io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        write!(file, "{}", now.as_secs())
    }

    /// Unreadable lock contents count as infinitely old.
    fn read_since(path: &Path) -> Timestamp {
        fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Timestamp::from)
            .unwrap_or(Timestamp::ZERO)
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(target: LOG_TARGET, path = %self.path.display(), %err, "Failed to remove store lock");
        }
    }
}

#[cfg(test)]
mod tests;
