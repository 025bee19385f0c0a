//! Content-addressed transcription cache.
//!
//! Entries are keyed by the absolute source path, a blake3 digest of the
//! source bytes, the model name and the spoken language passed to whisper. The store is a single JSON document that
//! is rewritten atomically after every change, so it survives restarts and a
//! crash never leaves a half-written entry behind. When more than `capacity`
//! entries exist, the least recently accessed one is dropped.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SubtitleError};
use crate::transcribe::{TRANSCRIPT_FILE, WhisperModel};

const STORE_FILE: &str = "transcriptions.json";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(absolute_path: &Path, content_fingerprint: &str, model: WhisperModel, language: &str) -> Self {
        Self(format!(
            "{}-{}-{}-{}",
            absolute_path.display(),
            content_fingerprint,
            model.as_str(),
            language
        ))
    }

    /// Fingerprint the file at `path` and build its key
    pub fn for_file(path: &Path, model: WhisperModel, language: &str) -> Result<Self> {
        let absolute = std::path::absolute(path)?;
        let fingerprint = fingerprint_file(&absolute)?;
        Ok(Self::new(&absolute, &fingerprint, model, language))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Hex blake3 digest of the file's bytes
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| SubtitleError::Cache(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut hasher = Hasher::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub transcript_dir: PathBuf,
    pub transcript_text: String,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    /// Monotonic access counter, orders entries with equal timestamps
    access_seq: u64,
}

impl CacheEntry {
    pub fn transcript_path(&self) -> PathBuf {
        self.transcript_dir.join(TRANSCRIPT_FILE)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Store {
    next_seq: u64,
    entries: HashMap<String, CacheEntry>,
}

/// Bounded LRU store of finished transcriptions
pub struct TranscriptionCache {
    path: PathBuf,
    capacity: usize,
    store: Store,
}

impl TranscriptionCache {
    /// Open (or create) the cache stored under `directory`
    pub fn open<P: AsRef<Path>>(directory: P, capacity: usize) -> Result<Self> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)
            .map_err(|e| SubtitleError::Cache(format!("Failed to create cache dir: {}", e)))?;

        let path = directory.join(STORE_FILE);
        let store = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring unreadable cache store {}: {}", path.display(), e);
                Store::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Store::default(),
            Err(e) => return Err(SubtitleError::Cache(format!("Failed to read cache store: {}", e))),
        };

        let mut cache = Self {
            path,
            capacity: capacity.max(1),
            store,
        };
        // A smaller capacity than last run applies immediately
        if cache.evict_to(cache.capacity) > 0 {
            cache.persist()?;
        }
        debug!("Opened transcription cache with {} entries", cache.len());
        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.store.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up `key`, marking it most recently used on a hit
    pub fn get(&mut self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let seq = self.store.next_seq;
        let Some(entry) = self.store.entries.get_mut(key.as_str()) else {
            debug!("Transcription cache miss: {}", key.as_str());
            return Ok(None);
        };

        entry.last_access = Utc::now();
        entry.access_seq = seq;
        let hit = entry.clone();
        self.store.next_seq += 1;
        self.persist()?;

        debug!("Transcription cache hit: {}", key.as_str());
        Ok(Some(hit))
    }

    /// Store a finished transcription.
    ///
    /// An existing entry for `key` is kept as is; otherwise the least recently
    /// used entry is evicted first when the store is full.
    pub fn put(&mut self, key: CacheKey, transcript_dir: PathBuf, transcript_text: String) -> Result<CacheEntry> {
        if let Some(existing) = self.get(&key)? {
            return Ok(existing);
        }

        self.evict_to(self.capacity - 1);

        let now = Utc::now();
        let entry = CacheEntry {
            key: key.clone(),
            transcript_dir,
            transcript_text,
            created_at: now,
            last_access: now,
            access_seq: self.store.next_seq,
        };
        self.store.next_seq += 1;
        self.store.entries.insert(key.0, entry.clone());
        self.persist()?;
        Ok(entry)
    }

    /// Entries ordered from most to least recently used
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.store.entries.values().cloned().collect();
        entries.sort_by(|a, b| b.access_seq.cmp(&a.access_seq));
        entries
    }

    /// Drop every entry, returning how many were removed
    pub fn clear(&mut self) -> Result<usize> {
        let removed = self.store.entries.len();
        self.store.entries.clear();
        self.persist()?;
        Ok(removed)
    }

    /// Recreate the transcript on disk if it was deleted since caching
    pub async fn materialize(entry: &CacheEntry) -> Result<PathBuf> {
        let transcript = entry.transcript_path();
        if tokio::fs::try_exists(&transcript).await? {
            return Ok(transcript);
        }

        warn!("Cached transcript missing, restoring {}", transcript.display());
        tokio::fs::create_dir_all(&entry.transcript_dir).await?;
        tokio::fs::write(&transcript, &entry.transcript_text).await?;
        Ok(transcript)
    }

    fn evict_to(&mut self, size: usize) -> usize {
        let mut evicted = 0;
        while self.store.entries.len() > size {
            let Some(oldest) = self
                .store
                .entries
                .values()
                .min_by_key(|e| e.access_seq)
                .map(|e| e.key.0.clone())
            else {
                break;
            };
            debug!("Evicting cached transcription {}", oldest);
            self.store.entries.remove(&oldest);
            evicted += 1;
        }
        evicted
    }

    fn persist(&self) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let content = serde_json::to_string_pretty(&self.store)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| SubtitleError::Cache(format!("Failed to create temp file: {}", e)))?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&self.path)
            .map_err(|e| SubtitleError::Cache(format!("Failed to write cache store: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: usize) -> CacheKey {
        CacheKey::new(Path::new(&format!("/videos/{}.mp4", n)), "abc", WhisperModel::Large, "en")
    }

    #[test]
    fn test_put_then_get_returns_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = TranscriptionCache::open(dir.path(), 16).unwrap();

        let text = "1\n00:00:00,000 --> 00:00:01,000\nHéllo wörld\n\n".to_string();
        cache.put(key(1), PathBuf::from("/out/en"), text.clone()).unwrap();

        let hit = cache.get(&key(1)).unwrap().unwrap();
        assert_eq!(hit.transcript_text.as_bytes(), text.as_bytes());
        assert_eq!(hit.transcript_dir, PathBuf::from("/out/en"));
        assert!(cache.get(&key(2)).unwrap().is_none());
    }

    #[test]
    fn test_existing_entry_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = TranscriptionCache::open(dir.path(), 4).unwrap();

        cache.put(key(1), PathBuf::from("/a"), "first".to_string()).unwrap();
        let kept = cache.put(key(1), PathBuf::from("/b"), "second".to_string()).unwrap();

        assert_eq!(kept.transcript_text, "first");
        assert_eq!(cache.get(&key(1)).unwrap().unwrap().transcript_dir, PathBuf::from("/a"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = TranscriptionCache::open(dir.path(), 3).unwrap();

        for n in 0..3 {
            cache.put(key(n), PathBuf::from("/x"), n.to_string()).unwrap();
        }
        // Touch 0 so that 1 becomes the oldest
        cache.get(&key(0)).unwrap();
        cache.put(key(3), PathBuf::from("/x"), "3".to_string()).unwrap();

        assert_eq!(cache.len(), 3);
        assert!(cache.get(&key(1)).unwrap().is_none());
        assert!(cache.get(&key(0)).unwrap().is_some());
        assert!(cache.get(&key(3)).unwrap().is_some());
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = TranscriptionCache::open(dir.path(), 16).unwrap();
            cache.put(key(7), PathBuf::from("/out"), "persisted".to_string()).unwrap();
        }

        let mut reopened = TranscriptionCache::open(dir.path(), 16).unwrap();
        let hit = reopened.get(&key(7)).unwrap().unwrap();
        assert_eq!(hit.transcript_text, "persisted");

        // Shrinking the capacity evicts on open
        for n in 0..5 {
            reopened.put(key(n), PathBuf::from("/out"), n.to_string()).unwrap();
        }
        drop(reopened);
        let shrunk = TranscriptionCache::open(dir.path(), 2).unwrap();
        assert_eq!(shrunk.len(), 2);
        let newest: Vec<String> = shrunk.entries().into_iter().map(|e| e.transcript_text).collect();
        assert_eq!(newest, vec!["4", "3"]);
    }

    #[test]
    fn test_corrupt_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORE_FILE), "{not json").unwrap();
        let cache = TranscriptionCache::open(dir.path(), 16).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = TranscriptionCache::open(dir.path(), 16).unwrap();
        cache.put(key(1), PathBuf::from("/x"), "a".to_string()).unwrap();
        cache.put(key(2), PathBuf::from("/x"), "b".to_string()).unwrap();
        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("video.mp4");
        std::fs::write(&file, b"frame-data").unwrap();
        let before = CacheKey::for_file(&file, WhisperModel::Medium, "en").unwrap();
        assert_eq!(before, CacheKey::for_file(&file, WhisperModel::Medium, "en").unwrap());
        assert_ne!(before, CacheKey::for_file(&file, WhisperModel::Large, "en").unwrap());
        assert_ne!(before, CacheKey::for_file(&file, WhisperModel::Medium, "es").unwrap());

        std::fs::write(&file, b"other-frames").unwrap();
        assert_ne!(before, CacheKey::for_file(&file, WhisperModel::Medium, "en").unwrap());
    }

    #[tokio::test]
    async fn test_materialize_restores_deleted_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("text_video").join("en");
        let mut cache = TranscriptionCache::open(dir.path().join("cache"), 16).unwrap();
        let entry = cache.put(key(1), out_dir.clone(), "cached srt".to_string()).unwrap();

        assert!(!out_dir.exists());
        let path = TranscriptionCache::materialize(&entry).await.unwrap();
        assert_eq!(path, out_dir.join(TRANSCRIPT_FILE));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "cached srt");

        // An existing transcript is left alone
        std::fs::write(&path, "edited").unwrap();
        TranscriptionCache::materialize(&entry).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "edited");
    }
}
