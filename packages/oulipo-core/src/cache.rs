//! Bounded cache of per-document streams with write-back on eviction.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::element::StreamElement;
use crate::error::{Error, Result};
use crate::ids::Identifier;
use crate::machine::DocumentStreams;
use crate::stream::VariantStream;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Millisecond time source used for expiry.
pub trait Clock {
    fn now_millis(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Persisted form of a document's streams: their element lists in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StreamSnapshot {
    pub variant: Vec<StreamElement>,
    pub overlay: Vec<StreamElement>,
}

impl StreamSnapshot {
    pub fn of(streams: &DocumentStreams) -> Self {
        Self {
            variant: streams.variant.stream_elements(),
            overlay: streams.overlay.stream_elements(),
        }
    }

    pub fn into_streams(self, home: &Identifier) -> Result<DocumentStreams> {
        Ok(DocumentStreams {
            variant: VariantStream::from_elements(home.clone(), self.variant)?,
            overlay: VariantStream::from_elements(home.clone(), self.overlay)?,
        })
    }
}

/// Where evicted streams are written and misses are loaded from.
pub trait SnapshotStore {
    fn save(&mut self, home: &Identifier, snapshot: &StreamSnapshot) -> Result<()>;
    fn load(&self, home: &Identifier) -> Result<Option<StreamSnapshot>>;
}

#[derive(Clone, Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: HashMap<Identifier, StreamSnapshot>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&mut self, home: &Identifier, snapshot: &StreamSnapshot) -> Result<()> {
        self.snapshots.insert(home.clone(), snapshot.clone());
        Ok(())
    }

    fn load(&self, home: &Identifier) -> Result<Option<StreamSnapshot>> {
        Ok(self.snapshots.get(home).cloned())
    }
}

#[cfg(feature = "serde")]
pub use json::JsonFileSnapshotStore;

#[cfg(feature = "serde")]
mod json {
    use std::fs;
    use std::io::ErrorKind;
    use std::path::{Path, PathBuf};

    use super::{SnapshotStore, StreamSnapshot};
    use crate::element::StreamElement;
    use crate::error::{Error, Result};
    use crate::ids::Identifier;

    fn storage<E: std::fmt::Display>(e: E) -> Error {
        Error::Storage(e.to_string())
    }

    /// Writes `<digest>-invariants.json` and `<digest>-overlays.json` under a directory, where
    /// `<digest>` is the hex blake3 digest of the home identifier.
    #[derive(Clone, Debug)]
    pub struct JsonFileSnapshotStore {
        dir: PathBuf,
    }

    impl JsonFileSnapshotStore {
        pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
            let dir = dir.as_ref().to_path_buf();
            fs::create_dir_all(&dir).map_err(storage)?;
            Ok(Self { dir })
        }

        /// Snapshot files are named by the blake3 digest of the home identifier, so distinct
        /// identifiers never share a file.
        fn file(&self, home: &Identifier, kind: &str) -> PathBuf {
            let name = blake3::hash(home.as_str().as_bytes()).to_hex();
            self.dir.join(format!("{name}-{kind}.json"))
        }

        fn read(path: &Path) -> Result<Option<Vec<StreamElement>>> {
            match fs::read(path) {
                Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(storage),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(storage(e)),
            }
        }
    }

    impl SnapshotStore for JsonFileSnapshotStore {
        fn save(&mut self, home: &Identifier, snapshot: &StreamSnapshot) -> Result<()> {
            let variant = serde_json::to_vec_pretty(&snapshot.variant).map_err(storage)?;
            let overlay = serde_json::to_vec_pretty(&snapshot.overlay).map_err(storage)?;
            fs::write(self.file(home, "invariants"), variant).map_err(storage)?;
            fs::write(self.file(home, "overlays"), overlay).map_err(storage)?;
            Ok(())
        }

        fn load(&self, home: &Identifier) -> Result<Option<StreamSnapshot>> {
            let Some(variant) = Self::read(&self.file(home, "invariants"))? else {
                return Ok(None);
            };
            let overlay = Self::read(&self.file(home, "overlays"))?.unwrap_or_default();
            Ok(Some(StreamSnapshot { variant, overlay }))
        }
    }
}

#[derive(Debug)]
struct Entry {
    streams: DocumentStreams,
    written_at: u64,
    last_access: u64,
}

/// Streams of recently used documents, bounded by [`CacheConfig`].
///
/// Writers take a document's streams out with [`StreamCache::take`] and hand them back with
/// [`StreamCache::put_back`]; a document can be taken by one writer at a time. Entries leaving
/// the cache are saved to the snapshot store first. If saving fails the error is returned and
/// the entry stays cached.
pub struct StreamCache<P: SnapshotStore, C: Clock = SystemClock> {
    config: CacheConfig,
    snapshots: P,
    clock: C,
    entries: HashMap<Identifier, Entry>,
    taken: HashSet<Identifier>,
    access: u64,
}

impl<P: SnapshotStore> StreamCache<P, SystemClock> {
    pub fn new(config: CacheConfig, snapshots: P) -> Self {
        Self::with_clock(config, snapshots, SystemClock)
    }
}

impl<P: SnapshotStore, C: Clock> StreamCache<P, C> {
    pub fn with_clock(config: CacheConfig, snapshots: P, clock: C) -> Self {
        Self {
            config,
            snapshots,
            clock,
            entries: HashMap::new(),
            taken: HashSet::new(),
            access: 0,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn snapshots(&self) -> &P {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, home: &Identifier) -> bool {
        self.entries.contains_key(home)
    }

    fn next_access(&mut self) -> u64 {
        self.access += 1;
        self.access
    }

    fn check_not_taken(&self, home: &Identifier) -> Result<()> {
        if self.taken.contains(home) {
            return Err(Error::InvalidOperation(format!(
                "streams of {home} are taken by a writer"
            )));
        }
        Ok(())
    }

    fn load(&self, home: &Identifier) -> Result<DocumentStreams> {
        match self.snapshots.load(home)? {
            Some(snapshot) => {
                debug!(%home, "loaded streams from snapshot");
                snapshot.into_streams(home)
            }
            None => Ok(DocumentStreams::new(home.clone())),
        }
    }

    /// Remove a document's streams for exclusive mutation.
    pub fn take(&mut self, home: &Identifier) -> Result<DocumentStreams> {
        self.check_not_taken(home)?;
        let streams = match self.entries.remove(home) {
            Some(entry) => entry.streams,
            None => self.load(home)?,
        };
        self.taken.insert(home.clone());
        Ok(streams)
    }

    /// Return streams obtained from [`StreamCache::take`], evicting least recently used entries
    /// beyond the size bound.
    pub fn put_back(&mut self, streams: DocumentStreams) -> Result<()> {
        let home = streams.home().clone();
        self.taken.remove(&home);
        let access = self.next_access();
        self.entries.insert(
            home.clone(),
            Entry {
                streams,
                written_at: self.clock.now_millis(),
                last_access: access,
            },
        );
        self.evict_overflow(&home)
    }

    /// Shared access to a document's streams, loading them on a miss.
    pub fn get(&mut self, home: &Identifier) -> Result<&DocumentStreams> {
        self.check_not_taken(home)?;
        let access = self.next_access();
        if let Some(entry) = self.entries.get_mut(home) {
            entry.last_access = access;
        } else {
            let streams = self.load(home)?;
            let written_at = self.clock.now_millis();
            self.entries.insert(
                home.clone(),
                Entry {
                    streams,
                    written_at,
                    last_access: access,
                },
            );
            self.evict_overflow(home)?;
        }
        self.entries
            .get(home)
            .map(|entry| &entry.streams)
            .ok_or_else(|| Error::InconsistentState(format!("{home} vanished from cache")))
    }

    fn evict_overflow(&mut self, keep: &Identifier) -> Result<()> {
        while self.entries.len() > self.config.maximum_size {
            let victim = self
                .entries
                .iter()
                .filter(|(home, _)| *home != keep)
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(home, _)| home.clone());
            let Some(victim) = victim else {
                break;
            };
            self.evict(&victim)?;
        }
        Ok(())
    }

    /// Save a document's streams and drop them from the cache. Returns whether it was cached.
    pub fn evict(&mut self, home: &Identifier) -> Result<bool> {
        let Some(entry) = self.entries.get(home) else {
            return Ok(false);
        };
        let snapshot = StreamSnapshot::of(&entry.streams);
        if let Err(e) = self.snapshots.save(home, &snapshot) {
            warn!(%home, error = %e, "write-back on eviction failed");
            return Err(match e {
                Error::Storage(_) => e,
                other => Error::Storage(other.to_string()),
            });
        }
        self.entries.remove(home);
        debug!(%home, "evicted streams");
        Ok(true)
    }

    /// Evict every entry written longer ago than `expire_after_write`. Returns how many left.
    pub fn expire(&mut self) -> Result<usize> {
        let now = self.clock.now_millis();
        let ttl = self.config.expire_after_write.as_millis() as u64;
        let mut expired: Vec<(u64, Identifier)> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_sub(entry.written_at) >= ttl)
            .map(|(home, entry)| (entry.written_at, home.clone()))
            .collect();
        expired.sort();
        for (_, home) in &expired {
            self.evict(home)?;
        }
        Ok(expired.len())
    }

    /// Save and drop every cached entry.
    pub fn flush(&mut self) -> Result<()> {
        let mut homes: Vec<Identifier> = self.entries.keys().cloned().collect();
        homes.sort();
        for home in &homes {
            self.evict(home)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::element::Overlay;

    fn home(n: u32) -> Identifier {
        Identifier::new(format!("ted://1.999.0.{n}"))
    }

    fn config(size: usize) -> CacheConfig {
        CacheConfig {
            maximum_size: size,
            expire_after_write: Duration::from_secs(60),
        }
    }

    fn touched(h: Identifier) -> DocumentStreams {
        let mut streams = DocumentStreams::new(h);
        streams
            .overlay
            .put(1, StreamElement::OverlaySpan(Overlay::plain(4)))
            .unwrap();
        streams
    }

    #[test]
    fn miss_without_snapshot_is_empty() {
        let mut cache = StreamCache::new(config(2), MemorySnapshotStore::new());
        assert!(cache.get(&home(1)).unwrap().is_empty());
    }

    #[test]
    fn overflow_writes_back_least_recent() {
        let mut cache = StreamCache::new(config(1), MemorySnapshotStore::new());
        let first = cache.take(&home(1)).unwrap();
        cache.put_back(touched(first.home().clone())).unwrap();
        let second = cache.take(&home(2)).unwrap();
        cache.put_back(second).unwrap();
        assert!(!cache.contains(&home(1)));
        assert_eq!(cache.snapshots().len(), 1);
        assert_eq!(cache.get(&home(1)).unwrap().overlay.character_count(), 4);
    }

    #[test]
    fn taken_streams_have_one_writer() {
        let mut cache = StreamCache::new(config(2), MemorySnapshotStore::new());
        let streams = cache.take(&home(1)).unwrap();
        assert!(matches!(
            cache.take(&home(1)),
            Err(Error::InvalidOperation(_))
        ));
        cache.put_back(streams).unwrap();
        assert!(cache.take(&home(1)).is_ok());
    }

    #[test]
    fn expire_uses_write_time() {
        let clock = ManualClock::new(0);
        let mut cache =
            StreamCache::with_clock(config(10), MemorySnapshotStore::new(), clock.clone());
        cache.put_back(touched(home(1))).unwrap();
        clock.advance(30_000);
        cache.put_back(touched(home(2))).unwrap();
        clock.advance(30_000);
        assert_eq!(cache.expire().unwrap(), 1);
        assert!(cache.contains(&home(2)));
        assert!(!cache.contains(&home(1)));
    }
}
