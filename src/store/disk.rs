use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use super::CacheStore;
use crate::batch::lock;
use crate::error::{AstCacheError, Result};

/// Current entry format version. Bump when `EntryHeader` layout changes.
pub const ENTRY_VERSION: u32 = 1;

/// File extension of stored entries.
pub const ENTRY_EXTENSION: &str = "bin";

/// Header written in front of every payload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EntryHeader {
    pub version: u32,
    /// The encoded cache key this entry was stored under.
    pub key: String,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

/// A stored entry as seen by the cleaner.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub path: PathBuf,
    pub size: u64,
    pub created: SystemTime,
    pub last_access: SystemTime,
    /// `None` when the header is unreadable or from another format version.
    pub header: Option<EntryHeader>,
}

/// One file per key under the cache root:
/// `<root>/<namespace>/<shard>/<sha256(key)>.bin`.
///
/// Writes are atomic (temp file in the same directory, then rename). A read
/// bumps the entry's mtime, so access order survives restarts and is shared by
/// every process using the same root.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    access: Mutex<HashMap<PathBuf, SystemTime>>,
}

impl DiskStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| AstCacheError::io(root, e))?;
        Ok(Self {
            root: root.to_path_buf(),
            access: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the entry for `key`.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        let namespace = key
            .split_once('/')
            .map(|(ns, _)| ns)
            .filter(|ns| !ns.is_empty() && !ns.starts_with('.'))
            .unwrap_or("_");
        self.root
            .join(namespace)
            .join(&digest[..2])
            .join(format!("{digest}.{ENTRY_EXTENSION}"))
    }

    /// Every stored entry with its size, age and header.
    pub fn entries(&self) -> Result<Vec<StoredEntry>> {
        self.entries_under(&self.root)
    }

    fn entries_under(&self, dir: &Path) -> Result<Vec<StoredEntry>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let access = lock(&self.access).clone();
        let walker = ignore::WalkBuilder::new(dir)
            .standard_filters(false)
            .hidden(false)
            .build();

        let mut entries = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(e) => e,
                Err(err) => {
                    tracing::debug!(%err, "skipping unreadable cache path");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path().to_path_buf();
            // Entries can vanish while we scan (concurrent cleanup or invalidation).
            let metadata = match std::fs::metadata(&path) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
            let header = read_header(&path);
            let created = header
                .as_ref()
                .map(|h| UNIX_EPOCH + Duration::from_secs(h.created_at))
                .unwrap_or(modified);
            let last_access = access.get(&path).copied().unwrap_or(modified).max(modified);
            entries.push(StoredEntry {
                path,
                size: metadata.len(),
                created,
                last_access,
                header,
            });
        }
        Ok(entries)
    }

    /// Delete the file at `path` (an entry or stray file under the root).
    /// Returns `false` if it was already gone.
    pub fn remove_path(&self, path: &Path) -> Result<bool> {
        lock(&self.access).remove(path);
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(AstCacheError::io(path, err)),
        }
    }

    /// Total bytes used by stored entries.
    pub fn total_size(&self) -> Result<u64> {
        Ok(self.entries()?.iter().map(|e| e.size).sum())
    }

    fn touch(&self, path: &Path) {
        let now = SystemTime::now();
        lock(&self.access).insert(path.to_path_buf(), now);
        let persisted = std::fs::File::options()
            .write(true)
            .open(path)
            .and_then(|file| file.set_modified(now));
        if let Err(err) = persisted {
            tracing::debug!(path = %path.display(), %err, "cannot record entry access");
        }
    }
}

impl CacheStore for DiskStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AstCacheError::io(&path, err)),
        };
        let (header, consumed) = match bincode::serde::decode_from_slice::<EntryHeader, _>(
            &bytes,
            bincode::config::standard(),
        ) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::debug!(path = %path.display(), %err, "unreadable cache entry");
                return Ok(None);
            }
        };
        // A digest collision or a stale format is a miss, never a wrong hit.
        if header.version != ENTRY_VERSION || header.key != key {
            return Ok(None);
        }
        self.touch(&path);
        Ok(Some(bytes[consumed..].to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let target = self.entry_path(key);
        let dir = target.parent().unwrap_or(self.root.as_path());
        std::fs::create_dir_all(dir).map_err(|e| AstCacheError::io(dir, e))?;

        let header = EntryHeader {
            version: ENTRY_VERSION,
            key: key.to_owned(),
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| AstCacheError::io(dir, e))?;
        bincode::serde::encode_into_std_write(&header, &mut tmp, bincode::config::standard())?;
        tmp.write_all(value).map_err(|e| AstCacheError::io(&target, e))?;
        tmp.flush().map_err(|e| AstCacheError::io(&target, e))?;
        tmp.persist(&target)
            .map_err(|e| AstCacheError::io(&target, e.error))?;

        self.touch(&target);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.remove_path(&self.entry_path(key))
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        // Keys carry their namespace, so a namespaced prefix only needs one directory.
        let dir = match prefix.split_once('/') {
            Some((ns, _)) if !ns.is_empty() => self.root.join(ns),
            _ => self.root.clone(),
        };
        let mut keys: Vec<String> = self
            .entries_under(&dir)?
            .into_iter()
            .filter_map(|e| e.header)
            .filter(|h| h.version == ENTRY_VERSION && h.key.starts_with(prefix))
            .map(|h| h.key)
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Decode just the header of the entry at `path`.
pub fn read_header(path: &Path) -> Option<EntryHeader> {
    let file = std::fs::File::open(path).ok()?;
    let mut reader = std::io::BufReader::new(file);
    let header: EntryHeader =
        bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard()).ok()?;
    (header.version == ENTRY_VERSION).then_some(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();

        store.set("main-1/v1|key", b"payload").unwrap();
        assert_eq!(store.get("main-1/v1|key").unwrap(), Some(b"payload".to_vec()));
        assert!(store.entry_path("main-1/v1|key").starts_with(dir.path().join("main-1")));

        assert!(store.delete("main-1/v1|key").unwrap());
        assert!(!store.delete("main-1/v1|key").unwrap());
        assert_eq!(store.get("main-1/v1|key").unwrap(), None);
    }

    #[test]
    fn test_overwrite_replaces_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        store.set("ns/k", b"one").unwrap();
        store.set("ns/k", b"two").unwrap();
        assert_eq!(store.get("ns/k").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_scan_prefix_within_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        store.set("a/v1|x|1", b"").unwrap();
        store.set("a/v1|x|2", b"").unwrap();
        store.set("a/v1|y|1", b"").unwrap();
        store.set("b/v1|x|1", b"").unwrap();

        assert_eq!(
            store.scan_prefix("a/v1|x|").unwrap(),
            vec!["a/v1|x|1".to_owned(), "a/v1|x|2".to_owned()]
        );
        assert_eq!(store.scan_prefix("b/").unwrap().len(), 1);
        assert!(store.scan_prefix("missing/").unwrap().is_empty());
    }

    #[test]
    fn test_entries_report_headers_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        store.set("ns/good", b"12345").unwrap();
        std::fs::create_dir_all(dir.path().join("ns/zz")).unwrap();
        std::fs::write(dir.path().join("ns/zz/garbage.bin"), [0xff, 0xff, 0xff]).unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        let good = entries.iter().find(|e| e.header.is_some()).unwrap();
        assert_eq!(good.header.as_ref().unwrap().key, "ns/good");
        assert!(good.size > 5);
        assert!(entries.iter().any(|e| e.header.is_none()));
    }

    #[test]
    fn test_get_tracks_last_access() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        store.set("ns/k", b"v").unwrap();
        let before = store.entries().unwrap()[0].last_access;
        std::thread::sleep(Duration::from_millis(20));
        store.get("ns/k").unwrap();
        let after = store.entries().unwrap()[0].last_access;
        assert!(after > before);
    }

    #[test]
    fn test_access_order_is_visible_to_another_instance() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DiskStore::open(dir.path()).unwrap();
        writer.set("ns/old", b"1").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        writer.set("ns/new", b"2").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        writer.get("ns/old").unwrap();
        drop(writer);

        let reader = DiskStore::open(dir.path()).unwrap();
        let mut entries = reader.entries().unwrap();
        entries.sort_by_key(|e| e.last_access);
        let order: Vec<String> = entries
            .iter()
            .map(|e| e.header.as_ref().unwrap().key.clone())
            .collect();
        assert_eq!(order, vec!["ns/new".to_owned(), "ns/old".to_owned()]);
        assert_eq!(reader.get("ns/old").unwrap().as_deref(), Some(&b"1"[..]));
    }
}
