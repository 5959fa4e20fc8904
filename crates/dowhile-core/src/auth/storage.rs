//! Key-value persistence for the session credential.
//!
//! Mirrors the browser's local storage: string keys mapped to string values,
//! with removal of a missing key being a no-op.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use keyring::Entry;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// Storage file name in the data directory
const STORAGE_FILE: &str = "storage.json";

/// Keychain service name used by `KeyringStorage`
const KEYRING_SERVICE: &str = "dowhile";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

pub trait CredentialStorage: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Returns `Ok(())` even if nothing was stored under `key`.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Backend name for logging
    fn name(&self) -> &str {
        "unknown"
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local storage. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with a single entry
    pub fn with_entry(key: &str, value: &str) -> Self {
        let storage = Self::new();
        storage.lock().insert(key.to_string(), value.to_string());
        storage
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStorage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.lock().remove(key);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// JSON file
// ============================================================================

/// Entries persisted as a JSON object in `<dir>/storage.json`.
///
/// Writes go to a temp file in the same directory that is renamed over the
/// target, so a crash never leaves a half-written file. On Unix the file is
/// readable by the owner only.
pub struct FileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STORAGE_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> StorageResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    /// Like `read_all`, but a corrupt file is treated as empty so the next
    /// write replaces it. The flag is set when that happened.
    fn read_for_update(&self) -> StorageResult<(BTreeMap<String, String>, bool)> {
        match self.read_all() {
            Err(StorageError::Corrupt(e)) => {
                warn!(error = %e, path = %self.path.display(), "Storage file is corrupt, starting from empty");
                Ok((BTreeMap::new(), true))
            }
            other => Ok((other?, false)),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let contents = serde_json::to_string_pretty(entries)?;

        // NamedTempFile is created with mode 0600 on Unix
        let mut file = NamedTempFile::new_in(parent)?;
        file.write_all(contents.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl CredentialStorage for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let (mut entries, _) = self.read_for_update()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let (mut entries, repaired) = self.read_for_update()?;
        if entries.remove(key).is_some() || repaired {
            self.write_all(&entries)?;
        } else {
            debug!(key = key, "Nothing stored under key");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// Entries stored in the OS keychain, one keychain item per key.
///
/// Entries are opened once per key and reused, so every call for a key
/// goes through the same keychain item.
pub struct KeyringStorage {
    service: String,
    entries: Mutex<HashMap<String, Entry>>,
}

impl fmt::Debug for KeyringStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyringStorage")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyringStorage {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn with_entry<T>(&self, key: &str, f: impl FnOnce(&Entry) -> StorageResult<T>) -> StorageResult<T> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = match entries.entry(key.to_string()) {
            std::collections::hash_map::Entry::Occupied(slot) => slot.into_mut(),
            std::collections::hash_map::Entry::Vacant(slot) => slot.insert(Entry::new(&self.service, key)?),
        };
        f(entry)
    }
}

impl CredentialStorage for KeyringStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        })
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.with_entry(key, |entry| Ok(entry.set_password(value)?))
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        })
    }

    fn name(&self) -> &str {
        "keyring"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("k").unwrap(), None);

        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));

        storage.remove("k").unwrap();
        assert!(!storage.contains_key("k"));
        // Removing again is fine
        storage.remove("k").unwrap();
    }

    #[test]
    fn test_memory_storage_clones_share_entries() {
        let storage = MemoryStorage::with_entry("@dowhile:token", "T1");
        let clone = storage.clone();
        clone.remove("@dowhile:token").unwrap();
        assert!(!storage.contains_key("@dowhile:token"));
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let storage = FileStorage::new(dir.path());
        assert_eq!(storage.get("@dowhile:token").unwrap(), None);
        storage.set("@dowhile:token", "T1").unwrap();
        storage.set("other", "x").unwrap();

        let reopened = FileStorage::new(dir.path());
        assert_eq!(reopened.get("@dowhile:token").unwrap().as_deref(), Some("T1"));

        reopened.remove("@dowhile:token").unwrap();
        assert_eq!(storage.get("@dowhile:token").unwrap(), None);
        assert_eq!(storage.get("other").unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn test_file_storage_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let storage = FileStorage::new(&nested);
        storage.set("k", "v").unwrap();
        assert!(storage.path().exists());
    }

    #[test]
    fn test_file_storage_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        std::fs::write(storage.path(), "not json").unwrap();
        assert!(matches!(storage.get("k"), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_file_storage_recovers_from_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        std::fs::write(storage.path(), r#"{"@dowhile:tok"#).unwrap();

        storage.set("@dowhile:token", "T2").unwrap();
        assert_eq!(storage.get("@dowhile:token").unwrap().as_deref(), Some("T2"));
    }

    #[test]
    fn test_file_storage_remove_repairs_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        std::fs::write(storage.path(), "not json").unwrap();

        storage.remove("@dowhile:token").unwrap();
        assert_eq!(storage.get("@dowhile:token").unwrap(), None);
    }

    #[test]
    fn test_file_storage_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.set("a", "1").unwrap();
        storage.set("b", "2").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(STORAGE_FILE)]);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_storage_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.set("@dowhile:token", "T2").unwrap();

        let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_keyring_storage_roundtrip_with_mock() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());

        let storage = KeyringStorage::new("dowhile-test");
        assert_eq!(storage.get("@dowhile:token").unwrap(), None);

        storage.set("@dowhile:token", "T2").unwrap();
        assert_eq!(storage.get("@dowhile:token").unwrap().as_deref(), Some("T2"));

        storage.remove("@dowhile:token").unwrap();
        assert_eq!(storage.get("@dowhile:token").unwrap(), None);
        // Removing again is fine
        storage.remove("@dowhile:token").unwrap();
    }
}
