//! Persisted session storage with platform keyring and file-based fallback.
//!
//! The session is kept as two string entries: the raw token under
//! [`TOKEN_KEY`] and the JSON-serialized user record under [`USER_KEY`].
//!
//! Storage priority:
//! 1. Platform keyring (if `keyring-storage` feature enabled and available)
//! 2. File-based storage (owner read/write only on Unix)

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[cfg(feature = "keyring-storage")]
use keyring::Entry;

use crate::config::app_config_dir;

/// Key holding the raw access token
pub const TOKEN_KEY: &str = "twitch_token";
/// Key holding the JSON-serialized user record
pub const USER_KEY: &str = "twitch_user";

/// Service name used for keyring storage
#[cfg(feature = "keyring-storage")]
const KEYRING_SERVICE: &str = "twitch-session";

/// File name used for file-based storage
const SESSION_FILE: &str = ".session";

/// Durable string key/value storage for the persisted session.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Deleting a missing key is not an error
    fn delete(&self, key: &str) -> Result<()>;
    /// Human-readable description of where entries live
    fn describe(&self) -> String;
}

// ============================================================================
// In-memory storage
// ============================================================================

/// Process-local store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Session store lock poisoned"))
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn describe(&self) -> String {
        "In-memory storage".to_string()
    }
}

// ============================================================================
// File-based storage (always available)
// ============================================================================

/// Session entries in a single JSON object file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `~/.config/twitch-session/.session`
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(app_config_dir()?.join(SESSION_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.path).context("Failed to read session file")?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&content).context("Failed to parse session file")
    }

    fn write_entries(&self, entries: &HashMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path).context("Failed to delete session file")?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let json = serde_json::to_string(entries).context("Failed to serialize session")?;

        // Set restrictive permissions on Unix before writing
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            let file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600) // Owner read/write only
                .open(&self.path)
                .context("Failed to create session file")?;
            let mut file = std::io::BufWriter::new(file);
            file.write_all(json.as_bytes())
                .context("Failed to write session file")?;
            file.flush().context("Failed to write session file")?;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .context("Failed to restrict session file permissions")?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.path, &json).context("Failed to write session file")?;
        }

        tracing::debug!("Session entries written to {:?}", self.path);
        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Session file lock poisoned"))
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.guard()?;
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.guard()?;
        let mut entries = self.read_entries()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_entries(&entries)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.guard()?;
        let mut entries = self.read_entries()?;
        if entries.remove(key).is_some() {
            self.write_entries(&entries)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("File-based storage: {}", self.path.display())
    }
}

// ============================================================================
// Keyring-based storage (optional, platform-specific)
// ============================================================================

/// One platform keychain entry per key, falling back to a file when the
/// keychain is unavailable.
#[cfg(feature = "keyring-storage")]
#[derive(Debug)]
pub struct KeyringStore {
    service: String,
    fallback: FileStore,
}

#[cfg(feature = "keyring-storage")]
impl KeyringStore {
    pub fn new(fallback: FileStore) -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
            fallback,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        tracing::trace!(
            "Creating keyring entry for service='{}', user='{}'",
            self.service,
            key
        );
        Entry::new(&self.service, key)
            .map_err(|e| anyhow::anyhow!("Failed to create keyring entry: {}", e))
    }
}

#[cfg(feature = "keyring-storage")]
impl SessionStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entry = match self.entry(key) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("{}, trying file fallback", e);
                return self.fallback.get(key);
            }
        };

        match entry.get_password() {
            Ok(value) => {
                tracing::debug!("Loaded '{}' from keyring", key);
                Ok(Some(value))
            }
            Err(keyring::Error::NoEntry) => {
                tracing::debug!("No '{}' in keyring, trying file fallback", key);
                self.fallback.get(key)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load '{}' from keyring: {}, trying file fallback",
                    key,
                    e
                );
                self.fallback.get(key)
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let entry = match self.entry(key) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("{}, using file storage", e);
                return self.fallback.set(key, value);
            }
        };

        if let Err(e) = entry.set_password(value) {
            tracing::warn!("Failed to save '{}' to keyring: {}, using file storage", key, e);
            return self.fallback.set(key, value);
        }

        // A stale fallback copy must not outlive the keyring entry
        if let Err(e) = self.fallback.delete(key) {
            tracing::debug!("Failed to clear fallback copy of '{}': {}", key, e);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        // Always delete from file as well
        if let Err(e) = self.fallback.delete(key) {
            tracing::warn!("Failed to delete '{}' from session file: {}", key, e);
        }

        let entry = self.entry(key)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Already deleted
            Err(e) => Err(anyhow::anyhow!(
                "Failed to delete '{}' from keyring: {}",
                key,
                e
            )),
        }
    }

    fn describe(&self) -> String {
        format!("{} (with file fallback)", keyring_platform_name())
    }
}

#[cfg(feature = "keyring-storage")]
fn keyring_platform_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "Windows Credential Manager"
    } else if cfg!(target_os = "macos") {
        "macOS Keychain"
    } else if cfg!(target_os = "linux") {
        "Linux Secret Service (GNOME Keyring/KWallet)"
    } else {
        "Platform keychain"
    }
}

// ============================================================================
// Public API
// ============================================================================

/// The store selected by crate features: keyring when `keyring-storage` is
/// enabled, the session file otherwise.
pub fn default_store() -> Result<Arc<dyn SessionStore>> {
    let file = FileStore::default_location()?;

    #[cfg(feature = "keyring-storage")]
    let store: Arc<dyn SessionStore> = Arc::new(KeyringStore::new(file));

    #[cfg(not(feature = "keyring-storage"))]
    let store: Arc<dyn SessionStore> = Arc::new(file);

    Ok(store)
}

/// Get information about session storage location (for documentation/debugging)
pub fn get_storage_info() -> String {
    match default_store() {
        Ok(store) => store.describe(),
        Err(_) => "File-based storage: ~/.config/twitch-session/.session".to_string(),
    }
}
