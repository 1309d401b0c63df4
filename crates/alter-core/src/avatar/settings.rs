//! Client-held settings persisted in SQLite
//!
//! The store may be empty, stale, or wiped between runs. Reads that fail to
//! parse are logged and treated as missing so callers re-derive defaults.

use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::avatar::AvatarReference;
use crate::{Error, Result};

const SELECTED_AVATAR_KEY: &str = "selected_avatar";
const CUSTOM_IMAGE_PREFIX: &str = "custom_avatar_url:";

/// SQLite-backed key/value store for local settings
pub struct SettingsStore {
    conn: Mutex<Connection>,
}

impl SettingsStore {
    /// Open (or create) the settings database at `db_path`
    pub fn new(db_path: &str) -> Result<Self> {
        debug!("Opening settings database at: {}", db_path);
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_tables()?;
        info!("SettingsStore initialized");
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> Result<()> {
        self.lock()?.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Other("settings store lock poisoned".to_string()))
    }

    /// Read a value. Missing or unparseable entries yield `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self
            .lock()?
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Ignoring stale setting {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Write a value, replacing any previous one
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.lock()?.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, json, Utc::now().to_rfc3339()],
        )?;
        debug!("Saved setting: {}", key);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.lock()?
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Drop every setting
    pub fn clear(&self) -> Result<()> {
        self.lock()?.execute("DELETE FROM settings", [])?;
        info!("Cleared all settings");
        Ok(())
    }
}

/// Avatar persistence on top of [`SettingsStore`]
pub trait AvatarSettings: Send + Sync {
    /// Load the avatar to use at startup.
    ///
    /// An `explicit` selection (e.g. from the command line) replaces whatever
    /// was stored; otherwise the stored selection wins over `configured`.
    /// The last custom image set for the chosen alter is re-applied.
    fn load_avatar(&self, configured: AvatarReference, explicit: bool) -> AvatarReference;

    /// Persist the selection and its custom image
    fn save_avatar(&self, avatar: &AvatarReference) -> Result<()>;
}

impl AvatarSettings for SettingsStore {
    fn load_avatar(&self, configured: AvatarReference, explicit: bool) -> AvatarReference {
        let stored = if explicit {
            None
        } else {
            self.get::<AvatarReference>(SELECTED_AVATAR_KEY)
                .unwrap_or_else(|e| {
                    warn!("Failed to read selected avatar: {}", e);
                    None
                })
                .filter(|a| !a.id.trim().is_empty())
        };

        let mut avatar = stored.unwrap_or(configured);

        let custom_key = format!("{}{}", CUSTOM_IMAGE_PREFIX, avatar.id);
        match self.get::<String>(&custom_key) {
            Ok(custom) => avatar.set_custom_image(custom),
            Err(e) => warn!("Failed to read custom avatar image: {}", e),
        }

        debug!("Loaded avatar {} ({})", avatar.id, avatar.kind);
        avatar
    }

    fn save_avatar(&self, avatar: &AvatarReference) -> Result<()> {
        self.set(SELECTED_AVATAR_KEY, avatar)?;

        let custom_key = format!("{}{}", CUSTOM_IMAGE_PREFIX, avatar.id);
        match &avatar.custom_image_url {
            Some(url) => self.set(&custom_key, url),
            None => self.remove(&custom_key),
        }
    }
}
