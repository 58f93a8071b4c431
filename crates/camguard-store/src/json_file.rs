//! JSON document backends

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::{CURRENT_SCHEMA_VERSION, PersistedState, StateStore, StoreError, StoreResult};

/// Stores the state document as a single JSON file.
///
/// Writes go to a sibling `.tmp` file which is synced and then renamed over
/// the real file, so an interrupted write never leaves a truncated document.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> StoreResult<Option<PersistedState>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No state file, starting empty");
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)?;
        decode(&contents).map(Some)
    }

    fn save(&self, state: &PersistedState) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(state)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.tmp_path();
        let mut file = File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &self.path)?;

        debug!(path = %self.path.display(), bytes = json.len(), "State saved");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.is_dir(),
            _ => true,
        }
    }
}

/// Keeps the serialized document in memory (for testing)
#[derive(Default)]
pub struct MemoryStore {
    document: Mutex<Option<String>>,
    fail_saves: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing serialized document
    pub fn with_document(json: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(Some(json.into())),
            fail_saves: Mutex::new(false),
        }
    }

    /// Make subsequent saves fail with an IO error
    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap() = fail;
    }

    pub fn document(&self) -> Option<String> {
        self.document.lock().unwrap().clone()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> StoreResult<Option<PersistedState>> {
        match self.document.lock().unwrap().as_deref() {
            Some(json) => decode(json).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, state: &PersistedState) -> StoreResult<()> {
        if *self.fail_saves.lock().unwrap() {
            return Err(StoreError::Io(std::io::Error::other("simulated write failure")));
        }
        let json = serde_json::to_string(state)?;
        *self.document.lock().unwrap() = Some(json);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        !*self.fail_saves.lock().unwrap()
    }
}

/// Parse a document, upgrading older schema versions
fn decode(contents: &str) -> StoreResult<PersistedState> {
    let mut doc: serde_json::Value = serde_json::from_str(contents)
        .map_err(|e| StoreError::Malformed(e.to_string()))?;

    let found = doc
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| StoreError::Malformed("missing schema_version".into()))?;

    let version = u32::try_from(found)
        .ok()
        .filter(|v| (1..=CURRENT_SCHEMA_VERSION).contains(v))
        .ok_or(StoreError::UnsupportedVersion {
            found,
            supported: CURRENT_SCHEMA_VERSION,
        })?;

    for from in version..CURRENT_SCHEMA_VERSION {
        migrate(&mut doc, from)?;
    }

    serde_json::from_value(doc).map_err(|e| StoreError::Malformed(e.to_string()))
}

/// Upgrade a document from `from` to `from + 1`.
///
/// Version 1 is the only schema so far; each future bump adds its upgrade
/// step here.
fn migrate(_doc: &mut serde_json::Value, from: u32) -> StoreResult<()> {
    Err(StoreError::UnsupportedVersion {
        found: u64::from(from),
        supported: CURRENT_SCHEMA_VERSION,
    })
}
