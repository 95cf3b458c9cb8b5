//! Key-value persistence for widget state and the export counter
//!
//! The export pipeline itself never touches storage: callers load the
//! counter, pass the derived filename in, and save the advanced counter once
//! an export succeeds. Loads never fail; a missing or malformed value is
//! `None`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Error, ExportResult, Result};

pub const METADATA_KEY: &str = "ipodSnapshotMetadata";
pub const UI_STATE_KEY: &str = "ipodSnapshotUiState";
pub const SNAPSHOT_KEY: &str = "ipodSnapshotSongSnapshot";
pub const EXPORT_COUNTER_KEY: &str = "ipodExportCounter";

/// Digits in the zero-padded export tag
pub const EXPORT_COUNTER_PAD: usize = 4;

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RefCell<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.borrow_mut().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One `<key>.json` file per key under a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(Error::StorageError(format!("invalid key {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::StorageError(format!("read {}: {}", path.display(), e))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, value).map_err(|e| Error::StorageError(format!("write {}: {}", path.display(), e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub artwork: String,
    pub duration: f64,
    pub current_time: f64,
    pub rating: f64,
    pub track_number: f64,
    pub total_tracks: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewMode {
    #[serde(rename = "flat")]
    Flat,
    #[serde(rename = "3d")]
    ThreeD,
    #[serde(rename = "focus")]
    Focus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub skin_color: String,
    pub bg_color: String,
    pub view_mode: ViewMode,
}

/// Whatever fields of a stored [`UiState`] passed validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiStatePatch {
    pub skin_color: Option<String>,
    pub bg_color: Option<String>,
    pub view_mode: Option<ViewMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongSnapshot {
    pub metadata: SongMetadata,
    pub ui: UiState,
}

/// `#rgb` or `#rrggbb`
pub fn is_hex_color(value: &str) -> bool {
    value
        .strip_prefix('#')
        .map(|h| (h.len() == 3 || h.len() == 6) && h.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

fn parse_view_mode(value: &serde_json::Value) -> Option<ViewMode> {
    serde_json::from_value(value.clone()).ok()
}

fn load_json(store: &dyn KeyValueStore, key: &str) -> Option<serde_json::Value> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            log::warn!("[storage] failed to read {}: {}", key, e);
            return None;
        }
    };
    serde_json::from_str::<serde_json::Value>(&raw)
        .ok()
        .filter(|v| v.is_object())
}

fn save_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) {
    let result = serde_json::to_string(value)
        .map_err(|e| Error::StorageError(e.to_string()))
        .and_then(|json| store.set(key, &json));
    if let Err(e) = result {
        log::warn!("[storage] failed to save {}: {}", key, e);
    }
}

/// Stored metadata object. Fields are not validated, matching how partial
/// metadata is merged over defaults by the widget.
pub fn load_metadata(store: &dyn KeyValueStore) -> Option<serde_json::Map<String, serde_json::Value>> {
    match load_json(store, METADATA_KEY)? {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}

pub fn save_metadata(store: &dyn KeyValueStore, metadata: &SongMetadata) {
    save_json(store, METADATA_KEY, metadata);
}

/// Stored UI state with every invalid field dropped
pub fn load_ui_state(store: &dyn KeyValueStore) -> Option<UiStatePatch> {
    let value = load_json(store, UI_STATE_KEY)?;
    let color = |name: &str| {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| is_hex_color(s))
            .map(str::to_string)
    };
    Some(UiStatePatch {
        skin_color: color("skinColor"),
        bg_color: color("bgColor"),
        view_mode: value.get("viewMode").and_then(parse_view_mode),
    })
}

pub fn save_ui_state(store: &dyn KeyValueStore, state: &UiState) {
    save_json(store, UI_STATE_KEY, state);
}

/// Stored snapshot, only when every field is present and valid
pub fn load_song_snapshot(store: &dyn KeyValueStore) -> Option<SongSnapshot> {
    let value = load_json(store, SNAPSHOT_KEY)?;
    let snapshot: SongSnapshot = serde_json::from_value(value).ok()?;
    if !is_hex_color(&snapshot.ui.skin_color) || !is_hex_color(&snapshot.ui.bg_color) {
        return None;
    }
    Some(snapshot)
}

pub fn save_song_snapshot(store: &dyn KeyValueStore, snapshot: &SongSnapshot) {
    save_json(store, SNAPSHOT_KEY, snapshot);
}

/// Stored export counter, `0` when absent or malformed
pub fn load_export_counter(store: &dyn KeyValueStore) -> u64 {
    match store.get(EXPORT_COUNTER_KEY) {
        Ok(Some(raw)) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n.floor() as u64)
            .unwrap_or(0),
        Ok(None) => 0,
        Err(e) => {
            log::warn!("[storage] failed to read export counter: {}", e);
            0
        }
    }
}

pub fn save_export_counter(store: &dyn KeyValueStore, counter: u64) {
    if let Err(e) = store.set(EXPORT_COUNTER_KEY, &counter.to_string()) {
        log::warn!("[storage] failed to save export counter: {}", e);
    }
}

/// Zero-padded counter, e.g. `0007`
pub fn export_tag(counter: u64) -> String {
    format!("{:0width$}", counter, width = EXPORT_COUNTER_PAD)
}

/// Lowercase, non-alphanumeric runs collapsed to `-`, `snapshot` when empty
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in title.trim().to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "snapshot".to_string()
    } else {
        slug
    }
}

/// `ipod-<tag>-<slug>.png`
pub fn export_filename(counter: u64, title: &str) -> String {
    format!("ipod-{}-{}.png", export_tag(counter), slugify(title))
}

/// Counter value after `result`: advanced only on success
pub fn advance_counter(counter: u64, result: &ExportResult) -> u64 {
    if result.success {
        counter + 1
    } else {
        counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExportMethod;

    fn snapshot() -> SongSnapshot {
        SongSnapshot {
            metadata: SongMetadata {
                title: "Have A Destination?".into(),
                artist: "Mac Miller".into(),
                album: "Balloonerism".into(),
                artwork: "/mac-miller-test.jpg".into(),
                duration: 334.0,
                current_time: 5.0,
                rating: 5.0,
                track_number: 2.0,
                total_tracks: 10.0,
            },
            ui: UiState {
                skin_color: "#F5F5F7".into(),
                bg_color: "#D4D6D8".into(),
                view_mode: ViewMode::Flat,
            },
        }
    }

    #[test]
    fn filenames_are_tagged_and_slugged() {
        assert_eq!(export_tag(7), "0007");
        assert_eq!(export_tag(12345), "12345");
        assert_eq!(export_filename(7, "Have A Destination?"), "ipod-0007-have-a-destination.png");
        assert_eq!(export_filename(0, "  ***  "), "ipod-0000-snapshot.png");
        assert_eq!(slugify("--Déjà Vu--"), "d-j-vu");
    }

    #[test]
    fn counter_round_trip_and_advance() {
        let store = MemoryStore::new();
        assert_eq!(load_export_counter(&store), 0);
        save_export_counter(&store, 41);
        assert_eq!(load_export_counter(&store), 41);
        store.set(EXPORT_COUNTER_KEY, "garbage").unwrap();
        assert_eq!(load_export_counter(&store), 0);

        let ok = ExportResult {
            success: true,
            method: ExportMethod::Download,
            capture_path: Some("clone-primary".into()),
            blob_size: Some(2048),
            blob_digest: None,
            error: None,
        };
        assert_eq!(advance_counter(41, &ok), 42);
        assert_eq!(advance_counter(41, &ExportResult::failure("x")), 41);
    }

    #[test]
    fn ui_state_drops_invalid_fields() {
        let store = MemoryStore::new();
        store
            .set(UI_STATE_KEY, r##"{"skinColor":"#abc","bgColor":"blue","viewMode":"3d"}"##)
            .unwrap();
        let patch = load_ui_state(&store).unwrap();
        assert_eq!(patch.skin_color.as_deref(), Some("#abc"));
        assert_eq!(patch.bg_color, None);
        assert_eq!(patch.view_mode, Some(ViewMode::ThreeD));

        store.set(UI_STATE_KEY, "[1,2]").unwrap();
        assert!(load_ui_state(&store).is_none());
    }

    #[test]
    fn snapshot_requires_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        save_song_snapshot(&store, &snapshot());
        assert_eq!(load_song_snapshot(&store), Some(snapshot()));

        store
            .set(SNAPSHOT_KEY, r##"{"metadata":{"title":"x"},"ui":{"skinColor":"#fff","bgColor":"#000","viewMode":"flat"}}"##)
            .unwrap();
        assert!(load_song_snapshot(&store).is_none());

        let mut bad = snapshot();
        bad.ui.bg_color = "grey".into();
        save_song_snapshot(&store, &bad);
        assert!(load_song_snapshot(&store).is_none());
    }

    #[test]
    fn file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.set("../escape", "1").is_err());
        assert_eq!(store.get("missing").unwrap(), None);
        save_metadata(&store, &snapshot().metadata);
        assert_eq!(
            load_metadata(&store).unwrap().get("title").and_then(|v| v.as_str()),
            Some("Have A Destination?")
        );
    }
}
