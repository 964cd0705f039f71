//! Durable state: the "last state" record restored at startup, and named
//! snapshots kept as JSON files in the saves directory.
//!
//! Files look like `{"kind":"image","content":[[...]]}` or
//! `{"kind":"video","path":"saves/videos/clip.gif","brightness":40}`.
//!
//! A missing or unreadable last-state file means "no prior state"; it is
//! logged and never fatal.

use crate::error::{JumbotronError, Result};
use crate::pixel::PixelGrid;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SavedState {
    Image { content: PixelGrid },
    Video { path: String, brightness: u8 },
}

impl SavedState {
    pub fn kind(&self) -> &'static str {
        match self {
            SavedState::Image { .. } => "image",
            SavedState::Video { .. } => "video",
        }
    }
}

/// Where the last-active state lives.
pub trait StateStore: Send + Sync {
    fn save(&self, state: &SavedState) -> Result<()>;

    /// `None` when there is no usable record.
    fn load(&self) -> Option<SavedState>;
}

/// Write through a temporary file so a crash never leaves half a record.
fn write_json(path: &Path, state: &SavedState) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec(state)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateStore for FileStateStore {
    fn save(&self, state: &SavedState) -> Result<()> {
        write_json(&self.path, state)
    }

    fn load(&self) -> Option<SavedState> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Cannot read {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("Ignoring corrupt state file {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

// ── Named snapshots ──────────────────────────────────────────────────

/// One entry of the saves listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct SnapshotEntry {
    /// Snapshot name (without `.json`)
    #[schema(example = "sunset")]
    pub name: String,
    /// `image` or `video`
    #[schema(example = "image")]
    pub kind: String,
}

/// Snapshot names map straight to file names, so keep them boring.
pub fn validate_name(name: &str) -> Result<&str> {
    let name = name.strip_suffix(".json").unwrap_or(name);
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(name)
    } else {
        Err(JumbotronError::InvalidName(name.to_string()))
    }
}

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Where uploaded videos are kept.
    pub fn videos_dir(&self) -> PathBuf {
        self.dir.join("videos")
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let name = validate_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }

    pub fn save(&self, name: &str, state: &SavedState) -> Result<()> {
        let path = self.path_for(name)?;
        write_json(&path, state)?;
        tracing::info!("Saved {} snapshot {}", state.kind(), path.display());
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<SavedState> {
        let path = self.path_for(name)?;
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => JumbotronError::SnapshotNotFound(name.to_string()),
            _ => JumbotronError::Storage(e),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Remove the snapshot file and return what it held.
    ///
    /// A snapshot that no longer parses is still removed.
    pub fn delete(&self, name: &str) -> Result<Option<SavedState>> {
        let path = self.path_for(name)?;
        let state = match self.load(name) {
            Ok(state) => Some(state),
            Err(JumbotronError::CorruptState(e)) => {
                tracing::warn!("Deleting unreadable snapshot {}: {}", path.display(), e);
                None
            }
            Err(e) => return Err(e),
        };
        fs::remove_file(&path)?;
        Ok(state)
    }

    /// Snapshots sorted by name. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<SnapshotEntry>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries: Vec<SnapshotEntry> = read_dir
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == "json"))
            .filter_map(|path| {
                let name = path.file_stem()?.to_str()?.to_string();
                match self.load(&name) {
                    Ok(state) => Some(SnapshotEntry {
                        kind: state.kind().to_string(),
                        name,
                    }),
                    Err(e) => {
                        tracing::warn!("Skipping snapshot {}: {}", path.display(), e);
                        None
                    }
                }
            })
            .collect();

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Store an uploaded video under the videos directory, keeping only the
    /// base name of `file_name`.
    pub fn store_video(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let base = Path::new(file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| JumbotronError::InvalidName(file_name.to_string()))?;
        validate_name(base)?;

        let dir = self.videos_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(base);
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Whether `path` is one of our stored uploads.
    pub fn owns_video(&self, path: &Path) -> bool {
        path.parent() == Some(self.videos_dir().as_path())
    }
}
