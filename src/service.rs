//! Request-level operations: what a control request actually does.
//!
//! [`Jumbotron`] ties the matrix, the playback controller, the broadcaster
//! and both stores together. Operations that switch what is on screen
//! (reset, image upload, video start, snapshot activation) run one at a time
//! and stop any running video first. After every change the last-state
//! record is rewritten; if that write fails the error is returned but the
//! display keeps the new content.
//!
//! Everything here blocks (locks, sleeps, file I/O), so async callers go
//! through `spawn_blocking`.

use crate::broadcast::FrameBroadcaster;
use crate::error::{JumbotronError, Result};
use crate::matrix::Matrix;
use crate::media::{decode_image, encode_png, grid_to_image, image_to_grid};
use crate::persistence::{SavedState, SnapshotEntry, SnapshotStore, StateStore};
use crate::pixel::{Pixel, PixelGrid};
use crate::playback::PlaybackController;
use crate::video::{is_video_path, open_source};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What the display is currently doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DisplayState {
    Static,
    PlayingVideo,
}

/// Reply to `GET /jumbotron`.
#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JumbotronStatus {
    pub is_alive: bool,
    pub rows: u32,
    pub columns: u32,
    pub state: DisplayState,
    /// Video being played, if any
    pub current_media: Option<String>,
    /// Current brightness (0-100)
    pub brightness: u8,
    pub version: String,
}

pub struct Jumbotron {
    matrix: Arc<Matrix>,
    playback: PlaybackController,
    broadcaster: Arc<FrameBroadcaster>,
    last_state: Box<dyn StateStore>,
    snapshots: SnapshotStore,
    default_brightness: u8,
    // Serializes content switches
    control: Mutex<()>,
}

impl Jumbotron {
    pub fn new(
        matrix: Arc<Matrix>,
        playback: PlaybackController,
        broadcaster: Arc<FrameBroadcaster>,
        last_state: Box<dyn StateStore>,
        snapshots: SnapshotStore,
        default_brightness: u8,
    ) -> Self {
        Self {
            matrix,
            playback,
            broadcaster,
            last_state,
            snapshots,
            default_brightness,
            control: Mutex::new(()),
        }
    }

    fn control(&self) -> MutexGuard<'_, ()> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn matrix(&self) -> &Arc<Matrix> {
        &self.matrix
    }

    pub fn broadcaster(&self) -> &Arc<FrameBroadcaster> {
        &self.broadcaster
    }

    pub fn default_brightness(&self) -> u8 {
        self.default_brightness
    }

    pub fn status(&self) -> JumbotronStatus {
        let panel = self.matrix.panel();
        let current = self.playback.current_path();
        JumbotronStatus {
            is_alive: true,
            rows: panel.rows,
            columns: panel.cols,
            state: if current.is_some() {
                DisplayState::PlayingVideo
            } else {
                DisplayState::Static
            },
            current_media: current.map(|p| p.display().to_string()),
            brightness: self.matrix.brightness(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// The content to restore later: the running video, or the current frame.
    pub fn current_state(&self) -> SavedState {
        match self.playback.current_path() {
            Some(path) => SavedState::Video {
                path: path.display().to_string(),
                brightness: self.matrix.brightness(),
            },
            None => SavedState::Image {
                content: self.matrix.snapshot(),
            },
        }
    }

    fn persist_last(&self) -> Result<()> {
        self.save_last(&self.current_state())
    }

    fn save_last(&self, state: &SavedState) -> Result<()> {
        self.last_state.save(state).inspect_err(|e| {
            tracing::error!("Cannot record last state: {}", e);
        })
    }

    // ── Region updates ──────────────────────────────────────────────

    pub fn update_pixel(&self, row: usize, column: usize, pixel: Pixel) -> Result<()> {
        self.matrix.update_pixel(row, column, pixel)?;
        self.persist_last()
    }

    pub fn update_row(&self, row: usize, pixel: Pixel) -> Result<()> {
        self.matrix.update_row(row, pixel)?;
        self.persist_last()
    }

    pub fn update_column(&self, column: usize, pixel: Pixel) -> Result<()> {
        self.matrix.update_column(column, pixel)?;
        self.persist_last()
    }

    pub fn update_all(&self, pixel: Pixel) -> Result<()> {
        self.matrix.update_all(pixel)?;
        self.persist_last()
    }

    /// Applies live, including to a running video.
    pub fn update_brightness(&self, brightness: u8) -> Result<()> {
        self.matrix.update_brightness(brightness)?;
        self.persist_last()
    }

    pub fn brightness(&self) -> u8 {
        self.matrix.brightness()
    }

    pub fn snapshot(&self) -> PixelGrid {
        self.matrix.snapshot()
    }

    // ── Content switches ────────────────────────────────────────────

    pub fn reset(&self) -> Result<()> {
        let _guard = self.control();
        self.playback.stop();
        self.matrix.reset()?;
        self.persist_last()
    }

    /// Stop video playback, leaving the last frame on screen.
    pub fn stop_video(&self) -> Result<bool> {
        let _guard = self.control();
        let stopped = self.playback.stop();
        self.persist_last()?;
        Ok(stopped)
    }

    /// Decode an uploaded image and show it. Returns the applied grid.
    pub fn show_image(&self, bytes: &[u8], brightness: u8) -> Result<PixelGrid> {
        let img = decode_image(bytes)?;
        let grid = image_to_grid(&img, self.matrix.panel(), brightness);

        let _guard = self.control();
        self.playback.stop();
        self.matrix.update_from_array(&grid)?;
        tracing::info!("Image uploaded successfully");
        self.save_last(&SavedState::Image {
            content: grid.clone(),
        })?;
        Ok(grid)
    }

    /// Store an uploaded video and play it. Returns where it was stored.
    pub fn play_uploaded_video(&self, file_name: &str, bytes: &[u8], brightness: u8) -> Result<PathBuf> {
        if !is_video_path(Path::new(file_name)) {
            return Err(JumbotronError::SourceUnreadable(format!(
                "{file_name}: unsupported video format"
            )));
        }
        let _guard = self.control();
        // The upload may overwrite the file that is playing right now.
        self.playback.stop();
        let path = self.snapshots.store_video(file_name, bytes)?;
        if let Err(e) = self.playback.play(&path, brightness) {
            if let Err(rm) = std::fs::remove_file(&path) {
                tracing::warn!("Cannot delete rejected upload {}: {}", path.display(), rm);
            }
            // Whatever was playing is gone; record the frame left on screen.
            let _ = self.persist_last();
            return Err(e);
        }
        self.record_video(&path, brightness)?;
        Ok(path)
    }

    /// Play a video already on disk.
    pub fn play_video(&self, path: &Path, brightness: u8) -> Result<()> {
        let _guard = self.control();
        self.start_video(path, brightness)
    }

    fn start_video(&self, path: &Path, brightness: u8) -> Result<()> {
        if !path.exists() {
            return Err(JumbotronError::VideoMissing(path.display().to_string()));
        }
        self.playback.play(path, brightness)?;
        self.record_video(path, brightness)
    }

    fn record_video(&self, path: &Path, brightness: u8) -> Result<()> {
        self.save_last(&SavedState::Video {
            path: path.display().to_string(),
            brightness,
        })
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    // ── Snapshots ───────────────────────────────────────────────────

    pub fn save_snapshot(&self, name: &str) -> Result<SavedState> {
        let state = self.current_state();
        self.snapshots.save(name, &state)?;
        Ok(state)
    }

    pub fn list_snapshots(&self) -> Result<Vec<SnapshotEntry>> {
        self.snapshots.list()
    }

    /// Put a snapshot back on screen and make it the last state.
    pub fn activate_snapshot(&self, name: &str) -> Result<()> {
        let state = self.snapshots.load(name)?;
        let _guard = self.control();
        match &state {
            SavedState::Image { content } => {
                self.playback.stop();
                self.matrix.update_from_array(content)?;
                self.save_last(&state)
            }
            SavedState::Video { path, brightness } => {
                self.start_video(Path::new(path), *brightness)
            }
        }
    }

    /// Delete a snapshot. An uploaded video it points to goes with it.
    pub fn delete_snapshot(&self, name: &str) -> Result<()> {
        let _guard = self.control();
        let state = self.snapshots.delete(name)?;

        if let Some(SavedState::Video { path, .. }) = state {
            let path = PathBuf::from(path);
            if self.snapshots.owns_video(&path) {
                if self.playback.current_path().as_deref() == Some(path.as_path()) {
                    self.playback.stop();
                }
                match std::fs::remove_file(&path) {
                    Ok(()) => tracing::info!("Deleted video {}", path.display()),
                    Err(e) => tracing::warn!("Cannot delete video {}: {}", path.display(), e),
                }
            }
        }
        Ok(())
    }

    /// PNG preview: the image content, or the first frame of the video.
    pub fn snapshot_preview(&self, name: &str) -> Result<Vec<u8>> {
        let img = match self.snapshots.load(name)? {
            SavedState::Image { content } => grid_to_image(&content),
            SavedState::Video { path, .. } => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    return Err(JumbotronError::VideoMissing(path.display().to_string()));
                }
                open_source(&path, self.matrix.panel())?
                    .next_frame()?
                    .ok_or_else(|| JumbotronError::SourceUnreadable("video has no frames".into()))?
                    .to_rgb8()
            }
        };
        encode_png(&img)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Bring back whatever was showing before the last shutdown.
    pub fn restore_last_state(&self) {
        match self.last_state.load() {
            None => {
                tracing::info!("No previous state to restore");
                if let Err(e) = self.matrix.update_brightness(self.default_brightness) {
                    tracing::warn!("Cannot apply default brightness: {}", e);
                }
            }
            Some(SavedState::Image { content }) => match self.matrix.update_from_array(&content) {
                Ok(()) => tracing::info!("Restored last image"),
                Err(e) => tracing::warn!("Cannot restore last image: {}", e),
            },
            Some(SavedState::Video { path, brightness }) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    tracing::warn!("Video file not found at startup: {}", path.display());
                    return;
                }
                match self.playback.play(&path, brightness) {
                    Ok(()) => tracing::info!("Resumed video {}", path.display()),
                    Err(e) => tracing::warn!("Cannot resume video {}: {}", path.display(), e),
                }
            }
        }
    }

    pub fn shutdown(&self) {
        if self.playback.stop() {
            tracing::info!("Stopped video playback");
        }
    }
}
