//! Video playback: one paced, cancellable loop on its own thread.
//!
//! A session decodes frames from a [`FrameSource`], schedules frame `n` at
//! `start + n * period`, sleeps when early and drops the frame when more than
//! one period late. At the end of the source it rewinds and restarts the
//! schedule, so playback loops until cancelled.
//!
//! Only one session runs at a time. Starting a new one, or calling
//! [`PlaybackController::stop`], cancels the running loop, waits one frame
//! period and joins its thread, so the old decoder is closed before the
//! next one is opened.

use crate::error::{JumbotronError, Result};
use crate::matrix::Matrix;
use crate::media::image_to_grid;
use crate::video::{FrameSource, open_source};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// ── Cancellation ────────────────────────────────────────────────────

/// Shared stop flag, checked by the loop once per frame.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Clock ────────────────────────────────────────────────────────────

/// Time source for pacing. Swapped for a fake in tests.
pub trait Clock: Send + Sync {
    /// Time since a fixed, arbitrary origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

// ── Session loop ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub displayed: u64,
    pub dropped: u64,
    pub loops: u64,
}

/// Play `source` onto `matrix` until `cancel` is set or an error occurs.
///
/// Brightness is read from the matrix for every frame, so changes made while
/// playing take effect on the next frame.
pub fn run_session(
    source: &mut dyn FrameSource,
    matrix: &Matrix,
    clock: &dyn Clock,
    cancel: &CancelToken,
    frame_period: Duration,
) -> Result<SessionStats> {
    let panel = matrix.panel();
    let mut stats = SessionStats::default();
    let mut start = clock.now();
    let mut frames_processed: u32 = 0;

    while !cancel.is_cancelled() {
        let Some(frame) = source.next_frame()? else {
            if frames_processed == 0 {
                return Err(JumbotronError::SourceUnreadable(
                    "video has no frames".into(),
                ));
            }
            source.rewind()?;
            start = clock.now();
            frames_processed = 0;
            stats.loops += 1;
            continue;
        };

        let expected = start + frame_period * frames_processed;
        let now = clock.now();
        if now < expected {
            clock.sleep(expected - now);
        } else if now > expected + frame_period {
            frames_processed += 1;
            stats.dropped += 1;
            continue;
        }

        if cancel.is_cancelled() {
            break;
        }

        let grid = image_to_grid(&frame, panel, matrix.brightness());
        matrix.update_from_array(&grid)?;
        frames_processed += 1;
        stats.displayed += 1;
    }

    Ok(stats)
}

// ── Controller ───────────────────────────────────────────────────────

struct Session {
    path: PathBuf,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

pub struct PlaybackController {
    matrix: Arc<Matrix>,
    clock: Arc<dyn Clock>,
    frame_period: Duration,
    session: Mutex<Option<Session>>,
}

impl PlaybackController {
    pub fn new(matrix: Arc<Matrix>, fps: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            matrix,
            clock,
            frame_period: Duration::from_secs(1) / fps.max(1),
            session: Mutex::new(None),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Play the video at `path`, replacing whatever is playing.
    pub fn play(&self, path: &Path, brightness: u8) -> Result<()> {
        let owned = path.to_path_buf();
        let panel = self.matrix.panel();
        self.start(path.to_path_buf(), brightness, move || open_source(&owned, panel))
    }

    /// Start a session whose source is produced by `open`.
    ///
    /// `open` runs on the playback thread; its error is returned here and no
    /// session is recorded.
    pub fn start<F>(&self, path: PathBuf, brightness: u8, open: F) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>> + Send + 'static,
    {
        let mut slot = self.lock_session();
        self.stop_locked(&mut slot);

        let cancel = CancelToken::new();
        let (opened_tx, opened_rx) = mpsc::sync_channel(1);

        let matrix = self.matrix.clone();
        let clock = self.clock.clone();
        let token = cancel.clone();
        let period = self.frame_period;
        let label = path.display().to_string();

        let handle = thread::Builder::new()
            .name("playback".into())
            .spawn(move || {
                let mut source = match open() {
                    Ok(source) => {
                        let _ = opened_tx.send(Ok(()));
                        source
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };

                tracing::info!("Playing video: {} (brightness {})", label, brightness);
                let result = matrix.update_brightness(brightness).and_then(|()| {
                    run_session(source.as_mut(), &matrix, clock.as_ref(), &token, period)
                });
                drop(source);

                match result {
                    Ok(stats) => tracing::info!(
                        "Video stopped: {} ({} shown, {} dropped, {} loops)",
                        label,
                        stats.displayed,
                        stats.dropped,
                        stats.loops
                    ),
                    Err(e) => tracing::error!("Video playback of {} failed: {}", label, e),
                }
            })
            .map_err(JumbotronError::Spawn)?;

        match opened_rx.recv() {
            Ok(Ok(())) => {
                *slot = Some(Session {
                    path,
                    cancel,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(JumbotronError::SourceUnreadable(
                    "playback thread exited while opening the source".into(),
                ))
            }
        }
    }

    fn stop_locked(&self, slot: &mut Option<Session>) -> bool {
        let Some(session) = slot.take() else {
            return false;
        };

        session.cancel.cancel();
        if !session.handle.is_finished() {
            self.clock.sleep(self.frame_period);
        }
        if session.handle.join().is_err() {
            tracing::warn!("Playback thread for {} panicked", session.path.display());
        }
        true
    }

    /// Stop the running session, if any. Returns whether one was running.
    pub fn stop(&self) -> bool {
        let mut slot = self.lock_session();
        self.stop_locked(&mut slot)
    }

    /// A session exists and its loop has not ended.
    pub fn is_playing(&self) -> bool {
        self.lock_session()
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// Path of the video currently playing.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.lock_session()
            .as_ref()
            .filter(|s| !s.handle.is_finished())
            .map(|s| s.path.clone())
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.stop();
    }
}
