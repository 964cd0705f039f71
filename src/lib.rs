//! Jumbotron: a serpentine-wired WS281x LED matrix driven as a tiny display.
//!
//! The crate is organised leaves first:
//! - [`pixel`] / [`buffer`]: pixel values and the fixed-size grid
//! - [`strip`]: the physical output (real strip or a no-op mock)
//! - [`matrix`]: the serialized core every operation goes through
//! - [`broadcast`]: periodic frame push to WebSocket observers
//! - [`video`] / [`playback`]: frame sources and the paced playback loop
//! - [`persistence`]: last-state record and named snapshots
//! - [`service`]: request-level operations used by [`server`]
//!
//! This module itself holds the panel geometry, the color type and the
//! Ctrl+C hook used by the binary.

pub mod broadcast;
pub mod buffer;
pub mod config;
pub mod error;
pub mod matrix;
pub mod media;
pub mod persistence;
pub mod pixel;
pub mod playback;
pub mod server;
pub mod service;
pub mod strip;
pub mod video;

#[cfg(test)]
mod test_support;

pub use error::{JumbotronError, Result};

use std::sync::Arc;
use tokio::sync::Notify;

// ── Panel configuration ────────────────────────────────────────────

/// Dimensions of the LED matrix, fixed for the life of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PanelConfig {
    pub rows: u32,
    pub cols: u32,
}

impl PanelConfig {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }

    /// Total number of LEDs on the strip.
    pub fn pixel_count(&self) -> u32 {
        self.rows * self.cols
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self { rows: 48, cols: 64 }
    }
}

// ── Color ──────────────────────────────────────────────────────────

/// Plain RGB triple, independent of any hardware crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scale each channel by `brightness / 100`, rounded to nearest.
    pub fn apply_brightness(self, brightness: u8) -> Self {
        if brightness >= 100 {
            return self;
        }
        let scale = |c: u8| ((c as u16 * brightness as u16 + 50) / 100) as u8;
        Self {
            r: scale(self.r),
            g: scale(self.g),
            b: scale(self.b),
        }
    }
}

// ── Shutdown ───────────────────────────────────────────────────────

/// Install a Ctrl+C handler and return the notifier it fires.
///
/// `notify_one` stores a permit, so a signal that arrives before anyone
/// awaits is not lost.
pub fn setup_shutdown_signal() -> std::result::Result<Arc<Notify>, ctrlc::Error> {
    let notify = Arc::new(Notify::new());
    let n = notify.clone();

    ctrlc::set_handler(move || {
        n.notify_one();
    })?;

    Ok(notify)
}

// ── Tests ──────────────────────────────────────────────────────────
