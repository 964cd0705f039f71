//! Command-line configuration.

use crate::PanelConfig;
use crate::strip::StripOptions;
use clap::Parser;
use std::path::PathBuf;

/// Jumbotron LED matrix server
#[derive(Parser, Debug, Clone)]
#[command(name = "jumbotron")]
#[command(about = "HTTP + WebSocket server for a WS281x LED matrix")]
#[command(version)]
pub struct Config {
    /// Number of rows on the LED matrix
    #[arg(long, default_value = "48", value_parser = clap::value_parser!(u32).range(1..))]
    pub rows: u32,

    /// Number of columns on the LED matrix
    #[arg(long, default_value = "64", value_parser = clap::value_parser!(u32).range(1..))]
    pub columns: u32,

    /// GPIO pin the strip's data line is on
    #[arg(long, default_value = "21")]
    pub pin: i32,

    /// DMA channel used by the ws281x driver
    #[arg(long, default_value = "10")]
    pub dma: i32,

    /// Port to listen on
    #[arg(long, default_value = "5000")]
    pub port: u16,

    /// Frames per second pushed to stream observers
    #[arg(long, default_value = "60", value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub updates_per_second: u32,

    /// Target frame rate for video playback
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u32).range(1..=240))]
    pub video_fps: u32,

    /// Brightness (0-100) applied at startup when there is no previous state
    #[arg(long, default_value = "40", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub default_brightness: u8,

    /// Directory holding named snapshots and uploaded videos
    #[arg(long, default_value = "saves")]
    pub saves_dir: PathBuf,

    /// File recording the last displayed content
    #[arg(long, default_value = "last_state.json")]
    pub state_file: PathBuf,

    /// Never touch the LED hardware
    #[arg(long)]
    pub mock: bool,
}

impl Config {
    pub fn panel(&self) -> PanelConfig {
        PanelConfig::new(self.rows, self.columns)
    }

    pub fn strip_options(&self) -> StripOptions {
        StripOptions {
            pin: self.pin,
            dma: self.dma,
        }
    }
}
