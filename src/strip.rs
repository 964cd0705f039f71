//! Output side: the physical LED strip behind the matrix.
//!
//! The strip is one long chain of LEDs laid out serpentine, starting at the
//! *bottom* of the display. Logical row 0 is the top, so a logical
//! `(row, column)` lands on physical row `rows - 1 - row`; even physical rows
//! run left to right and odd ones right to left.
//!
//! Two sinks implement [`StripSink`]: [`MockStrip`] (no device, does nothing)
//! and, with the `hardware` feature, `Ws281xStrip`. [`open_strip`] picks one
//! at startup.

use crate::error::Result;
use crate::pixel::Pixel;
use crate::{Color, PanelConfig};

/// Something that can show a full frame.
///
/// `push` receives the logical grid (row 0 on top) and must latch the whole
/// frame before returning.
pub trait StripSink: Send {
    fn push(&mut self, grid: &[Vec<Pixel>]) -> Result<()>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Physical LED index for a logical cell.
pub fn physical_index(panel: PanelConfig, row: usize, column: usize) -> usize {
    let rows = panel.rows as usize;
    let columns = panel.cols as usize;
    let physical_row = rows - 1 - row;
    if physical_row % 2 == 0 {
        physical_row * columns + column
    } else {
        physical_row * columns + (columns - 1 - column)
    }
}

/// Flatten a grid into strip order with brightness applied.
///
/// Cells outside `panel` are ignored; the caller hands over a buffer that
/// already has the right shape.
pub fn render_strip(panel: PanelConfig, grid: &[Vec<Pixel>]) -> Vec<Color> {
    let mut out = vec![Color::new(0, 0, 0); panel.pixel_count() as usize];
    for (row, cells) in grid.iter().enumerate().take(panel.rows as usize) {
        for (column, pixel) in cells.iter().enumerate().take(panel.cols as usize) {
            out[physical_index(panel, row, column)] = pixel.output_color();
        }
    }
    out
}

/// Stand-in used when no strip is attached.
#[derive(Debug, Default)]
pub struct MockStrip;

impl StripSink for MockStrip {
    fn push(&mut self, _grid: &[Vec<Pixel>]) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Pin and DMA settings for the real strip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StripOptions {
    pub pin: i32,
    pub dma: i32,
}

/// True when running on a Raspberry Pi.
pub fn detect_board() -> bool {
    std::fs::read_to_string("/proc/device-tree/model")
        .map(|model| model.contains("Raspberry Pi"))
        .unwrap_or(false)
}

/// Choose the sink: the real strip when compiled in and a board is present,
/// otherwise the mock. Never fails; hardware problems fall back to the mock.
pub fn open_strip(panel: PanelConfig, options: StripOptions, force_mock: bool) -> Box<dyn StripSink> {
    if force_mock {
        tracing::info!("Mock strip requested");
        return Box::new(MockStrip);
    }

    #[cfg(feature = "hardware")]
    {
        if detect_board() {
            match ws281x::Ws281xStrip::open(panel, options) {
                Ok(strip) => {
                    tracing::info!(
                        "WS281x strip on GPIO {} ({} LEDs)",
                        options.pin,
                        panel.pixel_count()
                    );
                    return Box::new(strip);
                }
                Err(e) => tracing::warn!("Falling back to mock strip: {}", e),
            }
        } else {
            tracing::warn!("No Raspberry Pi detected, using mock strip");
        }
    }

    #[cfg(not(feature = "hardware"))]
    {
        let _ = (panel, options);
        tracing::warn!("Built without the 'hardware' feature, using mock strip");
    }

    Box::new(MockStrip)
}

#[cfg(feature = "hardware")]
pub use ws281x::Ws281xStrip;

#[cfg(feature = "hardware")]
mod ws281x {
    //! The ws281x C library is not thread-safe, so one dedicated thread owns
    //! the controller and every push is a request/reply over a channel.

    use super::{StripOptions, StripSink, render_strip};
    use crate::PanelConfig;
    use crate::error::{JumbotronError, Result};
    use crate::pixel::Pixel;
    use crate::Color;
    use rs_ws281x::{ChannelBuilder, ControllerBuilder, StripType};
    use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
    use std::thread;

    struct PushRequest {
        colors: Vec<Color>,
        reply: SyncSender<std::result::Result<(), String>>,
    }

    pub struct Ws281xStrip {
        panel: PanelConfig,
        tx: Sender<PushRequest>,
    }

    impl Ws281xStrip {
        pub fn open(panel: PanelConfig, options: StripOptions) -> Result<Self> {
            let (tx, rx) = mpsc::channel();
            let (ready_tx, ready_rx) = mpsc::sync_channel(1);
            let count = panel.pixel_count() as i32;

            thread::Builder::new()
                .name("ws281x".into())
                .spawn(move || strip_thread(rx, ready_tx, count, options))
                .map_err(|e| JumbotronError::DeviceWriteFailure(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Self { panel, tx }),
                Ok(Err(e)) => Err(JumbotronError::DeviceWriteFailure(e)),
                Err(_) => Err(JumbotronError::DeviceWriteFailure(
                    "strip thread exited during setup".into(),
                )),
            }
        }
    }

    impl StripSink for Ws281xStrip {
        fn push(&mut self, grid: &[Vec<Pixel>]) -> Result<()> {
            let (reply, reply_rx) = mpsc::sync_channel(1);
            let request = PushRequest {
                colors: render_strip(self.panel, grid),
                reply,
            };
            self.tx
                .send(request)
                .map_err(|_| JumbotronError::DeviceWriteFailure("strip thread gone".into()))?;
            reply_rx
                .recv()
                .map_err(|_| JumbotronError::DeviceWriteFailure("strip thread gone".into()))?
                .map_err(JumbotronError::DeviceWriteFailure)
        }

        fn name(&self) -> &'static str {
            "ws281x"
        }
    }

    fn strip_thread(
        rx: Receiver<PushRequest>,
        ready: SyncSender<std::result::Result<(), String>>,
        count: i32,
        options: StripOptions,
    ) {
        let built = ControllerBuilder::new()
            .freq(800_000)
            .dma(options.dma)
            .channel(
                0,
                ChannelBuilder::new()
                    .pin(options.pin)
                    .count(count)
                    .strip_type(StripType::Ws2811Grb)
                    .brightness(255)
                    .build(),
            )
            .build();

        let mut controller = match built {
            Ok(c) => {
                let _ = ready.send(Ok(()));
                c
            }
            Err(e) => {
                let _ = ready.send(Err(e.to_string()));
                return;
            }
        };

        for request in rx {
            for (led, color) in controller.leds_mut(0).iter_mut().zip(&request.colors) {
                // Little-endian 0x00RRGGBB
                *led = [color.b, color.g, color.r, 0];
            }
            let result = controller.render().map_err(|e| e.to_string());
            let _ = request.reply.send(result);
        }

        tracing::info!("Strip thread: channel closed, shutting down.");
    }
}
