//! The display core: a pixel buffer bound to a strip.
//!
//! Two locks, always taken in the order strip then buffer. The strip lock
//! serializes every mutation together with its push, so frames reach the
//! LEDs in the order they were made and each call returns only after its
//! frame is latched. The buffer lock is held just long enough to change or
//! copy the grid, so snapshots never wait on a slow push and never see a
//! half-written frame.
//!
//! When the push fails the buffer keeps the new content and the error is
//! returned; [`Matrix::refresh`] retries the push alone.

use crate::PanelConfig;
use crate::buffer::PixelBuffer;
use crate::error::Result;
use crate::pixel::{MAX_BRIGHTNESS, Pixel, PixelGrid};
use crate::strip::StripSink;
use std::sync::{Mutex, MutexGuard, PoisonError};

fn push_frame(strip: &mut dyn StripSink, grid: &[Vec<Pixel>]) -> Result<()> {
    strip.push(grid).inspect_err(|e| {
        tracing::error!("Strip push failed ({}): {}", strip.name(), e);
    })
}

pub struct Matrix {
    panel: PanelConfig,
    strip: Mutex<Box<dyn StripSink>>,
    buffer: Mutex<PixelBuffer>,
}

impl Matrix {
    /// Create the matrix and show the initial (blank) frame.
    pub fn new(panel: PanelConfig, strip: Box<dyn StripSink>) -> Result<Self> {
        let matrix = Self {
            panel,
            strip: Mutex::new(strip),
            buffer: Mutex::new(PixelBuffer::new(panel)),
        };
        matrix.refresh()?;
        Ok(matrix)
    }

    pub fn panel(&self) -> PanelConfig {
        self.panel
    }

    // A panic mid-update leaves a valid buffer, just possibly stale.
    fn lock_strip(&self) -> MutexGuard<'_, Box<dyn StripSink>> {
        self.strip.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_buffer(&self) -> MutexGuard<'_, PixelBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut PixelBuffer) -> Result<()>,
    {
        let mut strip = self.lock_strip();
        let grid = {
            let mut buffer = self.lock_buffer();
            f(&mut buffer)?;
            buffer.to_array()
        };
        push_frame(strip.as_mut(), &grid)
    }

    pub fn update_pixel(&self, row: usize, column: usize, pixel: Pixel) -> Result<()> {
        self.mutate(|buf| buf.set(row, column, pixel))
    }

    pub fn update_row(&self, row: usize, pixel: Pixel) -> Result<()> {
        self.mutate(|buf| buf.fill_row(row, pixel))
    }

    pub fn update_column(&self, column: usize, pixel: Pixel) -> Result<()> {
        self.mutate(|buf| buf.fill_column(column, pixel))
    }

    pub fn update_all(&self, pixel: Pixel) -> Result<()> {
        self.mutate(|buf| {
            buf.fill(pixel);
            Ok(())
        })
    }

    /// Replace the whole frame. Nothing is applied on a shape mismatch.
    pub fn update_from_array(&self, grid: &[Vec<Pixel>]) -> Result<()> {
        self.mutate(|buf| buf.from_array(grid))
    }

    pub fn update_brightness(&self, brightness: u8) -> Result<()> {
        self.mutate(|buf| {
            buf.set_brightness(brightness.min(MAX_BRIGHTNESS));
            Ok(())
        })
    }

    /// Display brightness, read from the top-left cell.
    pub fn brightness(&self) -> u8 {
        self.lock_buffer()
            .get(0, 0)
            .map(|p| p.brightness)
            .unwrap_or(MAX_BRIGHTNESS)
    }

    /// Blank the display at full brightness.
    pub fn reset(&self) -> Result<()> {
        self.update_all(Pixel::default())
    }

    pub fn snapshot(&self) -> PixelGrid {
        self.lock_buffer().to_array()
    }

    pub fn pixel(&self, row: usize, column: usize) -> Result<Pixel> {
        self.lock_buffer().get(row, column)
    }

    /// Push the current buffer again without changing it.
    pub fn refresh(&self) -> Result<()> {
        let mut strip = self.lock_strip();
        let grid = self.lock_buffer().to_array();
        push_frame(strip.as_mut(), &grid)
    }
}
