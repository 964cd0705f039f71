//! Fixed-geometry pixel storage. Pure data, no I/O.
//!
//! The owner ([`crate::matrix::Matrix`]) serializes all access, so nothing
//! in here locks.

use crate::PanelConfig;
use crate::error::{Axis, JumbotronError, Result};
use crate::pixel::{Pixel, PixelGrid};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    rows: usize,
    columns: usize,
    // Row-major
    cells: Vec<Pixel>,
}

impl PixelBuffer {
    pub fn new(panel: PanelConfig) -> Self {
        let rows = panel.rows as usize;
        let columns = panel.cols as usize;
        Self {
            rows,
            columns,
            cells: vec![Pixel::default(); rows * columns],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row >= self.rows {
            return Err(JumbotronError::IndexOutOfRange {
                axis: Axis::Row,
                index: row,
                limit: self.rows,
            });
        }
        Ok(())
    }

    fn check_column(&self, column: usize) -> Result<()> {
        if column >= self.columns {
            return Err(JumbotronError::IndexOutOfRange {
                axis: Axis::Column,
                index: column,
                limit: self.columns,
            });
        }
        Ok(())
    }

    fn offset(&self, row: usize, column: usize) -> Result<usize> {
        self.check_row(row)?;
        self.check_column(column)?;
        Ok(row * self.columns + column)
    }

    pub fn get(&self, row: usize, column: usize) -> Result<Pixel> {
        let offset = self.offset(row, column)?;
        Ok(self.cells[offset])
    }

    pub fn set(&mut self, row: usize, column: usize, pixel: Pixel) -> Result<()> {
        let offset = self.offset(row, column)?;
        self.cells[offset] = pixel;
        Ok(())
    }

    pub fn fill_row(&mut self, row: usize, pixel: Pixel) -> Result<()> {
        self.check_row(row)?;
        let start = row * self.columns;
        self.cells[start..start + self.columns].fill(pixel);
        Ok(())
    }

    pub fn fill_column(&mut self, column: usize, pixel: Pixel) -> Result<()> {
        self.check_column(column)?;
        for row in self.cells.chunks_exact_mut(self.columns) {
            row[column] = pixel;
        }
        Ok(())
    }

    pub fn fill(&mut self, pixel: Pixel) {
        self.cells.fill(pixel);
    }

    /// Rewrite brightness on every cell, leaving colors alone.
    pub fn set_brightness(&mut self, brightness: u8) {
        for cell in &mut self.cells {
            *cell = cell.with_brightness(brightness);
        }
    }

    pub fn to_array(&self) -> PixelGrid {
        self.cells
            .chunks_exact(self.columns)
            .map(|row| row.to_vec())
            .collect()
    }

    /// Overwrite every cell. The shape is checked before anything is written.
    pub fn from_array(&mut self, grid: &[Vec<Pixel>]) -> Result<()> {
        let shape_ok = grid.len() == self.rows && grid.iter().all(|row| row.len() == self.columns);
        if !shape_ok {
            return Err(JumbotronError::ShapeMismatch {
                expected_rows: self.rows,
                expected_columns: self.columns,
                rows: grid.len(),
                columns: grid.iter().map(Vec::len).collect(),
            });
        }

        for (dst, src) in self.cells.chunks_exact_mut(self.columns).zip(grid) {
            dst.copy_from_slice(src);
        }
        Ok(())
    }
}
