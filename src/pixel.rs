//! Pixel value type and the row-major grid shape used on the wire.

use crate::Color;
use serde::{Deserialize, Serialize};

/// Top of the brightness scale. Brightness is a 0-100 dimmer.
pub const MAX_BRIGHTNESS: u8 = 100;

/// One cell of the display: a color plus the dimmer applied at output time.
///
/// Serializes as `{"r":..,"g":..,"b":..,"brightness":..}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Pixel {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// Dimmer, 0-100
    #[schema(minimum = 0, maximum = 100)]
    pub brightness: u8,
}

impl Pixel {
    /// Brightness above [`MAX_BRIGHTNESS`] is clamped.
    pub fn new(r: u8, g: u8, b: u8, brightness: u8) -> Self {
        Self {
            r,
            g,
            b,
            brightness: brightness.min(MAX_BRIGHTNESS),
        }
    }

    pub fn color(&self) -> Color {
        Color::new(self.r, self.g, self.b)
    }

    /// Same color, different brightness.
    pub fn with_brightness(self, brightness: u8) -> Self {
        Self::new(self.r, self.g, self.b, brightness)
    }

    /// The color actually sent to the LED after dimming.
    pub fn output_color(&self) -> Color {
        self.color().apply_brightness(self.brightness)
    }
}

impl Default for Pixel {
    fn default() -> Self {
        Self::new(0, 0, 0, MAX_BRIGHTNESS)
    }
}

/// Rows of pixels, row 0 is the top of the display.
pub type PixelGrid = Vec<Vec<Pixel>>;
