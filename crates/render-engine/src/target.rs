//! Bounded render target and the renderer seam.
//!
//! The target stores pixels as 4-byte little-endian BGRA, the native layout
//! of most swap-chain and off-screen surfaces. Row 0 is the top row.

use serde::{Deserialize, Serialize};

use keyroll_common::error::{KeyrollError, KeyrollResult};

/// Bytes per pixel in every buffer handled by the engine.
pub const BYTES_PER_PIXEL: usize = 4;

/// A straight (non-premultiplied) RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(default = "opaque")]
    pub a: u8,
}

fn opaque() -> u8 {
    u8::MAX
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Byte order as stored in an [`ExportTarget`].
    pub fn to_bgra(self) -> [u8; 4] {
        [self.b, self.g, self.r, self.a]
    }

    pub fn from_bgra(px: [u8; 4]) -> Self {
        Self::rgba(px[2], px[1], px[0], px[3])
    }

    /// Scale the colour channels towards black, keeping alpha.
    pub fn scaled(self, factor: f64) -> Self {
        let f = factor.clamp(0.0, 1.0);
        let scale = |c: u8| (c as f64 * f).round() as u8;
        Self::rgba(scale(self.r), scale(self.g), scale(self.b), self.a)
    }
}

/// A fixed-size BGRA pixel buffer the renderer draws one pass into.
#[derive(Debug, Clone)]
pub struct ExportTarget {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl ExportTarget {
    /// Allocate a cleared target. Both dimensions must be non-zero.
    pub fn new(width: u32, height: u32) -> KeyrollResult<Self> {
        if width == 0 || height == 0 {
            return Err(KeyrollError::render(format!(
                "Render target must be at least 1x1, got {width}x{height}"
            )));
        }
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(BYTES_PER_PIXEL))
            .ok_or_else(|| {
                KeyrollError::render(format!("Render target {width}x{height} is too large"))
            })?;

        Ok(Self {
            width,
            height,
            pixels: vec![0; len],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes in one row.
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Reset every pixel to transparent black.
    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Fill the whole target with one colour.
    pub fn fill(&mut self, color: Color) {
        let px = color.to_bgra();
        for chunk in self.pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            chunk.copy_from_slice(&px);
        }
    }

    /// Fill the half-open rectangle `[x0, x1) x [y0, y1)`, clipped to the target.
    pub fn fill_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, color: Color) {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let px = color.to_bgra();
        let stride = self.stride();
        for y in y0..y1 {
            let row = &mut self.pixels[y as usize * stride..(y as usize + 1) * stride];
            let span = &mut row[x0 as usize * BYTES_PER_PIXEL..x1 as usize * BYTES_PER_PIXEL];
            for chunk in span.chunks_exact_mut(BYTES_PER_PIXEL) {
                chunk.copy_from_slice(&px);
            }
        }
    }

    /// Colour of a single pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride() + x as usize * BYTES_PER_PIXEL;
        let px = &self.pixels[offset..offset + BYTES_PER_PIXEL];
        Some(Color::from_bgra([px[0], px[1], px[2], px[3]]))
    }

    /// `count` contiguous rows starting at `start`, as raw BGRA bytes.
    pub fn rows(&self, start: u32, count: u32) -> KeyrollResult<&[u8]> {
        let end = start as u64 + count as u64;
        if end > self.height as u64 {
            return Err(KeyrollError::render(format!(
                "Rows {start}..{end} are outside the {}-row target",
                self.height
            )));
        }
        let stride = self.stride();
        Ok(&self.pixels[start as usize * stride..end as usize * stride])
    }

    /// Mutable access to the raw BGRA bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }
}

/// Draws a vertical slice of the visualization into a target.
///
/// `scroll_secs` is the song time shown at the bottom edge of the target;
/// time increases towards the top at `time_resolution` pixels per second.
pub trait SceneRenderer {
    fn render(
        &mut self,
        target: &mut ExportTarget,
        scroll_secs: f64,
        time_resolution: f64,
        pitch_shift: i32,
    ) -> KeyrollResult<()>;
}
