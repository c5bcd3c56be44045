//! Row stream encoder: BGRA scanlines in, PNG out.
//!
//! Rows must arrive top to bottom and never exceed the height declared in
//! the PNG header. The encoder owns the output stream; closing it writes
//! the trailer and releases the compressor.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use keyroll_common::error::{KeyrollError, KeyrollResult};

use crate::target::{ExportTarget, BYTES_PER_PIXEL};

/// Convert one BGRA row to RGBA, optionally forcing alpha to opaque.
pub fn reorder_row(bytes: &[u8], width: u32, strip_alpha: bool) -> Vec<u8> {
    let len = (width as usize * BYTES_PER_PIXEL).min(bytes.len());
    let mut out = Vec::with_capacity(len);
    reorder_row_into(&bytes[..len], &mut out, strip_alpha);
    out
}

fn reorder_row_into(bytes: &[u8], out: &mut Vec<u8>, strip_alpha: bool) {
    out.clear();
    out.extend_from_slice(bytes);
    for px in out.chunks_exact_mut(BYTES_PER_PIXEL) {
        px.swap(0, 2);
        if strip_alpha {
            px[3] = u8::MAX;
        }
    }
}

/// Sink for scanlines taken from the bounded render target.
pub trait RowEncoder {
    /// Image width declared at open time.
    fn width(&self) -> u32;

    /// Image height declared at open time.
    fn height(&self) -> u32;

    /// Rows accepted so far.
    fn rows_written(&self) -> u32;

    /// Append `row_count` rows of `source`, starting at `start_row`.
    fn write_rows(
        &mut self,
        source: &ExportTarget,
        start_row: u32,
        row_count: u32,
        strip_alpha: bool,
    ) -> KeyrollResult<()>;

    /// Write the trailer and release the stream. Later calls are no-ops.
    fn close(&mut self) -> KeyrollResult<()>;
}

/// Streaming PNG writer (RGBA, 8 bits per channel, not interlaced).
pub struct PngRowEncoder<W: Write + 'static> {
    stream: Option<png::StreamWriter<'static, W>>,
    width: u32,
    height: u32,
    rows_written: u32,
    scratch: Vec<u8>,
    path: Option<PathBuf>,
}

impl<W: Write + 'static> PngRowEncoder<W> {
    /// Write the PNG header for a `width` x `height` image to `output`.
    pub fn open(width: u32, height: u32, output: W) -> KeyrollResult<Self> {
        if width == 0 || height == 0 {
            return Err(KeyrollError::encode(format!(
                "PNG images need non-zero dimensions, got {width}x{height}"
            )));
        }

        let mut encoder = png::Encoder::new(output, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);

        let writer = encoder
            .write_header()
            .map_err(|e| KeyrollError::encode(format!("Failed to write PNG header: {e}")))?;
        let stream = writer
            .into_stream_writer()
            .map_err(|e| KeyrollError::encode(format!("Failed to start PNG stream: {e}")))?;

        Ok(Self {
            stream: Some(stream),
            width,
            height,
            rows_written: 0,
            scratch: Vec::with_capacity(width as usize * BYTES_PER_PIXEL),
            path: None,
        })
    }

    /// Whether the stream has been closed.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

impl PngRowEncoder<File> {
    /// Create `path` and write the PNG header into it.
    ///
    /// If the header cannot be written the half-created file is removed.
    pub fn create(path: impl AsRef<Path>, width: u32, height: u32) -> KeyrollResult<Self> {
        let path = path.as_ref();
        if width == 0 || height == 0 {
            return Err(KeyrollError::encode(format!(
                "PNG images need non-zero dimensions, got {width}x{height}"
            )));
        }

        let file = File::create(path)?;
        match Self::open(width, height, file) {
            Ok(mut encoder) => {
                encoder.path = Some(path.to_path_buf());
                tracing::debug!(path = %path.display(), width, height, "PNG stream opened");
                Ok(encoder)
            }
            Err(err) => {
                if let Err(rm) = std::fs::remove_file(path) {
                    tracing::warn!(error = %rm, path = %path.display(), "Failed to remove partial PNG");
                }
                Err(err)
            }
        }
    }
}

impl<W: Write + 'static> RowEncoder for PngRowEncoder<W> {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn rows_written(&self) -> u32 {
        self.rows_written
    }

    fn write_rows(
        &mut self,
        source: &ExportTarget,
        start_row: u32,
        row_count: u32,
        strip_alpha: bool,
    ) -> KeyrollResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| KeyrollError::encode("PNG stream is already closed"))?;

        if source.width() != self.width {
            return Err(KeyrollError::encode(format!(
                "Source is {} pixels wide but the image is {}",
                source.width(),
                self.width
            )));
        }
        if self.rows_written as u64 + row_count as u64 > self.height as u64 {
            return Err(KeyrollError::encode(format!(
                "Writing {row_count} rows after {} would exceed the declared height {}",
                self.rows_written, self.height
            )));
        }

        let rows = source.rows(start_row, row_count)?;
        for row in rows.chunks_exact(source.stride()) {
            reorder_row_into(row, &mut self.scratch, strip_alpha);
            stream
                .write_all(&self.scratch)
                .map_err(|e| KeyrollError::encode(format!("Failed to write PNG row: {e}")))?;
            self.rows_written += 1;
        }

        Ok(())
    }

    fn close(&mut self) -> KeyrollResult<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        let complete = self.rows_written == self.height;
        // An incomplete stream still gets its trailer when the writer drops.
        let finished = stream
            .finish()
            .map_err(|e| KeyrollError::encode(format!("Failed to finalize PNG: {e}")));

        if let Some(path) = &self.path {
            tracing::debug!(
                path = %path.display(),
                rows = self.rows_written,
                height = self.height,
                "PNG stream closed"
            );
        }

        if !complete {
            return Err(KeyrollError::encode(format!(
                "PNG closed after {} of {} rows",
                self.rows_written, self.height
            )));
        }
        finished
    }
}

impl<W: Write + 'static> Drop for PngRowEncoder<W> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "PNG encoder dropped without a clean close");
        }
    }
}
