//! GIF89a orchestration: header/trailer, color tables, graphic control
//! extensions, image descriptors, and the Netscape loop extension. Drives
//! [`crate::pipeline`], [`crate::neuquant::NeuQuant`] and [`crate::lzw`];
//! implements the inter-frame optimization decisions, including
//! back-patching a duplicate frame's delay onto the last frame actually
//! written.
//!
//! The sink only has to implement [`Write`]. `spec.md` §5 allows a
//! non-seekable sink as long as the encoder buffers pending bytes itself
//! when `DiscardDuplicates` needs to patch an earlier frame, so rather
//! than requiring every caller's sink to also implement `Seek` (ruling
//! out pipes, sockets, `Stdout`), [`Output`] stages the whole stream in
//! an in-memory buffer whenever that optimization is enabled and patches
//! bytes by index; with it off, bytes stream straight through unbuffered.

use std::collections::HashMap;
use std::io::{self, Write};

use tracing::{debug, trace};

use crate::error::{EncodeError, Result};
use crate::format::{self, *};
use crate::frame::Frame;
use crate::neuquant::NeuQuant;
use crate::pipeline::AnalyzedFrame;

/// Loop count for the Netscape 2.0 application extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Repeat {
    /// No Netscape extension at all.
    None,
    #[default]
    Infinite,
    Finite(u16),
}

/// The three independently-settable inter-frame optimizations, plus the
/// loop count.
#[derive(Debug, Clone, Copy)]
pub struct EncoderOptions {
    pub repeat: Repeat,
    pub discard_duplicates: bool,
    pub auto_transparency: bool,
    pub clip_frame: bool,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        EncoderOptions {
            repeat: Repeat::Infinite,
            discard_duplicates: false,
            auto_transparency: false,
            clip_frame: false,
        }
    }
}

struct LastGce {
    offset: u64,
    disposal_packed: u8,
    transparent_index: u8,
    delay: u16,
}

/// Wraps the caller's sink. When `buffer` is set, every byte is staged
/// into an in-memory `Vec<u8>` instead of going straight to `sink`; that
/// staging is what lets [`GifWriter::discard_duplicate`] patch an earlier
/// frame's Graphic Control Extension without the sink itself supporting
/// `Seek`. With `buffer` unset, writes pass straight through and
/// `discard_duplicate` is never called (`Encoder` only enables buffering
/// when `discard_duplicates` is set).
struct Output<W: Write> {
    sink: W,
    staged: Option<Vec<u8>>,
    position: u64,
}

impl<W: Write> Output<W> {
    fn new(sink: W, buffer: bool) -> Self {
        Output {
            sink,
            staged: buffer.then(Vec::new),
            position: 0,
        }
    }

    fn position(&self) -> u64 {
        self.position
    }

    /// Overwrites `bytes.len()` bytes starting at `offset`. Only valid
    /// once buffering is enabled; callers only reach this through
    /// `GifWriter::discard_duplicate`, which is only reachable when
    /// `discard_duplicates` is set, which is exactly when `GifWriter::new`
    /// turns buffering on.
    fn patch(&mut self, offset: u64, bytes: &[u8]) {
        let staged = self
            .staged
            .as_mut()
            .expect("patch requires a buffered output");
        let start = offset as usize;
        staged[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Flushes any staged bytes through to the sink, then returns it.
    fn finish(mut self) -> io::Result<W> {
        if let Some(staged) = self.staged.take() {
            self.sink.write_all(&staged)?;
        }
        self.sink.flush()?;
        Ok(self.sink)
    }
}

impl<W: Write> Write for Output<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.staged {
            Some(staged) => staged.extend_from_slice(buf),
            None => self.sink.write_all(buf)?,
        }
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.staged.is_none() {
            self.sink.flush()?;
        }
        Ok(())
    }
}

pub struct GifWriter<W: Write> {
    output: Output<W>,
    repeat: Repeat,
    last_gce: Option<LastGce>,
}

impl<W: Write> GifWriter<W> {
    /// `buffer_for_back_patch` should mirror
    /// `EncoderOptions::discard_duplicates`: back-patching rewrites an
    /// earlier frame's GCE, which this writer does by staging the whole
    /// stream in memory rather than requiring the sink to support `Seek`.
    pub fn new(sink: W, repeat: Repeat, buffer_for_back_patch: bool) -> Self {
        GifWriter {
            output: Output::new(sink, buffer_for_back_patch),
            repeat,
            last_gce: None,
        }
    }

    pub fn write_frame(
        &mut self,
        is_first: bool,
        frame: &Frame,
        analyzed: &AnalyzedFrame,
    ) -> Result<()> {
        let has_transparent_pixel = analyzed.transparent_mask.any()
            || frame.transparent.is_some_and(|[tr, tg, tb]| {
                analyzed
                    .opaque_pixels
                    .chunks_exact(3)
                    .any(|px| px[0] == tb && px[1] == tg && px[2] == tr)
            });
        let max_colors = 256 - if has_transparent_pixel { 1 } else { 0 };

        let quantizer = if analyzed.opaque_pixels.is_empty() {
            None
        } else {
            Some(NeuQuant::process(
                &analyzed.opaque_pixels,
                max_colors,
                frame.quality,
            ))
        };

        let (palette, transparent_index, indexed_pixels) =
            build_palette(frame, analyzed, quantizer.as_ref())?;

        if is_first {
            self.write_header(frame.width, frame.height, &palette)?;
        }

        let transparent_flag = transparent_index.is_some();
        let disposal_packed = frame.disposal.code() << 2 | if transparent_flag { 1 } else { 0 };

        let gce_offset = self.output.position();
        self.output.write_all(&gce_bytes(
            disposal_packed,
            frame.delay_cs,
            transparent_index.unwrap_or(0),
        ))?;

        write_image_descriptor(
            &mut self.output,
            analyzed.change_rect,
            if is_first { None } else { Some(palette.len()) },
        )?;
        if !is_first {
            self.output.write_all(&palette)?;
        }

        let min_code_size = crate::lzw::min_code_size(palette.len() / 3);
        let mut data = Vec::new();
        crate::lzw::encode(min_code_size, &indexed_pixels, &mut data)?;
        self.output.write_all(&data)?;

        trace!(
            offset = gce_offset,
            colors = palette.len() / 3,
            rect.w = analyzed.change_rect.width,
            rect.h = analyzed.change_rect.height,
            "wrote frame"
        );

        self.last_gce = Some(LastGce {
            offset: gce_offset,
            disposal_packed,
            transparent_index: transparent_index.unwrap_or(0),
            delay: frame.delay_cs,
        });

        Ok(())
    }

    /// Folds a discarded duplicate frame's delay into the most recently
    /// written frame's Graphic Control Extension, patching it in place in
    /// the staged output buffer.
    pub fn discard_duplicate(&mut self, delay_cs: u16) -> Result<()> {
        let Some(last) = self.last_gce.as_mut() else {
            // A duplicate can't occur before any frame has been written.
            return Ok(());
        };
        last.delay = last.delay.saturating_add(delay_cs);
        let bytes = gce_bytes(last.disposal_packed, last.delay, last.transparent_index);
        self.output.patch(last.offset, &bytes);

        debug!(delay = last.delay, "folded duplicate frame delay into prior GCE");
        Ok(())
    }

    fn write_header(&mut self, width: u16, height: u16, global_palette: &[u8]) -> Result<()> {
        self.output.write_all(SIGNATURE)?;
        write_u16_le(&mut self.output, width)?;
        write_u16_le(&mut self.output, height)?;

        let packed = 0x80 | 0x70 | format::color_table_size_field(global_palette.len());
        self.output.write_all(&[packed, 0, 0])?;
        self.output.write_all(global_palette)?;

        match self.repeat {
            Repeat::None => {}
            Repeat::Infinite => write_netscape_extension(&mut self.output, 0)?,
            Repeat::Finite(n) => write_netscape_extension(&mut self.output, n)?,
        }

        Ok(())
    }

    pub fn close(mut self) -> Result<W> {
        self.output.write_all(&[TRAILER])?;
        Ok(self.output.finish()?)
    }
}

/// Builds the fixed 8-byte Graphic Control Extension block. Fixed width
/// makes it equally usable for an initial append and an in-place patch.
fn gce_bytes(packed: u8, delay_cs: u16, transparent_index: u8) -> [u8; 8] {
    let [lo, hi] = delay_cs.to_le_bytes();
    [
        EXTENSION_INTRODUCER,
        GRAPHIC_CONTROL_LABEL,
        GRAPHIC_CONTROL_BLOCK_SIZE,
        packed,
        lo,
        hi,
        transparent_index,
        BLOCK_TERMINATOR,
    ]
}

fn write_netscape_extension<W: Write>(w: &mut W, repeat: u16) -> Result<()> {
    w.write_all(&[EXTENSION_INTRODUCER, APPLICATION_LABEL, NETSCAPE_APP_BLOCK_SIZE])?;
    w.write_all(NETSCAPE_APPLICATION)?;
    w.write_all(&[0x03, NETSCAPE_SUB_BLOCK_ID])?;
    write_u16_le(w, repeat)?;
    w.write_all(&[BLOCK_TERMINATOR])?;
    Ok(())
}

fn write_image_descriptor<W: Write>(
    w: &mut W,
    rect: crate::pipeline::ChangeRect,
    local_table_len: Option<usize>,
) -> Result<()> {
    w.write_all(&[IMAGE_SEPARATOR])?;
    write_u16_le(w, rect.left)?;
    write_u16_le(w, rect.top)?;
    write_u16_le(w, rect.width)?;
    write_u16_le(w, rect.height)?;
    let packed = match local_table_len {
        Some(len) => 0x80 | format::color_table_size_field(len),
        None => 0,
    };
    w.write_all(&[packed])?;
    Ok(())
}

/// Builds the compact per-frame palette and the change-rect-cropped
/// indexed-pixel stream, per `spec.md` §4.6.
fn build_palette(
    frame: &Frame,
    analyzed: &AnalyzedFrame,
    quantizer: Option<&NeuQuant>,
) -> Result<(Vec<u8>, Option<u8>, Vec<u8>)> {
    let rect = analyzed.change_rect;
    let mut palette = Vec::new();
    let mut memo: HashMap<i32, u8> = HashMap::new();
    let mut transparent_index: Option<u8> = None;
    let mut indexed = Vec::with_capacity(rect.width as usize * rect.height as usize);

    for y in rect.top..rect.top.saturating_add(rect.height) {
        for x in rect.left..rect.left.saturating_add(rect.width) {
            let i = y as usize * frame.width as usize + x as usize;
            let o = i * 3;
            let (b, g, r) = (frame.pixels[o], frame.pixels[o + 1], frame.pixels[o + 2]);

            let is_transparent = analyzed.transparent_mask[i]
                || frame.transparent == Some([r, g, b]);

            if is_transparent {
                let idx = match transparent_index {
                    Some(idx) => idx,
                    None => {
                        let [tr, tg, tb] = frame.transparent.unwrap_or([0, 0, 0]);
                        palette.extend_from_slice(&[tr, tg, tb]);
                        let idx = (palette.len() / 3 - 1) as u8;
                        if palette.len() / 3 > 256 {
                            return Err(EncodeError::PaletteOverflow);
                        }
                        transparent_index = Some(idx);
                        idx
                    }
                };
                indexed.push(idx);
                continue;
            }

            let quantizer = quantizer.expect("non-transparent pixel requires a quantizer");
            let q_idx = quantizer.map(b, g, r);
            let pal_idx = match memo.get(&q_idx) {
                Some(&idx) => idx,
                None => {
                    let (pr, pg, pb) = quantizer.color_for_index(q_idx);
                    palette.extend_from_slice(&[pr, pg, pb]);
                    if palette.len() / 3 > 256 {
                        return Err(EncodeError::PaletteOverflow);
                    }
                    let idx = (palette.len() / 3 - 1) as u8;
                    memo.insert(q_idx, idx);
                    idx
                }
            };
            indexed.push(pal_idx);
        }
    }

    let padded_len = format::padded_table_len(palette.len() / 3);
    palette.resize(padded_len, 0);

    Ok((palette, transparent_index, indexed))
}
