//! The public encoder lifetime: open, add frames, close.

use std::io::Write;

use tracing::{info, instrument};

use crate::error::{EncodeError, Result};
use crate::frame::Frame;
use crate::pipeline;
use crate::writer::{EncoderOptions, GifWriter};

/// Streaming GIF89a encoder. Owns the output sink for its whole lifetime:
/// `new` opens the stream (but writes nothing until the first frame fixes
/// the canvas size), `add_frame` feeds frames one at a time, and `close`
/// emits the trailer and hands the sink back. The sink only needs to
/// implement [`Write`] — when `discard_duplicates` is set, [`GifWriter`]
/// stages output in memory internally rather than requiring the sink
/// itself to support seeking.
pub struct Encoder<W: Write> {
    writer: GifWriter<W>,
    options: EncoderOptions,
    canvas: Option<(u16, u16)>,
    prev_pixels: Option<Vec<u8>>,
    closed: bool,
}

impl<W: Write> Encoder<W> {
    pub fn new(sink: W, options: EncoderOptions) -> Result<Self> {
        let writer = GifWriter::new(sink, options.repeat, options.discard_duplicates);
        Ok(Encoder {
            writer,
            options,
            canvas: None,
            prev_pixels: None,
            closed: false,
        })
    }

    #[instrument(skip(self, frame), fields(width = frame.width, height = frame.height))]
    pub fn add_frame(&mut self, frame: Frame) -> Result<()> {
        self.validate(&frame)?;

        if self.options.auto_transparency && frame.transparent.is_some() {
            return Err(EncodeError::InvalidFrame(
                "AutoTransparency cannot be combined with an explicit frame transparent color"
                    .into(),
            ));
        }

        let analyzed = pipeline::analyze(
            &frame,
            self.prev_pixels.as_deref(),
            self.options.auto_transparency,
            self.options.clip_frame,
        );

        let is_duplicate =
            self.options.discard_duplicates && self.canvas.is_some() && !analyzed.contributes_change;

        if is_duplicate {
            self.writer.discard_duplicate(frame.delay_cs)?;
        } else {
            let is_first = self.canvas.is_none();
            self.writer.write_frame(is_first, &frame, &analyzed)?;
            if is_first {
                self.canvas = Some((frame.width, frame.height));
                info!(width = frame.width, height = frame.height, "canvas established");
            }
        }

        self.prev_pixels = Some(frame.pixels);
        Ok(())
    }

    fn validate(&self, frame: &Frame) -> Result<()> {
        if self.closed {
            return Err(EncodeError::InvalidFrame("frame added after close".into()));
        }
        if frame.pixels.len() != frame.expected_len() {
            return Err(EncodeError::InvalidFrame(format!(
                "frame pixel buffer has {} bytes, expected {} for {}x{}",
                frame.pixels.len(),
                frame.expected_len(),
                frame.width,
                frame.height
            )));
        }
        if let Some((w, h)) = self.canvas {
            if frame.width != w || frame.height != h {
                return Err(EncodeError::InvalidFrame(format!(
                    "frame size {}x{} does not match canvas {}x{}",
                    frame.width, frame.height, w, h
                )));
            }
        }
        Ok(())
    }

    /// Writes the trailer and returns the underlying sink.
    pub fn close(mut self) -> Result<W> {
        self.closed = true;
        self.writer.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Disposal;
    use crate::writer::Repeat;
    use std::io::Cursor;

    fn solid(w: u16, h: u16, bgr: [u8; 3]) -> Frame {
        Frame::new(
            std::iter::repeat(bgr)
                .take(w as usize * h as usize)
                .flatten()
                .collect(),
            w,
            h,
        )
    }

    fn encoder(opts: EncoderOptions) -> Encoder<Cursor<Vec<u8>>> {
        Encoder::new(Cursor::new(Vec::new()), opts).unwrap()
    }

    struct ParsedFrame {
        gce_delay: Option<u16>,
        gce_packed: Option<u8>,
        rect: (u16, u16, u16, u16),
    }

    struct ParsedGif {
        repeat: Option<u16>,
        frames: Vec<ParsedFrame>,
    }

    /// A minimal block-structure walker for the byte layout `spec.md` §6
    /// defines. Used by tests instead of scanning for marker bytes
    /// directly, since marker-like bytes can occur inside LZW sub-blocks.
    fn parse_gif(bytes: &[u8]) -> ParsedGif {
        fn le16(b: &[u8], pos: usize) -> u16 {
            u16::from_le_bytes([b[pos], b[pos + 1]])
        }
        fn skip_subblocks(b: &[u8], pos: &mut usize) {
            loop {
                let n = b[*pos] as usize;
                *pos += 1;
                if n == 0 {
                    break;
                }
                *pos += n;
            }
        }

        assert_eq!(&bytes[0..6], b"GIF89a");
        let mut pos = 6;
        pos += 4; // width, height
        let packed = bytes[pos];
        pos += 3; // packed, bg index, aspect
        if packed & 0x80 != 0 {
            let colors = 2usize << (packed & 0x07);
            pos += colors * 3;
        }

        let mut repeat = None;
        let mut pending_gce: Option<(u16, u8)> = None;
        let mut frames = Vec::new();

        loop {
            match bytes[pos] {
                0x3B => break,
                0x21 => {
                    pos += 1;
                    let label = bytes[pos];
                    pos += 1;
                    match label {
                        0xF9 => {
                            let _block_size = bytes[pos];
                            pos += 1;
                            let packed_gce = bytes[pos];
                            pos += 1;
                            let delay = le16(bytes, pos);
                            pos += 2;
                            pos += 1; // transparent index
                            pos += 1; // terminator
                            pending_gce = Some((delay, packed_gce));
                        }
                        0xFF => {
                            let app_block_size = bytes[pos] as usize;
                            pos += 1;
                            let app_id = &bytes[pos..pos + app_block_size];
                            pos += app_block_size;
                            let is_netscape = app_id == b"NETSCAPE2.0";
                            let mut first = true;
                            loop {
                                let n = bytes[pos] as usize;
                                pos += 1;
                                if n == 0 {
                                    break;
                                }
                                if first && is_netscape && n == 3 && bytes[pos] == 0x01 {
                                    repeat = Some(le16(bytes, pos + 1));
                                }
                                pos += n;
                                first = false;
                            }
                        }
                        _ => skip_subblocks(bytes, &mut pos),
                    }
                }
                0x2C => {
                    let left = le16(bytes, pos + 1);
                    let top = le16(bytes, pos + 3);
                    let width = le16(bytes, pos + 5);
                    let height = le16(bytes, pos + 7);
                    pos += 9;
                    let packed_id = bytes[pos];
                    pos += 1;
                    if packed_id & 0x80 != 0 {
                        let colors = 2usize << (packed_id & 0x07);
                        pos += colors * 3;
                    }
                    pos += 1; // LZW minimum code size
                    skip_subblocks(bytes, &mut pos);

                    let (gce_delay, gce_packed) = match pending_gce.take() {
                        Some((d, p)) => (Some(d), Some(p)),
                        None => (None, None),
                    };
                    frames.push(ParsedFrame {
                        gce_delay,
                        gce_packed,
                        rect: (left, top, width, height),
                    });
                }
                other => panic!("unexpected block tag 0x{other:02x} at offset {pos}"),
            }
        }

        ParsedGif { repeat, frames }
    }

    /// Scenario 1: single 2x2 solid red frame.
    #[test]
    fn single_solid_red_frame() {
        let mut enc = encoder(EncoderOptions::default());
        let mut f = solid(2, 2, [0, 0, 255]);
        f.delay_cs = 100;
        enc.add_frame(f).unwrap();
        let out = enc.close().unwrap().into_inner();

        assert_eq!(&out[0..6], b"GIF89a");
        assert_eq!(u16::from_le_bytes([out[6], out[7]]), 2);
        assert_eq!(u16::from_le_bytes([out[8], out[9]]), 2);
        assert_eq!(*out.last().unwrap(), 0x3B);
    }

    /// Scenario 2: two identical frames with DiscardDuplicates set; the
    /// second writes no image data and the first GCE's delay becomes the
    /// sum of both frames' delays.
    #[test]
    fn discard_duplicates_folds_delay() {
        let mut enc = encoder(EncoderOptions {
            discard_duplicates: true,
            ..Default::default()
        });
        let mut a = solid(4, 4, [5, 5, 5]);
        a.delay_cs = 10;
        let mut b = solid(4, 4, [5, 5, 5]);
        b.delay_cs = 20;

        enc.add_frame(a).unwrap();
        enc.add_frame(b).unwrap();
        let out = enc.close().unwrap().into_inner();

        let parsed = parse_gif(&out);
        assert_eq!(parsed.frames.len(), 1, "the duplicate writes no image block");
        assert_eq!(parsed.frames[0].gce_delay, Some(30));
    }

    /// Scenario 3: two frames differing only in a 2x2 block, ClipFrame on.
    #[test]
    fn clip_frame_bounds_the_changed_block() {
        let mut enc = encoder(EncoderOptions {
            clip_frame: true,
            ..Default::default()
        });
        let a = solid(4, 4, [0, 0, 0]);
        enc.add_frame(a.clone()).unwrap();

        let mut b = a.clone();
        for y in 1..3usize {
            for x in 1..3usize {
                let o = (y * 4 + x) * 3;
                b.pixels[o] = 255;
                b.pixels[o + 1] = 255;
                b.pixels[o + 2] = 255;
            }
        }
        enc.add_frame(b).unwrap();
        let out = enc.close().unwrap().into_inner();

        let seps: Vec<usize> = out
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b == 0x2C)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(seps.len(), 2);
        let second = seps[1];
        let left = u16::from_le_bytes([out[second + 1], out[second + 2]]);
        let top = u16::from_le_bytes([out[second + 3], out[second + 4]]);
        let width = u16::from_le_bytes([out[second + 5], out[second + 6]]);
        let height = u16::from_le_bytes([out[second + 7], out[second + 8]]);
        assert_eq!((left, top, width, height), (1, 1, 2, 2));
    }

    /// Scenario 4: AutoTransparency frame with one unchanged row emits the
    /// transparent index for that row, and the GCE transparency flag is set.
    #[test]
    fn auto_transparency_marks_unchanged_row() {
        let mut enc = encoder(EncoderOptions {
            auto_transparency: true,
            ..Default::default()
        });
        let a = solid(2, 2, [1, 2, 3]);
        enc.add_frame(a.clone()).unwrap();

        let mut b = a.clone();
        // change only the bottom row (y=1)
        b.pixels[3 * 2] = 200;
        b.pixels[3 * 2 + 1] = 200;
        b.pixels[3 * 2 + 2] = 200;
        b.pixels[3 * 3] = 201;
        b.pixels[3 * 3 + 1] = 201;
        b.pixels[3 * 3 + 2] = 201;
        enc.add_frame(b).unwrap();
        let out = enc.close().unwrap().into_inner();

        let gce_positions: Vec<usize> = out
            .windows(2)
            .enumerate()
            .filter(|&(_, w)| w == [0x21, 0xF9])
            .map(|(i, _)| i)
            .collect();
        assert_eq!(gce_positions.len(), 2);
        let second_gce = gce_positions[1];
        let packed = out[second_gce + 3];
        assert_eq!(packed & 0x01, 1, "transparency flag must be set");
    }

    /// Scenario 5: twenty-frame loop with Repeat=3.
    #[test]
    fn twenty_frame_loop_with_finite_repeat() {
        let mut enc = encoder(EncoderOptions {
            repeat: Repeat::Finite(3),
            ..Default::default()
        });
        for i in 0..20u8 {
            enc.add_frame(solid(2, 2, [i, i, i])).unwrap();
        }
        let out = enc.close().unwrap().into_inner();

        let netscape_count = out
            .windows(11)
            .filter(|w| *w == b"NETSCAPE2.0")
            .count();
        assert_eq!(netscape_count, 1);

        let ns_offset = out.windows(11).position(|w| w == b"NETSCAPE2.0").unwrap();
        let repeat_offset = ns_offset + 11 + 2; // past "NETSCAPE2.0", sub-block size + sub id
        let repeat = u16::from_le_bytes([out[repeat_offset], out[repeat_offset + 1]]);
        assert_eq!(repeat, 3);

        assert_eq!(out.iter().filter(|&&b| b == 0x2C).count(), 20);
        assert_eq!(*out.last().unwrap(), 0x3B);
    }

    /// Scenario 6: AutoTransparency + explicit frame.transparent is rejected.
    #[test]
    fn auto_transparency_with_explicit_transparent_color_is_rejected() {
        let mut enc = encoder(EncoderOptions {
            auto_transparency: true,
            ..Default::default()
        });
        let mut f = solid(2, 2, [1, 2, 3]);
        f.transparent = Some([1, 2, 3]);
        let err = enc.add_frame(f).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidFrame(_)));
    }

    #[test]
    fn mismatched_canvas_size_is_rejected() {
        let mut enc = encoder(EncoderOptions::default());
        enc.add_frame(solid(2, 2, [0, 0, 0])).unwrap();
        let err = enc.add_frame(solid(3, 3, [0, 0, 0])).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidFrame(_)));
    }

    #[test]
    fn wrong_pixel_buffer_length_is_rejected() {
        let mut enc = encoder(EncoderOptions::default());
        let f = Frame::new(vec![0, 0, 0], 2, 2);
        let err = enc.add_frame(f).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidFrame(_)));
    }

    #[test]
    fn default_disposal_round_trips() {
        let f = solid(1, 1, [0, 0, 0]);
        assert_eq!(f.disposal, Disposal::Unspecified);
    }

    /// A sink that only implements `Write` (no `Seek` at all, unlike
    /// `Cursor`) still works as long as `discard_duplicates` is off.
    #[test]
    fn write_only_sink_does_not_require_seek() {
        struct WriteOnly(Vec<u8>);
        impl std::io::Write for WriteOnly {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.write(buf)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut enc = Encoder::new(WriteOnly(Vec::new()), EncoderOptions::default()).unwrap();
        enc.add_frame(solid(2, 2, [0, 0, 255])).unwrap();
        let out = enc.close().unwrap().0;

        assert_eq!(&out[0..6], b"GIF89a");
        assert_eq!(*out.last().unwrap(), 0x3B);
    }
}
