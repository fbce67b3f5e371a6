//! Per-frame diffing: duplicate detection, the auto-transparency mask, and
//! change-rectangle clipping. Runs once per incoming [`Frame`], before
//! quantization.

use bitvec::prelude::*;

use crate::frame::Frame;

/// The smallest axis-aligned rectangle (in frame coordinates) enclosing
/// every pixel that changed since the previous frame. `width == 0` (or
/// `height == 0`) means nothing changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRect {
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
}

impl ChangeRect {
    pub fn full(width: u16, height: u16) -> Self {
        ChangeRect {
            left: 0,
            top: 0,
            width,
            height,
        }
    }

    pub fn empty() -> Self {
        ChangeRect {
            left: 0,
            top: 0,
            width: 0,
            height: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Everything [`crate::writer::GifWriter`] needs that isn't already on the
/// public [`Frame`]: the opaque-pixel subset fed to the quantizer, the
/// transparency mask, and the change rectangle.
pub struct AnalyzedFrame {
    pub opaque_pixels: Vec<u8>,
    pub transparent_mask: BitVec<u8, Lsb0>,
    pub change_rect: ChangeRect,
    pub contributes_change: bool,
}

/// Diffs `frame` against `prev` (the immediately preceding frame's raw
/// pixels), honoring `auto_transparency` and `clip_frame`. `prev == None`
/// for the first frame, which always contributes its full extent.
pub fn analyze(
    frame: &Frame,
    prev: Option<&[u8]>,
    auto_transparency: bool,
    clip_frame: bool,
) -> AnalyzedFrame {
    let width = frame.width;
    let height = frame.height;
    let pixel_count = width as usize * height as usize;

    let Some(prev) = prev else {
        return AnalyzedFrame {
            opaque_pixels: frame.pixels.clone(),
            transparent_mask: bitvec![u8, Lsb0; 0; pixel_count],
            change_rect: ChangeRect::full(width, height),
            contributes_change: true,
        };
    };

    let mut contributes = bitvec![u8, Lsb0; 0; pixel_count];
    let mut any_change = false;
    for i in 0..pixel_count {
        let o = i * 3;
        let differs = frame.pixels[o] != prev[o]
            || frame.pixels[o + 1] != prev[o + 1]
            || frame.pixels[o + 2] != prev[o + 2];
        contributes.set(i, differs);
        any_change |= differs;
    }

    let mut opaque_pixels = Vec::with_capacity(frame.pixels.len());
    let mut transparent_mask = bitvec![u8, Lsb0; 0; pixel_count];
    for i in 0..pixel_count {
        let o = i * 3;
        let changed = contributes[i];
        if changed || !auto_transparency {
            opaque_pixels.extend_from_slice(&frame.pixels[o..o + 3]);
        }
        if !changed && auto_transparency {
            transparent_mask.set(i, true);
        }
    }

    let change_rect = if !clip_frame {
        ChangeRect::full(width, height)
    } else if !any_change {
        ChangeRect::empty()
    } else {
        let (mut min_x, mut min_y) = (width as i32, height as i32);
        let (mut max_x, mut max_y) = (-1i32, -1i32);
        for i in 0..pixel_count {
            if contributes[i] {
                let x = (i % width as usize) as i32;
                let y = (i / width as usize) as i32;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
        ChangeRect {
            left: min_x as u16,
            top: min_y as u16,
            width: (max_x - min_x + 1) as u16,
            height: (max_y - min_y + 1) as u16,
        }
    };

    AnalyzedFrame {
        opaque_pixels,
        transparent_mask,
        change_rect,
        contributes_change: any_change,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u16, h: u16, bgr: [u8; 3]) -> Frame {
        let mut f = Frame::new(
            std::iter::repeat(bgr)
                .take(w as usize * h as usize)
                .flatten()
                .collect(),
            w,
            h,
        );
        f.delay_cs = 10;
        f
    }

    #[test]
    fn first_frame_is_full_rect_and_fully_opaque() {
        let f = solid(4, 4, [1, 2, 3]);
        let a = analyze(&f, None, true, true);
        assert!(a.contributes_change);
        assert_eq!(a.change_rect, ChangeRect::full(4, 4));
        assert_eq!(a.opaque_pixels, f.pixels);
        assert!(a.transparent_mask.not_any());
    }

    #[test]
    fn identical_frame_contributes_nothing() {
        let prev = solid(4, 4, [9, 9, 9]);
        let next = solid(4, 4, [9, 9, 9]);
        let a = analyze(&next, Some(&prev.pixels), true, true);
        assert!(!a.contributes_change);
        assert!(a.change_rect.is_empty());
        assert!(a.opaque_pixels.is_empty());
        assert!(a.transparent_mask.all());
    }

    #[test]
    fn changed_block_produces_tight_rect() {
        let prev = solid(4, 4, [0, 0, 0]);
        let mut next = prev.clone();
        // change the 2x2 block at (1,1)..(3,3)
        for y in 1..3u16 {
            for x in 1..3u16 {
                let o = (y as usize * 4 + x as usize) * 3;
                next.pixels[o] = 255;
                next.pixels[o + 1] = 255;
                next.pixels[o + 2] = 255;
            }
        }
        let a = analyze(&next, Some(&prev.pixels), false, true);
        assert_eq!(
            a.change_rect,
            ChangeRect {
                left: 1,
                top: 1,
                width: 2,
                height: 2
            }
        );
    }

    #[test]
    fn without_clip_frame_rect_is_always_full() {
        let prev = solid(4, 4, [0, 0, 0]);
        let mut next = prev.clone();
        next.pixels[0] = 255;
        let a = analyze(&next, Some(&prev.pixels), false, false);
        assert_eq!(a.change_rect, ChangeRect::full(4, 4));
    }
}
