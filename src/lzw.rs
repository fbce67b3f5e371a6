//! Authors
//! - Kevin Weiner (original Java version)
//! - Thibault Imbert (AS3 version)
//! - Johan Nordberg (JS version)
//! - Antonio Román (TS version)
//! - Tyler J. Russell (Rust port)
//!
//! Variable-width LZW over an 8-bit symbol alphabet with clear/end codes,
//! greedy longest-match against a prefix dictionary. Output is packed into
//! GIF sub-blocks by a [`BitWriter`].

use std::collections::HashMap;
use std::io::{self, Write};

use crate::bitwriter::BitWriter;

/// The dictionary is cleared once codes would need to exceed 12 bits.
const MAX_CODE_BITS: u8 = 12;
const MAX_DICT_SIZE: u16 = 1 << MAX_CODE_BITS;

/// Encodes `pixels` (palette indices) as a GIF image-data block: the
/// initial code size byte, the LZW-compressed sub-blocks, and the
/// terminating zero-length sub-block. `min_code_size` is `max(2,
/// bits needed for the palette)`.
pub fn encode<W: Write>(min_code_size: u8, pixels: &[u8], sink: W) -> io::Result<W> {
    let mut sink = sink;
    sink.write_all(&[min_code_size])?;

    let mut bw = BitWriter::new(&mut sink);
    encode_into(min_code_size, pixels, &mut bw)?;
    drop(bw.finish()?);
    Ok(sink)
}

fn encode_into<W: Write>(
    min_code_size: u8,
    pixels: &[u8],
    bw: &mut BitWriter<W>,
) -> io::Result<()> {
    let clear_code: u16 = 1 << min_code_size;
    let end_code: u16 = clear_code + 1;
    let mut next_code: u16 = end_code + 1;
    let mut code_size: u8 = min_code_size + 1;
    let mut dict: HashMap<(u16, u8), u16> = HashMap::new();

    bw.write_code(clear_code, code_size)?;

    let mut iter = pixels.iter();
    let mut prefix = match iter.next() {
        Some(&b) => b as u16,
        None => {
            bw.write_code(end_code, code_size)?;
            return Ok(());
        }
    };

    for &symbol in iter {
        if let Some(&code) = dict.get(&(prefix, symbol)) {
            prefix = code;
            continue;
        }

        bw.write_code(prefix, code_size)?;
        dict.insert((prefix, symbol), next_code);
        next_code += 1;

        if next_code == MAX_DICT_SIZE {
            bw.write_code(clear_code, code_size)?;
            dict.clear();
            next_code = end_code + 1;
            code_size = min_code_size + 1;
        } else if next_code > (1u16 << code_size) && code_size < MAX_CODE_BITS {
            code_size += 1;
        }

        prefix = symbol as u16;
    }

    bw.write_code(prefix, code_size)?;
    bw.write_code(end_code, code_size)?;
    Ok(())
}

/// `max(2, bits needed to represent `palette_colors - 1`)`, the LZW
/// minimum code size the GIF format requires.
pub fn min_code_size(palette_colors: usize) -> u8 {
    let bits = if palette_colors <= 1 {
        1
    } else {
        (usize::BITS - (palette_colors - 1).leading_zeros()) as u8
    };
    bits.max(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_uniform_pixels_compactly() {
        let pixels = vec![0u8; 16];
        let out = encode(2, &pixels, Vec::new()).unwrap();
        assert_eq!(out[0], 2);
        assert_eq!(out.last().copied(), Some(0x00));
        assert!(out.len() < pixels.len());
    }

    #[test]
    fn empty_pixel_stream_still_emits_clear_and_end() {
        let out = encode(2, &[], Vec::new()).unwrap();
        assert_eq!(out[0], 2);
        assert_eq!(out.last().copied(), Some(0x00));
    }

    #[test]
    fn min_code_size_matches_gif_minimum_of_two() {
        assert_eq!(min_code_size(1), 2);
        assert_eq!(min_code_size(2), 2);
        assert_eq!(min_code_size(4), 2);
        assert_eq!(min_code_size(5), 3);
        assert_eq!(min_code_size(256), 8);
    }
}
