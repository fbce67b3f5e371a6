//! Fixed byte tags and little-endian/ASCII primitives for the GIF89a
//! container. Nothing here is algorithmic; it exists so the rest of the
//! crate never hand-rolls a byte tag twice.

use std::io::{self, Write};

pub const SIGNATURE: &[u8; 6] = b"GIF89a";
pub const TRAILER: u8 = 0x3B;

pub const EXTENSION_INTRODUCER: u8 = 0x21;
pub const GRAPHIC_CONTROL_LABEL: u8 = 0xF9;
pub const APPLICATION_LABEL: u8 = 0xFF;
pub const IMAGE_SEPARATOR: u8 = 0x2C;

pub const GRAPHIC_CONTROL_BLOCK_SIZE: u8 = 0x04;
pub const NETSCAPE_APP_BLOCK_SIZE: u8 = 0x0B;
pub const NETSCAPE_APPLICATION: &[u8; 11] = b"NETSCAPE2.0";
pub const NETSCAPE_SUB_BLOCK_ID: u8 = 0x01;

pub const BLOCK_TERMINATOR: u8 = 0x00;

/// Writes `v` little-endian.
pub fn write_u16_le<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// `log2(len/3) - 1` packed into the low 3 bits of a color-table-size field.
/// `len` must be `3 * 2^k` for `k` in `1..=8`.
pub fn color_table_size_field(len: usize) -> u8 {
    debug_assert!(len % 3 == 0);
    let colors = len / 3;
    debug_assert!(colors.is_power_of_two());
    (colors.trailing_zeros() as u8).saturating_sub(1)
}

/// Next power-of-two color count (in `2..=256`) that can hold `distinct`
/// palette entries, expressed as a packed byte length (`colors * 3`).
pub fn padded_table_len(distinct: usize) -> usize {
    let distinct = distinct.max(1);
    let colors = distinct.next_power_of_two().max(2);
    colors * 3
}
