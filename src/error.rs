//! Error types returned from the encoding pipeline.

use thiserror::Error;

/// Everything that can go wrong while building a GIF stream.
///
/// Validation failures (`InvalidFrame`, `PaletteOverflow`) never mutate
/// encoder state; I/O failures leave the encoder poisoned (see
/// [`crate::Encoder::add_frame`]).
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("more than 256 distinct colors emitted for a single frame")]
    PaletteOverflow,

    #[error("I/O error while writing GIF stream: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EncodeError>;
