//! `gifloom`: a streaming GIF89a encoder.
//!
//! Feed 24-bit truecolor BGR frames to an [`Encoder`] and it emits a
//! well-formed GIF89a byte stream, quantizing each frame's palette with a
//! NeuQuant neural network and optionally applying three independent
//! inter-frame optimizations (duplicate discard, auto-transparency,
//! change-rectangle clipping) before LZW-compressing the indexed pixels.
//!
//! ```no_run
//! use gifloom::{Encoder, EncoderOptions, Frame};
//! use std::io::Cursor;
//!
//! let mut enc = Encoder::new(Cursor::new(Vec::new()), EncoderOptions::default())?;
//! enc.add_frame(Frame::new(vec![0, 0, 255, 0, 0, 255, 0, 0, 255, 0, 0, 255], 2, 2))?;
//! let bytes = enc.close()?.into_inner();
//! # Ok::<(), gifloom::EncodeError>(())
//! ```

mod bitwriter;
mod encoder;
mod format;
mod frame;
mod lzw;
mod neuquant;
mod pipeline;
mod writer;

pub mod error;

pub use encoder::Encoder;
pub use error::{EncodeError, Result};
pub use frame::{Disposal, Frame};
pub use neuquant::NeuQuant;
pub use writer::{EncoderOptions, Repeat};
