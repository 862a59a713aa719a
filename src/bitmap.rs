//! # Packed Bitmap Wire Format
//!
//! The image server sends a header-less, row-major, 1 bit per pixel bitmap sized
//! exactly to the panel:
//!
//! - **Row stride**: `ceil(width / 8)` bytes; unused low bits of a row's last byte
//!   are ignored
//! - **Bit order**: most-significant bit first (bit 7 is the leftmost pixel)
//! - **Polarity**: fixed by [`POLARITY`]; a set bit is black ink
//! - **Length**: exactly `ceil(width / 8) * height` bytes
//!
//! The decoder never truncates or pads. Anything other than the exact length is
//! a [`DecodeError::LengthMismatch`].

use crate::{DecodedFrame, Pixel};
use thiserror::Error;

/// Errors produced while turning a server payload into a [`DecodedFrame`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload size differs from the size the panel resolution requires
    #[error("payload is {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Embedded image dimensions differ from the panel's native resolution
    #[error("image is {actual_width}x{actual_height}, panel is {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// Compressed stream ended before every pixel was produced
    #[error("stream ended after {decoded} of {expected} pixels")]
    Truncated { expected: usize, decoded: usize },

    /// Compressed stream describes more pixels than the panel has
    #[error("stream describes more than {expected} pixels")]
    Overrun { expected: usize },

    /// Header present but not something this client can draw
    #[error("unsupported image: {0}")]
    Unsupported(String),

    /// Panel dimensions of zero
    #[error("invalid panel dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Mapping between a packed bit and the pixel it shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    /// Bit 1 is black ink, bit 0 is white paper
    SetIsBlack,
    /// Bit 1 is white paper, bit 0 is black ink
    SetIsWhite,
}

impl Polarity {
    pub fn pixel_for(self, bit_set: bool) -> Pixel {
        match (self, bit_set) {
            (Polarity::SetIsBlack, true) | (Polarity::SetIsWhite, false) => Pixel::Black,
            _ => Pixel::White,
        }
    }

    pub fn bit_for(self, pixel: Pixel) -> bool {
        match self {
            Polarity::SetIsBlack => pixel == Pixel::Black,
            Polarity::SetIsWhite => pixel == Pixel::White,
        }
    }
}

/// Protocol polarity agreed with the image server. Not negotiated at runtime.
pub const POLARITY: Polarity = Polarity::SetIsBlack;

/// Bytes per packed row.
pub fn row_bytes(width: u32) -> usize {
    width.div_ceil(8) as usize
}

/// Exact payload length for a `width × height` panel.
pub fn packed_len(width: u32, height: u32) -> usize {
    row_bytes(width) * height as usize
}

/// Decode a packed payload into a frame of exactly `width × height` pixels.
///
/// Deterministic: the same bytes always produce an identical frame.
///
/// # Example
/// ```
/// use ink_frame_lib::bitmap::{decode, DecodeError};
/// use ink_frame_lib::Pixel;
///
/// let frame = decode(&[0b1000_0000, 0x00], 8, 2).unwrap();
/// assert_eq!(frame.pixel(0, 0), Some(Pixel::Black));
/// assert_eq!(frame.pixel(1, 0), Some(Pixel::White));
///
/// assert_eq!(
///     decode(&[0x00], 8, 2),
///     Err(DecodeError::LengthMismatch { expected: 2, actual: 1 })
/// );
/// ```
pub fn decode(payload: &[u8], width: u32, height: u32) -> Result<DecodedFrame, DecodeError> {
    if width == 0 || height == 0 {
        return Err(DecodeError::InvalidDimensions { width, height });
    }

    let expected = packed_len(width, height);
    if payload.len() != expected {
        return Err(DecodeError::LengthMismatch {
            expected,
            actual: payload.len(),
        });
    }

    let stride = row_bytes(width);
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for row in payload.chunks_exact(stride) {
        for x in 0..width as usize {
            let bit_set = row[x / 8] & (0x80 >> (x % 8)) != 0;
            pixels.push(POLARITY.pixel_for(bit_set));
        }
    }

    DecodedFrame::from_pixels(width, height, pixels).ok_or(DecodeError::LengthMismatch {
        expected,
        actual: payload.len(),
    })
}

/// Pack a frame into the wire format (and the panel's RAM format).
///
/// Padding bits at the end of each row are left clear.
pub fn pack(frame: &DecodedFrame) -> Vec<u8> {
    let width = frame.width() as usize;
    let stride = row_bytes(frame.width());
    let mut bytes = vec![0u8; packed_len(frame.width(), frame.height())];

    for (y, row) in frame.pixels().chunks_exact(width.max(1)).enumerate() {
        for (x, &pixel) in row.iter().enumerate() {
            if POLARITY.bit_for(pixel) {
                bytes[y * stride + x / 8] |= 0x80 >> (x % 8);
            }
        }
    }

    bytes
}
