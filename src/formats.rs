//! # Payload Format Selection
//!
//! The fixed protocol is the packed bitmap in [`crate::bitmap`]. Older server
//! deployments answer with one of several legacy encodings instead; with
//! [`WireFormat::Auto`] the first two bytes of a payload pick the decoder:
//!
//! | Header | Format                                               |
//! |--------|------------------------------------------------------|
//! | `BM`   | Windows BMP, 1/4/8/16/24/32 bpp                      |
//! | `Z1`   | RLE pairs: colour byte, count byte                   |
//! | `Z2`   | RLE byte: colour in bits 7-6, count in bits 5-0      |
//! | `Z3`   | RLE byte: colour in bits 7-5, count in bits 4-0      |
//!
//! Every decoder produces exactly `width × height` pixels or fails.

use crate::bitmap::{self, DecodeError};
use crate::{DecodedFrame, Pixel};
use serde::{Deserialize, Serialize};

/// Which payload encodings the client accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Header-less packed bitmap only
    #[default]
    Packed,
    /// Packed bitmap, or a legacy format identified by its header
    Auto,
}

/// Concrete encoding of one payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadFormat {
    Packed,
    Bmp,
    RleZ1,
    RleZ2,
    RleZ3,
}

/// Work out how a payload is encoded.
///
/// A payload of exactly the packed length is always packed; legacy headers are
/// only considered in [`WireFormat::Auto`] mode.
pub fn detect(payload: &[u8], width: u32, height: u32, format: WireFormat) -> PayloadFormat {
    if format == WireFormat::Packed || payload.len() == bitmap::packed_len(width, height) {
        return PayloadFormat::Packed;
    }

    match payload.get(..2) {
        Some(b"BM") => PayloadFormat::Bmp,
        Some(b"Z1") => PayloadFormat::RleZ1,
        Some(b"Z2") => PayloadFormat::RleZ2,
        Some(b"Z3") => PayloadFormat::RleZ3,
        // Unknown header: let the packed decoder report the length problem
        _ => PayloadFormat::Packed,
    }
}

/// Decode a server payload for a `width × height` panel.
pub fn decode_payload(
    payload: &[u8],
    width: u32,
    height: u32,
    format: WireFormat,
) -> Result<DecodedFrame, DecodeError> {
    let detected = detect(payload, width, height, format);
    log::debug!("Decoding {} byte payload as {:?}", payload.len(), detected);

    match detected {
        PayloadFormat::Packed => bitmap::decode(payload, width, height),
        PayloadFormat::Bmp => decode_bmp(payload, width, height),
        PayloadFormat::RleZ1 => decode_rle(&payload[2..], width, height, RleLayout::Pairs),
        PayloadFormat::RleZ2 => decode_rle(&payload[2..], width, height, RleLayout::Packed(6)),
        PayloadFormat::RleZ3 => decode_rle(&payload[2..], width, height, RleLayout::Packed(5)),
    }
}

// -- Run-length formats --

#[derive(Clone, Copy)]
enum RleLayout {
    /// Separate colour and count bytes
    Pairs,
    /// One byte per run; the low `n` bits are the count
    Packed(u32),
}

/// Colour index 0 is paper; every other index (black, red, yellow) is ink.
fn pixel_from_index(index: u8) -> Pixel {
    if index == 0 {
        Pixel::White
    } else {
        Pixel::Black
    }
}

fn decode_rle(
    stream: &[u8],
    width: u32,
    height: u32,
    layout: RleLayout,
) -> Result<DecodedFrame, DecodeError> {
    if width == 0 || height == 0 {
        return Err(DecodeError::InvalidDimensions { width, height });
    }

    let expected = width as usize * height as usize;
    let mut pixels = Vec::with_capacity(expected);

    let mut push_run = |index: u8, count: usize| -> Result<(), DecodeError> {
        if pixels.len() + count > expected {
            return Err(DecodeError::Overrun { expected });
        }
        pixels.resize(pixels.len() + count, pixel_from_index(index));
        Ok(())
    };

    match layout {
        RleLayout::Pairs => {
            let mut runs = stream.chunks_exact(2);
            for run in runs.by_ref() {
                push_run(run[0], run[1] as usize)?;
            }
            if !runs.remainder().is_empty() {
                return Err(DecodeError::Unsupported(
                    "Z1 stream ends with a dangling byte".to_string(),
                ));
            }
        }
        RleLayout::Packed(count_bits) => {
            let count_mask = (1u8 << count_bits) - 1;
            for &byte in stream {
                push_run(byte >> count_bits, (byte & count_mask) as usize)?;
            }
        }
    }

    if pixels.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            decoded: pixels.len(),
        });
    }

    DecodedFrame::from_pixels(width, height, pixels).ok_or(DecodeError::Overrun { expected })
}

// -- BMP --

const BMP_FILE_HEADER_LEN: usize = 14;
const BMP_MIN_HEADER_LEN: usize = 54;

fn read_u16(data: &[u8], offset: usize) -> Result<u16, DecodeError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| DecodeError::Unsupported("BMP header too short".to_string()))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, DecodeError> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| DecodeError::Unsupported("BMP header too short".to_string()))
}

/// Mean intensity above mid-grey reads as paper.
fn pixel_from_rgb(r: u8, g: u8, b: u8) -> Pixel {
    if r as u32 + g as u32 + b as u32 > 3 * 0x80 {
        Pixel::White
    } else {
        Pixel::Black
    }
}

fn decode_bmp(data: &[u8], width: u32, height: u32) -> Result<DecodedFrame, DecodeError> {
    if data.len() < BMP_MIN_HEADER_LEN {
        return Err(DecodeError::Unsupported("BMP header too short".to_string()));
    }

    let pixel_offset = read_u32(data, 10)? as usize;
    let info_len = read_u32(data, 14)? as usize;
    let bmp_width = read_u32(data, 18)? as i32;
    let bmp_height = read_u32(data, 22)? as i32;
    let planes = read_u16(data, 26)?;
    let depth = read_u16(data, 28)?;
    let compression = read_u32(data, 30)?;

    log::debug!(
        "BMP: {}x{}, {}bpp, compression={}",
        bmp_width,
        bmp_height,
        depth,
        compression
    );

    if planes != 1 {
        return Err(DecodeError::Unsupported(format!("{} planes", planes)));
    }
    // 0 = BI_RGB, 3 = BI_BITFIELDS (only meaningful as 565 at 16 bpp)
    if compression != 0 && compression != 3 {
        return Err(DecodeError::Unsupported(format!(
            "compression {}",
            compression
        )));
    }
    if !matches!(depth, 1 | 4 | 8 | 16 | 24 | 32) {
        return Err(DecodeError::Unsupported(format!("{} bits per pixel", depth)));
    }

    // Positive height means rows are stored bottom-up
    let bottom_up = bmp_height > 0;
    let actual_height = bmp_height.unsigned_abs();
    let actual_width = bmp_width.unsigned_abs();
    if bmp_width <= 0 || actual_width != width || actual_height != height {
        return Err(DecodeError::DimensionMismatch {
            expected_width: width,
            expected_height: height,
            actual_width,
            actual_height,
        });
    }

    let palette = if depth <= 8 {
        let palette_offset = BMP_FILE_HEADER_LEN + info_len;
        (0..1usize << depth)
            .map(|i| {
                let entry = palette_offset + i * 4;
                data.get(entry..entry + 3)
                    .map(|bgr| pixel_from_rgb(bgr[2], bgr[1], bgr[0]))
                    .unwrap_or(Pixel::White)
            })
            .collect::<Vec<_>>()
    } else {
        Vec::new()
    };

    // Rows are padded to a multiple of four bytes
    let row_size = (width as usize * depth as usize).div_ceil(32) * 4;
    let pixel_bytes = row_size * height as usize;
    let available = data.len().saturating_sub(pixel_offset);
    if pixel_offset > data.len() || available < pixel_bytes {
        return Err(DecodeError::Truncated {
            expected: width as usize * height as usize,
            decoded: (available / row_size.max(1)) * width as usize,
        });
    }

    let mut frame = DecodedFrame::blank(width, height);
    for row in 0..height {
        let y = if bottom_up { height - 1 - row } else { row };
        let start = pixel_offset + row as usize * row_size;
        let line = &data[start..start + row_size];

        for x in 0..width as usize {
            let pixel = match depth {
                1 => palette[((line[x / 8] >> (7 - x % 8)) & 1) as usize],
                4 => {
                    let byte = line[x / 2];
                    let index = if x % 2 == 0 { byte >> 4 } else { byte & 0x0F };
                    palette[index as usize]
                }
                8 => palette[line[x] as usize],
                16 => {
                    let lsb = line[x * 2];
                    let msb = line[x * 2 + 1];
                    let (r, g, b) = if compression == 0 {
                        // 5-5-5
                        (
                            (msb & 0x7C) << 1,
                            ((msb & 0x03) << 6) | ((lsb & 0xE0) >> 2),
                            (lsb & 0x1F) << 3,
                        )
                    } else {
                        // 5-6-5
                        (
                            msb & 0xF8,
                            ((msb & 0x07) << 5) | ((lsb & 0xE0) >> 3),
                            (lsb & 0x1F) << 3,
                        )
                    };
                    pixel_from_rgb(r, g, b)
                }
                _ => {
                    let stride = depth as usize / 8;
                    let px = &line[x * stride..x * stride + 3];
                    pixel_from_rgb(px[2], px[1], px[0])
                }
            };
            frame.set_pixel(x as u32, y, pixel);
        }
    }

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal bottom-up 1 bpp BMP with a black/white palette.
    fn bmp_1bpp(width: u32, height: u32, rows_top_down: &[Vec<u8>]) -> Vec<u8> {
        let row_size = (width as usize).div_ceil(32) * 4;
        let offset = 14 + 40 + 8;
        let mut data = Vec::new();
        data.extend_from_slice(b"BM");
        data.extend_from_slice(&((offset + row_size * height as usize) as u32).to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&(offset as u32).to_le_bytes());
        data.extend_from_slice(&40u32.to_le_bytes());
        data.extend_from_slice(&(width as i32).to_le_bytes());
        data.extend_from_slice(&(height as i32).to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&[0; 20]);
        // palette: index 0 black, index 1 white
        data.extend_from_slice(&[0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0]);
        for row in rows_top_down.iter().rev() {
            let mut padded = row.clone();
            padded.resize(row_size, 0);
            data.extend_from_slice(&padded);
        }
        data
    }

    #[test]
    fn test_packed_mode_ignores_headers() {
        let mut payload = vec![0u8; 10];
        payload[0] = b'Z';
        payload[1] = b'1';
        assert_eq!(
            detect(&payload, 16, 16, WireFormat::Packed),
            PayloadFormat::Packed
        );
        assert_eq!(
            detect(&payload, 16, 16, WireFormat::Auto),
            PayloadFormat::RleZ1
        );
    }

    #[test]
    fn test_exact_length_is_always_packed() {
        let payload = b"BM".iter().copied().chain([0u8; 30]).collect::<Vec<_>>();
        assert_eq!(
            detect(&payload, 16, 16, WireFormat::Auto),
            PayloadFormat::Packed
        );
    }

    #[test]
    fn test_unknown_header_reports_length_mismatch() {
        let err = decode_payload(&[0xAB; 9], 16, 16, WireFormat::Auto).unwrap_err();
        assert!(matches!(err, DecodeError::LengthMismatch { .. }));
    }

    #[test]
    fn test_z1_pairs() {
        // 4x2: 3 white, 5 black
        let payload = [b'Z', b'1', 0, 3, 1, 5];
        let frame = decode_payload(&payload, 4, 2, WireFormat::Auto).unwrap();
        assert_eq!(frame.pixel(2, 0), Some(Pixel::White));
        assert_eq!(frame.pixel(3, 0), Some(Pixel::Black));
        assert_eq!(frame.count(Pixel::Black), 5);
    }

    #[test]
    fn test_z2_packed_runs() {
        // colour 1 (black) x 4, colour 2 (red, drawn black) x 2, colour 0 x 2
        let payload = [b'Z', b'2', 0b01_000100, 0b10_000010, 0b00_000010];
        let frame = decode_payload(&payload, 4, 2, WireFormat::Auto).unwrap();
        assert_eq!(frame.count(Pixel::Black), 6);
        assert_eq!(frame.pixel(3, 1), Some(Pixel::White));
    }

    #[test]
    fn test_z3_packed_runs() {
        let payload = [b'Z', b'3', 0b001_00011, 0b000_00101];
        let frame = decode_payload(&payload, 4, 2, WireFormat::Auto).unwrap();
        assert_eq!(frame.count(Pixel::Black), 3);
    }

    #[test]
    fn test_rle_short_stream_is_truncated() {
        let payload = [b'Z', b'3', 0b001_00011];
        assert_eq!(
            decode_payload(&payload, 4, 2, WireFormat::Auto),
            Err(DecodeError::Truncated {
                expected: 8,
                decoded: 3
            })
        );
    }

    #[test]
    fn test_rle_excess_runs_overrun() {
        let payload = [b'Z', b'1', 1, 200];
        assert_eq!(
            decode_payload(&payload, 4, 2, WireFormat::Auto),
            Err(DecodeError::Overrun { expected: 8 })
        );
    }

    #[test]
    fn test_bmp_bottom_up_1bpp() {
        // Top row: left half black (palette index 0), bottom row all white
        let data = bmp_1bpp(8, 2, &[vec![0b0000_1111], vec![0xFF]]);
        let frame = decode_payload(&data, 8, 2, WireFormat::Auto).unwrap();
        assert_eq!(frame.pixel(0, 0), Some(Pixel::Black));
        assert_eq!(frame.pixel(4, 0), Some(Pixel::White));
        assert_eq!(frame.count(Pixel::Black), 4);
    }

    #[test]
    fn test_bmp_wrong_size_rejected() {
        let data = bmp_1bpp(8, 2, &[vec![0], vec![0]]);
        assert_eq!(
            decode_payload(&data, 16, 2, WireFormat::Auto),
            Err(DecodeError::DimensionMismatch {
                expected_width: 16,
                expected_height: 2,
                actual_width: 8,
                actual_height: 2
            })
        );
    }
}
