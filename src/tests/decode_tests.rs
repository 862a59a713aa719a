//! Wire format properties of the packed bitmap and the format sniffer.

use ink_frame_lib::bitmap::{self, packed_len, DecodeError};
use ink_frame_lib::formats::{decode_payload, WireFormat};
use ink_frame_lib::{DecodedFrame, Pixel};

/// Every length except the exact packed length is rejected.
#[test]
fn wrong_lengths_always_mismatch() {
    for (width, height) in [(8, 2), (10, 3), (800, 480)] {
        let expected = packed_len(width, height);
        for len in [0, 1, expected - 1, expected + 1, expected * 2] {
            let payload = vec![0xAAu8; len];
            assert_eq!(
                bitmap::decode(&payload, width, height),
                Err(DecodeError::LengthMismatch {
                    expected,
                    actual: len
                }),
                "{}x{} accepted {} bytes",
                width,
                height,
                len
            );
        }
    }
}

/// Rows are padded to whole bytes: 10 pixels need 2 bytes per row.
#[test]
fn rows_pad_to_byte_boundary() {
    assert_eq!(packed_len(10, 3), 6);
    assert_eq!(packed_len(800, 480), 48_000);

    // Padding bits are ignored whatever they contain
    let frame = bitmap::decode(&[0x00, 0x7F, 0x00, 0x3F, 0x00, 0x00], 10, 3).unwrap();
    assert_eq!(frame.count(Pixel::Black), 1);
    assert_eq!(frame.pixel(9, 0), Some(Pixel::Black));
}

/// Known sample: top half of an 8x2 frame is a left-aligned bar.
#[test]
fn known_sample_polarity() {
    let frame = bitmap::decode(&[0xF0, 0x0F], 8, 2).unwrap();
    let row = |y| -> String {
        (0..8)
            .map(|x| match frame.pixel(x, y) {
                Some(Pixel::Black) => '#',
                _ => '.',
            })
            .collect()
    };
    assert_eq!(row(0), "####....");
    assert_eq!(row(1), "....####");
}

/// Decoding is deterministic.
#[test]
fn decoding_twice_is_identical() {
    let payload: Vec<u8> = (0..packed_len(800, 480)).map(|i| (i * 37 % 251) as u8).collect();
    let a = bitmap::decode(&payload, 800, 480).unwrap();
    let b = bitmap::decode(&payload, 800, 480).unwrap();
    assert_eq!(a, b);
}

/// Setting a pixel, packing, and decoding reports the same pixel.
#[test]
fn set_pack_decode_preserves_pixels() {
    let (width, height) = (13, 7);
    for y in 0..height {
        for x in 0..width {
            let mut frame = DecodedFrame::blank(width, height);
            frame.set_pixel(x, y, Pixel::Black);

            let decoded = bitmap::decode(&bitmap::pack(&frame), width, height).unwrap();
            assert_eq!(decoded.pixel(x, y), Some(Pixel::Black), "({}, {})", x, y);
            assert_eq!(decoded.count(Pixel::Black), 1);
        }
    }
}

/// In auto mode a payload of the exact packed length is packed data, even if
/// it happens to start with a legacy header.
#[test]
fn auto_mode_prefers_packed_length() {
    let mut payload = vec![0u8; packed_len(16, 4)];
    payload[0] = b'Z';
    payload[1] = b'1';

    let frame = decode_payload(&payload, 16, 4, WireFormat::Auto).unwrap();
    assert_eq!(frame, bitmap::decode(&payload, 16, 4).unwrap());
}

/// In packed mode legacy headers are just wrong-length payloads.
#[test]
fn packed_mode_rejects_legacy_payloads() {
    // Z1: 64 white pixels as one run
    let z1 = [b'Z', b'1', 0x00, 64];
    assert!(matches!(
        decode_payload(&z1, 16, 4, WireFormat::Packed),
        Err(DecodeError::LengthMismatch { .. })
    ));
    assert_eq!(
        decode_payload(&z1, 16, 4, WireFormat::Auto)
            .unwrap()
            .count(Pixel::White),
        64
    );
}

/// Unknown headers in auto mode still fail as a length problem.
#[test]
fn auto_mode_unknown_header() {
    assert!(matches!(
        decode_payload(b"GIF89a", 16, 4, WireFormat::Auto),
        Err(DecodeError::LengthMismatch { expected: 8, actual: 6 })
    ));
}
