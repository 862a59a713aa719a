//! # Ink Frame Core Library
//!
//! This library provides the acquisition-decode-render pipeline for a network
//! picture frame built from a Raspberry Pi and a 7.5" black/white e-paper panel.
//! The device identifies itself to the image server by the hardware address of
//! its wireless interface, downloads a pre-rendered bitmap, and draws it.
//!
//! ## Design Philosophy
//!
//! ### Strictly Sequential Cycles
//! One cycle (probe, fetch, decode, render) runs to completion before the next
//! begins. There is no shared mutable state between cycles; the little state that
//! survives a cycle lives in [`refresh::CycleContext`] and is threaded explicitly.
//!
//! ### Exact Frames
//! A [`DecodedFrame`] always has exactly the panel's native resolution. Decoders
//! never crop, pad, scale, or rotate: any size mismatch is a decode failure.
//! The one transformation is the server's [`Rotation`], applied to a decoded
//! frame before it reaches the panel.
//!
//! ### Nothing Is Fatal
//! Network, decode, and panel failures are logged and retried on a schedule.
//! Only an external shutdown signal ends the refresh loop.
//!
//! ## Data Flow
//! 1. **Probe**: resolve [`identity::DeviceIdentity`] and check connectivity
//! 2. **Online**: fetch payload → [`formats::decode_payload`] → panel → sleep
//! 3. **Unconfigured**: [`presenter::render_config_screen`] → panel → long sleep
//!
//! ## Core Types
//! - [`Pixel`]: one of the two intensities the panel can show
//! - [`Region`]: a rectangular window of the panel
//! - [`DecodedFrame`]: a full-resolution pixel buffer ready for the panel
//! - [`Rotation`]: clockwise quarter turns requested by the server

// Module declarations
pub mod bitmap;
pub mod config;
pub mod connectivity;
pub mod epd7in5_v2;
pub mod fetch;
pub mod formats;
pub mod identity;
pub mod panel;
pub mod presenter;
pub mod refresh;

/// A single pixel value from the panel's palette.
///
/// The target panel is strictly black/white, so the palette has exactly two
/// entries. The discriminants are the packed-bit values of the wire format
/// (see [`bitmap::POLARITY`]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Pixel {
    /// Clear pixel (paper colour)
    #[default]
    White = 0,
    /// Set pixel (ink)
    Black = 1,
}

/// A rectangular area of the panel, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// The whole panel surface for the given dimensions.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// True when the region lies entirely within a `width × height` surface.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|end| end <= width)
            && self.y.checked_add(self.height).is_some_and(|end| end <= height)
    }
}

/// Whether a frame should be drawn as a full refresh or as a partial window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameKind {
    #[default]
    Full,
    /// Only the given region changed; the rest of the frame matches what is
    /// already on the panel.
    Partial(Region),
}

/// Clockwise rotation in quarter turns, as sent in the `Rotate` header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// `0..=3` quarter turns; anything else is not a rotation.
    pub fn from_quarter_turns(turns: u64) -> Option<Self> {
        match turns {
            0 => Some(Rotation::Deg0),
            1 => Some(Rotation::Deg90),
            2 => Some(Rotation::Deg180),
            3 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    /// True for 90° and 270°, which exchange width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// A two-dimensional pixel buffer at the panel's native resolution.
///
/// Pixels are stored row-major, one [`Pixel`] per entry:
/// - `pixels.len() == width * height` always holds
/// - `(x, y)` lives at index `y * width + x`
///
/// # Example
/// ```
/// use ink_frame_lib::{DecodedFrame, Pixel};
///
/// let mut frame = DecodedFrame::blank(16, 2);
/// frame.set_pixel(3, 1, Pixel::Black);
///
/// assert_eq!(frame.pixel(3, 1), Some(Pixel::Black));
/// assert_eq!(frame.count(Pixel::Black), 1);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedFrame {
    width: u32,
    height: u32,
    pixels: Vec<Pixel>,
    kind: FrameKind,
}

impl DecodedFrame {
    /// Create an all-white full frame.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Pixel::White; width as usize * height as usize],
            kind: FrameKind::Full,
        }
    }

    /// Wrap an existing row-major pixel vector.
    ///
    /// Returns `None` when the vector length does not match the dimensions.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<Pixel>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
            kind: FrameKind::Full,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Row-major pixel slice.
    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    /// Pixel at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Pixel> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[self.index(x, y)])
    }

    /// Set the pixel at `(x, y)`. Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: Pixel) {
        if x >= self.width || y >= self.height {
            return;
        }
        let index = self.index(x, y);
        self.pixels[index] = pixel;
    }

    /// Fill the whole frame with one value.
    pub fn fill(&mut self, pixel: Pixel) {
        self.pixels.fill(pixel);
    }

    /// Number of pixels holding `pixel`.
    pub fn count(&self, pixel: Pixel) -> usize {
        self.pixels.iter().filter(|&&p| p == pixel).count()
    }

    /// True when the frame has the given dimensions.
    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    /// Mark the frame as a partial update of `region`.
    ///
    /// A region that does not fit the frame leaves it as a full update.
    pub fn with_region(mut self, region: Region) -> Self {
        self.kind = if region.fits_within(self.width, self.height) {
            FrameKind::Partial(region)
        } else {
            FrameKind::Full
        };
        self
    }

    /// A copy turned clockwise by `rotation`. Quarter turns swap the
    /// dimensions, so a 480×800 frame turned by 90° is 800×480.
    /// The result is always a full frame.
    pub fn rotated(&self, rotation: Rotation) -> Self {
        let (width, height) = (self.width, self.height);
        let (out_width, out_height) = if rotation.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        };

        let mut pixels = Vec::with_capacity(self.pixels.len());
        for y in 0..out_height {
            for x in 0..out_width {
                let (src_x, src_y) = match rotation {
                    Rotation::Deg0 => (x, y),
                    Rotation::Deg90 => (y, height - 1 - x),
                    Rotation::Deg180 => (width - 1 - x, height - 1 - y),
                    Rotation::Deg270 => (width - 1 - y, x),
                };
                pixels.push(self.pixels[self.index(src_x, src_y)]);
            }
        }

        Self {
            width: out_width,
            height: out_height,
            pixels,
            kind: FrameKind::Full,
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}
