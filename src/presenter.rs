//! # Configuration Screen
//!
//! Shown whenever the device cannot reach the image server. The layout is fixed
//! and compiled in:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │███████████ Device Not Registered ████████████│  inverted header
//! │ MAC Address (use for registration):    ▄▄▄▄  │
//! │ AA:BB:CC:DD:EE:FF                      █QR█  │
//! │ Device Hostname:                       ▀▀▀▀  │
//! │ INK_AABBCCDDEEFF                  Scan for help
//! │ 1. Go to https://...                         │
//! │ ...                                          │
//! │ Status: ...                                  │
//! │████████ Documentation: https://... ██████████│  inverted footer
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Rendering never fails: a QR code that cannot be built is simply left out.

use crate::identity::DeviceIdentity;
use crate::DecodedFrame;
use core::convert::Infallible;
use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_8X13, FONT_9X15},
        MonoTextStyle,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle},
    text::{Alignment, Baseline, Text, TextStyle, TextStyleBuilder},
};
use qrcode::QrCode;

const HEADER_HEIGHT: u32 = 70;
const FOOTER_HEIGHT: u32 = 40;
const LEFT_MARGIN: i32 = 50;
const QR_MODULE_PX: u32 = 4;
const QR_BORDER_MODULES: u32 = 2;

/// Lets embedded-graphics draw straight into a frame. `On` is ink.
impl OriginDimensions for DecodedFrame {
    fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }
}

impl DrawTarget for DecodedFrame {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = embedded_graphics::Pixel<Self::Color>>,
    {
        for embedded_graphics::Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            let pixel = match color {
                BinaryColor::On => crate::Pixel::Black,
                BinaryColor::Off => crate::Pixel::White,
            };
            self.set_pixel(point.x as u32, point.y as u32, pixel);
        }
        Ok(())
    }
}

/// Text content of the configuration screen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigInstructions {
    pub portal_url: String,
    pub help_url: String,
    /// `None` when no interface address could be read
    pub identity: Option<DeviceIdentity>,
    /// Why the device is in configuration mode
    pub status: Option<String>,
}

impl ConfigInstructions {
    pub fn new(portal_url: &str, help_url: &str, identity: Option<DeviceIdentity>) -> Self {
        Self {
            portal_url: portal_url.to_string(),
            help_url: help_url.to_string(),
            identity,
            status: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn title(&self) -> &'static str {
        "Device Not Registered"
    }

    pub fn subtitle(&self) -> String {
        let host = self
            .portal_url
            .split("://")
            .nth(1)
            .unwrap_or(&self.portal_url)
            .trim_end_matches('/');
        format!("Register at {} to display content", host)
    }

    /// The identity exactly as the portal expects it.
    pub fn identity_text(&self) -> String {
        self.identity
            .as_ref()
            .map(DeviceIdentity::to_string)
            .unwrap_or_else(|| "unavailable - is Wi-Fi enabled?".to_string())
    }

    pub fn hostname_text(&self) -> String {
        self.identity
            .as_ref()
            .map(DeviceIdentity::hostname)
            .unwrap_or_else(|| "-".to_string())
    }

    pub fn steps(&self) -> Vec<String> {
        vec![
            format!("1. Go to {}", self.portal_url),
            "2. Create an account or log in".to_string(),
            "3. Register this device using the MAC address above".to_string(),
            "4. Configure your display content".to_string(),
            "5. The display will update automatically".to_string(),
        ]
    }

    pub fn footer(&self) -> String {
        format!("Documentation: {}", self.help_url)
    }

    /// Every line of text on the screen, top to bottom.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            self.title().to_string(),
            self.subtitle(),
            "MAC Address (use for registration):".to_string(),
            self.identity_text(),
            "Device Hostname:".to_string(),
            self.hostname_text(),
        ];
        lines.extend(self.steps());
        if let Some(status) = &self.status {
            lines.push(format!("Status: {}", status));
        }
        lines.push(self.footer());
        lines
    }
}

fn top_left() -> TextStyle {
    TextStyleBuilder::new().baseline(Baseline::Top).build()
}

fn top_center() -> TextStyle {
    TextStyleBuilder::new()
        .alignment(Alignment::Center)
        .baseline(Baseline::Top)
        .build()
}

/// Draw the QR code for `data` with its top-right corner `right_margin` pixels
/// from the frame edge. Returns the top-left corner and edge length.
fn draw_qr(
    frame: &mut DecodedFrame,
    data: &str,
    right_margin: u32,
    top: i32,
) -> Option<(Point, u32)> {
    let code = match QrCode::new(data.as_bytes()) {
        Ok(code) => code,
        Err(e) => {
            log::debug!("Skipping QR code for {:?}: {:?}", data, e);
            return None;
        }
    };

    let modules = code.width() as u32;
    let edge = (modules + 2 * QR_BORDER_MODULES) * QR_MODULE_PX;
    let origin = Point::new(
        frame.width().saturating_sub(edge + right_margin) as i32,
        top,
    );
    let dark = PrimitiveStyle::with_fill(BinaryColor::On);

    for (index, color) in code.to_colors().into_iter().enumerate() {
        if color != qrcode::Color::Dark {
            continue;
        }
        let mx = index as u32 % modules + QR_BORDER_MODULES;
        let my = index as u32 / modules + QR_BORDER_MODULES;
        Rectangle::new(
            origin + Point::new((mx * QR_MODULE_PX) as i32, (my * QR_MODULE_PX) as i32),
            Size::new(QR_MODULE_PX, QR_MODULE_PX),
        )
        .into_styled(dark)
        .draw(frame)
        .ok();
    }

    Some((origin, edge))
}

/// Render the configuration screen at the panel's native resolution.
pub fn render_config_screen(
    instructions: &ConfigInstructions,
    width: u32,
    height: u32,
) -> DecodedFrame {
    let mut frame = DecodedFrame::blank(width, height);
    let center = (width / 2) as i32;

    let ink_large = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);
    let ink_medium = MonoTextStyle::new(&FONT_9X15, BinaryColor::On);
    let ink_small = MonoTextStyle::new(&FONT_8X13, BinaryColor::On);
    let paper_large = MonoTextStyle::new(&FONT_10X20, BinaryColor::Off);
    let paper_medium = MonoTextStyle::new(&FONT_9X15, BinaryColor::Off);
    let paper_small = MonoTextStyle::new(&FONT_8X13, BinaryColor::Off);
    let fill = PrimitiveStyle::with_fill(BinaryColor::On);

    // Header bar
    Rectangle::new(Point::zero(), Size::new(width, HEADER_HEIGHT))
        .into_styled(fill)
        .draw(&mut frame)
        .ok();
    Text::with_text_style(
        instructions.title(),
        Point::new(center, 12),
        paper_large,
        top_center(),
    )
    .draw(&mut frame)
    .ok();
    Text::with_text_style(
        &instructions.subtitle(),
        Point::new(center, 42),
        paper_medium,
        top_center(),
    )
    .draw(&mut frame)
    .ok();

    // Identity and hostname
    let mut y = 100;
    for (label, value) in [
        (
            "MAC Address (use for registration):",
            instructions.identity_text(),
        ),
        ("Device Hostname:", instructions.hostname_text()),
    ] {
        Text::with_text_style(label, Point::new(LEFT_MARGIN, y), ink_medium, top_left())
            .draw(&mut frame)
            .ok();
        Text::with_text_style(&value, Point::new(LEFT_MARGIN, y + 30), ink_large, top_left())
            .draw(&mut frame)
            .ok();
        y += 80;
    }

    // Setup steps
    y += 10;
    for step in instructions.steps() {
        Text::with_text_style(&step, Point::new(LEFT_MARGIN, y), ink_small, top_left())
            .draw(&mut frame)
            .ok();
        y += 25;
    }

    if let Some(status) = &instructions.status {
        Text::with_text_style(
            &format!("Status: {}", status),
            Point::new(LEFT_MARGIN, y + 10),
            ink_small,
            top_left(),
        )
        .draw(&mut frame)
        .ok();
    }

    // QR code for the documentation, right-hand side
    if let Some((origin, edge)) = draw_qr(&mut frame, &instructions.help_url, 50, 100) {
        Text::with_text_style(
            "Scan for help",
            Point::new(origin.x + (edge / 2) as i32, origin.y + edge as i32 + 5),
            ink_small,
            top_center(),
        )
        .draw(&mut frame)
        .ok();
    }

    // Footer bar
    let footer_top = height.saturating_sub(FOOTER_HEIGHT);
    Rectangle::new(
        Point::new(0, footer_top as i32),
        Size::new(width, FOOTER_HEIGHT),
    )
    .into_styled(fill)
    .draw(&mut frame)
    .ok();
    Text::with_text_style(
        &instructions.footer(),
        Point::new(center, footer_top as i32 + 13),
        paper_small,
        top_center(),
    )
    .draw(&mut frame)
    .ok();

    frame
}
