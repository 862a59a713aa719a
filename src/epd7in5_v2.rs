//! Custom EPD 7.5" V2 (800×480, black/white) Driver
//!
//! This implementation follows the command sequences of the Waveshare
//! epd7in5_V2 reference code, written against the `embedded-hal` 1.0 traits so
//! it runs on Linux spidev/GPIO character devices and in tests alike.
//!
//! Panel RAM format: row-major, MSB first, bit 1 = black, which is exactly
//! [`crate::bitmap::pack`] output. The "new data" register (0x13) takes the image
//! and the "old data" register (0x10) its inverse.

use crate::bitmap;
use crate::panel::{check_frame_size, PanelRenderer, RenderError};
use crate::{DecodedFrame, Region};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;

/// Display dimensions
pub const EPD_WIDTH: u32 = 800;
pub const EPD_HEIGHT: u32 = 480;

/// Longest transfer handed to spidev in one write (kernel default bufsiz)
const SPI_CHUNK: usize = 4096;

/// BUSY polling interval and bound. A full refresh takes about 4 s.
const BUSY_POLL_MS: u32 = 20;
const BUSY_TIMEOUT_MS: u32 = 20_000;

mod command {
    pub const PANEL_SETTING: u8 = 0x00;
    pub const POWER_SETTING: u8 = 0x01;
    pub const POWER_OFF: u8 = 0x02;
    pub const POWER_ON: u8 = 0x04;
    pub const BOOSTER_SOFT_START: u8 = 0x06;
    pub const DEEP_SLEEP: u8 = 0x07;
    pub const DATA_START_TRANSMISSION_1: u8 = 0x10;
    pub const DISPLAY_REFRESH: u8 = 0x12;
    pub const DATA_START_TRANSMISSION_2: u8 = 0x13;
    pub const DUAL_SPI: u8 = 0x15;
    pub const VCOM_AND_DATA_INTERVAL: u8 = 0x50;
    pub const TCON_SETTING: u8 = 0x60;
    pub const RESOLUTION_SETTING: u8 = 0x61;
    pub const GET_STATUS: u8 = 0x71;
    pub const PARTIAL_WINDOW: u8 = 0x90;
    pub const PARTIAL_IN: u8 = 0x91;
    pub const PARTIAL_OUT: u8 = 0x92;
    pub const CASCADE_SETTING: u8 = 0xE0;
    pub const FORCE_TEMPERATURE: u8 = 0xE5;
}

/// Simple error type for our EPD operations
#[derive(Debug)]
pub struct EpdError(pub String);

impl std::fmt::Display for EpdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPD Error: {}", self.0)
    }
}

impl std::error::Error for EpdError {}

impl From<EpdError> for RenderError {
    fn from(e: EpdError) -> Self {
        RenderError::Io(e.0)
    }
}

fn io_err<E: core::fmt::Debug>(e: E) -> EpdError {
    EpdError(format!("{:?}", e))
}

/// EPD 7.5" V2 display driver
pub struct Epd7in5V2<SPI, DC, RST, BUSY, DELAY> {
    spi: SPI,
    dc_pin: DC,
    rst_pin: RST,
    busy_pin: BUSY,
    delay: DELAY,
    width: u32,
    height: u32,
    partial_mode: bool,
    /// Set by deep sleep, cleared by the reset in `init`
    asleep: bool,
}

impl<SPI, DC, RST, BUSY, DELAY> Epd7in5V2<SPI, DC, RST, BUSY, DELAY>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
    BUSY: InputPin,
    DELAY: DelayNs,
{
    /// Create a new EPD instance. No bus traffic until [`Self::init`].
    pub fn new(spi: SPI, dc_pin: DC, rst_pin: RST, busy_pin: BUSY, delay: DELAY) -> Self {
        Self {
            spi,
            dc_pin,
            rst_pin,
            busy_pin,
            delay,
            width: EPD_WIDTH,
            height: EPD_HEIGHT,
            partial_mode: false,
            asleep: false,
        }
    }

    /// Hardware reset pulse
    fn reset(&mut self) -> Result<(), EpdError> {
        self.rst_pin.set_high().map_err(io_err)?;
        self.delay.delay_ms(20);
        self.rst_pin.set_low().map_err(io_err)?;
        self.delay.delay_ms(2);
        self.rst_pin.set_high().map_err(io_err)?;
        self.delay.delay_ms(20);
        Ok(())
    }

    fn send_command(&mut self, command: u8) -> Result<(), EpdError> {
        self.dc_pin.set_low().map_err(io_err)?; // Command mode
        self.spi.write(&[command]).map_err(io_err)
    }

    fn send_data(&mut self, data: &[u8]) -> Result<(), EpdError> {
        self.dc_pin.set_high().map_err(io_err)?; // Data mode
        for chunk in data.chunks(SPI_CHUNK) {
            self.spi.write(chunk).map_err(io_err)?;
        }
        Ok(())
    }

    fn command_with_data(&mut self, command: u8, data: &[u8]) -> Result<(), EpdError> {
        self.send_command(command)?;
        self.send_data(data)
    }

    /// Wait for the controller. BUSY is active LOW on this panel, and the
    /// status command has to be re-issued for the pin to update.
    fn wait_until_idle(&mut self) -> Result<(), EpdError> {
        let mut waited = 0;
        loop {
            self.send_command(command::GET_STATUS)?;
            if self.busy_pin.is_high().map_err(io_err)? {
                break;
            }
            if waited >= BUSY_TIMEOUT_MS {
                log::warn!("BUSY pin timeout after {} ms", waited);
                return Err(EpdError(format!("busy timeout after {} ms", waited)));
            }
            self.delay.delay_ms(BUSY_POLL_MS);
            waited += BUSY_POLL_MS;
        }
        log::trace!("Display ready after {} ms", waited);
        Ok(())
    }

    fn turn_on_display(&mut self) -> Result<(), EpdError> {
        self.send_command(command::DISPLAY_REFRESH)?;
        self.delay.delay_ms(100);
        self.wait_until_idle()
    }

    /// Initialize the display for full refreshes
    pub fn init(&mut self) -> Result<(), EpdError> {
        log::debug!("Initializing EPD 7.5\" V2");
        self.reset()?;

        self.command_with_data(command::BOOSTER_SOFT_START, &[0x17, 0x17, 0x28, 0x17])?;
        self.command_with_data(command::POWER_SETTING, &[0x07, 0x07, 0x28, 0x17])?;
        self.send_command(command::POWER_ON)?;
        self.delay.delay_ms(100);
        self.wait_until_idle()?;

        // KW mode, LUT from OTP
        self.command_with_data(command::PANEL_SETTING, &[0x1F])?;
        let [w_hi, w_lo] = (self.width as u16).to_be_bytes();
        let [h_hi, h_lo] = (self.height as u16).to_be_bytes();
        self.command_with_data(command::RESOLUTION_SETTING, &[w_hi, w_lo, h_hi, h_lo])?;
        self.command_with_data(command::DUAL_SPI, &[0x00])?;
        self.command_with_data(command::VCOM_AND_DATA_INTERVAL, &[0x10, 0x07])?;
        self.command_with_data(command::TCON_SETTING, &[0x22])?;

        self.partial_mode = false;
        self.asleep = false;
        log::debug!("EPD initialization completed");
        Ok(())
    }

    /// Initialize the display for partial refreshes
    pub fn init_partial(&mut self) -> Result<(), EpdError> {
        self.reset()?;
        self.command_with_data(command::PANEL_SETTING, &[0x1F])?;
        self.command_with_data(command::CASCADE_SETTING, &[0x02])?;
        self.command_with_data(command::FORCE_TEMPERATURE, &[0x6E])?;
        self.partial_mode = true;
        self.asleep = false;
        Ok(())
    }

    fn expected_len(&self) -> usize {
        bitmap::packed_len(self.width, self.height)
    }

    /// Display a packed full-screen image (bit 1 = black)
    pub fn display(&mut self, image: &[u8]) -> Result<(), EpdError> {
        if image.len() != self.expected_len() {
            return Err(EpdError(format!(
                "image is {} bytes, expected {}",
                image.len(),
                self.expected_len()
            )));
        }
        if self.partial_mode {
            self.init()?;
        }

        let old: Vec<u8> = image.iter().map(|b| !b).collect();
        self.command_with_data(command::DATA_START_TRANSMISSION_1, &old)?;
        self.command_with_data(command::DATA_START_TRANSMISSION_2, image)?;
        self.turn_on_display()
    }

    /// Display a packed window. `x` and `width` are rounded out to byte
    /// boundaries; `image` covers the rounded window row by row.
    pub fn display_partial(&mut self, image: &[u8], region: Region) -> Result<(), EpdError> {
        if !region.fits_within(self.width, self.height) {
            return Err(EpdError(format!("region {:?} outside panel", region)));
        }
        let (x_start, x_end) = byte_aligned(region);
        let y_start = region.y;
        let y_end = region.y + region.height;

        let expected = ((x_end - x_start) / 8) as usize * region.height as usize;
        if image.len() != expected {
            return Err(EpdError(format!(
                "window is {} bytes, expected {}",
                image.len(),
                expected
            )));
        }

        if !self.partial_mode {
            self.init_partial()?;
        }

        // Border floating, data interval
        self.command_with_data(command::VCOM_AND_DATA_INTERVAL, &[0xA9, 0x07])?;
        self.send_command(command::PARTIAL_IN)?;
        let [xs_hi, xs_lo] = (x_start as u16).to_be_bytes();
        let [xe_hi, xe_lo] = ((x_end - 1) as u16).to_be_bytes();
        let [ys_hi, ys_lo] = (y_start as u16).to_be_bytes();
        let [ye_hi, ye_lo] = ((y_end - 1) as u16).to_be_bytes();
        self.command_with_data(
            command::PARTIAL_WINDOW,
            &[xs_hi, xs_lo, xe_hi, xe_lo, ys_hi, ys_lo, ye_hi, ye_lo, 0x01],
        )?;
        self.command_with_data(command::DATA_START_TRANSMISSION_2, image)?;
        self.turn_on_display()?;
        self.send_command(command::PARTIAL_OUT)
    }

    /// Clear the display to white
    pub fn clear(&mut self) -> Result<(), EpdError> {
        let white = vec![0x00; self.expected_len()];
        self.display(&white)
    }

    /// Put display into deep sleep. Only a reset (i.e. [`Self::init`]) wakes it.
    pub fn sleep(&mut self) -> Result<(), EpdError> {
        self.command_with_data(command::VCOM_AND_DATA_INTERVAL, &[0xF7])?;
        self.send_command(command::POWER_OFF)?;
        self.wait_until_idle()?;
        self.command_with_data(command::DEEP_SLEEP, &[0xA5])?;
        self.delay.delay_ms(2000);
        self.asleep = true;
        log::debug!("EPD sleeping");
        Ok(())
    }
}

/// Horizontal window bounds rounded out to whole bytes.
fn byte_aligned(region: Region) -> (u32, u32) {
    let start = region.x / 8 * 8;
    let end = (region.x + region.width).div_ceil(8) * 8;
    (start, end)
}

/// Pack the byte-aligned window of `frame` covering `region`.
fn pack_window(frame: &DecodedFrame, region: Region) -> Vec<u8> {
    let full = bitmap::pack(frame);
    let stride = bitmap::row_bytes(frame.width());
    let (x_start, x_end) = byte_aligned(region);
    let (first, last) = ((x_start / 8) as usize, (x_end / 8) as usize);

    (region.y..region.y + region.height)
        .flat_map(|y| {
            let row = y as usize * stride;
            full[row + first..row + last].iter().copied()
        })
        .collect()
}

impl<SPI, DC, RST, BUSY, DELAY> PanelRenderer for Epd7in5V2<SPI, DC, RST, BUSY, DELAY>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
    BUSY: InputPin,
    DELAY: DelayNs,
{
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn initialize(&mut self) -> Result<(), RenderError> {
        self.init()?;
        Ok(())
    }

    fn draw_full(&mut self, frame: &DecodedFrame) -> Result<(), RenderError> {
        check_frame_size(frame, self.size())?;
        self.display(&bitmap::pack(frame))?;
        Ok(())
    }

    fn draw_partial(&mut self, frame: &DecodedFrame, region: Region) -> Result<(), RenderError> {
        check_frame_size(frame, self.size())?;
        if !region.fits_within(self.width, self.height) {
            return self.draw_full(frame);
        }
        self.display_partial(&pack_window(frame, region), region)?;
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), RenderError> {
        Epd7in5V2::sleep(self)?;
        Ok(())
    }

    // Deep sleep can only be left through a hardware reset
    fn wake(&mut self) -> Result<(), RenderError> {
        self.init()?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), RenderError> {
        if self.asleep {
            log::debug!("EPD already in deep sleep");
            return Ok(());
        }
        Epd7in5V2::sleep(self)?;
        Ok(())
    }
}
