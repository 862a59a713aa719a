//! # Panel Renderer Capability
//!
//! The refresh loop drives the display only through [`PanelRenderer`]. The trait
//! object is the "handle": it is created once at startup, owned exclusively by the
//! loop, and released through [`PanelRenderer::shutdown`].
//!
//! Two implementations exist:
//! - [`crate::epd7in5_v2::Epd7in5V2`]: the real 7.5" black/white panel
//! - [`TerminalPanel`]: development mode, prints a character preview

use crate::{DecodedFrame, Pixel, Region};
use std::io::Write;
use thiserror::Error;

/// Panel I/O failures. Logged by the loop, never fatal.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Bus, pin, or controller failure
    #[error("panel I/O failed: {0}")]
    Io(String),

    /// Controller stayed busy past the refresh timeout
    #[error("panel busy for more than {0} ms")]
    BusyTimeout(u64),

    /// Frame does not match the panel
    #[error("frame is {frame_width}x{frame_height}, panel is {panel_width}x{panel_height}")]
    FrameSize {
        frame_width: u32,
        frame_height: u32,
        panel_width: u32,
        panel_height: u32,
    },

    #[error("terminal output failed: {0}")]
    Terminal(#[from] std::io::Error),
}

/// Capability interface for one physical (or simulated) panel.
pub trait PanelRenderer {
    /// Native resolution in pixels.
    fn size(&self) -> (u32, u32);

    /// Acquire and configure the hardware. Called once at startup.
    fn initialize(&mut self) -> Result<(), RenderError>;

    /// Draw a whole frame with a full refresh.
    fn draw_full(&mut self, frame: &DecodedFrame) -> Result<(), RenderError>;

    /// Draw only `region` of `frame`. Panels without partial refresh redraw
    /// everything.
    fn draw_partial(&mut self, frame: &DecodedFrame, region: Region) -> Result<(), RenderError> {
        let _ = region;
        self.draw_full(frame)
    }

    /// Enter low-power mode; the image stays on the panel.
    fn sleep(&mut self) -> Result<(), RenderError>;

    /// Leave low-power mode before the next draw.
    fn wake(&mut self) -> Result<(), RenderError>;

    /// Release the panel at process exit.
    fn shutdown(&mut self) -> Result<(), RenderError>;
}

/// Reject frames that do not match the panel exactly.
pub fn check_frame_size(frame: &DecodedFrame, size: (u32, u32)) -> Result<(), RenderError> {
    if frame.matches(size.0, size.1) {
        Ok(())
    } else {
        Err(RenderError::FrameSize {
            frame_width: frame.width(),
            frame_height: frame.height(),
            panel_width: size.0,
            panel_height: size.1,
        })
    }
}

/// Character cell size of the terminal preview, in panel pixels.
const CELL_WIDTH: u32 = 8;
const CELL_HEIGHT: u32 = 16;

/// Development panel: prints each drawn frame as a downscaled ASCII preview.
///
/// Each character covers an 8×16 pixel cell:
/// - `#`: mostly black
/// - `+`: some black
/// - ` `: white
pub struct TerminalPanel<W: Write> {
    out: W,
    width: u32,
    height: u32,
    draws: usize,
}

impl<W: Write> TerminalPanel<W> {
    pub fn new(out: W, width: u32, height: u32) -> Self {
        Self {
            out,
            width,
            height,
            draws: 0,
        }
    }

    /// Number of frames drawn so far.
    pub fn draws(&self) -> usize {
        self.draws
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn cell_char(frame: &DecodedFrame, cx: u32, cy: u32) -> char {
        let mut black = 0;
        let mut total = 0;
        for y in cy * CELL_HEIGHT..((cy + 1) * CELL_HEIGHT).min(frame.height()) {
            for x in cx * CELL_WIDTH..((cx + 1) * CELL_WIDTH).min(frame.width()) {
                total += 1;
                if frame.pixel(x, y) == Some(Pixel::Black) {
                    black += 1;
                }
            }
        }

        if black * 2 > total {
            '#'
        } else if black > 0 {
            '+'
        } else {
            ' '
        }
    }
}

impl<W: Write> PanelRenderer for TerminalPanel<W> {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn initialize(&mut self) -> Result<(), RenderError> {
        log::info!(
            "Terminal preview panel {}x{} ready",
            self.width,
            self.height
        );
        Ok(())
    }

    fn draw_full(&mut self, frame: &DecodedFrame) -> Result<(), RenderError> {
        check_frame_size(frame, self.size())?;

        let columns = self.width.div_ceil(CELL_WIDTH);
        let rows = self.height.div_ceil(CELL_HEIGHT);
        let border = format!("+{}+", "-".repeat(columns as usize));

        writeln!(self.out, "{}", border)?;
        for cy in 0..rows {
            let line: String = (0..columns)
                .map(|cx| Self::cell_char(frame, cx, cy))
                .collect();
            writeln!(self.out, "|{}|", line)?;
        }
        writeln!(self.out, "{}", border)?;
        writeln!(
            self.out,
            "{} black / {} pixels",
            frame.count(Pixel::Black),
            frame.pixels().len()
        )?;
        self.out.flush()?;

        self.draws += 1;
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), RenderError> {
        log::debug!("Terminal panel sleeping");
        Ok(())
    }

    fn wake(&mut self) -> Result<(), RenderError> {
        log::debug!("Terminal panel waking");
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), RenderError> {
        self.out.flush()?;
        Ok(())
    }
}
