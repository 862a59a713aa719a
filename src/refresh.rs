//! # Fetch-and-Render Loop
//!
//! The loop is a small state machine driven one transition at a time by
//! [`RefreshLoop::step`]:
//!
//! ```text
//!            probe ok                decode ok
//!   Idle ─────────────▶ Fetching ─────────────▶ Rendering ──▶ Idle(normal)
//!    │ ▲                    │
//!    │ │                    └── transport / decode error ──▶ Idle(retry)
//!    │ └──────────── Rendering ◀── ConfigRequired
//!    └── probe failed ─────────────────▲            (then Idle(recheck))
//! ```
//!
//! `Idle` is the only state that waits. Waking from `Idle` re-probes identity
//! and connectivity, so a device that loses its network returns to the
//! configuration screen within one cycle.
//!
//! The little state that survives between cycles lives in [`CycleContext`],
//! which each step consumes and returns.

use crate::bitmap::DecodeError;
use crate::config::{Config, ScheduleConfig};
use crate::connectivity::{ConnectivityError, ConnectivityProbe};
use crate::fetch::{FetchError, FetchRequest, ImageSource};
use crate::formats::{self, WireFormat};
use crate::identity::{DeviceIdentity, IdentityError, IdentityProvider};
use crate::panel::{PanelRenderer, RenderError};
use crate::presenter::{render_config_screen, ConfigInstructions};
use crate::{DecodedFrame, FrameKind, Rotation};
use chrono::Local;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Everything that can go wrong in one cycle.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("identity unavailable: {0}")]
    IdentityUnavailable(#[from] IdentityError),

    #[error("connectivity unavailable: {0}")]
    ConnectivityUnavailable(#[from] ConnectivityError),

    #[error("transport error: {0}")]
    Transport(#[from] FetchError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),
}

impl CycleError {
    /// Needs operator action; retrying will not help.
    pub fn is_config_required(&self) -> bool {
        matches!(
            self,
            CycleError::IdentityUnavailable(_) | CycleError::ConnectivityUnavailable(_)
        )
    }

    /// Expected to clear up on its own; handled by backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, CycleError::Transport(_) | CycleError::Decode(_))
    }
}

/// Capped exponential backoff: `min(base * 2^(attempt - 1), max)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based; 0 is treated as 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << doublings).min(self.max)
    }
}

/// Sleep intervals used by the loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    pub refresh: Duration,
    pub config_recheck: Duration,
    pub retry: RetryPolicy,
    pub min_server_sleep: Duration,
    pub max_server_sleep: Duration,
}

impl Schedule {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            refresh: Duration::from_secs(config.refresh_secs),
            config_recheck: Duration::from_secs(config.config_recheck_secs),
            retry: RetryPolicy {
                base: Duration::from_secs(config.retry_base_secs),
                max: Duration::from_secs(config.retry_max_secs),
            },
            min_server_sleep: Duration::from_secs(config.min_server_sleep_secs),
            max_server_sleep: Duration::from_secs(config.max_server_sleep_secs),
        }
    }

    /// Keep server-directed intervals within the configured bounds.
    pub fn clamp_server_sleep(&self, requested: Duration) -> Duration {
        let max = self.max_server_sleep.max(self.min_server_sleep);
        requested.clamp(self.min_server_sleep, max)
    }

    /// Sleep after a successful cycle: the server's request if it sent one.
    pub fn normal_sleep(&self, ctx: &CycleContext) -> Duration {
        ctx.server_sleep.unwrap_or(self.refresh)
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::from_config(&ScheduleConfig::default())
    }
}

/// Static inputs of the loop, resolved from [`Config`] at startup.
#[derive(Clone, Debug)]
pub struct RefreshSettings {
    pub endpoint: String,
    pub color_type: String,
    pub firmware: String,
    pub format: WireFormat,
    pub portal_url: String,
    pub help_url: String,
    pub schedule: Schedule,
}

impl RefreshSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.server.url.clone(),
            color_type: config.display.color_type.clone(),
            firmware: config.server.firmware.clone(),
            format: config.server.format,
            portal_url: config.portal.url.clone(),
            help_url: config.portal.help_url.clone(),
            schedule: Schedule::from_config(&config.schedule),
        }
    }
}

/// Result of one cycle, as seen by the operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new image was fetched and drawn
    Success,
    /// Server content has not changed since the last draw
    Unchanged,
    /// Fetch or decode failed; retrying with backoff
    Transient,
    /// Device needs operator setup
    ConfigRequired,
    /// A server image was decoded but the panel rejected it
    RenderFailed,
}

/// What the panel currently shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Showing {
    /// Unknown or blank, e.g. after a failed draw
    #[default]
    Nothing,
    ConfigScreen,
    Image,
}

/// State carried from one cycle to the next.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleContext {
    /// Identity from the most recent probe
    pub identity: Option<DeviceIdentity>,
    pub last_outcome: Option<RefreshOutcome>,
    /// Transient failures since the last success; drives backoff
    pub consecutive_failures: u32,
    /// Transient failures over the process lifetime
    pub transient_total: u64,
    /// Cycles started (one per probe)
    pub cycles: u64,
    pub showing: Showing,
    /// Instructions on the panel while it shows the configuration screen
    pub config_screen: Option<ConfigInstructions>,
    /// `Timestamp` header of the image on the panel
    pub last_timestamp: Option<String>,
    /// Clamped server-directed refresh interval
    pub server_sleep: Option<Duration>,
}

impl CycleContext {
    fn begin_cycle(self) -> Self {
        Self {
            cycles: self.cycles + 1,
            ..self
        }
    }

    fn with_identity(self, identity: Option<DeviceIdentity>) -> Self {
        Self { identity, ..self }
    }

    fn with_outcome(self, outcome: RefreshOutcome) -> Self {
        let (consecutive_failures, transient_total) = match outcome {
            RefreshOutcome::Transient => {
                (self.consecutive_failures.saturating_add(1), self.transient_total + 1)
            }
            _ => (0, self.transient_total),
        };
        Self {
            last_outcome: Some(outcome),
            consecutive_failures,
            transient_total,
            ..self
        }
    }

    fn on_panel(self, showing: Showing, last_timestamp: Option<String>) -> Self {
        Self {
            showing,
            last_timestamp,
            config_screen: None,
            ..self
        }
    }

    fn with_config_screen(self, instructions: ConfigInstructions) -> Self {
        Self {
            showing: Showing::ConfigScreen,
            config_screen: Some(instructions),
            last_timestamp: None,
            ..self
        }
    }
}

/// Where a frame on its way to the panel came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameSource {
    ConfigScreen(ConfigInstructions),
    Server { timestamp: Option<String> },
}

/// States of the refresh loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting; the probe runs on wake
    Idle(Duration),
    /// Operator setup needed; carries the reason shown on screen
    ConfigRequired(String),
    Fetching(FetchRequest),
    Rendering {
        frame: DecodedFrame,
        source: FrameSource,
    },
}

/// The device's main loop: probe, fetch, decode, render, sleep.
pub struct RefreshLoop<P, S, I, C> {
    panel: P,
    source: S,
    identity: I,
    connectivity: C,
    settings: RefreshSettings,
}

impl<P, S, I, C> RefreshLoop<P, S, I, C>
where
    P: PanelRenderer,
    S: ImageSource,
    I: IdentityProvider,
    C: ConnectivityProbe,
{
    pub fn new(panel: P, source: S, identity: I, connectivity: C, settings: RefreshSettings) -> Self {
        Self {
            panel,
            source,
            identity,
            connectivity,
            settings,
        }
    }

    pub fn panel(&self) -> &P {
        &self.panel
    }

    pub fn into_panel(self) -> P {
        self.panel
    }

    /// Run until `shutdown` turns true, or with `once` until the first cycle
    /// reaches `Idle`. Returns the final context.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>, once: bool) -> CycleContext {
        if let Err(e) = self.panel.initialize() {
            // Keep going: every draw reports its own failure and the loop
            // still serves the schedule.
            log::error!("Panel initialisation failed: {}", e);
        }

        let mut state = LoopState::Idle(Duration::ZERO);
        let mut ctx = CycleContext::default();

        loop {
            if let LoopState::Idle(duration) = state {
                if *shutdown.borrow() || (once && ctx.cycles > 0) {
                    break;
                }
                if !duration.is_zero() {
                    let wake_at = chrono::TimeDelta::from_std(duration)
                        .ok()
                        .and_then(|delta| Local::now().checked_add_signed(delta));
                    match wake_at {
                        Some(at) => log::info!(
                            "Next refresh in {}s (at {})",
                            duration.as_secs(),
                            at.format("%-m/%-d %H:%M:%S")
                        ),
                        None => log::info!("Next refresh in {}s", duration.as_secs()),
                    }
                    if sleep_or_shutdown(duration, &mut shutdown).await {
                        break;
                    }
                }
                ctx = ctx.begin_cycle();
            }

            let (next, next_ctx) = self.step(state, ctx).await;
            state = next;
            ctx = next_ctx;
        }

        log::info!(
            "Refresh loop stopping after {} cycles ({} transient failures)",
            ctx.cycles,
            ctx.transient_total
        );
        if let Err(e) = self.panel.shutdown() {
            log::error!("Panel shutdown failed: {}", e);
        }
        ctx
    }

    /// Perform exactly one transition.
    pub async fn step(&mut self, state: LoopState, ctx: CycleContext) -> (LoopState, CycleContext) {
        match state {
            LoopState::Idle(_) => self.probe(ctx).await,
            LoopState::ConfigRequired(reason) => self.present_config(reason, ctx),
            LoopState::Fetching(request) => self.fetch(request, ctx).await,
            LoopState::Rendering { frame, source } => self.render(frame, source, ctx),
        }
    }

    async fn probe(&mut self, ctx: CycleContext) -> (LoopState, CycleContext) {
        let identity = match self.identity.device_identity() {
            Ok(identity) => identity,
            Err(e) => return self.config_required(CycleError::from(e), ctx.with_identity(None)),
        };
        let ctx = ctx.with_identity(Some(identity.clone()));

        if let Err(e) = self.connectivity.check().await {
            return self.config_required(CycleError::from(e), ctx);
        }

        let (width, height) = self.panel.size();
        let request = FetchRequest {
            endpoint: self.settings.endpoint.clone(),
            identity,
            width,
            height,
            color_type: self.settings.color_type.clone(),
            firmware: self.settings.firmware.clone(),
        };
        log::debug!("Probe succeeded for {}", request.identity);
        (LoopState::Fetching(request), ctx)
    }

    fn config_required(&self, error: CycleError, ctx: CycleContext) -> (LoopState, CycleContext) {
        log::warn!("Configuration required: {}", error);
        (
            LoopState::ConfigRequired(error.to_string()),
            ctx.with_outcome(RefreshOutcome::ConfigRequired),
        )
    }

    fn present_config(&self, reason: String, ctx: CycleContext) -> (LoopState, CycleContext) {
        let instructions = ConfigInstructions::new(
            &self.settings.portal_url,
            &self.settings.help_url,
            ctx.identity.clone(),
        )
        .with_status(reason);
        if ctx.config_screen.as_ref() == Some(&instructions) {
            log::debug!("Configuration screen already on the panel");
            return (LoopState::Idle(self.settings.schedule.config_recheck), ctx);
        }

        for line in instructions.lines() {
            log::info!("  {}", line);
        }

        let (width, height) = self.panel.size();
        let frame = render_config_screen(&instructions, width, height);
        (
            LoopState::Rendering {
                frame,
                source: FrameSource::ConfigScreen(instructions),
            },
            ctx,
        )
    }

    async fn fetch(&mut self, request: FetchRequest, ctx: CycleContext) -> (LoopState, CycleContext) {
        let image = match self.source.fetch(&request).await {
            Ok(image) => image,
            Err(e) => return self.transient(CycleError::from(e), ctx),
        };

        let schedule = &self.settings.schedule;
        let server_sleep = image
            .directives
            .sleep
            .map(|requested| schedule.clamp_server_sleep(requested));
        let ctx = CycleContext {
            server_sleep,
            ..ctx
        };

        let timestamp = image.directives.timestamp;
        if timestamp.is_some()
            && ctx.showing == Showing::Image
            && ctx.last_timestamp == timestamp
        {
            log::info!("Content unchanged (timestamp {:?}), skipping draw", timestamp);
            let ctx = ctx.with_outcome(RefreshOutcome::Unchanged);
            let sleep = schedule.normal_sleep(&ctx);
            return (LoopState::Idle(sleep), ctx);
        }

        match self.decode(
            &image.payload,
            request.width,
            request.height,
            image.directives.rotation,
        ) {
            Ok(frame) => (
                LoopState::Rendering {
                    frame,
                    source: FrameSource::Server { timestamp },
                },
                ctx,
            ),
            Err(e) => self.transient(CycleError::from(e), ctx),
        }
    }

    /// Decode to the panel size, applying the server's rotation. A quarter
    /// turn expects the payload at the transposed size; a payload that only
    /// decodes at the native size is drawn unrotated.
    fn decode(
        &self,
        payload: &[u8],
        width: u32,
        height: u32,
        rotation: Rotation,
    ) -> Result<DecodedFrame, DecodeError> {
        let format = self.settings.format;
        if rotation.swaps_axes() {
            match formats::decode_payload(payload, height, width, format) {
                Ok(frame) => return Ok(frame.rotated(rotation)),
                Err(e) => log::warn!(
                    "Ignoring rotation {:?}, payload is not {}x{}: {}",
                    rotation,
                    height,
                    width,
                    e
                ),
            }
            return formats::decode_payload(payload, width, height, format);
        }

        let frame = formats::decode_payload(payload, width, height, format)?;
        Ok(match rotation {
            Rotation::Deg0 => frame,
            _ => frame.rotated(rotation),
        })
    }

    fn transient(&self, error: CycleError, ctx: CycleContext) -> (LoopState, CycleContext) {
        let ctx = ctx.with_outcome(RefreshOutcome::Transient);
        let delay = self.settings.schedule.retry.delay(ctx.consecutive_failures);
        log::warn!(
            "{} (failure {} in a row, retrying in {}s)",
            error,
            ctx.consecutive_failures,
            delay.as_secs()
        );
        (LoopState::Idle(delay), ctx)
    }

    fn render(
        &mut self,
        frame: DecodedFrame,
        source: FrameSource,
        ctx: CycleContext,
    ) -> (LoopState, CycleContext) {
        let drawn = self.draw(&frame);

        match source {
            FrameSource::ConfigScreen(instructions) => {
                let ctx = match drawn {
                    Ok(()) => ctx.with_config_screen(instructions),
                    Err(e) => {
                        log::error!("{}", CycleError::from(e));
                        ctx.on_panel(Showing::Nothing, None)
                    }
                };
                (LoopState::Idle(self.settings.schedule.config_recheck), ctx)
            }
            FrameSource::Server { timestamp } => {
                let ctx = match drawn {
                    Ok(()) => {
                        log::info!("Frame drawn (cycle {})", ctx.cycles);
                        ctx.on_panel(Showing::Image, timestamp)
                            .with_outcome(RefreshOutcome::Success)
                    }
                    Err(e) => {
                        log::error!("{}", CycleError::from(e));
                        ctx.on_panel(Showing::Nothing, None)
                            .with_outcome(RefreshOutcome::RenderFailed)
                    }
                };
                let sleep = self.settings.schedule.normal_sleep(&ctx);
                (LoopState::Idle(sleep), ctx)
            }
        }
    }

    /// Wake, draw, and put the panel back to sleep. Sleep is attempted even
    /// when the draw fails.
    fn draw(&mut self, frame: &DecodedFrame) -> Result<(), RenderError> {
        let drawn = self.panel.wake().and_then(|()| match frame.kind() {
            FrameKind::Full => self.panel.draw_full(frame),
            FrameKind::Partial(region) => self.panel.draw_partial(frame, region),
        });
        let slept = self.panel.sleep();
        drawn.and(slept)
    }
}

/// Sleep for `duration`; returns true if shutdown was requested meanwhile.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Nobody can signal any more
                    (&mut sleep).await;
                    return false;
                }
                if *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}
