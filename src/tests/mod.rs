//! # Scenario Tests
//!
//! End-to-end behaviour of the refresh loop and the payload decoders, driven
//! through scripted stand-ins for the network, identity, and panel.

mod decode_tests;

use ink_frame_lib::config::Config;
use ink_frame_lib::connectivity::{ConnectivityError, ConnectivityProbe};
use ink_frame_lib::fetch::{FetchError, FetchRequest, FetchedImage, ImageSource, ServerDirectives};
use ink_frame_lib::identity::{DeviceIdentity, IdentityError, IdentityProvider};
use ink_frame_lib::panel::{check_frame_size, PanelRenderer, RenderError};
use ink_frame_lib::refresh::{CycleContext, LoopState, RefreshLoop, RefreshSettings};
use ink_frame_lib::{DecodedFrame, Region, Rotation};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

pub const TEST_MAC: &str = "AA:BB:CC:DD:EE:FF";
pub const WIDTH: u32 = 800;
pub const HEIGHT: u32 = 480;
pub const FRAME_BYTES: usize = 48_000;

pub struct MockIdentity {
    available: Rc<Cell<bool>>,
}

impl IdentityProvider for MockIdentity {
    fn device_identity(&self) -> Result<DeviceIdentity, IdentityError> {
        if self.available.get() {
            TEST_MAC.parse()
        } else {
            Err(IdentityError::Unavailable {
                tried: "wlan0".to_string(),
            })
        }
    }
}

pub struct MockProbe {
    online: Rc<Cell<bool>>,
}

impl ConnectivityProbe for MockProbe {
    async fn check(&self) -> Result<(), ConnectivityError> {
        if self.online.get() {
            Ok(())
        } else {
            Err(ConnectivityError::NoCredentials(
                "/etc/wpa_supplicant/wpa_supplicant.conf".to_string(),
            ))
        }
    }
}

/// Serves queued responses in order; an empty queue answers 503.
pub struct ScriptedSource {
    responses: Rc<RefCell<VecDeque<Result<FetchedImage, FetchError>>>>,
    requests: Rc<RefCell<Vec<FetchRequest>>>,
}

impl ImageSource for ScriptedSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedImage, FetchError> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or(Err(FetchError::Status(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
            )))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PanelCall {
    Initialize,
    DrawFull,
    DrawPartial(Region),
    Sleep,
    Wake,
    Shutdown,
}

/// Records every call; optionally fails every draw.
pub struct RecordingPanel {
    calls: Rc<RefCell<Vec<PanelCall>>>,
    frames: Rc<RefCell<Vec<DecodedFrame>>>,
    fail_draws: bool,
}

impl PanelRenderer for RecordingPanel {
    fn size(&self) -> (u32, u32) {
        (WIDTH, HEIGHT)
    }

    fn initialize(&mut self) -> Result<(), RenderError> {
        self.calls.borrow_mut().push(PanelCall::Initialize);
        Ok(())
    }

    fn draw_full(&mut self, frame: &DecodedFrame) -> Result<(), RenderError> {
        self.calls.borrow_mut().push(PanelCall::DrawFull);
        if self.fail_draws {
            return Err(RenderError::BusyTimeout(20_000));
        }
        check_frame_size(frame, self.size())?;
        self.frames.borrow_mut().push(frame.clone());
        Ok(())
    }

    fn draw_partial(&mut self, frame: &DecodedFrame, region: Region) -> Result<(), RenderError> {
        self.calls.borrow_mut().push(PanelCall::DrawPartial(region));
        self.frames.borrow_mut().push(frame.clone());
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), RenderError> {
        self.calls.borrow_mut().push(PanelCall::Sleep);
        Ok(())
    }

    fn wake(&mut self) -> Result<(), RenderError> {
        self.calls.borrow_mut().push(PanelCall::Wake);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), RenderError> {
        self.calls.borrow_mut().push(PanelCall::Shutdown);
        Ok(())
    }
}

pub type TestLoop = RefreshLoop<RecordingPanel, ScriptedSource, MockIdentity, MockProbe>;

/// Handles for steering and inspecting a [`TestLoop`].
#[derive(Clone, Default)]
pub struct Harness {
    pub identity_ok: Rc<Cell<bool>>,
    pub online: Rc<Cell<bool>>,
    pub responses: Rc<RefCell<VecDeque<Result<FetchedImage, FetchError>>>>,
    pub requests: Rc<RefCell<Vec<FetchRequest>>>,
    pub calls: Rc<RefCell<Vec<PanelCall>>>,
    pub frames: Rc<RefCell<Vec<DecodedFrame>>>,
}

impl Harness {
    pub fn push(&self, response: Result<FetchedImage, FetchError>) {
        self.responses.borrow_mut().push_back(response);
    }

    pub fn calls(&self) -> Vec<PanelCall> {
        self.calls.borrow().clone()
    }

    pub fn draws(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, PanelCall::DrawFull | PanelCall::DrawPartial(_)))
            .count()
    }
}

impl Harness {
    /// A harness whose identity and network are both available.
    pub fn ready() -> Self {
        let harness = Harness::default();
        harness.identity_ok.set(true);
        harness.online.set(true);
        harness
    }

    pub fn panel(&self, fail_draws: bool) -> RecordingPanel {
        RecordingPanel {
            calls: self.calls.clone(),
            frames: self.frames.clone(),
            fail_draws,
        }
    }

    pub fn identity(&self) -> MockIdentity {
        MockIdentity {
            available: self.identity_ok.clone(),
        }
    }
}

/// A loop with default settings whose collaborators all succeed.
pub fn test_loop(fail_draws: bool) -> (TestLoop, Harness) {
    let harness = Harness::ready();

    let refresh = RefreshLoop::new(
        harness.panel(fail_draws),
        ScriptedSource {
            responses: harness.responses.clone(),
            requests: harness.requests.clone(),
        },
        harness.identity(),
        MockProbe {
            online: harness.online.clone(),
        },
        RefreshSettings::from_config(&Config::default()),
    );
    (refresh, harness)
}

pub fn image(payload: Vec<u8>, timestamp: Option<&str>, sleep: Option<Duration>) -> FetchedImage {
    FetchedImage {
        payload,
        directives: ServerDirectives {
            timestamp: timestamp.map(str::to_string),
            sleep,
            rotation: Rotation::Deg0,
        },
    }
}

pub fn rotated_image(payload: Vec<u8>, rotation: Rotation) -> FetchedImage {
    FetchedImage {
        payload,
        directives: ServerDirectives {
            rotation,
            ..ServerDirectives::default()
        },
    }
}

/// Step from `Idle` until the loop is `Idle` again. Returns every state
/// visited, ending with the new `Idle`, and the resulting context.
pub async fn run_cycle<P, S, I, C>(
    refresh: &mut RefreshLoop<P, S, I, C>,
    ctx: CycleContext,
) -> (Vec<LoopState>, CycleContext)
where
    P: PanelRenderer,
    S: ImageSource,
    I: IdentityProvider,
    C: ConnectivityProbe,
{
    let mut visited = Vec::new();
    let mut state = LoopState::Idle(Duration::ZERO);
    let mut ctx = ctx;

    loop {
        let (next, next_ctx) = refresh.step(state, ctx).await;
        ctx = next_ctx;
        visited.push(next.clone());
        if matches!(next, LoopState::Idle(_)) {
            return (visited, ctx);
        }
        assert!(visited.len() < 8, "cycle did not settle: {:?}", visited.len());
        state = next;
    }
}

/// The sleep a cycle ended with.
pub fn final_sleep(visited: &[LoopState]) -> Duration {
    match visited.last() {
        Some(LoopState::Idle(duration)) => *duration,
        other => panic!("cycle ended in {:?}", other.map(state_name)),
    }
}

pub fn state_name(state: &LoopState) -> &'static str {
    match state {
        LoopState::Idle(_) => "Idle",
        LoopState::ConfigRequired(_) => "ConfigRequired",
        LoopState::Fetching(_) => "Fetching",
        LoopState::Rendering { .. } => "Rendering",
    }
}

pub fn names(visited: &[LoopState]) -> Vec<&'static str> {
    visited.iter().map(state_name).collect()
}
