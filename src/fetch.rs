//! # Image Fetching
//!
//! One HTTP GET per cycle. The request carries the device identity and the panel
//! capabilities as query parameters:
//!
//! ```text
//! GET /index.php?mac=AA:BB:CC:DD:EE:FF&x=800&y=480&c=BW&fw=2.4
//! ```
//!
//! The response body is the raw image payload. Besides the body the server may
//! send a few directive headers:
//! - `Timestamp`: version of the current content
//! - `Sleep`: requested refresh interval in minutes
//! - `SleepSeconds`: requested refresh interval in seconds (wins over `Sleep`)
//! - `Rotate`: clockwise quarter turns to apply before drawing (0-3)
//!
//! Any non-2xx status is a transport failure; its body is discarded unread.

use crate::identity::DeviceIdentity;
use crate::Rotation;
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use thiserror::Error;

/// Errors from the HTTP transport.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Connection refused, DNS failure, timeout, or broken body
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("server returned status {0}")]
    Status(StatusCode),

    /// Configured endpoint is not a valid URL
    #[error("invalid server URL {0:?}")]
    InvalidUrl(String),
}

/// Everything needed to ask the server for one image. Built fresh every cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    pub endpoint: String,
    pub identity: DeviceIdentity,
    pub width: u32,
    pub height: u32,
    pub color_type: String,
    pub firmware: String,
}

impl FetchRequest {
    /// Full request URL. The identity is placed verbatim; colons are legal in a
    /// query and are not percent-encoded.
    pub fn url(&self) -> Result<Url, FetchError> {
        let mut url =
            Url::parse(&self.endpoint).map_err(|_| FetchError::InvalidUrl(self.endpoint.clone()))?;

        let params = format!(
            "mac={}&x={}&y={}&c={}&fw={}",
            self.identity, self.width, self.height, self.color_type, self.firmware
        );
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, params),
            _ => params,
        };
        url.set_query(Some(&query));

        Ok(url)
    }
}

/// Server instructions carried in response headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerDirectives {
    pub timestamp: Option<String>,
    pub sleep: Option<Duration>,
    /// Unknown values fall back to no rotation
    pub rotation: Rotation,
}

impl ServerDirectives {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let number = |name: &str| text(name).and_then(|v| v.parse::<u64>().ok());

        let sleep = number("sleepseconds")
            .map(Duration::from_secs)
            .or_else(|| number("sleep").map(|minutes| Duration::from_secs(minutes * 60)));

        let rotation = number("rotate")
            .and_then(Rotation::from_quarter_turns)
            .unwrap_or_default();

        Self {
            timestamp: text("timestamp"),
            sleep,
            rotation,
        }
    }
}

/// A successful response.
#[derive(Clone, Debug)]
pub struct FetchedImage {
    pub payload: Vec<u8>,
    pub directives: ServerDirectives,
}

/// Source of image payloads for the refresh loop.
#[allow(async_fn_in_trait)]
pub trait ImageSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedImage, FetchError>;
}

/// reqwest-backed image source with a whole-request timeout.
pub struct HttpImageSource {
    client: reqwest::Client,
}

impl HttpImageSource {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ink-frame/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl ImageSource for HttpImageSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedImage, FetchError> {
        let url = request.url()?;
        log::info!("Fetching image from {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        log::debug!("Response status: {}", status);
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let directives = ServerDirectives::from_headers(response.headers());
        let payload = response.bytes().await?.to_vec();
        log::debug!(
            "Received {} bytes (timestamp {:?}, sleep {:?}, rotation {:?})",
            payload.len(),
            directives.timestamp,
            directives.sleep,
            directives.rotation
        );

        Ok(FetchedImage {
            payload,
            directives,
        })
    }
}
