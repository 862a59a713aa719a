//! # Connectivity Probe
//!
//! Before every fetch the loop asks two cheap, local questions:
//! 1. **Credentials**: does the system hold stored network credentials at all?
//!    (wpa_supplicant `network={...}` block, or a non-empty NetworkManager
//!    connections directory). This is a read-only check; credential lifecycle
//!    belongs to the operating system.
//! 2. **Network path**: does the kernel have an active default route?
//!
//! Either answer being "no" routes the loop to configuration mode. Whether the
//! image server itself answers is not asked here: an unreachable server is a
//! transport failure of the fetch and is retried with backoff.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    /// No stored network credentials
    #[error("no network credentials in {0}")]
    NoCredentials(String),

    /// No usable default route
    #[error("no default network route in {0}")]
    NoRoute(String),
}

/// Answers "can this cycle talk to the network".
#[allow(async_fn_in_trait)]
pub trait ConnectivityProbe {
    async fn check(&self) -> Result<(), ConnectivityError>;
}

/// Read-only view of the system's stored network credentials.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// True when at least one network is configured.
    pub fn has_credentials(&self) -> bool {
        if self.path.is_dir() {
            return fs::read_dir(&self.path)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false);
        }

        fs::read_to_string(&self.path)
            .map(|contents| {
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.starts_with('#'))
                    .any(|line| line.starts_with("network={") || line.starts_with("network ={"))
            })
            .unwrap_or(false)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// RTF_UP from `<linux/route.h>`
const RTF_UP: u32 = 0x1;

/// The kernel IPv4 routing table, `/proc/net/route`.
#[derive(Clone, Debug)]
pub struct RouteTable {
    path: PathBuf,
}

impl RouteTable {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Interface carrying an active default route, if any.
    ///
    /// ```text
    /// Iface  Destination  Gateway   Flags  RefCnt  Use  Metric  Mask  ...
    /// wlan0  00000000     0101A8C0  0003   0       0    303     00000000
    /// ```
    pub fn default_route(&self) -> Option<String> {
        let contents = fs::read_to_string(&self.path).ok()?;
        contents.lines().skip(1).find_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (iface, destination, flags) = (fields.first()?, fields.get(1)?, fields.get(3)?);
            let flags = u32::from_str_radix(flags, 16).ok()?;
            (*destination == "00000000" && flags & RTF_UP != 0).then(|| iface.to_string())
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Credential check plus a default-route check. Both are optional; with
/// neither configured the probe always succeeds.
#[derive(Clone, Debug, Default)]
pub struct SystemConnectivity {
    credentials: Option<CredentialStore>,
    routes: Option<RouteTable>,
}

impl SystemConnectivity {
    pub fn new(credentials: Option<CredentialStore>, routes: Option<RouteTable>) -> Self {
        Self {
            credentials,
            routes,
        }
    }
}

impl ConnectivityProbe for SystemConnectivity {
    async fn check(&self) -> Result<(), ConnectivityError> {
        if let Some(store) = &self.credentials {
            if !store.has_credentials() {
                return Err(ConnectivityError::NoCredentials(
                    store.path().display().to_string(),
                ));
            }
        }

        if let Some(routes) = &self.routes {
            match routes.default_route() {
                Some(iface) => log::debug!("Default route via {}", iface),
                None => {
                    return Err(ConnectivityError::NoRoute(
                        routes.path().display().to_string(),
                    ))
                }
            }
        }

        Ok(())
    }
}
