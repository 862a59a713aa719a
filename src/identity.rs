//! # Device Identity
//!
//! The image server knows a device only by the hardware address of its primary
//! wireless interface. This module reads that address from sysfs and normalises
//! it to upper-case, colon-delimited form (`AA:BB:CC:DD:EE:FF`).
//!
//! Resolution fails when the interface is missing, administratively down, or
//! reports an all-zero address. Callers treat failure as "configuration
//! required", never as a fatal error.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors from identity resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// No candidate interface yielded a usable address
    #[error("no usable network interface (tried {tried})")]
    Unavailable { tried: String },

    /// Address text is not six hex octets
    #[error("malformed hardware address {0:?}")]
    Malformed(String),
}

/// IFF_UP from `<linux/if.h>`
const IFF_UP: u32 = 0x1;

/// Normalised hardware address, fixed for the life of the process.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    octets: [u8; 6],
    text: String,
}

impl DeviceIdentity {
    pub fn octets(&self) -> [u8; 6] {
        self.octets
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Hostname advertised by the device, e.g. `INK_AABBCCDDEEFF`.
    pub fn hostname(&self) -> String {
        format!("INK_{}", self.text.replace(':', ""))
    }

    pub fn is_zero(&self) -> bool {
        self.octets == [0; 6]
    }
}

impl FromStr for DeviceIdentity {
    type Err = IdentityError;

    /// Accepts colon- or hyphen-delimited octets in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let malformed = || IdentityError::Malformed(trimmed.to_string());

        let parts: Vec<&str> = trimmed.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(malformed());
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 {
                return Err(malformed());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| malformed())?;
        }

        let text = octets
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":");

        Ok(Self { octets, text })
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Anything that can answer "who am I" for the refresh loop.
pub trait IdentityProvider {
    fn device_identity(&self) -> Result<DeviceIdentity, IdentityError>;
}

/// Reads addresses from `/sys/class/net/<iface>/{address,flags}`.
#[derive(Clone, Debug)]
pub struct SysfsIdentity {
    root: PathBuf,
    interfaces: Vec<String>,
}

impl SysfsIdentity {
    pub fn new<P: AsRef<Path>>(root: P, interfaces: Vec<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            interfaces,
        }
    }

    /// Address of one interface, if it exists, is up, and is non-zero.
    fn read_interface(&self, name: &str) -> Option<DeviceIdentity> {
        let dir = self.root.join(name);

        let address = fs::read_to_string(dir.join("address")).ok()?;
        let identity: DeviceIdentity = match address.parse() {
            Ok(identity) => identity,
            Err(e) => {
                log::warn!("Interface {}: {}", name, e);
                return None;
            }
        };
        if identity.is_zero() {
            log::debug!("Interface {} reports a zero address", name);
            return None;
        }

        // flags is hex, e.g. "0x1003"
        if let Ok(flags) = fs::read_to_string(dir.join("flags")) {
            let flags = u32::from_str_radix(flags.trim().trim_start_matches("0x"), 16).ok()?;
            if flags & IFF_UP == 0 {
                log::debug!("Interface {} is administratively down", name);
                return None;
            }
        }

        Some(identity)
    }
}

impl IdentityProvider for SysfsIdentity {
    fn device_identity(&self) -> Result<DeviceIdentity, IdentityError> {
        self.interfaces
            .iter()
            .find_map(|name| self.read_interface(name))
            .ok_or_else(|| IdentityError::Unavailable {
                tried: self.interfaces.join(", "),
            })
    }
}
