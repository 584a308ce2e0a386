//! Connection prologue: the fixed record a guest writes right after connecting.

use std::sync::LazyLock;

use crate::error::{Error, Result};

/// Port of service 0; service `n` listens on `BASE_PORT + n`.
pub const BASE_PORT: u32 = 4000;

/// Length of the protocol fingerprint.
pub const FINGERPRINT_LEN: usize = 20;

/// Wire size of a [`Prologue`].
pub const PROLOGUE_SIZE: usize = 8 + FINGERPRINT_LEN;

/// SHA-1 of the catalog definition, as published by the peer.
///
/// Both ends compare this to refuse guests built against another catalog.
pub const PROTOCOL_HASH: &str = "5f0c1c9e3b0e4d6a2c77a1f0b9e24d3c8a61f5e2";

/// Fingerprint bytes, decoded once per process.
static FINGERPRINT: LazyLock<std::result::Result<[u8; FINGERPRINT_LEN], hex::FromHexError>> =
    LazyLock::new(|| {
        let mut out = [0u8; FINGERPRINT_LEN];
        hex::decode_to_slice(PROTOCOL_HASH, &mut out).map(|()| out)
    });

/// Returns the decoded [`PROTOCOL_HASH`].
pub fn fingerprint() -> Result<[u8; FINGERPRINT_LEN]> {
    match &*FINGERPRINT {
        Ok(fp) => Ok(*fp),
        Err(e) => Err(Error::Fingerprint(e.clone())),
    }
}

/// Services offered by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u32)]
pub enum ServiceId {
    /// Display manager.
    Surfman = 0,
    /// Input server.
    Input = 1,
}

impl ServiceId {
    /// Port the peer listens on for this service.
    pub const fn port(self) -> u32 {
        BASE_PORT + self as u32
    }
}

impl std::str::FromStr for ServiceId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "surfman" | "0" => Ok(Self::Surfman),
            "input" | "1" => Ok(Self::Input),
            _ => Err(format!("unknown service: {s}")),
        }
    }
}

/// Kind of device model announcing itself in the prologue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u32)]
pub enum DeviceType {
    /// VESA framebuffer.
    Vesa = 0,
    /// Xen paravirtual framebuffer.
    XenFb = 1,
    /// Xen graphics passthrough.
    XenGfx = 2,
    /// Emulated keyboard/mouse.
    Input = 3,
    /// Paravirtual absolute pointer.
    InputPvMouse = 4,
    /// ATAPI passthrough.
    AtapiPt = 5,
    /// Emulated audio.
    Audio = 6,
}

impl TryFrom<u32> for DeviceType {
    type Error = Error;

    fn try_from(v: u32) -> Result<Self> {
        Ok(match v {
            0 => Self::Vesa,
            1 => Self::XenFb,
            2 => Self::XenGfx,
            3 => Self::Input,
            4 => Self::InputPvMouse,
            5 => Self::AtapiPt,
            6 => Self::Audio,
            other => return Err(Error::UnknownDevice(other)),
        })
    }
}

impl std::str::FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vesa" => Ok(Self::Vesa),
            "xenfb" => Ok(Self::XenFb),
            "xengfx" => Ok(Self::XenGfx),
            "input" => Ok(Self::Input),
            "input-pvmouse" => Ok(Self::InputPvMouse),
            "atapi-pt" => Ok(Self::AtapiPt),
            "audio" => Ok(Self::Audio),
            _ => Err(format!("unknown device type: {s}")),
        }
    }
}

/// Identity record sent as the first bytes of every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prologue {
    /// Local domain id.
    pub domain: u32,
    /// Device model announcing itself.
    pub device_type: DeviceType,
    /// Catalog fingerprint, see [`fingerprint`].
    pub hash: [u8; FINGERPRINT_LEN],
}

impl Prologue {
    /// Builds a prologue carrying the process-wide fingerprint.
    pub fn new(domain: u32, device_type: DeviceType) -> Result<Self> {
        Ok(Self {
            domain,
            device_type,
            hash: fingerprint()?,
        })
    }

    /// Wire form: `[u32 LE domain][u32 LE device type][20-byte hash]`.
    pub fn to_bytes(&self) -> [u8; PROLOGUE_SIZE] {
        let mut out = [0u8; PROLOGUE_SIZE];
        out[..4].copy_from_slice(&self.domain.to_le_bytes());
        out[4..8].copy_from_slice(&(self.device_type as u32).to_le_bytes());
        out[8..].copy_from_slice(&self.hash);
        out
    }

    /// Parses the wire form; the peer side of [`Prologue::to_bytes`].
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let buf = buf.get(..PROLOGUE_SIZE).ok_or(Error::Truncated)?;
        let word = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let mut hash = [0u8; FINGERPRINT_LEN];
        hash.copy_from_slice(&buf[8..]);
        Ok(Self {
            domain: word(0),
            device_type: DeviceType::try_from(word(4))?,
            hash,
        })
    }
}
