//! Message types carried between a guest device model and its peer.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Size of an EDID base block.
pub const EDID_LEN: usize = 128;

/// Type tags stamped into the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u32)]
pub enum MsgType {
    /// Input event forwarded from the privileged domain.
    Dom0InputEvent = 1,
    /// Display geometry limits.
    DisplayInfo = 2,
    /// EDID blob for a display.
    DisplayEdid = 3,
    /// Peer acknowledges that the device model is ready.
    DeviceModelReady = 4,
    /// Input device configuration for a slot.
    InputConfig = 5,
    /// Clears the input configuration of a slot.
    InputConfigReset = 6,
    /// Guest asks for [`MsgType::DisplayInfo`].
    DisplayGetInfo = 7,
    /// Guest asks for [`MsgType::DisplayEdid`].
    DisplayGetEdid = 8,
}

impl MsgType {
    /// Numeric tag as stamped into the header.
    pub const fn tag(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for MsgType {
    type Error = Error;

    fn try_from(tag: u32) -> Result<Self> {
        Ok(match tag {
            1 => Self::Dom0InputEvent,
            2 => Self::DisplayInfo,
            3 => Self::DisplayEdid,
            4 => Self::DeviceModelReady,
            5 => Self::InputConfig,
            6 => Self::InputConfigReset,
            7 => Self::DisplayGetInfo,
            8 => Self::DisplayGetEdid,
            other => return Err(Error::UnknownType(other)),
        })
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Dom0InputEvent => "dom0-input-event",
            Self::DisplayInfo => "display-info",
            Self::DisplayEdid => "display-edid",
            Self::DeviceModelReady => "device-model-ready",
            Self::InputConfig => "input-config",
            Self::InputConfigReset => "input-config-reset",
            Self::DisplayGetInfo => "display-get-info",
            Self::DisplayGetEdid => "display-get-edid",
        })
    }
}

/// An evdev-style input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    /// Event type (`EV_KEY`, `EV_REL`, ...).
    pub kind: u16,
    /// Event code within `kind`.
    pub code: u16,
    /// Event value.
    pub value: i32,
}

/// Geometry limits of one display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    /// Display the limits apply to.
    pub display_id: u32,
    /// Maximum horizontal resolution.
    pub max_xres: u32,
    /// Maximum vertical resolution.
    pub max_yres: u32,
    /// Required stride alignment in bytes.
    pub align: u32,
}

/// EDID of one display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayEdid {
    /// Display the EDID belongs to.
    pub display_id: u32,
    /// Exactly [`EDID_LEN`] bytes.
    pub edid: Vec<u8>,
}

/// Configuration of an input slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Slot being configured.
    pub slot: u8,
    /// Human-readable device name.
    pub name: String,
    /// USB/HID vendor id.
    pub vendor: u16,
    /// USB/HID product id.
    pub product: u16,
}

/// Reset of an input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfigReset {
    /// Slot being reset.
    pub slot: u8,
}

/// A guest request naming one display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayQuery {
    /// Display the request is about.
    pub display_id: u32,
}

/// A decoded dmbus message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Message {
    /// See [`MsgType::Dom0InputEvent`].
    Dom0InputEvent(InputEvent),
    /// See [`MsgType::DisplayInfo`].
    DisplayInfo(DisplayInfo),
    /// See [`MsgType::DisplayEdid`].
    DisplayEdid(DisplayEdid),
    /// See [`MsgType::DeviceModelReady`].
    DeviceModelReady,
    /// See [`MsgType::InputConfig`].
    InputConfig(InputConfig),
    /// See [`MsgType::InputConfigReset`].
    InputConfigReset(InputConfigReset),
    /// See [`MsgType::DisplayGetInfo`].
    DisplayGetInfo(DisplayQuery),
    /// See [`MsgType::DisplayGetEdid`].
    DisplayGetEdid(DisplayQuery),
}

impl Message {
    /// Type tag this message is sent under.
    pub const fn msg_type(&self) -> MsgType {
        match self {
            Self::Dom0InputEvent(_) => MsgType::Dom0InputEvent,
            Self::DisplayInfo(_) => MsgType::DisplayInfo,
            Self::DisplayEdid(_) => MsgType::DisplayEdid,
            Self::DeviceModelReady => MsgType::DeviceModelReady,
            Self::InputConfig(_) => MsgType::InputConfig,
            Self::InputConfigReset(_) => MsgType::InputConfigReset,
            Self::DisplayGetInfo(_) => MsgType::DisplayGetInfo,
            Self::DisplayGetEdid(_) => MsgType::DisplayGetEdid,
        }
    }

    /// Serializes the payload (everything after the header).
    pub(crate) fn payload(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Self::Dom0InputEvent(m) => postcard::to_allocvec(m)?,
            Self::DisplayInfo(m) => postcard::to_allocvec(m)?,
            Self::DisplayEdid(m) => {
                if m.edid.len() != EDID_LEN {
                    return Err(Error::EdidLength(m.edid.len()));
                }
                postcard::to_allocvec(m)?
            }
            Self::DeviceModelReady => Vec::new(),
            Self::InputConfig(m) => postcard::to_allocvec(m)?,
            Self::InputConfigReset(m) => postcard::to_allocvec(m)?,
            Self::DisplayGetInfo(m) | Self::DisplayGetEdid(m) => postcard::to_allocvec(m)?,
        };
        Ok(bytes)
    }

    /// Deserializes a payload received under tag `ty`.
    pub(crate) fn from_payload(ty: MsgType, payload: &[u8]) -> Result<Self> {
        Ok(match ty {
            MsgType::Dom0InputEvent => Self::Dom0InputEvent(postcard::from_bytes(payload)?),
            MsgType::DisplayInfo => Self::DisplayInfo(postcard::from_bytes(payload)?),
            MsgType::DisplayEdid => {
                let m: DisplayEdid = postcard::from_bytes(payload)?;
                if m.edid.len() != EDID_LEN {
                    return Err(Error::EdidLength(m.edid.len()));
                }
                Self::DisplayEdid(m)
            }
            MsgType::DeviceModelReady => Self::DeviceModelReady,
            MsgType::InputConfig => Self::InputConfig(postcard::from_bytes(payload)?),
            MsgType::InputConfigReset => Self::InputConfigReset(postcard::from_bytes(payload)?),
            MsgType::DisplayGetInfo => Self::DisplayGetInfo(postcard::from_bytes(payload)?),
            MsgType::DisplayGetEdid => Self::DisplayGetEdid(postcard::from_bytes(payload)?),
        })
    }
}
