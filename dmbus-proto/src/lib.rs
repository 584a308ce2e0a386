//! Wire catalog for the dmbus device-model message bus.
//!
//! Every frame is `[u32 LE type][u32 LE total length][postcard payload]`,
//! where the length counts the 8-byte header itself. A connection starts with
//! a fixed-size [`Prologue`] written by the guest before any frame.

mod codec;
mod error;
mod message;
mod prologue;

pub use codec::{Header, HEADER_SIZE, MAX_MSG_LEN, decode, encode};
pub use error::{Error, Result};
pub use message::{
    DisplayEdid, DisplayInfo, DisplayQuery, EDID_LEN, InputConfig, InputConfigReset, InputEvent,
    Message, MsgType,
};
pub use prologue::{
    BASE_PORT, DeviceType, FINGERPRINT_LEN, PROLOGUE_SIZE, PROTOCOL_HASH, Prologue, ServiceId,
    fingerprint,
};
