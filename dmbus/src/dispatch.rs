//! Typed dispatch of received frames to a consumer's [`Handler`].

use dmbus_proto::{InputConfig, Message};
use tracing::{debug, warn};

/// Consumer callbacks, one per inbound message type.
///
/// Every method defaults to a no-op, so an unimplemented method is a silently
/// ignored message. The implementing value is the consumer's context.
pub trait Handler {
    /// An input event forwarded by the peer.
    fn dom0_input_event(&mut self, _kind: u16, _code: u16, _value: i32) {}

    /// Geometry limits of a display.
    fn display_info(&mut self, _display_id: u32, _max_xres: u32, _max_yres: u32, _align: u32) {}

    /// EDID of a display; `edid` is [`EDID_LEN`](dmbus_proto::EDID_LEN) bytes.
    fn display_edid(&mut self, _display_id: u32, _edid: &[u8]) {}

    /// Configuration of an input slot.
    fn input_config(&mut self, _config: &InputConfig) {}

    /// Reset of an input slot.
    fn input_config_reset(&mut self, _slot: u8) {}

    /// The connection was re-established after a disconnect.
    fn reconnected(&mut self) {}
}

impl Handler for () {}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn dom0_input_event(&mut self, kind: u16, code: u16, value: i32) {
        (**self).dom0_input_event(kind, code, value);
    }

    fn display_info(&mut self, display_id: u32, max_xres: u32, max_yres: u32, align: u32) {
        (**self).display_info(display_id, max_xres, max_yres, align);
    }

    fn display_edid(&mut self, display_id: u32, edid: &[u8]) {
        (**self).display_edid(display_id, edid);
    }

    fn input_config(&mut self, config: &InputConfig) {
        (**self).input_config(config);
    }

    fn input_config_reset(&mut self, slot: u8) {
        (**self).input_config_reset(slot);
    }

    fn reconnected(&mut self) {
        (**self).reconnected();
    }
}

/// Decodes one complete frame and invokes the matching handler method.
///
/// Unknown types and undecodable payloads are logged and dropped.
pub fn dispatch<H: Handler + ?Sized>(handler: &mut H, frame: &[u8]) {
    let msg = match dmbus_proto::decode(frame) {
        Ok(msg) => msg,
        Err(dmbus_proto::Error::UnknownType(tag)) => {
            warn!(tag, "unrecognized message type, dropped");
            return;
        }
        Err(e) => {
            warn!(error = %e, len = frame.len(), "undecodable message, dropped");
            return;
        }
    };
    debug!(msg_type = %msg.msg_type(), len = frame.len(), "dispatch");

    match msg {
        Message::Dom0InputEvent(ev) => handler.dom0_input_event(ev.kind, ev.code, ev.value),
        Message::DisplayInfo(d) => handler.display_info(d.display_id, d.max_xres, d.max_yres, d.align),
        Message::DisplayEdid(d) => handler.display_edid(d.display_id, &d.edid),
        // Readiness acknowledgment; nothing to do.
        Message::DeviceModelReady => {}
        Message::InputConfig(c) => handler.input_config(&c),
        Message::InputConfigReset(r) => handler.input_config_reset(r.slot),
        other => debug!(msg_type = %other.msg_type(), "peer-bound message received, ignored"),
    }
}
