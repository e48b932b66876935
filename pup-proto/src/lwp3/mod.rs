//! LEGO Wireless Protocol v3 framing, decoding, and message construction
//!
//! An LWP3 frame is `[length, hub id, message type, payload...]` where the
//! length covers the whole frame including itself. Lengths below 128 occupy a
//! single byte; larger frames set the top bit of the first byte and carry a
//! 14-bit length split across two bytes (low 7 bits first).

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::coding::{BufExt, BufMutExt, UnexpectedEnd};
use crate::Port;

mod types;
pub use types::{
    AlertOperation, AlertType, DeviceCategory, DeviceType, EndState, ErrorCode, Feedback,
    HubAction, HubProperty, InfoType, IoEvent, MessageType, ModeInfoType, OutputCommand,
    PropertyOperation,
};

/// Startup byte on every port output command: execute immediately, request
/// command feedback.
pub const STARTUP_IMMEDIATE_WITH_FEEDBACK: u8 = 0x11;

/// Input too short for its own header or declared length
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
#[error("malformed frame")]
pub struct MalformedFrame;

impl From<UnexpectedEnd> for MalformedFrame {
    fn from(_: UnexpectedEnd) -> Self {
        Self
    }
}

/// One decoded LWP3 message
///
/// Unrecognized message types, action bytes, and I/O events decode to
/// [`Message::Unknown`] so a newer hub never stalls the inbound pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    HubProperty {
        property: HubProperty,
        operation: PropertyOperation,
        payload: Bytes,
    },
    HubAction(HubAction),
    HubAlert {
        alert: AlertType,
        operation: AlertOperation,
        payload: Bytes,
    },
    AttachedIo(AttachedIo),
    GenericError {
        command: MessageType,
        code: ErrorCode,
    },
    PortInformationRequest {
        port: Port,
        info: InfoType,
    },
    PortModeInformationRequest {
        port: Port,
        mode: u8,
        info: ModeInfoType,
    },
    PortInputFormatSetup {
        port: Port,
        mode: u8,
        delta: u32,
        notifications: bool,
    },
    PortInformation {
        port: Port,
        info: InfoType,
        payload: Bytes,
    },
    PortModeInformation {
        port: Port,
        mode: u8,
        info: ModeInfoType,
        payload: Bytes,
    },
    PortValueSingle {
        port: Port,
        payload: Bytes,
    },
    PortValueCombined {
        port: Port,
        mode_pointers: u16,
        payload: Bytes,
    },
    PortInputFormatSingle {
        port: Port,
        mode: u8,
        delta: u32,
        notifications: bool,
    },
    VirtualPortSetup(VirtualPortSetup),
    PortOutputCommand {
        port: Port,
        startup: u8,
        command: OutputCommand,
        payload: Bytes,
    },
    PortOutputFeedback(Vec<(Port, Feedback)>),
    Unknown {
        ty: MessageType,
        payload: Bytes,
    },
}

/// Lifecycle of a device on a port (message type 0x04)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachedIo {
    Detached {
        port: Port,
    },
    Attached {
        port: Port,
        device: DeviceType,
        hw_rev: u32,
        sw_rev: u32,
    },
    AttachedVirtual {
        port: Port,
        device: DeviceType,
        port_a: Port,
        port_b: Port,
    },
}

impl AttachedIo {
    pub fn port(&self) -> Port {
        match *self {
            Self::Detached { port }
            | Self::Attached { port, .. }
            | Self::AttachedVirtual { port, .. } => port,
        }
    }
}

/// Virtual port synthesis request (message type 0x61)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualPortSetup {
    Connect { port_a: Port, port_b: Port },
    Disconnect { port: Port },
}

impl Message {
    /// Decode the frame at the start of `bytes`
    ///
    /// Fails only when the input is shorter than the frame header or than the
    /// declared frame length; unknown content yields [`Message::Unknown`].
    pub fn decode(bytes: &[u8]) -> Result<Self, MalformedFrame> {
        let (total, header) = match bytes.first() {
            Some(&b0) if b0 & 0x80 != 0 => {
                if bytes.len() < 4 {
                    return Err(MalformedFrame);
                }
                (((b0 & 0x7F) as usize) | ((bytes[1] as usize) << 7), 4)
            }
            Some(&b0) => (b0 as usize, 3),
            None => return Err(MalformedFrame),
        };
        if total < header || total > bytes.len() || bytes.len() < header {
            return Err(MalformedFrame);
        }
        // bytes[header - 2] is the hub id; always 0 in practice and ignored
        let ty = MessageType(bytes[header - 1]);
        let mut payload = Bytes::copy_from_slice(&bytes[header..total]);

        Ok(match ty {
            MessageType::HUB_PROPERTIES => Self::HubProperty {
                property: HubProperty(payload.get()?),
                operation: PropertyOperation(payload.get()?),
                payload,
            },
            MessageType::HUB_ACTIONS => match HubAction::from_raw(payload.get()?) {
                Some(action) => Self::HubAction(action),
                None => Self::unknown(ty, &bytes[header..total]),
            },
            MessageType::HUB_ALERTS => Self::HubAlert {
                alert: AlertType(payload.get()?),
                operation: AlertOperation(payload.get()?),
                payload,
            },
            MessageType::HUB_ATTACHED_IO => {
                let port = Port(payload.get()?);
                match IoEvent::from_raw(payload.get()?) {
                    Some(IoEvent::Detached) => Self::AttachedIo(AttachedIo::Detached { port }),
                    Some(IoEvent::Attached) => Self::AttachedIo(AttachedIo::Attached {
                        port,
                        device: DeviceType(payload.get()?),
                        hw_rev: payload.get()?,
                        sw_rev: payload.get()?,
                    }),
                    Some(IoEvent::AttachedVirtual) => {
                        Self::AttachedIo(AttachedIo::AttachedVirtual {
                            port,
                            device: DeviceType(payload.get()?),
                            port_a: Port(payload.get()?),
                            port_b: Port(payload.get()?),
                        })
                    }
                    None => Self::unknown(ty, &bytes[header..total]),
                }
            }
            MessageType::GENERIC_ERROR => Self::GenericError {
                command: MessageType(payload.get()?),
                code: ErrorCode(payload.get()?),
            },
            MessageType::PORT_INFORMATION_REQUEST => Self::PortInformationRequest {
                port: Port(payload.get()?),
                info: InfoType(payload.get()?),
            },
            MessageType::PORT_MODE_INFORMATION_REQUEST => Self::PortModeInformationRequest {
                port: Port(payload.get()?),
                mode: payload.get()?,
                info: ModeInfoType(payload.get()?),
            },
            MessageType::PORT_INPUT_FORMAT_SETUP_SINGLE => Self::PortInputFormatSetup {
                port: Port(payload.get()?),
                mode: payload.get()?,
                delta: payload.get()?,
                notifications: payload.get::<u8>()? != 0,
            },
            MessageType::PORT_INFORMATION => Self::PortInformation {
                port: Port(payload.get()?),
                info: InfoType(payload.get()?),
                payload,
            },
            MessageType::PORT_MODE_INFORMATION => Self::PortModeInformation {
                port: Port(payload.get()?),
                mode: payload.get()?,
                info: ModeInfoType(payload.get()?),
                payload,
            },
            MessageType::PORT_VALUE_SINGLE => Self::PortValueSingle {
                port: Port(payload.get()?),
                payload,
            },
            MessageType::PORT_VALUE_COMBINED => Self::PortValueCombined {
                port: Port(payload.get()?),
                mode_pointers: payload.get()?,
                payload,
            },
            MessageType::PORT_INPUT_FORMAT_SINGLE => Self::PortInputFormatSingle {
                port: Port(payload.get()?),
                mode: payload.get()?,
                delta: payload.get()?,
                notifications: payload.get::<u8>()? != 0,
            },
            MessageType::VIRTUAL_PORT_SETUP => match payload.get::<u8>()? {
                0x00 => Self::VirtualPortSetup(VirtualPortSetup::Disconnect {
                    port: Port(payload.get()?),
                }),
                0x01 => Self::VirtualPortSetup(VirtualPortSetup::Connect {
                    port_a: Port(payload.get()?),
                    port_b: Port(payload.get()?),
                }),
                _ => Self::unknown(ty, &bytes[header..total]),
            },
            MessageType::PORT_OUTPUT_COMMAND => Self::PortOutputCommand {
                port: Port(payload.get()?),
                startup: payload.get()?,
                command: OutputCommand(payload.get()?),
                payload,
            },
            MessageType::PORT_OUTPUT_COMMAND_FEEDBACK => {
                let mut feedback = Vec::with_capacity(payload.len() / 2);
                while !payload.is_empty() {
                    feedback.push((Port(payload.get()?), Feedback(payload.get()?)));
                }
                Self::PortOutputFeedback(feedback)
            }
            _ => Self::unknown(ty, &bytes[header..total]),
        })
    }

    fn unknown(ty: MessageType, payload: &[u8]) -> Self {
        Self::Unknown {
            ty,
            payload: Bytes::copy_from_slice(payload),
        }
    }
}

/// Assemble a frame around `payload`, choosing the length encoding
///
/// The two-byte form is used exactly when the total frame length would reach
/// 128.
fn frame(ty: MessageType, payload: &[u8]) -> Bytes {
    let body = payload.len() + 2; // hub id + message type
    let mut buf = BytesMut::with_capacity(body + 2);
    if 1 + body < 128 {
        buf.put_u8((1 + body) as u8);
    } else {
        let total = 2 + body;
        debug_assert!(total < 1 << 14);
        buf.put_u8((total & 0x7F) as u8 | 0x80);
        buf.put_u8((total >> 7) as u8);
    }
    buf.put_u8(0); // hub id
    buf.put_u8(ty.0);
    buf.put_slice(payload);
    buf.freeze()
}

fn output(port: Port, command: OutputCommand, payload: &[u8]) -> Bytes {
    let mut buf = Vec::with_capacity(payload.len() + 3);
    buf.push(port.0);
    buf.push(STARTUP_IMMEDIATE_WITH_FEEDBACK);
    buf.push(command.0);
    buf.extend_from_slice(payload);
    frame(MessageType::PORT_OUTPUT_COMMAND, &buf)
}

fn write_direct(port: Port, mode: u8, data: &[u8]) -> Bytes {
    let mut buf = Vec::with_capacity(data.len() + 1);
    buf.push(mode);
    buf.extend_from_slice(data);
    output(port, OutputCommand::WRITE_DIRECT_MODE_DATA, &buf)
}

/// Ask the hub to report the current value of `property` once
pub fn hub_property_request(property: HubProperty) -> Bytes {
    frame(
        MessageType::HUB_PROPERTIES,
        &[property.0, PropertyOperation::REQUEST_UPDATE.0],
    )
}

/// Ask the hub to push updates whenever `property` changes
pub fn hub_property_enable_updates(property: HubProperty) -> Bytes {
    frame(
        MessageType::HUB_PROPERTIES,
        &[property.0, PropertyOperation::ENABLE_UPDATES.0],
    )
}

/// Write a new value for `property`, e.g. the advertising name
pub fn hub_property_set(property: HubProperty, value: &[u8]) -> Bytes {
    let mut payload = Vec::with_capacity(value.len() + 2);
    payload.push(property.0);
    payload.push(PropertyOperation::SET.0);
    payload.extend_from_slice(value);
    frame(MessageType::HUB_PROPERTIES, &payload)
}

pub fn hub_action(action: HubAction) -> Bytes {
    frame(MessageType::HUB_ACTIONS, &[action as u8])
}

pub fn hub_alert_request(alert: AlertType) -> Bytes {
    frame(
        MessageType::HUB_ALERTS,
        &[alert.0, AlertOperation::REQUEST_UPDATE.0],
    )
}

pub fn port_information_request(port: Port, info: InfoType) -> Bytes {
    frame(MessageType::PORT_INFORMATION_REQUEST, &[port.0, info.0])
}

pub fn port_mode_information_request(port: Port, mode: u8, info: ModeInfoType) -> Bytes {
    frame(
        MessageType::PORT_MODE_INFORMATION_REQUEST,
        &[port.0, mode, info.0],
    )
}

/// Configure single-mode input on `port`: which mode to stream, the minimum
/// change (`delta`) worth reporting, and whether to push notifications
pub fn port_input_format_setup(port: Port, mode: u8, delta: u32, notifications: bool) -> Bytes {
    let mut payload = Vec::with_capacity(7);
    payload.push(port.0);
    payload.push(mode);
    payload.write(delta);
    payload.push(notifications as u8);
    frame(MessageType::PORT_INPUT_FORMAT_SETUP_SINGLE, &payload)
}

/// Pair two external ports into a hub-assigned virtual port
pub fn create_virtual_port(port_a: Port, port_b: Port) -> Bytes {
    frame(MessageType::VIRTUAL_PORT_SETUP, &[0x01, port_a.0, port_b.0])
}

pub fn disconnect_virtual_port(port: Port) -> Bytes {
    frame(MessageType::VIRTUAL_PORT_SETUP, &[0x00, port.0])
}

/// Raw PWM drive. 127 brakes, 0 floats, other values are two's complement
/// duty cycle.
pub fn start_power(port: Port, power: i8) -> Bytes {
    write_direct(port, 0x00, &[power as u8])
}

pub fn brake(port: Port) -> Bytes {
    start_power(port, 127)
}

pub fn float(port: Port) -> Bytes {
    start_power(port, 0)
}

pub fn start_speed(port: Port, speed: i8, max_power: u8, use_profile: u8) -> Bytes {
    output(
        port,
        OutputCommand::START_SPEED,
        &[speed as u8, max_power, use_profile],
    )
}

pub fn start_speed_for_time(
    port: Port,
    time_ms: u16,
    speed: i8,
    max_power: u8,
    end_state: EndState,
    use_profile: u8,
) -> Bytes {
    let mut payload = Vec::with_capacity(6);
    payload.write(time_ms);
    payload.push(speed as u8);
    payload.push(max_power);
    payload.push(end_state as u8);
    payload.push(use_profile);
    output(port, OutputCommand::START_SPEED_FOR_TIME, &payload)
}

pub fn start_speed_for_degrees(
    port: Port,
    degrees: u32,
    speed: i8,
    max_power: u8,
    end_state: EndState,
    use_profile: u8,
) -> Bytes {
    let mut payload = Vec::with_capacity(8);
    payload.write(degrees);
    payload.push(speed as u8);
    payload.push(max_power);
    payload.push(end_state as u8);
    payload.push(use_profile);
    output(port, OutputCommand::START_SPEED_FOR_DEGREES, &payload)
}

pub fn goto_absolute_position(
    port: Port,
    position: i32,
    speed: i8,
    max_power: u8,
    end_state: EndState,
    use_profile: u8,
) -> Bytes {
    let mut payload = Vec::with_capacity(8);
    payload.write(position);
    payload.push(speed as u8);
    payload.push(max_power);
    payload.push(end_state as u8);
    payload.push(use_profile);
    output(port, OutputCommand::GOTO_ABSOLUTE_POSITION, &payload)
}

/// Drive the hub status light by color index (mode 0)
pub fn hub_led_color(port: Port, color: u8) -> Bytes {
    write_direct(port, 0x00, &[color])
}

/// Drive the hub status light by RGB triple (mode 1)
pub fn hub_led_rgb(port: Port, red: u8, green: u8, blue: u8) -> Bytes {
    write_direct(port, 0x01, &[red, green, blue])
}
