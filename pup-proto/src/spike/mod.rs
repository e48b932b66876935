//! SPIKE Prime / Robot Inventor binary protocol
//!
//! Messages are tagged byte strings carried inside [`cobs`] frames. The hub
//! pushes one [`DeviceNotification`] per reporting interval containing a
//! complete picture of every port, as fixed-size sub-records.

use bytes::{Buf, Bytes};

use crate::coding::{BufExt, UnexpectedEnd};
use crate::Port;

pub mod cobs;
pub mod json;

/// Message tags used by this engine. The hub defines many more; unlisted tags
/// surface as [`Notification::Unknown`].
pub const INFO_REQUEST: u8 = 0x00;
pub const INFO_RESPONSE: u8 = 0x01;
pub const SET_HUB_NAME: u8 = 0x16;
pub const GET_HUB_NAME: u8 = 0x18;
pub const PROGRAM_FLOW_REQUEST: u8 = 0x1E;
pub const CONSOLE_NOTIFICATION: u8 = 0x21;
pub const DEVICE_NOTIFICATION_REQUEST: u8 = 0x28;
pub const DEVICE_NOTIFICATION: u8 = 0x3C;
pub const CLEAR_SLOT_REQUEST: u8 = 0x46;

/// Capability handshake reply (tag 0x01), 17 bytes on the wire
///
/// `max_packet_size` governs how outbound frames are chunked from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoResponse {
    pub rpc_major: u8,
    pub rpc_minor: u8,
    pub rpc_build: u16,
    pub firmware_major: u8,
    pub firmware_minor: u8,
    pub firmware_build: u16,
    pub max_packet_size: u16,
    pub max_message_size: u16,
    pub max_chunk_size: u16,
    pub product_group: u16,
}

impl InfoResponse {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, UnexpectedEnd> {
        Ok(Self {
            rpc_major: buf.get()?,
            rpc_minor: buf.get()?,
            rpc_build: buf.get()?,
            firmware_major: buf.get()?,
            firmware_minor: buf.get()?,
            firmware_build: buf.get()?,
            max_packet_size: buf.get()?,
            max_message_size: buf.get()?,
            max_chunk_size: buf.get()?,
            product_group: buf.get()?,
        })
    }
}

/// One sub-record of a device notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRecord {
    Battery {
        level: u8,
    },
    Imu {
        port: Port,
        yaw_face: u8,
        accelerometer: [i16; 3],
        gyroscope: [i16; 3],
        orientation: [i16; 3],
    },
    /// The hub's own 5x5 light matrix, brightness per pixel
    Display {
        pixels: [u8; 25],
    },
    Motor {
        port: Port,
        device_type: u8,
        absolute_position: i16,
        power: i16,
        speed: i8,
        position: i32,
    },
    Force {
        port: Port,
        force: u8,
        pressed: bool,
    },
    Color {
        port: Port,
        color: i8,
        red: u16,
        green: u16,
        blue: u16,
    },
    /// Millimeters; -1 means nothing in range
    Distance {
        port: Port,
        distance: i16,
    },
    Matrix3x3 {
        port: Port,
        pixels: [u8; 9],
    },
}

mod record_tag {
    pub const BATTERY: u8 = 0x00;
    pub const IMU: u8 = 0x01;
    pub const DISPLAY: u8 = 0x02;
    pub const MOTOR: u8 = 0x0A;
    pub const FORCE: u8 = 0x0B;
    pub const COLOR: u8 = 0x0C;
    pub const DISTANCE: u8 = 0x0D;
    pub const MATRIX_3X3: u8 = 0x0E;
}

/// Wire size of the sub-record starting with `tag`, including the tag itself
fn record_size(tag: u8) -> Option<usize> {
    Some(match tag {
        record_tag::BATTERY => 2,
        record_tag::IMU => 21,
        record_tag::DISPLAY => 26,
        record_tag::MOTOR => 12,
        record_tag::FORCE => 4,
        record_tag::COLOR => 9,
        record_tag::DISTANCE => 4,
        record_tag::MATRIX_3X3 => 11,
        _ => return None,
    })
}

/// A full per-interval report of the hub's port state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceNotification {
    pub records: Vec<DeviceRecord>,
    /// The tag that ended the walk early, when one did
    pub unknown_tag: Option<u8>,
}

impl DeviceNotification {
    /// Walk the concatenated sub-records in `payload`
    ///
    /// Stops at the first unknown tag or short remainder and returns whatever
    /// was decoded before it; a partial snapshot beats discarded telemetry.
    pub fn decode(mut payload: Bytes) -> Self {
        let mut records = Vec::new();
        while let Some(&tag) = payload.first() {
            let Some(size) = record_size(tag) else {
                return Self {
                    records,
                    unknown_tag: Some(tag),
                };
            };
            if payload.remaining() < size {
                break;
            }
            let mut rec = payload.split_to(size);
            rec.advance(1);
            // sizes are validated above, so these reads cannot fail
            if let Ok(record) = Self::record(tag, &mut rec) {
                records.push(record);
            }
        }
        Self {
            records,
            unknown_tag: None,
        }
    }

    fn record(tag: u8, rec: &mut Bytes) -> Result<DeviceRecord, UnexpectedEnd> {
        Ok(match tag {
            record_tag::BATTERY => DeviceRecord::Battery { level: rec.get()? },
            record_tag::IMU => DeviceRecord::Imu {
                port: Port(rec.get()?),
                yaw_face: rec.get()?,
                accelerometer: [rec.get()?, rec.get()?, rec.get()?],
                gyroscope: [rec.get()?, rec.get()?, rec.get()?],
                orientation: [rec.get()?, rec.get()?, rec.get()?],
            },
            record_tag::DISPLAY => {
                let mut pixels = [0u8; 25];
                rec.copy_to_slice(&mut pixels);
                DeviceRecord::Display { pixels }
            }
            record_tag::MOTOR => DeviceRecord::Motor {
                port: Port(rec.get()?),
                device_type: rec.get()?,
                absolute_position: rec.get()?,
                power: rec.get()?,
                speed: rec.get()?,
                position: rec.get()?,
            },
            record_tag::FORCE => DeviceRecord::Force {
                port: Port(rec.get()?),
                force: rec.get()?,
                pressed: rec.get::<u8>()? != 0,
            },
            record_tag::COLOR => DeviceRecord::Color {
                port: Port(rec.get()?),
                color: rec.get()?,
                red: rec.get()?,
                green: rec.get()?,
                blue: rec.get()?,
            },
            record_tag::DISTANCE => DeviceRecord::Distance {
                port: Port(rec.get()?),
                distance: rec.get()?,
            },
            record_tag::MATRIX_3X3 => {
                let port = Port(rec.get()?);
                let mut pixels = [0u8; 9];
                rec.copy_to_slice(&mut pixels);
                DeviceRecord::Matrix3x3 { port, pixels }
            }
            _ => unreachable!("record_size admitted the tag"),
        })
    }
}

/// One message decoded from an unpacked frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Info(InfoResponse),
    /// UTF-8 text from the hub's stdout, lossily decoded
    Console(String),
    Device(DeviceNotification),
    Unknown { tag: u8, payload: Bytes },
}

impl Notification {
    /// Decode one unpacked (post-[`cobs::unpack`]) message
    pub fn decode(mut bytes: Bytes) -> Result<Self, UnexpectedEnd> {
        let tag: u8 = bytes.get()?;
        Ok(match tag {
            INFO_RESPONSE => Self::Info(InfoResponse::decode(&mut bytes)?),
            CONSOLE_NOTIFICATION => {
                Self::Console(String::from_utf8_lossy(&bytes).into_owned())
            }
            DEVICE_NOTIFICATION => {
                // 2-byte payload size; the frame is already delimited, so the
                // field is only validated, not trusted
                let declared: u16 = bytes.get()?;
                let len = bytes.remaining().min(declared as usize);
                Self::Device(DeviceNotification::decode(bytes.split_to(len)))
            }
            tag => Self::Unknown {
                tag,
                payload: bytes,
            },
        })
    }
}

/// Ask for an [`InfoResponse`]
pub fn info_request() -> Vec<u8> {
    vec![INFO_REQUEST]
}

/// Ask the hub to stream [`DeviceNotification`]s every `interval_ms`
pub fn device_notification_request(interval_ms: u16) -> Vec<u8> {
    let [lo, hi] = interval_ms.to_le_bytes();
    vec![DEVICE_NOTIFICATION_REQUEST, lo, hi]
}

/// Start (`stop == false`) or stop the program in `slot`
pub fn program_flow_request(stop: bool, slot: u8) -> Vec<u8> {
    vec![PROGRAM_FLOW_REQUEST, stop as u8, slot]
}

/// Rename the hub; the wire carries the UTF-8 bytes NUL-terminated
pub fn set_hub_name(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2);
    out.push(SET_HUB_NAME);
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out
}

pub fn get_hub_name() -> Vec<u8> {
    vec![GET_HUB_NAME]
}

pub fn clear_slot(slot: u8) -> Vec<u8> {
    vec![CLEAR_SLOT_REQUEST, slot]
}
