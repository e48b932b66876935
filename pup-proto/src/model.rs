//! The live device model: what is attached to each port and what it reports
//!
//! A [`DeviceSnapshot`] is a plain value. The hub state machine mutates its
//! own copy and hands out clones, so readers never observe a half-applied
//! update.

use bytes::Bytes;
use rustc_hash::FxHashMap;

use crate::lwp3::{DeviceCategory, DeviceType};
use crate::spike::{DeviceNotification, DeviceRecord};
use crate::Port;

/// A device currently present on a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedDevice {
    pub device_type: DeviceType,
    pub category: DeviceCategory,
    pub label: String,
}

impl From<DeviceType> for AttachedDevice {
    fn from(device_type: DeviceType) -> Self {
        Self {
            device_type,
            category: device_type.category(),
            label: match device_type.label() {
                Some(label) => label.to_owned(),
                None => format!("Unknown device {:#06x}", device_type.0),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Motor {
    pub device_type: DeviceType,
    /// -127..=127
    pub speed: i8,
    /// Accumulated degrees
    pub position: i32,
    /// Degrees within one rotation
    pub absolute_position: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    /// LEGO color index; -1 when the sensor cannot decide
    pub color: i8,
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Force {
    /// 0..=100
    pub force: u8,
    pub pressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Imu {
    pub yaw_face: u8,
    pub accelerometer: [i16; 3],
    pub gyroscope: [i16; 3],
    pub orientation: [i16; 3],
}

/// Everything this engine knows about one hub's peripherals, as a value
///
/// Ports obey a one-typed-entry rule: a port appears in at most one of the
/// typed maps, and a later record for the same port displaces the earlier
/// entry. Detaching removes the port from every map at once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub attached: FxHashMap<Port, AttachedDevice>,
    /// Latest undecoded value bytes per port (LWP3 port value messages)
    pub raw_values: FxHashMap<Port, Bytes>,
    pub motors: FxHashMap<Port, Motor>,
    /// Millimeters; -1 means nothing detected
    pub distances: FxHashMap<Port, i16>,
    pub colors: FxHashMap<Port, Color>,
    pub forces: FxHashMap<Port, Force>,
    /// 3x3 matrix brightness, row-major, 0..=100
    pub light_matrices: FxHashMap<Port, [u8; 9]>,
    pub imu: Option<Imu>,
    /// The hub's own 5x5 display, row-major brightness
    pub display: Option<[u8; 25]>,
    pub gesture: Option<String>,
    /// 0..=100 once the hub has reported it
    pub battery: Option<u8>,
}

/// What changed while applying an update, so the hub can publish events
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SnapshotDelta {
    pub(crate) attached_changed: bool,
    pub(crate) battery: Option<u8>,
}

impl DeviceSnapshot {
    /// Record a device appearing on `port`, replacing any previous occupant
    pub(crate) fn attach(&mut self, port: Port, device_type: DeviceType) -> bool {
        self.remove_port_values(port);
        let device = AttachedDevice::from(device_type);
        self.attached.insert(port, device.clone()) != Some(device)
    }

    /// Remove `port` from the attached map and every value map
    pub(crate) fn detach(&mut self, port: Port) -> bool {
        self.remove_port_values(port);
        self.attached.remove(&port).is_some()
    }

    pub(crate) fn set_raw_value(&mut self, port: Port, value: Bytes) {
        self.raw_values.insert(port, value);
    }

    /// Replace the per-port state with the contents of one notification
    ///
    /// Every notification is a complete picture of the hub, so stale entries
    /// for ports absent from it must not survive. When `attached` is `None`
    /// (the binary protocol carries no attach events) the attached map is
    /// rebuilt from the records themselves.
    pub(crate) fn replace_ports(
        &mut self,
        notification: &DeviceNotification,
        attached: Option<&[(Port, DeviceType)]>,
    ) -> SnapshotDelta {
        let before = std::mem::take(&mut self.attached);
        self.raw_values.clear();
        self.motors.clear();
        self.distances.clear();
        self.colors.clear();
        self.forces.clear();
        self.light_matrices.clear();
        self.imu = None;
        self.display = None;

        let mut delta = SnapshotDelta::default();
        match attached {
            Some(devices) => {
                for &(port, device_type) in devices {
                    self.attached.insert(port, AttachedDevice::from(device_type));
                }
            }
            None => {
                for record in &notification.records {
                    if let Some((port, device_type)) = record.implied_device() {
                        self.attached.insert(port, AttachedDevice::from(device_type));
                    }
                }
            }
        }
        delta.attached_changed = before != self.attached;
        for record in &notification.records {
            if let Some(battery) = self.apply_record(record) {
                delta.battery = Some(battery);
            }
        }
        delta
    }

    /// Apply one record, returning the battery level if it carried one
    pub(crate) fn apply_record(&mut self, record: &DeviceRecord) -> Option<u8> {
        match *record {
            DeviceRecord::Battery { level } => {
                let level = level.min(100);
                self.battery = Some(level);
                return Some(level);
            }
            DeviceRecord::Imu {
                yaw_face,
                accelerometer,
                gyroscope,
                orientation,
                ..
            } => {
                self.imu = Some(Imu {
                    yaw_face,
                    accelerometer,
                    gyroscope,
                    orientation,
                });
            }
            DeviceRecord::Display { pixels } => self.display = Some(pixels),
            DeviceRecord::Motor {
                port,
                device_type,
                absolute_position,
                power: _,
                speed,
                position,
            } => {
                self.remove_typed(port);
                self.motors.insert(
                    port,
                    Motor {
                        device_type: DeviceType(device_type as u16),
                        speed,
                        position,
                        absolute_position,
                    },
                );
            }
            DeviceRecord::Force { port, force, pressed } => {
                self.remove_typed(port);
                self.forces.insert(port, Force { force, pressed });
            }
            DeviceRecord::Color {
                port,
                color,
                red,
                green,
                blue,
            } => {
                self.remove_typed(port);
                self.colors.insert(
                    port,
                    Color {
                        color,
                        red,
                        green,
                        blue,
                    },
                );
            }
            DeviceRecord::Distance { port, distance } => {
                self.remove_typed(port);
                self.distances.insert(port, distance);
            }
            DeviceRecord::Matrix3x3 { port, pixels } => {
                self.remove_typed(port);
                self.light_matrices.insert(port, pixels);
            }
        }
        None
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    fn remove_typed(&mut self, port: Port) {
        self.motors.remove(&port);
        self.distances.remove(&port);
        self.colors.remove(&port);
        self.forces.remove(&port);
        self.light_matrices.remove(&port);
    }

    fn remove_port_values(&mut self, port: Port) {
        self.remove_typed(port);
        self.raw_values.remove(&port);
    }

    /// How many typed maps hold `port`; the invariant keeps this ≤ 1
    #[cfg(test)]
    fn typed_entries(&self, port: Port) -> usize {
        [
            self.motors.contains_key(&port),
            self.distances.contains_key(&port),
            self.colors.contains_key(&port),
            self.forces.contains_key(&port),
            self.light_matrices.contains_key(&port),
        ]
        .iter()
        .filter(|&&present| present)
        .count()
    }
}

impl DeviceRecord {
    /// The attachment a per-port record implies, for transports without
    /// attach events. Sensor records don't carry a type byte; their record
    /// kind pins it.
    fn implied_device(&self) -> Option<(Port, DeviceType)> {
        Some(match *self {
            Self::Motor {
                port, device_type, ..
            } => (port, DeviceType(device_type as u16)),
            Self::Color { port, .. } => (port, DeviceType(0x003D)),
            Self::Distance { port, .. } => (port, DeviceType(0x003E)),
            Self::Force { port, .. } => (port, DeviceType(0x003F)),
            Self::Matrix3x3 { port, .. } => (port, DeviceType(0x0040)),
            Self::Battery { .. } | Self::Imu { .. } | Self::Display { .. } => return None,
        })
    }
}
