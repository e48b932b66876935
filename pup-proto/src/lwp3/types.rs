//! Identifier catalogs for the LEGO Wireless Protocol v3
//!
//! Most identifier spaces on the wire are open-ended: hubs in the field emit
//! ids that postdate any catalog compiled into this crate. Identifiers are
//! therefore newtypes over their raw integer with named constants for the
//! known values, rather than exhaustive enums.

use std::fmt;

macro_rules! id_types {
    {$ty:ident: $($name:ident = $val:literal,)*} => {
        impl $ty {
            $(pub const $name: $ty = $ty($val);)*
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    $($val => f.write_str(stringify!($name)),)*
                    _ => write!(f, "{}({:#04x})", stringify!($ty), self.0)
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    $($val => f.write_str(stringify!($name)),)*
                    _ => write!(f, "<unknown {:#04x}>", self.0),
                }
            }
        }
    }
}

/// An LWP3 message type
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct MessageType(pub u8);

id_types! {
    MessageType:
    HUB_PROPERTIES = 0x01,
    HUB_ACTIONS = 0x02,
    HUB_ALERTS = 0x03,
    HUB_ATTACHED_IO = 0x04,
    GENERIC_ERROR = 0x05,
    PORT_INFORMATION_REQUEST = 0x21,
    PORT_MODE_INFORMATION_REQUEST = 0x22,
    PORT_INPUT_FORMAT_SETUP_SINGLE = 0x41,
    PORT_INPUT_FORMAT_SETUP_COMBINED = 0x42,
    PORT_INFORMATION = 0x43,
    PORT_MODE_INFORMATION = 0x44,
    PORT_VALUE_SINGLE = 0x45,
    PORT_VALUE_COMBINED = 0x46,
    PORT_INPUT_FORMAT_SINGLE = 0x47,
    PORT_INPUT_FORMAT_COMBINED = 0x48,
    VIRTUAL_PORT_SETUP = 0x61,
    PORT_OUTPUT_COMMAND = 0x81,
    PORT_OUTPUT_COMMAND_FEEDBACK = 0x82,
}

/// A hub property id (message type 0x01)
///
/// Unknown ids pass through decoding untouched so newer hubs stay readable.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct HubProperty(pub u8);

id_types! {
    HubProperty:
    ADVERTISING_NAME = 0x01,
    BUTTON = 0x02,
    FW_VERSION = 0x03,
    HW_VERSION = 0x04,
    RSSI = 0x05,
    BATTERY_VOLTAGE = 0x06,
    BATTERY_TYPE = 0x07,
    MANUFACTURER_NAME = 0x08,
    RADIO_FW_VERSION = 0x09,
    PROTOCOL_VERSION = 0x0A,
    SYSTEM_TYPE_ID = 0x0B,
    HW_NETWORK_ID = 0x0C,
    PRIMARY_MAC_ADDRESS = 0x0D,
    SECONDARY_MAC_ADDRESS = 0x0E,
    HW_NETWORK_FAMILY = 0x0F,
}

/// Operation byte accompanying a hub property id
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct PropertyOperation(pub u8);

id_types! {
    PropertyOperation:
    SET = 0x01,
    ENABLE_UPDATES = 0x02,
    DISABLE_UPDATES = 0x03,
    RESET = 0x04,
    REQUEST_UPDATE = 0x05,
    UPDATE = 0x06,
}

/// A hub alert condition (message type 0x03)
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct AlertType(pub u8);

id_types! {
    AlertType:
    LOW_VOLTAGE = 0x01,
    HIGH_CURRENT = 0x02,
    LOW_SIGNAL_STRENGTH = 0x03,
    OVER_POWER_CONDITION = 0x04,
}

/// Operation byte accompanying a hub alert
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct AlertOperation(pub u8);

id_types! {
    AlertOperation:
    ENABLE_UPDATES = 0x01,
    DISABLE_UPDATES = 0x02,
    REQUEST_UPDATE = 0x03,
    UPDATE = 0x04,
}

/// A port output sub-command (message type 0x81)
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct OutputCommand(pub u8);

id_types! {
    OutputCommand:
    START_POWER = 0x01,
    SET_ACC_TIME = 0x05,
    SET_DEC_TIME = 0x06,
    START_SPEED = 0x07,
    START_SPEED_FOR_TIME = 0x09,
    START_SPEED_FOR_DEGREES = 0x0B,
    GOTO_ABSOLUTE_POSITION = 0x0D,
    WRITE_DIRECT_MODE_DATA = 0x51,
}

/// Error codes carried by a generic error message (0x05)
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ErrorCode(pub u8);

id_types! {
    ErrorCode:
    ACK = 0x01,
    MACK = 0x02,
    BUFFER_OVERFLOW = 0x03,
    TIMEOUT = 0x04,
    COMMAND_NOT_RECOGNIZED = 0x05,
    INVALID_USE = 0x06,
    OVERCURRENT = 0x07,
    INTERNAL_ERROR = 0x08,
}

/// Port information request kinds (message type 0x21)
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct InfoType(pub u8);

id_types! {
    InfoType:
    PORT_VALUE = 0x00,
    MODE_INFO = 0x01,
    POSSIBLE_COMBINATIONS = 0x02,
}

/// Port mode information kinds (message type 0x22)
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ModeInfoType(pub u8);

id_types! {
    ModeInfoType:
    NAME = 0x00,
    RAW = 0x01,
    PCT = 0x02,
    SI = 0x03,
    SYMBOL = 0x04,
    MAPPING = 0x05,
    MOTOR_BIAS = 0x07,
    CAPABILITY_BITS = 0x08,
    VALUE_FORMAT = 0x80,
}

/// An action the hub performs on request (message type 0x02)
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum HubAction {
    SwitchOff = 0x01,
    Disconnect = 0x02,
    VccPortOn = 0x03,
    VccPortOff = 0x04,
    ActivateBusy = 0x05,
    ResetBusy = 0x06,
    Shutdown = 0x2F,
    WillSwitchOff = 0x30,
    WillDisconnect = 0x31,
    WillGoToBootMode = 0x32,
}

impl HubAction {
    pub fn from_raw(raw: u8) -> Option<Self> {
        use HubAction::*;
        Some(match raw {
            0x01 => SwitchOff,
            0x02 => Disconnect,
            0x03 => VccPortOn,
            0x04 => VccPortOff,
            0x05 => ActivateBusy,
            0x06 => ResetBusy,
            0x2F => Shutdown,
            0x30 => WillSwitchOff,
            0x31 => WillDisconnect,
            0x32 => WillGoToBootMode,
            _ => return None,
        })
    }
}

/// Attach/detach discriminator of a hub attached I/O message (0x04)
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IoEvent {
    Detached = 0x00,
    Attached = 0x01,
    AttachedVirtual = 0x02,
}

impl IoEvent {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0x00 => Self::Detached,
            0x01 => Self::Attached,
            0x02 => Self::AttachedVirtual,
            _ => return None,
        })
    }
}

/// What a motor does with leftover momentum when a command completes
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EndState {
    Float = 0,
    Hold = 126,
    Brake = 127,
}

impl EndState {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Float,
            126 => Self::Hold,
            127 => Self::Brake,
            _ => return None,
        })
    }
}

/// Feedback bitfield from a port output command feedback message (0x82)
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Feedback(pub u8);

impl Feedback {
    pub fn in_progress(self) -> bool {
        self.0 & 0x01 != 0
    }
    pub fn completed(self) -> bool {
        self.0 & 0x02 != 0
    }
    pub fn discarded(self) -> bool {
        self.0 & 0x04 != 0
    }
    pub fn idle(self) -> bool {
        self.0 & 0x08 != 0
    }
    pub fn busy(self) -> bool {
        self.0 & 0x10 != 0
    }
}

impl fmt::Debug for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Feedback({:#04x})", self.0)
    }
}

/// Broad behavioral class of an attached device
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DeviceCategory {
    Motor,
    Sensor,
    Light,
    HubInternal,
    Unknown,
}

/// The raw 16-bit device type id reported by attached I/O events
///
/// The id space is sparse and grows with every hub generation, so this is a
/// lookup into a static catalog rather than an enum. Ids missing from the
/// catalog answer [`DeviceCategory::Unknown`] and render as `Device(0xNNNN)`.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct DeviceType(pub u16);

use DeviceCategory::{HubInternal, Light, Motor, Sensor};

static DEVICE_CATALOG: &[(u16, DeviceCategory, &str)] = &[
    (0x0001, Motor, "WeDo 2.0 Medium Motor"),
    (0x0002, Motor, "Train Motor"),
    (0x0008, Light, "Light"),
    (0x0014, HubInternal, "Voltage Sensor"),
    (0x0015, HubInternal, "Current Sensor"),
    (0x0016, HubInternal, "Piezo Tone"),
    (0x0017, HubInternal, "Hub Status Light"),
    (0x0022, Sensor, "WeDo 2.0 Tilt Sensor"),
    (0x0023, Sensor, "WeDo 2.0 Motion Sensor"),
    (0x0025, Sensor, "Color & Distance Sensor"),
    (0x0026, Motor, "BOOST Interactive Motor"),
    (0x0027, Motor, "BOOST Built-in Motor"),
    (0x0028, HubInternal, "BOOST Tilt Sensor"),
    (0x0029, Motor, "DUPLO Train Motor"),
    (0x002A, HubInternal, "DUPLO Train Speaker"),
    (0x002B, Sensor, "DUPLO Train Color Sensor"),
    (0x002C, Sensor, "DUPLO Train Speedometer"),
    (0x002E, Motor, "Technic Large Motor"),
    (0x002F, Motor, "Technic XL Motor"),
    (0x0030, Motor, "Medium Angular Motor"),
    (0x0031, Motor, "Large Angular Motor"),
    (0x0036, HubInternal, "Gesture Sensor"),
    (0x0037, HubInternal, "Remote Control Button"),
    (0x0038, HubInternal, "Remote Control RSSI"),
    (0x0039, HubInternal, "Accelerometer"),
    (0x003A, HubInternal, "Gyro Sensor"),
    (0x003B, HubInternal, "Tilt Sensor"),
    (0x003C, HubInternal, "Temperature Sensor"),
    (0x003D, Sensor, "Color Sensor"),
    (0x003E, Sensor, "Distance Sensor"),
    (0x003F, Sensor, "Force Sensor"),
    (0x0040, Light, "3x3 Color Light Matrix"),
    (0x0041, Motor, "Small Angular Motor"),
    (0x004B, Motor, "Technic Medium Angular Motor"),
    (0x004C, Motor, "Technic Large Angular Motor"),
];

impl DeviceType {
    fn entry(self) -> Option<&'static (u16, DeviceCategory, &'static str)> {
        DEVICE_CATALOG.iter().find(|(id, _, _)| *id == self.0)
    }

    pub fn category(self) -> DeviceCategory {
        self.entry()
            .map_or(DeviceCategory::Unknown, |(_, category, _)| *category)
    }

    /// Human label, or `None` for ids missing from the catalog
    pub fn label(self) -> Option<&'static str> {
        self.entry().map(|(_, _, label)| *label)
    }
}

impl fmt::Debug for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => f.write_str(label),
            None => write!(f, "Device({:#06x})", self.0),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
