//! Accessory-stream telemetry: one JSON object per CR/LF-terminated line
//!
//! The line channel carries the same hub state as the binary protocol, so
//! everything decodes into [`DeviceRecord`]s and flows through the one device
//! model. Telemetry objects have an integer method field `m` and a params
//! array `p`; outbound commands additionally carry a fresh UUID string `i`.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::lwp3::DeviceType;
use crate::spike::{DeviceNotification, DeviceRecord};
use crate::Port;

const METHOD_TELEMETRY: i64 = 0;
const METHOD_BATTERY: i64 = 2;
const METHOD_GESTURE: i64 = 4;

const MOTOR_TYPES: &[i64] = &[1, 2, 48, 49, 65, 75, 76];
/// Motors without a rotation sensor; their value arrays carry no position
const SIMPLE_MOTOR_TYPES: &[i64] = &[1, 2];
const LIGHT: i64 = 8;
const COLOR_DISTANCE_COMBO: i64 = 37;
const COLOR_SENSOR: i64 = 61;
const DISTANCE_SENSOR: i64 = 62;
const FORCE_SENSOR: i64 = 63;
const LIGHT_MATRIX: i64 = 64;

/// Number of external ports reported per telemetry line (A through F)
const EXTERNAL_PORTS: usize = 6;

/// One decoded telemetry line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Complete replacement state for the external ports
    Telemetry {
        attached: Vec<(Port, DeviceType)>,
        notification: DeviceNotification,
    },
    /// Charge percentage, 0..=100
    Battery(u8),
    Gesture(String),
}

/// Decode one line (without its terminator); `None` for anything that is not
/// a telemetry object this engine understands
pub fn decode_line(line: &[u8]) -> Option<LineEvent> {
    let line = std::str::from_utf8(line).ok()?.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;
    let method = value.get("m")?.as_i64()?;
    let params = value.get("p")?;
    match method {
        METHOD_TELEMETRY => Some(telemetry(params.as_array()?)),
        METHOD_BATTERY => {
            let pct = int(params.get(1)?)?.clamp(0, 100);
            Some(LineEvent::Battery(pct as u8))
        }
        METHOD_GESTURE => {
            let gesture = params
                .as_str()
                .or_else(|| params.get(0)?.as_str())?
                .to_owned();
            Some(LineEvent::Gesture(gesture))
        }
        _ => None,
    }
}

fn telemetry(ports: &[Value]) -> LineEvent {
    let mut attached = Vec::new();
    let mut records = Vec::new();
    for (index, entry) in ports.iter().take(EXTERNAL_PORTS).enumerate() {
        let port = Port(index as u8);
        let Some(device) = entry.get(0).and_then(int).filter(|&ty| ty != 0) else {
            continue;
        };
        attached.push((port, DeviceType(device as u16)));
        let empty = Vec::new();
        let values = entry
            .get(1)
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        apply_port(&mut records, port, device, values);
    }
    LineEvent::Telemetry {
        attached,
        notification: DeviceNotification {
            records,
            unknown_tag: None,
        },
    }
}

fn apply_port(records: &mut Vec<DeviceRecord>, port: Port, device: i64, values: &[Value]) {
    if device == LIGHT {
        // lights report no values worth mapping
        return;
    }
    if MOTOR_TYPES.contains(&device) {
        let position = if SIMPLE_MOTOR_TYPES.contains(&device) {
            0
        } else {
            values.get(2).and_then(int).unwrap_or(0) as i32
        };
        records.push(DeviceRecord::Motor {
            port,
            device_type: device as u8,
            absolute_position: 0,
            power: 0,
            speed: values.first().and_then(int).unwrap_or(0).clamp(-127, 127) as i8,
            position,
        });
        return;
    }
    match device {
        DISTANCE_SENSOR => records.push(DeviceRecord::Distance {
            port,
            distance: centimeters_to_mm(values.first()),
        }),
        COLOR_SENSOR => records.push(DeviceRecord::Color {
            port,
            // values[0] is reflected light, unused by the snapshot
            color: values.get(1).and_then(int).unwrap_or(-1) as i8,
            red: values.get(2).and_then(int).unwrap_or(0) as u16,
            green: values.get(3).and_then(int).unwrap_or(0) as u16,
            blue: values.get(4).and_then(int).unwrap_or(0) as u16,
        }),
        COLOR_DISTANCE_COMBO => {
            // one tuple feeds both typed maps; reflected and ambient light
            // stand in for R and G and are not colorimetric
            records.push(DeviceRecord::Distance {
                port,
                distance: centimeters_to_mm(values.get(1)),
            });
            records.push(DeviceRecord::Color {
                port,
                color: values.first().and_then(int).unwrap_or(-1) as i8,
                red: values.get(2).and_then(int).unwrap_or(0) as u16,
                green: values.get(3).and_then(int).unwrap_or(0) as u16,
                blue: 0,
            });
        }
        FORCE_SENSOR => records.push(DeviceRecord::Force {
            port,
            force: values.first().and_then(int).unwrap_or(0).clamp(0, 100) as u8,
            pressed: values.get(1).and_then(int).unwrap_or(0) != 0,
        }),
        LIGHT_MATRIX => {
            let mut pixels = [0u8; 9];
            for (pixel, value) in pixels.iter_mut().zip(values) {
                *pixel = int(value).unwrap_or(0).clamp(0, 100) as u8;
            }
            records.push(DeviceRecord::Matrix3x3 { port, pixels });
        }
        // unrecognized devices stay attached-only
        _ => {}
    }
}

/// Distance arrives in whole centimeters; the model keeps millimeters with
/// -1 for "nothing detected" (null or negative on the wire)
fn centimeters_to_mm(value: Option<&Value>) -> i16 {
    match value.and_then(int) {
        Some(cm) if cm >= 0 => (cm * 10).min(i16::MAX as i64) as i16,
        _ => -1,
    }
}

/// Integers on this channel arrive as integers, doubles, or numeric strings
fn int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

fn command(method: &str, params: Value) -> String {
    json!({
        "i": Uuid::new_v4().to_string(),
        "m": method,
        "p": params,
    })
    .to_string()
}

fn port_letter(port: Port) -> String {
    port.to_string()
}

/// Raw PWM drive of the motor on `port`
pub fn motor_pwm(port: Port, power: i8) -> String {
    command(
        "scratch.motor_pwm",
        json!({
            "port": port_letter(port),
            "power": (power as i64).clamp(-100, 100),
            "stall": false,
        }),
    )
}

/// Regulated speed drive of the motor on `port`
pub fn motor_start(port: Port, speed: i8) -> String {
    command(
        "scratch.motor_start",
        json!({
            "port": port_letter(port),
            "speed": (speed as i64).clamp(-100, 100),
            "stall": true,
        }),
    )
}

/// Stop the motor on `port`; `brake` holds it against external torque
pub fn motor_stop(port: Port, brake: bool) -> String {
    command(
        "scratch.motor_stop",
        json!({
            "port": port_letter(port),
            "stop": brake as i64,
        }),
    )
}
