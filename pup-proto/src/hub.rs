//! Per-hub runtime: protocol selection, subscription bootstrap, and the
//! projection of inbound frames onto the device model
//!
//! [`Hub`] performs no I/O. The owning driver feeds it [`TransportEvent`]s
//! and timeouts, and drains [`IoAction`]s (downward transport calls) and
//! [`HubEvent`]s (application-facing notifications) after every call.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::coding;
use crate::lwp3::{self, AttachedIo, Message, PropertyOperation};
use crate::model::DeviceSnapshot;
use crate::spike::{self, cobs, json, InfoResponse, Notification};
use crate::timer::{Timer, TimerTable};
use crate::{
    CharTag, Port, LWP3_CHARACTERISTIC, LWP3_SERVICE, SPIKE_RX_CHARACTERISTIC, SPIKE_SERVICE,
    SPIKE_TX_CHARACTERISTIC,
};

/// Parameters governing one hub's runtime behavior
///
/// The defaults match the hubs in the field; they rarely need tuning outside
/// tests.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub(crate) kind: TransportKind,
    pub(crate) connect_timeout: Duration,
    pub(crate) rssi_interval: Duration,
    pub(crate) battery_event_interval: Duration,
    pub(crate) notification_interval_ms: u16,
    pub(crate) initial_max_packet: usize,
}

impl HubConfig {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            connect_timeout: Duration::from_secs(10),
            rssi_interval: Duration::from_secs(5),
            battery_event_interval: Duration::from_secs(120),
            notification_interval_ms: 5000,
            initial_max_packet: 20,
        }
    }

    /// How long a `connect()` may take before the transport is closed
    pub fn connect_timeout(&mut self, value: Duration) -> &mut Self {
        self.connect_timeout = value;
        self
    }

    /// How often to ask the transport for a signal-strength reading
    pub fn rssi_interval(&mut self, value: Duration) -> &mut Self {
        self.rssi_interval = value;
        self
    }

    /// Ceiling between repeated battery events for an unchanged reading
    pub fn battery_event_interval(&mut self, value: Duration) -> &mut Self {
        self.battery_event_interval = value;
        self
    }

    /// Reporting interval requested from SPIKE hubs
    pub fn notification_interval_ms(&mut self, value: u16) -> &mut Self {
        self.notification_interval_ms = value;
        self
    }

    /// Chunk size used before the hub reports its own maximum packet size
    pub fn initial_max_packet(&mut self, value: usize) -> &mut Self {
        self.initial_max_packet = value.max(1);
        self
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::new(TransportKind::Ble)
    }
}

/// The flavor of byte transport behind a hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// GATT characteristics; the protocol is chosen from discovered services
    Ble,
    /// A line-oriented accessory stream, always speaking JSON telemetry
    Line,
}

/// Connection lifecycle; cyclic except at teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Wire dialect bound after service discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Lwp3Ble,
    SpikeBinary,
    SpikeJson,
}

/// One GATT service presented by the transport after discovery
#[derive(Debug, Clone)]
pub struct DiscoveredService {
    pub service: Uuid,
    pub characteristics: Vec<Characteristic>,
}

/// A characteristic within a [`DiscoveredService`], with role hints
#[derive(Debug, Clone)]
pub struct Characteristic {
    pub id: Uuid,
    pub tag: CharTag,
    pub write: bool,
    pub notify: bool,
}

/// Everything a transport can tell the hub
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    ServicesDiscovered(Vec<DiscoveredService>),
    FrameReceived { tag: CharTag, bytes: Bytes },
    LineReceived(Bytes),
    Disconnected { reason: Option<String> },
    RssiUpdate(i16),
}

/// GATT write flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
    /// Append to the accessory stream; no characteristic involved
    Line,
}

/// One outbound write
#[derive(Debug, Clone)]
pub struct Transmit {
    /// Target characteristic; `None` on the line transport
    pub tag: Option<CharTag>,
    pub mode: WriteMode,
    pub payload: Bytes,
}

/// Downward call the driver must relay to its transport
#[derive(Debug, Clone)]
pub enum IoAction {
    Open,
    Close,
    Subscribe(CharTag),
    Write(Transmit),
    ReadRssi,
}

/// Application-facing notifications drained via [`Hub::poll`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    StateChanged(HubState),
    AttachedDevicesChanged,
    DeviceDataChanged,
    BatteryChanged(u8),
    RssiChanged(i16),
    NameChanged(String),
    /// Services were discovered but none this engine can speak
    NoUsableProtocol,
    /// A connect attempt ended without reaching the connected state
    ConnectFailed(ConnectFailure),
    /// Text the hub printed on its console channel
    Console(String),
    Diagnostic(Diagnostic),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    Timeout,
    NoUsableProtocol,
    Transport(Option<String>),
}

/// Non-fatal anomalies, surfaced rather than swallowed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The current transport cannot express this command
    UnsupportedCommand { command: &'static str },
    MalformedFrame,
    UnknownMessage { ty: u8 },
    UnknownRecord { tag: u8 },
    HubAlert {
        alert: lwp3::AlertType,
        payload: Bytes,
    },
    GenericError {
        command: lwp3::MessageType,
        code: lwp3::ErrorCode,
    },
}

/// A semantic command, encoded per the bound protocol on submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartPower { port: Port, power: i8 },
    Brake { port: Port },
    Float { port: Port },
    StartSpeed {
        port: Port,
        speed: i8,
        max_power: u8,
        use_profile: u8,
    },
    StartSpeedForTime {
        port: Port,
        time_ms: u16,
        speed: i8,
        max_power: u8,
        end_state: lwp3::EndState,
    },
    StartSpeedForDegrees {
        port: Port,
        degrees: u32,
        speed: i8,
        max_power: u8,
        end_state: lwp3::EndState,
    },
    GotoAbsolutePosition {
        port: Port,
        position: i32,
        speed: i8,
        max_power: u8,
        end_state: lwp3::EndState,
    },
    SetLedColor { port: Port, color: u8 },
    SetLedRgb {
        port: Port,
        red: u8,
        green: u8,
        blue: u8,
    },
    CreateVirtualPort { port_a: Port, port_b: Port },
    DisconnectVirtualPort { port: Port },
    HubAction(lwp3::HubAction),
    SetName(String),
    /// SPIKE program control: start (`stop == false`) or stop `slot`
    ProgramFlow { stop: bool, slot: u8 },
    /// SPIKE slot erase
    ClearSlot { slot: u8 },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::StartPower { .. } => "start_power",
            Self::Brake { .. } => "brake",
            Self::Float { .. } => "float",
            Self::StartSpeed { .. } => "start_speed",
            Self::StartSpeedForTime { .. } => "start_speed_for_time",
            Self::StartSpeedForDegrees { .. } => "start_speed_for_degrees",
            Self::GotoAbsolutePosition { .. } => "goto_absolute_position",
            Self::SetLedColor { .. } => "set_led_color",
            Self::SetLedRgb { .. } => "set_led_rgb",
            Self::CreateVirtualPort { .. } => "create_virtual_port",
            Self::DisconnectVirtualPort { .. } => "disconnect_virtual_port",
            Self::HubAction(_) => "hub_action",
            Self::SetName(_) => "set_name",
            Self::ProgramFlow { .. } => "program_flow",
            Self::ClearSlot { .. } => "clear_slot",
        }
    }
}

/// The requested operation is not legal in the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation invalid in the {0:?} state")]
pub struct InvalidState(pub HubState);

/// Battery events are throttled: the first nonzero reading always fires,
/// then only changes or a periodic refresh of an unchanged value.
#[derive(Debug, Default)]
struct BatteryDampener {
    last_value: Option<u8>,
    last_emit: Option<Instant>,
}

impl BatteryDampener {
    fn should_emit(&mut self, now: Instant, value: u8, interval: Duration) -> bool {
        let emit = match (self.last_value, self.last_emit) {
            (None, _) => value > 0,
            (Some(last), Some(at)) => value != last || now.duration_since(at) >= interval,
            (Some(last), None) => value != last,
        };
        if emit {
            self.last_value = Some(value);
            self.last_emit = Some(now);
        }
        emit
    }
}

/// The per-hub state machine
pub struct Hub {
    config: HubConfig,
    state: HubState,
    protocol: Option<Protocol>,
    write_char: Option<CharTag>,
    limits: Option<InfoResponse>,
    snapshot: DeviceSnapshot,
    /// SPIKE frame reassembly across GATT notifications
    rx_buf: BytesMut,
    /// Accessory stream reassembly up to line terminators
    line_buf: BytesMut,
    events: VecDeque<HubEvent>,
    io: VecDeque<IoAction>,
    timers: TimerTable,
    battery: BatteryDampener,
    rssi: Option<i16>,
    name: Option<String>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            state: HubState::Disconnected,
            protocol: None,
            write_char: None,
            limits: None,
            snapshot: DeviceSnapshot::default(),
            rx_buf: BytesMut::new(),
            line_buf: BytesMut::new(),
            events: VecDeque::new(),
            io: VecDeque::new(),
            timers: TimerTable::default(),
            battery: BatteryDampener::default(),
            rssi: None,
            name: None,
        }
    }

    pub fn state(&self) -> HubState {
        self.state
    }

    /// The dialect bound after service discovery, once connected
    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    /// Negotiated SPIKE limits, once an info response arrived
    pub fn limits(&self) -> Option<&InfoResponse> {
        self.limits.as_ref()
    }

    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// A consistent copy of the device model
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.clone()
    }

    /// Begin a connect attempt; legal from the disconnected (or still
    /// tearing-down) states only
    pub fn connect(&mut self, now: Instant) -> Result<(), InvalidState> {
        match self.state {
            HubState::Disconnected | HubState::Disconnecting => {}
            state => return Err(InvalidState(state)),
        }
        self.reset_session();
        self.set_state(HubState::Connecting);
        self.timers[Timer::Connect] = Some(now + self.config.connect_timeout);
        self.io.push_back(IoAction::Open);
        Ok(())
    }

    /// Tear the connection down; idempotent once disconnecting
    pub fn disconnect(&mut self) -> Result<(), InvalidState> {
        match self.state {
            HubState::Connected | HubState::Connecting => {}
            state => return Err(InvalidState(state)),
        }
        self.begin_close();
        Ok(())
    }

    /// Earliest pending timer, for the driver to sleep until
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.timers.next_timeout()
    }

    /// Process timers that have expired at `now`
    pub fn handle_timeout(&mut self, now: Instant) {
        if self.timers.poll(Timer::Connect, now) && self.state == HubState::Connecting {
            warn!("connect deadline elapsed");
            self.events
                .push_back(HubEvent::ConnectFailed(ConnectFailure::Timeout));
            self.begin_close();
        }
        if self.timers.poll(Timer::Rssi, now) && self.state == HubState::Connected {
            self.io.push_back(IoAction::ReadRssi);
            self.timers[Timer::Rssi] = Some(now + self.config.rssi_interval);
        }
    }

    /// Drain one application event
    pub fn poll(&mut self) -> Option<HubEvent> {
        self.events.pop_front()
    }

    /// Drain one transport call the driver must perform
    pub fn poll_io(&mut self) -> Option<IoAction> {
        self.io.pop_front()
    }

    /// Feed one upward transport event
    pub fn handle_event(&mut self, now: Instant, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_transport_connected(now),
            TransportEvent::ServicesDiscovered(services) => self.on_services(now, &services),
            TransportEvent::FrameReceived { tag, bytes } => self.on_frame(now, tag, bytes),
            TransportEvent::LineReceived(bytes) => self.on_line_bytes(now, &bytes),
            TransportEvent::Disconnected { reason } => self.on_transport_disconnected(reason),
            TransportEvent::RssiUpdate(value) => self.update_rssi(value),
        }
    }

    /// Encode and queue a semantic command for the bound protocol
    ///
    /// Commands the protocol cannot express are dropped with a
    /// [`Diagnostic::UnsupportedCommand`] event.
    pub fn send(&mut self, command: Command) {
        match self.protocol {
            Some(Protocol::Lwp3Ble) => self.send_lwp3(command),
            Some(Protocol::SpikeBinary) => self.send_spike_command(command),
            Some(Protocol::SpikeJson) => self.send_json(command),
            None => {
                warn!(command = command.name(), "dropping command: no protocol bound");
                self.unsupported(command.name());
            }
        }
    }

    fn on_transport_connected(&mut self, now: Instant) {
        if self.state != HubState::Connecting {
            trace!("transport connected outside a connect attempt");
            return;
        }
        if self.config.kind == TransportKind::Line {
            // accessory streams have no services to discover and stream
            // telemetry unsolicited
            self.protocol = Some(Protocol::SpikeJson);
            self.finish_connect(now);
        }
    }

    fn on_services(&mut self, now: Instant, services: &[DiscoveredService]) {
        if self.state != HubState::Connecting || self.config.kind != TransportKind::Ble {
            trace!("ignoring service discovery in {:?}", self.state);
            return;
        }
        let Some((protocol, write, notify)) = select_protocol(services) else {
            debug!("no usable protocol among {} services", services.len());
            self.events.push_back(HubEvent::NoUsableProtocol);
            self.events
                .push_back(HubEvent::ConnectFailed(ConnectFailure::NoUsableProtocol));
            self.begin_close();
            return;
        };
        debug!(?protocol, "protocol selected");
        self.protocol = Some(protocol);
        self.write_char = Some(write);
        self.io.push_back(IoAction::Subscribe(notify));
        self.finish_connect(now);
        match protocol {
            Protocol::Lwp3Ble => {
                self.write_frame(lwp3::hub_property_request(
                    lwp3::HubProperty::BATTERY_VOLTAGE,
                ));
                self.write_frame(lwp3::hub_property_enable_updates(
                    lwp3::HubProperty::BATTERY_VOLTAGE,
                ));
            }
            Protocol::SpikeBinary => self.write_spike(&spike::info_request()),
            Protocol::SpikeJson => unreachable!("not selectable from services"),
        }
    }

    fn finish_connect(&mut self, now: Instant) {
        self.timers[Timer::Connect] = None;
        if self.config.kind == TransportKind::Ble {
            self.io.push_back(IoAction::ReadRssi);
            self.timers[Timer::Rssi] = Some(now + self.config.rssi_interval);
        }
        self.set_state(HubState::Connected);
    }

    fn on_transport_disconnected(&mut self, reason: Option<String>) {
        if self.state == HubState::Disconnected {
            return;
        }
        debug!(?reason, "transport closed");
        if self.state == HubState::Connecting {
            self.events
                .push_back(HubEvent::ConnectFailed(ConnectFailure::Transport(reason)));
        }
        self.reset_session();
        self.set_state(HubState::Disconnected);
        self.events.push_back(HubEvent::AttachedDevicesChanged);
        self.events.push_back(HubEvent::DeviceDataChanged);
    }

    fn on_frame(&mut self, now: Instant, tag: CharTag, bytes: Bytes) {
        let _ = tag;
        match self.protocol {
            Some(Protocol::Lwp3Ble) => self.on_lwp3_frame(now, &bytes),
            Some(Protocol::SpikeBinary) => self.on_spike_bytes(now, &bytes),
            _ => trace!("frame before protocol selection dropped"),
        }
    }

    fn on_lwp3_frame(&mut self, now: Instant, bytes: &[u8]) {
        let message = match Message::decode(bytes) {
            Ok(message) => message,
            Err(_) => {
                warn!("malformed frame: {}", coding::hex(bytes));
                self.events
                    .push_back(HubEvent::Diagnostic(Diagnostic::MalformedFrame));
                return;
            }
        };
        trace!(?message, "rx");
        match message {
            Message::HubProperty {
                property,
                operation,
                payload,
            } if operation == PropertyOperation::UPDATE => {
                self.on_property_update(now, property, &payload)
            }
            Message::HubProperty { .. } => {}
            Message::AttachedIo(event) => self.on_attached_io(event),
            Message::PortValueSingle { port, payload } => {
                self.snapshot.set_raw_value(port, payload);
                self.events.push_back(HubEvent::DeviceDataChanged);
            }
            Message::PortValueCombined { port, payload, .. } => {
                self.snapshot.set_raw_value(port, payload);
                self.events.push_back(HubEvent::DeviceDataChanged);
            }
            Message::HubAlert {
                alert, payload, ..
            } => {
                warn!(%alert, "hub alert");
                self.events
                    .push_back(HubEvent::Diagnostic(Diagnostic::HubAlert { alert, payload }));
            }
            Message::GenericError { command, code } => {
                warn!(%command, %code, "hub rejected a command");
                self.events
                    .push_back(HubEvent::Diagnostic(Diagnostic::GenericError {
                        command,
                        code,
                    }));
            }
            Message::HubAction(action) => debug!(?action, "hub action notice"),
            Message::PortOutputFeedback(_)
            | Message::PortInformation { .. }
            | Message::PortModeInformation { .. }
            | Message::PortInputFormatSingle { .. } => {}
            Message::Unknown { ty, .. } => {
                trace!(%ty, "unknown message type");
                self.events
                    .push_back(HubEvent::Diagnostic(Diagnostic::UnknownMessage { ty: ty.0 }));
            }
            // request-direction messages a hub should never send us
            _ => trace!(?message, "unexpected inbound message"),
        }
    }

    fn on_property_update(&mut self, now: Instant, property: lwp3::HubProperty, payload: &[u8]) {
        match property {
            lwp3::HubProperty::BATTERY_VOLTAGE => {
                if let Some(&level) = payload.first() {
                    self.update_battery(now, level);
                }
            }
            lwp3::HubProperty::ADVERTISING_NAME => {
                let name = String::from_utf8_lossy(payload).into_owned();
                if self.name.as_deref() != Some(&name) {
                    self.name = Some(name.clone());
                    self.events.push_back(HubEvent::NameChanged(name));
                }
            }
            lwp3::HubProperty::RSSI => {
                if let Some(&raw) = payload.first() {
                    self.update_rssi(raw as i8 as i16);
                }
            }
            _ => trace!(%property, "unhandled property update"),
        }
    }

    fn on_attached_io(&mut self, event: AttachedIo) {
        match event {
            AttachedIo::Detached { port } => {
                debug!(%port, "detached");
                if self.snapshot.detach(port) {
                    self.events.push_back(HubEvent::AttachedDevicesChanged);
                    self.events.push_back(HubEvent::DeviceDataChanged);
                }
            }
            AttachedIo::Attached { port, device, .. }
            | AttachedIo::AttachedVirtual { port, device, .. } => {
                debug!(%port, %device, "attached");
                if self.snapshot.attach(port, device) {
                    self.events.push_back(HubEvent::AttachedDevicesChanged);
                }
                if !port.is_internal() {
                    // stream mode 0 with the finest delta so the value cache
                    // stays current
                    self.write_frame(lwp3::port_input_format_setup(port, 0, 1, true));
                }
            }
        }
    }

    fn on_spike_bytes(&mut self, now: Instant, bytes: &[u8]) {
        self.rx_buf.extend_from_slice(bytes);
        while let Some(end) = self.rx_buf.iter().position(|&b| b == cobs::DELIMITER) {
            let frame = self.rx_buf.split_to(end + 1);
            let payload = cobs::unpack(&frame);
            if payload.is_empty() {
                continue;
            }
            match Notification::decode(Bytes::from(payload)) {
                Ok(notification) => self.on_spike_notification(now, notification),
                Err(_) => {
                    warn!("undecodable spike frame: {}", coding::hex(&frame));
                    self.events
                        .push_back(HubEvent::Diagnostic(Diagnostic::MalformedFrame));
                }
            }
        }
    }

    fn on_spike_notification(&mut self, now: Instant, notification: Notification) {
        match notification {
            Notification::Info(info) => {
                debug!(
                    max_packet = info.max_packet_size,
                    "info response, firmware {}.{}.{}",
                    info.firmware_major,
                    info.firmware_minor,
                    info.firmware_build,
                );
                self.limits = Some(info);
                self.write_spike(&spike::device_notification_request(
                    self.config.notification_interval_ms,
                ));
            }
            Notification::Device(notification) => {
                if let Some(tag) = notification.unknown_tag {
                    trace!(tag, "device notification walk ended at unknown record");
                    self.events
                        .push_back(HubEvent::Diagnostic(Diagnostic::UnknownRecord { tag }));
                }
                let delta = self.snapshot.replace_ports(&notification, None);
                if delta.attached_changed {
                    self.events.push_back(HubEvent::AttachedDevicesChanged);
                }
                if let Some(level) = delta.battery {
                    self.emit_battery(now, level);
                }
                self.events.push_back(HubEvent::DeviceDataChanged);
            }
            Notification::Console(text) => self.events.push_back(HubEvent::Console(text)),
            Notification::Unknown { tag, .. } => {
                trace!(tag, "unknown notification");
                self.events
                    .push_back(HubEvent::Diagnostic(Diagnostic::UnknownMessage { ty: tag }));
            }
        }
    }

    fn on_line_bytes(&mut self, now: Instant, bytes: &[u8]) {
        if self.protocol != Some(Protocol::SpikeJson) {
            trace!("line data outside the json protocol dropped");
            return;
        }
        self.line_buf.extend_from_slice(bytes);
        while let Some(end) = self
            .line_buf
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
        {
            let line = self.line_buf.split_to(end + 1);
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            match json::decode_line(line) {
                Some(json::LineEvent::Telemetry {
                    attached,
                    notification,
                }) => {
                    let delta = self.snapshot.replace_ports(&notification, Some(&attached));
                    if delta.attached_changed {
                        self.events.push_back(HubEvent::AttachedDevicesChanged);
                    }
                    self.events.push_back(HubEvent::DeviceDataChanged);
                }
                Some(json::LineEvent::Battery(level)) => self.update_battery(now, level),
                Some(json::LineEvent::Gesture(gesture)) => {
                    self.snapshot.gesture = Some(gesture);
                    self.events.push_back(HubEvent::DeviceDataChanged);
                }
                None => trace!("unhandled line"),
            }
        }
    }

    fn send_lwp3(&mut self, command: Command) {
        let frame = match command {
            Command::StartPower { port, power } => lwp3::start_power(port, power),
            Command::Brake { port } => lwp3::brake(port),
            Command::Float { port } => lwp3::float(port),
            Command::StartSpeed {
                port,
                speed,
                max_power,
                use_profile,
            } => lwp3::start_speed(port, speed, max_power, use_profile),
            Command::StartSpeedForTime {
                port,
                time_ms,
                speed,
                max_power,
                end_state,
            } => lwp3::start_speed_for_time(port, time_ms, speed, max_power, end_state, 0),
            Command::StartSpeedForDegrees {
                port,
                degrees,
                speed,
                max_power,
                end_state,
            } => lwp3::start_speed_for_degrees(port, degrees, speed, max_power, end_state, 0),
            Command::GotoAbsolutePosition {
                port,
                position,
                speed,
                max_power,
                end_state,
            } => lwp3::goto_absolute_position(port, position, speed, max_power, end_state, 0),
            Command::SetLedColor { port, color } => lwp3::hub_led_color(port, color),
            Command::SetLedRgb {
                port,
                red,
                green,
                blue,
            } => lwp3::hub_led_rgb(port, red, green, blue),
            Command::CreateVirtualPort { port_a, port_b } => {
                lwp3::create_virtual_port(port_a, port_b)
            }
            Command::DisconnectVirtualPort { port } => lwp3::disconnect_virtual_port(port),
            Command::HubAction(action) => lwp3::hub_action(action),
            Command::SetName(ref name) => {
                lwp3::hub_property_set(lwp3::HubProperty::ADVERTISING_NAME, name.as_bytes())
            }
            Command::ProgramFlow { .. } | Command::ClearSlot { .. } => {
                return self.unsupported(command.name())
            }
        };
        self.write_frame(frame);
    }

    fn send_spike_command(&mut self, command: Command) {
        let payload = match command {
            Command::ProgramFlow { stop, slot } => spike::program_flow_request(stop, slot),
            Command::ClearSlot { slot } => spike::clear_slot(slot),
            Command::SetName(ref name) => spike::set_hub_name(name),
            _ => return self.unsupported(command.name()),
        };
        self.write_spike(&payload);
    }

    fn send_json(&mut self, command: Command) {
        let line = match command {
            Command::StartPower { port, power } => {
                if power == 0 {
                    json::motor_stop(port, true)
                } else {
                    json::motor_pwm(port, power)
                }
            }
            Command::StartSpeed { port, speed, .. } => {
                if speed == 0 {
                    json::motor_stop(port, true)
                } else {
                    json::motor_start(port, speed)
                }
            }
            Command::Brake { port } => json::motor_stop(port, true),
            Command::Float { port } => json::motor_stop(port, false),
            _ => return self.unsupported(command.name()),
        };
        let mut payload = line.into_bytes();
        payload.push(b'\r');
        self.io.push_back(IoAction::Write(Transmit {
            tag: None,
            mode: WriteMode::Line,
            payload: payload.into(),
        }));
    }

    fn write_frame(&mut self, frame: Bytes) {
        self.io.push_back(IoAction::Write(Transmit {
            tag: self.write_char,
            mode: WriteMode::WithoutResponse,
            payload: frame,
        }));
    }

    /// Pack and chunk one SPIKE message to the negotiated packet size
    fn write_spike(&mut self, payload: &[u8]) {
        let packed = cobs::pack(payload);
        let max = self
            .limits
            .map(|limits| limits.max_packet_size as usize)
            .unwrap_or(self.config.initial_max_packet)
            .max(1);
        for chunk in packed.chunks(max) {
            self.io.push_back(IoAction::Write(Transmit {
                tag: self.write_char,
                mode: WriteMode::WithoutResponse,
                payload: Bytes::copy_from_slice(chunk),
            }));
        }
    }

    fn unsupported(&mut self, command: &'static str) {
        debug!(command, "unsupported on this transport");
        self.events
            .push_back(HubEvent::Diagnostic(Diagnostic::UnsupportedCommand {
                command,
            }));
    }

    fn update_battery(&mut self, now: Instant, level: u8) {
        let level = level.min(100);
        self.snapshot.battery = Some(level);
        self.emit_battery(now, level);
    }

    fn emit_battery(&mut self, now: Instant, level: u8) {
        if self
            .battery
            .should_emit(now, level, self.config.battery_event_interval)
        {
            self.events.push_back(HubEvent::BatteryChanged(level));
        }
    }

    fn update_rssi(&mut self, value: i16) {
        if self.rssi != Some(value) {
            self.rssi = Some(value);
            self.events.push_back(HubEvent::RssiChanged(value));
        }
    }

    fn begin_close(&mut self) {
        self.timers.stop_all();
        self.set_state(HubState::Disconnecting);
        self.io.push_back(IoAction::Close);
    }

    /// Forget everything tied to one transport session
    fn reset_session(&mut self) {
        self.protocol = None;
        self.write_char = None;
        self.limits = None;
        self.snapshot.clear();
        self.rx_buf.clear();
        self.line_buf.clear();
        self.battery = BatteryDampener::default();
        self.timers.stop_all();
    }

    fn set_state(&mut self, state: HubState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "state");
            self.state = state;
            self.events.push_back(HubEvent::StateChanged(state));
        }
    }
}

/// Pick the dialect for a discovered service catalog: SPIKE first, then
/// LWP3. Returns the protocol with its write and notify characteristics.
fn select_protocol(services: &[DiscoveredService]) -> Option<(Protocol, CharTag, CharTag)> {
    if let Some(service) = services.iter().find(|s| s.service == SPIKE_SERVICE) {
        let write = service
            .characteristics
            .iter()
            .find(|c| c.id == SPIKE_RX_CHARACTERISTIC && c.write);
        let notify = service
            .characteristics
            .iter()
            .find(|c| c.id == SPIKE_TX_CHARACTERISTIC && c.notify);
        if let (Some(write), Some(notify)) = (write, notify) {
            return Some((Protocol::SpikeBinary, write.tag, notify.tag));
        }
    }
    services
        .iter()
        .filter(|s| s.service == LWP3_SERVICE)
        .flat_map(|s| &s.characteristics)
        .find(|c| c.id == LWP3_CHARACTERISTIC)
        .map(|c| (Protocol::Lwp3Ble, c.tag, c.tag))
}
