//! Async wrapper around the sans-IO hub state machine
//!
//! A [`Hub`] handle is cheap to clone and thread-safe. The actual state
//! machine lives in a spawned driver task that serializes transport events,
//! control requests, and timer expirations; readers get consistent copies of
//! the device model from a briefly-held mutex, never from the driver itself.

use std::sync::Arc;
use std::time::Instant;

use proto::model::DeviceSnapshot;
use proto::{Command, ConnectFailure, HubConfig, HubEvent, HubState, IoAction, TransportEvent};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info_span, trace, Instrument};

use crate::mutex::Mutex;
use crate::transport::HubTransport;

/// How many events a slow subscriber may fall behind before lagging
const EVENT_BACKLOG: usize = 256;

/// Why a [`Hub::connect`] call did not reach the connected state
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("connect attempt timed out")]
    TimedOut,
    #[error("hub offers no protocol this engine speaks")]
    NoUsableProtocol,
    #[error("transport failed: {}", .0.as_deref().unwrap_or("no reason given"))]
    Transport(Option<String>),
    #[error("hub driver is gone")]
    HubClosed,
}

impl From<ConnectFailure> for ConnectError {
    fn from(failure: ConnectFailure) -> Self {
        match failure {
            ConnectFailure::Timeout => Self::TimedOut,
            ConnectFailure::NoUsableProtocol => Self::NoUsableProtocol,
            ConnectFailure::Transport(reason) => Self::Transport(reason),
        }
    }
}

#[derive(Debug, Default)]
struct Meta {
    state: Option<HubState>,
    rssi: Option<i16>,
    name: Option<String>,
}

struct Shared {
    snapshot: Mutex<DeviceSnapshot>,
    meta: Mutex<Meta>,
    events: broadcast::Sender<HubEvent>,
}

enum Control {
    Connect,
    Disconnect,
    Send(Command),
}

/// Handle to one hub; clones share the driver
#[derive(Clone)]
pub struct Hub {
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<Control>,
}

impl Hub {
    /// Spawn a driver for `transport`, consuming its upward event channel
    ///
    /// `identifier` only labels the tracing span.
    pub fn new<T: HubTransport>(
        identifier: &str,
        config: HubConfig,
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            snapshot: Mutex::new(DeviceSnapshot::default()),
            meta: Mutex::new(Meta::default()),
            events: broadcast::channel(EVENT_BACKLOG).0,
        });
        tokio::spawn(
            drive(
                proto::Hub::new(config),
                Box::new(transport),
                events,
                control_rx,
                shared.clone(),
            )
            .instrument(info_span!("hub", id = %identifier)),
        );
        Self {
            shared,
            control: control_tx,
        }
    }

    /// Subscribe to hub events; the stream starts at the present
    pub fn events(&self) -> broadcast::Receiver<HubEvent> {
        self.shared.events.subscribe()
    }

    /// A consistent copy of the device model
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.shared.snapshot.lock("snapshot read").clone()
    }

    pub fn state(&self) -> HubState {
        self.shared
            .meta
            .lock("state read")
            .state
            .unwrap_or(HubState::Disconnected)
    }

    pub fn rssi(&self) -> Option<i16> {
        self.shared.meta.lock("rssi read").rssi
    }

    pub fn name(&self) -> Option<String> {
        self.shared.meta.lock("name read").name.clone()
    }

    /// Open the transport and wait until the hub is usable
    ///
    /// Resolves once the state machine reaches `Connected`, or with the
    /// failure that ended the attempt (including the 10 s default deadline).
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let mut events = self.events();
        if self.state() == HubState::Connected {
            return Ok(());
        }
        self.control
            .send(Control::Connect)
            .map_err(|_| ConnectError::HubClosed)?;
        loop {
            match events.recv().await {
                Ok(HubEvent::StateChanged(HubState::Connected)) => return Ok(()),
                Ok(HubEvent::ConnectFailed(failure)) => return Err(failure.into()),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.state() == HubState::Connected {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(ConnectError::HubClosed),
            }
        }
    }

    /// Begin teardown; the `StateChanged(Disconnected)` event marks completion
    pub fn disconnect(&self) {
        let _ = self.control.send(Control::Disconnect);
    }

    /// Queue a semantic command; encoding happens on the driver
    pub fn send(&self, command: Command) {
        let _ = self.control.send(Control::Send(command));
    }
}

async fn drive(
    mut hub: proto::Hub,
    transport: Box<dyn HubTransport>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut control: mpsc::UnboundedReceiver<Control>,
    shared: Arc<Shared>,
) {
    loop {
        flush(&mut hub, transport.as_ref(), &shared);
        let timeout = hub.poll_timeout();
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => hub.handle_event(Instant::now(), event),
                None => {
                    // the adapter dropped its sender; nothing more can arrive
                    hub.handle_event(
                        Instant::now(),
                        TransportEvent::Disconnected {
                            reason: Some("transport event channel closed".into()),
                        },
                    );
                    break;
                }
            },
            request = control.recv() => match request {
                Some(Control::Connect) => {
                    if let Err(error) = hub.connect(Instant::now()) {
                        debug!(%error, "connect refused");
                    }
                }
                Some(Control::Disconnect) => {
                    if let Err(error) = hub.disconnect() {
                        debug!(%error, "disconnect refused");
                    }
                }
                Some(Control::Send(command)) => hub.send(command),
                None => {
                    // every handle is gone; close the link and stop
                    let _ = hub.disconnect();
                    break;
                }
            },
            _ = tokio::time::sleep_until(
                tokio::time::Instant::from_std(timeout.unwrap_or_else(Instant::now))
            ), if timeout.is_some() => {
                hub.handle_timeout(Instant::now());
            }
        }
    }
    flush(&mut hub, transport.as_ref(), &shared);
}

/// Drain pending transport calls and events after every state machine step
fn flush(hub: &mut proto::Hub, transport: &dyn HubTransport, shared: &Shared) {
    while let Some(action) = hub.poll_io() {
        trace!(?action, "transport call");
        match action {
            IoAction::Open => transport.open(),
            IoAction::Close => transport.close(),
            IoAction::Subscribe(tag) => transport.subscribe(tag),
            IoAction::Write(transmit) => transport.write(transmit),
            IoAction::ReadRssi => transport.read_rssi(),
        }
    }

    let mut refresh_snapshot = false;
    let mut published = Vec::new();
    while let Some(event) = hub.poll() {
        match &event {
            HubEvent::StateChanged(state) => {
                shared.meta.lock("state update").state = Some(*state);
                refresh_snapshot = true;
            }
            HubEvent::AttachedDevicesChanged
            | HubEvent::DeviceDataChanged
            | HubEvent::BatteryChanged(_) => refresh_snapshot = true,
            HubEvent::RssiChanged(value) => {
                shared.meta.lock("rssi update").rssi = Some(*value);
            }
            HubEvent::NameChanged(name) => {
                shared.meta.lock("name update").name = Some(name.clone());
            }
            _ => {}
        }
        published.push(event);
    }
    if refresh_snapshot {
        // the copy is built outside the lock; the lock only covers the swap
        let snapshot = hub.snapshot();
        *shared.snapshot.lock("snapshot update") = snapshot;
    }
    // events go out only after the snapshot they describe is visible
    for event in published {
        let _ = shared.events.send(event);
    }
}
