use std::time::{Duration, Instant};

use bytes::Bytes;

use super::*;

pub(super) fn subscribe() -> tracing::subscriber::DefaultGuard {
    let sub = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(sub)
}

pub(super) const LWP3_TAG: CharTag = CharTag(1);
pub(super) const SPIKE_RX_TAG: CharTag = CharTag(2);
pub(super) const SPIKE_TX_TAG: CharTag = CharTag(3);

/// A hub plus a scripted clock, driving the state machine without a
/// transport
pub(super) struct TestHub {
    pub(super) hub: Hub,
    pub(super) now: Instant,
}

impl TestHub {
    pub(super) fn new(kind: TransportKind) -> Self {
        Self {
            hub: Hub::new(HubConfig::new(kind)),
            now: Instant::now(),
        }
    }

    pub(super) fn advance(&mut self, duration: Duration) {
        self.now += duration;
        self.hub.handle_timeout(self.now);
    }

    pub(super) fn event(&mut self, event: TransportEvent) {
        self.hub.handle_event(self.now, event);
    }

    pub(super) fn frame(&mut self, tag: CharTag, bytes: &[u8]) {
        self.event(TransportEvent::FrameReceived {
            tag,
            bytes: Bytes::copy_from_slice(bytes),
        });
    }

    pub(super) fn line(&mut self, text: &str) {
        self.event(TransportEvent::LineReceived(Bytes::copy_from_slice(
            text.as_bytes(),
        )));
    }

    pub(super) fn events(&mut self) -> Vec<HubEvent> {
        std::iter::from_fn(|| self.hub.poll()).collect()
    }

    pub(super) fn io(&mut self) -> Vec<IoAction> {
        std::iter::from_fn(|| self.hub.poll_io()).collect()
    }

    /// Drain the io queue down to write payloads
    pub(super) fn writes(&mut self) -> Vec<Bytes> {
        self.io()
            .into_iter()
            .filter_map(|action| match action {
                IoAction::Write(transmit) => Some(transmit.payload),
                _ => None,
            })
            .collect()
    }

    /// Connect and complete LWP3 service discovery, draining the bootstrap
    pub(super) fn connect_lwp3(&mut self) {
        self.hub.connect(self.now).unwrap();
        self.event(TransportEvent::Connected);
        self.event(TransportEvent::ServicesDiscovered(lwp3_services()));
        assert_eq!(self.hub.state(), HubState::Connected);
        self.events();
        self.io();
    }

    /// Connect, bind SPIKE, and feed the info response so limits are known
    pub(super) fn connect_spike(&mut self, info: &spike::InfoResponse) {
        self.hub.connect(self.now).unwrap();
        self.event(TransportEvent::Connected);
        self.event(TransportEvent::ServicesDiscovered(spike_services()));
        assert_eq!(self.hub.state(), HubState::Connected);
        let wire = cobs::pack(&spike::test_encode::info_response(info));
        self.frame(SPIKE_TX_TAG, &wire);
        assert_eq!(self.hub.limits(), Some(info));
        self.events();
        self.io();
    }

    /// Connect the accessory stream; no discovery, no bootstrap
    pub(super) fn connect_line(&mut self) {
        self.hub.connect(self.now).unwrap();
        self.event(TransportEvent::Connected);
        assert_eq!(self.hub.state(), HubState::Connected);
        assert_eq!(self.hub.protocol(), Some(Protocol::SpikeJson));
        self.events();
        self.io();
    }

    /// Deliver a device notification, split at `split` to exercise frame
    /// reassembly
    pub(super) fn spike_notify(&mut self, records: &[Vec<u8>], split: usize) {
        let wire = cobs::pack(&spike::test_encode::device_notification(records));
        let split = split.min(wire.len());
        self.frame(SPIKE_TX_TAG, &wire[..split]);
        self.frame(SPIKE_TX_TAG, &wire[split..]);
    }
}

pub(super) fn lwp3_services() -> Vec<DiscoveredService> {
    vec![DiscoveredService {
        service: LWP3_SERVICE,
        characteristics: vec![Characteristic {
            id: LWP3_CHARACTERISTIC,
            tag: LWP3_TAG,
            write: true,
            notify: true,
        }],
    }]
}

pub(super) fn spike_services() -> Vec<DiscoveredService> {
    vec![
        // hubs expose generic services alongside; selection must skip them
        DiscoveredService {
            service: uuid::uuid!("0000180a-0000-1000-8000-00805f9b34fb"),
            characteristics: Vec::new(),
        },
        DiscoveredService {
            service: SPIKE_SERVICE,
            characteristics: vec![
                Characteristic {
                    id: SPIKE_RX_CHARACTERISTIC,
                    tag: SPIKE_RX_TAG,
                    write: true,
                    notify: false,
                },
                Characteristic {
                    id: SPIKE_TX_CHARACTERISTIC,
                    tag: SPIKE_TX_TAG,
                    write: false,
                    notify: true,
                },
            ],
        },
    ]
}

pub(super) fn default_info() -> spike::InfoResponse {
    spike::InfoResponse {
        rpc_major: 1,
        rpc_minor: 0,
        rpc_build: 37,
        firmware_major: 1,
        firmware_minor: 5,
        firmware_build: 2120,
        max_packet_size: 509,
        max_message_size: 8192,
        max_chunk_size: 509,
        product_group: 1,
    }
}
