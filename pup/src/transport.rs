//! The contract between a hub driver and its byte transport
//!
//! Scanning, pairing, and service/characteristic discovery belong to the
//! platform: an adapter hands the engine an already-connected transport.
//! Downward calls are fire-and-forget; results, inbound frames, and failures
//! all come back as [`TransportEvent`]s on the channel created alongside the
//! hub. An adapter that needs flow control (e.g. an accessory stream that
//! reports "space available") buffers internally and retries in FIFO order.

use proto::{CharTag, Transmit, TransportEvent};
use tokio::sync::mpsc;

/// Downward surface of a BLE GATT connection or accessory stream
pub trait HubTransport: Send + std::fmt::Debug + 'static {
    /// Establish the link; report the outcome as [`TransportEvent::Connected`]
    /// (followed by `ServicesDiscovered` on BLE) or `Disconnected`
    fn open(&self);
    /// Tear the link down; must eventually produce `Disconnected`
    fn close(&self);
    /// Write one frame or line
    fn write(&self, transmit: Transmit);
    /// Enable notifications on a characteristic
    fn subscribe(&self, tag: CharTag);
    /// Sample signal strength; reported back as `RssiUpdate`
    fn read_rssi(&self);
}

/// The upward event channel an adapter feeds
pub fn event_channel() -> (
    mpsc::UnboundedSender<TransportEvent>,
    mpsc::UnboundedReceiver<TransportEvent>,
) {
    mpsc::unbounded_channel()
}
