//! Async engine for LEGO Powered Up and SPIKE Prime hubs
//!
//! This crate drives the sans-IO state machines from [`pup-proto`] on tokio.
//! Platform code supplies a [`HubTransport`] (an already-connected BLE GATT
//! link or accessory stream) and a scanner feeding [`Observation`]s; in
//! return it gets a cheap-to-clone [`Hub`] handle with async connect,
//! fire-and-forget commands, broadcast events, and consistent
//! [`snapshot`](Hub::snapshot) reads.
//!
//! [`pup-proto`]: proto

mod hub;
mod manager;
mod mutex;
mod transport;


pub use proto;
pub use proto::{
    Command, ConnectFailure, Diagnostic, HubConfig, HubEvent, HubState, HubSummary,
    ManagerConfig, ManagerEvent, Observation, Port, Protocol, TransportKind,
};

pub use crate::hub::{ConnectError, Hub};
pub use crate::manager::HubManager;
pub use crate::transport::{event_channel, HubTransport};
