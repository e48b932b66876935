//! Async wrapper around the hub registry
//!
//! The proto [`Manager`](proto::Manager) is clock-driven; this wrapper feeds
//! it wall time on a ~2 Hz tick so hubs whose advertisements stop are retired
//! without any caller involvement.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use proto::{HubSummary, ManagerConfig, ManagerEvent, Observation};
use tokio::sync::broadcast;
use tracing::trace;

use crate::mutex::Mutex;

const SWEEP_INTERVAL: Duration = Duration::from_millis(500);
const EVENT_BACKLOG: usize = 64;

struct Shared {
    manager: Mutex<proto::Manager>,
    events: broadcast::Sender<ManagerEvent>,
}

impl Shared {
    /// Publish whatever the proto manager queued, outside its lock
    fn drain(&self) {
        let mut pending = Vec::new();
        {
            let mut manager = self.manager.lock("event drain");
            while let Some(event) = manager.poll() {
                pending.push(event);
            }
        }
        for event in pending {
            let _ = self.events.send(event);
        }
    }
}

/// Registry of hubs in radio range; clones share state and the sweep task
#[derive(Clone)]
pub struct HubManager {
    shared: Arc<Shared>,
}

impl HubManager {
    pub fn new(config: ManagerConfig) -> Self {
        let shared = Arc::new(Shared {
            manager: Mutex::new(proto::Manager::new(config)),
            events: broadcast::channel(EVENT_BACKLOG).0,
        });
        tokio::spawn(sweep_task(Arc::downgrade(&shared)));
        Self { shared }
    }

    /// Feed one scan observation from the platform's scanner
    pub fn observe(&self, observation: Observation) {
        self.shared
            .manager
            .lock("observe")
            .observe(Instant::now(), observation);
        self.shared.drain();
    }

    /// All tracked hubs, ordered by identifier
    pub fn hubs(&self) -> Vec<HubSummary> {
        self.shared.manager.lock("hub list").hubs()
    }

    /// Mark a hub connected or disconnected so sweeps leave it alone
    pub fn set_connected(&self, identifier: &str, connected: bool) {
        self.shared
            .manager
            .lock("connected flag")
            .set_connected(Instant::now(), identifier, connected);
    }

    /// Record a BLE connection that yielded no usable protocol; the device
    /// is left for the accessory-stream transport
    pub fn note_no_usable_protocol(&self, identifier: &str) {
        self.shared
            .manager
            .lock("suppression")
            .note_no_usable_protocol(identifier);
        self.shared.drain();
    }

    pub fn is_suppressed(&self, identifier: &str) -> bool {
        self.shared.manager.lock("suppression read").is_suppressed(identifier)
    }

    pub fn events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.shared.events.subscribe()
    }
}

async fn sweep_task(shared: Weak<Shared>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(shared) = shared.upgrade() else {
            trace!("manager dropped; sweep task exiting");
            return;
        };
        shared.manager.lock("sweep").sweep(Instant::now());
        shared.drain();
    }
}
