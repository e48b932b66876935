//! Tracking of known hubs across scan observations
//!
//! The manager owns no radio: an external scanner feeds it advertisement
//! [`Observation`]s and a periodic sweep retires hubs that have gone quiet.
//! It also remembers BLE devices that connected but offered no protocol this
//! engine speaks, so the accessory-stream transport can claim them instead.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rustc_hash::{FxHashMap, FxHashSet};
use slab::Slab;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{LEGACY_HUB_SERVICE, LEGO_COMPANY_ID, LWP3_SERVICE, SPIKE_SERVICE};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub(crate) lost_timeout: Duration,
}

impl ManagerConfig {
    /// How long a hub may be advertisement-absent before it is dropped
    pub fn lost_timeout(&mut self, value: Duration) -> &mut Self {
        self.lost_timeout = value;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lost_timeout: Duration::from_secs(10),
        }
    }
}

/// One BLE advertisement as reported by an external scanner
#[derive(Debug, Clone)]
pub struct Observation {
    pub identifier: String,
    pub name: Option<String>,
    pub services: Vec<Uuid>,
    pub manufacturer_data: Vec<u8>,
    pub rssi: i16,
}

/// Point-in-time summary of one tracked hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSummary {
    pub identifier: String,
    pub name: Option<String>,
    pub rssi: i16,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    HubDiscovered { identifier: String },
    HubUpdated { identifier: String },
    HubLost { identifier: String },
}

#[derive(Debug)]
struct HubMeta {
    identifier: String,
    name: Option<String>,
    rssi: i16,
    last_seen: Instant,
    connected: bool,
}

/// Process-level registry of hubs in radio range
pub struct Manager {
    config: ManagerConfig,
    hubs: Slab<HubMeta>,
    index: FxHashMap<String, usize>,
    /// Identifiers that connected over BLE but yielded no usable protocol;
    /// withheld from BLE tracking so the line transport can pick them up
    suppressed: FxHashSet<String>,
    events: VecDeque<ManagerEvent>,
}

impl Manager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            hubs: Slab::new(),
            index: FxHashMap::default(),
            suppressed: FxHashSet::default(),
            events: VecDeque::new(),
        }
    }

    /// Feed one scan observation; non-LEGO and suppressed devices are ignored
    pub fn observe(&mut self, now: Instant, observation: Observation) {
        if !is_lego(&observation) {
            trace!(identifier = %observation.identifier, "not a LEGO hub");
            return;
        }
        if self.suppressed.contains(&observation.identifier) {
            trace!(identifier = %observation.identifier, "suppressed; left to the line transport");
            return;
        }
        match self.index.get(&observation.identifier) {
            Some(&key) => {
                let meta = &mut self.hubs[key];
                meta.last_seen = now;
                let changed = meta.rssi != observation.rssi
                    || (observation.name.is_some() && meta.name != observation.name);
                meta.rssi = observation.rssi;
                if observation.name.is_some() {
                    meta.name = observation.name;
                }
                if changed {
                    self.events.push_back(ManagerEvent::HubUpdated {
                        identifier: observation.identifier,
                    });
                }
            }
            None => {
                debug!(identifier = %observation.identifier, name = ?observation.name, "hub discovered");
                let key = self.hubs.insert(HubMeta {
                    identifier: observation.identifier.clone(),
                    name: observation.name,
                    rssi: observation.rssi,
                    last_seen: now,
                    connected: false,
                });
                self.index.insert(observation.identifier.clone(), key);
                self.events.push_back(ManagerEvent::HubDiscovered {
                    identifier: observation.identifier,
                });
            }
        }
    }

    /// Retire hubs unseen for the configured timeout; call at ~2 Hz
    pub fn sweep(&mut self, now: Instant) {
        let lost: Vec<usize> = self
            .hubs
            .iter()
            .filter(|(_, meta)| {
                !meta.connected && now.duration_since(meta.last_seen) >= self.config.lost_timeout
            })
            .map(|(key, _)| key)
            .collect();
        for key in lost {
            let meta = self.hubs.remove(key);
            debug!(identifier = %meta.identifier, "hub lost");
            self.index.remove(&meta.identifier);
            self.events.push_back(ManagerEvent::HubLost {
                identifier: meta.identifier,
            });
        }
    }

    /// Mark a hub's connection state; connected hubs survive sweeps even
    /// though they stop advertising
    pub fn set_connected(&mut self, now: Instant, identifier: &str, connected: bool) {
        if let Some(&key) = self.index.get(identifier) {
            let meta = &mut self.hubs[key];
            meta.connected = connected;
            // give a freshly closed hub a full timeout to reappear
            meta.last_seen = now;
        }
    }

    /// Record that `identifier` offered no usable protocol over BLE. It is
    /// removed from tracking and future BLE observations are ignored.
    pub fn note_no_usable_protocol(&mut self, identifier: &str) {
        debug!(identifier, "remembering hub as BLE-unusable");
        self.suppressed.insert(identifier.to_owned());
        if let Some(key) = self.index.remove(identifier) {
            let meta = self.hubs.remove(key);
            self.events.push_back(ManagerEvent::HubLost {
                identifier: meta.identifier,
            });
        }
    }

    pub fn is_suppressed(&self, identifier: &str) -> bool {
        self.suppressed.contains(identifier)
    }

    /// All tracked hubs, ordered by identifier
    pub fn hubs(&self) -> Vec<HubSummary> {
        let mut hubs: Vec<HubSummary> = self
            .hubs
            .iter()
            .map(|(_, meta)| HubSummary {
                identifier: meta.identifier.clone(),
                name: meta.name.clone(),
                rssi: meta.rssi,
                connected: meta.connected,
            })
            .collect();
        hubs.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        hubs
    }

    pub fn poll(&mut self) -> Option<ManagerEvent> {
        self.events.pop_front()
    }
}

/// Whether an advertisement plausibly belongs to a LEGO hub: a known
/// service, the LEGO company id leading the manufacturer data, or a
/// recognizable name fragment.
pub fn is_lego(observation: &Observation) -> bool {
    const LEGO_SERVICES: [Uuid; 3] = [LWP3_SERVICE, SPIKE_SERVICE, LEGACY_HUB_SERVICE];
    const NAME_FRAGMENTS: [&str; 3] = ["LEGO", "Technic", "SPIKE"];
    observation
        .services
        .iter()
        .any(|service| LEGO_SERVICES.contains(service))
        || observation
            .manufacturer_data
            .starts_with(&LEGO_COMPANY_ID.to_le_bytes())
        || observation
            .name
            .as_deref()
            .is_some_and(|name| NAME_FRAGMENTS.iter().any(|fragment| name.contains(fragment)))
}
