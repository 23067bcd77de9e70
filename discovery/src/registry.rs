use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::events::{DiscoveryEvent, EventPublisher};
use crate::models::{Device, DeviceId};

/// How long a device stays cached without a successful description fetch
pub const MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// In-memory cache of known devices.
///
/// The registry is the only owner of device state. Callers get clones via
/// [`snapshot`](Self::snapshot); roster changes are pushed to the event bus
/// as [`DiscoveryEvent::DevicesChanged`].
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, Device>,
    order: Vec<DeviceId>,
    max_lifetime: Duration,
    publisher: Arc<dyn EventPublisher>,
}

impl DeviceRegistry {
    pub fn new(max_lifetime: Duration, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            devices: HashMap::new(),
            order: Vec::new(),
            max_lifetime,
            publisher,
        }
    }

    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    pub fn get(&self, id: &DeviceId) -> Option<Device> {
        self.devices.get(id).cloned()
    }

    /// Insert or replace a device.
    ///
    /// A new id publishes the updated roster. For a known id the stored
    /// device is replaced wholesale, without publishing, unless the incoming
    /// record is older than the stored one, in which case it is dropped.
    /// Returns true when the id was new.
    pub fn upsert(&mut self, device: Device) -> bool {
        match self.devices.get_mut(&device.id) {
            Some(existing) => {
                if device.last_updated >= existing.last_updated {
                    *existing = device;
                } else {
                    log::debug!("Ignoring stale description for {}", device.id);
                }
                false
            }
            None => {
                log::info!("New device {} at {}", device.id, device.info_url);
                self.order.push(device.id.clone());
                self.devices.insert(device.id.clone(), device);
                self.publish_roster();
                true
            }
        }
    }

    /// Remove a device, publishing the roster only if it was present
    pub fn remove(&mut self, id: &DeviceId) -> Option<Device> {
        let removed = self.take(id)?;
        log::info!("Removed device {}", id);
        self.publish_roster();
        Some(removed)
    }

    /// Current roster in insertion order
    pub fn snapshot(&self) -> Vec<Device> {
        self.order
            .iter()
            .filter_map(|id| self.devices.get(id))
            .cloned()
            .collect()
    }

    /// Drop every device whose last update is at least `max_lifetime` old.
    ///
    /// Returns the id and description URL of each dropped device so the
    /// caller can fetch it again straight away.
    pub fn sweep_decayed(&mut self, now: Instant) -> Vec<(DeviceId, String)> {
        let decayed: Vec<DeviceId> = self
            .order
            .iter()
            .filter(|id| {
                self.devices.get(*id).is_some_and(|device| {
                    now.saturating_duration_since(device.last_updated) >= self.max_lifetime
                })
            })
            .cloned()
            .collect();

        let expired: Vec<(DeviceId, String)> = decayed
            .into_iter()
            .filter_map(|id| self.take(&id).map(|device| (id, device.info_url)))
            .collect();

        if !expired.is_empty() {
            log::info!("{} device(s) decayed, re-requesting descriptions", expired.len());
            self.publish_roster();
        }
        expired
    }

    fn take(&mut self, id: &DeviceId) -> Option<Device> {
        let removed = self.devices.remove(id)?;
        self.order.retain(|known| known != id);
        Some(removed)
    }

    fn publish_roster(&self) {
        self.publisher
            .publish(DiscoveryEvent::DevicesChanged(self.snapshot()));
    }
}
