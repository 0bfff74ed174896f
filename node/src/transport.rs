use hive_lib::{DeliveryFailure, EventKind, InstanceId, ServiceAddress};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::event_queue::EventSink;

/// Largest payload the transport accepts in one packet.
pub const MAX_PAYLOAD_SIZE: usize = 8192;

/// A packet on its way between two endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub from: ServiceAddress,
    pub to: ServiceAddress,
    /// Name of the destination endpoint on the receiving instance.
    pub endpoint: String,
    pub payload: Vec<u8>,
    /// Relay the packet crossed, if any relay was up.
    pub via: Option<InstanceId>,
}

struct Route {
    owner: InstanceId,
    endpoint: String,
    inbox: mpsc::UnboundedSender<Packet>,
}

#[derive(Default)]
struct Registry {
    routes: HashMap<ServiceAddress, Route>,
    /// Running relays, each with its own event sink for hop events.
    relays: BTreeMap<InstanceId, EventSink>,
    /// Registered addresses that currently refuse delivery.
    down: HashSet<ServiceAddress>,
}

/// In-process replacement for the network. Instances register the addresses
/// they own; a send looks the destination up and pushes the packet into the
/// owner's inbox.
///
/// Packets from one sender to one destination arrive in the order they were
/// sent. Nothing is promised across different sender/destination pairs.
#[derive(Clone, Default)]
pub struct VirtualTransport {
    registry: Arc<RwLock<Registry>>,
}

impl VirtualTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_endpoint(
        &self,
        address: ServiceAddress,
        owner: InstanceId,
        endpoint: &str,
        inbox: mpsc::UnboundedSender<Packet>,
    ) -> Result<(), TransportError> {
        let mut registry = self.write();
        if registry.routes.contains_key(&address) {
            return Err(TransportError::AddressInUse(address));
        }
        log_debug!(owner, "registered {} as {}", endpoint, address);
        registry.routes.insert(
            address,
            Route {
                owner,
                endpoint: endpoint.to_string(),
                inbox,
            },
        );
        Ok(())
    }

    pub fn deregister_endpoint(&self, address: &ServiceAddress) -> bool {
        let mut registry = self.write();
        registry.down.remove(address);
        registry.routes.remove(address).is_some()
    }

    /// Makes a running relay available as a hop.
    pub fn register_relay(&self, sink: EventSink) {
        log_debug!(sink.producer(), "available as hop");
        self.write().relays.insert(sink.producer(), sink);
    }

    /// Drops every address and relay slot held by `owner`. Returns how many
    /// endpoint addresses were released.
    pub fn deregister_owner(&self, owner: InstanceId) -> usize {
        let mut registry = self.write();
        registry.relays.remove(&owner);
        let released: Vec<ServiceAddress> = registry
            .routes
            .iter()
            .filter(|(_, route)| route.owner == owner)
            .map(|(address, _)| address.clone())
            .collect();
        for address in &released {
            registry.routes.remove(address);
            registry.down.remove(address);
        }
        released.len()
    }

    /// Keeps `address` registered but fails every delivery to it.
    pub fn mark_down(&self, address: &ServiceAddress) {
        self.write().down.insert(address.clone());
    }

    pub fn mark_up(&self, address: &ServiceAddress) {
        self.write().down.remove(address);
    }

    pub fn is_registered(&self, address: &ServiceAddress) -> bool {
        self.read().routes.contains_key(address)
    }

    pub fn registered_addresses(&self) -> Vec<ServiceAddress> {
        let mut addresses: Vec<_> = self.read().routes.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn owner_of(&self, address: &ServiceAddress) -> Option<InstanceId> {
        self.read().routes.get(address).map(|route| route.owner)
    }

    pub fn relay_count(&self) -> usize {
        self.read().relays.len()
    }

    /// Sends `payload` from `from` to `to`. A failed delivery is reported
    /// through `sender` as exactly one `DeliveryFailed` event.
    pub fn send(
        &self,
        from: &ServiceAddress,
        to: &ServiceAddress,
        payload: Vec<u8>,
        sender: &EventSink,
    ) -> Result<(), DeliveryFailure> {
        let bytes = payload.len();
        let result = self.deliver(from, to, payload);
        if let Err(reason) = result {
            log_debug!(sender.producer(), "packet to {} dropped: {}", to, reason);
            sender.emit(EventKind::DeliveryFailed {
                to: to.clone(),
                bytes,
                reason,
            });
        }
        result
    }

    fn deliver(
        &self,
        from: &ServiceAddress,
        to: &ServiceAddress,
        payload: Vec<u8>,
    ) -> Result<(), DeliveryFailure> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(DeliveryFailure::PayloadTooLarge);
        }

        // The read lock is held through the push so two sends from the same
        // caller cannot overtake each other.
        let registry = self.read();
        if registry.down.contains(to) {
            return Err(DeliveryFailure::DestinationDown);
        }
        let route = registry
            .routes
            .get(to)
            .ok_or(DeliveryFailure::UnknownDestination)?;
        if route.inbox.is_closed() {
            return Err(DeliveryFailure::DestinationClosed);
        }

        let hop = pick_relay(&registry.relays, from, to);
        if let Some(relay) = hop {
            relay.emit(EventKind::HopTraversed {
                from: from.clone(),
                to: to.clone(),
                bytes: payload.len(),
            });
        }

        route
            .inbox
            .send(Packet {
                from: from.clone(),
                to: to.clone(),
                endpoint: route.endpoint.clone(),
                payload,
                via: hop.map(EventSink::producer),
            })
            .map_err(|_| DeliveryFailure::DestinationClosed)
    }
}

// Same pair, same relay: keeps a flow on one path while relays are stable.
fn pick_relay<'a>(
    relays: &'a BTreeMap<InstanceId, EventSink>,
    from: &ServiceAddress,
    to: &ServiceAddress,
) -> Option<&'a EventSink> {
    if relays.is_empty() {
        return None;
    }
    let mut hasher = DefaultHasher::new();
    from.hash(&mut hasher);
    to.hash(&mut hasher);
    let index = (hasher.finish() % relays.len() as u64) as usize;
    relays.values().nth(index)
}
