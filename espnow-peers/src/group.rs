use std::fmt;
use std::sync::{Arc, Weak};

use log::{debug, error, info, warn};
use parking_lot::RwLock;

use crate::address::MacAddress;
use crate::codec::Payload;
use crate::connection::Link;
use crate::error::PeerError;
use crate::peer::Peer;
use crate::transport::{PeerTableError, Transport};

/// Name of the group created by every connection, whose only member is the broadcast
/// address.
pub const BROADCAST_GROUP: &str = "BROADCAST";

/// Outcome of a fan-out send.
///
/// A fan-out never stops on the first failure: every member is attempted and the
/// failing ones are reported here, in send order.
#[derive(Debug, Default)]
pub struct FanOut {
    pub attempted: usize,
    pub failures: Vec<(MacAddress, PeerError)>,
}

impl FanOut {
    pub fn delivered(&self) -> usize {
        self.attempted - self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn merge(&mut self, other: FanOut) {
        self.attempted += other.attempted;
        self.failures.extend(other.failures);
    }
}

/// A named, ordered set of peers sharing a fan-out target.
///
/// Groups are created by [Connection::add_group](crate::Connection::add_group). Members
/// keep their insertion order, which is also the send order.
pub struct PeerGroup<T: Transport> {
    name: String,
    members: RwLock<Vec<Arc<Peer<T>>>>,
    link: Weak<Link<T>>,
}

impl<T: Transport> PeerGroup<T> {
    pub(crate) fn new(name: &str, link: Weak<Link<T>>) -> Self {
        Self {
            name: name.to_uppercase(),
            members: RwLock::new(Vec::new()),
            link,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_broadcast(&self) -> bool {
        self.name == BROADCAST_GROUP
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Snapshot of the members, in insertion order.
    pub fn peers(&self) -> Vec<Arc<Peer<T>>> {
        self.members.read().clone()
    }

    pub fn contains(&self, address: &MacAddress) -> bool {
        self.members.read().iter().any(|peer| peer.address() == *address)
    }

    /// Creates a peer and appends it to the group.
    ///
    /// The address is registered with the transport. If another group already owns it,
    /// the peer moves here: it leaves the previous group and keeps its transport
    /// registration. Fails with [PeerError::DuplicatePeer] if this group already has it.
    pub fn add_peer(&self, address: &str, name: &str) -> Result<Arc<Peer<T>>, PeerError> {
        let address: MacAddress = address.parse()?;
        let link = self.link()?;
        info!(" Adding peer {} to {}", address, self);
        if self.is_broadcast() {
            warn!("  Members of {} are fixed.", self);
            return Err(PeerError::ReservedGroup(self.name.clone()));
        }
        if address.is_broadcast() {
            warn!("  Broadcast address is reserved to the {} group.", BROADCAST_GROUP);
            return Err(PeerError::DuplicatePeer {
                address,
                group: BROADCAST_GROUP.to_owned(),
            });
        }

        let mut registry = link.registry.write();
        if self.contains(&address) {
            warn!("  Peer already exists!");
            return Err(PeerError::DuplicatePeer {
                address,
                group: self.name.clone(),
            });
        }
        match registry.owner_of(&address) {
            Some(previous) => {
                info!("  Moving peer {} out of {}", address, previous);
                previous.take_member(&address);
            }
            None => match link.transport.lock().register_peer(&address) {
                Ok(()) => {}
                Err(PeerTableError::AlreadyRegistered(_)) => {
                    warn!("  Transport already knows peer {}.", address);
                    return Err(PeerError::DuplicatePeer {
                        address,
                        group: self.name.clone(),
                    });
                }
                Err(err) => {
                    error!("  Could not add peer: {}", err);
                    return Err(PeerError::transport(err));
                }
            },
        }

        let peer = Arc::new(Peer::new(address, name, Arc::downgrade(&link)));
        self.members.write().push(peer.clone());
        registry.peers.insert(address, peer.clone());
        info!("  Added {}", peer);
        Ok(peer)
    }

    /// Removes a peer from the group and deregisters it from the transport.
    pub fn remove_peer(&self, address: &str) -> Result<Arc<Peer<T>>, PeerError> {
        let address: MacAddress = address.parse()?;
        let link = self.link()?;
        info!(" Removing peer {} from {}", address, self);
        if self.is_broadcast() {
            warn!("  Members of {} are fixed.", self);
            return Err(PeerError::ReservedGroup(self.name.clone()));
        }

        let mut registry = link.registry.write();
        let not_found = || PeerError::PeerNotFound {
            address,
            group: self.name.clone(),
        };
        if !self.contains(&address) {
            info!("  Could not find referenced peer.");
            return Err(not_found());
        }
        match link.transport.lock().deregister_peer(&address) {
            Ok(()) => {}
            Err(PeerTableError::NotRegistered(_)) => {
                warn!("  Transport did not know peer {}.", address)
            }
            Err(err) => {
                error!("  Could not remove peer: {}", err);
                return Err(PeerError::transport(err));
            }
        }
        let peer = self.take_member(&address).ok_or_else(not_found)?;
        registry.peers.remove(&address);
        info!("  Removed {}", peer);
        Ok(peer)
    }

    /// First member whose name matches, compared uppercase.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Peer<T>>> {
        let name = name.to_uppercase();
        debug!(" Finding peer: {}", name);
        let found = self
            .members
            .read()
            .iter()
            .find(|peer| peer.name() == name)
            .cloned();
        if found.is_none() {
            debug!("  Peer not found in group.");
        }
        found
    }

    pub fn find_by_address(&self, address: &str) -> Result<Option<Arc<Peer<T>>>, PeerError> {
        let address: MacAddress = address.parse()?;
        debug!(" Finding peer: {}", address);
        Ok(self
            .members
            .read()
            .iter()
            .find(|peer| peer.address() == address)
            .cloned())
    }

    /// Sends a payload to every member, in insertion order.
    ///
    /// Fails with [PeerError::EmptyGroup] if the group has no member. Otherwise every
    /// member is attempted and individual failures are collected in the [FanOut].
    pub fn send(&self, payload: &Payload) -> Result<FanOut, PeerError> {
        self.link()?;
        let members = self.peers();
        if members.is_empty() {
            warn!(" No peers in {}.", self);
            return Err(PeerError::EmptyGroup {
                group: self.name.clone(),
            });
        }
        info!(" Sending to: {}", self);
        let mut report = FanOut::default();
        for peer in members {
            report.attempted += 1;
            if let Err(err) = peer.send(payload) {
                warn!("  Send to {} failed: {}", peer, err);
                report.failures.push((peer.address(), err));
            }
        }
        Ok(report)
    }

    pub(crate) fn push_member(&self, peer: Arc<Peer<T>>) {
        self.members.write().push(peer);
    }

    pub(crate) fn take_member(&self, address: &MacAddress) -> Option<Arc<Peer<T>>> {
        let mut members = self.members.write();
        let index = members.iter().position(|peer| peer.address() == *address)?;
        Some(members.remove(index))
    }

    fn link(&self) -> Result<Arc<Link<T>>, PeerError> {
        self.link.upgrade().ok_or(PeerError::Disconnected)
    }
}

impl<T: Transport> fmt::Display for PeerGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerGroup ({})", self.name)
    }
}

impl<T: Transport> fmt::Debug for PeerGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerGroup")
            .field("name", &self.name)
            .field("members", &*self.members.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::BROADCAST_ADDRESS;
    use crate::transport::memory::{MemoryTransport, Probe};
    use crate::Connection;
    use serde_json::json;

    fn addr(text: &str) -> MacAddress {
        text.parse().unwrap()
    }

    fn connection() -> (Connection<MemoryTransport>, Probe) {
        let transport = MemoryTransport::standalone(addr("11:11:11:11:11:11"));
        let probe = transport.probe();
        (Connection::new(transport).unwrap(), probe)
    }

    #[test]
    fn add_and_find() {
        let (connection, probe) = connection();
        let group = connection.add_group("sensors");
        assert_eq!(group.name(), "SENSORS");
        assert_eq!(group.to_string(), "PeerGroup (SENSORS)");

        group.add_peer("aa:aa:aa:aa:aa:aa", "Kitchen").unwrap();
        group.add_peer("BB:BB:BB:BB:BB:BB", "kitchen").unwrap();
        assert_eq!(group.len(), 2);
        assert!(probe.registered().contains(&addr("AA:AA:AA:AA:AA:AA")));

        let first = group.find_by_name("KITCHEN").unwrap();
        assert_eq!(first.address(), addr("AA:AA:AA:AA:AA:AA"));
        let found = group.find_by_address("bb:bb:bb:bb:bb:bb").unwrap().unwrap();
        assert_eq!(found.name(), "KITCHEN");
        assert!(group.find_by_name("garage").is_none());
        assert!(group.find_by_address("CC:CC:CC:CC:CC:CC").unwrap().is_none());
        assert!(matches!(group.find_by_address("nope"), Err(PeerError::MalformedAddress(_))));
    }

    #[test]
    fn duplicates_are_rejected() {
        let (connection, probe) = connection();
        let group = connection.add_group("G");
        group.add_peer("AA:AA:AA:AA:AA:AA", "one").unwrap();
        let err = group.add_peer("AA:AA:AA:AA:AA:AA", "two").unwrap_err();
        assert!(matches!(err, PeerError::DuplicatePeer { ref group, .. } if group == "G"));
        assert!(err.is_soft());
        assert_eq!(group.len(), 1);
        assert_eq!(group.peers()[0].name(), "ONE");
        let count = probe
            .registered()
            .iter()
            .filter(|a| **a == addr("AA:AA:AA:AA:AA:AA"))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn address_already_known_to_transport_is_a_duplicate() {
        let (connection, probe) = connection();
        let a = addr("AA:AA:AA:AA:AA:AA");
        connection.with_transport(|t| t.register_peer(&a)).unwrap();

        let group = connection.add_group("G");
        let err = group.add_peer("AA:AA:AA:AA:AA:AA", "late").unwrap_err();
        assert!(matches!(err, PeerError::DuplicatePeer { address, ref group } if address == a && group == "G"));
        assert!(group.is_empty());
        assert!(!connection.is_authorized(&a));
        assert!(connection.peer(&a).is_none());
        assert_eq!(probe.registered().iter().filter(|x| **x == a).count(), 1);
    }

    #[test]
    fn remove_succeeds_when_transport_forgot_the_peer() {
        let (connection, probe) = connection();
        let a = addr("AA:AA:AA:AA:AA:AA");
        let group = connection.add_group("G");
        group.add_peer("AA:AA:AA:AA:AA:AA", "").unwrap();
        connection.with_transport(|t| t.deregister_peer(&a)).unwrap();

        let removed = group.remove_peer("AA:AA:AA:AA:AA:AA").unwrap();
        assert_eq!(removed.address(), a);
        assert!(group.is_empty());
        assert!(!connection.is_authorized(&a));
        assert!(!probe.registered().contains(&a));
    }

    #[test]
    fn broadcast_address_and_group_are_reserved() {
        let (connection, _) = connection();
        let group = connection.add_group("G");
        assert!(matches!(
            group.add_peer("FF:FF:FF:FF:FF:FF", "all"),
            Err(PeerError::DuplicatePeer { .. })
        ));
        let broadcast = connection.broadcast_group();
        assert!(matches!(
            broadcast.add_peer("AA:AA:AA:AA:AA:AA", ""),
            Err(PeerError::ReservedGroup(_))
        ));
        assert!(matches!(
            broadcast.remove_peer("FF:FF:FF:FF:FF:FF"),
            Err(PeerError::ReservedGroup(_))
        ));
        assert_eq!(broadcast.peers()[0].address(), BROADCAST_ADDRESS);
    }

    #[test]
    fn remove_deregisters() {
        let (connection, probe) = connection();
        let group = connection.add_group("G");
        group.add_peer("AA:AA:AA:AA:AA:AA", "").unwrap();
        let removed = group.remove_peer("AA:AA:AA:AA:AA:AA").unwrap();
        assert_eq!(removed.address(), addr("AA:AA:AA:AA:AA:AA"));
        assert!(group.is_empty());
        assert!(!probe.registered().contains(&addr("AA:AA:AA:AA:AA:AA")));
        assert!(!connection.is_authorized(&addr("AA:AA:AA:AA:AA:AA")));
        assert!(matches!(
            group.remove_peer("AA:AA:AA:AA:AA:AA"),
            Err(PeerError::PeerNotFound { .. })
        ));
    }

    #[test]
    fn fan_out_reports_failures_and_continues() {
        let (connection, probe) = connection();
        let group = connection.add_group("G");
        for a in ["AA:AA:AA:AA:AA:AA", "BB:BB:BB:BB:BB:BB", "CC:CC:CC:CC:CC:CC"] {
            group.add_peer(a, "").unwrap();
        }
        probe.clear_sent();
        probe.fail_sends_to(addr("BB:BB:BB:BB:BB:BB"));

        let report = group.send(&json!("hello")).unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered(), 2);
        assert!(!report.is_complete());
        assert_eq!(report.failures[0].0, addr("BB:BB:BB:BB:BB:BB"));
        let dests: Vec<_> = probe.sent().into_iter().map(|frame| frame.dest).collect();
        assert_eq!(dests, vec![addr("AA:AA:AA:AA:AA:AA"), addr("CC:CC:CC:CC:CC:CC")]);
    }

    #[test]
    fn empty_group_sends_nothing() {
        let (connection, probe) = connection();
        let group = connection.add_group("G");
        probe.clear_sent();
        assert!(matches!(group.send(&json!(1)), Err(PeerError::EmptyGroup { .. })));
        assert!(probe.sent().is_empty());
    }

    #[test]
    fn dropped_connection_disconnects_groups() {
        let (connection, _) = connection();
        let group = connection.add_group("G");
        drop(connection);
        assert!(matches!(group.add_peer("AA:AA:AA:AA:AA:AA", ""), Err(PeerError::Disconnected)));
        assert!(matches!(group.send(&json!(1)), Err(PeerError::Disconnected)));
    }
}
