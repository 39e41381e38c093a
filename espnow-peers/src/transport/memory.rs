//! In-memory transport.
//!
//! An [Ether] is a simulated radio medium. Every [MemoryTransport] attached to it acts
//! as a node with its own hardware address and peer table, following the same rules as
//! the ESP-NOW stack: a node must be active to send, the destination (broadcast
//! included) must be in its peer table, and the peer table is bounded.
//!
//! ## Usages
//! ```rust,ignore
//! let ether = Ether::new();
//! let node_a = ether.attach("AA:AA:AA:AA:AA:AA".parse()?);
//! let node_b = ether.attach("BB:BB:BB:BB:BB:BB".parse()?);
//! let probe = node_a.probe(); // keep an eye on node A once it moved into a Connection
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;

use super::{PeerTableError, RawDatagram, RxClient, Transport};
use crate::address::MacAddress;

/// Number of peers a node can register, same as the ESP-NOW default.
pub const DEFAULT_PEER_CAPACITY: usize = 20;

/// A datagram emitted by a node, as recorded by its [Probe].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub dest: MacAddress,
    pub payload: Vec<u8>,
}

struct Station {
    address: MacAddress,
    active: bool,
    capacity: usize,
    peers: Vec<MacAddress>,
    client: Option<Arc<dyn RxClient>>,
    sent: Vec<SentFrame>,
    failing: HashSet<MacAddress>,
}

/// Shared in-memory radio medium.
#[derive(Clone)]
pub struct Ether {
    stations: Arc<Mutex<Vec<Arc<Mutex<Station>>>>>,
    capacity: usize,
}

impl Ether {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PEER_CAPACITY)
    }

    /// Builds a medium whose nodes can each register up to `capacity` peers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stations: Arc::new(Mutex::new(Vec::new())),
            capacity,
        }
    }

    /// Attaches a new node to the medium. The node starts inactive.
    pub fn attach(&self, address: MacAddress) -> MemoryTransport {
        let station = Arc::new(Mutex::new(Station {
            address,
            active: false,
            capacity: self.capacity,
            peers: Vec::new(),
            client: None,
            sent: Vec::new(),
            failing: HashSet::new(),
        }));
        self.stations.lock().push(station.clone());
        MemoryTransport {
            station,
            ether: self.clone(),
        }
    }

    /// Receive clients of every active node interested in a datagram from `sender` to `dest`.
    fn receivers(&self, sender: MacAddress, dest: MacAddress) -> Vec<Arc<dyn RxClient>> {
        let stations = self.stations.lock();
        stations
            .iter()
            .filter_map(|station| {
                let station = station.lock();
                let interested = station.address != sender
                    && station.active
                    && (dest.is_broadcast() || station.address == dest);
                if interested {
                    station.client.clone()
                } else {
                    None
                }
            })
            .collect()
    }
}

impl Default for Ether {
    fn default() -> Self {
        Self::new()
    }
}

/// A node attached to an [Ether].
pub struct MemoryTransport {
    station: Arc<Mutex<Station>>,
    ether: Ether,
}

impl MemoryTransport {
    /// Creates a node alone on its own medium.
    pub fn standalone(address: MacAddress) -> Self {
        Ether::new().attach(address)
    }

    /// Returns an inspection handle on this node, usable after the transport has been
    /// moved into a connection.
    pub fn probe(&self) -> Probe {
        Probe {
            station: self.station.clone(),
        }
    }
}

impl Transport for MemoryTransport {
    type Error = MemoryError;

    fn activate(&mut self) -> Result<(), Self::Error> {
        self.station.lock().active = true;
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), Self::Error> {
        self.station.lock().active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.station.lock().active
    }

    fn self_address(&self) -> Result<MacAddress, Self::Error> {
        Ok(self.station.lock().address)
    }

    fn send_raw(&mut self, dest: &MacAddress, payload: &[u8]) -> Result<(), Self::Error> {
        let sender = {
            let mut station = self.station.lock();
            if !station.active {
                return Err(MemoryError::Inactive);
            }
            if !station.peers.contains(dest) {
                return Err(MemoryError::UnknownPeer(*dest));
            }
            if station.failing.contains(dest) {
                return Err(MemoryError::InjectedFailure(*dest));
            }
            station.sent.push(SentFrame {
                dest: *dest,
                payload: payload.to_owned(),
            });
            station.address
        };
        let receivers = self.ether.receivers(sender, *dest);
        trace!("{} -> {}: {} bytes, {} receiver(s)", sender, dest, payload.len(), receivers.len());
        for client in receivers {
            if client
                .receive(Some(RawDatagram::new(sender, payload)))
                .is_err()
            {
                debug!("Receiver refused a datagram from {}.", sender);
            }
        }
        Ok(())
    }

    fn register_peer(&mut self, address: &MacAddress) -> Result<(), PeerTableError<Self::Error>> {
        let mut station = self.station.lock();
        if station.peers.contains(address) {
            return Err(PeerTableError::AlreadyRegistered(*address));
        }
        if station.peers.len() >= station.capacity {
            return Err(PeerTableError::Full {
                capacity: station.capacity,
            });
        }
        station.peers.push(*address);
        Ok(())
    }

    fn deregister_peer(
        &mut self,
        address: &MacAddress,
    ) -> Result<(), PeerTableError<Self::Error>> {
        let mut station = self.station.lock();
        match station.peers.iter().position(|peer| peer == address) {
            Some(i) => {
                station.peers.remove(i);
                Ok(())
            }
            None => Err(PeerTableError::NotRegistered(*address)),
        }
    }

    fn set_receive_client(&mut self, client: Box<dyn RxClient>) {
        self.station.lock().client = Some(Arc::from(client));
    }
}

/// Inspection and fault injection handle on a [MemoryTransport].
#[derive(Clone)]
pub struct Probe {
    station: Arc<Mutex<Station>>,
}

impl Probe {
    /// Every datagram emitted so far, in emission order.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.station.lock().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.station.lock().sent.clear();
    }

    /// Peer table of the node, in registration order.
    pub fn registered(&self) -> Vec<MacAddress> {
        self.station.lock().peers.clone()
    }

    pub fn is_active(&self) -> bool {
        self.station.lock().active
    }

    /// Raises a receive signal on the node as if the medium delivered `event`.
    ///
    /// Returns `false` if no receive client is set or if it refused the event.
    pub fn inject(&self, event: Option<RawDatagram>) -> bool {
        let client = self.station.lock().client.clone();
        match client {
            Some(client) => client.receive(event).is_ok(),
            None => false,
        }
    }

    /// Makes every following send to `dest` fail.
    pub fn fail_sends_to(&self, dest: MacAddress) {
        self.station.lock().failing.insert(dest);
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Transport is not active.")]
    Inactive,

    #[error("Destination {0} is not in the peer table.")]
    UnknownPeer(MacAddress),

    #[error("Send to {0} failed (injected failure).")]
    InjectedFailure(MacAddress),
}
