use std::fmt;
use std::sync::{Arc, Weak};

use log::info;
use parking_lot::RwLock;

use crate::address::{MacAddress, ADDRESS_LEN};
use crate::codec::Payload;
use crate::connection::Link;
use crate::error::PeerError;
use crate::transport::Transport;

/// A known remote node.
///
/// Peers are created by [PeerGroup::add_peer](crate::PeerGroup::add_peer) and owned by
/// their group. The address is the identity of the peer, the name is descriptive
/// only, stored uppercase and not unique.
pub struct Peer<T: Transport> {
    address: MacAddress,
    name: RwLock<String>,
    link: Weak<Link<T>>,
}

impl<T: Transport> Peer<T> {
    pub(crate) fn new(address: MacAddress, name: &str, link: Weak<Link<T>>) -> Self {
        Self {
            address,
            name: RwLock::new(name.to_uppercase()),
            link,
        }
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    /// Raw encoding of the address, as handed to the transport.
    pub fn octets(&self) -> [u8; ADDRESS_LEN] {
        self.address.octets()
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.write() = name.to_uppercase();
    }

    /// Sends a payload to this peer only.
    ///
    /// One datagram is emitted, without retry. Transport failures are returned as
    /// [PeerError::Transport].
    pub fn send(&self, payload: &Payload) -> Result<(), PeerError> {
        let link = self.link()?;
        info!("  Sending to: {}", self);
        link.send_to(&self.address, payload)
    }

    fn link(&self) -> Result<Arc<Link<T>>, PeerError> {
        self.link.upgrade().ok_or(PeerError::Disconnected)
    }
}

impl<T: Transport> fmt::Display for Peer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.read();
        if name.is_empty() {
            write!(f, "Peer ({})", self.address)
        } else {
            write!(f, "Peer ({} - {})", self.address, name)
        }
    }
}

impl<T: Transport> fmt::Debug for Peer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("address", &self.address)
            .field("name", &*self.name.read())
            .finish()
    }
}
