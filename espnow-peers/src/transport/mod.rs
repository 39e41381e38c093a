//! Everything needed to move raw datagrams between nodes.
//!
//! The peer layer only relies on the [Transport] trait: a connectionless, best-effort,
//! single-hop datagram service with a peer table and a receive signal. Two
//! implementations are provided:
//! - [memory::MemoryTransport], an in-memory medium shared by several simulated nodes,
//! - [radio::RadioTransport], a link layer on top of any packet radio implementing the
//!   `radio` HAL traits.

use crate::address::MacAddress;

pub mod frame;
pub mod memory;
pub mod radio;

/// Raw datagram received by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDatagram {
    pub sender: MacAddress,
    pub payload: Vec<u8>,
}

impl RawDatagram {
    pub fn new(sender: MacAddress, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            sender,
            payload: payload.into(),
        }
    }
}

/// Receiver of the transport receive signal.
///
/// It is invoked by the transport, possibly from another thread or an interrupt-like
/// context, so implementations must return promptly. `None` represents a spurious
/// wake, a receive signal without any datagram.
pub trait RxClient: Send + Sync {
    fn receive(&self, event: Option<RawDatagram>) -> Result<(), ()>;
}

/// Connectionless datagram transport.
pub trait Transport: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Powers the transport on. Must be called before any other operation.
    fn activate(&mut self) -> Result<(), Self::Error>;

    /// Powers the transport off, nothing is sent nor received until re-activation.
    fn deactivate(&mut self) -> Result<(), Self::Error>;

    fn is_active(&self) -> bool;

    /// Hardware address of this node.
    fn self_address(&self) -> Result<MacAddress, Self::Error>;

    /// Emits one datagram. Fire-and-forget: success only means the datagram left.
    fn send_raw(&mut self, dest: &MacAddress, payload: &[u8]) -> Result<(), Self::Error>;

    /// Declares a peer. A peer must be registered before sending to it.
    fn register_peer(&mut self, address: &MacAddress) -> Result<(), PeerTableError<Self::Error>>;

    fn deregister_peer(&mut self, address: &MacAddress)
        -> Result<(), PeerTableError<Self::Error>>;

    /// Sets the client notified on every receive signal, replacing the previous one.
    fn set_receive_client(&mut self, client: Box<dyn RxClient>);
}

#[derive(thiserror::Error, Debug)]
pub enum PeerTableError<E>
where
    E: std::error::Error + 'static,
{
    #[error("Peer {0} is already registered.")]
    AlreadyRegistered(MacAddress),

    #[error("Peer {0} is not registered.")]
    NotRegistered(MacAddress),

    #[error("Peer table is full ({capacity} peers).")]
    Full { capacity: usize },

    #[error("Underlying transport error.")]
    Transport(#[source] E),
}
