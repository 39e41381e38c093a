//! Peer addressing and group fan-out over a connectionless datagram transport.
//!
//! A [Connection] owns named [PeerGroup]s of [Peer]s. Payloads can be sent to a single
//! peer, to a group, to every group ([Connection::send_all]) or to every node in range
//! ([Connection::broadcast]). Received datagrams are only handed to the receive handler
//! when their sender is a member of some group.

pub mod address;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod group;
pub mod peer;
pub mod transport;

pub use address::{AddressError, MacAddress, BROADCAST_ADDRESS};
pub use codec::{CodecError, JsonCodec, Payload, PayloadCodec};
pub use config::ConnectionConfig;
pub use connection::Connection;
pub use dispatch::{DispatchOutcome, DispatchState, ReceiveHandler};
pub use error::PeerError;
pub use group::{FanOut, PeerGroup, BROADCAST_GROUP};
pub use peer::Peer;
pub use transport::{RawDatagram, RxClient, Transport};
