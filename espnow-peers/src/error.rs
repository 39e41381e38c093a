use crate::address::{AddressError, MacAddress};
use crate::codec::{BoxError, CodecError};

/// Errors of the peer and group layer.
///
/// Apart from [PeerError::MalformedAddress], [PeerError::Codec] and
/// [PeerError::Transport], these are soft failures: they are logged where they occur
/// and the operation simply had no effect.
#[derive(thiserror::Error, Debug)]
pub enum PeerError {
    #[error("Malformed address.")]
    MalformedAddress(#[from] AddressError),

    #[error("Peer {address} is already registered (group {group}).")]
    DuplicatePeer { address: MacAddress, group: String },

    #[error("Peer {address} not found in group {group}.")]
    PeerNotFound { address: MacAddress, group: String },

    #[error("No peers in group {group}.")]
    EmptyGroup { group: String },

    #[error("No peer groups configured, use broadcast() instead or add a group first.")]
    NoGroupsConfigured,

    #[error("Membership of the {0} group cannot be changed.")]
    ReservedGroup(String),

    #[error("Payload codec error.")]
    Codec(#[from] CodecError),

    #[error("Transport error.")]
    Transport(#[source] BoxError),

    #[error("Connection has been dropped.")]
    Disconnected,
}

impl PeerError {
    pub(crate) fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        PeerError::Transport(Box::new(err))
    }

    /// Whether the failure only means the operation had no effect.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            PeerError::DuplicatePeer { .. }
                | PeerError::PeerNotFound { .. }
                | PeerError::EmptyGroup { .. }
                | PeerError::NoGroupsConfigured
                | PeerError::ReservedGroup(_)
        )
    }
}
