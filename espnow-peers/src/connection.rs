use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use smol::channel::{self, Receiver, Sender, TrySendError};

use crate::address::{MacAddress, BROADCAST_ADDRESS};
use crate::codec::{JsonCodec, Payload, PayloadCodec};
use crate::config::ConnectionConfig;
use crate::dispatch::{DispatchOutcome, ReceiveDispatcher};
use crate::error::PeerError;
use crate::group::{FanOut, PeerGroup, BROADCAST_GROUP};
use crate::peer::Peer;
use crate::transport::{PeerTableError, RawDatagram, RxClient, Transport};

/// Name a connection reports for its own node.
pub const SELF_NAME: &str = "SELF";

/// Groups and the flat address index derived from them.
///
/// `peers` holds every group member except the synthetic broadcast peer, it is the set
/// of authorized senders.
pub(crate) struct Registry<T: Transport> {
    pub(crate) peers: HashMap<MacAddress, Arc<Peer<T>>>,
    pub(crate) groups: Vec<Arc<PeerGroup<T>>>,
}

impl<T: Transport> Registry<T> {
    fn new() -> Self {
        Self {
            peers: HashMap::new(),
            groups: Vec::new(),
        }
    }

    /// Group currently holding `address`, if any.
    pub(crate) fn owner_of(&self, address: &MacAddress) -> Option<Arc<PeerGroup<T>>> {
        if !self.peers.contains_key(address) {
            return None;
        }
        self.groups.iter().find(|group| group.contains(address)).cloned()
    }
}

/// State shared by a connection and every peer and group handle it gave out.
///
/// Locks are always taken in this order: registry, group members, transport.
pub(crate) struct Link<T: Transport> {
    pub(crate) transport: Mutex<T>,
    pub(crate) codec: Box<dyn PayloadCodec>,
    pub(crate) registry: RwLock<Registry<T>>,
    pub(crate) config: ConnectionConfig,
}

impl<T: Transport> Link<T> {
    pub(crate) fn send_to(&self, dest: &MacAddress, payload: &Payload) -> Result<(), PeerError> {
        let bytes = self.codec.serialize(payload)?;
        if self.config.log_payloads {
            info!("   {}", payload);
        }
        self.transport
            .lock()
            .send_raw(dest, &bytes)
            .map_err(PeerError::transport)
    }

    pub(crate) fn is_authorized(&self, address: &MacAddress) -> bool {
        self.registry.read().peers.contains_key(address)
    }
}

/// Receive client pushing every signal into the inbound queue.
struct InboundQueue {
    sender: Sender<Option<RawDatagram>>,
}

impl RxClient for InboundQueue {
    fn receive(&self, event: Option<RawDatagram>) -> Result<(), ()> {
        self.sender.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => warn!("Inbound queue full, dropping datagram."),
            TrySendError::Closed(_) => debug!("Inbound queue closed, dropping datagram."),
        })
    }
}

/// Root object of the peer layer, bound to one transport.
///
/// A connection activates its transport, creates the `BROADCAST` group and owns every
/// group created afterwards. Received datagrams are queued by the transport receive
/// signal and handed to the receive handler by [Connection::dispatch_pending] or
/// [Connection::dispatch_next].
///
/// ## Usages
/// ```rust,ignore
/// let connection = Connection::new(transport)?;
/// let sensors = connection.add_group("sensors");
/// sensors.add_peer("AA:BB:CC:DD:EE:FF", "kitchen")?;
/// connection.set_on_receive(|sender, payload| println!("{} : {}", sender, payload));
/// connection.send_all(&json!({"cmd": "report"}))?;
/// ```
pub struct Connection<T: Transport> {
    link: Arc<Link<T>>,
    address: MacAddress,
    broadcast: Arc<PeerGroup<T>>,
    inbound: Receiver<Option<RawDatagram>>,
    dispatcher: ReceiveDispatcher,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Result<Self, PeerError> {
        Self::with_config(transport, ConnectionConfig::default())
    }

    pub fn with_config(transport: T, config: ConnectionConfig) -> Result<Self, PeerError> {
        Self::with_codec(transport, config, JsonCodec)
    }

    /// Brings up the transport and the `BROADCAST` group.
    ///
    /// The receive signal is wired last, once groups can be looked up.
    pub fn with_codec(
        mut transport: T,
        config: ConnectionConfig,
        codec: impl PayloadCodec + 'static,
    ) -> Result<Self, PeerError> {
        transport.activate().map_err(PeerError::transport)?;
        let address = transport.self_address().map_err(PeerError::transport)?;
        match transport.register_peer(&BROADCAST_ADDRESS) {
            Ok(()) | Err(PeerTableError::AlreadyRegistered(_)) => {}
            Err(err) => return Err(PeerError::transport(err)),
        }
        let capacity = config.inbound_capacity.max(1);

        let link = Arc::new(Link {
            transport: Mutex::new(transport),
            codec: Box::new(codec),
            registry: RwLock::new(Registry::new()),
            config,
        });
        let broadcast = Arc::new(PeerGroup::new(BROADCAST_GROUP, Arc::downgrade(&link)));
        broadcast.push_member(Arc::new(Peer::new(
            BROADCAST_ADDRESS,
            BROADCAST_GROUP,
            Arc::downgrade(&link),
        )));
        link.registry.write().groups.push(broadcast.clone());

        let (sender, inbound) = channel::bounded(capacity);
        link.transport
            .lock()
            .set_receive_client(Box::new(InboundQueue { sender }));
        info!("Connection up: {}", address);

        Ok(Self {
            link,
            address,
            broadcast,
            inbound,
            dispatcher: ReceiveDispatcher::new(),
        })
    }

    /// Hardware address of this node.
    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn name(&self) -> &'static str {
        SELF_NAME
    }

    /// Returns the group named `name` (uppercased), creating it if needed.
    pub fn add_group(&self, name: &str) -> Arc<PeerGroup<T>> {
        let name = name.to_uppercase();
        let mut registry = self.link.registry.write();
        if let Some(group) = registry.groups.iter().find(|group| group.name() == name) {
            debug!(" Group {} already exists.", name);
            return group.clone();
        }
        info!(" Creating group: {}", name);
        let group = Arc::new(PeerGroup::new(&name, Arc::downgrade(&self.link)));
        registry.groups.push(group.clone());
        group
    }

    pub fn find_group(&self, name: &str) -> Option<Arc<PeerGroup<T>>> {
        let name = name.to_uppercase();
        debug!(" Finding group: {}", name);
        let found = self
            .link
            .registry
            .read()
            .groups
            .iter()
            .find(|group| group.name() == name)
            .cloned();
        if found.is_none() {
            debug!("  Group not found.");
        }
        found
    }

    pub fn broadcast_group(&self) -> Arc<PeerGroup<T>> {
        self.broadcast.clone()
    }

    /// Every group, `BROADCAST` first, then in creation order.
    pub fn groups(&self) -> Vec<Arc<PeerGroup<T>>> {
        self.link.registry.read().groups.clone()
    }

    /// Looks a peer up across all groups.
    pub fn peer(&self, address: &MacAddress) -> Option<Arc<Peer<T>>> {
        self.link.registry.read().peers.get(address).cloned()
    }

    /// Whether datagrams from `address` reach the receive handler.
    pub fn is_authorized(&self, address: &MacAddress) -> bool {
        self.link.is_authorized(address)
    }

    /// Number of peers across all groups, the broadcast peer excluded.
    pub fn peer_count(&self) -> usize {
        self.link.registry.read().peers.len()
    }

    /// Sends one datagram to the broadcast address.
    pub fn broadcast(&self, payload: &Payload) -> Result<FanOut, PeerError> {
        info!("Broadcasting:");
        self.broadcast.send(payload)
    }

    /// Sends a payload to every peer of every group, `BROADCAST` excluded.
    ///
    /// Groups are visited in creation order and members in insertion order. Empty
    /// groups are skipped. Fails with [PeerError::NoGroupsConfigured] when only the
    /// `BROADCAST` group exists.
    pub fn send_all(&self, payload: &Payload) -> Result<FanOut, PeerError> {
        let groups: Vec<_> = self
            .groups()
            .into_iter()
            .filter(|group| !group.is_broadcast())
            .collect();
        if groups.is_empty() {
            warn!("No peer groups configured, use broadcast() or add a group first.");
            return Err(PeerError::NoGroupsConfigured);
        }
        info!("Sending to all groups:");
        let mut report = FanOut::default();
        for group in groups {
            match group.send(payload) {
                Ok(sent) => report.merge(sent),
                Err(err) if err.is_soft() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    /// Replaces the receive handler.
    pub fn set_on_receive<F>(&self, handler: F)
    where
        F: Fn(MacAddress, Payload) + Send + Sync + 'static,
    {
        self.dispatcher.set_handler(Arc::new(handler));
    }

    /// Restores the default handler, which logs every received payload.
    pub fn reset_on_receive(&self) {
        self.dispatcher.reset_handler();
    }

    /// Runs one receive signal through the dispatcher, bypassing the inbound queue.
    pub fn dispatch(&self, event: Option<RawDatagram>) -> DispatchOutcome {
        self.dispatcher.dispatch(event, &self.link)
    }

    /// Dispatches every queued datagram without blocking.
    pub fn dispatch_pending(&self) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(event) = self.inbound.try_recv() {
            outcomes.push(self.dispatch(event));
        }
        outcomes
    }

    /// Waits for the next receive signal and dispatches it.
    pub async fn dispatch_next(&self) -> Result<DispatchOutcome, PeerError> {
        let event = self
            .inbound
            .recv()
            .await
            .map_err(|_| PeerError::Disconnected)?;
        Ok(self.dispatch(event))
    }

    /// Number of receive signals waiting in the inbound queue.
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    /// Gives access to the underlying transport.
    pub fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.link.transport.lock())
    }

    /// Powers the transport off. Groups and peers are kept.
    pub fn turn_off(&self) -> Result<(), PeerError> {
        info!("Turning off: {}", self.address);
        self.link
            .transport
            .lock()
            .deactivate()
            .map_err(PeerError::transport)
    }

    pub fn turn_on(&self) -> Result<(), PeerError> {
        info!("Turning on: {}", self.address);
        self.link
            .transport
            .lock()
            .activate()
            .map_err(PeerError::transport)
    }
}

impl<T: Transport> fmt::Display for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection ({} - {})", self.address, SELF_NAME)
    }
}
