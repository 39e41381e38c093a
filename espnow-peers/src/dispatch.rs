//! Handling of received datagrams.
//!
//! Every receive signal goes through the same small state machine:
//!
//! ```text
//! Idle -> DecodingSender -> Authorizing -> DecodingPayload -> Dispatching -> Idle
//! ```
//!
//! A spurious signal (no datagram) goes straight back to `Idle`, as does a datagram
//! from a sender that is not in any group or whose payload cannot be decoded. Only
//! authorized, decodable datagrams reach the receive handler.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, error, info, trace, warn};
use parking_lot::RwLock;

use crate::address::MacAddress;
use crate::codec::Payload;
use crate::connection::Link;
use crate::transport::{RawDatagram, Transport};

/// Callback invoked with the sender address and the decoded payload.
pub type ReceiveHandler = Arc<dyn Fn(MacAddress, Payload) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    DecodingSender,
    Authorizing,
    DecodingPayload,
    Dispatching,
}

/// What became of a receive signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The signal carried no datagram.
    Spurious,
    /// The sender is not a member of any group, the datagram was dropped.
    Unauthorized(MacAddress),
    /// The payload could not be decoded, the datagram was dropped.
    Undecodable(MacAddress),
    Delivered(MacAddress),
    /// The handler panicked. The panic was caught and dispatching goes on.
    HandlerPanicked(MacAddress),
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered(_))
    }
}

/// Tracks the state of one receive signal.
struct Machine {
    state: DispatchState,
}

impl Machine {
    fn start() -> Self {
        Machine {
            state: DispatchState::Idle,
        }
    }

    fn advance(&mut self, next: DispatchState) {
        trace!("dispatch: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn finish(mut self, outcome: DispatchOutcome) -> DispatchOutcome {
        self.advance(DispatchState::Idle);
        outcome
    }
}

fn default_handler() -> ReceiveHandler {
    Arc::new(|sender, payload| info!("{} : {}", sender, payload))
}

pub(crate) struct ReceiveDispatcher {
    handler: RwLock<ReceiveHandler>,
}

impl ReceiveDispatcher {
    pub(crate) fn new() -> Self {
        Self {
            handler: RwLock::new(default_handler()),
        }
    }

    pub(crate) fn set_handler(&self, handler: ReceiveHandler) {
        *self.handler.write() = handler;
    }

    pub(crate) fn reset_handler(&self) {
        self.set_handler(default_handler());
    }

    /// Runs one receive signal through the state machine.
    ///
    /// The handler is called without any lock held, it may use the connection freely.
    pub(crate) fn dispatch<T: Transport>(
        &self,
        event: Option<RawDatagram>,
        link: &Link<T>,
    ) -> DispatchOutcome {
        let mut machine = Machine::start();
        let datagram = match event {
            Some(datagram) => datagram,
            None => {
                trace!("Spurious receive signal.");
                return machine.finish(DispatchOutcome::Spurious);
            }
        };

        machine.advance(DispatchState::DecodingSender);
        let sender = datagram.sender;
        debug!("Received {} bytes from: {}", datagram.payload.len(), sender.decode());

        machine.advance(DispatchState::Authorizing);
        if !link.is_authorized(&sender) {
            debug!(" Sender {} is not a known peer, dropping.", sender);
            return machine.finish(DispatchOutcome::Unauthorized(sender));
        }

        machine.advance(DispatchState::DecodingPayload);
        let payload = match link.codec.deserialize(&datagram.payload) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(" Dropping undecodable payload from {}: {}", sender, err);
                return machine.finish(DispatchOutcome::Undecodable(sender));
            }
        };
        if link.config.log_payloads {
            info!("   {}", payload);
        }

        machine.advance(DispatchState::Dispatching);
        let handler = self.handler.read().clone();
        if link.config.isolate_handler_panics {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(sender, payload))) {
                Ok(()) => machine.finish(DispatchOutcome::Delivered(sender)),
                Err(_) => {
                    error!(" Receive handler panicked on a datagram from {}.", sender);
                    machine.finish(DispatchOutcome::HandlerPanicked(sender))
                }
            }
        } else {
            handler(sender, payload);
            machine.finish(DispatchOutcome::Delivered(sender))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::transport::memory::MemoryTransport;
    use crate::Connection;
    use parking_lot::Mutex;
    use serde_json::json;

    fn addr(text: &str) -> MacAddress {
        text.parse().unwrap()
    }

    fn datagram(sender: &str, payload: &Payload) -> Option<RawDatagram> {
        Some(RawDatagram::new(addr(sender), serde_json::to_vec(payload).unwrap()))
    }

    fn recording(connection: &Connection<MemoryTransport>) -> Arc<Mutex<Vec<(MacAddress, Payload)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        connection.set_on_receive(move |sender, payload| sink.lock().push((sender, payload)));
        seen
    }

    #[test]
    fn spurious_signal_is_ignored() {
        let connection = Connection::new(MemoryTransport::standalone(addr("11:11:11:11:11:11"))).unwrap();
        let seen = recording(&connection);
        assert_eq!(connection.dispatch(None), DispatchOutcome::Spurious);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn only_known_senders_are_delivered() {
        let connection = Connection::new(MemoryTransport::standalone(addr("11:11:11:11:11:11"))).unwrap();
        connection.add_group("G").add_peer("AA:AA:AA:AA:AA:AA", "").unwrap();
        let seen = recording(&connection);

        let outcome = connection.dispatch(datagram("BB:BB:BB:BB:BB:BB", &json!(1)));
        assert_eq!(outcome, DispatchOutcome::Unauthorized(addr("BB:BB:BB:BB:BB:BB")));
        let outcome = connection.dispatch(datagram("AA:AA:AA:AA:AA:AA", &json!({"t": 21.5})));
        assert!(outcome.is_delivered());
        assert_eq!(*seen.lock(), vec![(addr("AA:AA:AA:AA:AA:AA"), json!({"t": 21.5}))]);
    }

    #[test]
    fn broadcast_address_is_not_an_authorized_sender() {
        let connection = Connection::new(MemoryTransport::standalone(addr("11:11:11:11:11:11"))).unwrap();
        let seen = recording(&connection);
        let outcome = connection.dispatch(datagram("FF:FF:FF:FF:FF:FF", &json!(1)));
        assert_eq!(outcome, DispatchOutcome::Unauthorized(addr("FF:FF:FF:FF:FF:FF")));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn undecodable_payload_is_dropped() {
        let connection = Connection::new(MemoryTransport::standalone(addr("11:11:11:11:11:11"))).unwrap();
        connection.add_group("G").add_peer("AA:AA:AA:AA:AA:AA", "").unwrap();
        let seen = recording(&connection);
        let outcome = connection.dispatch(Some(RawDatagram::new(addr("AA:AA:AA:AA:AA:AA"), vec![0xFF, 0xFE])));
        assert_eq!(outcome, DispatchOutcome::Undecodable(addr("AA:AA:AA:AA:AA:AA")));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn handler_panics_are_contained() {
        let connection = Connection::new(MemoryTransport::standalone(addr("11:11:11:11:11:11"))).unwrap();
        connection.add_group("G").add_peer("AA:AA:AA:AA:AA:AA", "").unwrap();
        connection.set_on_receive(|_, _| panic!("handler failure"));
        let outcome = connection.dispatch(datagram("AA:AA:AA:AA:AA:AA", &json!(1)));
        assert_eq!(outcome, DispatchOutcome::HandlerPanicked(addr("AA:AA:AA:AA:AA:AA")));

        let seen = recording(&connection);
        assert!(connection.dispatch(datagram("AA:AA:AA:AA:AA:AA", &json!(2))).is_delivered());
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    #[should_panic(expected = "handler failure")]
    fn handler_panics_can_propagate() {
        let config = ConnectionConfig {
            isolate_handler_panics: false,
            ..ConnectionConfig::default()
        };
        let connection =
            Connection::with_config(MemoryTransport::standalone(addr("11:11:11:11:11:11")), config).unwrap();
        connection.add_group("G").add_peer("AA:AA:AA:AA:AA:AA", "").unwrap();
        connection.set_on_receive(|_, _| panic!("handler failure"));
        connection.dispatch(datagram("AA:AA:AA:AA:AA:AA", &json!(1)));
    }

    #[test]
    fn reset_restores_default_handler() {
        let connection = Connection::new(MemoryTransport::standalone(addr("11:11:11:11:11:11"))).unwrap();
        connection.add_group("G").add_peer("AA:AA:AA:AA:AA:AA", "").unwrap();
        let seen = recording(&connection);
        connection.reset_on_receive();
        assert!(connection.dispatch(datagram("AA:AA:AA:AA:AA:AA", &json!(1))).is_delivered());
        assert!(seen.lock().is_empty());
    }
}
