use std::sync::mpsc::{sync_channel, Receiver as Inbox, SyncSender};
use std::sync::Arc;
use std::thread;

use espnow_peers::transport::memory::MemoryTransport;
use espnow_peers::{Connection, DispatchOutcome, MacAddress, Payload};
use log::{debug, warn};

/// A datagram handed to the application.
pub struct Message {
    pub sender: MacAddress,
    pub payload: Payload,
}

/// A node only listening to one sending device.
pub struct Receiver {
    connection: Arc<Connection<MemoryTransport>>,
}

impl Receiver {
    pub fn new(transport: MemoryTransport, sender: MacAddress) -> anyhow::Result<Self> {
        let connection = Connection::new(transport)?;
        // Without this peer every datagram would be dropped as unauthorized.
        connection
            .add_group("Sender")
            .add_peer(&sender.to_string(), "")?;
        Ok(Self {
            connection: Arc::new(connection),
        })
    }

    /// Starts the dispatch loop on its own thread, returning the delivered messages.
    pub fn spawn(self) -> Inbox<Message> {
        let (tx, rx) = sync_channel(30);
        self.connection.set_on_receive(forward(tx));
        let connection = self.connection;
        thread::spawn(move || loop {
            match smol::block_on(connection.dispatch_next()) {
                Ok(DispatchOutcome::Delivered(sender)) => debug!("Delivered message from {}", sender),
                Ok(outcome) => debug!("Dropped receive signal: {:?}", outcome),
                Err(err) => {
                    warn!("Dispatch loop stopped: {}", err);
                    break;
                }
            }
        });
        rx
    }
}

fn forward(tx: SyncSender<Message>) -> impl Fn(MacAddress, Payload) + Send + Sync + 'static {
    move |sender, payload| {
        if tx.try_send(Message { sender, payload }).is_err() {
            warn!("Application inbox full, dropping message from {}", sender);
        }
    }
}
