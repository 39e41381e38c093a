use espnow_peers::transport::memory::MemoryTransport;
use espnow_peers::{Connection, FanOut};
use log::warn;
use serde_json::json;

/// A node pushing the same record through every kind of send.
pub struct Sender {
    connection: Connection<MemoryTransport>,
}

impl Sender {
    pub fn new(transport: MemoryTransport) -> anyhow::Result<Self> {
        let connection = Connection::new(transport)?;

        let receivers = connection.add_group("Receivers");
        receivers.add_peer("AA:AA:AA:AA:AA:AA", "Optional Name")?;
        receivers.add_peer("BB:BB:BB:BB:BB:BB", "")?;

        let fun = connection.add_group("Fun Group");
        fun.add_peer("CC:CC:CC:CC:CC:CC", "The fun device")?;

        Ok(Self { connection })
    }

    pub fn run(&self) -> anyhow::Result<()> {
        let test_data = json!({
            "name": "Gene",
            "description": "Cool guy",
            "age": 43,
        });

        report("all groups", self.connection.send_all(&test_data)?);

        if let Some(receivers) = self.connection.find_group("Receivers") {
            report("RECEIVERS", receivers.send(&test_data)?);
        }

        let fun_device = self
            .connection
            .find_group("Fun Group")
            .and_then(|group| group.find_by_name("The fun device"));
        if let Some(peer) = fun_device {
            peer.send(&test_data)?;
        }

        report("broadcast", self.connection.broadcast(&test_data)?);
        Ok(())
    }
}

fn report(target: &str, fan_out: FanOut) {
    println!(
        "Sent to {}: {}/{} delivered",
        target,
        fan_out.delivered(),
        fan_out.attempted
    );
    for (address, err) in fan_out.failures {
        warn!("Send to {} failed: {}", address, err);
    }
}
