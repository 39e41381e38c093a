use anyhow::{bail, Result};
use espnow_peers::transport::memory::Ether;
use espnow_peers::MacAddress;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

mod receiver;
mod sender;

const SENDER_ADDRESS: &str = "9C:9C:1F:E9:D6:14";
const RECEIVER_ADDRESS: &str = "AA:AA:AA:AA:AA:AA";

/// Datagrams the receiver should get: `send_all`, the `RECEIVERS` group send and the
/// broadcast. The single peer send targets another device.
const EXPECTED_MESSAGES: usize = 3;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let ether = Ether::new();
    let sender_address: MacAddress = SENDER_ADDRESS.parse()?;
    let receiver_address: MacAddress = RECEIVER_ADDRESS.parse()?;

    let receiver = receiver::Receiver::new(ether.attach(receiver_address), sender_address)?;
    let messages = receiver.spawn();
    println!("Receiver is ready on {}.", receiver_address);

    let sender = sender::Sender::new(ether.attach(sender_address))?;
    sender.run()?;

    let mut received = 0;
    while received < EXPECTED_MESSAGES {
        match messages.recv_timeout(Duration::from_millis(500)) {
            Ok(message) => {
                received += 1;
                println!("Received data from: {}", message.sender);
                println!("Data: {}", message.payload);
                println!();
            }
            Err(RecvTimeoutError::Timeout) => bail!(
                "Only {} of {} messages received.",
                received,
                EXPECTED_MESSAGES
            ),
            Err(RecvTimeoutError::Disconnected) => bail!("Fatal error: receiver stopped."),
        }
    }

    println!("Stopping!");
    Ok(())
}
