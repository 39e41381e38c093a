use embedded_hal::blocking::delay::DelayMs;
use log::{debug, info, trace, warn};
use radio::{Receive, Transmit};
use std::fmt::Debug;
use std::marker::PhantomData;

use super::frame::{self, FrameSize, LinkFrame};
use super::{PeerTableError, RawDatagram, RxClient, Transport};
use crate::address::MacAddress;

/// Configuration of a [RadioTransport].
#[derive(Debug, Clone)]
pub struct RadioConfig {
    /// Peer table capacity.
    pub max_peers: usize,
    /// Largest payload accepted by `send_raw`, at most [frame::MAX_PAYLOAD_LENGTH].
    pub max_payload: usize,
    /// Delay between two checks of a transmission completion, in milliseconds.
    pub tx_poll_ms: u32,
    /// Number of completion checks before giving up on a transmission.
    pub tx_attempts: u32,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            max_peers: 20,
            max_payload: frame::MAX_PAYLOAD_LENGTH,
            tx_poll_ms: 10,
            tx_attempts: 50,
        }
    }
}

/// Radio physical device representation.
pub trait Radio<E>: Transmit<Error = E> + Receive<Error = E> + DelayMs<u32> {}

impl<E, T> Radio<E> for T where T: Transmit<Error = E> + Receive<Error = E> + DelayMs<u32> {}

/// Datagram transport on top of a packet radio.
///
/// The radio itself has no notion of addresses, so every datagram is wrapped in a
/// [LinkFrame] carrying the destination and source hardware addresses. Reception is
/// driven by calling [RadioTransport::poll] from the main loop.
pub struct RadioTransport<T, E>
where
    T: Radio<E>,
    E: Debug,
{
    radio: T,
    address: MacAddress,
    config: RadioConfig,
    peers: Vec<MacAddress>,
    rx_client: Option<Box<dyn RxClient>>,
    active: bool,
    phantom: PhantomData<E>,
}

impl<T, E> RadioTransport<T, E>
where
    T: Radio<E>,
    E: Debug,
{
    /// Initialize a new transport, the radio stays idle until activation.
    pub fn new(radio: T, address: MacAddress, config: RadioConfig) -> Self {
        assert!(
            config.max_payload <= frame::MAX_PAYLOAD_LENGTH,
            "Payload limit above the link maximum!"
        );
        Self {
            radio,
            address,
            config,
            peers: Vec::new(),
            rx_client: None,
            active: false,
            phantom: PhantomData,
        }
    }

    pub fn radio(&self) -> &T {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut T {
        &mut self.radio
    }

    fn start_reception(&mut self) -> Result<(), RadioLinkError<E>> {
        self.radio
            .start_receive()
            .map_err(RadioLinkError::InternalRadioError)
    }

    /// Checks the radio for an incoming packet and hands it to the receive client.
    ///
    /// Returns `true` if a datagram was delivered. Frames addressed to another node
    /// or that fail to decode are dropped.
    pub fn poll(&mut self) -> Result<bool, RadioLinkError<E>> {
        if !self.active {
            return Ok(false);
        }
        if !self
            .radio
            .check_receive(true)
            .map_err(RadioLinkError::InternalRadioError)?
        {
            return Ok(false);
        }
        let mut buf = [0u8; frame::MAX_FRAME_LENGTH];
        let (size, _info) = self
            .radio
            .get_received(&mut buf)
            .map_err(RadioLinkError::InternalRadioError)?;
        if size == 0 {
            trace!("Receive signal without packet.");
            self.notify(None);
            return Ok(false);
        }
        let frame = match LinkFrame::try_from_bytes(&buf[..size.min(buf.len())]) {
            Ok((frame, _read)) => frame,
            Err(err) => {
                warn!("Packet ignored: {}", err);
                return Ok(false);
            }
        };
        if !frame.is_for(&self.address) {
            debug!("Frame ignored because it is addressed to {}.", frame.destination);
            return Ok(false);
        }
        Ok(self.notify(Some(RawDatagram::new(frame.source, frame.payload))))
    }

    fn notify(&self, event: Option<RawDatagram>) -> bool {
        match &self.rx_client {
            Some(client) => client.receive(event).is_ok(),
            None => {
                info!("Frame received but no RxClient connected!");
                false
            }
        }
    }
}

impl<T, E> Transport for RadioTransport<T, E>
where
    T: Radio<E> + Send,
    E: Debug + Send + Sync + 'static,
{
    type Error = RadioLinkError<E>;

    fn activate(&mut self) -> Result<(), Self::Error> {
        self.start_reception()?;
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), Self::Error> {
        self.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn self_address(&self) -> Result<MacAddress, Self::Error> {
        Ok(self.address)
    }

    fn send_raw(&mut self, dest: &MacAddress, payload: &[u8]) -> Result<(), Self::Error> {
        if !self.active {
            return Err(RadioLinkError::Inactive);
        }
        if !self.peers.contains(dest) {
            return Err(RadioLinkError::UnknownPeer(*dest));
        }
        if payload.len() > self.config.max_payload {
            return Err(RadioLinkError::TooBigPayloadError {
                size: payload.len(),
                max: self.config.max_payload,
            });
        }
        let frame = LinkFrame::data(*dest, self.address, payload);
        trace!("Transmitting {}B frame to {}.", frame.size(), dest);
        self.radio
            .start_transmit(&frame.to_bytes())
            .map_err(RadioLinkError::InternalRadioError)?;
        let mut attempts = 0;
        while !self
            .radio
            .check_transmit()
            .map_err(RadioLinkError::InternalRadioError)?
        {
            attempts += 1;
            if attempts >= self.config.tx_attempts {
                // Leave the radio listening even if this transmission is lost.
                self.start_reception()?;
                return Err(RadioLinkError::TransmitTimeout { attempts });
            }
            self.radio.delay_ms(self.config.tx_poll_ms);
        }
        self.start_reception()
    }

    fn register_peer(&mut self, address: &MacAddress) -> Result<(), PeerTableError<Self::Error>> {
        if self.peers.contains(address) {
            return Err(PeerTableError::AlreadyRegistered(*address));
        }
        if self.peers.len() >= self.config.max_peers {
            return Err(PeerTableError::Full {
                capacity: self.config.max_peers,
            });
        }
        self.peers.push(*address);
        Ok(())
    }

    fn deregister_peer(
        &mut self,
        address: &MacAddress,
    ) -> Result<(), PeerTableError<Self::Error>> {
        if let Some(i) = self.peers.iter().position(|peer| peer == address) {
            self.peers.remove(i);
            Ok(())
        } else {
            Err(PeerTableError::NotRegistered(*address))
        }
    }

    fn set_receive_client(&mut self, client: Box<dyn RxClient>) {
        self.rx_client = Some(client);
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RadioLinkError<R>
where
    R: Debug,
{
    #[error("Payload is too big to be transmitted (is: {size}B, max: {max}B)!")]
    TooBigPayloadError { size: usize, max: usize },

    #[error("Destination {0} is not a registered peer.")]
    UnknownPeer(MacAddress),

    #[error("Radio is not active.")]
    Inactive,

    #[error("Transmission did not complete after {attempts} checks.")]
    TransmitTimeout { attempts: u32 },

    #[error("Internal radio error.")]
    InternalRadioError(R),
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct FakeError;

    #[derive(Debug, Default)]
    struct FakeInfo;

    impl radio::ReceiveInfo for FakeInfo {
        fn rssi(&self) -> i16 {
            -40
        }
    }

    /// Loopback-free fake radio: transmissions are recorded, receptions are scripted.
    #[derive(Default)]
    struct FakeRadio {
        transmitted: Vec<Vec<u8>>,
        inbound: VecDeque<Vec<u8>>,
        busy_checks: u32,
        receiving: bool,
        delays: u32,
    }

    impl Transmit for FakeRadio {
        type Error = FakeError;

        fn start_transmit(&mut self, data: &[u8]) -> Result<(), Self::Error> {
            self.receiving = false;
            self.transmitted.push(data.to_vec());
            Ok(())
        }

        fn check_transmit(&mut self) -> Result<bool, Self::Error> {
            if self.busy_checks > 0 {
                self.busy_checks -= 1;
                Ok(false)
            } else {
                Ok(true)
            }
        }
    }

    impl Receive for FakeRadio {
        type Error = FakeError;
        type Info = FakeInfo;

        fn start_receive(&mut self) -> Result<(), Self::Error> {
            self.receiving = true;
            Ok(())
        }

        fn check_receive(&mut self, _restart: bool) -> Result<bool, Self::Error> {
            Ok(self.receiving && !self.inbound.is_empty())
        }

        fn get_received(&mut self, buff: &mut [u8]) -> Result<(usize, Self::Info), Self::Error> {
            let packet = self.inbound.pop_front().unwrap_or_default();
            buff[..packet.len()].copy_from_slice(&packet);
            Ok((packet.len(), FakeInfo))
        }
    }

    impl DelayMs<u32> for FakeRadio {
        fn delay_ms(&mut self, _ms: u32) {
            self.delays += 1;
        }
    }

    struct Inbox(Arc<Mutex<Vec<Option<RawDatagram>>>>);

    impl RxClient for Inbox {
        fn receive(&self, event: Option<RawDatagram>) -> Result<(), ()> {
            self.0.lock().push(event);
            Ok(())
        }
    }

    fn addr(text: &str) -> MacAddress {
        text.parse().unwrap()
    }

    fn transport() -> (RadioTransport<FakeRadio, FakeError>, Arc<Mutex<Vec<Option<RawDatagram>>>>) {
        let mut transport =
            RadioTransport::new(FakeRadio::default(), addr("11:11:11:11:11:11"), RadioConfig::default());
        let inbox = Arc::new(Mutex::new(Vec::new()));
        transport.set_receive_client(Box::new(Inbox(inbox.clone())));
        transport.activate().unwrap();
        (transport, inbox)
    }

    #[test]
    fn send_wraps_payload_in_link_frame() {
        let (mut transport, _) = transport();
        let dest = addr("AA:AA:AA:AA:AA:AA");
        transport.register_peer(&dest).unwrap();
        transport.radio_mut().busy_checks = 3;
        transport.send_raw(&dest, b"ping").unwrap();

        let sent = &transport.radio().transmitted;
        assert_eq!(sent.len(), 1);
        let (frame, _) = LinkFrame::try_from_bytes(&sent[0]).unwrap();
        assert_eq!(frame, LinkFrame::data(dest, addr("11:11:11:11:11:11"), b"ping"));
        assert_eq!(transport.radio().delays, 3);
        assert!(transport.radio().receiving, "reception must be re-armed");
    }

    #[test]
    fn send_checks() {
        let (mut transport, _) = transport();
        let dest = addr("AA:AA:AA:AA:AA:AA");
        assert!(matches!(transport.send_raw(&dest, b"x"), Err(RadioLinkError::UnknownPeer(_))));
        transport.register_peer(&dest).unwrap();
        assert!(matches!(
            transport.send_raw(&dest, &[0u8; 251]),
            Err(RadioLinkError::TooBigPayloadError { size: 251, max: 250 })
        ));
        transport.radio_mut().busy_checks = 1000;
        assert!(matches!(
            transport.send_raw(&dest, b"x"),
            Err(RadioLinkError::TransmitTimeout { attempts: 50 })
        ));
        transport.deactivate().unwrap();
        assert!(matches!(transport.send_raw(&dest, b"x"), Err(RadioLinkError::Inactive)));
    }

    #[test]
    fn poll_filters_by_destination() {
        let (mut transport, inbox) = transport();
        let me = addr("11:11:11:11:11:11");
        let sender = addr("AA:AA:AA:AA:AA:AA");
        let queue = &mut transport.radio_mut().inbound;
        queue.push_back(LinkFrame::data(me, sender, b"direct").to_bytes());
        queue.push_back(LinkFrame::data(addr("22:22:22:22:22:22"), sender, b"other").to_bytes());
        queue.push_back(LinkFrame::data(crate::address::BROADCAST_ADDRESS, sender, b"all").to_bytes());
        queue.push_back(vec![0x42, 0x00]);

        assert!(transport.poll().unwrap());
        assert!(!transport.poll().unwrap());
        assert!(transport.poll().unwrap());
        assert!(!transport.poll().unwrap());
        assert!(!transport.poll().unwrap(), "nothing left to receive");

        let got = inbox.lock().clone();
        assert_eq!(
            got,
            vec![
                Some(RawDatagram::new(sender, b"direct".to_vec())),
                Some(RawDatagram::new(sender, b"all".to_vec())),
            ]
        );
    }

    #[test]
    fn empty_packet_is_a_spurious_wake() {
        let (mut transport, inbox) = transport();
        transport.radio_mut().inbound.push_back(Vec::new());
        assert!(!transport.poll().unwrap());
        assert_eq!(inbox.lock().as_slice(), &[None]);
    }

    #[test]
    fn peer_table_is_bounded() {
        let mut transport = RadioTransport::new(
            FakeRadio::default(),
            addr("11:11:11:11:11:11"),
            RadioConfig {
                max_peers: 1,
                ..Default::default()
            },
        );
        transport.register_peer(&addr("AA:AA:AA:AA:AA:AA")).unwrap();
        assert!(matches!(
            transport.register_peer(&addr("AA:AA:AA:AA:AA:AA")),
            Err(PeerTableError::AlreadyRegistered(_))
        ));
        assert!(matches!(
            transport.register_peer(&addr("BB:BB:BB:BB:BB:BB")),
            Err(PeerTableError::Full { capacity: 1 })
        ));
        assert!(matches!(
            transport.deregister_peer(&addr("BB:BB:BB:BB:BB:BB")),
            Err(PeerTableError::NotRegistered(_))
        ));
    }
}
