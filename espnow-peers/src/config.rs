/// Default size of the inbound datagram queue.
pub const DEFAULT_INBOUND_CAPACITY: usize = 32;

/// Tuning of a [Connection](crate::Connection).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Number of received datagrams buffered between the transport receive signal and
    /// the dispatch loop. Datagrams arriving on a full queue are dropped.
    pub inbound_capacity: usize,
    /// Catch panics raised by the receive handler and keep dispatching. When `false`
    /// the panic unwinds out of the dispatch call.
    pub isolate_handler_panics: bool,
    /// Log payload contents on send and receive (info level).
    pub log_payloads: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            isolate_handler_panics: true,
            log_payloads: false,
        }
    }
}
