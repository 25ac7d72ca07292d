use std::time::Instant;

use crate::{Error, Record, Role, SendKind};

/// A datagram a driver wants on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub bytes: Vec<u8>,
    pub kind: SendKind,
}

impl Outbound {
    /// View for the interceptor.
    pub fn record(&self) -> Record<'_> {
        Record::new(&self.bytes, self.kind)
    }
}

/// The handshake engine on one side of a connection under test.
///
/// The engine owns its flights and retransmission timers. It is never told
/// that a datagram was dropped; a missing response is the only signal.
pub trait ConnectionDriver {
    fn role(&self) -> Role;

    /// Deliver a datagram from the peer.
    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error>;

    /// Drive timers. Also starts the handshake on the client side.
    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error>;

    /// Next datagram to send, in send order.
    fn poll_datagram(&mut self) -> Option<Outbound>;

    /// Earliest instant `handle_timeout` has work to do.
    fn poll_timeout(&self) -> Option<Instant>;

    fn is_connected(&self) -> bool;

    fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Application data received since the last call.
    fn take_application_data(&mut self) -> Vec<Vec<u8>>;
}
