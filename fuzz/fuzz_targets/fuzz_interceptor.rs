#![no_main]

//! Fuzz target for datagram classification.
//!
//! Splits the input into datagrams and feeds them to a client side
//! interceptor, interleaving the receive and timeout events that delimit
//! transmission bursts. Classification may fail, but must never panic.
//!
//! The first input byte selects the events:
//! - bit 0: report a receive before each datagram
//! - bit 1: report a timeout before each datagram
//! - bit 2: mark every datagram as a retransmission

use libfuzzer_sys::fuzz_target;

use flightdrop::{DropPolicy, PacketInterceptor, Record, Role, SendKind};

/// Largest datagram carved out of the input.
const MAX_DATAGRAM: usize = 1500;

fuzz_target!(|data: &[u8]| {
    let Some((&flags, mut rest)) = data.split_first() else {
        return;
    };

    let mut filter = PacketInterceptor::new(Role::Client, DropPolicy::every_flight(0x15));

    while rest.len() >= 2 {
        let len = (u16::from_be_bytes([rest[0], rest[1]]) as usize).min(MAX_DATAGRAM);
        rest = &rest[2..];
        let len = len.min(rest.len());
        let (datagram, tail) = rest.split_at(len);
        rest = tail;

        if flags & 1 > 0 {
            filter.observe_receive();
        }
        if flags & 2 > 0 {
            filter.observe_timeout();
        }

        let kind = if flags & 4 > 0 {
            SendKind::Retransmit
        } else {
            SendKind::Initial
        };

        let _ = filter.on_send(Record::new(datagram, kind));
    }
});
