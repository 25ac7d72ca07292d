//! Selective flight loss for DTLS handshake tests.
//!
//! A [`PacketInterceptor`] sits in the send path of one side of a DTLS
//! connection under test. Every outbound datagram is classified into a
//! handshake *flight*, each flight counts its own transmissions, and a
//! [`DropPolicy`] bitmask decides which transmissions never reach the wire.
//!
//! Drops are silent. The handshake engine is never told, so its own
//! retransmission timers are what bring the connection back on track, which
//! is the behavior such a test exercises.
//!
//! ```
//! use flightdrop::{DropPolicy, Flight, PacketInterceptor, Record, Role, Verdict};
//!
//! // Drop the first transmission of the client's first flight.
//! let policy = DropPolicy::flight(Flight::new(0), 0x1);
//! let mut filter = PacketInterceptor::new(Role::Client, policy);
//!
//! # let client_hello: &[u8] = &[
//! #     22, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 16,
//! #     1, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0,
//! # ];
//! assert_eq!(filter.on_send(Record::initial(client_hello)).unwrap(), Verdict::Discard);
//!
//! // The engine times out and resends the same flight.
//! filter.observe_timeout();
//! assert_eq!(filter.on_send(Record::retransmit(client_hello)).unwrap(), Verdict::Forward);
//! ```
//!
//! Which datagrams form a flight is decided by a [`FlightClassifier`]. The
//! default [`AlternatingClassifier`] starts a new flight whenever the side
//! sends after hearing from its peer and recognizes retransmissions by the
//! handshake messages they repeat. Engines that know their flights can tag
//! records and use the [`TaggedClassifier`] instead.
//!
//! For end to end tests without a real DTLS stack, [`ScriptedPeer`] emits the
//! datagram shapes of DTLS 1.2 and 1.3 handshakes and retransmits like a real
//! engine, and [`Pair`] runs two drivers against each other.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod config;
pub use config::{Config, ConfigBuilder};

mod error;
pub use error::Error;

pub mod message;

mod flight;
pub use flight::{AlternatingClassifier, Classification, FlightClassifier, TaggedClassifier};
pub use flight::{Flight, FlightNumbering, Role};

mod counter;
pub use counter::TransmissionCounter;

mod policy;
pub use policy::{DropMask, DropPolicy, Selector, Transmission};

mod interceptor;
pub use interceptor::{Decision, PacketInterceptor, Record, SendKind, Stats, Verdict};

mod driver;
pub use driver::{ConnectionDriver, Outbound};

mod peer;
pub use peer::{HandshakeShape, ScriptedPeer};

mod harness;
pub use harness::{Pair, Report, SideReport};

mod rng;

mod timer;
