use std::collections::HashMap;
use std::fmt;

use tinyvec::TinyVec;

use crate::interceptor::{Record, SendKind};
use crate::message::{parse_datagram, ContentType, WireRecord};
use crate::Error;

/// The side of the connection an interceptor sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn peer(&self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// A group of handshake messages one side sends before waiting on its peer.
///
/// Flights are numbered per side. The client's first flight is 0, its second
/// is 1, and the same goes for the server. The phase is only ever non-zero
/// with [`FlightNumbering::RestartPerPhase`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Flight {
    phase: u32,
    index: u32,
}

impl Flight {
    /// Flight `index` of the first phase.
    pub const fn new(index: u32) -> Self {
        Flight { phase: 0, index }
    }

    /// The same flight index in another phase.
    pub const fn in_phase(self, phase: u32) -> Self {
        Flight {
            phase,
            index: self.index,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }
}

impl fmt::Display for Flight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.phase == 0 {
            write!(f, "flight {}", self.index)
        } else {
            write!(f, "flight {}.{}", self.phase, self.index)
        }
    }
}

/// How flight numbers behave when the driving test declares a new phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlightNumbering {
    /// Numbering carries on across phases.
    #[default]
    Continuous,
    /// Each phase starts again at flight 0.
    RestartPerPhase,
}

/// Outcome of classifying one outbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Part of `flight`. `opens` is set on the first datagram of a
    /// transmission (initial or retransmission) of that flight.
    Flight { flight: Flight, opens: bool },
    /// No handshake content, such as application data or alerts.
    Unflighted,
}

/// Decides which flight an outbound datagram belongs to.
///
/// Implementations see every datagram a side sends, in send order, plus the
/// events that delimit transmission bursts.
pub trait FlightClassifier: Send {
    /// Classify the next outbound datagram.
    fn classify(&mut self, record: &Record<'_>) -> Result<Classification, Error>;

    /// Input from the peer was delivered to this side.
    fn observe_receive(&mut self);

    /// This side's retransmission timer was serviced.
    fn observe_timeout(&mut self);

    /// The driving test declares a new protocol phase.
    fn begin_phase(&mut self);
}

/// Identity of one message instance, stable across retransmissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
struct MessageKey {
    content_type: u8,
    epoch: u16,
    message_seq: u16,
    fragment_offset: u32,
}

impl MessageKey {
    fn of(record: &WireRecord<'_>) -> Option<MessageKey> {
        let WireRecord::Plaintext { record, handshake } = record else {
            return None;
        };

        match (record.content_type, handshake) {
            (ContentType::Handshake, Some(h)) => Some(MessageKey {
                content_type: record.content_type.as_u8(),
                epoch: record.epoch,
                message_seq: h.message_seq,
                fragment_offset: h.fragment_offset,
            }),
            // Sent once per epoch change and side.
            (ContentType::ChangeCipherSpec, _) => Some(MessageKey {
                content_type: record.content_type.as_u8(),
                epoch: record.epoch,
                ..Default::default()
            }),
            _ => None,
        }
    }
}

/// Tracks which flight the current transmission burst has opened.
#[derive(Debug, Default)]
struct Burst {
    opened: Option<Flight>,
}

impl Burst {
    fn open(&mut self, flight: Flight) -> bool {
        if self.opened == Some(flight) {
            return false;
        }
        self.opened = Some(flight);
        true
    }

    fn boundary(&mut self) {
        self.opened = None;
    }
}

/// Classifies by send/receive alternation.
///
/// - The first handshake datagram a side sends starts flight 0.
/// - An initial send after input from the peer starts the next flight, unless
///   it repeats a message already seen. Back to back sends stay in the
///   current flight.
/// - Handshake messages (by `message_seq` and fragment offset) and
///   ChangeCipherSpec records (by epoch) are remembered, so a datagram
///   repeating one of them lands in the same flight as the original.
/// - A retransmission without any readable message belongs to the current
///   flight.
#[derive(Debug)]
pub struct AlternatingClassifier {
    role: Role,
    numbering: FlightNumbering,
    phase: u32,
    next_index: u32,
    current: Option<Flight>,
    peer_input: bool,
    keys: HashMap<MessageKey, Flight>,
    burst: Burst,
}

impl AlternatingClassifier {
    pub fn new(role: Role, numbering: FlightNumbering) -> Self {
        AlternatingClassifier {
            role,
            numbering,
            phase: 0,
            next_index: 0,
            current: None,
            peer_input: false,
            keys: HashMap::new(),
            burst: Burst::default(),
        }
    }

    /// The most recently started flight.
    pub fn current(&self) -> Option<Flight> {
        self.current
    }

    fn start_flight(&mut self) -> Flight {
        let flight = Flight {
            phase: self.phase,
            index: self.next_index,
        };
        self.next_index += 1;
        self.current = Some(flight);
        debug!("{} begins {}", self.role, flight);
        flight
    }
}

impl FlightClassifier for AlternatingClassifier {
    fn classify(&mut self, record: &Record<'_>) -> Result<Classification, Error> {
        let records = parse_datagram(record.bytes())?;

        if !records.iter().any(|r| r.is_flight_content()) {
            return Ok(Classification::Unflighted);
        }

        let keys: TinyVec<[MessageKey; 8]> = records.iter().filter_map(MessageKey::of).collect();
        let known = keys.iter().find_map(|k| self.keys.get(k).copied());

        let flight = match (known, record.kind()) {
            (Some(flight), _) => flight,
            (None, SendKind::Retransmit) => self.current.ok_or_else(|| {
                Error::Unclassifiable(format!("{} retransmits before any flight", self.role))
            })?,
            (None, SendKind::Initial) => match self.current {
                Some(current) if !self.peer_input => current,
                _ => self.start_flight(),
            },
        };

        for key in keys {
            self.keys.entry(key).or_insert(flight);
        }

        if Some(flight) == self.current {
            self.peer_input = false;
        }

        let opens = self.burst.open(flight);

        if opens && record.kind() == SendKind::Retransmit {
            debug!("{} retransmits {}", self.role, flight);
        }

        Ok(Classification::Flight { flight, opens })
    }

    fn observe_receive(&mut self) {
        self.peer_input = true;
        self.burst.boundary();
    }

    fn observe_timeout(&mut self) {
        self.burst.boundary();
    }

    fn begin_phase(&mut self) {
        self.burst.boundary();
        self.peer_input = true;

        if self.numbering == FlightNumbering::RestartPerPhase {
            self.phase += 1;
            self.next_index = 0;
            self.current = None;
            debug!("{} begins phase {}", self.role, self.phase);
        }
    }
}

/// Trusts the flight the engine attached to each record.
///
/// Records without a flight are accepted only when they carry no handshake
/// content.
#[derive(Debug)]
pub struct TaggedClassifier {
    role: Role,
    highest: Option<Flight>,
    burst: Burst,
}

impl TaggedClassifier {
    pub fn new(role: Role) -> Self {
        TaggedClassifier {
            role,
            highest: None,
            burst: Burst::default(),
        }
    }
}

impl FlightClassifier for TaggedClassifier {
    fn classify(&mut self, record: &Record<'_>) -> Result<Classification, Error> {
        let Some(flight) = record.flight() else {
            let records = parse_datagram(record.bytes())?;
            if records.iter().any(|r| r.is_flight_content()) {
                return Err(Error::Unclassifiable(format!(
                    "{} sent handshake content without a flight",
                    self.role
                )));
            }
            return Ok(Classification::Unflighted);
        };

        if record.kind() == SendKind::Initial {
            if let Some(highest) = self.highest {
                assert!(
                    flight >= highest,
                    "{} sent {} after {}: flights must not go backwards",
                    self.role,
                    flight,
                    highest
                );
            }
            if self.highest != Some(flight) {
                debug!("{} begins {}", self.role, flight);
            }
            self.highest = Some(flight);
        }

        let opens = self.burst.open(flight);

        Ok(Classification::Flight { flight, opens })
    }

    fn observe_receive(&mut self) {
        self.burst.boundary();
    }

    fn observe_timeout(&mut self) {
        self.burst.boundary();
    }

    fn begin_phase(&mut self) {
        self.burst.boundary();
    }
}
