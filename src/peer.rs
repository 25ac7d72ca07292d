//! A DTLS shaped endpoint without any cryptography.
//!
//! [`ScriptedPeer`] plays one side of a handshake by sending the flights of a
//! [`HandshakeShape`] with the record layout a real implementation uses:
//! plaintext handshake headers with stable `message_seq`, ChangeCipherSpec,
//! and opaque records where the real thing would be encrypted. Flights are
//! retransmitted on an exponential backoff until the peer's next flight
//! arrives, which is the behavior a loss filter relies on.
//!
//! Every record body starts with a small tag (flight, part, fragment) so the
//! receiving peer can tell when a flight is complete. Nothing else about the
//! content is meaningful.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::driver::{ConnectionDriver, Outbound};
use crate::message::{parse_datagram, CiphertextHeader, ContentType, DTLSRecord, Header};
use crate::message::{MessageType, ProtocolVersion, WireRecord};
use crate::timer::ExponentialBackoff;
use crate::rng::JitterSource;
use crate::{Config, Error, Role, SendKind};

/// First body byte of DTLS 1.3 application data, never a flight number.
const APP_MARKER: u8 = 0xff;

const TAG_LEN: usize = 5;

/// Unified header with 16 bit sequence and length.
const UNIFIED_HEADER_LEN: usize = 5;

/// The flight layout to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeShape {
    /// Full DTLS 1.2 handshake with mutual authentication.
    ///
    /// With `hello_verify` the server answers the first ClientHello with a
    /// HelloVerifyRequest and the client repeats its hello with a cookie.
    Dtls12 { hello_verify: bool },
    /// DTLS 1.3 handshake. Everything after ServerHello is encrypted and the
    /// server acknowledges the client's Finished.
    Dtls13,
}

impl HandshakeShape {
    fn version(&self) -> ProtocolVersion {
        match self {
            HandshakeShape::Dtls12 { .. } => ProtocolVersion::DTLS1_2,
            // DTLS 1.3 keeps the 1.2 version in plaintext record headers.
            HandshakeShape::Dtls13 => ProtocolVersion::DTLS1_2,
        }
    }

    /// Epoch of application data.
    fn data_epoch(&self) -> u16 {
        match self {
            HandshakeShape::Dtls12 { .. } => 1,
            HandshakeShape::Dtls13 => 3,
        }
    }

    fn plan(&self, role: Role) -> Vec<FlightPlan> {
        use MessageType::*;
        use Part::*;

        let mut plan = match (self, role) {
            (HandshakeShape::Dtls12 { hello_verify }, Role::Client) => {
                let mut flights = vec![FlightPlan::timed(vec![Handshake(ClientHello, 120)])];
                if *hello_verify {
                    flights.push(FlightPlan::timed(vec![Handshake(ClientHello, 152)]));
                }
                flights.push(FlightPlan::timed(vec![
                    Handshake(Certificate, 900),
                    Handshake(ClientKeyExchange, 70),
                    Handshake(CertificateVerify, 80),
                    ChangeCipherSpec,
                    Sealed(1, 40),
                ]));
                flights
            }
            (HandshakeShape::Dtls12 { hello_verify }, Role::Server) => {
                let mut flights = vec![];
                if *hello_verify {
                    // Stateless, answered again on a repeated ClientHello.
                    flights.push(FlightPlan::untimed(vec![Handshake(HelloVerifyRequest, 40)]));
                }
                flights.push(FlightPlan::timed(vec![
                    Handshake(ServerHello, 90),
                    Handshake(Certificate, 900),
                    Handshake(ServerKeyExchange, 150),
                    Handshake(CertificateRequest, 40),
                    Handshake(ServerHelloDone, TAG_LEN),
                ]));
                flights.push(FlightPlan::untimed(vec![ChangeCipherSpec, Sealed(1, 40)]));
                flights
            }
            (HandshakeShape::Dtls13, Role::Client) => vec![
                FlightPlan::timed(vec![Handshake(ClientHello, 250)]),
                FlightPlan::timed(vec![Sealed(2, 40)]),
            ],
            (HandshakeShape::Dtls13, Role::Server) => vec![
                FlightPlan::timed(vec![
                    Handshake(ServerHello, 120),
                    Sealed(2, 60),
                    Sealed(2, 900),
                    Sealed(2, 80),
                    Sealed(2, 40),
                ]),
                // ACK
                FlightPlan::untimed(vec![Sealed(3, 16)]),
            ],
        };

        let mut message_seq = 0;
        for flight in &mut plan {
            for (part, seq) in &mut flight.parts {
                if !matches!(part, Part::ChangeCipherSpec) {
                    *seq = message_seq;
                    message_seq += 1;
                }
            }
        }

        plan
    }
}

#[derive(Debug, Clone, Copy)]
enum Part {
    /// Plaintext handshake message with body length.
    Handshake(MessageType, usize),
    ChangeCipherSpec,
    /// Opaque record of an epoch with body length.
    Sealed(u16, usize),
}

#[derive(Debug)]
struct FlightPlan {
    parts: Vec<(Part, u16)>,
    /// Retransmitted on timeout. Otherwise only repeated when the peer
    /// repeats the flight this one answers.
    timer: bool,
}

impl FlightPlan {
    fn timed(parts: Vec<Part>) -> Self {
        FlightPlan {
            parts: parts.into_iter().map(|p| (p, 0)).collect(),
            timer: true,
        }
    }

    fn untimed(parts: Vec<Part>) -> Self {
        FlightPlan {
            timer: false,
            ..Self::timed(parts)
        }
    }
}

/// Identifies one record of a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tag {
    flight: u8,
    part: u8,
    parts: u8,
    fragment: u8,
    fragments: u8,
}

impl Tag {
    fn write(&self, out: &mut Vec<u8>, len: usize) {
        out.extend_from_slice(&[
            self.flight,
            self.part,
            self.parts,
            self.fragment,
            self.fragments,
        ]);
        out.resize(out.len() + len - TAG_LEN, 0);
    }

    fn parse(body: &[u8]) -> Result<Tag, Error> {
        if body.len() < TAG_LEN {
            return Err(Error::UnexpectedMessage(format!(
                "record body of {} bytes is too short",
                body.len()
            )));
        }
        let tag = Tag {
            flight: body[0],
            part: body[1],
            parts: body[2],
            fragment: body[3],
            fragments: body[4],
        };
        if tag.part >= tag.parts || tag.fragment >= tag.fragments {
            return Err(Error::UnexpectedMessage(format!("bad tag {:?}", tag)));
        }
        Ok(tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeout {
    Disabled,
    Unarmed,
    Armed(Instant),
}

impl Timeout {
    /// Armed `after` from `now`, or disabled if that lies beyond the clock.
    fn after(now: Instant, after: Duration) -> Self {
        match now.checked_add(after) {
            Some(at) => Timeout::Armed(at),
            None => Timeout::Disabled,
        }
    }
}

/// Reassembly of the peer flight we are waiting for.
#[derive(Debug, Default)]
struct Reassembly {
    fragments: HashMap<u8, u8>,
    seen: BTreeSet<(u8, u8)>,
    parts: Option<u8>,
}

impl Reassembly {
    fn insert(&mut self, tag: Tag) {
        self.parts = Some(tag.parts);
        self.fragments.insert(tag.part, tag.fragments);
        self.seen.insert((tag.part, tag.fragment));
    }

    fn is_complete(&self) -> bool {
        let Some(parts) = self.parts else {
            return false;
        };
        self.fragments.len() == parts as usize
            && self.fragments.values().map(|n| *n as usize).sum::<usize>() == self.seen.len()
    }
}

/// One side of a scripted DTLS handshake.
pub struct ScriptedPeer {
    config: Arc<Config>,
    role: Role,
    shape: HandshakeShape,
    rng: JitterSource,

    own: Vec<FlightPlan>,
    peer_flights: usize,

    /// Own flights begun so far.
    sent: usize,
    /// Peer flights completely received so far.
    completed: usize,
    reassembly: Reassembly,

    /// Next record sequence number per epoch.
    sequence: [u64; 4],

    queue_tx: VecDeque<Outbound>,
    app_rx: Vec<Vec<u8>>,

    flight_backoff: ExponentialBackoff,
    flight_timeout: Timeout,
    connect_timeout: Timeout,

    connected: bool,
}

impl ScriptedPeer {
    pub fn new(config: Arc<Config>, role: Role, shape: HandshakeShape) -> Self {
        let mut rng = JitterSource::for_side(config.rng_seed(), role);

        let flight_backoff =
            ExponentialBackoff::new(config.flight_start_rto(), config.flight_retries(), &mut rng);

        ScriptedPeer {
            role,
            shape,
            rng,
            own: shape.plan(role),
            peer_flights: shape.plan(role.peer()).len(),
            sent: 0,
            completed: 0,
            reassembly: Reassembly::default(),
            sequence: [0; 4],
            queue_tx: VecDeque::new(),
            app_rx: Vec::new(),
            flight_backoff,
            flight_timeout: Timeout::Unarmed,
            connect_timeout: Timeout::Unarmed,
            connected: false,
            config,
        }
    }

    pub fn client(config: Arc<Config>, shape: HandshakeShape) -> Self {
        Self::new(config, Role::Client, shape)
    }

    pub fn server(config: Arc<Config>, shape: HandshakeShape) -> Self {
        Self::new(config, Role::Server, shape)
    }

    pub fn shape(&self) -> HandshakeShape {
        self.shape
    }

    /// Number of flights this side sends in a complete handshake.
    pub fn flight_count(&self) -> usize {
        self.own.len()
    }

    /// Own flights begun so far.
    pub fn flights_sent(&self) -> usize {
        self.sent
    }

    /// Whether it is our turn to send the next flight.
    fn ready(&self) -> bool {
        let needed = match self.role {
            Role::Client => self.sent,
            Role::Server => self.sent + 1,
        };
        self.sent < self.own.len() && self.completed >= needed
    }

    fn advance(&mut self) -> Result<(), Error> {
        while self.ready() {
            self.flight_begin()?;
        }

        let done = match self.role {
            Role::Client => self.completed == self.peer_flights,
            Role::Server => self.sent == self.own.len(),
        };

        if done && !self.connected {
            debug!("{} handshake complete", self.role);
            self.connected = true;
            self.flight_stop_resend_timers();
        }

        Ok(())
    }

    fn flight_begin(&mut self) -> Result<(), Error> {
        let index = self.sent;
        self.sent += 1;
        debug!("{} begin flight {}", self.role, index);

        if self.own[index].timer {
            self.flight_backoff.reset(&mut self.rng);
            self.flight_timeout = Timeout::Unarmed;
        } else {
            self.flight_timeout = Timeout::Disabled;
        }

        self.transmit(index, SendKind::Initial)
    }

    fn flight_stop_resend_timers(&mut self) {
        debug!("{} stop connect and flight timeouts", self.role);
        self.flight_timeout = Timeout::Disabled;
        self.connect_timeout = Timeout::Disabled;
    }

    fn flight_resend(&mut self, reason: &str) -> Result<(), Error> {
        let Some(index) = self.sent.checked_sub(1) else {
            return Ok(());
        };
        debug!("{} resending flight {} due to {}", self.role, index, reason);
        self.transmit(index, SendKind::Retransmit)
    }

    /// Serialize a flight with fresh record sequence numbers and queue it.
    fn transmit(&mut self, index: usize, kind: SendKind) -> Result<(), Error> {
        let parts = self.own[index].parts.clone();
        let count = parts.len() as u8;
        let mut records = Vec::new();

        for (i, (part, message_seq)) in parts.into_iter().enumerate() {
            let tag = Tag {
                flight: index as u8,
                part: i as u8,
                parts: count,
                fragment: 0,
                fragments: 1,
            };
            self.push_part(tag, part, message_seq, &mut records)?;
        }

        let mtu = self.config.mtu();
        let mut datagram: Vec<u8> = Vec::with_capacity(mtu);

        for record in records {
            if !datagram.is_empty() && datagram.len() + record.len() > mtu {
                self.queue_tx.push_back(Outbound {
                    bytes: std::mem::take(&mut datagram),
                    kind,
                });
            }
            datagram.extend_from_slice(&record);
        }

        if !datagram.is_empty() {
            self.queue_tx.push_back(Outbound {
                bytes: datagram,
                kind,
            });
        }

        Ok(())
    }

    fn push_part(
        &mut self,
        tag: Tag,
        part: Part,
        message_seq: u16,
        out: &mut Vec<Vec<u8>>,
    ) -> Result<(), Error> {
        let mtu = self.config.mtu();

        match part {
            Part::Handshake(msg_type, len) => {
                let max = mtu - DTLSRecord::HEADER_LEN - Header::LEN;
                for (fragment, (offset, chunk)) in chunks(len, max)?.enumerate() {
                    let mut body = Vec::with_capacity(Header::LEN + chunk);
                    Header {
                        msg_type,
                        length: len as u32,
                        message_seq,
                        fragment_offset: offset as u32,
                        fragment_length: chunk as u32,
                    }
                    .serialize(&mut body);
                    fragment_tag(tag, fragment, len, max).write(&mut body, chunk);
                    out.push(self.plaintext(ContentType::Handshake, 0, &body));
                }
            }
            Part::ChangeCipherSpec => {
                let mut body = vec![1];
                tag.write(&mut body, TAG_LEN);
                out.push(self.plaintext(ContentType::ChangeCipherSpec, 0, &body));
            }
            Part::Sealed(epoch, len) => {
                let overhead = match self.shape {
                    HandshakeShape::Dtls12 { .. } => DTLSRecord::HEADER_LEN,
                    HandshakeShape::Dtls13 => UNIFIED_HEADER_LEN,
                };
                let max = mtu - overhead;
                for (fragment, (_, chunk)) in chunks(len, max)?.enumerate() {
                    let mut body = Vec::with_capacity(chunk);
                    fragment_tag(tag, fragment, len, max).write(&mut body, chunk);
                    out.push(self.sealed(epoch, ContentType::Handshake, &body));
                }
            }
        }

        Ok(())
    }

    fn next_sequence(&mut self, epoch: u16) -> u64 {
        let slot = &mut self.sequence[epoch as usize % 4];
        let seq = *slot;
        *slot += 1;
        seq
    }

    fn plaintext(&mut self, content_type: ContentType, epoch: u16, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(DTLSRecord::HEADER_LEN + body.len());
        DTLSRecord {
            content_type,
            version: self.shape.version(),
            epoch,
            sequence_number: self.next_sequence(epoch),
            length: body.len() as u16,
            fragment: body,
        }
        .serialize(&mut out);
        out
    }

    /// A record standing in for an encrypted one.
    fn sealed(&mut self, epoch: u16, content_type: ContentType, body: &[u8]) -> Vec<u8> {
        match self.shape {
            HandshakeShape::Dtls12 { .. } => self.plaintext(content_type, epoch, body),
            HandshakeShape::Dtls13 => {
                let mut out = Vec::with_capacity(UNIFIED_HEADER_LEN + body.len());
                let seq = self.next_sequence(epoch);
                CiphertextHeader::serialize(epoch, seq, body, &mut out);
                out
            }
        }
    }

    fn receive_tag(&mut self, tag: Tag, repeated: &mut bool) -> Result<(), Error> {
        let flight = tag.flight as usize;

        if flight < self.completed {
            // The flight our last one answered, seen again. Counted once per
            // peer transmission by its first record.
            if flight + 1 == self.completed && tag.part == 0 && tag.fragment == 0 {
                *repeated = true;
            }
            return Ok(());
        }

        if flight > self.completed {
            warn!(
                "{} got flight {} while waiting for {}",
                self.role, flight, self.completed
            );
            return Ok(());
        }

        self.reassembly.insert(tag);

        if self.reassembly.is_complete() {
            debug!("{} received peer flight {}", self.role, flight);
            self.completed += 1;
            self.reassembly = Reassembly::default();
            self.advance()?;
        }

        Ok(())
    }
}

/// Split `len` into even chunks no larger than `max`.
fn chunks(len: usize, max: usize) -> Result<impl Iterator<Item = (usize, usize)>, Error> {
    if max < TAG_LEN {
        return Err(Error::ConfigError(format!("mtu leaves {} bytes per record", max)));
    }

    if len < TAG_LEN {
        return Err(Error::ConfigError(format!("{} byte message cannot carry a tag", len)));
    }

    let n = len.div_ceil(max);
    if n > u8::MAX as usize {
        return Err(Error::ConfigError(format!(
            "{} byte message needs {} fragments",
            len, n
        )));
    }

    let base = len / n;
    let extra = len % n;

    if base < TAG_LEN {
        return Err(Error::ConfigError(format!(
            "{} byte message cannot carry a tag in {} fragments",
            len, n
        )));
    }

    Ok((0..n).scan(0, move |offset, i| {
        let chunk = base + usize::from(i < extra);
        let start = *offset;
        *offset += chunk;
        Some((start, chunk))
    }))
}

fn fragment_tag(tag: Tag, fragment: usize, len: usize, max: usize) -> Tag {
    Tag {
        fragment: fragment as u8,
        fragments: len.div_ceil(max) as u8,
        ..tag
    }
}

impl ConnectionDriver for ScriptedPeer {
    fn role(&self) -> Role {
        self.role
    }

    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        let records = parse_datagram(packet)
            .map_err(|e| Error::UnexpectedMessage(format!("{} got {}", self.role, e)))?;

        let mut repeated = false;

        for record in &records {
            let body: &[u8] = match record {
                WireRecord::Plaintext {
                    record,
                    handshake: Some(_),
                } => &record.fragment[Header::LEN..],
                WireRecord::Plaintext { record, .. } => match record.content_type {
                    ContentType::ApplicationData => {
                        self.app_rx.push(record.fragment.to_vec());
                        continue;
                    }
                    ContentType::Alert => continue,
                    ContentType::ChangeCipherSpec => record.fragment.get(1..).unwrap_or(&[]),
                    _ => record.fragment,
                },
                WireRecord::Ciphertext { body, .. } => {
                    if body.first() == Some(&APP_MARKER) {
                        self.app_rx.push(body[1..].to_vec());
                        continue;
                    }
                    *body
                }
            };

            let tag = Tag::parse(body)?;
            self.receive_tag(tag, &mut repeated)?;
        }

        if repeated {
            let last_untimed = self
                .sent
                .checked_sub(1)
                .map(|i| !self.own[i].timer)
                .unwrap_or(false);

            if last_untimed {
                self.flight_resend("repeated peer flight")?;
            }
        }

        Ok(())
    }

    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if self.connect_timeout == Timeout::Unarmed {
            debug!(
                "{} connect timeout in: {:.03}s",
                self.role,
                self.config.handshake_timeout().as_secs_f32()
            );
            self.connect_timeout = Timeout::after(now, self.config.handshake_timeout());
        }

        // The client opens the handshake.
        if self.role == Role::Client && self.sent == 0 {
            self.advance()?;
        }

        if let Timeout::Armed(connect_timeout) = self.connect_timeout {
            if now >= connect_timeout {
                return Err(Error::Timeout("connect"));
            }
        }

        if self.flight_timeout == Timeout::Unarmed && self.sent > 0 {
            debug!(
                "{} flight timeout in: {:.03}s",
                self.role,
                self.flight_backoff.rto().as_secs_f32()
            );
            self.flight_timeout = Timeout::after(now, self.flight_backoff.rto());
        }

        let Timeout::Armed(flight_timeout) = self.flight_timeout else {
            return Ok(());
        };

        if now >= flight_timeout {
            if self.flight_backoff.can_retry() {
                self.flight_backoff.attempt(&mut self.rng);
                debug!(
                    "{} re-arm flight timeout after attempt {} in {:.03}s",
                    self.role,
                    self.flight_backoff.attempts(),
                    self.flight_backoff.rto().as_secs_f32()
                );
                self.flight_timeout = Timeout::after(now, self.flight_backoff.rto());
                self.flight_resend("flight timeout")?;
            } else {
                return Err(Error::Timeout("handshake"));
            }
        }

        Ok(())
    }

    fn poll_datagram(&mut self) -> Option<Outbound> {
        self.queue_tx.pop_front()
    }

    fn poll_timeout(&self) -> Option<Instant> {
        match (self.connect_timeout, self.flight_timeout) {
            (Timeout::Armed(c), Timeout::Armed(f)) => Some(c.min(f)),
            (Timeout::Armed(c), _) => Some(c),
            (_, Timeout::Armed(f)) => Some(f),
            _ => None,
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::UnexpectedMessage(format!(
                "{} has no connection for application data",
                self.role
            )));
        }

        let epoch = self.shape.data_epoch();
        let bytes = match self.shape {
            HandshakeShape::Dtls12 { .. } => self.plaintext(ContentType::ApplicationData, epoch, data),
            HandshakeShape::Dtls13 => {
                let mut body = Vec::with_capacity(data.len() + 1);
                body.push(APP_MARKER);
                body.extend_from_slice(data);
                self.sealed(epoch, ContentType::ApplicationData, &body)
            }
        };

        self.queue_tx.push_back(Outbound {
            bytes,
            kind: SendKind::Initial,
        });

        Ok(())
    }

    fn take_application_data(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.app_rx)
    }
}

impl std::fmt::Debug for ScriptedPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedPeer")
            .field("role", &self.role)
            .field("shape", &self.shape)
            .field("sent", &self.sent)
            .field("completed", &self.completed)
            .field("connected", &self.connected)
            .finish()
    }
}
