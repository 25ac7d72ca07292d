//! Flight numbering across protocol phases, such as a renegotiation.

use flightdrop::message::{ContentType, DTLSRecord, Header, MessageType, ProtocolVersion};
use flightdrop::{Config, DropPolicy, Flight, FlightNumbering, PacketInterceptor, Record, Role};
use flightdrop::Verdict;

fn handshake(epoch: u16, seq: u64, msg_type: MessageType, message_seq: u16) -> Vec<u8> {
    let mut fragment = Vec::new();
    Header {
        msg_type,
        length: 16,
        message_seq,
        fragment_offset: 0,
        fragment_length: 16,
    }
    .serialize(&mut fragment);
    fragment.extend_from_slice(&[7; 16]);

    let mut out = Vec::new();
    DTLSRecord {
        content_type: ContentType::Handshake,
        version: ProtocolVersion::DTLS1_2,
        epoch,
        sequence_number: seq,
        length: fragment.len() as u16,
        fragment: &fragment,
    }
    .serialize(&mut out);
    out
}

/// A client handshake followed by a second phase in epoch 1.
fn run(numbering: FlightNumbering, policy: DropPolicy) -> (PacketInterceptor, Vec<Verdict>) {
    let config = Config::builder()
        .numbering(numbering)
        .build()
        .expect("valid config");
    let mut filter = PacketInterceptor::with_config(Role::Client, policy, &config);
    let mut verdicts = vec![];

    let hello = handshake(0, 0, MessageType::ClientHello, 0);
    verdicts.push(filter.on_send(Record::initial(&hello)).expect("hello"));
    filter.observe_receive();

    let finished = handshake(0, 1, MessageType::ClientKeyExchange, 1);
    verdicts.push(filter.on_send(Record::initial(&finished)).expect("final"));
    filter.observe_receive();

    filter.begin_phase();

    let again = handshake(1, 0, MessageType::ClientHello, 2);
    verdicts.push(filter.on_send(Record::initial(&again)).expect("phase hello"));
    filter.observe_timeout();
    let again = handshake(1, 1, MessageType::ClientHello, 2);
    verdicts.push(filter.on_send(Record::retransmit(&again)).expect("phase resend"));

    (filter, verdicts)
}

#[test]
fn continuous_numbering_carries_on() {
    let _ = env_logger::try_init();

    let (filter, verdicts) = run(
        FlightNumbering::Continuous,
        DropPolicy::flight(Flight::new(2), 0x1),
    );

    assert_eq!(
        verdicts,
        vec![
            Verdict::Forward,
            Verdict::Forward,
            Verdict::Discard,
            Verdict::Forward
        ]
    );
    assert_eq!(filter.transmissions(Flight::new(2)), Some(2));
    assert_eq!(filter.transmissions(Flight::new(0).in_phase(1)), None);
}

#[test]
fn restarted_numbering_begins_at_zero() {
    let _ = env_logger::try_init();

    let target = Flight::new(0).in_phase(1);
    let (filter, verdicts) = run(
        FlightNumbering::RestartPerPhase,
        DropPolicy::flight(target, 0x1),
    );

    assert_eq!(
        verdicts,
        vec![
            Verdict::Forward,
            Verdict::Forward,
            Verdict::Discard,
            Verdict::Forward
        ]
    );
    assert_eq!(filter.transmissions(target), Some(2));
    assert_eq!(filter.transmissions(Flight::new(0)), Some(1));
    assert_eq!(target.to_string(), "flight 1.0");
}

#[test]
fn first_phase_flight_zero_is_not_dropped_again() {
    let _ = env_logger::try_init();

    // Flight 0 of the first phase only, the restarted flight 0 is distinct.
    let (filter, verdicts) = run(
        FlightNumbering::RestartPerPhase,
        DropPolicy::flight(Flight::new(0), 0x1),
    );

    assert_eq!(verdicts[0], Verdict::Discard);
    assert_eq!(&verdicts[2..], &[Verdict::Forward, Verdict::Forward]);
    assert_eq!(filter.dropped_transmissions(Flight::new(0)), vec![1]);
}
