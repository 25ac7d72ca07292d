//! Selective flight loss in DTLS 1.2 handshakes.


use flightdrop::{DropPolicy, Error, Flight, Pair, Role, Selector, Verdict};
use flight_common::*;

#[test]
fn dtls12_drop_first_client_flight_once() {
    let _ = env_logger::try_init();

    let policy = DropPolicy::flight(Flight::new(0), 0x1);
    assert!(!policy.should_drop_flight(Role::Client, Flight::new(0), 2));

    let mut pair = Pair::scripted(config(), NO_COOKIE).with_client_filter(policy);
    let report = pair.connect().expect("handshake completes");

    let client = pair.interceptor(Role::Client).expect("client filter");
    assert_eq!(client.dropped_transmissions(Flight::new(0)), vec![1]);
    assert_eq!(client.transmissions(Flight::new(0)), Some(2));
    assert_eq!(client.dropped_transmissions(Flight::new(1)), Vec::<u32>::new());
    assert_eq!(report.client.retransmitted, 1);
    assert_drops_reachable(client);

    pair.send_receive().expect("data flows both ways");
}

#[test]
fn dtls12_drop_server_flight_three_times() {
    let _ = env_logger::try_init();

    let mut pair = Pair::scripted(config(), NO_COOKIE)
        .with_server_filter(DropPolicy::flight(Flight::new(0), 0x7));
    pair.connect().expect("handshake completes");

    let server = pair.interceptor(Role::Server).expect("server filter");
    assert_eq!(server.dropped_transmissions(Flight::new(0)), vec![1, 2, 3]);
    assert_eq!(server.transmissions(Flight::new(0)), Some(4));
    assert_eq!(server.transmissions(Flight::new(1)), Some(1));
    assert_drops_reachable(server);

    pair.send_receive().expect("data flows both ways");
}

#[test]
fn dtls12_mask_bits_beyond_transmissions_are_inert() {
    let _ = env_logger::try_init();

    // The client's final flight goes through on the first try, so the
    // higher bits of 0xe never come into play.
    let mut pair = Pair::scripted(config(), NO_COOKIE)
        .with_client_filter(DropPolicy::flight(Flight::new(1), 0xe));
    let report = pair.connect().expect("handshake completes");

    let client = pair.interceptor(Role::Client).expect("client filter");
    assert_eq!(client.transmissions(Flight::new(1)), Some(1));
    assert!(client.dropped_transmissions(Flight::new(1)).is_empty());
    assert_eq!(report.client.stats.map(|s| s.dropped), Some(0));
}

#[test]
fn dtls12_lost_final_flight_needs_client_retransmits() {
    let _ = env_logger::try_init();

    // The server's last flight has no timer. Only a repeated client flight
    // makes it send again, and the client's repeats are dropped thrice.
    let mut pair = Pair::scripted(config(), NO_COOKIE)
        .with_client_filter(DropPolicy::flight(Flight::new(1), 0xe))
        .with_server_filter(DropPolicy::flight(Flight::new(1), 0x1));
    pair.connect().expect("handshake completes");

    let client = pair.interceptor(Role::Client).expect("client filter");
    assert_eq!(client.transmissions(Flight::new(1)), Some(5));
    assert_eq!(client.dropped_transmissions(Flight::new(1)), vec![2, 3, 4]);
    assert_drops_reachable(client);

    let server = pair.interceptor(Role::Server).expect("server filter");
    assert_eq!(server.transmissions(Flight::new(1)), Some(2));
    assert_eq!(server.dropped_transmissions(Flight::new(1)), vec![1]);
    assert_drops_reachable(server);
}

#[test]
fn dtls12_both_sides_drop_every_flight() {
    let _ = env_logger::try_init();

    let policy = DropPolicy::per_role(Selector::EveryFlight, 0x15, 0x5);
    let mut pair = Pair::scripted(config(), NO_COOKIE)
        .with_client_filter(policy)
        .with_server_filter(policy);
    pair.connect().expect("handshake completes");

    let client = pair.interceptor(Role::Client).expect("client filter");
    let server = pair.interceptor(Role::Server).expect("server filter");

    assert_eq!(flights(client), vec![Flight::new(0), Flight::new(1)]);
    assert_eq!(flights(server), vec![Flight::new(0), Flight::new(1)]);

    for flight in flights(client) {
        let dropped = client.dropped_transmissions(flight);
        assert_eq!(dropped.first(), Some(&1));
        assert!(dropped.iter().all(|n| [1, 3, 5].contains(n)));
    }
    for flight in flights(server) {
        let dropped = server.dropped_transmissions(flight);
        assert_eq!(dropped.first(), Some(&1));
        assert!(dropped.iter().all(|n| [1, 3].contains(n)));
    }

    assert_drops_reachable(client);
    assert_drops_reachable(server);

    // Application data is not part of any flight.
    pair.send_receive().expect("data flows both ways");
}

#[test]
fn dtls12_application_data_is_never_dropped() {
    let _ = env_logger::try_init();

    let mut pair = Pair::scripted(config(), NO_COOKIE)
        .with_client_filter(DropPolicy::every_flight(0x1));
    pair.connect().expect("handshake completes");
    pair.send_receive().expect("data flows both ways");

    let client = pair.interceptor(Role::Client).expect("client filter");
    let last = client.decisions().last().expect("decisions");
    assert_eq!(last.transmission.flight, None);
    assert_eq!(last.verdict, Verdict::Forward);
}

#[test]
fn dtls12_hello_verify_request_is_resent_on_repeated_hello() {
    let _ = env_logger::try_init();

    let mut pair = Pair::scripted(config(), COOKIE)
        .with_server_filter(DropPolicy::flight(Flight::new(0), 0x1));
    let report = pair.connect().expect("handshake completes");

    let server = pair.interceptor(Role::Server).expect("server filter");
    assert_eq!(server.transmissions(Flight::new(0)), Some(2));
    assert_eq!(server.dropped_transmissions(Flight::new(0)), vec![1]);
    assert_eq!(flights(server).len(), 3);

    // The client's repeated hello is what brought the request back.
    assert_eq!(report.client.retransmitted, 1);
    assert_eq!(report.server.retransmitted, 1);
}

#[test]
fn dtls12_every_mask_drops_what_it_can_reach() {
    let _ = env_logger::try_init();

    for mask in [0x1, 0x2, 0x3, 0x5, 0x7] {
        let mut pair = Pair::scripted(config(), COOKIE)
            .with_client_filter(DropPolicy::every_flight(mask))
            .with_server_filter(DropPolicy::every_flight(mask));
        pair.connect()
            .unwrap_or_else(|e| panic!("mask {:#x}: {}", mask, e));

        for role in [Role::Client, Role::Server] {
            let filter = pair.interceptor(role).expect("filter");
            assert_eq!(flights(filter).len(), 3, "mask {:#x} {}", mask, role);
            assert_drops_reachable(filter);
        }
    }
}

#[test]
fn dtls12_zero_mask_is_no_filter() {
    let _ = env_logger::try_init();

    let mut plain = Pair::scripted(config(), COOKIE);
    let plain = plain.connect().expect("handshake completes");

    let mut filtered = Pair::scripted(config(), COOKIE)
        .with_client_filter(DropPolicy::every_flight(0x0))
        .with_server_filter(DropPolicy::every_flight(0x0));
    let filtered = filtered.connect().expect("handshake completes");

    assert_eq!(plain.rounds, filtered.rounds);
    assert_eq!(plain.elapsed, filtered.elapsed);
    for role in [Role::Client, Role::Server] {
        let a = plain.side(role);
        let b = filtered.side(role);
        assert_eq!(a.sent, b.sent);
        assert_eq!(a.delivered, b.delivered);
        assert_eq!(b.retransmitted, 0);
        assert_eq!(b.stats.map(|s| s.dropped), Some(0));
        assert_eq!(b.stats.map(|s| s.forwarded), Some(b.sent));
    }
}

#[test]
fn dtls12_exhausted_retries_fail_the_handshake() {
    let _ = env_logger::try_init();

    let config = config_with(|b| b.flight_retries(2));
    let mut pair = Pair::scripted(config, NO_COOKIE)
        .with_client_filter(DropPolicy::flight(Flight::new(0), 0x7));

    match pair.connect() {
        Err(Error::Timeout(_)) => {}
        r => panic!("expected timeout, got {:?}", r),
    }

    let client = pair.interceptor(Role::Client).expect("client filter");
    assert_eq!(client.dropped_transmissions(Flight::new(0)), vec![1, 2, 3]);
}
