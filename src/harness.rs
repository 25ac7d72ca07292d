//! Two drivers connected back to back through optional loss filters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{Config, ConnectionDriver, DropPolicy, Error, HandshakeShape, PacketInterceptor};
use crate::{Role, ScriptedPeer, SendKind, Stats, Verdict};

struct Side {
    driver: Box<dyn ConnectionDriver>,
    filter: Option<PacketInterceptor>,
    sent: u64,
    delivered: u64,
    retransmitted: u64,
}

impl Side {
    fn new(driver: Box<dyn ConnectionDriver>) -> Self {
        Side {
            driver,
            filter: None,
            sent: 0,
            delivered: 0,
            retransmitted: 0,
        }
    }

    fn report(&self) -> SideReport {
        SideReport {
            sent: self.sent,
            delivered: self.delivered,
            retransmitted: self.retransmitted,
            stats: self.filter.as_ref().map(|f| f.stats()),
        }
    }
}

/// Datagram counts of one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideReport {
    /// Datagrams the driver emitted.
    pub sent: u64,
    /// Datagrams that reached the peer.
    pub delivered: u64,
    /// Emitted datagrams that were retransmissions.
    pub retransmitted: u64,
    /// Filter counters, when the side has a filter.
    pub stats: Option<Stats>,
}

/// Outcome of [`Pair::connect`] or [`Pair::send_receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub rounds: usize,
    /// Simulated time since the pair was created.
    pub elapsed: Duration,
    pub client: SideReport,
    pub server: SideReport,
}

impl Report {
    pub fn side(&self, role: Role) -> &SideReport {
        match role {
            Role::Client => &self.client,
            Role::Server => &self.server,
        }
    }
}

/// A client and a server exchanging datagrams on a simulated clock.
///
/// Each round services both sides' timers and delivers everything they send,
/// in send order and without reordering. Interceptors hear about deliveries
/// and timers as they happen. When nothing is in flight the clock jumps to
/// the earliest pending timeout.
pub struct Pair {
    config: Arc<Config>,
    start: Instant,
    now: Instant,
    rounds: usize,
    client: Side,
    server: Side,
}

impl Pair {
    pub fn new(
        config: Arc<Config>,
        client: impl ConnectionDriver + 'static,
        server: impl ConnectionDriver + 'static,
    ) -> Self {
        assert_eq!(client.role(), Role::Client, "first driver must be the client");
        assert_eq!(server.role(), Role::Server, "second driver must be the server");

        let now = Instant::now();

        Pair {
            config,
            start: now,
            now,
            rounds: 0,
            client: Side::new(Box::new(client)),
            server: Side::new(Box::new(server)),
        }
    }

    /// Two [`ScriptedPeer`]s playing `shape`.
    pub fn scripted(config: Arc<Config>, shape: HandshakeShape) -> Self {
        let client = ScriptedPeer::client(config.clone(), shape);
        let server = ScriptedPeer::server(config.clone(), shape);
        Self::new(config, client, server)
    }

    /// Filter the client's datagrams with `policy`.
    pub fn with_client_filter(self, policy: DropPolicy) -> Self {
        let filter = PacketInterceptor::with_config(Role::Client, policy, &self.config);
        self.with_interceptor(filter)
    }

    /// Filter the server's datagrams with `policy`.
    pub fn with_server_filter(self, policy: DropPolicy) -> Self {
        let filter = PacketInterceptor::with_config(Role::Server, policy, &self.config);
        self.with_interceptor(filter)
    }

    /// Install a prepared interceptor on the side of its role.
    pub fn with_interceptor(mut self, filter: PacketInterceptor) -> Self {
        let role = filter.role();
        self.side_mut(role).filter = Some(filter);
        self
    }

    pub fn interceptor(&self, role: Role) -> Option<&PacketInterceptor> {
        self.side(role).filter.as_ref()
    }

    pub fn is_connected(&self, role: Role) -> bool {
        self.side(role).driver.is_connected()
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn report(&self) -> Report {
        Report {
            rounds: self.rounds,
            elapsed: self.now - self.start,
            client: self.client.report(),
            server: self.server.report(),
        }
    }

    /// Run until both sides are connected.
    pub fn connect(&mut self) -> Result<Report, Error> {
        while !(self.client.driver.is_connected() && self.server.driver.is_connected()) {
            if self.rounds >= self.config.max_rounds() {
                return Err(Error::Stalled(self.rounds));
            }
            self.rounds += 1;

            if !self.round()? {
                self.advance_clock()?;
            }
        }

        debug!(
            "connected after {} rounds, {:.03}s",
            self.rounds,
            (self.now - self.start).as_secs_f32()
        );

        Ok(self.report())
    }

    /// Send one application datagram each way and check it arrived.
    pub fn send_receive(&mut self) -> Result<Report, Error> {
        for role in [Role::Client, Role::Server] {
            let data = greeting(role);
            self.side_mut(role)
                .driver
                .send_application_data(data.as_bytes())?;
        }

        for role in [Role::Client, Role::Server] {
            self.flush(role)?;
        }

        for role in [Role::Client, Role::Server] {
            let data = greeting(role);
            let received = self.side_mut(role.peer()).driver.take_application_data();

            if !received.iter().any(|r| r == data.as_bytes()) {
                return Err(Error::DataLost(role));
            }
        }

        Ok(self.report())
    }

    /// Service timers and deliver output of both sides.
    ///
    /// Returns whether any datagram was sent.
    fn round(&mut self) -> Result<bool, Error> {
        let mut progress = false;
        let now = self.now;

        for role in [Role::Client, Role::Server] {
            // Output caused by input from the peer.
            progress |= self.flush(role)?;

            let side = self.side_mut(role);
            let due = side.driver.poll_timeout().is_some_and(|t| t <= now);
            if due {
                if let Some(filter) = side.filter.as_mut() {
                    filter.observe_timeout();
                }
            }
            side.driver.handle_timeout(now)?;

            progress |= self.flush(role)?;
        }

        Ok(progress)
    }

    /// Send everything `role` has queued, through its filter.
    fn flush(&mut self, role: Role) -> Result<bool, Error> {
        let (side, peer) = self.split(role);
        let mut any = false;

        while let Some(out) = side.driver.poll_datagram() {
            any = true;
            side.sent += 1;
            if out.kind == SendKind::Retransmit {
                side.retransmitted += 1;
            }

            let verdict = match side.filter.as_mut() {
                Some(filter) => filter.on_send(out.record())?,
                None => Verdict::Forward,
            };

            if verdict == Verdict::Discard {
                continue;
            }

            side.delivered += 1;
            if let Some(filter) = peer.filter.as_mut() {
                filter.observe_receive();
            }
            peer.driver.handle_packet(&out.bytes)?;
        }

        Ok(any)
    }

    fn advance_clock(&mut self) -> Result<(), Error> {
        let next = [&self.client, &self.server]
            .iter()
            .filter_map(|s| s.driver.poll_timeout())
            .min();

        let Some(next) = next else {
            return Err(Error::Stalled(self.rounds));
        };

        if next > self.now {
            trace!(
                "clock jumps {:.03}s",
                (next - self.now).as_secs_f32()
            );
            self.now = next;
        }

        Ok(())
    }

    fn side(&self, role: Role) -> &Side {
        match role {
            Role::Client => &self.client,
            Role::Server => &self.server,
        }
    }

    fn side_mut(&mut self, role: Role) -> &mut Side {
        match role {
            Role::Client => &mut self.client,
            Role::Server => &mut self.server,
        }
    }

    /// The sending side and its peer.
    fn split(&mut self, role: Role) -> (&mut Side, &mut Side) {
        match role {
            Role::Client => (&mut self.client, &mut self.server),
            Role::Server => (&mut self.server, &mut self.client),
        }
    }
}

fn greeting(role: Role) -> String {
    format!("hello from {}", role)
}

impl std::fmt::Debug for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pair")
            .field("rounds", &self.rounds)
            .field("client", &self.client.report())
            .field("server", &self.server.report())
            .finish()
    }
}
