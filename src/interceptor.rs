use crate::flight::{AlternatingClassifier, Classification, FlightClassifier};
use crate::{Config, DropPolicy, Error, Flight, Role, Transmission, TransmissionCounter};

/// Whether a datagram is sent for the first time or repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    Initial,
    Retransmit,
}

/// One outbound datagram on its way to the wire.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    bytes: &'a [u8],
    kind: SendKind,
    flight: Option<Flight>,
}

impl<'a> Record<'a> {
    pub fn new(bytes: &'a [u8], kind: SendKind) -> Self {
        Record {
            bytes,
            kind,
            flight: None,
        }
    }

    pub fn initial(bytes: &'a [u8]) -> Self {
        Self::new(bytes, SendKind::Initial)
    }

    pub fn retransmit(bytes: &'a [u8]) -> Self {
        Self::new(bytes, SendKind::Retransmit)
    }

    /// Attach the flight the engine knows this datagram belongs to.
    ///
    /// Only consulted by a [`TaggedClassifier`](crate::TaggedClassifier).
    pub fn with_flight(mut self, flight: Flight) -> Self {
        self.flight = Some(flight);
        self
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn kind(&self) -> SendKind {
        self.kind
    }

    pub fn flight(&self) -> Option<Flight> {
        self.flight
    }
}

/// What happens to a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Hand it to the transport unchanged.
    Forward,
    /// Silently discard it.
    Discard,
}

/// A decision as recorded by the interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub transmission: Transmission,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub forwarded: u64,
    pub dropped: u64,
}

/// The filter in one side's send path.
///
/// Classifies each datagram, counts flight transmissions and applies the
/// [`DropPolicy`]. A discarded datagram is simply not forwarded; the caller
/// gets no error, just like a datagram lost on the network.
pub struct PacketInterceptor {
    role: Role,
    classifier: Box<dyn FlightClassifier>,
    counter: TransmissionCounter,
    policy: DropPolicy,
    ordinal: u32,
    stats: Stats,
    decisions: Vec<Decision>,
}

impl PacketInterceptor {
    /// Interceptor with the default [`AlternatingClassifier`].
    pub fn new(role: Role, policy: DropPolicy) -> Self {
        Self::with_config(role, policy, &Config::default())
    }

    /// Interceptor numbering flights as `config` says.
    pub fn with_config(role: Role, policy: DropPolicy, config: &Config) -> Self {
        Self::with_classifier(
            role,
            policy,
            AlternatingClassifier::new(role, config.numbering()),
        )
    }

    /// Interceptor with a custom flight classifier.
    pub fn with_classifier(
        role: Role,
        policy: DropPolicy,
        classifier: impl FlightClassifier + 'static,
    ) -> Self {
        PacketInterceptor {
            role,
            classifier: Box::new(classifier),
            counter: TransmissionCounter::new(),
            policy,
            ordinal: 0,
            stats: Stats::default(),
            decisions: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn policy(&self) -> &DropPolicy {
        &self.policy
    }

    /// Decide the fate of one outbound datagram.
    ///
    /// Errors only when the datagram cannot be classified. Forwarding or
    /// dropping it anyway would silently change what the test exercises.
    pub fn on_send(&mut self, record: Record<'_>) -> Result<Verdict, Error> {
        let classification = self.classifier.classify(&record)?;

        let (flight, number) = match classification {
            Classification::Flight {
                flight,
                opens: true,
            } => (Some(flight), self.counter.observe(flight)),
            Classification::Flight {
                flight,
                opens: false,
            } => {
                let Some(number) = self.counter.current(flight) else {
                    panic!("{} continued {} before opening it", self.role, flight);
                };
                (Some(flight), number)
            }
            Classification::Unflighted => (None, 0),
        };

        self.ordinal = self.ordinal.saturating_add(1);

        let transmission = Transmission {
            role: self.role,
            flight,
            number,
            ordinal: self.ordinal,
        };

        let verdict = if self.policy.should_drop(&transmission) {
            Verdict::Discard
        } else {
            Verdict::Forward
        };

        match (verdict, flight) {
            (Verdict::Discard, Some(flight)) => {
                self.stats.dropped += 1;
                debug!(
                    "{} drops {} transmission {} (datagram {})",
                    self.role, flight, number, self.ordinal
                );
            }
            (Verdict::Discard, None) => {
                self.stats.dropped += 1;
                debug!("{} drops datagram {}", self.role, self.ordinal);
            }
            (Verdict::Forward, _) => {
                self.stats.forwarded += 1;
                trace!(
                    "{} forwards datagram {} ({:?} transmission {})",
                    self.role,
                    self.ordinal,
                    flight,
                    number
                );
            }
        }

        self.decisions.push(Decision {
            transmission,
            verdict,
        });

        Ok(verdict)
    }

    /// Peer input was delivered to this side.
    pub fn observe_receive(&mut self) {
        self.classifier.observe_receive();
    }

    /// This side's retransmission timer was serviced.
    pub fn observe_timeout(&mut self) {
        self.classifier.observe_timeout();
    }

    /// Start a new protocol phase, see [`FlightNumbering`](crate::FlightNumbering).
    pub fn begin_phase(&mut self) {
        self.classifier.begin_phase();
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Every decision taken, in send order.
    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    /// Transmissions of `flight` so far.
    pub fn transmissions(&self, flight: Flight) -> Option<u32> {
        self.counter.current(flight)
    }

    /// Distinct transmission numbers of `flight` that were dropped.
    pub fn dropped_transmissions(&self, flight: Flight) -> Vec<u32> {
        let mut numbers: Vec<u32> = self
            .decisions
            .iter()
            .filter(|d| d.verdict == Verdict::Discard && d.transmission.flight == Some(flight))
            .map(|d| d.transmission.number)
            .collect();
        numbers.dedup();
        numbers
    }
}

impl std::fmt::Debug for PacketInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketInterceptor")
            .field("role", &self.role)
            .field("policy", &self.policy)
            .field("ordinal", &self.ordinal)
            .field("stats", &self.stats)
            .finish()
    }
}
