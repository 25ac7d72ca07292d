use std::time::Duration;

use crate::message::DTLSRecord;
use crate::{Error, FlightNumbering};

/// Smallest MTU that still fits a record header, a handshake header and
/// some payload.
const MIN_MTU: usize = 64;

/// Configuration of the scripted peers, the harness and flight numbering.
#[derive(Debug, Clone)]
pub struct Config {
    mtu: usize,
    flight_start_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    rng_seed: Option<u64>,
    numbering: FlightNumbering,
    max_rounds: usize,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            mtu: 1150,
            flight_start_rto: Duration::from_secs(1),
            flight_retries: 4,
            handshake_timeout: Duration::from_secs(40),
            rng_seed: None,
            numbering: FlightNumbering::Continuous,
            max_rounds: 500,
        }
    }

    /// Max transmission unit.
    ///
    /// The largest datagrams a scripted peer produces.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Time of first retry.
    ///
    /// Every flight restarts with this value.
    /// Doubled for every retry with a ±25% jitter.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Max number of retries per flight.
    ///
    /// A flight is transmitted at most `flight_retries + 1` times.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Timeout for the entire handshake, regardless of flights.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Seed for the retransmission jitter.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }

    /// How flight numbers behave across protocol phases.
    #[inline(always)]
    pub fn numbering(&self) -> FlightNumbering {
        self.numbering
    }

    /// Upper bound on harness rounds before giving up.
    #[inline(always)]
    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    mtu: usize,
    flight_start_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    rng_seed: Option<u64>,
    numbering: FlightNumbering,
    max_rounds: usize,
}

impl ConfigBuilder {
    /// Set the max transmission unit (MTU).
    ///
    /// Defaults to 1150.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the time of first retry.
    ///
    /// Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Set the max number of retries per flight.
    ///
    /// Defaults to 4.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Set the timeout for the entire handshake, regardless of flights.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Seed the retransmission jitter for reproducible runs.
    ///
    /// Defaults to unseeded.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Set how flight numbers behave across protocol phases.
    ///
    /// Defaults to [`FlightNumbering::Continuous`].
    pub fn numbering(mut self, numbering: FlightNumbering) -> Self {
        self.numbering = numbering;
        self
    }

    /// Set the harness round limit.
    ///
    /// Defaults to 500.
    pub fn max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::ConfigError` for an MTU too small to carry a
    /// handshake record, or for zero retries/rounds.
    pub fn build(self) -> Result<Config, Error> {
        if self.mtu < MIN_MTU {
            return Err(Error::ConfigError(format!(
                "mtu {} is below the minimum of {}",
                self.mtu, MIN_MTU
            )));
        }

        if self.mtu > DTLSRecord::HEADER_LEN + u16::MAX as usize {
            return Err(Error::ConfigError(format!("mtu {} is too large", self.mtu)));
        }

        if self.flight_retries == 0 {
            return Err(Error::ConfigError("flight_retries must be at least 1".into()));
        }

        if self.max_rounds == 0 {
            return Err(Error::ConfigError("max_rounds must be at least 1".into()));
        }

        Ok(Config {
            mtu: self.mtu,
            flight_start_rto: self.flight_start_rto,
            flight_retries: self.flight_retries,
            handshake_timeout: self.handshake_timeout,
            rng_seed: self.rng_seed,
            numbering: self.numbering,
            max_rounds: self.max_rounds,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}
