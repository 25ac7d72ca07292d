//! Retransmission jitter that can be replayed.
//!
//! With [`Config::rng_seed`](crate::Config::rng_seed) set, two runs of the
//! same scenario time their retransmissions identically.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::Role;

pub struct JitterSource {
    seeded: Option<StdRng>,
}

impl JitterSource {
    /// Jitter for one side of a connection.
    ///
    /// Both sides derive their own stream from a shared seed, so a client and
    /// a server never back off in lockstep. Without a seed the thread-local
    /// generator is used.
    pub fn for_side(seed: Option<u64>, role: Role) -> Self {
        let seeded = seed.map(|s| {
            let s = match role {
                Role::Client => s,
                Role::Server => s.rotate_left(32) ^ 0x5eed,
            };
            StdRng::seed_from_u64(s)
        });

        JitterSource { seeded }
    }

    /// A fraction in `[-spread / 2, spread / 2)`.
    pub fn jitter(&mut self, spread: f32) -> f32 {
        let unit: f32 = match self.seeded.as_mut() {
            Some(rng) => rng.random(),
            None => rand::random(),
        };
        unit * spread - spread / 2.0
    }
}

impl std::fmt::Debug for JitterSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitterSource")
            .field("seeded", &self.seeded.is_some())
            .finish()
    }
}
