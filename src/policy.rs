use std::fmt;

use crate::{Error, Flight, Role};

/// Which transmissions to drop.
///
/// Bit `i` set means the `i + 1`-th transmission is dropped. `0x7` drops the
/// original send and the next two retransmissions, so the fourth attempt is
/// the first to get through.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DropMask(u32);

impl DropMask {
    /// Never drops.
    pub const NONE: DropMask = DropMask(0);

    /// Highest transmission number a mask can address.
    pub const MAX_TRANSMISSION: u32 = u32::BITS;

    pub const fn new(bits: u32) -> Self {
        DropMask(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Whether transmission `number` (1-based) is dropped.
    pub fn drops(&self, number: u32) -> bool {
        assert!(number > 0, "transmission numbers are 1-based");
        number <= Self::MAX_TRANSMISSION && self.0 & (1 << (number - 1)) != 0
    }

    /// How many drops this mask causes for a flight sent at most
    /// `max_transmissions` times. Bits beyond that are inert.
    pub fn reachable_drops(&self, max_transmissions: u32) -> u32 {
        let low = if max_transmissions >= Self::MAX_TRANSMISSION {
            u32::MAX
        } else {
            (1 << max_transmissions) - 1
        };
        (self.0 & low).count_ones()
    }
}

impl From<u32> for DropMask {
    fn from(bits: u32) -> Self {
        DropMask(bits)
    }
}

impl TryFrom<u64> for DropMask {
    type Error = Error;

    fn try_from(bits: u64) -> Result<Self, Self::Error> {
        u32::try_from(bits)
            .map(DropMask)
            .map_err(|_| Error::MaskTooWide(bits))
    }
}

impl fmt::Debug for DropMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DropMask({:#x})", self.0)
    }
}

/// Which transmissions a mask is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// Every flight, each by its own transmission count.
    EveryFlight,
    /// One flight. All others pass.
    Only(Flight),
    /// The n-th datagram through the interceptor, regardless of flight or
    /// content. Datagrams after the 32nd always pass.
    Sequential,
}

/// One datagram about to be sent, as seen by a [`DropPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmission {
    pub role: Role,
    /// `None` for datagrams without handshake content.
    pub flight: Option<Flight>,
    /// 1-based transmission number of `flight`. 0 when there is no flight.
    pub number: u32,
    /// 1-based position of the datagram in the interceptor's send order.
    pub ordinal: u32,
}

/// Immutable drop decision.
///
/// The decision is a pure function of the [`Transmission`], the same input
/// always gives the same answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropPolicy {
    client: DropMask,
    server: DropMask,
    selector: Selector,
}

impl DropPolicy {
    /// Drops nothing.
    pub fn none() -> Self {
        Self::every_flight(0)
    }

    /// Apply `mask` to every flight independently.
    pub fn every_flight(mask: u32) -> Self {
        Self::per_role(Selector::EveryFlight, mask, mask)
    }

    /// Apply `mask` to one flight only.
    pub fn flight(flight: Flight, mask: u32) -> Self {
        Self::per_role(Selector::Only(flight), mask, mask)
    }

    /// Apply `mask` to datagrams in send order.
    pub fn sequential(mask: u32) -> Self {
        Self::per_role(Selector::Sequential, mask, mask)
    }

    /// Separate masks for client originated and server originated sends.
    pub fn per_role(selector: Selector, client: u32, server: u32) -> Self {
        DropPolicy {
            client: DropMask(client),
            server: DropMask(server),
            selector,
        }
    }

    pub fn selector(&self) -> Selector {
        self.selector
    }

    pub fn mask(&self, role: Role) -> DropMask {
        match role {
            Role::Client => self.client,
            Role::Server => self.server,
        }
    }

    /// Whether this transmission should vanish.
    pub fn should_drop(&self, t: &Transmission) -> bool {
        let mask = self.mask(t.role);

        if self.selector == Selector::Sequential {
            return t.ordinal <= DropMask::MAX_TRANSMISSION && mask.drops(t.ordinal);
        }

        let Some(flight) = t.flight else {
            return false;
        };

        match self.selector {
            Selector::EveryFlight => mask.drops(t.number),
            Selector::Only(target) => flight == target && mask.drops(t.number),
            Selector::Sequential => unreachable!(),
        }
    }

    /// Shorthand for flight based selectors.
    pub fn should_drop_flight(&self, role: Role, flight: Flight, number: u32) -> bool {
        self.should_drop(&Transmission {
            role,
            flight: Some(flight),
            number,
            ordinal: 0,
        })
    }
}

impl Default for DropPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flight_tx(role: Role, flight: u32, number: u32) -> Transmission {
        Transmission {
            role,
            flight: Some(Flight::new(flight)),
            number,
            ordinal: 1,
        }
    }

    #[test]
    fn bit_i_drops_transmission_i_plus_one() {
        let m = DropMask::new(0x7);
        assert!(m.drops(1));
        assert!(m.drops(2));
        assert!(m.drops(3));
        assert!(!m.drops(4));

        let m = DropMask::new(0xe);
        assert!(!m.drops(1));
        assert!(m.drops(2));
        assert!(m.drops(4));
        assert!(!m.drops(5));
    }

    #[test]
    fn zero_mask_never_drops() {
        let p = DropPolicy::every_flight(0);
        for n in 1..=40 {
            assert!(!p.should_drop_flight(Role::Client, Flight::new(0), n));
        }
    }

    #[test]
    fn numbers_beyond_mask_width_pass() {
        let m = DropMask::new(u32::MAX);
        assert!(m.drops(32));
        assert!(!m.drops(33));
    }

    #[test]
    #[should_panic(expected = "1-based")]
    fn transmission_zero_is_a_contract_violation() {
        DropMask::new(1).drops(0);
    }

    #[test]
    fn only_targets_one_flight() {
        let p = DropPolicy::flight(Flight::new(1), 0x1);
        assert!(!p.should_drop(&flight_tx(Role::Client, 0, 1)));
        assert!(p.should_drop(&flight_tx(Role::Client, 1, 1)));
        assert!(!p.should_drop(&flight_tx(Role::Client, 1, 2)));
    }

    #[test]
    fn first_flight_once_then_passes() {
        let p = DropPolicy::flight(Flight::new(0), 0x1);
        assert!(p.should_drop_flight(Role::Client, Flight::new(0), 1));
        assert!(!p.should_drop_flight(Role::Client, Flight::new(0), 2));
    }

    #[test]
    fn per_role_masks_are_independent() {
        let p = DropPolicy::per_role(Selector::EveryFlight, 0x15, 0x5);
        let client: Vec<u32> = (1..=6)
            .filter(|n| p.should_drop(&flight_tx(Role::Client, 0, *n)))
            .collect();
        let server: Vec<u32> = (1..=6)
            .filter(|n| p.should_drop(&flight_tx(Role::Server, 0, *n)))
            .collect();
        assert_eq!(client, vec![1, 3, 5]);
        assert_eq!(server, vec![1, 3]);
    }

    #[test]
    fn decisions_are_pure() {
        let p = DropPolicy::every_flight(0x15);
        let t = flight_tx(Role::Server, 2, 3);
        let first = p.should_drop(&t);
        for _ in 0..10 {
            assert_eq!(p.should_drop(&t), first);
        }
    }

    #[test]
    fn unflighted_only_drops_in_sequential_mode() {
        let data = Transmission {
            role: Role::Client,
            flight: None,
            number: 0,
            ordinal: 1,
        };
        assert!(!DropPolicy::every_flight(u32::MAX).should_drop(&data));
        assert!(DropPolicy::sequential(0x1).should_drop(&data));
    }

    #[test]
    fn sequential_uses_ordinal() {
        let p = DropPolicy::sequential(0x2);
        let mut t = flight_tx(Role::Client, 0, 1);
        t.ordinal = 1;
        assert!(!p.should_drop(&t));
        t.ordinal = 2;
        assert!(p.should_drop(&t));
        t.ordinal = 33;
        assert!(!DropPolicy::sequential(u32::MAX).should_drop(&t));
    }

    #[test]
    fn reachable_drops_ignores_inert_bits() {
        let m = DropMask::new(0x15);
        assert_eq!(m.reachable_drops(1), 1);
        assert_eq!(m.reachable_drops(3), 2);
        assert_eq!(m.reachable_drops(5), 3);
        assert_eq!(m.reachable_drops(32), 3);
        assert_eq!(m.reachable_drops(100), 3);
        assert_eq!(DropMask::NONE.reachable_drops(32), 0);
    }

    #[test]
    fn wide_masks_are_rejected() {
        assert_eq!(DropMask::try_from(0xffu64).unwrap(), DropMask::new(0xff));
        assert!(matches!(
            DropMask::try_from(1u64 << 40),
            Err(Error::MaskTooWide(_))
        ));
    }
}
