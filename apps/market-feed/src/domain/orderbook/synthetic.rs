//! Synthetic ladder generator.
//!
//! Produces a plausible top-of-book around an anchor price when no live
//! depth has been seen recently. Offsets accumulate level by level, so each
//! side is strictly monotonic.

use rand::Rng;
use rust_decimal::Decimal;

use crate::domain::streaming::Level;

/// Price step between adjacent levels, in cents: [1.00, 6.00).
const STEP_CENTS: std::ops::Range<i64> = 100..600;

/// Level size, in millionths: [0.1, 2.1).
const SIZE_MICROS: std::ops::Range<i64> = 100_000..2_100_000;

/// Generate `depth` bid and ask levels around `anchor`, best first.
///
/// Bids stop early if prices would fall to zero or below.
pub fn generate_ladder<R: Rng + ?Sized>(
    anchor: Decimal,
    depth: usize,
    rng: &mut R,
) -> (Vec<Level>, Vec<Level>) {
    let mut bids = Vec::with_capacity(depth);
    let mut offset = Decimal::ZERO;
    for _ in 0..depth {
        offset += Decimal::new(rng.random_range(STEP_CENTS), 2);
        let price = (anchor - offset).round_dp(2);
        if price <= Decimal::ZERO {
            break;
        }
        bids.push((price, random_size(rng)));
    }

    let mut asks = Vec::with_capacity(depth);
    let mut offset = Decimal::ZERO;
    for _ in 0..depth {
        offset += Decimal::new(rng.random_range(STEP_CENTS), 2);
        asks.push(((anchor + offset).round_dp(2), random_size(rng)));
    }

    (bids, asks)
}

fn random_size<R: Rng + ?Sized>(rng: &mut R) -> Decimal {
    Decimal::new(rng.random_range(SIZE_MICROS), 6)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn ladder_is_strictly_monotonic() {
        let mut rng = StdRng::seed_from_u64(7);
        let anchor = Decimal::new(6_723_456, 2);

        let (bids, asks) = generate_ladder(anchor, 15, &mut rng);

        assert_eq!(bids.len(), 15);
        assert_eq!(asks.len(), 15);
        assert!(bids.windows(2).all(|w| w[0].0 > w[1].0));
        assert!(asks.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(bids[0].0 < anchor);
        assert!(asks[0].0 > anchor);
    }

    #[test]
    fn sizes_within_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        let (bids, asks) = generate_ladder(Decimal::new(100, 0), 15, &mut rng);

        for (_, size) in bids.iter().chain(asks.iter()) {
            assert!(*size >= Decimal::new(1, 1));
            assert!(*size < Decimal::new(21, 1));
        }
    }

    #[test]
    fn bids_stop_before_zero() {
        let mut rng = StdRng::seed_from_u64(3);
        let (bids, asks) = generate_ladder(Decimal::new(5, 0), 15, &mut rng);

        assert!(bids.len() < 5);
        assert!(bids.iter().all(|(p, _)| *p > Decimal::ZERO));
        assert_eq!(asks.len(), 15);
    }
}
