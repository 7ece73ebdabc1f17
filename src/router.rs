//! Maps a hash to the shard that owns it.
//!
//! Bit budget of a 64-bit hash:
//! - bits 0.. (low): `h1`, probe start inside a shard (`hash & (buckets - 1)`).
//! - bits 32..32+log2(N): shard index.
//! - bits 57..64: `h2`, the control-byte fragment.
//!
//! The three ranges are disjoint as long as a shard has fewer than 2^32
//! buckets, so keys that share a shard are not clustered inside it.

use crate::config::{DEFAULT_SHARD_COUNT, MAX_SHARD_COUNT};
use crate::error::Error;

/// First hash bit used for routing.
pub const ROUTE_SHIFT: u32 = 32;

/// Shard index for `hash` among `shard_count` shards.
///
/// `shard_count` must be a power of two.
#[inline]
pub fn route(hash: u64, shard_count: usize) -> usize {
    debug_assert!(shard_count.is_power_of_two());
    ((hash >> ROUTE_SHIFT) as usize) & (shard_count - 1)
}

/// Validated shard count with a precomputed mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShardRouter {
    mask: usize,
}

impl ShardRouter {
    pub fn new(shard_count: usize) -> Result<Self, Error> {
        if !shard_count.is_power_of_two() || shard_count > MAX_SHARD_COUNT {
            return Err(Error::InvalidShardCount {
                count: shard_count,
                max: MAX_SHARD_COUNT,
            });
        }
        Ok(Self {
            mask: shard_count - 1,
        })
    }

    #[inline]
    pub fn route(&self, hash: u64) -> usize {
        ((hash >> ROUTE_SHIFT) as usize) & self.mask
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.mask + 1
    }
}

impl Default for ShardRouter {
    fn default() -> Self {
        Self {
            mask: DEFAULT_SHARD_COUNT - 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn sip(x: u64) -> u64 {
        let mut h = DefaultHasher::new();
        x.hash(&mut h);
        h.finish()
    }

    #[test]
    fn route_is_pure_and_in_range() {
        let r = ShardRouter::new(8).unwrap();
        for k in 0..1000u64 {
            let h = sip(k);
            let a = r.route(h);
            assert!(a < 8);
            assert_eq!(a, r.route(h));
            assert_eq!(a, route(h, 8));
        }
    }

    #[test]
    fn probe_bits_and_fragment_bits_do_not_move_a_key() {
        let r = ShardRouter::new(64).unwrap();
        let base = 0x0123_4567_89ab_cdefu64;
        let shard = r.route(base);
        // Flip low (probe) bits and the top 7 (control fragment) bits.
        assert_eq!(r.route(base ^ 0xffff_ffff), shard);
        assert_eq!(r.route(base ^ (0x7f << 57)), shard);
        // Flipping a routing bit does.
        assert_ne!(r.route(base ^ (1 << ROUTE_SHIFT)), shard);
    }

    #[test]
    fn single_shard_takes_everything() {
        let r = ShardRouter::new(1).unwrap();
        assert_eq!(r.shard_count(), 1);
        for k in 0..100u64 {
            assert_eq!(r.route(sip(k)), 0);
        }
    }

    #[test]
    fn spreads_keys_over_all_shards() {
        let r = ShardRouter::new(16).unwrap();
        let mut counts = [0usize; 16];
        for k in 0..16_000u64 {
            counts[r.route(sip(k))] += 1;
        }
        // Roughly 1000 each; a shard under 800 would mean a broken bit range.
        assert!(counts.iter().all(|&c| c > 800), "{:?}", counts);
    }

    #[test]
    fn default_router_matches_default_shard_count() {
        assert_eq!(ShardRouter::default().shard_count(), DEFAULT_SHARD_COUNT);
        assert_eq!(
            ShardRouter::new(DEFAULT_SHARD_COUNT).unwrap(),
            ShardRouter::default()
        );
    }
}
