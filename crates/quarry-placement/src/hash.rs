//! Hash function for ring rotation.
//!
//! Candidate order for a brick is derived by rotating the balanced
//! device ring by a hash of the brick id. The hash must be:
//! - Deterministic: same brick id always produces the same rotation
//! - Uniform: rotations spread evenly across the ring
//! - Fast: computed for every placement decision

use std::hash::{Hash, Hasher};

use siphasher::sip::SipHasher13;
use uuid::Uuid;

/// Fixed ring hash key so every process computes the same rotation.
const RING_HASH_KEY: (u64, u64) = (0x0706_0504_0302_0100, 0x0f0e_0d0c_0b0a_0908);

/// Compute the ring rotation hash for the given id.
///
/// Uses SipHash-1-3 for speed while maintaining good distribution.
#[inline]
#[must_use]
pub fn ring_hash(id: Uuid) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(RING_HASH_KEY.0, RING_HASH_KEY.1);
    id.as_bytes().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_hash_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(ring_hash(id), ring_hash(id));
    }

    #[test]
    fn test_ring_hash_different_inputs() {
        assert_ne!(ring_hash(Uuid::new_v4()), ring_hash(Uuid::new_v4()));
    }

    #[test]
    fn test_ring_hash_distribution() {
        let ring_len = 16u64;
        let mut counts = vec![0u32; ring_len as usize];
        for _ in 0..4000 {
            counts[(ring_hash(Uuid::new_v4()) % ring_len) as usize] += 1;
        }
        // Rotations should land in every slot with rough uniformity.
        let expected = 4000.0 / 16.0;
        for count in counts {
            let ratio = f64::from(count) / expected;
            assert!(ratio > 0.4 && ratio < 1.6, "distribution too skewed: {ratio}");
        }
    }
}
