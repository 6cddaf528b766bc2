use crate::core::fingerprint::Fingerprint;

/// Largest possible distance between two fingerprints.
pub const MAX_DISTANCE: u32 = 64;

/// Hamming distance: the number of bit positions at which `a` and `b` differ.
#[inline]
pub fn distance(a: Fingerprint, b: Fingerprint) -> u32 {
    (a.bits() ^ b.bits()).count_ones()
}
