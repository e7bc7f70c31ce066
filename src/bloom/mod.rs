use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::error::{Error, Result};

/// Probabilistic data structure: "is this key in the set?"
///
/// - If any probe bit is 0 → key is DEFINITELY NOT in the set
/// - If all probe bits are 1 → key is PROBABLY in the set (false positive possible)
///
/// Every tree node carries one, sized for the node's key-range width.
/// A read deserializes the filter from the first block of the node's log
/// file and skips the rest of the file (and the whole subtree walk) when
/// the filter rejects the key.
///
/// Sizing, for `n` expected items at false-positive probability `p`:
/// ```text
///   m = ceil(-n·ln(p) / ln(2)²)     bits
///   k = floor((m/n)·ln(2))          hash functions (min 1)
/// ```
///
/// Probe `i` is an xxh3 hash of the key seeded with `i`, reduced modulo
/// `m`. Bits are only ever set, never cleared — even when keys are later
/// compacted away. That avoids rebuild cost on every compaction at the
/// price of a rising false-positive rate; `needs_rebuild` reports when
/// the estimated rate has drifted past twice the configured target so
/// the owner can rebuild at the next persist.
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u32,
    num_hashes: u32,
    fp_prob: f64,
    items_added: u64,
}

impl BloomFilter {
    /// Create a filter sized for `expected_items` at the given false
    /// positive probability.
    pub fn new(expected_items: u64, fp_prob: f64) -> Result<Self> {
        if expected_items == 0 {
            return Err(Error::InvalidParameter(
                "filter expected_items must be > 0".into(),
            ));
        }
        if !(fp_prob > 0.0 && fp_prob < 1.0) {
            return Err(Error::InvalidParameter(format!(
                "filter probability must be in (0, 1), got {fp_prob}"
            )));
        }

        // m = -(n·ln p) / ln(2)²
        let n = expected_items as f64;
        let ln2 = std::f64::consts::LN_2;
        let num_bits = (-(n * fp_prob.ln()) / (ln2 * ln2)).ceil() as u32;
        let num_bits = num_bits.max(1);

        // k = (m/n)·ln 2
        let num_hashes = ((num_bits as f64 / n) * ln2).floor() as u32;
        let num_hashes = num_hashes.max(1);

        let num_words = (num_bits as usize).div_ceil(64);
        Ok(BloomFilter {
            bits: vec![0u64; num_words],
            num_bits,
            num_hashes,
            fp_prob,
            items_added: 0,
        })
    }

    /// Add a key to the filter. Idempotent on the bit vector, but the
    /// insertion counter feeding `estimated_fpr` assumes callers only
    /// insert keys the node does not already hold.
    pub fn insert(&mut self, key: &[u8]) {
        for i in 0..self.num_hashes {
            let pos = self.probe(key, i);
            self.set_bit(pos);
        }
        self.items_added += 1;
    }

    /// Check if a key MIGHT be in the set.
    /// false → definitely not here. true → probably here.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        for i in 0..self.num_hashes {
            if !self.check_bit(self.probe(key, i)) {
                return false;
            }
        }
        true
    }

    /// Estimated current false-positive rate: `(1 - e^(-k·added/m))^k`.
    ///
    /// Uses the insertion count rather than the sizing parameter, so the
    /// estimate keeps climbing as compacted-away keys are re-added over
    /// the filter's lifetime.
    pub fn estimated_fpr(&self) -> f64 {
        let k = self.num_hashes as f64;
        let m = self.num_bits as f64;
        let n = self.items_added as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    /// Whether the filter has degraded past twice its configured target
    /// and should be rebuilt at the next persist.
    pub fn needs_rebuild(&self) -> bool {
        self.estimated_fpr() > 2.0 * self.fp_prob
    }

    /// Configured false-positive probability.
    pub fn fp_prob(&self) -> f64 {
        self.fp_prob
    }

    /// Number of insertions since construction (or last rebuild).
    pub fn items_added(&self) -> u64 {
        self.items_added
    }

    /// Get the number of hash functions used.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Get the total number of bits in the filter.
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Serialize the filter state. The node log framing prepends the
    /// 4-byte big-endian block length.
    ///
    /// Format: [num_bits(4B)][num_hashes(4B)][fp_prob(8B)][items_added(8B)][bit words…]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24 + self.bits.len() * 8);
        buf.extend_from_slice(&self.num_bits.to_be_bytes());
        buf.extend_from_slice(&self.num_hashes.to_be_bytes());
        buf.extend_from_slice(&self.fp_prob.to_be_bytes());
        buf.extend_from_slice(&self.items_added.to_be_bytes());
        for word in &self.bits {
            buf.extend_from_slice(&word.to_be_bytes());
        }
        buf
    }

    /// Deserialize a filter from a block. Exact inverse of `encode`;
    /// round-trips bit-for-bit.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 24 {
            return Err(Error::Corruption("filter block too short".into()));
        }
        let num_bits = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let num_hashes = u32::from_be_bytes(data[4..8].try_into().unwrap());
        let fp_prob = f64::from_be_bytes(data[8..16].try_into().unwrap());
        let items_added = u64::from_be_bytes(data[16..24].try_into().unwrap());

        if num_bits == 0 || num_hashes == 0 {
            return Err(Error::Corruption("filter block has zero geometry".into()));
        }
        let num_words = (num_bits as usize).div_ceil(64);
        if data.len() != 24 + num_words * 8 {
            return Err(Error::Corruption(format!(
                "filter block length {} does not match {} bits",
                data.len(),
                num_bits
            )));
        }

        let mut bits = Vec::with_capacity(num_words);
        for w in 0..num_words {
            let start = 24 + w * 8;
            bits.push(u64::from_be_bytes(data[start..start + 8].try_into().unwrap()));
        }

        Ok(BloomFilter {
            bits,
            num_bits,
            num_hashes,
            fp_prob,
            items_added,
        })
    }

    /// Bit position for probe `i`: seeded hash reduced modulo the bit count.
    fn probe(&self, key: &[u8], i: u32) -> u32 {
        (xxh3_64_with_seed(key, i as u64) % self.num_bits as u64) as u32
    }

    /// Set a bit at the given position.
    fn set_bit(&mut self, pos: u32) {
        let word_index = (pos / 64) as usize;
        let bit_index = pos % 64;
        self.bits[word_index] |= 1 << bit_index;
    }

    /// Check if a bit is set at the given position.
    fn check_bit(&self, pos: u32) -> bool {
        let word_index = (pos / 64) as usize;
        let bit_index = pos % 64;
        (self.bits[word_index] >> bit_index) & 1 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basics() {
        let mut bf = BloomFilter::new(100, 0.01).unwrap();
        bf.insert(b"hello");
        assert!(bf.may_contain(b"hello"));
        assert!(!bf.may_contain(b"world"));
    }

    #[test]
    fn sizing_follows_formulas() {
        // n=1000, p=0.05 → m = ceil(1000·2.9957/0.4805) = 6236, k = 4
        let bf = BloomFilter::new(1000, 0.05).unwrap();
        assert_eq!(bf.num_bits(), 6236);
        assert_eq!(bf.num_hashes(), 4);
    }
}
