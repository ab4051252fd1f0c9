//! Bloom filter for point lookups

/// Bloom filter over byte keys
///
/// Hashes are CRC32-based so a filter written to disk stays valid across
/// builds and platforms.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: usize,
    num_hashes: usize,
}

const SECOND_SEED: u32 = 0x9E37_79B9;

impl BloomFilter {
    /// Create a filter sized for `num_keys`
    pub fn new(num_keys: usize, bits_per_key: usize) -> Self {
        let num_bits = (num_keys * bits_per_key).max(64);
        let num_bytes = (num_bits + 7) / 8;

        let num_hashes = ((bits_per_key as f64) * 0.69).round() as usize;
        let num_hashes = num_hashes.clamp(1, 30);

        Self {
            bits: vec![0u8; num_bytes],
            num_bits: num_bytes * 8,
            num_hashes,
        }
    }

    /// Create from existing data
    pub fn from_bytes(data: Vec<u8>, num_hashes: usize) -> Self {
        let num_bits = data.len() * 8;
        Self {
            bits: data,
            num_bits,
            num_hashes,
        }
    }

    /// Add a key to the filter
    pub fn add(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash_key(key);
        for i in 0..self.num_hashes {
            let bit = self.bit_position(h1, h2, i);
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// Check if a key may be in the set
    pub fn may_contain(&self, key: &[u8]) -> bool {
        if self.num_bits == 0 {
            return true;
        }
        let (h1, h2) = Self::hash_key(key);
        (0..self.num_hashes).all(|i| {
            let bit = self.bit_position(h1, h2, i);
            (self.bits[bit / 8] >> (bit % 8)) & 1 == 1
        })
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Number of hash functions
    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Estimated false positive rate
    pub fn false_positive_rate(&self, num_keys: usize) -> f64 {
        let k = self.num_hashes as f64;
        let m = self.num_bits as f64;
        let n = num_keys as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    fn hash_key(key: &[u8]) -> (u64, u64) {
        let h1 = crc32fast::hash(key) as u64;

        let mut hasher = crc32fast::Hasher::new_with_initial(SECOND_SEED);
        hasher.update(key);
        let h2 = (hasher.finalize() as u64) | 1;

        (h1, h2)
    }

    fn bit_position(&self, h1: u64, h2: u64, i: usize) -> usize {
        let hash = h1.wrapping_add((i as u64).wrapping_mul(h2));
        (hash % self.num_bits as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bloom_filter_basic() {
        let mut filter = BloomFilter::new(100, 10);

        for i in 0..100 {
            filter.add(format!("key-{}", i).as_bytes());
        }

        for i in 0..100 {
            assert!(filter.may_contain(format!("key-{}", i).as_bytes()));
        }

        let false_positives = (100..1000)
            .filter(|i| filter.may_contain(format!("key-{}", i).as_bytes()))
            .count();

        let fp_rate = false_positives as f64 / 900.0;
        assert!(fp_rate < 0.05, "False positive rate too high: {}", fp_rate);
    }

    #[test]
    fn test_bloom_filter_serialization() {
        let mut filter = BloomFilter::new(50, 10);
        for i in 0u32..50 {
            filter.add(&i.to_be_bytes());
        }

        let restored = BloomFilter::from_bytes(filter.as_bytes().to_vec(), filter.num_hashes());
        for i in 0u32..50 {
            assert!(restored.may_contain(&i.to_be_bytes()));
        }
    }

    #[test]
    fn test_empty_filter_sized_to_minimum() {
        let filter = BloomFilter::new(0, 10);
        assert!(!filter.as_bytes().is_empty());
        assert!(!filter.may_contain(b"anything"));
    }
}
