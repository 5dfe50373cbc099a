/// Exchange-issued order identifier.
pub type OrderId = i64;

const PRIME1: u64 = 2_654_435_761;
const PRIME2: u64 = 2_246_822_519;
const PRIME3: u64 = 3_266_489_917;
const MOD1: u64 = 1_000_000_007;
const MOD2: u64 = 1_000_000_009;

/// Largest bucket count the hasher can address. The second round already
/// reduces into `[0, MOD2)`, so any bigger table would have dead buckets.
pub const MAX_CAPACITY: usize = MOD2 as usize;

/// Maps order identifiers onto `[0, capacity)`.
///
/// Three multiplicative rounds with distinct moduli spread the tight numeric
/// runs an exchange hands out across the whole bucket array. The last modulus
/// is the capacity itself, so the output indexes the bucket slice directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderHasher {
    capacity: u64,
}

impl OrderHasher {
    /// `capacity` must be in `1..=MAX_CAPACITY`; [`crate::config::TableConfig`]
    /// validates this before a table is built.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0 && capacity <= MAX_CAPACITY);
        OrderHasher {
            capacity: capacity as u64,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline]
    pub fn hash(&self, id: OrderId) -> usize {
        // Negative ids wrap like any other 64-bit pattern.
        let h1 = (id as u64).wrapping_mul(PRIME1) % MOD1;
        // h1, h2 < 2^30 and the primes are < 2^32: no overflow below.
        let h2 = (h1 * PRIME2) % MOD2;
        let h3 = (h2 * PRIME3) % self.capacity;
        h3 as usize
    }
}
