//! Redis-backed Bloom filter.
//!
//! The filter is one Redis string read as a bit array of `m` bits. Sizing
//! follows the standard optimal-parameter formulas for a target population
//! `n` and tolerated false-positive probability `p`; the `k` bit positions
//! per element come from enhanced double hashing over a single SHA-256
//! digest of the element's canonical encoding.

use std::collections::BTreeSet;
use std::f64::consts::LN_2;

use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::Serialize;
use sha2::{Digest, Sha256};

use cairn_core::{encode, Error, Result};
use cairn_redis::{create_pool, RedisConfig};

/// The required number of bits (m) given the expected element count (n)
/// and the acceptable false-positive probability (p):
/// `m = ceil(-n * ln(p) / (ln 2)^2)`. Never below 1.
#[must_use]
pub fn optimal_bits(num_elements: u64, false_positives: f64) -> u64 {
    let m = -(num_elements as f64) * false_positives.ln() / LN_2.powi(2);
    (m.ceil() as u64).max(1)
}

/// The number of hash positions (k) given m and n, minimizing p:
/// `k = round((m / n) * ln 2)`. Never below 1.
#[must_use]
pub fn optimal_hashes(bits: u64, num_elements: u64) -> u32 {
    let k = (bits as f64 / num_elements as f64) * LN_2;
    (k.round() as u32).max(1)
}

/// The k bit positions for one canonically encoded element.
///
/// Enhanced double hashing: `g_i = (h1 + i*h2 + i^2) mod m`, where h1 and
/// h2 are the first two big-endian 32-bit words of the SHA-256 digest.
fn bit_positions(encoded: &str, bits: u64, hashes: u32) -> Vec<u64> {
    let digest = Sha256::digest(encoded.as_bytes());
    let h1 = u64::from(u32::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3],
    ]));
    let h2 = u64::from(u32::from_be_bytes([
        digest[4], digest[5], digest[6], digest[7],
    ]));

    (0..u64::from(hashes))
        .map(|i| (h1 + i * h2 + i * i) % bits)
        .collect()
}

/// Estimated element count from the number of set bits:
/// `-(m / k) * ln(1 - X/m)`, floored. A saturated filter reports `m / k`.
fn estimate_cardinality(set_bits: u64, bits: u64, hashes: u32) -> u64 {
    if set_bits >= bits {
        return bits / u64::from(hashes);
    }
    let m = bits as f64;
    let estimate = -(m / f64::from(hashes)) * (1.0 - set_bits as f64 / m).ln();
    estimate.floor() as u64
}

/// Redis-backed Bloom filter.
///
/// May return false positives, never false negatives: a `false` from
/// [`contains`](Self::contains) proves the element was never added.
pub struct BloomFilter {
    pool: Pool,
    key: String,
    bits: u64,
    hashes: u32,
}

impl BloomFilter {
    /// Create a filter sized for `num_elements` inserts at a false-positive
    /// probability of at most `false_positives`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] unless `num_elements >= 1` and
    /// `0 < false_positives < 1`.
    pub fn new(
        pool: Pool,
        key: impl Into<String>,
        num_elements: u64,
        false_positives: f64,
    ) -> Result<Self> {
        if num_elements == 0 {
            return Err(Error::Configuration(
                "a Bloom filter needs a positive expected element count".into(),
            ));
        }
        if !(false_positives > 0.0 && false_positives < 1.0) {
            return Err(Error::Configuration(format!(
                "the false-positive probability must be in (0, 1), got {false_positives}"
            )));
        }

        let bits = optimal_bits(num_elements, false_positives);
        let hashes = optimal_hashes(bits, num_elements);
        Ok(Self {
            pool,
            key: key.into(),
            bits,
            hashes,
        })
    }

    /// Create a filter with its own pool from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the pool cannot be created, or
    /// [`Error::Configuration`] for out-of-range parameters.
    pub fn connect(
        config: &RedisConfig,
        key: impl Into<String>,
        num_elements: u64,
        false_positives: f64,
    ) -> Result<Self> {
        Self::new(create_pool(config)?, key, num_elements, false_positives)
    }

    /// The Redis key holding the bit array.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The size of the bit array (m).
    #[must_use]
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// The number of bit positions per element (k).
    #[must_use]
    pub fn hashes(&self) -> u32 {
        self.hashes
    }

    /// Add an element to the filter.
    pub async fn add<T: Serialize>(&self, value: &T) -> Result<()> {
        let offsets: BTreeSet<u64> = self.bit_offsets(value)?.into_iter().collect();
        self.set_bits(&offsets).await
    }

    /// Add every element in `values`, as one pipelined batch.
    pub async fn add_many<T: Serialize>(&self, values: &[T]) -> Result<()> {
        let mut offsets = BTreeSet::new();
        for value in values {
            offsets.extend(self.bit_offsets(value)?);
        }
        if offsets.is_empty() {
            return Ok(());
        }
        self.set_bits(&offsets).await
    }

    /// Whether the filter has (probably) seen this element.
    ///
    /// Returns `false` as soon as any of the element's bits is clear.
    pub async fn contains<T: Serialize>(&self, value: &T) -> Result<bool> {
        let offsets = self.bit_offsets(value)?;
        let mut conn = self.conn().await?;
        for offset in offsets {
            let bit: bool = conn
                .getbit(&self.key, offset as usize)
                .await
                .map_err(|e| Error::Backend(e.to_string()))?;
            if !bit {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Membership tests for every element in `values`, as one pipelined
    /// batch of bit reads. The result aligns with the input order.
    pub async fn contains_many<T: Serialize>(&self, values: &[T]) -> Result<Vec<bool>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let mut per_value = Vec::with_capacity(values.len());
        for value in values {
            per_value.push(self.bit_offsets(value)?);
        }

        let mut pipe = redis::pipe();
        for offsets in &per_value {
            for offset in offsets {
                pipe.getbit(&self.key, *offset as usize);
            }
        }

        let mut conn = self.conn().await?;
        let bits: Vec<bool> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        let mut answers = Vec::with_capacity(values.len());
        let mut cursor = bits.into_iter();
        for offsets in &per_value {
            let mut present = true;
            for _ in offsets {
                // The pipeline returned exactly one bit per offset.
                present &= cursor.next().unwrap_or(false);
            }
            answers.push(present);
        }
        Ok(answers)
    }

    /// Approximate number of elements added so far, from the set-bit count.
    pub async fn approximate_size(&self) -> Result<u64> {
        let mut conn = self.conn().await?;
        let set_bits: u64 = conn
            .bitcount(&self.key)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(estimate_cardinality(set_bits, self.bits, self.hashes))
    }

    /// Remove every element from the filter.
    pub async fn clear(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .del(&self.key)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(())
    }

    fn bit_offsets<T: Serialize>(&self, value: &T) -> Result<Vec<u64>> {
        let encoded = encode(value)?;
        Ok(bit_positions(&encoded, self.bits, self.hashes))
    }

    async fn set_bits(&self, offsets: &BTreeSet<u64>) -> Result<()> {
        let mut pipe = redis::pipe();
        for offset in offsets {
            pipe.setbit(&self.key, *offset as usize, true).ignore();
        }
        let mut conn = self.conn().await?;
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::Backend(e.to_string()))
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }
}
