//! Probabilistic sets over Redis.
//!
//! [`BloomFilter`] answers "have I seen this element before?" with tunable
//! false positives and no false negatives; [`HyperLogLog`] estimates the
//! cardinality of a set without storing it. Neither can enumerate its
//! elements, and neither attempts exactness.

pub mod bloom;
pub mod hyper;

pub use bloom::BloomFilter;
pub use hyper::HyperLogLog;
