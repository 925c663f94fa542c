//! A concurrent radix tree (compressed trie) map keyed by strings.
//!
//! This crate provides a `RadixMap`, a key-value data structure that many
//! threads can read and mutate at once through a shared reference. It is meant
//! to back key registries and lock tables that see heavy concurrent lookup,
//! insertion and prefix deletion.
//!
//! # Features
//!
//! - Path compression: memory grows with the number of keys, not their length
//! - Per-node reader-writer locks for structure, lock-free value slots
//! - Lazy prefix search and atomic prefix pruning
//! - Configurable case sensitivity

mod config;
mod error;
mod iter;
mod key;
mod node;
mod radix_map;

pub use config::{Config, DEFAULT_MAX_OPTIMISTIC_RETRIES, RadixMapBuilder};
pub use error::{Error, Result};
pub use iter::{Iter, Keys, Values};
pub use key::KeyPolicy;
pub use radix_map::RadixMap;

#[cfg(test)]
mod proptest_radix_map;
