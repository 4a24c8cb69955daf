//! Content Hash for Headers and Chunk Data
//!
//! Every integrity check in the container (chunk header hash, chunk data
//! hash, block header hash) uses the same non-cryptographic 64-bit function:
//! HighwayHash with a fixed key. The function and key are format constants -
//! changing either breaks every existing file.
//!
//! The hash detects corruption; it does not prevent tampering.

use crate::chain::Chain;
use highway::{HighwayHash, HighwayHasher, Key};

/// Fixed HighwayHash key used for all hashes in the file format.
const HASH_KEY: Key = Key([
    0x2f69_6c65_6765_6952,
    0x0a73_6472_6f63_6572,
    0x2f69_6c65_6765_6952,
    0x0a73_6472_6f63_6572,
]);

/// Hashes a contiguous byte slice.
pub fn hash_bytes(data: &[u8]) -> u64 {
    HighwayHasher::new(HASH_KEY).hash64(data)
}

/// Hashes the content of a chain without flattening it.
pub fn hash_chain(data: &Chain) -> u64 {
    let mut hasher = HighwayHasher::new(HASH_KEY);
    for block in data.blocks() {
        hasher.append(block);
    }
    hasher.finalize64()
}
