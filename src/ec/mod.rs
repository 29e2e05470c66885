//! Erasure Coding Module
//!
//! Pure, stateless building blocks shared by writes, reads and rebalance.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Erasure Coding Module                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                   │
//! │   ┌────────────────────┐            ┌──────────────────────┐      │
//! │   │   ErasureCodec     │            │  CapacityAccountant  │      │
//! │   │  encode / decode   │            │  compute_capacity    │      │
//! │   │  reconstruct_shard │            │  shard_bytes         │      │
//! │   └────────────────────┘            └──────────────────────┘      │
//! │             │                                                     │
//! │             ▼                                                     │
//! │   ShardManifest { original_len, shard_len, checksums[k+m] }       │
//! │                                                                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use shardpool::ec::ErasureCodec;
//!
//! let codec = ErasureCodec::new(4, 2)?;
//! let encoded = codec.encode(b"Hello, World!")?;
//!
//! let mut shards: Vec<_> = encoded.shards.iter().map(|s| Some(s.bytes.clone())).collect();
//! shards[0] = None;
//! shards[3] = None;
//!
//! let recovered = codec.decode("greeting", shards, &encoded.manifest)?;
//! assert_eq!(recovered, b"Hello, World!");
//! ```

pub mod capacity;
pub mod codec;

#[cfg(test)]
mod proptest;

pub use capacity::{
    compute_capacity, shard_bytes, storage_efficiency, storage_overhead, PoolCapacity,
};
pub use codec::{EncodedObject, EncodedShard, ErasureCodec, ShardChecksum, ShardManifest};
