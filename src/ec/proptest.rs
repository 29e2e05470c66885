//! Property-Based Tests for the erasure codec and capacity accounting
//!
//! 1. **Roundtrip**: encode(data) → decode(all shards) = data
//! 2. **Any k of k+m**: every erasure pattern of at most m shards decodes
//! 3. **Loss threshold**: every pattern leaving fewer than k shards fails
//! 4. **Monotonic capacity**: more free space or larger k never shrinks capacity

#![cfg(test)]

use bytes::Bytes;
use proptest::prelude::*;
use proptest::sample::subsequence;

use super::capacity::compute_capacity;
use super::codec::{EncodedObject, ErasureCodec};
use crate::error::Error;
use crate::pool::types::Participant;

// =============================================================================
// Property Strategies
// =============================================================================

/// k: 1-6 data shards, m: 0-3 parity shards
fn ec_config_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..=6, 0usize..=3)
}

fn data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2000)
}

/// (k, m, erased indices) with at most m erasures.
fn tolerable_erasures() -> impl Strategy<Value = (usize, usize, Vec<usize>)> {
    ec_config_strategy().prop_flat_map(|(k, m)| {
        let indices: Vec<usize> = (0..k + m).collect();
        (Just(k), Just(m), subsequence(indices, 0..=m))
    })
}

/// (k, m, erased indices) with more than m erasures.
fn fatal_erasures() -> impl Strategy<Value = (usize, usize, Vec<usize>)> {
    ec_config_strategy().prop_flat_map(|(k, m)| {
        let indices: Vec<usize> = (0..k + m).collect();
        (Just(k), Just(m), subsequence(indices, (m + 1)..=(k + m)))
    })
}

fn shards_without(encoded: &EncodedObject, erased: &[usize]) -> Vec<Option<Bytes>> {
    encoded
        .shards
        .iter()
        .map(|s| (!erased.contains(&s.index)).then(|| s.bytes.clone()))
        .collect()
}

fn participants(free: &[u64]) -> Vec<Participant> {
    free.iter()
        .enumerate()
        .map(|(i, f)| Participant::new(format!("node{}", i), "/data", u64::MAX / 2, *f))
        .collect()
}

// =============================================================================
// Codec Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_roundtrip_no_loss(
        (k, m) in ec_config_strategy(),
        data in data_strategy(),
    ) {
        let codec = ErasureCodec::new(k, m)?;
        let encoded = codec.encode(&data)?;
        prop_assert_eq!(encoded.shards.len(), k + m);

        let recovered = codec.decode("p", shards_without(&encoded, &[]), &encoded.manifest)?;
        prop_assert_eq!(recovered, data);
    }

    #[test]
    fn prop_any_k_shards_recover(
        (k, m, erased) in tolerable_erasures(),
        data in data_strategy(),
    ) {
        let codec = ErasureCodec::new(k, m)?;
        let encoded = codec.encode(&data)?;

        let recovered = codec.decode("p", shards_without(&encoded, &erased), &encoded.manifest)?;
        prop_assert_eq!(recovered, data);
    }

    #[test]
    fn prop_fewer_than_k_is_unrecoverable(
        (k, m, erased) in fatal_erasures(),
        data in data_strategy(),
    ) {
        let codec = ErasureCodec::new(k, m)?;
        let encoded = codec.encode(&data)?;

        let result = codec.decode("p", shards_without(&encoded, &erased), &encoded.manifest);
        let is_loss = matches!(result, Err(Error::UnrecoverableLoss { .. }));
        prop_assert!(is_loss);
    }

    #[test]
    fn prop_corruption_equals_erasure(
        (k, m, erased) in tolerable_erasures(),
        data in prop::collection::vec(any::<u8>(), 1..500),
    ) {
        let codec = ErasureCodec::new(k, m)?;
        let encoded = codec.encode(&data)?;

        // flip a byte instead of dropping the shard
        let shards: Vec<Option<Bytes>> = encoded
            .shards
            .iter()
            .map(|s| {
                if erased.contains(&s.index) {
                    let mut b = s.bytes.to_vec();
                    b[0] ^= 0x5a;
                    Some(Bytes::from(b))
                } else {
                    Some(s.bytes.clone())
                }
            })
            .collect();

        let recovered = codec.decode("p", shards, &encoded.manifest)?;
        prop_assert_eq!(recovered, data);
    }

    #[test]
    fn prop_shard_len_is_ceil(
        (k, m) in ec_config_strategy(),
        data in data_strategy(),
    ) {
        let codec = ErasureCodec::new(k, m)?;
        let encoded = codec.encode(&data)?;
        let expected = data.len().div_ceil(k).max(1) as u64;
        prop_assert_eq!(encoded.manifest.shard_len, expected);
        prop_assert!(encoded.shards.iter().all(|s| s.bytes.len() as u64 == expected));
    }
}

// =============================================================================
// Capacity Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_capacity_grows_with_min_free(
        (k, m) in ec_config_strategy(),
        base in 1u64..1_000_000,
        bump in 1u64..1_000_000,
    ) {
        let n = k + m;
        let before = compute_capacity(&participants(&vec![base; n]), k, m)?;
        let after = compute_capacity(&participants(&vec![base + bump; n]), k, m)?;
        prop_assert!(after.usable_bytes > before.usable_bytes);
    }

    #[test]
    fn prop_capacity_grows_with_k(
        k in 1usize..8,
        m in 0usize..3,
        free in 1u64..1_000_000,
    ) {
        // same participant set large enough for k+1+m
        let list = participants(&vec![free; k + 1 + m]);
        let smaller = compute_capacity(&list, k, m)?;
        let larger = compute_capacity(&list, k + 1, m)?;
        prop_assert!(larger.usable_bytes > smaller.usable_bytes);
    }

    #[test]
    fn prop_capacity_bounded_by_smallest_chosen(
        free in prop::collection::vec(0u64..1_000_000, 3..12),
    ) {
        let cap = compute_capacity(&participants(&free), 2, 1)?;
        let mut sorted = free.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        prop_assert_eq!(cap.min_free_bytes, sorted[2]);
        prop_assert_eq!(cap.usable_bytes, sorted[2] * 2);
    }
}
