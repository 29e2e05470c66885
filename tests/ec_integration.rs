//! EC Integration Tests
//!
//! Codec and capacity behaviour through the public API.

use assert_matches::assert_matches;
use bytes::Bytes;

use shardpool::ec::{
    compute_capacity, storage_efficiency, storage_overhead, EncodedObject, ErasureCodec,
};
use shardpool::{Error, Participant};

const TB: u64 = 1_000_000_000_000;
const MB: usize = 1_000_000;

fn present(encoded: &EncodedObject) -> Vec<Option<Bytes>> {
    encoded.shards.iter().map(|s| Some(s.bytes.clone())).collect()
}

// =============================================================================
// Encoder/Decoder
// =============================================================================

#[test]
fn test_encode_decode_full_pipeline() {
    let codec = ErasureCodec::new(4, 2).expect("Failed to create codec");
    let original = b"This is test data for the full EC pipeline integration test. It should be long enough to span multiple shards.";

    let encoded = codec.encode(original).expect("Failed to encode");
    assert_eq!(encoded.shards.len(), 6);
    assert_eq!(encoded.manifest.original_len, original.len() as u64);

    let recovered = codec
        .decode("pipeline", present(&encoded), &encoded.manifest)
        .expect("Failed to decode");
    assert_eq!(recovered, original);
}

#[test]
fn test_ten_megabyte_object_survives_two_losses() {
    let codec = ErasureCodec::new(4, 2).unwrap();
    let original: Vec<u8> = (0..10 * MB).map(|i| (i * 31 % 251) as u8).collect();

    let encoded = codec.encode(&original).unwrap();
    assert_eq!(encoded.shards.len(), 6);
    for shard in &encoded.shards {
        assert_eq!(shard.bytes.len(), 2_500_000);
    }

    for lost in [[0, 1], [2, 5], [4, 5], [1, 3]] {
        let mut shards = present(&encoded);
        for i in lost {
            shards[i] = None;
        }
        let recovered = codec
            .decode("ten-mb", shards, &encoded.manifest)
            .unwrap_or_else(|e| panic!("losing {:?} failed: {}", lost, e));
        assert_eq!(recovered.len(), 10 * MB);
        assert!(recovered == original, "data mismatch after losing {:?}", lost);
    }
}

#[test]
fn test_encode_decode_beyond_max_loss_fails() {
    let codec = ErasureCodec::new(4, 2).unwrap();
    let encoded = codec.encode(b"Data that should not be recoverable.").unwrap();

    let mut shards = present(&encoded);
    shards[0] = None;
    shards[3] = None;
    shards[5] = None;

    let result = codec.decode("gone", shards, &encoded.manifest);
    assert_matches!(
        result,
        Err(Error::UnrecoverableLoss {
            available: 3,
            required: 4,
            ..
        })
    );
}

#[test]
fn test_corrupt_shard_counts_as_missing() {
    let codec = ErasureCodec::new(4, 2).unwrap();
    let original = b"checksums catch silent corruption on disk";
    let encoded = codec.encode(original).unwrap();

    let mut shards = present(&encoded);
    let mut flipped = shards[1].as_ref().unwrap().to_vec();
    flipped[0] ^= 0x01;
    shards[1] = Some(Bytes::from(flipped));
    shards[4] = None;

    let recovered = codec.decode("flip", shards.clone(), &encoded.manifest).unwrap();
    assert_eq!(recovered, original);

    // a third bad shard tips it over
    shards[0] = None;
    assert_matches!(
        codec.decode("flip", shards, &encoded.manifest),
        Err(Error::UnrecoverableLoss { .. })
    );
}

#[test]
fn test_different_ec_configurations() {
    let test_data = b"Test data for configuration verification across different EC schemes.";

    for (k, m) in [(1, 0), (2, 1), (4, 2), (6, 3), (8, 4), (10, 0)] {
        let codec = ErasureCodec::new(k, m).unwrap();
        let encoded = codec.encode(test_data).unwrap();
        assert_eq!(encoded.shards.len(), k + m);

        let mut degraded = present(&encoded);
        for slot in degraded.iter_mut().take(m) {
            *slot = None;
        }

        let recovered = codec
            .decode("config", degraded, &encoded.manifest)
            .unwrap_or_else(|_| panic!("Failed to recover with {}+{} config", k, m));
        assert_eq!(recovered, test_data, "Data mismatch with {}+{} config", k, m);
    }
}

#[test]
fn test_reconstruct_single_shard() {
    let codec = ErasureCodec::new(4, 2).unwrap();
    let original: Vec<u8> = (0u8..=255u8).cycle().take(4096).collect();
    let encoded = codec.encode(&original).unwrap();

    for index in 0..6 {
        let mut shards = present(&encoded);
        shards[index] = None;
        shards[(index + 1) % 6] = None;
        let rebuilt = codec
            .reconstruct_shard("pattern", shards, &encoded.manifest, index)
            .unwrap();
        assert_eq!(rebuilt, encoded.shards[index].bytes, "shard {}", index);
    }
}

#[test]
fn test_empty_object() {
    let codec = ErasureCodec::new(3, 2).unwrap();
    let encoded = codec.encode(&[]).unwrap();
    assert!(encoded.shards.iter().all(|s| s.bytes.len() == 1));

    let mut shards = present(&encoded);
    shards[0] = None;
    assert!(codec.decode("empty", shards, &encoded.manifest).unwrap().is_empty());
}

#[test]
fn test_encoding_is_deterministic() {
    let codec = ErasureCodec::new(4, 2).unwrap();
    let data = b"Consistency test data for multiple encode/decode cycles.";

    let first = codec.encode(data).unwrap();
    let second = codec.encode(data).unwrap();
    for (a, b) in first.shards.iter().zip(&second.shards) {
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.checksum, b.checksum);
    }
}

#[test]
fn test_invalid_parameters_rejected() {
    assert_matches!(ErasureCodec::new(0, 2), Err(Error::Validation(_)));
    assert_matches!(ErasureCodec::new(200, 100), Err(Error::Validation(_)));
}

// =============================================================================
// Capacity
// =============================================================================

fn disks(free: &[u64]) -> Vec<Participant> {
    free.iter()
        .enumerate()
        .map(|(i, f)| Participant::new(format!("node{}", i), "/data", *f, *f))
        .collect()
}

#[test]
fn test_six_two_terabyte_disks_give_eight_terabytes() {
    let capacity = compute_capacity(&disks(&[2 * TB; 6]), 4, 2).unwrap();
    assert_eq!(capacity.usable_bytes, 8 * TB);
    assert_eq!(capacity.shard_bytes(10_000_000), 2_500_000);
    assert_eq!(capacity.stored_bytes(10_000_000), 15_000_000);
}

#[test]
fn test_smallest_chosen_disk_bounds_capacity() {
    // the 7th disk is not among the six best and does not count
    let free = [5 * TB, 3 * TB, 3 * TB, 4 * TB, 3 * TB, 6 * TB, TB];
    let capacity = compute_capacity(&disks(&free), 4, 2).unwrap();
    assert_eq!(capacity.min_free_bytes, 3 * TB);
    assert_eq!(capacity.usable_bytes, 12 * TB);
}

#[test]
fn test_too_few_participants() {
    assert_matches!(
        compute_capacity(&disks(&[TB; 5]), 4, 2),
        Err(Error::InsufficientParticipants {
            available: 5,
            required: 6
        })
    );
}

#[test]
fn test_overhead_and_efficiency() {
    assert!((storage_overhead(4, 2) - 1.5).abs() < 1e-9);
    assert!((storage_efficiency(4, 2) - 4.0 / 6.0).abs() < 1e-9);
    assert!((storage_overhead(8, 0) - 1.0).abs() < 1e-9);
}
