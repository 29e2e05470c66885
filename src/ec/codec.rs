//! Erasure Codec
//!
//! Systematic Reed-Solomon over GF(2^8) via the `reed-solomon-erasure` crate.
//! Shards `0..k` are an exact partition of the zero-padded input, shards
//! `k..k+m` are parity. Every shard carries a BLAKE3 checksum taken at encode
//! time; a shard whose checksum or length does not match is treated exactly
//! like a missing one.

use std::sync::Arc;

use bytes::Bytes;
use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::pool::types::validate_redundancy;

// =============================================================================
// Checksums / Manifest
// =============================================================================

/// Hex-encoded BLAKE3 digest of one shard's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardChecksum(String);

impl ShardChecksum {
    pub fn compute(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn verify(&self, bytes: &[u8]) -> bool {
        blake3::hash(bytes).to_hex().as_str() == self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShardChecksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // short form is enough for logs
        let short: String = self.0.chars().take(12).collect();
        write!(f, "{}", short)
    }
}

/// What a decoder needs besides the shard bytes; persisted with the ShardSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardManifest {
    /// Object length before padding
    pub original_len: u64,
    /// Length of every shard, data and parity alike
    pub shard_len: u64,
    /// One checksum per shard index
    pub checksums: Vec<ShardChecksum>,
}

impl ShardManifest {
    /// Whether `bytes` is a valid copy of shard `index`.
    pub fn is_valid(&self, index: usize, bytes: &[u8]) -> bool {
        bytes.len() as u64 == self.shard_len
            && self
                .checksums
                .get(index)
                .is_some_and(|c| c.verify(bytes))
    }
}

/// One encoded shard ready to be written.
#[derive(Debug, Clone)]
pub struct EncodedShard {
    pub index: usize,
    pub bytes: Bytes,
    pub checksum: ShardChecksum,
}

/// Output of [`ErasureCodec::encode`].
#[derive(Debug, Clone)]
pub struct EncodedObject {
    pub shards: Vec<EncodedShard>,
    pub manifest: ShardManifest,
}

// =============================================================================
// Codec
// =============================================================================

/// Stateless k+m encoder/decoder.
#[derive(Clone)]
pub struct ErasureCodec {
    /// `None` when m = 0 (plain striping)
    rs: Option<Arc<ReedSolomon>>,
    data_shards: usize,
    parity_shards: usize,
}

impl std::fmt::Debug for ErasureCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasureCodec")
            .field("data_shards", &self.data_shards)
            .field("parity_shards", &self.parity_shards)
            .finish()
    }
}

impl ErasureCodec {
    /// Create a codec for `k` data and `m` parity shards.
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        validate_redundancy(data_shards, parity_shards)?;

        let rs = if parity_shards == 0 {
            None
        } else {
            let rs = ReedSolomon::new(data_shards, parity_shards).map_err(|e| {
                Error::Validation(format!("Failed to create Reed-Solomon codec: {}", e))
            })?;
            Some(Arc::new(rs))
        };

        Ok(Self {
            rs,
            data_shards,
            parity_shards,
        })
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Shard length for an object of `len` bytes. Never zero.
    pub fn shard_len_for(&self, len: usize) -> usize {
        len.div_ceil(self.data_shards).max(1)
    }

    /// Split `data` into k padded data shards and compute m parity shards.
    #[instrument(skip(self, data), fields(data_len = data.len(), k = self.data_shards, m = self.parity_shards))]
    pub fn encode(&self, data: &[u8]) -> Result<EncodedObject> {
        let shard_len = self.shard_len_for(data.len());

        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.total_shards());
        for i in 0..self.data_shards {
            let start = (i * shard_len).min(data.len());
            let end = (start + shard_len).min(data.len());
            let mut shard = data[start..end].to_vec();
            shard.resize(shard_len, 0);
            shards.push(shard);
        }
        for _ in 0..self.parity_shards {
            shards.push(vec![0u8; shard_len]);
        }

        if let Some(rs) = &self.rs {
            rs.encode(&mut shards)
                .map_err(|e| Error::Encoding(format!("Reed-Solomon encoding failed: {}", e)))?;
        }

        let encoded: Vec<EncodedShard> = shards
            .into_iter()
            .enumerate()
            .map(|(index, bytes)| EncodedShard {
                index,
                checksum: ShardChecksum::compute(&bytes),
                bytes: Bytes::from(bytes),
            })
            .collect();

        let manifest = ShardManifest {
            original_len: data.len() as u64,
            shard_len: shard_len as u64,
            checksums: encoded.iter().map(|s| s.checksum.clone()).collect(),
        };

        debug!(
            "Encoded {} bytes into {} shards of {} bytes each",
            data.len(),
            self.total_shards(),
            shard_len
        );

        Ok(EncodedObject {
            shards: encoded,
            manifest,
        })
    }

    /// Recover the original bytes from whatever shards were fetched.
    ///
    /// `shards[i]` is the copy read for index `i`, or `None` if it could not
    /// be read. Corrupt copies are discarded before reconstruction.
    #[instrument(skip(self, shards, manifest), fields(original_len = manifest.original_len))]
    pub fn decode(
        &self,
        object: &str,
        shards: Vec<Option<Bytes>>,
        manifest: &ShardManifest,
    ) -> Result<Vec<u8>> {
        let mut valid = self.screen(object, shards, manifest)?;

        let data_missing = valid.iter().take(self.data_shards).any(Option::is_none);
        if data_missing {
            self.rebuild(object, &mut valid, true)?;
        }

        let mut data = Vec::with_capacity(manifest.original_len as usize);
        for shard in valid.iter().take(self.data_shards).flatten() {
            data.extend_from_slice(shard);
        }
        data.truncate(manifest.original_len as usize);

        Ok(data)
    }

    /// Rebuild the bytes of a single shard from its peers.
    #[instrument(skip(self, shards, manifest))]
    pub fn reconstruct_shard(
        &self,
        object: &str,
        shards: Vec<Option<Bytes>>,
        manifest: &ShardManifest,
        index: usize,
    ) -> Result<Bytes> {
        if index >= self.total_shards() {
            return Err(Error::Reconstruction {
                object: object.to_string(),
                reason: format!("shard index {} out of range", index),
            });
        }

        let mut valid = self.screen(object, shards, manifest)?;
        if valid[index].is_none() {
            self.rebuild(object, &mut valid, index < self.data_shards)?;
        }

        let bytes = valid[index].take().ok_or_else(|| Error::Reconstruction {
            object: object.to_string(),
            reason: format!("shard {} was not rebuilt", index),
        })?;

        if !manifest.is_valid(index, &bytes) {
            return Err(Error::Reconstruction {
                object: object.to_string(),
                reason: format!("rebuilt shard {} does not match its checksum", index),
            });
        }

        Ok(Bytes::from(bytes))
    }

    /// Drop invalid copies and enforce the k-of-(k+m) threshold.
    fn screen(
        &self,
        object: &str,
        shards: Vec<Option<Bytes>>,
        manifest: &ShardManifest,
    ) -> Result<Vec<Option<Vec<u8>>>> {
        if shards.len() != self.total_shards() || manifest.checksums.len() != self.total_shards()
        {
            return Err(Error::Reconstruction {
                object: object.to_string(),
                reason: format!(
                    "expected {} shards and checksums, got {} and {}",
                    self.total_shards(),
                    shards.len(),
                    manifest.checksums.len()
                ),
            });
        }

        let valid: Vec<Option<Vec<u8>>> = shards
            .into_iter()
            .enumerate()
            .map(|(i, shard)| shard.filter(|b| manifest.is_valid(i, b)).map(|b| b.to_vec()))
            .collect();

        let available = valid.iter().filter(|s| s.is_some()).count();
        if available < self.data_shards {
            return Err(Error::UnrecoverableLoss {
                object: object.to_string(),
                available,
                required: self.data_shards,
            });
        }

        Ok(valid)
    }

    fn rebuild(&self, object: &str, shards: &mut [Option<Vec<u8>>], data_only: bool) -> Result<()> {
        let available = shards.iter().filter(|s| s.is_some()).count();
        let Some(rs) = &self.rs else {
            // plain stripe: a missing data shard cannot be recovered
            return Err(Error::UnrecoverableLoss {
                object: object.to_string(),
                available,
                required: self.total_shards(),
            });
        };

        let result = if data_only {
            rs.reconstruct_data(shards)
        } else {
            rs.reconstruct(shards)
        };
        result.map_err(|e| Error::Reconstruction {
            object: object.to_string(),
            reason: format!("Reed-Solomon reconstruction failed: {}", e),
        })?;

        debug!(
            "Reconstructed {} from {}/{} shards",
            object,
            available,
            self.total_shards()
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn present(encoded: &EncodedObject) -> Vec<Option<Bytes>> {
        encoded.shards.iter().map(|s| Some(s.bytes.clone())).collect()
    }

    #[test]
    fn test_codec_new() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        assert_eq!(codec.data_shards(), 4);
        assert_eq!(codec.parity_shards(), 2);
        assert_eq!(codec.total_shards(), 6);
    }

    #[test]
    fn test_codec_invalid_config() {
        assert_matches!(ErasureCodec::new(0, 2), Err(Error::Validation(_)));
        assert_matches!(ErasureCodec::new(200, 57), Err(Error::Validation(_)));
        assert!(ErasureCodec::new(4, 0).is_ok());
    }

    #[test]
    fn test_encode_shapes() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let data = b"Hello, World! This is a test of erasure coding.";
        let encoded = codec.encode(data).unwrap();

        assert_eq!(encoded.shards.len(), 6);
        assert_eq!(encoded.manifest.shard_len, 12);
        assert_eq!(encoded.manifest.original_len, data.len() as u64);
        for (i, shard) in encoded.shards.iter().enumerate() {
            assert_eq!(shard.index, i);
            assert_eq!(shard.bytes.len(), 12);
        }
        // systematic: the first shard is the first bytes of input
        assert_eq!(&encoded.shards[0].bytes[..], &data[..12]);
    }

    #[test]
    fn test_roundtrip_with_loss() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let original = b"Testing recovery from shard loss with erasure coding!";
        let encoded = codec.encode(original).unwrap();

        let mut shards = present(&encoded);
        shards[1] = None;
        shards[4] = None;

        let recovered = codec.decode("obj", shards, &encoded.manifest).unwrap();
        assert_eq!(recovered, original);
    }

    #[test]
    fn test_corrupt_shard_counts_as_missing() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let original = vec![7u8; 4096];
        let encoded = codec.encode(&original).unwrap();

        let mut shards = present(&encoded);
        let mut flipped = shards[0].clone().unwrap().to_vec();
        flipped[10] ^= 0xff;
        shards[0] = Some(Bytes::from(flipped));
        shards[5] = None;

        let recovered = codec.decode("obj", shards, &encoded.manifest).unwrap();
        assert_eq!(recovered, original);
    }

    #[test]
    fn test_too_many_losses_is_unrecoverable() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let encoded = codec.encode(b"some payload").unwrap();

        let mut shards = present(&encoded);
        shards[0] = None;
        shards[2] = None;
        shards[5] = None;

        assert_matches!(
            codec.decode("obj", shards, &encoded.manifest),
            Err(Error::UnrecoverableLoss { available: 3, required: 4, .. })
        );
    }

    #[test]
    fn test_empty_object() {
        let codec = ErasureCodec::new(3, 2).unwrap();
        let encoded = codec.encode(&[]).unwrap();
        assert_eq!(encoded.manifest.shard_len, 1);
        let recovered = codec.decode("empty", present(&encoded), &encoded.manifest).unwrap();
        assert!(recovered.is_empty());
    }

    #[test]
    fn test_stripe_without_parity() {
        let codec = ErasureCodec::new(3, 0).unwrap();
        let data = b"abcdefgh";
        let encoded = codec.encode(data).unwrap();
        assert_eq!(encoded.shards.len(), 3);
        assert_eq!(
            codec.decode("s", present(&encoded), &encoded.manifest).unwrap(),
            data
        );

        let mut shards = present(&encoded);
        shards[1] = None;
        assert_matches!(
            codec.decode("s", shards, &encoded.manifest),
            Err(Error::UnrecoverableLoss { .. })
        );
    }

    #[test]
    fn test_reconstruct_parity_shard() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let encoded = codec.encode(&[42u8; 1000]).unwrap();

        let mut shards = present(&encoded);
        shards[5] = None;
        shards[1] = None;

        let rebuilt = codec
            .reconstruct_shard("obj", shards, &encoded.manifest, 5)
            .unwrap();
        assert_eq!(rebuilt, encoded.shards[5].bytes);
    }

    #[test]
    fn test_ten_megabyte_object_with_two_losses() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let original: Vec<u8> = (0..10_000_000u32).map(|i| (i % 251) as u8).collect();
        let encoded = codec.encode(&original).unwrap();

        assert_eq!(encoded.manifest.shard_len, 2_500_000);
        assert!(encoded.shards.iter().all(|s| s.bytes.len() == 2_500_000));

        let mut shards = present(&encoded);
        shards[0] = None;
        shards[3] = None;
        let recovered = codec.decode("big", shards, &encoded.manifest).unwrap();
        assert_eq!(recovered.len(), 10_000_000);
        assert!(recovered == original);
    }

    #[test]
    fn test_wrong_shard_count() {
        let codec = ErasureCodec::new(2, 1).unwrap();
        let encoded = codec.encode(b"xy").unwrap();
        assert_matches!(
            codec.decode("obj", vec![None, None], &encoded.manifest),
            Err(Error::Reconstruction { .. })
        );
    }

    #[test]
    fn test_checksum_verify() {
        let c = ShardChecksum::compute(b"shard");
        assert!(c.verify(b"shard"));
        assert!(!c.verify(b"Shard"));
        assert_eq!(c.as_str().len(), 64);
        assert_eq!(c.to_string(), c.as_str()[..12]);
    }

    #[test]
    fn test_checksum_display_from_stored_metadata() {
        // metadata is read back from disk and may hold anything
        let c: ShardChecksum = serde_json::from_str("\"aéééééééééééé\"").unwrap();
        assert_eq!(c.to_string(), "aééééééééééé");
        let short: ShardChecksum = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(short.to_string(), "abc");
    }
}
