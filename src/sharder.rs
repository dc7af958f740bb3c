//! Sharder implementation.
//!
//! A sharder maps a salted key to a deterministic sample point in `[0, total_shards)`. The same
//! salt and key always produce the same point, on any instance, without shared state.

/// Maps `salt` + `key` to a sample point in `[0, total_shards)`.
pub trait Sharder {
    /// Return the sample point for `key` hashed under `salt`.
    fn get_shard(&self, salt: &[u8], key: &[u8], total_shards: u64) -> u64;
}

/// The default sharder: first 32 bits of the MD5 digest, big-endian, modulo `total_shards`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn get_shard(&self, salt: &[u8], key: &[u8], total_shards: u64) -> u64 {
        let mut context = md5::Context::new();
        context.consume(salt);
        context.consume(key);
        let hash = context.compute();
        let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
        (value as u64) % total_shards
    }
}

impl<S: Sharder + ?Sized> Sharder for &S {
    fn get_shard(&self, salt: &[u8], key: &[u8], total_shards: u64) -> u64 {
        (**self).get_shard(salt, key, total_shards)
    }
}

#[cfg(test)]
mod tests {
    use super::{Md5Sharder, Sharder};

    #[test]
    fn salt_and_key_are_concatenated() {
        let split = Md5Sharder.get_shard(b"100:200:", b"user-1", 100_000);
        let joined = Md5Sharder.get_shard(b"", b"100:200:user-1", 100_000);
        assert_eq!(split, joined);
    }

    #[test]
    fn matches_md5_prefix() {
        // md5("hello") = 5d41402abc4b2a76b9719d911017c592
        assert_eq!(
            Md5Sharder.get_shard(b"", b"hello", u64::from(u32::MAX) + 1),
            0x5d41402a
        );
        assert_eq!(Md5Sharder.get_shard(b"", b"hello", 100_000), 0x5d41402a % 100_000);
    }

    #[test]
    fn is_deterministic() {
        let first = Md5Sharder.get_shard(b"1:2:", b"entity", 100_000);
        for _ in 0..10 {
            assert_eq!(Md5Sharder.get_shard(b"1:2:", b"entity", 100_000), first);
        }
        assert!(first < 100_000);
    }
}
