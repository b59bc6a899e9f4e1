// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Instance identifiers and anti-replay nonces.

use keystone_darc::DarcId;
use keystone_hash::{Hash, HashDeserializer};
use keystone_serialization::{Deserializer, SerializeError, Serializer};
use nom::{
    error::{context, ContextError, ParseError},
    IResult,
};
use serde::{Deserialize, Serialize};

/// Size in bytes of a serialized instance id
pub const INSTANCE_ID_SIZE_BYTES: usize = 32;

/// Size in bytes of a serialized nonce
pub const NONCE_SIZE_BYTES: usize = 32;

/// 32-byte identifier of one instance of a contract, an object in the
/// ledger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct InstanceId([u8; INSTANCE_ID_SIZE_BYTES]);

/// The all-zero instance id. Its entry stores the genesis DARC's id and is
/// present exactly when the chain is initialized.
pub const GENESIS_REFERENCE_ID: InstanceId = InstanceId::zero();

impl InstanceId {
    /// The all-zero instance id.
    pub const fn zero() -> InstanceId {
        InstanceId([0u8; INSTANCE_ID_SIZE_BYTES])
    }

    /// Instance id from an arbitrary slice, zero-padded or truncated to 32
    /// bytes.
    pub fn from_slice(data: &[u8]) -> InstanceId {
        let mut id = [0u8; INSTANCE_ID_SIZE_BYTES];
        let len = data.len().min(INSTANCE_ID_SIZE_BYTES);
        id[..len].copy_from_slice(&data[..len]);
        InstanceId(id)
    }

    /// Instance id from exactly 32 bytes.
    pub fn from_bytes(data: &[u8; INSTANCE_ID_SIZE_BYTES]) -> InstanceId {
        InstanceId(*data)
    }

    /// The raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; INSTANCE_ID_SIZE_BYTES] {
        &self.0
    }

    /// Convert into raw bytes.
    pub fn into_bytes(self) -> [u8; INSTANCE_ID_SIZE_BYTES] {
        self.0
    }
}

impl From<DarcId> for InstanceId {
    fn from(id: DarcId) -> Self {
        InstanceId(id.into_bytes())
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", Hash::from_bytes(&self.0))
    }
}

/// Derives the instance id holding the chain configuration from the genesis
/// DARC's id: `SHA-256(darc_id || 0x00 || "config")`.
pub fn derive_config_id(genesis_darc_id: &DarcId) -> InstanceId {
    let digest =
        Hash::compute_from_tuple(&[genesis_darc_id.as_bytes(), &[0u8], b"config"]);
    InstanceId(digest.into_bytes())
}

/// Serializer for `InstanceId`
#[derive(Default, Clone)]
pub struct InstanceIdSerializer;

impl InstanceIdSerializer {
    /// Creates a serializer for `InstanceId`
    pub const fn new() -> Self {
        Self
    }
}

impl Serializer<InstanceId> for InstanceIdSerializer {
    fn serialize(&self, value: &InstanceId, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        buffer.extend(value.as_bytes());
        Ok(())
    }
}

/// Deserializer for `InstanceId`
#[derive(Default, Clone)]
pub struct InstanceIdDeserializer {
    hash_deserializer: HashDeserializer,
}

impl InstanceIdDeserializer {
    /// Creates a deserializer for `InstanceId`
    pub const fn new() -> Self {
        Self {
            hash_deserializer: HashDeserializer::new(),
        }
    }
}

impl Deserializer<InstanceId> for InstanceIdDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], InstanceId, E> {
        context("Failed InstanceId deserialization", |input| {
            let (rest, hash) = self.hash_deserializer.deserialize(input)?;
            Ok((rest, InstanceId(hash.into_bytes())))
        })(buffer)
    }
}

/// 32-byte anti-replay nonce bound into the instruction digest.
///
/// Shares the representation of [`InstanceId`] but is a distinct type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Nonce([u8; NONCE_SIZE_BYTES]);

impl Nonce {
    /// Nonce from an arbitrary slice, zero-padded or truncated to 32 bytes.
    pub fn from_slice(data: &[u8]) -> Nonce {
        let mut nonce = [0u8; NONCE_SIZE_BYTES];
        let len = data.len().min(NONCE_SIZE_BYTES);
        nonce[..len].copy_from_slice(&data[..len]);
        Nonce(nonce)
    }

    /// Nonce from exactly 32 bytes.
    pub fn from_bytes(data: &[u8; NONCE_SIZE_BYTES]) -> Nonce {
        Nonce(*data)
    }

    /// The raw bytes of the nonce.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE_BYTES] {
        &self.0
    }
}

/// Serializer for `Nonce`
#[derive(Default, Clone)]
pub struct NonceSerializer;

impl NonceSerializer {
    /// Creates a serializer for `Nonce`
    pub const fn new() -> Self {
        Self
    }
}

impl Serializer<Nonce> for NonceSerializer {
    fn serialize(&self, value: &Nonce, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        buffer.extend(value.as_bytes());
        Ok(())
    }
}

/// Deserializer for `Nonce`
#[derive(Default, Clone)]
pub struct NonceDeserializer {
    hash_deserializer: HashDeserializer,
}

impl NonceDeserializer {
    /// Creates a deserializer for `Nonce`
    pub const fn new() -> Self {
        Self {
            hash_deserializer: HashDeserializer::new(),
        }
    }
}

impl Deserializer<Nonce> for NonceDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Nonce, E> {
        context("Failed Nonce deserialization", |input| {
            let (rest, hash) = self.hash_deserializer.deserialize(input)?;
            Ok((rest, Nonce(hash.into_bytes())))
        })(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_pads_and_truncates() {
        let short = InstanceId::from_slice(&[1, 2, 3]);
        let mut expected = [0u8; 32];
        expected[..3].copy_from_slice(&[1, 2, 3]);
        assert_eq!(short.as_bytes(), &expected);

        let long = InstanceId::from_slice(&[9u8; 40]);
        assert_eq!(long.as_bytes(), &[9u8; 32]);
    }

    #[test]
    fn test_genesis_reference_is_zero() {
        assert_eq!(GENESIS_REFERENCE_ID.as_bytes(), &[0u8; 32]);
        assert_eq!(GENESIS_REFERENCE_ID, InstanceId::zero());
    }

    #[test]
    fn test_derive_config_id_matches_layout() {
        let darc_id = DarcId::from_bytes(&[0xAB; 32]);
        let mut data = Vec::new();
        data.extend(darc_id.as_bytes());
        data.push(0);
        data.extend(b"config");
        let expected = Hash::compute_from(&data);
        assert_eq!(
            derive_config_id(&darc_id).as_bytes(),
            &expected.into_bytes()
        );
    }
}
