// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Identities and signers recognized by DARC expressions.

use crate::error::DarcError;
use keystone_hash::Hash;
use keystone_serialization::{
    Deserializer, SerializeError, Serializer, VecU8Deserializer, VecU8Serializer,
};
use keystone_signature::{KeyPair, PublicKey, PublicKeyDeserializer, Signature as RawSignature};
use nom::{
    error::{context, ContextError, ParseError},
    sequence::tuple,
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use std::ops::Bound::Included;
use std::str::FromStr;

/// Maximum byte length of a raw signature inside a DARC signature
const MAX_SIGNATURE_LENGTH: u64 = 256;

/// An identity that can appear in a DARC expression and sign requests.
///
/// Only Ed25519 identities are supported; the enum leaves room for other
/// schemes without changing the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Identity {
    /// An Ed25519 public key
    Ed25519(PublicKey),
}

impl Identity {
    /// The string form used inside expressions, `ed25519:<bs58check>`.
    pub fn to_expression_string(&self) -> String {
        match self {
            Identity::Ed25519(public) => format!("ed25519:{}", public.to_bs58_check()),
        }
    }

    /// Verifies `signature` over `digest` for this identity.
    pub fn verify(&self, digest: &Hash, signature: &[u8]) -> Result<(), DarcError> {
        match self {
            Identity::Ed25519(public) => {
                let bytes: &[u8; keystone_signature::SIGNATURE_SIZE_BYTES] =
                    signature.try_into().map_err(|_| {
                        DarcError::SignatureError("invalid signature length".to_string())
                    })?;
                public
                    .verify_signature(digest, &RawSignature::from_bytes(bytes))
                    .map_err(DarcError::from)
            }
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_expression_string())
    }
}

impl FromStr for Identity {
    type Err = DarcError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("ed25519", key)) => Ok(Identity::Ed25519(
                PublicKey::from_bs58_check(key)
                    .map_err(|err| DarcError::ParsingError(format!("{}", err)))?,
            )),
            _ => Err(DarcError::ParsingError(format!(
                "unknown identity scheme in {}",
                s
            ))),
        }
    }
}

/// Serializer for `Identity`
#[derive(Default, Clone)]
pub struct IdentitySerializer;

impl IdentitySerializer {
    /// Creates a serializer for `Identity`
    pub const fn new() -> Self {
        Self
    }
}

impl Serializer<Identity> for IdentitySerializer {
    fn serialize(&self, value: &Identity, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        match value {
            Identity::Ed25519(public) => {
                buffer.push(0);
                buffer.extend(public.to_bytes());
            }
        }
        Ok(())
    }
}

/// Deserializer for `Identity`
#[derive(Default, Clone)]
pub struct IdentityDeserializer {
    public_key_deserializer: PublicKeyDeserializer,
}

impl IdentityDeserializer {
    /// Creates a deserializer for `Identity`
    pub const fn new() -> Self {
        Self {
            public_key_deserializer: PublicKeyDeserializer::new(),
        }
    }
}

impl Deserializer<Identity> for IdentityDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Identity, E> {
        context("Failed Identity deserialization", |input: &'a [u8]| {
            let (rest, tag) = nom::number::complete::le_u8(input)?;
            match tag {
                0 => {
                    let (rest, public) = self.public_key_deserializer.deserialize(rest)?;
                    Ok((rest, Identity::Ed25519(public)))
                }
                _ => Err(nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Tag,
                ))),
            }
        })(buffer)
    }
}

/// A signature over a DARC request digest, together with the identity that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// identity of the signer
    pub signer: Identity,
    /// raw signature bytes, empty until the signing pass fills them
    pub signature: Vec<u8>,
}

/// Serializer for `Signature`
#[derive(Default, Clone)]
pub struct SignatureSerializer {
    identity_serializer: IdentitySerializer,
    bytes_serializer: VecU8Serializer,
}

impl SignatureSerializer {
    /// Creates a serializer for `Signature`
    pub const fn new() -> Self {
        Self {
            identity_serializer: IdentitySerializer::new(),
            bytes_serializer: VecU8Serializer::new(),
        }
    }
}

impl Serializer<Signature> for SignatureSerializer {
    fn serialize(&self, value: &Signature, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.identity_serializer.serialize(&value.signer, buffer)?;
        self.bytes_serializer.serialize(&value.signature, buffer)?;
        Ok(())
    }
}

/// Deserializer for `Signature`
#[derive(Clone)]
pub struct SignatureDeserializer {
    identity_deserializer: IdentityDeserializer,
    bytes_deserializer: VecU8Deserializer,
}

impl SignatureDeserializer {
    /// Creates a deserializer for `Signature`
    pub const fn new() -> Self {
        Self {
            identity_deserializer: IdentityDeserializer::new(),
            bytes_deserializer: VecU8Deserializer::new(
                Included(0),
                Included(MAX_SIGNATURE_LENGTH),
            ),
        }
    }
}

impl Default for SignatureDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Signature> for SignatureDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Signature, E> {
        context(
            "Failed Signature deserialization",
            tuple((
                context("Failed signer deserialization", |input| {
                    self.identity_deserializer.deserialize(input)
                }),
                context("Failed signature bytes deserialization", |input| {
                    self.bytes_deserializer.deserialize(input)
                }),
            )),
        )
        .map(|(signer, signature)| Signature { signer, signature })
        .parse(buffer)
    }
}

/// Owns a keypair and produces request signatures.
#[derive(Clone)]
pub struct Signer {
    keypair: KeyPair,
}

impl Signer {
    /// Creates a signer from a keypair.
    pub fn new(keypair: KeyPair) -> Self {
        Signer { keypair }
    }

    /// Creates a signer with a fresh random keypair.
    pub fn generate() -> Self {
        Signer {
            keypair: KeyPair::generate(),
        }
    }

    /// The identity of this signer.
    pub fn identity(&self) -> Identity {
        Identity::Ed25519(self.keypair.get_public_key())
    }

    /// Signs a request digest.
    pub fn sign(&self, digest: &Hash) -> Result<Vec<u8>, DarcError> {
        Ok(self.keypair.sign(digest)?.into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_serialization::DeserializeError;

    #[test]
    fn test_identity_string_roundtrip() {
        let signer = Signer::generate();
        let identity = signer.identity();
        let text = identity.to_expression_string();
        assert_eq!(Identity::from_str(&text).unwrap(), identity);
        assert!(Identity::from_str("x509ec:abc").is_err());
    }

    #[test]
    fn test_signature_serialization_roundtrip() {
        let signer = Signer::generate();
        let digest = Hash::compute_from(b"request");
        let signature = Signature {
            signer: signer.identity(),
            signature: signer.sign(&digest).unwrap(),
        };
        let mut buffer = Vec::new();
        SignatureSerializer::new()
            .serialize(&signature, &mut buffer)
            .unwrap();
        let (rest, decoded) = SignatureDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, signature);
    }

    #[test]
    fn test_identity_verifies_own_signature() {
        let signer = Signer::generate();
        let digest = Hash::compute_from(b"payload");
        let sig = signer.sign(&digest).unwrap();
        signer.identity().verify(&digest, &sig).unwrap();
        let other = Hash::compute_from(b"tampered");
        assert!(signer.identity().verify(&other, &sig).is_err());
    }
}
