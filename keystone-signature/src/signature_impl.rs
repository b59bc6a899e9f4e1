// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::error::KeystoneSignatureError;
use ed25519_dalek::{Signer, Verifier};
use keystone_hash::Hash;
use keystone_serialization::Deserializer;
use nom::{
    error::{context, ContextError, ParseError},
    IResult,
};
use std::{cmp::Ordering, convert::TryInto, str::FromStr};

/// Size of a serialized public key, in bytes
pub const PUBLIC_KEY_SIZE_BYTES: usize = 32;

/// Size of a serialized secret key, in bytes
pub const SECRET_KEY_SIZE_BYTES: usize = 32;

/// Size of a serialized signature, in bytes
pub const SIGNATURE_SIZE_BYTES: usize = 64;

/// An Ed25519 keypair. Signing always goes through a 32-byte [`Hash`]
/// digest so every signed structure commits to the same canonical bytes.
#[derive(Clone)]
pub struct KeyPair(ed25519_dalek::SigningKey);

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "KeyPair({})", self.get_public_key())
    }
}

impl KeyPair {
    /// Generates a new random keypair.
    ///
    /// # Example
    /// ```
    /// # use keystone_signature::KeyPair;
    /// let keypair = KeyPair::generate();
    /// ```
    pub fn generate() -> Self {
        KeyPair(ed25519_dalek::SigningKey::generate(
            &mut rand::rngs::OsRng,
        ))
    }

    /// Returns the public key of this keypair.
    pub fn get_public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Signs a hash with the secret key.
    ///
    /// # Example
    /// ```
    /// # use keystone_signature::KeyPair;
    /// # use keystone_hash::Hash;
    /// let keypair = KeyPair::generate();
    /// let digest = Hash::compute_from(b"some data");
    /// let signature = keypair.sign(&digest).unwrap();
    /// ```
    pub fn sign(&self, hash: &Hash) -> Result<Signature, KeystoneSignatureError> {
        Ok(Signature(self.0.sign(hash.to_bytes())))
    }

    /// Serializes the secret key as bytes.
    pub fn to_bytes(&self) -> [u8; SECRET_KEY_SIZE_BYTES] {
        self.0.to_bytes()
    }

    /// Deserializes a keypair from secret key bytes.
    pub fn from_bytes(data: &[u8; SECRET_KEY_SIZE_BYTES]) -> KeyPair {
        KeyPair(ed25519_dalek::SigningKey::from_bytes(data))
    }
}

/// An Ed25519 public key
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(ed25519_dalek::VerifyingKey);

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_bytes().hash(state);
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58_check())
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58_check())
    }
}

impl PublicKey {
    /// Checks that `signature` is a valid signature of `hash` under this key.
    ///
    /// # Example
    /// ```
    /// # use keystone_signature::KeyPair;
    /// # use keystone_hash::Hash;
    /// let keypair = KeyPair::generate();
    /// let digest = Hash::compute_from(b"some data");
    /// let signature = keypair.sign(&digest).unwrap();
    /// keypair.get_public_key().verify_signature(&digest, &signature).unwrap();
    /// ```
    pub fn verify_signature(
        &self,
        hash: &Hash,
        signature: &Signature,
    ) -> Result<(), KeystoneSignatureError> {
        self.0
            .verify(hash.to_bytes(), &signature.0)
            .map_err(|err| KeystoneSignatureError::SignatureError(format!("{}", err)))
    }

    /// Serialize a public key using `bs58` encoding with checksum.
    pub fn to_bs58_check(&self) -> String {
        bs58::encode(self.to_bytes()).with_check().into_string()
    }

    /// Serialize a public key as bytes.
    pub fn to_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE_BYTES] {
        self.0.as_bytes()
    }

    /// Deserialize a public key from bytes.
    pub fn from_bytes(
        data: &[u8; PUBLIC_KEY_SIZE_BYTES],
    ) -> Result<PublicKey, KeystoneSignatureError> {
        ed25519_dalek::VerifyingKey::from_bytes(data)
            .map(PublicKey)
            .map_err(|err| KeystoneSignatureError::ParsingError(format!("{}", err)))
    }

    /// Deserialize a public key using `bs58` encoding with checksum.
    pub fn from_bs58_check(data: &str) -> Result<PublicKey, KeystoneSignatureError> {
        let decoded = bs58::decode(data)
            .with_check(None)
            .into_vec()
            .map_err(|err| KeystoneSignatureError::ParsingError(format!("{}", err)))?;
        PublicKey::from_bytes(
            &decoded
                .as_slice()
                .try_into()
                .map_err(|err| KeystoneSignatureError::ParsingError(format!("{}", err)))?,
        )
    }
}

impl FromStr for PublicKey {
    type Err = KeystoneSignatureError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PublicKey::from_bs58_check(s)
    }
}

impl ::serde::Serialize for PublicKey {
    /// Human readable serialization uses the bs58-check form, binary
    /// serialization uses the raw bytes.
    fn serialize<S: ::serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.collect_str(&self.to_bs58_check())
        } else {
            s.serialize_bytes(self.to_bytes())
        }
    }
}

impl<'de> ::serde::Deserialize<'de> for PublicKey {
    /// Counterpart of the serialization above.
    fn deserialize<D: ::serde::Deserializer<'de>>(d: D) -> Result<PublicKey, D::Error> {
        if d.is_human_readable() {
            struct Base58CheckVisitor;

            impl<'de> ::serde::de::Visitor<'de> for Base58CheckVisitor {
                type Value = PublicKey;

                fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                    formatter.write_str("an ASCII base58check string")
                }

                fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
                where
                    E: ::serde::de::Error,
                {
                    PublicKey::from_bs58_check(v).map_err(E::custom)
                }
            }
            d.deserialize_str(Base58CheckVisitor)
        } else {
            struct BytesVisitor;

            impl<'de> ::serde::de::Visitor<'de> for BytesVisitor {
                type Value = PublicKey;

                fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                    formatter.write_str("a bytestring")
                }

                fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
                where
                    E: ::serde::de::Error,
                {
                    PublicKey::from_bytes(v.try_into().map_err(E::custom)?).map_err(E::custom)
                }
            }
            d.deserialize_bytes(BytesVisitor)
        }
    }
}

/// Deserializer for `PublicKey`
#[derive(Default, Clone)]
pub struct PublicKeyDeserializer;

impl PublicKeyDeserializer {
    /// Creates a deserializer for `PublicKey`
    pub const fn new() -> Self {
        Self
    }
}

impl Deserializer<PublicKey> for PublicKeyDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], PublicKey, E> {
        context("Failed public key deserialization", |input: &'a [u8]| {
            if input.len() < PUBLIC_KEY_SIZE_BYTES {
                return Err(nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::LengthValue,
                )));
            }
            let key = PublicKey::from_bytes(
                input[..PUBLIC_KEY_SIZE_BYTES].try_into().map_err(|_| {
                    nom::Err::Error(ParseError::from_error_kind(
                        input,
                        nom::error::ErrorKind::Fail,
                    ))
                })?,
            )
            .map_err(|_| {
                nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Fail,
                ))
            })?;
            Ok((&input[PUBLIC_KEY_SIZE_BYTES..], key))
        })(buffer)
    }
}

/// An Ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58_check())
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58_check())
    }
}

impl Signature {
    /// Serialize a signature using `bs58` encoding with checksum.
    pub fn to_bs58_check(&self) -> String {
        bs58::encode(self.into_bytes()).with_check().into_string()
    }

    /// Serialize a signature as bytes.
    pub fn into_bytes(self) -> [u8; SIGNATURE_SIZE_BYTES] {
        self.0.to_bytes()
    }

    /// Deserialize a signature from bytes.
    pub fn from_bytes(data: &[u8; SIGNATURE_SIZE_BYTES]) -> Signature {
        Signature(ed25519_dalek::Signature::from_bytes(data))
    }
}

impl ::serde::Serialize for Signature {
    /// Human readable serialization uses the bs58-check form, binary
    /// serialization uses the raw bytes.
    fn serialize<S: ::serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.collect_str(&self.to_bs58_check())
        } else {
            s.serialize_bytes(&self.into_bytes())
        }
    }
}

impl<'de> ::serde::Deserialize<'de> for Signature {
    /// Counterpart of the serialization above.
    fn deserialize<D: ::serde::Deserializer<'de>>(d: D) -> Result<Signature, D::Error> {
        if d.is_human_readable() {
            struct Base58CheckVisitor;

            impl<'de> ::serde::de::Visitor<'de> for Base58CheckVisitor {
                type Value = Signature;

                fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                    formatter.write_str("an ASCII base58check string")
                }

                fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
                where
                    E: ::serde::de::Error,
                {
                    let decoded = bs58::decode(v)
                        .with_check(None)
                        .into_vec()
                        .map_err(E::custom)?;
                    Ok(Signature::from_bytes(
                        decoded.as_slice().try_into().map_err(E::custom)?,
                    ))
                }
            }
            d.deserialize_str(Base58CheckVisitor)
        } else {
            struct BytesVisitor;

            impl<'de> ::serde::de::Visitor<'de> for BytesVisitor {
                type Value = Signature;

                fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                    formatter.write_str("a bytestring")
                }

                fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
                where
                    E: ::serde::de::Error,
                {
                    Ok(Signature::from_bytes(v.try_into().map_err(E::custom)?))
                }
            }
            d.deserialize_bytes(BytesVisitor)
        }
    }
}

/// Deserializer for `Signature`
#[derive(Default, Clone)]
pub struct SignatureDeserializer;

impl SignatureDeserializer {
    /// Creates a deserializer for `Signature`
    pub const fn new() -> Self {
        Self
    }
}

impl Deserializer<Signature> for SignatureDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Signature, E> {
        context("Failed signature deserialization", |input: &'a [u8]| {
            if input.len() < SIGNATURE_SIZE_BYTES {
                return Err(nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::LengthValue,
                )));
            }
            let signature =
                Signature::from_bytes(input[..SIGNATURE_SIZE_BYTES].try_into().map_err(|_| {
                    nom::Err::Error(ParseError::from_error_kind(
                        input,
                        nom::error::ErrorKind::Fail,
                    ))
                })?);
            Ok((&input[SIGNATURE_SIZE_BYTES..], signature))
        })(buffer)
    }
}
