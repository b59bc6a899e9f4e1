// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Inclusion and absence proofs as they travel to clients.
//!
//! The inclusion part is the serialized proof of the underlying sparse
//! Merkle tree; the state crate produces and verifies it. The latest block
//! header ties the proof to the chain, and the forward links from a known
//! block to the latest one are filled by the consensus layer.

use crate::block::{DataHeader, DataHeaderDeserializer, DataHeaderSerializer};
use crate::instance::{InstanceId, InstanceIdDeserializer, InstanceIdSerializer};
use crate::ledger_entry::{StateEntry, StateEntryDeserializer, StateEntrySerializer};
use keystone_hash::{Hash, HashDeserializer, HashSerializer};
use keystone_serialization::{
    Deserializer, OptionDeserializer, OptionSerializer, SerializeError, Serializer,
    U32VarIntDeserializer, U32VarIntSerializer, VecU8Deserializer, VecU8Serializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    multi::length_count,
    sequence::tuple,
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use std::ops::Bound::Included;

/// Maximum byte length of a serialized tree proof
const MAX_INCLUSION_PROOF_LENGTH: u64 = 1 << 20;

/// Maximum number of forward links in a proof
const MAX_LINKS_COUNT: u32 = 4096;

/// A multi-signed link from one block to a later one, produced by the
/// consensus layer. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardLink {
    /// hash of the source block
    pub from: Hash,
    /// hash of the destination block
    pub to: Hash,
    /// aggregate signature bytes over the link
    pub signature: Vec<u8>,
}

/// Everything necessary to verify that a given key holds a given value (or
/// no value) in the chain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// the key the proof is about
    pub key: InstanceId,
    /// the entry under the key, absent for an absence proof
    pub entry: Option<StateEntry>,
    /// serialized sparse-Merkle-tree proof of inclusion or absence
    pub inclusion: Vec<u8>,
    /// the latest block header, carrying the state root the proof is
    /// anchored to
    pub latest: DataHeader,
    /// links from a client-known block to the latest one; filled by the
    /// consensus layer
    pub links: Vec<ForwardLink>,
}

/// Serializer for `ForwardLink`
#[derive(Default, Clone)]
pub struct ForwardLinkSerializer {
    hash_serializer: HashSerializer,
    bytes_serializer: VecU8Serializer,
}

impl ForwardLinkSerializer {
    /// Creates a serializer for `ForwardLink`
    pub const fn new() -> Self {
        Self {
            hash_serializer: HashSerializer::new(),
            bytes_serializer: VecU8Serializer::new(),
        }
    }
}

impl Serializer<ForwardLink> for ForwardLinkSerializer {
    fn serialize(&self, value: &ForwardLink, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.hash_serializer.serialize(&value.from, buffer)?;
        self.hash_serializer.serialize(&value.to, buffer)?;
        self.bytes_serializer.serialize(&value.signature, buffer)?;
        Ok(())
    }
}

/// Deserializer for `ForwardLink`
#[derive(Clone)]
pub struct ForwardLinkDeserializer {
    hash_deserializer: HashDeserializer,
    bytes_deserializer: VecU8Deserializer,
}

impl ForwardLinkDeserializer {
    /// Creates a deserializer for `ForwardLink`
    pub const fn new() -> Self {
        Self {
            hash_deserializer: HashDeserializer::new(),
            bytes_deserializer: VecU8Deserializer::new(Included(0), Included(4096)),
        }
    }
}

impl Default for ForwardLinkDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<ForwardLink> for ForwardLinkDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], ForwardLink, E> {
        context(
            "Failed ForwardLink deserialization",
            tuple((
                context("Failed from deserialization", |input| {
                    self.hash_deserializer.deserialize(input)
                }),
                context("Failed to deserialization", |input| {
                    self.hash_deserializer.deserialize(input)
                }),
                context("Failed signature deserialization", |input| {
                    self.bytes_deserializer.deserialize(input)
                }),
            )),
        )
        .map(|(from, to, signature)| ForwardLink {
            from,
            to,
            signature,
        })
        .parse(buffer)
    }
}

/// Serializer for `Proof`
#[derive(Default, Clone)]
pub struct ProofSerializer {
    instance_id_serializer: InstanceIdSerializer,
    entry_serializer: OptionSerializer<StateEntry, StateEntrySerializer>,
    inclusion_serializer: VecU8Serializer,
    header_serializer: DataHeaderSerializer,
    count_serializer: U32VarIntSerializer,
    link_serializer: ForwardLinkSerializer,
}

impl ProofSerializer {
    /// Creates a serializer for `Proof`
    pub fn new() -> Self {
        Self {
            instance_id_serializer: InstanceIdSerializer::new(),
            entry_serializer: OptionSerializer::new(StateEntrySerializer::new()),
            inclusion_serializer: VecU8Serializer::new(),
            header_serializer: DataHeaderSerializer::new(),
            count_serializer: U32VarIntSerializer::new(),
            link_serializer: ForwardLinkSerializer::new(),
        }
    }
}

impl Serializer<Proof> for ProofSerializer {
    fn serialize(&self, value: &Proof, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.instance_id_serializer.serialize(&value.key, buffer)?;
        self.entry_serializer.serialize(&value.entry, buffer)?;
        self.inclusion_serializer
            .serialize(&value.inclusion, buffer)?;
        self.header_serializer.serialize(&value.latest, buffer)?;
        let count: u32 = value.links.len().try_into().map_err(|err| {
            SerializeError::NumberTooBig(format!("too many forward links: {}", err))
        })?;
        self.count_serializer.serialize(&count, buffer)?;
        for link in &value.links {
            self.link_serializer.serialize(link, buffer)?;
        }
        Ok(())
    }
}

/// Deserializer for `Proof`
#[derive(Clone)]
pub struct ProofDeserializer {
    instance_id_deserializer: InstanceIdDeserializer,
    entry_deserializer: OptionDeserializer<StateEntry, StateEntryDeserializer>,
    inclusion_deserializer: VecU8Deserializer,
    header_deserializer: DataHeaderDeserializer,
    count_deserializer: U32VarIntDeserializer,
    link_deserializer: ForwardLinkDeserializer,
}

impl ProofDeserializer {
    /// Creates a deserializer for `Proof`
    pub fn new() -> Self {
        Self {
            instance_id_deserializer: InstanceIdDeserializer::new(),
            entry_deserializer: OptionDeserializer::new(StateEntryDeserializer::new()),
            inclusion_deserializer: VecU8Deserializer::new(
                Included(0),
                Included(MAX_INCLUSION_PROOF_LENGTH),
            ),
            header_deserializer: DataHeaderDeserializer::new(),
            count_deserializer: U32VarIntDeserializer::new(Included(0), Included(MAX_LINKS_COUNT)),
            link_deserializer: ForwardLinkDeserializer::new(),
        }
    }
}

impl Default for ProofDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Proof> for ProofDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Proof, E> {
        context(
            "Failed Proof deserialization",
            tuple((
                context("Failed key deserialization", |input| {
                    self.instance_id_deserializer.deserialize(input)
                }),
                context("Failed entry deserialization", |input| {
                    self.entry_deserializer.deserialize(input)
                }),
                context("Failed inclusion deserialization", |input| {
                    self.inclusion_deserializer.deserialize(input)
                }),
                context("Failed latest header deserialization", |input| {
                    self.header_deserializer.deserialize(input)
                }),
                context(
                    "Failed links deserialization",
                    length_count(
                        context("Failed link count deserialization", |input| {
                            self.count_deserializer.deserialize(input)
                        }),
                        context("Failed link deserialization", |input| {
                            self.link_deserializer.deserialize(input)
                        }),
                    ),
                ),
            )),
        )
        .map(|(key, entry, inclusion, latest, links)| Proof {
            key,
            entry,
            inclusion,
            latest,
            links,
        })
        .parse(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_darc::DarcId;
    use keystone_serialization::DeserializeError;

    #[test]
    fn test_proof_roundtrip() {
        let proof = Proof {
            key: InstanceId::from_slice(b"key"),
            entry: Some(StateEntry {
                value: b"value".to_vec(),
                contract_id: "config".to_string(),
                darc_id: DarcId::from_bytes(&[1u8; 32]),
            }),
            inclusion: vec![1, 2, 3, 4],
            latest: DataHeader {
                collection_root: Hash::compute_from(b"root"),
                client_transaction_hash: Hash::compute_from(b"txs"),
                state_changes_hash: Hash::compute_from(b"scs"),
                timestamp: 42,
            },
            links: vec![ForwardLink {
                from: Hash::compute_from(b"a"),
                to: Hash::compute_from(b"b"),
                signature: vec![9, 9],
            }],
        };
        let mut buffer = Vec::new();
        ProofSerializer::new().serialize(&proof, &mut buffer).unwrap();
        let (rest, decoded) = ProofDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, proof);
    }
}
