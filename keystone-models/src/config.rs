// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Chain configuration: the block interval and the roster of nodes running
//! the chain.

use keystone_hash::{Hash, HashDeserializer, HashSerializer};
use keystone_serialization::{
    Deserializer, SerializeError, Serializer, StringDeserializer, StringSerializer,
    U32VarIntDeserializer, U32VarIntSerializer, U64VarIntDeserializer, U64VarIntSerializer,
};
use keystone_signature::{PublicKey, PublicKeyDeserializer};
use nom::{
    error::{context, ContextError, ParseError},
    multi::length_count,
    sequence::tuple,
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use std::ops::Bound::{Excluded, Included};
use std::time::Duration;

/// Maximum number of nodes in a roster
const MAX_ROSTER_SIZE: u32 = 1024;

/// Maximum byte length of a node address
const MAX_ADDRESS_LENGTH: u32 = 1024;

/// One node of the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// the node's public key
    pub public: PublicKey,
    /// the node's network address
    pub address: String,
}

/// An ordered list of node identities with a deterministic id and
/// aggregate commitment.
///
/// `id` and `aggregate` are entirely determined by `list`; rebuilding a
/// roster from its list must reproduce both, which is what the view-change
/// validation relies on to reject forged values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    /// identifier of the roster, derived from the list
    pub id: Hash,
    /// the nodes, in order
    pub list: Vec<NodeIdentity>,
    /// commitment over the public keys of the list
    pub aggregate: Hash,
}

impl Roster {
    /// Builds a roster from a node list, deriving `id` and `aggregate`.
    pub fn new(list: Vec<NodeIdentity>) -> Self {
        let id = Roster::derive_id(&list);
        let aggregate = Roster::derive_aggregate(&list);
        Roster {
            id,
            list,
            aggregate,
        }
    }

    fn derive_id(list: &[NodeIdentity]) -> Hash {
        let mut parts: Vec<&[u8]> = vec![b"roster-id"];
        for node in list {
            parts.push(node.public.to_bytes());
        }
        Hash::compute_from_tuple(&parts)
    }

    fn derive_aggregate(list: &[NodeIdentity]) -> Hash {
        let mut parts: Vec<&[u8]> = vec![b"roster-aggregate"];
        for node in list {
            parts.push(node.public.to_bytes());
        }
        Hash::compute_from_tuple(&parts)
    }

    /// True when `other`'s list is a cyclic shift of this roster's list.
    pub fn is_rotation(&self, other: &Roster) -> bool {
        let len = self.list.len();
        if len == 0 || other.list.len() != len {
            return false;
        }
        (0..len).any(|shift| (0..len).all(|i| other.list[i] == self.list[(i + shift) % len]))
    }

    /// Returns the roster rotated left by `shift` positions.
    pub fn rotate(&self, shift: usize) -> Roster {
        let len = self.list.len();
        if len == 0 {
            return self.clone();
        }
        let list = (0..len)
            .map(|i| self.list[(i + shift) % len].clone())
            .collect();
        Roster::new(list)
    }

    /// True when the given key belongs to one of the roster nodes.
    pub fn contains_key(&self, public: &PublicKey) -> bool {
        self.list.iter().any(|node| &node.public == public)
    }
}

/// All the configuration information of one chain. Stored under the
/// config instance derived from the genesis DARC's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// the targeted interval between two blocks, strictly positive
    pub block_interval: Duration,
    /// the nodes running the chain
    pub roster: Roster,
}

/// Serializer for `NodeIdentity`
#[derive(Default, Clone)]
pub struct NodeIdentitySerializer {
    address_serializer: StringSerializer,
}

impl NodeIdentitySerializer {
    /// Creates a serializer for `NodeIdentity`
    pub const fn new() -> Self {
        Self {
            address_serializer: StringSerializer::new(),
        }
    }
}

impl Serializer<NodeIdentity> for NodeIdentitySerializer {
    fn serialize(&self, value: &NodeIdentity, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        buffer.extend(value.public.to_bytes());
        self.address_serializer.serialize(&value.address, buffer)?;
        Ok(())
    }
}

/// Deserializer for `NodeIdentity`
#[derive(Clone)]
pub struct NodeIdentityDeserializer {
    public_key_deserializer: PublicKeyDeserializer,
    address_deserializer: StringDeserializer,
}

impl NodeIdentityDeserializer {
    /// Creates a deserializer for `NodeIdentity`
    pub const fn new() -> Self {
        Self {
            public_key_deserializer: PublicKeyDeserializer::new(),
            address_deserializer: StringDeserializer::new(
                Included(0),
                Included(MAX_ADDRESS_LENGTH),
            ),
        }
    }
}

impl Default for NodeIdentityDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<NodeIdentity> for NodeIdentityDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], NodeIdentity, E> {
        context(
            "Failed NodeIdentity deserialization",
            tuple((
                context("Failed public key deserialization", |input| {
                    self.public_key_deserializer.deserialize(input)
                }),
                context("Failed address deserialization", |input| {
                    self.address_deserializer.deserialize(input)
                }),
            )),
        )
        .map(|(public, address)| NodeIdentity { public, address })
        .parse(buffer)
    }
}

/// Serializer for `Roster`
#[derive(Default, Clone)]
pub struct RosterSerializer {
    hash_serializer: HashSerializer,
    count_serializer: U32VarIntSerializer,
    node_serializer: NodeIdentitySerializer,
}

impl RosterSerializer {
    /// Creates a serializer for `Roster`
    pub const fn new() -> Self {
        Self {
            hash_serializer: HashSerializer::new(),
            count_serializer: U32VarIntSerializer::new(),
            node_serializer: NodeIdentitySerializer::new(),
        }
    }
}

impl Serializer<Roster> for RosterSerializer {
    fn serialize(&self, value: &Roster, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.hash_serializer.serialize(&value.id, buffer)?;
        let count: u32 = value.list.len().try_into().map_err(|err| {
            SerializeError::NumberTooBig(format!("roster too large: {}", err))
        })?;
        self.count_serializer.serialize(&count, buffer)?;
        for node in &value.list {
            self.node_serializer.serialize(node, buffer)?;
        }
        self.hash_serializer.serialize(&value.aggregate, buffer)?;
        Ok(())
    }
}

/// Deserializer for `Roster`
#[derive(Clone)]
pub struct RosterDeserializer {
    hash_deserializer: HashDeserializer,
    count_deserializer: U32VarIntDeserializer,
    node_deserializer: NodeIdentityDeserializer,
}

impl RosterDeserializer {
    /// Creates a deserializer for `Roster`
    pub const fn new() -> Self {
        Self {
            hash_deserializer: HashDeserializer::new(),
            count_deserializer: U32VarIntDeserializer::new(
                Included(0),
                Included(MAX_ROSTER_SIZE),
            ),
            node_deserializer: NodeIdentityDeserializer::new(),
        }
    }
}

impl Default for RosterDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Roster> for RosterDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Roster, E> {
        context(
            "Failed Roster deserialization",
            tuple((
                context("Failed id deserialization", |input| {
                    self.hash_deserializer.deserialize(input)
                }),
                context(
                    "Failed list deserialization",
                    length_count(
                        context("Failed node count deserialization", |input| {
                            self.count_deserializer.deserialize(input)
                        }),
                        context("Failed node deserialization", |input| {
                            self.node_deserializer.deserialize(input)
                        }),
                    ),
                ),
                context("Failed aggregate deserialization", |input| {
                    self.hash_deserializer.deserialize(input)
                }),
            )),
        )
        .map(|(id, list, aggregate)| Roster {
            id,
            list,
            aggregate,
        })
        .parse(buffer)
    }
}

/// Serializer for `ChainConfig`
#[derive(Default, Clone)]
pub struct ChainConfigSerializer {
    interval_serializer: U64VarIntSerializer,
    roster_serializer: RosterSerializer,
}

impl ChainConfigSerializer {
    /// Creates a serializer for `ChainConfig`
    pub const fn new() -> Self {
        Self {
            interval_serializer: U64VarIntSerializer::new(),
            roster_serializer: RosterSerializer::new(),
        }
    }
}

impl Serializer<ChainConfig> for ChainConfigSerializer {
    fn serialize(&self, value: &ChainConfig, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        let nanos: u64 = value.block_interval.as_nanos().try_into().map_err(|err| {
            SerializeError::NumberTooBig(format!("block interval too large: {}", err))
        })?;
        self.interval_serializer.serialize(&nanos, buffer)?;
        self.roster_serializer.serialize(&value.roster, buffer)?;
        Ok(())
    }
}

/// Deserializer for `ChainConfig`; rejects a zero block interval
#[derive(Clone)]
pub struct ChainConfigDeserializer {
    interval_deserializer: U64VarIntDeserializer,
    roster_deserializer: RosterDeserializer,
}

impl ChainConfigDeserializer {
    /// Creates a deserializer for `ChainConfig`
    pub const fn new() -> Self {
        Self {
            interval_deserializer: U64VarIntDeserializer::new(Excluded(0), Included(u64::MAX)),
            roster_deserializer: RosterDeserializer::new(),
        }
    }
}

impl Default for ChainConfigDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<ChainConfig> for ChainConfigDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], ChainConfig, E> {
        context(
            "Failed ChainConfig deserialization",
            tuple((
                context("Failed block interval deserialization", |input| {
                    self.interval_deserializer.deserialize(input)
                }),
                context("Failed roster deserialization", |input| {
                    self.roster_deserializer.deserialize(input)
                }),
            )),
        )
        .map(|(nanos, roster)| ChainConfig {
            block_interval: Duration::from_nanos(nanos),
            roster,
        })
        .parse(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_serialization::DeserializeError;
    use keystone_signature::KeyPair;

    fn roster(n: usize) -> Roster {
        Roster::new(
            (0..n)
                .map(|i| NodeIdentity {
                    public: KeyPair::generate().get_public_key(),
                    address: format!("127.0.0.1:{}", 7000 + i),
                })
                .collect(),
        )
    }

    #[test]
    fn test_roster_id_reproducible_from_list() {
        let roster = roster(4);
        let rebuilt = Roster::new(roster.list.clone());
        assert_eq!(rebuilt.id, roster.id);
        assert_eq!(rebuilt.aggregate, roster.aggregate);
    }

    #[test]
    fn test_is_rotation() {
        let roster = roster(4);
        assert!(roster.is_rotation(&roster.rotate(1)));
        assert!(roster.is_rotation(&roster.rotate(3)));
        assert!(roster.is_rotation(&roster.rotate(0)));

        // reversal is not a rotation for n > 2
        let mut reversed_list = roster.list.clone();
        reversed_list.reverse();
        let reversed = Roster::new(reversed_list);
        assert!(!roster.is_rotation(&reversed));

        // different membership is not a rotation
        assert!(!roster.is_rotation(&self::roster(4)));
    }

    #[test]
    fn test_rotation_changes_id() {
        let roster = roster(3);
        let rotated = roster.rotate(1);
        assert_ne!(roster.id, rotated.id);
    }

    #[test]
    fn test_chain_config_roundtrip() {
        let config = ChainConfig {
            block_interval: Duration::from_secs(1),
            roster: roster(3),
        };
        let mut buffer = Vec::new();
        ChainConfigSerializer::new()
            .serialize(&config, &mut buffer)
            .unwrap();
        let (rest, decoded) = ChainConfigDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ChainConfig {
            block_interval: Duration::from_nanos(0),
            roster: roster(1),
        };
        let mut buffer = Vec::new();
        ChainConfigSerializer::new()
            .serialize(&config, &mut buffer)
            .unwrap();
        assert!(ChainConfigDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .is_err());
    }
}
