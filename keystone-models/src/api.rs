// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Client-facing request and response payloads.
//!
//! Every message starts with a protocol version field so the binary
//! encoding can evolve without breaking deployed clients; deserializers
//! accept the current version only and report a conflict otherwise.

use crate::block::{
    DataBody, DataBodyDeserializer, DataBodySerializer, DataHeader, DataHeaderDeserializer,
    DataHeaderSerializer,
};
use crate::config::{Roster, RosterDeserializer, RosterSerializer};
use crate::instance::{InstanceId, InstanceIdDeserializer, InstanceIdSerializer};
use crate::proof::{Proof, ProofDeserializer, ProofSerializer};
use crate::transaction::{
    ClientTransaction, ClientTransactionDeserializer, ClientTransactionSerializer,
};
use keystone_darc::{Darc, DarcDeserializer, DarcSerializer};
use keystone_hash::{Hash, HashDeserializer, HashSerializer};
use keystone_serialization::{
    Deserializer, SerializeError, Serializer, U32VarIntDeserializer, U32VarIntSerializer,
    U64VarIntDeserializer, U64VarIntSerializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    sequence::tuple,
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use std::ops::Bound::{Excluded, Included};
use std::time::Duration;

/// The current protocol version carried by every request and response
pub const CURRENT_VERSION: u32 = 1;

/// Asks the service to set up a new chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGenesisBlockRequest {
    /// protocol version
    pub version: u32,
    /// the nodes that participate in the chain
    pub roster: Roster,
    /// defines who is allowed to write to this chain
    pub genesis_darc: Darc,
    /// targeted interval between blocks, strictly positive
    pub block_interval: Duration,
}

/// The genesis payload of the new chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGenesisBlockResponse {
    /// protocol version
    pub version: u32,
    /// identifier of the new chain: the hash of the genesis header
    pub chain_id: Hash,
    /// the genesis block header
    pub header: DataHeader,
    /// the genesis block body
    pub body: DataBody,
}

/// Requests that a new transaction be applied to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTxRequest {
    /// protocol version
    pub version: u32,
    /// identifier of the target chain
    pub chain_id: Hash,
    /// the transaction to apply to the key-value store
    pub transaction: ClientTransaction,
    /// how many block intervals to wait for inclusion; 0 means return
    /// immediately
    pub inclusion_wait: u32,
}

/// The reply after an [`AddTxRequest`] is buffered. Final acceptance is
/// discovered through a proof request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTxResponse {
    /// protocol version
    pub version: u32,
}

/// Requests the proof that a given key is, or is not, in the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetProofRequest {
    /// protocol version
    pub version: u32,
    /// the key to look up
    pub key: InstanceId,
    /// any block known to the client on the chain; the returned proof
    /// starts at this block
    pub block_id: Hash,
}

/// The proof for a requested key. An unknown key is not an error: the
/// proof then shows absence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetProofResponse {
    /// protocol version
    pub version: u32,
    /// everything needed to verify the key-value pair (or its absence)
    pub proof: Proof,
}

/// Serializer for `CreateGenesisBlockRequest`
#[derive(Default, Clone)]
pub struct CreateGenesisBlockRequestSerializer {
    version_serializer: U32VarIntSerializer,
    roster_serializer: RosterSerializer,
    darc_serializer: DarcSerializer,
    interval_serializer: U64VarIntSerializer,
}

impl CreateGenesisBlockRequestSerializer {
    /// Creates a serializer for `CreateGenesisBlockRequest`
    pub fn new() -> Self {
        Self {
            version_serializer: U32VarIntSerializer::new(),
            roster_serializer: RosterSerializer::new(),
            darc_serializer: DarcSerializer::new(),
            interval_serializer: U64VarIntSerializer::new(),
        }
    }
}

impl Serializer<CreateGenesisBlockRequest> for CreateGenesisBlockRequestSerializer {
    fn serialize(
        &self,
        value: &CreateGenesisBlockRequest,
        buffer: &mut Vec<u8>,
    ) -> Result<(), SerializeError> {
        self.version_serializer.serialize(&value.version, buffer)?;
        self.roster_serializer.serialize(&value.roster, buffer)?;
        self.darc_serializer
            .serialize(&value.genesis_darc, buffer)?;
        let nanos: u64 = value.block_interval.as_nanos().try_into().map_err(|err| {
            SerializeError::NumberTooBig(format!("block interval too large: {}", err))
        })?;
        self.interval_serializer.serialize(&nanos, buffer)?;
        Ok(())
    }
}

/// Deserializer for `CreateGenesisBlockRequest`
#[derive(Clone)]
pub struct CreateGenesisBlockRequestDeserializer {
    version_deserializer: U32VarIntDeserializer,
    roster_deserializer: RosterDeserializer,
    darc_deserializer: DarcDeserializer,
    interval_deserializer: U64VarIntDeserializer,
}

impl CreateGenesisBlockRequestDeserializer {
    /// Creates a deserializer for `CreateGenesisBlockRequest`
    pub fn new() -> Self {
        Self {
            version_deserializer: U32VarIntDeserializer::new(
                Included(CURRENT_VERSION),
                Included(CURRENT_VERSION),
            ),
            roster_deserializer: RosterDeserializer::new(),
            darc_deserializer: DarcDeserializer::new(),
            interval_deserializer: U64VarIntDeserializer::new(Excluded(0), Included(u64::MAX)),
        }
    }
}

impl Default for CreateGenesisBlockRequestDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<CreateGenesisBlockRequest> for CreateGenesisBlockRequestDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], CreateGenesisBlockRequest, E> {
        context(
            "Failed CreateGenesisBlockRequest deserialization",
            tuple((
                context("Failed version deserialization", |input| {
                    self.version_deserializer.deserialize(input)
                }),
                context("Failed roster deserialization", |input| {
                    self.roster_deserializer.deserialize(input)
                }),
                context("Failed genesis darc deserialization", |input| {
                    self.darc_deserializer.deserialize(input)
                }),
                context("Failed block interval deserialization", |input| {
                    self.interval_deserializer.deserialize(input)
                }),
            )),
        )
        .map(
            |(version, roster, genesis_darc, nanos)| CreateGenesisBlockRequest {
                version,
                roster,
                genesis_darc,
                block_interval: Duration::from_nanos(nanos),
            },
        )
        .parse(buffer)
    }
}

/// Serializer for `CreateGenesisBlockResponse`
#[derive(Default, Clone)]
pub struct CreateGenesisBlockResponseSerializer {
    version_serializer: U32VarIntSerializer,
    hash_serializer: HashSerializer,
    header_serializer: DataHeaderSerializer,
    body_serializer: DataBodySerializer,
}

impl CreateGenesisBlockResponseSerializer {
    /// Creates a serializer for `CreateGenesisBlockResponse`
    pub fn new() -> Self {
        Self {
            version_serializer: U32VarIntSerializer::new(),
            hash_serializer: HashSerializer::new(),
            header_serializer: DataHeaderSerializer::new(),
            body_serializer: DataBodySerializer::new(),
        }
    }
}

impl Serializer<CreateGenesisBlockResponse> for CreateGenesisBlockResponseSerializer {
    fn serialize(
        &self,
        value: &CreateGenesisBlockResponse,
        buffer: &mut Vec<u8>,
    ) -> Result<(), SerializeError> {
        self.version_serializer.serialize(&value.version, buffer)?;
        self.hash_serializer.serialize(&value.chain_id, buffer)?;
        self.header_serializer.serialize(&value.header, buffer)?;
        self.body_serializer.serialize(&value.body, buffer)?;
        Ok(())
    }
}

/// Deserializer for `CreateGenesisBlockResponse`
#[derive(Clone)]
pub struct CreateGenesisBlockResponseDeserializer {
    version_deserializer: U32VarIntDeserializer,
    hash_deserializer: HashDeserializer,
    header_deserializer: DataHeaderDeserializer,
    body_deserializer: DataBodyDeserializer,
}

impl CreateGenesisBlockResponseDeserializer {
    /// Creates a deserializer for `CreateGenesisBlockResponse`
    pub fn new() -> Self {
        Self {
            version_deserializer: U32VarIntDeserializer::new(
                Included(CURRENT_VERSION),
                Included(CURRENT_VERSION),
            ),
            hash_deserializer: HashDeserializer::new(),
            header_deserializer: DataHeaderDeserializer::new(),
            body_deserializer: DataBodyDeserializer::new(),
        }
    }
}

impl Default for CreateGenesisBlockResponseDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<CreateGenesisBlockResponse> for CreateGenesisBlockResponseDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], CreateGenesisBlockResponse, E> {
        context(
            "Failed CreateGenesisBlockResponse deserialization",
            tuple((
                context("Failed version deserialization", |input| {
                    self.version_deserializer.deserialize(input)
                }),
                context("Failed chain id deserialization", |input| {
                    self.hash_deserializer.deserialize(input)
                }),
                context("Failed header deserialization", |input| {
                    self.header_deserializer.deserialize(input)
                }),
                context("Failed body deserialization", |input| {
                    self.body_deserializer.deserialize(input)
                }),
            )),
        )
        .map(|(version, chain_id, header, body)| CreateGenesisBlockResponse {
            version,
            chain_id,
            header,
            body,
        })
        .parse(buffer)
    }
}

/// Serializer for `AddTxRequest`
#[derive(Default, Clone)]
pub struct AddTxRequestSerializer {
    version_serializer: U32VarIntSerializer,
    hash_serializer: HashSerializer,
    transaction_serializer: ClientTransactionSerializer,
}

impl AddTxRequestSerializer {
    /// Creates a serializer for `AddTxRequest`
    pub const fn new() -> Self {
        Self {
            version_serializer: U32VarIntSerializer::new(),
            hash_serializer: HashSerializer::new(),
            transaction_serializer: ClientTransactionSerializer::new(),
        }
    }
}

impl Serializer<AddTxRequest> for AddTxRequestSerializer {
    fn serialize(&self, value: &AddTxRequest, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.version_serializer.serialize(&value.version, buffer)?;
        self.hash_serializer.serialize(&value.chain_id, buffer)?;
        self.transaction_serializer
            .serialize(&value.transaction, buffer)?;
        self.version_serializer
            .serialize(&value.inclusion_wait, buffer)?;
        Ok(())
    }
}

/// Deserializer for `AddTxRequest`
#[derive(Clone)]
pub struct AddTxRequestDeserializer {
    version_deserializer: U32VarIntDeserializer,
    hash_deserializer: HashDeserializer,
    transaction_deserializer: ClientTransactionDeserializer,
    wait_deserializer: U32VarIntDeserializer,
}

impl AddTxRequestDeserializer {
    /// Creates a deserializer for `AddTxRequest`
    pub const fn new() -> Self {
        Self {
            version_deserializer: U32VarIntDeserializer::new(
                Included(CURRENT_VERSION),
                Included(CURRENT_VERSION),
            ),
            hash_deserializer: HashDeserializer::new(),
            transaction_deserializer: ClientTransactionDeserializer::new(),
            wait_deserializer: U32VarIntDeserializer::new(Included(0), Included(u32::MAX)),
        }
    }
}

impl Default for AddTxRequestDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<AddTxRequest> for AddTxRequestDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], AddTxRequest, E> {
        context(
            "Failed AddTxRequest deserialization",
            tuple((
                context("Failed version deserialization", |input| {
                    self.version_deserializer.deserialize(input)
                }),
                context("Failed chain id deserialization", |input| {
                    self.hash_deserializer.deserialize(input)
                }),
                context("Failed transaction deserialization", |input| {
                    self.transaction_deserializer.deserialize(input)
                }),
                context("Failed inclusion wait deserialization", |input| {
                    self.wait_deserializer.deserialize(input)
                }),
            )),
        )
        .map(
            |(version, chain_id, transaction, inclusion_wait)| AddTxRequest {
                version,
                chain_id,
                transaction,
                inclusion_wait,
            },
        )
        .parse(buffer)
    }
}

/// Serializer for `GetProofRequest`
#[derive(Default, Clone)]
pub struct GetProofRequestSerializer {
    version_serializer: U32VarIntSerializer,
    instance_id_serializer: InstanceIdSerializer,
    hash_serializer: HashSerializer,
}

impl GetProofRequestSerializer {
    /// Creates a serializer for `GetProofRequest`
    pub const fn new() -> Self {
        Self {
            version_serializer: U32VarIntSerializer::new(),
            instance_id_serializer: InstanceIdSerializer::new(),
            hash_serializer: HashSerializer::new(),
        }
    }
}

impl Serializer<GetProofRequest> for GetProofRequestSerializer {
    fn serialize(
        &self,
        value: &GetProofRequest,
        buffer: &mut Vec<u8>,
    ) -> Result<(), SerializeError> {
        self.version_serializer.serialize(&value.version, buffer)?;
        self.instance_id_serializer.serialize(&value.key, buffer)?;
        self.hash_serializer.serialize(&value.block_id, buffer)?;
        Ok(())
    }
}

/// Deserializer for `GetProofRequest`
#[derive(Clone)]
pub struct GetProofRequestDeserializer {
    version_deserializer: U32VarIntDeserializer,
    instance_id_deserializer: InstanceIdDeserializer,
    hash_deserializer: HashDeserializer,
}

impl GetProofRequestDeserializer {
    /// Creates a deserializer for `GetProofRequest`
    pub const fn new() -> Self {
        Self {
            version_deserializer: U32VarIntDeserializer::new(
                Included(CURRENT_VERSION),
                Included(CURRENT_VERSION),
            ),
            instance_id_deserializer: InstanceIdDeserializer::new(),
            hash_deserializer: HashDeserializer::new(),
        }
    }
}

impl Default for GetProofRequestDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<GetProofRequest> for GetProofRequestDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], GetProofRequest, E> {
        context(
            "Failed GetProofRequest deserialization",
            tuple((
                context("Failed version deserialization", |input| {
                    self.version_deserializer.deserialize(input)
                }),
                context("Failed key deserialization", |input| {
                    self.instance_id_deserializer.deserialize(input)
                }),
                context("Failed block id deserialization", |input| {
                    self.hash_deserializer.deserialize(input)
                }),
            )),
        )
        .map(|(version, key, block_id)| GetProofRequest {
            version,
            key,
            block_id,
        })
        .parse(buffer)
    }
}

/// Serializer for `GetProofResponse`
#[derive(Default, Clone)]
pub struct GetProofResponseSerializer {
    version_serializer: U32VarIntSerializer,
    proof_serializer: ProofSerializer,
}

impl GetProofResponseSerializer {
    /// Creates a serializer for `GetProofResponse`
    pub fn new() -> Self {
        Self {
            version_serializer: U32VarIntSerializer::new(),
            proof_serializer: ProofSerializer::new(),
        }
    }
}

impl Serializer<GetProofResponse> for GetProofResponseSerializer {
    fn serialize(
        &self,
        value: &GetProofResponse,
        buffer: &mut Vec<u8>,
    ) -> Result<(), SerializeError> {
        self.version_serializer.serialize(&value.version, buffer)?;
        self.proof_serializer.serialize(&value.proof, buffer)?;
        Ok(())
    }
}

/// Deserializer for `GetProofResponse`
#[derive(Clone)]
pub struct GetProofResponseDeserializer {
    version_deserializer: U32VarIntDeserializer,
    proof_deserializer: ProofDeserializer,
}

impl GetProofResponseDeserializer {
    /// Creates a deserializer for `GetProofResponse`
    pub fn new() -> Self {
        Self {
            version_deserializer: U32VarIntDeserializer::new(
                Included(CURRENT_VERSION),
                Included(CURRENT_VERSION),
            ),
            proof_deserializer: ProofDeserializer::new(),
        }
    }
}

impl Default for GetProofResponseDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<GetProofResponse> for GetProofResponseDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], GetProofResponse, E> {
        context(
            "Failed GetProofResponse deserialization",
            tuple((
                context("Failed version deserialization", |input| {
                    self.version_deserializer.deserialize(input)
                }),
                context("Failed proof deserialization", |input| {
                    self.proof_deserializer.deserialize(input)
                }),
            )),
        )
        .map(|(version, proof)| GetProofResponse { version, proof })
        .parse(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeIdentity;
    use keystone_darc::{Rules, Signer};
    use keystone_serialization::DeserializeError;

    fn sample_roster() -> Roster {
        Roster::new(vec![NodeIdentity {
            public: keystone_signature::KeyPair::generate().get_public_key(),
            address: "127.0.0.1:7000".to_string(),
        }])
    }

    #[test]
    fn test_create_genesis_request_roundtrip() {
        let signer = Signer::generate();
        let request = CreateGenesisBlockRequest {
            version: CURRENT_VERSION,
            roster: sample_roster(),
            genesis_darc: Darc::new(vec![], Rules::init_rules(&[signer.identity()])),
            block_interval: Duration::from_secs(1),
        };
        let mut buffer = Vec::new();
        CreateGenesisBlockRequestSerializer::new()
            .serialize(&request, &mut buffer)
            .unwrap();
        let (rest, decoded) = CreateGenesisBlockRequestDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let request = AddTxRequest {
            version: CURRENT_VERSION + 1,
            chain_id: Hash::compute_from(b"chain"),
            transaction: ClientTransaction::default(),
            inclusion_wait: 0,
        };
        let mut buffer = Vec::new();
        AddTxRequestSerializer::new()
            .serialize(&request, &mut buffer)
            .unwrap();
        assert!(AddTxRequestDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .is_err());
    }

    #[test]
    fn test_get_proof_request_roundtrip() {
        let request = GetProofRequest {
            version: CURRENT_VERSION,
            key: InstanceId::from_slice(b"key"),
            block_id: Hash::compute_from(b"block"),
        };
        let mut buffer = Vec::new();
        GetProofRequestSerializer::new()
            .serialize(&request, &mut buffer)
            .unwrap();
        let (rest, decoded) = GetProofRequestDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, request);
    }
}
