// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Serialization and verification of the sparse-Merkle-tree proofs.
//!
//! This module is the only place that touches the proof surface of the
//! tree crate; everything else moves proofs around as opaque bytes.

use crate::error::StateError;
use keystone_hash::{Hash, HASH_SIZE_BYTES};
use keystone_models::instance::InstanceId;
use keystone_models::ledger_entry::StateEntry;
use keystone_serialization::{
    BoolDeserializer, BoolSerializer, DeserializeError, Deserializer, SerializeError, Serializer,
    U32VarIntDeserializer, U32VarIntSerializer, VecU8Deserializer, VecU8Serializer,
};
use lsmtree::{bytes::Bytes, SparseMerkleProof};
use std::ops::Bound::Included;

/// Byte length of the authenticated leaf payload of a key: the hash of the
/// value at index 0 followed by the hash of the contract id at index 1
pub const SMT_LEAF_VALUE_LENGTH: usize = 2 * HASH_SIZE_BYTES;

/// Maximum number of side nodes in a serialized proof
const MAX_SIDE_NODES: u32 = 512;

/// Maximum byte length of one proof node
const MAX_NODE_LENGTH: u64 = 1 << 16;

/// The authenticated payload stored under a key's tree leaf.
pub(crate) fn smt_leaf_value(entry: &StateEntry) -> [u8; SMT_LEAF_VALUE_LENGTH] {
    let mut leaf = [0u8; SMT_LEAF_VALUE_LENGTH];
    leaf[..HASH_SIZE_BYTES]
        .copy_from_slice(Hash::compute_from(&entry.value).to_bytes());
    leaf[HASH_SIZE_BYTES..]
        .copy_from_slice(Hash::compute_from(entry.contract_id.as_bytes()).to_bytes());
    leaf
}

/// Serializes a tree proof to the wire layout: side-node count, the side
/// nodes, then the optional non-membership leaf data and sibling data.
pub fn serialize_smt_proof(
    proof: &SparseMerkleProof<sha2::Sha256>,
) -> Result<Vec<u8>, StateError> {
    let count_serializer = U32VarIntSerializer::new();
    let bytes_serializer = VecU8Serializer::new();
    let bool_serializer = BoolSerializer::new();

    let mut buffer = Vec::new();
    let serialize = |buffer: &mut Vec<u8>| -> Result<(), SerializeError> {
        let side_nodes = proof.side_nodes();
        let count: u32 = side_nodes.len().try_into().map_err(|err| {
            SerializeError::NumberTooBig(format!("too many side nodes: {}", err))
        })?;
        count_serializer.serialize(&count, buffer)?;
        for node in side_nodes {
            bytes_serializer.serialize(&node.to_vec(), buffer)?;
        }
        match proof.non_membership_leaf_data() {
            Some(data) => {
                bool_serializer.serialize(&true, buffer)?;
                bytes_serializer.serialize(&data.to_vec(), buffer)?;
            }
            None => bool_serializer.serialize(&false, buffer)?,
        }
        match proof.sibling_data() {
            Some(data) => {
                bool_serializer.serialize(&true, buffer)?;
                bytes_serializer.serialize(&data.to_vec(), buffer)?;
            }
            None => bool_serializer.serialize(&false, buffer)?,
        }
        Ok(())
    };
    serialize(&mut buffer).map_err(|err| StateError::ProofError(format!("{}", err)))?;
    Ok(buffer)
}

/// Rebuilds a tree proof from its wire layout.
pub(crate) fn deserialize_smt_proof(
    buffer: &[u8],
) -> Result<SparseMerkleProof<sha2::Sha256>, StateError> {
    let count_deserializer = U32VarIntDeserializer::new(Included(0), Included(MAX_SIDE_NODES));
    let bytes_deserializer = VecU8Deserializer::new(Included(0), Included(MAX_NODE_LENGTH));
    let bool_deserializer = BoolDeserializer::new();

    let decode_error = |err: String| StateError::ProofError(err);

    let (mut rest, count) = count_deserializer
        .deserialize::<DeserializeError>(buffer)
        .map_err(|err| decode_error(format!("{}", err)))?;
    let mut side_nodes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (next, node) = bytes_deserializer
            .deserialize::<DeserializeError>(rest)
            .map_err(|err| decode_error(format!("{}", err)))?;
        side_nodes.push(Bytes::from(node));
        rest = next;
    }
    let (rest, has_leaf_data) = bool_deserializer
        .deserialize::<DeserializeError>(rest)
        .map_err(|err| decode_error(format!("{}", err)))?;
    let (rest, non_membership_leaf_data) = if has_leaf_data {
        let (rest, data) = bytes_deserializer
            .deserialize::<DeserializeError>(rest)
            .map_err(|err| decode_error(format!("{}", err)))?;
        (rest, Some(Bytes::from(data)))
    } else {
        (rest, None)
    };
    let (rest, has_sibling) = bool_deserializer
        .deserialize::<DeserializeError>(rest)
        .map_err(|err| decode_error(format!("{}", err)))?;
    let (rest, sibling_data) = if has_sibling {
        let (rest, data) = bytes_deserializer
            .deserialize::<DeserializeError>(rest)
            .map_err(|err| decode_error(format!("{}", err)))?;
        (rest, Some(Bytes::from(data)))
    } else {
        (rest, None)
    };
    if !rest.is_empty() {
        return Err(StateError::ProofError(
            "trailing bytes after proof".to_string(),
        ));
    }
    Ok(SparseMerkleProof::new(
        side_nodes,
        non_membership_leaf_data,
        sibling_data,
    ))
}

/// Verifies a serialized proof against a root.
///
/// With `Some(entry)`, checks that the key holds that entry (inclusion);
/// with `None`, checks that the key is absent.
pub fn verify_smt_proof(
    proof_bytes: &[u8],
    root: &Hash,
    key: &InstanceId,
    entry: Option<&StateEntry>,
) -> Result<bool, StateError> {
    let proof = deserialize_smt_proof(proof_bytes)?;
    let tree_key = Hash::compute_from(key.as_bytes());
    let leaf;
    let value: &[u8] = match entry {
        Some(entry) => {
            leaf = smt_leaf_value(entry);
            &leaf
        }
        None => &[],
    };
    Ok(proof.verify(root.to_bytes(), tree_key.to_bytes(), value))
}
