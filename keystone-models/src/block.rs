// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! The block payload handed to the consensus layer: a hashed header and an
//! unhashed body.

use crate::transaction::{
    ClientTransaction, ClientTransactionDeserializer, ClientTransactionSerializer,
};
use keystone_hash::{Hash, HashDeserializer, HashSerializer};
use keystone_serialization::{
    Deserializer, SerializeError, Serializer, U32VarIntDeserializer, U32VarIntSerializer,
    U64VarIntDeserializer, U64VarIntSerializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    multi::length_count,
    sequence::tuple,
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use std::ops::Bound::Included;

/// Maximum number of transactions per block body
const MAX_BLOCK_TRANSACTIONS: u32 = 100_000;

/// The data committed into a block header by the consensus layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataHeader {
    /// root of the authenticated state after applying the accepted
    /// transactions
    pub collection_root: Hash,
    /// digest of the accepted transactions of the body
    pub client_transaction_hash: Hash,
    /// digest of all the state changes produced by the accepted
    /// transactions
    pub state_changes_hash: Hash,
    /// unix timestamp in nanoseconds at batch close
    pub timestamp: u64,
}

impl DataHeader {
    /// The digest of the header; used as the block identifier of the
    /// emitted payload.
    pub fn hash(&self) -> Hash {
        let timestamp_bytes = self.timestamp.to_le_bytes();
        Hash::compute_from_tuple(&[
            self.collection_root.to_bytes(),
            self.client_transaction_hash.to_bytes(),
            self.state_changes_hash.to_bytes(),
            &timestamp_bytes,
        ])
    }
}

/// The transactions stored in the block body. The body is not hashed into
/// the header key-value proofs, which keeps inclusion proofs small.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DataBody {
    /// the accepted transactions, in application order
    pub transactions: Vec<ClientTransaction>,
}

/// Serializer for `DataHeader`
#[derive(Default, Clone)]
pub struct DataHeaderSerializer {
    hash_serializer: HashSerializer,
    u64_serializer: U64VarIntSerializer,
}

impl DataHeaderSerializer {
    /// Creates a serializer for `DataHeader`
    pub const fn new() -> Self {
        Self {
            hash_serializer: HashSerializer::new(),
            u64_serializer: U64VarIntSerializer::new(),
        }
    }
}

impl Serializer<DataHeader> for DataHeaderSerializer {
    fn serialize(&self, value: &DataHeader, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.hash_serializer
            .serialize(&value.collection_root, buffer)?;
        self.hash_serializer
            .serialize(&value.client_transaction_hash, buffer)?;
        self.hash_serializer
            .serialize(&value.state_changes_hash, buffer)?;
        self.u64_serializer.serialize(&value.timestamp, buffer)?;
        Ok(())
    }
}

/// Deserializer for `DataHeader`
#[derive(Clone)]
pub struct DataHeaderDeserializer {
    hash_deserializer: HashDeserializer,
    u64_deserializer: U64VarIntDeserializer,
}

impl DataHeaderDeserializer {
    /// Creates a deserializer for `DataHeader`
    pub const fn new() -> Self {
        Self {
            hash_deserializer: HashDeserializer::new(),
            u64_deserializer: U64VarIntDeserializer::new(Included(0), Included(u64::MAX)),
        }
    }
}

impl Default for DataHeaderDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<DataHeader> for DataHeaderDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], DataHeader, E> {
        context(
            "Failed DataHeader deserialization",
            tuple((
                context("Failed collection root deserialization", |input| {
                    self.hash_deserializer.deserialize(input)
                }),
                context("Failed transaction hash deserialization", |input| {
                    self.hash_deserializer.deserialize(input)
                }),
                context("Failed state changes hash deserialization", |input| {
                    self.hash_deserializer.deserialize(input)
                }),
                context("Failed timestamp deserialization", |input| {
                    self.u64_deserializer.deserialize(input)
                }),
            )),
        )
        .map(
            |(collection_root, client_transaction_hash, state_changes_hash, timestamp)| {
                DataHeader {
                    collection_root,
                    client_transaction_hash,
                    state_changes_hash,
                    timestamp,
                }
            },
        )
        .parse(buffer)
    }
}

/// Serializer for `DataBody`
#[derive(Default, Clone)]
pub struct DataBodySerializer {
    count_serializer: U32VarIntSerializer,
    transaction_serializer: ClientTransactionSerializer,
}

impl DataBodySerializer {
    /// Creates a serializer for `DataBody`
    pub const fn new() -> Self {
        Self {
            count_serializer: U32VarIntSerializer::new(),
            transaction_serializer: ClientTransactionSerializer::new(),
        }
    }
}

impl Serializer<DataBody> for DataBodySerializer {
    fn serialize(&self, value: &DataBody, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        let count: u32 = value.transactions.len().try_into().map_err(|err| {
            SerializeError::NumberTooBig(format!("too many transactions: {}", err))
        })?;
        self.count_serializer.serialize(&count, buffer)?;
        for transaction in &value.transactions {
            self.transaction_serializer.serialize(transaction, buffer)?;
        }
        Ok(())
    }
}

/// Deserializer for `DataBody`
#[derive(Clone)]
pub struct DataBodyDeserializer {
    count_deserializer: U32VarIntDeserializer,
    transaction_deserializer: ClientTransactionDeserializer,
}

impl DataBodyDeserializer {
    /// Creates a deserializer for `DataBody`
    pub const fn new() -> Self {
        Self {
            count_deserializer: U32VarIntDeserializer::new(
                Included(0),
                Included(MAX_BLOCK_TRANSACTIONS),
            ),
            transaction_deserializer: ClientTransactionDeserializer::new(),
        }
    }
}

impl Default for DataBodyDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<DataBody> for DataBodyDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], DataBody, E> {
        context(
            "Failed DataBody deserialization",
            length_count(
                context("Failed transaction count deserialization", |input| {
                    self.count_deserializer.deserialize(input)
                }),
                context("Failed transaction deserialization", |input| {
                    self.transaction_deserializer.deserialize(input)
                }),
            ),
        )
        .map(|transactions| DataBody { transactions })
        .parse(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_serialization::DeserializeError;

    #[test]
    fn test_header_roundtrip_and_hash() {
        let header = DataHeader {
            collection_root: Hash::compute_from(b"root"),
            client_transaction_hash: Hash::compute_from(b"txs"),
            state_changes_hash: Hash::compute_from(b"scs"),
            timestamp: 1_234_567_890,
        };
        let mut buffer = Vec::new();
        DataHeaderSerializer::new()
            .serialize(&header, &mut buffer)
            .unwrap();
        let (rest, decoded) = DataHeaderDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, header);
        assert_eq!(decoded.hash(), header.hash());

        let mut other = header;
        other.timestamp += 1;
        assert_ne!(other.hash(), header.hash());
    }

    #[test]
    fn test_body_roundtrip() {
        let body = DataBody {
            transactions: vec![ClientTransaction::default()],
        };
        let mut buffer = Vec::new();
        DataBodySerializer::new()
            .serialize(&body, &mut buffer)
            .unwrap();
        let (rest, decoded) = DataBodyDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, body);
    }
}
