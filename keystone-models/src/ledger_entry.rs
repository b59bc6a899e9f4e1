// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! The durable entry stored for every instance: value, interpreting
//! contract and governing DARC.

use keystone_darc::{DarcId, DarcIdDeserializer, DarcIdSerializer};
use keystone_serialization::{
    Deserializer, SerializeError, Serializer, StringDeserializer, StringSerializer,
    VecU8Deserializer, VecU8Serializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    sequence::tuple,
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use std::ops::Bound::Included;

/// Maximum byte length of a stored value
const MAX_VALUE_LENGTH: u64 = 1 << 20;

/// Maximum byte length of a contract id
const MAX_CONTRACT_ID_LENGTH: u32 = 1024;

/// What the state store holds per key. All three fields are returned on
/// every lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// opaque value bytes
    pub value: Vec<u8>,
    /// the contract interpreting the value
    pub contract_id: String,
    /// the DARC governing access to the entry
    pub darc_id: DarcId,
}

/// Serializer for `StateEntry`, the durable value layout of the store
#[derive(Default, Clone)]
pub struct StateEntrySerializer {
    value_serializer: VecU8Serializer,
    contract_serializer: StringSerializer,
    darc_id_serializer: DarcIdSerializer,
}

impl StateEntrySerializer {
    /// Creates a serializer for `StateEntry`
    pub const fn new() -> Self {
        Self {
            value_serializer: VecU8Serializer::new(),
            contract_serializer: StringSerializer::new(),
            darc_id_serializer: DarcIdSerializer::new(),
        }
    }
}

impl Serializer<StateEntry> for StateEntrySerializer {
    fn serialize(&self, value: &StateEntry, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.value_serializer.serialize(&value.value, buffer)?;
        self.contract_serializer
            .serialize(&value.contract_id, buffer)?;
        self.darc_id_serializer.serialize(&value.darc_id, buffer)?;
        Ok(())
    }
}

/// Deserializer for `StateEntry`
#[derive(Clone)]
pub struct StateEntryDeserializer {
    value_deserializer: VecU8Deserializer,
    contract_deserializer: StringDeserializer,
    darc_id_deserializer: DarcIdDeserializer,
}

impl StateEntryDeserializer {
    /// Creates a deserializer for `StateEntry`
    pub const fn new() -> Self {
        Self {
            value_deserializer: VecU8Deserializer::new(Included(0), Included(MAX_VALUE_LENGTH)),
            contract_deserializer: StringDeserializer::new(
                Included(0),
                Included(MAX_CONTRACT_ID_LENGTH),
            ),
            darc_id_deserializer: DarcIdDeserializer::new(),
        }
    }
}

impl Default for StateEntryDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<StateEntry> for StateEntryDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], StateEntry, E> {
        context(
            "Failed StateEntry deserialization",
            tuple((
                context("Failed value deserialization", |input| {
                    self.value_deserializer.deserialize(input)
                }),
                context("Failed contract id deserialization", |input| {
                    self.contract_deserializer.deserialize(input)
                }),
                context("Failed darc id deserialization", |input| {
                    self.darc_id_deserializer.deserialize(input)
                }),
            )),
        )
        .map(|(value, contract_id, darc_id)| StateEntry {
            value,
            contract_id,
            darc_id,
        })
        .parse(buffer)
    }
}
