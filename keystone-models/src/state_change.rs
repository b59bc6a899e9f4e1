// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! State changes: the Create/Update/Remove triples contracts emit and the
//! state store applies.

use crate::error::ModelsError;
use crate::instance::{InstanceId, InstanceIdDeserializer, InstanceIdSerializer};
use keystone_darc::{DarcId, DarcIdDeserializer, DarcIdSerializer};
use keystone_hash::Hash;
use keystone_serialization::{
    Deserializer, SerializeError, Serializer, StringDeserializer, StringSerializer,
    VecU8Deserializer, VecU8Serializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    sequence::tuple,
    IResult, Parser,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::ops::Bound::Included;

/// Maximum byte length of a stored value
const MAX_VALUE_LENGTH: u64 = 1 << 20;

/// Maximum byte length of a contract id
const MAX_CONTRACT_ID_LENGTH: u32 = 1024;

/// How a state change modifies the store.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum StateAction {
    /// inserts a new key-value association; the key must be absent
    Create = 1,
    /// changes the value of an existing key
    Update = 2,
    /// deletes an existing key-value association
    Remove = 3,
}

impl std::fmt::Display for StateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StateAction::Create => write!(f, "Create"),
            StateAction::Update => write!(f, "Update"),
            StateAction::Remove => write!(f, "Remove"),
        }
    }
}

/// One new state applied to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// how the store is modified
    pub action: StateAction,
    /// the key being modified
    pub instance_id: InstanceId,
    /// the contract that interprets the value
    pub contract_id: String,
    /// the data needed by the contract
    pub value: Vec<u8>,
    /// the DARC controlling access to this key
    pub darc_id: DarcId,
}

impl StateChange {
    /// Convenience constructor in field order.
    pub fn new(
        action: StateAction,
        instance_id: InstanceId,
        contract_id: &str,
        value: Vec<u8>,
        darc_id: DarcId,
    ) -> Self {
        StateChange {
            action,
            instance_id,
            contract_id: contract_id.to_string(),
            value,
            darc_id,
        }
    }

    fn fmt_inner(&self, f: &mut std::fmt::Formatter, with_value: bool) -> std::fmt::Result {
        writeln!(f, "statechange")?;
        writeln!(f, "\taction: {}", self.action)?;
        writeln!(f, "\tcontract id: {}", self.contract_id)?;
        writeln!(f, "\tkey: {}", self.instance_id)?;
        if with_value {
            writeln!(f, "\tvalue: {} bytes", self.value.len())?;
        }
        Ok(())
    }
}

impl std::fmt::Display for StateChange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.fmt_inner(f, true)
    }
}

/// The digest of an ordered sequence of state changes: SHA-256 over the
/// order-preserving concatenation of their canonical encodings.
pub fn state_changes_hash(changes: &[StateChange]) -> Result<Hash, ModelsError> {
    let serializer = StateChangeSerializer::new();
    let mut data = Vec::new();
    for change in changes {
        serializer.serialize(change, &mut data)?;
    }
    Ok(Hash::compute_from(&data))
}

/// Serializer for `StateChange`, also its canonical encoding
#[derive(Default, Clone)]
pub struct StateChangeSerializer {
    instance_id_serializer: InstanceIdSerializer,
    contract_serializer: StringSerializer,
    value_serializer: VecU8Serializer,
    darc_id_serializer: DarcIdSerializer,
}

impl StateChangeSerializer {
    /// Creates a serializer for `StateChange`
    pub const fn new() -> Self {
        Self {
            instance_id_serializer: InstanceIdSerializer::new(),
            contract_serializer: StringSerializer::new(),
            value_serializer: VecU8Serializer::new(),
            darc_id_serializer: DarcIdSerializer::new(),
        }
    }
}

impl Serializer<StateChange> for StateChangeSerializer {
    fn serialize(&self, value: &StateChange, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        buffer.push(u8::from(value.action));
        self.instance_id_serializer
            .serialize(&value.instance_id, buffer)?;
        self.contract_serializer
            .serialize(&value.contract_id, buffer)?;
        self.value_serializer.serialize(&value.value, buffer)?;
        self.darc_id_serializer.serialize(&value.darc_id, buffer)?;
        Ok(())
    }
}

/// Deserializer for `StateChange`
#[derive(Clone)]
pub struct StateChangeDeserializer {
    instance_id_deserializer: InstanceIdDeserializer,
    contract_deserializer: StringDeserializer,
    value_deserializer: VecU8Deserializer,
    darc_id_deserializer: DarcIdDeserializer,
}

impl StateChangeDeserializer {
    /// Creates a deserializer for `StateChange`
    pub const fn new() -> Self {
        Self {
            instance_id_deserializer: InstanceIdDeserializer::new(),
            contract_deserializer: StringDeserializer::new(
                Included(0),
                Included(MAX_CONTRACT_ID_LENGTH),
            ),
            value_deserializer: VecU8Deserializer::new(Included(0), Included(MAX_VALUE_LENGTH)),
            darc_id_deserializer: DarcIdDeserializer::new(),
        }
    }
}

impl Default for StateChangeDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<StateChange> for StateChangeDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], StateChange, E> {
        context("Failed StateChange deserialization", |input: &'a [u8]| {
            let (rest, action_tag) = nom::number::complete::le_u8(input)?;
            let action = StateAction::try_from(action_tag).map_err(|_| {
                nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Tag,
                ))
            })?;
            let (rest, (instance_id, contract_id, value, darc_id)) = tuple((
                context("Failed instance id deserialization", |input| {
                    self.instance_id_deserializer.deserialize(input)
                }),
                context("Failed contract id deserialization", |input| {
                    self.contract_deserializer.deserialize(input)
                }),
                context("Failed value deserialization", |input| {
                    self.value_deserializer.deserialize(input)
                }),
                context("Failed darc id deserialization", |input| {
                    self.darc_id_deserializer.deserialize(input)
                }),
            ))
            .parse(rest)?;
            Ok((
                rest,
                StateChange {
                    action,
                    instance_id,
                    contract_id,
                    value,
                    darc_id,
                },
            ))
        })(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_serialization::DeserializeError;

    fn change(action: StateAction) -> StateChange {
        StateChange::new(
            action,
            InstanceId::from_slice(b"key"),
            "config",
            b"value".to_vec(),
            DarcId::from_bytes(&[4u8; 32]),
        )
    }

    #[test]
    fn test_serialization_roundtrip() {
        for action in [StateAction::Create, StateAction::Update, StateAction::Remove] {
            let change = change(action);
            let mut buffer = Vec::new();
            StateChangeSerializer::new()
                .serialize(&change, &mut buffer)
                .unwrap();
            let (rest, decoded) = StateChangeDeserializer::new()
                .deserialize::<DeserializeError>(&buffer)
                .unwrap();
            assert!(rest.is_empty());
            assert_eq!(decoded, change);
        }
    }

    #[test]
    fn test_state_changes_hash_is_order_sensitive() {
        let a = change(StateAction::Create);
        let b = change(StateAction::Update);
        let ab = state_changes_hash(&[a.clone(), b.clone()]).unwrap();
        let ba = state_changes_hash(&[b, a]).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_invalid_action_tag_rejected() {
        let change = change(StateAction::Create);
        let mut buffer = Vec::new();
        StateChangeSerializer::new()
            .serialize(&change, &mut buffer)
            .unwrap();
        buffer[0] = 99;
        assert!(StateChangeDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .is_err());
    }
}
