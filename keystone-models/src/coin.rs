// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Generic resource token threaded through the instructions of one
//! transaction.

use crate::instance::{InstanceId, InstanceIdDeserializer, InstanceIdSerializer};
use keystone_serialization::{
    Deserializer, SerializeError, Serializer, U64VarIntDeserializer, U64VarIntSerializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    sequence::tuple,
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use std::ops::Bound::Included;

/// A generic coin. Coins are defined by the genesis coin instance that is
/// unique per coin type; contracts may consume and emit them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// the genesis instance of this coin type
    pub name: InstanceId,
    /// the number of coins of that type
    pub value: u64,
}

/// Serializer for `Coin`
#[derive(Default, Clone)]
pub struct CoinSerializer {
    instance_id_serializer: InstanceIdSerializer,
    value_serializer: U64VarIntSerializer,
}

impl CoinSerializer {
    /// Creates a serializer for `Coin`
    pub const fn new() -> Self {
        Self {
            instance_id_serializer: InstanceIdSerializer::new(),
            value_serializer: U64VarIntSerializer::new(),
        }
    }
}

impl Serializer<Coin> for CoinSerializer {
    fn serialize(&self, value: &Coin, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.instance_id_serializer.serialize(&value.name, buffer)?;
        self.value_serializer.serialize(&value.value, buffer)?;
        Ok(())
    }
}

/// Deserializer for `Coin`
#[derive(Clone)]
pub struct CoinDeserializer {
    instance_id_deserializer: InstanceIdDeserializer,
    value_deserializer: U64VarIntDeserializer,
}

impl CoinDeserializer {
    /// Creates a deserializer for `Coin`
    pub const fn new() -> Self {
        Self {
            instance_id_deserializer: InstanceIdDeserializer::new(),
            value_deserializer: U64VarIntDeserializer::new(Included(0), Included(u64::MAX)),
        }
    }
}

impl Default for CoinDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Coin> for CoinDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Coin, E> {
        context(
            "Failed Coin deserialization",
            tuple((
                context("Failed name deserialization", |input| {
                    self.instance_id_deserializer.deserialize(input)
                }),
                context("Failed value deserialization", |input| {
                    self.value_deserializer.deserialize(input)
                }),
            )),
        )
        .map(|(name, value)| Coin { name, value })
        .parse(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_serialization::DeserializeError;

    #[test]
    fn test_coin_roundtrip() {
        let coin = Coin {
            name: InstanceId::from_slice(b"goldcoin"),
            value: 1_000_000,
        };
        let mut buffer = Vec::new();
        CoinSerializer::new().serialize(&coin, &mut buffer).unwrap();
        let (rest, decoded) = CoinDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, coin);
    }
}
