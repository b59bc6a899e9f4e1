// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Client transactions: ordered lists of instructions applied atomically.

use crate::instruction::{Instruction, InstructionDeserializer, InstructionSerializer};
use keystone_hash::Hash;
use keystone_serialization::{
    Deserializer, SerializeError, Serializer, U32VarIntDeserializer, U32VarIntSerializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    multi::length_count,
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use std::ops::Bound::Included;

/// Maximum number of instructions per client transaction
const MAX_INSTRUCTIONS_COUNT: u32 = 1024;

/// An ordered list of instructions applied in order; if any of them fails,
/// none of them is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClientTransaction {
    /// the instructions, applied in order
    pub instructions: Vec<Instruction>,
}

impl ClientTransaction {
    /// The digest of the transaction: SHA-256 over the concatenated
    /// instruction digests.
    pub fn hash(&self) -> Hash {
        let digests: Vec<[u8; 32]> = self
            .instructions
            .iter()
            .map(|instr| instr.hash().into_bytes())
            .collect();
        let parts: Vec<&[u8]> = digests.iter().map(|digest| digest.as_slice()).collect();
        Hash::compute_from_tuple(&parts)
    }
}

/// The digest of a whole batch of transactions: SHA-256 over each
/// transaction's digest, in batch order.
pub fn transactions_hash(transactions: &[ClientTransaction]) -> Hash {
    let digests: Vec<[u8; 32]> = transactions
        .iter()
        .map(|tx| tx.hash().into_bytes())
        .collect();
    let parts: Vec<&[u8]> = digests.iter().map(|digest| digest.as_slice()).collect();
    Hash::compute_from_tuple(&parts)
}

/// True when no transaction of the batch carries any instruction.
pub fn transactions_are_empty(transactions: &[ClientTransaction]) -> bool {
    transactions.iter().all(|tx| tx.instructions.is_empty())
}

/// Serializer for `ClientTransaction`
#[derive(Default, Clone)]
pub struct ClientTransactionSerializer {
    count_serializer: U32VarIntSerializer,
    instruction_serializer: InstructionSerializer,
}

impl ClientTransactionSerializer {
    /// Creates a serializer for `ClientTransaction`
    pub const fn new() -> Self {
        Self {
            count_serializer: U32VarIntSerializer::new(),
            instruction_serializer: InstructionSerializer::new(),
        }
    }
}

impl Serializer<ClientTransaction> for ClientTransactionSerializer {
    fn serialize(
        &self,
        value: &ClientTransaction,
        buffer: &mut Vec<u8>,
    ) -> Result<(), SerializeError> {
        let count: u32 = value.instructions.len().try_into().map_err(|err| {
            SerializeError::NumberTooBig(format!("too many instructions: {}", err))
        })?;
        self.count_serializer.serialize(&count, buffer)?;
        for instruction in &value.instructions {
            self.instruction_serializer.serialize(instruction, buffer)?;
        }
        Ok(())
    }
}

/// Deserializer for `ClientTransaction`
#[derive(Clone)]
pub struct ClientTransactionDeserializer {
    count_deserializer: U32VarIntDeserializer,
    instruction_deserializer: InstructionDeserializer,
}

impl ClientTransactionDeserializer {
    /// Creates a deserializer for `ClientTransaction`
    pub const fn new() -> Self {
        Self {
            count_deserializer: U32VarIntDeserializer::new(
                Included(0),
                Included(MAX_INSTRUCTIONS_COUNT),
            ),
            instruction_deserializer: InstructionDeserializer::new(),
        }
    }
}

impl Default for ClientTransactionDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<ClientTransaction> for ClientTransactionDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], ClientTransaction, E> {
        context(
            "Failed ClientTransaction deserialization",
            length_count(
                context("Failed instruction count deserialization", |input| {
                    self.count_deserializer.deserialize(input)
                }),
                context("Failed instruction deserialization", |input| {
                    self.instruction_deserializer.deserialize(input)
                }),
            ),
        )
        .map(|instructions| ClientTransaction { instructions })
        .parse(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{InstanceId, Nonce};
    use crate::instruction::{Arguments, InstructionKind};
    use keystone_serialization::DeserializeError;

    fn tx(n: u32) -> ClientTransaction {
        ClientTransaction {
            instructions: (0..n)
                .map(|index| Instruction {
                    instance_id: InstanceId::from_slice(&index.to_le_bytes()),
                    nonce: Nonce::from_slice(&[index as u8]),
                    index,
                    length: n,
                    kind: InstructionKind::Delete,
                    signatures: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn test_transaction_hash_concatenates_instruction_hashes() {
        let tx = tx(3);
        let mut data = Vec::new();
        for instr in &tx.instructions {
            data.extend(instr.hash().to_bytes());
        }
        assert_eq!(tx.hash(), Hash::compute_from(&data));
    }

    #[test]
    fn test_batch_hash_order_sensitive() {
        let a = tx(1);
        let b = tx(2);
        assert_ne!(
            transactions_hash(&[a.clone(), b.clone()]),
            transactions_hash(&[b, a])
        );
    }

    #[test]
    fn test_is_empty() {
        assert!(transactions_are_empty(&[]));
        assert!(transactions_are_empty(&[ClientTransaction::default()]));
        assert!(!transactions_are_empty(&[tx(1)]));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let tx = tx(2);
        let mut buffer = Vec::new();
        ClientTransactionSerializer::new()
            .serialize(&tx, &mut buffer)
            .unwrap();
        let (rest, decoded) = ClientTransactionDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, tx);
    }
}
