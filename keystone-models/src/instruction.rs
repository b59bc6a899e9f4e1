// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Instructions: the atomic authorization-checked unit of a client
//! transaction.

use crate::error::ModelsError;
use crate::instance::{
    InstanceId, InstanceIdDeserializer, InstanceIdSerializer, Nonce, NonceDeserializer,
    NonceSerializer,
};
use keystone_darc::{
    Darc, DarcId, Request, Signature, SignatureDeserializer, SignatureSerializer, Signer,
};
use keystone_hash::Hash;
use keystone_serialization::{
    Deserializer, SerializeError, Serializer, StringDeserializer, StringSerializer,
    U32VarIntDeserializer, U32VarIntSerializer, VecU8Deserializer, VecU8Serializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    multi::length_count,
    sequence::tuple,
    IResult, Parser,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt::Formatter;
use std::ops::Bound::Included;

/// Maximum byte length of an argument value
const MAX_ARGUMENT_VALUE_LENGTH: u64 = 1 << 20;

/// Maximum byte length of an argument or contract name
const MAX_NAME_LENGTH: u32 = 1024;

/// Maximum number of arguments per instruction
const MAX_ARGUMENTS_COUNT: u32 = 128;

/// Maximum number of signatures per instruction
const MAX_SIGNATURES_COUNT: u32 = 64;

/// The action string of a DARC-evolution request; when an instruction maps
/// to this action, the request message is the evolved DARC's id instead of
/// the instruction digest.
const DARC_EVOLUTION_ACTION: &str = "_evolve";

/// A name/value pair passed to a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    /// any name recognized by the contract
    pub name: String,
    /// opaque value bytes
    pub value: Vec<u8>,
}

/// A searchable, order-preserving list of arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Arguments(pub Vec<Argument>);

impl Arguments {
    /// Returns the value of the first argument with the given name.
    ///
    /// An argument carrying an explicitly empty value is indistinguishable
    /// from a missing argument for callers that only look at emptiness;
    /// the distinction here is `Some(&[])` versus `None`.
    pub fn search(&self, name: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|arg| arg.name == name)
            .map(|arg| arg.value.as_slice())
    }
}

impl From<Vec<Argument>> for Arguments {
    fn from(args: Vec<Argument>) -> Self {
        Arguments(args)
    }
}

#[derive(IntoPrimitive, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
enum InstructionKindId {
    Spawn = 0,
    Invoke = 1,
    Delete = 2,
}

/// What an instruction does to its target instance.
///
/// Exactly one variant exists per instruction by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionKind {
    /// creates a new instance
    Spawn {
        /// the kind of contract to spawn
        contract_id: String,
        /// data needed to spawn the new instance
        args: Arguments,
    },
    /// calls a command of an existing instance
    Invoke {
        /// contract-specific command name
        command: String,
        /// data needed by the command
        args: Arguments,
    },
    /// removes the target instance
    Delete,
}

impl std::fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InstructionKind::Spawn { contract_id, .. } => write!(f, "spawn {}", contract_id),
            InstructionKind::Invoke { command, .. } => write!(f, "invoke {}", command),
            InstructionKind::Delete => write!(f, "delete"),
        }
    }
}

/// One authorization-checked operation on a ledger instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// the target instance: the spawning parent for `Spawn`, the instance
    /// being invoked or deleted otherwise
    pub instance_id: InstanceId,
    /// anti-replay nonce, monotonic per (instance, signer) scope
    pub nonce: Nonce,
    /// position of this instruction inside its client transaction
    pub index: u32,
    /// total number of instructions in the client transaction; together
    /// with `index` this keeps a leader from silently dropping siblings
    pub length: u32,
    /// what the instruction does
    pub kind: InstructionKind,
    /// signatures over the derived DARC request
    pub signatures: Vec<Signature>,
}

impl Instruction {
    /// The canonical digest of the instruction.
    ///
    /// Layout: `instance_id || nonce || LE32(index) || LE32(length) || tag ||
    /// body` with tag `0x00`/`0x01`/`0x02` for Spawn/Invoke/Delete. The
    /// Spawn body is the contract id followed by each argument's name and
    /// value; the Invoke body is each argument's name and value, with the
    /// command string not part of the digest; the Delete body is empty.
    pub fn hash(&self) -> Hash {
        let index_bytes = self.index.to_le_bytes();
        let length_bytes = self.length.to_le_bytes();
        let mut parts: Vec<&[u8]> = vec![
            self.instance_id.as_bytes(),
            self.nonce.as_bytes(),
            &index_bytes,
            &length_bytes,
        ];
        let (tag, contract_id, args): (&[u8], Option<&str>, Option<&Arguments>) = match &self.kind
        {
            InstructionKind::Spawn { contract_id, args } => {
                (&[0u8], Some(contract_id.as_str()), Some(args))
            }
            InstructionKind::Invoke { args, .. } => (&[1u8], None, Some(args)),
            InstructionKind::Delete => (&[2u8], None, None),
        };
        parts.push(tag);
        if let Some(contract_id) = contract_id {
            parts.push(contract_id.as_bytes());
        }
        if let Some(args) = args {
            for arg in &args.0 {
                parts.push(arg.name.as_bytes());
                parts.push(&arg.value);
            }
        }
        Hash::compute_from_tuple(&parts)
    }

    /// Derives a new instance id from this instruction, its signatures and
    /// a caller-chosen discriminator string.
    pub fn derive_id(&self, what: &str) -> InstanceId {
        let digest = self.hash();
        let mut parts: Vec<&[u8]> = vec![digest.to_bytes(), &[0u8]];
        for signature in &self.signatures {
            parts.push(&signature.signature);
            parts.push(&[0u8]);
        }
        parts.push(what.as_bytes());
        parts.push(&[0u8]);
        InstanceId::from_bytes(&Hash::compute_from_tuple(&parts).into_bytes())
    }

    /// The DARC action this instruction maps to:
    /// `spawn:<contract_id>` / `invoke:<command>` / `Delete`.
    pub fn action(&self) -> String {
        match &self.kind {
            InstructionKind::Spawn { contract_id, .. } => format!("spawn:{}", contract_id),
            InstructionKind::Invoke { command, .. } => format!("invoke:{}", command),
            InstructionKind::Delete => "Delete".to_string(),
        }
    }

    /// The arguments of the instruction, empty for `Delete`.
    pub fn args(&self) -> &Arguments {
        static EMPTY: Arguments = Arguments(Vec::new());
        match &self.kind {
            InstructionKind::Spawn { args, .. } => args,
            InstructionKind::Invoke { args, .. } => args,
            InstructionKind::Delete => &EMPTY,
        }
    }

    /// Converts the instruction into a DARC request under the given base
    /// id.
    ///
    /// The request message is the instruction digest, except for the DARC
    /// evolution action where the evolution verification protocol requires
    /// the evolved DARC's own id, taken from `args["darc"]`.
    pub fn to_darc_request(&self, base_id: DarcId) -> Result<Request, ModelsError> {
        let action = self.action();
        let identities = self
            .signatures
            .iter()
            .map(|signature| signature.signer)
            .collect();
        let signatures = self
            .signatures
            .iter()
            .map(|signature| signature.signature.clone())
            .collect();
        let msg = if action == DARC_EVOLUTION_ACTION {
            let darc_buf = self.args().search("darc").ok_or_else(|| {
                ModelsError::InvalidArgument("darc argument missing for evolution".to_string())
            })?;
            Darc::from_bytes(darc_buf)?.id().into_bytes().to_vec()
        } else {
            self.hash().to_bytes().to_vec()
        };
        Ok(Request::new(base_id, action, msg, identities, signatures))
    }

    /// Collects one signature from each signer and stores them in the
    /// instruction.
    ///
    /// Runs in two passes: identities are filled in first so that the
    /// request digest is stable, then each signer signs that digest.
    pub fn sign_by(&mut self, darc_id: DarcId, signers: &[Signer]) -> Result<(), ModelsError> {
        self.signatures = signers
            .iter()
            .map(|signer| Signature {
                signer: signer.identity(),
                signature: Vec::new(),
            })
            .collect();

        let request = self.to_darc_request(darc_id)?;
        let digest = request.hash();

        self.signatures = signers
            .iter()
            .map(|signer| {
                Ok(Signature {
                    signer: signer.identity(),
                    signature: signer.sign(&digest)?,
                })
            })
            .collect::<Result<Vec<_>, keystone_darc::DarcError>>()?;
        Ok(())
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "instr: {}", self.hash())?;
        writeln!(f, "\tinstance id: {}", self.instance_id)?;
        writeln!(f, "\tindex: {}\tlength: {}", self.index, self.length)?;
        writeln!(f, "\taction: {}", self.action())?;
        writeln!(f, "\tsignatures: {}", self.signatures.len())?;
        Ok(())
    }
}

/// Serializer for `Arguments`
#[derive(Default, Clone)]
pub struct ArgumentsSerializer {
    count_serializer: U32VarIntSerializer,
    name_serializer: StringSerializer,
    value_serializer: VecU8Serializer,
}

impl ArgumentsSerializer {
    /// Creates a serializer for `Arguments`
    pub const fn new() -> Self {
        Self {
            count_serializer: U32VarIntSerializer::new(),
            name_serializer: StringSerializer::new(),
            value_serializer: VecU8Serializer::new(),
        }
    }
}

impl Serializer<Arguments> for ArgumentsSerializer {
    fn serialize(&self, value: &Arguments, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        let count: u32 = value.0.len().try_into().map_err(|err| {
            SerializeError::NumberTooBig(format!("too many arguments: {}", err))
        })?;
        self.count_serializer.serialize(&count, buffer)?;
        for arg in &value.0 {
            self.name_serializer.serialize(&arg.name, buffer)?;
            self.value_serializer.serialize(&arg.value, buffer)?;
        }
        Ok(())
    }
}

/// Deserializer for `Arguments`
#[derive(Clone)]
pub struct ArgumentsDeserializer {
    count_deserializer: U32VarIntDeserializer,
    name_deserializer: StringDeserializer,
    value_deserializer: VecU8Deserializer,
}

impl ArgumentsDeserializer {
    /// Creates a deserializer for `Arguments`
    pub const fn new() -> Self {
        Self {
            count_deserializer: U32VarIntDeserializer::new(
                Included(0),
                Included(MAX_ARGUMENTS_COUNT),
            ),
            name_deserializer: StringDeserializer::new(Included(0), Included(MAX_NAME_LENGTH)),
            value_deserializer: VecU8Deserializer::new(
                Included(0),
                Included(MAX_ARGUMENT_VALUE_LENGTH),
            ),
        }
    }
}

impl Default for ArgumentsDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Arguments> for ArgumentsDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Arguments, E> {
        context(
            "Failed Arguments deserialization",
            length_count(
                context("Failed argument count deserialization", |input| {
                    self.count_deserializer.deserialize(input)
                }),
                tuple((
                    context("Failed argument name deserialization", |input| {
                        self.name_deserializer.deserialize(input)
                    }),
                    context("Failed argument value deserialization", |input| {
                        self.value_deserializer.deserialize(input)
                    }),
                )),
            ),
        )
        .map(|args| {
            Arguments(
                args.into_iter()
                    .map(|(name, value)| Argument { name, value })
                    .collect(),
            )
        })
        .parse(buffer)
    }
}

/// Serializer for `Instruction`
#[derive(Default, Clone)]
pub struct InstructionSerializer {
    instance_id_serializer: InstanceIdSerializer,
    nonce_serializer: NonceSerializer,
    u32_serializer: U32VarIntSerializer,
    string_serializer: StringSerializer,
    args_serializer: ArgumentsSerializer,
    signature_serializer: SignatureSerializer,
}

impl InstructionSerializer {
    /// Creates a serializer for `Instruction`
    pub const fn new() -> Self {
        Self {
            instance_id_serializer: InstanceIdSerializer::new(),
            nonce_serializer: NonceSerializer::new(),
            u32_serializer: U32VarIntSerializer::new(),
            string_serializer: StringSerializer::new(),
            args_serializer: ArgumentsSerializer::new(),
            signature_serializer: SignatureSerializer::new(),
        }
    }
}

impl Serializer<Instruction> for InstructionSerializer {
    fn serialize(&self, value: &Instruction, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.instance_id_serializer
            .serialize(&value.instance_id, buffer)?;
        self.nonce_serializer.serialize(&value.nonce, buffer)?;
        self.u32_serializer.serialize(&value.index, buffer)?;
        self.u32_serializer.serialize(&value.length, buffer)?;
        match &value.kind {
            InstructionKind::Spawn { contract_id, args } => {
                buffer.push(u8::from(InstructionKindId::Spawn));
                self.string_serializer.serialize(contract_id, buffer)?;
                self.args_serializer.serialize(args, buffer)?;
            }
            InstructionKind::Invoke { command, args } => {
                buffer.push(u8::from(InstructionKindId::Invoke));
                self.string_serializer.serialize(command, buffer)?;
                self.args_serializer.serialize(args, buffer)?;
            }
            InstructionKind::Delete => {
                buffer.push(u8::from(InstructionKindId::Delete));
            }
        }
        let signature_count: u32 = value.signatures.len().try_into().map_err(|err| {
            SerializeError::NumberTooBig(format!("too many signatures: {}", err))
        })?;
        self.u32_serializer.serialize(&signature_count, buffer)?;
        for signature in &value.signatures {
            self.signature_serializer.serialize(signature, buffer)?;
        }
        Ok(())
    }
}

/// Deserializer for `Instruction`
#[derive(Clone)]
pub struct InstructionDeserializer {
    instance_id_deserializer: InstanceIdDeserializer,
    nonce_deserializer: NonceDeserializer,
    u32_deserializer: U32VarIntDeserializer,
    signature_count_deserializer: U32VarIntDeserializer,
    string_deserializer: StringDeserializer,
    args_deserializer: ArgumentsDeserializer,
    signature_deserializer: SignatureDeserializer,
}

impl InstructionDeserializer {
    /// Creates a deserializer for `Instruction`
    pub const fn new() -> Self {
        Self {
            instance_id_deserializer: InstanceIdDeserializer::new(),
            nonce_deserializer: NonceDeserializer::new(),
            u32_deserializer: U32VarIntDeserializer::new(Included(0), Included(u32::MAX)),
            signature_count_deserializer: U32VarIntDeserializer::new(
                Included(0),
                Included(MAX_SIGNATURES_COUNT),
            ),
            string_deserializer: StringDeserializer::new(Included(0), Included(MAX_NAME_LENGTH)),
            args_deserializer: ArgumentsDeserializer::new(),
            signature_deserializer: SignatureDeserializer::new(),
        }
    }
}

impl Default for InstructionDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Instruction> for InstructionDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Instruction, E> {
        context("Failed Instruction deserialization", |input: &'a [u8]| {
            let (rest, instance_id) = self.instance_id_deserializer.deserialize(input)?;
            let (rest, nonce) = self.nonce_deserializer.deserialize(rest)?;
            let (rest, index) = self.u32_deserializer.deserialize(rest)?;
            let (rest, length) = self.u32_deserializer.deserialize(rest)?;
            let (rest, kind_tag) = nom::number::complete::le_u8(rest)?;
            let (rest, kind) = match InstructionKindId::try_from(kind_tag) {
                Ok(InstructionKindId::Spawn) => {
                    let (rest, contract_id) = self.string_deserializer.deserialize(rest)?;
                    let (rest, args) = self.args_deserializer.deserialize(rest)?;
                    (rest, InstructionKind::Spawn { contract_id, args })
                }
                Ok(InstructionKindId::Invoke) => {
                    let (rest, command) = self.string_deserializer.deserialize(rest)?;
                    let (rest, args) = self.args_deserializer.deserialize(rest)?;
                    (rest, InstructionKind::Invoke { command, args })
                }
                Ok(InstructionKindId::Delete) => (rest, InstructionKind::Delete),
                Err(_) => {
                    return Err(nom::Err::Error(ParseError::from_error_kind(
                        input,
                        nom::error::ErrorKind::Tag,
                    )))
                }
            };
            let (rest, signatures) = length_count(
                context("Failed signature count deserialization", |input| {
                    self.signature_count_deserializer.deserialize(input)
                }),
                context("Failed signature deserialization", |input| {
                    self.signature_deserializer.deserialize(input)
                }),
            )(rest)?;
            Ok((
                rest,
                Instruction {
                    instance_id,
                    nonce,
                    index,
                    length,
                    kind,
                    signatures,
                },
            ))
        })(buffer)
    }
}
