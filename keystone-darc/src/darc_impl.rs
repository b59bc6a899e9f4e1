// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! The DARC document itself: versioned rules with signed evolution.

use crate::error::DarcError;
use crate::identity::Identity;
use crate::request::Request;
use keystone_hash::{Hash, HashDeserializer, HASH_SIZE_BYTES};
use keystone_serialization::{
    Deserializer, OptionDeserializer, OptionSerializer, SerializeError, Serializer,
    StringDeserializer, StringSerializer, U32VarIntDeserializer, U32VarIntSerializer,
    U64VarIntDeserializer, U64VarIntSerializer, VecU8Deserializer, VecU8Serializer,
};
use nom::{
    error::{context, ContextError, ParseError},
    multi::length_count,
    sequence::tuple,
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound::Included;
use std::str::FromStr;

/// Rule name governing DARC evolution
pub const ACTION_EVOLVE: &str = "invoke:evolve";

/// Default rule name for plain signing authority
pub const ACTION_SIGN: &str = "_sign";

/// Maximum byte length of a DARC description
const MAX_DESCRIPTION_LENGTH: u64 = 1024;

/// Maximum number of rules in one DARC
const MAX_RULES_COUNT: u32 = 256;

/// Maximum byte length of a rule name or expression
const MAX_RULE_STRING_LENGTH: u32 = 4096;

/// 32-byte identifier of a DARC.
///
/// The id of a DARC is the hash of its canonical encoding; the base id is
/// the id of version 0 of the document and stays stable across evolutions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct DarcId([u8; HASH_SIZE_BYTES]);

impl DarcId {
    /// DARC id from raw bytes.
    pub fn from_bytes(data: &[u8; HASH_SIZE_BYTES]) -> DarcId {
        DarcId(*data)
    }

    /// DARC id from an arbitrary slice, zero-padded or truncated to 32 bytes.
    pub fn from_slice(data: &[u8]) -> DarcId {
        let mut id = [0u8; HASH_SIZE_BYTES];
        let len = data.len().min(HASH_SIZE_BYTES);
        id[..len].copy_from_slice(&data[..len]);
        DarcId(id)
    }

    /// The raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE_BYTES] {
        &self.0
    }

    /// Convert into raw bytes.
    pub fn into_bytes(self) -> [u8; HASH_SIZE_BYTES] {
        self.0
    }
}

impl From<Hash> for DarcId {
    fn from(hash: Hash) -> Self {
        DarcId(hash.into_bytes())
    }
}

impl std::fmt::Display for DarcId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", Hash::from_bytes(&self.0))
    }
}

/// Serializer for `DarcId`
#[derive(Default, Clone)]
pub struct DarcIdSerializer;

impl DarcIdSerializer {
    /// Creates a serializer for `DarcId`
    pub const fn new() -> Self {
        Self
    }
}

impl Serializer<DarcId> for DarcIdSerializer {
    fn serialize(&self, value: &DarcId, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        buffer.extend(value.as_bytes());
        Ok(())
    }
}

/// Deserializer for `DarcId`
#[derive(Default, Clone)]
pub struct DarcIdDeserializer {
    hash_deserializer: HashDeserializer,
}

impl DarcIdDeserializer {
    /// Creates a deserializer for `DarcId`
    pub const fn new() -> Self {
        Self {
            hash_deserializer: HashDeserializer::new(),
        }
    }
}

impl Deserializer<DarcId> for DarcIdDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], DarcId, E> {
        context("Failed DarcId deserialization", |input| {
            let (rest, hash) = self.hash_deserializer.deserialize(input)?;
            Ok((rest, DarcId::from(hash)))
        })(buffer)
    }
}

/// An identity expression: `|`-separated identity strings with OR
/// semantics. The expression is satisfied when at least one of its
/// identities is present in the candidate set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression(String);

impl Expression {
    /// Builds an expression accepting exactly one identity.
    pub fn single(identity: &Identity) -> Self {
        Expression(identity.to_expression_string())
    }

    /// Builds an expression accepting any of the given identities.
    pub fn any_of(identities: &[Identity]) -> Self {
        Expression(
            identities
                .iter()
                .map(|identity| identity.to_expression_string())
                .collect::<Vec<_>>()
                .join(" | "),
        )
    }

    /// Builds an expression from its raw string form.
    pub fn from_string(expression: String) -> Self {
        Expression(expression)
    }

    /// The raw string form of the expression.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when at least one candidate identity appears in the
    /// expression.
    pub fn is_satisfied_by(&self, candidates: &[Identity]) -> bool {
        self.0.split('|').any(|part| {
            let part = part.trim();
            match Identity::from_str(part) {
                Ok(identity) => candidates.contains(&identity),
                Err(_) => false,
            }
        })
    }
}

/// Ordered action → expression map of a DARC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Rules(BTreeMap<String, Expression>);

impl Rules {
    /// Creates an empty rule set.
    pub fn new() -> Self {
        Rules(BTreeMap::new())
    }

    /// Creates the initial rule set of a new DARC: the owner identities may
    /// sign and evolve.
    pub fn init_rules(owners: &[Identity]) -> Self {
        let mut rules = Rules::new();
        rules.add(ACTION_SIGN.to_string(), Expression::any_of(owners));
        rules.add(ACTION_EVOLVE.to_string(), Expression::any_of(owners));
        rules
    }

    /// Adds or replaces the expression for an action.
    pub fn add(&mut self, action: String, expression: Expression) {
        self.0.insert(action, expression);
    }

    /// The expression for an action, if any.
    pub fn get(&self, action: &str) -> Option<&Expression> {
        self.0.get(action)
    }

    /// True when no rule is defined.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over (action, expression) pairs in action order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Expression)> {
        self.0.iter()
    }
}

/// A Distributed Access Right Control document.
///
/// Version 0 is self-based: its own id is the base id. Evolutions keep the
/// base id, increment the version by one and link to the previous version
/// through `prev_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Darc {
    /// version, 0 for a genesis darc, incremented by each evolution
    pub version: u64,
    /// free-form description bytes
    pub description: Vec<u8>,
    /// base id; `None` for version 0 where the darc is its own base
    pub base_id: Option<DarcId>,
    /// id of the previous version; `None` for version 0
    pub prev_id: Option<DarcId>,
    /// the access rules
    pub rules: Rules,
}

impl Darc {
    /// Creates a version-0 DARC from initial rules.
    pub fn new(description: Vec<u8>, rules: Rules) -> Self {
        Darc {
            version: 0,
            description,
            base_id: None,
            prev_id: None,
            rules,
        }
    }

    /// The id of this exact version: hash of the canonical encoding.
    pub fn id(&self) -> DarcId {
        let mut buffer = Vec::new();
        DarcSerializer::new()
            .serialize(self, &mut buffer)
            .expect("darc canonical encoding cannot fail");
        DarcId::from(Hash::compute_from(&buffer))
    }

    /// The base id: the explicit base for evolved versions, the darc's own
    /// id for version 0.
    pub fn base_id(&self) -> DarcId {
        match self.base_id {
            Some(base) => base,
            None => self.id(),
        }
    }

    /// Structural verification.
    ///
    /// With `require_genesis`, the darc must be a self-based version 0.
    pub fn verify(&self, require_genesis: bool) -> Result<(), DarcError> {
        if self.rules.is_empty() {
            return Err(DarcError::EmptyRules);
        }
        if require_genesis {
            if self.version != 0 {
                return Err(DarcError::InvalidGenesis(format!(
                    "genesis darc must have version 0, got {}",
                    self.version
                )));
            }
            if self.base_id.is_some() || self.prev_id.is_some() {
                return Err(DarcError::InvalidGenesis(
                    "genesis darc must be self-based".to_string(),
                ));
            }
        } else if self.version > 0 && (self.base_id.is_none() || self.prev_id.is_none()) {
            return Err(DarcError::EvolutionError(
                "evolved darc must reference its base and previous version".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the next version of this DARC with new rules.
    pub fn evolve(&self, description: Vec<u8>, rules: Rules) -> Darc {
        Darc {
            version: self.version + 1,
            description,
            base_id: Some(self.base_id()),
            prev_id: Some(self.id()),
            rules,
        }
    }

    /// Checks that `self` is a valid direct successor of `old`.
    pub fn sanity_check(&self, old: &Darc) -> Result<(), DarcError> {
        if self.version != old.version + 1 {
            return Err(DarcError::EvolutionError(format!(
                "version must increase by one: {} -> {}",
                old.version, self.version
            )));
        }
        if self.base_id() != old.base_id() {
            return Err(DarcError::EvolutionError(
                "base id changed across evolution".to_string(),
            ));
        }
        if self.prev_id != Some(old.id()) {
            return Err(DarcError::EvolutionError(
                "previous id does not point at the evolved darc".to_string(),
            ));
        }
        if self.rules.is_empty() {
            return Err(DarcError::EmptyRules);
        }
        Ok(())
    }

    /// Verifies a signed request against this DARC.
    ///
    /// Every signature of the request must be valid over the request
    /// digest, and the expression of the requested action must be satisfied
    /// by the signing identities.
    pub fn verify_request(&self, request: &Request) -> Result<(), DarcError> {
        if request.base_id != self.base_id() {
            return Err(DarcError::BaseIdMismatch);
        }
        let expression = self
            .rules
            .get(&request.action)
            .ok_or_else(|| DarcError::RuleNotFound(request.action.clone()))?;
        if request.identities.is_empty()
            || request.identities.len() != request.signatures.len()
        {
            return Err(DarcError::SignatureError(
                "request must carry one signature per identity".to_string(),
            ));
        }
        let digest = request.hash();
        for (identity, signature) in request.identities.iter().zip(&request.signatures) {
            identity.verify(&digest, signature)?;
        }
        if !expression.is_satisfied_by(&request.identities) {
            return Err(DarcError::ExpressionNotSatisfied(request.action.clone()));
        }
        Ok(())
    }

    /// Decodes a DARC from its canonical bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Darc, DarcError> {
        let (rest, darc) = DarcDeserializer::new()
            .deserialize::<keystone_serialization::DeserializeError>(data)
            .map_err(|err| DarcError::ParsingError(format!("{}", err)))?;
        if !rest.is_empty() {
            return Err(DarcError::ParsingError(
                "trailing bytes after darc".to_string(),
            ));
        }
        Ok(darc)
    }

    /// Encodes this DARC to its canonical bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        DarcSerializer::new()
            .serialize(self, &mut buffer)
            .expect("darc canonical encoding cannot fail");
        buffer
    }
}

/// Serializer for `Darc`, also the canonical encoding hashed by
/// [`Darc::id`]
#[derive(Default, Clone)]
pub struct DarcSerializer {
    u64_serializer: U64VarIntSerializer,
    u32_serializer: U32VarIntSerializer,
    bytes_serializer: VecU8Serializer,
    id_serializer: OptionSerializer<DarcId, DarcIdSerializer>,
    string_serializer: StringSerializer,
}

impl DarcSerializer {
    /// Creates a serializer for `Darc`
    pub fn new() -> Self {
        Self {
            u64_serializer: U64VarIntSerializer::new(),
            u32_serializer: U32VarIntSerializer::new(),
            bytes_serializer: VecU8Serializer::new(),
            id_serializer: OptionSerializer::new(DarcIdSerializer::new()),
            string_serializer: StringSerializer::new(),
        }
    }
}

impl Serializer<Darc> for DarcSerializer {
    fn serialize(&self, value: &Darc, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u64_serializer.serialize(&value.version, buffer)?;
        self.bytes_serializer
            .serialize(&value.description, buffer)?;
        self.id_serializer.serialize(&value.base_id, buffer)?;
        self.id_serializer.serialize(&value.prev_id, buffer)?;
        let rules_count: u32 = value.rules.len().try_into().map_err(|err| {
            SerializeError::NumberTooBig(format!("too many rules in darc: {}", err))
        })?;
        self.u32_serializer.serialize(&rules_count, buffer)?;
        for (action, expression) in value.rules.iter() {
            self.string_serializer.serialize(action, buffer)?;
            self.string_serializer
                .serialize(&expression.as_str().to_string(), buffer)?;
        }
        Ok(())
    }
}

/// Deserializer for `Darc`
#[derive(Clone)]
pub struct DarcDeserializer {
    u64_deserializer: U64VarIntDeserializer,
    rules_count_deserializer: U32VarIntDeserializer,
    bytes_deserializer: VecU8Deserializer,
    id_deserializer: OptionDeserializer<DarcId, DarcIdDeserializer>,
    string_deserializer: StringDeserializer,
}

impl DarcDeserializer {
    /// Creates a deserializer for `Darc`
    pub fn new() -> Self {
        Self {
            u64_deserializer: U64VarIntDeserializer::new(Included(0), Included(u64::MAX)),
            rules_count_deserializer: U32VarIntDeserializer::new(
                Included(0),
                Included(MAX_RULES_COUNT),
            ),
            bytes_deserializer: VecU8Deserializer::new(
                Included(0),
                Included(MAX_DESCRIPTION_LENGTH),
            ),
            id_deserializer: OptionDeserializer::new(DarcIdDeserializer::new()),
            string_deserializer: StringDeserializer::new(
                Included(0),
                Included(MAX_RULE_STRING_LENGTH),
            ),
        }
    }
}

impl Default for DarcDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Darc> for DarcDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Darc, E> {
        context(
            "Failed Darc deserialization",
            tuple((
                context("Failed version deserialization", |input| {
                    self.u64_deserializer.deserialize(input)
                }),
                context("Failed description deserialization", |input| {
                    self.bytes_deserializer.deserialize(input)
                }),
                context("Failed base id deserialization", |input| {
                    self.id_deserializer.deserialize(input)
                }),
                context("Failed previous id deserialization", |input| {
                    self.id_deserializer.deserialize(input)
                }),
                context(
                    "Failed rules deserialization",
                    length_count(
                        context("Failed rule count deserialization", |input| {
                            self.rules_count_deserializer.deserialize(input)
                        }),
                        tuple((
                            context("Failed action deserialization", |input| {
                                self.string_deserializer.deserialize(input)
                            }),
                            context("Failed expression deserialization", |input| {
                                self.string_deserializer.deserialize(input)
                            }),
                        )),
                    ),
                ),
            )),
        )
        .map(|(version, description, base_id, prev_id, rules)| {
            let mut rule_set = Rules::new();
            for (action, expression) in rules {
                rule_set.add(action, Expression::from_string(expression));
            }
            Darc {
                version,
                description,
                base_id,
                prev_id,
                rules: rule_set,
            }
        })
        .parse(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Signer;
    use keystone_serialization::DeserializeError;

    fn new_darc(owners: &[Identity]) -> Darc {
        Darc::new(b"test darc".to_vec(), Rules::init_rules(owners))
    }

    #[test]
    fn test_darc_serialization_roundtrip() {
        let signer = Signer::generate();
        let darc = new_darc(&[signer.identity()]);
        let bytes = darc.to_bytes();
        let (rest, decoded) = DarcDeserializer::new()
            .deserialize::<DeserializeError>(&bytes)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, darc);
        assert_eq!(decoded.id(), darc.id());
    }

    #[test]
    fn test_genesis_verify() {
        let signer = Signer::generate();
        let darc = new_darc(&[signer.identity()]);
        darc.verify(true).unwrap();

        let empty = Darc::new(vec![], Rules::new());
        assert!(matches!(empty.verify(true), Err(DarcError::EmptyRules)));

        let evolved = darc.evolve(vec![], darc.rules.clone());
        assert!(evolved.verify(true).is_err());
        evolved.verify(false).unwrap();
    }

    #[test]
    fn test_evolution_chain() {
        let signer = Signer::generate();
        let d0 = new_darc(&[signer.identity()]);
        let d1 = d0.evolve(b"v1".to_vec(), d0.rules.clone());
        d1.sanity_check(&d0).unwrap();
        assert_eq!(d1.base_id(), d0.base_id());
        assert_ne!(d1.id(), d0.id());

        let d2 = d1.evolve(b"v2".to_vec(), d1.rules.clone());
        d2.sanity_check(&d1).unwrap();
        // d2 does not directly succeed d0
        assert!(d2.sanity_check(&d0).is_err());

        // version jump is rejected
        let mut bad = d0.evolve(vec![], d0.rules.clone());
        bad.version = 5;
        assert!(bad.sanity_check(&d0).is_err());
    }

    #[test]
    fn test_verify_request() {
        let owner = Signer::generate();
        let stranger = Signer::generate();
        let darc = new_darc(&[owner.identity()]);

        let mut request = Request::new(
            darc.base_id(),
            ACTION_SIGN.to_string(),
            b"payload".to_vec(),
            vec![owner.identity()],
            vec![],
        );
        request.signatures = vec![owner.sign(&request.hash()).unwrap()];
        darc.verify_request(&request).unwrap();

        // a signer outside the expression is rejected
        let mut request = Request::new(
            darc.base_id(),
            ACTION_SIGN.to_string(),
            b"payload".to_vec(),
            vec![stranger.identity()],
            vec![],
        );
        request.signatures = vec![stranger.sign(&request.hash()).unwrap()];
        assert!(matches!(
            darc.verify_request(&request),
            Err(DarcError::ExpressionNotSatisfied(_))
        ));

        // unknown action is rejected
        let mut request = Request::new(
            darc.base_id(),
            "invoke:unknown".to_string(),
            b"payload".to_vec(),
            vec![owner.identity()],
            vec![],
        );
        request.signatures = vec![owner.sign(&request.hash()).unwrap()];
        assert!(matches!(
            darc.verify_request(&request),
            Err(DarcError::RuleNotFound(_))
        ));

        // a bad signature is rejected even for a matching identity
        let request = Request::new(
            darc.base_id(),
            ACTION_SIGN.to_string(),
            b"payload".to_vec(),
            vec![owner.identity()],
            vec![vec![0u8; 64]],
        );
        assert!(matches!(
            darc.verify_request(&request),
            Err(DarcError::SignatureError(_))
        ));
    }

    #[test]
    fn test_expression_any_of() {
        let a = Signer::generate();
        let b = Signer::generate();
        let c = Signer::generate();
        let expression = Expression::any_of(&[a.identity(), b.identity()]);
        assert!(expression.is_satisfied_by(&[b.identity()]));
        assert!(expression.is_satisfied_by(&[c.identity(), a.identity()]));
        assert!(!expression.is_satisfied_by(&[c.identity()]));
        assert!(!expression.is_satisfied_by(&[]));
    }
}
