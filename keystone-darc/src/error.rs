// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use thiserror::Error;

/// Errors of the DARC crate
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum DarcError {
    /// Parsing error: {0}
    ParsingError(String),
    /// The darc has no rules
    EmptyRules,
    /// The darc is not a valid genesis darc: {0}
    InvalidGenesis(String),
    /// No rule matches action {0}
    RuleNotFound(String),
    /// Expression for action {0} is not satisfied by the request identities
    ExpressionNotSatisfied(String),
    /// Signature verification failed: {0}
    SignatureError(String),
    /// Request base id does not match the darc base id
    BaseIdMismatch,
    /// Evolution check failed: {0}
    EvolutionError(String),
}

impl From<keystone_signature::KeystoneSignatureError> for DarcError {
    fn from(err: keystone_signature::KeystoneSignatureError) -> Self {
        DarcError::SignatureError(format!("{}", err))
    }
}
