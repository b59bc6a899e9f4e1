// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use thiserror::Error;

/// Errors of the ledger service
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum ServiceError {
    /// Protocol version mismatch: got {got}, expected {expected}
    Conflict {
        /// version carried by the request
        got: u32,
        /// version this service speaks
        expected: u32,
    },
    /// Unknown chain {0}
    UnknownChain(String),
    /// A chain bootstrapped from this darc already exists
    ChainExists,
    /// Malformed transaction: {0}
    MalformedTransaction(String),
    /// Genesis rejected: {0}
    GenesisRejected(String),
    /// Execution failure: {0}
    Execution(#[from] keystone_execution::ExecutionError),
    /// State store failure: {0}
    State(#[from] keystone_state::StateError),
    /// Model failure: {0}
    Models(#[from] keystone_models::error::ModelsError),
}
