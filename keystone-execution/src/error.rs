// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use thiserror::Error;

/// Errors raised while dispatching and executing instructions
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum ExecutionError {
    /// No contract registered under id {0}
    UnknownContract(String),
    /// The DARC rejected the request: {0}
    AccessDenied(String),
    /// Unsupported instruction for this contract: {0}
    InvalidInstruction(String),
    /// Invalid argument: {0}
    InvalidArgument(String),
    /// Could not decode input data: {0}
    DecodeError(String),
    /// No entry under the targeted key
    NotFound,
    /// State store failure: {0}
    State(#[from] keystone_state::StateError),
    /// DARC failure: {0}
    Darc(#[from] keystone_darc::DarcError),
    /// Model failure: {0}
    Models(#[from] keystone_models::error::ModelsError),
}
