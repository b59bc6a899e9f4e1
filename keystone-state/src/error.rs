// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use thiserror::Error;

/// Errors of the state store
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum StateError {
    /// No entry under the requested key
    NotFound,
    /// Invalid state action: {0}
    BadAction(String),
    /// Durable store failure: {0}
    DurableIo(String),
    /// Could not decode a stored entry: {0}
    DecodeError(String),
    /// Proof production failed: {0}
    ProofError(String),
}
