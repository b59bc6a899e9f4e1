// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use thiserror::Error;

/// Errors of the signature crate
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum KeystoneSignatureError {
    /// Parsing error: {0}
    ParsingError(String),
    /// Signature verification failed: {0}
    SignatureError(String),
}
