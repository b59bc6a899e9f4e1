// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use thiserror::Error;

/// Errors of the hash crate
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum KeystoneHashError {
    /// Parsing error: {0}
    ParsingError(String),
}
