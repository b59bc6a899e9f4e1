// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use thiserror::Error;

/// models error
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum ModelsError {
    /// Serialization error: {0}
    SerializeError(#[from] keystone_serialization::SerializeError),
    /// Deserialization error: {0}
    DeserializeError(String),
    /// DARC error: {0}
    DarcError(#[from] keystone_darc::DarcError),
    /// Invalid argument: {0}
    InvalidArgument(String),
}
