// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Hash wrapper around SHA-256, used for every digest in the ledger core.
#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod error;
mod hash;
mod settings;

pub use error::KeystoneHashError;
pub use hash::{Hash, HashDeserializer, HashSerializer};
pub use settings::HASH_SIZE_BYTES;
