// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! The authenticated state store of the ledger.
//!
//! Each chain owns one named scope inside a shared RocksDB instance. The
//! durable column family holds the full entries; an in-memory sparse
//! Merkle tree mirrors them and provides the state root and the
//! inclusion/absence proofs. The tree is rebuilt from disk when a scope is
//! opened and cloned for trial application, so proposing a block never
//! mutates durable state.
#![warn(unused_crate_dependencies)]

mod error;
mod smt_proof;
mod state_db;
mod view;

pub use error::StateError;
pub use smt_proof::{serialize_smt_proof, verify_smt_proof, SMT_LEAF_VALUE_LENGTH};
pub use state_db::{
    open_state_rocksdb, StateDb, ShareableStateDb, METADATA_CF, STATE_CF,
    STATE_ROOT_INITIAL_BYTES,
};
pub use view::{StagedView, StateDbView, StateView};
