// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Core data model of the permissioned ledger: instance identifiers,
//! instructions, client transactions, state changes, chain configuration
//! and the block payload exchanged with the consensus layer.
#![warn(unused_crate_dependencies)]

/// client-facing request and response payloads
pub mod api;
/// block payload structures handed to the consensus layer
pub mod block;
/// generic resource token threaded through instruction execution
pub mod coin;
/// chain configuration and roster
pub mod config;
/// model error types
pub mod error;
/// instance identifiers and nonces
pub mod instance;
/// instructions and their canonical digests
pub mod instruction;
/// the durable state entry attached to every instance
pub mod ledger_entry;
/// inclusion and absence proofs as seen on the wire
pub mod proof;
/// state changes emitted by contracts
pub mod state_change;
/// client transactions
pub mod transaction;
