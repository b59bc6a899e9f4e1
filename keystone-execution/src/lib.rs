// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Contract execution: the registry routing instructions to contract code,
//! the DARC authorization gate in front of every instruction, the built-in
//! `config` and `darc` contracts, and the batch driver that turns an
//! ordered batch of client transactions into a block payload.
#![warn(unused_crate_dependencies)]

mod batch;
mod contracts;
mod error;
mod registry;
#[cfg(test)]
mod tests;

pub use batch::{execute_batch, execute_transaction, BatchOutcome};
pub use contracts::{
    load_block_interval, load_config, load_darc, make_genesis_instruction, ConfigContract,
    DarcContract, ViewChangeLimiter, CMD_DARC_EVOLVE, CMD_UPDATE_CONFIG, CMD_VIEW_CHANGE,
    CONTRACT_CONFIG_ID, CONTRACT_DARC_ID,
};
pub use error::ExecutionError;
pub use registry::{execute_instruction, Contract, ContractRegistry};
