// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! The ledger service: owns the store handle, the contract registry and
//! the transaction pool, and exposes the client entry points. One
//! [`Ledger`] value per process, no globals; tests build a fresh one per
//! case.
#![warn(unused_crate_dependencies)]

mod error;
mod ledger;
mod pool;

pub use error::ServiceError;
pub use ledger::{BlockProposal, Ledger};
pub use pool::{sort_transactions, TxPool};
