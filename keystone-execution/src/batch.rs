// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! The batch driver: applies an ordered batch of client transactions to
//! the state store and emits the block payload.

use crate::error::ExecutionError;
use crate::registry::{execute_instruction, ContractRegistry};
use keystone_models::block::{DataBody, DataHeader};
use keystone_models::coin::Coin;
use keystone_models::state_change::{state_changes_hash, StateChange};
use keystone_models::transaction::{transactions_hash, ClientTransaction};
use keystone_state::{StagedView, StateDb, StateError, StateView};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// The result of applying one batch: the block payload for the consensus
/// layer, plus the rejections for the caller's logs.
pub struct BatchOutcome {
    /// the header committed by the consensus layer
    pub header: DataHeader,
    /// the body carrying the accepted transactions
    pub body: DataBody,
    /// every state change of the accepted transactions, in application
    /// order
    pub state_changes: Vec<StateChange>,
    /// rejected transactions with the error that rejected them
    pub rejected: Vec<(ClientTransaction, ExecutionError)>,
}

/// Runs all instructions of one transaction against a staged overlay of
/// the base view, threading the coins through, and returns the
/// accumulated state changes. Nothing is committed; a failed instruction
/// rejects the whole transaction.
pub fn execute_transaction(
    base: &dyn StateView,
    registry: &ContractRegistry,
    transaction: &ClientTransaction,
) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError> {
    let mut staged = StagedView::new(base);
    let mut coins: Vec<Coin> = Vec::new();
    let mut changes: Vec<StateChange> = Vec::new();
    for instruction in &transaction.instructions {
        let (instruction_changes, coins_out) =
            execute_instruction(registry, &staged, instruction, coins)?;
        staged.stage_all(&instruction_changes);
        changes.extend(instruction_changes);
        coins = coins_out;
    }
    Ok((changes, coins))
}

/// Applies an ordered batch of transactions.
///
/// Each transaction is atomic: its instructions run against an overlay and
/// its changes are committed only when every instruction succeeded. A
/// rejected transaction is logged and skipped, the batch continues. Only a
/// durable write failure aborts the whole batch; the in-memory tree is
/// then already rolled back by the store.
pub fn execute_batch(
    state: &mut StateDb,
    registry: &ContractRegistry,
    transactions: &[ClientTransaction],
) -> Result<BatchOutcome, ExecutionError> {
    let mut accepted: Vec<ClientTransaction> = Vec::new();
    let mut all_changes: Vec<StateChange> = Vec::new();
    let mut rejected: Vec<(ClientTransaction, ExecutionError)> = Vec::new();

    for transaction in transactions {
        let result = execute_transaction(&*state, registry, transaction);
        match result {
            Ok((changes, _coins)) => match state.commit(&changes) {
                Ok(_) => {
                    all_changes.extend(changes);
                    accepted.push(transaction.clone());
                }
                Err(err @ StateError::DurableIo(_)) => {
                    warn!(error = %err, "durable write failed, aborting batch");
                    return Err(err.into());
                }
                Err(err) => {
                    debug!(tx = %transaction.hash(), error = %err, "transaction rejected at commit");
                    rejected.push((transaction.clone(), err.into()));
                }
            },
            Err(err) => {
                debug!(tx = %transaction.hash(), error = %err, "transaction rejected");
                rejected.push((transaction.clone(), err));
            }
        }
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0);

    let header = DataHeader {
        collection_root: state.root(),
        client_transaction_hash: transactions_hash(&accepted),
        state_changes_hash: state_changes_hash(&all_changes)?,
        timestamp,
    };

    info!(
        accepted = accepted.len(),
        rejected = rejected.len(),
        root = %header.collection_root,
        "batch applied"
    );

    Ok(BatchOutcome {
        header,
        body: DataBody {
            transactions: accepted,
        },
        state_changes: all_changes,
        rejected,
    })
}
