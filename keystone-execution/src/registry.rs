// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! The contract registry and the per-instruction dispatcher.

use crate::contracts::CONTRACT_CONFIG_ID;
use crate::error::ExecutionError;
use keystone_models::coin::Coin;
use keystone_models::instance::{InstanceId, GENESIS_REFERENCE_ID};
use keystone_models::instruction::{Instruction, InstructionKind};
use keystone_models::state_change::StateChange;
use keystone_state::{StateError, StateView};
use std::collections::HashMap;
use tracing::debug;

/// A contract: given a read view and one instruction, emits state changes
/// and passes the coins through.
///
/// Contracts never apply state changes themselves; the batch driver stages
/// and commits what they return.
pub trait Contract: Send + Sync {
    /// Executes one instruction against the view.
    fn dispatch(
        &self,
        view: &dyn StateView,
        instruction: &Instruction,
        coins: &[Coin],
    ) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError>;
}

/// Maps contract ids to contract implementations.
#[derive(Default)]
pub struct ContractRegistry {
    contracts: HashMap<String, Box<dyn Contract>>,
}

impl ContractRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        ContractRegistry {
            contracts: HashMap::new(),
        }
    }

    /// Registers a contract under an id, replacing any previous one.
    pub fn register(&mut self, contract_id: &str, contract: Box<dyn Contract>) {
        self.contracts.insert(contract_id.to_string(), contract);
    }

    /// The contract registered under `contract_id`, if any.
    pub fn get(&self, contract_id: &str) -> Option<&dyn Contract> {
        self.contracts.get(contract_id).map(|boxed| boxed.as_ref())
    }
}

/// Resolves the contract id of an instruction: spawns carry it, invokes and
/// deletes read it from the targeted entry.
pub(crate) fn resolve_contract_id(
    view: &dyn StateView,
    instruction: &Instruction,
) -> Result<String, ExecutionError> {
    match &instruction.kind {
        InstructionKind::Spawn { contract_id, .. } => Ok(contract_id.clone()),
        InstructionKind::Invoke { .. } | InstructionKind::Delete => {
            match view.get_values(&instruction.instance_id) {
                Ok(entry) => Ok(entry.contract_id),
                Err(StateError::NotFound) => Err(ExecutionError::NotFound),
                Err(err) => Err(err.into()),
            }
        }
    }
}

/// Runs one instruction through the DARC gate and the matching contract.
///
/// The target entry's darc id selects the governing DARC; the instruction
/// is converted into a DARC request and verified before the contract runs.
/// The one exception is the genesis bootstrap: a `spawn:config` on a scope
/// whose genesis reference is still absent has no governing DARC yet, the
/// config contract verifies the genesis DARC itself.
pub fn execute_instruction(
    registry: &ContractRegistry,
    view: &dyn StateView,
    instruction: &Instruction,
    coins: Vec<Coin>,
) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError> {
    let contract_id = resolve_contract_id(view, instruction)?;
    let contract = registry
        .get(&contract_id)
        .ok_or_else(|| ExecutionError::UnknownContract(contract_id.clone()))?;

    match view.get_values(&instruction.instance_id) {
        Ok(target) => {
            let darc = crate::contracts::load_darc(view, &InstanceId::from(target.darc_id))?;
            let request = instruction.to_darc_request(darc.base_id())?;
            darc.verify_request(&request)
                .map_err(|err| ExecutionError::AccessDenied(format!("{}", err)))?;
        }
        Err(StateError::NotFound) => {
            let genesis_spawn = contract_id == CONTRACT_CONFIG_ID
                && matches!(instruction.kind, InstructionKind::Spawn { .. })
                && matches!(
                    view.get_values(&GENESIS_REFERENCE_ID),
                    Err(StateError::NotFound)
                );
            if !genesis_spawn {
                return Err(ExecutionError::NotFound);
            }
        }
        Err(err) => return Err(err.into()),
    }

    debug!(
        contract = %contract_id,
        action = %instruction.action(),
        "dispatching instruction"
    );
    contract.dispatch(view, instruction, &coins)
}
