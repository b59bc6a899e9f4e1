// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! The built-in `config` and `darc` contracts, and the helpers shared
//! between them and the service layer.

use crate::error::ExecutionError;
use crate::registry::Contract;
use keystone_darc::{Darc, DarcId, Identity};
use keystone_models::coin::Coin;
use keystone_models::config::{
    ChainConfig, ChainConfigDeserializer, ChainConfigSerializer, Roster, RosterDeserializer,
};
use keystone_models::instance::{
    derive_config_id, InstanceId, GENESIS_REFERENCE_ID,
};
use keystone_models::instruction::{Argument, Arguments, Instruction, InstructionKind};
use keystone_models::state_change::{StateAction, StateChange};
use keystone_serialization::{
    DeserializeError, Deserializer, SerializeError, Serializer, U64VarIntDeserializer,
    U64VarIntSerializer,
};
use keystone_signature::PublicKey;
use keystone_state::{StateError, StateView};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Bound::Included;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Id of the config contract
pub const CONTRACT_CONFIG_ID: &str = "config";

/// Id of the darc contract
pub const CONTRACT_DARC_ID: &str = "darc";

/// Invoke command replacing the whole chain configuration
pub const CMD_UPDATE_CONFIG: &str = "update_config";

/// Invoke command rotating the roster
pub const CMD_VIEW_CHANGE: &str = "view_change";

/// Invoke command evolving a darc
pub const CMD_DARC_EVOLVE: &str = "evolve";

/// Loads the chain configuration from the view: the genesis reference
/// resolves to the genesis DARC's id, which derives the config key.
pub fn load_config(view: &dyn StateView) -> Result<ChainConfig, ExecutionError> {
    let reference = view.get_values(&GENESIS_REFERENCE_ID)?;
    if reference.contract_id != CONTRACT_CONFIG_ID {
        return Err(ExecutionError::DecodeError(format!(
            "genesis reference is not a {} entry",
            CONTRACT_CONFIG_ID
        )));
    }
    if reference.value.len() != 32 {
        return Err(ExecutionError::DecodeError(
            "genesis reference value has invalid length".to_string(),
        ));
    }
    let genesis_darc_id = DarcId::from_slice(&reference.value);

    let config_entry = view.get_values(&derive_config_id(&genesis_darc_id))?;
    if config_entry.contract_id != CONTRACT_CONFIG_ID {
        return Err(ExecutionError::DecodeError(format!(
            "config entry is not a {} entry",
            CONTRACT_CONFIG_ID
        )));
    }
    decode_config(&config_entry.value)
}

/// Loads the block interval from the stored chain configuration.
pub fn load_block_interval(view: &dyn StateView) -> Result<Duration, ExecutionError> {
    Ok(load_config(view)?.block_interval)
}

/// Loads the DARC stored under `key`.
pub fn load_darc(view: &dyn StateView, key: &InstanceId) -> Result<Darc, ExecutionError> {
    let entry = view.get_values(key)?;
    if entry.contract_id != CONTRACT_DARC_ID {
        return Err(ExecutionError::DecodeError(format!(
            "expected contract to be {} but got: {}",
            CONTRACT_DARC_ID, entry.contract_id
        )));
    }
    Darc::from_bytes(&entry.value)
        .map_err(|err| ExecutionError::DecodeError(format!("{}", err)))
}

fn decode_config(buffer: &[u8]) -> Result<ChainConfig, ExecutionError> {
    let (rest, config) = ChainConfigDeserializer::new()
        .deserialize::<DeserializeError>(buffer)
        .map_err(|err| ExecutionError::DecodeError(format!("{}", err)))?;
    if !rest.is_empty() {
        return Err(ExecutionError::DecodeError(
            "trailing bytes after chain config".to_string(),
        ));
    }
    Ok(config)
}

fn decode_roster(buffer: &[u8]) -> Result<Roster, ExecutionError> {
    let (rest, roster) = RosterDeserializer::new()
        .deserialize::<DeserializeError>(buffer)
        .map_err(|err| ExecutionError::DecodeError(format!("{}", err)))?;
    if !rest.is_empty() {
        return Err(ExecutionError::DecodeError(
            "trailing bytes after roster".to_string(),
        ));
    }
    Ok(roster)
}

fn encode_config(config: &ChainConfig) -> Result<Vec<u8>, ExecutionError> {
    let mut buffer = Vec::new();
    ChainConfigSerializer::new()
        .serialize(config, &mut buffer)
        .map_err(|err: SerializeError| ExecutionError::DecodeError(format!("{}", err)))?;
    Ok(buffer)
}

fn darc_id_of(view: &dyn StateView, key: &InstanceId) -> Result<DarcId, ExecutionError> {
    match view.get_values(key) {
        Ok(entry) => Ok(entry.darc_id),
        Err(StateError::NotFound) => Err(ExecutionError::NotFound),
        Err(err) => Err(err.into()),
    }
}

/// Builds the `spawn:config` instruction bootstrapping a new chain.
pub fn make_genesis_instruction(
    genesis_darc: &Darc,
    block_interval: Duration,
    roster: &Roster,
) -> Result<Instruction, ExecutionError> {
    let mut interval_buf = Vec::new();
    let nanos: u64 = block_interval.as_nanos().try_into().map_err(|err| {
        ExecutionError::InvalidArgument(format!("block interval too large: {}", err))
    })?;
    U64VarIntSerializer::new()
        .serialize(&nanos, &mut interval_buf)
        .map_err(|err| ExecutionError::InvalidArgument(format!("{}", err)))?;

    let mut roster_buf = Vec::new();
    keystone_models::config::RosterSerializer::new()
        .serialize(roster, &mut roster_buf)
        .map_err(|err| ExecutionError::InvalidArgument(format!("{}", err)))?;

    Ok(Instruction {
        instance_id: GENESIS_REFERENCE_ID,
        nonce: Default::default(),
        index: 0,
        length: 1,
        kind: InstructionKind::Spawn {
            contract_id: CONTRACT_CONFIG_ID.to_string(),
            args: Arguments(vec![
                Argument {
                    name: "darc".to_string(),
                    value: genesis_darc.to_bytes(),
                },
                Argument {
                    name: "block_interval".to_string(),
                    value: interval_buf,
                },
                Argument {
                    name: "roster".to_string(),
                    value: roster_buf,
                },
            ]),
        },
        signatures: vec![],
    })
}

/// Rate limiter for view changes: one accepted view change per
/// block-interval per signer. Process state, not ledger state.
#[derive(Clone, Default)]
pub struct ViewChangeLimiter(Arc<Mutex<HashMap<(DarcId, PublicKey), Instant>>>);

impl ViewChangeLimiter {
    /// Creates an empty limiter.
    pub fn new() -> Self {
        Default::default()
    }

    /// Checks the per-signer rate limit and records the acceptance.
    fn within_interval(
        &self,
        darc_id: DarcId,
        signer: &PublicKey,
        interval: Duration,
    ) -> Result<(), ExecutionError> {
        let mut table = self.0.lock();
        let now = Instant::now();
        if let Some(last) = table.get(&(darc_id, *signer)) {
            if now.duration_since(*last) < interval {
                return Err(ExecutionError::AccessDenied(
                    "view change rate limit exceeded for this signer".to_string(),
                ));
            }
        }
        table.insert((darc_id, *signer), now);
        Ok(())
    }
}

/// The config contract: chain bootstrap, configuration update and
/// view-change rotation. Can only be spawned once per chain, for the
/// genesis state.
pub struct ConfigContract {
    limiter: ViewChangeLimiter,
}

impl ConfigContract {
    /// Creates the config contract sharing the process-wide view-change
    /// limiter.
    pub fn new(limiter: ViewChangeLimiter) -> Self {
        ConfigContract { limiter }
    }

    fn spawn(
        &self,
        instruction: &Instruction,
        coins: &[Coin],
    ) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError> {
        let args = instruction.args();
        let darc_buf = args
            .search("darc")
            .ok_or_else(|| ExecutionError::InvalidArgument("missing darc argument".to_string()))?
            .to_vec();
        let darc = Darc::from_bytes(&darc_buf).map_err(|err| {
            warn!("couldn't decode genesis darc");
            ExecutionError::DecodeError(format!("{}", err))
        })?;
        if darc.rules.is_empty() {
            return Err(ExecutionError::InvalidArgument(
                "don't accept darc with empty rules".to_string(),
            ));
        }
        darc.verify(true).map_err(|err| {
            warn!("couldn't verify genesis darc");
            ExecutionError::InvalidArgument(format!("{}", err))
        })?;

        let interval_buf = args.search("block_interval").ok_or_else(|| {
            ExecutionError::InvalidArgument("missing block_interval argument".to_string())
        })?;
        let (_, nanos) = U64VarIntDeserializer::new(Included(0), Included(u64::MAX))
            .deserialize::<DeserializeError>(interval_buf)
            .map_err(|err| ExecutionError::DecodeError(format!("{}", err)))?;
        if nanos == 0 {
            return Err(ExecutionError::InvalidArgument(
                "block interval is less or equal to zero".to_string(),
            ));
        }

        let roster_buf = args.search("roster").ok_or_else(|| {
            ExecutionError::InvalidArgument("missing roster argument".to_string())
        })?;
        let roster = decode_roster(roster_buf)?;

        let config = ChainConfig {
            block_interval: Duration::from_nanos(nanos),
            roster,
        };
        let config_buf = encode_config(&config)?;

        let id = darc.base_id();
        debug!(genesis_darc = %id, "bootstrapping chain state");
        Ok((
            vec![
                StateChange::new(
                    StateAction::Create,
                    GENESIS_REFERENCE_ID,
                    CONTRACT_CONFIG_ID,
                    id.as_bytes().to_vec(),
                    id,
                ),
                StateChange::new(
                    StateAction::Create,
                    InstanceId::from(id),
                    CONTRACT_DARC_ID,
                    darc_buf,
                    id,
                ),
                StateChange::new(
                    StateAction::Create,
                    derive_config_id(&id),
                    CONTRACT_CONFIG_ID,
                    config_buf,
                    id,
                ),
            ],
            coins.to_vec(),
        ))
    }

    fn update_config(
        &self,
        view: &dyn StateView,
        instruction: &Instruction,
        coins: &[Coin],
    ) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError> {
        let darc_id = darc_id_of(view, &instruction.instance_id)?;
        let config_buf = instruction
            .args()
            .search("config")
            .ok_or_else(|| {
                ExecutionError::InvalidArgument("missing config argument".to_string())
            })?
            .to_vec();
        let new_config = decode_config(&config_buf)?;
        if new_config.block_interval.is_zero() {
            return Err(ExecutionError::InvalidArgument(
                "block interval is less than or equal to zero".to_string(),
            ));
        }
        Ok((
            vec![StateChange::new(
                StateAction::Update,
                derive_config_id(&darc_id),
                CONTRACT_CONFIG_ID,
                config_buf,
                darc_id,
            )],
            coins.to_vec(),
        ))
    }

    fn view_change(
        &self,
        view: &dyn StateView,
        instruction: &Instruction,
        coins: &[Coin],
    ) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError> {
        let darc_id = darc_id_of(view, &instruction.instance_id)?;
        let config = load_config(view)?;

        let roster_buf = instruction.args().search("roster").ok_or_else(|| {
            ExecutionError::InvalidArgument("missing roster argument".to_string())
        })?;
        let new_roster = decode_roster(roster_buf)?;
        valid_rotation(&config.roster, &new_roster)?;

        // only a current roster member may rotate, and at most once per
        // block interval
        let signer_key = match instruction.signatures.first() {
            Some(signature) => match signature.signer {
                Identity::Ed25519(public) => public,
            },
            None => {
                return Err(ExecutionError::AccessDenied(
                    "view change carries no signature".to_string(),
                ))
            }
        };
        if !config.roster.contains_key(&signer_key) {
            return Err(ExecutionError::AccessDenied(
                "view change signer is not part of the current roster".to_string(),
            ));
        }
        self.limiter
            .within_interval(darc_id, &signer_key, config.block_interval)?;

        update_roster_scs(view, darc_id, new_roster, coins)
    }
}

impl Contract for ConfigContract {
    fn dispatch(
        &self,
        view: &dyn StateView,
        instruction: &Instruction,
        coins: &[Coin],
    ) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError> {
        match &instruction.kind {
            InstructionKind::Spawn { .. } => self.spawn(instruction, coins),
            InstructionKind::Invoke { command, .. } if command == CMD_UPDATE_CONFIG => {
                self.update_config(view, instruction, coins)
            }
            InstructionKind::Invoke { command, .. } if command == CMD_VIEW_CHANGE => {
                self.view_change(view, instruction, coins)
            }
            InstructionKind::Invoke { command, .. } => Err(ExecutionError::InvalidArgument(
                format!("invalid invoke command: {}", command),
            )),
            InstructionKind::Delete => Err(ExecutionError::InvalidInstruction(
                "unsupported instruction type".to_string(),
            )),
        }
    }
}

/// Replaces only the roster of the stored configuration.
fn update_roster_scs(
    view: &dyn StateView,
    darc_id: DarcId,
    new_roster: Roster,
    coins: &[Coin],
) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError> {
    let mut config = load_config(view)?;
    config.roster = new_roster;
    let config_buf = encode_config(&config)?;
    Ok((
        vec![StateChange::new(
            StateAction::Update,
            derive_config_id(&darc_id),
            CONTRACT_CONFIG_ID,
            config_buf,
            darc_id,
        )],
        coins.to_vec(),
    ))
}

/// A new roster is accepted only when it is a cyclic shift of the old one
/// and its id and aggregate can be reproduced from its list alone.
fn valid_rotation(old_roster: &Roster, new_roster: &Roster) -> Result<(), ExecutionError> {
    if !old_roster.is_rotation(new_roster) {
        return Err(ExecutionError::InvalidArgument(
            "the new roster is not a valid rotation of the old roster".to_string(),
        ));
    }
    let rebuilt = Roster::new(new_roster.list.clone());
    if rebuilt.id != new_roster.id {
        return Err(ExecutionError::InvalidArgument(
            "re-created roster does not have the same id".to_string(),
        ));
    }
    if rebuilt.aggregate != new_roster.aggregate {
        return Err(ExecutionError::InvalidArgument(
            "re-created roster does not have the same aggregate key".to_string(),
        ));
    }
    Ok(())
}

/// The darc contract: spawns new DARCs and evolves existing ones.
#[derive(Default)]
pub struct DarcContract;

impl DarcContract {
    /// Creates the darc contract.
    pub fn new() -> Self {
        DarcContract
    }

    fn evolve(
        &self,
        view: &dyn StateView,
        instruction: &Instruction,
        coins: &[Coin],
    ) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError> {
        let darc_id = darc_id_of(view, &instruction.instance_id)?;
        let darc_buf = instruction
            .args()
            .search("darc")
            .ok_or_else(|| ExecutionError::InvalidArgument("missing darc argument".to_string()))?
            .to_vec();
        let new_darc = Darc::from_bytes(&darc_buf)
            .map_err(|err| ExecutionError::DecodeError(format!("{}", err)))?;
        let old_darc = load_darc(view, &InstanceId::from(darc_id))?;
        new_darc
            .sanity_check(&old_darc)
            .map_err(|err| ExecutionError::InvalidArgument(format!("{}", err)))?;
        Ok((
            vec![StateChange::new(
                StateAction::Update,
                instruction.instance_id,
                CONTRACT_DARC_ID,
                darc_buf,
                darc_id,
            )],
            coins.to_vec(),
        ))
    }
}

impl Contract for DarcContract {
    fn dispatch(
        &self,
        view: &dyn StateView,
        instruction: &Instruction,
        coins: &[Coin],
    ) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError> {
        match &instruction.kind {
            InstructionKind::Spawn { contract_id, args } => {
                if contract_id != CONTRACT_DARC_ID {
                    // the dispatcher only routes spawn:darc here; anything
                    // else cannot be reached through the registry
                    return Err(ExecutionError::InvalidArgument(format!(
                        "darc contract cannot spawn {}",
                        contract_id
                    )));
                }
                let darc_buf = args.search("darc").ok_or_else(|| {
                    ExecutionError::InvalidArgument("missing darc argument".to_string())
                })?;
                let darc = Darc::from_bytes(darc_buf).map_err(|err| {
                    ExecutionError::DecodeError(format!(
                        "given darc could not be decoded: {}",
                        err
                    ))
                })?;
                let id = darc.base_id();
                Ok((
                    vec![StateChange::new(
                        StateAction::Create,
                        InstanceId::from(id),
                        CONTRACT_DARC_ID,
                        darc_buf.to_vec(),
                        id,
                    )],
                    coins.to_vec(),
                ))
            }
            InstructionKind::Invoke { command, .. } if command == CMD_DARC_EVOLVE => {
                self.evolve(view, instruction, coins)
            }
            InstructionKind::Invoke { command, .. } => Err(ExecutionError::InvalidArgument(
                format!("invalid command: {}", command),
            )),
            InstructionKind::Delete => Err(ExecutionError::InvalidInstruction(
                "only invoke and spawn are defined yet".to_string(),
            )),
        }
    }
}
