// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! End-to-end scenarios for the built-in contracts and the batch driver.

use crate::{
    execute_batch, execute_transaction, load_block_interval, load_config,
    make_genesis_instruction, BatchOutcome, ConfigContract, Contract, ContractRegistry,
    DarcContract, ExecutionError, ViewChangeLimiter, CMD_DARC_EVOLVE, CMD_UPDATE_CONFIG,
    CMD_VIEW_CHANGE, CONTRACT_CONFIG_ID, CONTRACT_DARC_ID,
};
use keystone_darc::{Darc, Expression, Rules, Signer, ACTION_EVOLVE};
use keystone_hash::Hash;
use keystone_models::coin::Coin;
use keystone_models::config::{ChainConfig, ChainConfigSerializer, NodeIdentity, Roster};
use keystone_models::instance::{derive_config_id, InstanceId, GENESIS_REFERENCE_ID};
use keystone_models::instruction::{Argument, Arguments, Instruction, InstructionKind};
use keystone_models::state_change::{StateAction, StateChange};
use keystone_models::transaction::ClientTransaction;
use keystone_serialization::Serializer;
use keystone_state::{open_state_rocksdb, StateDb, StateView, STATE_ROOT_INITIAL_BYTES};
use std::time::Duration;
use tempfile::TempDir;

/// A chain under test: a fresh store, the built-in registry and a genesis
/// signer that owns every governed action.
struct TestChain {
    _temp_dir: TempDir,
    state: StateDb,
    registry: ContractRegistry,
    owner: Signer,
    genesis_darc: Darc,
    roster: Roster,
}

fn genesis_rules(owner: &Signer, extra_actions: &[&str]) -> Rules {
    let mut rules = Rules::init_rules(&[owner.identity()]);
    rules.add(
        format!("invoke:{}", CMD_UPDATE_CONFIG),
        Expression::single(&owner.identity()),
    );
    rules.add(
        format!("invoke:{}", CMD_VIEW_CHANGE),
        Expression::single(&owner.identity()),
    );
    rules.add(
        format!("spawn:{}", CONTRACT_DARC_ID),
        Expression::single(&owner.identity()),
    );
    for action in extra_actions {
        rules.add(action.to_string(), Expression::single(&owner.identity()));
    }
    rules
}

fn setup_chain() -> TestChain {
    setup_chain_with_rules(&[])
}

fn setup_chain_with_rules(extra_actions: &[&str]) -> TestChain {
    let temp_dir = TempDir::new().unwrap();
    let db = open_state_rocksdb(temp_dir.path());
    let state = StateDb::open(db, b"testchain").unwrap();

    let owner = Signer::generate();
    let genesis_darc = Darc::new(b"genesis".to_vec(), genesis_rules(&owner, extra_actions));
    let roster = Roster::new(vec![
        NodeIdentity {
            public: match owner.identity() {
                keystone_darc::Identity::Ed25519(public) => public,
            },
            address: "127.0.0.1:7000".to_string(),
        },
        NodeIdentity {
            public: keystone_signature::KeyPair::generate().get_public_key(),
            address: "127.0.0.1:7001".to_string(),
        },
        NodeIdentity {
            public: keystone_signature::KeyPair::generate().get_public_key(),
            address: "127.0.0.1:7002".to_string(),
        },
    ]);

    let limiter = ViewChangeLimiter::new();
    let mut registry = ContractRegistry::new();
    registry.register(
        CONTRACT_CONFIG_ID,
        Box::new(ConfigContract::new(limiter)),
    );
    registry.register(CONTRACT_DARC_ID, Box::new(DarcContract::new()));

    TestChain {
        _temp_dir: temp_dir,
        state,
        registry,
        owner,
        genesis_darc,
        roster,
    }
}

fn bootstrap(chain: &mut TestChain) -> BatchOutcome {
    let instruction = make_genesis_instruction(
        &chain.genesis_darc,
        Duration::from_secs(1),
        &chain.roster,
    )
    .unwrap();
    let tx = ClientTransaction {
        instructions: vec![instruction],
    };
    let outcome = execute_batch(&mut chain.state, &chain.registry, &[tx]).unwrap();
    assert!(outcome.rejected.is_empty(), "genesis must be accepted");
    outcome
}

fn signed_invoke(
    chain: &TestChain,
    target: InstanceId,
    command: &str,
    args: Vec<Argument>,
    signer: &Signer,
) -> Instruction {
    let mut instruction = Instruction {
        instance_id: target,
        nonce: Default::default(),
        index: 0,
        length: 1,
        kind: InstructionKind::Invoke {
            command: command.to_string(),
            args: Arguments(args),
        },
        signatures: vec![],
    };
    instruction
        .sign_by(
            chain.genesis_darc.base_id(),
            std::slice::from_ref(signer),
        )
        .unwrap();
    instruction
}

fn config_instance(chain: &TestChain) -> InstanceId {
    derive_config_id(&chain.genesis_darc.base_id())
}

#[test]
fn test_genesis_bootstrap() {
    let mut chain = setup_chain();
    let outcome = bootstrap(&mut chain);

    // exactly three creates
    assert_eq!(outcome.state_changes.len(), 3);
    assert!(outcome
        .state_changes
        .iter()
        .all(|change| change.action == StateAction::Create));

    // the genesis reference resolves to the darc base id
    let reference = chain.state.get(&GENESIS_REFERENCE_ID).unwrap();
    assert_eq!(reference.contract_id, CONTRACT_CONFIG_ID);
    assert_eq!(
        reference.value,
        chain.genesis_darc.base_id().as_bytes().to_vec()
    );

    // the darc instance holds the genesis darc
    let darc_entry = chain
        .state
        .get(&InstanceId::from(chain.genesis_darc.base_id()))
        .unwrap();
    assert_eq!(darc_entry.contract_id, CONTRACT_DARC_ID);
    assert_eq!(darc_entry.value, chain.genesis_darc.to_bytes());

    // the config instance decodes to the requested configuration
    let config = load_config(&chain.state).unwrap();
    assert_eq!(config.block_interval, Duration::from_secs(1));
    assert_eq!(config.roster, chain.roster);

    assert_ne!(
        chain.state.root(),
        Hash::from_bytes(STATE_ROOT_INITIAL_BYTES)
    );
}

#[test]
fn test_genesis_cannot_run_twice() {
    let mut chain = setup_chain();
    bootstrap(&mut chain);

    let instruction =
        make_genesis_instruction(&chain.genesis_darc, Duration::from_secs(1), &chain.roster)
            .unwrap();
    let tx = ClientTransaction {
        instructions: vec![instruction],
    };
    let outcome = execute_batch(&mut chain.state, &chain.registry, &[tx]).unwrap();
    assert_eq!(outcome.rejected.len(), 1);
}

#[test]
fn test_update_config() {
    let mut chain = setup_chain();
    bootstrap(&mut chain);

    let new_config = ChainConfig {
        block_interval: Duration::from_secs(2),
        roster: chain.roster.clone(),
    };
    let mut config_buf = Vec::new();
    ChainConfigSerializer::new()
        .serialize(&new_config, &mut config_buf)
        .unwrap();

    let instruction = signed_invoke(
        &chain,
        config_instance(&chain),
        CMD_UPDATE_CONFIG,
        vec![Argument {
            name: "config".to_string(),
            value: config_buf,
        }],
        &chain.owner,
    );
    let outcome = execute_batch(
        &mut chain.state,
        &chain.registry,
        &[ClientTransaction {
            instructions: vec![instruction],
        }],
    )
    .unwrap();
    assert!(outcome.rejected.is_empty());

    assert_eq!(
        load_config(&chain.state).unwrap().block_interval,
        Duration::from_secs(2)
    );
    assert_eq!(
        load_block_interval(&chain.state).unwrap(),
        Duration::from_secs(2)
    );
}

#[test]
fn test_update_config_access_denied_for_stranger() {
    let mut chain = setup_chain();
    bootstrap(&mut chain);

    let stranger = Signer::generate();
    let new_config = ChainConfig {
        block_interval: Duration::from_secs(2),
        roster: chain.roster.clone(),
    };
    let mut config_buf = Vec::new();
    ChainConfigSerializer::new()
        .serialize(&new_config, &mut config_buf)
        .unwrap();

    let instruction = signed_invoke(
        &chain,
        config_instance(&chain),
        CMD_UPDATE_CONFIG,
        vec![Argument {
            name: "config".to_string(),
            value: config_buf,
        }],
        &stranger,
    );
    let result = execute_transaction(
        &chain.state,
        &chain.registry,
        &ClientTransaction {
            instructions: vec![instruction],
        },
    );
    assert!(matches!(result, Err(ExecutionError::AccessDenied(_))));
}

fn roster_invoke(chain: &TestChain, roster: &Roster) -> Instruction {
    let mut roster_buf = Vec::new();
    keystone_models::config::RosterSerializer::new()
        .serialize(roster, &mut roster_buf)
        .unwrap();
    signed_invoke(
        chain,
        config_instance(chain),
        CMD_VIEW_CHANGE,
        vec![Argument {
            name: "roster".to_string(),
            value: roster_buf,
        }],
        &chain.owner,
    )
}

#[test]
fn test_view_change_rotation() {
    let mut chain = setup_chain();
    bootstrap(&mut chain);

    let rotated = chain.roster.rotate(1);
    let instruction = roster_invoke(&chain, &rotated);
    let outcome = execute_batch(
        &mut chain.state,
        &chain.registry,
        &[ClientTransaction {
            instructions: vec![instruction],
        }],
    )
    .unwrap();
    assert!(outcome.rejected.is_empty());

    let config = load_config(&chain.state).unwrap();
    assert_eq!(config.roster, rotated);
    // the interval part of the config is untouched
    assert_eq!(config.block_interval, Duration::from_secs(1));
}

#[test]
fn test_view_change_rejects_reversal() {
    let mut chain = setup_chain();
    bootstrap(&mut chain);

    let mut reversed_list = chain.roster.list.clone();
    reversed_list.reverse();
    let reversed = Roster::new(reversed_list);
    let instruction = roster_invoke(&chain, &reversed);
    let result = execute_transaction(
        &chain.state,
        &chain.registry,
        &ClientTransaction {
            instructions: vec![instruction],
        },
    );
    assert!(matches!(result, Err(ExecutionError::InvalidArgument(_))));
}

#[test]
fn test_view_change_rejects_forged_id() {
    let mut chain = setup_chain();
    bootstrap(&mut chain);

    let mut forged = chain.roster.rotate(1);
    forged.id = Hash::compute_from(b"forged");
    let instruction = roster_invoke(&chain, &forged);
    let result = execute_transaction(
        &chain.state,
        &chain.registry,
        &ClientTransaction {
            instructions: vec![instruction],
        },
    );
    assert!(matches!(result, Err(ExecutionError::InvalidArgument(_))));

    let mut forged = chain.roster.rotate(1);
    forged.aggregate = Hash::compute_from(b"forged");
    let instruction = roster_invoke(&chain, &forged);
    let result = execute_transaction(
        &chain.state,
        &chain.registry,
        &ClientTransaction {
            instructions: vec![instruction],
        },
    );
    assert!(matches!(result, Err(ExecutionError::InvalidArgument(_))));
}

#[test]
fn test_view_change_rate_limited_per_signer() {
    let mut chain = setup_chain();
    bootstrap(&mut chain);

    // first rotation goes through
    let rotated = chain.roster.rotate(1);
    let instruction = roster_invoke(&chain, &rotated);
    let outcome = execute_batch(
        &mut chain.state,
        &chain.registry,
        &[ClientTransaction {
            instructions: vec![instruction],
        }],
    )
    .unwrap();
    assert!(outcome.rejected.is_empty());

    // an immediate second rotation by the same signer is throttled
    let rotated_again = rotated.rotate(1);
    let instruction = roster_invoke(&chain, &rotated_again);
    let result = execute_transaction(
        &chain.state,
        &chain.registry,
        &ClientTransaction {
            instructions: vec![instruction],
        },
    );
    assert!(matches!(result, Err(ExecutionError::AccessDenied(_))));
}

fn spawn_darc_instruction(chain: &TestChain, darc: &Darc) -> Instruction {
    let mut instruction = Instruction {
        // spawned from the genesis darc instance
        instance_id: InstanceId::from(chain.genesis_darc.base_id()),
        nonce: Default::default(),
        index: 0,
        length: 1,
        kind: InstructionKind::Spawn {
            contract_id: CONTRACT_DARC_ID.to_string(),
            args: Arguments(vec![Argument {
                name: "darc".to_string(),
                value: darc.to_bytes(),
            }]),
        },
        signatures: vec![],
    };
    instruction
        .sign_by(
            chain.genesis_darc.base_id(),
            std::slice::from_ref(&chain.owner),
        )
        .unwrap();
    instruction
}

#[test]
fn test_darc_spawn_and_evolve() {
    let mut chain = setup_chain();
    bootstrap(&mut chain);

    // spawn a new darc governed by its own owner
    let user = Signer::generate();
    let d0 = Darc::new(b"user darc".to_vec(), Rules::init_rules(&[user.identity()]));
    let outcome = execute_batch(
        &mut chain.state,
        &chain.registry,
        &[ClientTransaction {
            instructions: vec![spawn_darc_instruction(&chain, &d0)],
        }],
    )
    .unwrap();
    assert!(outcome.rejected.is_empty());

    let d0_instance = InstanceId::from(d0.base_id());
    assert_eq!(chain.state.get(&d0_instance).unwrap().value, d0.to_bytes());

    // evolve it to d1, signed by the owner of d0
    let d1 = d0.evolve(b"user darc v1".to_vec(), d0.rules.clone());
    let mut evolve = Instruction {
        instance_id: d0_instance,
        nonce: Default::default(),
        index: 0,
        length: 1,
        kind: InstructionKind::Invoke {
            command: CMD_DARC_EVOLVE.to_string(),
            args: Arguments(vec![Argument {
                name: "darc".to_string(),
                value: d1.to_bytes(),
            }]),
        },
        signatures: vec![],
    };
    evolve
        .sign_by(d0.base_id(), std::slice::from_ref(&user))
        .unwrap();
    assert_eq!(evolve.action(), ACTION_EVOLVE);
    let outcome = execute_batch(
        &mut chain.state,
        &chain.registry,
        &[ClientTransaction {
            instructions: vec![evolve],
        }],
    )
    .unwrap();
    assert!(outcome.rejected.is_empty());
    assert_eq!(chain.state.get(&d0_instance).unwrap().value, d1.to_bytes());

    // an evolution that fails the sanity check against d1 is rejected
    let mut d2 = d1.evolve(b"user darc v2".to_vec(), d1.rules.clone());
    d2.version = 9;
    let mut bad_evolve = Instruction {
        instance_id: d0_instance,
        nonce: Default::default(),
        index: 0,
        length: 1,
        kind: InstructionKind::Invoke {
            command: CMD_DARC_EVOLVE.to_string(),
            args: Arguments(vec![Argument {
                name: "darc".to_string(),
                value: d2.to_bytes(),
            }]),
        },
        signatures: vec![],
    };
    bad_evolve
        .sign_by(d0.base_id(), std::slice::from_ref(&user))
        .unwrap();
    let result = execute_transaction(
        &chain.state,
        &chain.registry,
        &ClientTransaction {
            instructions: vec![bad_evolve],
        },
    );
    assert!(matches!(result, Err(ExecutionError::InvalidArgument(_))));
}

#[test]
fn test_unknown_contract() {
    let mut chain = setup_chain();
    bootstrap(&mut chain);

    let mut instruction = Instruction {
        instance_id: InstanceId::from(chain.genesis_darc.base_id()),
        nonce: Default::default(),
        index: 0,
        length: 1,
        kind: InstructionKind::Spawn {
            contract_id: "no-such-contract".to_string(),
            args: Arguments::default(),
        },
        signatures: vec![],
    };
    instruction
        .sign_by(
            chain.genesis_darc.base_id(),
            std::slice::from_ref(&chain.owner),
        )
        .unwrap();
    let result = execute_transaction(
        &chain.state,
        &chain.registry,
        &ClientTransaction {
            instructions: vec![instruction],
        },
    );
    assert!(matches!(result, Err(ExecutionError::UnknownContract(_))));
}

#[test]
fn test_transaction_atomicity() {
    let mut chain = setup_chain();
    bootstrap(&mut chain);
    let root_before = chain.state.root();

    // first instruction is a valid darc spawn, second fails its command;
    // nothing of the transaction must be committed
    let user = Signer::generate();
    let d0 = Darc::new(b"user darc".to_vec(), Rules::init_rules(&[user.identity()]));
    let spawn = spawn_darc_instruction(&chain, &d0);
    let bad = signed_invoke(
        &chain,
        config_instance(&chain),
        "no_such_command",
        vec![],
        &chain.owner,
    );
    let outcome = execute_batch(
        &mut chain.state,
        &chain.registry,
        &[ClientTransaction {
            instructions: vec![spawn, bad],
        }],
    )
    .unwrap();
    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(chain.state.root(), root_before);
    assert!(chain
        .state
        .get(&InstanceId::from(d0.base_id()))
        .is_err());
}

#[test]
fn test_rejected_transaction_does_not_block_batch() {
    let mut chain = setup_chain();
    bootstrap(&mut chain);

    let user = Signer::generate();
    let d0 = Darc::new(b"user darc".to_vec(), Rules::init_rules(&[user.identity()]));
    let good = ClientTransaction {
        instructions: vec![spawn_darc_instruction(&chain, &d0)],
    };
    let bad = ClientTransaction {
        instructions: vec![signed_invoke(
            &chain,
            config_instance(&chain),
            "no_such_command",
            vec![],
            &chain.owner,
        )],
    };

    let outcome = execute_batch(
        &mut chain.state,
        &chain.registry,
        &[bad.clone(), good.clone()],
    )
    .unwrap();
    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(outcome.body.transactions, vec![good]);
    assert!(chain
        .state
        .get(&InstanceId::from(d0.base_id()))
        .is_ok());

    // the root after the batch matches a chain that never saw the bad
    // transaction
    let mut reference = setup_chain();
    reference.owner = chain.owner.clone();
    reference.genesis_darc = chain.genesis_darc.clone();
    reference.roster = chain.roster.clone();
    bootstrap(&mut reference);
    let reference_outcome = execute_batch(
        &mut reference.state,
        &reference.registry,
        &[ClientTransaction {
            instructions: vec![spawn_darc_instruction(&reference, &d0)],
        }],
    )
    .unwrap();
    assert!(reference_outcome.rejected.is_empty());
    assert_eq!(reference.state.root(), chain.state.root());
}

#[test]
fn test_replayed_spawn_commits_once() {
    let mut chain = setup_chain();
    bootstrap(&mut chain);

    let user = Signer::generate();
    let d0 = Darc::new(b"user darc".to_vec(), Rules::init_rules(&[user.identity()]));
    let tx = ClientTransaction {
        instructions: vec![spawn_darc_instruction(&chain, &d0)],
    };

    let outcome = execute_batch(
        &mut chain.state,
        &chain.registry,
        &[tx.clone(), tx.clone()],
    )
    .unwrap();
    // the replay is rejected by the create precondition; exactly one
    // state change landed
    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(outcome.state_changes.len(), 1);
}

/// A toy contract used to check that coins thread through the
/// instructions of one transaction.
struct ToyCoinContract;

impl Contract for ToyCoinContract {
    fn dispatch(
        &self,
        _view: &dyn StateView,
        instruction: &Instruction,
        coins: &[Coin],
    ) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError> {
        match &instruction.kind {
            InstructionKind::Spawn { .. } => Ok((
                vec![StateChange::new(
                    StateAction::Create,
                    instruction.derive_id(""),
                    "toycoin",
                    vec![],
                    keystone_darc::DarcId::from_slice(
                        instruction.instance_id.as_bytes(),
                    ),
                )],
                coins.to_vec(),
            )),
            InstructionKind::Invoke { .. } => {
                let mut coins_out = coins.to_vec();
                match coins_out.first_mut() {
                    Some(coin) => coin.value += 1,
                    None => coins_out.push(Coin {
                        name: instruction.instance_id,
                        value: 1,
                    }),
                }
                Ok((vec![], coins_out))
            }
            InstructionKind::Delete => Err(ExecutionError::InvalidInstruction(
                "toycoin cannot be deleted".to_string(),
            )),
        }
    }
}

#[test]
fn test_coins_thread_through_transaction() {
    let mut chain = setup_chain_with_rules(&["spawn:toycoin", "invoke:mint"]);
    bootstrap(&mut chain);
    chain.registry.register("toycoin", Box::new(ToyCoinContract));

    let mut spawn = Instruction {
        instance_id: InstanceId::from(chain.genesis_darc.base_id()),
        nonce: Default::default(),
        index: 0,
        length: 3,
        kind: InstructionKind::Spawn {
            contract_id: "toycoin".to_string(),
            args: Arguments::default(),
        },
        signatures: vec![],
    };
    spawn
        .sign_by(
            chain.genesis_darc.base_id(),
            std::slice::from_ref(&chain.owner),
        )
        .unwrap();
    let coin_instance = spawn.derive_id("");

    let mint = |index: u32| {
        let mut mint = Instruction {
            instance_id: coin_instance,
            nonce: Default::default(),
            index,
            length: 3,
            kind: InstructionKind::Invoke {
                command: "mint".to_string(),
                args: Arguments::default(),
            },
            signatures: vec![],
        };
        mint.sign_by(
            chain.genesis_darc.base_id(),
            std::slice::from_ref(&chain.owner),
        )
        .unwrap();
        mint
    };

    // the second mint sees the coin emitted by the first one, and both
    // mints see the instance spawned by the first instruction
    let (changes, coins) = execute_transaction(
        &chain.state,
        &chain.registry,
        &ClientTransaction {
            instructions: vec![spawn, mint(1), mint(2)],
        },
    )
    .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(
        coins,
        vec![Coin {
            name: coin_instance,
            value: 2,
        }]
    );
}

#[test]
fn test_unsigned_spawn_is_denied() {
    let mut chain = setup_chain();
    bootstrap(&mut chain);

    let user = Signer::generate();
    let d0 = Darc::new(b"user darc".to_vec(), Rules::init_rules(&[user.identity()]));
    let unsigned = Instruction {
        instance_id: InstanceId::from(chain.genesis_darc.base_id()),
        nonce: Default::default(),
        index: 0,
        length: 1,
        kind: InstructionKind::Spawn {
            contract_id: CONTRACT_DARC_ID.to_string(),
            args: Arguments(vec![Argument {
                name: "darc".to_string(),
                value: d0.to_bytes(),
            }]),
        },
        signatures: vec![],
    };
    let result = execute_transaction(
        &chain.state,
        &chain.registry,
        &ClientTransaction {
            instructions: vec![unsigned],
        },
    );
    assert!(matches!(result, Err(ExecutionError::AccessDenied(_))));
}
