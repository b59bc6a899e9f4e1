// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! The ledger facade owning the store, the registry and the pool.

use crate::error::ServiceError;
use crate::pool::{sort_transactions, TxPool};
use keystone_execution::{
    execute_batch, execute_transaction, make_genesis_instruction, ConfigContract, Contract,
    ContractRegistry, DarcContract, ExecutionError, ViewChangeLimiter, CONTRACT_CONFIG_ID,
    CONTRACT_DARC_ID,
};
use keystone_hash::Hash;
use keystone_models::api::{
    AddTxRequest, AddTxResponse, CreateGenesisBlockRequest, CreateGenesisBlockResponse,
    GetProofRequest, GetProofResponse, CURRENT_VERSION,
};
use keystone_models::block::{DataBody, DataHeader};
use keystone_models::proof::Proof;
use keystone_models::state_change::StateChange;
use keystone_models::transaction::{ClientTransaction, ClientTransactionSerializer};
use keystone_serialization::Serializer;
use keystone_state::{
    open_state_rocksdb, StagedView, StateDb, STATE_ROOT_INITIAL_BYTES,
};
use parking_lot::RwLock;
use rocksdb::DB;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A block payload proposed to the consensus layer.
#[derive(Debug)]
pub struct BlockProposal {
    /// the chain the block belongs to
    pub chain_id: Hash,
    /// the header to commit
    pub header: DataHeader,
    /// the body carrying the accepted transactions
    pub body: DataBody,
    /// transactions dropped from the batch, with their errors
    pub rejected: Vec<(ClientTransaction, ExecutionError)>,
}

/// One chain tracked by the service.
struct Chain {
    state: StateDb,
    latest_header: DataHeader,
}

/// The service state: one value owned by the host process.
///
/// The pool is shared by submitter threads; each chain's store serializes
/// its commits behind a write lock while proofs and reads go through read
/// locks.
pub struct Ledger {
    db: Arc<DB>,
    registry: ContractRegistry,
    pool: TxPool,
    chains: RwLock<HashMap<Hash, Arc<RwLock<Chain>>>>,
}

impl Ledger {
    /// Opens the durable store at `path` and builds a service with the
    /// built-in `config` and `darc` contracts registered.
    pub fn new<P: AsRef<Path>>(path: P) -> Ledger {
        let limiter = ViewChangeLimiter::new();
        let mut registry = ContractRegistry::new();
        registry.register(CONTRACT_CONFIG_ID, Box::new(ConfigContract::new(limiter)));
        registry.register(CONTRACT_DARC_ID, Box::new(DarcContract::new()));

        Ledger {
            db: open_state_rocksdb(path),
            registry,
            pool: TxPool::new(),
            chains: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an additional contract. Must be called before the chain
    /// processes instructions targeting it.
    pub fn register_contract(&mut self, contract_id: &str, contract: Box<dyn Contract>) {
        self.registry.register(contract_id, contract);
    }

    fn check_version(version: u32) -> Result<(), ServiceError> {
        if version != CURRENT_VERSION {
            return Err(ServiceError::Conflict {
                got: version,
                expected: CURRENT_VERSION,
            });
        }
        Ok(())
    }

    /// Bootstraps a new chain from a genesis DARC, a roster and a block
    /// interval. The scope of the new chain is the DARC's base id, so one
    /// DARC bootstraps at most one chain per store.
    pub fn create_genesis_block(
        &self,
        request: CreateGenesisBlockRequest,
    ) -> Result<CreateGenesisBlockResponse, ServiceError> {
        Self::check_version(request.version)?;

        let scope = request.genesis_darc.base_id().into_bytes();
        let mut state = StateDb::open(self.db.clone(), &scope)?;
        if state.root() != Hash::from_bytes(STATE_ROOT_INITIAL_BYTES) {
            return Err(ServiceError::ChainExists);
        }

        let instruction = make_genesis_instruction(
            &request.genesis_darc,
            request.block_interval,
            &request.roster,
        )?;
        let genesis_tx = ClientTransaction {
            instructions: vec![instruction],
        };
        let outcome = execute_batch(&mut state, &self.registry, &[genesis_tx])?;
        if let Some((_, err)) = outcome.rejected.first() {
            return Err(ServiceError::GenesisRejected(format!("{}", err)));
        }

        let header = outcome.header;
        let chain_id = header.hash();
        self.chains.write().insert(
            chain_id,
            Arc::new(RwLock::new(Chain {
                state,
                latest_header: header,
            })),
        );

        info!(chain = %chain_id, "chain bootstrapped");
        Ok(CreateGenesisBlockResponse {
            version: CURRENT_VERSION,
            chain_id,
            header,
            body: outcome.body,
        })
    }

    /// Buffers a transaction for the next block of its chain.
    ///
    /// Only shape errors are reported here; final acceptance is observed
    /// through [`Ledger::get_proof`]. The `inclusion_wait` field is
    /// carried for the host's waiting policy, zero meaning return
    /// immediately.
    pub fn add_tx(&self, request: AddTxRequest) -> Result<AddTxResponse, ServiceError> {
        Self::check_version(request.version)?;
        if !self.chains.read().contains_key(&request.chain_id) {
            return Err(ServiceError::UnknownChain(format!("{}", request.chain_id)));
        }
        validate_transaction(&request.transaction)?;

        debug!(
            chain = %request.chain_id,
            tx = %request.transaction.hash(),
            "transaction buffered"
        );
        self.pool.add(request.chain_id, request.transaction);
        Ok(AddTxResponse {
            version: CURRENT_VERSION,
        })
    }

    /// Drains the chain's pending transactions, orders them
    /// deterministically, applies them and emits the next block payload.
    pub fn propose_block(&self, chain_id: &Hash) -> Result<BlockProposal, ServiceError> {
        let chain = self.chain(chain_id)?;
        let mut transactions = self.pool.take(chain_id);
        if let Err(err) = sort_transactions(&mut transactions) {
            // drop whatever does not survive a canonical roundtrip, keep
            // ordering the rest
            warn!(error = %err, "dropping undecodable buffered transactions");
            let serializer = ClientTransactionSerializer::new();
            transactions.retain(|tx| {
                let mut buffer = Vec::new();
                serializer.serialize(tx, &mut buffer).is_ok()
            });
            sort_transactions(&mut transactions)?;
        }

        let mut chain = chain.write();
        let outcome = execute_batch(&mut chain.state, &self.registry, &transactions)?;
        chain.latest_header = outcome.header;
        Ok(BlockProposal {
            chain_id: *chain_id,
            header: outcome.header,
            body: outcome.body,
            rejected: outcome.rejected,
        })
    }

    /// Computes the state root the next block would carry for the given
    /// ordered transactions, without committing anything. Used by a leader
    /// to fill the proposed header before consensus succeeds.
    pub fn trial_root(
        &self,
        chain_id: &Hash,
        transactions: &[ClientTransaction],
    ) -> Result<Hash, ServiceError> {
        let chain = self.chain(chain_id)?;
        let chain = chain.read();

        let mut staged = StagedView::new(&chain.state);
        let mut all_changes: Vec<StateChange> = Vec::new();
        for transaction in transactions {
            match execute_transaction(&staged, &self.registry, transaction) {
                Ok((changes, _coins)) => {
                    staged.stage_all(&changes);
                    all_changes.extend(changes);
                }
                Err(err) => {
                    debug!(tx = %transaction.hash(), error = %err, "transaction skipped in trial");
                }
            }
        }
        Ok(chain.state.try_hash(&all_changes)?)
    }

    /// Produces the proof that a key is, or is not, in the chain state.
    /// The forward links from the client's block to the latest one are
    /// appended by the consensus layer; this core anchors the proof to the
    /// latest emitted header.
    pub fn get_proof(&self, request: GetProofRequest) -> Result<GetProofResponse, ServiceError> {
        Self::check_version(request.version)?;
        let chain = self.chain_by_block(&request.block_id)?;
        let chain = chain.read();

        let (entry, inclusion) = chain.state.prove(&request.key)?;
        Ok(GetProofResponse {
            version: CURRENT_VERSION,
            proof: Proof {
                key: request.key,
                entry,
                inclusion,
                latest: chain.latest_header,
                links: Vec::new(),
            },
        })
    }

    /// Number of transactions pending for a chain.
    pub fn pending_transactions(&self, chain_id: &Hash) -> usize {
        self.pool.len(chain_id)
    }

    fn chain(&self, chain_id: &Hash) -> Result<Arc<RwLock<Chain>>, ServiceError> {
        self.chains
            .read()
            .get(chain_id)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownChain(format!("{}", chain_id)))
    }

    /// Resolves a chain from any block id known to the client: the chain
    /// id itself or the latest emitted header.
    fn chain_by_block(&self, block_id: &Hash) -> Result<Arc<RwLock<Chain>>, ServiceError> {
        let chains = self.chains.read();
        if let Some(chain) = chains.get(block_id) {
            return Ok(chain.clone());
        }
        for chain in chains.values() {
            if chain.read().latest_header.hash() == *block_id {
                return Ok(chain.clone());
            }
        }
        Err(ServiceError::UnknownChain(format!("{}", block_id)))
    }
}

/// Shape check applied before a transaction enters the pool: every
/// instruction must carry its position and the total count, so a leader
/// cannot silently drop part of the transaction later.
fn validate_transaction(transaction: &ClientTransaction) -> Result<(), ServiceError> {
    if transaction.instructions.is_empty() {
        return Err(ServiceError::MalformedTransaction(
            "transaction carries no instruction".to_string(),
        ));
    }
    let length = transaction.instructions.len() as u32;
    for (position, instruction) in transaction.instructions.iter().enumerate() {
        if instruction.index != position as u32 || instruction.length != length {
            return Err(ServiceError::MalformedTransaction(format!(
                "instruction {} carries index {} and length {}",
                position, instruction.index, instruction.length
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_darc::{Darc, Expression, Identity, Rules, Signer};
    use keystone_models::config::{NodeIdentity, Roster};
    use keystone_models::instance::{InstanceId, GENESIS_REFERENCE_ID};
    use keystone_models::instruction::{Argument, Arguments, Instruction, InstructionKind};
    use keystone_state::verify_smt_proof;
    use std::time::Duration;
    use tempfile::TempDir;

    struct TestSetup {
        _temp_dir: TempDir,
        ledger: Ledger,
        owner: Signer,
        genesis_darc: Darc,
        chain_id: Hash,
    }

    fn setup() -> TestSetup {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Ledger::new(temp_dir.path());

        let owner = Signer::generate();
        let mut rules = Rules::init_rules(&[owner.identity()]);
        rules.add(
            "spawn:darc".to_string(),
            Expression::single(&owner.identity()),
        );
        let genesis_darc = Darc::new(b"genesis".to_vec(), rules);
        let roster = Roster::new(vec![NodeIdentity {
            public: match owner.identity() {
                Identity::Ed25519(public) => public,
            },
            address: "127.0.0.1:7000".to_string(),
        }]);

        let response = ledger
            .create_genesis_block(CreateGenesisBlockRequest {
                version: CURRENT_VERSION,
                roster,
                genesis_darc: genesis_darc.clone(),
                block_interval: Duration::from_secs(1),
            })
            .unwrap();
        let chain_id = response.chain_id;

        TestSetup {
            _temp_dir: temp_dir,
            ledger,
            owner,
            genesis_darc,
            chain_id,
        }
    }

    fn spawn_darc_tx(setup: &TestSetup, darc: &Darc) -> ClientTransaction {
        let mut instruction = Instruction {
            instance_id: InstanceId::from(setup.genesis_darc.base_id()),
            nonce: Default::default(),
            index: 0,
            length: 1,
            kind: InstructionKind::Spawn {
                contract_id: "darc".to_string(),
                args: Arguments(vec![Argument {
                    name: "darc".to_string(),
                    value: darc.to_bytes(),
                }]),
            },
            signatures: vec![],
        };
        instruction
            .sign_by(
                setup.genesis_darc.base_id(),
                std::slice::from_ref(&setup.owner),
            )
            .unwrap();
        ClientTransaction {
            instructions: vec![instruction],
        }
    }

    #[test]
    fn test_genesis_bootstrap_via_service() {
        let setup = setup();

        // the genesis body carries the bootstrap transaction and the
        // header commits to the new state root
        let proof = setup
            .ledger
            .get_proof(GetProofRequest {
                version: CURRENT_VERSION,
                key: GENESIS_REFERENCE_ID,
                block_id: setup.chain_id,
            })
            .unwrap()
            .proof;
        let entry = proof.entry.expect("genesis reference must exist");
        assert_eq!(
            entry.value,
            setup.genesis_darc.base_id().as_bytes().to_vec()
        );
        assert_eq!(entry.contract_id, "config");
        assert!(verify_smt_proof(
            &proof.inclusion,
            &proof.latest.collection_root,
            &GENESIS_REFERENCE_ID,
            Some(&entry),
        )
        .unwrap());
    }

    #[test]
    fn test_genesis_version_and_duplicate_checks() {
        let setup = setup();

        let bad_version = CreateGenesisBlockRequest {
            version: CURRENT_VERSION + 1,
            roster: Roster::new(vec![]),
            genesis_darc: setup.genesis_darc.clone(),
            block_interval: Duration::from_secs(1),
        };
        assert!(matches!(
            setup.ledger.create_genesis_block(bad_version),
            Err(ServiceError::Conflict { .. })
        ));

        // the same darc cannot bootstrap a second chain
        let duplicate = CreateGenesisBlockRequest {
            version: CURRENT_VERSION,
            roster: Roster::new(vec![]),
            genesis_darc: setup.genesis_darc.clone(),
            block_interval: Duration::from_secs(1),
        };
        assert!(matches!(
            setup.ledger.create_genesis_block(duplicate),
            Err(ServiceError::ChainExists)
        ));
    }

    #[test]
    fn test_add_tx_and_propose_block() {
        let setup = setup();

        let user = Signer::generate();
        let d0 = Darc::new(b"user".to_vec(), Rules::init_rules(&[user.identity()]));
        let tx = spawn_darc_tx(&setup, &d0);

        setup
            .ledger
            .add_tx(AddTxRequest {
                version: CURRENT_VERSION,
                chain_id: setup.chain_id,
                transaction: tx.clone(),
                inclusion_wait: 0,
            })
            .unwrap();
        assert_eq!(setup.ledger.pending_transactions(&setup.chain_id), 1);

        let proposal = setup.ledger.propose_block(&setup.chain_id).unwrap();
        assert!(proposal.rejected.is_empty());
        assert_eq!(proposal.body.transactions, vec![tx]);
        assert_eq!(setup.ledger.pending_transactions(&setup.chain_id), 0);

        // the spawned darc is provable under the new header
        let key = InstanceId::from(d0.base_id());
        let proof = setup
            .ledger
            .get_proof(GetProofRequest {
                version: CURRENT_VERSION,
                key,
                block_id: setup.chain_id,
            })
            .unwrap()
            .proof;
        let entry = proof.entry.expect("spawned darc must exist");
        assert_eq!(entry.value, d0.to_bytes());
        assert_eq!(proof.latest, proposal.header);
        assert!(verify_smt_proof(
            &proof.inclusion,
            &proof.latest.collection_root,
            &key,
            Some(&entry),
        )
        .unwrap());
    }

    #[test]
    fn test_trial_root_matches_proposed_root() {
        let setup = setup();

        let user = Signer::generate();
        let d0 = Darc::new(b"user".to_vec(), Rules::init_rules(&[user.identity()]));
        let tx = spawn_darc_tx(&setup, &d0);

        let trial = setup
            .ledger
            .trial_root(&setup.chain_id, std::slice::from_ref(&tx))
            .unwrap();

        setup
            .ledger
            .add_tx(AddTxRequest {
                version: CURRENT_VERSION,
                chain_id: setup.chain_id,
                transaction: tx,
                inclusion_wait: 0,
            })
            .unwrap();
        let proposal = setup.ledger.propose_block(&setup.chain_id).unwrap();
        assert_eq!(proposal.header.collection_root, trial);
    }

    #[test]
    fn test_absence_proof_for_unknown_key() {
        let setup = setup();

        // an unknown key is not an error, the proof shows absence
        let ghost = InstanceId::from_slice(b"never written");
        let proof = setup
            .ledger
            .get_proof(GetProofRequest {
                version: CURRENT_VERSION,
                key: ghost,
                block_id: setup.chain_id,
            })
            .unwrap()
            .proof;
        assert!(proof.entry.is_none());
        assert!(verify_smt_proof(
            &proof.inclusion,
            &proof.latest.collection_root,
            &ghost,
            None,
        )
        .unwrap());
    }

    #[test]
    fn test_add_tx_rejects_bad_shape_and_unknown_chain() {
        let setup = setup();

        // unknown chain
        let user = Signer::generate();
        let d0 = Darc::new(b"user".to_vec(), Rules::init_rules(&[user.identity()]));
        let tx = spawn_darc_tx(&setup, &d0);
        assert!(matches!(
            setup.ledger.add_tx(AddTxRequest {
                version: CURRENT_VERSION,
                chain_id: Hash::compute_from(b"nope"),
                transaction: tx.clone(),
                inclusion_wait: 0,
            }),
            Err(ServiceError::UnknownChain(_))
        ));

        // empty transaction
        assert!(matches!(
            setup.ledger.add_tx(AddTxRequest {
                version: CURRENT_VERSION,
                chain_id: setup.chain_id,
                transaction: ClientTransaction::default(),
                inclusion_wait: 0,
            }),
            Err(ServiceError::MalformedTransaction(_))
        ));

        // wrong index/length pair
        let mut bad = tx;
        bad.instructions[0].index = 4;
        assert!(matches!(
            setup.ledger.add_tx(AddTxRequest {
                version: CURRENT_VERSION,
                chain_id: setup.chain_id,
                transaction: bad,
                inclusion_wait: 0,
            }),
            Err(ServiceError::MalformedTransaction(_))
        ));
    }

    #[test]
    fn test_proof_resolvable_from_latest_block_id() {
        let setup = setup();

        let user = Signer::generate();
        let d0 = Darc::new(b"user".to_vec(), Rules::init_rules(&[user.identity()]));
        setup
            .ledger
            .add_tx(AddTxRequest {
                version: CURRENT_VERSION,
                chain_id: setup.chain_id,
                transaction: spawn_darc_tx(&setup, &d0),
                inclusion_wait: 0,
            })
            .unwrap();
        let proposal = setup.ledger.propose_block(&setup.chain_id).unwrap();

        // the latest block id resolves the chain just like the genesis id
        let proof = setup
            .ledger
            .get_proof(GetProofRequest {
                version: CURRENT_VERSION,
                key: GENESIS_REFERENCE_ID,
                block_id: proposal.header.hash(),
            })
            .unwrap()
            .proof;
        assert!(proof.entry.is_some());
    }
}
