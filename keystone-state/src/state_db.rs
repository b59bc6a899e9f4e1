// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Durable, Merkle-authenticated key→entry store.

use crate::error::StateError;
use crate::smt_proof::{serialize_smt_proof, smt_leaf_value};
use keystone_hash::{Hash, HASH_SIZE_BYTES};
use keystone_models::instance::InstanceId;
use keystone_models::ledger_entry::{StateEntry, StateEntryDeserializer, StateEntrySerializer};
use keystone_models::state_change::{StateAction, StateChange};
use keystone_serialization::{DeserializeError, Deserializer, Serializer};
use lsmtree::{bytes::Bytes, BadProof, KVStore, SparseMerkleTree};
use parking_lot::RwLock;
use rocksdb::{
    ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Column family holding the state entries of every scope
pub const STATE_CF: &str = "state";

/// Column family holding per-scope metadata such as the persisted root
pub const METADATA_CF: &str = "metadata";

/// The root of an empty scope
pub const STATE_ROOT_INITIAL_BYTES: &[u8; HASH_SIZE_BYTES] = &[0; HASH_SIZE_BYTES];

const OPEN_ERROR: &str = "critical: rocksdb open operation failed";
const CF_ERROR: &str = "critical: rocksdb column family handle not found";
const SMT_ERROR: &str = "critical: the sparse merkle tree is corrupted";
const SMT_KEY_ERROR: &str = "critical: tree keys are 32 bytes";

/// Separator between the scope name and the instance id in durable keys
const SCOPE_SEPARATOR: u8 = b'/';

/// Suffix of the metadata key holding the persisted root of a scope
const ROOT_KEY_SUFFIX: &[u8] = b"/root";

/// A state store shared between readers and the single committer
pub type ShareableStateDb = Arc<RwLock<StateDb>>;

/// Opens (or creates) the RocksDB instance backing every state scope of
/// the process.
pub fn open_state_rocksdb<P: AsRef<Path>>(path: P) -> Arc<DB> {
    let mut db_opts = Options::default();
    db_opts.create_if_missing(true);
    db_opts.create_missing_column_families(true);

    let db = DB::open_cf_descriptors(
        &db_opts,
        path,
        vec![
            ColumnFamilyDescriptor::new(STATE_CF, Options::default()),
            ColumnFamilyDescriptor::new(METADATA_CF, Options::default()),
        ],
    )
    .expect(OPEN_ERROR);

    Arc::new(db)
}

/// In-memory node/value store of the sparse Merkle tree.
///
/// Cloning shares the underlying map; [`SmtStore::snapshot`] produces a
/// deep copy for trial trees.
#[derive(Clone, Default)]
pub(crate) struct SmtStore(Arc<RwLock<HashMap<[u8; HASH_SIZE_BYTES], Bytes>>>);

impl SmtStore {
    pub(crate) fn snapshot(&self) -> SmtStore {
        SmtStore(Arc::new(RwLock::new(self.0.read().clone())))
    }
}

/// Implementation of the database trait of the sparse Merkle tree for the
/// in-memory store.
impl KVStore for SmtStore {
    type Hasher = sha2::Sha256;
    type Error = BadProof;

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, Self::Error> {
        let key: [u8; HASH_SIZE_BYTES] = key.try_into().expect(SMT_KEY_ERROR);
        Ok(self.0.read().get(&key).cloned())
    }

    fn set(&mut self, key: Bytes, value: Bytes) -> Result<(), Self::Error> {
        let key: [u8; HASH_SIZE_BYTES] = key.as_ref().try_into().expect(SMT_KEY_ERROR);
        self.0.write().insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<Bytes, Self::Error> {
        let key: [u8; HASH_SIZE_BYTES] = key.try_into().expect(SMT_KEY_ERROR);
        let value = self.0.write().remove(&key).expect(SMT_ERROR);
        Ok(value)
    }

    fn contains(&self, key: &[u8]) -> Result<bool, Self::Error> {
        let key: [u8; HASH_SIZE_BYTES] = key.try_into().expect(SMT_KEY_ERROR);
        Ok(self.0.read().contains_key(&key))
    }
}

/// One chain's durable key→(value, contract, darc) map plus the in-memory
/// sparse Merkle tree authenticating it.
///
/// The durable value under `scope/instance_id` is the serialized
/// [`StateEntry`]. The authenticated leaf of a key commits to the value
/// and contract id; the darc id stays outside the authenticated payload.
pub struct StateDb {
    /// the shared rocksdb instance
    db: Arc<DB>,
    /// scope name; durable keys are `scope || '/' || instance_id`
    scope: Vec<u8>,
    /// the authenticated view over the scope's entries
    smt: SparseMerkleTree<SmtStore>,
    /// node store of `smt`, kept to snapshot trial trees
    nodes: SmtStore,
    /// value store of `smt`, kept to snapshot trial trees
    values: SmtStore,
    entry_serializer: StateEntrySerializer,
    entry_deserializer: StateEntryDeserializer,
}

impl std::fmt::Debug for StateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateDb")
            .field("scope", &String::from_utf8_lossy(&self.scope))
            .field("root", &self.root())
            .finish()
    }
}

impl StateDb {
    /// Opens the scope, rebuilding the Merkle tree from the durable
    /// entries. Cost is linear in the number of entries of the scope;
    /// mutations afterwards are logarithmic.
    pub fn open(db: Arc<DB>, scope: &[u8]) -> Result<StateDb, StateError> {
        let nodes = SmtStore::default();
        let values = SmtStore::default();
        let mut smt = SparseMerkleTree::new_with_stores(nodes.clone(), values.clone());

        let entry_deserializer = StateEntryDeserializer::new();
        let handle = db.cf_handle(STATE_CF).expect(CF_ERROR);
        let prefix = scope_prefix(scope);
        for item in db.iterator_cf(
            handle,
            IteratorMode::From(&prefix, Direction::Forward),
        ) {
            let (key, value) =
                item.map_err(|err| StateError::DurableIo(format!("{}", err)))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let instance_bytes: [u8; HASH_SIZE_BYTES] =
                key[prefix.len()..].try_into().map_err(|_| {
                    StateError::DecodeError("stored key is not a 32-byte instance id".to_string())
                })?;
            let instance_id = InstanceId::from_bytes(&instance_bytes);
            let (rest, entry) = entry_deserializer
                .deserialize::<DeserializeError>(&value)
                .map_err(|err| StateError::DecodeError(format!("{}", err)))?;
            if !rest.is_empty() {
                return Err(StateError::DecodeError(
                    "trailing bytes after stored entry".to_string(),
                ));
            }
            smt.update(
                smt_key(&instance_id).to_bytes(),
                Bytes::from(smt_leaf_value(&entry).to_vec()),
            )
            .expect(SMT_ERROR);
        }

        debug!(
            scope = %String::from_utf8_lossy(scope),
            "state scope opened"
        );

        Ok(StateDb {
            db,
            scope: scope.to_vec(),
            smt,
            nodes,
            values,
            entry_serializer: StateEntrySerializer::new(),
            entry_deserializer,
        })
    }

    /// The current root of the authenticated state.
    pub fn root(&self) -> Hash {
        root_hash(&self.smt)
    }

    /// Durable read of the entry under `key`.
    pub fn get(&self, key: &InstanceId) -> Result<StateEntry, StateError> {
        let handle = self.db.cf_handle(STATE_CF).expect(CF_ERROR);
        let bytes = self
            .db
            .get_cf(handle, self.durable_key(key))
            .map_err(|err| StateError::DurableIo(format!("{}", err)))?
            .ok_or(StateError::NotFound)?;
        let (rest, entry) = self
            .entry_deserializer
            .deserialize::<DeserializeError>(&bytes)
            .map_err(|err| StateError::DecodeError(format!("{}", err)))?;
        if !rest.is_empty() {
            return Err(StateError::DecodeError(
                "trailing bytes after stored entry".to_string(),
            ));
        }
        Ok(entry)
    }

    /// Applies the changes to a trial tree and returns the resulting root
    /// without touching durable state. Equivalent to [`StateDb::commit`]
    /// followed by [`StateDb::root`] whenever the commit would succeed.
    pub fn try_hash(&self, changes: &[StateChange]) -> Result<Hash, StateError> {
        let (mut tree, _nodes, _values) = self.trial_tree();
        self.apply_to_tree(&mut tree, changes)?;
        Ok(root_hash(&tree))
    }

    /// Atomically applies the changes to the durable store and the tree.
    ///
    /// Preconditions are checked per change, taking the earlier changes of
    /// the same commit into account: `Create` needs an absent key,
    /// `Update` and `Remove` a present one. A durable write failure leaves
    /// the in-memory tree at its pre-commit state.
    pub fn commit(&mut self, changes: &[StateChange]) -> Result<Hash, StateError> {
        let (mut tree, nodes, values) = self.trial_tree();
        self.apply_to_tree(&mut tree, changes)?;

        let handle_state = self.db.cf_handle(STATE_CF).expect(CF_ERROR);
        let handle_metadata = self.db.cf_handle(METADATA_CF).expect(CF_ERROR);
        let mut batch = WriteBatch::default();
        for change in changes {
            match change.action {
                StateAction::Create | StateAction::Update => {
                    let mut entry_bytes = Vec::new();
                    self.entry_serializer
                        .serialize(&entry_of(change), &mut entry_bytes)
                        .map_err(|err| StateError::DecodeError(format!("{}", err)))?;
                    batch.put_cf(
                        handle_state,
                        self.durable_key(&change.instance_id),
                        entry_bytes,
                    );
                }
                StateAction::Remove => {
                    batch.delete_cf(handle_state, self.durable_key(&change.instance_id));
                }
            }
        }
        batch.put_cf(handle_metadata, self.root_key(), tree.root());

        if let Err(err) = self.db.write(batch) {
            warn!(
                scope = %String::from_utf8_lossy(&self.scope),
                error = %err,
                "durable commit failed, keeping previous state root"
            );
            return Err(StateError::DurableIo(format!("{}", err)));
        }

        self.smt = tree;
        self.nodes = nodes;
        self.values = values;
        debug!(
            scope = %String::from_utf8_lossy(&self.scope),
            changes = changes.len(),
            root = %self.root(),
            "state committed"
        );
        Ok(self.root())
    }

    /// Produces the serialized tree proof for `key` under the current
    /// root, for a present or absent key alike, along with the entry when
    /// present.
    pub fn prove(
        &self,
        key: &InstanceId,
    ) -> Result<(Option<StateEntry>, Vec<u8>), StateError> {
        let entry = match self.get(key) {
            Ok(entry) => Some(entry),
            Err(StateError::NotFound) => None,
            Err(err) => return Err(err),
        };
        let proof = self
            .smt
            .proof(smt_key(key).to_bytes())
            .map_err(|err| StateError::ProofError(format!("{:?}", err)))?;
        Ok((entry, serialize_smt_proof(&proof)?))
    }

    fn durable_key(&self, key: &InstanceId) -> Vec<u8> {
        let mut durable = scope_prefix(&self.scope);
        durable.extend(key.as_bytes());
        durable
    }

    fn root_key(&self) -> Vec<u8> {
        let mut key = self.scope.clone();
        key.extend(ROOT_KEY_SUFFIX);
        key
    }

    /// Deep-copies the tree so changes can be applied without touching the
    /// committed state.
    fn trial_tree(&self) -> (SparseMerkleTree<SmtStore>, SmtStore, SmtStore) {
        let nodes = self.nodes.snapshot();
        let values = self.values.snapshot();
        let tree = SparseMerkleTree::import(nodes.clone(), values.clone(), self.smt.root());
        (tree, nodes, values)
    }

    /// Applies the changes to `tree`, enforcing the per-action
    /// preconditions against the durable state combined with the earlier
    /// changes of the same sequence.
    fn apply_to_tree(
        &self,
        tree: &mut SparseMerkleTree<SmtStore>,
        changes: &[StateChange],
    ) -> Result<(), StateError> {
        let mut presence: HashMap<InstanceId, bool> = HashMap::new();
        for change in changes {
            let present = match presence.get(&change.instance_id) {
                Some(present) => *present,
                None => match self.get(&change.instance_id) {
                    Ok(_) => true,
                    Err(StateError::NotFound) => false,
                    Err(err) => return Err(err),
                },
            };
            match change.action {
                StateAction::Create => {
                    if present {
                        return Err(StateError::BadAction(format!(
                            "cannot create existing key {}",
                            change.instance_id
                        )));
                    }
                    tree.update(
                        smt_key(&change.instance_id).to_bytes(),
                        Bytes::from(smt_leaf_value(&entry_of(change)).to_vec()),
                    )
                    .expect(SMT_ERROR);
                    presence.insert(change.instance_id, true);
                }
                StateAction::Update => {
                    if !present {
                        return Err(StateError::BadAction(format!(
                            "cannot update missing key {}",
                            change.instance_id
                        )));
                    }
                    tree.update(
                        smt_key(&change.instance_id).to_bytes(),
                        Bytes::from(smt_leaf_value(&entry_of(change)).to_vec()),
                    )
                    .expect(SMT_ERROR);
                    presence.insert(change.instance_id, true);
                }
                StateAction::Remove => {
                    if !present {
                        return Err(StateError::BadAction(format!(
                            "cannot remove missing key {}",
                            change.instance_id
                        )));
                    }
                    tree.remove(smt_key(&change.instance_id).to_bytes())
                        .expect(SMT_ERROR);
                    presence.insert(change.instance_id, false);
                }
            }
        }
        Ok(())
    }
}

/// The tree key of an instance id.
pub(crate) fn smt_key(key: &InstanceId) -> Hash {
    Hash::compute_from(key.as_bytes())
}

/// The entry a Create/Update state change stores.
pub(crate) fn entry_of(change: &StateChange) -> StateEntry {
    StateEntry {
        value: change.value.clone(),
        contract_id: change.contract_id.clone(),
        darc_id: change.darc_id,
    }
}

fn scope_prefix(scope: &[u8]) -> Vec<u8> {
    let mut prefix = scope.to_vec();
    prefix.push(SCOPE_SEPARATOR);
    prefix
}

fn root_hash(tree: &SparseMerkleTree<SmtStore>) -> Hash {
    let root = tree.root();
    Hash::from_bytes(root.as_ref().try_into().expect(SMT_ERROR))
}
