// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Read-only views over the state, handed to contract code.

use crate::error::StateError;
use crate::state_db::StateDb;
use keystone_models::instance::InstanceId;
use keystone_models::ledger_entry::StateEntry;
use keystone_models::state_change::{StateAction, StateChange};
use std::collections::HashMap;

/// The read surface contracts see. A view reflects all committed state
/// plus, for staged views, the changes of earlier instructions in the same
/// transaction batch. Contracts must not retain a view across
/// instructions.
pub trait StateView {
    /// Returns the value, contract id and darc id stored under `key`.
    fn get_values(&self, key: &InstanceId) -> Result<StateEntry, StateError>;
}

/// A cheap read-only handle over a [`StateDb`].
pub struct StateDbView<'a> {
    db: &'a StateDb,
}

impl<'a> StateDbView<'a> {
    /// Creates a view over the store.
    pub fn new(db: &'a StateDb) -> Self {
        StateDbView { db }
    }

    /// Produces the inclusion or absence proof for `key` under the current
    /// root, along with the entry when present.
    pub fn get_proof(
        &self,
        key: &InstanceId,
    ) -> Result<(Option<StateEntry>, Vec<u8>), StateError> {
        self.db.prove(key)
    }
}

impl StateView for StateDbView<'_> {
    fn get_values(&self, key: &InstanceId) -> Result<StateEntry, StateError> {
        self.db.get(key)
    }
}

impl StateView for StateDb {
    fn get_values(&self, key: &InstanceId) -> Result<StateEntry, StateError> {
        self.get(key)
    }
}

/// A view over a base view plus an overlay of not-yet-committed state
/// changes.
///
/// The batch driver stages the changes emitted by each instruction here so
/// the following instructions of the same transaction observe them; the
/// overlay is simply dropped when the transaction is rejected, the base is
/// never written.
pub struct StagedView<'a> {
    base: &'a dyn StateView,
    overlay: HashMap<InstanceId, Option<StateEntry>>,
}

impl<'a> StagedView<'a> {
    /// Creates an empty overlay over `base`.
    pub fn new(base: &'a dyn StateView) -> Self {
        StagedView {
            base,
            overlay: HashMap::new(),
        }
    }

    /// Stages one state change. Precondition enforcement stays with the
    /// store commit; the overlay mirrors the effect only.
    pub fn stage(&mut self, change: &StateChange) {
        match change.action {
            StateAction::Create | StateAction::Update => {
                self.overlay.insert(
                    change.instance_id,
                    Some(StateEntry {
                        value: change.value.clone(),
                        contract_id: change.contract_id.clone(),
                        darc_id: change.darc_id,
                    }),
                );
            }
            StateAction::Remove => {
                self.overlay.insert(change.instance_id, None);
            }
        }
    }

    /// Stages a sequence of changes in order.
    pub fn stage_all(&mut self, changes: &[StateChange]) {
        for change in changes {
            self.stage(change);
        }
    }
}

impl StateView for StagedView<'_> {
    fn get_values(&self, key: &InstanceId) -> Result<StateEntry, StateError> {
        match self.overlay.get(key) {
            Some(Some(entry)) => Ok(entry.clone()),
            Some(None) => Err(StateError::NotFound),
            None => self.base.get_values(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_darc::DarcId;

    struct EmptyView;

    impl StateView for EmptyView {
        fn get_values(&self, _key: &InstanceId) -> Result<StateEntry, StateError> {
            Err(StateError::NotFound)
        }
    }

    fn change(action: StateAction, key: &[u8], value: &[u8]) -> StateChange {
        StateChange::new(
            action,
            InstanceId::from_slice(key),
            "c",
            value.to_vec(),
            DarcId::from_bytes(&[1u8; 32]),
        )
    }

    #[test]
    fn test_staged_view_read_through() {
        let base = EmptyView;
        let mut staged = StagedView::new(&base);
        let key = InstanceId::from_slice(b"key");

        assert!(matches!(staged.get_values(&key), Err(StateError::NotFound)));

        staged.stage(&change(StateAction::Create, b"key", b"v1"));
        assert_eq!(staged.get_values(&key).unwrap().value, b"v1");

        staged.stage(&change(StateAction::Update, b"key", b"v2"));
        assert_eq!(staged.get_values(&key).unwrap().value, b"v2");

        staged.stage(&change(StateAction::Remove, b"key", b""));
        assert!(matches!(staged.get_values(&key), Err(StateError::NotFound)));
    }
}
