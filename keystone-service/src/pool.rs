// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! The pending-transaction pool and the deterministic batch ordering.

use keystone_hash::Hash;
use keystone_models::error::ModelsError;
use keystone_models::transaction::{
    ClientTransaction, ClientTransactionDeserializer, ClientTransactionSerializer,
};
use keystone_serialization::{DeserializeError, Deserializer, Serializer};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Thread-safe staging area for client transactions, keyed by chain id.
///
/// This is the only shared mutable state submitter threads touch
/// concurrently; every operation holds the single lock for the duration of
/// a map access and never does I/O under it.
#[derive(Default)]
pub struct TxPool {
    txs_map: Mutex<HashMap<Hash, Vec<ClientTransaction>>>,
}

impl TxPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends a transaction to the chain's pending list. Transactions
    /// added by one thread keep their relative order.
    pub fn add(&self, chain: Hash, transaction: ClientTransaction) {
        self.txs_map
            .lock()
            .entry(chain)
            .or_default()
            .push(transaction);
    }

    /// Atomically returns and clears the chain's pending list. An unknown
    /// chain yields an empty batch.
    pub fn take(&self, chain: &Hash) -> Vec<ClientTransaction> {
        self.txs_map.lock().remove(chain).unwrap_or_default()
    }

    /// Number of pending transactions for a chain.
    pub fn len(&self, chain: &Hash) -> usize {
        self.txs_map
            .lock()
            .get(chain)
            .map(|txs| txs.len())
            .unwrap_or(0)
    }

    /// True when no transaction is pending for the chain.
    pub fn is_empty(&self, chain: &Hash) -> bool {
        self.len(chain) == 0
    }
}

/// Sorts a batch of transactions into a deterministic order that no
/// single submitter can predict in advance.
///
/// Each transaction is canonically encoded; the salt is the XOR of the
/// digests of all encodings (order independent, so it exists before the
/// order is decided); the encodings are then sorted by the digest of
/// `salt || encoding` and decoded back in place. If any transaction fails
/// to encode or decode, the error is returned and the slice is left
/// untouched.
pub fn sort_transactions(transactions: &mut [ClientTransaction]) -> Result<(), ModelsError> {
    let serializer = ClientTransactionSerializer::new();
    let deserializer = ClientTransactionDeserializer::new();

    let mut encodings: Vec<Vec<u8>> = Vec::with_capacity(transactions.len());
    for transaction in transactions.iter() {
        let mut buffer = Vec::new();
        serializer.serialize(transaction, &mut buffer)?;
        encodings.push(buffer);
    }

    // an alternative to XOR-ing would be to hash the concatenation of the
    // encodings, but that would already require an order
    let mut salt = Hash::zero();
    for encoding in &encodings {
        salt ^= Hash::compute_from(encoding);
    }

    encodings.sort_by_key(|encoding| {
        Hash::compute_from_tuple(&[salt.to_bytes(), encoding]).into_bytes()
    });

    let mut sorted: Vec<ClientTransaction> = Vec::with_capacity(encodings.len());
    for encoding in &encodings {
        let (rest, transaction) = deserializer
            .deserialize::<DeserializeError>(encoding)
            .map_err(|err| ModelsError::DeserializeError(format!("{}", err)))?;
        if !rest.is_empty() {
            return Err(ModelsError::DeserializeError(
                "trailing bytes after transaction".to_string(),
            ));
        }
        sorted.push(transaction);
    }
    transactions.clone_from_slice(&sorted);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_models::instance::{InstanceId, Nonce};
    use keystone_models::instruction::{Instruction, InstructionKind};

    fn tx(tag: u8) -> ClientTransaction {
        ClientTransaction {
            instructions: vec![Instruction {
                instance_id: InstanceId::from_slice(&[tag]),
                nonce: Nonce::from_slice(&[tag]),
                index: 0,
                length: 1,
                kind: InstructionKind::Delete,
                signatures: vec![],
            }],
        }
    }

    #[test]
    fn test_pool_add_take() {
        let pool = TxPool::new();
        let chain = Hash::compute_from(b"chain");

        assert!(pool.is_empty(&chain));
        assert!(pool.take(&chain).is_empty());

        pool.add(chain, tx(1));
        pool.add(chain, tx(2));
        assert_eq!(pool.len(&chain), 2);

        // take returns in insertion order and clears
        let taken = pool.take(&chain);
        assert_eq!(taken, vec![tx(1), tx(2)]);
        assert!(pool.is_empty(&chain));
        assert!(pool.take(&chain).is_empty());
    }

    #[test]
    fn test_pool_chains_are_independent() {
        let pool = TxPool::new();
        let chain_a = Hash::compute_from(b"a");
        let chain_b = Hash::compute_from(b"b");

        pool.add(chain_a, tx(1));
        pool.add(chain_b, tx(2));

        assert_eq!(pool.take(&chain_a), vec![tx(1)]);
        assert_eq!(pool.take(&chain_b), vec![tx(2)]);
    }

    #[test]
    fn test_sort_stability_under_permutation() {
        let mut batch_a = vec![tx(1), tx(2), tx(3), tx(4)];
        let mut batch_b = vec![tx(3), tx(1), tx(4), tx(2)];

        sort_transactions(&mut batch_a).unwrap();
        sort_transactions(&mut batch_b).unwrap();
        assert_eq!(batch_a, batch_b);
    }

    #[test]
    fn test_sort_changes_with_batch_content() {
        // the salt depends on the whole batch, so adding a transaction
        // may move the relative order of the others
        let mut small = vec![tx(1), tx(2)];
        sort_transactions(&mut small).unwrap();

        let mut large = vec![tx(1), tx(2), tx(3)];
        sort_transactions(&mut large).unwrap();
        // all the input transactions are still present exactly once
        for t in [tx(1), tx(2), tx(3)] {
            assert_eq!(large.iter().filter(|x| **x == t).count(), 1);
        }
    }

    #[test]
    fn test_sort_roundtrips_content() {
        let mut batch = vec![tx(9), tx(7), tx(8)];
        sort_transactions(&mut batch).unwrap();
        for t in [tx(7), tx(8), tx(9)] {
            assert!(batch.contains(&t));
        }
    }
}
