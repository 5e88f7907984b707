//! # Meta State
//!
//! The authoritative account/resource view plus transaction staging.
//!
//! Two layers: an immutable **base** holding the last committed state, and a
//! **dirty overlay** mutated by speculative apply. The pending pool keeps
//! every staged transaction, de-duplicated by `(sender, nonce)`; a
//! transaction whose nonce is ahead of its predecessor stays pooled but
//! unapplied until the gap closes.
//!
//! Committing a block folds the committed transactions into the base,
//! removes them from the pool (in memory and in the durable per-kind
//! buckets), and rebuilds the overlay from what is still pending. The caller
//! snapshots the overlay before a risky store batch and restores it if the
//! batch aborts, so state and store never drift apart.

use accord_store::{Batch, Bucket, Store};
use shared_types::{
    Account, Address, ChainError, Hash, ProviderProfile, ResourceProfile, Transaction,
    TransactionKind, TransactionPayload,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ChainError> {
    bincode::serialize(value).map_err(|e| ChainError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ChainError> {
    bincode::deserialize(bytes).map_err(|e| ChainError::Serialization(e.to_string()))
}

/// One layer of account/resource/provider state.
#[derive(Debug, Clone, Default)]
struct StateLayer {
    accounts: HashMap<Address, Account>,
    resources: HashMap<Hash, ResourceProfile>,
    providers: HashMap<Address, ProviderProfile>,
}

/// Entity ids touched by applying a transaction; drives the bucket writes at
/// commit time.
#[derive(Debug, Default)]
struct Touched {
    accounts: HashSet<Address>,
    resources: HashSet<Hash>,
    providers: HashSet<Address>,
}

/// The pending pool: insertion-ordered senders, nonce-ordered per sender.
#[derive(Debug, Clone, Default)]
struct TxPool {
    senders: Vec<Address>,
    by_sender: HashMap<Address, BTreeMap<u64, Hash>>,
    by_hash: HashMap<Hash, Transaction>,
}

impl TxPool {
    fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    fn insert(&mut self, tx: Transaction) -> Result<(), ChainError> {
        let sender = tx.sender();
        let nonce = tx.nonce();
        let slot = self.by_sender.entry(sender).or_default();
        if let Some(existing) = slot.get(&nonce) {
            if *existing != tx.hash() {
                return Err(ChainError::DuplicateNonce {
                    expected: nonce + 1,
                    actual: nonce,
                });
            }
            return Ok(());
        }
        if !self.senders.contains(&sender) {
            self.senders.push(sender);
        }
        slot.insert(nonce, tx.hash());
        self.by_hash.insert(tx.hash(), tx);
        Ok(())
    }

    fn remove(&mut self, hash: &Hash) -> Option<Transaction> {
        let tx = self.by_hash.remove(hash)?;
        if let Some(slot) = self.by_sender.get_mut(&tx.sender()) {
            slot.remove(&tx.nonce());
            if slot.is_empty() {
                self.by_sender.remove(&tx.sender());
                self.senders.retain(|s| s != &tx.sender());
            }
        }
        Some(tx)
    }

    fn len(&self) -> usize {
        self.by_hash.len()
    }
}

/// Opaque copy of the overlay, restored when a store batch aborts.
pub struct OverlaySnapshot {
    dirty: StateLayer,
    pool: TxPool,
    applied: HashSet<Hash>,
}

/// Opaque copy of both layers, for batches that also touch the base
/// (block commits).
pub struct FullSnapshot {
    base: StateLayer,
    overlay: OverlaySnapshot,
}

/// The layered state view and transaction staging pool.
#[derive(Default)]
pub struct MetaState {
    base: StateLayer,
    dirty: StateLayer,
    pool: TxPool,
    applied: HashSet<Hash>,
}

impl MetaState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    /// The staged view of an account: overlay first, base second.
    pub fn account(&self, address: &Address) -> Option<Account> {
        self.dirty
            .accounts
            .get(address)
            .or_else(|| self.base.accounts.get(address))
            .cloned()
    }

    /// The committed (base) view of an account.
    pub fn committed_account(&self, address: &Address) -> Option<Account> {
        self.base.accounts.get(address).cloned()
    }

    /// The staged view of a resource.
    pub fn resource(&self, id: &Hash) -> Option<ResourceProfile> {
        self.dirty
            .resources
            .get(id)
            .or_else(|| self.base.resources.get(id))
            .cloned()
    }

    /// The staged view of a provider.
    pub fn provider(&self, address: &Address) -> Option<ProviderProfile> {
        self.dirty
            .providers
            .get(address)
            .or_else(|| self.base.providers.get(address))
            .cloned()
    }

    /// The next acceptable nonce for `address`:
    /// `max(committed nonce, staged nonce) + 1`, `1` for a fresh account.
    pub fn next_nonce(&self, address: &Address) -> u64 {
        self.account(address).map(|a| a.nonce).unwrap_or(0) + 1
    }

    /// Number of pending transactions.
    pub fn pending_len(&self) -> usize {
        self.pool.len()
    }

    /// True if `hash` is staged.
    pub fn is_staged(&self, hash: &Hash) -> bool {
        self.pool.contains(hash)
    }

    // ------------------------------------------------------------------
    // Genesis / reload
    // ------------------------------------------------------------------

    /// Seed a committed account (genesis allocations).
    pub fn seed_account(&mut self, account: Account) {
        self.base.accounts.insert(account.address, account);
    }

    /// Rebuild the in-memory state from the store.
    pub fn reload(&mut self, store: &Store) -> Result<(), ChainError> {
        let mut base = StateLayer::default();
        for (key, value) in store.scan(Bucket::Accounts) {
            let account: Account = decode(&value)?;
            let address: Address = key
                .try_into()
                .map_err(|_| ChainError::Serialization("malformed account key".into()))?;
            base.accounts.insert(address, account);
        }
        for (key, value) in store.scan(Bucket::Resources) {
            let resource: ResourceProfile = decode(&value)?;
            let id: Hash = key
                .try_into()
                .map_err(|_| ChainError::Serialization("malformed resource key".into()))?;
            base.resources.insert(id, resource);
        }
        for (key, value) in store.scan(Bucket::Providers) {
            let provider: ProviderProfile = decode(&value)?;
            let address: Address = key
                .try_into()
                .map_err(|_| ChainError::Serialization("malformed provider key".into()))?;
            base.providers.insert(address, provider);
        }

        let mut pending: Vec<Transaction> = Vec::new();
        for kind in TransactionKind::ALL {
            for (_key, value) in store.scan(Bucket::TxPool(kind)) {
                pending.push(decode(&value)?);
            }
        }
        // The original insertion order is not recorded; a deterministic
        // (sender, nonce) order stands in for it after a restart.
        pending.sort_by_key(|tx| (tx.sender(), tx.nonce()));

        self.base = base;
        self.dirty = StateLayer::default();
        self.pool = TxPool::default();
        self.applied = HashSet::new();
        for tx in pending {
            self.pool.insert(tx)?;
        }
        let evicted = self.rebuild_overlay();
        if !evicted.is_empty() {
            warn!(count = evicted.len(), "dropped unapplicable pool entries on reload");
        }
        debug!(
            accounts = self.base.accounts.len(),
            pending = self.pool.len(),
            "meta state reloaded"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Staging
    // ------------------------------------------------------------------

    /// Take a copy of the overlay for later [`restore_overlay`].
    ///
    /// [`restore_overlay`]: MetaState::restore_overlay
    pub fn snapshot_overlay(&self) -> OverlaySnapshot {
        OverlaySnapshot {
            dirty: self.dirty.clone(),
            pool: self.pool.clone(),
            applied: self.applied.clone(),
        }
    }

    /// Restore an overlay copy taken before an aborted batch.
    pub fn restore_overlay(&mut self, snapshot: OverlaySnapshot) {
        self.dirty = snapshot.dirty;
        self.pool = snapshot.pool;
        self.applied = snapshot.applied;
    }

    /// Take a copy of base and overlay together, for batches that commit
    /// into the base.
    pub fn snapshot_full(&self) -> FullSnapshot {
        FullSnapshot {
            base: self.base.clone(),
            overlay: self.snapshot_overlay(),
        }
    }

    /// Restore a full copy taken before an aborted commit batch.
    pub fn restore_full(&mut self, snapshot: FullSnapshot) {
        self.base = snapshot.base;
        self.restore_overlay(snapshot.overlay);
    }

    /// Stage a transaction inside an open store batch.
    ///
    /// Verifies the signature and nonce ordering, applies the effects to the
    /// overlay when the nonce is next in line (and promotes any pooled
    /// successors the apply unblocks), and writes the transaction into the
    /// durable pool bucket of its kind. A transaction already staged is a
    /// no-op. A nonce at or below the staged nonce is rejected with
    /// `ErrDuplicateNonce`; a nonce further ahead is pooled as a gap.
    pub fn apply_transaction(
        &mut self,
        tx: &Transaction,
        batch: &mut Batch,
    ) -> Result<(), ChainError> {
        let hash = tx.hash();
        if self.applied.contains(&hash) {
            return Ok(());
        }
        tx.verify()?;

        let sender = tx.sender();
        let expected = self.next_nonce(&sender);
        let nonce = tx.nonce();
        if nonce < expected {
            return Err(ChainError::DuplicateNonce {
                expected,
                actual: nonce,
            });
        }

        if nonce == expected {
            apply_effects(Some(&self.base), &mut self.dirty, tx, &mut Touched::default())?;
            self.applied.insert(hash);
            self.promote_successors(&sender, nonce, batch);
        } else {
            debug!(
                nonce,
                expected,
                sender = %hex::encode(&sender[..4]),
                "pooled out-of-order transaction"
            );
        }

        if !self.pool.contains(&hash) {
            self.pool.insert(tx.clone())?;
            batch.put(Bucket::TxPool(tx.kind()), hash.to_vec(), encode(tx)?);
        }
        Ok(())
    }

    /// Apply pooled successors of `(sender, nonce)` that the last apply
    /// unblocked. A successor whose effects no longer fit (say the balance
    /// is gone) is evicted from the pool.
    fn promote_successors(&mut self, sender: &Address, mut nonce: u64, batch: &mut Batch) {
        loop {
            let Some(hash) = self
                .pool
                .by_sender
                .get(sender)
                .and_then(|slot| slot.get(&(nonce + 1)))
                .copied()
            else {
                return;
            };
            if self.applied.contains(&hash) {
                return;
            }
            let tx = self.pool.by_hash[&hash].clone();
            match apply_effects(Some(&self.base), &mut self.dirty, &tx, &mut Touched::default()) {
                Ok(()) => {
                    self.applied.insert(hash);
                    nonce += 1;
                }
                Err(err) => {
                    warn!(error = %err, hash = %hex::encode(&hash[..4]), "evicting pooled successor");
                    self.pool.remove(&hash);
                    batch.delete(Bucket::TxPool(tx.kind()), hash.to_vec());
                    return;
                }
            }
        }
    }

    /// Dequeue the transactions ready for the next produced block.
    ///
    /// Per sender the run is consecutive from the committed nonce; across
    /// senders the first-seen insertion order is preserved. Gapped nonces
    /// stay behind.
    pub fn pull_txs(&self) -> Vec<Transaction> {
        let mut result = Vec::new();
        for sender in &self.pool.senders {
            let committed = self
                .base
                .accounts
                .get(sender)
                .map(|a| a.nonce)
                .unwrap_or(0);
            let Some(slot) = self.pool.by_sender.get(sender) else {
                continue;
            };
            let mut expected = committed + 1;
            while let Some(hash) = slot.get(&expected) {
                if !self.applied.contains(hash) {
                    break;
                }
                result.push(self.pool.by_hash[hash].clone());
                expected += 1;
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Commit `txs` inside an open store batch.
    ///
    /// Applies the committed transactions onto the base layer, writes every
    /// touched entity to its bucket, removes the transactions from the pool
    /// (memory and durable buckets), then rebuilds the overlay from the
    /// still-pending remainder.
    pub fn partial_commit(
        &mut self,
        txs: &[Transaction],
        batch: &mut Batch,
    ) -> Result<(), ChainError> {
        let mut touched = Touched::default();
        for tx in txs {
            apply_effects(None, &mut self.base, tx, &mut touched)?;
        }

        for address in &touched.accounts {
            let account = self
                .base
                .accounts
                .get(address)
                .ok_or(ChainError::UnknownAccount(*address))?;
            batch.put(Bucket::Accounts, address.to_vec(), encode(account)?);
        }
        for id in &touched.resources {
            if let Some(resource) = self.base.resources.get(id) {
                batch.put(Bucket::Resources, id.to_vec(), encode(resource)?);
            }
        }
        for address in &touched.providers {
            if let Some(provider) = self.base.providers.get(address) {
                batch.put(Bucket::Providers, address.to_vec(), encode(provider)?);
            }
        }

        for tx in txs {
            let hash = tx.hash();
            self.applied.remove(&hash);
            if self.pool.remove(&hash).is_some() {
                batch.delete(Bucket::TxPool(tx.kind()), hash.to_vec());
            }
        }

        for evicted in self.rebuild_overlay() {
            batch.delete(Bucket::TxPool(evicted.kind()), evicted.hash().to_vec());
        }
        Ok(())
    }

    /// Re-stage everything still pending onto a fresh overlay.
    ///
    /// Returns transactions that no longer apply against the new base; the
    /// caller drops their durable pool entries.
    fn rebuild_overlay(&mut self) -> Vec<Transaction> {
        self.dirty = StateLayer::default();
        self.applied = HashSet::new();
        let mut evicted = Vec::new();

        for sender in self.pool.senders.clone() {
            let committed = self
                .base
                .accounts
                .get(&sender)
                .map(|a| a.nonce)
                .unwrap_or(0);
            let nonces: Vec<u64> = self
                .pool
                .by_sender
                .get(&sender)
                .map(|slot| slot.keys().copied().collect())
                .unwrap_or_default();

            let mut expected = committed + 1;
            for nonce in nonces {
                let Some(hash) = self
                    .pool
                    .by_sender
                    .get(&sender)
                    .and_then(|slot| slot.get(&nonce))
                    .copied()
                else {
                    break;
                };
                if nonce < expected {
                    // Committed elsewhere in the meantime; the pool entry is
                    // stale.
                    if let Some(tx) = self.pool.remove(&hash) {
                        evicted.push(tx);
                    }
                    continue;
                }
                if nonce > expected {
                    break; // gap, stays pooled but unapplied
                }
                let tx = self.pool.by_hash[&hash].clone();
                match apply_effects(Some(&self.base), &mut self.dirty, &tx, &mut Touched::default())
                {
                    Ok(()) => {
                        self.applied.insert(hash);
                        expected += 1;
                    }
                    Err(err) => {
                        warn!(error = %err, hash = %hex::encode(&hash[..4]), "evicting stale pool entry");
                        self.pool.remove(&hash);
                        evicted.push(tx);
                        break;
                    }
                }
            }
        }
        evicted
    }

    /// Current pool contents for the archive snapshot.
    pub fn pool_snapshot(&self) -> Vec<(TransactionKind, Hash, Vec<u8>)> {
        self.pool
            .by_hash
            .values()
            .filter_map(|tx| {
                encode(tx)
                    .ok()
                    .map(|bytes| (tx.kind(), tx.hash(), bytes))
            })
            .collect()
    }
}

/// Apply the effects of `tx` onto `target`, resolving reads through `base`
/// first when given (overlay mode). Violations (wrong nonce, unknown
/// sender, insufficient balance, foreign resource) abort with the matching
/// chain error and leave `target` partially untouched only within this
/// transaction; callers abort the enclosing batch on error.
fn apply_effects(
    base: Option<&StateLayer>,
    target: &mut StateLayer,
    tx: &Transaction,
    touched: &mut Touched,
) -> Result<(), ChainError> {
    let sender = tx.sender();

    let resolve_account = |target: &StateLayer, address: &Address| -> Option<Account> {
        target
            .accounts
            .get(address)
            .or_else(|| base.and_then(|b| b.accounts.get(address)))
            .cloned()
    };

    let mut sender_account =
        resolve_account(target, &sender).ok_or(ChainError::UnknownAccount(sender))?;
    let expected = sender_account.nonce + 1;
    if tx.nonce() != expected {
        return Err(ChainError::DuplicateNonce {
            expected,
            actual: tx.nonce(),
        });
    }
    sender_account.nonce = expected;

    match &tx.payload {
        TransactionPayload::Transfer(p) => {
            sender_account.debit(p.token, p.amount)?;
            if p.receiver == sender {
                sender_account.credit(p.token, p.amount);
            } else {
                let mut receiver = resolve_account(target, &p.receiver)
                    .unwrap_or_else(|| Account::new(p.receiver));
                receiver.credit(p.token, p.amount);
                touched.accounts.insert(p.receiver);
                target.accounts.insert(p.receiver, receiver);
            }
        }
        TransactionPayload::Billing(p) => {
            if p.receivers.len() != p.fees.len() || p.receivers.len() != p.rewards.len() {
                return Err(ChainError::Serialization(
                    "billing receiver/fee/reward arrays differ in length".into(),
                ));
            }
            for (i, address) in p.receivers.iter().enumerate() {
                let amount = p.fees[i].saturating_add(p.rewards[i]);
                if *address == sender {
                    sender_account.credit(shared_types::TokenKind::Credit, amount);
                    continue;
                }
                let mut receiver =
                    resolve_account(target, address).unwrap_or_else(|| Account::new(*address));
                receiver.credit(shared_types::TokenKind::Credit, amount);
                touched.accounts.insert(*address);
                target.accounts.insert(*address, receiver);
            }
        }
        TransactionPayload::ProviderRegistration(p) => {
            sender_account.debit(shared_types::TokenKind::Native, p.deposit)?;
            let profile = ProviderProfile {
                provider: sender,
                deposit: p.deposit,
                node_id: p.node_id,
            };
            touched.providers.insert(sender);
            target.providers.insert(sender, profile);
        }
        TransactionPayload::ResourceUpdate(p) => {
            let existing = target
                .resources
                .get(&p.resource_id)
                .or_else(|| base.and_then(|b| b.resources.get(&p.resource_id)))
                .cloned();
            let resource = match existing {
                Some(mut resource) => {
                    if resource.owner != sender {
                        return Err(ChainError::InvalidSignature);
                    }
                    resource.miners = p.miners.clone();
                    resource
                }
                None => ResourceProfile {
                    id: p.resource_id,
                    owner: sender,
                    miners: p.miners.clone(),
                },
            };
            touched.resources.insert(p.resource_id);
            target.resources.insert(p.resource_id, resource);
        }
    }

    touched.accounts.insert(sender);
    target.accounts.insert(sender, sender_account);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::NodeKeyPair;
    use shared_types::{TokenKind, TransferPayload};

    fn funded(meta: &mut MetaState, keypair: &NodeKeyPair, amount: u64) {
        let mut account = Account::new(keypair.address());
        account.credit(TokenKind::Native, amount);
        meta.seed_account(account);
    }

    fn transfer(keypair: &NodeKeyPair, nonce: u64, amount: u64) -> Transaction {
        Transaction::sign(
            TransactionPayload::Transfer(TransferPayload {
                sender: keypair.address(),
                nonce,
                receiver: [9u8; 32],
                token: TokenKind::Native,
                amount,
            }),
            keypair,
        )
    }

    fn stage(meta: &mut MetaState, tx: &Transaction) -> Result<(), ChainError> {
        let mut batch = Batch::default();
        meta.apply_transaction(tx, &mut batch)
    }

    #[test]
    fn test_next_nonce_tracks_staging() {
        let keypair = NodeKeyPair::generate();
        let mut meta = MetaState::new();
        funded(&mut meta, &keypair, 100);

        assert_eq!(meta.next_nonce(&keypair.address()), 1);
        stage(&mut meta, &transfer(&keypair, 1, 10)).unwrap();
        assert_eq!(meta.next_nonce(&keypair.address()), 2);
        // The committed view is untouched until a block lands.
        assert_eq!(
            meta.committed_account(&keypair.address()).unwrap().nonce,
            0
        );
    }

    #[test]
    fn test_stale_nonce_rejected() {
        let keypair = NodeKeyPair::generate();
        let mut meta = MetaState::new();
        funded(&mut meta, &keypair, 100);

        stage(&mut meta, &transfer(&keypair, 1, 10)).unwrap();
        let err = stage(&mut meta, &transfer(&keypair, 1, 20)).unwrap_err();
        assert_eq!(err.code(), "ErrDuplicateNonce");
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let keypair = NodeKeyPair::generate();
        let mut meta = MetaState::new();
        let err = stage(&mut meta, &transfer(&keypair, 1, 10)).unwrap_err();
        assert_eq!(err.code(), "ErrUnknownAccount");
    }

    #[test]
    fn test_insufficient_balance_rejected() {
        let keypair = NodeKeyPair::generate();
        let mut meta = MetaState::new();
        funded(&mut meta, &keypair, 5);
        let err = stage(&mut meta, &transfer(&keypair, 1, 10)).unwrap_err();
        assert_eq!(err.code(), "ErrInsufficientBalance");
    }

    #[test]
    fn test_gap_is_pooled_but_not_pulled() {
        let keypair = NodeKeyPair::generate();
        let mut meta = MetaState::new();
        funded(&mut meta, &keypair, 100);

        // Nonce 2 arrives before nonce 1.
        stage(&mut meta, &transfer(&keypair, 2, 10)).unwrap();
        assert_eq!(meta.pending_len(), 1);
        assert!(meta.pull_txs().is_empty());

        // The gap closes; both become pullable in nonce order.
        stage(&mut meta, &transfer(&keypair, 1, 10)).unwrap();
        let pulled = meta.pull_txs();
        assert_eq!(pulled.len(), 2);
        assert_eq!(pulled[0].nonce(), 1);
        assert_eq!(pulled[1].nonce(), 2);
        // Both applied to the overlay.
        assert_eq!(
            meta.account(&keypair.address()).unwrap().balance(TokenKind::Native),
            80
        );
    }

    #[test]
    fn test_pull_preserves_sender_insertion_order() {
        let alice = NodeKeyPair::generate();
        let bob = NodeKeyPair::generate();
        let mut meta = MetaState::new();
        funded(&mut meta, &alice, 100);
        funded(&mut meta, &bob, 100);

        stage(&mut meta, &transfer(&alice, 1, 1)).unwrap();
        stage(&mut meta, &transfer(&bob, 1, 1)).unwrap();
        stage(&mut meta, &transfer(&alice, 2, 1)).unwrap();

        let pulled = meta.pull_txs();
        let senders: Vec<Address> = pulled.iter().map(|tx| tx.sender()).collect();
        assert_eq!(
            senders,
            vec![alice.address(), alice.address(), bob.address()]
        );
    }

    #[test]
    fn test_partial_commit_folds_into_base() {
        let keypair = NodeKeyPair::generate();
        let mut meta = MetaState::new();
        funded(&mut meta, &keypair, 100);

        let tx1 = transfer(&keypair, 1, 10);
        let tx2 = transfer(&keypair, 2, 10);
        stage(&mut meta, &tx1).unwrap();
        stage(&mut meta, &tx2).unwrap();

        // Only the first transaction lands in a block.
        let mut batch = Batch::default();
        meta.partial_commit(std::slice::from_ref(&tx1), &mut batch).unwrap();

        let committed = meta.committed_account(&keypair.address()).unwrap();
        assert_eq!(committed.nonce, 1);
        assert_eq!(committed.balance(TokenKind::Native), 90);

        // The second stays pending and staged on the rebuilt overlay.
        assert_eq!(meta.pending_len(), 1);
        let staged = meta.account(&keypair.address()).unwrap();
        assert_eq!(staged.nonce, 2);
        assert_eq!(staged.balance(TokenKind::Native), 80);
        assert_eq!(meta.pull_txs().len(), 1);
    }

    #[test]
    fn test_commit_of_foreign_transactions() {
        // A block from a peer carries transactions this node never staged.
        let keypair = NodeKeyPair::generate();
        let mut meta = MetaState::new();
        funded(&mut meta, &keypair, 100);

        let tx = transfer(&keypair, 1, 25);
        let mut batch = Batch::default();
        meta.apply_transaction(&tx, &mut batch).unwrap();
        meta.partial_commit(std::slice::from_ref(&tx), &mut batch).unwrap();

        assert_eq!(meta.pending_len(), 0);
        let committed = meta.committed_account(&keypair.address()).unwrap();
        assert_eq!(committed.balance(TokenKind::Native), 75);
        assert_eq!(committed.nonce, 1);
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let keypair = NodeKeyPair::generate();
        let mut meta = MetaState::new();
        funded(&mut meta, &keypair, 100);

        let snapshot = meta.snapshot_overlay();
        stage(&mut meta, &transfer(&keypair, 1, 10)).unwrap();
        assert_eq!(meta.pending_len(), 1);

        meta.restore_overlay(snapshot);
        assert_eq!(meta.pending_len(), 0);
        assert_eq!(meta.next_nonce(&keypair.address()), 1);
    }

    #[test]
    fn test_reload_restores_pool_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("chain.db")).unwrap();
        let keypair = NodeKeyPair::generate();

        let mut meta = MetaState::new();
        let mut account = Account::new(keypair.address());
        account.credit(TokenKind::Native, 100);
        meta.seed_account(account.clone());

        let pending = transfer(&keypair, 1, 10);
        store
            .update::<ChainError, _>(|batch| {
                batch.put(
                    Bucket::Accounts,
                    account.address.to_vec(),
                    bincode::serialize(&account).unwrap(),
                );
                meta.apply_transaction(&pending, batch)
            })
            .unwrap();

        let mut reloaded = MetaState::new();
        reloaded.reload(&store).unwrap();
        assert_eq!(reloaded.pending_len(), 1);
        assert!(reloaded.is_staged(&pending.hash()));
        assert_eq!(reloaded.next_nonce(&keypair.address()), 2);
        assert_eq!(
            reloaded
                .committed_account(&keypair.address())
                .unwrap()
                .balance(TokenKind::Native),
            100
        );
    }

    #[test]
    fn test_resource_update_requires_owner() {
        let owner = NodeKeyPair::generate();
        let intruder = NodeKeyPair::generate();
        let mut meta = MetaState::new();
        funded(&mut meta, &owner, 10);
        funded(&mut meta, &intruder, 10);

        let create = Transaction::sign(
            TransactionPayload::ResourceUpdate(shared_types::ResourceUpdatePayload {
                sender: owner.address(),
                nonce: 1,
                resource_id: [5u8; 32],
                miners: vec![[1u8; 32]],
            }),
            &owner,
        );
        stage(&mut meta, &create).unwrap();
        assert_eq!(meta.resource(&[5u8; 32]).unwrap().owner, owner.address());

        let takeover = Transaction::sign(
            TransactionPayload::ResourceUpdate(shared_types::ResourceUpdatePayload {
                sender: intruder.address(),
                nonce: 1,
                resource_id: [5u8; 32],
                miners: vec![[2u8; 32]],
            }),
            &intruder,
        );
        let err = stage(&mut meta, &takeover).unwrap_err();
        assert_eq!(err.code(), "ErrInvalidSignature");
    }
}
