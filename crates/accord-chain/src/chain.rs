//! # Chain Orchestrator
//!
//! Ties the pieces together: block validation and acceptance, production on
//! this node's turns, synchronization with peers, the pending-transaction
//! path through the event bus, and the RPC handlers peers call.
//!
//! Head advancement is serialized: acceptance (whether a produced or an
//! advised block) runs under one lock, and every durable effect of a block
//! (body, transaction effects, pool removal, head pointer) lands in a single
//! store batch that either fully applies or leaves the store unchanged.

use crate::block_index::{BlockIndex, BlockNode};
use crate::config::ChainConfig;
use crate::metastate::MetaState;
use crate::replicated::{LogConfig, LogHandler, ReplicatedLog, WalLog};
use crate::rpc::{
    AdviseNewBlockReq, AdviseNewBlockResp, ChainRpc, FetchBlockReq, FetchBlockResp, PeerCaller,
};
use crate::runtime::{Head, Runtime};
use accord_store::{Bucket, ChainArchive, Store, HEAD_STATE_KEY};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_bus::{ChainEvent, EventBus, EventTopic};
use shared_crypto::NodeKeyPair;
use shared_types::entities::short_hex;
use shared_types::{
    Account, Address, BillingPayload, BillingRequest, Block, BlockHeader, ChainError, Envelope,
    HeadState, SignedBlockHeader, Transaction, TransactionPayload, BLOCK_VERSION, GAS_PRICE,
};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ChainError> {
    bincode::serialize(value).map_err(|e| ChainError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ChainError> {
    bincode::deserialize(bytes).map_err(|e| ChainError::Serialization(e.to_string()))
}

/// Forwards applied log entries onto the pending-transaction channel.
///
/// The narrow capability handed to the log runtime instead of the chain
/// itself.
struct TxApplier {
    pending: mpsc::UnboundedSender<Transaction>,
}

impl LogHandler for TxApplier {
    fn on_apply(&self, index: u64, payload: &[u8]) {
        match decode::<Transaction>(payload) {
            Ok(tx) => {
                debug!(index, tx = %short_hex(&tx.hash()), "applied log entry");
                if self.pending.send(tx).is_err() {
                    warn!(index, "pending channel closed, dropping applied entry");
                }
            }
            Err(err) => warn!(index, error = %err, "undecodable log entry"),
        }
    }
}

struct ChainInner {
    config: ChainConfig,
    store: Store,
    archive: Mutex<ChainArchive>,
    meta: RwLock<MetaState>,
    index: RwLock<BlockIndex>,
    runtime: Runtime,
    bus: Arc<EventBus>,
    caller: Arc<dyn PeerCaller>,
    log: Arc<WalLog>,
    keypair: NodeKeyPair,
    address: Address,
    blocks_tx: mpsc::UnboundedSender<Block>,
    blocks_rx: Mutex<Option<mpsc::UnboundedReceiver<Block>>>,
    txs_tx: mpsc::UnboundedSender<Transaction>,
    txs_rx: Mutex<Option<mpsc::UnboundedReceiver<Transaction>>>,
    fork_candidates: Mutex<Vec<Block>>,
    // Serializes every head mutation; at most one acceptance in flight.
    accept: Mutex<()>,
}

/// The block-producer chain core of one node.
#[derive(Clone)]
pub struct Chain {
    inner: Arc<ChainInner>,
}

impl Chain {
    /// Open or create the chain described by `config`.
    ///
    /// A fresh data file gets the genesis block and the configured
    /// allocations; an existing one is reloaded and every non-genesis link
    /// re-verified.
    pub fn new(
        config: ChainConfig,
        keypair: NodeKeyPair,
        caller: Arc<dyn PeerCaller>,
    ) -> Result<Self, ChainError> {
        config.validate()?;
        let existing = config.data_file.exists();

        let store = Store::open(&config.data_file)?;
        let archive = ChainArchive::open(config.archive_file())?;
        let runtime = Runtime::new(&config)?;

        let (blocks_tx, blocks_rx) = mpsc::unbounded_channel();
        let (txs_tx, txs_rx) = mpsc::unbounded_channel();

        let applier = Arc::new(TxApplier {
            pending: txs_tx.clone(),
        });
        let log = Arc::new(WalLog::open(config.wal_dir(), applier, LogConfig::default())?);

        let address = keypair.address();
        let inner = Arc::new(ChainInner {
            config,
            store,
            archive: Mutex::new(archive),
            meta: RwLock::new(MetaState::new()),
            index: RwLock::new(BlockIndex::new()),
            runtime,
            bus: Arc::new(EventBus::new()),
            caller,
            log,
            keypair,
            address,
            blocks_tx,
            blocks_rx: Mutex::new(Some(blocks_rx)),
            txs_tx,
            txs_rx: Mutex::new(Some(txs_rx)),
            fork_candidates: Mutex::new(Vec::new()),
            accept: Mutex::new(()),
        });
        let chain = Self { inner };

        chain.subscribe_persistence();
        if existing {
            chain.load()?;
        } else {
            chain.push_genesis()?;
        }

        info!(
            node = %chain.inner.runtime.node_id().short_hex(),
            index = chain.inner.runtime.index(),
            bp_num = chain.inner.runtime.bp_num(),
            height = chain.head_state().height,
            "chain ready"
        );
        Ok(chain)
    }

    /// Catch up with peers, then spawn the three long-lived tasks.
    pub async fn start(&self) -> Result<(), ChainError> {
        self.sync().await?;

        let chain = self.clone();
        let shutdown = self.inner.runtime.shutdown_signal();
        self.inner.runtime.spawn(tokio::spawn(async move {
            chain.process_blocks(shutdown).await;
        }));

        let chain = self.clone();
        let shutdown = self.inner.runtime.shutdown_signal();
        self.inner.runtime.spawn(tokio::spawn(async move {
            chain.process_txs(shutdown).await;
        }));

        let chain = self.clone();
        let shutdown = self.inner.runtime.shutdown_signal();
        self.inner.runtime.spawn(tokio::spawn(async move {
            chain.main_cycle(shutdown).await;
        }));

        Ok(())
    }

    /// Signal shutdown and await the background tasks.
    pub async fn stop(&self) {
        self.inner.runtime.stop().await;
        info!(node = %self.inner.runtime.node_id().short_hex(), "chain stopped");
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The current head pointer.
    pub fn head_state(&self) -> HeadState {
        self.inner.runtime.head().state
    }

    /// The scheduling runtime.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// The in-process event bus (tests register extra observers here).
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.inner.bus)
    }

    /// The staged view of an account.
    pub fn account(&self, address: &Address) -> Option<Account> {
        self.inner.meta.read().account(address)
    }

    /// The committed view of an account.
    pub fn committed_account(&self, address: &Address) -> Option<Account> {
        self.inner.meta.read().committed_account(address)
    }

    /// Number of pending transactions.
    pub fn pending_len(&self) -> usize {
        self.inner.meta.read().pending_len()
    }

    /// Blocks that arrived for an already-processed turn, recorded as
    /// competing-branch candidates. Resolution is left to a later
    /// arbitration pass; the list only grows and none of its entries are
    /// applied.
    pub fn fork_candidates(&self) -> Vec<Block> {
        self.inner.fork_candidates.lock().clone()
    }

    /// This node's on-chain producer address.
    pub fn address(&self) -> Address {
        self.inner.address
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    fn subscribe_persistence(&self) {
        let weak: Weak<ChainInner> = Arc::downgrade(&self.inner);
        self.inner
            .bus
            .subscribe(EventTopic::Transactions, move |event| {
                let ChainEvent::TransactionReceived(tx) = event else {
                    return;
                };
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Err(err) = Chain::stage_transaction(&inner, tx) {
                    debug!(
                        error = %err,
                        code = err.code(),
                        tx = %short_hex(&tx.hash()),
                        "failed to stage transaction"
                    );
                }
            });
    }

    /// Stage one transaction in its own store batch, rolling the overlay
    /// back if the batch aborts.
    fn stage_transaction(inner: &ChainInner, tx: &Transaction) -> Result<(), ChainError> {
        let mut meta = inner.meta.write();
        let snapshot = meta.snapshot_overlay();
        let result = inner
            .store
            .update::<ChainError, _>(|batch| meta.apply_transaction(tx, batch));
        if result.is_err() {
            meta.restore_overlay(snapshot);
        }
        result
    }

    fn push_genesis(&self) -> Result<(), ChainError> {
        let genesis = Block::genesis(self.inner.config.genesis.timestamp);
        debug!(hash = %short_hex(&genesis.hash()), "pushing genesis block");

        let node = BlockNode::new(
            self.inner.runtime.chain_init_time(),
            self.inner.runtime.period(),
            genesis.clone(),
            None,
        );
        let state = HeadState {
            head: node.hash,
            height: node.height,
        };

        // Merge the configured allocations into per-address accounts.
        let mut accounts: HashMap<Address, Account> = HashMap::new();
        for allocation in &self.inner.config.genesis.allocations {
            accounts
                .entry(allocation.address)
                .or_insert_with(|| Account::new(allocation.address))
                .credit(allocation.token, allocation.amount);
        }

        let enc_block = encode(&genesis)?;
        let enc_state = encode(&state)?;
        let mut meta = self.inner.meta.write();
        self.inner.store.update::<ChainError, _>(|batch| {
            batch.put(Bucket::Blocks, node.index_key(), enc_block);
            for account in accounts.values() {
                batch.put(Bucket::Accounts, account.address.to_vec(), encode(account)?);
            }
            batch.put(Bucket::Meta, HEAD_STATE_KEY.to_vec(), enc_state);
            Ok(())
        })?;
        for account in accounts.into_values() {
            meta.seed_account(account);
        }
        drop(meta);

        self.inner.index.write().add(Arc::clone(&node))?;
        self.inner.runtime.set_head(Head { state, node });
        self.inner.runtime.reset_next_turn();
        self.archive_block(&genesis, state.height);
        Ok(())
    }

    fn load(&self) -> Result<(), ChainError> {
        let head_bytes = self
            .inner
            .store
            .get(Bucket::Meta, HEAD_STATE_KEY)
            .ok_or(ChainError::MetaStateNotFound)?;
        let head_state: HeadState = decode(&head_bytes)?;

        let mut index = self.inner.index.write();
        let mut last: Option<Arc<BlockNode>> = None;
        for (_key, value) in self.inner.store.scan(Bucket::Blocks) {
            let block: Block = decode(&value)?;
            debug!(
                hash = %short_hex(&block.hash()),
                parent = %short_hex(&block.parent_hash()),
                "loading chain block"
            );

            let parent = match &last {
                None => None, // genesis record
                Some(tip) if block.parent_hash() == tip.hash => {
                    block.signed_header.verify()?;
                    Some(Arc::clone(tip))
                }
                Some(_) => Some(
                    index
                        .lookup(&block.parent_hash())
                        .ok_or(ChainError::ParentNotFound)?,
                ),
            };
            let node = BlockNode::new(
                self.inner.runtime.chain_init_time(),
                self.inner.runtime.period(),
                block,
                parent.as_ref(),
            );
            index.add(Arc::clone(&node))?;
            last = Some(node);
        }

        let head_node = index
            .lookup(&head_state.head)
            .ok_or(ChainError::MetaStateNotFound)?;
        drop(index);

        self.inner.runtime.set_head(Head {
            state: head_state,
            node: head_node,
        });
        self.inner.runtime.reset_next_turn();
        self.inner.meta.write().reload(&self.inner.store)?;

        info!(
            height = head_state.height,
            head = %short_hex(&head_state.head),
            "chain state reloaded from store"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Validation and acceptance
    // ------------------------------------------------------------------

    /// Structural and positional validation of an incoming block.
    ///
    /// Parent linkage, Merkle root, declared hash, producer signature, then
    /// the leader rotation.
    pub fn check_block(&self, block: &Block) -> Result<(), ChainError> {
        let head = self.inner.runtime.head();
        if block.parent_hash() != head.state.head {
            debug!(
                head = %short_hex(&head.state.head),
                height = head.state.height,
                received_parent = %short_hex(&block.parent_hash()),
                "invalid parent"
            );
            return Err(ChainError::ParentNotMatch);
        }

        block.verify()?;

        let height = self.inner.runtime.height_from_time(block.timestamp());
        let leader = self.inner.runtime.leader_of(height);
        if leader.address != block.producer() {
            return Err(ChainError::NotLeader { height });
        }
        Ok(())
    }

    /// Validate and accept `block`, advancing the head.
    pub fn push_block(&self, block: Block) -> Result<(), ChainError> {
        let _guard = self.inner.accept.lock();
        self.check_block(&block)?;
        self.push_block_without_check(block)
    }

    /// Accept `block` without validation (trusted: genesis and local
    /// production). Callers hold the acceptance guard.
    fn push_block_without_check(&self, block: Block) -> Result<(), ChainError> {
        let height = self.inner.runtime.height_from_time(block.timestamp());
        debug!(
            hash = %short_hex(&block.hash()),
            height,
            parent = %short_hex(&block.parent_hash()),
            txs = block.transactions.len(),
            "pushing block"
        );

        let parent = {
            let index = self.inner.index.read();
            match index.lookup(&block.parent_hash()) {
                Some(node) => Some(node),
                None if block.is_genesis() => None,
                None => return Err(ChainError::ParentNotFound),
            }
        };
        let node = BlockNode::new(
            self.inner.runtime.chain_init_time(),
            self.inner.runtime.period(),
            block.clone(),
            parent.as_ref(),
        );
        let state = HeadState {
            head: node.hash,
            height: node.height,
        };

        let enc_block = encode(&block)?;
        let enc_state = encode(&state)?;

        let mut meta = self.inner.meta.write();
        let snapshot = meta.snapshot_full();
        let result = self.inner.store.update::<ChainError, _>(|batch| {
            batch.put(Bucket::Blocks, node.index_key(), enc_block);
            for tx in &block.transactions {
                meta.apply_transaction(tx, batch)?;
            }
            meta.partial_commit(&block.transactions, batch)?;
            batch.put(Bucket::Meta, HEAD_STATE_KEY.to_vec(), enc_state);
            Ok(())
        });
        if let Err(err) = result {
            meta.restore_full(snapshot);
            return Err(err);
        }
        drop(meta);

        self.inner.index.write().add(Arc::clone(&node))?;
        self.inner.runtime.set_head(Head {
            state,
            node: Arc::clone(&node),
        });

        self.archive_block(&block, state.height);
        self.inner.bus.publish(&ChainEvent::BlockAccepted {
            height: state.height,
            hash: state.head,
        });
        Ok(())
    }

    /// Best-effort archive write; the archive is derivative, failures are
    /// logged and do not affect acceptance.
    fn archive_block(&self, block: &Block, height: u32) {
        let pool = self.inner.meta.read().pool_snapshot();
        let encoded = match encode(block) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode block for the archive");
                return;
            }
        };
        let mut archive = self.inner.archive.lock();
        let result = archive
            .record_block(height, &block.hash(), &block.parent_hash(), &encoded)
            .and_then(|()| archive.record_pool_snapshot(&pool));
        if let Err(err) = result {
            warn!(error = %err, height, "archive write failed");
        }
    }

    // ------------------------------------------------------------------
    // Production
    // ------------------------------------------------------------------

    /// Produce and accept the block of the current turn, then advise every
    /// other producer in parallel.
    pub fn produce_block(&self, now: i64) -> Result<(), ChainError> {
        let block = {
            let _guard = self.inner.accept.lock();
            let head = self.inner.runtime.head();
            let transactions = self.inner.meta.read().pull_txs();

            let mut block = Block {
                signed_header: SignedBlockHeader {
                    header: BlockHeader {
                        version: BLOCK_VERSION,
                        producer: self.inner.address,
                        parent_hash: head.state.head,
                        timestamp: now,
                        merkle_root: [0u8; 32],
                    },
                    hash: [0u8; 32],
                    signee: [0u8; 32],
                    signature: [0u8; 64],
                },
                transactions,
            };
            block.pack_and_sign(&self.inner.keypair);

            info!(
                hash = %short_hex(&block.hash()),
                height = self.inner.runtime.height_from_time(now),
                txs = block.transactions.len(),
                "produced new block"
            );
            self.push_block_without_check(block.clone())?;
            block
        };

        let origin = self.inner.runtime.node_id();
        for producer in self.inner.runtime.producers() {
            if producer.node_id == origin {
                continue;
            }
            let caller = Arc::clone(&self.inner.caller);
            let target = producer.node_id;
            let block = block.clone();
            tokio::spawn(async move {
                let req = AdviseNewBlockReq {
                    envelope: Envelope::new(origin),
                    block,
                };
                match caller.advise_new_block(target, req).await {
                    Ok(_) => debug!(peer = %target.short_hex(), "advised new block"),
                    Err(err) => warn!(
                        peer = %target.short_hex(),
                        error = %err,
                        "failed to advise new block"
                    ),
                }
            });
        }
        Ok(())
    }

    /// Settle a billing request: verify the miner signatures, countersign,
    /// turn the gas amounts into a billing transaction at the constant gas
    /// price, and enqueue it for the next block.
    pub fn produce_billing(
        &self,
        mut request: BillingRequest,
    ) -> Result<BillingRequest, ChainError> {
        request.verify_signatures()?;

        let receivers: Vec<Address> = request.gas_amounts.iter().map(|g| g.address).collect();
        let fees: Vec<u64> = request
            .gas_amounts
            .iter()
            .map(|g| g.gas * GAS_PRICE)
            .collect();
        let rewards = vec![0u64; receivers.len()];

        request.sign_by(&self.inner.keypair);

        let nonce = self.inner.meta.read().next_nonce(&self.inner.address);
        let tx = Transaction::sign(
            TransactionPayload::Billing(BillingPayload {
                sender: self.inner.address,
                nonce,
                receivers,
                fees,
                rewards,
            }),
            &self.inner.keypair,
        );
        debug!(
            request = %short_hex(&request.hash()),
            tx = %short_hex(&tx.hash()),
            "generated billing transaction"
        );

        self.inner
            .txs_tx
            .send(tx)
            .map_err(|_| ChainError::Rpc("pending channel closed".into()))?;
        Ok(request)
    }

    /// Submit a client transaction through the replicated log; it surfaces
    /// on the pending channel once the entry is applied.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<u64, ChainError> {
        let payload = encode(&tx)?;
        self.inner.log.propose(payload).await
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The block at wall-clock `height`, read back from the store, plus its
    /// chain depth.
    pub fn fetch_block_by_height(&self, height: u32) -> Result<(Block, u32), ChainError> {
        let head = self.inner.runtime.head();
        let node = head
            .node
            .ancestor_by_height(height)
            .ok_or(ChainError::NoSuchBlock)?;
        let bytes = self
            .inner
            .store
            .get(Bucket::Blocks, &node.index_key())
            .ok_or(ChainError::NoSuchBlock)?;
        Ok((decode(&bytes)?, node.count))
    }

    /// The block at chain depth `count`, plus its wall-clock height.
    pub fn fetch_block_by_count(&self, count: u32) -> Result<(Block, u32), ChainError> {
        let head = self.inner.runtime.head();
        let node = head
            .node
            .ancestor_by_count(count)
            .ok_or(ChainError::NoSuchBlock)?;
        let bytes = self
            .inner
            .store
            .get(Bucket::Blocks, &node.index_key())
            .ok_or(ChainError::NoSuchBlock)?;
        Ok((decode(&bytes)?, node.height))
    }

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    /// Catch up to `height(now) - 1`, fetching each missing height from the
    /// peers in turn. A height no peer supplies is logged and skipped; it
    /// becomes a permanent gap only if no peer ever supplies it.
    pub async fn sync(&self) -> Result<(), ChainError> {
        debug!(
            node = %self.inner.runtime.node_id().short_hex(),
            "synchronizing chain state"
        );
        loop {
            let now = self.inner.runtime.now();
            let height = self.inner.runtime.height_from_time(now);
            if self.inner.runtime.next_turn() >= height {
                break;
            }
            while self.inner.runtime.next_turn() < height {
                let missing = self.inner.runtime.next_turn();
                match self.fetch_from_peers(missing).await {
                    Some(block) => {
                        if let Err(err) = self.push_block(block) {
                            debug!(
                                height = missing,
                                error = %err,
                                code = err.code(),
                                "failed to push fetched block"
                            );
                        }
                    }
                    None => debug!(height = missing, "no peer supplied block"),
                }
                self.inner.runtime.set_next_turn();
            }
        }
        Ok(())
    }

    /// Ask each peer in turn for the block at `height`; first answer wins.
    async fn fetch_from_peers(&self, height: u32) -> Option<Block> {
        let origin = self.inner.runtime.node_id();
        for producer in self.inner.runtime.producers() {
            if producer.node_id == origin {
                continue;
            }
            let req = FetchBlockReq {
                envelope: Envelope::new(origin),
                height,
            };
            match self.inner.caller.fetch_block(producer.node_id, req).await {
                Ok(FetchBlockResp { block: Some(block) }) => {
                    debug!(
                        peer = %producer.node_id.short_hex(),
                        height,
                        "fetched block from peer"
                    );
                    return Some(block);
                }
                Ok(FetchBlockResp { block: None }) => {
                    debug!(peer = %producer.node_id.short_hex(), height, "peer has no block");
                }
                Err(err) => {
                    debug!(
                        peer = %producer.node_id.short_hex(),
                        height,
                        error = %err,
                        "failed to fetch block from peer"
                    );
                }
            }
        }
        None
    }

    /// If the head trails the last processed turn, try to fetch the missing
    /// block and feed it through the normal acceptance path.
    async fn sync_head(&self) {
        let wanted = self.inner.runtime.next_turn().saturating_sub(1);
        if self.inner.runtime.head().state.height >= wanted {
            return;
        }
        debug!(height = wanted, "syncing head");
        if let Some(block) = self.fetch_from_peers(wanted).await {
            let _ = self.inner.blocks_tx.send(block);
        }
    }

    // ------------------------------------------------------------------
    // Long-lived tasks
    // ------------------------------------------------------------------

    /// Consume blocks arriving over RPC: stash ones from the future, accept
    /// the one matching the last processed turn, record stale ones as fork
    /// candidates, and re-feed the stash after every processed block.
    async fn process_blocks(&self, mut shutdown: watch::Receiver<bool>) {
        let mut rx = self
            .inner
            .blocks_rx
            .lock()
            .take()
            .expect("process_blocks runs once");
        let mut stash: Vec<Block> = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = rx.recv() => {
                    let Some(block) = received else { break };
                    let height = self.inner.runtime.height_from_time(block.timestamp());
                    let next_turn = self.inner.runtime.next_turn();

                    if i64::from(height) > i64::from(next_turn) - 1 {
                        debug!(height, next_turn, "stashing block from the future");
                        stash.push(block);
                        continue;
                    }

                    if i64::from(height) < i64::from(next_turn) - 1 {
                        debug!(
                            height,
                            next_turn,
                            hash = %short_hex(&block.hash()),
                            "recording fork candidate"
                        );
                        self.inner.fork_candidates.lock().push(block);
                    } else if let Err(err) = self.push_block(block) {
                        debug!(
                            height,
                            error = %err,
                            code = err.code(),
                            "failed to push advised block"
                        );
                    }

                    if !stash.is_empty() {
                        let drained = std::mem::take(&mut stash);
                        let blocks_tx = self.inner.blocks_tx.clone();
                        let sub_shutdown = self.inner.runtime.shutdown_signal();
                        tokio::spawn(async move {
                            for block in drained {
                                if *sub_shutdown.borrow() || blocks_tx.send(block).is_err() {
                                    break;
                                }
                            }
                        });
                    }
                }
            }
        }
    }

    /// Publish pending transactions onto the bus; the persistence subscriber
    /// stages each in its own store batch.
    async fn process_txs(&self, mut shutdown: watch::Receiver<bool>) {
        let mut rx = self
            .inner
            .txs_rx
            .lock()
            .take()
            .expect("process_txs runs once");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = rx.recv() => {
                    let Some(tx) = received else { break };
                    self.inner.bus.publish(&ChainEvent::TransactionReceived(tx));
                }
            }
        }
    }

    /// The periodic tick: keep the head synced, sleep until the next turn
    /// boundary, run the turn when due.
    async fn main_cycle(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.sync_head().await;
            let (now, wait) = self.inner.runtime.next_tick();
            if wait > 0 {
                debug!(
                    next_turn = self.inner.runtime.next_turn(),
                    head_height = self.inner.runtime.head().state.height,
                    wait_ns = wait,
                    "main cycle sleeping"
                );
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(Duration::from_nanos(wait as u64)) => {}
                }
            } else {
                self.run_current_turn(now);
            }
        }
    }

    /// Run one turn: produce if this node is the leader, then advance the
    /// turn counter either way.
    fn run_current_turn(&self, now: i64) {
        info!(
            next_turn = self.inner.runtime.next_turn(),
            bp_num = self.inner.runtime.bp_num(),
            node_index = self.inner.runtime.index(),
            "checking turn"
        );
        if self.inner.runtime.is_my_turn() {
            info!(height = self.inner.runtime.next_turn(), "producing a new block");
            if let Err(err) = self.produce_block(now) {
                error!(error = %err, code = err.code(), "failed to produce block");
            }
        }
        self.inner.runtime.set_next_turn();
    }
}

#[async_trait]
impl ChainRpc for Chain {
    async fn advise_new_block(
        &self,
        req: AdviseNewBlockReq,
    ) -> Result<AdviseNewBlockResp, ChainError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if req.envelope.is_expired(now) {
            debug!(
                origin = %req.envelope.origin.short_hex(),
                "dropping expired advise"
            );
            return Ok(AdviseNewBlockResp {});
        }
        self.inner
            .blocks_tx
            .send(req.block)
            .map_err(|_| ChainError::Rpc("chain stopped".into()))?;
        Ok(AdviseNewBlockResp {})
    }

    async fn fetch_block(&self, req: FetchBlockReq) -> Result<FetchBlockResp, ChainError> {
        let (block, _count) = self.fetch_block_by_height(req.height)?;
        Ok(FetchBlockResp { block: Some(block) })
    }
}
