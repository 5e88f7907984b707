//! # Runtime
//!
//! Wall-clock scheduling and task supervision for one node: the
//! clock-to-height mapping, turn ownership under the leader rotation, the
//! current head, and the background tasks with their shared shutdown signal.

use crate::block_index::{height_from_time, BlockNode};
use crate::config::{BlockProducer, ChainConfig};
use shared_types::{ChainError, HeadState, NodeId};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// The current head: the persisted pointer plus the in-memory node it names.
#[derive(Clone)]
pub struct Head {
    /// Persisted head pointer.
    pub state: HeadState,
    /// The indexed node of the head block.
    pub node: Arc<BlockNode>,
}

/// Scheduling state and task supervision.
pub struct Runtime {
    chain_init_time: i64,
    period: Duration,
    tick: Duration,
    bp_num: u32,
    index: u32,
    node_id: NodeId,
    producers: Vec<BlockProducer>,
    head: RwLock<Option<Head>>,
    next_turn: AtomicU32,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    /// Build the runtime from the chain configuration.
    pub fn new(config: &ChainConfig) -> Result<Self, ChainError> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            chain_init_time: config.chain_init_time(),
            period: config.period,
            tick: config.tick,
            bp_num: config.bp_num(),
            index: config.index()?,
            node_id: config.node_id,
            producers: config.producers.clone(),
            head: RwLock::new(None),
            next_turn: AtomicU32::new(1),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    /// Wall-clock reading, nanoseconds since the Unix epoch.
    pub fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }

    /// The height slot a timestamp falls into.
    pub fn height_from_time(&self, timestamp: i64) -> u32 {
        height_from_time(self.chain_init_time, self.period, timestamp)
    }

    /// The chain init time the schedule is anchored to.
    pub fn chain_init_time(&self) -> i64 {
        self.chain_init_time
    }

    /// The slot period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Time of the next tick decision.
    ///
    /// Returns the current reading and the nanoseconds to sleep until the
    /// slot of `next_turn` starts, capped at one tick. Non-positive means
    /// the turn is due now.
    pub fn next_tick(&self) -> (i64, i64) {
        let now = self.now();
        let target = self.chain_init_time
            + i64::from(self.next_turn()) * self.period.as_nanos() as i64;
        let until_turn = target - now;
        (now, until_turn.min(self.tick.as_nanos() as i64))
    }

    // ------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------

    /// One past the last height this node has processed.
    pub fn next_turn(&self) -> u32 {
        self.next_turn.load(Ordering::SeqCst)
    }

    /// Advance to the next turn.
    pub fn set_next_turn(&self) {
        self.next_turn.fetch_add(1, Ordering::SeqCst);
    }

    /// Reset the turn counter to one past the head height (startup).
    pub fn reset_next_turn(&self) {
        let height = self.head().state.height;
        self.next_turn.store(height + 1, Ordering::SeqCst);
    }

    /// True iff this node is the leader of the `next_turn` slot.
    pub fn is_my_turn(&self) -> bool {
        self.next_turn() % self.bp_num == self.index
    }

    /// The producer assigned to `height` by the rotation.
    pub fn leader_of(&self, height: u32) -> &BlockProducer {
        &self.producers[(height % self.bp_num) as usize]
    }

    /// Producer count.
    pub fn bp_num(&self) -> u32 {
        self.bp_num
    }

    /// This node's index in the rotation.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// This node's network identity.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The full producer rotation.
    pub fn producers(&self) -> &[BlockProducer] {
        &self.producers
    }

    // ------------------------------------------------------------------
    // Head
    // ------------------------------------------------------------------

    /// The current head. Compound reads of `{hash, height}` never tear.
    ///
    /// # Panics
    ///
    /// Panics if called before the genesis push set a head; that is an
    /// initialization-order violation, not a runtime condition.
    pub fn head(&self) -> Head {
        self.head
            .read()
            .clone()
            .expect("head is set when the genesis block is pushed")
    }

    /// Replace the head. Called only from the serialized acceptance path.
    pub fn set_head(&self, head: Head) {
        *self.head.write() = Some(head);
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// A receiver of the shared shutdown signal.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Register a supervised background task.
    pub fn spawn(&self, task: JoinHandle<()>) {
        self.tasks.lock().push(task);
    }

    /// Signal shutdown and await every supervised task.
    pub async fn stop(&self) {
        debug!(node = %self.node_id.short_hex(), "stopping runtime");
        let _ = self.shutdown.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }
}
