//! Multi-node test harness: chains in temp directories wired over the
//! loopback router.

use accord_chain::{
    Allocation, BlockProducer, Chain, ChainConfig, ChainRpc, GenesisConfig, LoopbackRouter,
};
use shared_crypto::NodeKeyPair;
use shared_types::{NodeId, TokenKind};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

/// Wall-clock reading in the chain's nanosecond representation.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// The timestamp of slot `height` on a schedule anchored at `init`.
pub fn slot_time(init: i64, period: Duration, height: u32) -> i64 {
    init + i64::from(height) * period.as_nanos() as i64
}

/// A cluster of producer nodes sharing one rotation and router.
pub struct TestCluster {
    /// The in-memory peer transport.
    pub router: Arc<LoopbackRouter>,
    /// One chain per producer, index-aligned with the rotation.
    pub chains: Vec<Chain>,
    /// The signing keys, index-aligned with the rotation.
    pub keys: Vec<NodeKeyPair>,
    /// Shared configuration template (node-specific fields reset per node).
    template: ChainConfig,
    dir: TempDir,
}

impl TestCluster {
    /// Build an `n`-producer cluster anchored at `init`, funding each
    /// producer account with 1000 native tokens plus the given extra
    /// allocations.
    pub fn new(n: usize, init: i64, period: Duration, extra: Vec<Allocation>) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let keys: Vec<NodeKeyPair> = (0..n).map(|_| NodeKeyPair::generate()).collect();
        let producers: Vec<BlockProducer> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| BlockProducer {
                node_id: NodeId([i as u8 + 1; 32]),
                address: key.address(),
            })
            .collect();

        let mut allocations: Vec<Allocation> = keys
            .iter()
            .map(|key| Allocation {
                address: key.address(),
                token: TokenKind::Native,
                amount: 1_000,
            })
            .collect();
        allocations.extend(extra);

        let template = ChainConfig {
            data_file: dir.path().join("unset"),
            period,
            tick: Duration::from_millis(25),
            node_id: producers[0].node_id,
            producers,
            genesis: GenesisConfig {
                timestamp: init,
                allocations,
            },
        };

        let router = Arc::new(LoopbackRouter::new());
        let mut cluster = Self {
            router,
            chains: Vec::new(),
            keys,
            template,
            dir,
        };
        for i in 0..n {
            let chain = cluster.open_node(i);
            cluster.chains.push(chain);
        }
        cluster
    }

    /// Configuration of node `i`.
    pub fn config_of(&self, i: usize) -> ChainConfig {
        let mut config = self.template.clone();
        config.node_id = config.producers[i].node_id;
        config.data_file = self.dir.path().join(format!("node-{i}")).join("chain.db");
        config
    }

    /// Open (or re-open) node `i` and register it with the router.
    pub fn open_node(&self, i: usize) -> Chain {
        let config = self.config_of(i);
        let node_id = config.node_id;
        let keypair = NodeKeyPair::from_seed(self.keys[i].to_seed());
        let caller: Arc<dyn accord_chain::PeerCaller> = self.router.clone();
        let chain = Chain::new(config, keypair, caller).expect("chain opens");
        self.router
            .register(node_id, Arc::new(chain.clone()) as Arc<dyn ChainRpc>);
        chain
    }

    /// The data directory of the cluster.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Poll `predicate` until it holds or `timeout` passes; true on success.
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut predicate: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    predicate()
}
