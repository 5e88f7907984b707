//! End-to-end scenarios over real stores and the loopback transport.

use crate::cluster::{now_ns, slot_time, wait_until, TestCluster};
use accord_chain::{AdviseNewBlockReq, Allocation, ChainRpc};
use shared_crypto::NodeKeyPair;
use shared_types::{
    Block, BlockHeader, Envelope, SignedBlockHeader, TokenKind, Transaction, TransactionPayload,
    TransferPayload, BLOCK_VERSION,
};
use std::time::Duration;

fn transfer(keypair: &NodeKeyPair, nonce: u64, receiver: [u8; 32], amount: u64) -> Transaction {
    Transaction::sign(
        TransactionPayload::Transfer(TransferPayload {
            sender: keypair.address(),
            nonce,
            receiver,
            token: TokenKind::Native,
            amount,
        }),
        keypair,
    )
}

#[tokio::test]
async fn test_genesis_boot_and_restart_reproduce_history() {
    let period = Duration::from_secs(60);
    let cluster = TestCluster::new(1, 0, period, Vec::new());
    let chain = cluster.chains[0].clone();

    assert_eq!(chain.head_state().height, 0);

    // Three produced blocks, then a restart from the same files.
    for height in 1..=3u32 {
        chain.produce_block(slot_time(0, period, height)).unwrap();
    }
    let head = chain.head_state();
    assert_eq!(head.height, 3);
    let originals: Vec<Block> = (0..=3u32)
        .map(|h| chain.fetch_block_by_height(h).unwrap().0)
        .collect();

    drop(chain);
    let reopened = cluster.open_node(0);

    assert_eq!(reopened.head_state(), head);
    for (h, original) in originals.iter().enumerate() {
        let (loaded, _) = reopened.fetch_block_by_height(h as u32).unwrap();
        assert_eq!(&loaded, original, "block at height {h} changed across restart");
        assert_eq!(loaded.hash(), original.hash());
    }

    // Walking parents from the head reaches genesis in `count` steps.
    let mut parent = reopened.fetch_block_by_height(3).unwrap().0.parent_hash();
    let mut steps: u32 = 1;
    while parent != [0u8; 32] {
        let (block, _) = reopened.fetch_block_by_count(3 - steps).unwrap();
        assert_eq!(block.hash(), parent);
        parent = block.parent_hash();
        steps += 1;
    }
    assert_eq!(steps, 4);
}

#[tokio::test]
async fn test_single_producer_settles_transfers_on_schedule() {
    let period = Duration::from_millis(300);
    let receiver = [9u8; 32];
    let cluster = TestCluster::new(1, now_ns(), period, Vec::new());
    let chain = cluster.chains[0].clone();
    let sender = NodeKeyPair::from_seed(cluster.keys[0].to_seed());

    chain.start().await.unwrap();

    chain
        .submit_transaction(transfer(&sender, 1, receiver, 10))
        .await
        .unwrap();
    chain
        .submit_transaction(transfer(&sender, 2, receiver, 10))
        .await
        .unwrap();

    let reached = {
        let chain = chain.clone();
        wait_until(Duration::from_secs(15), move || {
            chain.head_state().height >= 2 && chain.pending_len() == 0
        })
        .await
    };
    assert!(reached, "head never reached height 2");

    let account = chain.committed_account(&sender.address()).unwrap();
    assert_eq!(account.balance(TokenKind::Native), 980);
    assert_eq!(account.nonce, 2);
    assert_eq!(
        chain
            .committed_account(&receiver)
            .unwrap()
            .balance(TokenKind::Native),
        20
    );

    chain.stop().await;
}

#[tokio::test]
async fn test_advised_blocks_follow_the_leader_rotation() {
    let period = Duration::from_millis(300);
    let cluster = TestCluster::new(2, now_ns(), period, Vec::new());
    let (alpha, beta) = (cluster.chains[0].clone(), cluster.chains[1].clone());

    alpha.start().await.unwrap();
    beta.start().await.unwrap();

    let reached = {
        let (alpha, beta) = (alpha.clone(), beta.clone());
        wait_until(Duration::from_secs(20), move || {
            alpha.head_state().height >= 4 && beta.head_state().height >= 4
        })
        .await
    };
    assert!(reached, "cluster never reached height 4");

    alpha.stop().await;
    beta.stop().await;

    // Both nodes agree on every height they share, and every accepted
    // block was produced by the leader of its slot.
    let common = alpha.head_state().height.min(beta.head_state().height);
    let mut found = 0;
    for height in 1..=common {
        let Ok((from_alpha, _)) = alpha.fetch_block_by_height(height) else {
            continue;
        };
        let (from_beta, _) = beta
            .fetch_block_by_height(height)
            .expect("peer accepted a block the producer has");
        assert_eq!(from_alpha.hash(), from_beta.hash());
        assert_eq!(
            from_alpha.producer(),
            alpha.runtime().leader_of(height).address,
            "height {height} produced out of turn"
        );
        found += 1;
    }
    assert!(found >= 2, "expected at least two shared blocks, saw {found}");
}

#[tokio::test]
async fn test_cut_off_peer_catches_up_via_fetch_and_stash() {
    let period = Duration::from_millis(400);
    let cluster = TestCluster::new(2, now_ns(), period, Vec::new());
    let (alpha, beta) = (cluster.chains[0].clone(), cluster.chains[1].clone());
    let beta_id = cluster.config_of(1).node_id;

    alpha.start().await.unwrap();
    beta.start().await.unwrap();

    let warmed = {
        let alpha = alpha.clone();
        wait_until(Duration::from_secs(10), move || {
            alpha.head_state().height >= 1
        })
        .await
    };
    assert!(warmed);

    // Beta misses the advises of roughly one slot, then comes back.
    cluster.router.unregister(&beta_id);
    tokio::time::sleep(period).await;
    cluster
        .router
        .register(beta_id, std::sync::Arc::new(beta.clone()) as std::sync::Arc<dyn ChainRpc>);

    let caught_up = {
        let (alpha, beta) = (alpha.clone(), beta.clone());
        wait_until(Duration::from_secs(20), move || {
            let a = alpha.head_state();
            let b = beta.head_state();
            b.height >= 4 && a.height.abs_diff(b.height) <= 1
        })
        .await
    };
    assert!(caught_up, "beta never caught back up");

    alpha.stop().await;
    beta.stop().await;

    let common = alpha.head_state().height.min(beta.head_state().height);
    let (from_alpha, _) = alpha.fetch_block_by_height(common).unwrap();
    let (from_beta, _) = beta.fetch_block_by_height(common).unwrap();
    assert_eq!(from_alpha.hash(), from_beta.hash());
}

#[tokio::test]
async fn test_late_node_syncs_history_through_validation() {
    let period = Duration::from_millis(500);
    // The schedule started ten slots ago; two of the three producers have
    // been filling their slots, the third boots late.
    let init = now_ns() - 10 * period.as_nanos() as i64;
    let cluster = TestCluster::new(3, init, period, Vec::new());
    let (alpha, beta, gamma) = (
        cluster.chains[0].clone(),
        cluster.chains[1].clone(),
        cluster.chains[2].clone(),
    );

    // Drive alpha and beta in lockstep over their own slots; gamma's slots
    // (heights 2, 5, 8) stay empty.
    for height in 1..=9u32 {
        let leader_index = (height % 3) as usize;
        if leader_index == 2 {
            continue;
        }
        let leader = if leader_index == 0 { &alpha } else { &beta };
        let follower = if leader_index == 0 { &beta } else { &alpha };

        leader
            .produce_block(slot_time(init, period, height))
            .unwrap();
        let (block, _) = leader.fetch_block_by_height(height).unwrap();
        follower.push_block(block).unwrap();
    }
    assert_eq!(alpha.head_state(), beta.head_state());
    assert_eq!(alpha.head_state().height, 9);

    // Gamma still sits at genesis and catches up purely by fetching.
    assert_eq!(gamma.head_state().height, 0);
    gamma.sync().await.unwrap();

    assert_eq!(gamma.head_state(), alpha.head_state());
    for height in [1u32, 3, 4, 6, 7, 9] {
        let (block, _) = gamma.fetch_block_by_height(height).unwrap();
        assert!(block.verify().is_ok());
    }
    for height in [2u32, 5, 8] {
        assert!(gamma.fetch_block_by_height(height).is_err());
    }
}

#[tokio::test]
async fn test_tampered_advise_leaves_state_untouched() {
    let settle = Duration::from_millis(300);
    let extra = vec![Allocation {
        address: [9u8; 32],
        token: TokenKind::Native,
        amount: 5,
    }];
    // A long genesis-anchored idle window: production stays out of the way.
    let cluster = TestCluster::new(1, now_ns(), Duration::from_secs(3600), extra);
    let chain = cluster.chains[0].clone();
    let signer = NodeKeyPair::from_seed(cluster.keys[0].to_seed());
    chain.start().await.unwrap();

    let head = chain.head_state();

    // A correctly signed block whose transaction list is falsified after
    // sealing: the declared Merkle root no longer covers it.
    let mut block = Block {
        signed_header: SignedBlockHeader {
            header: BlockHeader {
                version: BLOCK_VERSION,
                producer: signer.address(),
                parent_hash: head.head,
                timestamp: now_ns(),
                merkle_root: [0u8; 32],
            },
            hash: [0u8; 32],
            signee: [0u8; 32],
            signature: [0u8; 64],
        },
        transactions: Vec::new(),
    };
    block.pack_and_sign(&signer);
    block
        .transactions
        .push(transfer(&signer, 1, [9u8; 32], 10));

    chain
        .advise_new_block(AdviseNewBlockReq {
            envelope: Envelope::new(cluster.config_of(0).node_id),
            block,
        })
        .await
        .unwrap();

    // Give the block loop time to process and reject it.
    tokio::time::sleep(settle).await;
    assert_eq!(chain.head_state(), head);
    assert_eq!(chain.pending_len(), 0);
    let (genesis, _) = chain.fetch_block_by_height(0).unwrap();
    assert_eq!(genesis.hash(), head.head);

    chain.stop().await;
}
