//! Normal-path rounds across a four-validator network

mod common;

use chain_consensus::{ChangeViewReason, MessageBody, MessageType};
use common::{body, is_type, Harness, BLOCK_MS};

#[test]
fn test_four_validators_agree_on_block() {
    let mut h = Harness::new(4);
    let tx = h.net.signed_transfer(0, 10, 3);
    h.add_transaction(&tx);
    h.start_all();

    assert!(h.run_until_height(1, 20));
    let tip = h.net.ledger.tip();
    assert_eq!(tip.index, 1);

    let block = h.relayed[0].clone();
    assert_eq!(block.hash(), tip.hash());
    // reward first, paying exactly the fee
    assert!(block.transactions[0].is_reward());
    assert_eq!(block.transactions[0].amount, 3);
    assert_eq!(block.transactions[1], tx);
    // primary of height 1, view 0 is validator 1
    assert_eq!(h.sent_by(1, MessageType::PrepareRequest).len(), 1);
    for i in [0, 2, 3] {
        assert!(h.sent_by(i, MessageType::PrepareRequest).is_empty());
        assert_eq!(h.sent_by(i, MessageType::PrepareResponse).len(), 1);
    }
    for i in 0..4 {
        assert_eq!(h.service(i).context().block_index(), 2);
        assert!(h.nodes[i].mempool.is_empty());
    }
}

#[test]
fn test_consecutive_heights_rotate_primary() {
    let mut h = Harness::new(4);
    h.start_all();
    assert!(h.run_until_height(3, 40));

    for height in 1..=3u32 {
        let primary = (height as usize) % 4;
        let proposals: Vec<_> = h
            .sent_by(primary, MessageType::PrepareRequest)
            .into_iter()
            .filter(|p| p.block_index == height)
            .collect();
        assert_eq!(proposals.len(), 1, "height {height}");
    }
    // every view stayed at 0
    assert!(h
        .sent
        .iter()
        .all(|(_, payload)| !is_type(payload, MessageType::ChangeView)));
}

#[test]
fn test_missing_transaction_is_requested() {
    let mut h = Harness::new(4);
    let tx = h.net.signed_transfer(1, 10, 2);
    // only the primary has it
    h.nodes[1].mempool.add_verified(tx.clone());
    h.start_all();
    h.deliver();

    assert_eq!(h.height(), 0);
    for i in [0, 2, 3] {
        assert_eq!(h.nodes[i].transport.requested(), vec![vec![tx.hash()]]);
        assert!(!h.service(i).context().response_sent());
    }

    for i in [0, 2, 3] {
        h.nodes[i].service.on_transaction_received(tx.clone());
    }
    h.deliver();
    assert_eq!(h.height(), 1);
    assert_eq!(h.relayed[0].transactions[1], tx);
}

#[test]
fn test_unrequested_transaction_is_ignored() {
    let mut h = Harness::new(4);
    let stray = h.net.signed_transfer(2, 1, 1);
    h.start_all();
    h.deliver();
    // block 1 is done; height 2 has no proposal yet
    assert_eq!(h.height(), 1);
    h.nodes[0].service.on_transaction_received(stray);
    assert!(h.service(0).context().proposal().is_none());
}

#[test]
fn test_policy_rejection_asks_for_change_view() {
    let mut h = Harness::new(4);
    let tx = h.net.signed_transfer(0, 10, 1);
    h.add_transaction(&tx);
    h.nodes[0].policy.deny(tx.hash());
    h.start_all();
    h.deliver();

    let change_views = h.sent_by(0, MessageType::ChangeView);
    assert_eq!(change_views.len(), 1);
    match body(&change_views[0]) {
        MessageBody::ChangeView(cv) => assert_eq!(cv.reason, ChangeViewReason::TxRejectedByPolicy),
        other => panic!("unexpected body {other:?}"),
    }
    assert!(h.sent_by(0, MessageType::PrepareResponse).is_empty());
    // the other three are still a quorum
    assert_eq!(h.height(), 1);
    assert_eq!(h.relayed[0].transactions[1], tx);
}

#[test]
fn test_two_commits_do_not_make_a_block() {
    let mut h = Harness::new(4);
    h.start_all();
    // only validator 0's commit gets through
    h.deliver_filtered(|from, _, payload| from == 0 || !is_type(payload, MessageType::Commit));

    assert!(h.relayed.is_empty());
    assert_eq!(h.height(), 0);
    for i in 0..4 {
        assert!(h.service(i).context().commit_sent());
        assert!(h.service(i).context().commits().count() <= 2);
    }
}

#[test]
fn test_block_after_quiet_timeout() {
    let mut h = Harness::new(4);
    h.start_all();
    assert!(h.run_until_height(1, 10));

    // at height 2 nobody sends a recovery request, so the primary waits a
    // full block time
    h.deliver();
    assert_eq!(h.height(), 1);
    h.advance(BLOCK_MS - 1);
    h.deliver();
    assert_eq!(h.height(), 1);
    h.advance(1);
    h.deliver();
    assert_eq!(h.height(), 2);
    // reward only
    assert_eq!(h.relayed.last().map(|b| b.transactions.len()), Some(1));
}
