//! Catching up from peers' recovery messages

mod common;

use chain_consensus::persistence::encode_context;
use chain_consensus::{MessageBody, MessageType};
use common::{body, is_type, Harness, BLOCK_MS};

const LAGGING: usize = 3;

/// Validators 0-2 commit while validator 3 hears nothing and no commit is
/// delivered anywhere
fn lagging_network() -> Harness {
    let mut h = Harness::new(4);
    h.start_all();
    h.deliver_filtered(|_, to, p| to != LAGGING && !is_type(p, MessageType::Commit));
    for i in 0..3 {
        assert!(h.service(i).context().commit_sent());
    }
    assert!(h.service(LAGGING).context().proposal().is_none());
    h
}

#[test]
fn test_recovery_message_carries_the_round() -> anyhow::Result<()> {
    let h = lagging_network();
    let payload = h
        .service(0)
        .context()
        .make_recovery_message(&h.wallet(0))?;
    let MessageBody::RecoveryMessage(message) = body(&payload) else {
        panic!("not a recovery message");
    };
    assert!(message.prepare_request.is_some());
    assert!(message.preparation_hash.is_none());
    assert_eq!(message.preparations.len(), 3);
    // validator 0 only knows its own commit
    assert_eq!(message.commits.len(), 1);
    assert_eq!(message.commits[0].validator_index, 0);
    assert!(message.change_views.is_empty());
    Ok(())
}

#[test]
fn test_lagging_validator_catches_up() -> anyhow::Result<()> {
    let mut h = lagging_network();
    let recovery = h
        .service(0)
        .context()
        .make_recovery_message(&h.wallet(0))?;

    h.send_to(LAGGING, recovery);
    let context = h.service(LAGGING).context();
    assert!(context.request_sent_or_received());
    assert!(context.response_sent());
    assert!(context.commit_sent());
    // its own commit plus validator 0's
    assert_eq!(context.commits().count(), 2);
    assert_eq!(
        context.proposal().map(|p| p.transaction_hashes().to_vec()),
        h.service(0)
            .context()
            .proposal()
            .map(|p| p.transaction_hashes().to_vec())
    );
    Ok(())
}

#[test]
fn test_recovery_message_applies_once() -> anyhow::Result<()> {
    let mut h = lagging_network();
    let recovery = h
        .service(0)
        .context()
        .make_recovery_message(&h.wallet(0))?;

    h.send_to(LAGGING, recovery.clone());
    let state = encode_context(h.service(LAGGING).context());
    h.nodes[LAGGING].transport.take_broadcasts();

    h.send_to(LAGGING, recovery);
    assert_eq!(encode_context(h.service(LAGGING).context()), state);
    assert!(h.nodes[LAGGING].transport.take_broadcasts().is_empty());
    Ok(())
}

#[test]
fn test_commit_timeouts_finish_the_height() {
    let mut h = lagging_network();
    // committed validators rebroadcast their state on timeout
    h.advance(BLOCK_MS);
    h.deliver();
    assert_eq!(h.height(), 1);
    let block = &h.relayed[0];
    assert_eq!(block.hash(), h.net.ledger.tip().hash());
    assert!(!h.sent_by(0, MessageType::RecoveryMessage).is_empty());
}

#[test]
fn test_recovery_request_answered_once() {
    let mut h = Harness::new(4);
    h.start_all();
    let request = h.nodes[2].transport.take_broadcasts().remove(0);
    assert!(is_type(&request, MessageType::RecoveryRequest));
    for i in 0..4 {
        h.nodes[i].transport.take_broadcasts();
    }

    // validator 3 follows validator 2 and is the one to answer
    h.send_to(3, request.clone());
    h.send_to(3, request.clone());
    let answers = h.nodes[3].transport.take_broadcasts();
    assert_eq!(answers.len(), 1);
    assert!(is_type(&answers[0], MessageType::RecoveryMessage));

    h.send_to(0, request);
    assert!(h.nodes[0].transport.take_broadcasts().is_empty());
}
