//! View changes when the primary is silent

mod common;

use chain_consensus::{ChangeViewReason, MessageBody, MessageType};
use common::{body, is_type, Harness, BLOCK_MS};

#[test]
fn test_dead_primary_is_replaced() {
    let mut h = Harness::new(4);
    // validator 1 is the view 0 primary for height 1 and never comes up
    for i in [0, 2, 3] {
        h.start(i);
    }
    h.deliver();
    assert_eq!(h.height(), 0);
    assert!(h.sent_by(1, MessageType::PrepareRequest).is_empty());

    assert!(h.run_until_height(1, 20));
    let header = h.net.ledger.tip();
    assert_eq!(header.index, 1);

    for i in [0, 2, 3] {
        let change_views = h.sent_by(i, MessageType::ChangeView);
        assert_eq!(change_views.len(), 1);
        match body(&change_views[0]) {
            MessageBody::ChangeView(cv) => assert_eq!(cv.reason, ChangeViewReason::Timeout),
            other => panic!("unexpected body {other:?}"),
        }
    }
    // validator 0 is primary at view 1
    let proposals = h.sent_by(0, MessageType::PrepareRequest);
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].message().unwrap().view_number, 1);
    let commits: Vec<_> = h
        .sent
        .iter()
        .filter(|(_, p)| is_type(p, MessageType::Commit))
        .collect();
    assert!(commits
        .iter()
        .all(|(_, p)| p.message().unwrap().view_number == 1));
}

#[test]
fn test_backups_wait_two_block_times() {
    let mut h = Harness::new(4);
    for i in [0, 2, 3] {
        h.start(i);
    }
    h.deliver();
    h.advance(2 * BLOCK_MS - 1);
    h.deliver();
    assert!(h
        .sent
        .iter()
        .all(|(_, p)| !is_type(p, MessageType::ChangeView)));

    h.advance(1);
    h.deliver();
    for i in [0, 2, 3] {
        assert_eq!(h.service(i).context().view_number(), 1);
    }
    assert_eq!(h.service(0).timer_deadline(), Some(h.clock_now()));
    // the new backups back off for four block times at view 1
    assert_eq!(h.service(2).timer_deadline(), Some(h.clock_now() + 4 * BLOCK_MS));
}

#[test]
fn test_pending_change_view_still_accepts_proposal() {
    let mut h = Harness::new(4);
    h.start_all();
    // nothing from the primary gets out
    h.deliver_filtered(|from, _, _| from != 1);
    let request = h
        .dropped
        .iter()
        .find(|(from, to, p)| *from == 1 && *to == 0 && is_type(p, MessageType::PrepareRequest))
        .map(|(_, _, p)| p.clone())
        .expect("primary proposed");

    // validator 0 times out, but its change view goes nowhere
    h.advance(2 * BLOCK_MS);
    h.deliver_filtered(|from, _, p| from != 1 && !is_type(p, MessageType::ChangeView));
    let context = h.service(0).context();
    assert!(context.view_change_requested());
    assert_eq!(context.view_number(), 0);
    // only the primary is lost, which is not more than F
    assert_eq!(context.count_failed(), 1);
    assert!(!context.view_changing());

    h.send_to(0, request);
    let context = h.service(0).context();
    assert!(context.request_sent_or_received());
    assert!(context.response_sent());
}

#[test]
fn test_change_view_needs_quorum() {
    let mut h = Harness::new(4);
    // two validators down: one timeout is not enough to move
    h.start(0);
    h.start(2);
    h.deliver();
    h.advance(2 * BLOCK_MS);
    h.deliver();
    assert_eq!(h.service(0).context().view_number(), 0);
    assert_eq!(h.service(2).context().view_number(), 0);
    // with two of four lost the nodes ask for recovery instead
    assert!(h.sent_by(0, MessageType::ChangeView).is_empty());
    assert_eq!(h.sent_by(0, MessageType::RecoveryRequest).len(), 2);
}
