//! Recovery message construction and payload reconstruction
//!
//! A recovery message carries a validator's view of the round with every
//! signed payload stripped down to its body and invocation script. The
//! receiver rebuilds the original payloads (the verification script is
//! always the sender's single-signature script) and runs them through the
//! ordinary handlers, so each rebuilt payload is verified exactly like one
//! received directly.

use crate::context::RoundContext;
use crate::message::{
    ChangeView, ChangeViewCompact, Commit, CommitCompact, ConsensusMessage, MessageBody,
    PreparationCompact, PrepareResponse, RecoveryMessage,
};
use crate::payload::{ConsensusPayload, PAYLOAD_VERSION};
use crate::traits::Wallet;
use crate::validators::{ValidatorIndex, ViewNumber};
use crate::ConsensusResult;
use chain_core::script::signature_redeem_script;
use chain_core::{Encode, Hash, Witness};

impl RoundContext {
    /// Compact the local round state into a recovery message
    pub fn recovery_message(&self) -> RecoveryMessage {
        let change_views = self
            .last_change_views
            .iter()
            .filter_map(|(index, envelope)| match &envelope.message().body {
                MessageBody::ChangeView(cv) => Some(ChangeViewCompact {
                    validator_index: index,
                    original_view_number: envelope.view_number(),
                    timestamp: cv.timestamp,
                    reason: cv.reason,
                    invocation_script: envelope.payload().witness.invocation_script.clone(),
                }),
                _ => None,
            })
            .take(self.m())
            .collect();

        let prepare_request = self
            .proposal
            .as_ref()
            .and_then(|_| self.preparations.get(self.primary_index()))
            .and_then(|envelope| match &envelope.message().body {
                MessageBody::PrepareRequest(request) => Some(request.clone()),
                _ => None,
            });
        let preparation_hash = if prepare_request.is_some() {
            None
        } else {
            self.plurality_preparation_hash()
        };

        let preparations = self
            .preparations
            .iter()
            .map(|(index, envelope)| PreparationCompact {
                validator_index: index,
                invocation_script: envelope.payload().witness.invocation_script.clone(),
            })
            .collect();

        let commits = if self.commit_sent() {
            self.commits
                .iter()
                .filter_map(|(index, envelope)| match &envelope.message().body {
                    MessageBody::Commit(commit) => Some(CommitCompact {
                        view_number: envelope.view_number(),
                        validator_index: index,
                        signature: commit.signature,
                        invocation_script: envelope.payload().witness.invocation_script.clone(),
                    }),
                    _ => None,
                })
                .collect()
        } else {
            Vec::new()
        };

        RecoveryMessage {
            change_views,
            prepare_request,
            preparation_hash,
            preparations,
            commits,
        }
    }

    /// Most acknowledged preparation hash among held responses.
    /// Ties go to the hash seen first in validator order.
    fn plurality_preparation_hash(&self) -> Option<Hash> {
        let mut tally: Vec<(Hash, usize)> = Vec::new();
        for (_, envelope) in self.preparations.iter() {
            if let MessageBody::PrepareResponse(response) = &envelope.message().body {
                match tally.iter_mut().find(|(h, _)| *h == response.preparation_hash) {
                    Some((_, count)) => *count += 1,
                    None => tally.push((response.preparation_hash, 1)),
                }
            }
        }
        let best = tally.iter().map(|(_, count)| *count).max()?;
        tally
            .into_iter()
            .find(|(_, count)| *count == best)
            .map(|(hash, _)| hash)
    }

    /// Signed recovery message for the current view
    pub fn make_recovery_message(&self, wallet: &dyn Wallet) -> ConsensusResult<ConsensusPayload> {
        Ok(self
            .make_signed_payload(MessageBody::RecoveryMessage(self.recovery_message()), wallet)?
            .into_payload())
    }

    /// Rebuild a payload `index` signed for this height
    fn rebuild_payload(
        &self,
        index: ValidatorIndex,
        message: ConsensusMessage,
        invocation_script: &[u8],
    ) -> Option<ConsensusPayload> {
        let key = self.validators.get(index)?;
        Some(ConsensusPayload {
            version: PAYLOAD_VERSION,
            prev_hash: self.prev_hash,
            block_index: self.block_index,
            validator_index: index,
            data: message.to_bytes(),
            witness: Witness::new(invocation_script.to_vec(), signature_redeem_script(key)),
        })
    }
}

impl RecoveryMessage {
    /// Change views as originally signed
    pub fn change_view_payloads(&self, context: &RoundContext) -> Vec<ConsensusPayload> {
        self.change_views
            .iter()
            .filter_map(|cv| {
                let message = ConsensusMessage::new(
                    cv.original_view_number,
                    MessageBody::ChangeView(ChangeView {
                        timestamp: cv.timestamp,
                        reason: cv.reason,
                    }),
                );
                context.rebuild_payload(cv.validator_index, message, &cv.invocation_script)
            })
            .collect()
    }

    /// The primary's prepare request for `view`, if carried along with the
    /// primary's invocation script
    pub fn prepare_request_payload(
        &self,
        context: &RoundContext,
        view: ViewNumber,
    ) -> Option<ConsensusPayload> {
        let request = self.prepare_request.as_ref()?;
        let primary = context.validators.primary_index(context.block_index, view);
        let compact = self
            .preparations
            .iter()
            .find(|p| p.validator_index == primary)?;
        let message = ConsensusMessage::new(view, MessageBody::PrepareRequest(request.clone()));
        context.rebuild_payload(primary, message, &compact.invocation_script)
    }

    /// Backup acknowledgements for `view`.
    ///
    /// The acknowledged hash is that of the rebuilt prepare request when one
    /// is carried, otherwise the plurality digest. With neither nothing can
    /// be rebuilt.
    pub fn prepare_response_payloads(
        &self,
        context: &RoundContext,
        view: ViewNumber,
    ) -> Vec<ConsensusPayload> {
        let preparation_hash = match self.prepare_request_payload(context, view) {
            Some(request) => request.hash(),
            None => match self.preparation_hash {
                Some(hash) => hash,
                None => return Vec::new(),
            },
        };
        let primary = context.validators.primary_index(context.block_index, view);
        self.preparations
            .iter()
            .filter(|p| p.validator_index != primary)
            .filter_map(|p| {
                let message = ConsensusMessage::new(
                    view,
                    MessageBody::PrepareResponse(PrepareResponse { preparation_hash }),
                );
                context.rebuild_payload(p.validator_index, message, &p.invocation_script)
            })
            .collect()
    }

    /// Commits, each in the view it was signed in
    pub fn commit_payloads(&self, context: &RoundContext) -> Vec<ConsensusPayload> {
        self.commits
            .iter()
            .filter_map(|c| {
                let message = ConsensusMessage::new(
                    c.view_number,
                    MessageBody::Commit(Commit {
                        signature: c.signature,
                    }),
                );
                context.rebuild_payload(c.validator_index, message, &c.invocation_script)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::TestNetwork;
    use crate::message::ChangeViewReason;
    use crate::payload::Envelope;
    use crate::traits::Ledger;
    use chain_core::Address;

    fn contexts(net: &TestNetwork) -> Vec<RoundContext> {
        (0..net.wallets.len())
            .map(|i| RoundContext::new(net.ledger.snapshot(), &net.wallets[i]))
            .collect()
    }

    /// Node 1 proposes at view 0; returns the request and the responses of 0 and 2
    fn prepared(
        net: &TestNetwork,
        ctxs: &mut [RoundContext],
    ) -> (ConsensusPayload, Vec<ConsensusPayload>) {
        let request = ctxs[1]
            .make_prepare_request(Vec::new(), Address::zero(), 0, &net.wallets[1])
            .unwrap();
        let envelope = Envelope::open(request.clone()).unwrap();
        let MessageBody::PrepareRequest(body) = envelope.message().body.clone() else {
            panic!("expected prepare request");
        };
        let mut responses = Vec::new();
        for i in [0, 2] {
            ctxs[i].accept_prepare_request(envelope.clone(), &body);
            responses.push(ctxs[i].make_prepare_response(&net.wallets[i]).unwrap());
        }
        (request, responses)
    }

    #[test]
    fn test_rebuilt_payloads_are_identical() {
        let net = TestNetwork::new(4);
        let mut ctxs = contexts(&net);
        let (request, responses) = prepared(&net, &mut ctxs);

        let ctx = &mut ctxs[0];
        ctx.set_preparation(Envelope::open(responses[1].clone()).unwrap());
        let commit = ctx.make_commit(&net.wallets[0]).unwrap();

        let message = ctx.recovery_message();
        assert!(message.prepare_request.is_some());
        assert_eq!(message.preparation_hash, None);
        assert_eq!(message.preparations.len(), 3);
        assert_eq!(message.commits.len(), 1);

        assert_eq!(message.prepare_request_payload(ctx, 0), Some(request));
        assert_eq!(message.prepare_response_payloads(ctx, 0), responses);
        assert_eq!(message.commit_payloads(ctx), vec![commit]);

        let validators = ctx.validators().clone();
        for payload in message.prepare_response_payloads(ctx, 0) {
            assert!(payload.verify_with(0, &validators));
        }
    }

    #[test]
    fn test_digest_without_prepare_request() {
        let net = TestNetwork::new(4);
        let mut ctxs = contexts(&net);
        let (_, responses) = prepared(&net, &mut ctxs);

        // node 3 never saw the request, only the acknowledgements
        let ctx = &mut ctxs[3];
        for response in &responses {
            ctx.set_preparation(Envelope::open(response.clone()).unwrap());
        }
        let message = ctx.recovery_message();
        assert!(message.prepare_request.is_none());
        assert!(message.preparation_hash.is_some());
        assert!(message.commits.is_empty());
        assert_eq!(message.prepare_request_payload(ctx, 0), None);
        assert_eq!(message.prepare_response_payloads(ctx, 0), responses);
    }

    #[test]
    fn test_plurality_tie_takes_first_seen() {
        let net = TestNetwork::new(4);
        let ctxs = contexts(&net);
        let mut ctx = RoundContext::new(net.ledger.snapshot(), &net.wallets[3]);
        for (i, byte) in [(0usize, 1u8), (2, 2)] {
            let response = ctxs[i]
                .make_signed_payload(
                    MessageBody::PrepareResponse(PrepareResponse {
                        preparation_hash: Hash::new([byte; 32]),
                    }),
                    &net.wallets[i],
                )
                .unwrap();
            ctx.set_preparation(response);
        }
        assert_eq!(
            ctx.recovery_message().preparation_hash,
            Some(Hash::new([1; 32]))
        );
    }

    #[test]
    fn test_change_views_keep_original_view_and_reason() {
        let net = TestNetwork::new(4);
        let mut ctxs = contexts(&net);
        let cv = ctxs[2]
            .make_change_view(ChangeViewReason::TxNotFound, 77, &net.wallets[2])
            .unwrap();

        let ctx = &mut ctxs[0];
        assert!(ctx.set_change_view(Envelope::open(cv.clone()).unwrap()));
        ctx.reset_view(1);

        let message = ctx.recovery_message();
        assert_eq!(message.change_views.len(), 1);
        assert_eq!(message.change_views[0].original_view_number, 0);
        assert_eq!(message.change_views[0].reason, ChangeViewReason::TxNotFound);
        assert_eq!(message.change_view_payloads(ctx), vec![cv]);
        // no commit was sent, so none are shared
        assert!(message.commits.is_empty());
    }

    #[test]
    fn test_unknown_indices_are_skipped() {
        let net = TestNetwork::new(4);
        let ctx = RoundContext::new(net.ledger.snapshot(), &net.wallets[0]);
        let message = RecoveryMessage {
            commits: vec![CommitCompact {
                view_number: 0,
                validator_index: 40,
                signature: chain_core::Signature::new([0; 64]),
                invocation_script: vec![0x40],
            }],
            ..RecoveryMessage::default()
        };
        assert!(message.commit_payloads(&ctx).is_empty());
    }
}
