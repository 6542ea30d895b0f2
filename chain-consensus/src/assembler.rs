//! Header and block assembly from the round state

use crate::context::RoundContext;
use crate::message::MessageBody;
use crate::ConsensusResult;
use chain_core::script::invocation_script;
use chain_core::{merkle, Block, BlockHeader, Witness};
use tracing::debug;

impl RoundContext {
    /// The unsigned header implied by the proposal, built once per proposal
    pub fn ensure_header(&mut self) -> Option<&BlockHeader> {
        if self.header.is_none() {
            let data = self.proposal.as_ref()?.data();
            self.header = Some(BlockHeader::new(
                self.prev_hash,
                merkle::compute_root(&data.transaction_hashes),
                data.timestamp,
                self.block_index,
                data.next_consensus,
            ));
        }
        self.header.as_ref()
    }

    /// Assemble the finalized block.
    ///
    /// Needs every proposed body and `M` commits from the current view.
    /// Signatures are taken in validator order, the first `M` found, and
    /// wrapped in a witness over the validators' multisig script. Once
    /// built the block is cached for the rest of the height.
    pub fn create_block(&mut self) -> ConsensusResult<Option<Block>> {
        if let Some(block) = &self.block {
            return Ok(Some(block.clone()));
        }
        let Some(transactions) = self.proposal.as_ref().and_then(|p| p.ordered_transactions())
        else {
            return Ok(None);
        };

        let m = self.m();
        let view = self.view_number;
        let signatures: Vec<_> = self
            .commits
            .iter()
            .filter(|(_, c)| c.view_number() == view)
            .filter_map(|(_, c)| match &c.message().body {
                MessageBody::Commit(commit) => Some(commit.signature),
                _ => None,
            })
            .take(m)
            .collect();
        if signatures.len() < m {
            debug!(
                "Block {} has {} of {} commits",
                self.block_index,
                signatures.len(),
                m
            );
            return Ok(None);
        }

        let witness = Witness::new(
            invocation_script(&signatures),
            self.validators.multisig_script()?,
        );
        let Some(mut header) = self.ensure_header().cloned() else {
            return Ok(None);
        };
        header.witness = witness;
        let block = Block::new(header, transactions);
        self.block = Some(block.clone());
        Ok(Some(block))
    }
}

#[cfg(test)]
mod tests {
    use crate::context::RoundContext;
    use crate::memory::TestNetwork;
    use crate::message::MessageBody;
    use crate::payload::Envelope;
    use crate::traits::Ledger;
    use chain_core::script::invocation_script;
    use chain_core::{merkle, Address, Signature};

    /// Node 1 proposes, the others accept, and `committers` commit
    fn round(net: &TestNetwork, committers: &[usize]) -> Vec<RoundContext> {
        let mut contexts: Vec<_> = (0..net.wallets.len())
            .map(|i| RoundContext::new(net.ledger.snapshot(), &net.wallets[i]))
            .collect();
        propose(net, &mut contexts, 1);
        commit(net, &mut contexts, committers);
        contexts
    }

    /// `primary` proposes one transfer and everyone else takes it on with
    /// every body
    fn propose(net: &TestNetwork, contexts: &mut [RoundContext], primary: usize) {
        let transfer = net.signed_transfer(0, 7, 3);
        let request = contexts[primary]
            .make_prepare_request(
                vec![transfer.clone()],
                Address::new([9; 20]),
                0,
                &net.wallets[primary],
            )
            .unwrap();
        let envelope = Envelope::open(request).unwrap();
        let MessageBody::PrepareRequest(body) = envelope.message().body.clone() else {
            panic!("expected prepare request");
        };
        for (i, ctx) in contexts.iter_mut().enumerate() {
            if i != primary {
                ctx.accept_prepare_request(envelope.clone(), &body);
                ctx.proposal.as_mut().unwrap().add_transaction(body.reward_transaction.clone());
                ctx.proposal.as_mut().unwrap().add_transaction(transfer.clone());
            }
        }
    }

    /// `committers` commit and every context records every commit
    fn commit(net: &TestNetwork, contexts: &mut [RoundContext], committers: &[usize]) -> Vec<Envelope> {
        let commits: Vec<_> = committers
            .iter()
            .map(|&i| {
                let wallet = &net.wallets[i];
                Envelope::open(contexts[i].make_commit(wallet).unwrap()).unwrap()
            })
            .collect();
        for ctx in contexts.iter_mut() {
            for commit in &commits {
                ctx.set_commit(commit.clone());
            }
        }
        commits
    }

    fn signature(envelope: &Envelope) -> Signature {
        match &envelope.message().body {
            MessageBody::Commit(commit) => commit.signature,
            other => panic!("not a commit: {other:?}"),
        }
    }

    #[test]
    fn test_header_from_proposal() {
        let net = TestNetwork::new(4);
        let mut contexts = round(&net, &[]);
        let ctx = &mut contexts[0];
        let hashes = ctx.proposal().unwrap().transaction_hashes().to_vec();
        let prev = ctx.prev_hash();
        let multisig = ctx.validators().multisig_address().unwrap();

        let header = ctx.ensure_header().unwrap();
        assert_eq!(header.prev_hash, prev);
        assert_eq!(header.index, 1);
        assert_eq!(header.merkle_root, merkle::compute_root(&hashes));
        assert_eq!(header.next_consensus, multisig);
    }

    #[test]
    fn test_block_needs_quorum_of_commits() {
        let net = TestNetwork::new(4);
        let mut contexts = round(&net, &[0, 2]);
        assert_eq!(contexts[3].create_block().unwrap(), None);
        assert!(!contexts[3].block_sent());
    }

    #[test]
    fn test_commits_from_an_earlier_view_are_left_out() {
        let net = TestNetwork::new(4);
        // validator 3 commits in view 0, then everyone moves to view 1
        let mut contexts = round(&net, &[3]);
        for ctx in contexts.iter_mut() {
            ctx.reset_view(1);
        }
        propose(&net, &mut contexts, 0);

        let mut current = commit(&net, &mut contexts, &[0, 2]);
        let ctx = &mut contexts[2];
        assert_eq!(ctx.commits().count(), 3);
        assert_eq!(ctx.create_block().unwrap(), None);

        current.extend(commit(&net, &mut contexts, &[1]));
        let ctx = &mut contexts[2];
        let block = ctx.create_block().unwrap().unwrap();
        let mut ordered: Vec<_> = current.iter().collect();
        ordered.sort_by_key(|c| c.validator_index());
        let signatures: Vec<_> = ordered.into_iter().map(signature).collect();
        assert_eq!(block.header.witness.invocation_script, invocation_script(&signatures));
        assert!(block.validate(&ctx.validators().multisig_address().unwrap()));
    }

    #[test]
    fn test_block_carries_multisig_witness() {
        let net = TestNetwork::new(4);
        let mut contexts = round(&net, &[3, 0, 2, 1]);
        let ctx = &mut contexts[1];
        let block = ctx.create_block().unwrap().unwrap();

        assert!(ctx.block_sent());
        assert_eq!(block.index(), 1);
        assert_eq!(block.transactions.len(), 2);
        assert!(block.transactions[0].is_reward());
        assert_eq!(block.transactions[0].amount, 3);
        assert!(block.validate(&ctx.validators().multisig_address().unwrap()));
        assert_eq!(block.header.merkle_root, block.calculate_merkle_root());

        // cached for the rest of the height
        assert_eq!(ctx.create_block().unwrap(), Some(block));
    }

    #[test]
    fn test_pending_proposal_produces_no_block() {
        let net = TestNetwork::new(4);
        let mut contexts = round(&net, &[0, 1, 2]);
        let ctx = &mut contexts[3];
        let hashes = ctx.proposal().unwrap().transaction_hashes().to_vec();
        ctx.proposal = Some(crate::context::Proposal::new(crate::context::ProposalData {
            timestamp: 1,
            next_consensus: Address::zero(),
            transaction_hashes: hashes,
            transactions: Default::default(),
        }));
        assert_eq!(ctx.create_block().unwrap(), None);
    }
}
