//! In-process validator network for integration tests
//!
//! Every node gets its own transport, mempool, policy and store, while the
//! ledger and clock are shared. Broadcasts are delivered synchronously until
//! the network goes quiet; relayed blocks are appended to the ledger and
//! announced to every running node.

#![allow(dead_code)]

use chain_consensus::memory::{
    DenyListPolicy, ManualClock, MemoryMempool, RecordingTransport, TestNetwork,
    TEST_GENESIS_TIMESTAMP,
};
use chain_consensus::{
    Clock, Collaborators, ConsensusConfig, ConsensusPayload, ConsensusService, ConsensusStore,
    KeyPairWallet, MessageBody, MessageType,
};
use chain_core::{Block, BlockIndex, Transaction};
use chain_db::{MemoryDatabase, SharedDatabase};
use std::sync::Arc;

pub const BLOCK_MS: u64 = 1_000;
pub const START_MS: u64 = (TEST_GENESIS_TIMESTAMP as u64 + 100) * 1_000;

const MAX_DELIVERIES: usize = 100_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

pub struct Node {
    pub service: ConsensusService,
    pub transport: Arc<RecordingTransport>,
    pub mempool: Arc<MemoryMempool>,
    pub policy: Arc<DenyListPolicy>,
    pub db: SharedDatabase,
    pub up: bool,
}

pub struct Harness {
    pub net: TestNetwork,
    pub clock: Arc<ManualClock>,
    pub config: ConsensusConfig,
    pub nodes: Vec<Node>,
    /// Append relayed blocks and announce them
    pub auto_persist: bool,
    /// Every payload a node broadcast, in send order
    pub sent: Vec<(usize, ConsensusPayload)>,
    /// Deliveries refused by a filter, as (from, to, payload)
    pub dropped: Vec<(usize, usize, ConsensusPayload)>,
    /// Every block a node relayed
    pub relayed: Vec<Block>,
}

impl Harness {
    pub fn new(n: usize) -> Self {
        init_tracing();
        let net = TestNetwork::new(n);
        let clock = Arc::new(ManualClock::new(START_MS));
        let config = ConsensusConfig::default().with_block_time_ms(BLOCK_MS);
        let mut harness = Self {
            net,
            clock,
            config,
            nodes: Vec::with_capacity(n),
            auto_persist: true,
            sent: Vec::new(),
            dropped: Vec::new(),
            relayed: Vec::new(),
        };
        for i in 0..n {
            let transport = Arc::new(RecordingTransport::new());
            let mempool = Arc::new(MemoryMempool::new());
            let policy = Arc::new(DenyListPolicy::new());
            let db: SharedDatabase = Arc::new(MemoryDatabase::new());
            let service = harness.build_service(i, &transport, &mempool, &policy, &db);
            harness.nodes.push(Node {
                service,
                transport,
                mempool,
                policy,
                db,
                up: false,
            });
        }
        harness
    }

    fn build_service(
        &self,
        i: usize,
        transport: &Arc<RecordingTransport>,
        mempool: &Arc<MemoryMempool>,
        policy: &Arc<DenyListPolicy>,
        db: &SharedDatabase,
    ) -> ConsensusService {
        let deps = Collaborators {
            ledger: self.net.ledger.clone(),
            mempool: mempool.clone(),
            policy: policy.clone(),
            wallet: Arc::new(self.wallet(i)),
            transport: transport.clone(),
            clock: self.clock.clone(),
            store: ConsensusStore::new(db.clone()),
        };
        ConsensusService::new(self.config.clone(), deps).expect("valid test config")
    }

    pub fn wallet(&self, i: usize) -> KeyPairWallet {
        KeyPairWallet::new(vec![self.net.pairs[i].clone()])
    }

    pub fn service(&self, i: usize) -> &ConsensusService {
        &self.nodes[i].service
    }

    pub fn clock_now(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn height(&self) -> BlockIndex {
        self.net.ledger.height()
    }

    pub fn start(&mut self, i: usize) {
        self.nodes[i].up = true;
        self.nodes[i].service.start();
    }

    pub fn start_all(&mut self) {
        for i in 0..self.nodes.len() {
            self.start(i);
        }
    }

    /// Take a node offline; whatever it had queued is lost
    pub fn kill(&mut self, i: usize) {
        self.nodes[i].up = false;
        self.nodes[i].transport.take_broadcasts();
        self.nodes[i].transport.take_blocks();
    }

    /// Replace node `i` with a fresh service over the same store and start it
    pub fn restart(&mut self, i: usize) {
        self.kill(i);
        let node = &self.nodes[i];
        let service = self.build_service(i, &node.transport, &node.mempool, &node.policy, &node.db);
        self.nodes[i].service = service;
        self.start(i);
    }

    /// Put `tx` in every node's verified pool
    pub fn add_transaction(&self, tx: &Transaction) {
        for node in &self.nodes {
            node.mempool.add_verified(tx.clone());
        }
    }

    /// Hand `payload` straight to node `to`
    pub fn send_to(&mut self, to: usize, payload: ConsensusPayload) {
        self.nodes[to].service.on_payload_received(payload);
    }

    /// Deliver everything until no node has anything left to send
    pub fn deliver(&mut self) -> usize {
        self.deliver_filtered(|_, _, _| true)
    }

    /// Like [`Harness::deliver`], but only where `allow(from, to, payload)` holds
    pub fn deliver_filtered(
        &mut self,
        mut allow: impl FnMut(usize, usize, &ConsensusPayload) -> bool,
    ) -> usize {
        let n = self.nodes.len();
        let mut delivered = 0;
        loop {
            let mut progressed = false;
            for from in 0..n {
                let outgoing = self.nodes[from].transport.take_broadcasts();
                let blocks = self.nodes[from].transport.take_blocks();
                if !self.nodes[from].up {
                    continue;
                }
                for payload in outgoing {
                    progressed = true;
                    self.sent.push((from, payload.clone()));
                    for to in 0..n {
                        if to == from || !self.nodes[to].up {
                            continue;
                        }
                        if !allow(from, to, &payload) {
                            self.dropped.push((from, to, payload.clone()));
                            continue;
                        }
                        self.nodes[to].service.on_payload_received(payload.clone());
                        delivered += 1;
                        assert!(delivered < MAX_DELIVERIES, "message storm");
                    }
                }
                for block in blocks {
                    progressed = true;
                    self.persist(block);
                }
            }
            if !progressed {
                return delivered;
            }
        }
    }

    fn persist(&mut self, block: Block) {
        self.relayed.push(block.clone());
        if !self.auto_persist || block.index() != self.height() + 1 {
            return;
        }
        if self.net.ledger.append(block.clone()).is_err() {
            return;
        }
        for node in self.nodes.iter_mut().filter(|node| node.up) {
            node.mempool.remove_included(&block);
            node.service.on_block_persisted(&block);
        }
    }

    /// Move the shared clock and let every running node check its timer
    pub fn advance(&mut self, millis: u64) {
        self.clock.advance(millis);
        for node in self.nodes.iter_mut().filter(|node| node.up) {
            node.service.on_timer_tick();
        }
    }

    /// Alternate delivery and half-block clock steps until the ledger
    /// reaches `height`
    pub fn run_until_height(&mut self, height: BlockIndex, max_steps: usize) -> bool {
        for _ in 0..max_steps {
            self.deliver();
            if self.height() >= height {
                return true;
            }
            self.advance(BLOCK_MS / 2);
        }
        self.deliver();
        self.height() >= height
    }

    /// Payloads node `from` broadcast with the given type
    pub fn sent_by(&self, from: usize, kind: MessageType) -> Vec<ConsensusPayload> {
        self.sent
            .iter()
            .filter(|(sender, payload)| *sender == from && is_type(payload, kind))
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

pub fn is_type(payload: &ConsensusPayload, kind: MessageType) -> bool {
    payload
        .message()
        .is_ok_and(|message| message.message_type() == kind)
}

pub fn body(payload: &ConsensusPayload) -> MessageBody {
    payload.message().expect("decodable payload").body
}
