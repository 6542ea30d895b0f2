//! Actor runner for the consensus service
//!
//! The service is owned by a single tokio task. Everything else talks to it
//! through a [`ConsensusHandle`], so round state is only ever touched from
//! one place.

use crate::payload::ConsensusPayload;
use crate::service::ConsensusService;
use crate::{ConsensusError, ConsensusResult};
use chain_core::{Block, Transaction};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Input to the consensus task
#[derive(Debug, Clone)]
pub enum ConsensusCommand {
    Start,
    Payload(ConsensusPayload),
    Transaction(Transaction),
    BlockPersisted(Block),
    Tick,
    Shutdown,
}

impl ConsensusCommand {
    fn name(&self) -> &'static str {
        match self {
            ConsensusCommand::Start => "start",
            ConsensusCommand::Payload(_) => "payload",
            ConsensusCommand::Transaction(_) => "transaction",
            ConsensusCommand::BlockPersisted(_) => "block_persisted",
            ConsensusCommand::Tick => "tick",
            ConsensusCommand::Shutdown => "shutdown",
        }
    }
}

/// Cloneable sender side of a running [`ConsensusActor`]
#[derive(Debug, Clone)]
pub struct ConsensusHandle {
    sender: mpsc::UnboundedSender<ConsensusCommand>,
}

impl ConsensusHandle {
    pub fn send(&self, command: ConsensusCommand) -> ConsensusResult<()> {
        self.sender
            .send(command)
            .map_err(|_| ConsensusError::ChannelClosed)
    }

    pub fn start(&self) -> ConsensusResult<()> {
        self.send(ConsensusCommand::Start)
    }

    pub fn payload(&self, payload: ConsensusPayload) -> ConsensusResult<()> {
        self.send(ConsensusCommand::Payload(payload))
    }

    pub fn transaction(&self, transaction: Transaction) -> ConsensusResult<()> {
        self.send(ConsensusCommand::Transaction(transaction))
    }

    pub fn block_persisted(&self, block: Block) -> ConsensusResult<()> {
        self.send(ConsensusCommand::BlockPersisted(block))
    }

    pub fn tick(&self) -> ConsensusResult<()> {
        self.send(ConsensusCommand::Tick)
    }

    pub fn shutdown(&self) -> ConsensusResult<()> {
        self.send(ConsensusCommand::Shutdown)
    }
}

/// Runs a [`ConsensusService`] on its own task
pub struct ConsensusActor {
    service: ConsensusService,
    receiver: mpsc::UnboundedReceiver<ConsensusCommand>,
    tick_interval: Option<Duration>,
}

impl ConsensusActor {
    pub fn new(service: ConsensusService) -> (Self, ConsensusHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let actor = Self {
            service,
            receiver,
            tick_interval: None,
        };
        (actor, ConsensusHandle { sender })
    }

    /// Drive the timer from an interval instead of explicit `Tick` commands
    pub fn with_tick_interval(mut self, period: Duration) -> Self {
        self.tick_interval = Some(period);
        self
    }

    fn handle(&mut self, command: ConsensusCommand) {
        match command {
            ConsensusCommand::Start => self.service.start(),
            ConsensusCommand::Payload(payload) => self.service.on_payload_received(payload),
            ConsensusCommand::Transaction(tx) => self.service.on_transaction_received(tx),
            ConsensusCommand::BlockPersisted(block) => self.service.on_block_persisted(&block),
            ConsensusCommand::Tick => self.service.on_timer_tick(),
            ConsensusCommand::Shutdown => {}
        }
    }

    /// Process commands until `Shutdown` or every handle is dropped, then
    /// hand the service back
    pub async fn run(mut self) -> ConsensusService {
        let mut ticker = self.tick_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        info!("Consensus actor running");
        loop {
            let command = match ticker.as_mut() {
                Some(ticker) => tokio::select! {
                    command = self.receiver.recv() => command,
                    _ = ticker.tick() => Some(ConsensusCommand::Tick),
                },
                None => self.receiver.recv().await,
            };
            match command {
                Some(ConsensusCommand::Shutdown) | None => break,
                Some(command) => {
                    debug!(command = command.name(), "Consensus command");
                    self.handle(command);
                }
            }
        }
        info!("Consensus actor stopped");
        self.service
    }

    pub fn spawn(self) -> JoinHandle<ConsensusService> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusConfig;
    use crate::memory::{AllowAll, ManualClock, MemoryMempool, RecordingTransport, TestNetwork};
    use crate::persistence::ConsensusStore;
    use crate::service::Collaborators;
    use crate::wallet::KeyPairWallet;
    use chain_db::MemoryDatabase;
    use std::sync::Arc;

    fn solo(net: &TestNetwork) -> (ConsensusService, Arc<RecordingTransport>, Arc<ManualClock>) {
        let transport = Arc::new(RecordingTransport::new());
        let clock = Arc::new(ManualClock::new(1_600_000_100_000));
        let deps = Collaborators {
            ledger: net.ledger.clone(),
            mempool: Arc::new(MemoryMempool::new()),
            policy: Arc::new(AllowAll),
            wallet: Arc::new(KeyPairWallet::new(vec![net.pairs[0].clone()])),
            transport: transport.clone(),
            clock: clock.clone(),
            store: ConsensusStore::new(Arc::new(MemoryDatabase::new())),
        };
        let config = ConsensusConfig::default().with_block_time_ms(500);
        (ConsensusService::new(config, deps).unwrap(), transport, clock)
    }

    #[tokio::test]
    async fn test_commands_drive_the_service() {
        let net = TestNetwork::new(1);
        let (service, transport, clock) = solo(&net);
        let (actor, handle) = ConsensusActor::new(service);
        let task = actor.spawn();

        handle.start().unwrap();
        clock.advance(500);
        handle.tick().unwrap();
        handle.shutdown().unwrap();

        let service = task.await.unwrap();
        assert!(service.is_started());
        assert_eq!(transport.take_blocks().len(), 1);
        assert!(handle.tick().is_err());
    }

    #[tokio::test]
    async fn test_stops_when_handles_drop() {
        let net = TestNetwork::new(1);
        let (service, _transport, _clock) = solo(&net);
        let (actor, handle) = ConsensusActor::new(service);
        let task = actor.spawn();
        drop(handle);
        let service = task.await.unwrap();
        assert!(!service.is_started());
    }

    #[tokio::test]
    async fn test_interval_ticks() {
        let net = TestNetwork::new(1);
        let (service, transport, clock) = solo(&net);
        let (actor, handle) = ConsensusActor::new(service);
        let task = actor.with_tick_interval(Duration::from_millis(100)).spawn();

        handle.start().unwrap();
        clock.advance(500);
        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.shutdown().unwrap();
        task.await.unwrap();
        assert_eq!(transport.take_blocks().len(), 1);
    }
}
