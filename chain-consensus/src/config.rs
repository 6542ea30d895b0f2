//! Consensus service configuration

use crate::{ConsensusError, ConsensusResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Consensus service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Target block interval in milliseconds; base of every timeout
    pub block_time_ms: u64,
    /// Maximum transactions in a proposal, reward transaction included
    pub max_transactions_per_block: usize,
    /// Neither load nor save the persisted round state
    pub ignore_recovery_logs: bool,
    /// How far ahead of local time a proposal timestamp may be
    pub max_future_timestamp_secs: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            block_time_ms: 15_000, // 15 seconds per block
            max_transactions_per_block: 500,
            ignore_recovery_logs: false,
            max_future_timestamp_secs: 600, // 10 minutes
        }
    }
}

impl ConsensusConfig {
    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConsensusResult<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConsensusError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ConsensusConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConsensusResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)
            .map_err(|e| ConsensusError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.block_time_ms == 0 {
            return Err(ConsensusError::Config(
                "Block time must be greater than 0".to_string(),
            ));
        }

        // The reward transaction always takes one slot
        if self.max_transactions_per_block == 0 {
            return Err(ConsensusError::Config(
                "Max transactions per block must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get block time as Duration
    pub fn block_time(&self) -> Duration {
        Duration::from_millis(self.block_time_ms)
    }

    /// Set block time
    pub fn with_block_time_ms(mut self, block_time_ms: u64) -> Self {
        self.block_time_ms = block_time_ms;
        self
    }

    /// Set the recovery log switch
    pub fn with_ignore_recovery_logs(mut self, ignore: bool) -> Self {
        self.ignore_recovery_logs = ignore;
        self
    }
}
