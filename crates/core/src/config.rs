//! Declarative storage configurations and scheduler tunables.

use crate::error::{Error, Result};
use crate::MIN_DEAL_DURATION;
use serde::{Deserialize, Serialize};

/// Desired storage state of a cid across the hot and cold tiers.
///
/// A storage configuration is declarative: the scheduler reconciles the
/// actual tier state against it, making whatever pins, unpins, and deals
/// are needed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Hot tier (pinning network) desired state.
    #[serde(default)]
    pub hot: HotConfig,
    /// Cold tier (deal market) desired state.
    #[serde(default)]
    pub cold: ColdConfig,
    /// Whether background repair should re-evaluate this configuration.
    #[serde(default)]
    pub repairable: bool,
    /// Opaque notification targets forwarded to the notifier on job events.
    #[serde(default)]
    pub notifications: Vec<NotificationConfig>,
}

impl StorageConfig {
    /// Validate the configuration as a whole.
    pub fn validate(&self) -> Result<()> {
        self.hot.validate()?;
        self.cold.validate()?;
        // Renewals re-propose data from the local copy, so they require
        // hot storage to stay enabled.
        if self.cold.enabled && self.cold.filecoin.renew.enabled && !self.hot.enabled {
            return Err(Error::InvalidConfig(
                "hot storage must be enabled to enable renewals".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_hot_enabled(mut self, enabled: bool) -> Self {
        self.hot.enabled = enabled;
        self
    }

    pub fn with_hot_allow_unfreeze(mut self, allow: bool) -> Self {
        self.hot.allow_unfreeze = allow;
        self
    }

    pub fn with_unfreeze_max_price(mut self, max_price: u64) -> Self {
        self.hot.unfreeze_max_price = max_price;
        self
    }

    pub fn with_cold_enabled(mut self, enabled: bool) -> Self {
        self.cold.enabled = enabled;
        self
    }

    pub fn with_rep_factor(mut self, rep_factor: usize) -> Self {
        self.cold.filecoin.rep_factor = rep_factor;
        self
    }

    pub fn with_renew(mut self, enabled: bool, threshold_epochs: i64) -> Self {
        self.cold.filecoin.renew.enabled = enabled;
        self.cold.filecoin.renew.threshold_epochs = threshold_epochs;
        self
    }

    pub fn with_repairable(mut self, repairable: bool) -> Self {
        self.repairable = repairable;
        self
    }

    pub fn with_wallet_addr(mut self, addr: impl Into<String>) -> Self {
        self.cold.filecoin.wallet_addr = addr.into();
        self
    }

    pub fn with_excluded_miners(mut self, miners: Vec<String>) -> Self {
        self.cold.filecoin.excluded_miners = miners;
        self
    }

    pub fn with_trusted_miners(mut self, miners: Vec<String>) -> Self {
        self.cold.filecoin.trusted_miners = miners;
        self
    }
}

/// Desired storage state of a cid in the hot tier.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HotConfig {
    /// If true, cid data is kept pinned in the hot tier.
    #[serde(default)]
    pub enabled: bool,
    /// If data isn't available in the hot tier, allow feeding it back
    /// from the cold tier through a paid retrieval.
    #[serde(default)]
    pub allow_unfreeze: bool,
    /// Maximum amount of attoFil to pay for an unfreeze retrieval.
    #[serde(default)]
    pub unfreeze_max_price: u64,
    /// Pinning-network specific settings.
    #[serde(default)]
    pub ipfs: IpfsConfig,
}

impl HotConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.ipfs.validate()
    }
}

/// Pinning-network settings for hot storage of a cid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IpfsConfig {
    /// Upper bound in seconds on fetching cid data from the
    /// content-addressed network before failing.
    #[serde(default = "default_add_timeout_secs")]
    pub add_timeout_secs: u64,
}

impl IpfsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.add_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "add timeout must be greater than 0 seconds".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            add_timeout_secs: default_add_timeout_secs(),
        }
    }
}

fn default_add_timeout_secs() -> u64 {
    300
}

/// Desired storage state of a cid in the cold tier.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColdConfig {
    /// If true, data is replicated with deals in the cold tier.
    #[serde(default)]
    pub enabled: bool,
    /// Deal-market specific settings.
    #[serde(default)]
    pub filecoin: FilConfig,
}

impl ColdConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.filecoin.validate()?;
        if self.filecoin.wallet_addr.is_empty() {
            return Err(Error::InvalidConfig("wallet address is empty".to_string()));
        }
        Ok(())
    }
}

/// Deal-market configuration for cold storage of a cid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilConfig {
    /// Desired number of distinct simultaneously-active deals.
    #[serde(default = "default_rep_factor")]
    pub rep_factor: usize,
    /// Duration in epochs used when making new deals.
    #[serde(default = "default_deal_min_duration")]
    pub deal_min_duration: i64,
    /// Miner addresses that are never selected for new deals.
    #[serde(default)]
    pub excluded_miners: Vec<String>,
    /// Miner addresses used preferentially when available.
    #[serde(default)]
    pub trusted_miners: Vec<String>,
    /// Restrict miner selection to these country codes.
    #[serde(default)]
    pub country_codes: Vec<String>,
    /// Maximum price per GiB per epoch considered for deal asks.
    #[serde(default)]
    pub max_price: u64,
    /// Enable the fast-retrieval feature on new deals.
    #[serde(default)]
    pub fast_retrieval: bool,
    /// Deadline in epochs for new deals to be active on-chain.
    #[serde(default)]
    pub deal_start_offset: i64,
    /// Deal-renewal configuration.
    #[serde(default)]
    pub renew: RenewConfig,
    /// Wallet address paying for the deals.
    #[serde(default)]
    pub wallet_addr: String,
    /// Mark new deals as verified, assuming the wallet is a verified client.
    #[serde(default)]
    pub verified_deal: bool,
}

impl FilConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rep_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication factor must be greater than zero".to_string(),
            ));
        }
        if self.deal_min_duration < MIN_DEAL_DURATION {
            return Err(Error::InvalidConfig(format!(
                "deal duration must be at least {MIN_DEAL_DURATION} epochs, got {}",
                self.deal_min_duration
            )));
        }
        self.renew.validate()
    }
}

impl Default for FilConfig {
    fn default() -> Self {
        Self {
            rep_factor: default_rep_factor(),
            deal_min_duration: default_deal_min_duration(),
            excluded_miners: Vec::new(),
            trusted_miners: Vec::new(),
            country_codes: Vec::new(),
            max_price: 0,
            fast_retrieval: false,
            deal_start_offset: 0,
            renew: RenewConfig::default(),
            wallet_addr: String::new(),
            verified_deal: false,
        }
    }
}

fn default_rep_factor() -> usize {
    1
}

fn default_deal_min_duration() -> i64 {
    MIN_DEAL_DURATION
}

/// Deal-renewal configuration for cold storage of a cid.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RenewConfig {
    /// If true, deals nearing expiry are renewed.
    #[serde(default)]
    pub enabled: bool,
    /// How many epochs before expiry a deal becomes a renewal candidate.
    #[serde(default)]
    pub threshold_epochs: i64,
}

impl RenewConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.threshold_epochs <= 0 {
            return Err(Error::InvalidConfig(format!(
                "renew threshold must be positive, got {}",
                self.threshold_epochs
            )));
        }
        Ok(())
    }
}

/// Opaque notification target forwarded verbatim to the notifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Endpoint the notifier should deliver to.
    pub endpoint: String,
    /// Event names the target is interested in.
    #[serde(default)]
    pub events: Vec<String>,
}

/// Scheduler daemon tunables, shared so both the scheduler crate and the
/// server binary configuration can reference them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently executing jobs.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Seconds between renewal evaluation passes.
    #[serde(default = "default_renewal_interval_secs")]
    pub renewal_interval_secs: u64,
    /// Seconds between repair evaluation passes.
    #[serde(default = "default_repair_interval_secs")]
    pub repair_interval_secs: u64,
    /// Seconds between staged-pin GC passes.
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    /// Minimum age in seconds of a staged pin before it is GC-eligible.
    #[serde(default = "default_gc_stage_grace_secs")]
    pub gc_stage_grace_secs: u64,
    /// Seconds to wait for a started deal's terminal on-chain state.
    #[serde(default = "default_deal_finality_timeout_secs")]
    pub deal_finality_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            renewal_interval_secs: default_renewal_interval_secs(),
            repair_interval_secs: default_repair_interval_secs(),
            gc_interval_secs: default_gc_interval_secs(),
            gc_stage_grace_secs: default_gc_stage_grace_secs(),
            deal_finality_timeout_secs: default_deal_finality_timeout_secs(),
        }
    }
}

fn default_max_parallel() -> usize {
    50
}

fn default_renewal_interval_secs() -> u64 {
    86_400
}

fn default_repair_interval_secs() -> u64 {
    86_400
}

fn default_gc_interval_secs() -> u64 {
    3_600
}

fn default_gc_stage_grace_secs() -> u64 {
    86_400
}

fn default_deal_finality_timeout_secs() -> u64 {
    600
}
