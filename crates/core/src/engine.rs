//! Per-tick orchestration: block detection, configuration lifecycle, pause
//! handling, advisory safety, rule execution.

use std::sync::Arc;
use tracing::{debug, info, warn};

use rebalancer_ledger::{
    BalanceReader, BlockReader, ConfigurationSource, ObservedConfig, PoolReader, PriceReader,
    TransactionSubmitter, VaultReader,
};
use rebalancer_notify::Notifier;

use crate::config::{BotConfig, PauseState, SchedulerState};
use crate::factory::RuleFactory;
use crate::safety::SafetyEvaluator;
use crate::sizing::Sizer;
use crate::vault::VaultSnapshot;

/// What a tick amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The chain has not advanced since the last tick.
    NoNewBlock,
    /// A pause directive is in effect.
    Paused,
    /// No configuration has ever been observed.
    NoConfiguration,
    /// All gates stayed closed.
    Idle,
    /// A rule fired and submitted at least one transaction.
    TransactionSent,
}

/// The rebalancing engine, invoked once per scheduling interval.
///
/// Owns no mutable state: everything that survives a tick lives in the
/// caller's [`SchedulerState`].
pub struct Engine {
    vaults: Arc<dyn VaultReader>,
    blocks: Arc<dyn BlockReader>,
    config_source: Arc<dyn ConfigurationSource>,
    notifier: Arc<dyn Notifier>,
    factory: RuleFactory,
    safety: SafetyEvaluator,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vaults: Arc<dyn VaultReader>,
        pools: Arc<dyn PoolReader>,
        prices: Arc<dyn PriceReader>,
        balances: Arc<dyn BalanceReader>,
        blocks: Arc<dyn BlockReader>,
        submitter: Arc<dyn TransactionSubmitter>,
        config_source: Arc<dyn ConfigurationSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let factory = RuleFactory::new(
            vaults.clone(),
            pools.clone(),
            prices.clone(),
            balances.clone(),
            blocks.clone(),
            submitter,
            notifier.clone(),
        );
        let sizer = Sizer::new(pools, prices, balances.clone());
        let safety = SafetyEvaluator::new(sizer, balances);
        Self { vaults, blocks, config_source, notifier, factory, safety }
    }

    /// Run one tick against the current chain tip.
    ///
    /// Errors out of here are unexpected (failed reads outside any action);
    /// the caller logs them and waits for the next interval.
    pub async fn tick(&self, state: &mut SchedulerState) -> anyhow::Result<TickOutcome> {
        let height = self.blocks.block_height().await?;
        if height <= state.last_block_height {
            self.log_same_block_telemetry(state, height).await;
            return Ok(TickOutcome::NoNewBlock);
        }
        state.last_block_height = height;

        if let Some(observed) = self.config_source.current().await? {
            if observed.block_height > state.last_config_block {
                self.adopt_configuration(state, observed).await?;
            }
        }
        let Some(config) = state.config.clone() else {
            debug!("no configuration observed yet");
            return Ok(TickOutcome::NoConfiguration);
        };

        if self.pause_in_effect(state, &config).await? {
            return Ok(TickOutcome::Paused);
        }

        let vault_data = self.vaults.vault(&config.vault_id).await?;
        let vault = VaultSnapshot::new(vault_data, height);
        if let Err(violation) = self.safety.check(&config.weights, &vault).await {
            // advisory only: report and keep going
            self.notifier
                .report_error(&format!("safety check failed: {violation}"))
                .await;
        }

        for rule in self.factory.rules_from_config(&config)? {
            let outcome = rule.run().await?;
            if outcome.tx_sent {
                // whatever just went out invalidates this tick's snapshot;
                // wait for the next block before evaluating further rules
                state.last_block_height = self.blocks.block_height().await?;
                info!(rule = %rule.name(), "transaction sent, ending tick");
                return Ok(TickOutcome::TransactionSent);
            }
        }
        Ok(TickOutcome::Idle)
    }

    async fn log_same_block_telemetry(&self, state: &SchedulerState, height: u64) {
        let Some(config) = &state.config else { return };
        match self.vaults.vault(&config.vault_id).await {
            Ok(data) => {
                let vault = VaultSnapshot::new(data, height);
                debug!(
                    height,
                    ratio = %vault.current_ratio(),
                    next_ratio = %vault.next_ratio(),
                    "no new block"
                );
            }
            Err(e) => debug!(height, error = %e, "no new block, vault read failed"),
        }
    }

    /// Validate and adopt a newly observed configuration, emitting pause
    /// transition notifications.
    async fn adopt_configuration(
        &self,
        state: &mut SchedulerState,
        observed: ObservedConfig,
    ) -> anyhow::Result<()> {
        let scheme_min = self
            .vaults
            .vault(&observed.message.vault_id)
            .await?
            .scheme_min_ratio;
        match BotConfig::from_message(&observed.message, scheme_min) {
            Ok(config) => {
                info!(
                    block = observed.block_height,
                    vault = %config.vault_id,
                    "adopted new configuration"
                );
                self.notify_pause_transition(state, observed.message.pause).await;
                state.config = Some(config);
                state.last_config_block = observed.block_height;
                state.last_config_block_time = observed.block_time;
            }
            Err(e) => {
                warn!(block = observed.block_height, error = %e, "rejected configuration");
                self.notifier
                    .report_error(&format!("ignoring invalid configuration: {e}"))
                    .await;
                // remember the block so the same message is not re-reported
                // every tick; the previous configuration stays in effect
                state.last_config_block = observed.block_height;
            }
        }
        Ok(())
    }

    async fn notify_pause_transition(&self, state: &mut SchedulerState, raw_pause: i64) {
        let previous = state.last_pause_raw;
        match PauseState::from_raw(raw_pause) {
            PauseState::Indefinite if previous != Some(-1) => {
                self.notifier.send("pausing until further notice").await;
            }
            PauseState::Minutes(minutes) => {
                self.notifier
                    .send(&format!("pausing for {minutes} minutes"))
                    .await;
                state.pause_elapsed_notified = false;
            }
            PauseState::Active if matches!(previous, Some(p) if p != 0) => {
                self.notifier.send("resuming operation").await;
            }
            _ => {}
        }
        state.last_pause_raw = Some(raw_pause);
    }

    /// Whether the configured pause still holds this tick. A timed pause
    /// that elapsed notifies once and then lets rules run again.
    async fn pause_in_effect(
        &self,
        state: &mut SchedulerState,
        config: &BotConfig,
    ) -> anyhow::Result<bool> {
        match config.pause {
            PauseState::Active => Ok(false),
            PauseState::Indefinite => {
                debug!("paused indefinitely");
                Ok(true)
            }
            PauseState::Minutes(minutes) => {
                let now = self.blocks.block_time().await?;
                let deadline = state.last_config_block_time + minutes * 60;
                if now < deadline {
                    debug!(remaining = deadline - now, "timed pause in effect");
                    return Ok(true);
                }
                if !state.pause_elapsed_notified {
                    self.notifier.send("pause elapsed, resuming operation").await;
                    state.pause_elapsed_notified = true;
                }
                Ok(false)
            }
        }
    }
}
