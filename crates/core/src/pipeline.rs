//! End-to-end run: discover, classify, bite, monitor.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use bitebot_chain::{ChainService, CupId};

use crate::classifier::Classifier;
use crate::config::BotConfig;
use crate::discovery::{Discovery, ScanRange};
use crate::error::PipelineError;
use crate::liquidator::{BatchReport, Liquidator};
use crate::monitor::{Monitor, MonitorExit, MonitorReport};
use crate::position::ids;

/// Whether the one-shot batch bite runs before monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Full,
    /// Only watch the safe population; undercollateralized cups found at
    /// startup are reported but not bitten
    MonitorOnly,
}

/// What a run saw and did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub discovered: Vec<CupId>,
    pub safe: Vec<CupId>,
    pub undercollateralized: Vec<CupId>,
    pub unavailable: Vec<CupId>,
    /// `None` in monitor-only mode
    pub batch: Option<BatchReport>,
    /// `None` when cancelled before monitoring started
    pub monitor: Option<MonitorReport>,
    pub exit: MonitorExit,
}

impl RunSummary {
    fn new(exit: MonitorExit) -> Self {
        Self {
            discovered: Vec::new(),
            safe: Vec::new(),
            undercollateralized: Vec::new(),
            unavailable: Vec::new(),
            batch: None,
            monitor: None,
            exit,
        }
    }
}

/// Wires the four stages together over one Chain Service.
pub struct BiteBot {
    chain: Arc<dyn ChainService>,
    discovery: Discovery,
    classifier: Classifier,
    liquidator: Liquidator,
    monitor: Monitor,
}

impl BiteBot {
    pub fn new(chain: Arc<dyn ChainService>, config: &BotConfig) -> Self {
        Self {
            discovery: Discovery::new(chain.clone(), config.discovery.max_concurrent),
            classifier: Classifier::new(chain.clone(), config.classifier.max_concurrent),
            liquidator: Liquidator::new(
                chain.clone(),
                config.liquidation.confirmations,
                config.liquidation.max_concurrent,
            ),
            monitor: Monitor::new(chain.clone(), &config.monitor, config.liquidation.confirmations),
            chain,
        }
    }

    /// Run the pipeline over `range` until the monitor stops.
    ///
    /// Authentication failures and a lost connection during discovery or
    /// classification are returned as errors; per-cup failures and partially
    /// failed batches are logged and the run carries on.
    #[instrument(skip_all, fields(first = %range.first(), last = %range.last(), mode = ?mode))]
    pub async fn run(
        &self,
        range: ScanRange,
        mode: RunMode,
        cancel: CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let account = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(RunSummary::new(MonitorExit::Cancelled)),
            result = self.chain.authenticate() => result.map_err(PipelineError::Authentication)?,
        };
        info!(account = %account, "Authenticated");

        let mut summary = RunSummary::new(MonitorExit::Cancelled);

        let positions = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(summary),
            positions = self.discovery.discover(range) => positions?,
        };
        summary.discovered = positions.iter().map(|p| p.id).collect();
        info!(ids = ?ids(&positions), "Available CDPs");

        let classification = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(summary),
            classification = self.classifier.classify(positions) => classification?,
        };
        summary.safe = classification.safe.iter().map(|p| p.id).collect();
        summary.undercollateralized = classification
            .undercollateralized
            .iter()
            .map(|p| p.id)
            .collect();
        summary.unavailable = classification.unavailable.clone();

        info!(ids = ?ids(&classification.safe), "Safe CDPs");
        info!(ids = ?ids(&classification.undercollateralized), "Unsafe CDPs");

        match mode {
            RunMode::Full => {
                let report = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(summary),
                    report = self.liquidator.bite_batch(&classification.undercollateralized) => report,
                };
                if !report.is_success() {
                    error!(
                        failed = ?report.failed_ids(),
                        "Batch bite did not fully succeed, continuing to monitor"
                    );
                }
                summary.batch = Some(report);
            }
            RunMode::MonitorOnly => {
                if !classification.undercollateralized.is_empty() {
                    info!(
                        count = classification.undercollateralized.len(),
                        "Monitor-only mode, not biting unsafe CDPs"
                    );
                }
            }
        }

        let report = self.monitor.run(classification.safe, cancel).await;
        summary.exit = report.exit;
        summary.monitor = Some(report);

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{id, Answer, BitePlan, MockChain};

    fn config() -> BotConfig {
        let mut config = BotConfig::testing();
        config.monitor.poll_interval_ms = 1_000;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run() {
        let chain = MockChain::new(&[1, 3, 5, 6])
            .script(1, &[Answer::Safe, Answer::Safe, Answer::Unsafe])
            .script(3, &[Answer::Unsafe])
            .script(5, &[Answer::Unavailable])
            .script(6, &[Answer::Safe, Answer::Unavailable])
            .into_arc();
        let bot = BiteBot::new(chain.clone(), &config());

        let summary = bot
            .run(
                ScanRange::new(1, 10).unwrap(),
                RunMode::Full,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.discovered, vec![id(1), id(3), id(5), id(6)]);
        assert_eq!(summary.safe, vec![id(1), id(6)]);
        assert_eq!(summary.undercollateralized, vec![id(3)]);
        assert_eq!(summary.unavailable, vec![id(5)]);
        assert!(summary.batch.as_ref().unwrap().is_success());
        assert_eq!(summary.exit, MonitorExit::Exhausted);

        let monitor = summary.monitor.unwrap();
        assert_eq!(monitor.liquidated(), vec![id(1)]);
        assert_eq!(monitor.stats.evictions, 1);

        assert_eq!(chain.bites_for(3), 1);
        assert_eq!(chain.bites_for(1), 1);
        assert_eq!(chain.bites_for(5), 0);
        assert_eq!(chain.bites_for(6), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_failure_continues_to_monitor() {
        let chain = MockChain::new(&[2, 4])
            .script(2, &[Answer::Unsafe])
            .script(4, &[Answer::Safe, Answer::Unsafe])
            .plan(2, BitePlan::Revert)
            .into_arc();
        let bot = BiteBot::new(chain.clone(), &config());

        let summary = bot
            .run(
                ScanRange::new(1, 4).unwrap(),
                RunMode::Full,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let batch = summary.batch.unwrap();
        assert!(!batch.is_success());
        assert_eq!(batch.failed_ids(), vec![2]);
        assert_eq!(summary.exit, MonitorExit::Exhausted);
        assert_eq!(summary.monitor.unwrap().liquidated(), vec![id(4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_only_skips_batch() {
        let chain = MockChain::new(&[1, 2])
            .script(1, &[Answer::Unsafe])
            .script(2, &[Answer::Safe, Answer::Unavailable])
            .into_arc();
        let bot = BiteBot::new(chain.clone(), &config());

        let summary = bot
            .run(
                ScanRange::new(1, 2).unwrap(),
                RunMode::MonitorOnly,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(summary.batch.is_none());
        assert_eq!(summary.undercollateralized, vec![id(1)]);
        assert!(chain.bites().is_empty());
        assert_eq!(summary.exit, MonitorExit::Exhausted);
    }

    #[tokio::test]
    async fn test_authentication_failure_propagates() {
        let chain = MockChain::new(&[1]).with_failing_auth().into_arc();
        let bot = BiteBot::new(chain.clone(), &config());

        let result = bot
            .run(
                ScanRange::new(1, 5).unwrap(),
                RunMode::Full,
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(PipelineError::Authentication(_))));
        assert_eq!(chain.safety_queries(1), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_aborts_run() {
        let chain = MockChain::new(&[1, 5]).with_dead_rpc().into_arc();
        let bot = BiteBot::new(chain.clone(), &config());

        let result = bot
            .run(
                ScanRange::new(1, 5).unwrap(),
                RunMode::Full,
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(PipelineError::Connection(_))));
        assert!(chain.bites().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_lost_during_classification_aborts_run() {
        let chain = MockChain::new(&[1, 2])
            .script(2, &[Answer::Disconnected])
            .into_arc();
        let bot = BiteBot::new(chain.clone(), &config());

        let result = bot
            .run(
                ScanRange::new(1, 2).unwrap(),
                RunMode::Full,
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(PipelineError::Connection(_))));
        assert!(chain.bites().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let chain = MockChain::new(&[1]).into_arc();
        let bot = BiteBot::new(chain.clone(), &config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = bot
            .run(ScanRange::new(1, 5).unwrap(), RunMode::Full, cancel)
            .await
            .unwrap();

        assert_eq!(summary.exit, MonitorExit::Cancelled);
        assert!(summary.monitor.is_none());
    }
}
