use crate::baseline::BaselineTable;
use crate::batch::{Batch, BatchError, ChannelScores, ScoredBatch};
use crate::config::EngineConfig;
use crate::detect::{DetectionMode, MultivariateFlagger, UnivariateFlagger};
use tracing::info;

/// Runs the configured flaggers over a batch and derives the consensus
/// `anomaly` column. Pure computation: the baseline is read, never written.
#[derive(Debug, Clone)]
pub struct AnomalyEngine {
    channels: Vec<String>,
    univariate: UnivariateFlagger,
    multivariate: MultivariateFlagger,
}

impl AnomalyEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            channels: config.channels().to_vec(),
            univariate: UnivariateFlagger::new(config.z_threshold(), config.maturity_floor()),
            multivariate: MultivariateFlagger::new(config.contamination(), config.forest()),
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Score `batch` against `baseline`.
    ///
    /// Only configured channels present among the batch's columns are
    /// considered. A channel with an immature baseline contributes no flag,
    /// so with no mature channel at all the consensus in `both` mode is the
    /// multivariate flag alone.
    pub fn run(&self, batch: &Batch, baseline: &BaselineTable, mode: DetectionMode) -> Result<ScoredBatch, BatchError> {
        let present = batch.present_channels(&self.channels);
        info!(%mode, rows = batch.len(), channels = ?present, "Running anomaly detection");

        let mut channels = Vec::new();
        if mode.uses_zscore() {
            for &name in &present {
                let values = batch.numeric_column(name)?.unwrap_or_default();
                let stat = baseline.get(name);
                let zscores = self.univariate.flag(&values, stat);

                let count = baseline.count(name);
                if count >= self.univariate.maturity_floor() {
                    info!(
                        channel = %name,
                        flagged = zscores.flagged(),
                        threshold = self.univariate.threshold(),
                        "Z-score analysis done"
                    );
                } else {
                    info!(
                        channel = %name,
                        count,
                        floor = self.univariate.maturity_floor(),
                        "Z-score skipped: insufficient baseline history"
                    );
                }
                channels.push(ChannelScores {
                    channel: name.to_string(),
                    zscores,
                });
            }
        }

        let multivariate = if mode.uses_multivariate() {
            let flags = self.multivariate.flag(batch, &present)?;
            info!(flagged = flags.flagged(), rows = batch.len(), "Multivariate analysis done");
            Some(flags)
        } else {
            None
        };

        let anomaly = (0..batch.len())
            .map(|row| {
                let any_z = channels.iter().any(|c| c.zscores.flags[row] == Some(true));
                let mv = multivariate.as_ref().is_some_and(|m| m.flags[row]);
                any_z || mv
            })
            .collect();

        Ok(ScoredBatch {
            batch: batch.clone(),
            mode,
            channels,
            multivariate,
            anomaly,
        })
    }
}
