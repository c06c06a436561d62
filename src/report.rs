//! The metrics report written next to a trained model.
use std::fs::{create_dir_all, File};
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::config::TrainConfig;
use crate::evaluation::RankingMetrics;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// UTC timestamp in the format used by every generated file.
pub fn timestamp(time: DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Sizes of the data that went into a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSummary {
    /// Ratings source.
    pub ratings_path: String,
    /// Graph source.
    pub graph_path: String,
    /// Distinct users.
    pub users: usize,
    /// Distinct items.
    pub items: usize,
    /// Valid ratings.
    pub interactions: usize,
    /// Ratings kept for training.
    pub train_interactions: usize,
    /// Users with at least one held-out rating.
    pub users_with_heldout: usize,
    /// Users with at least one held-out positive.
    pub users_with_heldout_positives: usize,
    /// Users that contributed to the metrics.
    pub users_evaluated: usize,
    /// Item-item edges used for regularization.
    pub graph_regularization_edges: usize,
}

/// Headline metrics at K.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    /// Mean precision@K.
    pub precision_at_k: f64,
    /// Mean recall@K.
    pub recall_at_k: f64,
    /// Mean hit rate@K.
    pub hit_rate_at_k: f64,
    /// Mean NDCG@K.
    pub ndcg_at_k: f64,
}

impl<'a> From<&'a RankingMetrics> for MetricsSummary {
    fn from(metrics: &'a RankingMetrics) -> Self {
        MetricsSummary {
            precision_at_k: metrics.precision_at_k,
            recall_at_k: metrics.recall_at_k,
            hit_rate_at_k: metrics.hit_rate_at_k,
            ndcg_at_k: metrics.ndcg_at_k,
        }
    }
}

/// Everything known about a training run after the fact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    /// Creation time, UTC.
    pub generated_at: String,
    /// Where the model artifact was written.
    pub model_path: String,
    /// Data sizes.
    pub data: DataSummary,
    /// The full run configuration.
    pub hyperparameters: TrainConfig,
    /// Ranking metrics on held-out positives.
    pub metrics: MetricsSummary,
    /// Training RMSE after each epoch.
    pub epoch_rmse: Vec<f64>,
}

impl MetricsReport {
    /// Write the report as pretty-printed JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), failure::Error> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), self)?;

        Ok(())
    }
}
