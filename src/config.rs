//! Training run configuration.
use std::path::PathBuf;

use crate::graph::EdgeFilter;
use crate::models::factorization::Hyperparameters;

/// Configuration error types.
#[derive(Debug, Fail)]
pub enum ConfigError {
    /// Graph sample rate outside `(0, 1]`.
    #[fail(display = "Graph sample rate must be in (0, 1], got {}.", _0)]
    GraphSampleRate(f64),
    /// Test ratio outside `[0, 1]`.
    #[fail(display = "Test ratio must be in [0, 1], got {}.", _0)]
    TestRatio(f64),
    /// A count that must be positive is zero.
    #[fail(display = "{} must be at least 1.", _0)]
    Zero(&'static str),
    /// A real-valued option is NaN or infinite.
    #[fail(display = "{} must be a finite number, got {}.", _0, _1)]
    NonFinite(&'static str, f64),
}

/// Everything a training run needs, with the defaults used by the
/// `train` binary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainConfig {
    /// Ratings source.
    pub ratings: PathBuf,
    /// Graph source.
    pub graph: PathBuf,
    /// Directory receiving `model.json` and `metrics.json`.
    pub out_dir: PathBuf,
    /// Latent factor dimension.
    pub factors: usize,
    /// Training epochs.
    pub epochs: usize,
    /// SGD learning rate.
    pub lr: f32,
    /// L2 regularization for factors.
    pub reg: f32,
    /// L2 regularization for biases.
    pub reg_bias: f32,
    /// Strength of the item graph regularization.
    pub graph_lambda: f32,
    /// Edges whose absolute weight is below this are ignored.
    pub graph_min_abs_weight: f64,
    /// Fraction of graph edges visited each epoch.
    pub graph_sample_rate: f64,
    /// Relation type tag of item-item relations.
    pub graph_edge_type: String,
    /// Namespace of item node references.
    pub graph_node_prefix: String,
    /// Per-user held-out ratio.
    pub test_ratio: f64,
    /// Minimum ratings before a user gets held-out data.
    pub min_ratings_for_test: usize,
    /// Held-out ratings above this are positives.
    pub positive_threshold: f32,
    /// K for the ranking metrics.
    pub top_k: usize,
    /// Random seed.
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            ratings: PathBuf::from("data/anonymized-ratings.json"),
            graph: PathBuf::from("data/graph.json"),
            out_dir: PathBuf::from("models/graph_mf"),
            factors: 64,
            epochs: 10,
            lr: 0.02,
            reg: 0.01,
            reg_bias: 0.005,
            graph_lambda: 0.01,
            graph_min_abs_weight: 0.0,
            graph_sample_rate: 1.0,
            graph_edge_type: "anime-anime".to_owned(),
            graph_node_prefix: "anime".to_owned(),
            test_ratio: 0.15,
            min_ratings_for_test: 8,
            positive_threshold: 0.0,
            top_k: 20,
            seed: 42,
        }
    }
}

impl TrainConfig {
    /// Reject out-of-range options before any data is read.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for &(name, value) in &[
            ("lr", f64::from(self.lr)),
            ("reg", f64::from(self.reg)),
            ("reg-bias", f64::from(self.reg_bias)),
            ("graph-lambda", f64::from(self.graph_lambda)),
            ("graph-min-abs-weight", self.graph_min_abs_weight),
            ("positive-threshold", f64::from(self.positive_threshold)),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite(name, value));
            }
        }

        if !(self.graph_sample_rate > 0.0 && self.graph_sample_rate <= 1.0) {
            return Err(ConfigError::GraphSampleRate(self.graph_sample_rate));
        }
        if !(self.test_ratio >= 0.0 && self.test_ratio <= 1.0) {
            return Err(ConfigError::TestRatio(self.test_ratio));
        }
        if self.factors == 0 {
            return Err(ConfigError::Zero("factors"));
        }
        if self.top_k == 0 {
            return Err(ConfigError::Zero("top-k"));
        }

        Ok(())
    }

    /// Trainer hyperparameters.
    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters::new(self.factors)
            .num_epochs(self.epochs)
            .learning_rate(self.lr)
            .l2_penalty(self.reg)
            .bias_l2_penalty(self.reg_bias)
            .graph_lambda(self.graph_lambda)
            .graph_sample_rate(self.graph_sample_rate)
    }

    /// Which relations become graph edges.
    pub fn edge_filter(&self) -> EdgeFilter {
        EdgeFilter::default()
            .edge_type(&self.graph_edge_type)
            .node_prefix(&self.graph_node_prefix)
            .min_abs_weight(self.graph_min_abs_weight)
    }

    /// Where the model artifact is written.
    pub fn model_path(&self) -> PathBuf {
        self.out_dir.join("model.json")
    }

    /// Where the metrics report is written.
    pub fn metrics_path(&self) -> PathBuf {
        self.out_dir.join("metrics.json")
    }
}
