extern crate clap;
extern crate failure;
extern crate graphmf;

use std::path::PathBuf;

use clap::Parser;

use graphmf::config::TrainConfig;
use graphmf::pipeline;

/// Train a graph-regularized matrix factorization recommender.
#[derive(Debug, Parser)]
#[command(name = "train")]
struct Args {
    /// Path to the ratings JSON.
    #[arg(long, default_value = "data/anonymized-ratings.json")]
    ratings: PathBuf,
    /// Path to the graph JSON.
    #[arg(long, default_value = "data/graph.json")]
    graph: PathBuf,
    /// Directory for model.json and metrics.json.
    #[arg(long, default_value = "models/graph_mf")]
    out_dir: PathBuf,
    #[arg(long, default_value_t = 64)]
    factors: usize,
    #[arg(long, default_value_t = 10)]
    epochs: usize,
    #[arg(long, default_value_t = 0.02)]
    lr: f32,
    #[arg(long, default_value_t = 0.01)]
    reg: f32,
    #[arg(long, default_value_t = 0.005)]
    reg_bias: f32,
    /// Strength of the item-item graph regularization.
    #[arg(long, default_value_t = 0.01)]
    graph_lambda: f32,
    /// Ignore graph edges with absolute weight below this value.
    #[arg(long, default_value_t = 0.0)]
    graph_min_abs_weight: f64,
    /// Fraction of graph edges used per epoch, in (0, 1].
    #[arg(long, default_value_t = 1.0)]
    graph_sample_rate: f64,
    /// Relation type of item-item edges.
    #[arg(long, default_value = "anime-anime")]
    graph_edge_type: String,
    /// Node namespace of items in the graph.
    #[arg(long, default_value = "anime")]
    graph_node_prefix: String,
    #[arg(long, default_value_t = 0.15)]
    test_ratio: f64,
    #[arg(long, default_value_t = 8)]
    min_ratings_for_test: usize,
    /// Held-out ratings above this count as relevant.
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    positive_threshold: f32,
    #[arg(long, default_value_t = 20)]
    top_k: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

impl From<Args> for TrainConfig {
    fn from(args: Args) -> Self {
        TrainConfig {
            ratings: args.ratings,
            graph: args.graph,
            out_dir: args.out_dir,
            factors: args.factors,
            epochs: args.epochs,
            lr: args.lr,
            reg: args.reg,
            reg_bias: args.reg_bias,
            graph_lambda: args.graph_lambda,
            graph_min_abs_weight: args.graph_min_abs_weight,
            graph_sample_rate: args.graph_sample_rate,
            graph_edge_type: args.graph_edge_type,
            graph_node_prefix: args.graph_node_prefix,
            test_ratio: args.test_ratio,
            min_ratings_for_test: args.min_ratings_for_test,
            positive_threshold: args.positive_threshold,
            top_k: args.top_k,
            seed: args.seed,
        }
    }
}

fn main() -> Result<(), failure::Error> {
    graphmf::init_tracing();

    let config = TrainConfig::from(Args::parse());
    pipeline::train(&config)?;

    Ok(())
}
