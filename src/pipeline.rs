//! End-to-end training run: load, split, build the item graph, fit,
//! evaluate and persist.
use chrono::Utc;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use crate::artifact::ModelArtifact;
use crate::config::TrainConfig;
use crate::data::{user_based_split, Dataset, UserRecord};
use crate::datasets::{ensure_exists, load_graph, load_ratings};
use crate::evaluation::ranking_metrics;
use crate::graph::{build_item_edges, RelationRecord};
use crate::report::{timestamp, DataSummary, MetricsReport, MetricsSummary};

/// The products of a training run.
#[derive(Clone, Debug)]
pub struct TrainingRun {
    /// Trained model and id tables.
    pub artifact: ModelArtifact,
    /// Data sizes, configuration and metrics of the run.
    pub report: MetricsReport,
}

/// Train and evaluate on already loaded records.
///
/// The split and the trainer each draw from their own generator seeded
/// with `config.seed`, so a run is reproducible from its configuration
/// and input order alone.
pub fn run(
    config: &TrainConfig,
    users: &[UserRecord],
    relations: &[RelationRecord],
) -> Result<TrainingRun, failure::Error> {
    config.validate()?;

    let dataset = Dataset::from_records(users);
    info!(
        "Loaded ratings: users={} items={} interactions={}",
        dataset.num_users(),
        dataset.num_items(),
        dataset.len()
    );

    let mut split_rng = XorShiftRng::seed_from_u64(config.seed);
    let split = user_based_split(
        &dataset,
        &mut split_rng,
        config.test_ratio,
        config.min_ratings_for_test,
        config.positive_threshold,
    );
    info!(
        "Split complete: train_interactions={} users_with_test={}",
        split.train.len(),
        split.users_with_holdout
    );

    let edges = build_item_edges(relations, dataset.item_index(), &config.edge_filter());
    info!("Graph edges for regularization: {}", edges.len());

    let mut train_rng = XorShiftRng::seed_from_u64(config.seed);
    let fitted = config.hyperparameters().fit(
        &split.train,
        &edges,
        dataset.num_users(),
        dataset.num_items(),
        &mut train_rng,
    )?;

    let metrics = ranking_metrics(
        &fitted.model,
        &split.train_user_items,
        &split.test_positives,
        config.top_k,
    )?;
    info!(
        "Metrics Precision@{k}={:.4} Recall@{k}={:.4} HitRate@{k}={:.4} NDCG@{k}={:.4} (users={})",
        metrics.precision_at_k,
        metrics.recall_at_k,
        metrics.hit_rate_at_k,
        metrics.ndcg_at_k,
        metrics.evaluated_users,
        k = config.top_k
    );

    let report = MetricsReport {
        generated_at: timestamp(Utc::now()),
        model_path: config.model_path().display().to_string(),
        data: DataSummary {
            ratings_path: config.ratings.display().to_string(),
            graph_path: config.graph.display().to_string(),
            users: dataset.num_users(),
            items: dataset.num_items(),
            interactions: dataset.len(),
            train_interactions: split.train.len(),
            users_with_heldout: split.users_with_holdout,
            users_with_heldout_positives: split.users_with_positives(),
            users_evaluated: metrics.evaluated_users,
            graph_regularization_edges: edges.len(),
        },
        hyperparameters: config.clone(),
        metrics: MetricsSummary::from(&metrics),
        epoch_rmse: fitted.epoch_rmse,
    };

    Ok(TrainingRun {
        artifact: ModelArtifact::new(fitted.model, &dataset, &split),
        report,
    })
}

/// Run training from the files named in `config` and write `model.json`
/// and `metrics.json` into its output directory.
///
/// The configuration and both input paths are checked before anything
/// is read.
pub fn train(config: &TrainConfig) -> Result<TrainingRun, failure::Error> {
    config.validate()?;
    ensure_exists(&config.ratings)?;
    ensure_exists(&config.graph)?;

    let users = load_ratings(&config.ratings)?;
    let relations = load_graph(&config.graph)?;

    let training_run = run(config, &users, &relations)?;

    let model_path = config.model_path();
    training_run.artifact.save(&model_path)?;
    info!("Saved model -> {}", model_path.display());

    let metrics_path = config.metrics_path();
    training_run.report.save(&metrics_path)?;
    info!("Saved report -> {}", metrics_path.display());

    Ok(training_run)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    fn ratings_json() -> serde_json::Value {
        let users: Vec<serde_json::Value> = (0..6)
            .map(|user| {
                let ratings: Vec<serde_json::Value> = (0..10)
                    .map(|item| {
                        let score = if (user + item) % 3 == 0 { 0.8 } else { -0.3 };
                        json!({"itemId": 100 + item, "normalizedScore": score, "title": format!("Title {}", item)})
                    })
                    .collect();
                json!({"userId": format!("user-{}", user), "ratings": ratings})
            })
            .collect();

        json!({ "users": users })
    }

    fn graph_json() -> serde_json::Value {
        json!({"edges": [
            {"edgeType": "anime-anime", "source": "anime:100", "target": "anime:101", "weight": 0.9},
            {"edgeType": "anime-anime", "source": "anime:101", "target": "anime:100", "weight": 0.5},
            {"edgeType": "anime-anime", "source": "anime:102", "target": "anime:999", "weight": 0.9},
            {"edgeType": "anime-studio", "source": "anime:103", "target": "studio:1", "weight": 1.0},
            {"edgeType": "anime-anime", "source": "anime:104", "target": "anime:105", "weight": 0.4}
        ]})
    }

    fn config() -> TrainConfig {
        TrainConfig {
            factors: 4,
            epochs: 3,
            ..TrainConfig::default()
        }
    }

    fn records() -> (Vec<UserRecord>, Vec<RelationRecord>) {
        let users = serde_json::from_value(ratings_json()["users"].clone()).unwrap();
        let relations = serde_json::from_value(graph_json()["edges"].clone()).unwrap();

        (users, relations)
    }

    #[test]
    fn run_summarizes_the_data() {
        let (users, relations) = records();
        let training_run = run(&config(), &users, &relations).unwrap();
        let data = &training_run.report.data;

        assert_eq!(data.users, 6);
        assert_eq!(data.items, 10);
        assert_eq!(data.interactions, 60);
        // 10 ratings per user, round(1.5) = 2 held out each.
        assert_eq!(data.users_with_heldout, 6);
        assert_eq!(data.train_interactions, 48);
        assert_eq!(data.graph_regularization_edges, 2);
        assert!(data.users_evaluated <= data.users_with_heldout_positives);
        assert_eq!(training_run.report.epoch_rmse.len(), 3);
        assert!(training_run.artifact.validate().is_ok());
    }

    #[test]
    fn runs_are_reproducible() {
        let (users, relations) = records();

        let first = run(&config(), &users, &relations).unwrap();
        let second = run(&config(), &users, &relations).unwrap();

        assert_eq!(first.artifact, second.artifact);
        assert_eq!(first.report.metrics, second.report.metrics);
        assert_eq!(first.report.epoch_rmse, second.report.epoch_rmse);
    }

    #[test]
    fn train_writes_model_and_report() {
        let dir = tempdir().unwrap();
        let ratings = dir.path().join("ratings.json");
        let graph = dir.path().join("graph.json");
        fs::write(&ratings, ratings_json().to_string()).unwrap();
        fs::write(&graph, graph_json().to_string()).unwrap();

        let config = TrainConfig {
            ratings,
            graph,
            out_dir: dir.path().join("out"),
            ..config()
        };
        let training_run = train(&config).unwrap();

        let loaded = ModelArtifact::load(&config.model_path()).unwrap();
        assert_eq!(loaded, training_run.artifact);

        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(config.metrics_path()).unwrap()).unwrap();
        assert_eq!(report["data"]["users"], 6);
        assert_eq!(report["hyperparameters"]["factors"], 4);
        assert_eq!(report["epochRmse"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn train_fails_fast() {
        let dir = tempdir().unwrap();

        let missing = TrainConfig {
            ratings: dir.path().join("missing.json"),
            graph: dir.path().join("missing.json"),
            out_dir: dir.path().join("out"),
            ..config()
        };
        let error = train(&missing).unwrap_err();
        assert!(error.to_string().contains("File not found"));
        assert!(!dir.path().join("out").exists());

        let invalid = TrainConfig {
            graph_sample_rate: 0.0,
            ..missing
        };
        let error = train(&invalid).unwrap_err();
        assert!(error.to_string().contains("sample rate"));
    }
}
