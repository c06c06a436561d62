#![warn(missing_docs)]
//! # graphmf
//!
//! `graphmf` trains and serves a biased matrix factorization model over a
//! user-item rating matrix, regularized by an item-item similarity graph:
//! embeddings of items that are connected in the graph are pulled towards
//! each other while the model is fitted to the observed ratings.
//!
//! The crate covers deterministic per-user train/test splitting, the
//! graph-regularized SGD training loop, top-K ranking evaluation and an
//! explainable recommender that works either for users seen in training
//! or for ad-hoc weighted lists of items.
//!
//! ## Example
//! ```rust
//! use rand::SeedableRng;
//! use rand_xorshift::XorShiftRng;
//!
//! use graphmf::data::{user_based_split, Dataset, UserRecord};
//! use graphmf::evaluation::ranking_metrics;
//! use graphmf::models::factorization::Hyperparameters;
//!
//! let users: Vec<UserRecord> = serde_json::from_str(
//!     r#"[
//!         {"userId": "u1", "ratings": [{"itemId": 100, "normalizedScore": 1.0},
//!                                      {"itemId": 200, "normalizedScore": -1.0}]},
//!         {"userId": "u2", "ratings": [{"itemId": 100, "normalizedScore": 0.5},
//!                                      {"itemId": 300, "normalizedScore": 1.0}]}
//!     ]"#,
//! )
//! .unwrap();
//! let data = Dataset::from_records(&users);
//!
//! let mut rng = XorShiftRng::seed_from_u64(42);
//! let split = user_based_split(&data, &mut rng, 0.15, 8, 0.0);
//!
//! let mut rng = XorShiftRng::seed_from_u64(42);
//! let fitted = Hyperparameters::new(8)
//!     .num_epochs(5)
//!     .fit(&split.train, &[], data.num_users(), data.num_items(), &mut rng)
//!     .unwrap();
//!
//! let metrics = ranking_metrics(
//!     &fitted.model,
//!     &split.train_user_items,
//!     &split.test_positives,
//!     20,
//! )
//! .unwrap();
//!
//! println!("Train RMSE per epoch: {:?}", fitted.epoch_rmse);
//! assert_eq!(metrics.evaluated_users, 0);
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate failure;

#[macro_use]
extern crate tracing;

pub mod artifact;
pub mod config;
pub mod data;
pub mod datasets;
pub mod evaluation;
pub mod export;
pub mod graph;
pub mod models;
pub mod pipeline;
pub mod recommend;
pub mod report;

/// Alias for dense user indices.
pub type UserId = usize;
/// Alias for dense item indices.
pub type ItemId = usize;
/// Alias for the external (catalogue) item identifiers.
pub type ExternalItemId = i64;

/// Prediction error types.
#[derive(Debug, Fail)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
    /// The user index is not part of the model.
    #[fail(display = "User index {} is out of range for the model.", _0)]
    UnknownUser(UserId),
    /// The item index is not part of the model.
    #[fail(display = "Item index {} is out of range for the model.", _0)]
    UnknownItem(ItemId),
    /// A user representation was requested from no items at all.
    #[fail(display = "Cannot fold in a user from an empty item list.")]
    EmptyFoldIn,
}

/// Fitting error types.
#[derive(Debug, Fail)]
pub enum FittingError {
    /// A training interaction refers to a user outside the model.
    #[fail(
        display = "Interaction refers to user {} but the model has {} users.",
        user_id, num_users
    )]
    UserOutOfRange {
        /// Offending user index.
        user_id: UserId,
        /// Number of users the model was built for.
        num_users: usize,
    },
    /// A training interaction or graph edge refers to an item outside the model.
    #[fail(
        display = "Item {} is out of range: the model has {} items.",
        item_id, num_items
    )]
    ItemOutOfRange {
        /// Offending item index.
        item_id: ItemId,
        /// Number of items the model was built for.
        num_items: usize,
    },
}

/// Trait describing models that score every item for a user
/// representation, either one learned during training or one folded
/// in from a weighted list of items.
pub trait OnlineRankingModel {
    /// The representation the model computes for a query.
    type UserRepresentation: std::fmt::Debug;
    /// Representation of a user seen during training.
    fn user_representation(
        &self,
        user_id: UserId,
    ) -> Result<Self::UserRepresentation, PredictionError>;
    /// Compute a representation from a weighted list of items.
    fn fold_in(
        &self,
        items: &[(ItemId, f32)],
    ) -> Result<Self::UserRepresentation, PredictionError>;
    /// Score every item in the model for the given representation.
    fn predict(&self, user: &Self::UserRepresentation) -> Result<Vec<f32>, PredictionError>;
}

/// Install a `tracing` subscriber honouring `RUST_LOG` (defaults to `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
