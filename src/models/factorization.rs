//! Biased matrix factorization with item-graph regularization.
//!
//! A rating is modelled as
//! ```text
//! r(u, i) = global_mean + bu[u] + bi[i] + dot(P[u], Q[i])
//! ```
//! and fitted with plain SGD, one interaction at a time. After every
//! epoch's rating pass, a separate pass over (a sample of) the item graph
//! pulls the embeddings of connected items towards each other in
//! proportion to the edge weight.
//!
//! Training is strictly sequential: given the same generator state and
//! the same data, two runs produce bit-identical parameters.
use std::time::Instant;

use ndarray::{Array1, Array2, ArrayView1, Zip};
use rand::seq::{index, SliceRandom};
use rand::Rng;
use rand_distr::StandardNormal;

use super::BiasedUser;
use crate::artifact::ArtifactError;
use crate::data::TrainingInteractions;
use crate::graph::Edge;
use crate::{FittingError, ItemId, OnlineRankingModel, PredictionError, UserId};

const INIT_SCALE: f32 = 0.05;
const MIN_FOLD_IN_DENOMINATOR: f32 = 1e-6;

fn embedding_init<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
    Array2::from_shape_simple_fn((rows, cols), || {
        INIT_SCALE * rng.sample::<f32, _>(StandardNormal)
    })
}

/// Number of graph edges visited per epoch.
pub fn graph_batch_size(num_edges: usize, sample_rate: f64) -> usize {
    if num_edges == 0 {
        return 0;
    }

    let rate = sample_rate.max(0.0).min(1.0);
    let size = (num_edges as f64 * rate).round_ties_even() as usize;

    size.max(1).min(num_edges)
}

/// Hyperparameters describing the graph-regularized factorization model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    latent_dim: usize,
    num_epochs: usize,
    learning_rate: f32,
    l2_penalty: f32,
    bias_l2_penalty: f32,
    graph_lambda: f32,
    graph_sample_rate: f64,
}

impl Hyperparameters {
    /// Build new hyperparameters.
    pub fn new(latent_dim: usize) -> Self {
        Hyperparameters {
            latent_dim,
            num_epochs: 10,
            learning_rate: 0.02,
            l2_penalty: 0.01,
            bias_l2_penalty: 0.005,
            graph_lambda: 0.01,
            graph_sample_rate: 1.0,
        }
    }

    /// Set the number of epochs.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the L2 penalty on the latent factors.
    pub fn l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    /// Set the L2 penalty on the biases.
    pub fn bias_l2_penalty(mut self, bias_l2_penalty: f32) -> Self {
        self.bias_l2_penalty = bias_l2_penalty;
        self
    }

    /// Set the strength of the graph regularization. Zero disables it.
    pub fn graph_lambda(mut self, graph_lambda: f32) -> Self {
        self.graph_lambda = graph_lambda;
        self
    }

    /// Set the fraction of graph edges visited each epoch.
    pub fn graph_sample_rate(mut self, graph_sample_rate: f64) -> Self {
        self.graph_sample_rate = graph_sample_rate;
        self
    }

    fn build<R: Rng>(
        &self,
        num_users: usize,
        num_items: usize,
        global_mean: f32,
        rng: &mut R,
    ) -> FactorizationModel {
        let user_factors = embedding_init(num_users, self.latent_dim, rng);
        let item_factors = embedding_init(num_items, self.latent_dim, rng);

        FactorizationModel {
            user_factors,
            item_factors,
            user_biases: Array1::zeros(num_users),
            item_biases: Array1::zeros(num_items),
            global_mean,
        }
    }

    /// Fit a model to the training interactions.
    ///
    /// `rng` is consumed in a fixed order: user factors, item factors,
    /// then for every epoch the interaction shuffle followed by the graph
    /// edge sample (only drawn when sampling fewer than all edges).
    pub fn fit<R: Rng>(
        &self,
        train: &TrainingInteractions,
        edges: &[Edge],
        num_users: usize,
        num_items: usize,
        rng: &mut R,
    ) -> Result<Fitted, FittingError> {
        check_indices(train, edges, num_users, num_items)?;

        let mut model = self.build(num_users, num_items, train.mean_rating(), rng);

        let mut order: Vec<usize> = (0..train.len()).collect();
        let graph_enabled = self.graph_lambda > 0.0 && !edges.is_empty();
        let batch_size = graph_batch_size(edges.len(), self.graph_sample_rate);
        let mut epoch_rmse = Vec::with_capacity(self.num_epochs);

        for epoch in 1..=self.num_epochs {
            let start = Instant::now();
            order.shuffle(rng);

            let mut squared_error = 0.0_f64;
            for &idx in &order {
                let error = model.sgd_step(
                    train.user_ids()[idx],
                    train.item_ids()[idx],
                    train.ratings()[idx],
                    self.learning_rate,
                    self.l2_penalty,
                    self.bias_l2_penalty,
                );
                squared_error += f64::from(error) * f64::from(error);
            }

            if graph_enabled {
                if batch_size < edges.len() {
                    for edge_idx in index::sample(rng, edges.len(), batch_size).iter() {
                        model.pull_together(&edges[edge_idx], self.graph_lambda, self.learning_rate);
                    }
                } else {
                    for edge in edges {
                        model.pull_together(edge, self.graph_lambda, self.learning_rate);
                    }
                }
            }

            let rmse = (squared_error / train.len().max(1) as f64).sqrt();
            info!(
                "Epoch {:>2}/{}  train_rmse={:.4}  time={:.2}s",
                epoch,
                self.num_epochs,
                rmse,
                start.elapsed().as_secs_f64()
            );
            epoch_rmse.push(rmse);
        }

        Ok(Fitted { model, epoch_rmse })
    }
}

fn check_indices(
    train: &TrainingInteractions,
    edges: &[Edge],
    num_users: usize,
    num_items: usize,
) -> Result<(), FittingError> {
    if let Some(&user_id) = train.user_ids().iter().find(|&&u| u >= num_users) {
        return Err(FittingError::UserOutOfRange { user_id, num_users });
    }

    let edge_items = edges.iter().flat_map(|edge| vec![edge.a, edge.b]);
    if let Some(item_id) = train
        .item_ids()
        .iter()
        .cloned()
        .chain(edge_items)
        .find(|&i| i >= num_items)
    {
        return Err(FittingError::ItemOutOfRange { item_id, num_items });
    }

    Ok(())
}

/// A fitted model together with its per-epoch training RMSE.
#[derive(Clone, Debug)]
pub struct Fitted {
    /// The trained model.
    pub model: FactorizationModel,
    /// Training RMSE after every epoch.
    pub epoch_rmse: Vec<f64>,
}

/// Parameters of a biased factorization model.
///
/// The latent dimension is shared by the user and item factors for the
/// lifetime of the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactorizationModel {
    #[serde(rename = "P")]
    user_factors: Array2<f32>,
    #[serde(rename = "Q")]
    item_factors: Array2<f32>,
    #[serde(rename = "bu")]
    user_biases: Array1<f32>,
    #[serde(rename = "bi")]
    item_biases: Array1<f32>,
    #[serde(rename = "globalMean")]
    global_mean: f32,
}

impl FactorizationModel {
    /// Assemble a model from its parameters, checking that shapes agree.
    pub fn from_parts(
        user_factors: Array2<f32>,
        item_factors: Array2<f32>,
        user_biases: Array1<f32>,
        item_biases: Array1<f32>,
        global_mean: f32,
    ) -> Result<Self, ArtifactError> {
        let model = FactorizationModel {
            user_factors,
            item_factors,
            user_biases,
            item_biases,
            global_mean,
        };
        model.check_shapes()?;

        Ok(model)
    }

    /// Check that factor and bias shapes are consistent.
    pub fn check_shapes(&self) -> Result<(), ArtifactError> {
        ArtifactError::check("bu", self.num_users(), self.user_biases.len())?;
        ArtifactError::check("bi", self.num_items(), self.item_biases.len())?;
        ArtifactError::check("Q columns", self.latent_dim(), self.item_factors.ncols())?;

        Ok(())
    }

    /// User factors `P`.
    pub fn user_factors(&self) -> &Array2<f32> {
        &self.user_factors
    }

    /// Item factors `Q`.
    pub fn item_factors(&self) -> &Array2<f32> {
        &self.item_factors
    }

    /// User biases.
    pub fn user_biases(&self) -> &Array1<f32> {
        &self.user_biases
    }

    /// Item biases.
    pub fn item_biases(&self) -> &Array1<f32> {
        &self.item_biases
    }

    /// Mean training rating.
    pub fn global_mean(&self) -> f32 {
        self.global_mean
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.user_factors.nrows()
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.item_factors.nrows()
    }

    /// Latent dimension.
    pub fn latent_dim(&self) -> usize {
        self.user_factors.ncols()
    }

    /// Dot product of two item embeddings.
    pub fn item_similarity(&self, first: ItemId, second: ItemId) -> f32 {
        self.item_factors
            .row(first)
            .dot(&self.item_factors.row(second))
    }

    /// Score every item for a query vector and bias.
    pub fn score_items(&self, embedding: ArrayView1<f32>, bias: f32) -> Array1<f32> {
        let offset = self.global_mean + bias;
        let mut scores = self.item_factors.dot(&embedding);
        Zip::from(&mut scores)
            .and(&self.item_biases)
            .for_each(|score, &item_bias| *score += offset + item_bias);

        scores
    }

    /// One SGD update on a single rating. Both factor updates read the
    /// values from before this step. Returns the prediction error.
    fn sgd_step(
        &mut self,
        user_id: UserId,
        item_id: ItemId,
        rating: f32,
        learning_rate: f32,
        l2_penalty: f32,
        bias_l2_penalty: f32,
    ) -> f32 {
        let user_vector = self.user_factors.row(user_id).to_owned();
        let item_vector = self.item_factors.row(item_id).to_owned();
        let user_bias = self.user_biases[user_id];
        let item_bias = self.item_biases[item_id];

        let prediction = self.global_mean + user_bias + item_bias + user_vector.dot(&item_vector);
        let error = rating - prediction;

        Zip::from(self.user_factors.row_mut(user_id))
            .and(&user_vector)
            .and(&item_vector)
            .for_each(|p, &pu, &qi| *p = pu + learning_rate * (error * qi - l2_penalty * pu));
        Zip::from(self.item_factors.row_mut(item_id))
            .and(&item_vector)
            .and(&user_vector)
            .for_each(|q, &qi, &pu| *q = qi + learning_rate * (error * pu - l2_penalty * qi));

        self.user_biases[user_id] = user_bias + learning_rate * (error - bias_l2_penalty * user_bias);
        self.item_biases[item_id] = item_bias + learning_rate * (error - bias_l2_penalty * item_bias);

        error
    }

    /// Pull the embeddings of the two endpoints of `edge` towards each
    /// other. Edges with non-positive weight are ignored.
    pub fn pull_together(&mut self, edge: &Edge, graph_lambda: f32, learning_rate: f32) {
        if edge.weight <= 0.0 {
            return;
        }

        let first = self.item_factors.row(edge.a).to_owned();
        let second = self.item_factors.row(edge.b).to_owned();
        let scale = graph_lambda * edge.weight;

        Zip::from(self.item_factors.row_mut(edge.a))
            .and(&first)
            .and(&second)
            .for_each(|x, &qa, &qb| *x = qa - learning_rate * (scale * (qa - qb)));
        Zip::from(self.item_factors.row_mut(edge.b))
            .and(&first)
            .and(&second)
            .for_each(|x, &qa, &qb| *x = qb + learning_rate * (scale * (qa - qb)));
    }
}

impl OnlineRankingModel for FactorizationModel {
    type UserRepresentation = BiasedUser;

    fn user_representation(&self, user_id: UserId) -> Result<BiasedUser, PredictionError> {
        if user_id >= self.num_users() {
            return Err(PredictionError::UnknownUser(user_id));
        }

        Ok(BiasedUser {
            embedding: self.user_factors.row(user_id).to_vec(),
            bias: self.user_biases[user_id],
        })
    }

    /// Weighted mean of the items' embeddings, normalized by the sum of
    /// absolute weights (or the item count when that sum is zero).
    fn fold_in(&self, items: &[(ItemId, f32)]) -> Result<BiasedUser, PredictionError> {
        if items.is_empty() {
            return Err(PredictionError::EmptyFoldIn);
        }

        let mut embedding = Array1::<f32>::zeros(self.latent_dim());
        let mut denominator = 0.0_f32;
        for &(item_id, weight) in items {
            if item_id >= self.num_items() {
                return Err(PredictionError::UnknownItem(item_id));
            }
            embedding.scaled_add(weight, &self.item_factors.row(item_id));
            denominator += weight.abs();
        }

        if denominator == 0.0 {
            denominator = items.len() as f32;
        }
        embedding /= denominator.max(MIN_FOLD_IN_DENOMINATOR);

        Ok(BiasedUser {
            embedding: embedding.to_vec(),
            bias: 0.0,
        })
    }

    fn predict(&self, user: &BiasedUser) -> Result<Vec<f32>, PredictionError> {
        if user.embedding.len() != self.latent_dim() {
            return Err(PredictionError::InvalidPredictionValue);
        }

        let scores = self.score_items(ArrayView1::from(&user.embedding[..]), user.bias);

        if scores.iter().all(|score| score.is_finite()) {
            Ok(scores.to_vec())
        } else {
            Err(PredictionError::InvalidPredictionValue)
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    use super::*;

    fn toy_train() -> TrainingInteractions {
        let mut train = TrainingInteractions::default();
        train.push(0, 0, 1.0);
        train.push(0, 1, -1.0);
        train.push(1, 0, 0.5);
        train.push(1, 2, 1.0);
        train
    }

    fn synthetic_train(num_users: usize, num_items: usize) -> TrainingInteractions {
        let mut train = TrainingInteractions::default();
        for user in 0..num_users {
            for item in 0..num_items {
                if (user + item) % 3 != 0 {
                    let rating = if (user % 2) == (item % 2) { 1.0 } else { -1.0 };
                    train.push(user, item, rating);
                }
            }
        }
        train
    }

    fn distance(model: &FactorizationModel, a: ItemId, b: ItemId) -> f32 {
        let diff = &model.item_factors().row(a) - &model.item_factors().row(b);
        diff.dot(&diff).sqrt()
    }

    #[test]
    fn zero_epochs_returns_initialization() {
        let fitted = Hyperparameters::new(4)
            .num_epochs(0)
            .fit(&toy_train(), &[], 2, 3, &mut XorShiftRng::seed_from_u64(42))
            .unwrap();

        let mut rng = XorShiftRng::seed_from_u64(42);
        let expected_p = embedding_init(2, 4, &mut rng);
        let expected_q = embedding_init(3, 4, &mut rng);

        assert_eq!(fitted.model.user_factors(), &expected_p);
        assert_eq!(fitted.model.item_factors(), &expected_q);
        assert!(fitted.model.user_biases().iter().all(|&b| b == 0.0));
        assert!(fitted.model.item_biases().iter().all(|&b| b == 0.0));
        assert!((fitted.model.global_mean() - 0.375).abs() < 1e-7);
        assert!(fitted.epoch_rmse.is_empty());
    }

    #[test]
    fn empty_training_set_has_zero_mean() {
        let fitted = Hyperparameters::new(2)
            .num_epochs(2)
            .fit(
                &TrainingInteractions::default(),
                &[],
                1,
                1,
                &mut XorShiftRng::seed_from_u64(0),
            )
            .unwrap();

        assert_eq!(fitted.model.global_mean(), 0.0);
        assert_eq!(fitted.epoch_rmse, vec![0.0, 0.0]);
    }

    #[test]
    fn training_is_deterministic() {
        let train = synthetic_train(12, 9);
        let edges = vec![
            Edge { a: 0, b: 1, weight: 0.5 },
            Edge { a: 2, b: 5, weight: 1.0 },
            Edge { a: 3, b: 8, weight: 0.2 },
        ];
        let hyper = Hyperparameters::new(6)
            .num_epochs(5)
            .graph_lambda(0.1)
            .graph_sample_rate(0.5);

        let first = hyper
            .fit(&train, &edges, 12, 9, &mut XorShiftRng::seed_from_u64(3))
            .unwrap();
        let second = hyper
            .fit(&train, &edges, 12, 9, &mut XorShiftRng::seed_from_u64(3))
            .unwrap();
        let other = hyper
            .fit(&train, &edges, 12, 9, &mut XorShiftRng::seed_from_u64(4))
            .unwrap();

        assert_eq!(first.model, second.model);
        assert_eq!(first.epoch_rmse, second.epoch_rmse);
        assert_ne!(first.model, other.model);
    }

    #[test]
    fn training_reduces_error() {
        let train = synthetic_train(20, 12);
        let fitted = Hyperparameters::new(8)
            .num_epochs(40)
            .learning_rate(0.05)
            .fit(&train, &[], 20, 12, &mut XorShiftRng::seed_from_u64(42))
            .unwrap();

        let first = fitted.epoch_rmse[0];
        let last = *fitted.epoch_rmse.last().unwrap();
        assert!(last < first, "rmse went from {} to {}", first, last);
    }

    #[test]
    fn graph_pull_moves_items_closer() {
        let mut model = FactorizationModel::from_parts(
            Array2::zeros((1, 3)),
            array![[1.0, 0.0, 0.5], [-1.0, 2.0, 0.0]],
            Array1::zeros(1),
            Array1::zeros(2),
            0.0,
        )
        .unwrap();
        let before = distance(&model, 0, 1);

        model.pull_together(&Edge { a: 0, b: 1, weight: 1.0 }, 0.1, 1.0);

        let after = distance(&model, 0, 1);
        assert!(after < before);
        assert!((after - 0.8 * before).abs() < 1e-5);
    }

    #[test]
    fn zero_weight_edges_are_ignored() {
        let mut model = FactorizationModel::from_parts(
            Array2::zeros((1, 2)),
            array![[1.0, 0.0], [0.0, 1.0]],
            Array1::zeros(1),
            Array1::zeros(2),
            0.0,
        )
        .unwrap();
        let before = model.clone();

        model.pull_together(&Edge { a: 0, b: 1, weight: 0.0 }, 0.1, 1.0);

        assert_eq!(model, before);
    }

    #[test]
    fn graph_batch_sizes() {
        assert_eq!(graph_batch_size(0, 0.5), 0);
        assert_eq!(graph_batch_size(10, 1.0), 10);
        assert_eq!(graph_batch_size(10, 0.25), 2);
        assert_eq!(graph_batch_size(10, 0.01), 1);
        assert_eq!(graph_batch_size(3, 0.5), 2);
        assert_eq!(graph_batch_size(30, 0.15), 4);
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let hyper = Hyperparameters::new(2);

        match hyper.fit(&toy_train(), &[], 1, 3, &mut XorShiftRng::seed_from_u64(0)) {
            Err(FittingError::UserOutOfRange { user_id: 1, .. }) => {}
            other => panic!("unexpected result: {:?}", other.map(|f| f.epoch_rmse)),
        }

        let edges = [Edge { a: 0, b: 5, weight: 1.0 }];
        match hyper.fit(&toy_train(), &edges, 2, 3, &mut XorShiftRng::seed_from_u64(0)) {
            Err(FittingError::ItemOutOfRange { item_id: 5, .. }) => {}
            other => panic!("unexpected result: {:?}", other.map(|f| f.epoch_rmse)),
        }
    }

    #[test]
    fn fold_in_is_weighted_mean() {
        let model = FactorizationModel::from_parts(
            Array2::zeros((1, 2)),
            array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]],
            Array1::zeros(1),
            array![0.0, 0.0, 0.5],
            0.25,
        )
        .unwrap();

        let user = model.fold_in(&[(0, 1.0), (1, 0.5)]).unwrap();
        assert!((user.embedding[0] - 1.0 / 1.5).abs() < 1e-6);
        assert!((user.embedding[1] - 0.5 / 1.5).abs() < 1e-6);
        assert_eq!(user.bias, 0.0);

        let scores = model.predict(&user).unwrap();
        assert!((scores[2] - (0.25 + 0.5 + 1.0)).abs() < 1e-6);

        let cancelled = model.fold_in(&[(0, 1.0), (0, -1.0)]).unwrap();
        assert_eq!(cancelled.embedding, vec![0.0, 0.0]);

        assert!(model.fold_in(&[]).is_err());
        assert!(model.fold_in(&[(9, 1.0)]).is_err());
    }

    #[test]
    fn known_user_scores() {
        let model = FactorizationModel::from_parts(
            array![[1.0, 2.0]],
            array![[1.0, 0.0], [0.0, 1.0]],
            array![0.5],
            array![0.1, -0.1],
            1.0,
        )
        .unwrap();

        let user = model.user_representation(0).unwrap();
        let scores = model.predict(&user).unwrap();

        assert!((scores[0] - (1.0 + 0.5 + 0.1 + 1.0)).abs() < 1e-6);
        assert!((scores[1] - (1.0 + 0.5 - 0.1 + 2.0)).abs() < 1e-6);
        assert!(model.user_representation(1).is_err());
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        assert!(FactorizationModel::from_parts(
            Array2::zeros((2, 3)),
            Array2::zeros((4, 2)),
            Array1::zeros(2),
            Array1::zeros(4),
            0.0,
        )
        .is_err());
        assert!(FactorizationModel::from_parts(
            Array2::zeros((2, 3)),
            Array2::zeros((4, 3)),
            Array1::zeros(1),
            Array1::zeros(4),
            0.0,
        )
        .is_err());
    }
}
