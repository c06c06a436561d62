//! Top-K ranking metrics on held-out positives.
use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;

use crate::{ItemId, OnlineRankingModel, PredictionError, UserId};

/// Indices of the `k` highest scores, best first.
///
/// `k` is clamped to `[1, scores.len()]`. Ties are broken by ascending
/// index so the ranking is reproducible.
pub fn top_k_indices(scores: &[f32], k: usize) -> Vec<ItemId> {
    if scores.is_empty() {
        return Vec::new();
    }

    let k = k.max(1).min(scores.len());
    let by_score = |a: &usize, b: &usize| scores[*b].total_cmp(&scores[*a]).then(a.cmp(b));

    let mut indices: Vec<usize> = (0..scores.len()).collect();
    if k < indices.len() {
        indices.select_nth_unstable_by(k - 1, by_score);
        indices.truncate(k);
    }
    indices.sort_unstable_by(by_score);

    indices
}

/// Ranking quality of a single user's top-K list.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UserMetrics {
    /// Fraction of the list that are positives.
    pub precision: f64,
    /// Fraction of the positives found in the list.
    pub recall: f64,
    /// 1 if any positive is in the list.
    pub hit_rate: f64,
    /// Normalized discounted cumulative gain.
    pub ndcg: f64,
}

/// Metrics of a ranked list against a set of positives.
pub fn user_metrics(ranked: &[ItemId], positives: &BTreeSet<ItemId>) -> UserMetrics {
    let hits: Vec<bool> = ranked.iter().map(|item| positives.contains(item)).collect();
    let hit_count = hits.iter().filter(|&&hit| hit).count();

    let dcg: f64 = hits
        .iter()
        .enumerate()
        .filter(|&(_, &hit)| hit)
        .map(|(rank, _)| 1.0 / (rank as f64 + 2.0).log2())
        .sum();
    let idcg: f64 = (0..positives.len().min(ranked.len()))
        .map(|rank| 1.0 / (rank as f64 + 2.0).log2())
        .sum();

    UserMetrics {
        precision: hit_count as f64 / ranked.len().max(1) as f64,
        recall: hit_count as f64 / positives.len().max(1) as f64,
        hit_rate: if hit_count > 0 { 1.0 } else { 0.0 },
        ndcg: if idcg > 0.0 { dcg / idcg } else { 0.0 },
    }
}

/// Metrics averaged over all evaluated users.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingMetrics {
    /// Number of users that contributed to the averages.
    pub evaluated_users: usize,
    /// Mean precision@K.
    pub precision_at_k: f64,
    /// Mean recall@K.
    pub recall_at_k: f64,
    /// Mean hit rate@K.
    pub hit_rate_at_k: f64,
    /// Mean NDCG@K.
    pub ndcg_at_k: f64,
}

impl RankingMetrics {
    fn average(per_user: &[UserMetrics]) -> Self {
        if per_user.is_empty() {
            return RankingMetrics::default();
        }

        let count = per_user.len() as f64;
        let mean = |metric: fn(&UserMetrics) -> f64| per_user.iter().map(metric).sum::<f64>() / count;

        RankingMetrics {
            evaluated_users: per_user.len(),
            precision_at_k: mean(|m| m.precision),
            recall_at_k: mean(|m| m.recall),
            hit_rate_at_k: mean(|m| m.hit_rate),
            ndcg_at_k: mean(|m| m.ndcg),
        }
    }
}

/// Evaluate top-K ranking quality on held-out positives.
///
/// Every user with a non-empty positive set is scored against all items;
/// items the user saw in training are excluded from the ranking. Users
/// left with no candidate at all are skipped. Users are scored in
/// parallel but averaged in user order, so the result does not depend
/// on scheduling.
pub fn ranking_metrics<T: OnlineRankingModel + Sync>(
    model: &T,
    train_user_items: &[BTreeSet<ItemId>],
    test_positives: &BTreeMap<UserId, BTreeSet<ItemId>>,
    top_k: usize,
) -> Result<RankingMetrics, PredictionError> {
    let users: Vec<(&UserId, &BTreeSet<ItemId>)> = test_positives
        .iter()
        .filter(|(_, positives)| !positives.is_empty())
        .collect();

    let per_user: Vec<Option<UserMetrics>> = users
        .par_iter()
        .map(|&(&user_id, positives)| -> Result<Option<UserMetrics>, PredictionError> {
            let user = model.user_representation(user_id)?;
            let mut scores = model.predict(&user)?;

            if let Some(seen) = train_user_items.get(user_id) {
                for &item_id in seen {
                    scores[item_id] = std::f32::NEG_INFINITY;
                }
            }

            if !scores.iter().any(|score| score.is_finite()) {
                return Ok(None);
            }

            let ranked = top_k_indices(&scores, top_k);
            Ok(Some(user_metrics(&ranked, positives)))
        })
        .collect::<Result<_, PredictionError>>()?;

    let evaluated: Vec<UserMetrics> = per_user.into_iter().flatten().collect();

    Ok(RankingMetrics::average(&evaluated))
}

#[cfg(test)]
mod tests {
    use ndarray::{array, Array1, Array2};
    use proptest::prelude::*;

    use super::*;
    use crate::models::factorization::FactorizationModel;

    fn set(items: &[ItemId]) -> BTreeSet<ItemId> {
        items.iter().cloned().collect()
    }

    #[test]
    fn top_k_orders_descending_with_index_ties() {
        let scores = [0.5, 2.0, 0.5, -1.0, 2.0, std::f32::NEG_INFINITY];

        assert_eq!(top_k_indices(&scores, 3), vec![1, 4, 0]);
        assert_eq!(top_k_indices(&scores, 100), vec![1, 4, 0, 2, 3, 5]);
        assert_eq!(top_k_indices(&scores, 0), vec![1]);
        assert!(top_k_indices(&[], 3).is_empty());
    }

    #[test]
    fn metrics_for_known_list() {
        let metrics = user_metrics(&[4, 1, 7], &set(&[1, 9]));

        assert!((metrics.precision - 1.0 / 3.0).abs() < 1e-12);
        assert!((metrics.recall - 0.5).abs() < 1e-12);
        assert_eq!(metrics.hit_rate, 1.0);

        let dcg = 1.0 / 3f64.log2();
        let idcg = 1.0 + 1.0 / 3f64.log2();
        assert!((metrics.ndcg - dcg / idcg).abs() < 1e-12);
    }

    #[test]
    fn perfect_list_has_unit_ndcg() {
        let metrics = user_metrics(&[2, 3], &set(&[2, 3, 5]));

        assert_eq!(metrics.hit_rate, 1.0);
        assert!((metrics.ndcg - 1.0).abs() < 1e-12);
        assert!((metrics.precision - 1.0).abs() < 1e-12);
    }

    fn model() -> FactorizationModel {
        FactorizationModel::from_parts(
            array![[1.0, 0.0], [0.0, 1.0], [0.5, 0.5]],
            array![[3.0, 0.0], [2.0, 0.0], [0.0, 3.0], [0.0, 2.0]],
            Array1::zeros(3),
            Array1::zeros(4),
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn seen_items_are_excluded_from_ranking() {
        let train_user_items = vec![set(&[0]), set(&[2]), set(&[0, 1, 2, 3])];
        let mut test_positives = BTreeMap::new();
        test_positives.insert(0, set(&[1]));
        test_positives.insert(1, set(&[1]));
        test_positives.insert(2, set(&[3]));

        let metrics = ranking_metrics(&model(), &train_user_items, &test_positives, 1).unwrap();

        // User 2 has nothing left to rank and is skipped; user 0 ranks
        // item 1 first once item 0 is masked; user 1 ranks item 3 first.
        assert_eq!(metrics.evaluated_users, 2);
        assert!((metrics.precision_at_k - 0.5).abs() < 1e-12);
        assert!((metrics.hit_rate_at_k - 0.5).abs() < 1e-12);
        assert!((metrics.recall_at_k - 0.5).abs() < 1e-12);
        assert!((metrics.ndcg_at_k - 0.5).abs() < 1e-12);
    }

    #[test]
    fn no_positives_means_no_evaluation() {
        let metrics = ranking_metrics(&model(), &[], &BTreeMap::new(), 10).unwrap();

        assert_eq!(metrics, RankingMetrics::default());
    }

    proptest! {
        #[test]
        fn metrics_are_bounded(
            factors in proptest::collection::vec(-1.0f32..1.0, 24),
            seen in proptest::collection::btree_set(0usize..8, 0..8),
            positives in proptest::collection::btree_set(0usize..8, 1..5),
            top_k in 1usize..12,
        ) {
            let user_factors = Array2::from_shape_vec((1, 3), factors[..3].to_vec()).unwrap();
            let item_factors = Array2::from_shape_vec((7, 3), factors[3..].to_vec()).unwrap();
            let model = FactorizationModel::from_parts(
                user_factors,
                item_factors,
                Array1::zeros(1),
                Array1::zeros(7),
                0.0,
            ).unwrap();

            let seen: BTreeSet<ItemId> = seen.into_iter().filter(|&i| i < 7).collect();
            let positives: BTreeSet<ItemId> = positives.into_iter().filter(|&i| i < 7).collect();
            let mut test_positives = BTreeMap::new();
            test_positives.insert(0, positives);

            let metrics = ranking_metrics(&model, &[seen], &test_positives, top_k).unwrap();

            for value in &[
                metrics.precision_at_k,
                metrics.recall_at_k,
                metrics.hit_rate_at_k,
                metrics.ndcg_at_k,
            ] {
                prop_assert!(*value >= 0.0 && *value <= 1.0 + 1e-12);
            }
        }
    }
}
