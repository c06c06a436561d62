//! Rating records, dense indexing and the per-user train/test split.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::seq::index;
use rand::Rng;
use serde_json::Value;

use crate::{ExternalItemId, ItemId, UserId};

/// A single raw rating as found in the ratings source.
///
/// Fields are kept loosely typed: invalid entries are dropped during
/// indexing rather than failing deserialization.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RatingRecord {
    /// External item id; an integer or an integer string.
    #[serde(rename = "itemId", alias = "animeId", default)]
    pub item_id: Value,
    /// Normalized rating.
    #[serde(rename = "normalizedScore", default)]
    pub normalized_score: Value,
    /// Display title.
    #[serde(default)]
    pub title: Option<Value>,
}

/// A user together with the ratings they gave.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserRecord {
    /// External user id.
    #[serde(rename = "userId", default)]
    pub user_id: Value,
    /// The user's ratings.
    #[serde(default)]
    pub ratings: Vec<RatingRecord>,
}

/// Parse an external item id from a loosely typed value.
pub fn parse_external_id(value: &Value) -> Option<ExternalItemId> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|x| x.is_finite())
                .map(|x| x.trunc() as ExternalItemId)
        }),
        Value::String(string) => string.trim().parse().ok(),
        _ => None,
    }
}

fn parse_score(value: &Value) -> Option<f32> {
    value.as_f64().filter(|x| x.is_finite()).map(|x| x as f32)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(string) => string.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A single rating in dense index space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    user_id: UserId,
    item_id: ItemId,
    rating: f32,
}

impl Interaction {
    /// Build a new interaction.
    pub fn new(user_id: UserId, item_id: ItemId, rating: f32) -> Self {
        Interaction {
            user_id,
            item_id,
            rating,
        }
    }

    /// User index.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Item index.
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// Rating value.
    pub fn rating(&self) -> f32 {
        self.rating
    }
}

/// Ratings mapped into dense zero-based user and item index spaces.
///
/// Users and items are indexed in first-seen order, which keeps index
/// assignment reproducible for identical input.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    user_ids: Vec<String>,
    user_index: HashMap<String, UserId>,
    item_ids: Vec<ExternalItemId>,
    item_titles: Vec<String>,
    item_index: HashMap<ExternalItemId, ItemId>,
    interactions: Vec<Interaction>,
}

impl Dataset {
    /// Index raw user records.
    ///
    /// Users with blank ids are skipped. Ratings whose item id is not an
    /// integer or whose score is not a finite number are dropped. The
    /// title seen with the first occurrence of an item is kept.
    pub fn from_records(users: &[UserRecord]) -> Self {
        let mut dataset = Dataset::default();

        for user in users {
            let user_id = value_to_string(&user.user_id).trim().to_owned();
            if user_id.is_empty() {
                continue;
            }
            let user_idx = dataset.upsert_user(user_id);

            for rating in &user.ratings {
                let item_id = match parse_external_id(&rating.item_id) {
                    Some(item_id) => item_id,
                    None => continue,
                };
                let score = match parse_score(&rating.normalized_score) {
                    Some(score) => score,
                    None => continue,
                };

                let item_idx = dataset.upsert_item(item_id, rating.title.as_ref());
                dataset
                    .interactions
                    .push(Interaction::new(user_idx, item_idx, score));
            }
        }

        dataset
    }

    fn upsert_user(&mut self, user_id: String) -> UserId {
        if let Some(&idx) = self.user_index.get(&user_id) {
            return idx;
        }

        let idx = self.user_ids.len();
        self.user_index.insert(user_id.clone(), idx);
        self.user_ids.push(user_id);
        idx
    }

    fn upsert_item(&mut self, item_id: ExternalItemId, title: Option<&Value>) -> ItemId {
        if let Some(&idx) = self.item_index.get(&item_id) {
            return idx;
        }

        let title = match title {
            Some(value) if !value.is_null() => value_to_string(value),
            _ => format!("Item {}", item_id),
        };

        let idx = self.item_ids.len();
        self.item_index.insert(item_id, idx);
        self.item_ids.push(item_id);
        self.item_titles.push(title);
        idx
    }

    /// External user ids, in index order.
    pub fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    /// External item ids, in index order.
    pub fn item_ids(&self) -> &[ExternalItemId] {
        &self.item_ids
    }

    /// Item titles, in index order.
    pub fn item_titles(&self) -> &[String] {
        &self.item_titles
    }

    /// Mapping from external item id to dense index.
    pub fn item_index(&self) -> &HashMap<ExternalItemId, ItemId> {
        &self.item_index
    }

    /// All valid interactions, in input order.
    pub fn data(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Number of interactions.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether there are no interactions.
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.user_ids.len()
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.item_ids.len()
    }

    fn per_user(&self) -> Vec<Vec<(ItemId, f32)>> {
        let mut per_user = vec![Vec::new(); self.num_users()];

        for interaction in &self.interactions {
            per_user[interaction.user_id()].push((interaction.item_id(), interaction.rating()));
        }

        per_user
    }
}

/// Training interactions stored as parallel arrays.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingInteractions {
    user_ids: Vec<UserId>,
    item_ids: Vec<ItemId>,
    ratings: Vec<f32>,
}

impl TrainingInteractions {
    /// Append an interaction.
    pub fn push(&mut self, user_id: UserId, item_id: ItemId, rating: f32) {
        self.user_ids.push(user_id);
        self.item_ids.push(item_id);
        self.ratings.push(rating);
    }

    /// Number of interactions.
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    /// Whether there are no interactions.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    /// User indices.
    pub fn user_ids(&self) -> &[UserId] {
        &self.user_ids
    }

    /// Item indices.
    pub fn item_ids(&self) -> &[ItemId] {
        &self.item_ids
    }

    /// Ratings.
    pub fn ratings(&self) -> &[f32] {
        &self.ratings
    }

    /// Iterate over `(user, item, rating)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (UserId, ItemId, f32)> + '_ {
        izip!(&self.user_ids, &self.item_ids, &self.ratings).map(|(&u, &i, &r)| (u, i, r))
    }

    /// Mean rating, or zero when empty.
    pub fn mean_rating(&self) -> f32 {
        if self.ratings.is_empty() {
            return 0.0;
        }

        let total: f64 = self.ratings.iter().map(|&r| f64::from(r)).sum();
        (total / self.ratings.len() as f64) as f32
    }
}

impl<'a> From<&'a [Interaction]> for TrainingInteractions {
    fn from(interactions: &'a [Interaction]) -> Self {
        let mut train = TrainingInteractions::default();
        for interaction in interactions {
            train.push(
                interaction.user_id(),
                interaction.item_id(),
                interaction.rating(),
            );
        }
        train
    }
}

/// Result of the per-user train/test split.
#[derive(Clone, Debug, Default)]
pub struct Split {
    /// Interactions used for training.
    pub train: TrainingInteractions,
    /// Items each user interacted with in the training set.
    pub train_user_items: Vec<BTreeSet<ItemId>>,
    /// Held-out items rated above the positivity threshold, per user.
    pub test_positives: BTreeMap<UserId, BTreeSet<ItemId>>,
    /// Number of users for which any interaction was held out.
    pub users_with_holdout: usize,
}

impl Split {
    /// Number of users with at least one held-out positive.
    pub fn users_with_positives(&self) -> usize {
        self.test_positives.len()
    }
}

/// Number of interactions held out for a user with `num_ratings` ratings.
///
/// Users below `min_ratings_for_test` keep everything for training;
/// everyone else holds out `round(n * test_ratio)` ratings, clamped so
/// that at least one rating is held out and one is kept.
pub fn holdout_count(num_ratings: usize, test_ratio: f64, min_ratings_for_test: usize) -> usize {
    if num_ratings < min_ratings_for_test || num_ratings < 2 {
        return 0;
    }

    let rounded = (num_ratings as f64 * test_ratio).round_ties_even();
    let count = if rounded.is_finite() && rounded > 0.0 {
        rounded as usize
    } else {
        0
    };

    count.max(1).min(num_ratings - 1)
}

/// Split every user's interactions into training and held-out parts.
///
/// Users are visited in index order and the held-out slots of each user
/// are drawn without replacement from `rng`, so the split is fully
/// determined by the generator state and the input order. Held-out
/// ratings above `positive_threshold` become that user's test positives;
/// the remaining held-out ratings are discarded.
pub fn user_based_split<R: Rng>(
    dataset: &Dataset,
    rng: &mut R,
    test_ratio: f64,
    min_ratings_for_test: usize,
    positive_threshold: f32,
) -> Split {
    let mut split = Split {
        train: TrainingInteractions::default(),
        train_user_items: vec![BTreeSet::new(); dataset.num_users()],
        test_positives: BTreeMap::new(),
        users_with_holdout: 0,
    };

    for (user_idx, ratings) in dataset.per_user().into_iter().enumerate() {
        let num_ratings = ratings.len();
        let num_holdout = holdout_count(num_ratings, test_ratio, min_ratings_for_test);

        let mut held_out = vec![false; num_ratings];
        if num_holdout > 0 {
            split.users_with_holdout += 1;
            for slot in index::sample(rng, num_ratings, num_holdout).iter() {
                held_out[slot] = true;
            }
        }

        for ((item_idx, rating), is_held_out) in ratings.into_iter().zip(held_out) {
            if is_held_out {
                if rating > positive_threshold {
                    split
                        .test_positives
                        .entry(user_idx)
                        .or_insert_with(BTreeSet::new)
                        .insert(item_idx);
                }
                continue;
            }

            split.train.push(user_idx, item_idx, rating);
            split.train_user_items[user_idx].insert(item_idx);
        }
    }

    debug!(
        train_interactions = split.train.len(),
        users_with_holdout = split.users_with_holdout,
        users_with_positives = split.users_with_positives(),
        "split complete"
    );

    split
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;
    use serde_json::json;

    use super::*;

    fn records(value: Value) -> Vec<UserRecord> {
        serde_json::from_value(value).unwrap()
    }

    fn synthetic(num_users: usize, ratings_per_user: usize) -> Dataset {
        let users: Vec<UserRecord> = (0..num_users)
            .map(|user| UserRecord {
                user_id: json!(format!("user{}", user)),
                ratings: (0..ratings_per_user + user % 5)
                    .map(|slot| RatingRecord {
                        item_id: json!((user * 7 + slot * 3) % 40),
                        normalized_score: json!(((user + slot) % 5) as f64 - 2.0),
                        title: None,
                    })
                    .collect(),
            })
            .collect();

        Dataset::from_records(&users)
    }

    #[test]
    fn indexes_in_first_seen_order() {
        let data = Dataset::from_records(&records(json!([
            {"userId": "u1", "ratings": [
                {"itemId": 100, "normalizedScore": 1.0, "title": "First"},
                {"itemId": 200, "normalizedScore": -1.0}
            ]},
            {"userId": "u2", "ratings": [
                {"animeId": "100", "normalizedScore": 0.5, "title": "Second"},
                {"itemId": 300, "normalizedScore": 1.0}
            ]}
        ])));

        assert_eq!(data.user_ids(), &["u1".to_owned(), "u2".to_owned()][..]);
        assert_eq!(data.item_ids(), &[100, 200, 300][..]);
        assert_eq!(data.item_titles()[0], "First");
        assert_eq!(data.item_titles()[1], "Item 200");
        assert_eq!(
            data.data(),
            &[
                Interaction::new(0, 0, 1.0),
                Interaction::new(0, 1, -1.0),
                Interaction::new(1, 0, 0.5),
                Interaction::new(1, 2, 1.0),
            ][..]
        );
    }

    #[test]
    fn drops_invalid_entries() {
        let data = Dataset::from_records(&records(json!([
            {"userId": "  ", "ratings": [{"itemId": 1, "normalizedScore": 1.0}]},
            {"userId": "u1", "ratings": [
                {"itemId": "abc", "normalizedScore": 1.0},
                {"normalizedScore": 1.0},
                {"itemId": 2, "normalizedScore": "high"},
                {"itemId": 3},
                {"itemId": 4, "normalizedScore": 0.25}
            ]}
        ])));

        assert_eq!(data.num_users(), 1);
        assert_eq!(data.item_ids(), &[4][..]);
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn repeated_user_ids_share_an_index() {
        let data = Dataset::from_records(&records(json!([
            {"userId": "u1", "ratings": [{"itemId": 1, "normalizedScore": 1.0}]},
            {"userId": 7, "ratings": [{"itemId": 1, "normalizedScore": 1.0}]},
            {"userId": "u1", "ratings": [{"itemId": 2, "normalizedScore": 1.0}]}
        ])));

        assert_eq!(data.user_ids(), &["u1".to_owned(), "7".to_owned()][..]);
        assert_eq!(data.data()[2].user_id(), 0);
    }

    #[test]
    fn holdout_count_bounds() {
        assert_eq!(holdout_count(5, 0.15, 8), 0);
        assert_eq!(holdout_count(8, 0.15, 8), 1);
        assert_eq!(holdout_count(10, 0.25, 8), 2);
        assert_eq!(holdout_count(10, 0.95, 8), 9);
        assert_eq!(holdout_count(20, 0.0, 8), 1);
        assert_eq!(holdout_count(1, 0.5, 0), 0);
    }

    #[test]
    fn holdout_count_rounds_ties_to_even() {
        // 30 * 0.15 is exactly 4.5.
        assert_eq!(holdout_count(30, 0.15, 8), 4);
        assert_eq!(holdout_count(10, 0.25, 8), 2);
        assert_eq!(holdout_count(10, 0.35, 8), 4);
    }

    #[test]
    fn small_users_are_not_held_out() {
        let data = Dataset::from_records(&records(json!([
            {"userId": "u1", "ratings": [
                {"itemId": 100, "normalizedScore": 1.0},
                {"itemId": 200, "normalizedScore": -1.0}
            ]},
            {"userId": "u2", "ratings": [
                {"itemId": 100, "normalizedScore": 0.5},
                {"itemId": 300, "normalizedScore": 1.0}
            ]}
        ])));

        let split = user_based_split(&data, &mut XorShiftRng::seed_from_u64(42), 0.15, 3, 0.0);

        assert_eq!(split.train.len(), 4);
        assert_eq!(split.users_with_holdout, 0);
        assert!(split.test_positives.is_empty());
        assert!((split.train.mean_rating() - 0.375).abs() < 1e-7);
    }

    #[test]
    fn split_is_deterministic() {
        let data = synthetic(30, 10);

        let first = user_based_split(&data, &mut XorShiftRng::seed_from_u64(7), 0.2, 8, 0.0);
        let second = user_based_split(&data, &mut XorShiftRng::seed_from_u64(7), 0.2, 8, 0.0);

        assert_eq!(first.train, second.train);
        assert_eq!(first.test_positives, second.test_positives);
        assert_eq!(first.train_user_items, second.train_user_items);
    }

    #[test]
    fn negative_holdouts_are_discarded() {
        let data = Dataset::from_records(&records(json!([
            {"userId": "u1", "ratings": [
                {"itemId": 1, "normalizedScore": -1.0},
                {"itemId": 2, "normalizedScore": -1.0},
                {"itemId": 3, "normalizedScore": -1.0},
                {"itemId": 4, "normalizedScore": -1.0}
            ]}
        ])));

        let split = user_based_split(&data, &mut XorShiftRng::seed_from_u64(1), 0.5, 2, 0.0);

        assert_eq!(split.users_with_holdout, 1);
        assert_eq!(split.users_with_positives(), 0);
        assert_eq!(split.train.len(), 2);
    }

    proptest! {
        #[test]
        fn split_is_disjoint_and_bounded(
            seed in any::<u64>(),
            num_users in 1usize..20,
            ratings_per_user in 1usize..15,
            test_ratio in 0.0f64..1.0,
            min_ratings in 2usize..10,
        ) {
            let data = synthetic(num_users, ratings_per_user);
            let split = user_based_split(
                &data,
                &mut XorShiftRng::seed_from_u64(seed),
                test_ratio,
                min_ratings,
                -10.0,
            );

            let mut train_counts = vec![0usize; data.num_users()];
            for (user, _, _) in split.train.iter() {
                train_counts[user] += 1;
            }

            for (user, ratings) in data.per_user().iter().enumerate() {
                let held_out = ratings.len() - train_counts[user];
                if ratings.len() >= min_ratings {
                    prop_assert!(held_out >= 1 && held_out < ratings.len());
                } else {
                    prop_assert_eq!(held_out, 0);
                }
            }

            // Synthetic users never repeat an item, so held-out and
            // training items are disjoint sets.
            for (user, positives) in &split.test_positives {
                prop_assert!(positives.is_disjoint(&split.train_user_items[*user]));
            }
        }
    }
}
