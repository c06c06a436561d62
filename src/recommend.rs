//! Recommendations for known users or ad-hoc lists of items, with
//! per-recommendation explanations.
use std::collections::BTreeSet;
use std::fmt::Write;

use crate::artifact::ModelArtifact;
use crate::evaluation::top_k_indices;
use crate::models::BiasedUser;
use crate::{ExternalItemId, ItemId, OnlineRankingModel, PredictionError};

const CANDIDATE_OVERFETCH: usize = 4;

/// Recommendation error types.
#[derive(Debug, Fail)]
pub enum RecommendError {
    /// Neither a user id nor a watched list was given.
    #[fail(display = "Provide either a user id or a list of watched items.")]
    MissingQuery,
    /// The user id is not part of the model.
    #[fail(display = "User id not found in model: {}", _0)]
    UnknownUser(String),
    /// None of the watched items are part of the model.
    #[fail(display = "None of the watched item ids exist in the trained model.")]
    NoKnownItems,
    /// A watched-list token could not be parsed.
    #[fail(display = "Invalid watched item: {:?}", _0)]
    InvalidWatched(String),
    /// Every item was filtered out.
    #[fail(display = "No candidate items left after filtering.")]
    NoCandidates,
    /// The model failed to score the query.
    #[fail(display = "{}", _0)]
    Prediction(#[cause] PredictionError),
}

impl From<PredictionError> for RecommendError {
    fn from(error: PredictionError) -> Self {
        RecommendError::Prediction(error)
    }
}

/// An item in an ad-hoc query, with its weight.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedItem {
    /// External item id.
    pub item_id: ExternalItemId,
    /// Query weight.
    pub weight: f32,
}

/// Parse a watched list such as `"1535,9253:1.5,5114:0.7"`.
///
/// Items are comma separated, each optionally followed by `:weight`
/// (default 1.0). Empty tokens are ignored.
pub fn parse_watched(value: &str) -> Result<Vec<WatchedItem>, RecommendError> {
    let mut items = Vec::new();

    for token in value.split(',').map(str::trim).filter(|token| !token.is_empty()) {
        let invalid = || RecommendError::InvalidWatched(token.to_owned());

        let (item_id, weight) = match token.find(':') {
            Some(pos) => (
                token[..pos].trim().parse().map_err(|_| invalid())?,
                token[pos + 1..].trim().parse().map_err(|_| invalid())?,
            ),
            None => (token.parse().map_err(|_| invalid())?, 1.0),
        };

        items.push(WatchedItem { item_id, weight });
    }

    Ok(items)
}

/// What to recommend for.
#[derive(Clone, Debug, PartialEq)]
pub enum Query<'a> {
    /// A user seen during training.
    User(&'a str),
    /// A weighted list of items.
    Watched(&'a [WatchedItem]),
}

impl<'a> Query<'a> {
    /// Pick the query mode: a non-blank user id wins over a watched list.
    pub fn from_request(user_id: &'a str, watched: &'a [WatchedItem]) -> Result<Self, RecommendError> {
        let user_id = user_id.trim();

        if !user_id.is_empty() {
            Ok(Query::User(user_id))
        } else if !watched.is_empty() {
            Ok(Query::Watched(watched))
        } else {
            Err(RecommendError::MissingQuery)
        }
    }
}

/// Output size and filtering options.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Options {
    /// Number of recommendations.
    pub top_n: usize,
    /// Number of explaining items per recommendation.
    pub explain_top: usize,
    /// Recommendations scoring below this are dropped.
    pub min_score: f32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            top_n: 15,
            explain_top: 3,
            min_score: std::f32::NEG_INFINITY,
        }
    }
}

/// One item contributing to a recommendation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    /// External id of the contributing item.
    pub item_id: ExternalItemId,
    /// Its title.
    pub title: String,
    /// Query weight times embedding similarity.
    pub contribution: f32,
}

/// A recommended item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    /// External item id.
    pub item_id: ExternalItemId,
    /// Title.
    pub title: String,
    /// Predicted score.
    pub score: f32,
    /// Items of the query that contribute most, strongest first.
    pub why: Vec<Explanation>,
}

/// The result of a recommendation request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    /// Query mode and size, e.g. `user:<id>` or `watched:<n>`.
    pub source: String,
    /// Number of recommendations.
    pub count: usize,
    /// Recommendations, best first.
    pub recommendations: Vec<Recommendation>,
    /// Watched ids that are not part of the model.
    #[serde(skip)]
    pub skipped: Vec<ExternalItemId>,
}

impl Recommendations {
    /// Human-readable rendering.
    pub fn to_plain_text(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "Source: {}", self.source);
        let _ = writeln!(out, "Recommendations: {}", self.count);
        let _ = writeln!(out);

        for (rank, item) in self.recommendations.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>2}. {} (ID {})  score={:.4}",
                rank + 1,
                item.title,
                item.item_id,
                item.score
            );
            if !item.why.is_empty() {
                let why: Vec<String> = item
                    .why
                    .iter()
                    .map(|x| format!("{} ({:.3})", x.title, x.contribution))
                    .collect();
                let _ = writeln!(out, "    why: {}", why.join(", "));
            }
        }

        out
    }
}

struct ResolvedQuery {
    source: String,
    user: BiasedUser,
    seen: BTreeSet<ItemId>,
    basis: Vec<(ItemId, f32)>,
    skipped: Vec<ExternalItemId>,
}

fn resolve(artifact: &ModelArtifact, query: &Query) -> Result<ResolvedQuery, RecommendError> {
    match *query {
        Query::User(user_id) => {
            let user_idx = artifact
                .user_index(user_id)
                .ok_or_else(|| RecommendError::UnknownUser(user_id.to_owned()))?;
            let seen = artifact.seen_items(user_idx);
            let basis = seen.iter().map(|&item| (item, 1.0)).collect();

            Ok(ResolvedQuery {
                source: format!("user:{}", user_id),
                user: artifact.model.user_representation(user_idx)?,
                seen,
                basis,
                skipped: Vec::new(),
            })
        }
        Query::Watched(watched) => {
            let lookup = artifact.item_lookup();
            let mut basis = Vec::new();
            let mut skipped = Vec::new();

            for item in watched {
                match lookup.get(&item.item_id) {
                    Some(&idx) => basis.push((idx, item.weight)),
                    None => skipped.push(item.item_id),
                }
            }

            if basis.is_empty() {
                return Err(RecommendError::NoKnownItems);
            }
            if !skipped.is_empty() {
                warn!("Skipped unknown item ids: {:?}", skipped);
            }

            Ok(ResolvedQuery {
                source: format!("watched:{}", basis.len()),
                user: artifact.model.fold_in(&basis)?,
                seen: basis.iter().map(|&(idx, _)| idx).collect(),
                basis,
                skipped,
            })
        }
    }
}

fn explain(
    artifact: &ModelArtifact,
    basis: &[(ItemId, f32)],
    item_idx: ItemId,
    explain_top: usize,
) -> Vec<Explanation> {
    let mut contributions: Vec<(ItemId, f32)> = basis
        .iter()
        .map(|&(basis_idx, weight)| {
            (
                basis_idx,
                weight * artifact.model.item_similarity(basis_idx, item_idx),
            )
        })
        .collect();
    contributions.sort_by(|a, b| b.1.total_cmp(&a.1));

    contributions
        .into_iter()
        .take(explain_top)
        .map(|(basis_idx, contribution)| Explanation {
            item_id: artifact.item_ids[basis_idx],
            title: artifact.item_titles[basis_idx].clone(),
            contribution,
        })
        .collect()
}

/// Recommend items for a query.
///
/// Every item is scored, items the query already covers are excluded,
/// and the best `top_n` items scoring at least `min_score` are returned.
/// Each recommendation is explained by the query items whose weighted
/// embedding similarity to it is largest.
pub fn recommend(
    artifact: &ModelArtifact,
    query: &Query,
    options: &Options,
) -> Result<Recommendations, RecommendError> {
    let resolved = resolve(artifact, query)?;

    let mut scores = artifact.model.predict(&resolved.user)?;
    for &item_idx in &resolved.seen {
        scores[item_idx] = std::f32::NEG_INFINITY;
    }
    if !scores.iter().any(|score| score.is_finite()) {
        return Err(RecommendError::NoCandidates);
    }

    let mut recommendations = Vec::with_capacity(options.top_n.min(scores.len()));
    if options.top_n > 0 {
        let num_candidates = options.top_n.saturating_mul(CANDIDATE_OVERFETCH);

        for item_idx in top_k_indices(&scores, num_candidates) {
            let score = scores[item_idx];
            if !score.is_finite() || score < options.min_score {
                continue;
            }

            let why = if options.explain_top > 0 && !resolved.basis.is_empty() {
                explain(artifact, &resolved.basis, item_idx, options.explain_top)
            } else {
                Vec::new()
            };

            recommendations.push(Recommendation {
                item_id: artifact.item_ids[item_idx],
                title: artifact.item_titles[item_idx].clone(),
                score,
                why,
            });
            if recommendations.len() >= options.top_n {
                break;
            }
        }
    }

    Ok(Recommendations {
        source: resolved.source,
        count: recommendations.len(),
        recommendations,
        skipped: resolved.skipped,
    })
}
