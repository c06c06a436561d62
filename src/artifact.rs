//! The persisted model: parameters plus the id tables needed to serve it.
use std::collections::{BTreeSet, HashMap};
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::data::{Dataset, Split};
use crate::datasets::ensure_exists;
use crate::models::factorization::FactorizationModel;
use crate::{ExternalItemId, ItemId, UserId};

/// Artifact error types.
#[derive(Debug, Fail)]
pub enum ArtifactError {
    /// Parallel arrays of the artifact disagree in length.
    #[fail(
        display = "Model arrays are inconsistent: expected {} to have length {}, found {}.",
        field, expected, actual
    )]
    ShapeMismatch {
        /// The array with the unexpected length.
        field: &'static str,
        /// Length implied by the other arrays.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
}

impl ArtifactError {
    pub(crate) fn check(field: &'static str, expected: usize, actual: usize) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(ArtifactError::ShapeMismatch {
                field,
                expected,
                actual,
            })
        }
    }
}

/// A trained model together with user and item id tables and the items
/// each user saw in training.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    /// Model parameters.
    pub model: FactorizationModel,
    /// External user ids, in index order.
    pub user_ids: Vec<String>,
    /// External item ids, in index order.
    pub item_ids: Vec<ExternalItemId>,
    /// Item titles, in index order.
    pub item_titles: Vec<String>,
    /// Sorted training item indices per user.
    pub train_user_items: Vec<Vec<ItemId>>,
}

impl ModelArtifact {
    /// Bundle a trained model with the tables of the run that produced it.
    pub fn new(model: FactorizationModel, dataset: &Dataset, split: &Split) -> Self {
        ModelArtifact {
            model,
            user_ids: dataset.user_ids().to_vec(),
            item_ids: dataset.item_ids().to_vec(),
            item_titles: dataset.item_titles().to_vec(),
            train_user_items: split
                .train_user_items
                .iter()
                .map(|items| items.iter().cloned().collect())
                .collect(),
        }
    }

    /// Check that every array agrees with the model's dimensions.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        self.model.check_shapes()?;

        let num_users = self.model.num_users();
        let num_items = self.model.num_items();
        ArtifactError::check("userIds", num_users, self.user_ids.len())?;
        ArtifactError::check("trainUserItems", num_users, self.train_user_items.len())?;
        ArtifactError::check("itemIds", num_items, self.item_ids.len())?;
        ArtifactError::check("itemTitles", num_items, self.item_titles.len())?;

        if let Some(&item_id) = self
            .train_user_items
            .iter()
            .flatten()
            .find(|&&item_id| item_id >= num_items)
        {
            return Err(ArtifactError::ShapeMismatch {
                field: "trainUserItems entries",
                expected: num_items,
                actual: item_id + 1,
            });
        }

        Ok(())
    }

    /// Index of a user by external id.
    pub fn user_index(&self, user_id: &str) -> Option<UserId> {
        self.user_ids.iter().position(|id| id == user_id)
    }

    /// Mapping from external item id to index.
    pub fn item_lookup(&self) -> HashMap<ExternalItemId, ItemId> {
        self.item_ids
            .iter()
            .enumerate()
            .map(|(idx, &item_id)| (item_id, idx))
            .collect()
    }

    /// Items the user saw in training.
    pub fn seen_items(&self, user_id: UserId) -> BTreeSet<ItemId> {
        self.train_user_items
            .get(user_id)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Write the artifact as JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), failure::Error> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;

        Ok(())
    }

    /// Read and validate an artifact.
    pub fn load(path: &Path) -> Result<Self, failure::Error> {
        ensure_exists(path)?;

        let reader = BufReader::new(File::open(path)?);
        let artifact: ModelArtifact = serde_json::from_reader(reader)?;
        artifact.validate()?;

        Ok(artifact)
    }
}
