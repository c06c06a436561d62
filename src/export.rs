//! Web export: item embeddings and biases of a trained model, quantized
//! for shipping to a browser.
use std::fmt;
use std::fs::{create_dir_all, File};
use std::io::BufWriter;
use std::path::Path;
use std::str::FromStr;

use crate::artifact::{ArtifactError, ModelArtifact};
use crate::ExternalItemId;

/// Tag of the compact layout.
pub const COMPACT_FORMAT: &str = "model-mf-compact-v1";

/// Output layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    /// Parallel arrays.
    Compact,
    /// One object per item.
    Legacy,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat::Compact
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "compact" => Ok(ExportFormat::Compact),
            "legacy" => Ok(ExportFormat::Legacy),
            other => Err(format!("unknown export format: {}", other)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ExportFormat::Compact => write!(f, "compact"),
            ExportFormat::Legacy => write!(f, "legacy"),
        }
    }
}

/// Round to `digits` decimal places; negative digit counts mean 0.
pub fn quantize(value: f32, digits: i32) -> f64 {
    let scale = 10f64.powi(digits.max(0));
    (f64::from(value) * scale).round_ties_even() / scale
}

/// A single item of the legacy layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebItem {
    /// External id.
    pub item_id: ExternalItemId,
    /// Title.
    pub title: String,
    /// Item bias.
    pub bias: f64,
    /// Item factors.
    pub embedding: Vec<f64>,
}

/// Exported model in either layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WebModel {
    /// Parallel arrays, tagged with [`COMPACT_FORMAT`].
    #[serde(rename_all = "camelCase")]
    Compact {
        /// Always [`COMPACT_FORMAT`].
        format: String,
        /// Creation time, UTC.
        generated_at: String,
        /// Path of the exported artifact.
        source_model: String,
        /// Global mean rating.
        global_mean: f64,
        /// Latent dimension.
        factors: usize,
        /// Number of items.
        item_count: usize,
        /// External item ids.
        item_ids: Vec<ExternalItemId>,
        /// Item titles.
        titles: Vec<String>,
        /// Item biases.
        biases: Vec<f64>,
        /// Item factors, one row per item.
        embeddings: Vec<Vec<f64>>,
    },
    /// One object per item.
    #[serde(rename_all = "camelCase")]
    Legacy {
        /// Creation time, UTC.
        generated_at: String,
        /// Path of the exported artifact.
        source_model: String,
        /// Global mean rating.
        global_mean: f64,
        /// Latent dimension.
        factors: usize,
        /// Number of items.
        item_count: usize,
        /// Items in index order.
        items: Vec<WebItem>,
    },
}

impl WebModel {
    /// Build the export of an artifact.
    ///
    /// Only item-side parameters are exported. Fails if the item arrays
    /// disagree in length.
    pub fn from_artifact(
        artifact: &ModelArtifact,
        source_model: &str,
        generated_at: String,
        format: ExportFormat,
        digits: i32,
    ) -> Result<Self, ArtifactError> {
        let model = &artifact.model;
        let num_items = model.num_items();
        ArtifactError::check("bi", num_items, model.item_biases().len())?;
        ArtifactError::check("itemIds", num_items, artifact.item_ids.len())?;
        ArtifactError::check("itemTitles", num_items, artifact.item_titles.len())?;

        let embedding = |idx: usize| -> Vec<f64> {
            model
                .item_factors()
                .row(idx)
                .iter()
                .map(|&value| quantize(value, digits))
                .collect()
        };
        let bias = |idx: usize| quantize(model.item_biases()[idx], digits);

        let source_model = source_model.to_owned();
        let global_mean = quantize(model.global_mean(), digits);
        let factors = model.item_factors().ncols();

        Ok(match format {
            ExportFormat::Compact => WebModel::Compact {
                format: COMPACT_FORMAT.to_owned(),
                generated_at,
                source_model,
                global_mean,
                factors,
                item_count: num_items,
                item_ids: artifact.item_ids.clone(),
                titles: artifact.item_titles.clone(),
                biases: (0..num_items).map(bias).collect(),
                embeddings: (0..num_items).map(embedding).collect(),
            },
            ExportFormat::Legacy => WebModel::Legacy {
                generated_at,
                source_model,
                global_mean,
                factors,
                item_count: num_items,
                items: (0..num_items)
                    .map(|idx| WebItem {
                        item_id: artifact.item_ids[idx],
                        title: artifact.item_titles[idx].clone(),
                        bias: bias(idx),
                        embedding: embedding(idx),
                    })
                    .collect(),
            },
        })
    }

    /// Write as compact JSON, creating parent directories. Returns the
    /// size of the written file in bytes.
    pub fn save(&self, path: &Path) -> Result<u64, failure::Error> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        serde_json::to_writer(BufWriter::new(File::create(path)?), self)?;

        Ok(std::fs::metadata(path)?.len())
    }
}
