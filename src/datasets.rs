//! Loading the ratings and graph sources from JSON files.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::data::UserRecord;
use crate::graph::RelationRecord;

/// Dataset error types.
#[derive(Debug, Fail)]
pub enum DatasetError {
    /// An input file does not exist.
    #[fail(display = "File not found: {}", _0)]
    NotFound(String),
}

#[derive(Deserialize)]
struct RatingsFile {
    #[serde(default)]
    users: Vec<UserRecord>,
}

#[derive(Deserialize)]
struct GraphFile {
    #[serde(default)]
    edges: Vec<RelationRecord>,
}

/// Fail with `DatasetError::NotFound` unless `path` exists.
pub fn ensure_exists(path: &Path) -> Result<(), DatasetError> {
    if path.exists() {
        Ok(())
    } else {
        Err(DatasetError::NotFound(path.display().to_string()))
    }
}

/// Read the per-user ratings from `{"users": [...]}`.
pub fn load_ratings(path: &Path) -> Result<Vec<UserRecord>, failure::Error> {
    ensure_exists(path)?;

    let file: RatingsFile = serde_json::from_reader(BufReader::new(File::open(path)?))?;

    Ok(file.users)
}

/// Read the relation records from `{"edges": [...]}`.
pub fn load_graph(path: &Path) -> Result<Vec<RelationRecord>, failure::Error> {
    ensure_exists(path)?;

    let file: GraphFile = serde_json::from_reader(BufReader::new(File::open(path)?))?;

    Ok(file.edges)
}
