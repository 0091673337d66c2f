use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::domain::rset::ResourceSet;
use crate::error::{Error, Result};

/// Parses a JSON file into a given type `T`.
///
/// Errors are automatically converted into `crate::error::Error` variants:
/// - `Error::IoError` if the file cannot be read.
/// - `Error::DeserializationError` if the JSON is malformed.
pub fn parse_json_file<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let data = fs::read_to_string(file_path).map_err(Error::IoError)?;

    let parsed_data: T = serde_json::from_str(&data).map_err(Error::DeserializationError)?;

    Ok(parsed_data)
}

/// Reads an R object from `file_path`.
pub fn parse_resource_file(file_path: &Path) -> Result<ResourceSet> {
    let set: ResourceSet = parse_json_file(file_path)?;
    log::debug!("loaded R for ranks {} from {}", set.ranks(), file_path.display());
    Ok(set)
}
