//! Attach parameters
//!
//! Backends receive their configuration as a flat string map, the same map
//! recorded for each volume in the superblock. Object-store backends parse it
//! into [`ObjectStoreParams`] before touching anything.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw attach parameters
pub type Params = BTreeMap<String, String>;

/// Local staging root
pub const PARAM_HOME: &str = "home";
/// Size in bytes of every data block
pub const PARAM_BLOCK_SIZE: &str = "blockSize";
/// Object store region
pub const PARAM_REGION: &str = "region";
/// Object store bucket
pub const PARAM_BUCKET: &str = "bucket";

/// Parameters required to attach an object-store backend
pub const OBJECT_STORE_PARAMS: [&str; 4] =
    [PARAM_HOME, PARAM_BLOCK_SIZE, PARAM_REGION, PARAM_BUCKET];

fn required<'a>(params: &'a Params, key: &str) -> Result<&'a str> {
    match params.get(key).map(String::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::configuration(format!(
            "missing required parameter: {key}"
        ))),
    }
}

/// Validated object-store attach parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectStoreParams {
    /// Staging root; the staging directory is `home` joined with `bucket`
    pub home: PathBuf,
    /// Data block size in bytes, always positive
    pub block_size: usize,
    pub region: String,
    pub bucket: String,
}

impl ObjectStoreParams {
    /// Parse and validate a raw parameter map
    pub fn from_params(params: &Params) -> Result<Self> {
        let home = required(params, PARAM_HOME)?;
        let raw_block_size = required(params, PARAM_BLOCK_SIZE)?;
        let region = required(params, PARAM_REGION)?;
        let bucket = required(params, PARAM_BUCKET)?;

        let block_size = match raw_block_size.trim().parse::<usize>() {
            Ok(size) if size > 0 => size,
            _ => {
                return Err(Error::configuration(format!(
                    "{PARAM_BLOCK_SIZE} must be a positive integer, got {raw_block_size:?}"
                )));
            }
        };

        if bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
            return Err(Error::configuration(format!(
                "invalid bucket name: {bucket:?}"
            )));
        }

        Ok(Self {
            home: PathBuf::from(home),
            block_size,
            region: region.to_string(),
            bucket: bucket.to_string(),
        })
    }

    /// Directory holding staging files for this bucket
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.home.join(&self.bucket)
    }

    /// Convert back to a raw parameter map
    #[must_use]
    pub fn to_params(&self) -> Params {
        [
            (PARAM_HOME, self.home.display().to_string()),
            (PARAM_BLOCK_SIZE, self.block_size.to_string()),
            (PARAM_REGION, self.region.clone()),
            (PARAM_BUCKET, self.bucket.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}
