//! Structured-document encoding
//!
//! Inodes, directory blocks and block metadata are stored as pretty-printed
//! JSON documents. Decoding is strict: a missing or mistyped key fails the
//! whole document rather than falling back to a default.

use crate::error::{Error, Result};
use crate::structures::{BlockInfo, DirectoryBlock, Inode};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A structure with a canonical JSON document form
pub trait Document: Serialize + DeserializeOwned {
    /// Encode to document bytes
    fn to_document(&self) -> Result<Vec<u8>> {
        let mut bytes =
            serde_json::to_vec_pretty(self).map_err(|e| Error::encode(e.to_string()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Decode from document bytes
    fn from_document(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::decode(e.to_string()))
    }
}

impl Document for Inode {}
impl Document for DirectoryBlock {}
impl Document for BlockInfo {}
