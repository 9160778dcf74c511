//! MTFS Common - Shared types and encodings
//!
//! This crate provides block identifiers, filesystem structures and their
//! encodings, attach-parameter parsing and the error type used by every
//! MTFS storage backend.

pub mod config;
pub mod document;
pub mod error;
pub mod layout;
pub mod structures;
pub mod types;

pub use config::{ObjectStoreParams, Params};
pub use document::Document;
pub use error::{Error, ErrorKind, Result};
pub use structures::*;
pub use types::*;
