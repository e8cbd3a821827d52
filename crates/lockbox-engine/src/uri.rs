//! Store locator parsing.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

const SQLITE_SCHEME: &str = "sqlite";
const MEMORY_PATH: &str = ":memory:";

/// Where a store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUri {
    /// A private in-memory database, alive only while its store handle is.
    Memory,
    /// A database file.
    File(PathBuf),
}

impl StoreUri {
    /// Parse `sqlite://:memory:` or `sqlite://<path>`.
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| EngineError::Input(format!("Invalid store URI: {}", uri)))?;

        if !scheme.eq_ignore_ascii_case(SQLITE_SCHEME) {
            return Err(EngineError::Unsupported(format!(
                "Unsupported store URI scheme: {}",
                scheme
            )));
        }

        // Query parameters are accepted and ignored.
        let path = rest.split_once('?').map_or(rest, |(path, _)| path);

        match path {
            "" => Err(EngineError::Input("Store URI is missing a path".into())),
            MEMORY_PATH => Ok(Self::Memory),
            path => Ok(Self::File(PathBuf::from(path))),
        }
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Memory => None,
            Self::File(path) => Some(path),
        }
    }
}

impl std::fmt::Display for StoreUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "{}://{}", SQLITE_SCHEME, MEMORY_PATH),
            Self::File(path) => write!(f, "{}://{}", SQLITE_SCHEME, path.display()),
        }
    }
}
