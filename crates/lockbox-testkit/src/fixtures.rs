//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::path::Path;
use std::sync::Arc;

use lockbox::{Client, ClientConfig, KeyMethod, Result, Store};
use lockbox_engine::EmbeddedEngine;
use tempfile::TempDir;

use crate::counting::CountingEngine;

/// URI of a private in-memory store.
pub const MEMORY_URI: &str = "sqlite://:memory:";

/// A client over a counting embedded engine, with a provisioned in-memory
/// store.
pub struct TestFixture {
    pub engine: Arc<CountingEngine>,
    pub client: Client,
    pub store: Store,
}

impl TestFixture {
    pub async fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default()).await
    }

    pub async fn with_config(config: ClientConfig) -> Result<Self> {
        let (engine, client) = counting_client(config)?;
        let store = Store::provision(&client, MEMORY_URI, KeyMethod::None, None, None, false).await?;
        Ok(Self {
            engine,
            client,
            store,
        })
    }

    /// Insert `name` with `value` and `tags` through a short-lived session.
    pub async fn seed(&self, category: &str, name: &str, value: &[u8], tags: &str) -> Result<()> {
        let session = self.store.start_session(None, false).await?;
        let inserted = session.insert(category, name, value, Some(tags), None).await;
        session.close_and_commit().await?;
        inserted
    }
}

/// A client whose engine counts calls.
pub fn counting_client(config: ClientConfig) -> Result<(Arc<CountingEngine>, Client)> {
    let engine = Arc::new(CountingEngine::new(Arc::new(EmbeddedEngine::new())));
    let client = Client::new(engine.clone(), config)?;
    Ok((engine, client))
}

/// A temporary directory for file-backed stores. Removed on drop.
pub struct FileStoreDir {
    dir: TempDir,
}

impl FileStoreDir {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// URI of a store file named `name` inside the directory.
    pub fn uri(&self, name: &str) -> String {
        format!("sqlite://{}", self.dir.path().join(name).display())
    }
}
