//! Local keys. Key material never leaves the engine; the client holds a
//! handle.

use bytes::Bytes;
use lockbox_core::{ErrorKind, Handle, KeyAlg};

use crate::client::Client;
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct LocalKey {
    client: Client,
    handle: Handle,
}

impl LocalKey {
    pub(crate) fn new(client: &Client, handle: Handle) -> Self {
        Self {
            client: client.clone(),
            handle,
        }
    }

    /// Generate a new random key.
    pub fn generate(client: &Client, alg: KeyAlg, ephemeral: bool) -> Result<Self> {
        let handle = client.read(client.engine().key_generate(alg.as_str(), ephemeral))?;
        Ok(Self::new(client, handle))
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn algorithm(&self) -> Result<KeyAlg> {
        let name = self
            .client
            .read(self.client.engine().key_get_algorithm(self.handle))?;
        KeyAlg::parse(&name).ok_or_else(|| Error::Engine {
            kind: ErrorKind::Unexpected,
            message: format!("Unknown key algorithm: {}", name),
        })
    }

    /// The public half of an asymmetric key.
    pub fn public_bytes(&self) -> Result<Bytes> {
        self.client
            .read(self.client.engine().key_get_public_bytes(self.handle))
    }

    pub fn free(&self) -> Result<()> {
        self.client.check(self.client.engine().key_free(self.handle))
    }
}
