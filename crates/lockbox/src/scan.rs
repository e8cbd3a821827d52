//! Paged reads over a store.

use lockbox_core::{Handle, ScanParams};
use tracing::debug;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::results::{Entry, EntryList};

/// An open scan. Pages are fetched one at a time with [`Scan::next`].
#[derive(Debug)]
pub struct Scan {
    client: Client,
    handle: Option<Handle>,
    store_handle: Option<Handle>,
    params: Option<ScanParams>,
}

impl Scan {
    pub(crate) fn new(client: &Client, handle: Handle, store: Handle, params: ScanParams) -> Self {
        Self {
            client: client.clone(),
            handle: Some(handle),
            store_handle: Some(store),
            params: Some(params),
        }
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn store_handle(&self) -> Option<Handle> {
        self.store_handle
    }

    /// The parameters the scan was started with; `None` after [`Scan::free`].
    pub fn params(&self) -> Option<&ScanParams> {
        self.params.as_ref()
    }

    fn require(&self) -> Result<Handle> {
        self.handle
            .ok_or_else(|| Error::lifecycle("Cannot fetch from freed scan"))
    }

    /// The next page of results, or `None` once the scan is exhausted.
    pub async fn next(&self) -> Result<Option<EntryList>> {
        let scan = self.require()?;
        let list: Option<Handle> = self
            .client
            .call("scan_next", |engine, cb, id| engine.scan_next(scan, cb, id))
            .await?;
        Ok(list.map(|handle| EntryList::new(&self.client, handle)))
    }

    /// Read every remaining page into owned entries, freeing each page.
    pub async fn fetch_remaining(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        while let Some(page) = self.next().await? {
            let read = page.to_entries();
            page.free()?;
            entries.extend(read?);
        }
        Ok(entries)
    }

    /// Release the scan. The handle and parameters are cleared.
    pub fn free(&mut self) -> Result<()> {
        let scan = self.require()?;
        self.client.check(self.client.engine().scan_free(scan))?;
        debug!(%scan, "freed scan");
        self.handle = None;
        self.store_handle = None;
        self.params = None;
        Ok(())
    }
}
