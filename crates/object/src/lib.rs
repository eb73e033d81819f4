//! Remote object-store backend.
//!
//! Speaks plain PUT/GET/HEAD/DELETE against a flat keyspace, which is
//! enough for any S3-style endpoint. Keys are `<prefix><64-hex id>-<k>`
//! with the same kind suffixes the file-system layout uses; "not found"
//! maps to the absent sentinel.
//!
//! A store handle can serve as either side of a backup: the push
//! destination or the pull source.

use std::io::Write;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sgfa_core::{ItemHash, ItemKind, ItemStore, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpStoreConfig {
    /// Base URL of the object store, e.g. `https://backups.example/jackets`.
    pub endpoint: String,

    /// Optional key prefix, e.g. `case-files/`.
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    endpoint: String,
    prefix: String,
}

impl HttpStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        HttpStore {
            client: Client::new(),
            endpoint: endpoint.into(),
            prefix: String::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn from_config(config: &HttpStoreConfig) -> Self {
        let store = HttpStore::new(config.endpoint.clone());

        match &config.prefix {
            Some(prefix) => store.with_prefix(prefix.clone()),
            None => store,
        }
    }

    fn key(&self, kind: ItemKind, id: &ItemHash) -> String {
        format!("{}{id}-{}", self.prefix, kind.suffix())
    }

    fn url(&self, kind: ItemKind, id: &ItemHash) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.key(kind, id)
        )
    }
}

fn expect_success(response: Response) -> Result<Response, StoreError> {
    response.error_for_status().map_err(StoreError::internal)
}

/// Scratch blob for `HttpStore`; a single PUT uploads it whole.
#[derive(Debug, Default)]
pub struct ObjectTemp(Vec<u8>);

impl Write for ObjectTemp {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ItemStore for HttpStore {
    type Read = Response;
    type Temp = ObjectTemp;

    fn read(&self, kind: ItemKind, id: &ItemHash) -> Result<Option<Self::Read>, StoreError> {
        let response = self
            .client
            .get(self.url(kind, id))
            .send()
            .map_err(StoreError::internal)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        Ok(Some(expect_success(response)?))
    }

    fn temp(&self) -> Result<Self::Temp, StoreError> {
        Ok(ObjectTemp::default())
    }

    fn write(&self, kind: ItemKind, id: &ItemHash, temp: Self::Temp) -> Result<(), StoreError> {
        debug!(key = self.key(kind, id), bytes = temp.0.len(), "object put");

        let response = self
            .client
            .put(self.url(kind, id))
            .body(temp.0)
            .send()
            .map_err(StoreError::internal)?;

        expect_success(response)?;

        Ok(())
    }

    fn delete(&self, kind: ItemKind, id: &ItemHash) -> Result<bool, StoreError> {
        let response = self
            .client
            .delete(self.url(kind, id))
            .send()
            .map_err(StoreError::internal)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        expect_success(response)?;

        Ok(true)
    }

    fn size(&self, kind: ItemKind, id: &ItemHash) -> Result<Option<u64>, StoreError> {
        let response = self
            .client
            .head(self.url(kind, id))
            .send()
            .map_err(StoreError::internal)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = expect_success(response)?;

        Ok(Some(response.content_length().unwrap_or(0)))
    }
}
