//! Source retrieval into the raw-asset cache.

pub mod bulk;
pub mod direct;

use std::path::Path;

use crate::config::PipelineConfig;
use crate::error::FetchError;
use crate::types::{SourceKind, SourceSpec};

use bulk::{fetch_bulk, BulkBackend, YtDlp};
use direct::{fetch_direct, DirectClient};

/// Retrieves a source into `dest`.
///
/// Returns `true` when `dest` holds the source afterwards, whether it was
/// downloaded now or already present. Implementations must not touch the
/// network when `dest` is already a non-empty file.
pub trait SourceFetcher {
    fn fetch(&self, source: &SourceSpec, dest: &Path) -> bool;
}

/// Fetcher backed by the bulk download tool and plain HTTP.
pub struct NetworkFetcher {
    bulk: Box<dyn BulkBackend>,
    strategies: Vec<String>,
    direct: DirectClient,
}

impl NetworkFetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self, FetchError> {
        Ok(Self::with_backend(
            Box::new(YtDlp::from_settings(&config.bulk)),
            config.bulk.strategies.clone(),
            DirectClient::new(&config.direct)?,
        ))
    }

    pub fn with_backend(
        bulk: Box<dyn BulkBackend>,
        strategies: Vec<String>,
        direct: DirectClient,
    ) -> Self {
        Self {
            bulk,
            strategies,
            direct,
        }
    }
}

impl SourceFetcher for NetworkFetcher {
    fn fetch(&self, source: &SourceSpec, dest: &Path) -> bool {
        match source.kind {
            SourceKind::Bulk => fetch_bulk(self.bulk.as_ref(), &self.strategies, &source.url, dest),
            SourceKind::Direct => fetch_direct(&self.direct, &source.url, dest),
        }
    }
}
