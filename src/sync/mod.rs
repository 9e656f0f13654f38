// ABOUTME: Sync engine - full-refresh passes and the change watcher that triggers them
// ABOUTME: StoreConnector opens fresh source/target handles for every pass attempt

pub mod orchestrator;
pub mod watcher;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{SourceConfig, SyncConfig, TargetConfig};
use crate::source::{DocumentSource, MongoSource};
use crate::target::{PgTarget, RelationalTarget};

pub use orchestrator::{EntityReport, PassOutcome, PassPhase, PassReport, SyncOrchestrator};
pub use watcher::{ChangeWatcher, WatcherState, WatcherStatus};

/// Opens the stores a pass attempt works against.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect_source(&self) -> Result<Box<dyn DocumentSource>>;
    async fn connect_target(&self) -> Result<Box<dyn RelationalTarget>>;
}

/// MongoDB source and direct PostgreSQL target from configuration.
pub struct LiveConnector {
    source: SourceConfig,
    target: TargetConfig,
}

impl LiveConnector {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            source: config.source.clone(),
            target: config.target.clone(),
        }
    }
}

#[async_trait]
impl StoreConnector for LiveConnector {
    async fn connect_source(&self) -> Result<Box<dyn DocumentSource>> {
        let source = MongoSource::connect(&self.source).await?;
        Ok(Box::new(source))
    }

    async fn connect_target(&self) -> Result<Box<dyn RelationalTarget>> {
        let target = PgTarget::connect(&self.target).await?;
        Ok(Box::new(target))
    }
}
