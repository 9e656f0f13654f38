// ABOUTME: SyncOrchestrator - runs one full-refresh pass across all entity kinds
// ABOUTME: Read -> map -> upsert -> refresh identifier map, inside a cancellable retry envelope

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::StoreConnector;
use crate::entity::EntityKind;
use crate::mapper::{map_documents, MappingContext};
use crate::source::{DocumentSource, ReadStatus};
use crate::target::{IdentifierMaps, MapStatus, RecordFailure, RelationalTarget};
use crate::utils::{retry_with_backoff, RetryOutcome, RetryPolicy};

/// Where the orchestrator currently is within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    Idle,
    ConnectingSource,
    ConnectingTarget,
    Running(EntityKind),
    Committed,
    Failed { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
}

/// What one entity kind contributed to a pass.
#[derive(Debug, Clone)]
pub struct EntityReport {
    pub kind: EntityKind,
    pub read_status: ReadStatus,
    /// Documents decoded from the source.
    pub read: usize,
    /// Raw documents that failed to decode.
    pub skipped: usize,
    /// Decoded documents the mapper rejected.
    pub rejected: usize,
    pub inserted: u64,
    pub updated: u64,
    pub failed: Vec<RecordFailure>,
    pub schema_warnings: Vec<String>,
    /// Status of the identifier map built for dependents, if one was built.
    pub map_status: Option<MapStatus>,
}

impl EntityReport {
    fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            read_status: ReadStatus::Complete,
            read: 0,
            skipped: 0,
            rejected: 0,
            inserted: 0,
            updated: 0,
            failed: Vec::new(),
            schema_warnings: Vec::new(),
            map_status: None,
        }
    }

    /// Whether anything about this kind degraded or failed.
    pub fn is_clean(&self) -> bool {
        self.read_status == ReadStatus::Complete
            && self.skipped == 0
            && self.rejected == 0
            && self.failed.is_empty()
            && self.schema_warnings.is_empty()
            && !matches!(self.map_status, Some(MapStatus::Degraded(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    Cancelled,
    Failed { error: String },
}

/// Result of one pass, reported as data rather than as an error.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub outcome: PassOutcome,
    pub attempts: u32,
    pub backoffs: Vec<Duration>,
    /// Entity kinds completed by the last attempt, in processing order.
    pub entities: Vec<EntityReport>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PassReport {
    pub fn is_success(&self) -> bool {
        self.outcome == PassOutcome::Completed
    }

    pub fn entity(&self, kind: EntityKind) -> Option<&EntityReport> {
        self.entities.iter().find(|e| e.kind == kind)
    }

    pub fn total_inserted(&self) -> u64 {
        self.entities.iter().map(|e| e.inserted).sum()
    }

    pub fn total_updated(&self) -> u64 {
        self.entities.iter().map(|e| e.updated).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.entities.iter().map(|e| e.failed.len()).sum()
    }
}

struct AttemptResult {
    entities: Vec<EntityReport>,
    cancelled: bool,
}

/// Sequences the six entity kinds in dependency order, one transaction each.
///
/// Passes are serialized: a manual trigger and a watcher-triggered pass
/// never overlap. No identifier map outlives the pass that built it.
pub struct SyncOrchestrator {
    connector: Arc<dyn StoreConnector>,
    retry: RetryPolicy,
    phase: watch::Sender<PassPhase>,
    pass_lock: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(connector: Arc<dyn StoreConnector>, retry: RetryPolicy) -> Self {
        let (phase, _) = watch::channel(PassPhase::Idle);
        Self {
            connector,
            retry,
            phase,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn phase(&self) -> PassPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<PassPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: PassPhase) {
        self.phase.send_replace(phase);
    }

    /// Run exactly one pass with its own cancellation token.
    pub async fn run_once(&self) -> PassReport {
        self.run_pass(&CancellationToken::new()).await
    }

    /// Run one pass, retrying failed attempts with backoff.
    ///
    /// Never returns an error: an abandoned pass is logged and reported as
    /// `PassOutcome::Failed`. The token is checked before each attempt,
    /// during backoff and between entity kinds.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> PassReport {
        let _guard = self.pass_lock.lock().await;
        let started_at = Utc::now();
        let start = Instant::now();
        let max_attempts = self.retry.max_attempts();

        let retried = retry_with_backoff(
            &self.retry,
            cancel,
            move |attempt| {
                tracing::info!("Sync pass attempt {}/{}", attempt, max_attempts);
                self.attempt(cancel)
            },
            move |attempt, delay| {
                self.set_phase(PassPhase::Failed { attempt });
                self.set_phase(PassPhase::Backoff { attempt, delay });
            },
        )
        .await;

        let (outcome, entities) = match retried.outcome {
            RetryOutcome::Succeeded(result) if result.cancelled => {
                tracing::info!("Sync pass cancelled between entity types");
                (PassOutcome::Cancelled, result.entities)
            }
            RetryOutcome::Succeeded(result) => {
                self.set_phase(PassPhase::Committed);
                (PassOutcome::Completed, result.entities)
            }
            RetryOutcome::Cancelled => {
                tracing::info!("Sync pass cancelled before completing");
                (PassOutcome::Cancelled, Vec::new())
            }
            RetryOutcome::Exhausted(e) => {
                self.set_phase(PassPhase::Failed {
                    attempt: retried.attempts,
                });
                tracing::error!(
                    "Sync pass abandoned after {} attempts: {:#}",
                    retried.attempts,
                    e
                );
                (
                    PassOutcome::Failed {
                        error: format!("{:#}", e),
                    },
                    Vec::new(),
                )
            }
        };

        let report = PassReport {
            outcome,
            attempts: retried.attempts,
            backoffs: retried.backoffs,
            entities,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if report.is_success() {
            tracing::info!(
                "Sync pass completed: {} inserted, {} updated, {} failed in {}ms",
                report.total_inserted(),
                report.total_updated(),
                report.total_failed(),
                report.duration_ms
            );
        }

        self.set_phase(PassPhase::Idle);
        report
    }

    /// One attempt: fresh connections, then every entity kind in order.
    async fn attempt(&self, cancel: &CancellationToken) -> Result<AttemptResult> {
        self.set_phase(PassPhase::ConnectingSource);
        let source = self
            .connector
            .connect_source()
            .await
            .context("Failed to connect to source")?;

        self.set_phase(PassPhase::ConnectingTarget);
        let mut target = self
            .connector
            .connect_target()
            .await
            .context("Failed to connect to target")?;

        let ctx = MappingContext::new(Utc::now());
        let mut maps = IdentifierMaps::default();
        let mut entities = Vec::with_capacity(EntityKind::DEPENDENCY_ORDER.len());

        for kind in EntityKind::DEPENDENCY_ORDER {
            if cancel.is_cancelled() {
                return Ok(AttemptResult {
                    entities,
                    cancelled: true,
                });
            }

            self.set_phase(PassPhase::Running(kind));
            let report = sync_entity(kind, source.as_ref(), target.as_mut(), &mut maps, &ctx)
                .await
                .with_context(|| format!("Failed to sync {}", kind))?;
            entities.push(report);
        }

        Ok(AttemptResult {
            entities,
            cancelled: false,
        })
    }
}

/// Read, map and upsert one entity kind, then publish its identifier map.
async fn sync_entity(
    kind: EntityKind,
    source: &dyn DocumentSource,
    target: &mut dyn RelationalTarget,
    maps: &mut IdentifierMaps,
    ctx: &MappingContext,
) -> Result<EntityReport> {
    let mut report = EntityReport::new(kind);

    report.schema_warnings = target.prepare_schema(kind).await.warnings;

    let read = source.read(kind).await;
    report.read_status = read.status.clone();
    report.read = read.documents.len();
    report.skipped = read.skipped;

    let batch = map_documents(&read.documents, maps, ctx);
    report.rejected = batch.rejected;

    let upsert = target.upsert(kind, &batch.records).await?;
    report.inserted = upsert.inserted;
    report.updated = upsert.updated;
    report.failed = upsert.failed;

    // Sale lines are referenced by nothing, so no map is built for them
    if maps.get(kind).is_some() {
        match upsert.resolved {
            Some(resolved) => {
                maps.set(kind, resolved);
                report.map_status = Some(MapStatus::Fresh);
            }
            None => {
                let resolved = target.identifier_map(kind).await;
                report.map_status = Some(resolved.status.clone());
                maps.set(kind, resolved.map);
            }
        }
    }

    tracing::info!(
        "{}: {} read, {} inserted, {} updated, {} failed",
        kind,
        report.read,
        report.inserted,
        report.updated,
        report.failed.len()
    );
    if let ReadStatus::Degraded(reason) = &report.read_status {
        tracing::warn!("{}: source read degraded: {}", kind, reason);
    }

    Ok(report)
}
