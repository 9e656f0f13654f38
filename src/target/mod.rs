// ABOUTME: Relational target seam - schema preparation, upserts and identifier maps
// ABOUTME: PgTarget implements it over tokio-postgres; tests use in-memory fakes

pub mod postgres;
pub mod resolver;
pub mod schema;
pub mod writer;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::entity::EntityKind;
use crate::record::TargetRecord;
use crate::source::document::SourceId;

pub use postgres::PgTarget;

/// Transient `origen_id -> id` lookup for one entity kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifierMap {
    ids: HashMap<String, i64>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, i64)>,
    {
        Self {
            ids: pairs.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, origen_id: impl Into<String>, id: i64) {
        self.ids.insert(origen_id.into(), id);
    }

    pub fn get(&self, origen_id: &str) -> Option<i64> {
        self.ids.get(origen_id).copied()
    }

    /// Look up a reference field by its canonical string form.
    ///
    /// A missing reference or an unknown identifier resolves to `None`.
    pub fn resolve(&self, reference: Option<&SourceId>) -> Option<i64> {
        reference.and_then(|r| self.get(r.as_str()))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// The identifier maps visible to the mapper during one pass.
#[derive(Debug, Clone, Default)]
pub struct IdentifierMaps {
    pub clients: IdentifierMap,
    pub agents: IdentifierMap,
    pub services: IdentifierMap,
    pub packages: IdentifierMap,
    pub sales: IdentifierMap,
}

impl IdentifierMaps {
    /// Replace the map held for `kind`. Sale lines are never referenced, so
    /// their map is discarded.
    pub fn set(&mut self, kind: EntityKind, map: IdentifierMap) {
        match kind {
            EntityKind::Client => self.clients = map,
            EntityKind::Agent => self.agents = map,
            EntityKind::Service => self.services = map,
            EntityKind::TourPackage => self.packages = map,
            EntityKind::Sale => self.sales = map,
            EntityKind::SaleLine => {}
        }
    }

    pub fn get(&self, kind: EntityKind) -> Option<&IdentifierMap> {
        match kind {
            EntityKind::Client => Some(&self.clients),
            EntityKind::Agent => Some(&self.agents),
            EntityKind::Service => Some(&self.services),
            EntityKind::TourPackage => Some(&self.packages),
            EntityKind::Sale => Some(&self.sales),
            EntityKind::SaleLine => None,
        }
    }
}

/// Whether an identifier map reflects the table or a degraded fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapStatus {
    Fresh,
    Degraded(String),
}

#[derive(Debug, Clone)]
pub struct ResolvedMap {
    pub map: IdentifierMap,
    pub status: MapStatus,
}

impl ResolvedMap {
    pub fn fresh(map: IdentifierMap) -> Self {
        Self {
            map,
            status: MapStatus::Fresh,
        }
    }

    /// An empty map standing in for a failed table scan.
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            map: IdentifierMap::new(),
            status: MapStatus::Degraded(reason.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.status, MapStatus::Degraded(_))
    }
}

/// Result of idempotent schema preparation for one entity kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaOutcome {
    /// Statements that failed; preparation continues past them.
    pub warnings: Vec<String>,
}

impl SchemaOutcome {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Per-record failure captured by the upsert writer.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFailure {
    pub origen_id: String,
    pub error: String,
}

/// Counts from upserting one entity kind's batch.
#[derive(Debug, Clone, Default)]
pub struct UpsertReport {
    pub inserted: u64,
    pub updated: u64,
    pub failed: Vec<RecordFailure>,
    /// `origen_id -> id` pairs produced by the writes themselves, for kinds
    /// whose map is handed back without a rescan.
    pub resolved: Option<IdentifierMap>,
}

impl UpsertReport {
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }
}

/// The relational store a pass writes into.
#[async_trait]
pub trait RelationalTarget: Send + Sync {
    /// Create the table for `kind` (and the tables it references) if absent,
    /// and add drift-prone columns. Must be a no-op when already applied.
    async fn prepare_schema(&mut self, kind: EntityKind) -> SchemaOutcome;

    /// Merge `records` into the table for `kind`, keyed by `origen_id`.
    ///
    /// Only failures that affect the whole batch (opening or committing the
    /// transaction) are returned as `Err`.
    async fn upsert(&mut self, kind: EntityKind, records: &[TargetRecord]) -> Result<UpsertReport>;

    /// Scan the table for `kind` and build its identifier map.
    async fn identifier_map(&mut self, kind: EntityKind) -> ResolvedMap;

    /// Number of rows currently in the table for `kind`.
    async fn count(&mut self, kind: EntityKind) -> Result<u64>;
}
