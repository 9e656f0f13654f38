// ABOUTME: In-memory source, target and connector fakes shared by integration tests
// ABOUTME: Lets full sync passes run without MongoDB or PostgreSQL

#![allow(dead_code)]

use analytics_replicator::entity::EntityKind;
use analytics_replicator::record::TargetRecord;
use analytics_replicator::source::document::SourceId;
use analytics_replicator::source::{
    ChangeNotification, ChangeSubscriber, DocumentSource, NotificationStream, ReadOutcome,
};
use analytics_replicator::sync::StoreConnector;
use analytics_replicator::target::{
    IdentifierMap, RecordFailure, RelationalTarget, ResolvedMap, SchemaOutcome, UpsertReport,
};
use anyhow::Result;
use async_trait::async_trait;
use bson::{Bson, Document};
use futures::channel::mpsc;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Collections of raw documents, shared so tests can edit them between passes.
#[derive(Clone, Default)]
pub struct MemorySource {
    collections: Arc<Mutex<HashMap<String, Vec<Document>>>>,
    cancel_after_read: Arc<Mutex<Option<(EntityKind, CancellationToken)>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, doc: Document) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    /// Create the collection without documents.
    pub fn create(&self, collection: &str) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default();
    }

    /// Replace `field` on the document whose `_id` equals `id`.
    pub fn set_field(&self, collection: &str, id: &str, field: &str, value: impl Into<Bson>) {
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.get_mut(collection).expect("collection exists");
        let target = SourceId::parse(id);
        let doc = docs
            .iter_mut()
            .find(|d| d.get("_id").and_then(SourceId::from_bson) == target)
            .expect("document exists");
        doc.insert(field, value.into());
    }

    /// Cancel `token` right after `kind` has been read.
    pub fn cancel_after_reading(&self, kind: EntityKind, token: CancellationToken) {
        *self.cancel_after_read.lock().unwrap() = Some((kind, token));
    }

    /// Embed the matching user account under `parent`, dropping unmatched documents.
    fn join_parent(&self, docs: Vec<Document>, parent_collection: &str) -> Vec<Document> {
        let collections = self.collections.lock().unwrap();
        let parents = collections.get(parent_collection).cloned().unwrap_or_default();

        docs.into_iter()
            .filter_map(|mut doc| {
                let reference = ["usuarioId", "usuario_id"]
                    .iter()
                    .find_map(|f| doc.get(*f).and_then(SourceId::from_bson))?;
                let parent = parents.iter().find(|p| {
                    p.get("_id").and_then(SourceId::from_bson).as_ref() == Some(&reference)
                })?;
                doc.insert("parent", parent.clone());
                Some(doc)
            })
            .collect()
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn read(&self, kind: EntityKind) -> ReadOutcome {
        let docs = self
            .collections
            .lock()
            .unwrap()
            .get(kind.collection())
            .cloned();

        let outcome = match docs {
            None => ReadOutcome::missing(),
            Some(docs) => {
                let docs = match kind.parent_collection() {
                    Some(parent) => self.join_parent(docs, parent),
                    None => docs,
                };
                ReadOutcome::decode(kind, docs)
            }
        };

        if let Some((after, token)) = self.cancel_after_read.lock().unwrap().as_ref() {
            if *after == kind {
                token.cancel();
            }
        }

        outcome
    }

    async fn count(&self, kind: EntityKind) -> Result<u64> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(kind.collection())
            .map(|d| d.len() as u64)
            .unwrap_or(0))
    }
}

#[derive(Debug, Clone)]
pub struct StoredRow {
    pub id: i64,
    pub record: TargetRecord,
}

#[derive(Default)]
struct Table {
    rows: BTreeMap<String, StoredRow>,
}

#[derive(Default)]
struct TargetState {
    tables: HashMap<EntityKind, Table>,
    next_id: i64,
    prepared: Vec<EntityKind>,
    fail_on: HashSet<String>,
    degrade_maps: bool,
}

/// Relational tables held in memory with SERIAL-like ids.
#[derive(Clone, Default)]
pub struct MemoryTarget {
    state: Arc<Mutex<TargetState>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upsert of this `origen_id` fail like a constraint violation.
    pub fn fail_on(&self, origen_id: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_on
            .insert(origen_id.to_string());
    }

    /// Make identifier-map scans fail.
    pub fn degrade_maps(&self) {
        self.state.lock().unwrap().degrade_maps = true;
    }

    /// Rows of the table for `kind`, ordered by `origen_id`.
    pub fn rows(&self, kind: EntityKind) -> Vec<StoredRow> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&kind)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row(&self, kind: EntityKind, origen_id: &str) -> Option<StoredRow> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&kind)
            .and_then(|t| t.rows.get(origen_id).cloned())
    }

    pub fn prepared(&self) -> Vec<EntityKind> {
        self.state.lock().unwrap().prepared.clone()
    }
}

#[async_trait]
impl RelationalTarget for MemoryTarget {
    async fn prepare_schema(&mut self, kind: EntityKind) -> SchemaOutcome {
        let mut state = self.state.lock().unwrap();
        state.tables.entry(kind).or_default();
        state.prepared.push(kind);
        SchemaOutcome::default()
    }

    async fn upsert(&mut self, kind: EntityKind, records: &[TargetRecord]) -> Result<UpsertReport> {
        let mut state = self.state.lock().unwrap();
        let mut report = UpsertReport::default();
        if kind.returns_identifier_map() {
            report.resolved = Some(IdentifierMap::new());
        }

        for record in records {
            let origen_id = record.origen_id().to_string();
            if state.fail_on.contains(&origen_id) {
                report.failed.push(RecordFailure {
                    origen_id,
                    error: "duplicate key value violates unique constraint".to_string(),
                });
                continue;
            }

            let existing = state
                .tables
                .get(&kind)
                .and_then(|t| t.rows.get(&origen_id))
                .map(|r| r.id);
            let id = match existing {
                Some(id) => {
                    report.updated += 1;
                    id
                }
                None => {
                    state.next_id += 1;
                    report.inserted += 1;
                    state.next_id
                }
            };

            state.tables.entry(kind).or_default().rows.insert(
                origen_id.clone(),
                StoredRow {
                    id,
                    record: record.clone(),
                },
            );
            if let Some(resolved) = report.resolved.as_mut() {
                resolved.insert(origen_id, id);
            }
        }

        Ok(report)
    }

    async fn identifier_map(&mut self, kind: EntityKind) -> ResolvedMap {
        let state = self.state.lock().unwrap();
        if state.degrade_maps {
            return ResolvedMap::degraded("relation is unavailable");
        }
        let pairs = state
            .tables
            .get(&kind)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|(k, r)| (k.clone(), r.id))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        ResolvedMap::fresh(IdentifierMap::from_pairs(pairs))
    }

    async fn count(&mut self, kind: EntityKind) -> Result<u64> {
        Ok(self.rows(kind).len() as u64)
    }
}

/// Connector over the in-memory stores, with scripted connection failures.
pub struct FakeConnector {
    pub source: MemorySource,
    pub target: MemoryTarget,
    source_failures: AtomicU32,
    connect_delay: Duration,
    pub source_connects: AtomicU32,
}

impl FakeConnector {
    pub fn new(source: MemorySource, target: MemoryTarget) -> Self {
        Self {
            source,
            target,
            source_failures: AtomicU32::new(0),
            connect_delay: Duration::ZERO,
            source_connects: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` source connections.
    pub fn failing_source(self, n: u32) -> Self {
        self.source_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep this long before every source connection.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn connects(&self) -> u32 {
        self.source_connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for FakeConnector {
    async fn connect_source(&self) -> Result<Box<dyn DocumentSource>> {
        self.source_connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let remaining = self.source_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.source_failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("server selection timeout: connection refused");
        }
        Ok(Box::new(self.source.clone()))
    }

    async fn connect_target(&self) -> Result<Box<dyn RelationalTarget>> {
        Ok(Box::new(self.target.clone()))
    }
}

/// Change subscriber fed by test code through channel senders.
#[derive(Default)]
pub struct ChannelSubscriber {
    senders: Mutex<Vec<mpsc::UnboundedSender<Result<ChangeNotification>>>>,
    refuse: bool,
}

impl ChannelSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// A subscriber whose subscriptions always fail.
    pub fn refusing() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
            refuse: true,
        }
    }

    /// Push a notification to the most recent subscription.
    pub fn notify(&self, collection: &str) {
        self.send(Ok(ChangeNotification {
            operation: "update".to_string(),
            collection: Some(collection.to_string()),
        }));
    }

    pub fn fail(&self, reason: &str) {
        self.send(Err(anyhow::anyhow!(reason.to_string())));
    }

    /// Close the most recent subscription.
    pub fn close(&self) {
        if let Some(sender) = self.senders.lock().unwrap().last() {
            sender.close_channel();
        }
    }

    pub fn subscriptions(&self) -> usize {
        self.senders.lock().unwrap().len()
    }

    fn send(&self, item: Result<ChangeNotification>) {
        let senders = self.senders.lock().unwrap();
        let sender = senders.last().expect("subscribed");
        sender.unbounded_send(item).expect("subscription open");
    }
}

#[async_trait]
impl ChangeSubscriber for ChannelSubscriber {
    async fn subscribe(&self) -> Result<NotificationStream> {
        if self.refuse {
            anyhow::bail!("change streams require a replica set");
        }
        let (tx, rx) = mpsc::unbounded();
        self.senders.lock().unwrap().push(tx);
        Ok(rx.boxed())
    }
}
