// ABOUTME: PgTarget - RelationalTarget over a direct tokio-postgres connection
// ABOUTME: Composes schema preparation, UpsertWriter and IdentifierResolver

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use tokio_postgres::Client;

use super::resolver::IdentifierResolver;
use super::schema;
use super::writer::UpsertWriter;
use super::{RelationalTarget, ResolvedMap, SchemaOutcome, UpsertReport};
use crate::config::TargetConfig;
use crate::entity::EntityKind;
use crate::record::TargetRecord;

/// The analytics store, reached over one non-pooled connection per pass.
pub struct PgTarget {
    client: Client,
    prepared: HashSet<EntityKind>,
}

impl PgTarget {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            prepared: HashSet::new(),
        }
    }

    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let client = crate::postgres::connect(config)
            .await
            .context("Failed to connect to target database")?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// `kind` preceded by every kind it transitively references, each once.
fn preparation_order(kind: EntityKind) -> Vec<EntityKind> {
    fn visit(kind: EntityKind, order: &mut Vec<EntityKind>) {
        for dep in kind.dependencies() {
            visit(*dep, order);
        }
        if !order.contains(&kind) {
            order.push(kind);
        }
    }

    let mut order = Vec::new();
    visit(kind, &mut order);
    order
}

#[async_trait]
impl RelationalTarget for PgTarget {
    async fn prepare_schema(&mut self, kind: EntityKind) -> SchemaOutcome {
        let mut outcome = SchemaOutcome::default();

        for table in preparation_order(kind) {
            if self.prepared.contains(&table) {
                continue;
            }

            let mut clean = true;
            for statement in schema::prepare_statements(table) {
                if let Err(e) = self.client.batch_execute(&statement).await {
                    clean = false;
                    tracing::warn!("Schema preparation for {} failed: {}", table, e);
                    outcome.warnings.push(format!("{}: {}", table, e));
                }
            }

            if clean {
                self.prepared.insert(table);
            }
        }

        outcome
    }

    async fn upsert(&mut self, kind: EntityKind, records: &[TargetRecord]) -> Result<UpsertReport> {
        UpsertWriter::new(&mut self.client)
            .apply_batch(kind, records)
            .await
    }

    async fn identifier_map(&mut self, kind: EntityKind) -> ResolvedMap {
        IdentifierResolver::new(&self.client).resolve(kind).await
    }

    async fn count(&mut self, kind: EntityKind) -> Result<u64> {
        let row = self
            .client
            .query_one(&schema::count_sql(kind), &[])
            .await
            .with_context(|| format!("Failed to count rows in {}", kind))?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }
}
