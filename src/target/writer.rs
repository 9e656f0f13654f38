// ABOUTME: UpsertWriter - merges one entity kind's records into its table
// ABOUTME: One transaction per kind, one SAVEPOINT per record for failure isolation

use anyhow::{Context, Result};
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use super::schema;
use super::{IdentifierMap, RecordFailure, UpsertReport};
use crate::entity::EntityKind;
use crate::record::TargetRecord;

/// Writes normalized records to the target using `INSERT ... ON CONFLICT DO UPDATE`.
///
/// All records of a kind share one transaction; each record runs inside its
/// own savepoint so a failing record is rolled back alone and the rest of the
/// batch still commits.
pub struct UpsertWriter<'a> {
    client: &'a mut Client,
}

impl<'a> UpsertWriter<'a> {
    pub fn new(client: &'a mut Client) -> Self {
        Self { client }
    }

    /// Merge `records` into the table for `kind`.
    ///
    /// Returns `Err` only when the transaction cannot be opened or committed.
    pub async fn apply_batch(
        &mut self,
        kind: EntityKind,
        records: &[TargetRecord],
    ) -> Result<UpsertReport> {
        let mut report = UpsertReport::default();
        if kind.returns_identifier_map() {
            report.resolved = Some(IdentifierMap::new());
        }
        if records.is_empty() {
            return Ok(report);
        }

        let mut tx = self
            .client
            .transaction()
            .await
            .with_context(|| format!("Failed to begin transaction for {}", kind))?;

        let query = schema::upsert_sql(kind);
        let statement = match tx.prepare(&query).await {
            Ok(statement) => statement,
            Err(e) => {
                // Without a statement nothing in this kind can be written
                tracing::error!("Failed to prepare upsert for {}: {:?}", kind, e);
                report.failed = records
                    .iter()
                    .map(|r| RecordFailure {
                        origen_id: r.origen_id().to_string(),
                        error: e.to_string(),
                    })
                    .collect();
                return Ok(report);
            }
        };

        for record in records {
            let values = record.sql_values();
            let params: Vec<&(dyn ToSql + Sync)> = values
                .iter()
                .map(|v| v.as_ref() as &(dyn ToSql + Sync))
                .collect();

            let savepoint = tx
                .savepoint("upsert_record")
                .await
                .with_context(|| format!("Failed to open savepoint for {}", kind))?;

            match savepoint.query_one(&statement, &params).await {
                Ok(row) => {
                    savepoint
                        .commit()
                        .await
                        .with_context(|| format!("Failed to release savepoint for {}", kind))?;

                    let id: i64 = row.get(0);
                    let inserted: bool = row.get(1);
                    if inserted {
                        report.inserted += 1;
                    } else {
                        report.updated += 1;
                    }
                    if let Some(resolved) = report.resolved.as_mut() {
                        resolved.insert(record.origen_id(), id);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to upsert {} record {}: {}",
                        kind,
                        record.origen_id(),
                        e
                    );
                    savepoint
                        .rollback()
                        .await
                        .with_context(|| format!("Failed to roll back savepoint for {}", kind))?;
                    report.failed.push(RecordFailure {
                        origen_id: record.origen_id().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit {}", kind))?;

        Ok(report)
    }
}
