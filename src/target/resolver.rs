// ABOUTME: IdentifierResolver - rebuilds origen_id -> id maps from the target tables
// ABOUTME: Query failures degrade to an empty, flagged map instead of failing the pass

use tokio_postgres::Client;

use super::schema;
use super::{IdentifierMap, ResolvedMap};
use crate::entity::EntityKind;

pub struct IdentifierResolver<'a> {
    client: &'a Client,
}

impl<'a> IdentifierResolver<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// Scan the table for `kind` into a fresh identifier map.
    pub async fn resolve(&self, kind: EntityKind) -> ResolvedMap {
        let rows = match self.client.query(&schema::identifier_scan_sql(kind), &[]).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(
                    "Identifier scan of {} failed, foreign keys to it will be null this pass: {}",
                    kind,
                    e
                );
                return ResolvedMap::degraded(e.to_string());
            }
        };

        let map = IdentifierMap::from_pairs(rows.iter().map(|row| {
            let origen_id: String = row.get(0);
            let id: i64 = row.get(1);
            (origen_id, id)
        }));

        tracing::debug!("Resolved {} identifiers for {}", map.len(), kind);
        ResolvedMap::fresh(map)
    }
}
