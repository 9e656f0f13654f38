// ABOUTME: Compares source document counts with target row counts per entity kind
// ABOUTME: Backs the `verify` command used to spot replication drift

use anyhow::Result;

use crate::entity::EntityKind;
use crate::source::DocumentSource;
use crate::target::RelationalTarget;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountComparison {
    pub kind: EntityKind,
    pub source_documents: u64,
    pub target_rows: u64,
}

impl CountComparison {
    /// Equal counts are the sync criterion.
    ///
    /// Client and agent documents whose user account does not resolve are
    /// counted in the source but never written, so they show up as a
    /// shortfall; rows whose source document was deleted show up as a surplus.
    pub fn is_in_sync(&self) -> bool {
        self.source_documents == self.target_rows
    }

    pub fn difference(&self) -> i64 {
        self.target_rows as i64 - self.source_documents as i64
    }
}

/// Count every entity kind on both sides.
pub async fn compare_counts(
    source: &dyn DocumentSource,
    target: &mut dyn RelationalTarget,
) -> Result<Vec<CountComparison>> {
    let mut comparisons = Vec::with_capacity(EntityKind::DEPENDENCY_ORDER.len());

    for kind in EntityKind::DEPENDENCY_ORDER {
        let source_documents = source.count(kind).await?;
        let target_rows = match target.count(kind).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Could not count {} in target: {:#}", kind, e);
                0
            }
        };
        comparisons.push(CountComparison {
            kind,
            source_documents,
            target_rows,
        });
    }

    Ok(comparisons)
}
