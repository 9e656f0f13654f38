// ABOUTME: Source reader seam - whole-collection reads and change notifications
// ABOUTME: Raw documents are decoded into typed SourceDocuments at this boundary

pub mod document;
pub mod mongo;

use anyhow::Result;
use async_trait::async_trait;
use bson::Document;
use futures::stream::BoxStream;

use crate::entity::EntityKind;
use document::SourceDocument;

pub use mongo::{MongoChangeFeed, MongoSource};

/// Why a read returned what it returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    Complete,
    /// The backing collection does not exist; treated as empty.
    MissingCollection,
    /// The read failed and degraded to an empty result.
    Degraded(String),
}

/// Documents read for one entity kind during one pass.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub documents: Vec<SourceDocument>,
    pub status: ReadStatus,
    /// Raw documents dropped because they could not be decoded.
    pub skipped: usize,
}

impl ReadOutcome {
    /// Decode raw documents, logging and counting the ones that fail.
    pub fn decode(kind: EntityKind, raw: Vec<Document>) -> Self {
        let mut documents = Vec::with_capacity(raw.len());
        let mut skipped = 0;

        for doc in &raw {
            match SourceDocument::decode(kind, doc) {
                Ok(decoded) => documents.push(decoded),
                Err(e) => {
                    let id = doc
                        .get("_id")
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "<no _id>".to_string());
                    tracing::warn!("Skipping {} document {}: {}", kind, id, e);
                    skipped += 1;
                }
            }
        }

        Self {
            documents,
            status: ReadStatus::Complete,
            skipped,
        }
    }

    pub fn missing() -> Self {
        Self {
            documents: Vec::new(),
            status: ReadStatus::MissingCollection,
            skipped: 0,
        }
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            documents: Vec::new(),
            status: ReadStatus::Degraded(reason.into()),
            skipped: 0,
        }
    }
}

/// The document store a pass reads from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Re-read every document of `kind` from scratch.
    ///
    /// Person-like kinds come back joined with their parent account; documents
    /// whose parent does not resolve are left out. Never fails: a missing
    /// collection or a failed read yields an empty, annotated outcome.
    async fn read(&self, kind: EntityKind) -> ReadOutcome;

    /// Number of documents currently in the collection for `kind`.
    async fn count(&self, kind: EntityKind) -> Result<u64>;
}

/// One event from the source's change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub operation: String,
    pub collection: Option<String>,
}

impl ChangeNotification {
    /// The monitored entity kind this notification belongs to, if any.
    pub fn entity(&self) -> Option<EntityKind> {
        self.collection.as_deref().and_then(EntityKind::from_collection)
    }
}

pub type NotificationStream = BoxStream<'static, Result<ChangeNotification>>;

/// Opens a database-wide change subscription.
///
/// Each call starts from the current position; earlier events are not replayed.
#[async_trait]
pub trait ChangeSubscriber: Send + Sync {
    async fn subscribe(&self) -> Result<NotificationStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_decode_counts_skipped_documents() {
        let raw = vec![
            doc! { "_id": "s1", "precioCosto": 100 },
            doc! { "_id": "s2", "precioCosto": "gratis" },
            doc! { "_id": "s3" },
        ];
        let outcome = ReadOutcome::decode(EntityKind::Service, raw);

        assert_eq!(outcome.status, ReadStatus::Complete);
        assert_eq!(outcome.documents.len(), 2);
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn test_notification_entity() {
        let relevant = ChangeNotification {
            operation: "update".to_string(),
            collection: Some("detalleVenta".to_string()),
        };
        assert_eq!(relevant.entity(), Some(EntityKind::SaleLine));

        let other = ChangeNotification {
            operation: "insert".to_string(),
            collection: Some("usuarios".to_string()),
        };
        assert_eq!(other.entity(), None);

        let no_ns = ChangeNotification {
            operation: "dropDatabase".to_string(),
            collection: None,
        };
        assert_eq!(no_ns.entity(), None);
    }
}
