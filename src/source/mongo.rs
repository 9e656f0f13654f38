// ABOUTME: MongoDB source reader and change-stream subscriber
// ABOUTME: Joins person-like collections with their user accounts server-side

use anyhow::{Context, Result};
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::{StreamExt, TryStreamExt};
use mongodb::change_stream::event::ChangeStreamEvent;
use mongodb::{Client, Database};

use super::{ChangeNotification, ChangeSubscriber, DocumentSource, NotificationStream, ReadOutcome};
use crate::config::SourceConfig;
use crate::entity::EntityKind;
use crate::utils::redact_url;

/// Field holding the user-account reference, in the order it is looked up.
const PARENT_REF_FIELDS: [&str; 2] = ["$usuarioId", "$usuario_id"];

/// Aggregation that embeds each document's user account under `parent`.
///
/// The reference is converted to an ObjectId when it is a valid hex string
/// and passed through unchanged otherwise, so both spellings join. Documents
/// without a matching account are dropped by the `$unwind`.
pub fn parent_join_pipeline(parent_collection: &str) -> Vec<Document> {
    let reference = doc! { "$ifNull": [PARENT_REF_FIELDS[0], PARENT_REF_FIELDS[1]] };

    vec![
        doc! {
            "$addFields": {
                "_parent_ref": {
                    "$convert": {
                        "input": reference.clone(),
                        "to": "objectId",
                        "onError": reference,
                        "onNull": Bson::Null,
                    }
                }
            }
        },
        doc! {
            "$lookup": {
                "from": parent_collection,
                "localField": "_parent_ref",
                "foreignField": "_id",
                "as": "parent",
            }
        },
        doc! {
            "$unwind": {
                "path": "$parent",
                "preserveNullAndEmptyArrays": false,
            }
        },
        doc! { "$project": { "_parent_ref": 0 } },
    ]
}

/// Reads the operational collections of one MongoDB database.
pub struct MongoSource {
    database: Database,
}

impl MongoSource {
    /// Connect and ping the server so unreachable sources fail the attempt early.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let client = connect_client(config).await?;
        Ok(Self {
            database: client.database(&config.database),
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .database
            .list_collection_names()
            .await
            .context("Failed to list source collections")?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn try_read(&self, kind: EntityKind) -> Result<ReadOutcome> {
        if !self.collection_exists(kind.collection()).await? {
            tracing::info!(
                "Collection '{}' does not exist, treating it as empty",
                kind.collection()
            );
            return Ok(ReadOutcome::missing());
        }

        let collection = self.database.collection::<Document>(kind.collection());
        let cursor = match kind.parent_collection() {
            Some(parent) => collection
                .aggregate(parent_join_pipeline(parent))
                .await
                .with_context(|| format!("Failed to join '{}' with '{}'", kind.collection(), parent))?,
            None => collection
                .find(doc! {})
                .await
                .with_context(|| format!("Failed to query '{}'", kind.collection()))?,
        };

        let raw: Vec<Document> = cursor
            .try_collect()
            .await
            .with_context(|| format!("Failed to read '{}'", kind.collection()))?;

        tracing::info!(
            "Read {} documents from '{}'",
            raw.len(),
            kind.collection()
        );
        Ok(ReadOutcome::decode(kind, raw))
    }
}

#[async_trait]
impl DocumentSource for MongoSource {
    async fn read(&self, kind: EntityKind) -> ReadOutcome {
        match self.try_read(kind).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Reading {} degraded to empty: {:#}", kind, e);
                ReadOutcome::degraded(format!("{:#}", e))
            }
        }
    }

    async fn count(&self, kind: EntityKind) -> Result<u64> {
        if !self.collection_exists(kind.collection()).await? {
            return Ok(0);
        }
        self.database
            .collection::<Document>(kind.collection())
            .count_documents(doc! {})
            .await
            .with_context(|| format!("Failed to count '{}'", kind.collection()))
    }
}

/// Database-wide change stream over the source.
pub struct MongoChangeFeed {
    config: SourceConfig,
}

impl MongoChangeFeed {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ChangeSubscriber for MongoChangeFeed {
    async fn subscribe(&self) -> Result<NotificationStream> {
        let client = connect_client(&self.config).await?;
        let stream = client
            .database(&self.config.database)
            .watch()
            .await
            .with_context(|| format!("Failed to open change stream on '{}'", self.config.database))?;

        let notifications = stream
            .map(|event| {
                event
                    .map(notification_from_event)
                    .context("Change stream failed")
            })
            .boxed();

        Ok(notifications)
    }
}

fn notification_from_event(event: ChangeStreamEvent<Document>) -> ChangeNotification {
    let operation = match bson::to_bson(&event.operation_type) {
        Ok(Bson::String(name)) => name,
        _ => format!("{:?}", event.operation_type),
    };
    ChangeNotification {
        operation,
        collection: event.ns.and_then(|ns| ns.coll),
    }
}

async fn connect_client(config: &SourceConfig) -> Result<Client> {
    let shown = redact_url(&config.uri);
    let client = Client::with_uri_str(&config.uri)
        .await
        .with_context(|| format!("Invalid source URI {}", shown))?;
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
        .with_context(|| format!("Failed to reach source {}", shown))?;
    tracing::info!("Connected to source {}", shown);
    Ok(client)
}
