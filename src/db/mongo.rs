//! MongoDB client, connector and collection wrapper

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Document};
use mongodb::{
    error::{ErrorKind, WriteFailure},
    event::{sdam::SdamEvent, EventHandler},
    options::{ClientOptions, FindOptions, IndexOptions, ServerAddress, UpdateModifications},
    results::{DeleteResult, UpdateResult},
    Client, Collection, IndexModel, ServerType,
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::db::connection::{ConnectionEvent, EventSink, StoreConnector, StoreHandle};
use crate::db::schemas::Metadata;
use crate::types::MarqueeError;

const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(3);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// True if the driver error is a unique-index violation
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY_CODE
        }
        _ => err.to_string().contains("E11000"),
    }
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, MarqueeError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

#[async_trait]
impl StoreHandle for MongoClient {
    async fn close(&self) {
        // Waits for in-use sessions and cursors to be returned
        self.client.clone().shutdown().await;
    }
}

/// Opens MongoDB connections and forwards topology events
#[derive(Debug, Clone)]
pub struct MongoConnector {
    default_db: String,
}

impl MongoConnector {
    /// `default_db` is used when the URI names no database
    pub fn new(default_db: impl Into<String>) -> Self {
        Self {
            default_db: default_db.into(),
        }
    }
}

/// Map a server type transition to a connection event, if it is one
fn availability_event(previous: ServerType, current: ServerType) -> Option<ConnectionEvent> {
    let was_available = previous != ServerType::Unknown;
    let is_available = current != ServerType::Unknown;
    match (was_available, is_available) {
        (true, false) => Some(ConnectionEvent::Disconnected),
        (false, true) => Some(ConnectionEvent::Reconnected),
        _ => None,
    }
}

fn forward_sdam_event(events: &EventSink, event: SdamEvent) {
    match event {
        SdamEvent::ServerHeartbeatFailed(failed) => {
            events.emit(ConnectionEvent::Error(format!(
                "{}: {}",
                failed.server_address, failed.failure
            )));
        }
        SdamEvent::ServerDescriptionChanged(changed) => {
            match availability_event(
                changed.previous_description.server_type(),
                changed.new_description.server_type(),
            ) {
                Some(event) => events.emit(event),
                None => debug!(address = %changed.address, "Server description changed"),
            }
        }
        _ => {}
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    type Handle = MongoClient;

    async fn connect(&self, uri: &str, events: EventSink) -> Result<MongoClient, MarqueeError> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| MarqueeError::Database(format!("Invalid MongoDB URI: {}", e)))?;

        // Avoid hanging on an unreachable server
        options
            .server_selection_timeout
            .get_or_insert(SERVER_SELECTION_TIMEOUT);
        options.connect_timeout.get_or_insert(CONNECT_TIMEOUT);
        options.app_name.get_or_insert_with(|| "marquee".to_string());
        options.sdam_event_handler = Some(EventHandler::callback(move |event: SdamEvent| {
            forward_sdam_event(&events, event)
        }));

        let db_name = options
            .default_database
            .clone()
            .unwrap_or_else(|| self.default_db.clone());
        let hosts: Vec<String> = options.hosts.iter().map(ServerAddress::to_string).collect();
        info!(hosts = ?hosts, db = %db_name, "Connecting to MongoDB");

        let client = Client::with_options(options)
            .map_err(|e| MarqueeError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(&db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| MarqueeError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(MongoClient { client, db_name })
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, MarqueeError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), MarqueeError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| MarqueeError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, setting metadata timestamps
    ///
    /// A unique-index violation is reported as `Conflict`.
    pub async fn insert_one(&self, mut item: T) -> Result<ObjectId, MarqueeError> {
        *item.mut_metadata() = Metadata::new();

        let result = self.inner.insert_one(item).await.map_err(|e| {
            if is_duplicate_key(&e) {
                MarqueeError::Conflict("Duplicate key".into())
            } else {
                MarqueeError::Database(format!("Insert failed: {}", e))
            }
        })?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| MarqueeError::Database("Failed to get inserted ID".into()))
    }

    /// Insert several documents, setting metadata timestamps
    pub async fn insert_many(&self, items: Vec<T>) -> Result<usize, MarqueeError> {
        let items: Vec<T> = items
            .into_iter()
            .map(|mut item| {
                *item.mut_metadata() = Metadata::new();
                item
            })
            .collect();

        let result = self
            .inner
            .insert_many(items)
            .await
            .map_err(|e| MarqueeError::Database(format!("Insert failed: {}", e)))?;

        Ok(result.inserted_ids.len())
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, MarqueeError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| MarqueeError::Database(format!("Find failed: {}", e)))
    }

    /// Find many documents by filter, optionally sorted
    pub async fn find_many(
        &self,
        filter: Document,
        sort: Option<Document>,
    ) -> Result<Vec<T>, MarqueeError> {
        use futures_util::StreamExt;

        let options = FindOptions::builder().sort(sort).build();

        let cursor = self
            .inner
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| MarqueeError::Database(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Update one document
    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult, MarqueeError> {
        self.inner
            .update_one(filter, update.into())
            .await
            .map_err(|e| MarqueeError::Database(format!("Update failed: {}", e)))
    }

    /// Hard delete one document
    pub async fn delete_one(&self, filter: Document) -> Result<DeleteResult, MarqueeError> {
        self.inner
            .delete_one(filter)
            .await
            .map_err(|e| MarqueeError::Database(format!("Delete failed: {}", e)))
    }

    /// Hard delete every matching document
    pub async fn delete_many(&self, filter: Document) -> Result<DeleteResult, MarqueeError> {
        self.inner
            .delete_many(filter)
            .await
            .map_err(|e| MarqueeError::Database(format!("Delete failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_transitions() {
        assert_eq!(
            availability_event(ServerType::Standalone, ServerType::Unknown),
            Some(ConnectionEvent::Disconnected)
        );
        assert_eq!(
            availability_event(ServerType::Unknown, ServerType::RsPrimary),
            Some(ConnectionEvent::Reconnected)
        );
        assert_eq!(
            availability_event(ServerType::RsPrimary, ServerType::RsSecondary),
            None
        );
        assert_eq!(availability_event(ServerType::Unknown, ServerType::Unknown), None);
    }
}
