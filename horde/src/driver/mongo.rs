use super::{Driver, FindOptions};
use crate::{
    Error, Index, Result,
    error::StorageError,
    executor::{Executor, Joined},
};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::{
    Client, Database,
    bson::{self, Bson},
    error::{ErrorKind, WriteFailure},
};
use serde::Deserialize;
use std::{fmt, sync::Arc};
use tracing::debug;
use url::Url;

pub(crate) const DUPLICATE_KEY_CODE: i32 = 11000;

const DEFAULT_DATABASE: &str = "horde";

/// Connection settings, typically read from an application config file.
#[derive(Clone, Debug, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    #[serde(default)]
    pub database: Option<String>,
}

/// Driver over an async `mongodb::Database`.
#[derive(Clone)]
pub struct MongoDriver {
    database: Database,
    executor: Arc<dyn Executor>,
}

impl MongoDriver {
    pub fn new(database: Database) -> Self {
        Self {
            database,
            executor: Arc::new(Joined),
        }
    }

    pub fn with_executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    /// Connects to `url`, using its path as the database name.
    pub async fn connect(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|err| StorageError::Other(format!("invalid connection URL: {err}")))?;

        if url.scheme() != "mongodb" && url.scheme() != "mongodb+srv" {
            return Err(StorageError::Other(format!(
                "connection URL does not have a `mongodb` scheme; url={url}"
            ))
            .into());
        }

        let database = database_name(&url).unwrap_or(DEFAULT_DATABASE).to_owned();
        let client = Client::with_uri_str(url.as_str()).await?;

        debug!(database = %database, "connected");

        Ok(Self::new(client.database(&database)))
    }

    pub async fn from_config(config: &MongoConfig) -> Result<Self> {
        let driver = Self::connect(&config.uri).await?;

        Ok(match &config.database {
            Some(database) => Self {
                database: driver.database.client().database(database),
                ..driver
            },
            None => driver,
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> mongodb::Collection<bson::Document> {
        self.database.collection(name)
    }
}

fn database_name(url: &Url) -> Option<&str> {
    let name = url.path().trim_start_matches('/');
    (!name.is_empty()).then_some(name)
}

impl fmt::Debug for MongoDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoDriver")
            .field("database", &self.database.name())
            .field("executor", &self.executor)
            .finish()
    }
}

/// Separates duplicate key failures from the other driver errors.
pub(crate) fn storage_error(err: mongodb::error::Error) -> StorageError {
    if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = err.kind.as_ref() {
        if write_error.code == DUPLICATE_KEY_CODE {
            return StorageError::DuplicateKey {
                message: write_error.message.clone(),
            };
        }
    }

    StorageError::Mongo(err)
}

#[async_trait]
impl Driver for MongoDriver {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    async fn insert_one(&self, collection: &str, document: bson::Document) -> Result<Bson, StorageError> {
        let inserted = self
            .collection(collection)
            .insert_one(document)
            .await
            .map_err(storage_error)?;

        Ok(inserted.inserted_id)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: bson::Document,
        update: bson::Document,
    ) -> Result<(u64, u64), StorageError> {
        let updated = self
            .collection(collection)
            .update_one(filter, update)
            .await
            .map_err(storage_error)?;

        Ok((updated.matched_count, updated.modified_count))
    }

    async fn delete_one(&self, collection: &str, filter: bson::Document) -> Result<u64, StorageError> {
        let deleted = self
            .collection(collection)
            .delete_one(filter)
            .await
            .map_err(storage_error)?;

        Ok(deleted.deleted_count)
    }

    async fn find(
        &self,
        collection: &str,
        filter: bson::Document,
        options: FindOptions,
    ) -> Result<Vec<bson::Document>, StorageError> {
        let collection = self.collection(collection);
        let mut query = collection.find(filter);

        if let Some(skip) = options.skip {
            query = query.skip(skip);
        }

        if let Some(limit) = options.limit {
            query = query.limit(limit);
        }

        if let Some(sort) = options.sort {
            query = query.sort(sort);
        }

        if let Some(projection) = options.projection {
            query = query.projection(projection);
        }

        let documents = query
            .await
            .map_err(storage_error)?
            .try_collect()
            .await
            .map_err(storage_error)?;

        Ok(documents)
    }

    async fn count(&self, collection: &str, filter: bson::Document) -> Result<u64, StorageError> {
        self.collection(collection)
            .count_documents(filter)
            .await
            .map_err(storage_error)
    }

    async fn create_indexes(&self, collection: &str, indexes: &[Index]) -> Result<(), StorageError> {
        if indexes.is_empty() {
            return Ok(());
        }

        let models = indexes
            .iter()
            .map(Index::to_model)
            .collect::<Result<Vec<_>, Error>>()
            .map_err(|err| StorageError::Other(err.to_string()))?;

        self.collection(collection)
            .create_indexes(models)
            .await
            .map_err(storage_error)?;

        Ok(())
    }
}
