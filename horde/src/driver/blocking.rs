use super::{Driver, FindOptions, mongo::storage_error};
use crate::{
    Error, Index,
    error::StorageError,
    executor::{Executor, Sequential},
};
use async_trait::async_trait;
use mongodb::{
    bson::{self, Bson},
    sync::{Collection, Database},
};
use std::fmt;

/// Driver over a blocking `mongodb::sync::Database`.
///
/// Every call blocks the current thread and I/O validators run one after the other.
#[derive(Clone)]
pub struct BlockingMongoDriver {
    database: Database,
}

impl BlockingMongoDriver {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<bson::Document> {
        self.database.collection(name)
    }
}

impl fmt::Debug for BlockingMongoDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingMongoDriver")
            .field("database", &self.database.name())
            .finish()
    }
}

#[async_trait]
impl Driver for BlockingMongoDriver {
    fn name(&self) -> &'static str {
        "mongodb-sync"
    }

    fn executor(&self) -> &dyn Executor {
        &Sequential
    }

    async fn insert_one(&self, collection: &str, document: bson::Document) -> Result<Bson, StorageError> {
        let inserted = self
            .collection(collection)
            .insert_one(document)
            .run()
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
            .run()
            .map_err(storage_error)?;

        Ok((updated.matched_count, updated.modified_count))
    }

    async fn delete_one(&self, collection: &str, filter: bson::Document) -> Result<u64, StorageError> {
        let deleted = self
            .collection(collection)
            .delete_one(filter)
            .run()
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

        query
            .run()
            .map_err(storage_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_error)
    }

    async fn count(&self, collection: &str, filter: bson::Document) -> Result<u64, StorageError> {
        self.collection(collection)
            .count_documents(filter)
            .run()
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
            .run()
            .map_err(storage_error)?;

        Ok(())
    }
}
