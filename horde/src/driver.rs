#[cfg(feature = "sync")]
pub mod blocking;
pub mod memory;
pub mod mongo;

use crate::{Error, Index, Result, error::StorageError, executor::Executor};
use async_trait::async_trait;
use mongodb::bson::{self, Bson};
use parking_lot::RwLock;
use std::{
    any::{Any, type_name},
    fmt,
    marker::PhantomData,
    sync::{Arc, LazyLock},
};
use tracing::debug;

pub use memory::MemoryDriver;
pub use mongo::{MongoConfig, MongoDriver};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn to_bson(self) -> Bson {
        match self {
            Self::Asc => Bson::Int32(1),
            Self::Desc => Bson::Int32(-1),
        }
    }
}

/// Read options shared by every driver. Keys are logical field names until
/// they reach the driver, which receives storage keys.
#[derive(Clone, Debug, Default)]
pub struct FindOptions {
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub sort: Option<bson::Document>,
    pub projection: Option<bson::Document>,
}

impl FindOptions {
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort_by(mut self, key: impl Into<String>, order: Order) -> Self {
        self.sort
            .get_or_insert_with(bson::Document::new)
            .insert(key.into(), order.to_bson());
        self
    }

    pub fn projection(mut self, projection: bson::Document) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// What a storage write reported, handed to post-write hooks.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    Inserted { id: Bson },
    Updated { matched: u64, modified: u64 },
    Deleted { deleted: u64 },
}

/// A storage backend. Filters, updates and documents are already in storage form.
#[async_trait]
pub trait Driver: fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// How this driver runs independent I/O validators.
    fn executor(&self) -> &dyn Executor;

    /// Inserts `document`, returning its `_id`.
    async fn insert_one(&self, collection: &str, document: bson::Document) -> Result<Bson, StorageError>;

    /// Applies `update` to the first match, returning `(matched, modified)`.
    async fn update_one(
        &self,
        collection: &str,
        filter: bson::Document,
        update: bson::Document,
    ) -> Result<(u64, u64), StorageError>;

    async fn delete_one(&self, collection: &str, filter: bson::Document) -> Result<u64, StorageError>;

    async fn find(
        &self,
        collection: &str,
        filter: bson::Document,
        options: FindOptions,
    ) -> Result<Vec<bson::Document>, StorageError>;

    async fn find_one(
        &self,
        collection: &str,
        filter: bson::Document,
        projection: Option<bson::Document>,
    ) -> Result<Option<bson::Document>, StorageError> {
        let options = FindOptions {
            limit: Some(1),
            projection,
            ..FindOptions::default()
        };
        let documents = self.find(collection, filter, options).await?;

        Ok(documents.into_iter().next())
    }

    async fn count(&self, collection: &str, filter: bson::Document) -> Result<u64, StorageError>;

    async fn create_indexes(&self, collection: &str, indexes: &[Index]) -> Result<(), StorageError>;
}

/// Builds a driver out of an opaque storage handle.
pub trait DriverFactory: Send + Sync {
    fn name(&self) -> &str;

    fn is_compatible_with(&self, handle: &(dyn Any + Send + Sync)) -> bool;

    fn build(&self, handle: Box<dyn Any + Send + Sync>) -> Result<Arc<dyn Driver>>;
}

/// A factory accepting handles of type `H`.
pub struct TypedFactory<H, F> {
    name: &'static str,
    build: F,
    handle: PhantomData<fn(H)>,
}

impl<H, D, F> TypedFactory<H, F>
where
    H: Any + Send + Sync,
    D: Driver,
    F: Fn(H) -> D + Send + Sync,
{
    pub fn new(name: &'static str, build: F) -> Self {
        Self {
            name,
            build,
            handle: PhantomData,
        }
    }
}

impl<H, D, F> DriverFactory for TypedFactory<H, F>
where
    H: Any + Send + Sync,
    D: Driver,
    F: Fn(H) -> D + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn is_compatible_with(&self, handle: &(dyn Any + Send + Sync)) -> bool {
        handle.is::<H>()
    }

    fn build(&self, handle: Box<dyn Any + Send + Sync>) -> Result<Arc<dyn Driver>> {
        let handle = handle.downcast::<H>().map_err(|_| {
            Error::NoCompatibleDriver(format!(
                "driver factory `{}` expects a `{}` handle",
                self.name,
                type_name::<H>()
            ))
        })?;

        Ok(Arc::new((self.build)(*handle)))
    }
}

/// Driver factories probed newest first.
#[derive(Default)]
pub struct DriverRegistry {
    factories: Vec<Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    pub fn global() -> &'static RwLock<DriverRegistry> {
        static REGISTRY: LazyLock<RwLock<DriverRegistry>> =
            LazyLock::new(|| RwLock::new(DriverRegistry::with_defaults()));

        &REGISTRY
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(TypedFactory::new("memory", |driver: MemoryDriver| driver)));
        registry.register(Arc::new(TypedFactory::new("mongodb", MongoDriver::new)));
        #[cfg(feature = "sync")]
        registry.register(Arc::new(TypedFactory::new(
            "mongodb-sync",
            blocking::BlockingMongoDriver::new,
        )));
        registry
    }

    /// Registered factories take precedence over earlier ones.
    pub fn register(&mut self, factory: Arc<dyn DriverFactory>) {
        if let Some(position) = self.position(factory.name()) {
            self.factories.remove(position);
        }
        self.factories.insert(0, factory);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(position) => {
                self.factories.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.iter().map(|factory| factory.name()).collect()
    }

    pub fn find(&self, handle: &(dyn Any + Send + Sync)) -> Option<&Arc<dyn DriverFactory>> {
        self.factories
            .iter()
            .find(|factory| factory.is_compatible_with(handle))
    }

    pub fn build<H: Any + Send + Sync>(&self, handle: H) -> Result<Arc<dyn Driver>> {
        let factory = self.find(&handle).ok_or_else(|| {
            Error::NoCompatibleDriver(format!(
                "Cannot find a driver compatible with `{}`",
                type_name::<H>()
            ))
        })?;

        debug!(factory = factory.name(), handle = type_name::<H>(), "driver selected");

        factory.build(Box::new(handle))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.factories
            .iter()
            .position(|factory| factory.name() == name)
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

pub fn register_driver(factory: impl DriverFactory + 'static) {
    DriverRegistry::global().write().register(Arc::new(factory));
}

pub fn unregister_driver(name: &str) -> bool {
    DriverRegistry::global().write().unregister(name)
}
