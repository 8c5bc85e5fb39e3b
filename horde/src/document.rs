use crate::{
    DataProxy, EmbeddedDocument, Error, Implementation, Reference, Result, TemplateKind,
    ValidationError, Value,
    builder::{CLS_KEY, ID_KEY},
    driver::{Driver, FindOptions, WriteOutcome},
    error::{ErrorCollector, StorageError},
    i18n::{self, Translator},
    io_validate, query,
    value::{Dict, List},
};
use futures_util::{
    FutureExt,
    future::{self, BoxFuture},
};
use mongodb::bson::{self, Bson};
use serde::de::DeserializeOwned;
use std::{fmt, ptr, sync::Arc};
use tracing::{debug, warn};

const NOT_IN_DATABASE: &str = "Document doesn't exists in database";

/// Extra behavior for [`Document::commit_with`].
#[derive(Clone, Debug, Default)]
pub struct CommitOptions {
    /// Run I/O validators on every field, not only on modified ones.
    pub io_validate_all: bool,
    /// Logical conditions the stored document must match for an update to apply.
    pub conditions: Option<bson::Document>,
}

impl CommitOptions {
    pub fn io_validate_all(mut self, io_validate_all: bool) -> Self {
        self.io_validate_all = io_validate_all;
        self
    }

    pub fn conditions(mut self, conditions: bson::Document) -> Self {
        self.conditions = Some(conditions);
        self
    }
}

/// A document stored in its own collection.
#[derive(Clone)]
pub struct Document {
    implementation: Arc<Implementation>,
    data: DataProxy,
    is_created: bool,
}

impl Document {
    /// Loads `raw` through the schema, filling defaults. The document is not stored yet.
    pub fn new(implementation: &Arc<Implementation>, raw: bson::Document) -> Result<Self> {
        let mut document = Self::empty(implementation)?;
        document.data.load(raw, false)?;

        Ok(document)
    }

    fn empty(implementation: &Arc<Implementation>) -> Result<Self> {
        if implementation.kind() != TemplateKind::Document {
            return Err(Error::DocumentDefinition(format!(
                "`{}` is not a document",
                implementation.name()
            )));
        }
        if implementation.opts().is_abstract() {
            return Err(Error::AbstractDocument(
                "Cannot instantiate an abstract Document".into(),
            ));
        }

        Ok(Self {
            implementation: Arc::clone(implementation),
            data: DataProxy::new(Arc::clone(implementation.layout())),
            is_created: false,
        })
    }

    /// Hydrates a stored document. With `use_cls`, the concrete implementation
    /// is picked from the `_cls` discriminator.
    pub fn build_from_storage(
        implementation: &Arc<Implementation>,
        data: bson::Document,
        partial: bool,
        use_cls: bool,
    ) -> Result<Self> {
        let implementation = match data.get(CLS_KEY) {
            Some(Bson::String(cls)) if use_cls && cls != implementation.name() => {
                implementation.instance()?.retrieve_document(cls)?
            }
            _ => Arc::clone(implementation),
        };

        let mut document = Self::empty(&implementation)?;
        document.data.from_storage(data, partial)?;
        document.is_created = true;

        Ok(document)
    }

    pub fn implementation(&self) -> &Arc<Implementation> {
        &self.implementation
    }

    pub fn data(&self) -> &DataProxy {
        &self.data
    }

    /// Primary key, `None` until one is set or generated on insert.
    pub fn pk(&self) -> Option<&Bson> {
        match self.data.peek_storage_key(ID_KEY) {
            Value::Bson(pk) if *pk != Bson::Null => Some(pk),
            _ => None,
        }
    }

    pub fn is_created(&self) -> bool {
        self.is_created
    }

    pub fn get(&self, name: impl AsRef<str>) -> Result<&Value> {
        self.data.get(name.as_ref())
    }

    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<Value>) -> Result<()> {
        self.data.set(name.as_ref(), value)
    }

    /// Resets a field to its default, or to missing.
    pub fn delete_field(&mut self, name: impl AsRef<str>) -> Result<()> {
        self.data.delete(name.as_ref())
    }

    pub fn list_mut(&mut self, name: impl AsRef<str>) -> Result<Option<&mut List>> {
        self.data.list_mut(name.as_ref())
    }

    pub fn dict_mut(&mut self, name: impl AsRef<str>) -> Result<Option<&mut Dict>> {
        self.data.dict_mut(name.as_ref())
    }

    pub fn embedded_mut(&mut self, name: impl AsRef<str>) -> Result<Option<&mut EmbeddedDocument>> {
        self.data.embedded_mut(name.as_ref())
    }

    pub fn reference_mut(&mut self, name: impl AsRef<str>) -> Result<Option<&mut Reference>> {
        self.data.reference_mut(name.as_ref())
    }

    /// Merges `raw` into the current values, marking the given fields modified.
    pub fn update(&mut self, raw: bson::Document) -> Result<()> {
        self.data.update(raw)
    }

    pub fn dump(&self) -> Result<bson::Document> {
        self.data.dump()
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.data.items()
    }

    /// Full storage form, as sent on insert.
    pub fn to_storage(&self) -> bson::Document {
        self.data.to_storage_insert()
    }

    /// `$set`/`$unset` payload of the pending changes.
    pub fn to_storage_update(&self) -> Result<Option<bson::Document>> {
        if !self.is_created {
            return Err(Error::NotCreated(NOT_IN_DATABASE.into()));
        }

        Ok(self.data.to_storage_update())
    }

    /// Deserializes the storage form into `T`.
    pub fn to_struct<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bson::from_document(self.data.to_storage_insert())?)
    }

    pub fn is_modified(&self) -> bool {
        !self.is_created || self.data.is_modified()
    }

    pub fn clear_modified(&mut self) {
        self.data.clear_modified();
    }

    pub fn required_validate(&self) -> Result<(), ValidationError> {
        self.data.required_validate()
    }

    pub fn to_reference(&self) -> Result<Reference> {
        match self.pk() {
            Some(pk) if self.is_created => Ok(Reference::new(&self.implementation, pk.clone())),
            _ => Err(ValidationError::new(self.translator().translate(i18n::REFERENCE_NOT_CREATED)).into()),
        }
    }

    /// Copy of this document without its primary key, to be inserted as a new one.
    pub fn duplicate(&self) -> Result<Self> {
        let mut raw = self.data.to_storage_insert();
        raw.remove(ID_KEY);

        let mut duplicate = Self::empty(&self.implementation)?;
        duplicate.data.from_storage(raw, false)?;

        let keys: Vec<String> = self
            .implementation
            .schema()
            .fields()
            .map(|(_, field)| field.storage_key_or_name())
            .filter(|key| *key != ID_KEY)
            .map(str::to_owned)
            .collect();
        for key in keys {
            duplicate.data.mark_modified(&key);
        }

        Ok(duplicate)
    }

    /// Runs the I/O validators, of modified fields only unless `validate_all`.
    pub fn io_validate(&self, validate_all: bool) -> BoxFuture<'static, Result<()>> {
        let driver = match self.driver() {
            Ok(driver) => driver,
            Err(err) => return future::ready(Err(err)).boxed(),
        };
        let only = (!validate_all && self.is_created).then(|| self.data.modified_fields());

        io_validate::validate_data(&self.data, only.as_deref(), driver.executor())
    }

    pub fn commit(&mut self) -> BoxFuture<'_, Result<Option<WriteOutcome>>> {
        self.commit_with(CommitOptions::default())
    }

    /// Inserts the document, or stores its pending changes.
    ///
    /// Returns `None` when a stored document has nothing to write. Local state
    /// is marked clean once the write succeeds, before the post hooks run.
    pub fn commit_with(&mut self, options: CommitOptions) -> BoxFuture<'_, Result<Option<WriteOutcome>>> {
        async move {
            let driver = self.driver()?;
            let collection = self.implementation.collection_name()?.to_owned();

            let outcome = if self.is_created {
                if !self.data.is_modified() {
                    return Ok(None);
                }
                self.commit_update(&*driver, &collection, options).await?
            } else {
                if options.conditions.is_some() {
                    return Err(Error::ConditionsOnInsert);
                }
                Some(self.commit_insert(&*driver, &collection).await?)
            };

            Ok(outcome)
        }
        .boxed()
    }

    async fn commit_insert(&mut self, driver: &dyn Driver, collection: &str) -> Result<WriteOutcome> {
        if let Some(hook) = self.implementation.hooks().pre_insert.clone() {
            hook(self)?;
        }
        self.data.required_validate()?;
        io_validate::validate_data(&self.data, None, driver.executor()).await?;

        let payload = self.data.to_storage_insert();
        debug!(document = self.implementation.name(), collection, "inserting document");
        let id = match driver.insert_one(collection, payload).await {
            Ok(id) => id,
            Err(err) => return Err(self.unique_violation(err)),
        };

        self.data.store(ID_KEY, Value::Bson(id.clone()));
        self.is_created = true;
        self.data.clear_modified();

        let outcome = WriteOutcome::Inserted { id };
        if let Some(hook) = self.implementation.hooks().post_insert.clone() {
            hook(self, &outcome)?;
        }

        Ok(outcome)
    }

    async fn commit_update(
        &mut self,
        driver: &dyn Driver,
        collection: &str,
        options: CommitOptions,
    ) -> Result<Option<WriteOutcome>> {
        let schema = Arc::clone(self.implementation.schema());

        let mut filter = options
            .conditions
            .map(|conditions| query::map_query(&conditions, &schema))
            .unwrap_or_default();
        filter.insert(ID_KEY, self.pk().cloned().unwrap_or(Bson::Null));

        if let Some(hook) = self.implementation.hooks().pre_update.clone() {
            if let Some(extra) = hook(self)? {
                filter.extend(query::map_query(&extra, &schema));
            }
        }
        self.data.required_validate()?;
        let only = (!options.io_validate_all).then(|| self.data.modified_fields());
        io_validate::validate_data(&self.data, only.as_deref(), driver.executor()).await?;

        let Some(payload) = self.data.to_storage_update() else {
            return Ok(None);
        };
        debug!(document = self.implementation.name(), collection, %filter, "updating document");
        let (matched, modified) = match driver.update_one(collection, filter, payload).await {
            Ok(counts) => counts,
            Err(err) => return Err(self.unique_violation(err)),
        };
        if matched != 1 {
            return Err(Error::Update { matched });
        }

        self.data.clear_modified();

        let outcome = WriteOutcome::Updated { matched, modified };
        if let Some(hook) = self.implementation.hooks().post_update.clone() {
            hook(self, &outcome)?;
        }

        Ok(Some(outcome))
    }

    pub fn delete(&mut self) -> BoxFuture<'_, Result<WriteOutcome>> {
        self.delete_with(None)
    }

    /// Removes the stored document, provided it still matches `conditions`.
    pub fn delete_with(&mut self, conditions: Option<bson::Document>) -> BoxFuture<'_, Result<WriteOutcome>> {
        async move {
            if !self.is_created {
                return Err(Error::NotCreated(NOT_IN_DATABASE.into()));
            }
            let driver = self.driver()?;
            let collection = self.implementation.collection_name()?.to_owned();
            let schema = Arc::clone(self.implementation.schema());

            let mut filter = conditions
                .map(|conditions| query::map_query(&conditions, &schema))
                .unwrap_or_default();
            filter.insert(ID_KEY, self.pk().cloned().unwrap_or(Bson::Null));

            if let Some(hook) = self.implementation.hooks().pre_delete.clone() {
                if let Some(extra) = hook(self)? {
                    filter.extend(query::map_query(&extra, &schema));
                }
            }

            debug!(document = self.implementation.name(), collection, %filter, "deleting document");
            let deleted = driver.delete_one(&collection, filter).await?;
            if deleted != 1 {
                return Err(Error::Delete { deleted });
            }
            self.is_created = false;

            let outcome = WriteOutcome::Deleted { deleted };
            if let Some(hook) = self.implementation.hooks().post_delete.clone() {
                hook(self, &outcome)?;
            }

            Ok(outcome)
        }
        .boxed()
    }

    /// Replaces every value with the stored state.
    pub fn reload(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            let pk = match self.pk() {
                Some(pk) if self.is_created => pk.clone(),
                _ => return Err(Error::NotCreated(NOT_IN_DATABASE.into())),
            };
            let driver = self.driver()?;
            let collection = self.implementation.collection_name()?;

            let raw = driver
                .find_one(collection, query::by_pk(pk), None)
                .await?
                .ok_or_else(|| Error::NotCreated(NOT_IN_DATABASE.into()))?;
            self.data.from_storage(raw, false)?;

            Ok(())
        }
        .boxed()
    }

    fn driver(&self) -> Result<Arc<dyn Driver>> {
        self.implementation.instance()?.driver()
    }

    fn translator(&self) -> Translator {
        self.implementation
            .instance()
            .map(|instance| instance.translator().clone())
            .unwrap_or_default()
    }

    /// Turns a duplicate key failure on a declared unique index into a
    /// validation error on the fields it covers.
    fn unique_violation(&self, err: StorageError) -> Error {
        let StorageError::DuplicateKey { message } = &err else {
            return err.into();
        };

        let index = self.implementation.opts().indexes().iter().find(|index| {
            let name = index.name();
            message.contains(&format!("index: {name} ")) || message.contains(&format!(".${name} "))
        });
        let Some(index) = index else {
            warn!(document = self.implementation.name(), %message, "duplicate key on an undeclared index");
            return err.into();
        };

        let schema = self.implementation.schema();
        let mut keys: Vec<String> = index
            .keys()
            .iter()
            .map(|(key, _)| key.as_str())
            .filter(|key| *key != CLS_KEY)
            .map(|key| query::unmap_path(key, schema))
            .collect();
        keys.sort();

        let translator = self.translator();
        let mut errors = ErrorCollector::default();
        if let [key] = keys.as_slice() {
            let message = schema.resolve_path(key).map_or_else(
                || translator.translate(i18n::UNIQUE),
                |field| field.message("unique", i18n::UNIQUE, &[]),
            );
            errors.add_message(key.clone(), message);
        } else {
            let fields = format!("[{}]", keys.join(", "));
            let args = [("fields", fields.as_str())];
            for key in &keys {
                let message = schema.resolve_path(key).map_or_else(
                    || translator.format(i18n::UNIQUE_COMPOUND, &args),
                    |field| field.message("unique_compound", i18n::UNIQUE_COMPOUND, &args),
                );
                errors.add_message(key.clone(), message);
            }
        }

        debug!(document = self.implementation.name(), index = %index.name(), "duplicate key translated");

        match errors.finish() {
            Err(validation) => validation.into(),
            Ok(()) => err.into(),
        }
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        match (self.pk(), other.pk()) {
            (Some(pk), Some(other_pk)) => {
                self.implementation.opts().collection_name() == other.implementation.opts().collection_name()
                    && pk == other_pk
            }
            _ => ptr::eq(self, other),
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.implementation.name())?;
        f.debug_map().entries(self.data.items()).finish()?;
        write!(f, ")")
    }
}

impl Implementation {
    pub fn find(self: &Arc<Self>, filter: bson::Document) -> BoxFuture<'static, Result<Vec<Document>>> {
        self.find_with(filter, FindOptions::default())
    }

    /// Finds documents matching the logical `filter`. A projection loads
    /// documents partially.
    pub fn find_with(
        self: &Arc<Self>,
        filter: bson::Document,
        options: FindOptions,
    ) -> BoxFuture<'static, Result<Vec<Document>>> {
        let implementation = Arc::clone(self);

        async move {
            let driver = implementation.instance()?.driver()?;
            let collection = implementation.collection_name()?;

            let filter = query::cook_find_filter(&implementation, &filter);
            let (options, partial) = implementation.cook_find_options(options);

            let documents = driver.find(collection, filter, options).await?;

            documents
                .into_iter()
                .map(|data| Document::build_from_storage(&implementation, data, partial, true))
                .collect()
        }
        .boxed()
    }

    pub fn find_one(self: &Arc<Self>, filter: bson::Document) -> BoxFuture<'static, Result<Option<Document>>> {
        let documents = self.find_with(filter, FindOptions::default().limit(1));

        async move {
            let mut documents = documents.await?;

            Ok(documents.pop())
        }
        .boxed()
    }

    pub fn find_by_pk(self: &Arc<Self>, pk: impl Into<Bson>) -> BoxFuture<'static, Result<Option<Document>>> {
        match self.deserialize_pk(pk.into()) {
            Ok(pk) => self.find_one(query::by_pk(pk)),
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }

    pub fn count(self: &Arc<Self>, filter: bson::Document) -> BoxFuture<'static, Result<u64>> {
        let implementation = Arc::clone(self);

        async move {
            let driver = implementation.instance()?.driver()?;
            let collection = implementation.collection_name()?;

            let filter = query::cook_find_filter(&implementation, &filter);
            let count = driver.count(collection, filter).await?;

            Ok(count)
        }
        .boxed()
    }

    pub fn ensure_indexes(self: &Arc<Self>) -> BoxFuture<'static, Result<()>> {
        let implementation = Arc::clone(self);

        async move {
            let driver = implementation.instance()?.driver()?;
            let collection = implementation.collection_name()?;
            let indexes = implementation.opts().indexes();

            debug!(document = implementation.name(), collection, count = indexes.len(), "ensuring indexes");
            driver.create_indexes(collection, indexes).await?;

            Ok(())
        }
        .boxed()
    }

    fn cook_find_options(&self, mut options: FindOptions) -> (FindOptions, bool) {
        options.sort = options.sort.map(|sort| query::map_keys(&sort, self.schema()));

        let Some(projection) = options.projection.take() else {
            return (options, false);
        };
        let mut projection = query::map_keys(&projection, self.schema());

        let inclusive = projection
            .iter()
            .any(|(key, value)| key != ID_KEY && !matches!(value, Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false)));
        if inclusive && (self.opts().is_child() || self.opts().has_any_offspring()) {
            projection.insert(CLS_KEY, 1);
        }
        options.projection = Some(projection);

        (options, true)
    }
}
