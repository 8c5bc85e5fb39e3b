use crate::{
    EmbeddedDocument, Error, Field, Reference, Result, Schema, Value,
    builder::CLS_KEY,
    error::{ErrorCollector, ValidationError},
    i18n,
    schema::Values,
    value::{Dict, List},
};
use mongodb::bson::{self, Bson};
use std::{collections::HashSet, fmt, sync::Arc};

static MISSING: Value = Value::Missing;

/// Per-document-type behavior shared by every proxy of that type.
#[derive(Debug)]
pub struct ProxyLayout {
    schema: Arc<Schema>,
    strict: bool,
}

impl ProxyLayout {
    pub(crate) fn new(schema: Arc<Schema>, strict: bool) -> Self {
        Self { schema, strict }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

/// Holds a document's values keyed by storage key and tracks which of them
/// changed since the last persist.
#[derive(Clone)]
pub struct DataProxy {
    layout: Arc<ProxyLayout>,
    data: Values,
    not_loaded: HashSet<String>,
    modified: HashSet<String>,
    additional: bson::Document,
}

impl DataProxy {
    pub(crate) fn new(layout: Arc<ProxyLayout>) -> Self {
        Self {
            layout,
            data: Values::new(),
            not_loaded: HashSet::new(),
            modified: HashSet::new(),
            additional: bson::Document::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.layout.schema
    }

    pub fn is_strict(&self) -> bool {
        self.layout.strict
    }

    /// Replaces the whole state with deserialized input.
    ///
    /// Loaded keys are marked modified, absent ones receive their defaults.
    /// With `partial`, fields absent from `raw` are flagged as not loaded.
    /// Required fields are only checked by [`DataProxy::required_validate`].
    pub fn load(&mut self, raw: bson::Document, partial: bool) -> Result<()> {
        let present: HashSet<String> = raw.keys().cloned().collect();
        let values = self.layout.schema.load(raw, true)?;

        self.modified = values.keys().cloned().collect();
        self.data = values;
        self.not_loaded.clear();
        if partial {
            self.not_loaded = self
                .layout
                .schema
                .fields()
                .filter(|(name, _)| !present.contains(*name))
                .map(|(_, field)| field.storage_key_or_name().to_owned())
                .collect();
        }

        self.add_missing_fields()
    }

    /// Merges deserialized input into the current state.
    pub fn update(&mut self, raw: bson::Document) -> Result<()> {
        let values = self.layout.schema.load(raw, true)?;

        for (key, value) in values {
            self.not_loaded.remove(&key);
            self.modified.insert(key.clone());
            self.data.insert(key, value);
        }

        Ok(())
    }

    /// Replaces the state with a raw storage document. No validation is run.
    pub fn from_storage(&mut self, raw: bson::Document, partial: bool) -> Result<()> {
        let schema = Arc::clone(&self.layout.schema);
        let mut data = Values::new();
        let mut additional = bson::Document::new();

        for (key, bson) in raw {
            match schema.field_by_storage_key(&key) {
                Some((_, field)) => {
                    let value = field.from_storage(bson)?;
                    data.insert(key, value);
                }
                None if self.layout.strict => {
                    return Err(Error::UnknownFieldInDb(format!(
                        "{}: unknown \"{key}\" field found in DB.",
                        schema.name()
                    )));
                }
                None => {
                    additional.insert(key, bson);
                }
            }
        }

        self.not_loaded = if partial {
            schema
                .fields()
                .map(|(_, field)| field.storage_key_or_name())
                .filter(|key| !data.contains_key(*key))
                .map(str::to_owned)
                .collect()
        } else {
            HashSet::new()
        };
        self.data = data;
        self.additional = additional;
        self.add_missing_fields()?;
        self.clear_modified();

        Ok(())
    }

    /// Full storage document used on insert.
    pub fn to_storage_insert(&self) -> bson::Document {
        let mut document = bson::Document::new();

        for (_, field) in self.layout.schema.fields() {
            let key = field.storage_key_or_name();
            if let Some(bson) = self.data.get(key).and_then(|value| field.to_storage(value)) {
                document.insert(key, bson);
            }
        }
        for (key, bson) in &self.additional {
            if !document.contains_key(key) {
                document.insert(key.clone(), bson.clone());
            }
        }

        document
    }

    /// `$set`/`$unset` payload for modified fields, `None` when nothing changed.
    pub fn to_storage_update(&self) -> Option<bson::Document> {
        let mut set = bson::Document::new();
        let mut unset = bson::Document::new();

        for (_, field) in self.layout.schema.fields() {
            let key = field.storage_key_or_name();
            if !self.is_key_modified(key) {
                continue;
            }
            match self.data.get(key).and_then(|value| field.to_storage(value)) {
                Some(bson) => {
                    set.insert(key, bson);
                }
                None => {
                    unset.insert(key, "");
                }
            }
        }

        let mut update = bson::Document::new();
        if !set.is_empty() {
            update.insert("$set", set);
        }
        if !unset.is_empty() {
            update.insert("$unset", unset);
        }

        (!update.is_empty()).then_some(update)
    }

    pub fn dump(&self) -> Result<bson::Document> {
        self.layout.schema.dump(&self.data)
    }

    fn lookup(&self, name: &str) -> Result<(&str, &Field)> {
        let field = self
            .layout
            .schema
            .field(name)
            .ok_or_else(|| Error::UnknownField(format!("{}: unknown field `{name}`", self.layout.schema.name())))?;
        let key = field.storage_key_or_name();
        if self.not_loaded.contains(key) {
            return Err(Error::FieldNotLoaded(format!(
                "{}: field `{name}` is not loaded",
                self.layout.schema.name()
            )));
        }
        Ok((key, field))
    }

    /// Like `lookup`, for writes. The discriminator is maintained by the builder only.
    fn lookup_writable(&self, name: &str) -> Result<(&str, &Field)> {
        let (key, field) = self.lookup(name)?;
        writable(self.layout.schema.name(), key)?;
        Ok((key, field))
    }

    fn lookup_storage_key(&self, key: &str) -> Result<(&str, &Field)> {
        let (name, field) = self.layout.schema.field_by_storage_key(key).ok_or_else(|| {
            Error::UnknownField(format!(
                "{}: unknown storage key `{key}`",
                self.layout.schema.name()
            ))
        })?;
        if self.not_loaded.contains(key) {
            return Err(Error::FieldNotLoaded(format!(
                "{}: field `{name}` is not loaded",
                self.layout.schema.name()
            )));
        }
        Ok((name, field))
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        let (key, _) = self.lookup(name)?;
        Ok(self.data.get(key).unwrap_or(&MISSING))
    }

    /// Deserializes `value` through the field and marks it modified.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let (key, field) = self.lookup_writable(name)?;
        let value = value.into();
        if value.is_null() && !field.is_allow_none() {
            return Err(Error::Validation(ValidationError::new(field.message(
                "null",
                i18n::NULL,
                &[],
            ))));
        }
        let value = field.deserialize(value)?;
        let key = key.to_owned();

        self.modified.insert(key.clone());
        self.data.insert(key, value);
        Ok(())
    }

    /// Resets the field to its default and marks it modified.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let (key, field) = self.lookup_writable(name)?;
        let default = field.resolve_default()?;
        let key = key.to_owned();

        self.modified.insert(key.clone());
        self.data.insert(key, default);
        Ok(())
    }

    /// In-place access, only handed out as dirty-aware containers.
    fn value_mut(&mut self, name: &str) -> Result<Option<&mut Value>> {
        let (key, _) = self.lookup_writable(name)?;
        let key = key.to_owned();
        Ok(self.data.get_mut(&key))
    }

    pub fn list_mut(&mut self, name: &str) -> Result<Option<&mut List>> {
        Ok(self.value_mut(name)?.and_then(Value::as_list_mut))
    }

    pub fn dict_mut(&mut self, name: &str) -> Result<Option<&mut Dict>> {
        Ok(self.value_mut(name)?.and_then(Value::as_dict_mut))
    }

    pub fn embedded_mut(&mut self, name: &str) -> Result<Option<&mut EmbeddedDocument>> {
        Ok(self.value_mut(name)?.and_then(Value::as_embedded_mut))
    }

    pub fn reference_mut(&mut self, name: &str) -> Result<Option<&mut Reference>> {
        Ok(self.value_mut(name)?.and_then(Value::as_reference_mut))
    }

    pub fn get_by_storage_key(&self, key: &str) -> Result<&Value> {
        self.lookup_storage_key(key)?;
        Ok(self.data.get(key).unwrap_or(&MISSING))
    }

    /// Stores `value` as is, bypassing deserialization.
    pub fn set_by_storage_key(&mut self, key: &str, value: Value) -> Result<()> {
        self.lookup_storage_key(key)?;
        writable(self.layout.schema.name(), key)?;
        self.store(key, value);
        Ok(())
    }

    pub fn delete_by_storage_key(&mut self, key: &str) -> Result<()> {
        let (_, field) = self.lookup_storage_key(key)?;
        writable(self.layout.schema.name(), key)?;
        let default = field.resolve_default()?;
        self.modified.insert(key.to_owned());
        self.data.insert(key.to_owned(), default);
        Ok(())
    }

    /// Internal write of a generated value, such as the primary key after an insert.
    pub(crate) fn store(&mut self, key: &str, value: Value) {
        self.modified.insert(key.to_owned());
        self.data.insert(key.to_owned(), value);
    }

    pub(crate) fn mark_modified(&mut self, key: &str) {
        self.modified.insert(key.to_owned());
    }

    /// Value stored under `key`, `Missing` if absent or not loaded.
    pub(crate) fn peek_storage_key(&self, key: &str) -> &Value {
        self.data.get(key).unwrap_or(&MISSING)
    }

    fn is_key_modified(&self, key: &str) -> bool {
        self.modified.contains(key) || self.data.get(key).is_some_and(Value::is_modified)
    }

    /// Logical names of modified fields, in declaration order.
    pub fn modified_fields(&self) -> Vec<String> {
        self.layout
            .schema
            .fields()
            .filter(|(_, field)| self.is_key_modified(field.storage_key_or_name()))
            .map(|(name, _)| name.to_owned())
            .collect()
    }

    pub fn is_modified(&self) -> bool {
        !self.modified.is_empty() || self.data.values().any(Value::is_modified)
    }

    pub fn clear_modified(&mut self) {
        self.modified.clear();
        self.data.values_mut().for_each(Value::clear_modified);
    }

    pub fn is_partial(&self) -> bool {
        !self.not_loaded.is_empty()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.layout
            .schema
            .field(name)
            .is_some_and(|field| !self.not_loaded.contains(field.storage_key_or_name()))
    }

    /// Checks that every required field holds a value, recursing into nested documents.
    pub fn required_validate(&self) -> Result<(), ValidationError> {
        let mut errors = ErrorCollector::default();

        for (name, field) in self.layout.schema.fields() {
            let key = field.storage_key_or_name();
            if self.not_loaded.contains(key) {
                continue;
            }
            let value = self.data.get(key).unwrap_or(&MISSING);
            if field.is_required() && value.is_missing() {
                errors.add_message(name, field.message("required", i18n::REQUIRED, &[]));
            } else if let Err(err) = field.required_validate(value) {
                errors.add(name, err);
            }
        }

        errors.finish()
    }

    /// Iterates loaded fields as `(logical name, value)`.
    pub fn items(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.layout
            .schema
            .fields()
            .filter(|(_, field)| !self.not_loaded.contains(field.storage_key_or_name()))
            .map(|(name, field)| {
                (
                    name,
                    self.data.get(field.storage_key_or_name()).unwrap_or(&MISSING),
                )
            })
    }

    pub fn items_by_storage_key(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.data.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Storage entries without a matching field. Always empty in strict mode.
    pub fn additional_data(&self) -> &bson::Document {
        &self.additional
    }

    pub fn additional_value(&self, key: &str) -> Option<&Bson> {
        self.additional.get(key)
    }

    fn add_missing_fields(&mut self) -> Result<()> {
        let schema = Arc::clone(&self.layout.schema);
        for (_, field) in schema.fields() {
            let key = field.storage_key_or_name();
            if !self.data.contains_key(key) {
                let default = field.resolve_default()?;
                self.data.insert(key.to_owned(), default);
            }
        }
        Ok(())
    }
}

fn writable(document: &str, key: &str) -> Result<()> {
    if key == CLS_KEY {
        return Err(Error::ReadOnlyField(format!(
            "{document}: the `{CLS_KEY}` discriminator cannot be written"
        )));
    }
    Ok(())
}

impl PartialEq for DataProxy {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.additional == other.additional
    }
}

impl fmt::Debug for DataProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.items()).finish()
    }
}
