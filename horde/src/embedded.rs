use crate::{
    DataProxy, Error, Implementation, Result, TemplateKind, ValidationError, Value,
    builder::CLS_KEY,
};
use mongodb::bson::{self, Bson};
use std::{fmt, sync::Arc};

/// A document stored inside another one.
#[derive(Clone)]
pub struct EmbeddedDocument {
    implementation: Arc<Implementation>,
    data: DataProxy,
}

impl EmbeddedDocument {
    /// Loads `raw` through the schema, filling defaults.
    pub fn new(implementation: &Arc<Implementation>, raw: bson::Document) -> Result<Self> {
        let mut embedded = Self::empty(implementation)?;
        embedded.data.load(raw, false)?;

        Ok(embedded)
    }

    fn empty(implementation: &Arc<Implementation>) -> Result<Self> {
        if implementation.kind() != TemplateKind::Embedded {
            return Err(Error::DocumentDefinition(format!(
                "`{}` is not an embedded document",
                implementation.name()
            )));
        }
        if implementation.opts().is_abstract() {
            return Err(Error::AbstractDocument(
                "Cannot instantiate an abstract EmbeddedDocument".into(),
            ));
        }

        Ok(Self {
            implementation: Arc::clone(implementation),
            data: DataProxy::new(Arc::clone(implementation.layout())),
        })
    }

    /// Hydrates from storage, picking the concrete type from `_cls` when present.
    pub fn build_from_storage(implementation: &Arc<Implementation>, data: bson::Document) -> Result<Self> {
        let implementation = match data.get(CLS_KEY) {
            Some(Bson::String(cls)) if cls != implementation.name() => {
                implementation.instance()?.retrieve_embedded_document(cls)?
            }
            _ => Arc::clone(implementation),
        };

        let mut embedded = Self::empty(&implementation)?;
        embedded.data.from_storage(data, false)?;

        Ok(embedded)
    }

    pub fn implementation(&self) -> &Arc<Implementation> {
        &self.implementation
    }

    pub fn data(&self) -> &DataProxy {
        &self.data
    }

    pub fn get(&self, name: impl AsRef<str>) -> Result<&Value> {
        self.data.get(name.as_ref())
    }

    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<Value>) -> Result<()> {
        self.data.set(name.as_ref(), value)
    }

    pub fn delete(&mut self, name: impl AsRef<str>) -> Result<()> {
        self.data.delete(name.as_ref())
    }

    pub fn update(&mut self, raw: bson::Document) -> Result<()> {
        self.data.update(raw)
    }

    pub fn dump(&self) -> Result<bson::Document> {
        self.data.dump()
    }

    pub fn to_storage(&self) -> bson::Document {
        self.data.to_storage_insert()
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.data.items()
    }

    pub fn is_modified(&self) -> bool {
        self.data.is_modified()
    }

    pub fn clear_modified(&mut self) {
        self.data.clear_modified();
    }

    pub fn required_validate(&self) -> Result<(), ValidationError> {
        self.data.required_validate()
    }
}

impl PartialEq for EmbeddedDocument {
    fn eq(&self, other: &Self) -> bool {
        self.implementation.name() == other.implementation.name() && self.data == other.data
    }
}

impl fmt::Debug for EmbeddedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.implementation.name())?;
        f.debug_map().entries(self.data.items()).finish()?;
        write!(f, ")")
    }
}
