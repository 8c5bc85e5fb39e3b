use crate::{
    Document, Field, IndexSpec, Result,
    driver::WriteOutcome,
    error::ValidationError,
    schema::{SchemaHooks, Values},
};
use indexmap::IndexMap;
use mongodb::bson;
use std::{fmt, sync::Arc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateKind {
    Document,
    Embedded,
}

/// Per-document options.
#[derive(Clone, Debug)]
pub struct Meta {
    pub(crate) is_abstract: bool,
    pub(crate) allow_inheritance: Option<bool>,
    pub(crate) collection_name: Option<String>,
    pub(crate) strict: bool,
    pub(crate) indexes: Vec<IndexSpec>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            is_abstract: false,
            allow_inheritance: None,
            collection_name: None,
            strict: true,
            indexes: Vec::new(),
        }
    }
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_abstract(mut self, is_abstract: bool) -> Self {
        self.is_abstract = is_abstract;
        self
    }

    pub fn allow_inheritance(mut self, allow_inheritance: bool) -> Self {
        self.allow_inheritance = Some(allow_inheritance);
        self
    }

    pub fn collection_name(mut self, collection_name: impl Into<String>) -> Self {
        self.collection_name = Some(collection_name.into());
        self
    }

    /// Non-strict documents keep unknown storage keys instead of rejecting them.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn index(mut self, index: impl Into<IndexSpec>) -> Self {
        self.indexes.push(index.into());
        self
    }
}

pub type InsertHook = Arc<dyn Fn(&mut Document) -> Result<()> + Send + Sync>;
pub type UpdateHook = Arc<dyn Fn(&mut Document) -> Result<Option<bson::Document>> + Send + Sync>;
pub type DeleteHook = Arc<dyn Fn(&Document) -> Result<Option<bson::Document>> + Send + Sync>;
pub type PostHook = Arc<dyn Fn(&Document, &WriteOutcome) -> Result<()> + Send + Sync>;

/// Lifecycle hooks run around storage writes.
///
/// `pre_update` and `pre_delete` may return extra filter conditions.
#[derive(Clone, Default)]
pub struct DocumentHooks {
    pub(crate) pre_insert: Option<InsertHook>,
    pub(crate) pre_update: Option<UpdateHook>,
    pub(crate) pre_delete: Option<DeleteHook>,
    pub(crate) post_insert: Option<PostHook>,
    pub(crate) post_update: Option<PostHook>,
    pub(crate) post_delete: Option<PostHook>,
}

impl DocumentHooks {
    /// Fills hooks not declared here from `parent`.
    pub(crate) fn inherit(&mut self, parent: &DocumentHooks) {
        self.pre_insert = self.pre_insert.take().or_else(|| parent.pre_insert.clone());
        self.pre_update = self.pre_update.take().or_else(|| parent.pre_update.clone());
        self.pre_delete = self.pre_delete.take().or_else(|| parent.pre_delete.clone());
        self.post_insert = self.post_insert.take().or_else(|| parent.post_insert.clone());
        self.post_update = self.post_update.take().or_else(|| parent.post_update.clone());
        self.post_delete = self.post_delete.take().or_else(|| parent.post_delete.clone());
    }
}

impl fmt::Debug for DocumentHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentHooks")
            .field("pre_insert", &self.pre_insert.is_some())
            .field("pre_update", &self.pre_update.is_some())
            .field("pre_delete", &self.pre_delete.is_some())
            .field("post_insert", &self.post_insert.is_some())
            .field("post_update", &self.post_update.is_some())
            .field("post_delete", &self.post_delete.is_some())
            .finish()
    }
}

/// A user declaration of a document or embedded document, not bound to any instance.
#[derive(Clone, Debug)]
pub struct Template {
    name: String,
    kind: TemplateKind,
    parents: Vec<String>,
    fields: IndexMap<String, Field>,
    meta: Meta,
    schema_hooks: SchemaHooks,
    hooks: DocumentHooks,
}

impl Template {
    fn new(name: impl Into<String>, kind: TemplateKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parents: Vec::new(),
            fields: IndexMap::new(),
            meta: Meta::default(),
            schema_hooks: SchemaHooks::default(),
            hooks: DocumentHooks::default(),
        }
    }

    pub fn document(name: impl Into<String>) -> Self {
        Self::new(name, TemplateKind::Document)
    }

    pub fn embedded(name: impl Into<String>) -> Self {
        Self::new(name, TemplateKind::Embedded)
    }

    pub fn inherits(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    pub fn pre_load(
        mut self,
        hook: impl Fn(bson::Document) -> Result<bson::Document> + Send + Sync + 'static,
    ) -> Self {
        self.schema_hooks.pre_load.push(Arc::new(hook));
        self
    }

    pub fn post_load(mut self, hook: impl Fn(&mut Values) -> Result<()> + Send + Sync + 'static) -> Self {
        self.schema_hooks.post_load.push(Arc::new(hook));
        self
    }

    /// Whole-document validation, run after every field loaded cleanly.
    pub fn validates_schema(
        mut self,
        validator: impl Fn(&Values) -> Result<(), ValidationError> + Send + Sync + 'static,
    ) -> Self {
        self.schema_hooks.validators.push(Arc::new(validator));
        self
    }

    pub fn pre_dump(mut self, hook: impl Fn(&Values) -> Result<()> + Send + Sync + 'static) -> Self {
        self.schema_hooks.pre_dump.push(Arc::new(hook));
        self
    }

    pub fn post_dump(
        mut self,
        hook: impl Fn(&mut bson::Document) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.schema_hooks.post_dump.push(Arc::new(hook));
        self
    }

    pub fn pre_insert(mut self, hook: impl Fn(&mut Document) -> Result<()> + Send + Sync + 'static) -> Self {
        self.hooks.pre_insert = Some(Arc::new(hook));
        self
    }

    pub fn pre_update(
        mut self,
        hook: impl Fn(&mut Document) -> Result<Option<bson::Document>> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.pre_update = Some(Arc::new(hook));
        self
    }

    pub fn pre_delete(
        mut self,
        hook: impl Fn(&Document) -> Result<Option<bson::Document>> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.pre_delete = Some(Arc::new(hook));
        self
    }

    pub fn post_insert(
        mut self,
        hook: impl Fn(&Document, &WriteOutcome) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.post_insert = Some(Arc::new(hook));
        self
    }

    pub fn post_update(
        mut self,
        hook: impl Fn(&Document, &WriteOutcome) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.post_update = Some(Arc::new(hook));
        self
    }

    pub fn post_delete(
        mut self,
        hook: impl Fn(&Document, &WriteOutcome) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.post_delete = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    pub fn parents(&self) -> &[String] {
        &self.parents
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    pub fn get_meta(&self) -> &Meta {
        &self.meta
    }

    pub(crate) fn schema_hooks(&self) -> &SchemaHooks {
        &self.schema_hooks
    }

    pub(crate) fn hooks(&self) -> &DocumentHooks {
        &self.hooks
    }
}

/// Implemented by `#[derive(Template)]` types.
pub trait Declare {
    const NAME: &'static str;

    fn template() -> Template;
}
