use crate::{
    Error, Field, Index, Instance, Result, Schema, Template, TemplateKind,
    data_proxy::ProxyLayout,
    instance::Binding,
    template::DocumentHooks,
};
use dashmap::{DashMap, DashSet};
use heck::ToSnakeCase;
use indexmap::IndexMap;
use mongodb::bson::Bson;
use std::{fmt, sync::Arc};
use tracing::debug;

pub(crate) const ID_KEY: &str = "_id";
pub(crate) const CLS_KEY: &str = "_cls";

/// Options resolved for a registered document.
pub struct Options {
    is_abstract: bool,
    allow_inheritance: bool,
    collection_name: Option<String>,
    is_child: bool,
    strict: bool,
    indexes: Vec<Index>,
    offspring: DashSet<String>,
}

impl Options {
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn allow_inheritance(&self) -> bool {
        self.allow_inheritance
    }

    pub fn collection_name(&self) -> Option<&str> {
        self.collection_name.as_deref()
    }

    /// Whether the document shares its collection with a concrete ancestor.
    pub fn is_child(&self) -> bool {
        self.is_child
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    /// Names of every registered descendant, sorted. Abstract documents keep
    /// none, see [`Implementation::is_a`].
    pub fn offspring(&self) -> Vec<String> {
        let mut offspring: Vec<String> = self.offspring.iter().map(|name| name.clone()).collect();
        offspring.sort();
        offspring
    }

    pub fn has_offspring(&self, name: &str) -> bool {
        self.offspring.contains(name)
    }

    pub fn has_any_offspring(&self) -> bool {
        !self.offspring.is_empty()
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("is_abstract", &self.is_abstract)
            .field("allow_inheritance", &self.allow_inheritance)
            .field("collection_name", &self.collection_name)
            .field("is_child", &self.is_child)
            .field("strict", &self.strict)
            .field("indexes", &self.indexes)
            .field("offspring", &self.offspring())
            .finish()
    }
}

/// A template bound to an instance: resolved options, schema and hooks.
pub struct Implementation {
    name: String,
    kind: TemplateKind,
    ancestors: Vec<String>,
    opts: Options,
    schema: Arc<Schema>,
    layout: Arc<ProxyLayout>,
    hooks: DocumentHooks,
    binding: Binding,
}

impl Implementation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    pub fn is_document(&self) -> bool {
        self.kind == TemplateKind::Document
    }

    /// Ancestor names, nearest first.
    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// Whether this is `name` or one of its descendants, abstract ancestors included.
    pub fn is_a(&self, name: &str) -> bool {
        self.name == name || self.ancestors.iter().any(|ancestor| ancestor == name)
    }

    pub fn opts(&self) -> &Options {
        &self.opts
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub(crate) fn layout(&self) -> &Arc<ProxyLayout> {
        &self.layout
    }

    pub(crate) fn hooks(&self) -> &DocumentHooks {
        &self.hooks
    }

    pub fn instance(&self) -> Result<Instance> {
        self.binding.instance()
    }

    pub fn collection_name(&self) -> Result<&str> {
        self.opts.collection_name().ok_or_else(|| {
            Error::NoDbDefined(format!("`{}` has no collection, it is abstract", self.name))
        })
    }

    /// Deserializes a primary key value through the `_id` field.
    pub(crate) fn deserialize_pk(&self, pk: Bson) -> Result<Bson> {
        let field = self
            .schema
            .field_by_storage_key(ID_KEY)
            .map(|(_, field)| field)
            .ok_or_else(|| Error::DocumentDefinition(format!("`{}` has no primary key", self.name)))?;

        match field.deserialize(pk)? {
            crate::Value::Bson(pk) => Ok(pk),
            _ => Ok(Bson::Null),
        }
    }
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Implementation")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("ancestors", &self.ancestors)
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

/// Turns templates into implementations for one instance, memoized by name.
#[derive(Default)]
pub(crate) struct Builder {
    implementations: DashMap<String, Arc<Implementation>>,
}

impl Builder {
    pub(crate) fn get(&self, name: &str) -> Option<Arc<Implementation>> {
        self.implementations.get(name).map(|entry| Arc::clone(&entry))
    }

    pub(crate) fn build(&self, instance: &Instance, template: &Template) -> Result<Arc<Implementation>> {
        if let Some(implementation) = self.get(template.name()) {
            return Ok(implementation);
        }

        let name = template.name().to_owned();
        let kind = template.kind();
        let meta = template.get_meta();

        let parents = template
            .parents()
            .iter()
            .map(|parent| {
                let implementation = self
                    .get(parent)
                    .ok_or_else(|| Error::NotRegistered(format!("Unknown document `{parent}`")))?;
                if implementation.kind != kind {
                    return Err(Error::DocumentDefinition(format!(
                        "`{name}` cannot inherit from `{parent}`, a {:?} template",
                        implementation.kind
                    )));
                }
                Ok(implementation)
            })
            .collect::<Result<Vec<_>>>()?;

        let is_abstract = meta.is_abstract;
        let allow_inheritance = meta.allow_inheritance.unwrap_or(match kind {
            TemplateKind::Document => is_abstract,
            TemplateKind::Embedded => true,
        });
        let is_child = match kind {
            TemplateKind::Document => parents.iter().any(|parent| !parent.opts.is_abstract),
            TemplateKind::Embedded => !parents.is_empty(),
        };

        let mut collection_name = meta.collection_name.clone();
        for parent in &parents {
            if !parent.opts.allow_inheritance {
                return Err(Error::DocumentDefinition(format!(
                    "`{}` doesn't allow inheritance",
                    parent.name
                )));
            }
            if is_abstract && !parent.opts.is_abstract {
                return Err(Error::DocumentDefinition(
                    "Abstract document should have all it parents abstract".into(),
                ));
            }
            if let Some(parent_collection) = &parent.opts.collection_name {
                if collection_name.is_some() {
                    return Err(Error::DocumentDefinition(
                        "Cannot redefine collection_name in a child, use abstract instead".into(),
                    ));
                }
                collection_name = Some(parent_collection.clone());
            }
        }

        if kind == TemplateKind::Document {
            if collection_name.is_some() && is_abstract {
                return Err(Error::DocumentDefinition(
                    "Abstract document cannot define collection_name".into(),
                ));
            }
            if collection_name.is_none() && !is_abstract {
                collection_name = Some(name.to_snake_case());
            }
        } else {
            collection_name = None;
        }

        if is_abstract && !allow_inheritance {
            return Err(Error::DocumentDefinition(
                "Abstract document cannot disable inheritance".into(),
            ));
        }

        let binding = instance.binding();
        let fields = collect_fields(&name, kind, is_child, &parents, template, &binding)?;

        let mut schema_hooks = crate::schema::SchemaHooks::default();
        for parent in &parents {
            schema_hooks.extend(parent.schema.hooks());
        }
        schema_hooks.extend(template.schema_hooks());

        let schema = Arc::new(Schema::new(name.clone(), fields, schema_hooks, binding.clone())?);
        let layout = Arc::new(ProxyLayout::new(Arc::clone(&schema), meta.strict));

        let indexes = match kind {
            TemplateKind::Document => collect_indexes(template, is_child, &parents, &schema)?,
            TemplateKind::Embedded => Vec::new(),
        };

        let mut ancestors: Vec<String> = Vec::new();
        for parent in &parents {
            for ancestor in std::iter::once(&parent.name).chain(&parent.ancestors) {
                if !ancestors.contains(ancestor) {
                    ancestors.push(ancestor.clone());
                }
            }
        }

        let mut hooks = template.hooks().clone();
        for parent in &parents {
            hooks.inherit(&parent.hooks);
        }

        let implementation = Arc::new(Implementation {
            name: name.clone(),
            kind,
            ancestors,
            opts: Options {
                is_abstract,
                allow_inheritance,
                collection_name,
                is_child,
                strict: meta.strict,
                indexes,
                offspring: DashSet::new(),
            },
            schema,
            layout,
            hooks,
            binding,
        });

        self.implementations
            .insert(name.clone(), Arc::clone(&implementation));
        for ancestor in &implementation.ancestors {
            if let Some(parent) = self.get(ancestor).filter(|parent| !parent.opts.is_abstract) {
                parent.opts.offspring.insert(name.clone());
            }
        }

        debug!(
            document = %name,
            kind = ?kind,
            collection = ?implementation.opts.collection_name,
            is_child,
            "built implementation"
        );

        Ok(implementation)
    }
}

fn merge_field(fields: &mut IndexMap<String, Field>, document: &str, name: &str, mut field: Field) -> Result<()> {
    field.set_name(name);
    if let Some(existing) = fields.get(name) {
        if existing.storage_key_or_name() != field.storage_key_or_name() {
            return Err(Error::DocumentDefinition(format!(
                "`{document}`: field `{name}` redeclared with storage key `{}`, inherited one is `{}`",
                field.storage_key_or_name(),
                existing.storage_key_or_name()
            )));
        }
    }
    fields.insert(name.to_owned(), field);
    Ok(())
}

fn collect_fields(
    name: &str,
    kind: TemplateKind,
    is_child: bool,
    parents: &[Arc<Implementation>],
    template: &Template,
    binding: &Binding,
) -> Result<IndexMap<String, Field>> {
    let mut fields: IndexMap<String, Field> = IndexMap::new();

    for parent in parents {
        for (field_name, field) in parent.schema.fields() {
            merge_field(&mut fields, name, field_name, field.clone())?;
        }
    }
    for (field_name, field) in template.fields() {
        merge_field(&mut fields, name, field_name, field.clone())?;
    }

    if kind == TemplateKind::Document
        && !fields
            .values()
            .any(|field| field.storage_key_or_name() == ID_KEY)
    {
        let mut id = Field::object_id().storage_key(ID_KEY).dump_only();
        id.set_name("id");
        if fields.contains_key("id") {
            return Err(Error::DocumentDefinition(format!(
                "`{name}`: field `id` must be stored as `{ID_KEY}`"
            )));
        }
        fields.shift_insert(0, "id".to_owned(), id);
    }

    if is_child {
        let mut cls = Field::string().storage_key(CLS_KEY).dump_only().default(name);
        cls.set_name("cls");
        fields.insert("cls".to_owned(), cls);
    }

    for (field_name, field) in &mut fields {
        field.bind(binding);
        field.resolve_declared_default().map_err(|err| {
            Error::DocumentDefinition(format!(
                "`{name}`: invalid default for field `{field_name}`: {err}"
            ))
        })?;
    }

    Ok(fields)
}

fn collect_indexes(
    template: &Template,
    is_child: bool,
    parents: &[Arc<Implementation>],
    schema: &Schema,
) -> Result<Vec<Index>> {
    let mut indexes: Vec<Index> = Vec::new();
    let base_compound = is_child.then_some(CLS_KEY);

    for parent in parents {
        for index in parent.opts.indexes() {
            if !indexes.contains(index) {
                indexes.push(index.clone());
            }
        }
    }

    for spec in &template.get_meta().indexes {
        indexes.push(Index::parse(spec, base_compound)?);
    }

    if is_child {
        let cls = Index::parse(&CLS_KEY.into(), None)?;
        if !indexes.contains(&cls) {
            indexes.push(cls);
        }
    }

    let mut visit = |storage_path: &str, _path: &str, field: &Field| {
        if field.is_unique() {
            indexes.push(Index::unique_on(
                storage_path.to_owned(),
                !field.is_required() || field.is_allow_none(),
                base_compound,
            ));
        }
    };

    for (field_name, _) in template.fields() {
        let Some(field) = schema.field(field_name) else {
            continue;
        };
        let storage_path = field.storage_key_or_name();
        visit(storage_path, field_name, field);
        field.visit_nested(storage_path, field_name, &mut visit);
    }

    Ok(indexes)
}
