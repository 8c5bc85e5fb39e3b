use crate::{
    Error, Field, Result, Value,
    error::{ErrorCollector, SCHEMA_KEY, ValidationError},
    i18n,
    instance::Binding,
};
use indexmap::IndexMap;
use mongodb::bson;
use std::{collections::HashMap, fmt, sync::Arc};

/// Loaded values keyed by storage key.
pub type Values = IndexMap<String, Value>;

pub type PreLoad = Arc<dyn Fn(bson::Document) -> Result<bson::Document> + Send + Sync>;
pub type PostLoad = Arc<dyn Fn(&mut Values) -> Result<()> + Send + Sync>;
pub type SchemaValidator = Arc<dyn Fn(&Values) -> Result<(), ValidationError> + Send + Sync>;
pub type PreDump = Arc<dyn Fn(&Values) -> Result<()> + Send + Sync>;
pub type PostDump = Arc<dyn Fn(&mut bson::Document) -> Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct SchemaHooks {
    pub(crate) pre_load: Vec<PreLoad>,
    pub(crate) post_load: Vec<PostLoad>,
    pub(crate) validators: Vec<SchemaValidator>,
    pub(crate) pre_dump: Vec<PreDump>,
    pub(crate) post_dump: Vec<PostDump>,
}

impl SchemaHooks {
    pub(crate) fn extend(&mut self, other: &SchemaHooks) {
        self.pre_load.extend(other.pre_load.iter().cloned());
        self.post_load.extend(other.post_load.iter().cloned());
        self.validators.extend(other.validators.iter().cloned());
        self.pre_dump.extend(other.pre_dump.iter().cloned());
        self.post_dump.extend(other.post_dump.iter().cloned());
    }
}

impl fmt::Debug for SchemaHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaHooks")
            .field("pre_load", &self.pre_load.len())
            .field("post_load", &self.post_load.len())
            .field("validators", &self.validators.len())
            .field("pre_dump", &self.pre_dump.len())
            .field("post_dump", &self.post_dump.len())
            .finish()
    }
}

/// Ordered field declarations of a document plus its load and dump hooks.
#[derive(Debug)]
pub struct Schema {
    name: String,
    fields: IndexMap<String, Field>,
    by_storage_key: HashMap<String, String>,
    hooks: SchemaHooks,
    binding: Binding,
}

impl Schema {
    pub(crate) fn new(
        name: impl Into<String>,
        fields: IndexMap<String, Field>,
        hooks: SchemaHooks,
        binding: Binding,
    ) -> Result<Self> {
        let name = name.into();
        let mut by_storage_key = HashMap::with_capacity(fields.len());

        for (field_name, field) in &fields {
            let key = field.storage_key_or_name();
            if let Some(other) = by_storage_key.insert(key.to_owned(), field_name.clone()) {
                return Err(Error::DocumentDefinition(format!(
                    "`{name}`: fields `{other}` and `{field_name}` share storage key `{key}`"
                )));
            }
        }

        Ok(Self {
            name,
            fields,
            by_storage_key,
            hooks,
            binding,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn field_by_storage_key(&self, key: &str) -> Option<(&str, &Field)> {
        let name = self.by_storage_key.get(key)?;
        self.fields
            .get_key_value(name)
            .map(|(name, field)| (name.as_str(), field))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub(crate) fn hooks(&self) -> &SchemaHooks {
        &self.hooks
    }

    /// Deserializes external input keyed by logical name.
    ///
    /// Every field and unknown-key error is collected before failing. With
    /// `partial`, required fields may be absent.
    pub fn load(&self, raw: bson::Document, partial: bool) -> Result<Values> {
        let mut raw = raw;
        for hook in &self.hooks.pre_load {
            raw = hook(raw)?;
        }

        let mut errors = ErrorCollector::default();
        let translator = self.binding.translator();

        for key in raw.keys() {
            if !self.fields.get(key).is_some_and(|field| !field.is_dump_only()) {
                errors.add_message(
                    SCHEMA_KEY,
                    translator.format(i18n::UNKNOWN_FIELD, &[("field", key)]),
                );
            }
        }

        let mut values = Values::new();
        for (name, field) in &self.fields {
            if field.is_dump_only() {
                continue;
            }

            match raw.remove(name) {
                Some(bson) => match field.deserialize(Value::from(bson)) {
                    Ok(value) => {
                        values.insert(field.storage_key_or_name().to_owned(), value);
                    }
                    Err(Error::Validation(err)) => errors.add(name.clone(), err),
                    Err(err) => return Err(err),
                },
                None if !partial && field.is_required() => {
                    errors.add_message(name.clone(), field.message("required", i18n::REQUIRED, &[]));
                }
                None => {}
            }
        }

        errors.finish()?;

        let mut errors = ErrorCollector::default();
        for validator in &self.hooks.validators {
            if let Err(err) = validator(&values) {
                errors.merge(err.into_schema_level());
            }
        }
        errors.finish()?;

        for hook in &self.hooks.post_load {
            hook(&mut values)?;
        }

        Ok(values)
    }

    /// Serializes values into their external form keyed by logical name.
    pub fn dump(&self, values: &Values) -> Result<bson::Document> {
        for hook in &self.hooks.pre_dump {
            hook(values)?;
        }

        let mut dumped = bson::Document::new();
        for (name, field) in &self.fields {
            if field.is_load_only() {
                continue;
            }
            match values.get(field.storage_key_or_name()) {
                None | Some(Value::Missing) => {}
                Some(value) => {
                    dumped.insert(name.clone(), field.serialize(value)?);
                }
            }
        }

        for hook in &self.hooks.post_dump {
            hook(&mut dumped)?;
        }

        Ok(dumped)
    }

    /// Resolves a dotted logical path to the field it names.
    pub(crate) fn resolve_path(&self, path: &str) -> Option<Field> {
        let mut segments = path.split('.');
        let mut field = self.fields.get(segments.next()?)?.clone();

        for segment in segments {
            if segment.parse::<usize>().is_ok() {
                continue;
            }
            let schema = field.nested_schema()?;
            field = schema.field(segment)?.clone();
        }

        Some(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Messages;
    use mongodb::bson::doc;
    use pretty_assertions::assert_eq;

    fn person() -> Schema {
        let fields = IndexMap::from([
            ("name".to_owned(), named(Field::string().required(), "name")),
            (
                "age".to_owned(),
                named(Field::integer().storage_key("a").default(0), "age"),
            ),
        ]);
        Schema::new("Person", fields, SchemaHooks::default(), Binding::default()).unwrap()
    }

    fn named(mut field: Field, name: &str) -> Field {
        field.set_name(name);
        field
    }

    #[test]
    fn load_keys_values_by_storage_key() {
        let values = person().load(doc! { "name": "Ann", "age": 3 }, false).unwrap();

        assert_eq!(values.get("a"), Some(&Value::from(3)));
        assert_eq!(values.get("name"), Some(&Value::from("Ann")));
    }

    #[test]
    fn load_aggregates_every_error() {
        let err = person()
            .load(doc! { "age": "x", "color": "red", "size": 1 }, false)
            .unwrap_err();
        let err = err.as_validation().unwrap();

        assert_eq!(
            err.field("name"),
            Some(&Messages::List(vec!["Missing data for required field.".into()]))
        );
        assert_eq!(
            err.field("age"),
            Some(&Messages::List(vec!["Not a valid integer.".into()]))
        );
        assert_eq!(
            err.field("_schema"),
            Some(&Messages::List(vec![
                "Unknown field name color.".into(),
                "Unknown field name size.".into()
            ]))
        );
    }

    #[test]
    fn partial_load_skips_required() {
        assert!(person().load(doc! {}, true).unwrap().is_empty());
    }

    #[test]
    fn dump_uses_logical_names() {
        let schema = person();
        let values = schema.load(doc! { "name": "Ann", "age": 3 }, false).unwrap();

        assert_eq!(schema.dump(&values).unwrap(), doc! { "name": "Ann", "age": 3 });
    }

    #[test]
    fn storage_key_collisions_are_rejected() {
        let fields = IndexMap::from([
            ("a".to_owned(), named(Field::string(), "a")),
            ("b".to_owned(), named(Field::string().storage_key("a"), "b")),
        ]);

        assert!(matches!(
            Schema::new("Broken", fields, SchemaHooks::default(), Binding::default()),
            Err(Error::DocumentDefinition(_))
        ));
    }

    #[test]
    fn schema_validators_report_under_schema_key() {
        let mut hooks = SchemaHooks::default();
        hooks.validators.push(Arc::new(|values: &Values| {
            if values.get("name").and_then(Value::as_str) == Some("root") {
                Err(ValidationError::new("Reserved name."))
            } else {
                Ok(())
            }
        }));
        let fields = IndexMap::from([("name".to_owned(), named(Field::string(), "name"))]);
        let schema = Schema::new("User", fields, hooks, Binding::default()).unwrap();

        let err = schema.load(doc! { "name": "root" }, false).unwrap_err();

        assert_eq!(
            err.as_validation().unwrap().field("_schema"),
            Some(&Messages::List(vec!["Reserved name.".into()]))
        );
    }
}
