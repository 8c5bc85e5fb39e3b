use crate::{
    EmbeddedDocument, Error, Reference, Result, Schema, Value, i18n,
    error::{ErrorCollector, Messages, SCHEMA_KEY, ValidationError},
    i18n::Translator,
    instance::Binding,
    validate,
    value::{Dict, List},
};
use chrono::{NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use futures_util::{FutureExt, future::BoxFuture};
use mongodb::bson::{self, Bson, doc, oid::ObjectId};
use std::{collections::HashMap, fmt, sync::Arc};

pub type Validator = Arc<dyn Fn(&Value, &Translator) -> Result<(), ValidationError> + Send + Sync>;

pub type IoValidator = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

const MILLIS_PER_DAY: i64 = 86_400_000;

#[derive(Clone, Debug)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Date,
    ObjectId,
    Dict,
    List(Arc<Field>),
    Embedded(String),
    Reference(String),
    GenericReference,
}

#[derive(Clone, Default)]
pub enum DefaultValue {
    #[default]
    None,
    Value(Value),
    Producer(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

/// Declares how one attribute of a document is loaded, validated and stored.
#[derive(Clone)]
pub struct Field {
    kind: FieldKind,
    name: String,
    storage_key: Option<String>,
    required: bool,
    allow_none: bool,
    unique: bool,
    dump_only: bool,
    load_only: bool,
    default: DefaultValue,
    validators: Vec<Validator>,
    io_validators: Vec<IoValidator>,
    error_messages: HashMap<String, String>,
    binding: Binding,
}

impl Field {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            name: String::new(),
            storage_key: None,
            required: false,
            allow_none: false,
            unique: false,
            dump_only: false,
            load_only: false,
            default: DefaultValue::None,
            validators: Vec::new(),
            io_validators: Vec::new(),
            error_messages: HashMap::new(),
            binding: Binding::default(),
        }
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    pub fn float() -> Self {
        Self::new(FieldKind::Float)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn datetime() -> Self {
        Self::new(FieldKind::DateTime)
    }

    pub fn date() -> Self {
        Self::new(FieldKind::Date)
    }

    pub fn object_id() -> Self {
        Self::new(FieldKind::ObjectId)
    }

    pub fn dict() -> Self {
        Self::new(FieldKind::Dict)
    }

    pub fn email() -> Self {
        Self::string().validator(validate::email())
    }

    pub fn url() -> Self {
        Self::string().validator(validate::url())
    }

    pub fn list(container: Field) -> Self {
        Self::new(FieldKind::List(Arc::new(container)))
    }

    /// A field holding an embedded document registered under `document`.
    pub fn embedded(document: impl Into<String>) -> Self {
        Self::new(FieldKind::Embedded(document.into()))
    }

    /// A field referencing a document registered under `document` by primary key.
    pub fn reference(document: impl Into<String>) -> Self {
        Self::new(FieldKind::Reference(document.into()))
    }

    pub fn generic_reference() -> Self {
        Self::new(FieldKind::GenericReference)
    }

    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = Some(key.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn allow_none(mut self) -> Self {
        self.allow_none = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn dump_only(mut self) -> Self {
        self.dump_only = true;
        self
    }

    pub fn load_only(mut self) -> Self {
        self.load_only = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = DefaultValue::Value(value.into());
        self
    }

    pub fn default_with(mut self, producer: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default = DefaultValue::Producer(Arc::new(producer));
        self
    }

    pub fn validator(
        mut self,
        validator: impl Fn(&Value, &Translator) -> Result<(), ValidationError> + Send + Sync + 'static,
    ) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Adds an asynchronous validator run before the document is committed.
    pub fn io_validator<F, Fut>(mut self, validator: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.io_validators
            .push(Arc::new(move |value| validator(value).boxed()));
        self
    }

    /// Overrides one of the `null`, `required`, `unique` or `unique_compound` messages.
    pub fn error_message(mut self, key: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_messages.insert(key.into(), message.into());
        self
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key used in storage, falls back to the logical name.
    pub fn storage_key_or_name(&self) -> &str {
        self.storage_key.as_deref().unwrap_or(&self.name)
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_allow_none(&self) -> bool {
        self.allow_none
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_dump_only(&self) -> bool {
        self.dump_only
    }

    pub fn is_load_only(&self) -> bool {
        self.load_only
    }

    pub fn io_validators(&self) -> &[IoValidator] {
        &self.io_validators
    }

    pub fn default_value(&self) -> &DefaultValue {
        &self.default
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    pub(crate) fn bind(&mut self, binding: &Binding) {
        self.binding = binding.clone();
        if let FieldKind::List(container) = &mut self.kind {
            let container = Arc::make_mut(container);
            let name = self.name.clone();
            container.set_name(&name);
            container.bind(binding);
        }
    }

    pub(crate) fn translator(&self) -> Translator {
        self.binding.translator()
    }

    pub(crate) fn message(&self, key: &str, default: &str, args: &[(&str, &str)]) -> String {
        let template = self.error_messages.get(key).map_or(default, String::as_str);
        self.translator().format(template, args)
    }

    fn fail(&self, message: &str) -> Error {
        Error::Validation(ValidationError::new(self.translator().format(message, &[])))
    }

    /// Deserializes the default once so an invalid default surfaces at registration.
    pub(crate) fn resolve_declared_default(&mut self) -> Result<()> {
        match &self.default {
            DefaultValue::None => Ok(()),
            DefaultValue::Value(raw) => {
                let value = self.deserialize(raw.clone())?;
                self.default = DefaultValue::Value(value);
                Ok(())
            }
            DefaultValue::Producer(producer) => {
                self.deserialize(producer())?;
                Ok(())
            }
        }
    }

    pub(crate) fn resolve_default(&self) -> Result<Value> {
        match &self.default {
            DefaultValue::None => Ok(Value::Missing),
            DefaultValue::Value(value) => Ok(value.clone()),
            DefaultValue::Producer(producer) => self.deserialize(producer()),
        }
    }

    /// Converts user input into the in-memory value.
    pub fn deserialize(&self, raw: impl Into<Value>) -> Result<Value> {
        let raw = raw.into();

        match raw {
            Value::Missing => return Ok(Value::Missing),
            Value::Null | Value::Bson(Bson::Null) => {
                return if self.allow_none {
                    Ok(Value::Null)
                } else {
                    Err(Error::Validation(ValidationError::new(self.message(
                        "null",
                        i18n::NULL,
                        &[],
                    ))))
                };
            }
            _ => {}
        }

        let value = self.deserialize_kind(raw)?;
        self.run_validators(&value)?;

        Ok(value)
    }

    fn run_validators(&self, value: &Value) -> Result<()> {
        let translator = self.translator();
        let mut failed: Option<Messages> = None;

        for validator in &self.validators {
            if let Err(err) = validator(value, &translator) {
                match &mut failed {
                    Some(messages) => messages.merge(err.into_messages()),
                    None => failed = Some(err.into_messages()),
                }
            }
        }

        match failed {
            Some(messages) => Err(ValidationError::from_messages(messages).into()),
            None => Ok(()),
        }
    }

    fn deserialize_kind(&self, raw: Value) -> Result<Value> {
        match &self.kind {
            FieldKind::String => match raw {
                Value::Bson(Bson::String(value)) => Ok(Value::Bson(Bson::String(value))),
                _ => Err(self.fail(i18n::INVALID_STRING)),
            },
            FieldKind::Integer => match raw {
                Value::Bson(Bson::Int32(value)) => Ok(Value::Bson(Bson::Int32(value))),
                Value::Bson(Bson::Int64(value)) => Ok(integer(value)),
                #[allow(clippy::cast_possible_truncation)]
                Value::Bson(Bson::Double(value))
                    if value.fract() == 0.0 && value.abs() < 9.0e15 =>
                {
                    Ok(integer(value as i64))
                }
                Value::Bson(Bson::String(value)) => value
                    .trim()
                    .parse::<i64>()
                    .map(integer)
                    .map_err(|_| self.fail(i18n::INVALID_INTEGER)),
                _ => Err(self.fail(i18n::INVALID_INTEGER)),
            },
            FieldKind::Float => match raw {
                Value::Bson(Bson::Double(value)) if value.is_finite() => {
                    Ok(Value::Bson(Bson::Double(value)))
                }
                Value::Bson(Bson::Int32(value)) => Ok(Value::Bson(Bson::Double(f64::from(value)))),
                #[allow(clippy::cast_precision_loss)]
                Value::Bson(Bson::Int64(value)) => Ok(Value::Bson(Bson::Double(value as f64))),
                Value::Bson(Bson::String(value)) => value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite())
                    .map(|value| Value::Bson(Bson::Double(value)))
                    .ok_or_else(|| self.fail(i18n::INVALID_NUMBER)),
                _ => Err(self.fail(i18n::INVALID_NUMBER)),
            },
            FieldKind::Boolean => match raw {
                Value::Bson(Bson::Boolean(value)) => Ok(Value::Bson(Bson::Boolean(value))),
                Value::Bson(Bson::Int32(value @ (0 | 1))) => Ok(Value::Bson(Bson::Boolean(value == 1))),
                Value::Bson(Bson::Int64(value @ (0 | 1))) => Ok(Value::Bson(Bson::Boolean(value == 1))),
                Value::Bson(Bson::String(value)) => match value.as_str() {
                    "true" | "True" | "TRUE" | "t" | "T" | "1" | "on" | "On" | "ON" | "yes"
                    | "Yes" | "YES" | "y" | "Y" => Ok(Value::Bson(Bson::Boolean(true))),
                    "false" | "False" | "FALSE" | "f" | "F" | "0" | "off" | "Off" | "OFF"
                    | "no" | "No" | "NO" | "n" | "N" => Ok(Value::Bson(Bson::Boolean(false))),
                    _ => Err(self.fail(i18n::INVALID_BOOLEAN)),
                },
                _ => Err(self.fail(i18n::INVALID_BOOLEAN)),
            },
            FieldKind::DateTime => match raw {
                Value::Bson(Bson::DateTime(value)) => Ok(Value::Bson(Bson::DateTime(value))),
                Value::Bson(Bson::String(value)) => parse_datetime(&value)
                    .map(|millis| Value::Bson(Bson::DateTime(bson::DateTime::from_millis(millis))))
                    .ok_or_else(|| self.fail(i18n::INVALID_DATETIME)),
                _ => Err(self.fail(i18n::INVALID_DATETIME)),
            },
            FieldKind::Date => match raw {
                Value::Bson(Bson::DateTime(value)) => {
                    let millis = value.timestamp_millis();
                    Ok(date(millis - millis.rem_euclid(MILLIS_PER_DAY)))
                }
                Value::Bson(Bson::String(value)) => NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
                    .map(|midnight| date(midnight.and_utc().timestamp_millis()))
                    .ok_or_else(|| self.fail(i18n::INVALID_DATE)),
                _ => Err(self.fail(i18n::INVALID_DATE)),
            },
            FieldKind::ObjectId => match raw {
                Value::Bson(Bson::ObjectId(value)) => Ok(Value::Bson(Bson::ObjectId(value))),
                Value::Bson(Bson::String(value)) => ObjectId::parse_str(&value)
                    .map(|id| Value::Bson(Bson::ObjectId(id)))
                    .map_err(|_| self.fail(i18n::INVALID_OBJECT_ID)),
                _ => Err(self.fail(i18n::INVALID_OBJECT_ID)),
            },
            FieldKind::Dict => match raw {
                Value::Dict(dict) => Ok(Value::Dict(dict)),
                Value::Bson(Bson::Document(document)) => Ok(Value::Dict(Dict::new(document))),
                _ => Err(self.fail(i18n::INVALID_MAPPING)),
            },
            FieldKind::List(container) => {
                let items = match raw {
                    Value::List(list) => list.into_items(),
                    Value::Bson(Bson::Array(items)) => items.into_iter().map(Value::from).collect(),
                    _ => return Err(self.fail(i18n::INVALID_LIST)),
                };

                let mut errors = ErrorCollector::default();
                let mut values = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    match container.deserialize(item) {
                        Ok(value) => values.push(value),
                        Err(Error::Validation(err)) => errors.add(index.to_string(), err),
                        Err(err) => return Err(err),
                    }
                }
                errors.finish()?;

                Ok(Value::List(List::new(Arc::clone(container), values)))
            }
            FieldKind::Embedded(document) => self.deserialize_embedded(document, raw),
            FieldKind::Reference(document) => self.deserialize_reference(document, raw),
            FieldKind::GenericReference => self.deserialize_generic_reference(raw),
        }
    }

    fn deserialize_embedded(&self, document: &str, raw: Value) -> Result<Value> {
        let instance = self.binding.instance()?;
        let target = instance.retrieve_embedded_document(document)?;

        match raw {
            Value::Embedded(embedded) => {
                if embedded.implementation().is_a(target.name()) {
                    Ok(Value::Embedded(embedded))
                } else {
                    Err(self.fail(i18n::INVALID_INPUT))
                }
            }
            Value::Bson(Bson::Document(mut data)) => {
                let polymorphic = target.opts().is_abstract()
                    || target.opts().is_child()
                    || target.opts().has_any_offspring();
                let implementation = if polymorphic && data.contains_key("cls") {
                    let Some(Bson::String(cls)) = data.remove("cls") else {
                        return Err(self.fail(i18n::INVALID_INPUT));
                    };
                    match instance.retrieve_embedded_document(&cls) {
                        Ok(implementation) if implementation.is_a(target.name()) => implementation,
                        _ => {
                            return Err(Error::Validation(ValidationError::new(
                                self.translator()
                                    .format(i18n::UNKNOWN_DOCUMENT, &[("document", &cls)]),
                            )));
                        }
                    }
                } else {
                    target
                };

                Ok(Value::Embedded(Box::new(EmbeddedDocument::new(
                    &implementation,
                    data,
                )?)))
            }
            _ => Err(Error::Validation(ValidationError::keyed(
                SCHEMA_KEY,
                ValidationError::new(self.translator().format(i18n::INVALID_INPUT, &[])),
            ))),
        }
    }

    fn deserialize_reference(&self, document: &str, raw: Value) -> Result<Value> {
        let instance = self.binding.instance()?;
        let target = instance.retrieve_document(document)?;

        match raw {
            Value::Reference(reference) => {
                if reference.document_name() == target.name() {
                    Ok(Value::Reference(reference))
                } else if reference.implementation().is_a(target.name()) {
                    Ok(Value::Reference(Reference::new(&target, reference.pk().clone())))
                } else {
                    Err(Error::Validation(ValidationError::new(self.translator().format(
                        i18n::REFERENCE_EXPECTED,
                        &[("document", target.name())],
                    ))))
                }
            }
            Value::Bson(pk) => {
                let pk = target.deserialize_pk(pk)?;
                Ok(Value::Reference(Reference::new(&target, pk)))
            }
            _ => Err(Error::Validation(ValidationError::new(self.translator().format(
                i18n::REFERENCE_EXPECTED,
                &[("document", target.name())],
            )))),
        }
    }

    fn deserialize_generic_reference(&self, raw: Value) -> Result<Value> {
        let data = match raw {
            Value::Reference(reference) => return Ok(Value::Reference(reference)),
            Value::Bson(Bson::Document(data)) => data,
            _ => return Err(self.fail(i18n::GENERIC_REFERENCE_INVALID)),
        };

        if data.len() != 2 || !data.contains_key("id") || !data.contains_key("cls") {
            return Err(self.fail(i18n::GENERIC_REFERENCE_KEYS));
        }

        let id = match data.get("id") {
            Some(Bson::ObjectId(id)) => *id,
            Some(Bson::String(id)) => {
                ObjectId::parse_str(id).map_err(|_| self.fail(i18n::INVALID_ID))?
            }
            _ => return Err(self.fail(i18n::INVALID_ID)),
        };
        let Some(Bson::String(cls)) = data.get("cls") else {
            return Err(self.fail(i18n::GENERIC_REFERENCE_INVALID));
        };

        let implementation = self.retrieve_referenced(cls)?;

        Ok(Value::Reference(Reference::new(
            &implementation,
            Bson::ObjectId(id),
        )))
    }

    fn retrieve_referenced(&self, name: &str) -> Result<Arc<crate::Implementation>> {
        let instance = self.binding.instance()?;
        instance.retrieve_document(name).map_err(|err| match err {
            Error::NotRegistered(_) => Error::Validation(ValidationError::new(
                self.translator()
                    .format(i18n::UNKNOWN_DOCUMENT, &[("document", name)]),
            )),
            other => other,
        })
    }

    /// Converts an in-memory value into its external representation.
    pub fn serialize(&self, value: &Value) -> Result<Bson> {
        let bson = match value {
            Value::Missing | Value::Null => Bson::Null,
            Value::Bson(bson) => match (&self.kind, bson) {
                (FieldKind::DateTime, Bson::DateTime(value)) => chrono::DateTime::<Utc>::from_timestamp_millis(value.timestamp_millis())
                    .map_or_else(
                        || Bson::DateTime(*value),
                        |value| Bson::String(value.to_rfc3339_opts(SecondsFormat::Millis, true)),
                    ),
                (FieldKind::Date, Bson::DateTime(value)) => chrono::DateTime::<Utc>::from_timestamp_millis(value.timestamp_millis())
                    .map_or_else(
                        || Bson::DateTime(*value),
                        |value| Bson::String(value.date_naive().format("%Y-%m-%d").to_string()),
                    ),
                (_, Bson::ObjectId(id)) => Bson::String(id.to_hex()),
                (_, other) => other.clone(),
            },
            Value::List(list) => {
                let container = match &self.kind {
                    FieldKind::List(container) => container.as_ref(),
                    _ => list.container(),
                };
                Bson::Array(
                    list.iter()
                        .map(|item| container.serialize(item))
                        .collect::<Result<_>>()?,
                )
            }
            Value::Dict(dict) => Bson::Document(dict.as_document().clone()),
            Value::Embedded(embedded) => Bson::Document(embedded.dump()?),
            Value::Reference(reference) => {
                let pk = match reference.pk() {
                    Bson::ObjectId(id) => Bson::String(id.to_hex()),
                    other => other.clone(),
                };
                if matches!(self.kind, FieldKind::GenericReference) {
                    Bson::Document(doc! { "id": pk, "cls": reference.document_name() })
                } else {
                    pk
                }
            }
        };

        Ok(bson)
    }

    /// Storage representation, `None` when the value is missing.
    pub fn to_storage(&self, value: &Value) -> Option<Bson> {
        match value {
            Value::Missing => None,
            Value::Null => Some(Bson::Null),
            Value::Bson(bson) => Some(bson.clone()),
            Value::List(list) => Some(Bson::Array(
                list.iter()
                    .map(|item| list.container().to_storage(item).unwrap_or(Bson::Null))
                    .collect(),
            )),
            Value::Dict(dict) => Some(Bson::Document(dict.as_document().clone())),
            Value::Embedded(embedded) => Some(Bson::Document(embedded.to_storage())),
            Value::Reference(reference) => Some(match self.kind {
                FieldKind::GenericReference => Bson::Document(doc! {
                    "_id": reference.pk().clone(),
                    "_cls": reference.document_name(),
                }),
                _ => reference.pk().clone(),
            }),
        }
    }

    /// Hydrates a value read from storage. No validation is run.
    pub fn from_storage(&self, bson: Bson) -> Result<Value> {
        if bson == Bson::Null {
            return Ok(Value::Null);
        }

        match &self.kind {
            FieldKind::List(container) => match bson {
                Bson::Array(items) => Ok(Value::List(List::new(
                    Arc::clone(container),
                    items
                        .into_iter()
                        .map(|item| container.from_storage(item))
                        .collect::<Result<_>>()?,
                ))),
                _ => Err(self.fail(i18n::INVALID_LIST)),
            },
            FieldKind::Dict => match bson {
                Bson::Document(document) => Ok(Value::Dict(Dict::new(document))),
                _ => Err(self.fail(i18n::INVALID_MAPPING)),
            },
            FieldKind::Embedded(document) => match bson {
                Bson::Document(data) => {
                    let implementation =
                        self.binding.instance()?.retrieve_embedded_document(document)?;
                    Ok(Value::Embedded(Box::new(
                        EmbeddedDocument::build_from_storage(&implementation, data)?,
                    )))
                }
                _ => Err(self.fail(i18n::INVALID_MAPPING)),
            },
            FieldKind::Reference(document) => {
                let implementation = self.binding.instance()?.retrieve_document(document)?;
                Ok(Value::Reference(Reference::new(&implementation, bson)))
            }
            FieldKind::GenericReference => match bson {
                Bson::Document(mut data) => {
                    let (Some(Bson::String(cls)), Some(pk)) = (data.remove("_cls"), data.remove("_id"))
                    else {
                        return Err(self.fail(i18n::GENERIC_REFERENCE_INVALID));
                    };
                    let implementation = self.retrieve_referenced(&cls)?;
                    Ok(Value::Reference(Reference::new(&implementation, pk)))
                }
                _ => Err(self.fail(i18n::GENERIC_REFERENCE_INVALID)),
            },
            _ => Ok(Value::Bson(bson)),
        }
    }

    /// Checks required sub-fields of nested values.
    pub(crate) fn required_validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::List(list) => {
                let mut errors = ErrorCollector::default();
                for (index, item) in list.iter().enumerate() {
                    if let Err(err) = list.container().required_validate(item) {
                        errors.add(index.to_string(), err);
                    }
                }
                errors.finish()
            }
            Value::Embedded(embedded) => embedded.required_validate(),
            _ => Ok(()),
        }
    }

    /// Schema of the embedded document reachable through this field, if any.
    pub(crate) fn nested_schema(&self) -> Option<Arc<Schema>> {
        match &self.kind {
            FieldKind::Embedded(document) => self
                .binding
                .instance()
                .ok()?
                .retrieve_embedded_document(document)
                .ok()
                .map(|implementation| Arc::clone(implementation.schema())),
            FieldKind::List(container) => container.nested_schema(),
            _ => None,
        }
    }

    /// Calls `visit(storage_path, path, field)` for every field nested below this one.
    pub(crate) fn visit_nested(
        &self,
        storage_path: &str,
        path: &str,
        visit: &mut dyn FnMut(&str, &str, &Field),
    ) {
        match &self.kind {
            FieldKind::List(container) => {
                visit(storage_path, path, container);
                container.visit_nested(storage_path, path, visit);
            }
            FieldKind::Embedded(_) => {
                let Some(schema) = self.nested_schema() else {
                    return;
                };
                for (name, field) in schema.fields() {
                    let path = format!("{path}.{name}");
                    let storage_path = format!("{storage_path}.{}", field.storage_key_or_name());
                    visit(&storage_path, &path, field);
                    field.visit_nested(&storage_path, &path, visit);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("storage_key", &self.storage_key)
            .field("required", &self.required)
            .field("allow_none", &self.allow_none)
            .field("unique", &self.unique)
            .field("dump_only", &self.dump_only)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

fn integer(value: i64) -> Value {
    Value::Bson(i32::try_from(value).map_or(Bson::Int64(value), Bson::Int32))
}

fn date(millis: i64) -> Value {
    Value::Bson(Bson::DateTime(bson::DateTime::from_millis(millis)))
}

fn parse_datetime(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(datetime) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(datetime.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|datetime| datetime.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn messages(err: Error) -> Messages {
        err.as_validation().cloned().unwrap().into_messages()
    }

    #[test]
    fn integers_are_normalized() {
        let field = Field::integer();

        assert_eq!(field.deserialize(5_i64).unwrap(), Value::Bson(Bson::Int32(5)));
        assert_eq!(
            field.deserialize(5_000_000_000_i64).unwrap(),
            Value::Bson(Bson::Int64(5_000_000_000))
        );
        assert_eq!(field.deserialize("42").unwrap(), Value::Bson(Bson::Int32(42)));
        assert_eq!(field.deserialize(3.0).unwrap(), Value::Bson(Bson::Int32(3)));
        assert_eq!(
            messages(field.deserialize(3.5).unwrap_err()),
            Messages::List(vec!["Not a valid integer.".into()])
        );
    }

    #[test]
    fn null_requires_allow_none() {
        assert_eq!(
            messages(Field::string().deserialize(Value::Null).unwrap_err()),
            Messages::List(vec!["Field may not be null.".into()])
        );
        assert_eq!(
            Field::string().allow_none().deserialize(Value::Null).unwrap(),
            Value::Null
        );
        assert_eq!(
            Field::string().deserialize(Value::Missing).unwrap(),
            Value::Missing
        );
    }

    #[test]
    fn datetime_round_trips_through_dump() {
        let field = Field::datetime();

        let value = field.deserialize("2020-01-02T03:04:05.678Z").unwrap();
        assert_eq!(
            field.serialize(&value).unwrap(),
            Bson::String("2020-01-02T03:04:05.678Z".into())
        );

        let naive = field.deserialize("2020-01-02T03:04:05").unwrap();
        assert_eq!(
            field.serialize(&naive).unwrap(),
            Bson::String("2020-01-02T03:04:05.000Z".into())
        );
    }

    #[test]
    fn date_truncates_to_midnight() {
        let field = Field::date();

        let value = field
            .deserialize(bson::DateTime::from_millis(MILLIS_PER_DAY + 1234))
            .unwrap();
        assert_eq!(value.as_datetime().unwrap().timestamp_millis(), MILLIS_PER_DAY);
        assert_eq!(
            field.serialize(&value).unwrap(),
            Bson::String("1970-01-02".into())
        );
    }

    #[test]
    fn object_id_accepts_hex_strings() {
        let id = ObjectId::new();
        let field = Field::object_id();

        assert_eq!(field.deserialize(id.to_hex()).unwrap(), Value::from(id));
        assert_eq!(
            messages(field.deserialize("zzz").unwrap_err()),
            Messages::List(vec!["Invalid ObjectId.".into()])
        );
    }

    #[test]
    fn list_errors_are_keyed_by_index() {
        let field = Field::list(Field::integer());

        let err = field
            .deserialize(Bson::Array(vec![Bson::Int32(1), Bson::String("x".into())]))
            .unwrap_err();

        assert_eq!(
            messages(err).get("1"),
            Some(&Messages::List(vec!["Not a valid integer.".into()]))
        );
    }

    #[test]
    fn validators_accumulate_messages() {
        let field = Field::string()
            .validator(validate::length(Some(3), None))
            .validator(validate::one_of(["long enough"]));

        assert_eq!(
            messages(field.deserialize("ab").unwrap_err()),
            Messages::List(vec![
                "Shorter than minimum length 3.".into(),
                "Must be one of: long enough.".into()
            ])
        );
    }

    #[test]
    fn custom_null_message() {
        let field = Field::integer().error_message("null", "Give me a number.");

        assert_eq!(
            messages(field.deserialize(Value::Null).unwrap_err()),
            Messages::List(vec!["Give me a number.".into()])
        );
    }

    #[test]
    fn storage_representation_of_missing_is_absent() {
        let field = Field::string();

        assert_eq!(field.to_storage(&Value::Missing), None);
        assert_eq!(field.to_storage(&Value::Null), Some(Bson::Null));
        assert_eq!(
            field.to_storage(&Value::from("x")),
            Some(Bson::String("x".into()))
        );
    }
}
