use std::{collections::BTreeMap, fmt};
use thiserror::Error as ThisError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("document definition error: {0}")]
    DocumentDefinition(String),

    #[error("{0}")]
    NotRegistered(String),

    #[error("{0}")]
    AlreadyRegistered(String),

    #[error("{0}")]
    NoDbDefined(String),

    #[error("{0}")]
    NoCompatibleDriver(String),

    #[error("{0}")]
    AbstractDocument(String),

    #[error("{0}")]
    NotCreated(String),

    #[error("{0}")]
    FieldNotLoaded(String),

    #[error("{0}")]
    UnknownField(String),

    #[error("{0}")]
    UnknownFieldInDb(String),

    #[error("{0}")]
    ReadOnlyField(String),

    #[error("{0}")]
    NullReference(String),

    #[error("document is not bound to a live instance")]
    NoInstance,

    #[error("conditions can only be set on update")]
    ConditionsOnInsert,

    #[error("can't update document ({matched} matched)")]
    Update { matched: u64 },

    #[error("can't delete document ({deleted} deleted)")]
    Delete { deleted: u64 },

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Deserialize(#[from] mongodb::bson::de::Error),
}

impl Error {
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(value: mongodb::error::Error) -> Self {
        Self::Storage(StorageError::from(value))
    }
}

/// Errors raised by a storage driver.
#[derive(Debug, ThisError)]
pub enum StorageError {
    #[error("{message}")]
    DuplicateKey { message: String },

    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),

    #[error("{0}")]
    Other(String),
}

impl StorageError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}

/// A tree of user-facing messages, keyed by field name or list index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Messages {
    List(Vec<String>),
    Map(BTreeMap<String, Messages>),
}

impl Messages {
    pub fn get(&self, key: &str) -> Option<&Messages> {
        match self {
            Self::Map(map) => map.get(key),
            Self::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(list) => Some(list),
            Self::Map(_) => None,
        }
    }

    pub fn merge(&mut self, other: Messages) {
        match (&mut *self, other) {
            (Self::List(list), Self::List(other)) => list.extend(other),
            (Self::Map(map), Self::Map(other)) => {
                for (key, messages) in other {
                    match map.get_mut(&key) {
                        Some(existing) => existing.merge(messages),
                        None => {
                            map.insert(key, messages);
                        }
                    }
                }
            }
            (Self::Map(map), Self::List(list)) => {
                map.entry(SCHEMA_KEY.to_owned())
                    .or_insert_with(|| Self::List(Vec::new()))
                    .merge(Self::List(list));
            }
            (Self::List(list), Self::Map(mut other)) => {
                let list = std::mem::take(list);
                if !list.is_empty() {
                    other
                        .entry(SCHEMA_KEY.to_owned())
                        .or_insert_with(|| Self::List(Vec::new()))
                        .merge(Self::List(list));
                }
                *self = Self::Map(other);
            }
        }
    }
}

impl fmt::Display for Messages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(list) => {
                f.write_str("[")?;
                for (i, message) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{message:?}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (key, messages)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {messages}")?;
                }
                f.write_str("}")
            }
        }
    }
}

pub(crate) const SCHEMA_KEY: &str = "_schema";

/// Structured validation failure mirroring the shape of the data.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("validation failed: {messages}")]
pub struct ValidationError {
    messages: Messages,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: Messages::List(vec![message.into()]),
        }
    }

    pub fn from_messages(messages: Messages) -> Self {
        Self { messages }
    }

    pub fn keyed(key: impl Into<String>, error: ValidationError) -> Self {
        Self {
            messages: Messages::Map(BTreeMap::from([(key.into(), error.messages)])),
        }
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    pub fn into_messages(self) -> Messages {
        self.messages
    }

    /// Messages reported for a top level key.
    pub fn field(&self, key: &str) -> Option<&Messages> {
        self.messages.get(key)
    }

    /// Moves plain list messages under `_schema`.
    pub(crate) fn into_schema_level(self) -> Self {
        match self.messages {
            Messages::List(list) => Self {
                messages: Messages::Map(BTreeMap::from([(
                    SCHEMA_KEY.to_owned(),
                    Messages::List(list),
                )])),
            },
            messages @ Messages::Map(_) => Self { messages },
        }
    }
}

/// Accumulates keyed validation failures.
#[derive(Debug, Default)]
pub(crate) struct ErrorCollector {
    errors: BTreeMap<String, Messages>,
}

impl ErrorCollector {
    pub(crate) fn add(&mut self, key: impl Into<String>, error: ValidationError) {
        let key = key.into();
        match self.errors.get_mut(&key) {
            Some(existing) => existing.merge(error.messages),
            None => {
                self.errors.insert(key, error.messages);
            }
        }
    }

    pub(crate) fn add_message(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.add(key, ValidationError::new(message));
    }

    pub(crate) fn merge(&mut self, error: ValidationError) {
        match error.messages {
            Messages::Map(map) => {
                for (key, messages) in map {
                    self.add(key, ValidationError::from_messages(messages));
                }
            }
            list @ Messages::List(_) => self.add(SCHEMA_KEY, ValidationError::from_messages(list)),
        }
    }

    pub(crate) fn finish(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::from_messages(Messages::Map(self.errors)))
        }
    }
}
