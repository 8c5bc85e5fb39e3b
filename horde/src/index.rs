use crate::{Error, Result};
use mongodb::{
    IndexModel,
    bson::{self, Bson, doc},
    options::IndexOptions,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Ascending,
    Descending,
    Text,
    Hashed,
}

impl IndexKind {
    pub fn to_bson(self) -> Bson {
        match self {
            Self::Ascending => Bson::Int32(1),
            Self::Descending => Bson::Int32(-1),
            Self::Text => Bson::String("text".into()),
            Self::Hashed => Bson::String("hashed".into()),
        }
    }

    fn from_bson(bson: &Bson) -> Option<Self> {
        match bson {
            Bson::Int32(1) | Bson::Int64(1) => Some(Self::Ascending),
            Bson::Int32(-1) | Bson::Int64(-1) => Some(Self::Descending),
            Bson::Double(value) if *value > 0.0 => Some(Self::Ascending),
            Bson::Double(value) if *value < 0.0 => Some(Self::Descending),
            Bson::String(kind) if kind == "text" => Some(Self::Text),
            Bson::String(kind) if kind == "hashed" => Some(Self::Hashed),
            _ => None,
        }
    }

    fn name_suffix(self) -> &'static str {
        match self {
            Self::Ascending => "1",
            Self::Descending => "-1",
            Self::Text => "text",
            Self::Hashed => "hashed",
        }
    }
}

/// An index declaration as written in a document's meta.
///
/// A key string may carry a direction prefix: `+` ascending (the default),
/// `-` descending, `$` text, `#` hashed.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexSpec {
    Key(String),
    Pair(String, IndexKind),
    Compound(Vec<IndexSpec>),
    Structured {
        keys: Vec<IndexSpec>,
        options: bson::Document,
    },
}

impl IndexSpec {
    pub fn compound<I>(keys: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<IndexSpec>,
    {
        Self::Compound(keys.into_iter().map(Into::into).collect())
    }

    pub fn structured<I>(keys: I, options: bson::Document) -> Self
    where
        I: IntoIterator,
        I::Item: Into<IndexSpec>,
    {
        Self::Structured {
            keys: keys.into_iter().map(Into::into).collect(),
            options,
        }
    }

    /// Parses `{ key: [...], ..options }` where each key is a prefixed
    /// string or a `[path, direction]` pair.
    pub fn from_document(document: &bson::Document) -> Result<Self> {
        let Some(Bson::Array(entries)) = document.get("key") else {
            return Err(Error::DocumentDefinition(
                "index passed as document must have an iterable `key` entry".into(),
            ));
        };

        let keys = entries
            .iter()
            .map(|entry| match entry {
                Bson::String(key) => Ok(Self::Key(key.clone())),
                Bson::Array(pair) => match pair.as_slice() {
                    [Bson::String(key), kind] => IndexKind::from_bson(kind)
                        .map(|kind| Self::Pair(key.clone(), kind))
                        .ok_or_else(|| invalid_key(entry)),
                    _ => Err(invalid_key(entry)),
                },
                _ => Err(invalid_key(entry)),
            })
            .collect::<Result<_>>()?;

        let mut options = document.clone();
        options.remove("key");

        Ok(Self::Structured { keys, options })
    }
}

fn invalid_key(entry: &Bson) -> Error {
    Error::DocumentDefinition(format!("invalid index key `{entry}`, expected `(key, direction)`"))
}

impl From<&str> for IndexSpec {
    fn from(value: &str) -> Self {
        Self::Key(value.to_owned())
    }
}

impl From<String> for IndexSpec {
    fn from(value: String) -> Self {
        Self::Key(value)
    }
}

impl From<(&str, IndexKind)> for IndexSpec {
    fn from((key, kind): (&str, IndexKind)) -> Self {
        Self::Pair(key.to_owned(), kind)
    }
}

/// A normalized index: ordered keys plus driver options.
#[derive(Clone, Debug, PartialEq)]
pub struct Index {
    keys: Vec<(String, IndexKind)>,
    options: bson::Document,
}

impl Index {
    /// Normalizes `spec`, appending `base_compound` as a trailing key when given.
    pub fn parse(spec: &IndexSpec, base_compound: Option<&str>) -> Result<Self> {
        let (mut keys, options) = match spec {
            IndexSpec::Key(_) | IndexSpec::Pair(..) => (vec![explicit_key(spec)?], bson::Document::new()),
            IndexSpec::Compound(keys) => (
                keys.iter().map(explicit_key).collect::<Result<_>>()?,
                bson::Document::new(),
            ),
            IndexSpec::Structured { keys, options } => (
                keys.iter().map(explicit_key).collect::<Result<_>>()?,
                options.clone(),
            ),
        };

        if keys.is_empty() {
            return Err(Error::DocumentDefinition("index must have at least one key".into()));
        }

        if let Some(base) = base_compound {
            keys.push(explicit_key(&IndexSpec::Key(base.to_owned()))?);
        }

        Ok(Self { keys, options })
    }

    pub(crate) fn unique_on(path: String, sparse: bool, base_compound: Option<&str>) -> Self {
        let mut keys = vec![(path, IndexKind::Ascending)];
        if let Some(base) = base_compound {
            keys.push((base.to_owned(), IndexKind::Ascending));
        }
        let mut options = doc! { "unique": true };
        if sparse {
            options.insert("sparse", true);
        }
        Self { keys, options }
    }

    pub fn keys(&self) -> &[(String, IndexKind)] {
        &self.keys
    }

    pub fn options(&self) -> &bson::Document {
        &self.options
    }

    /// Explicit `name` option, otherwise `<key>_<direction>` joined by `_`.
    pub fn name(&self) -> String {
        if let Ok(name) = self.options.get_str("name") {
            return name.to_owned();
        }
        self.keys
            .iter()
            .map(|(key, kind)| format!("{key}_{}", kind.name_suffix()))
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn is_unique(&self) -> bool {
        self.options.get_bool("unique").unwrap_or(false)
    }

    pub fn is_sparse(&self) -> bool {
        self.options.get_bool("sparse").unwrap_or(false)
    }

    pub fn key_document(&self) -> bson::Document {
        self.keys
            .iter()
            .map(|(key, kind)| (key.clone(), kind.to_bson()))
            .collect()
    }

    pub fn to_model(&self) -> Result<IndexModel> {
        let mut options = self.options.clone();
        options.insert("name", self.name());
        let options: IndexOptions = bson::from_document(options)
            .map_err(|err| Error::DocumentDefinition(format!("invalid index options: {err}")))?;

        Ok(IndexModel::builder()
            .keys(self.key_document())
            .options(options)
            .build())
    }
}

fn explicit_key(spec: &IndexSpec) -> Result<(String, IndexKind)> {
    match spec {
        IndexSpec::Pair(key, kind) => Ok((key.clone(), *kind)),
        IndexSpec::Key(key) => Ok(match key.chars().next() {
            Some('+') => (key[1..].to_owned(), IndexKind::Ascending),
            Some('-') => (key[1..].to_owned(), IndexKind::Descending),
            Some('$') => (key[1..].to_owned(), IndexKind::Text),
            Some('#') => (key[1..].to_owned(), IndexKind::Hashed),
            _ => (key.clone(), IndexKind::Ascending),
        }),
        IndexSpec::Compound(_) | IndexSpec::Structured { .. } => Err(Error::DocumentDefinition(
            "nested compound index keys are not supported".into(),
        )),
    }
}
