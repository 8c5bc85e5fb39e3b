use crate::{EmbeddedDocument, Field, Reference, Result};
use mongodb::bson::{self, Bson, oid::ObjectId};
use std::{fmt, sync::Arc};

/// A field value held by a document's data proxy.
///
/// `Missing` means "no value" and is distinct from an explicit `Null`.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Missing,
    Null,
    Bson(Bson),
    List(List),
    Dict(Dict),
    Embedded(Box<EmbeddedDocument>),
    Reference(Reference),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null | Self::Bson(Bson::Null))
    }

    pub fn as_bson(&self) -> Option<&Bson> {
        match self {
            Self::Bson(bson) => Some(bson),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bson().and_then(Bson::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.as_bson()? {
            Bson::Int32(value) => Some(i64::from(*value)),
            Bson::Int64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_bson().and_then(Bson::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_bson().and_then(Bson::as_bool)
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        self.as_bson().and_then(Bson::as_object_id)
    }

    pub fn as_datetime(&self) -> Option<bson::DateTime> {
        self.as_bson().and_then(Bson::as_datetime).copied()
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Self::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut Dict> {
        match self {
            Self::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    pub fn as_embedded(&self) -> Option<&EmbeddedDocument> {
        match self {
            Self::Embedded(embedded) => Some(embedded),
            _ => None,
        }
    }

    pub fn as_embedded_mut(&mut self) -> Option<&mut EmbeddedDocument> {
        match self {
            Self::Embedded(embedded) => Some(embedded),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Self::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn as_reference_mut(&mut self) -> Option<&mut Reference> {
        match self {
            Self::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    /// Whether a container value was mutated in place since the last clear.
    pub fn is_modified(&self) -> bool {
        match self {
            Self::List(list) => list.is_modified(),
            Self::Dict(dict) => dict.is_modified(),
            Self::Embedded(embedded) => embedded.is_modified(),
            _ => false,
        }
    }

    pub fn clear_modified(&mut self) {
        match self {
            Self::List(list) => list.clear_modified(),
            Self::Dict(dict) => dict.clear_modified(),
            Self::Embedded(embedded) => embedded.clear_modified(),
            _ => {}
        }
    }
}

impl From<Bson> for Value {
    fn from(value: Bson) -> Self {
        match value {
            Bson::Null => Self::Null,
            other => Self::Bson(other),
        }
    }
}

macro_rules! value_from_bson {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::Bson(Bson::from(value))
                }
            }
        )*
    };
}

value_from_bson!(
    &str,
    String,
    i32,
    i64,
    f64,
    bool,
    ObjectId,
    bson::DateTime,
    bson::Document,
    Vec<Bson>
);

impl From<chrono::DateTime<chrono::Utc>> for Value {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        Self::Bson(Bson::DateTime(bson::DateTime::from_millis(
            value.timestamp_millis(),
        )))
    }
}

impl From<EmbeddedDocument> for Value {
    fn from(value: EmbeddedDocument) -> Self {
        Self::Embedded(Box::new(value))
    }
}

impl From<Reference> for Value {
    fn from(value: Reference) -> Self {
        Self::Reference(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A list value that deserializes inserted items through its container field.
#[derive(Clone)]
pub struct List {
    container: Arc<Field>,
    items: Vec<Value>,
    modified: bool,
}

impl List {
    pub(crate) fn new(container: Arc<Field>, items: Vec<Value>) -> Self {
        Self {
            container,
            items,
            modified: false,
        }
    }

    pub fn container(&self) -> &Field {
        &self.container
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    /// Mutable access to an item. Marks the list as modified.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.modified = true;
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn push(&mut self, value: impl Into<Value>) -> Result<()> {
        let value = self.container.deserialize(value)?;
        self.items.push(value);
        self.modified = true;
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = self.container.deserialize(value)?;
        self.items.insert(index, value);
        self.modified = true;
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = self.container.deserialize(value)?;
        self.items[index] = value;
        self.modified = true;
        Ok(())
    }

    pub fn extend<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let values = values
            .into_iter()
            .map(|value| self.container.deserialize(value))
            .collect::<Result<Vec<_>>>()?;
        self.items.extend(values);
        self.modified = true;
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn remove(&mut self, index: usize) -> Value {
        self.modified = true;
        self.items.remove(index)
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.modified = true;
        self.items.pop()
    }

    pub fn clear(&mut self) {
        self.modified = true;
        self.items.clear();
    }

    pub fn reverse(&mut self) {
        self.modified = true;
        self.items.reverse();
    }

    pub fn retain(&mut self, f: impl FnMut(&Value) -> bool) {
        self.modified = true;
        self.items.retain(f);
    }

    pub fn is_modified(&self) -> bool {
        self.modified || self.items.iter().any(Value::is_modified)
    }

    pub fn set_modified(&mut self) {
        self.modified = true;
    }

    pub fn clear_modified(&mut self) {
        self.modified = false;
        self.items.iter_mut().for_each(Value::clear_modified);
    }

    pub(crate) fn into_items(self) -> Vec<Value> {
        self.items
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.items).finish()
    }
}

impl<'a> IntoIterator for &'a List {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// A free-form mapping value.
#[derive(Clone, Default)]
pub struct Dict {
    inner: bson::Document,
    modified: bool,
}

impl Dict {
    pub fn new(inner: bson::Document) -> Self {
        Self {
            inner,
            modified: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.inner.get(key)
    }

    /// Mutable access to an entry. Marks the mapping as modified.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Bson> {
        self.modified = true;
        self.inner.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> Option<Bson> {
        self.modified = true;
        self.inner.insert(key, value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        self.modified = true;
        self.inner.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> bson::document::Iter<'_> {
        self.inner.iter()
    }

    pub fn as_document(&self) -> &bson::Document {
        &self.inner
    }

    pub fn into_document(self) -> bson::Document {
        self.inner
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self) {
        self.modified = true;
    }

    pub fn clear_modified(&mut self) {
        self.modified = false;
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn null_is_distinct_from_missing() {
        assert!(Value::Missing.is_missing());
        assert!(!Value::Null.is_missing());
        assert_eq!(Value::from(Bson::Null), Value::Null);
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(5)), Value::Bson(Bson::Int32(5)));
    }

    #[test]
    fn dict_tracks_in_place_mutation() {
        let mut dict = Dict::new(doc! { "a": 1 });
        assert!(!dict.is_modified());

        dict.insert("b", 2);
        assert!(dict.is_modified());

        dict.clear_modified();
        assert!(!dict.is_modified());
        assert_eq!(dict, Dict::new(doc! { "a": 1, "b": 2 }));
    }

    #[test]
    fn list_tracks_in_place_mutation() {
        let mut list = List::new(Arc::new(Field::integer()), Vec::new());
        assert!(!list.is_modified());

        list.push(3).unwrap();
        list.push("4").unwrap();
        assert!(list.is_modified());
        assert_eq!(list.get(1), Some(&Value::Bson(Bson::Int32(4))));

        list.clear_modified();
        assert!(!list.is_modified());

        assert!(list.push("four").is_err());
        assert_eq!(list.len(), 2);
    }
}
