use super::{Driver, FindOptions};
use crate::{
    Index,
    error::StorageError,
    executor::{Executor, Joined},
};
use async_trait::async_trait;
use dashmap::DashMap;
use mongodb::bson::{self, Bson, oid::ObjectId};
use std::{cmp::Ordering, fmt, sync::Arc};
use tracing::trace;

const ID_INDEX: &str = "_id_";

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<bson::Document>,
    indexes: Vec<Index>,
}

/// In-process store understanding the subset of the query language the mapper emits.
///
/// Clones share the same data.
#[derive(Clone)]
pub struct MemoryDriver {
    collections: Arc<DashMap<String, Collection>>,
    executor: Arc<dyn Executor>,
    database: Arc<str>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(DashMap::new()),
            executor: Arc::new(Joined),
            database: Arc::from("horde"),
        }
    }

    pub fn with_executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    /// Raw stored documents of `collection`, in insertion order.
    pub fn dump(&self, collection: &str) -> Vec<bson::Document> {
        self.collections
            .get(collection)
            .map(|collection| collection.documents.clone())
            .unwrap_or_default()
    }

    /// Names of the indexes created on `collection`.
    pub fn index_names(&self, collection: &str) -> Vec<String> {
        self.collections
            .get(collection)
            .map(|collection| collection.indexes.iter().map(Index::name).collect())
            .unwrap_or_default()
    }

    pub fn drop_collection(&self, collection: &str) {
        self.collections.remove(collection);
    }

    fn duplicate_key(&self, collection: &str, index: &str, key: &bson::Document) -> StorageError {
        StorageError::DuplicateKey {
            message: format!(
                "E11000 duplicate key error collection: {}.{collection} index: {index} dup key: {key}",
                self.database
            ),
        }
    }

    /// Rejects `candidate` when it collides with a stored document other than `skip`.
    fn check_unique(
        &self,
        name: &str,
        collection: &Collection,
        candidate: &bson::Document,
        skip: Option<usize>,
    ) -> Result<(), StorageError> {
        let others = || {
            collection
                .documents
                .iter()
                .enumerate()
                .filter(move |(position, _)| Some(*position) != skip)
                .map(|(_, document)| document)
        };

        if let Some(id) = candidate.get("_id") {
            if others().any(|document| document.get("_id") == Some(id)) {
                let key = bson::doc! { "_id": id.clone() };
                return Err(self.duplicate_key(name, ID_INDEX, &key));
            }
        }

        for index in collection.indexes.iter().filter(|index| index.is_unique()) {
            let Some(keys) = index_keys(candidate, index) else {
                continue;
            };
            let collides = others()
                .filter_map(|document| index_keys(document, index))
                .any(|existing| existing.iter().any(|key| keys.contains(key)));

            if collides {
                let key = index
                    .keys()
                    .iter()
                    .zip(&keys[0])
                    .map(|((path, _), value)| (path.clone(), value.clone()))
                    .collect();
                return Err(self.duplicate_key(name, &index.name(), &key));
            }
        }

        Ok(())
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut collections: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        collections.sort();

        f.debug_struct("MemoryDriver")
            .field("collections", &collections)
            .field("executor", &self.executor)
            .finish()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    async fn insert_one(&self, collection: &str, mut document: bson::Document) -> Result<Bson, StorageError> {
        let mut entry = self.collections.entry(collection.to_owned()).or_default();

        if !document.contains_key("_id") {
            let mut with_id = bson::doc! { "_id": ObjectId::new() };
            with_id.extend(document);
            document = with_id;
        }
        self.check_unique(collection, &entry, &document, None)?;

        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        entry.documents.push(document);

        trace!(collection, id = %id, "inserted");

        Ok(id)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: bson::Document,
        update: bson::Document,
    ) -> Result<(u64, u64), StorageError> {
        let Some(mut entry) = self.collections.get_mut(collection) else {
            return Ok((0, 0));
        };

        let mut position = None;
        for (index, document) in entry.documents.iter().enumerate() {
            if matches(document, &filter)? {
                position = Some(index);
                break;
            }
        }
        let Some(position) = position else {
            return Ok((0, 0));
        };

        let current = &entry.documents[position];
        let updated = apply_update(current, &update)?;
        if updated.get("_id") != current.get("_id") {
            return Err(StorageError::Other(
                "the `_id` field cannot be modified".into(),
            ));
        }
        let modified = u64::from(updated != *current);
        self.check_unique(collection, &entry, &updated, Some(position))?;
        entry.documents[position] = updated;

        Ok((1, modified))
    }

    async fn delete_one(&self, collection: &str, filter: bson::Document) -> Result<u64, StorageError> {
        let Some(mut entry) = self.collections.get_mut(collection) else {
            return Ok(0);
        };

        for index in 0..entry.documents.len() {
            if matches(&entry.documents[index], &filter)? {
                entry.documents.remove(index);
                return Ok(1);
            }
        }

        Ok(0)
    }

    async fn find(
        &self,
        collection: &str,
        filter: bson::Document,
        options: FindOptions,
    ) -> Result<Vec<bson::Document>, StorageError> {
        let Some(entry) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        for document in &entry.documents {
            if matches(document, &filter)? {
                found.push(document.clone());
            }
        }
        drop(entry);

        if let Some(sort) = &options.sort {
            found.sort_by(|a, b| compare_sorted(a, b, sort));
        }

        let skip = usize::try_from(options.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = match options.limit {
            Some(limit) if limit != 0 => usize::try_from(limit.unsigned_abs()).unwrap_or(usize::MAX),
            _ => usize::MAX,
        };

        Ok(found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|document| match &options.projection {
                Some(projection) => project(document, projection),
                None => document,
            })
            .collect())
    }

    async fn count(&self, collection: &str, filter: bson::Document) -> Result<u64, StorageError> {
        let Some(entry) = self.collections.get(collection) else {
            return Ok(0);
        };

        let mut count = 0;
        for document in &entry.documents {
            if matches(document, &filter)? {
                count += 1;
            }
        }

        Ok(count)
    }

    async fn create_indexes(&self, collection: &str, indexes: &[Index]) -> Result<(), StorageError> {
        let mut entry = self.collections.entry(collection.to_owned()).or_default();

        for index in indexes {
            let name = index.name();
            if !entry.indexes.iter().any(|existing| existing.name() == name) {
                entry.indexes.push(index.clone());
            }
        }

        Ok(())
    }
}

/// Every key tuple a document contributes to `index`, `None` when a sparse
/// index skips it. Array values contribute one tuple per element.
fn index_keys(document: &bson::Document, index: &Index) -> Option<Vec<Vec<Bson>>> {
    let mut present = false;
    let mut tuples: Vec<Vec<Bson>> = vec![Vec::new()];

    for (path, _) in index.keys() {
        let found = lookup(document, path);
        present |= !found.is_empty();

        let mut leaves: Vec<Bson> = found
            .into_iter()
            .filter(|value| !matches!(value, Bson::Array(_)))
            .cloned()
            .collect();
        if leaves.is_empty() {
            leaves.push(Bson::Null);
        }

        tuples = tuples
            .into_iter()
            .flat_map(|tuple| {
                leaves.iter().map(move |leaf| {
                    let mut tuple = tuple.clone();
                    tuple.push(leaf.clone());
                    tuple
                })
            })
            .collect();
    }

    (present || !index.is_sparse()).then_some(tuples)
}

/// Values reachable through a dotted `path`, arrays being traversed and
/// also expanded at the end of the path.
fn lookup<'a>(document: &'a bson::Document, path: &str) -> Vec<&'a Bson> {
    let mut found = Vec::new();
    let mut segments = path.split('.');
    if let Some(value) = segments.next().and_then(|head| document.get(head)) {
        let rest: Vec<&str> = segments.collect();
        collect(value, &rest, &mut found);
    }
    found
}

fn collect<'a>(value: &'a Bson, segments: &[&str], found: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        found.push(value);
        if let Bson::Array(items) = value {
            found.extend(items.iter());
        }
        return;
    };

    match value {
        Bson::Document(document) => {
            if let Some(value) = document.get(*head) {
                collect(value, rest, found);
            }
        }
        Bson::Array(items) => {
            if let Some(item) = head.parse::<usize>().ok().and_then(|index| items.get(index)) {
                collect(item, rest, found);
            }
            for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                collect(item, segments, found);
            }
        }
        _ => {}
    }
}

fn matches(document: &bson::Document, filter: &bson::Document) -> Result<bool, StorageError> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => all_of(document, condition)?.iter().all(|matched| *matched),
            "$or" => all_of(document, condition)?.iter().any(|matched| *matched),
            "$nor" => !all_of(document, condition)?.iter().any(|matched| *matched),
            operator if operator.starts_with('$') => {
                return Err(unsupported(operator));
            }
            path => matches_condition(&lookup(document, path), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn all_of(document: &bson::Document, filters: &Bson) -> Result<Vec<bool>, StorageError> {
    let Bson::Array(filters) = filters else {
        return Err(StorageError::Other("logical operators expect an array".into()));
    };

    filters
        .iter()
        .map(|filter| match filter {
            Bson::Document(filter) => matches(document, filter),
            _ => Err(StorageError::Other(
                "logical operators expect an array of documents".into(),
            )),
        })
        .collect()
}

fn is_operator_document(condition: &Bson) -> bool {
    matches!(condition, Bson::Document(document) if document.keys().next().is_some_and(|key| key.starts_with('$')))
}

fn matches_condition(values: &[&Bson], condition: &Bson) -> Result<bool, StorageError> {
    let Bson::Document(operators) = condition else {
        return Ok(equals_any(values, condition));
    };
    if !is_operator_document(condition) {
        return Ok(equals_any(values, condition));
    }

    for (operator, argument) in operators {
        let matched = match operator.as_str() {
            "$eq" => equals_any(values, argument),
            "$ne" => !equals_any(values, argument),
            "$gt" => compares(values, argument, |ordering| ordering == Ordering::Greater),
            "$gte" => compares(values, argument, |ordering| ordering != Ordering::Less),
            "$lt" => compares(values, argument, |ordering| ordering == Ordering::Less),
            "$lte" => compares(values, argument, |ordering| ordering != Ordering::Greater),
            "$in" => choices(argument)?
                .iter()
                .any(|choice| equals_any(values, choice)),
            "$nin" => !choices(argument)?
                .iter()
                .any(|choice| equals_any(values, choice)),
            "$exists" => truthy(argument) == !values.is_empty(),
            "$not" => !matches_condition(values, argument)?,
            "$size" => values.iter().any(|value| match (value, integer(argument)) {
                (Bson::Array(items), Some(size)) => i64::try_from(items.len()) == Ok(size),
                _ => false,
            }),
            other => return Err(unsupported(other)),
        };
        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn unsupported(operator: &str) -> StorageError {
    StorageError::Other(format!("unsupported query operator `{operator}`"))
}

fn choices(argument: &Bson) -> Result<&[Bson], StorageError> {
    match argument {
        Bson::Array(choices) => Ok(choices),
        _ => Err(StorageError::Other("`$in` and `$nin` expect an array".into())),
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(value) => *value,
        Bson::Null => false,
        other => number(other).is_none_or(|n| n != 0.0),
    }
}

fn equals_any(values: &[&Bson], expected: &Bson) -> bool {
    if values.is_empty() {
        return *expected == Bson::Null;
    }
    values
        .iter()
        .any(|value| compare(value, expected) == Some(Ordering::Equal))
}

fn compares(values: &[&Bson], argument: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    values
        .iter()
        .filter_map(|value| compare(value, argument))
        .any(accept)
}

fn integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(value) => Some(i64::from(*value)),
        Bson::Int64(value) => Some(*value),
        _ => None,
    }
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(f64::from(*value)),
        #[allow(clippy::cast_precision_loss)]
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

/// Ordering between comparable values, `None` across type brackets.
fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (number(a), number(b)) {
        return a.partial_cmp(&b);
    }

    match (a, b) {
        (Bson::String(a), Bson::String(b)) => Some(a.cmp(b)),
        (Bson::Boolean(a), Bson::Boolean(b)) => Some(a.cmp(b)),
        (Bson::DateTime(a), Bson::DateTime(b)) => Some(a.cmp(b)),
        (Bson::ObjectId(a), Bson::ObjectId(b)) => Some(a.bytes().cmp(&b.bytes())),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::ObjectId(_)) => 5,
        Some(Bson::Boolean(_)) => 6,
        Some(Bson::DateTime(_)) => 7,
        Some(_) => 8,
    }
}

fn compare_sorted(a: &bson::Document, b: &bson::Document, sort: &bson::Document) -> Ordering {
    for (path, direction) in sort {
        let left = lookup(a, path).first().copied();
        let right = lookup(b, path).first().copied();

        let ordering = type_rank(left).cmp(&type_rank(right)).then_with(|| match (left, right) {
            (Some(left), Some(right)) => compare(left, right).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        });
        let ordering = if number(direction).is_some_and(|direction| direction < 0.0) {
            ordering.reverse()
        } else {
            ordering
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Applies an inclusion or exclusion projection on top-level keys.
fn project(document: bson::Document, projection: &bson::Document) -> bson::Document {
    let root = |key: &str| key.split('.').next().unwrap_or(key).to_owned();
    let inclusive = projection
        .iter()
        .any(|(key, value)| key != "_id" && truthy(value));
    let keep_id = projection.get("_id").is_none_or(truthy);

    document
        .into_iter()
        .filter(|(key, _)| {
            if key == "_id" {
                return keep_id;
            }
            let listed = projection
                .iter()
                .any(|(path, value)| root(path) == *key && truthy(value) == inclusive);
            listed == inclusive
        })
        .collect()
}

fn apply_update(current: &bson::Document, update: &bson::Document) -> Result<bson::Document, StorageError> {
    if !update.keys().any(|key| key.starts_with('$')) {
        let mut replaced = bson::Document::new();
        if let Some(id) = current.get("_id") {
            replaced.insert("_id", id.clone());
        }
        for (key, value) in update {
            if key != "_id" {
                replaced.insert(key.clone(), value.clone());
            }
        }
        return Ok(replaced);
    }

    let mut document = current.clone();
    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(StorageError::Other(format!("`{operator}` expects a document")));
        };
        match operator.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(&mut document, path, value.clone())?;
                }
            }
            "$unset" => {
                for (path, _) in fields {
                    unset_path(&mut document, path);
                }
            }
            "$inc" => {
                for (path, amount) in fields {
                    let current = lookup(&document, path).first().copied().cloned().unwrap_or(Bson::Int32(0));
                    set_path(&mut document, path, increment(&current, amount)?)?;
                }
            }
            other => return Err(unsupported(other)),
        }
    }

    Ok(document)
}

fn increment(current: &Bson, amount: &Bson) -> Result<Bson, StorageError> {
    if let (Some(a), Some(b)) = (integer(current), integer(amount)) {
        let sum = a.saturating_add(b);
        return Ok(match (current, amount) {
            (Bson::Int32(_), Bson::Int32(_)) => i32::try_from(sum).map_or(Bson::Int64(sum), Bson::Int32),
            _ => Bson::Int64(sum),
        });
    }

    match (number(current), number(amount)) {
        (Some(a), Some(b)) => Ok(Bson::Double(a + b)),
        _ => Err(StorageError::Other("cannot increment a non-numeric value".into())),
    }
}

fn set_path(document: &mut bson::Document, path: &str, value: Bson) -> Result<(), StorageError> {
    let Some((head, rest)) = path.split_once('.') else {
        document.insert(path, value);
        return Ok(());
    };

    if !document.contains_key(head) {
        document.insert(head, bson::Document::new());
    }
    match document.get_mut(head) {
        Some(target) => set_nested(target, rest, value),
        None => Ok(()),
    }
}

fn set_nested(target: &mut Bson, path: &str, value: Bson) -> Result<(), StorageError> {
    match target {
        Bson::Document(document) => set_path(document, path, value),
        Bson::Array(items) => {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (path, None),
            };
            let item = head
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get_mut(index))
                .ok_or_else(|| StorageError::Other(format!("cannot set `{path}` in an array")))?;
            match rest {
                Some(rest) => set_nested(item, rest, value),
                None => {
                    *item = value;
                    Ok(())
                }
            }
        }
        _ => Err(StorageError::Other(format!(
            "cannot create field `{path}` in a scalar value"
        ))),
    }
}

fn unset_path(document: &mut bson::Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(nested)) => unset_path(nested, rest),
            Some(Bson::Array(items)) => {
                let (index, rest) = match rest.split_once('.') {
                    Some((index, rest)) => (index, Some(rest)),
                    None => (rest, None),
                };
                if let Some(item) = index.parse::<usize>().ok().and_then(|index| items.get_mut(index)) {
                    match (item, rest) {
                        (item, None) => *item = Bson::Null,
                        (Bson::Document(nested), Some(rest)) => unset_path(nested, rest),
                        _ => {}
                    }
                }
            }
            _ => {}
        },
    }
}
