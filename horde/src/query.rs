use crate::{
    Implementation, Schema,
    builder::{CLS_KEY, ID_KEY},
};
use mongodb::bson::{self, Bson, doc};
use std::sync::Arc;
use tracing::trace;

/// Rewrites logical field names, dotted paths included, into storage keys.
///
/// Operators and unknown names are kept as is. Values are rewritten against
/// the schema the key leads to, so conditions on embedded documents follow
/// their own storage keys.
pub fn map_query(query: &bson::Document, schema: &Arc<Schema>) -> bson::Document {
    query
        .iter()
        .map(|(key, value)| {
            let (key, schema) = map_path(key, schema);
            let value = map_value(value, &schema);
            (key, value)
        })
        .collect()
}

fn map_value(value: &Bson, schema: &Arc<Schema>) -> Bson {
    match value {
        Bson::Document(query) => Bson::Document(map_query(query, schema)),
        Bson::Array(items) => Bson::Array(items.iter().map(|item| map_value(item, schema)).collect()),
        other => other.clone(),
    }
}

/// Storage path for `path` and the schema it ends in.
pub(crate) fn map_path(path: &str, schema: &Arc<Schema>) -> (String, Arc<Schema>) {
    let mut schema = Arc::clone(schema);
    let mut mapped = Vec::new();

    for segment in path.split('.') {
        let nested = match schema.field(segment) {
            Some(field) => {
                mapped.push(field.storage_key_or_name().to_owned());
                field.nested_schema()
            }
            None => {
                mapped.push(segment.to_owned());
                None
            }
        };
        if let Some(nested) = nested {
            schema = nested;
        }
    }

    (mapped.join("."), schema)
}

/// Logical path for a storage `path`, the inverse of [`map_path`].
pub(crate) fn unmap_path(path: &str, schema: &Arc<Schema>) -> String {
    let mut schema = Arc::clone(schema);
    let mut unmapped = Vec::new();

    for segment in path.split('.') {
        let nested = match schema.field_by_storage_key(segment) {
            Some((name, field)) => {
                unmapped.push(name.to_owned());
                field.nested_schema()
            }
            None => {
                unmapped.push(segment.to_owned());
                None
            }
        };
        if let Some(nested) = nested {
            schema = nested;
        }
    }

    unmapped.join(".")
}

/// Maps the keys of a sort or projection document, leaving values untouched.
pub(crate) fn map_keys(document: &bson::Document, schema: &Arc<Schema>) -> bson::Document {
    document
        .iter()
        .map(|(key, value)| (map_path(key, schema).0, value.clone()))
        .collect()
}

/// Maps `filter` and restricts it to `implementation` and its offspring when
/// the collection is shared with a parent.
pub fn cook_find_filter(implementation: &Implementation, filter: &bson::Document) -> bson::Document {
    let mut cooked = map_query(filter, implementation.schema());

    if implementation.opts().is_child() {
        let mut names = implementation.opts().offspring();
        if names.is_empty() {
            cooked.insert(CLS_KEY, implementation.name());
        } else {
            names.push(implementation.name().to_owned());
            cooked.insert(CLS_KEY, doc! { "$in": names });
        }
    }

    trace!(document = implementation.name(), filter = %cooked, "cooked find filter");

    cooked
}

pub(crate) fn by_pk(pk: Bson) -> bson::Document {
    doc! { ID_KEY: pk }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Field, Instance, MemoryDriver, Template};
    use pretty_assertions::assert_eq;

    fn instance() -> Instance {
        Instance::builder()
            .driver(MemoryDriver::new())
            .template(
                Template::embedded("Address")
                    .field("city", Field::string().storage_key("c"))
                    .field("zip", Field::string()),
            )
            .template(
                Template::document("Person")
                    .field("name", Field::string().storage_key("n"))
                    .field("address", Field::embedded("Address").storage_key("addr"))
                    .field("previous", Field::list(Field::embedded("Address")).storage_key("prev"))
                    .field("tags", Field::list(Field::string())),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn keys_are_mapped_through_nested_schemas() {
        let instance = instance();
        let person = instance.retrieve_document("Person").unwrap();

        let query = doc! {
            "id": 1,
            "name": { "$in": ["a", "b"] },
            "address.city": "Paris",
            "previous": { "$elemMatch": { "city": "Lyon", "zip": "69000" } },
            "$or": [{ "name": "c" }, { "tags": "x" }],
            "unknown.path": true,
        };

        assert_eq!(
            map_query(&query, person.schema()),
            doc! {
                "_id": 1,
                "n": { "$in": ["a", "b"] },
                "addr.c": "Paris",
                "prev": { "$elemMatch": { "c": "Lyon", "zip": "69000" } },
                "$or": [{ "n": "c" }, { "tags": "x" }],
                "unknown.path": true,
            }
        );
    }

    #[test]
    fn storage_paths_unmap() {
        let instance = instance();
        let person = instance.retrieve_document("Person").unwrap();

        assert_eq!(unmap_path("addr.c", person.schema()), "address.city");
        assert_eq!(unmap_path("_id", person.schema()), "id");
        assert_eq!(map_keys(&doc! { "name": -1 }, person.schema()), doc! { "n": -1 });
    }

    #[test]
    fn child_filters_are_scoped() {
        let instance = Instance::builder()
            .template(Template::document("Animal").meta(crate::Meta::new().allow_inheritance(true)))
            .template(Template::document("Dog").inherits("Animal").meta(crate::Meta::new().allow_inheritance(true)))
            .template(Template::document("Puppy").inherits("Dog"))
            .build()
            .unwrap();

        let animal = instance.retrieve_document("Animal").unwrap();
        let dog = instance.retrieve_document("Dog").unwrap();
        let puppy = instance.retrieve_document("Puppy").unwrap();

        assert_eq!(cook_find_filter(&animal, &doc! {}), doc! {});
        assert_eq!(
            cook_find_filter(&dog, &doc! {}),
            doc! { "_cls": { "$in": ["Puppy", "Dog"] } }
        );
        assert_eq!(cook_find_filter(&puppy, &doc! {}), doc! { "_cls": "Puppy" });
    }
}
