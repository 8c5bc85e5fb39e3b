use horde::{
    Document, Driver, Error, Field, FindOptions, Implementation, Instance, MemoryDriver, Meta, Order,
    Template, Value,
};
use mongodb::bson::{Bson, doc};
use pretty_assertions::assert_eq;
use serde::Deserialize;
use std::sync::Arc;

fn user() -> Template {
    Template::document("User")
        .field("name", Field::string().storage_key("n"))
        .field("age", Field::integer().storage_key("a"))
        .field("tags", Field::list(Field::string()))
}

async fn seeded(driver: &MemoryDriver, template: Template) -> (Instance, Arc<Implementation>) {
    let instance = Instance::builder()
        .driver(driver.clone())
        .template(template)
        .build()
        .unwrap();
    let user = instance.retrieve_document("User").unwrap();

    for (name, age) in [("Ann", 31), ("Bob", 25), ("Carl", 40), ("Dana", 25)] {
        Document::new(&user, doc! { "name": name, "age": age, "tags": [name.to_lowercase()] })
            .unwrap()
            .commit()
            .await
            .unwrap();
    }

    (instance, user)
}

fn names(documents: &[Document]) -> Vec<String> {
    documents
        .iter()
        .map(|document| document.get("name").unwrap().as_str().unwrap().to_owned())
        .collect()
}

#[tokio::test]
async fn filters_use_logical_names() {
    let driver = MemoryDriver::new();
    let (_instance, user) = seeded(&driver, user()).await;

    let found = user.find(doc! { "age": { "$gte": 30 } }).await.unwrap();
    assert_eq!(names(&found), ["Ann", "Carl"]);

    let found = user
        .find(doc! { "$or": [{ "name": "Bob" }, { "tags": "dana" }] })
        .await
        .unwrap();
    assert_eq!(names(&found), ["Bob", "Dana"]);

    assert_eq!(user.count(doc! { "age": 25 }).await.unwrap(), 2);
    assert_eq!(user.count(doc! { "name": "Zoe" }).await.unwrap(), 0);
}

#[tokio::test]
async fn sort_skip_and_limit() {
    let driver = MemoryDriver::new();
    let (_instance, user) = seeded(&driver, user()).await;

    let options = FindOptions::default()
        .sort_by("age", Order::Desc)
        .sort_by("name", Order::Asc)
        .skip(1)
        .limit(2);
    let found = user.find_with(doc! {}, options).await.unwrap();

    assert_eq!(names(&found), ["Ann", "Bob"]);
}

#[tokio::test]
async fn projections_load_partially() {
    let driver = MemoryDriver::new();
    let (_instance, user) = seeded(&driver, user()).await;

    let options = FindOptions::default().projection(doc! { "name": 1 });
    let mut found = user.find_with(doc! { "name": "Ann" }, options).await.unwrap();
    let mut ann = found.remove(0);

    assert!(ann.data().is_partial());
    assert!(ann.data().is_loaded("name"));
    assert!(!ann.data().is_loaded("age"));
    assert!(ann.pk().is_some());
    assert!(matches!(ann.get("age"), Err(Error::FieldNotLoaded(_))));

    ann.set("name", "Anna").unwrap();
    ann.commit().await.unwrap();

    let stored = user.find_one(doc! { "name": "Anna" }).await.unwrap().unwrap();
    assert_eq!(stored.get("age").unwrap(), &Value::from(31));
}

#[tokio::test]
async fn find_by_pk_accepts_hex_strings() {
    let driver = MemoryDriver::new();
    let (_instance, user) = seeded(&driver, user()).await;

    let bob = user.find_one(doc! { "name": "Bob" }).await.unwrap().unwrap();
    let Some(Bson::ObjectId(id)) = bob.pk().cloned() else {
        panic!("expected an object id");
    };

    let found = user.find_by_pk(id.to_hex()).await.unwrap().unwrap();
    assert_eq!(found, bob);

    assert!(user.find_by_pk("not an id").await.unwrap_err().is_validation());
}

#[tokio::test]
async fn dump_round_trips_through_update() {
    let driver = MemoryDriver::new();
    let (_instance, user) = seeded(&driver, user()).await;

    let mut ann = user.find_one(doc! { "name": "Ann" }).await.unwrap().unwrap();
    let dumped = ann.dump().unwrap();
    assert_eq!(dumped.get_str("name").unwrap(), "Ann");
    assert_eq!(dumped.get_i32("age").unwrap(), 31);
    assert!(dumped.contains_key("id"));

    ann.update(doc! { "age": 32, "tags": ["a", "b"] }).unwrap();
    assert_eq!(ann.data().modified_fields(), ["age", "tags"]);

    let err = ann.update(doc! { "id": "5f0000000000000000000000" }).unwrap_err();
    assert_eq!(
        err.as_validation().unwrap().field("_schema").unwrap().as_list(),
        Some(&["Unknown field name id.".to_owned()][..])
    );
}

#[tokio::test]
async fn list_mutations_are_tracked() {
    let driver = MemoryDriver::new();
    let (_instance, user) = seeded(&driver, user()).await;

    let mut ann = user.find_one(doc! { "name": "Ann" }).await.unwrap().unwrap();
    ann.list_mut("tags").unwrap().unwrap().push("admin").unwrap();

    assert!(ann.is_modified());
    assert_eq!(
        ann.to_storage_update().unwrap(),
        Some(doc! { "$set": { "tags": ["ann", "admin"] } })
    );
    ann.commit().await.unwrap();

    let stored = user.find_one(doc! { "tags": "admin" }).await.unwrap().unwrap();
    assert_eq!(stored, ann);
}

#[tokio::test]
async fn strict_documents_reject_unknown_stored_keys() {
    let driver = MemoryDriver::new();
    let (_instance, user) = seeded(&driver, user()).await;
    driver
        .insert_one("user", doc! { "n": "Eve", "legacy": true })
        .await
        .unwrap();

    let err = user.find_one(doc! { "name": "Eve" }).await.unwrap_err();
    assert!(matches!(err, Error::UnknownFieldInDb(_)));
}

#[tokio::test]
async fn lenient_documents_keep_unknown_stored_keys() {
    let driver = MemoryDriver::new();
    let (_instance, user) = seeded(&driver, user().meta(Meta::new().strict(false))).await;
    driver
        .insert_one("user", doc! { "n": "Eve", "legacy": true })
        .await
        .unwrap();

    let mut eve = user.find_one(doc! { "name": "Eve" }).await.unwrap().unwrap();
    assert_eq!(eve.data().additional_value("legacy"), Some(&Bson::Boolean(true)));

    eve.set("age", 20).unwrap();
    eve.commit().await.unwrap();

    let stored = driver.dump("user").pop().unwrap();
    assert!(stored.get_bool("legacy").unwrap());
    assert_eq!(stored.get_i32("a").unwrap(), 20);
}

#[tokio::test]
async fn documents_convert_into_structs() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        n: String,
        a: i32,
        tags: Vec<String>,
    }

    let driver = MemoryDriver::new();
    let (_instance, user) = seeded(&driver, user()).await;

    let carl = user.find_one(doc! { "name": "Carl" }).await.unwrap().unwrap();

    assert_eq!(
        carl.to_struct::<Row>().unwrap(),
        Row {
            n: "Carl".into(),
            a: 40,
            tags: vec!["carl".into()],
        }
    );
}
