use horde::{
    CommitOptions, Document, Driver, Error, Field, Index, IndexSpec, Instance, MemoryDriver, Messages,
    Meta, Sequential, StorageError, Template, ValidationError, validate,
};
use parking_lot::Mutex;
use mongodb::bson::{doc, oid::ObjectId};
use pretty_assertions::assert_eq;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

fn messages(messages: &[&str]) -> Messages {
    Messages::List(messages.iter().map(|message| (*message).to_owned()).collect())
}

async fn instance(templates: Vec<Template>) -> Instance {
    let instance = Instance::builder().driver(MemoryDriver::new()).build().unwrap();
    instance.register_all(templates).unwrap();
    instance.ensure_indexes().await.unwrap();
    instance
}

#[tokio::test]
async fn unique_violation_is_reported_on_the_field() {
    let instance = instance(vec![
        Template::document("User")
            .field("email", Field::email().unique())
            .field("nick", Field::string().unique().error_message("unique", "Nick already taken.")),
    ])
    .await;
    let user = instance.retrieve_document("User").unwrap();

    Document::new(&user, doc! { "email": "ann@example.com", "nick": "ann" })
        .unwrap()
        .commit()
        .await
        .unwrap();

    let err = Document::new(&user, doc! { "email": "ann@example.com" })
        .unwrap()
        .commit()
        .await
        .unwrap_err();
    let err = err.as_validation().unwrap();
    assert_eq!(err.field("email"), Some(&messages(&["Field value must be unique."])));
    assert_eq!(err.field("nick"), None);

    let err = Document::new(&user, doc! { "email": "bob@example.com", "nick": "ann" })
        .unwrap()
        .commit()
        .await
        .unwrap_err();
    assert_eq!(
        err.as_validation().unwrap().field("nick"),
        Some(&messages(&["Nick already taken."]))
    );
}

#[tokio::test]
async fn compound_unique_violation_names_every_field() {
    let instance = instance(vec![
        Template::document("Person")
            .field("first", Field::string())
            .field("last", Field::string())
            .meta(Meta::new().index(IndexSpec::structured(["first", "last"], doc! { "unique": true }))),
    ])
    .await;
    let person = instance.retrieve_document("Person").unwrap();

    Document::new(&person, doc! { "first": "Ann", "last": "Lee" })
        .unwrap()
        .commit()
        .await
        .unwrap();
    Document::new(&person, doc! { "first": "Ann", "last": "Kim" })
        .unwrap()
        .commit()
        .await
        .unwrap();

    let err = Document::new(&person, doc! { "first": "Ann", "last": "Lee" })
        .unwrap()
        .commit()
        .await
        .unwrap_err();
    let err = err.as_validation().unwrap();

    let expected = messages(&["Values of fields [first, last] must be unique together."]);
    assert_eq!(err.field("first"), Some(&expected));
    assert_eq!(err.field("last"), Some(&expected));
}

#[tokio::test]
async fn unique_violation_on_update() {
    let instance = instance(vec![Template::document("User").field("email", Field::email().unique())]).await;
    let user = instance.retrieve_document("User").unwrap();

    Document::new(&user, doc! { "email": "ann@example.com" })
        .unwrap()
        .commit()
        .await
        .unwrap();
    let mut bob = Document::new(&user, doc! { "email": "bob@example.com" }).unwrap();
    bob.commit().await.unwrap();

    bob.set("email", "ann@example.com").unwrap();
    let err = bob.commit().await.unwrap_err();

    assert!(err.as_validation().unwrap().field("email").is_some());
}

#[tokio::test]
async fn required_fields_are_checked_before_writing() {
    let instance = instance(vec![Template::document("User").field("name", Field::string().required())]).await;
    let user = instance.retrieve_document("User").unwrap();

    let mut empty = Document::new(&user, doc! {}).unwrap();
    let err = empty.commit().await.unwrap_err();
    assert_eq!(
        err.as_validation().unwrap().field("name"),
        Some(&messages(&["Missing data for required field."]))
    );
    assert!(!empty.is_created());

    let mut document = Document::new(&user, doc! { "name": "Ann" }).unwrap();
    document.commit().await.unwrap();
    document.delete_field("name").unwrap();

    let err = document.commit().await.unwrap_err();
    assert_eq!(
        err.as_validation().unwrap().field("name"),
        Some(&messages(&["Missing data for required field."]))
    );
}

#[tokio::test]
async fn field_validators_run_on_input() {
    let instance = instance(vec![
        Template::document("User")
            .field("age", Field::integer().validator(validate::range(Some(0.0), None)))
            .field("email", Field::email()),
    ])
    .await;
    let user = instance.retrieve_document("User").unwrap();

    let err = Document::new(&user, doc! { "age": -1, "email": "nope" }).unwrap_err();
    let err = err.as_validation().unwrap();

    assert_eq!(err.field("age"), Some(&messages(&["Must be greater than or equal to 0."])));
    assert_eq!(err.field("email"), Some(&messages(&["Not a valid email address."])));

    let mut document = Document::new(&user, doc! { "age": 3 }).unwrap();
    assert!(document.set("age", -4).unwrap_err().is_validation());
}

#[tokio::test]
async fn missing_reference_fails_io_validation() {
    let instance = instance(vec![
        Template::document("User").field("name", Field::string()),
        Template::document("Post").field("author", Field::reference("User")),
    ])
    .await;
    let user = instance.retrieve_document("User").unwrap();
    let post = instance.retrieve_document("Post").unwrap();

    let mut document = Document::new(&post, doc! { "author": ObjectId::new() }).unwrap();
    let err = document.commit().await.unwrap_err();
    assert_eq!(
        err.as_validation().unwrap().field("author"),
        Some(&messages(&["Reference not found for document User."]))
    );
    assert!(!document.is_created());

    let mut author = Document::new(&user, doc! { "name": "Ann" }).unwrap();
    author.commit().await.unwrap();

    document.set("author", author.to_reference().unwrap()).unwrap();
    document.commit().await.unwrap();
    assert!(document.is_created());
}

#[tokio::test]
async fn io_validators_only_see_modified_fields() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let instance = instance(vec![
        Template::document("User")
            .field(
                "name",
                Field::string().io_validator(move |value| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        if value.as_str() == Some("root") {
                            return Err(Error::from(ValidationError::new("Name is reserved.")));
                        }
                        Ok(())
                    }
                }),
            )
            .field("age", Field::integer()),
    ])
    .await;
    let user = instance.retrieve_document("User").unwrap();

    let err = Document::new(&user, doc! { "name": "root" })
        .unwrap()
        .commit()
        .await
        .unwrap_err();
    assert_eq!(
        err.as_validation().unwrap().field("name"),
        Some(&messages(&["Name is reserved."]))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let mut document = Document::new(&user, doc! { "name": "Ann" }).unwrap();
    document.commit().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    document.set("age", 3).unwrap();
    document.commit().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    document.set("age", 4).unwrap();
    document
        .commit_with(CommitOptions::default().io_validate_all(true))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn nested_io_failures_are_keyed_by_position() {
    let instance = instance(vec![
        Template::document("User").field("name", Field::string()),
        Template::document("Team").field("members", Field::list(Field::reference("User"))),
    ])
    .await;
    let user = instance.retrieve_document("User").unwrap();
    let team = instance.retrieve_document("Team").unwrap();

    let mut ann = Document::new(&user, doc! { "name": "Ann" }).unwrap();
    ann.commit().await.unwrap();

    let mut document = Document::new(
        &team,
        doc! { "members": [ann.pk().cloned().unwrap(), ObjectId::new()] },
    )
    .unwrap();
    let err = document.commit().await.unwrap_err();

    let members = err.as_validation().unwrap().field("members").unwrap();
    assert_eq!(members.get("0"), None);
    assert_eq!(
        members.get("1"),
        Some(&messages(&["Reference not found for document User."]))
    );
}

#[tokio::test]
async fn duplicates_on_undeclared_indexes_are_storage_errors() {
    let driver = MemoryDriver::new();
    let instance = Instance::builder()
        .driver(driver.clone())
        .template(Template::document("User").field("email", Field::email()))
        .build()
        .unwrap();
    let user = instance.retrieve_document("User").unwrap();

    let index = Index::parse(&IndexSpec::structured(["email"], doc! { "unique": true }), None).unwrap();
    driver.create_indexes("user", &[index]).await.unwrap();

    Document::new(&user, doc! { "email": "ann@example.com" })
        .unwrap()
        .commit()
        .await
        .unwrap();
    let err = Document::new(&user, doc! { "email": "ann@example.com" })
        .unwrap()
        .commit()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Storage(StorageError::DuplicateKey { .. })));
    assert_eq!(driver.dump("user").len(), 1);
}

#[tokio::test]
async fn sequential_executor_runs_nested_validators_one_at_a_time() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let item_log = Arc::clone(&log);
    let tag_log = Arc::clone(&log);

    let instance = Instance::builder()
        .driver(MemoryDriver::new().with_executor(Sequential))
        .template(
            Template::document("Batch")
                .field(
                    "xs",
                    Field::list(Field::integer().io_validator(move |value| {
                        let log = Arc::clone(&item_log);
                        async move {
                            let n = value.as_i64().unwrap_or_default();
                            log.lock().push(format!("start {n}"));
                            tokio::task::yield_now().await;
                            log.lock().push(format!("end {n}"));
                            Ok(())
                        }
                    })),
                )
                .field(
                    "tag",
                    Field::string()
                        .io_validator({
                            let log = Arc::clone(&tag_log);
                            move |_| {
                                let log = Arc::clone(&log);
                                async move {
                                    log.lock().push("start a".to_owned());
                                    tokio::task::yield_now().await;
                                    log.lock().push("end a".to_owned());
                                    Ok(())
                                }
                            }
                        })
                        .io_validator(move |_| {
                            let log = Arc::clone(&tag_log);
                            async move {
                                log.lock().push("start b".to_owned());
                                tokio::task::yield_now().await;
                                log.lock().push("end b".to_owned());
                                Ok(())
                            }
                        }),
                ),
        )
        .build()
        .unwrap();
    let batch = instance.retrieve_document("Batch").unwrap();

    Document::new(&batch, doc! { "xs": [1, 2], "tag": "t" })
        .unwrap()
        .commit()
        .await
        .unwrap();

    assert_eq!(
        *log.lock(),
        ["start 1", "end 1", "start 2", "end 2", "start a", "end a", "start b", "end b"]
    );
}
