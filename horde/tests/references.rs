use horde::{Document, Error, Field, Implementation, Instance, MemoryDriver, Meta, Template};
use mongodb::bson::{Bson, doc, oid::ObjectId};
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Blog {
    instance: Instance,
    driver: MemoryDriver,
    user: Arc<Implementation>,
    post: Arc<Implementation>,
}

fn blog() -> Blog {
    let driver = MemoryDriver::new();
    let instance = Instance::builder()
        .driver(driver.clone())
        .template(
            Template::document("User")
                .field("name", Field::string())
                .meta(Meta::new().allow_inheritance(true)),
        )
        .template(
            Template::document("Admin")
                .inherits("User")
                .field("level", Field::integer()),
        )
        .template(
            Template::document("Post")
                .field("author", Field::reference("User"))
                .field("about", Field::generic_reference().allow_none()),
        )
        .build()
        .unwrap();
    let user = instance.retrieve_document("User").unwrap();
    let post = instance.retrieve_document("Post").unwrap();

    Blog {
        instance,
        driver,
        user,
        post,
    }
}

async fn author(blog: &Blog, name: &str) -> Document {
    let mut author = Document::new(&blog.user, doc! { "name": name }).unwrap();
    author.commit().await.unwrap();
    author
}

#[tokio::test]
async fn references_fetch_their_document() {
    let blog = blog();
    let ann = author(&blog, "Ann").await;

    let mut post = Document::new(&blog.post, doc! {}).unwrap();
    post.set("author", ann.to_reference().unwrap()).unwrap();
    post.commit().await.unwrap();

    let stored = blog.driver.dump("post").remove(0);
    assert_eq!(stored.get("author"), ann.pk());

    let mut loaded = blog.post.find_one(doc! {}).await.unwrap().unwrap();
    let reference = loaded.reference_mut("author").unwrap().unwrap();
    assert!(reference.cached().is_none());
    assert!(reference.exists().await.unwrap());

    let fetched = reference.fetch().await.unwrap();
    assert_eq!(fetched, &ann);
    assert_eq!(fetched.get("name").unwrap().as_str(), Some("Ann"));
    assert!(reference.cached().is_some());
}

#[tokio::test]
async fn dangling_references_fail_to_fetch() {
    let blog = blog();

    let mut post = Document::new(&blog.post, doc! { "author": ObjectId::new() }).unwrap();
    let reference = post.reference_mut("author").unwrap().unwrap();

    assert!(!reference.exists().await.unwrap());
    let err = reference.fetch().await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn references_serialize_as_hex_keys() {
    let blog = blog();
    let ann = author(&blog, "Ann").await;
    let Some(Bson::ObjectId(id)) = ann.pk().cloned() else {
        panic!("expected an object id");
    };

    let post = Document::new(&blog.post, doc! { "author": id.to_hex() }).unwrap();

    assert_eq!(post.dump().unwrap().get_str("author").unwrap(), id.to_hex());
    assert_eq!(post.to_storage().get("author"), Some(&Bson::ObjectId(id)));
}

#[tokio::test]
async fn offspring_references_are_accepted() {
    let blog = blog();
    let admin = blog.instance.retrieve_document("Admin").unwrap();

    let mut root = Document::new(&admin, doc! { "name": "Root", "level": 9 }).unwrap();
    root.commit().await.unwrap();

    let mut post = Document::new(&blog.post, doc! {}).unwrap();
    post.set("author", root.to_reference().unwrap()).unwrap();
    post.commit().await.unwrap();

    let mut loaded = blog.post.find_one(doc! {}).await.unwrap().unwrap();
    let fetched = loaded.reference_mut("author").unwrap().unwrap().fetch().await.unwrap();
    assert_eq!(fetched.implementation().name(), "Admin");
}

#[tokio::test]
async fn generic_references_carry_their_class() {
    let blog = blog();
    let ann = author(&blog, "Ann").await;
    let Some(Bson::ObjectId(id)) = ann.pk().cloned() else {
        panic!("expected an object id");
    };

    let mut post = Document::new(
        &blog.post,
        doc! { "about": { "id": id.to_hex(), "cls": "User" } },
    )
    .unwrap();

    assert_eq!(
        post.dump().unwrap().get_document("about").unwrap(),
        &doc! { "id": id.to_hex(), "cls": "User" }
    );
    assert_eq!(
        post.to_storage().get_document("about").unwrap(),
        &doc! { "_id": id, "_cls": "User" }
    );

    post.commit().await.unwrap();
    let mut loaded = blog.post.find_one(doc! {}).await.unwrap().unwrap();
    let fetched = loaded.reference_mut("about").unwrap().unwrap().fetch().await.unwrap();
    assert_eq!(fetched, &ann);

    let err = Document::new(&blog.post, doc! { "about": { "id": id.to_hex() } }).unwrap_err();
    assert_eq!(
        err.as_validation().unwrap().field("about").unwrap().as_list(),
        Some(&["Generic reference must have `id` and `cls` fields.".to_owned()][..])
    );

    let err = Document::new(&blog.post, doc! { "about": { "id": id.to_hex(), "cls": "Ghost" } }).unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn only_stored_documents_can_be_referenced() {
    let blog = blog();

    let draft = Document::new(&blog.user, doc! { "name": "Draft" }).unwrap();
    let err = draft.to_reference().unwrap_err();

    assert_eq!(
        err.as_validation().unwrap().messages().as_list(),
        Some(&["Cannot reference a document that has not been created yet.".to_owned()][..])
    );
}

#[tokio::test]
async fn null_references_cannot_be_fetched() {
    let blog = blog();

    let mut post = Document::new(&blog.post, doc! { "about": Bson::Null }).unwrap();

    assert!(post.get("about").unwrap().is_null());
    assert!(post.reference_mut("about").unwrap().is_none());
    assert!(matches!(
        Document::new(&blog.post, doc! { "author": Bson::Null }),
        Err(Error::Validation(_))
    ));
}
