use horde::{Document, Error, Field, Instance, MemoryDriver, Meta, Template};
use mongodb::bson::{Bson, doc};
use pretty_assertions::assert_eq;

fn zoo(driver: &MemoryDriver) -> Instance {
    Instance::builder()
        .driver(driver.clone())
        .template(
            Template::document("Animal")
                .field("name", Field::string().required())
                .meta(Meta::new().allow_inheritance(true)),
        )
        .template(
            Template::document("Dog")
                .inherits("Animal")
                .field("chip", Field::string().unique()),
        )
        .template(
            Template::document("Cat")
                .inherits("Animal")
                .field("chip", Field::string().unique())
                .field("lives", Field::integer().default(9)),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn children_share_the_parent_collection() {
    let driver = MemoryDriver::new();
    let instance = zoo(&driver);
    let dog = instance.retrieve_document("Dog").unwrap();

    assert_eq!(dog.collection_name().unwrap(), "animal");

    let mut rex = Document::new(&dog, doc! { "name": "Rex", "chip": "a1" }).unwrap();
    rex.commit().await.unwrap();

    let stored = driver.dump("animal").remove(0);
    assert_eq!(stored.get_str("_cls").unwrap(), "Dog");
    assert_eq!(rex.dump().unwrap().get_str("cls").unwrap(), "Dog");
}

#[tokio::test]
async fn parent_queries_return_concrete_documents() {
    let driver = MemoryDriver::new();
    let instance = zoo(&driver);
    let animal = instance.retrieve_document("Animal").unwrap();
    let dog = instance.retrieve_document("Dog").unwrap();
    let cat = instance.retrieve_document("Cat").unwrap();

    for (implementation, name) in [(&animal, "Generic"), (&dog, "Rex"), (&cat, "Tom")] {
        Document::new(implementation, doc! { "name": name })
            .unwrap()
            .commit()
            .await
            .unwrap();
    }

    let found = animal.find(doc! {}).await.unwrap();
    let names: Vec<&str> = found
        .iter()
        .map(|document| document.implementation().name())
        .collect();
    assert_eq!(names, ["Animal", "Dog", "Cat"]);
    assert_eq!(found[2].get("lives").unwrap().as_i64(), Some(9));

    assert_eq!(animal.count(doc! {}).await.unwrap(), 3);
    assert_eq!(dog.count(doc! {}).await.unwrap(), 1);

    let cats = cat.find(doc! { "name": "Rex" }).await.unwrap();
    assert!(cats.is_empty());

    let tom = animal.find_one(doc! { "name": "Tom" }).await.unwrap().unwrap();
    assert_eq!(tom.implementation().name(), "Cat");
}

#[tokio::test]
async fn child_unique_fields_are_scoped_by_class() {
    let driver = MemoryDriver::new();
    let instance = zoo(&driver);
    instance.ensure_indexes().await.unwrap();
    let dog = instance.retrieve_document("Dog").unwrap();
    let cat = instance.retrieve_document("Cat").unwrap();

    assert!(driver.index_names("animal").contains(&"chip_1__cls_1".to_owned()));

    Document::new(&dog, doc! { "name": "Rex", "chip": "x" })
        .unwrap()
        .commit()
        .await
        .unwrap();
    Document::new(&cat, doc! { "name": "Tom", "chip": "x" })
        .unwrap()
        .commit()
        .await
        .unwrap();

    let err = Document::new(&dog, doc! { "name": "Max", "chip": "x" })
        .unwrap()
        .commit()
        .await
        .unwrap_err();
    assert!(err.as_validation().unwrap().field("chip").is_some());
}

#[tokio::test]
async fn abstract_documents_cannot_be_instantiated() {
    let driver = MemoryDriver::new();
    let instance = Instance::builder()
        .driver(driver.clone())
        .template(
            Template::document("Timestamped")
                .field("created", Field::datetime())
                .meta(Meta::new().is_abstract(true)),
        )
        .template(
            Template::document("Article")
                .inherits("Timestamped")
                .field("title", Field::string()),
        )
        .build()
        .unwrap();
    let base = instance.retrieve_document("Timestamped").unwrap();
    let article = instance.retrieve_document("Article").unwrap();

    assert!(matches!(
        Document::new(&base, doc! {}),
        Err(Error::AbstractDocument(_))
    ));
    assert!(base.collection_name().is_err());

    assert_eq!(article.collection_name().unwrap(), "article");
    assert!(!article.opts().is_child());

    let mut document = Document::new(
        &article,
        doc! { "title": "Hello", "created": "2024-05-01T10:00:00Z" },
    )
    .unwrap();
    document.commit().await.unwrap();

    let stored = driver.dump("article").remove(0);
    assert!(!stored.contains_key("_cls"));
    assert!(matches!(stored.get("created"), Some(Bson::DateTime(_))));
}

#[test]
fn abstract_ancestors_keep_no_offspring() {
    let instance = Instance::new();
    instance
        .register(Template::embedded("Shape").meta(Meta::new().is_abstract(true)))
        .unwrap();
    let circle = instance
        .register(Template::embedded("Circle").inherits("Shape").field("radius", Field::integer()))
        .unwrap();
    let drawing = instance
        .register(Template::document("Drawing").field("shape", Field::embedded("Shape")))
        .unwrap();

    let shape = instance.retrieve_embedded_document("Shape").unwrap();
    assert!(shape.opts().offspring().is_empty());
    assert!(circle.is_a("Shape"));

    let document = Document::new(&drawing, doc! { "shape": { "cls": "Circle", "radius": 2 } }).unwrap();
    let stored = document.to_storage();
    assert_eq!(
        stored.get_document("shape").unwrap(),
        &doc! { "radius": 2, "_cls": "Circle" }
    );
}

#[test]
fn inheritance_must_be_allowed() {
    let instance = Instance::new();
    instance.register(Template::document("Sealed")).unwrap();

    let err = instance
        .register(Template::document("Child").inherits("Sealed"))
        .unwrap_err();

    assert!(matches!(err, Error::DocumentDefinition(_)));
}

#[tokio::test]
async fn embedded_documents_are_polymorphic() {
    let driver = MemoryDriver::new();
    let instance = Instance::builder()
        .driver(driver.clone())
        .template(Template::embedded("Pet").field("name", Field::string()))
        .template(
            Template::embedded("Fish")
                .inherits("Pet")
                .field("fins", Field::integer()),
        )
        .template(
            Template::document("Owner")
                .field("pet", Field::embedded("Pet"))
                .field("others", Field::list(Field::embedded("Pet"))),
        )
        .build()
        .unwrap();
    let owner = instance.retrieve_document("Owner").unwrap();

    let mut document = Document::new(
        &owner,
        doc! {
            "pet": { "cls": "Fish", "name": "Nemo", "fins": 3 },
            "others": [{ "name": "Rex" }],
        },
    )
    .unwrap();

    let pet = document.get("pet").unwrap().as_embedded().unwrap();
    assert_eq!(pet.implementation().name(), "Fish");

    document.commit().await.unwrap();

    let stored = driver.dump("owner").remove(0);
    assert_eq!(
        stored.get_document("pet").unwrap(),
        &doc! { "name": "Nemo", "fins": 3, "_cls": "Fish" }
    );
    assert_eq!(stored.get_array("others").unwrap(), &vec![Bson::Document(doc! { "name": "Rex" })]);

    let loaded = owner.find_by_pk(document.pk().cloned().unwrap()).await.unwrap().unwrap();
    let pet = loaded.get("pet").unwrap().as_embedded().unwrap();
    assert_eq!(pet.implementation().name(), "Fish");
    assert_eq!(
        loaded.dump().unwrap().get_document("pet").unwrap(),
        &doc! { "name": "Nemo", "fins": 3, "cls": "Fish" }
    );

    let err = Document::new(&owner, doc! { "pet": { "cls": "Bird", "name": "Tweety" } }).unwrap_err();
    assert!(err.as_validation().unwrap().field("pet").is_some());
}

#[tokio::test]
async fn discriminator_cannot_be_written() {
    let driver = MemoryDriver::new();
    let instance = zoo(&driver);
    let dog = instance.retrieve_document("Dog").unwrap();
    let cat = instance.retrieve_document("Cat").unwrap();

    let mut rex = Document::new(&dog, doc! { "name": "Rex" }).unwrap();
    assert!(matches!(rex.set("cls", "Cat"), Err(Error::ReadOnlyField(_))));
    assert!(matches!(rex.delete_field("cls"), Err(Error::ReadOnlyField(_))));
    assert!(matches!(
        rex.update(doc! { "cls": "Cat" }),
        Err(Error::Validation(_))
    ));
    rex.commit().await.unwrap();

    assert_eq!(driver.dump("animal")[0].get_str("_cls").unwrap(), "Dog");
    assert!(cat.find(doc! {}).await.unwrap().is_empty());
    assert_eq!(dog.count(doc! {}).await.unwrap(), 1);
}
