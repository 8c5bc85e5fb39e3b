use chrono::{DateTime, Utc};
use horde::{Declare, Document, FieldKind, Instance, MemoryDriver, Template, TemplateKind};
use mongodb::bson::{Bson, doc, oid::ObjectId};
use pretty_assertions::assert_eq;

#[derive(Template)]
#[template(embedded)]
#[allow(dead_code)]
struct Address {
    city: String,
    #[field(default = "FR")]
    country: String,
}

#[derive(Template)]
#[template(index = "-created")]
#[allow(dead_code)]
struct Author {
    #[field(required, unique)]
    email: String,
    #[field(storage_key = "n")]
    name: Option<String>,
    tags: Vec<String>,
    address: Option<Address>,
    #[field(reference = "Author")]
    mentor: Option<ObjectId>,
    created: Option<DateTime<Utc>>,
    #[field(skip)]
    cache: u32,
}

#[derive(Template)]
#[template(allow_inheritance)]
#[allow(dead_code)]
struct Person {
    name: String,
}

#[derive(Template)]
#[template(inherits(Person), name = "Staff")]
#[allow(dead_code)]
struct Employee {
    salary: f64,
}

#[test]
fn derived_templates_describe_their_fields() {
    let template = Author::template();

    assert_eq!(Author::NAME, "Author");
    assert_eq!(template.kind(), TemplateKind::Document);

    let fields: Vec<&str> = template.fields().map(|(name, _)| name).collect();
    assert_eq!(fields, ["email", "name", "tags", "address", "mentor", "created"]);

    let (_, email) = template.fields().next().unwrap();
    assert!(email.is_required());
    assert!(email.is_unique());

    let (_, name) = template.fields().nth(1).unwrap();
    assert_eq!(name.storage_key_or_name(), "n");
    assert!(name.is_allow_none());

    let (_, address) = template.fields().nth(3).unwrap();
    assert!(matches!(address.kind(), FieldKind::Embedded(document) if document == "Address"));

    let (_, mentor) = template.fields().nth(4).unwrap();
    assert!(matches!(mentor.kind(), FieldKind::Reference(document) if document == "Author"));

    assert_eq!(Address::template().kind(), TemplateKind::Embedded);
    assert_eq!(Employee::NAME, "Staff");
    assert_eq!(Employee::template().parents(), ["Person".to_owned()]);
}

#[test]
fn fields_enum_names_every_field() {
    assert_eq!(author::Fields::Email.as_str(), "email");
    assert_eq!(author::Fields::Mentor.to_string(), "mentor");
    assert_eq!(author::Fields::ALL.len(), 6);
    assert_eq!(String::from(employee::Fields::Salary), "salary");
}

#[tokio::test]
async fn declared_templates_register_in_dependency_order() {
    let driver = MemoryDriver::new();
    let instance = Instance::with_driver(driver.clone());

    let registered = instance.register_declared().unwrap();
    let mut names: Vec<&str> = registered.iter().map(|implementation| implementation.name()).collect();
    names.sort_unstable();
    assert_eq!(names, ["Address", "Author", "Person", "Staff"]);
    assert!(instance.register_declared().unwrap().is_empty());

    instance.ensure_indexes().await.unwrap();
    assert_eq!(
        driver.index_names("author"),
        ["created_-1".to_owned(), "email_1".to_owned()]
    );

    let staff = instance.retrieve_document("Staff").unwrap();
    assert_eq!(staff.collection_name().unwrap(), "person");

    let author = instance.retrieve_document(Author::NAME).unwrap();
    let mut document = Document::new(
        &author,
        doc! {
            "email": "ann@example.com",
            "name": "Ann",
            "address": { "city": "Lyon" },
        },
    )
    .unwrap();
    document.commit().await.unwrap();

    let stored = driver.dump("author").remove(0);
    assert_eq!(stored.get_str("n").unwrap(), "Ann");
    assert_eq!(
        stored.get("address"),
        Some(&Bson::Document(doc! { "city": "Lyon", "country": "FR" }))
    );
}
