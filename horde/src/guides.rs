/// ## Getting started
///
/// A [`Template`](crate::Template) declares the fields of a document without
/// tying it to any database. An [`Instance`](crate::Instance) compiles templates
/// into [`Implementation`](crate::Implementation)s bound to one storage driver.
///
/// ```ignore
/// use horde::{Field, Instance, MongoDriver, Template};
///
/// let driver = MongoDriver::connect("mongodb://localhost:27017/shop").await?;
///
/// let instance = Instance::builder()
///     .driver(driver)
///     .template(
///         Template::embedded("Address")
///             .field("street", Field::string())
///             .field("city", Field::string().required()),
///     )
///     .template(
///         Template::document("User")
///             .field("email", Field::email().required().unique())
///             .field("name", Field::string().storage_key("n"))
///             .field("address", Field::embedded("Address")),
///     )
///     .build()?;
/// ```
///
/// Every document gets an `id` field stored as `_id`, generated on insert
/// unless you declare your own. Fields are addressed by their logical name
/// everywhere: in [`Document::get`](crate::Document::get), in filters, in
/// sort and projection documents. Horde rewrites them to storage keys.
///
/// The driver can also be chosen later with [`Instance::init`](crate::Instance::init),
/// or probed from a raw storage handle with
/// [`Instance::from_handle`](crate::Instance::from_handle):
///
/// ```ignore
/// let client = mongodb::Client::with_uri_str("mongodb://localhost:27017").await?;
/// let instance = Instance::from_handle(client.database("shop"))?;
/// ```
///
/// ### Method overview
///
/// | Method                          | Description                                            | Storage operation                          |
/// |---------------------------------|--------------------------------------------------------|--------------------------------------------|
/// | `Document::commit`              | Inserts a new document or writes its modified fields.  | `insertOne(...)` / `updateOne({ _id }, { $set, $unset })` |
/// | `Document::delete`              | Removes a stored document.                             | `deleteOne({ _id })`                       |
/// | `Document::reload`              | Replaces local values with the stored ones.            | `findOne({ _id })`                         |
/// | `Implementation::find`          | Finds documents matching a filter.                     | `find(filter)`                             |
/// | `Implementation::find_with`     | Same, with skip, limit, sort and projection.           | `find(filter).skip().limit().sort()`       |
/// | `Implementation::find_one`      | Finds the first matching document.                     | `find(filter).limit(1)`                    |
/// | `Implementation::count`         | Counts matching documents.                             | `countDocuments(filter)`                   |
/// | `Implementation::ensure_indexes`| Creates the declared indexes.                          | `createIndexes(...)`                       |
mod getting_started {}

/// ## Inheritance
///
/// A template may inherit from one or more parents. Fields are collected
/// parents first, in declaration order.
///
/// ```ignore
/// Template::document("Animal").meta(Meta::new().allow_inheritance(true))
///     .field("name", Field::string());
/// Template::document("Dog").inherits("Animal")
///     .field("good_boy", Field::boolean().default(true));
/// ```
///
/// A child shares the collection of its parent and is stored with a `_cls`
/// field naming its concrete template. Finding through `Animal` returns
/// `Dog`s as `Dog` documents, while finding through `Dog` only matches `Dog`s
/// and their own children.
///
/// Abstract templates (`Meta::new().is_abstract(true)`) cannot be instantiated
/// and do not own a collection, their first concrete children do.
///
/// Unique indexes declared on a child are scoped to that child: `_cls` is
/// appended to their keys.
mod inheritance {}

/// ## Commit protocol
///
/// A new document is inserted on its first [`commit`](crate::Document::commit):
///
/// 1. the `pre_insert` hook runs,
/// 2. required fields are checked,
/// 3. I/O validators run on every field,
/// 4. the full storage form is inserted and the generated `_id` is set,
/// 5. the `post_insert` hook runs.
///
/// A stored document only sends what changed. Committing an unmodified
/// document does nothing and returns `None`. Extra conditions make the update
/// conditional:
///
/// ```ignore
/// doc.set("version", 3)?;
/// doc.commit_with(CommitOptions::default().conditions(doc! { "version": 2 })).await?;
/// ```
///
/// When no stored document matches, commit fails with
/// [`Error::Update`](crate::Error::Update). The `pre_update` and `pre_delete`
/// hooks may return extra conditions too, which is how optimistic locking is
/// usually implemented.
///
/// A duplicate key reported by the database on a declared unique index is
/// turned into a [`ValidationError`](crate::ValidationError) on the fields of
/// that index.
mod commit_protocol {}

/// ## Validation
///
/// Values are validated when they are loaded or set. Each field kind checks
/// its own type, and extra validators can be attached:
///
/// ```ignore
/// Field::string().validator(validate::length(Some(3), Some(32)))
/// ```
///
/// I/O validators need the database and only run on commit. Reference
/// fields get one automatically, checking that the referenced document
/// exists. Validators of independent fields run concurrently through the
/// [`Executor`](crate::Executor) of the driver, and every failure is reported
/// in one error.
///
/// Error messages go through the [`Translator`](crate::Translator) of the
/// instance before placeholders are substituted.
mod validation {}

/// ## Deriving templates
///
/// `#[derive(Template)]` builds a template out of a struct declaration. Field
/// kinds are inferred from Rust types and can be overridden:
///
/// ```ignore
/// #[derive(Template)]
/// #[template(collection = "people", index = "-age")]
/// struct Person {
///     #[field(required, unique)]
///     email: String,
///     #[field(storage_key = "a", default = 0)]
///     age: i64,
///     #[field(embedded = "Address")]
///     address: Option<Address>,
/// }
///
/// let instance = Instance::builder().template(Person::template()).build()?;
/// // or, with the `meta` feature, every derived template at once:
/// instance.register_declared()?;
///
/// let found = people.find_one(doc! { person::Fields::Email.as_ref(): "a@b.c" }).await?;
/// ```
mod deriving_templates {}

/// This library is named "Horde" because it rides along with `MongoDB`.
mod naming {}
