//! Horde is an object-document mapper for `MongoDB`.
//!
//! Documents are declared as storage-agnostic [`Template`]s, registered in an
//! [`Instance`] bound to one storage driver, and manipulated as [`Document`]s
//! that track what changed since they were loaded.
//!
//! ## Example
//!
//! ```no_run
//! use horde::{Document, Field, Instance, MemoryDriver, Template};
//! use mongodb::bson::doc;
//!
//! # async fn run() -> horde::Result<()> {
//! // Declare templates and bind them to a driver
//! let instance = Instance::builder()
//!     .driver(MemoryDriver::new())
//!     .template(
//!         Template::document("User")
//!             .field("email", Field::email().required().unique())
//!             .field("name", Field::string().storage_key("n")),
//!     )
//!     .build()?;
//! instance.ensure_indexes().await?;
//!
//! let user = instance.retrieve_document("User")?;
//!
//! // Insert a document
//! let mut john = Document::new(&user, doc! { "email": "john@example.com", "name": "John" })?;
//! john.commit().await?;
//!
//! // Query by logical field names, `name` is stored as `n`
//! let found = user.find_one(doc! { "name": "John" }).await?;
//! assert_eq!(found.as_ref(), Some(&john));
//!
//! // Only modified fields are sent: { $set: { n: "Johnny" } }
//! john.set("name", "Johnny")?;
//! john.commit().await?;
//!
//! // Remove it from the database
//! john.delete().await?;
//! # Ok(())
//! # }
//! ```
//!
//! See [`guides`] module to learn more!

#![warn(clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_errors_doc
)]

extern crate self as horde;

pub mod blocking;
pub mod builder;
pub mod data_proxy;
pub mod document;
pub mod driver;
pub mod embedded;
pub mod error;
pub mod executor;
pub mod field;
pub mod guides;
pub mod i18n;
pub mod index;
pub mod instance;
mod io_validate;
#[cfg(feature = "meta")]
pub mod meta;
pub mod query;
pub mod reference;
pub mod schema;
pub mod template;
pub mod validate;
pub mod value;

pub use builder::{Implementation, Options};
pub use data_proxy::DataProxy;
pub use document::{CommitOptions, Document};
pub use driver::{
    Driver, DriverFactory, FindOptions, MemoryDriver, MongoConfig, MongoDriver, Order, WriteOutcome,
    register_driver, unregister_driver,
};
pub use embedded::EmbeddedDocument;
pub use error::{Error, Messages, Result, StorageError, ValidationError};
pub use executor::{Executor, Joined, Sequential, Spawned};
pub use field::{Field, FieldKind};
pub use horde_macros::Template;
pub use i18n::Translator;
pub use index::{Index, IndexKind, IndexSpec};
pub use instance::{Instance, InstanceBuilder};
pub use reference::Reference;
pub use schema::Schema;
pub use template::{Declare, Meta, Template, TemplateKind};
pub use value::{Dict, List, Value};

#[doc(hidden)]
pub mod __private {
    #[cfg(feature = "meta")]
    pub use inventory;
}

/// Registers a derived template for [`Instance::register_declared`].
#[cfg(feature = "meta")]
#[doc(hidden)]
#[macro_export]
macro_rules! __submit_template {
    ($ty:ty) => {
        $crate::__private::inventory::submit! {
            $crate::meta::DeclaredTemplate(<$ty as $crate::Declare>::template)
        }
    };
}

#[cfg(not(feature = "meta"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __submit_template {
    ($ty:ty) => {};
}
