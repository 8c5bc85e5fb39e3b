//! Blocking versions of the storage operations, for programs without an
//! async runtime.
//!
//! Every call drives the async operation on a current-thread runtime owned
//! by the calling thread. Calling them from inside an async context panics.
//!
//! ```no_run
//! use horde::{Document, Instance, blocking::{Blocking, BlockingQuery}};
//! use mongodb::bson::doc;
//!
//! # fn run(instance: Instance) -> horde::Result<()> {
//! let user = instance.retrieve_document("User")?;
//!
//! let mut john = Document::new(&user, doc! { "name": "John" })?;
//! john.commit_blocking()?;
//!
//! let found = user.find_one_blocking(doc! { "name": "John" })?;
//! assert_eq!(found.as_ref(), Some(&john));
//! # Ok(())
//! # }
//! ```

use crate::{
    Document, Error, Implementation, Result,
    document::CommitOptions,
    driver::{FindOptions, WriteOutcome},
};
use mongodb::bson::{self, Bson};
use std::{cell::OnceCell, future::Future, sync::Arc};
use tokio::runtime::{Builder, Runtime};

thread_local! {
    static RUNTIME: OnceCell<Runtime> = const { OnceCell::new() };
}

/// Runs `future` to completion on this thread.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    RUNTIME.with(|cell| {
        let runtime = match cell.get() {
            Some(runtime) => runtime,
            None => {
                let built = Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|err| Error::Task(format!("cannot start runtime: {err}")))?;
                cell.get_or_init(|| built)
            }
        };

        Ok(runtime.block_on(future))
    })
}

pub trait Blocking {
    fn commit_blocking(&mut self) -> Result<Option<WriteOutcome>>;

    fn commit_with_blocking(&mut self, options: CommitOptions) -> Result<Option<WriteOutcome>>;

    fn delete_blocking(&mut self) -> Result<WriteOutcome>;

    fn delete_with_blocking(&mut self, conditions: Option<bson::Document>) -> Result<WriteOutcome>;

    fn reload_blocking(&mut self) -> Result<()>;

    fn io_validate_blocking(&self, validate_all: bool) -> Result<()>;
}

impl Blocking for Document {
    fn commit_blocking(&mut self) -> Result<Option<WriteOutcome>> {
        block_on(self.commit())?
    }

    fn commit_with_blocking(&mut self, options: CommitOptions) -> Result<Option<WriteOutcome>> {
        block_on(self.commit_with(options))?
    }

    fn delete_blocking(&mut self) -> Result<WriteOutcome> {
        block_on(self.delete())?
    }

    fn delete_with_blocking(&mut self, conditions: Option<bson::Document>) -> Result<WriteOutcome> {
        block_on(self.delete_with(conditions))?
    }

    fn reload_blocking(&mut self) -> Result<()> {
        block_on(self.reload())?
    }

    fn io_validate_blocking(&self, validate_all: bool) -> Result<()> {
        block_on(self.io_validate(validate_all))?
    }
}

pub trait BlockingQuery {
    fn find_blocking(&self, filter: bson::Document) -> Result<Vec<Document>>;

    fn find_with_blocking(&self, filter: bson::Document, options: FindOptions) -> Result<Vec<Document>>;

    fn find_one_blocking(&self, filter: bson::Document) -> Result<Option<Document>>;

    fn find_by_pk_blocking(&self, pk: impl Into<Bson>) -> Result<Option<Document>>;

    fn count_blocking(&self, filter: bson::Document) -> Result<u64>;

    fn ensure_indexes_blocking(&self) -> Result<()>;
}

impl BlockingQuery for Arc<Implementation> {
    fn find_blocking(&self, filter: bson::Document) -> Result<Vec<Document>> {
        block_on(self.find(filter))?
    }

    fn find_with_blocking(&self, filter: bson::Document, options: FindOptions) -> Result<Vec<Document>> {
        block_on(self.find_with(filter, options))?
    }

    fn find_one_blocking(&self, filter: bson::Document) -> Result<Option<Document>> {
        block_on(self.find_one(filter))?
    }

    fn find_by_pk_blocking(&self, pk: impl Into<Bson>) -> Result<Option<Document>> {
        block_on(self.find_by_pk(pk))?
    }

    fn count_blocking(&self, filter: bson::Document) -> Result<u64> {
        block_on(self.count(filter))?
    }

    fn ensure_indexes_blocking(&self) -> Result<()> {
        block_on(self.ensure_indexes())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Field, Instance, MemoryDriver, Template};
    use mongodb::bson::doc;

    #[test]
    fn operations_run_without_a_runtime() {
        let instance = Instance::builder()
            .driver(MemoryDriver::new())
            .template(Template::document("User").field("name", Field::string().required()))
            .build()
            .unwrap();
        let user = instance.retrieve_document("User").unwrap();

        let mut john = Document::new(&user, doc! { "name": "John" }).unwrap();
        assert!(matches!(
            john.commit_blocking().unwrap(),
            Some(WriteOutcome::Inserted { .. })
        ));
        assert_eq!(john.commit_blocking().unwrap(), None);

        assert_eq!(user.count_blocking(doc! {}).unwrap(), 1);
        let found = user.find_one_blocking(doc! { "name": "John" }).unwrap().unwrap();
        assert_eq!(found, john);

        john.delete_blocking().unwrap();
        assert_eq!(user.count_blocking(doc! {}).unwrap(), 0);
    }
}
