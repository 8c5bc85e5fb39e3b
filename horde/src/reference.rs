use crate::{Document, Error, Implementation, Result, ValidationError, i18n, query};
use futures_util::{FutureExt, future::BoxFuture};
use mongodb::bson::Bson;
use std::{fmt, sync::Arc};

/// A pointer to a stored document, resolved lazily.
#[derive(Clone)]
pub struct Reference {
    implementation: Arc<Implementation>,
    pk: Bson,
    document: Option<Box<Document>>,
}

impl Reference {
    pub fn new(implementation: &Arc<Implementation>, pk: Bson) -> Self {
        Self {
            implementation: Arc::clone(implementation),
            pk,
            document: None,
        }
    }

    pub fn implementation(&self) -> &Arc<Implementation> {
        &self.implementation
    }

    pub fn document_name(&self) -> &str {
        self.implementation.name()
    }

    pub fn pk(&self) -> &Bson {
        &self.pk
    }

    /// The document fetched last, if any.
    pub fn cached(&self) -> Option<&Document> {
        self.document.as_deref()
    }

    pub fn fetch(&mut self) -> BoxFuture<'_, Result<&Document>> {
        self.fetch_with(false)
    }

    /// Loads the referenced document, reusing the cached copy unless `force_reload`.
    pub fn fetch_with(&mut self, force_reload: bool) -> BoxFuture<'_, Result<&Document>> {
        async move {
            if self.document.is_none() || force_reload {
                let document = self.load().await?;
                self.document = Some(Box::new(document));
            }

            self.document
                .as_deref()
                .ok_or_else(|| Error::NullReference("Cannot retrieve a None Reference".into()))
        }
        .boxed()
    }

    /// Whether the referenced document is stored, without keeping its data.
    pub fn exists(&self) -> BoxFuture<'static, Result<bool>> {
        let implementation = Arc::clone(&self.implementation);
        let pk = self.pk.clone();

        async move {
            if pk == Bson::Null {
                return Err(Error::NullReference("Cannot retrieve a None Reference".into()));
            }

            let count = implementation.count(query::by_pk(pk)).await?;

            Ok(count > 0)
        }
        .boxed()
    }

    /// Fails with a validation error when the referenced document is not stored.
    pub(crate) fn validate_exists(&self) -> BoxFuture<'static, Result<()>> {
        let exists = self.exists();
        let message = self.not_found_message();

        async move {
            if exists.await? {
                Ok(())
            } else {
                Err(ValidationError::new(message).into())
            }
        }
        .boxed()
    }

    async fn load(&self) -> Result<Document> {
        if self.pk == Bson::Null {
            return Err(Error::NullReference("Cannot retrieve a None Reference".into()));
        }

        self.implementation
            .find_one(query::by_pk(self.pk.clone()))
            .await?
            .ok_or_else(|| ValidationError::new(self.not_found_message()).into())
    }

    fn not_found_message(&self) -> String {
        let translator = self
            .implementation
            .instance()
            .map(|instance| instance.translator().clone())
            .unwrap_or_default();

        translator.format(i18n::REFERENCE_NOT_FOUND, &[("document", self.document_name())])
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.document_name() == other.document_name() && self.pk == other.pk
    }
}

impl PartialEq<Document> for Reference {
    fn eq(&self, other: &Document) -> bool {
        other.implementation().name() == self.document_name() && other.pk() == Some(&self.pk)
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("document", &self.document_name())
            .field("pk", &self.pk)
            .finish()
    }
}
