use crate::{
    Error, Implementation, Result, Template, TemplateKind,
    builder::Builder,
    driver::{Driver, DriverRegistry},
    i18n::Translator,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::{
    any::Any,
    fmt,
    sync::{Arc, Weak},
};
use tracing::{debug, info};

pub(crate) struct Inner {
    builder: Builder,
    documents: DashMap<String, Arc<Implementation>>,
    embedded: DashMap<String, Arc<Implementation>>,
    driver: RwLock<Option<Arc<dyn Driver>>>,
    translator: Translator,
    registering: Mutex<()>,
}

/// Non-owning handle from fields and implementations back to their instance.
#[derive(Clone, Default)]
pub(crate) struct Binding(Weak<Inner>);

impl Binding {
    pub(crate) fn instance(&self) -> Result<Instance> {
        self.0
            .upgrade()
            .map(|inner| Instance { inner })
            .ok_or(Error::NoInstance)
    }

    pub(crate) fn translator(&self) -> Translator {
        self.0
            .upgrade()
            .map_or_else(Translator::default, |inner| inner.translator.clone())
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Binding")
            .field(&(self.0.strong_count() > 0))
            .finish()
    }
}

/// A registry of implementations bound to one storage driver.
///
/// Cloning is cheap, every clone shares the same registry.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<Inner>,
}

impl Instance {
    /// An instance without a driver. Call [`Instance::init`] before any storage operation.
    pub fn new() -> Self {
        Self::builder().build_lazy()
    }

    pub fn with_driver(driver: impl Driver) -> Self {
        Self::builder().driver(driver).build_lazy()
    }

    /// Picks a driver compatible with `handle` from the global registry.
    pub fn from_handle<H: Any + Send + Sync>(handle: H) -> Result<Self> {
        let driver = DriverRegistry::global().read().build(handle)?;
        Ok(Self::builder().shared_driver(driver).build_lazy())
    }

    pub fn builder() -> InstanceBuilder {
        InstanceBuilder::default()
    }

    /// Sets or replaces the driver.
    pub fn init(&self, driver: impl Driver) {
        self.init_shared(Arc::new(driver));
    }

    pub fn init_shared(&self, driver: Arc<dyn Driver>) {
        info!(driver = driver.name(), "instance driver set");
        *self.inner.driver.write() = Some(driver);
    }

    pub fn init_from_handle<H: Any + Send + Sync>(&self, handle: H) -> Result<()> {
        let driver = DriverRegistry::global().read().build(handle)?;
        self.init_shared(driver);
        Ok(())
    }

    pub fn driver(&self) -> Result<Arc<dyn Driver>> {
        self.inner
            .driver
            .read()
            .clone()
            .ok_or_else(|| Error::NoDbDefined("init must be called to define a db".into()))
    }

    pub fn translator(&self) -> &Translator {
        &self.inner.translator
    }

    /// Builds `template` for this instance and makes it retrievable by name.
    pub fn register(&self, template: Template) -> Result<Arc<Implementation>> {
        let _guard = self.inner.registering.lock();
        let name = template.name();

        if self.inner.documents.contains_key(name) || self.inner.embedded.contains_key(name) {
            let label = match template.kind() {
                TemplateKind::Document => "Document",
                TemplateKind::Embedded => "EmbeddedDocument",
            };
            return Err(Error::AlreadyRegistered(format!(
                "{label} `{name}` already registered"
            )));
        }

        let implementation = self.inner.builder.build(self, &template)?;
        let lookup = match implementation.kind() {
            TemplateKind::Document => &self.inner.documents,
            TemplateKind::Embedded => &self.inner.embedded,
        };
        lookup.insert(implementation.name().to_owned(), Arc::clone(&implementation));

        debug!(document = implementation.name(), "registered");

        Ok(implementation)
    }

    pub fn register_all(&self, templates: impl IntoIterator<Item = Template>) -> Result<Vec<Arc<Implementation>>> {
        templates
            .into_iter()
            .map(|template| self.register(template))
            .collect()
    }

    pub fn retrieve_document(&self, name: impl AsRef<str>) -> Result<Arc<Implementation>> {
        let name = name.as_ref();
        self.inner
            .documents
            .get(name)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| Error::NotRegistered(format!("Unknown document class `{name}`")))
    }

    pub fn retrieve_embedded_document(&self, name: impl AsRef<str>) -> Result<Arc<Implementation>> {
        let name = name.as_ref();
        self.inner
            .embedded
            .get(name)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| {
                Error::NotRegistered(format!("Unknown embedded document class `{name}`"))
            })
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.documents.contains_key(name) || self.inner.embedded.contains_key(name)
    }

    /// Registered documents, sorted by name.
    pub fn documents(&self) -> Vec<Arc<Implementation>> {
        let mut documents: Vec<_> = self
            .inner
            .documents
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        documents.sort_by(|a, b| a.name().cmp(b.name()));
        documents
    }

    /// Creates the declared indexes of every concrete document.
    pub async fn ensure_indexes(&self) -> Result<()> {
        for implementation in self.documents() {
            if implementation.opts().is_abstract() {
                continue;
            }
            implementation.ensure_indexes().await?;
        }

        Ok(())
    }

    pub(crate) fn binding(&self) -> Binding {
        Binding(Arc::downgrade(&self.inner))
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut documents: Vec<String> = self.inner.documents.iter().map(|e| e.key().clone()).collect();
        documents.sort();
        let mut embedded: Vec<String> = self.inner.embedded.iter().map(|e| e.key().clone()).collect();
        embedded.sort();

        f.debug_struct("Instance")
            .field("documents", &documents)
            .field("embedded", &embedded)
            .field("driver", &self.inner.driver.read().as_ref().map(|driver| driver.name()))
            .finish()
    }
}

#[derive(Default)]
pub struct InstanceBuilder {
    driver: Option<Arc<dyn Driver>>,
    translator: Option<Translator>,
    templates: Vec<Template>,
}

impl InstanceBuilder {
    pub fn driver(self, driver: impl Driver) -> Self {
        self.shared_driver(Arc::new(driver))
    }

    pub fn shared_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn translator(mut self, translator: Translator) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn template(mut self, template: Template) -> Self {
        self.templates.push(template);
        self
    }

    /// Builds the instance and registers the queued templates in order.
    pub fn build(mut self) -> Result<Instance> {
        let templates = std::mem::take(&mut self.templates);
        let instance = self.build_lazy();
        instance.register_all(templates)?;
        Ok(instance)
    }

    fn build_lazy(self) -> Instance {
        Instance {
            inner: Arc::new(Inner {
                builder: Builder::default(),
                documents: DashMap::new(),
                embedded: DashMap::new(),
                driver: RwLock::new(self.driver),
                translator: self.translator.unwrap_or_default(),
                registering: Mutex::new(()),
            }),
        }
    }
}

impl fmt::Debug for InstanceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceBuilder")
            .field("driver", &self.driver.as_ref().map(|driver| driver.name()))
            .field("templates", &self.templates.len())
            .finish_non_exhaustive()
    }
}
