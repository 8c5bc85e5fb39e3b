//! Templates declared with `#[derive(Template)]`, collected at link time.

use crate::{Error, Implementation, Instance, Result, Template, TemplateKind};
use std::sync::Arc;
use tracing::debug;

#[doc(hidden)]
pub struct DeclaredTemplate(pub fn() -> Template);

inventory::collect!(DeclaredTemplate);

/// Every template declared in the program, in no particular order.
pub fn declared_templates() -> impl Iterator<Item = Template> {
    inventory::iter::<DeclaredTemplate>
        .into_iter()
        .map(|declared| (declared.0)())
}

impl Instance {
    /// Registers every declared template that is not registered yet.
    ///
    /// Embedded documents go first and parents always precede their children.
    pub fn register_declared(&self) -> Result<Vec<Arc<Implementation>>> {
        let mut pending: Vec<Template> = declared_templates()
            .filter(|template| !self.is_registered(template.name()))
            .collect();
        pending.sort_by(|a, b| {
            (a.kind() != TemplateKind::Embedded, a.name()).cmp(&(b.kind() != TemplateKind::Embedded, b.name()))
        });

        let mut registered = Vec::new();
        while !pending.is_empty() {
            let (ready, waiting): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|template| template.parents().iter().all(|parent| self.is_registered(parent)));

            if ready.is_empty() {
                let names = waiting.iter().map(Template::name).collect::<Vec<_>>().join(", ");
                return Err(Error::NotRegistered(format!(
                    "Cannot register {names}: a parent template is not declared"
                )));
            }

            for template in ready {
                registered.push(self.register(template)?);
            }
            pending = waiting;
        }

        debug!(count = registered.len(), "registered declared templates");

        Ok(registered)
    }
}
