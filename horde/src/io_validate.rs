use crate::{
    DataProxy, Error, Field, Result, Value,
    error::{ErrorCollector, Messages, ValidationError},
    executor::{Executor, Job},
    value::List,
};
use futures_util::{FutureExt, future::BoxFuture};

/// Runs the I/O validators of `data`, limited to the fields named in `only`.
///
/// Every fan-out (fields, list items, validators of one field) goes through
/// `executor` and every failure is reported, keyed by field name. Nested lists
/// and embedded documents are validated before the validators of the field
/// holding them.
pub(crate) fn validate_data(
    data: &DataProxy,
    only: Option<&[String]>,
    executor: &dyn Executor,
) -> BoxFuture<'static, Result<()>> {
    let mut names = Vec::new();
    let mut jobs: Vec<Job> = Vec::new();

    for (name, field) in data.schema().fields() {
        if only.is_some_and(|only| !only.iter().any(|selected| selected == name)) {
            continue;
        }
        if !data.is_loaded(name) {
            continue;
        }
        let value = data.peek_storage_key(field.storage_key_or_name());
        if value.is_missing() || value.is_null() || !needs_io(field, value) {
            continue;
        }

        names.push(name.to_owned());
        jobs.push(validate_value(field, value, executor));
    }

    let gathered = executor.gather(jobs);

    async move {
        let results = gathered.await;

        let mut errors = ErrorCollector::default();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(()) => {}
                Err(Error::Validation(err)) => errors.add(name, err),
                Err(err) => return Err(err),
            }
        }
        errors.finish()?;

        Ok(())
    }
    .boxed()
}

fn needs_io(field: &Field, value: &Value) -> bool {
    if !field.io_validators().is_empty() {
        return true;
    }

    match value {
        Value::Reference(_) | Value::Embedded(_) => true,
        Value::List(list) => list.iter().any(|item| needs_io(list.container(), item)),
        _ => false,
    }
}

fn validate_value(field: &Field, value: &Value, executor: &dyn Executor) -> Job {
    let nested = match value {
        Value::List(list) => Some(validate_items(list, executor)),
        Value::Embedded(embedded) => Some(validate_data(embedded.data(), None, executor)),
        _ => None,
    };

    let mut checks: Vec<Job> = field
        .io_validators()
        .iter()
        .map(|validator| validator(value.clone()))
        .collect();
    if let Value::Reference(reference) = value {
        checks.push(reference.validate_exists());
    }
    let checks = executor.gather(checks);

    async move {
        if let Some(nested) = nested {
            nested.await?;
        }

        let mut failed: Option<Messages> = None;
        for result in checks.await {
            match result {
                Ok(()) => {}
                Err(Error::Validation(err)) => match &mut failed {
                    Some(messages) => messages.merge(err.into_messages()),
                    None => failed = Some(err.into_messages()),
                },
                Err(err) => return Err(err),
            }
        }

        match failed {
            Some(messages) => Err(ValidationError::from_messages(messages).into()),
            None => Ok(()),
        }
    }
    .boxed()
}

fn validate_items(list: &List, executor: &dyn Executor) -> Job {
    let (indexes, jobs): (Vec<usize>, Vec<Job>) = list
        .iter()
        .enumerate()
        .filter(|(_, item)| !item.is_missing() && !item.is_null())
        .filter(|(_, item)| needs_io(list.container(), item))
        .map(|(index, item)| (index, validate_value(list.container(), item, executor)))
        .unzip();
    let gathered = executor.gather(jobs);

    async move {
        let results = gathered.await;

        let mut errors = ErrorCollector::default();
        for (index, result) in indexes.into_iter().zip(results) {
            match result {
                Ok(()) => {}
                Err(Error::Validation(err)) => errors.add(index.to_string(), err),
                Err(err) => return Err(err),
            }
        }
        errors.finish()?;

        Ok(())
    }
    .boxed()
}
