//! Reusable synchronous validators for [`Field::validator`](crate::Field::validator).

use crate::{Value, error::ValidationError, i18n, i18n::Translator};
use mongodb::bson::Bson;
use std::fmt::Display;

type Check = Box<dyn Fn(&Value, &Translator) -> Result<(), ValidationError> + Send + Sync>;

fn measure(value: &Value) -> Option<usize> {
    match value {
        Value::Bson(Bson::String(value)) => Some(value.chars().count()),
        Value::Bson(Bson::Array(items)) => Some(items.len()),
        Value::List(list) => Some(list.len()),
        Value::Dict(dict) => Some(dict.len()),
        _ => None,
    }
}

/// Bounds the length of strings, lists and mappings.
pub fn length(min: Option<usize>, max: Option<usize>) -> Check {
    Box::new(move |value, translator| {
        let Some(len) = measure(value) else {
            return Ok(());
        };
        let (min_s, max_s) = (
            min.map(|min| min.to_string()).unwrap_or_default(),
            max.map(|max| max.to_string()).unwrap_or_default(),
        );
        let args = [("min", min_s.as_str()), ("max", max_s.as_str())];

        match (min, max) {
            (Some(min), Some(max)) if len < min || len > max => Err(ValidationError::new(
                translator.format(i18n::LENGTH_BETWEEN, &args),
            )),
            (Some(min), None) if len < min => {
                Err(ValidationError::new(translator.format(i18n::LENGTH_MIN, &args)))
            }
            (None, Some(max)) if len > max => {
                Err(ValidationError::new(translator.format(i18n::LENGTH_MAX, &args)))
            }
            _ => Ok(()),
        }
    })
}

/// Bounds numeric values, inclusive on both ends.
pub fn range(min: Option<f64>, max: Option<f64>) -> Check {
    Box::new(move |value, translator| {
        #[allow(clippy::cast_precision_loss)]
        let number = match value {
            Value::Bson(Bson::Int32(value)) => f64::from(*value),
            Value::Bson(Bson::Int64(value)) => *value as f64,
            Value::Bson(Bson::Double(value)) => *value,
            _ => return Ok(()),
        };
        let (min_s, max_s) = (
            min.map(|min| min.to_string()).unwrap_or_default(),
            max.map(|max| max.to_string()).unwrap_or_default(),
        );
        let args = [("min", min_s.as_str()), ("max", max_s.as_str())];

        match (min, max) {
            (Some(min), Some(max)) if number < min || number > max => Err(ValidationError::new(
                translator.format(i18n::RANGE_BETWEEN, &args),
            )),
            (Some(min), None) if number < min => {
                Err(ValidationError::new(translator.format(i18n::RANGE_MIN, &args)))
            }
            (None, Some(max)) if number > max => {
                Err(ValidationError::new(translator.format(i18n::RANGE_MAX, &args)))
            }
            _ => Ok(()),
        }
    })
}

pub fn one_of<I, T>(choices: I) -> Check
where
    I: IntoIterator<Item = T>,
    T: Into<Bson> + Display,
{
    let (labels, choices): (Vec<String>, Vec<Bson>) = choices
        .into_iter()
        .map(|choice| (choice.to_string(), choice.into()))
        .unzip();
    let labels = labels.join(", ");

    Box::new(move |value, translator| match value.as_bson() {
        Some(bson) if !choices.contains(bson) => Err(ValidationError::new(
            translator.format(i18n::ONE_OF, &[("choices", &labels)]),
        )),
        _ => Ok(()),
    })
}

pub fn none_of<I, T>(forbidden: I) -> Check
where
    I: IntoIterator<Item = T>,
    T: Into<Bson>,
{
    let forbidden: Vec<Bson> = forbidden.into_iter().map(Into::into).collect();

    Box::new(move |value, translator| match value.as_bson() {
        Some(bson) if forbidden.contains(bson) => {
            Err(ValidationError::new(translator.format(i18n::NONE_OF, &[])))
        }
        _ => Ok(()),
    })
}

pub fn equal(other: impl Into<Bson> + Display) -> Check {
    let label = other.to_string();
    let other = other.into();

    Box::new(move |value, translator| match value.as_bson() {
        Some(bson) if *bson != other => Err(ValidationError::new(
            translator.format(i18n::EQUAL, &[("other", &label)]),
        )),
        _ => Ok(()),
    })
}

pub fn email() -> Check {
    Box::new(|value, translator| {
        let Some(address) = value.as_str() else {
            return Ok(());
        };
        let valid = address.split_once('@').is_some_and(|(user, domain)| {
            !user.is_empty()
                && !user.contains(char::is_whitespace)
                && !domain.contains('@')
                && domain
                    .split('.')
                    .all(|label| !label.is_empty() && !label.contains(char::is_whitespace))
                && domain.contains('.')
        });

        if valid {
            Ok(())
        } else {
            Err(ValidationError::new(translator.format(i18n::EMAIL, &[])))
        }
    })
}

pub fn url() -> Check {
    Box::new(|value, translator| {
        let Some(candidate) = value.as_str() else {
            return Ok(());
        };

        match url::Url::parse(candidate) {
            Ok(parsed) if parsed.has_host() => Ok(()),
            _ => Err(ValidationError::new(translator.format(i18n::URL, &[]))),
        }
    })
}

/// Wraps a predicate, failing with `message` when it returns `false`.
pub fn predicate(
    check: impl Fn(&Value) -> bool + Send + Sync + 'static,
    message: impl Into<String>,
) -> Check {
    let message = message.into();

    Box::new(move |value, translator| {
        if check(value) {
            Ok(())
        } else {
            Err(ValidationError::new(translator.translate(&message)))
        }
    })
}
