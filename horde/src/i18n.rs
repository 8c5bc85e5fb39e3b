use std::{fmt, sync::Arc};

/// Translates user-facing messages before placeholders are substituted.
#[derive(Clone)]
pub struct Translator(Arc<dyn Fn(&str) -> String + Send + Sync>);

impl Translator {
    pub fn new(translate: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(translate))
    }

    pub fn identity() -> Self {
        Self::new(str::to_owned)
    }

    pub fn translate(&self, message: &str) -> String {
        (self.0)(message)
    }

    /// Translates `message` and then replaces `{key}` placeholders.
    pub fn format(&self, message: &str, args: &[(&str, &str)]) -> String {
        let mut message = self.translate(message);
        for (key, value) in args {
            message = message.replace(&format!("{{{key}}}"), value);
        }
        message
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for Translator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Translator").finish_non_exhaustive()
    }
}

pub(crate) const NULL: &str = "Field may not be null.";
pub(crate) const REQUIRED: &str = "Missing data for required field.";
pub(crate) const UNKNOWN_FIELD: &str = "Unknown field name {field}.";
pub(crate) const UNIQUE: &str = "Field value must be unique.";
pub(crate) const UNIQUE_COMPOUND: &str = "Values of fields {fields} must be unique together.";

pub(crate) const INVALID_STRING: &str = "Not a valid string.";
pub(crate) const INVALID_INTEGER: &str = "Not a valid integer.";
pub(crate) const INVALID_NUMBER: &str = "Not a valid number.";
pub(crate) const INVALID_BOOLEAN: &str = "Not a valid boolean.";
pub(crate) const INVALID_DATETIME: &str = "Not a valid datetime.";
pub(crate) const INVALID_DATE: &str = "Not a valid date.";
pub(crate) const INVALID_OBJECT_ID: &str = "Invalid ObjectId.";
pub(crate) const INVALID_LIST: &str = "Not a valid list.";
pub(crate) const INVALID_MAPPING: &str = "Not a valid mapping type.";
pub(crate) const INVALID_INPUT: &str = "Invalid input type.";

pub(crate) const REFERENCE_EXPECTED: &str = "`{document}` reference expected.";
pub(crate) const REFERENCE_NOT_CREATED: &str =
    "Cannot reference a document that has not been created yet.";
pub(crate) const REFERENCE_NOT_FOUND: &str = "Reference not found for document {document}.";
pub(crate) const UNKNOWN_DOCUMENT: &str = "Unknown document `{document}`.";
pub(crate) const GENERIC_REFERENCE_KEYS: &str =
    "Generic reference must have `id` and `cls` fields.";
pub(crate) const GENERIC_REFERENCE_INVALID: &str = "Invalid value for generic reference field.";
pub(crate) const INVALID_ID: &str = "Invalid `id` field.";

pub(crate) const LENGTH_MIN: &str = "Shorter than minimum length {min}.";
pub(crate) const LENGTH_MAX: &str = "Longer than maximum length {max}.";
pub(crate) const LENGTH_BETWEEN: &str = "Length must be between {min} and {max}.";
pub(crate) const RANGE_MIN: &str = "Must be greater than or equal to {min}.";
pub(crate) const RANGE_MAX: &str = "Must be less than or equal to {max}.";
pub(crate) const RANGE_BETWEEN: &str = "Must be greater than or equal to {min} and less than or equal to {max}.";
pub(crate) const ONE_OF: &str = "Must be one of: {choices}.";
pub(crate) const NONE_OF: &str = "Invalid input.";
pub(crate) const EQUAL: &str = "Must be equal to {other}.";
pub(crate) const EMAIL: &str = "Not a valid email address.";
pub(crate) const URL: &str = "Not a valid URL.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_translates_before_substituting() {
        let translator = Translator::new(|message| match message {
            "Unknown field name {field}." => "Champ inconnu {field}.".to_owned(),
            other => other.to_owned(),
        });

        assert_eq!(
            translator.format(UNKNOWN_FIELD, &[("field", "age")]),
            "Champ inconnu age."
        );
        assert_eq!(translator.format(REQUIRED, &[]), REQUIRED);
    }
}
