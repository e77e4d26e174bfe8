use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::value::{FieldKey, FieldValue, FormErrors, FormValues};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorResult {
    pub errors: FormErrors,
}

impl ValidatorResult {
    pub fn valid() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&self, name: &str) -> Option<&str> {
        self.errors.get(name).map(String::as_str)
    }
}

impl From<FormErrors> for ValidatorResult {
    fn from(errors: FormErrors) -> Self {
        Self { errors }
    }
}

/// Any validation backend: takes the (possibly partial) value set and
/// reports one message per failing field. An all-valid input yields an
/// empty error map.
pub trait Validator: Send + Sync {
    fn validate(&self, values: &FormValues) -> ValidatorResult;
}

impl<F> Validator for F
where
    F: Fn(&FormValues) -> ValidatorResult + Send + Sync,
{
    fn validate(&self, values: &FormValues) -> ValidatorResult {
        (self)(values)
    }
}

pub type Schema = Arc<dyn Validator>;

pub fn into_schema(validator: impl Validator + 'static) -> Schema {
    Arc::new(validator)
}

/// Validates `name` in isolation by handing the validator a one-field
/// projection. Cross-field rules see the other fields as absent.
pub fn validate_field(schema: &dyn Validator, name: &FieldKey, value: &FieldValue) -> Option<String> {
    schema
        .validate(&FormValues::project(name, value.clone()))
        .errors
        .remove(name)
}

pub fn validate_subset(schema: &dyn Validator, values: &FormValues) -> FormErrors {
    let mut errors = schema.validate(values).errors;
    errors.retain(|name, _| values.contains(name.as_str()));
    errors
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormValidation {
    pub valid: bool,
    pub errors: FormErrors,
}

pub fn validate_form(schema: Option<&dyn Validator>, values: &FormValues) -> FormValidation {
    let Some(schema) = schema else {
        return FormValidation {
            valid: true,
            errors: FormErrors::new(),
        };
    };
    let errors = schema.validate(values).errors;
    FormValidation {
        valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required_both(values: &FormValues) -> ValidatorResult {
        let mut errors = FormErrors::new();
        for name in ["name", "email"] {
            if !values.get(name).is_some_and(FieldValue::is_truthy) {
                errors.insert(FieldKey::new(name), format!("{name} is required."));
            }
        }
        errors.into()
    }

    #[test]
    fn closures_satisfy_the_validator_contract() {
        let schema = into_schema(required_both);
        let values = FormValues::new().with("name", "Jack").with("email", "");
        let result = schema.validate(&values);
        assert!(!result.is_valid());
        assert_eq!(result.error("email"), Some("email is required."));
        assert_eq!(result.error("name"), None);
    }

    #[test]
    fn field_validation_only_reports_the_requested_field() {
        let schema = into_schema(required_both);
        let error = validate_field(&*schema, &FieldKey::new("name"), &FieldValue::from("Jack"));
        assert_eq!(error, None);
        let error = validate_field(&*schema, &FieldKey::new("name"), &FieldValue::from(""));
        assert_eq!(error.as_deref(), Some("name is required."));
    }

    #[test]
    fn subset_validation_drops_errors_for_fields_outside_the_subset() {
        let schema = into_schema(required_both);
        let errors = validate_subset(&*schema, &FormValues::new().with("name", ""));
        assert_eq!(errors.len(), 1);
        assert!(errors.contains_key("name"));
    }

    #[test]
    fn missing_schema_is_always_valid() {
        let result = validate_form(None, &FormValues::new().with("name", ""));
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }
}
