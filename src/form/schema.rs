use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

use jsonschema::error::ValidationErrorKind;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::controller::{FormError, FormResult};
use super::validation::{Validator, ValidatorResult};
use super::value::{FieldKey, FormErrors, FormValues};

/// Wraps a compiled JSON Schema. Every structured validation error is folded
/// into the field it belongs to; the first message per field wins.
pub struct JsonSchemaValidator {
    compiled: jsonschema::Validator,
}

impl JsonSchemaValidator {
    pub fn new(schema: &serde_json::Value) -> FormResult<Self> {
        let compiled = jsonschema::options()
            .should_validate_formats(true)
            .build(schema)
            .map_err(|error| FormError::InvalidSchema(error.to_string()))?;
        Ok(Self { compiled })
    }

    pub fn from_json(source: &str) -> FormResult<Self> {
        let schema = serde_json::from_str::<serde_json::Value>(source)
            .map_err(|error| FormError::InvalidSchema(error.to_string()))?;
        Self::new(&schema)
    }

    fn errors_for(&self, instance: &serde_json::Value) -> FormErrors {
        let mut errors = FormErrors::new();
        for error in self.compiled.iter_errors(instance) {
            let Some(field) = error_field(&error) else {
                debug!(%error, "schema error without a field path");
                continue;
            };
            errors.entry(field).or_insert_with(|| error.to_string());
        }
        errors
    }
}

impl Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchemaValidator").finish_non_exhaustive()
    }
}

impl Validator for JsonSchemaValidator {
    fn validate(&self, values: &FormValues) -> ValidatorResult {
        self.errors_for(&values.to_json()).into()
    }
}

fn error_field(error: &jsonschema::ValidationError<'_>) -> Option<FieldKey> {
    let path = error.instance_path.to_string();
    if let Some(segment) = path.split('/').nth(1).filter(|segment| !segment.is_empty()) {
        return Some(FieldKey::new(unescape_pointer(segment)));
    }
    match &error.kind {
        ValidationErrorKind::Required { property } => {
            property.as_str().map(FieldKey::new)
        }
        _ => None,
    }
}

fn unescape_pointer(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

type RefinementFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct Refinement<T> {
    field: FieldKey,
    message: String,
    check: RefinementFn<T>,
}

/// Validates values against the JSON Schema derived from `T`, then, once the
/// structural checks pass, against typed refinements on the decoded model.
pub struct TypedValidator<T> {
    schema: JsonSchemaValidator,
    refinements: Vec<Refinement<T>>,
    _model: PhantomData<fn() -> T>,
}

impl<T> TypedValidator<T>
where
    T: JsonSchema + DeserializeOwned,
{
    pub fn for_type() -> FormResult<Self> {
        let schema = schemars::schema_for!(T).to_value();
        Ok(Self {
            schema: JsonSchemaValidator::new(&schema)?,
            refinements: Vec::new(),
            _model: PhantomData,
        })
    }

    pub fn refine(
        mut self,
        field: impl Into<FieldKey>,
        message: impl Into<String>,
        check: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.refinements.push(Refinement {
            field: field.into(),
            message: message.into(),
            check: Arc::new(check),
        });
        self
    }
}

impl<T> Validator for TypedValidator<T>
where
    T: DeserializeOwned,
{
    fn validate(&self, values: &FormValues) -> ValidatorResult {
        let instance = values.to_json();
        let mut errors = self.schema.errors_for(&instance);
        if !errors.is_empty() || self.refinements.is_empty() {
            return errors.into();
        }
        let model = match serde_json::from_value::<T>(instance) {
            Ok(model) => model,
            Err(error) => {
                debug!(%error, "skipping refinements for values that do not decode");
                return errors.into();
            }
        };
        for refinement in &self.refinements {
            if !(refinement.check)(&model) {
                errors
                    .entry(refinement.field.clone())
                    .or_insert_with(|| refinement.message.clone());
            }
        }
        errors.into()
    }
}
