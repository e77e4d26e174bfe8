mod binding;
mod controller;
mod coordinator;
mod debounce;
mod hook;
pub mod rules;
pub mod schema;
mod store;
mod validation;
mod value;


pub use binding::{
    BlurEvent, ChangeEvent, FieldBinding, FieldRef, HeadlessInput, InputHandle, InputKind,
    InputRef, RegisterOptions, SubmitEvent,
};
pub use calmform_derive::FormModel;
pub use controller::{
    Debounce, FormConfig, FormController, FormError, FormOptions, FormResult, InputMode,
    SubmitOutcome, ValidationMode, WatchPredicate, WatchRule,
};
pub use coordinator::{DebounceState, DebounceTimers, FieldValidationCoordinator};
pub use debounce::{Debounced, TimerQueue, debounce};
pub use hook::{FormHook, UseForm, create_form_hook, use_form};
pub use rules::{FieldRules, Rule, RulePattern, ValidatorSchema, validator};
pub use schema::{JsonSchemaValidator, TypedValidator};
pub use store::{FormPatch, FormState, FormStore, Subscriber, SubscriberId, Unsubscribe};
pub use validation::{
    FormValidation, Schema, Validator, ValidatorResult, into_schema, validate_field,
    validate_form, validate_subset,
};
pub use value::{
    FieldKey, FieldType, FieldValue, FormErrors, FormModel, FormTouched, FormValues, errors_from,
    merge_field_error,
};
