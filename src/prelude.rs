pub use crate::form::{
    BlurEvent, ChangeEvent, Debounce, FieldBinding, FieldKey, FieldRules, FieldValue, FormConfig,
    FormController, FormError, FormErrors, FormHook, FormModel, FormOptions, FormResult, FormState,
    FormTouched, FormValues, HeadlessInput, InputHandle, InputKind, InputMode, JsonSchemaValidator,
    RegisterOptions, Rule, SubmitEvent, SubmitOutcome, TypedValidator, UseForm, ValidationMode,
    Validator, ValidatorResult, ValidatorSchema, WatchRule, create_form_hook, into_schema,
    use_form, validator,
};
