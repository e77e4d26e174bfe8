use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::binding::{BlurEvent, ChangeEvent, FieldRef, SubmitEvent};
use super::coordinator::{DebounceTimers, FieldValidationCoordinator};
use super::debounce::TimerQueue;
use super::store::{FormPatch, FormState, FormStore, Unsubscribe};
use super::validation::{FormValidation, Schema, validate_field, validate_form, validate_subset};
use super::value::{
    FieldKey, FieldValue, FormErrors, FormModel, FormTouched, FormValues, merge_field_error,
};

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FormError {
    #[error("invalid validation schema: {0}")]
    InvalidSchema(String),
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("invalid rule table: {0}")]
    InvalidRuleTable(String),
    #[error("failed to start debounce timer queue: {0}")]
    TimerQueue(String),
    #[error("failed to deserialize form options: {0}")]
    Deserialize(String),
}

pub type FormResult<T> = Result<T, FormError>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Controlled,
    #[default]
    Uncontrolled,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum ValidationMode {
    #[default]
    #[serde(rename = "change")]
    OnChange,
    #[serde(rename = "blur")]
    OnBlur,
    #[serde(rename = "submit")]
    OnSubmit,
}

/// Debounce window in milliseconds: one number for both directions, or
/// separate `in` (error appears) and `out` (error clears) windows.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Debounce {
    Uniform(u64),
    Split {
        #[serde(rename = "in", default, skip_serializing_if = "Option::is_none")]
        incoming: Option<u64>,
        #[serde(rename = "out", default, skip_serializing_if = "Option::is_none")]
        outgoing: Option<u64>,
    },
}

impl Debounce {
    pub fn split(incoming: u64, outgoing: u64) -> Self {
        Debounce::Split {
            incoming: Some(incoming),
            outgoing: Some(outgoing),
        }
    }

    /// `None` means change validation runs synchronously.
    pub fn timers(self) -> Option<DebounceTimers> {
        match self {
            Debounce::Uniform(0) => None,
            Debounce::Uniform(wait) => Some(DebounceTimers {
                incoming: Duration::from_millis(wait),
                outgoing: Duration::from_millis(wait),
            }),
            Debounce::Split {
                incoming: None,
                outgoing: None,
            } => None,
            Debounce::Split { incoming, outgoing } => Some(DebounceTimers {
                incoming: Duration::from_millis(incoming.unwrap_or(0)),
                outgoing: Duration::from_millis(outgoing.unwrap_or(0)),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormOptions {
    pub input_mode: InputMode,
    pub validate_mode: ValidationMode,
    pub debounce: Option<Debounce>,
}

impl FormOptions {
    pub fn from_json(source: &str) -> FormResult<Self> {
        serde_json::from_str(source).map_err(|error| FormError::Deserialize(error.to_string()))
    }

    pub fn controlled(mut self) -> Self {
        self.input_mode = InputMode::Controlled;
        self
    }

    pub fn validate_mode(mut self, mode: ValidationMode) -> Self {
        self.validate_mode = mode;
        self
    }

    pub fn debounce(mut self, debounce: Debounce) -> Self {
        self.debounce = Some(debounce);
        self
    }
}

pub type WatchPredicate = Arc<dyn Fn(&FieldValue, Option<&FieldValue>) -> bool + Send + Sync>;

/// Opts an uncontrolled field into publishing on change.
#[derive(Clone)]
pub enum WatchRule {
    Field(FieldKey),
    Predicate(FieldKey, WatchPredicate),
}

impl WatchRule {
    pub fn field(name: impl Into<FieldKey>) -> Self {
        WatchRule::Field(name.into())
    }

    pub fn predicate(
        name: impl Into<FieldKey>,
        predicate: impl Fn(&FieldValue, Option<&FieldValue>) -> bool + Send + Sync + 'static,
    ) -> Self {
        WatchRule::Predicate(name.into(), Arc::new(predicate))
    }

    fn matches(&self, name: &FieldKey, next: &FieldValue, previous: Option<&FieldValue>) -> bool {
        match self {
            WatchRule::Field(field) => field == name,
            WatchRule::Predicate(field, predicate) => field == name && predicate(next, previous),
        }
    }
}

impl Debug for WatchRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchRule::Field(name) => f.debug_tuple("Field").field(name).finish(),
            WatchRule::Predicate(name, _) => f.debug_tuple("Predicate").field(name).finish(),
        }
    }
}

/// Construction input for a form. Also serves as the builder returned by
/// [`FormController::builder`].
#[derive(Clone)]
pub struct FormConfig {
    pub initial_values: FormValues,
    pub options: FormOptions,
    pub schema: Option<Schema>,
    pub watch: Vec<WatchRule>,
    pub timer_queue: Option<TimerQueue>,
}

impl FormConfig {
    pub fn new(initial_values: FormValues) -> Self {
        Self {
            initial_values,
            options: FormOptions::default(),
            schema: None,
            watch: Vec::new(),
            timer_queue: None,
        }
    }

    pub fn from_model<M: FormModel>(model: M) -> Self {
        Self::new(model.into_values())
    }

    pub fn options(mut self, options: FormOptions) -> Self {
        self.options = options;
        self
    }

    pub fn validator(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn watch(mut self, rule: WatchRule) -> Self {
        self.watch.push(rule);
        self
    }

    pub fn timer_queue(mut self, queue: TimerQueue) -> Self {
        self.timer_queue = Some(queue);
        self
    }

    pub fn build(self) -> FormResult<FormController> {
        FormController::new(self)
    }
}

impl Debug for FormConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormConfig")
            .field("initial_values", &self.initial_values)
            .field("options", &self.options)
            .field("has_schema", &self.schema.is_some())
            .field("watch", &self.watch)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    Rejected { errors: FormErrors },
}

impl SubmitOutcome {
    pub fn is_submitted(&self) -> bool {
        matches!(self, SubmitOutcome::Submitted)
    }
}

#[derive(Clone)]
pub struct FormController {
    pub(super) options: FormOptions,
    pub(super) store: FormStore,
    pub(super) schema: Option<Schema>,
    pub(super) initial_values: Arc<FormValues>,
    pub(super) initial_valid: bool,
    pub(super) watch: Arc<[WatchRule]>,
    pub(super) coordinator: Option<Arc<FieldValidationCoordinator>>,
    pub(super) field_refs: Arc<RwLock<BTreeMap<FieldKey, FieldRef>>>,
}

impl FormController {
    pub fn builder(initial_values: FormValues) -> FormConfig {
        FormConfig::new(initial_values)
    }

    pub fn new(config: FormConfig) -> FormResult<Self> {
        let FormConfig {
            initial_values,
            options,
            schema,
            watch,
            timer_queue,
        } = config;

        let initial_valid = validate_form(schema.as_deref(), &initial_values).valid;
        let store = FormStore::new(FormState::new(initial_values.clone(), initial_valid));

        let timers = options.debounce.and_then(Debounce::timers);
        let coordinator = match (options.validate_mode, timers, &schema) {
            (ValidationMode::OnChange, Some(timers), Some(schema)) => {
                let queue = match timer_queue {
                    Some(queue) => queue,
                    None => TimerQueue::shared()?,
                };
                Some(Arc::new(FieldValidationCoordinator::new(
                    schema.clone(),
                    store.clone(),
                    initial_values.keys().cloned(),
                    timers,
                    &queue,
                )))
            }
            _ => None,
        };

        Ok(Self {
            options,
            store,
            schema,
            initial_values: Arc::new(initial_values),
            initial_valid,
            watch: watch.into(),
            coordinator,
            field_refs: Arc::new(RwLock::new(BTreeMap::new())),
        })
    }

    pub fn options(&self) -> FormOptions {
        self.options
    }

    pub fn is_controlled(&self) -> bool {
        self.options.input_mode == InputMode::Controlled
    }

    pub fn initial_values(&self) -> &FormValues {
        &self.initial_values
    }

    pub fn snapshot(&self) -> Arc<FormState> {
        self.store.snapshot()
    }

    pub fn values_as<M: FormModel>(&self) -> Option<M> {
        M::from_values(&self.snapshot().values)
    }

    pub fn subscribe(&self, subscriber: impl Fn(&FormState) + Send + Sync + 'static) -> Unsubscribe {
        self.store.subscribe(subscriber)
    }

    /// Runs the validator over the current values without touching state.
    pub fn validate_form(&self) -> FormValidation {
        self.validate_values(&self.snapshot().values)
    }

    fn validate_values(&self, values: &FormValues) -> FormValidation {
        validate_form(self.schema.as_deref(), values)
    }

    fn validate_single(&self, name: &FieldKey, value: &FieldValue) -> Option<String> {
        self.schema
            .as_deref()
            .and_then(|schema| validate_field(schema, name, value))
    }

    /// Field names are fixed at construction; writes to any other name are
    /// dropped so every slice stays keyed by the declared fields.
    fn is_declared(&self, name: &str) -> bool {
        let declared = self.initial_values.contains(name);
        if !declared {
            warn!(field = name, "ignoring write to an undeclared field");
        }
        declared
    }

    fn watches(&self, name: &FieldKey, next: &FieldValue, previous: Option<&FieldValue>) -> bool {
        self.options.input_mode == InputMode::Uncontrolled
            && self
                .watch
                .iter()
                .any(|rule| rule.matches(name, next, previous))
    }

    pub fn on_change(&self, event: &ChangeEvent) {
        let name = &event.name;
        if !self.is_declared(name.as_str()) {
            return;
        }
        let value = event.form_value();
        let previous = self.store.snapshot();
        let previous_value = previous.values.get(name.as_str());

        let mut should_emit = if self.is_controlled() {
            previous_value != Some(&value)
        } else {
            self.watches(name, &value, previous_value)
        };

        let mut values = previous.values.clone();
        values.insert(name.clone(), value.clone());
        let validation = self.validate_values(&values);
        let mut patch = FormPatch::default().values(values);

        if validation.valid != previous.valid {
            patch = patch.valid(validation.valid);
            should_emit = true;
        }

        let synchronous = self.coordinator.is_none()
            && self.schema.is_some()
            && self.options.validate_mode == ValidationMode::OnChange;
        if synchronous {
            let error = validation.errors.get(name.as_str()).cloned();
            if error.as_deref() != previous.error(name.as_str()) {
                let mut errors = previous.errors.clone();
                merge_field_error(&mut errors, name, error);
                patch = patch.errors(errors);
                should_emit = true;
            }
        }

        self.store.set_state(patch).emit_if(should_emit);

        if let Some(coordinator) = &self.coordinator {
            coordinator.validate(name, &value);
        }
    }

    pub fn on_blur(&self, event: &BlurEvent) {
        let name = &event.name;
        if !self.is_declared(name.as_str()) {
            return;
        }
        let state = self.store.snapshot();
        let mut patch = FormPatch::default();

        if !state.is_touched(name.as_str()) {
            let mut touched = state.touched.clone();
            touched.insert(name.clone(), true);
            patch = patch.touched(touched);
        }

        if self.options.validate_mode == ValidationMode::OnBlur && self.schema.is_some() {
            let error = self.validate_single(name, &event.value);
            if error.as_deref() != state.error(name.as_str()) {
                let mut errors = state.errors.clone();
                merge_field_error(&mut errors, name, error);
                patch = patch.errors(errors);
            }
        }

        if !patch.is_empty() {
            self.store.set_state_and_emit(patch);
        }
    }

    /// Prevents the event's default, marks every field holding a value as
    /// touched and, under the submit trigger, validates the whole form first.
    /// `handler` only runs when submission is accepted.
    pub fn submit(
        &self,
        event: &mut SubmitEvent,
        handler: impl FnOnce(&FormValues),
    ) -> SubmitOutcome {
        event.prevent_default();

        let state = self.store.snapshot();
        let mut patch = FormPatch::default();
        let mut should_emit = false;

        let mut values = state.values.clone();
        if !self.is_controlled() {
            let mut live = self.read_field_refs();
            live.retain(|name, _| self.initial_values.contains(name.as_str()));
            values.merge(&live);
            if values != state.values {
                let valid = self.validate_values(&values).valid;
                patch = patch.values(values.clone()).valid(valid);
                should_emit = true;
            }
        }

        let mut touched = state.touched.clone();
        for (name, value) in &values {
            if value.is_present() && !state.is_touched(name.as_str()) {
                touched.insert(name.clone(), true);
                should_emit = true;
            }
        }
        if touched != state.touched {
            patch = patch.touched(touched);
        }

        if self.options.validate_mode == ValidationMode::OnSubmit
            && let Some(schema) = &self.schema
        {
            let errors = schema.validate(&values).errors;
            should_emit = true;
            if !errors.is_empty() {
                debug!(errors = errors.len(), "submit rejected by validation");
                self.store.set_state_and_emit(
                    patch
                        .errors(errors.clone())
                        .submitted(true)
                        .valid(false),
                );
                return SubmitOutcome::Rejected { errors };
            }
            patch = patch.errors(errors);
        }

        if !state.submitted {
            patch = patch.submitted(true);
            should_emit = true;
        }

        self.store.set_state(patch).emit_if(should_emit);
        debug!(fields = values.len(), "submitting form values");
        handler(&values);
        SubmitOutcome::Submitted
    }

    pub fn on_submit<F>(&self, mut handler: F) -> impl FnMut(&mut SubmitEvent) + Send + Sync + use<F>
    where
        F: FnMut(&FormValues) + Send + Sync + 'static,
    {
        let controller = self.clone();
        move |event| {
            controller.submit(event, &mut handler);
        }
    }

    pub fn on_reset(&self) {
        if let Some(coordinator) = &self.coordinator {
            coordinator.cancel_all();
        }
        self.store.set_state_and_emit(
            FormState::new(self.initial_values.as_ref().clone(), self.initial_valid).into(),
        );
        if !self.is_controlled() {
            self.write_field_refs(&self.initial_values);
        }
    }

    pub fn set_field_value(
        &self,
        name: impl Into<FieldKey>,
        value: impl Into<FieldValue>,
        should_validate: bool,
    ) {
        let name = name.into();
        if !self.is_declared(name.as_str()) {
            return;
        }
        let value = value.into();
        if !self.is_controlled() {
            self.write_field_refs(&FormValues::project(&name, value.clone()));
        }

        self.store.update_and_emit(|state| {
            let mut values = state.values.clone();
            values.insert(name.clone(), value.clone());
            let mut touched = state.touched.clone();
            touched.insert(name.clone(), true);

            let mut patch = FormPatch::default()
                .valid(self.validate_values(&values).valid)
                .values(values)
                .touched(touched);
            if should_validate && self.schema.is_some() {
                let mut errors = state.errors.clone();
                merge_field_error(&mut errors, &name, self.validate_single(&name, &value));
                patch = patch.errors(errors);
            }
            patch
        });
    }

    pub fn set_fields_values(&self, mut changed: FormValues, should_validate: bool) {
        changed.retain(|name, _| self.is_declared(name.as_str()));
        if changed.is_empty() {
            return;
        }
        if !self.is_controlled() {
            self.write_field_refs(&changed);
        }

        self.store.update_and_emit(|state| {
            let mut values = state.values.clone();
            values.merge(&changed);
            let mut touched = state.touched.clone();
            touched.extend(changed.keys().map(|name| (name.clone(), true)));

            let mut patch = FormPatch::default()
                .valid(self.validate_values(&values).valid)
                .values(values)
                .touched(touched);
            if should_validate && let Some(schema) = &self.schema {
                let mut found = validate_subset(schema.as_ref(), &changed);
                let mut errors = state.errors.clone();
                for name in changed.keys() {
                    merge_field_error(&mut errors, name, found.remove(name));
                }
                patch = patch.errors(errors);
            }
            patch
        });
    }

    pub fn set_field_error(&self, name: impl Into<FieldKey>, error: impl Into<String>) {
        let name = name.into();
        if !self.is_declared(name.as_str()) {
            return;
        }
        let error = error.into();
        self.store.update_and_emit(|state| {
            let mut errors = state.errors.clone();
            errors.insert(name, error);
            FormPatch::default().errors(errors)
        });
    }

    pub fn clear_field_error(&self, name: impl Into<FieldKey>) {
        let name = name.into();
        self.store.update_and_emit(|state| {
            let mut errors = state.errors.clone();
            errors.remove(&name);
            FormPatch::default().errors(errors)
        });
    }

    pub fn set_fields_errors(&self, mut changed: FormErrors) {
        changed.retain(|name, _| self.is_declared(name.as_str()));
        self.store.update_and_emit(|state| {
            let mut errors = state.errors.clone();
            errors.extend(changed);
            FormPatch::default().errors(errors)
        });
    }

    pub fn set_field_touched(&self, name: impl Into<FieldKey>, is_touched: bool) {
        let name = name.into();
        if !self.is_declared(name.as_str()) {
            return;
        }
        self.store.update_and_emit(|state| {
            let mut touched = state.touched.clone();
            touched.insert(name, is_touched);
            FormPatch::default().touched(touched)
        });
    }

    pub fn set_fields_touched(&self, mut changed: FormTouched) {
        changed.retain(|name, _| self.is_declared(name.as_str()));
        self.store.update_and_emit(|state| {
            let mut touched = state.touched.clone();
            touched.extend(changed);
            FormPatch::default().touched(touched)
        });
    }

    pub fn reset_values(&self) {
        self.store.set_state_and_emit(
            FormPatch::default()
                .values(self.initial_values.as_ref().clone())
                .valid(self.initial_valid),
        );
        if !self.is_controlled() {
            self.write_field_refs(&self.initial_values);
        }
    }

    pub fn reset_errors(&self) {
        self.store
            .set_state_and_emit(FormPatch::default().errors(FormErrors::new()));
    }

    pub fn reset_touched(&self) {
        self.store
            .set_state_and_emit(FormPatch::default().touched(FormTouched::new()));
    }

    pub fn has_pending_validation(&self, name: &str) -> bool {
        self.coordinator
            .as_ref()
            .is_some_and(|coordinator| coordinator.is_pending(name))
    }
}

impl Debug for FormController {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormController")
            .field("options", &self.options)
            .field("initial_values", &self.initial_values)
            .field("has_schema", &self.schema.is_some())
            .field("debounced", &self.coordinator.is_some())
            .finish_non_exhaustive()
    }
}

pub(super) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(super) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
