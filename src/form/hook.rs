use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::binding::{BlurEvent, ChangeEvent, FieldBinding, RegisterOptions, SubmitEvent};
use super::controller::{FormConfig, FormController, FormResult, SubmitOutcome};
use super::store::{FormState, Unsubscribe};
use super::value::{FieldKey, FieldValue, FormErrors, FormTouched, FormValues};

/// One form instance shared by every binding created from it.
#[derive(Clone, Debug)]
pub struct FormHook {
    controller: FormController,
}

pub fn create_form_hook(config: FormConfig) -> FormResult<FormHook> {
    Ok(FormHook {
        controller: config.build()?,
    })
}

/// A private form instance with a single binding.
pub fn use_form(config: FormConfig) -> FormResult<UseForm> {
    Ok(UseForm::bind(config.build()?))
}

impl FormHook {
    pub fn use_form(&self) -> UseForm {
        UseForm::bind(self.controller.clone())
    }

    pub fn controller(&self) -> &FormController {
        &self.controller
    }
}

/// A consumer's view of a form: a local snapshot kept current by a store
/// subscription, plus the controller operations. Dropping it unsubscribes.
pub struct UseForm {
    controller: FormController,
    state: Arc<RwLock<Arc<FormState>>>,
    renders: Arc<AtomicUsize>,
    subscription: Option<Unsubscribe>,
}

impl UseForm {
    fn bind(controller: FormController) -> Self {
        let state = Arc::new(RwLock::new(controller.snapshot()));
        let renders = Arc::new(AtomicUsize::new(0));

        let local = state.clone();
        let counter = renders.clone();
        let subscription = controller.subscribe(move |next| {
            *local.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next.clone());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        Self {
            controller,
            state,
            renders,
            subscription: Some(subscription),
        }
    }

    pub fn state(&self) -> Arc<FormState> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn values(&self) -> FormValues {
        self.state().values.clone()
    }

    pub fn errors(&self) -> FormErrors {
        self.state().errors.clone()
    }

    pub fn touched(&self) -> FormTouched {
        self.state().touched.clone()
    }

    pub fn submitted(&self) -> bool {
        self.state().submitted
    }

    pub fn valid(&self) -> bool {
        self.state().valid
    }

    /// Number of published snapshots this binding has received.
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn controller(&self) -> &FormController {
        &self.controller
    }

    pub fn on_change(&self, event: &ChangeEvent) {
        self.controller.on_change(event);
    }

    pub fn on_blur(&self, event: &BlurEvent) {
        self.controller.on_blur(event);
    }

    pub fn submit(&self, event: &mut SubmitEvent, handler: impl FnOnce(&FormValues)) -> SubmitOutcome {
        self.controller.submit(event, handler)
    }

    pub fn on_submit<F>(&self, handler: F) -> impl FnMut(&mut SubmitEvent) + Send + Sync + use<F>
    where
        F: FnMut(&FormValues) + Send + Sync + 'static,
    {
        self.controller.on_submit(handler)
    }

    pub fn on_reset(&self) {
        self.controller.on_reset();
    }

    pub fn reset_values(&self) {
        self.controller.reset_values();
    }

    pub fn reset_errors(&self) {
        self.controller.reset_errors();
    }

    pub fn reset_touched(&self) {
        self.controller.reset_touched();
    }

    pub fn set_field_value(
        &self,
        name: impl Into<FieldKey>,
        value: impl Into<FieldValue>,
        should_validate: bool,
    ) {
        self.controller.set_field_value(name, value, should_validate);
    }

    pub fn set_fields_values(&self, values: FormValues, should_validate: bool) {
        self.controller.set_fields_values(values, should_validate);
    }

    pub fn set_field_error(&self, name: impl Into<FieldKey>, error: impl Into<String>) {
        self.controller.set_field_error(name, error);
    }

    pub fn set_fields_errors(&self, errors: FormErrors) {
        self.controller.set_fields_errors(errors);
    }

    pub fn set_field_touched(&self, name: impl Into<FieldKey>, touched: bool) {
        self.controller.set_field_touched(name, touched);
    }

    pub fn set_fields_touched(&self, touched: FormTouched) {
        self.controller.set_fields_touched(touched);
    }

    pub fn focus_field(&self, name: &str) -> bool {
        self.controller.focus_field(name)
    }

    pub fn register_input(&self, name: impl Into<FieldKey>, options: RegisterOptions) -> FieldBinding {
        self.controller.register_input(name, options)
    }

    pub fn register_checkbox(
        &self,
        name: impl Into<FieldKey>,
        options: RegisterOptions,
    ) -> FieldBinding {
        self.controller.register_checkbox(name, options)
    }

    pub fn register_radio(
        &self,
        name: impl Into<FieldKey>,
        value: impl Into<FieldValue>,
        options: RegisterOptions,
    ) -> FieldBinding {
        self.controller.register_radio(name, value, options)
    }
}

impl Drop for UseForm {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::rules::{FieldRules, ValidatorSchema, validator};

    fn shared() -> FormHook {
        create_form_hook(
            FormConfig::new(FormValues::new().with("email", ""))
                .validator(validator(ValidatorSchema::new().field("email", FieldRules::new().email()))),
        )
        .expect("form hook")
    }

    #[test]
    fn bindings_from_one_hook_share_state() {
        let hook = shared();
        let first = hook.use_form();
        let second = hook.use_form();

        first.on_change(&ChangeEvent::text("email", "a"));

        assert_eq!(second.values().get("email"), Some(&FieldValue::from("a")));
        assert_eq!(first.errors(), second.errors());
        assert!(second.errors().contains_key("email"));
        assert_eq!(first.renders(), 1);
        assert_eq!(second.renders(), 1);
    }

    #[test]
    fn dropping_a_binding_unsubscribes_it() {
        let hook = shared();
        let first = hook.use_form();
        let second = hook.use_form();
        drop(second);
        assert_eq!(hook.controller().store.subscriber_count(), 1);
        first.set_field_error("email", "taken");
        assert_eq!(first.errors().get("email").map(String::as_str), Some("taken"));
    }

    #[test]
    fn use_form_builds_an_unshared_instance() {
        let config = FormConfig::new(FormValues::new().with("name", ""));
        let first = use_form(config.clone()).expect("form");
        let second = use_form(config).expect("form");
        first.set_field_value("name", "Jack", false);
        assert_eq!(second.values().get("name"), Some(&FieldValue::from("")));
        assert_eq!(second.renders(), 0);
    }
}
