use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::controller::{FormController, read_lock, write_lock};
use super::value::{FieldKey, FieldValue, FormValues};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    #[default]
    Text,
    Checkbox,
    Radio,
}

/// A live input owned by the UI layer. Uncontrolled forms read and write it
/// directly instead of round-tripping through the store.
pub trait InputHandle: Send + Sync {
    fn kind(&self) -> InputKind;

    /// Current text value; for radio options, the option's own value.
    fn value(&self) -> FieldValue;

    fn set_value(&self, value: &FieldValue);

    fn checked(&self) -> bool;

    fn set_checked(&self, checked: bool);

    fn focus(&self);
}

pub type InputRef = Arc<dyn InputHandle>;

#[derive(Clone)]
pub enum FieldRef {
    Single(InputRef),
    Group(Vec<InputRef>),
}

impl FieldRef {
    pub(super) fn write(&self, value: &FieldValue) {
        match self {
            FieldRef::Single(handle) => match handle.kind() {
                InputKind::Checkbox => handle.set_checked(value.is_truthy()),
                InputKind::Radio => handle.set_checked(&handle.value() == value),
                InputKind::Text => handle.set_value(value),
            },
            FieldRef::Group(handles) => {
                for handle in handles {
                    handle.set_checked(&handle.value() == value);
                }
            }
        }
    }

    pub(super) fn read(&self) -> Option<FieldValue> {
        match self {
            FieldRef::Single(handle) => match handle.kind() {
                InputKind::Checkbox => Some(FieldValue::Bool(handle.checked())),
                _ => Some(handle.value()),
            },
            FieldRef::Group(handles) => handles
                .iter()
                .find(|handle| handle.checked())
                .map(|handle| handle.value()),
        }
    }

    fn focus(&self) -> bool {
        match self {
            FieldRef::Single(handle) => {
                handle.focus();
                true
            }
            FieldRef::Group(handles) => {
                let target = handles
                    .iter()
                    .find(|handle| handle.checked())
                    .or_else(|| handles.first());
                target.inspect(|handle| handle.focus()).is_some()
            }
        }
    }
}

impl Debug for FieldRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldRef::Single(_) => f.write_str("FieldRef::Single"),
            FieldRef::Group(handles) => write!(f, "FieldRef::Group({})", handles.len()),
        }
    }
}

#[derive(Default)]
struct HeadlessState {
    value: FieldValue,
    checked: bool,
    focus_count: usize,
}

/// In-memory `InputHandle` for headless hosts and tests.
pub struct HeadlessInput {
    kind: InputKind,
    state: Mutex<HeadlessState>,
}

impl HeadlessInput {
    pub fn text() -> Arc<Self> {
        Arc::new(Self::with_kind(InputKind::Text, FieldValue::default()))
    }

    pub fn checkbox() -> Arc<Self> {
        Arc::new(Self::with_kind(InputKind::Checkbox, FieldValue::default()))
    }

    pub fn radio(option: impl Into<FieldValue>) -> Arc<Self> {
        Arc::new(Self::with_kind(InputKind::Radio, option.into()))
    }

    fn with_kind(kind: InputKind, value: FieldValue) -> Self {
        Self {
            kind,
            state: Mutex::new(HeadlessState {
                value,
                ..HeadlessState::default()
            }),
        }
    }

    pub fn focus_count(&self) -> usize {
        self.lock().focus_count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InputHandle for HeadlessInput {
    fn kind(&self) -> InputKind {
        self.kind
    }

    fn value(&self) -> FieldValue {
        self.lock().value.clone()
    }

    fn set_value(&self, value: &FieldValue) {
        self.lock().value = value.clone();
    }

    fn checked(&self) -> bool {
        self.lock().checked
    }

    fn set_checked(&self, checked: bool) {
        self.lock().checked = checked;
    }

    fn focus(&self) {
        self.lock().focus_count += 1;
    }
}

/// Attributes passed through to the rendered input untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterOptions {
    pub id: Option<String>,
    pub required: bool,
    pub disabled: bool,
    pub read_only: bool,
    pub max: Option<String>,
    pub max_length: Option<usize>,
    pub min: Option<String>,
    pub min_length: Option<usize>,
    pub pattern: Option<String>,
    pub placeholder: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub name: FieldKey,
    pub value: FieldValue,
    pub kind: InputKind,
    pub checked: bool,
}

impl ChangeEvent {
    pub fn text(name: impl Into<FieldKey>, value: impl Into<FieldValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: InputKind::Text,
            checked: false,
        }
    }

    pub fn checkbox(name: impl Into<FieldKey>, checked: bool) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::default(),
            kind: InputKind::Checkbox,
            checked,
        }
    }

    pub fn radio(name: impl Into<FieldKey>, value: impl Into<FieldValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: InputKind::Radio,
            checked: true,
        }
    }

    /// Value committed to the store; checkboxes coerce to their checked flag.
    pub fn form_value(&self) -> FieldValue {
        match self.kind {
            InputKind::Checkbox => FieldValue::Bool(self.checked),
            _ => self.value.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlurEvent {
    pub name: FieldKey,
    pub value: FieldValue,
}

impl BlurEvent {
    pub fn new(name: impl Into<FieldKey>, value: impl Into<FieldValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubmitEvent {
    default_prevented: bool,
}

impl SubmitEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

/// Everything an input needs to wire itself to a form. Controlled forms fill
/// `value`/`checked`; uncontrolled forms fill the `default_*` pair instead.
#[derive(Clone)]
pub struct FieldBinding {
    pub name: FieldKey,
    pub kind: InputKind,
    pub value: Option<FieldValue>,
    pub default_value: Option<FieldValue>,
    pub checked: Option<bool>,
    pub default_checked: Option<bool>,
    pub option_value: Option<FieldValue>,
    pub options: RegisterOptions,
    controller: FormController,
}

impl FieldBinding {
    /// Records `handle` as the field's back-reference and syncs it with the
    /// current store value. Only the first handle of a text or checkbox field
    /// is kept; radio options accumulate once each.
    pub fn attach(&self, handle: InputRef) {
        self.controller.attach_field_ref(&self.name, self.kind, handle);
    }

    pub fn on_change(&self, event: &ChangeEvent) {
        self.controller.on_change(event);
    }

    pub fn on_blur(&self, event: &BlurEvent) {
        self.controller.on_blur(event);
    }
}

impl Debug for FieldBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldBinding")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("default_value", &self.default_value)
            .field("checked", &self.checked)
            .field("default_checked", &self.default_checked)
            .field("option_value", &self.option_value)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl FormController {
    pub fn register_input(
        &self,
        name: impl Into<FieldKey>,
        options: RegisterOptions,
    ) -> FieldBinding {
        let name = name.into();
        let current = self
            .snapshot()
            .values
            .get(name.as_str())
            .cloned()
            .unwrap_or_default();
        let (value, default_value) = if self.is_controlled() {
            (Some(current), None)
        } else {
            (None, Some(current))
        };
        FieldBinding {
            name,
            kind: InputKind::Text,
            value,
            default_value,
            checked: None,
            default_checked: None,
            option_value: None,
            options,
            controller: self.clone(),
        }
    }

    pub fn register_checkbox(
        &self,
        name: impl Into<FieldKey>,
        options: RegisterOptions,
    ) -> FieldBinding {
        let name = name.into();
        let checked = self
            .snapshot()
            .values
            .get(name.as_str())
            .is_some_and(FieldValue::is_truthy);
        self.checked_binding(name, InputKind::Checkbox, checked, None, options)
    }

    pub fn register_radio(
        &self,
        name: impl Into<FieldKey>,
        value: impl Into<FieldValue>,
        options: RegisterOptions,
    ) -> FieldBinding {
        let name = name.into();
        let value = value.into();
        let checked = self.snapshot().values.get(name.as_str()) == Some(&value);
        self.checked_binding(name, InputKind::Radio, checked, Some(value), options)
    }

    fn checked_binding(
        &self,
        name: FieldKey,
        kind: InputKind,
        checked: bool,
        option_value: Option<FieldValue>,
        options: RegisterOptions,
    ) -> FieldBinding {
        let (checked, default_checked) = if self.is_controlled() {
            (Some(checked), None)
        } else {
            (None, Some(checked))
        };
        FieldBinding {
            name,
            kind,
            value: None,
            default_value: None,
            checked,
            default_checked,
            option_value,
            options,
            controller: self.clone(),
        }
    }

    /// Focuses the field's attached input. Returns `false` when nothing is
    /// attached under `name`.
    pub fn focus_field(&self, name: &str) -> bool {
        let field_ref = read_lock(&self.field_refs).get(name).cloned();
        let focused = field_ref.is_some_and(|field_ref| field_ref.focus());
        if !focused {
            warn!(field = name, "focus requested for a field without an attached input");
        }
        focused
    }

    pub fn field_ref(&self, name: &str) -> Option<FieldRef> {
        read_lock(&self.field_refs).get(name).cloned()
    }

    pub(super) fn attach_field_ref(&self, name: &FieldKey, kind: InputKind, handle: InputRef) {
        let current = self.snapshot().values.get(name.as_str()).cloned();
        let mut refs = write_lock(&self.field_refs);
        match kind {
            InputKind::Radio => {
                let group = refs
                    .entry(name.clone())
                    .or_insert_with(|| FieldRef::Group(Vec::new()));
                let FieldRef::Group(handles) = group else {
                    return;
                };
                if handles.iter().any(|known| Arc::ptr_eq(known, &handle)) {
                    return;
                }
                handle.set_checked(current.as_ref() == Some(&handle.value()));
                handles.push(handle);
            }
            InputKind::Checkbox | InputKind::Text => {
                if refs.contains_key(name) {
                    return;
                }
                let field_ref = FieldRef::Single(handle);
                if let Some(current) = current {
                    field_ref.write(&current);
                }
                refs.insert(name.clone(), field_ref);
            }
        }
    }

    pub(super) fn write_field_refs(&self, values: &FormValues) {
        let refs = read_lock(&self.field_refs);
        for (name, value) in values {
            if let Some(field_ref) = refs.get(name.as_str()) {
                field_ref.write(value);
            }
        }
    }

    pub(super) fn read_field_refs(&self) -> FormValues {
        read_lock(&self.field_refs)
            .iter()
            .filter_map(|(name, field_ref)| Some((name.clone(), field_ref.read()?)))
            .collect()
    }
}
