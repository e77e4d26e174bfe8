use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde::Serialize;
use tracing::trace;

use super::value::{FormErrors, FormTouched, FormValues};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FormState {
    pub values: FormValues,
    pub errors: FormErrors,
    pub touched: FormTouched,
    pub submitted: bool,
    pub valid: bool,
}

impl FormState {
    pub fn new(values: FormValues, valid: bool) -> Self {
        Self {
            values,
            errors: FormErrors::new(),
            touched: FormTouched::new(),
            submitted: false,
            valid,
        }
    }

    pub fn is_touched(&self, name: &str) -> bool {
        self.touched.get(name).copied().unwrap_or(false)
    }

    pub fn error(&self, name: &str) -> Option<&str> {
        self.errors.get(name).map(String::as_str)
    }
}

/// Top-level slices to replace. Slices left as `None` keep their current
/// value; nested maps are replaced wholesale, so callers spread them first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormPatch {
    pub values: Option<FormValues>,
    pub errors: Option<FormErrors>,
    pub touched: Option<FormTouched>,
    pub submitted: Option<bool>,
    pub valid: Option<bool>,
}

impl FormPatch {
    pub fn values(mut self, values: FormValues) -> Self {
        self.values = Some(values);
        self
    }

    pub fn errors(mut self, errors: FormErrors) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn touched(mut self, touched: FormTouched) -> Self {
        self.touched = Some(touched);
        self
    }

    pub fn submitted(mut self, submitted: bool) -> Self {
        self.submitted = Some(submitted);
        self
    }

    pub fn valid(mut self, valid: bool) -> Self {
        self.valid = Some(valid);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    fn apply(self, previous: &FormState) -> FormState {
        FormState {
            values: self.values.unwrap_or_else(|| previous.values.clone()),
            errors: self.errors.unwrap_or_else(|| previous.errors.clone()),
            touched: self.touched.unwrap_or_else(|| previous.touched.clone()),
            submitted: self.submitted.unwrap_or(previous.submitted),
            valid: self.valid.unwrap_or(previous.valid),
        }
    }
}

impl From<FormState> for FormPatch {
    fn from(state: FormState) -> Self {
        Self {
            values: Some(state.values),
            errors: Some(state.errors),
            touched: Some(state.touched),
            submitted: Some(state.submitted),
            valid: Some(state.valid),
        }
    }
}

pub type Subscriber = Arc<dyn Fn(&FormState) + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriberId(u64);

static SUBSCRIBER_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

impl SubscriberId {
    fn next() -> Self {
        Self(SUBSCRIBER_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

type SubscriberList = RwLock<Vec<(SubscriberId, Subscriber)>>;

/// Observable holder of the canonical `FormState`.
///
/// Mutation (`set_state`/`update`) and publication (`emit`) are separate
/// steps, so a handler can batch several slice updates and notify once.
#[derive(Clone)]
pub struct FormStore {
    state: Arc<RwLock<Arc<FormState>>>,
    subscribers: Arc<SubscriberList>,
}

impl FormStore {
    pub fn new(initial: FormState) -> Self {
        Self {
            state: Arc::new(RwLock::new(Arc::new(initial))),
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn snapshot(&self) -> Arc<FormState> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_state(&self, patch: FormPatch) -> &Self {
        self.update(move |_| patch)
    }

    pub fn update(&self, f: impl FnOnce(&FormState) -> FormPatch) -> &Self {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let next = f(&state).apply(&state);
        *state = Arc::new(next);
        self
    }

    pub fn emit(&self) {
        self.emit_if(true);
    }

    pub fn emit_if(&self, should_emit: bool) {
        if !should_emit {
            return;
        }
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, subscriber)| subscriber.clone())
            .collect::<Vec<_>>();
        let snapshot = self.snapshot();
        trace!(subscribers = subscribers.len(), "publishing form state");
        for subscriber in subscribers {
            subscriber(&snapshot);
        }
    }

    pub fn set_state_and_emit(&self, patch: FormPatch) {
        self.set_state(patch).emit();
    }

    pub fn update_and_emit(&self, f: impl FnOnce(&FormState) -> FormPatch) {
        self.update(f).emit();
    }

    pub fn subscribe(&self, subscriber: impl Fn(&FormState) + Send + Sync + 'static) -> Unsubscribe {
        let id = SubscriberId::next();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(subscriber)));
        Unsubscribe {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Removes one subscription from its store. Dropping it without calling
/// [`Unsubscribe::unsubscribe`] leaves the subscription active.
#[must_use = "dropping an Unsubscribe keeps the subscription alive forever"]
pub struct Unsubscribe {
    id: SubscriberId,
    subscribers: Weak<SubscriberList>,
}

impl Unsubscribe {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn store() -> FormStore {
        FormStore::new(FormState::new(
            FormValues::new().with("foo", "foo").with("bar", "bar"),
            true,
        ))
    }

    #[test]
    fn set_state_merges_top_level_slices_without_emitting() {
        let store = store();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _subscription = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set_state(FormPatch::default().submitted(true));
        let snapshot = store.snapshot();
        assert!(snapshot.submitted);
        assert_eq!(snapshot.values.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        store.emit();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        store.emit_if(false);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_slices_are_replaced_not_deep_merged() {
        let store = store();
        store.set_state(FormPatch::default().values(FormValues::new().with("foo", "x")));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.values.len(), 1);
        assert!(snapshot.values.get("bar").is_none());
    }

    #[test]
    fn subscribers_run_in_subscription_order_with_latest_snapshot() {
        let store = store();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = seen.clone();
        let second = seen.clone();
        let _a = store.subscribe(move |state| {
            first
                .lock()
                .expect("lock seen")
                .push(("first", state.submitted));
        });
        let _b = store.subscribe(move |state| {
            second
                .lock()
                .expect("lock seen")
                .push(("second", state.submitted));
        });

        store.update_and_emit(|_| FormPatch::default().submitted(true));
        assert_eq!(
            *seen.lock().expect("lock seen"),
            vec![("first", true), ("second", true)]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let store = store();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.emit();
        subscription.unsubscribe();
        store.emit();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_can_read_store_while_being_notified() {
        let store = store();
        let reader = store.clone();
        let observed = Arc::new(Mutex::new(None));
        let sink = observed.clone();
        let _subscription = store.subscribe(move |_| {
            *sink.lock().expect("lock observed") = Some(reader.snapshot().submitted);
        });
        store.set_state_and_emit(FormPatch::default().submitted(true));
        assert_eq!(*observed.lock().expect("lock observed"), Some(true));
    }

    #[test]
    fn earlier_snapshots_are_not_affected_by_later_updates() {
        let store = store();
        let before = store.snapshot();
        store.set_state(FormPatch::default().valid(false));
        assert!(before.valid);
        assert!(!store.snapshot().valid);
    }
}
