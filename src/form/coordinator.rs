use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::debug;

use super::debounce::{Debounced, TimerQueue, debounce};
use super::store::{FormPatch, FormStore};
use super::validation::{Schema, validate_field};
use super::value::{FieldKey, FieldValue, merge_field_error};

/// Field, result, and the reset epoch the result was computed in.
type ErrorDispatch = Debounced<(FieldKey, Option<String>, u64)>;

/// Per-field `in`/`out` dispatchers. `in` commits a newly found error, `out`
/// clears a resolved one; both directions are timed independently.
pub struct DebounceState {
    incoming: BTreeMap<FieldKey, ErrorDispatch>,
    outgoing: BTreeMap<FieldKey, ErrorDispatch>,
    epoch: Arc<AtomicU64>,
}

impl DebounceState {
    pub fn new<'a>(
        fields: impl IntoIterator<Item = &'a FieldKey>,
        timers: DebounceTimers,
        store: &FormStore,
        queue: &TimerQueue,
    ) -> Self {
        let epoch = Arc::new(AtomicU64::new(0));
        let mut incoming = BTreeMap::new();
        let mut outgoing = BTreeMap::new();
        for field in fields {
            incoming.insert(field.clone(), dispatcher(store, &epoch, timers.incoming, queue));
            outgoing.insert(field.clone(), dispatcher(store, &epoch, timers.outgoing, queue));
        }
        Self {
            incoming,
            outgoing,
            epoch,
        }
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.incoming.get(name).is_some_and(Debounced::is_pending)
            || self.outgoing.get(name).is_some_and(Debounced::is_pending)
    }

    /// Drops queued dispatches. A dispatch the timer worker already picked up
    /// is discarded when it reaches the store.
    pub fn cancel_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for dispatch in self.incoming.values().chain(self.outgoing.values()) {
            dispatch.cancel();
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DebounceTimers {
    pub incoming: Duration,
    pub outgoing: Duration,
}

fn dispatcher(
    store: &FormStore,
    epoch: &Arc<AtomicU64>,
    wait: Duration,
    queue: &TimerQueue,
) -> ErrorDispatch {
    let store = store.clone();
    let epoch = epoch.clone();
    debounce(
        move |(name, error, issued): (FieldKey, Option<String>, u64)| {
            commit_error(&store, &epoch, issued, &name, error);
        },
        wait,
        queue,
    )
}

/// Merges a debounced result into the store unless a reset happened after it
/// was issued. The epoch is compared under the store's write lock.
fn commit_error(
    store: &FormStore,
    epoch: &AtomicU64,
    issued: u64,
    name: &FieldKey,
    error: Option<String>,
) {
    let has_error = error.is_some();
    let mut committed = false;
    store.update(|state| {
        if epoch.load(Ordering::SeqCst) != issued {
            return FormPatch::default();
        }
        committed = true;
        let mut errors = state.errors.clone();
        merge_field_error(&mut errors, name, error);
        FormPatch::default().errors(errors)
    });

    if committed {
        debug!(field = %name, has_error, "committing debounced field error");
        store.emit();
    } else {
        debug!(field = %name, "dropping debounced field error issued before reset");
    }
}

/// Decides how a single field change under the `change` trigger reaches the
/// store when a debounce window is configured.
pub struct FieldValidationCoordinator {
    schema: Schema,
    store: FormStore,
    debounce: DebounceState,
}

impl FieldValidationCoordinator {
    pub fn new(
        schema: Schema,
        store: FormStore,
        fields: impl IntoIterator<Item = FieldKey>,
        timers: DebounceTimers,
        queue: &TimerQueue,
    ) -> Self {
        let fields = fields.into_iter().collect::<Vec<_>>();
        let debounce = DebounceState::new(&fields, timers, &store, queue);
        Self {
            schema,
            store,
            debounce,
        }
    }

    /// Validates `name` against a one-field projection and queues the
    /// matching dispatch. Names outside the initial value set are ignored.
    pub fn validate(&self, name: &FieldKey, value: &FieldValue) {
        let (Some(incoming), Some(outgoing)) = (
            self.debounce.incoming.get(name),
            self.debounce.outgoing.get(name),
        ) else {
            return;
        };

        let epoch = self.debounce.epoch();
        match validate_field(&*self.schema, name, value) {
            Some(error) => {
                debug!(field = %name, wait = ?incoming.wait(), "scheduling field error");
                incoming.call((name.clone(), Some(error), epoch));
                outgoing.cancel();
            }
            None => {
                if self.store.snapshot().errors.contains_key(name) {
                    debug!(field = %name, wait = ?outgoing.wait(), "scheduling field error clear");
                    outgoing.call((name.clone(), None, epoch));
                }
                incoming.cancel();
            }
        }
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.debounce.is_pending(name)
    }

    pub fn cancel_all(&self) {
        self.debounce.cancel_all();
    }
}
