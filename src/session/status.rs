use crate::core::ConnectionState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{Level, event};

pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;
pub type StateChangeListener = Listener<ConnectionState>;

/// Handle returned on listener registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered set of callbacks.
///
/// Callbacks run outside the registry lock, so a listener may register or
/// remove listeners itself.
pub struct ListenerRegistry<T> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener<T>)>>,
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Listener<T>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, value: &T) {
        let snapshot = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect::<Vec<_>>();
        for listener in snapshot {
            listener(value);
        }
    }
}

/// Connection state of one session plus the listeners watching it.
///
/// Transitions are delivered one at a time, so every listener observes them
/// in the order they were applied. Listeners must not transition the status
/// that is calling them.
pub struct SessionStatus {
    label: String,
    state: Mutex<ConnectionState>,
    delivery: Mutex<()>,
    listeners: ListenerRegistry<ConnectionState>,
}

impl SessionStatus {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(ConnectionState::Closed),
            delivery: Mutex::new(()),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Moves to `next` and notifies listeners.
    ///
    /// Repeated reports of the current state are ignored, so transports
    /// that deliver transitions at least once do not cause duplicate
    /// notifications. Returns whether the state changed.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let _delivery = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == next {
                return false;
            }
            let previous = *state;
            event!(
                Level::DEBUG,
                session = %self.label,
                from = %previous,
                to = %next,
                "session state changed"
            );
            *state = next;
        }
        self.listeners.notify(&next);
        true
    }

    pub fn listeners(&self) -> &ListenerRegistry<ConnectionState> {
        &self.listeners
    }

    /// Registers `listener` and immediately reports the current state to it.
    ///
    /// No transition can slip between the initial report and the
    /// registration, so the listener sees the current state followed by
    /// every later transition in order.
    pub fn attach(&self, listener: StateChangeListener) -> ListenerId {
        let _delivery = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        let id = self.listeners.add(Arc::clone(&listener));
        listener(&self.state());
        id
    }

    /// Listener that mirrors a collaborator's reported state into this status.
    pub fn mirror(self: &Arc<Self>) -> StateChangeListener {
        let status = Arc::clone(self);
        Arc::new(move |state: &ConnectionState| {
            status.transition(*state);
        })
    }
}
