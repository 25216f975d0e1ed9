//! Client join and leave notifications
//!
//! Whatever composes sessions owns a [`ClientEvents`] registry. Lobby or
//! matchmaking code subscribes to it and hears about each session when it
//! becomes active and again when it goes away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::session::SessionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Added,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type ClientListener = Arc<dyn Fn(ClientEvent, &SessionHandle) + Send + Sync>;

#[derive(Default)]
pub struct ClientEvents {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, ClientListener)>>,
}

impl ClientEvents {
    pub fn new() -> ClientEvents {
        ClientEvents::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(ClientEvent, &SessionHandle) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Mark the session active and announce it. Does nothing if it already was.
    pub fn activate(&self, session: &SessionHandle) {
        if session.lock().set_active(true) {
            self.notify(ClientEvent::Added, session);
        }
    }

    /// Mark the session inactive and announce its departure. Does nothing if
    /// it was not active.
    pub fn deactivate(&self, session: &SessionHandle) {
        if session.lock().set_active(false) {
            self.notify(ClientEvent::Left, session);
        }
    }

    fn notify(&self, event: ClientEvent, session: &SessionHandle) {
        // Snapshot so listeners can subscribe or unsubscribe while being called.
        let listeners: Vec<ClientListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        debug!("Client {:?}: notifying {} listeners", event, listeners.len());
        for listener in listeners {
            listener(event, session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessSurfaceProvider, StaticCamera};
    use crate::model::view::StreamingSize;
    use crate::multiview::{MultiViewSender, RenderConfig};
    use crate::session::ClientSession;

    fn session() -> SessionHandle {
        let eye = |label: &str| {
            Arc::new(
                MultiViewSender::new(
                    label,
                    StreamingSize::new(64, 64),
                    RenderConfig::default(),
                    Arc::new(HeadlessSurfaceProvider),
                    vec![Box::new(StaticCamera::new(label))],
                )
                .unwrap(),
            )
        };
        ClientSession::builder()
            .left(eye("left"))
            .right(eye("right"))
            .build()
            .unwrap()
            .into_handle()
    }

    #[test]
    fn announces_each_transition_once() {
        let events = ClientEvents::new();
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&seen);
        events.subscribe(move |event, _| sink.lock().push(event));

        let session = session();
        events.activate(&session);
        events.activate(&session);
        events.deactivate(&session);
        events.deactivate(&session);

        assert_eq!(*seen.lock(), vec![ClientEvent::Added, ClientEvent::Left]);
        assert!(!session.lock().is_active());
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let events = ClientEvents::new();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let id = events.subscribe(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(events.unsubscribe(id));
        assert!(!events.unsubscribe(id));
        events.activate(&session());

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(events.listener_count(), 0);
    }

    #[test]
    fn listener_may_unsubscribe_itself() {
        let events = Arc::new(ClientEvents::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::default();

        let registry = Arc::clone(&events);
        let own_id = Arc::clone(&slot);
        let id = events.subscribe(move |_, _| {
            if let Some(id) = *own_id.lock() {
                registry.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        events.activate(&session());
        assert_eq!(events.listener_count(), 0);
    }

    #[test]
    fn listener_sees_session_state() {
        let events = ClientEvents::new();
        let active = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&active);
        events.subscribe(move |_, session| *sink.lock() = Some(session.lock().is_active()));

        events.activate(&session());
        assert_eq!(*active.lock(), Some(true));
    }
}
