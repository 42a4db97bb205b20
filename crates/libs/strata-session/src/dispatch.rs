use crate::registry::{Delivery, Registry, StreamId};
use crate::stream::{ErasedStream, Notification, StreamHandle, UnsubscribeReason};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use strata_topics::{DataType, SessionError, TopicPath, TopicSelector, TopicSpecification, TopicValue};
use tokio::sync::mpsc;

struct StreamQueue {
    tx: mpsc::UnboundedSender<Notification>,
    depth: Arc<AtomicUsize>,
}

#[derive(Default)]
struct DispatchState {
    registry: Registry,
    queues: HashMap<StreamId, StreamQueue>,
    closed: bool,
}

/// Executes registry decisions. Each stream owns a queue drained by its own
/// task, so one slow stream never holds up another, while the single lock
/// around the registry keeps per-stream order equal to session order.
pub(crate) struct Dispatcher {
    label: String,
    warn_depth: usize,
    state: Mutex<DispatchState>,
}

impl Dispatcher {
    pub fn new(label: impl Into<String>, warn_depth: usize) -> Self {
        Self { label: label.into(), warn_depth, state: Mutex::new(DispatchState::default()) }
    }

    pub fn add(
        &self,
        selector: Option<TopicSelector>,
        data_type: DataType,
        stream: Box<dyn ErasedStream>,
    ) -> Result<StreamHandle, SessionError> {
        let mut state = self.lock();
        if state.closed {
            return Err(SessionError::SessionClosed);
        }
        let (id, deliveries) = state.registry.add(selector, data_type);
        state.queues.insert(id, self.spawn_stream(id, stream));
        log::debug!("session({}): stream {} added for {}", self.label, id, data_type);
        self.route(&mut state, deliveries);
        Ok(StreamHandle(id))
    }

    pub fn remove(&self, handle: StreamHandle) -> bool {
        let mut state = self.lock();
        match state.registry.remove(handle.0) {
            Some(deliveries) => {
                log::debug!("session({}): stream {} removed", self.label, handle.0);
                self.route(&mut state, deliveries);
                true
            }
            None => false,
        }
    }

    pub fn on_subscription(&self, path: TopicPath, specification: TopicSpecification) {
        let mut state = self.lock();
        log::trace!("session({}): subscribed to {}", self.label, path);
        let deliveries = state.registry.on_subscription(path, specification);
        self.route(&mut state, deliveries);
    }

    /// False when the session holds no subscription for `path`.
    pub fn on_value(&self, path: &TopicPath, value: TopicValue) -> bool {
        let mut state = self.lock();
        match state.registry.on_value(path, value) {
            Some(deliveries) => {
                self.route(&mut state, deliveries);
                true
            }
            None => false,
        }
    }

    pub fn on_unsubscription(&self, path: &TopicPath, reason: UnsubscribeReason) -> bool {
        let mut state = self.lock();
        log::trace!("session({}): unsubscribed from {} ({})", self.label, path, reason);
        match state.registry.on_unsubscription(path, reason) {
            Some(deliveries) => {
                self.route(&mut state, deliveries);
                true
            }
            None => false,
        }
    }

    /// Terminates every stream. `error` selects `on_error` over `on_close`.
    pub fn close(&self, error: Option<SessionError>) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let terminal = match error {
            Some(error) => Notification::Error(error),
            None => Notification::Close,
        };
        let deliveries = state.registry.close_all(terminal);
        self.route(&mut state, deliveries);
    }

    pub fn cached_value(&self, path: &TopicPath) -> Option<TopicValue> {
        self.lock().registry.cached_value(path).cloned()
    }

    fn route(&self, state: &mut DispatchState, deliveries: Vec<Delivery>) {
        for Delivery { stream, notification } in deliveries {
            let terminal = notification.is_terminal();
            if let Some(queue) = state.queues.get(&stream) {
                let depth = queue.depth.fetch_add(1, Ordering::Relaxed) + 1;
                if depth == self.warn_depth {
                    log::warn!("session({}): stream {} has {} pending notifications", self.label, stream, depth);
                }
                if queue.tx.send(notification).is_err() {
                    log::trace!("session({}): stream {} task already finished", self.label, stream);
                }
            }
            if terminal {
                state.queues.remove(&stream);
            }
        }
    }

    fn spawn_stream(&self, id: StreamId, mut stream: Box<dyn ErasedStream>) -> StreamQueue {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        let depth = Arc::new(AtomicUsize::new(0));
        let task_depth = depth.clone();
        let label = self.label.clone();
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                task_depth.fetch_sub(1, Ordering::Relaxed);
                if !stream.deliver(notification) {
                    break;
                }
            }
            log::trace!("session({}): stream {} task finished", label, id);
        });
        StreamQueue { tx, depth }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
