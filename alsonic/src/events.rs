//! Notifications produced in post-render and delivered off the render thread.

use crate::error::{AlSonicError, Result};
use crate::source::{SourceId, SourceState};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub enum AlSonicEvent {
    /// The resolved state of a source changed in post-render
    StateChanged {
        source_id: SourceId,
        state: SourceState,
    },
    /// Queue entries finished playing during a render cycle
    BuffersProcessed { source_id: SourceId, count: usize },
    /// A non-looping source ran out of queued data
    QueueDrained { source_id: SourceId },
    /// A looping source wrapped around to the start of its queue
    SourceLooped { source_id: SourceId },
}

impl AlSonicEvent {
    pub fn source_id(&self) -> SourceId {
        match self {
            Self::StateChanged { source_id, .. }
            | Self::BuffersProcessed { source_id, .. }
            | Self::QueueDrained { source_id }
            | Self::SourceLooped { source_id } => *source_id,
        }
    }
}

pub type EventCallback = dyn Fn(&AlSonicEvent) + Send + Sync;

type CallbackList = Arc<Mutex<Vec<Arc<EventCallback>>>>;

/// Render-side end of the notification channel. Never blocks; drops when full.
#[derive(Clone)]
pub(crate) struct EventSink {
    sender: Sender<AlSonicEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    pub(crate) fn emit(&self, event: AlSonicEvent) {
        if let Err(TrySendError::Full(_)) = self.sender.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Owner of the notification channel and the registered callbacks
pub(crate) struct EventHub {
    sink: EventSink,
    receiver: Receiver<AlSonicEvent>,
    callbacks: CallbackList,
    dispatching: bool,
}

impl EventHub {
    pub(crate) fn new(capacity: usize, dispatch: bool) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        let callbacks: CallbackList = Arc::new(Mutex::new(Vec::new()));

        if dispatch {
            let thread_receiver = receiver.clone();
            let thread_callbacks = callbacks.clone();
            // Exits once every sender is gone, i.e. when the context is dropped.
            std::thread::Builder::new()
                .name("alsonic-notify".to_string())
                .spawn(move || {
                    while let Ok(event) = thread_receiver.recv() {
                        dispatch_to(&thread_callbacks, &event);
                    }
                    log::debug!("Notification thread exiting");
                })
                .map_err(|e| {
                    AlSonicError::ResourceExhausted(format!(
                        "Failed to spawn notification thread: {}",
                        e
                    ))
                })?;
        }

        Ok(Self {
            sink: EventSink {
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            receiver,
            callbacks,
            dispatching: dispatch,
        })
    }

    pub(crate) fn sink(&self) -> &EventSink {
        &self.sink
    }

    pub(crate) fn subscribe(&self, callback: Arc<EventCallback>) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// Drain pending notifications, invoking callbacks for each one.
    ///
    /// Returns nothing when a dispatcher thread delivers them instead.
    pub(crate) fn poll(&self) -> Vec<AlSonicEvent> {
        let dropped = self.sink.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            log::warn!("{} notifications dropped: channel full", dropped);
        }
        if self.dispatching {
            return Vec::new();
        }
        let events: Vec<_> = self.receiver.try_iter().collect();
        for event in &events {
            dispatch_to(&self.callbacks, event);
        }
        events
    }
}

fn dispatch_to(callbacks: &CallbackList, event: &AlSonicEvent) {
    // Clone the list so callbacks may register further callbacks.
    let callbacks: Vec<_> = callbacks
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    for callback in callbacks {
        callback(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn drained(id: u32) -> AlSonicEvent {
        AlSonicEvent::QueueDrained {
            source_id: SourceId::new(id),
        }
    }

    #[test]
    fn poll_returns_events_in_order_and_runs_callbacks() {
        let hub = EventHub::new(8, false).unwrap();
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        hub.subscribe(Arc::new(move |_: &AlSonicEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        hub.sink().emit(drained(1));
        hub.sink().emit(drained(2));
        let events = hub.poll();
        assert_eq!(events, vec![drained(1), drained(2)]);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(hub.poll().is_empty());
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let hub = EventHub::new(1, false).unwrap();
        hub.sink().emit(drained(1));
        hub.sink().emit(drained(2));
        assert_eq!(hub.sink.dropped.load(Ordering::Relaxed), 1);
        assert_eq!(hub.poll(), vec![drained(1)]);
    }

    #[test]
    fn dispatcher_thread_delivers() {
        let hub = EventHub::new(4, true).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(4);
        hub.subscribe(Arc::new(move |event: &AlSonicEvent| {
            let _ = tx.send(event.source_id());
        }));
        hub.sink().emit(drained(7));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            SourceId::new(7)
        );
        assert!(hub.poll().is_empty());
    }
}
