// Subscription registry for inbound frames.
// Callbacks are keyed by topic: one frame kind, or every frame.

use log::{debug, error};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use super::frames::{EventKind, InboundFrame};

pub type Callback = Arc<dyn Fn(&InboundFrame) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Frame(EventKind),
    /// Receives every decoded frame, after the kind-specific subscribers.
    Any,
}

impl From<EventKind> for Topic {
    fn from(kind: EventKind) -> Self {
        Topic::Frame(kind)
    }
}

impl From<&str> for Topic {
    /// `"message"` subscribes to every frame. No server frame carries that type.
    fn from(name: &str) -> Self {
        if name == "message" {
            Topic::Any
        } else {
            Topic::Frame(EventKind::from_type(name))
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    next_id: u64,
    by_topic: HashMap<Topic, Vec<(u64, Callback)>>,
}

impl Registry {
    fn insert(&mut self, topic: Topic, callback: Callback) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.by_topic.entry(topic).or_default().push((id, callback));
        id
    }

    fn remove(&mut self, topic: &Topic, id: u64) -> bool {
        let Some(callbacks) = self.by_topic.get_mut(topic) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        let removed = callbacks.len() != before;
        if callbacks.is_empty() {
            self.by_topic.remove(topic);
        }
        removed
    }

    /// Kind-specific callbacks first, then catch-all ones, each in registration order.
    fn callbacks_for(&self, kind: &EventKind) -> Vec<Callback> {
        let specific = self.by_topic.get(&Topic::Frame(kind.clone()));
        let any = self.by_topic.get(&Topic::Any);
        specific
            .into_iter()
            .chain(any)
            .flat_map(|callbacks| callbacks.iter().map(|(_, cb)| cb.clone()))
            .collect()
    }
}

/// Shared handle to the registry. Cloned into the reader task of every session.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    registry: Arc<Mutex<Registry>>,
}

impl Listeners {
    pub fn add(&self, topic: Topic, callback: Callback) -> Subscription {
        let id = match self.registry.lock() {
            Ok(mut registry) => registry.insert(topic.clone(), callback),
            Err(poisoned) => poisoned.into_inner().insert(topic.clone(), callback),
        };
        Subscription {
            id,
            topic,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn clear(&self) {
        match self.registry.lock() {
            Ok(mut registry) => registry.by_topic.clear(),
            Err(poisoned) => poisoned.into_inner().by_topic.clear(),
        }
    }

    pub fn len(&self) -> usize {
        match self.registry.lock() {
            Ok(registry) => registry.by_topic.values().map(Vec::len).sum(),
            Err(poisoned) => poisoned.into_inner().by_topic.values().map(Vec::len).sum(),
        }
    }

    /// Invoke every matching callback. The registry lock is released before any
    /// callback runs so callbacks may subscribe or unsubscribe.
    pub fn dispatch(&self, frame: &InboundFrame) {
        let kind = frame.kind();
        let callbacks = match self.registry.lock() {
            Ok(registry) => registry.callbacks_for(&kind),
            Err(poisoned) => poisoned.into_inner().callbacks_for(&kind),
        };
        debug!("Dispatching {} frame to {} listener(s)", kind.as_str(), callbacks.len());

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(frame))).is_err() {
                error!("Listener for {} frame panicked", kind.as_str());
            }
        }
    }
}

/// Handle for one registration. Dropping it keeps the callback registered.
pub struct Subscription {
    id: u64,
    topic: Topic,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Remove this registration only. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = match registry.lock() {
            Ok(mut registry) => registry.remove(&self.topic, self.id),
            Err(poisoned) => poisoned.into_inner().remove(&self.topic, self.id),
        };
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frames::ErrorEvent;

    fn error_frame() -> InboundFrame {
        InboundFrame::Error(ErrorEvent {
            message: "boom".to_string(),
        })
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Callback {
        let log = log.clone();
        Arc::new(move |_frame: &InboundFrame| {
            if let Ok(mut log) = log.lock() {
                log.push(name);
            }
        })
    }

    #[test]
    fn test_specific_before_catch_all_in_registration_order() {
        let listeners = Listeners::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        listeners.add(Topic::Any, recorder(&log, "any-1"));
        listeners.add(EventKind::Error.into(), recorder(&log, "error-1"));
        listeners.add(Topic::from("message"), recorder(&log, "any-2"));
        listeners.add(Topic::from("error"), recorder(&log, "error-2"));
        listeners.add(EventKind::ChatMessage.into(), recorder(&log, "chat"));

        listeners.dispatch(&error_frame());

        let log = log.lock().expect("log lock");
        assert_eq!(*log, vec!["error-1", "error-2", "any-1", "any-2"]);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let listeners = Listeners::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        listeners.add(
            EventKind::Error.into(),
            Arc::new(|_frame: &InboundFrame| panic!("listener bug")),
        );
        listeners.add(EventKind::Error.into(), recorder(&log, "second"));
        listeners.add(Topic::Any, recorder(&log, "any"));

        listeners.dispatch(&error_frame());

        assert_eq!(*log.lock().expect("log lock"), vec!["second", "any"]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_registration() {
        let listeners = Listeners::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = listeners.add(EventKind::Error.into(), recorder(&log, "first"));
        let _second = listeners.add(EventKind::Error.into(), recorder(&log, "second"));

        assert!(first.unsubscribe());
        assert_eq!(listeners.len(), 1);

        listeners.dispatch(&error_frame());
        assert_eq!(*log.lock().expect("log lock"), vec!["second"]);
    }

    #[test]
    fn test_message_name_maps_to_catch_all() {
        assert_eq!(Topic::from("message"), Topic::Any);
        assert_eq!(Topic::from("error"), Topic::Frame(EventKind::Error));
        assert_eq!(
            Topic::from("chat_list_update"),
            Topic::Frame(EventKind::Other("chat_list_update".to_string()))
        );
    }

    #[test]
    fn test_unsubscribe_after_clear_is_harmless() {
        let listeners = Listeners::default();
        let sub = listeners.add(Topic::Any, Arc::new(|_frame: &InboundFrame| {}));
        listeners.clear();
        assert!(!sub.unsubscribe());
        assert_eq!(listeners.len(), 0);
    }
}
