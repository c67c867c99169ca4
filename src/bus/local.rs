//! In-process bus over `std::sync::mpsc`.

use std::sync::{mpsc, Mutex};

use super::{Bus, Message, Subscription, Topic};

struct Subscriber {
    topics: Vec<Topic>,
    tx: mpsc::Sender<(Topic, Message)>,
}

/// Fan-out bus for a single process. Dropped subscriptions are pruned on
/// the next publish.
#[derive(Default)]
pub struct LocalBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Bus for LocalBus {
    fn publish(&self, topic: Topic, message: Message) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|sub| {
            !sub.topics.contains(&topic) || sub.tx.send((topic, message.clone())).is_ok()
        });
    }

    fn subscribe(&self, topics: &[Topic]) -> Subscription {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber {
                topics: topics.to_vec(),
                tx,
            });
        Subscription::new(rx)
    }
}
