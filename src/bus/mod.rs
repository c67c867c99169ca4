//! Command/event bus: publish/subscribe decoupling the engine, the Focus
//! Guard and external operators from any particular transport.
//!
//! Delivery contract: per-publisher order within a topic, nothing lost
//! while the link is up. `Bus::publish` never reports failure to the
//! caller.

pub mod error;
pub mod local;
pub mod message;
pub mod net;

use std::sync::mpsc;
use std::time::Duration;

pub use error::BusError;
pub use local::LocalBus;
pub use message::{Command, Event, Message, Topic};
pub use net::{BusHub, NetBus};

/// Publish/subscribe transport.
pub trait Bus: Send + Sync {
    /// Fire-and-forget publish.
    fn publish(&self, topic: Topic, message: Message);

    /// Receive everything published on `topics` from now on, merged into
    /// one stream.
    fn subscribe(&self, topics: &[Topic]) -> Subscription;
}

/// Receiving end of a bus subscription.
pub struct Subscription {
    rx: mpsc::Receiver<(Topic, Message)>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<(Topic, Message)>) -> Self {
        Self { rx }
    }

    /// Non-blocking poll for the next message.
    pub fn poll(&self) -> Option<(Topic, Message)> {
        self.rx.try_recv().ok()
    }

    /// Drain all pending messages.
    pub fn drain(&self) -> Vec<(Topic, Message)> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Block up to `timeout` for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<(Topic, Message), RecvError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => RecvError::Timeout,
            mpsc::RecvTimeoutError::Disconnected => RecvError::Closed,
        })
    }

    /// Block until the next message arrives.
    pub fn recv(&self) -> Result<(Topic, Message), RecvError> {
        self.rx.recv().map_err(|_| RecvError::Closed)
    }
}

/// Why a blocking receive returned without a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    Timeout,
    /// The bus was dropped.
    Closed,
}
