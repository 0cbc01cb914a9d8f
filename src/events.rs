//! Delivery of server-pushed events (`player.onJoin`, `punkBuster.onMessage`, ...).
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::{trace, warn};
use tokio::sync::mpsc;

pub type EventCallback = Arc<dyn Fn(Vec<String>) + Send + Sync + 'static>;

/// Where the receiver puts events. Chosen once, at connect.
#[derive(Clone, Default)]
pub enum EventSink {
    /// Keep events in an unbounded FIFO for the caller to poll with
    /// [Client::next_event](crate::client::Client::next_event).
    #[default]
    Queue,
    /// Hand every event to a callback. Calls happen one at a time on a
    /// single dispatcher task, in the order the events arrived.
    Callback(EventCallback),
}

impl EventSink {
    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(Vec<String>) + Send + Sync + 'static,
    {
        EventSink::Callback(Arc::new(callback))
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSink::Queue => f.write_str("Queue"),
            EventSink::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

pub(crate) enum Events {
    Queue(Mutex<VecDeque<Vec<String>>>),
    Dispatcher(mpsc::Sender<Vec<String>>),
}

impl Events {
    /// Must be called from within a tokio runtime when `sink` is a callback.
    pub(crate) fn new(sink: EventSink, capacity: usize) -> Self {
        match sink {
            EventSink::Queue => Events::Queue(Mutex::new(VecDeque::new())),
            EventSink::Callback(callback) => {
                let (tx, mut rx) = mpsc::channel::<Vec<String>>(capacity.max(1));
                tokio::spawn(async move {
                    while let Some(words) = rx.recv().await {
                        callback(words);
                    }
                    trace!("event dispatcher stopped");
                });
                Events::Dispatcher(tx)
            }
        }
    }

    /// Waits for room when the dispatcher is backed up.
    pub(crate) async fn deliver(&self, words: Vec<String>) {
        match self {
            Events::Queue(queue) => queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(words),
            Events::Dispatcher(tx) => {
                if let Err(mpsc::error::SendError(words)) = tx.send(words).await {
                    warn!("event dispatcher is gone, dropping event {:?}", words);
                }
            }
        }
    }

    pub(crate) fn pop(&self) -> Option<Vec<String>> {
        match self {
            Events::Queue(queue) => queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front(),
            Events::Dispatcher(_) => None,
        }
    }

    pub(crate) fn drain(&self) -> Vec<Vec<String>> {
        match self {
            Events::Queue(queue) => queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect(),
            Events::Dispatcher(_) => Vec::new(),
        }
    }
}
