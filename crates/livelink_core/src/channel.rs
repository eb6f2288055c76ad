//! Replay-last-value channels.
//!
//! A [`Channel`] is the handle every connector operation returns. It keeps
//! the most recent event and forwards every later event to all live
//! subscribers:
//! - A subscriber that joins late immediately receives the current event
//! - Events reach each subscriber in push order
//! - Subscribers that were dropped are pruned on the next push
//!
//! Only the connector and its stores push onto channels. Callers can peek,
//! await or subscribe.
//!
//! # Usage
//!
//! ```rust,ignore
//! let channel = connector.load_entity("notes", 1)?;
//!
//! // Wait for the first value
//! let note = channel.first().await?;
//!
//! // Follow every later update
//! let mut updates = channel.subscribe();
//! while let Some(event) = updates.next().await {
//!     println!("{:?}", event);
//! }
//! ```

use crate::error::{ConnectorError, ConnectorResult, InterfaceError};
use futures::Stream;
use parking_lot::Mutex;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A single channel event: a value or the error that ended the operation.
pub type Event<T> = Result<T, InterfaceError>;

struct State<T> {
    latest: Option<Event<T>>,
    subscribers: Vec<UnboundedSender<Event<T>>>,
    pushes: u64,
}

/// A multi-subscriber push stream that retains its latest event.
///
/// Cloning a channel yields another handle to the same stream.
pub struct Channel<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T: Clone> Channel<T> {
    /// Creates an empty channel.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                latest: None,
                subscribers: Vec::new(),
                pushes: 0,
            })),
        }
    }

    /// Creates a channel already holding `value`.
    pub(crate) fn with_value(value: T) -> Self {
        let channel = Self::new();
        channel.push(value);
        channel
    }

    /// Pushes a value to every subscriber and retains it.
    pub(crate) fn push(&self, value: T) {
        self.emit(Ok(value));
    }

    /// Pushes an error to every subscriber and retains it.
    pub(crate) fn fail(&self, error: InterfaceError) {
        self.emit(Err(error));
    }

    fn emit(&self, event: Event<T>) {
        let mut state = self.state.lock();
        state.pushes += 1;
        state
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
        state.latest = Some(event);
    }

    /// Returns the latest event, if any.
    pub fn latest(&self) -> Option<Event<T>> {
        self.state.lock().latest.clone()
    }

    /// Returns the latest value, if the latest event is a value.
    pub fn value(&self) -> Option<T> {
        match self.state.lock().latest.as_ref() {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Returns the latest error, if the latest event is an error.
    pub fn error(&self) -> Option<InterfaceError> {
        match self.state.lock().latest.as_ref() {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }

    /// Returns true if nothing was pushed yet.
    pub fn is_pending(&self) -> bool {
        self.state.lock().latest.is_none()
    }

    /// Returns the number of events pushed so far.
    pub fn push_count(&self) -> u64 {
        self.state.lock().pushes
    }

    /// Subscribes to this channel.
    ///
    /// The subscription first yields the latest event (if any), then every
    /// subsequent event.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        if let Some(latest) = state.latest.as_ref() {
            // receiver is alive, the send cannot fail
            let _ = tx.send(latest.clone());
        }
        state.subscribers.push(tx);
        Subscription { rx }
    }

    /// Subscribes without replaying the current event.
    pub fn subscribe_updates(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().subscribers.push(tx);
        Subscription { rx }
    }

    /// Resolves with the latest event, or waits for the first one.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Interface`] if the event is an error.
    pub async fn first(&self) -> ConnectorResult<T> {
        let mut subscription = self.subscribe();
        Self::resolve(subscription.next().await)
    }

    /// Ignores the current event and waits for the next push.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Interface`] if the event is an error.
    pub async fn next_update(&self) -> ConnectorResult<T> {
        let mut subscription = self.subscribe_updates();
        Self::resolve(subscription.next().await)
    }

    fn resolve(event: Option<Event<T>>) -> ConnectorResult<T> {
        match event {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => Err(ConnectorError::Interface(error)),
            None => Err(ConnectorError::ChannelClosed),
        }
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Returns true if both handles refer to the same channel.
    pub fn same(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.state, &b.state)
    }
}

impl<T: Clone> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Channel")
            .field("latest", &state.latest)
            .field("subscribers", &state.subscribers.len())
            .field("pushes", &state.pushes)
            .finish()
    }
}

/// A subscription to a [`Channel`].
///
/// Also usable as a [`Stream`] of events.
pub struct Subscription<T> {
    rx: UnboundedReceiver<Event<T>>,
}

impl<T> Subscription<T> {
    /// Waits for the next event.
    ///
    /// Returns `None` once every handle to the channel is gone.
    pub async fn next(&mut self) -> Option<Event<T>> {
        self.rx.recv().await
    }

    /// Returns the next buffered event without waiting.
    pub fn try_next(&mut self) -> Option<Event<T>> {
        self.rx.try_recv().ok()
    }

    /// Drains every buffered event.
    pub fn drain(&mut self) -> Vec<Event<T>> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Event<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
