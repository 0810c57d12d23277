use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-coach broadcast of committed schedule events.
#[derive(Debug, Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a coach's events, creating the channel on first use.
    pub fn subscribe(&self, coach_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(coach_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Stream of a coach's events that gives its channel back on drop.
    pub fn watch(self: &Arc<Self>, coach_id: Ulid) -> Subscription {
        Subscription {
            events: Some(BroadcastStream::new(self.subscribe(coach_id))),
            hub: Arc::clone(self),
            coach_id,
        }
    }

    /// No-op when nobody listens.
    pub fn send(&self, event: &Event) {
        let coach_id = event.coach_id();
        let Some(sender) = self.channels.get(&coach_id) else {
            return;
        };
        if sender.send(event.clone()).is_err() {
            // Every receiver is gone; drop the channel so the map stays small.
            drop(sender);
            self.release(&coach_id);
        }
    }

    /// Remove a coach's channel once nobody holds a receiver.
    fn release(&self, coach_id: &Ulid) {
        self.channels
            .remove_if(coach_id, |_, tx| tx.receiver_count() == 0);
    }

    pub fn subscriber_count(&self, coach_id: &Ulid) -> usize {
        self.channels
            .get(coach_id)
            .map_or(0, |tx| tx.receiver_count())
    }
}

#[derive(Debug)]
pub struct Subscription {
    events: Option<BroadcastStream<Event>>,
    hub: Arc<NotifyHub>,
    coach_id: Ulid,
}

impl Stream for Subscription {
    type Item = Result<Event, BroadcastStreamRecvError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.events.as_mut() {
            Some(events) => Pin::new(events).poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The receiver has to go first or the channel still counts it.
        drop(self.events.take());
        self.hub.release(&self.coach_id);
    }
}
