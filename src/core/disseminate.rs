use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use super::event::{Event, EventFilter, EventKind};

/// How a subscription behaves once its buffer is full.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// The oldest buffered events are dropped to make room for new ones.
    #[default]
    DropOldest,
    /// New events are rejected for the subscriber and counted as rejected.
    Backpressure,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
enum EventSink {
    DropOldest(broadcast::Sender<Event>),
    Backpressure(mpsc::Sender<Event>),
}

#[derive(Debug)]
enum EventSource {
    DropOldest(broadcast::Receiver<Event>),
    Backpressure(mpsc::Receiver<Event>),
}

#[derive(Debug)]
struct Subscriber {
    filter: EventFilter,
    sink: EventSink,
    dropped: Arc<AtomicU64>,
}

impl Subscriber {
    fn is_closed(&self) -> bool {
        match &self.sink {
            EventSink::DropOldest(tx) => tx.receiver_count() == 0,
            EventSink::Backpressure(tx) => tx.is_closed(),
        }
    }

    /// Never waits, returns `false` if the event was rejected.
    fn offer(&self, event: Event) -> bool {
        match &self.sink {
            EventSink::DropOldest(tx) => tx.send(event).is_ok(),
            EventSink::Backpressure(tx) => match tx.try_send(event) {
                Ok(()) => true,
                Err(_) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    false
                }
            },
        }
    }
}

/// A stream of events matching the filter it was created with.
///
/// Events of one member arrive in the order of its transitions. A subscriber that
/// falls more than its buffer size behind loses events according to its
/// [`OverflowStrategy`]; the number of lost events is reported by [`Subscription::dropped`].
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    strategy: OverflowStrategy,
    source: EventSource,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub fn overflow_strategy(&self) -> OverflowStrategy {
        self.strategy
    }

    /// Number of events this subscription lost to overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Waits for the next event, `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        match &mut self.source {
            EventSource::DropOldest(rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("subscription {:?} lagged by {n} events", self.id);
                        self.dropped.fetch_add(n, Ordering::Relaxed);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            EventSource::Backpressure(rx) => rx.recv().await,
        }
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        match &mut self.source {
            EventSource::DropOldest(rx) => loop {
                match rx.try_recv() {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        self.dropped.fetch_add(n, Ordering::Relaxed);
                    }
                    Err(_) => return None,
                }
            },
            EventSource::Backpressure(rx) => rx.try_recv().ok(),
        }
    }
}

/// Publishes membership events to subscribers.
#[derive(Debug)]
pub(crate) struct EventDisseminator {
    addr: String,
    subscribers: DashMap<SubscriptionId, Subscriber>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    buffer_size: usize,
    strategy: OverflowStrategy,
}

impl EventDisseminator {
    pub(crate) fn new(
        addr: impl Into<String>,
        buffer_size: usize,
        strategy: OverflowStrategy,
    ) -> Self {
        Self {
            addr: addr.into(),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            // broadcast channels round up, so both strategies share that capacity
            buffer_size: buffer_size.max(1).next_power_of_two(),
            strategy,
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.subscribe_with(filter, self.strategy)
    }

    pub(crate) fn subscribe_with(
        &self,
        filter: EventFilter,
        strategy: OverflowStrategy,
    ) -> Subscription {
        self.subscribe_with_initial(filter, strategy, vec![])
    }

    /// Creates a subscription whose buffer starts with `initial` events,
    /// ahead of anything published afterwards.
    pub(crate) fn subscribe_with_initial(
        &self,
        filter: EventFilter,
        strategy: OverflowStrategy,
        initial: Vec<EventKind>,
    ) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let dropped = Arc::new(AtomicU64::new(0));

        let (sink, source) = match strategy {
            OverflowStrategy::DropOldest => {
                let (tx, rx) = broadcast::channel(self.buffer_size);
                (EventSink::DropOldest(tx), EventSource::DropOldest(rx))
            }
            OverflowStrategy::Backpressure => {
                let (tx, rx) = mpsc::channel(self.buffer_size);
                (EventSink::Backpressure(tx), EventSource::Backpressure(rx))
            }
        };

        let subscriber = Subscriber {
            filter: filter.clone(),
            sink,
            dropped: dropped.clone(),
        };
        for kind in initial.into_iter().filter(|kind| filter.matches(kind)) {
            subscriber.offer(self.stamp(kind));
        }
        self.subscribers.insert(id, subscriber);

        tracing::debug!("[{}] added subscription {id:?} for {filter:?}", &self.addr);

        Subscription {
            id,
            filter,
            strategy,
            source,
            dropped,
        }
    }

    /// Returns `false` if no subscription with `id` existed.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Delivers `events` in order to every matching subscriber. Never waits.
    pub(crate) fn publish(&self, events: Vec<EventKind>) {
        if events.is_empty() {
            return;
        }

        self.subscribers.retain(|_, subscriber| !subscriber.is_closed());

        for kind in events {
            tracing::info!("[{}] publishing {kind:?}", &self.addr);
            let event = self.stamp(kind);

            for entry in self.subscribers.iter() {
                let subscriber = entry.value();
                if subscriber.filter.matches(event.kind()) && !subscriber.offer(event.clone()) {
                    tracing::warn!(
                        "[{}] subscription {:?} is full, event {} rejected",
                        &self.addr,
                        entry.key(),
                        event.seq()
                    );
                }
            }
        }
    }

    /// Drops every subscriber; open subscriptions observe the end of the stream.
    pub(crate) fn close(&self) {
        self.subscribers.clear();
    }

    fn stamp(&self, kind: EventKind) -> Event {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Event::new(seq, timestamp_ms, kind)
    }
}
