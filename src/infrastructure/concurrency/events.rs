//! Multi-subscriber event fan-out
//!
//! Every subscriber receives every event emitted after it subscribed.
//! Channels are unbounded so emitting never blocks the scheduler.

use flume::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

pub struct EventBus<T> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver to every live subscriber, pruning those whose receiver was dropped
    pub fn emit(&self, event: T) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Disconnect all subscribers; their receivers drain and then close
    pub fn close(&self) {
        self.subscribers.lock().clear();
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.emit(1);
        bus.emit(2);

        assert_eq!(a.try_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(b.try_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.emit("progress");
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.recv().unwrap(), "progress");
    }

    #[test]
    fn test_close_disconnects() {
        let bus: EventBus<u8> = EventBus::new();
        let rx = bus.subscribe();
        bus.emit(7);
        bus.close();

        assert_eq!(rx.recv().unwrap(), 7);
        assert!(rx.recv().is_err());
    }
}
