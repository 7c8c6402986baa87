//! Fixed-capacity single-producer/single-consumer hand-off between stages.
//!
//! Backed by a bounded `crossbeam_channel`. A full relay blocks the producer,
//! an empty one blocks the consumer. Closing the sending half lets the
//! consumer drain what is already queued before it sees end-of-stream.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, trace};

use crate::error::{Result, ScopeError};

/// Default number of slots per relay.
pub const DEFAULT_RELAY_CAPACITY: usize = 16;

/// Create a connected sender/receiver pair with room for `capacity` items.
///
/// A capacity of zero is raised to one; a rendezvous channel would make
/// every hand-off a synchronous meeting of both stages.
pub fn relay<T>(capacity: usize) -> (RelaySender<T>, RelayReceiver<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = bounded(capacity);
    (
        RelaySender {
            tx: Some(tx),
            capacity,
        },
        RelayReceiver { rx },
    )
}

/// Producer half. Owned by exactly one stage.
pub struct RelaySender<T> {
    tx: Option<Sender<T>>,
    capacity: usize,
}

impl<T> RelaySender<T> {
    /// Enqueue `item`, blocking while the relay is full.
    ///
    /// # Errors
    /// `ScopeError::RelayClosed` if this half was closed or the receiver
    /// has been dropped. The item is dropped in that case.
    pub fn send(&self, item: T) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(ScopeError::RelayClosed)?;
        match tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => {
                trace!(capacity = self.capacity, "relay full, producer waiting");
                tx.send(item).map_err(|_| ScopeError::RelayClosed)
            }
            Err(TrySendError::Disconnected(_)) => Err(ScopeError::RelayClosed),
        }
    }

    /// Close the relay. Items already queued are still delivered.
    ///
    /// Idempotent.
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            debug!("relay closed by producer");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// `true` when the next `send` would block.
    pub fn is_full(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.is_full())
    }

    pub fn len(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer half. Owned by exactly one stage.
pub struct RelayReceiver<T> {
    rx: Receiver<T>,
}

impl<T> RelayReceiver<T> {
    /// Block until an item is available.
    ///
    /// Returns `None` once the relay is closed and fully drained.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Blocking iterator that ends at end-of-stream.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.rx.iter()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn delivers_in_fifo_order() {
        let (tx, rx) = relay(4);
        for i in 0..4 {
            tx.send(i).unwrap();
        }
        let got: Vec<i32> = (0..4).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[test]
    fn close_drains_pending_then_reports_end() {
        let (mut tx, rx) = relay(8);
        tx.send("a").unwrap();
        tx.send("b").unwrap();
        tx.close();

        assert_eq!(rx.recv(), Some("a"));
        assert_eq!(rx.recv(), Some("b"));
        assert_eq!(rx.recv(), None);
        assert_eq!(rx.recv(), None);
    }

    #[test]
    fn send_after_close_fails_fast() {
        let (mut tx, _rx) = relay::<u8>(2);
        tx.close();
        tx.close();
        assert!(tx.is_closed());
        assert!(matches!(tx.send(1), Err(ScopeError::RelayClosed)));
    }

    #[test]
    fn send_fails_when_receiver_dropped() {
        let (tx, rx) = relay::<u8>(2);
        drop(rx);
        assert!(tx.send(7).unwrap_err().is_relay_closed());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let (tx, rx) = relay(0);
        assert_eq!(tx.capacity(), 1);
        tx.send(5u32).unwrap();
        assert!(tx.is_full());
        assert_eq!(rx.recv(), Some(5));
    }

    #[test]
    fn full_relay_blocks_producer_until_consumer_receives() {
        let (tx, rx) = relay(1);
        tx.send(0u32).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let done_flag = Arc::clone(&done);
        let producer = thread::spawn(move || {
            tx.send(1).unwrap();
            done_flag.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst), "send should block while full");

        assert_eq!(rx.recv(), Some(0));
        producer.join().expect("producer panicked");
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(rx.recv(), Some(1));
        assert_eq!(rx.recv(), None);
    }
}
