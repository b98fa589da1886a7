//! Blocking FIFO used to hand work between a caller and background loops.
//!
//! Consumers stop on [`Envelope::Quit`]: a flag alone cannot wake a thread
//! parked in `dequeue`, but a sentinel item can.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::time::Duration;

/// Queue item: a payload or the stop sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope<T> {
    Item(T),
    Quit,
}

impl<T> Envelope<T> {
    pub fn is_quit(&self) -> bool {
        matches!(self, Envelope::Quit)
    }

    pub fn into_item(self) -> Option<T> {
        match self {
            Envelope::Item(t) => Some(t),
            Envelope::Quit => None,
        }
    }
}

/// Multi-producer, multi-consumer FIFO. Clones share the same queue.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for BlockingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    /// Unbounded queue; `enqueue` never blocks.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Queue holding at most `capacity` items; see [`try_enqueue`](Self::try_enqueue).
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self { tx, rx }
    }

    /// Append `item`. On a full bounded queue this waits for space.
    pub fn enqueue(&self, item: T) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(item);
    }

    /// Append without waiting; a full queue hands the item back.
    pub fn try_enqueue(&self, item: T) -> Result<(), T> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(t) | TrySendError::Disconnected(t) => t,
        })
    }

    /// Block until an item is available.
    pub fn dequeue(&self) -> T {
        loop {
            if let Ok(item) = self.rx.recv() {
                return item;
            }
        }
    }

    pub fn try_dequeue(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
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
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_fifo_order() {
        let queue = BlockingQueue::new();
        for i in 0..5 {
            queue.enqueue(i);
        }
        let out: Vec<i32> = (0..5).map(|_| queue.dequeue()).collect();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dequeue_blocks_until_enqueue() {
        let queue: BlockingQueue<Envelope<String>> = BlockingQueue::new();
        let producer = queue.clone();

        let start = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            producer.enqueue(Envelope::Item("first".to_string()));
            producer.enqueue(Envelope::Item("second".to_string()));
            producer.enqueue(Envelope::Quit);
        });

        assert_eq!(queue.dequeue(), Envelope::Item("first".to_string()));
        assert!(start.elapsed() >= Duration::from_millis(90));
        assert_eq!(queue.dequeue(), Envelope::Item("second".to_string()));
        assert!(queue.dequeue().is_quit());
        handle.join().unwrap();
    }

    #[test]
    fn test_bounded_rejects_when_full() {
        let queue = BlockingQueue::bounded(1);
        assert!(queue.try_enqueue(1).is_ok());
        assert_eq!(queue.try_enqueue(2), Err(2));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_dequeue(), Some(1));
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn test_dequeue_timeout() {
        let queue: BlockingQueue<u8> = BlockingQueue::new();
        assert_eq!(queue.dequeue_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_envelope_into_item() {
        assert_eq!(Envelope::Item(3).into_item(), Some(3));
        assert_eq!(Envelope::<u8>::Quit.into_item(), None);
    }
}
