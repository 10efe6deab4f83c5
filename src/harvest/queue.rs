//! Bounded output queue between harvest workers and the output thread
//!
//! Workers never block on disk: they push rendered records onto a bounded
//! channel and a single output thread per register drains it. When the
//! channel is full a worker blocks until there is room, and the event is
//! counted as backpressure.

use crate::error::{OutputError, OutputResult};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Messages sent from workers to the output thread
#[derive(Debug)]
pub enum OutputMessage {
    /// A rendered record for shard `seq`, harvested from index position `offset`
    Record {
        worker: usize,
        seq: u32,
        offset: usize,
        body: Vec<u8>,
    },

    /// A record that failed to render
    Fault {
        worker: usize,
        id: String,
        summary: String,
    },

    /// A record that no longer exists
    NotFound { worker: usize, id: String },

    /// The worker stopped; `next_offset` is where it would continue
    Finish {
        worker: usize,
        next_offset: usize,
        complete: bool,
    },
}

impl OutputMessage {
    pub fn worker(&self) -> usize {
        match self {
            OutputMessage::Record { worker, .. }
            | OutputMessage::Fault { worker, .. }
            | OutputMessage::NotFound { worker, .. }
            | OutputMessage::Finish { worker, .. } => *worker,
        }
    }
}

/// Statistics for the output queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total messages enqueued
    pub enqueued: AtomicU64,

    /// Total messages dequeued
    pub dequeued: AtomicU64,

    /// Number of times a sender found the queue full
    pub backpressure_events: AtomicU64,
}

impl QueueStats {
    /// Messages taken off the queue
    pub fn throughput(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    /// Get backpressure event count
    pub fn backpressure_count(&self) -> u64 {
        self.backpressure_events.load(Ordering::Relaxed)
    }
}

/// A bounded queue, split into its sending and receiving halves
pub struct OutputQueue {
    sender: Sender<OutputMessage>,
    receiver: Receiver<OutputMessage>,
    capacity: usize,
    stats: Arc<QueueStats>,
}

impl OutputQueue {
    /// Create a new queue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
            stats: Arc::new(QueueStats::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    /// Consume the queue into its two halves
    ///
    /// The receiver sees the end of the stream once every sender clone is
    /// dropped.
    pub fn split(self) -> (OutputSender, OutputReceiver) {
        (
            OutputSender {
                sender: self.sender,
                stats: Arc::clone(&self.stats),
            },
            OutputReceiver {
                receiver: self.receiver,
                stats: self.stats,
            },
        )
    }
}

/// Handle for sending messages to the output thread
#[derive(Clone)]
pub struct OutputSender {
    sender: Sender<OutputMessage>,
    stats: Arc<QueueStats>,
}

impl OutputSender {
    /// Send a message, blocking while the queue is full
    pub fn send(&self, message: OutputMessage) -> OutputResult<()> {
        let message = match self.sender.try_send(message) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(TrySendError::Full(message)) => {
                self.stats.backpressure_events.fetch_add(1, Ordering::Relaxed);
                message
            }
            Err(TrySendError::Disconnected(_)) => return Err(OutputError::ChannelClosed),
        };

        self.sender
            .send(message)
            .map_err(|_| OutputError::ChannelClosed)?;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Handle for receiving messages on the output thread
pub struct OutputReceiver {
    receiver: Receiver<OutputMessage>,
    stats: Arc<QueueStats>,
}

impl OutputReceiver {
    /// Block until a message arrives; `None` once all senders are gone
    pub fn recv(&self) -> Option<OutputMessage> {
        match self.receiver.recv() {
            Ok(message) => {
                self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                Some(message)
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn fault(worker: usize) -> OutputMessage {
        OutputMessage::Fault {
            worker,
            id: "A1".into(),
            summary: "boom".into(),
        }
    }

    #[test]
    fn test_end_of_stream_after_senders_drop() {
        let (sender, receiver) = OutputQueue::new(4).split();
        sender.send(fault(0)).unwrap();
        drop(sender);

        assert_eq!(receiver.recv().unwrap().worker(), 0);
        assert!(receiver.recv().is_none());
    }

    #[test]
    fn test_backpressure_blocks_then_delivers() {
        let queue = OutputQueue::new(1);
        assert_eq!(queue.capacity(), 1);
        let stats = queue.stats();
        let (sender, receiver) = queue.split();

        sender.send(fault(0)).unwrap();
        let producer = thread::spawn(move || sender.send(fault(1)));

        // Give the producer time to hit the full queue
        thread::sleep(Duration::from_millis(50));
        assert_eq!(receiver.recv().unwrap().worker(), 0);
        assert_eq!(receiver.recv().unwrap().worker(), 1);
        producer.join().unwrap().unwrap();

        assert_eq!(stats.backpressure_count(), 1);
        assert_eq!(stats.enqueued.load(Ordering::Relaxed), 2);
        assert_eq!(stats.throughput(), 2);
    }

    #[test]
    fn test_send_after_receiver_drop_fails() {
        let (sender, receiver) = OutputQueue::new(1).split();
        drop(receiver);
        assert!(matches!(sender.send(fault(0)), Err(OutputError::ChannelClosed)));
    }
}
