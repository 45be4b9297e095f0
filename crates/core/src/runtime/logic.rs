use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::error::Result;

struct State<T> {
    messages: VecDeque<T>,
    stopped: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    available: Condvar,
}

/// Producer side of a [`LogicQueue`]. Cheap to clone, usable from any thread.
pub struct LogicSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for LogicSender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> LogicSender<T> {
    /// Enqueue a message. Returns `false` once the queue has shut down.
    ///
    /// The consumer is only signalled on the empty → non-empty transition;
    /// while it is busy it re-checks the queue before waiting again.
    pub fn push(&self, message: T) -> bool {
        let mut state = self.shared.state.lock();
        if state.stopped {
            return false;
        }
        state.messages.push_back(message);
        let wake = state.messages.len() == 1;
        drop(state);

        if wake {
            self.shared.available.notify_one();
        }
        true
    }

    /// Messages waiting for the consumer.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().messages.len()
    }
}

/// Single-consumer FIFO drained by one dedicated thread.
///
/// Every protocol-level action (request handling, interleaved RTP writes)
/// goes through one of these, so the handler runs strictly serialized and
/// the state it touches needs no further coordination. On shutdown the
/// consumer drains whatever is still queued before the thread exits.
pub struct LogicQueue<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> LogicQueue<T> {
    /// Create the queue without a consumer. Messages pushed before
    /// [`start`](Self::start) wait in the backlog.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    messages: VecDeque::new(),
                    stopped: false,
                }),
                available: Condvar::new(),
            }),
            worker: None,
        }
    }

    /// Spawn the consumer thread; `handler` runs once per message, in order.
    /// A second call is ignored.
    pub fn start<F>(&mut self, handler: F) -> Result<()>
    where
        F: FnMut(T) + Send + 'static,
    {
        if self.worker.is_some() {
            tracing::warn!("logic queue already started");
            return Ok(());
        }

        let consumer = self.shared.clone();
        let worker = thread::Builder::new()
            .name("rtsp-logic".to_string())
            .spawn(move || consume(consumer, handler))?;

        tracing::debug!("logic queue started");
        self.worker = Some(worker);
        Ok(())
    }

    pub fn sender(&self) -> LogicSender<T> {
        LogicSender {
            shared: self.shared.clone(),
        }
    }

    /// Stop accepting messages, drain the backlog and join the consumer.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.state.lock().stopped = true;
        self.shared.available.notify_one();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("logic thread panicked");
            }
            tracing::debug!("logic queue stopped");
        }
    }
}

impl<T: Send + 'static> Default for LogicQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Drop for LogicQueue<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn consume<T, F>(shared: Arc<Shared<T>>, mut handler: F)
where
    F: FnMut(T),
{
    loop {
        let mut state = shared.state.lock();
        while !state.stopped && state.messages.is_empty() {
            shared.available.wait(&mut state);
        }

        if state.stopped {
            let backlog = std::mem::take(&mut state.messages);
            drop(state);
            if !backlog.is_empty() {
                tracing::debug!(remaining = backlog.len(), "draining logic queue");
            }
            backlog.into_iter().for_each(&mut handler);
            return;
        }

        let Some(message) = state.messages.pop_front() else {
            continue;
        };
        drop(state);
        handler(message);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn handles_messages_in_order() {
        let (tx, rx) = mpsc::channel();
        let mut queue = LogicQueue::new();
        queue
            .start(move |n: u32| {
                let _ = tx.send(n);
            })
            .unwrap();

        let sender = queue.sender();
        for n in 0..100 {
            assert!(sender.push(n));
        }

        let received: Vec<u32> = (0..100)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn shutdown_drains_backlog() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let sink = seen.clone();
        let mut queue = LogicQueue::new();
        queue
            .start(move |n: u32| {
                if n == 0 {
                    // Hold the consumer until the backlog is queued.
                    let _ = gate_rx.recv_timeout(Duration::from_secs(2));
                }
                sink.lock().push(n);
            })
            .unwrap();

        let sender = queue.sender();
        for n in 0..50 {
            sender.push(n);
        }
        gate_tx.send(()).unwrap();
        queue.shutdown();

        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn push_after_shutdown_is_rejected() {
        let mut queue = LogicQueue::new();
        queue.start(|_: u32| {}).unwrap();
        let sender = queue.sender();
        queue.shutdown();
        assert!(!sender.push(1));
        assert_eq!(sender.pending(), 0);
        queue.shutdown();
    }

    #[test]
    fn messages_pushed_before_start_are_kept() {
        let (tx, rx) = mpsc::channel();
        let mut queue = LogicQueue::new();
        let sender = queue.sender();
        sender.push(1u32);
        sender.push(2);
        assert_eq!(sender.pending(), 2);

        queue
            .start(move |n| {
                let _ = tx.send(n);
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 2);
    }

    #[test]
    fn producers_on_many_threads() {
        let total = Arc::new(Mutex::new(0u64));
        let sink = total.clone();
        let mut queue = LogicQueue::new();
        queue.start(move |n: u64| *sink.lock() += n).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sender = queue.sender();
                thread::spawn(move || {
                    for n in 1..=1000u64 {
                        sender.push(n);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        queue.shutdown();

        assert_eq!(*total.lock(), 4 * 500_500);
    }
}
