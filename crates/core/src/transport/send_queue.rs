use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// What an outbound message carries; decides what overflow may evict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    /// RTSP response. Never dropped.
    Response,
    /// Interleaved RTP frame.
    Media,
}

#[derive(Debug, Clone)]
pub struct Outbound {
    pub kind: OutboundKind,
    pub bytes: Bytes,
}

/// Bounded FIFO of bytes waiting to be written to one RTSP socket.
///
/// Writes leave in push order. When the queue is full the oldest queued
/// media frame is evicted to make room; if there is none, an incoming media
/// frame is dropped instead. Responses are always accepted, so the queue
/// may exceed its capacity by the number of responses in flight.
pub struct SendQueue {
    messages: Mutex<VecDeque<Outbound>>,
    capacity: usize,
    ready: Notify,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            ready: Notify::new(),
        }
    }

    /// Returns `false` when the message itself was dropped.
    pub fn push(&self, kind: OutboundKind, bytes: Bytes) -> bool {
        let mut messages = self.messages.lock();
        if messages.len() >= self.capacity {
            match messages.iter().position(|m| m.kind == OutboundKind::Media) {
                Some(oldest) => {
                    messages.remove(oldest);
                    tracing::trace!(capacity = self.capacity, "send queue full, evicted media frame");
                }
                None if kind == OutboundKind::Media => {
                    tracing::trace!(capacity = self.capacity, "send queue full, dropped media frame");
                    return false;
                }
                None => {}
            }
        }
        messages.push_back(Outbound { kind, bytes });
        drop(messages);

        self.ready.notify_one();
        true
    }

    pub fn pop(&self) -> Option<Outbound> {
        self.messages.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Resolves after the next push (or immediately if one happened since
    /// the last wait).
    pub async fn notified(&self) {
        self.ready.notified().await;
    }
}
