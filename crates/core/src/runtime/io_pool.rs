use std::future::Future;
use std::io;
use std::net;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle};
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// One event loop: a current-thread tokio runtime driven by its own OS thread.
///
/// Sockets are registered with exactly one worker and every task touching
/// them is spawned there, so a connection's completions never run
/// concurrently with each other.
#[derive(Clone)]
pub struct IoWorker {
    index: usize,
    handle: Handle,
}

impl IoWorker {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn spawn<F>(&self, future: F) -> task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future)
    }

    pub fn adopt_tcp_stream(&self, stream: net::TcpStream) -> io::Result<tokio::net::TcpStream> {
        let _guard = self.handle.enter();
        stream.set_nonblocking(true)?;
        tokio::net::TcpStream::from_std(stream)
    }

    pub fn adopt_tcp_listener(
        &self,
        listener: net::TcpListener,
    ) -> io::Result<tokio::net::TcpListener> {
        let _guard = self.handle.enter();
        listener.set_nonblocking(true)?;
        tokio::net::TcpListener::from_std(listener)
    }

    pub fn adopt_udp_socket(&self, socket: net::UdpSocket) -> io::Result<tokio::net::UdpSocket> {
        let _guard = self.handle.enter();
        socket.set_nonblocking(true)?;
        tokio::net::UdpSocket::from_std(socket)
    }
}

struct PoolInner {
    workers: Vec<IoWorker>,
    next: AtomicUsize,
}

/// Cloneable view of an [`IoServicePool`] used to place sockets on workers.
///
/// Holding a handle does not keep the worker threads alive; once the pool
/// shuts down, spawned futures are dropped and adopting fails.
#[derive(Clone)]
pub struct IoPoolHandle {
    inner: Arc<PoolInner>,
}

impl IoPoolHandle {
    /// Next worker in round-robin order.
    pub fn next(&self) -> &IoWorker {
        let n = self.inner.next.fetch_add(1, Ordering::Relaxed);
        &self.inner.workers[n % self.inner.workers.len()]
    }

    pub fn len(&self) -> usize {
        self.inner.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.workers.is_empty()
    }
}

/// Fixed set of I/O event loops, one thread each.
pub struct IoServicePool {
    handle: IoPoolHandle,
    shutdown: CancellationToken,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl IoServicePool {
    /// Start `workers` event loops (at least one).
    pub fn new(workers: usize) -> Result<Self> {
        let count = workers.max(1);
        let shutdown = CancellationToken::new();
        let mut handles = Vec::with_capacity(count);
        let mut threads = Vec::with_capacity(count);

        for index in 0..count {
            let runtime = Builder::new_current_thread().enable_all().build()?;
            handles.push(IoWorker {
                index,
                handle: runtime.handle().clone(),
            });

            let token = shutdown.clone();
            let thread = thread::Builder::new()
                .name(format!("rtsp-io-{index}"))
                .spawn(move || {
                    runtime.block_on(token.cancelled());
                    tracing::trace!(worker = index, "I/O worker exiting");
                })?;
            threads.push(thread);
        }

        tracing::debug!(workers = count, "I/O service pool started");

        Ok(Self {
            handle: IoPoolHandle {
                inner: Arc::new(PoolInner {
                    workers: handles,
                    next: AtomicUsize::new(0),
                }),
            },
            shutdown,
            threads: Mutex::new(threads),
        })
    }

    pub fn handle(&self) -> IoPoolHandle {
        self.handle.clone()
    }

    pub fn next(&self) -> &IoWorker {
        self.handle.next()
    }

    /// Stop every event loop and join the threads. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let threads = std::mem::take(&mut *self.threads.lock());
        if threads.is_empty() {
            return;
        }
        for thread in threads {
            if thread.join().is_err() {
                tracing::error!("I/O worker thread panicked");
            }
        }
        tracing::debug!("I/O service pool stopped");
    }
}

impl Drop for IoServicePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
