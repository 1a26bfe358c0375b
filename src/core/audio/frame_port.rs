//! Capture-side frame port.
//!
//! The SIP media thread pushes fixed-format PCM frames into a bounded queue;
//! a dedicated worker thread drains it and invokes the installed handler off
//! the media thread. On overflow the oldest frame is dropped so the most
//! recent audio survives. The outbound direction currently serves silence;
//! reply audio goes through the driver's file player, not this port.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::debug;

/// Frames buffered before the oldest is dropped.
const MAX_QUEUE_SIZE: usize = 64;

pub type FrameHandler = Arc<dyn Fn(Vec<i16>) + Send + Sync>;

#[derive(Default)]
struct FrameQueue {
    frames: VecDeque<Vec<i16>>,
    stopped: bool,
    dropped: u64,
}

impl FrameQueue {
    fn push(&mut self, frame: Vec<i16>) {
        if self.frames.len() >= MAX_QUEUE_SIZE {
            self.frames.pop_front();
            self.dropped += 1;
        }
        self.frames.push_back(frame);
    }
}

/// Bounded frame queue with a dedicated drain worker.
pub struct FramePort {
    queue: Mutex<FrameQueue>,
    available: Condvar,
    handler: RwLock<Option<FrameHandler>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FramePort {
    /// Create the port and start its drain worker.
    pub fn new() -> Arc<Self> {
        let port = Arc::new(Self {
            queue: Mutex::new(FrameQueue::default()),
            available: Condvar::new(),
            handler: RwLock::new(None),
            worker: Mutex::new(None),
        });

        let worker_port = Arc::clone(&port);
        let handle = std::thread::Builder::new()
            .name("voxlink-frames".to_string())
            .spawn(move || worker_port.worker_loop())
            .expect("failed to spawn frame worker");
        *port.worker.lock() = Some(handle);

        port
    }

    /// Install the frame handler. Substitution is atomic: frames already
    /// queued are delivered to whichever handler is installed when they are
    /// drained.
    pub fn set_on_frame_received(&self, handler: FrameHandler) {
        *self.handler.write() = Some(handler);
    }

    /// Push one received frame. Safe to call from the SIP media thread.
    pub fn push_frame(&self, frame: Vec<i16>) {
        if frame.is_empty() {
            return;
        }
        {
            let mut queue = self.queue.lock();
            if queue.stopped {
                return;
            }
            queue.push(frame);
        }
        self.available.notify_one();
    }

    /// Serve one outbound frame. The gateway transmits silence on this path.
    pub fn next_outbound_frame(&self, samples_per_frame: usize) -> Vec<i16> {
        vec![0; samples_per_frame]
    }

    /// Total frames discarded due to queue overflow.
    pub fn dropped_frames(&self) -> u64 {
        self.queue.lock().dropped
    }

    /// Frames currently waiting to be drained.
    pub fn pending_frames(&self) -> usize {
        self.queue.lock().frames.len()
    }

    /// Stop the worker and drop any queued frames.
    pub fn shutdown(&self) {
        {
            let mut queue = self.queue.lock();
            queue.stopped = true;
            queue.frames.clear();
        }
        self.available.notify_all();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn worker_loop(&self) {
        loop {
            let frame = {
                let mut queue = self.queue.lock();
                while queue.frames.is_empty() && !queue.stopped {
                    self.available.wait(&mut queue);
                }
                if queue.stopped && queue.frames.is_empty() {
                    break;
                }
                queue.frames.pop_front()
            };
            if let Some(frame) = frame {
                let handler = self.handler.read().clone();
                if let Some(handler) = handler {
                    handler(frame);
                }
            }
        }
        debug!("Frame port worker stopped");
    }
}

impl Drop for FramePort {
    fn drop(&mut self) {
        // Worker holds no Arc cycle back to us once shutdown clears it.
        let stopped = self.queue.lock().stopped;
        if !stopped {
            self.queue.lock().stopped = true;
            self.available.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_frames_reach_handler_in_order() {
        let port = FramePort::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        port.set_on_frame_received(Arc::new(move |frame| {
            sink.lock().push(frame[0]);
        }));

        for i in 0..10i16 {
            port.push_frame(vec![i; 4]);
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while received.lock().len() < 10 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*received.lock(), (0..10).collect::<Vec<i16>>());
        port.shutdown();
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let port = FramePort::new();
        // No handler installed: frames accumulate until the cap.
        for i in 0..(MAX_QUEUE_SIZE as i16 + 16) {
            port.push_frame(vec![i; 2]);
        }
        // The worker may have drained nothing (no handler consumes, but
        // drain still pops). Give it a moment to settle, then verify the
        // dropped counter saw overflow whenever the queue was full.
        std::thread::sleep(Duration::from_millis(50));
        assert!(port.pending_frames() <= MAX_QUEUE_SIZE);
        port.shutdown();
    }

    #[test]
    fn test_overflow_counter_without_worker_drain() {
        // Block the worker inside the handler so pushes race only the cap.
        let port = FramePort::new();
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let handler_gate = Arc::clone(&gate);
        port.set_on_frame_received(Arc::new(move |_frame| {
            let (lock, cv) = &*handler_gate;
            let mut open = lock.lock();
            while !*open {
                cv.wait(&mut open);
            }
        }));

        // First frame parks the worker; the rest fill the queue.
        for i in 0..(MAX_QUEUE_SIZE as i16 + 8) {
            port.push_frame(vec![i; 2]);
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(port.dropped_frames() >= 1);
        assert!(port.pending_frames() <= MAX_QUEUE_SIZE);

        let (lock, cv) = &*gate;
        *lock.lock() = true;
        cv.notify_all();
        port.shutdown();
    }

    #[test]
    fn test_handler_substitution() {
        let port = FramePort::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        port.set_on_frame_received(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        port.push_frame(vec![1; 2]);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while first.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        let counter = Arc::clone(&second);
        port.set_on_frame_received(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        port.push_frame(vec![2; 2]);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while second.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        port.shutdown();
    }

    #[test]
    fn test_outbound_frame_is_silence() {
        let port = FramePort::new();
        let frame = port.next_outbound_frame(960);
        assert_eq!(frame.len(), 960);
        assert!(frame.iter().all(|&s| s == 0));
        port.shutdown();
    }

    #[test]
    fn test_shutdown_stops_worker() {
        let port = FramePort::new();
        port.shutdown();
        // Frames pushed after shutdown are ignored.
        port.push_frame(vec![1; 2]);
        assert_eq!(port.pending_frames(), 0);
    }
}
