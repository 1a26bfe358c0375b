//! Bounded-parallel text-to-speech pipeline with ordered delivery.
//!
//! Texts enter in conversation order. Up to `max_inflight` synthesis futures
//! run concurrently; completed files are handed to the `ready` callback
//! strictly in enqueue order, so a slow head-of-line synthesis holds back
//! faster successors. Cancellation flags every queued and in-flight task;
//! a flagged synthesis must give up and return no file.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tracing::debug;

/// Synthesis function: text plus a cancellation flag, resolves to the
/// produced WAV path or `None` when discarded.
pub type SynthFn =
    Arc<dyn Fn(String, Arc<AtomicBool>) -> BoxFuture<'static, Option<PathBuf>> + Send + Sync>;

/// Ordered delivery callback.
pub type ReadyFn = Arc<dyn Fn(PathBuf, String) + Send + Sync>;

/// Wakeup hook fired when delivery may have become possible.
pub type ReadySignalFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
struct TtsTask {
    text: String,
    canceled: Arc<AtomicBool>,
    /// `None` while synthesis runs; `Some(None)` when discarded.
    result: Arc<Mutex<Option<Option<PathBuf>>>>,
}

impl TtsTask {
    fn new(text: String) -> Self {
        Self {
            text,
            canceled: Arc::new(AtomicBool::new(false)),
            result: Arc::new(Mutex::new(None)),
        }
    }
}

#[derive(Default)]
struct PipelineQueues {
    /// Delivery order.
    ordered: VecDeque<TtsTask>,
    /// Scheduling order; entries share flags with `ordered`.
    pending: VecDeque<TtsTask>,
    inflight: usize,
}

pub struct TtsPipeline {
    max_inflight: usize,
    synth: SynthFn,
    ready: ReadyFn,
    ready_signal: ReadySignalFn,
    queues: Mutex<PipelineQueues>,
}

impl TtsPipeline {
    pub fn new(
        max_inflight: usize,
        synth: SynthFn,
        ready: ReadyFn,
        ready_signal: ReadySignalFn,
    ) -> Arc<Self> {
        Arc::new(Self {
            max_inflight: max_inflight.max(1),
            synth,
            ready,
            ready_signal,
            queues: Mutex::new(PipelineQueues::default()),
        })
    }

    /// Queue a text for synthesis. A positive delay postpones the enqueue
    /// itself (used for the greeting).
    pub fn enqueue(self: &Arc<Self>, text: String, delay_sec: f64) {
        if delay_sec > 0.0 {
            let pipeline = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs_f64(delay_sec)).await;
                pipeline.enqueue(text, 0.0);
            });
            return;
        }

        let task = TtsTask::new(text);
        {
            let mut queues = self.queues.lock();
            queues.ordered.push_back(task.clone());
            queues.pending.push_back(task);
        }
        self.maybe_start_synthesis();
        (self.ready_signal)();
    }

    /// Flag every queued and in-flight task and drop both queues.
    ///
    /// After this returns no previously-enqueued task will be delivered.
    pub fn cancel(&self) {
        let mut queues = self.queues.lock();
        for task in queues.ordered.iter().chain(queues.pending.iter()) {
            task.canceled.store(true, Ordering::Release);
        }
        queues.ordered.clear();
        queues.pending.clear();
        debug!("TTS queue cancelled");
    }

    /// True while undelivered tasks remain.
    pub fn has_queue(&self) -> bool {
        !self.queues.lock().ordered.is_empty()
    }

    /// Deliver the ready prefix of the ordered queue.
    ///
    /// Stops at the first task whose synthesis has not finished; order is
    /// never violated. Cancelled tasks and tasks that produced no file are
    /// consumed silently.
    pub fn try_play(&self, can_play: bool) {
        if !can_play {
            return;
        }
        loop {
            let task = {
                let mut queues = self.queues.lock();
                let Some(front) = queues.ordered.front() else {
                    return;
                };
                if front.result.lock().is_none() {
                    return;
                }
                queues.ordered.pop_front()
            };
            let Some(task) = task else { return };

            if task.canceled.load(Ordering::Acquire) {
                continue;
            }
            let produced = task.result.lock().take().flatten();
            match produced {
                Some(path) => (self.ready)(path, task.text.clone()),
                None => continue,
            }
        }
    }

    fn maybe_start_synthesis(self: &Arc<Self>) {
        let to_start: Vec<TtsTask> = {
            let mut queues = self.queues.lock();
            let mut started = Vec::new();
            while queues.inflight < self.max_inflight {
                let Some(task) = queues.pending.pop_front() else {
                    break;
                };
                if task.canceled.load(Ordering::Acquire) {
                    continue;
                }
                queues.inflight += 1;
                started.push(task);
            }
            started
        };

        for task in to_start {
            let pipeline = Arc::clone(self);
            let synth = Arc::clone(&self.synth);
            tokio::spawn(async move {
                let produced = (synth)(task.text.clone(), Arc::clone(&task.canceled)).await;
                *task.result.lock() = Some(produced);
                pipeline.on_synthesis_finished();
            });
        }
    }

    fn on_synthesis_finished(self: &Arc<Self>) {
        {
            let mut queues = self.queues.lock();
            if queues.inflight > 0 {
                queues.inflight -= 1;
            }
        }
        (self.ready_signal)();
        self.maybe_start_synthesis();
    }
}
