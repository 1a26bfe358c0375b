//! Serial FIFO player for synthesized WAV files.
//!
//! Files play one at a time in enqueue order over the call's transmit media.
//! Interruption stops the current file and purges the queue; transient files
//! (TTS artifacts) are deleted best-effort once they are no longer needed.
//! `on_stop` fires exactly once per active-to-idle transition and never
//! during teardown.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::sip::CallMedia;

#[derive(Clone)]
struct AudioFile {
    path: PathBuf,
    discard_after: bool,
}

#[derive(Default)]
struct PlayerInner {
    queue: VecDeque<AudioFile>,
    current: Option<AudioFile>,
    tearing_down: bool,
    /// Incremented for every started or interrupted playback; end-of-file
    /// notifications carrying a stale generation are ignored.
    generation: u64,
}

pub struct SmartPlayer {
    media: Arc<dyn CallMedia>,
    on_stop: Box<dyn Fn() + Send + Sync>,
    inner: Mutex<PlayerInner>,
}

impl SmartPlayer {
    pub fn new(
        media: Arc<dyn CallMedia>,
        on_stop: Box<dyn Fn() + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            media,
            on_stop,
            inner: Mutex::new(PlayerInner::default()),
        })
    }

    /// Append a file to the queue without starting playback.
    pub fn enqueue(&self, path: &Path, discard_after: bool) {
        let mut inner = self.inner.lock();
        inner.queue.push_back(AudioFile {
            path: path.to_path_buf(),
            discard_after,
        });
    }

    /// Start playback if idle and something is queued.
    pub fn play(self: &Arc<Self>) {
        let should_start = {
            let inner = self.inner.lock();
            inner.current.is_none() && !inner.queue.is_empty() && !inner.tearing_down
        };
        if should_start {
            self.play_next();
        }
    }

    /// True iff a file is currently playing.
    pub fn is_active(&self) -> bool {
        self.inner.lock().current.is_some()
    }

    /// Stop the current file and drop all queued items, deleting transients.
    ///
    /// Never re-enters playback and never invokes `on_stop`.
    pub fn interrupt(&self) {
        let (current, queued) = {
            let mut inner = self.inner.lock();
            if inner.tearing_down {
                return;
            }
            inner.tearing_down = true;
            inner.generation += 1;
            let current = inner.current.take();
            let queued: Vec<AudioFile> = inner.queue.drain(..).collect();
            (current, queued)
        };

        self.media.stop_playback();
        if let Some(file) = current {
            discard_file(&file);
        }
        for file in queued {
            discard_file(&file);
        }

        self.inner.lock().tearing_down = false;
    }

    /// Completion callback for the file that finished on its own.
    fn handle_eof(self: &Arc<Self>, generation: u64) {
        enum After {
            PlayNext,
            Stop,
            Nothing,
        }

        let (finished, after) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.current.is_none() {
                return;
            }
            let finished = inner.current.take();
            let after = if inner.tearing_down {
                After::Nothing
            } else if !inner.queue.is_empty() {
                After::PlayNext
            } else {
                After::Stop
            };
            (finished, after)
        };

        if let Some(file) = finished {
            discard_file(&file);
        }

        match after {
            After::PlayNext => self.play_next(),
            After::Stop => (self.on_stop)(),
            After::Nothing => {}
        }
    }

    fn play_next(self: &Arc<Self>) {
        loop {
            let (file, generation) = {
                let mut inner = self.inner.lock();
                if inner.tearing_down {
                    debug!("Skip play_next during teardown");
                    return;
                }
                match inner.queue.pop_front() {
                    Some(file) => {
                        inner.generation += 1;
                        inner.current = Some(file.clone());
                        (file, inner.generation)
                    }
                    None => {
                        inner.current = None;
                        drop(inner);
                        (self.on_stop)();
                        return;
                    }
                }
            };

            let weak = Arc::downgrade(self);
            let on_eof: Box<dyn FnOnce() + Send> = Box::new(move || {
                if let Some(player) = weak.upgrade() {
                    player.handle_eof(generation);
                }
            });

            match self.media.play_file(&file.path, on_eof) {
                Ok(()) => return,
                Err(err) => {
                    // Drop only the failing item and keep going.
                    warn!(path = %file.path.display(), error = %err, "File player start failed");
                    self.inner.lock().current = None;
                    discard_file(&file);
                }
            }
        }
    }
}

fn discard_file(file: &AudioFile) {
    if !file.discard_after {
        return;
    }
    if let Err(err) = std::fs::remove_file(&file.path) {
        debug!(path = %file.path.display(), error = %err, "Transient audio cleanup failed");
    }
}
