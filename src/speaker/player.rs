//! Priority-scheduled audio playback with pre-emptive interruption.
//!
//! Queue items are (priority, sequence, pcm) where priority 0 is reserved
//! for the critical/immediate path, 1 is normal, and 2 is low (shed under
//! backlog). A single worker dequeues in (priority, sequence) order and
//! plays on the output device from a blocking thread; `interrupt()` aborts
//! in-flight playback and drains everything non-critical.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::BlockReason;
use crate::speaker::tones;

#[derive(PartialEq, Eq)]
struct QueueItem {
    priority: u8,
    sequence: u64,
    pcm: Vec<u8>,
}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.sequence).cmp(&(other.priority, other.sequence))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Player {
    shared: Arc<PlayerShared>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct PlayerShared {
    queue: Mutex<BinaryHeap<Reverse<QueueItem>>>,
    notify: Notify,
    sequence: AtomicU64,
    interrupted: AtomicBool,
    available: AtomicBool,
    stopped: AtomicBool,
    active_sink: Mutex<Option<Sink>>,
    stream: Mutex<Option<OutputStream>>,
    alert_tones: Mutex<HashMap<Option<BlockReason>, Vec<u8>>>,
    sample_rate: u32,
    backlog_threshold: usize,
}

impl Player {
    pub fn new(sample_rate: u32, backlog_threshold: usize) -> Self {
        Self {
            shared: Arc::new(PlayerShared {
                queue: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                sequence: AtomicU64::new(0),
                interrupted: AtomicBool::new(false),
                available: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                active_sink: Mutex::new(None),
                stream: Mutex::new(None),
                alert_tones: Mutex::new(HashMap::new()),
                sample_rate,
                backlog_threshold,
            }),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    /// Probe for an output device, cache the alert tones, start the worker.
    /// With no device the player stays constructed but every playback method
    /// is a no-op.
    pub async fn start(&self) {
        self.cache_alert_tones();

        match OutputStreamBuilder::open_default_stream() {
            Ok(stream) => {
                *self.shared.stream.lock().unwrap() = Some(stream);
                self.shared.available.store(true, Ordering::Relaxed);
                info!("Audio output device detected — playback enabled");
            }
            Err(e) => {
                warn!("No audio output device — playback disabled: {e}");
                return;
            }
        }

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let worker = tokio::spawn(async move {
            playback_worker(shared, cancel).await;
        });
        *self.worker.lock().unwrap() = Some(worker);
    }

    /// Cancel the worker, drain the queue, and halt in-flight playback.
    pub async fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Relaxed);
        self.cancel.cancel();

        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        self.shared.queue.lock().unwrap().clear();
        if let Some(sink) = self.shared.active_sink.lock().unwrap().take() {
            sink.stop();
        }
        *self.shared.stream.lock().unwrap() = None;
    }

    pub fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::Relaxed)
    }

    /// Number of items currently waiting in the playback queue.
    pub fn depth(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    pub fn is_interrupted(&self) -> bool {
        self.shared.interrupted.load(Ordering::Relaxed)
    }

    pub fn backlog_threshold(&self) -> usize {
        self.shared.backlog_threshold
    }

    /// Add PCM audio to the playback queue.
    ///
    /// LOW items (priority 2) are shed when the queue depth exceeds the
    /// backlog threshold. Priority 0 and 1 are always accepted.
    pub fn enqueue(&self, pcm: Vec<u8>, priority: u8) {
        if !self.is_available() || self.shared.stopped.load(Ordering::Relaxed) {
            return;
        }

        if priority == 2 && self.depth() > self.shared.backlog_threshold {
            warn!("Dropping LOW priority audio — backlog");
            return;
        }

        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed);
        self.shared.queue.lock().unwrap().push(Reverse(QueueItem {
            priority,
            sequence,
            pcm,
        }));
        self.shared.notify.notify_one();
    }

    /// Abort in-flight playback and drain every non-critical queued item.
    /// Critical items are preserved.
    pub fn interrupt(&self) {
        self.shared.interrupted.store(true, Ordering::Relaxed);

        {
            let mut queue = self.shared.queue.lock().unwrap();
            let kept: Vec<Reverse<QueueItem>> = queue
                .drain()
                .filter(|Reverse(item)| item.priority == 0)
                .collect();
            debug!("Interrupt drained queue (kept {} critical)", kept.len());
            for item in kept {
                queue.push(item);
            }
        }

        if let Some(sink) = self.shared.active_sink.lock().unwrap().take() {
            sink.stop();
        }
    }

    /// Play the pre-computed alert tone for a block reason, bypassing the
    /// queue. Used only from critical paths.
    pub async fn play_alert(&self, block_reason: Option<BlockReason>) {
        let tone = self.shared.alert_tones.lock().unwrap().get(&block_reason).cloned();
        let Some(tone) = tone else { return };
        self.play_direct(tone).await;
    }

    /// Play raw PCM immediately, bypassing the queue. Critical paths only.
    pub async fn play_immediate(&self, pcm: Vec<u8>) {
        self.play_direct(pcm).await;
    }

    fn cache_alert_tones(&self) {
        let mut map = self.shared.alert_tones.lock().unwrap();
        for reason in [
            None,
            Some(BlockReason::PermissionPrompt),
            Some(BlockReason::Question),
            Some(BlockReason::IdlePrompt),
        ] {
            map.insert(
                reason,
                tones::generate_alert_pcm16(reason, self.shared.sample_rate),
            );
        }
    }

    async fn play_direct(&self, pcm: Vec<u8>) {
        // Direct playback begins a fresh critical sequence; clear any
        // interrupt left over from the pre-emption that got us here.
        self.shared.interrupted.store(false, Ordering::Relaxed);
        play_pcm(&self.shared, pcm).await;
    }

    /// Test hook: mark the device available without opening a stream so the
    /// queue policy is observable. Playback stays a no-op.
    #[cfg(test)]
    pub fn mark_available_for_tests(&self) {
        self.cache_alert_tones();
        self.shared.available.store(true, Ordering::Relaxed);
    }
}

async fn playback_worker(shared: Arc<PlayerShared>, cancel: CancellationToken) {
    debug!("Playback worker started");
    loop {
        let item = shared.queue.lock().unwrap().pop();
        let Some(Reverse(item)) = item else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = shared.notify.notified() => continue,
            }
        };

        // During an interrupt, discard non-critical leftovers.
        if shared.interrupted.load(Ordering::Relaxed) && item.priority > 0 {
            continue;
        }
        shared.interrupted.store(false, Ordering::Relaxed);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = play_pcm(&shared, item.pcm) => {}
        }
    }
    debug!("Playback worker stopped");
}

/// Convert PCM and play it on the device, polling from a blocking thread so
/// the supervising loop stays responsive. Returns when playback finishes or
/// the sink is stopped by an interrupt.
async fn play_pcm(shared: &Arc<PlayerShared>, pcm: Vec<u8>) {
    if !shared.available.load(Ordering::Relaxed) {
        return;
    }

    {
        let stream = shared.stream.lock().unwrap();
        let Some(stream) = stream.as_ref() else {
            return;
        };
        let sink = Sink::connect_new(stream.mixer());
        let samples = pcm16_to_f32(&pcm);
        sink.append(SamplesBuffer::new(1, shared.sample_rate, samples));
        *shared.active_sink.lock().unwrap() = Some(sink);
    }

    let poll = Arc::clone(shared);
    let result = tokio::task::spawn_blocking(move || loop {
        let done = {
            let guard = poll.active_sink.lock().unwrap();
            match guard.as_ref() {
                Some(sink) => sink.empty(),
                None => true, // taken by interrupt()
            }
        };
        if done {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    })
    .await;

    if result.is_err() {
        warn!("Audio playback poll task failed");
    }

    *shared.active_sink.lock().unwrap() = None;
}

fn pcm16_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect()
}
