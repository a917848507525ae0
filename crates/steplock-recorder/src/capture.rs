//! Input capture
//!
//! A source pushes raw events into an [`EventSink`]; the sink stamps them and
//! feeds one bounded queue. Pointer moves only get in while the queue has
//! headroom, so a burst of them can never crowd out key or click events.
//!
//! Closing the sink takes its write lock, which waits for any in-flight
//! `emit` to finish. Once [`InputCapture::stop`] returns nothing else is
//! delivered.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

use steplock_core::{Point, RawEvent, Result};

use crate::events::CapturedEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub queue_capacity: usize,
    /// Slots kept free for non-move events
    pub move_headroom: usize,
    /// Minimum pointer travel between two forwarded moves
    pub move_threshold_px: f64,
    pub clipboard_poll_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            move_headroom: 512,
            move_threshold_px: 5.0,
            clipboard_poll_ms: 200,
        }
    }
}

/// Something that produces raw events
pub trait InputSource: Send {
    /// Begin delivering into `sink`. Must not block.
    fn start(&mut self, sink: EventSink) -> Result<()>;

    /// Release OS resources. Called once, after the sink is closed.
    fn stop(&mut self) -> Result<()>;
}

struct SinkInner {
    tx: Sender<CapturedEvent>,
    open: RwLock<bool>,
    seq: AtomicU64,
    dropped: AtomicU64,
    capacity: usize,
    headroom: usize,
    move_threshold: f64,
    last_move: Mutex<Option<Point>>,
    started: Instant,
    started_wall: SystemTime,
}

/// Producer side of a capture session. Clone freely.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<SinkInner>,
}

impl EventSink {
    fn new(tx: Sender<CapturedEvent>, config: &CaptureConfig) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                tx,
                open: RwLock::new(true),
                seq: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                capacity: config.queue_capacity.max(1),
                headroom: config.move_headroom,
                move_threshold: config.move_threshold_px,
                last_move: Mutex::new(None),
                started: Instant::now(),
                started_wall: SystemTime::now(),
            }),
        }
    }

    /// Deliver an event stamped with the session clock
    pub fn emit(&self, event: RawEvent) -> bool {
        let t_ms = self.elapsed_ms();
        self.emit_at(t_ms, event)
    }

    /// Deliver an event stamped with an OS wall-clock timestamp
    pub fn emit_stamped(&self, time: SystemTime, event: RawEvent) -> bool {
        let t_ms = time
            .duration_since(self.inner.started_wall)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.emit_at(t_ms, event)
    }

    /// Deliver an event with an explicit timestamp. Returns false if the event
    /// was dropped or the sink is closed.
    pub fn emit_at(&self, t_ms: u64, event: RawEvent) -> bool {
        let open = self.inner.open.read();
        if !*open {
            return false;
        }

        if let RawEvent::PointerMove { at } = &event {
            if !self.admit_move(*at) {
                return false;
            }
        }

        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        match self.inner.tx.try_send(CapturedEvent { seq, t_ms, event }) {
            Ok(()) => true,
            Err(TrySendError::Full(e)) => {
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!(dropped, kind = e.event.name(), "capture queue full, dropping events");
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    fn admit_move(&self, at: Point) -> bool {
        let free = self.inner.capacity.saturating_sub(self.inner.tx.len());
        if free <= self.inner.headroom {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let mut last = self.inner.last_move.lock();
        if let Some(prev) = *last {
            if prev.distance(&at) < self.inner.move_threshold {
                return false;
            }
        }
        *last = Some(at);
        true
    }

    pub fn is_open(&self) -> bool {
        *self.inner.open.read()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.inner.started.elapsed().as_millis() as u64
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn close(&self) {
        *self.inner.open.write() = false;
    }
}

/// A running capture session
pub struct InputCapture {
    source: Box<dyn InputSource>,
    sink: EventSink,
    rx: Receiver<CapturedEvent>,
    stopped: bool,
}

impl InputCapture {
    pub fn start(mut source: Box<dyn InputSource>, config: &CaptureConfig) -> Result<Self> {
        let (tx, rx) = bounded(config.queue_capacity.max(1));
        let sink = EventSink::new(tx, config);
        source.start(sink.clone())?;
        debug!(capacity = config.queue_capacity, "capture started");
        Ok(Self {
            source,
            sink,
            rx,
            stopped: false,
        })
    }

    /// Stop delivery and release the source. Safe to call repeatedly. Events
    /// already queued stay readable.
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.sink.close();
        let result = self.source.stop();
        debug!(dropped = self.sink.dropped(), "capture stopped");
        result
    }

    pub fn is_running(&self) -> bool {
        !self.stopped
    }

    /// Receiver for `select!`
    pub fn receiver(&self) -> &Receiver<CapturedEvent> {
        &self.rx
    }

    pub fn try_recv(&self) -> Option<CapturedEvent> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<CapturedEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Everything currently queued
    pub fn drain(&self) -> Vec<CapturedEvent> {
        self.rx.try_iter().collect()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.sink.elapsed_ms()
    }

    pub fn dropped(&self) -> u64 {
        self.sink.dropped()
    }

    /// Blocking iterator that ends at `deadline`, or once the capture is
    /// stopped and the queue is empty
    pub fn events_until(&self, deadline: Option<Instant>) -> Events<'_> {
        Events {
            capture: self,
            deadline,
        }
    }
}

impl Drop for InputCapture {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "failed to stop capture source");
        }
    }
}

pub struct Events<'a> {
    capture: &'a InputCapture,
    deadline: Option<Instant>,
}

impl Iterator for Events<'_> {
    type Item = CapturedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        const SLICE: Duration = Duration::from_millis(50);
        loop {
            if !self.capture.sink.is_open() {
                return self.capture.try_recv();
            }
            let wait = match self.deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return None;
                    }
                    left.min(SLICE)
                }
                None => SLICE,
            };
            match self.capture.rx.recv_timeout(wait) {
                Ok(event) => return Some(event),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

// ============================================================================
// Scripted source
// ============================================================================

/// Replays a fixed list of events, then forwards whatever is pushed through
/// its [`ScriptHandle`]. Used by tests and headless hosts.
pub struct ScriptedSource {
    initial: Vec<(Option<u64>, RawEvent)>,
    slot: Arc<Mutex<Option<EventSink>>>,
}

#[derive(Clone)]
pub struct ScriptHandle {
    slot: Arc<Mutex<Option<EventSink>>>,
}

impl ScriptedSource {
    pub fn new(events: impl IntoIterator<Item = RawEvent>) -> Self {
        Self {
            initial: events.into_iter().map(|e| (None, e)).collect(),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Events with explicit session timestamps in milliseconds
    pub fn timed(events: impl IntoIterator<Item = (u64, RawEvent)>) -> Self {
        Self {
            initial: events.into_iter().map(|(t, e)| (Some(t), e)).collect(),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn handle(&self) -> ScriptHandle {
        ScriptHandle {
            slot: self.slot.clone(),
        }
    }
}

impl InputSource for ScriptedSource {
    fn start(&mut self, sink: EventSink) -> Result<()> {
        for (t, event) in self.initial.drain(..) {
            match t {
                Some(t) => sink.emit_at(t, event),
                None => sink.emit(event),
            };
        }
        *self.slot.lock() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.slot.lock().take();
        Ok(())
    }
}

impl ScriptHandle {
    /// Push one event. Returns false once the capture has stopped.
    pub fn push(&self, event: RawEvent) -> bool {
        match self.slot.lock().as_ref() {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    pub fn push_at(&self, t_ms: u64, event: RawEvent) -> bool {
        match self.slot.lock().as_ref() {
            Some(sink) => sink.emit_at(t_ms, event),
            None => false,
        }
    }
}
