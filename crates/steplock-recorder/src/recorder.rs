//! Step recorder
//!
//! [`StepRecorder`] turns accepted raw events into steps: pointer down/up
//! pairs become clicks, bursts of printable keys become typed text, shortcut
//! combinations become hotkeys and clipboard changes become copy steps.
//! [`RecordingHandle`] runs it on a thread against a live capture session,
//! gated by the target lock.

use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use steplock_core::{
    to_normalized, Desktop, Error, ErrorCode, Key, KeyChord, Modifiers, MouseButton, NormPoint,
    Point, RawEvent, Rect, Result, TargetLock, Verdict, WindowResolver,
};

use crate::capture::InputCapture;
use crate::events::CapturedEvent;
use crate::project::Project;
use crate::step::StepAction;

/// Recorder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Printable keys closer together than this are typed text
    pub inter_key_timeout_ms: u64,
    /// Max pointer travel between down and up for a click
    pub click_tolerance_px: f64,
    /// Two clicks within this window become a double click
    pub double_click_ms: u64,
    /// Clipboard texts shorter than this are ignored
    pub min_clipboard_len: usize,
    /// Clipboard texts are truncated to this many characters
    pub max_clipboard_len: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            inter_key_timeout_ms: 700,
            click_tolerance_px: 5.0,
            double_click_ms: 400,
            min_clipboard_len: 0,
            max_clipboard_len: 1024,
        }
    }
}

// ============================================================================
// Coalescing
// ============================================================================

#[derive(Debug, Clone)]
struct PendingPress {
    at: Point,
    button: MouseButton,
    client: Rect,
}

/// A finished click held back in case a second one turns it into a double click
#[derive(Debug, Clone)]
struct PendingClick {
    at: Point,
    norm: NormPoint,
    button: MouseButton,
    t_ms: u64,
}

#[derive(Debug, Default)]
struct TextBuffer {
    text: String,
    last_ms: u64,
}

impl TextBuffer {
    fn push(&mut self, c: char, t_ms: u64) {
        self.text.push(c);
        self.last_ms = t_ms;
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn is_stale(&self, now_ms: u64, timeout_ms: u64) -> bool {
        !self.is_empty() && now_ms.saturating_sub(self.last_ms) > timeout_ms
    }

    /// One character is a key press, more is typed text
    fn flush(&mut self) -> Option<StepAction> {
        let text = std::mem::take(&mut self.text);
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (None, _) => None,
            (Some(c), None) => Some(StepAction::KeyPress { key: key_for_char(c) }),
            _ => Some(StepAction::TypeText { text, input: None }),
        }
    }
}

fn key_for_char(c: char) -> Key {
    match c {
        ' ' => Key::Space,
        c => Key::Char(c),
    }
}

/// Letters in hotkeys are always written uppercase
fn hotkey_key(key: Key) -> Key {
    match key {
        Key::Char(c) => Key::Char(c.to_ascii_uppercase()),
        other => other,
    }
}

pub struct StepRecorder {
    config: RecorderConfig,
    modifiers: Modifiers,
    press: Option<PendingPress>,
    click: Option<PendingClick>,
    text: TextBuffer,
}

impl StepRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            modifiers: Modifiers::default(),
            press: None,
            click: None,
            text: TextBuffer::default(),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Keep modifier state in sync for events the lock rejected
    pub fn track_modifiers(&mut self, event: &RawEvent) {
        match event {
            RawEvent::KeyDown { key, .. } => {
                if let Some(flag) = key.modifier() {
                    self.modifiers.set(flag, true);
                }
            }
            RawEvent::KeyUp { key } => {
                if let Some(flag) = key.modifier() {
                    self.modifiers.set(flag, false);
                }
            }
            _ => {}
        }
    }

    /// Feed one accepted event. `client` is the live client rect the lock
    /// checked it against. Returns finished steps in capture order.
    pub fn feed(&mut self, event: &CapturedEvent, client: Option<Rect>) -> Vec<StepAction> {
        let mut out = Vec::new();
        let t = event.t_ms;
        self.track_modifiers(&event.event);

        match &event.event {
            RawEvent::PointerMove { .. } | RawEvent::KeyUp { .. } => {}

            RawEvent::PointerDown { at, button } => {
                self.flush_text(&mut out);
                let keeps_pending = self
                    .click
                    .as_ref()
                    .is_some_and(|c| self.continues(c, *at, *button, t));
                if !keeps_pending {
                    self.flush_click(&mut out);
                }
                self.press = client.map(|client| PendingPress {
                    at: *at,
                    button: *button,
                    client,
                });
            }

            RawEvent::PointerUp { at, button } => {
                let Some(press) = self.press.take() else {
                    return out;
                };
                if press.button != *button || press.at.distance(at) > self.config.click_tolerance_px {
                    debug!(from = %press.at, to = %at, "pointer travelled too far, not a click");
                    self.flush_click(&mut out);
                    return out;
                }
                let Some(norm) = self.normalize(press.at, &press.client) else {
                    return out;
                };
                if let Some(prev) = self.click.take() {
                    if self.continues(&prev, press.at, *button, t) {
                        out.push(StepAction::DoubleClick {
                            x: prev.norm.x,
                            y: prev.norm.y,
                            button: prev.button,
                        });
                        return out;
                    }
                    out.push(StepAction::click(prev.norm, prev.button));
                }
                self.click = Some(PendingClick {
                    at: press.at,
                    norm,
                    button: *button,
                    t_ms: t,
                });
            }

            RawEvent::KeyDown { key, text } => {
                if key.is_modifier() {
                    return out;
                }
                self.flush_click(&mut out);

                if self.modifiers.is_command() {
                    self.flush_text(&mut out);
                    out.push(StepAction::Hotkey {
                        chord: KeyChord::new(self.modifiers, hotkey_key(*key)),
                    });
                    return out;
                }

                match (key, text) {
                    (Key::Backspace, _) if !self.text.is_empty() => {
                        self.text.text.pop();
                        self.text.last_ms = t;
                    }
                    (Key::Enter | Key::Tab, _) => self.single_key(*key, &mut out),
                    (_, Some(c)) if !c.is_control() => {
                        if self.text.is_stale(t, self.config.inter_key_timeout_ms) {
                            self.flush_text(&mut out);
                        }
                        self.text.push(*c, t);
                    }
                    _ => self.single_key(*key, &mut out),
                }
            }

            RawEvent::ClipboardChanged { text } => {
                self.flush_click(&mut out);
                self.flush_text(&mut out);
                let len = text.chars().count();
                if len == 0 || len < self.config.min_clipboard_len {
                    trace!(len, "clipboard text too short, ignored");
                    return out;
                }
                let text: String = if len > self.config.max_clipboard_len {
                    debug!(len, max = self.config.max_clipboard_len, "clipboard text truncated");
                    text.chars().take(self.config.max_clipboard_len).collect()
                } else {
                    text.clone()
                };
                out.push(StepAction::ClipboardCopy { text, output: None });
            }
        }
        out
    }

    /// Flush buffers whose timeouts have passed
    pub fn tick(&mut self, now_ms: u64) -> Vec<StepAction> {
        let mut out = Vec::new();
        if self
            .click
            .as_ref()
            .is_some_and(|c| now_ms.saturating_sub(c.t_ms) > self.config.double_click_ms)
        {
            self.flush_click(&mut out);
        }
        if self.text.is_stale(now_ms, self.config.inter_key_timeout_ms) {
            self.flush_text(&mut out);
        }
        out
    }

    /// Flush everything pending, e.g. when recording stops
    pub fn finish(&mut self) -> Vec<StepAction> {
        let mut out = Vec::new();
        self.press = None;
        self.flush_click(&mut out);
        self.flush_text(&mut out);
        out
    }

    fn continues(&self, prev: &PendingClick, at: Point, button: MouseButton, t: u64) -> bool {
        prev.button == button
            && t.saturating_sub(prev.t_ms) <= self.config.double_click_ms
            && prev.at.distance(&at) <= self.config.click_tolerance_px
    }

    fn single_key(&mut self, key: Key, out: &mut Vec<StepAction>) {
        self.flush_text(out);
        if self.modifiers.is_empty() {
            out.push(StepAction::KeyPress { key });
        } else {
            out.push(StepAction::Hotkey {
                chord: KeyChord::new(self.modifiers, hotkey_key(key)),
            });
        }
    }

    fn normalize(&self, at: Point, client: &Rect) -> Option<NormPoint> {
        let n = to_normalized(at, client)?;
        if n.clamped {
            warn!(point = %at, client = %client, "click outside client area, clamped to its edge");
        }
        Some(n.point)
    }

    fn flush_click(&mut self, out: &mut Vec<StepAction>) {
        if let Some(c) = self.click.take() {
            out.push(StepAction::click(c.norm, c.button));
        }
    }

    fn flush_text(&mut self, out: &mut Vec<StepAction>) {
        out.extend(self.text.flush());
    }
}

// ============================================================================
// Recording thread
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordingState {
    Armed,
    Paused,
    /// Target window went away; waiting for a re-pick
    Lost,
    /// Next pointer-down picks a new target
    Repicking,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingStatus {
    pub state: RecordingState,
    pub steps_recorded: usize,
    pub events_seen: u64,
    pub events_rejected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<Error>,
}

impl Default for RecordingStatus {
    fn default() -> Self {
        Self {
            state: RecordingState::Armed,
            steps_recorded: 0,
            events_seen: 0,
            events_rejected: 0,
            notice: None,
        }
    }
}

enum Control {
    Pause,
    Resume,
    Repick,
    Stop,
}

/// Recording handle - owns the recording thread
pub struct RecordingHandle {
    control: Sender<Control>,
    status: Arc<Mutex<RecordingStatus>>,
    thread: Option<thread::JoinHandle<TargetLock>>,
}

impl RecordingHandle {
    /// Start recording into `project`. The lock must already be engaged.
    pub fn spawn(
        capture: InputCapture,
        lock: TargetLock,
        desktop: Arc<dyn Desktop>,
        project: Arc<RwLock<Project>>,
        config: RecorderConfig,
    ) -> Self {
        let (control, control_rx) = unbounded();
        let status = Arc::new(Mutex::new(RecordingStatus::default()));
        let worker = RecordingLoop {
            capture,
            lock,
            desktop,
            project,
            recorder: StepRecorder::new(config),
            status: status.clone(),
            state: RecordingState::Armed,
        };
        let thread = thread::spawn(move || worker.run(control_rx));
        Self {
            control,
            status,
            thread: Some(thread),
        }
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Control::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Control::Resume)
    }

    /// Let the next click pick a new target, e.g. after the lock was lost
    pub fn repick(&self) -> Result<()> {
        self.send(Control::Repick)
    }

    fn send(&self, control: Control) -> Result<()> {
        self.control.send(control).map_err(|_| {
            Error::new(ErrorCode::CaptureFailed, "Recording thread has stopped")
                .with_suggestions(vec!["Stop the recording and start a new one".into()])
        })
    }

    pub fn status(&self) -> RecordingStatus {
        self.status.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop capture, flush pending steps and hand the lock back
    pub fn stop(mut self) -> (TargetLock, RecordingStatus) {
        let lock = self.shutdown().unwrap_or_default();
        (lock, self.status())
    }

    fn shutdown(&mut self) -> Option<TargetLock> {
        let thread = self.thread.take()?;
        let _ = self.control.send(Control::Stop);
        match thread.join() {
            Ok(lock) => Some(lock),
            Err(_) => {
                warn!("recording thread panicked");
                None
            }
        }
    }
}

impl Drop for RecordingHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct RecordingLoop {
    capture: InputCapture,
    lock: TargetLock,
    desktop: Arc<dyn Desktop>,
    project: Arc<RwLock<Project>>,
    recorder: StepRecorder,
    status: Arc<Mutex<RecordingStatus>>,
    state: RecordingState,
}

impl RecordingLoop {
    fn run(mut self, control: Receiver<Control>) -> TargetLock {
        let ticker = tick(Duration::from_millis(50));
        let events = self.capture.receiver().clone();
        info!(target = ?self.lock.target().map(|t| t.title.clone()), "recording started");

        loop {
            select! {
                recv(control) -> msg => match msg {
                    Ok(Control::Pause) => {
                        self.flush_all();
                        self.set_state(RecordingState::Paused);
                    }
                    Ok(Control::Resume) => {
                        if self.state == RecordingState::Paused {
                            self.set_state(RecordingState::Armed);
                        }
                    }
                    Ok(Control::Repick) => {
                        self.flush_all();
                        self.set_state(RecordingState::Repicking);
                    }
                    Ok(Control::Stop) | Err(_) => break,
                },
                recv(events) -> msg => match msg {
                    Ok(event) => self.handle(event),
                    Err(_) => break,
                },
                recv(ticker) -> _ => {
                    let now = self.capture.elapsed_ms();
                    let actions = self.recorder.tick(now);
                    self.commit(actions);
                }
            }
        }

        if let Err(e) = self.capture.stop() {
            warn!(error = %e, "capture source did not stop cleanly");
        }
        for event in self.capture.drain() {
            self.handle(event);
        }
        self.flush_all();
        self.set_state(RecordingState::Stopped);
        info!(steps = self.status.lock().steps_recorded, "recording stopped");
        self.lock
    }

    fn handle(&mut self, event: CapturedEvent) {
        self.status.lock().events_seen += 1;
        match self.state {
            RecordingState::Armed => self.handle_armed(event),
            RecordingState::Repicking => self.handle_repick(&event),
            RecordingState::Paused | RecordingState::Lost | RecordingState::Stopped => {
                self.recorder.track_modifiers(&event.event);
            }
        }
    }

    fn handle_armed(&mut self, event: CapturedEvent) {
        let verdict = self.lock.evaluate(&event.event, self.desktop.window_system());
        match verdict {
            Verdict::Accept { client } => {
                let actions = self.recorder.feed(&event, client);
                self.commit(actions);
            }
            Verdict::Reject(reason) => {
                trace!(?reason, event = event.event.name(), "event rejected by lock");
                self.recorder.track_modifiers(&event.event);
                self.status.lock().events_rejected += 1;
            }
            Verdict::Lost => {
                self.flush_all();
                let title = self
                    .lock
                    .target()
                    .map(|t| t.title.clone())
                    .unwrap_or_default();
                warn!(%title, "target lost, recording paused until a new target is picked");
                self.status.lock().notice = Some(Error::target_lost(&title));
                self.set_state(RecordingState::Lost);
            }
        }
    }

    fn handle_repick(&mut self, event: &CapturedEvent) {
        let RawEvent::PointerDown { at, .. } = event.event else {
            return;
        };
        match WindowResolver::new(self.desktop.window_system()).resolve_point(at) {
            Ok(window) => {
                info!(title = %window.title, "recording target re-picked");
                self.project.write().target = Some(window.descriptor());
                self.lock.engage(window);
                self.status.lock().notice = None;
                self.set_state(RecordingState::Armed);
            }
            Err(e) => {
                debug!(error = %e, "re-pick ignored, still waiting");
                self.status.lock().notice = Some(e);
            }
        }
    }

    fn flush_all(&mut self) {
        let actions = self.recorder.finish();
        self.commit(actions);
    }

    fn commit(&mut self, actions: Vec<StepAction>) {
        if actions.is_empty() {
            return;
        }
        let mut count = 0;
        let mut refused = None;
        {
            let mut project = self.project.write();
            for action in actions {
                let label = action.describe();
                match project.steps.append(action) {
                    Ok(index) => {
                        debug!(index, %label, "step recorded");
                        count += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, %label, "step dropped");
                        refused = Some(e);
                    }
                }
            }
            project.touch();
        }
        let mut status = self.status.lock();
        status.steps_recorded += count;
        if refused.is_some() {
            status.notice = refused;
        }
    }

    fn set_state(&mut self, state: RecordingState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "recording state");
        }
        self.state = state;
        self.status.lock().state = state;
    }
}
