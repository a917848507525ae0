//! Replay worker
//!
//! Runs the [`ReplayEngine`] on its own thread so the control surface stays
//! responsive. Commands are plain messages; the engine only looks at them
//! between steps and while settling.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use steplock_core::{Desktop, Error, ErrorCode, Point, Result};

use crate::project::Project;
use crate::replay::{
    Interrupt, Interrupts, ReplayConfig, ReplayCursor, ReplayEngine, ReplayEvent, ReplayPlan,
    RunMode, TargetBinding,
};

const EVENT_BACKLOG: usize = 1024;

#[derive(Debug, Clone)]
pub enum ReplayCommand {
    Run,
    Step,
    ResetStep,
    Pause,
    Abort,
    Bind(TargetBinding),
    Shutdown,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayStatus {
    pub cursor: ReplayCursor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<Error>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_injected: Option<Point>,
    pub steps_executed: usize,
    #[serde(skip)]
    handled: u64,
    /// Run and step commands taken off the queue, including ignored ones
    #[serde(skip)]
    launches: u64,
}

/// Handle to the replay thread
pub struct ReplayHandle {
    tx: Sender<ReplayCommand>,
    status: Arc<Mutex<ReplayStatus>>,
    events: Receiver<ReplayEvent>,
    sent: AtomicU64,
    /// Run and step commands sent
    launched: AtomicU64,
    thread: Option<thread::JoinHandle<()>>,
}

impl ReplayHandle {
    pub fn spawn(desktop: Arc<dyn Desktop>, project: Arc<RwLock<Project>>, config: ReplayConfig) -> Result<Self> {
        let (tx, rx) = unbounded();
        let (event_tx, events) = bounded(EVENT_BACKLOG);
        let status = Arc::new(Mutex::new(ReplayStatus::default()));

        let mut engine = ReplayEngine::new(desktop, config);
        let shared = status.clone();
        engine.on_event(move |event| {
            observe(&shared, event);
            // Nobody listening is fine; the status cell has the essentials
            let _ = event_tx.try_send(event.clone());
        });

        let worker = Worker {
            engine,
            project,
            rx,
            status: status.clone(),
        };
        let thread = thread::Builder::new()
            .name("steplock-replay".into())
            .spawn(move || worker.run())
            .map_err(|e| Error::new(ErrorCode::Io, format!("Failed to start replay thread: {}", e)))?;

        Ok(Self {
            tx,
            status,
            events,
            sent: AtomicU64::new(0),
            launched: AtomicU64::new(0),
            thread: Some(thread),
        })
    }

    pub fn run(&self) {
        self.launch(ReplayCommand::Run);
    }

    pub fn step(&self) {
        self.launch(ReplayCommand::Step);
    }

    pub fn reset_step(&self) {
        self.send(ReplayCommand::ResetStep);
    }

    pub fn pause(&self) {
        self.send(ReplayCommand::Pause);
    }

    pub fn abort(&self) {
        self.send(ReplayCommand::Abort);
    }

    pub fn bind(&self, target: TargetBinding) {
        self.send(ReplayCommand::Bind(target));
    }

    pub fn status(&self) -> ReplayStatus {
        self.status.lock().clone()
    }

    pub fn mode(&self) -> RunMode {
        self.status.lock().cursor.mode
    }

    /// A run or step is queued or executing. Unlike [`ReplayHandle::mode`]
    /// this is true as soon as `run` or `step` returns.
    pub fn is_busy(&self) -> bool {
        let status = self.status.lock();
        if status.cursor.mode.is_executing() {
            return true;
        }
        self.launched.load(Ordering::SeqCst) > status.launches && self.is_running()
    }

    /// Stream of replay events, bounded; old events are dropped when unread
    pub fn events(&self) -> &Receiver<ReplayEvent> {
        &self.events
    }

    /// Block until every command sent so far has been handled
    pub fn wait_settled(&self, timeout: Duration) -> Result<ReplayStatus> {
        let deadline = Instant::now() + timeout;
        let sent = self.sent.load(Ordering::SeqCst);
        loop {
            let status = self.status();
            if status.handled >= sent {
                return Ok(status);
            }
            if Instant::now() >= deadline || !self.is_running() {
                return Err(Error::new(
                    ErrorCode::Cancelled,
                    format!("replay did not settle within {} ms", timeout.as_millis()),
                ));
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the worker. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(ReplayCommand::Shutdown);
            if thread.join().is_err() {
                warn!("replay thread panicked");
            }
        }
    }

    fn launch(&self, command: ReplayCommand) {
        // Counted first so the worker is never ahead of the handle
        self.launched.fetch_add(1, Ordering::SeqCst);
        if !self.send(command) {
            self.launched.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn send(&self, command: ReplayCommand) -> bool {
        debug!(?command, "replay command");
        let sent = self.tx.send(command).is_ok();
        if sent {
            self.sent.fetch_add(1, Ordering::SeqCst);
        } else {
            warn!("replay worker is gone, command dropped");
        }
        sent
    }
}

impl Drop for ReplayHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn observe(status: &Mutex<ReplayStatus>, event: &ReplayEvent) {
    let mut s = status.lock();
    match event {
        ReplayEvent::ModeChanged { mode, position } => {
            s.cursor = ReplayCursor {
                position: *position,
                mode: *mode,
            };
        }
        ReplayEvent::StepStarted { position, .. } => s.cursor.position = *position,
        ReplayEvent::StepCompleted { injected, .. } => {
            s.steps_executed += 1;
            if injected.is_some() {
                s.last_injected = *injected;
            }
        }
        ReplayEvent::Faulted { error } => s.fault = Some(error.clone()),
        ReplayEvent::StepSkipped { .. } => {}
    }
}

struct Worker {
    engine: ReplayEngine,
    project: Arc<RwLock<Project>>,
    rx: Receiver<ReplayCommand>,
    status: Arc<Mutex<ReplayStatus>>,
}

impl Worker {
    fn run(mut self) {
        debug!("replay worker started");
        while let Ok(command) = self.rx.recv() {
            if !self.handle(command) {
                break;
            }
        }
        self.engine.abort();
        self.publish(0, 0);
        debug!("replay worker stopped");
    }

    /// False once the worker should exit
    fn handle(&mut self, command: ReplayCommand) -> bool {
        match command {
            ReplayCommand::Run | ReplayCommand::Step => {
                let plan = ReplayPlan::from_project(&self.project.read());
                let mut interrupts = ChannelInterrupts::new(&self.rx);
                let result = match command {
                    ReplayCommand::Run => self.engine.run(&plan, &mut interrupts),
                    _ => self.engine.step(&plan, &mut interrupts),
                };
                let ChannelInterrupts {
                    deferred,
                    consumed,
                    ignored_launches,
                    shutdown,
                    ..
                } = interrupts;

                match result {
                    Ok(mode) => debug!(?mode, "replay halted"),
                    Err(e) => info!(error = %e, "replay faulted, waiting for the user"),
                }
                self.write_outputs();
                self.publish(1 + consumed, 1 + ignored_launches);

                if shutdown {
                    return false;
                }
                deferred.into_iter().all(|command| self.handle(command))
            }
            ReplayCommand::ResetStep => {
                self.engine.reset_step();
                self.publish(1, 0);
                true
            }
            ReplayCommand::Pause => {
                self.engine.pause();
                self.publish(1, 0);
                true
            }
            ReplayCommand::Abort => {
                self.engine.abort();
                self.publish(1, 0);
                true
            }
            ReplayCommand::Bind(target) => {
                self.engine.bind(target);
                self.publish(1, 0);
                true
            }
            ReplayCommand::Shutdown => {
                self.publish(1, 0);
                false
            }
        }
    }

    fn write_outputs(&mut self) {
        let outputs = self.engine.take_outputs();
        if outputs.is_empty() {
            return;
        }
        let mut project = self.project.write();
        for (key, value) in &outputs {
            project.set_output(key, value);
        }
        project.touch();
        debug!(count = outputs.len(), "output variables updated");
    }

    fn publish(&self, handled: u64, launches: u64) {
        let mut s = self.status.lock();
        s.cursor = self.engine.cursor();
        s.fault = self.engine.fault().cloned();
        s.handled += handled;
        s.launches += launches;
    }
}

/// Interrupt source backed by the command queue. Commands that do not
/// interrupt a replay are kept for after it.
struct ChannelInterrupts<'a> {
    rx: &'a Receiver<ReplayCommand>,
    deferred: Vec<ReplayCommand>,
    consumed: u64,
    ignored_launches: u64,
    shutdown: bool,
}

impl<'a> ChannelInterrupts<'a> {
    fn new(rx: &'a Receiver<ReplayCommand>) -> Self {
        Self {
            rx,
            deferred: Vec::new(),
            consumed: 0,
            ignored_launches: 0,
            shutdown: false,
        }
    }

    fn absorb(&mut self, command: ReplayCommand) -> Option<Interrupt> {
        let interrupt = match command {
            ReplayCommand::Pause => Some(Interrupt::Pause),
            ReplayCommand::Abort => Some(Interrupt::Abort),
            ReplayCommand::ResetStep => Some(Interrupt::Reset),
            ReplayCommand::Shutdown => {
                self.shutdown = true;
                Some(Interrupt::Abort)
            }
            ReplayCommand::Run | ReplayCommand::Step => {
                debug!("replay already in progress, command ignored");
                self.ignored_launches += 1;
                None
            }
            deferred @ ReplayCommand::Bind(_) => {
                self.deferred.push(deferred);
                return None;
            }
        };
        self.consumed += 1;
        interrupt
    }

    fn disconnected(&mut self) -> Option<Interrupt> {
        self.shutdown = true;
        Some(Interrupt::Abort)
    }
}

impl Interrupts for ChannelInterrupts<'_> {
    fn poll(&mut self) -> Option<Interrupt> {
        loop {
            match self.rx.try_recv() {
                Ok(command) => {
                    if let Some(interrupt) = self.absorb(command) {
                        return Some(interrupt);
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return self.disconnected(),
            }
        }
    }

    fn settle(&mut self, delay: Duration) -> Option<Interrupt> {
        let deadline = Instant::now() + delay;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return self.poll();
            }
            match self.rx.recv_timeout(left) {
                Ok(command) => {
                    if let Some(interrupt) = self.absorb(command) {
                        return Some(interrupt);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => return self.disconnected(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepAction;
    use steplock_core::sim::VirtualDesktop;
    use steplock_core::{MouseButton, NormPoint, Rect, WindowSystem};

    fn setup(clicks: usize, settle_ms: u64) -> (Arc<VirtualDesktop>, Arc<RwLock<Project>>, ReplayHandle) {
        let desktop = Arc::new(VirtualDesktop::new(1));
        let handle = desktop.open_window("Ledger", "LedgerWnd", "ledger.exe", 7, Rect::new(0, 0, 100, 100));
        let mut project = Project::new("worker");
        for i in 0..clicks {
            project
                .steps
                .append(StepAction::click(NormPoint::new(0.1 * i as f64, 0.5), MouseButton::Left))
                .unwrap();
        }
        let project = Arc::new(RwLock::new(project));
        let config = ReplayConfig {
            settle_ms,
            focus_delay_ms: 0,
            ..Default::default()
        };
        let replay = ReplayHandle::spawn(desktop.clone(), project.clone(), config).unwrap();
        let window = desktop.window_info(handle).unwrap();
        replay.bind(TargetBinding::window(window));
        (desktop, project, replay)
    }

    #[test]
    fn run_completes_in_background() {
        let (desktop, _, replay) = setup(3, 0);
        replay.run();
        let status = replay.wait_settled(Duration::from_secs(5)).unwrap();
        assert_eq!(status.cursor, ReplayCursor { position: 3, mode: RunMode::Completed });
        assert_eq!(desktop.clicked_points().len(), 3);
        assert_eq!(status.steps_executed, 3);
    }

    #[test]
    fn pause_during_settle_stops_at_the_next_step() {
        let (desktop, _, replay) = setup(5, 200);
        replay.run();
        // Lands while the first step is settling
        thread::sleep(Duration::from_millis(50));
        replay.pause();
        let status = replay.wait_settled(Duration::from_secs(5)).unwrap();
        assert_eq!(status.cursor.mode, RunMode::Paused);
        assert_eq!(status.cursor.position, 1);
        assert_eq!(desktop.clicked_points().len(), 1);
    }

    #[test]
    fn reset_step_goes_back_to_idle_at_zero() {
        let (_, _, replay) = setup(2, 0);
        replay.step();
        replay.reset_step();
        let status = replay.wait_settled(Duration::from_secs(5)).unwrap();
        assert_eq!(status.cursor, ReplayCursor { position: 0, mode: RunMode::Idle });
    }

    #[test]
    fn clipboard_outputs_are_written_back() {
        let (desktop, project, replay) = setup(0, 0);
        desktop.set_clipboard("42.00");
        project
            .write()
            .steps
            .append(StepAction::ClipboardCopy {
                text: String::new(),
                output: Some("total".into()),
            })
            .unwrap();
        replay.run();
        replay.wait_settled(Duration::from_secs(5)).unwrap();
        let project = project.read();
        assert_eq!(project.variable("total").map(|v| v.value.as_str()), Some("42.00"));
    }

    #[test]
    fn busy_from_the_moment_run_returns() {
        let (_, _, replay) = setup(3, 100);
        assert!(!replay.is_busy());
        replay.run();
        assert!(replay.is_busy());
        let status = replay.wait_settled(Duration::from_secs(5)).unwrap();
        assert_eq!(status.cursor.mode, RunMode::Completed);
        assert!(!replay.is_busy());
    }

    #[test]
    fn repeated_runs_do_not_leave_it_busy() {
        let (desktop, _, replay) = setup(2, 100);
        replay.run();
        replay.run();
        replay.step();
        replay.wait_settled(Duration::from_secs(5)).unwrap();
        assert!(!replay.is_busy());
        assert_eq!(desktop.clicked_points().len(), 2);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (_, _, mut replay) = setup(1, 0);
        replay.shutdown();
        replay.shutdown();
        assert!(!replay.is_running());
    }
}
