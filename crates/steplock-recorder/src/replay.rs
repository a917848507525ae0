//! Replay engine
//!
//! Executes a step list against the live target window. Coordinates are
//! mapped onto the client rect as it is *now*, so a recording survives the
//! window being moved. The engine is synchronous; [`crate::worker`] runs it on
//! a thread and feeds it commands.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use steplock_core::{
    to_screen, ClipboardAccess, Desktop, Error, ErrorCode, InputInjector, Key, KeyChord,
    NormPoint, Point, Result, TargetDescriptor, TargetWindow, WindowResolver, WindowSystem,
};

use crate::project::Project;
use crate::step::{Step, StepAction, WaitCondition};

/// Replay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Pause after every executed step
    pub settle_ms: u64,
    /// Pause after bringing the target to the front
    pub focus_delay_ms: u64,
    /// Find the target again by title/class/process when its handle is stale
    pub reacquire_by_descriptor: bool,
    /// Poll period of conditional waits
    pub wait_poll_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            settle_ms: 80,
            focus_delay_ms: 50,
            reacquire_by_descriptor: true,
            wait_poll_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunMode {
    #[default]
    Idle,
    Running,
    Stepping,
    Paused,
    Faulted,
    Completed,
}

impl RunMode {
    /// Steps are being injected, or may be at the next command
    pub fn is_executing(&self) -> bool {
        matches!(self, RunMode::Running | RunMode::Stepping)
    }

    /// A replay is in progress and owns the target
    pub fn is_active(&self) -> bool {
        matches!(self, RunMode::Running | RunMode::Stepping | RunMode::Paused)
    }
}

/// Position in the step list. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReplayCursor {
    /// Position of the next step to execute
    pub position: usize,
    pub mode: RunMode,
}

/// Request observed between steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Pause,
    Abort,
    Reset,
}

/// Where the engine looks for interrupts at step boundaries
pub trait Interrupts {
    fn poll(&mut self) -> Option<Interrupt>;

    /// Wait out a settle delay, returning early if interrupted
    fn settle(&mut self, delay: Duration) -> Option<Interrupt>;
}

/// Never interrupted, settle delays just sleep
pub struct Uninterrupted;

impl Interrupts for Uninterrupted {
    fn poll(&mut self) -> Option<Interrupt> {
        None
    }

    fn settle(&mut self, delay: Duration) -> Option<Interrupt> {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        None
    }
}

/// Window to replay into. The handle is a hint; the descriptor is what
/// survives restarts of the target application.
#[derive(Debug, Clone, Default)]
pub struct TargetBinding {
    pub window: Option<TargetWindow>,
    pub descriptor: Option<TargetDescriptor>,
}

impl TargetBinding {
    pub fn window(window: TargetWindow) -> Self {
        Self {
            descriptor: Some(window.descriptor()),
            window: Some(window),
        }
    }

    pub fn descriptor(descriptor: TargetDescriptor) -> Self {
        Self {
            window: None,
            descriptor: Some(descriptor),
        }
    }

    fn name(&self) -> String {
        match (&self.window, &self.descriptor) {
            (Some(w), _) => w.display_name().to_string(),
            (None, Some(d)) => d.to_string(),
            (None, None) => "<no target>".to_string(),
        }
    }
}

/// Snapshot of what a run executes
#[derive(Debug, Clone, Default)]
pub struct ReplayPlan {
    pub steps: Vec<Step>,
    pub inputs: HashMap<String, String>,
}

impl ReplayPlan {
    pub fn from_project(project: &Project) -> Self {
        Self {
            steps: project.steps.iter().cloned().collect(),
            inputs: project.inputs(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplayEvent {
    ModeChanged { mode: RunMode, position: usize },
    StepStarted { position: usize, index: u32, label: String },
    StepSkipped { position: usize, index: u32 },
    StepCompleted {
        position: usize,
        index: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        injected: Option<Point>,
    },
    Faulted { error: Error },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayStats {
    pub executed: usize,
    pub skipped: usize,
    pub clicks: usize,
    pub keys: usize,
    pub text_chars: usize,
}

type Observer = Box<dyn FnMut(&ReplayEvent) + Send>;

pub struct ReplayEngine {
    desktop: Arc<dyn Desktop>,
    config: ReplayConfig,
    cursor: ReplayCursor,
    target: TargetBinding,
    fault: Option<Error>,
    outputs: HashMap<String, String>,
    stats: ReplayStats,
    observer: Option<Observer>,
}

impl ReplayEngine {
    pub fn new(desktop: Arc<dyn Desktop>, config: ReplayConfig) -> Self {
        Self {
            desktop,
            config,
            cursor: ReplayCursor::default(),
            target: TargetBinding::default(),
            fault: None,
            outputs: HashMap::new(),
            stats: ReplayStats::default(),
            observer: None,
        }
    }

    /// Receive every [`ReplayEvent`] as it happens
    pub fn on_event(&mut self, observer: impl FnMut(&ReplayEvent) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn bind(&mut self, target: TargetBinding) {
        debug!(target = %target.name(), "replay target bound");
        self.target = target;
    }

    pub fn target(&self) -> &TargetBinding {
        &self.target
    }

    pub fn cursor(&self) -> ReplayCursor {
        self.cursor
    }

    pub fn mode(&self) -> RunMode {
        self.cursor.mode
    }

    pub fn fault(&self) -> Option<&Error> {
        self.fault.as_ref()
    }

    pub fn stats(&self) -> &ReplayStats {
        &self.stats
    }

    /// Output variables captured since the last call
    pub fn take_outputs(&mut self) -> HashMap<String, String> {
        std::mem::take(&mut self.outputs)
    }

    /// Execute every enabled step from the cursor to the end.
    ///
    /// Returns the mode the run stopped in. A failing step leaves the engine
    /// `Faulted` with the cursor on that step, and the error is returned.
    pub fn run(&mut self, plan: &ReplayPlan, interrupts: &mut dyn Interrupts) -> Result<RunMode> {
        self.begin(plan, RunMode::Running);
        loop {
            if let Some(interrupt) = interrupts.poll() {
                self.interrupted(interrupt);
                return Ok(self.cursor.mode);
            }
            if self.skip_disabled(plan) {
                self.set_mode(RunMode::Completed);
                return Ok(RunMode::Completed);
            }
            let interrupt = self.execute_at_cursor(plan, interrupts)?;
            if let Some(interrupt) = interrupt {
                self.interrupted(interrupt);
                return Ok(self.cursor.mode);
            }
        }
    }

    /// Execute the next enabled step, then halt
    pub fn step(&mut self, plan: &ReplayPlan, interrupts: &mut dyn Interrupts) -> Result<RunMode> {
        self.begin(plan, RunMode::Stepping);
        if self.skip_disabled(plan) {
            self.set_mode(RunMode::Completed);
            return Ok(RunMode::Completed);
        }
        if let Some(interrupt) = self.execute_at_cursor(plan, interrupts)? {
            self.interrupted(interrupt);
            return Ok(self.cursor.mode);
        }
        if self.cursor.position >= plan.len() {
            self.set_mode(RunMode::Completed);
        }
        Ok(self.cursor.mode)
    }

    /// Cursor back to the first step, nothing is replayed
    pub fn reset_step(&mut self) {
        self.fault = None;
        self.cursor.position = 0;
        self.set_mode(RunMode::Idle);
    }

    /// Halt between steps
    pub fn pause(&mut self) {
        if self.cursor.mode.is_executing() {
            self.set_mode(RunMode::Paused);
        }
    }

    /// Stop the replay, keeping the cursor where it is
    pub fn abort(&mut self) {
        if self.cursor.mode != RunMode::Idle {
            self.fault = None;
            self.set_mode(RunMode::Idle);
        }
    }

    fn begin(&mut self, plan: &ReplayPlan, mode: RunMode) {
        if self.cursor.mode == RunMode::Completed || self.cursor.position > plan.len() {
            self.cursor.position = 0;
        }
        if let Some(fault) = self.fault.take() {
            info!(position = self.cursor.position, error = %fault, "retrying faulted step");
        }
        if self.cursor.mode != mode {
            info!(position = self.cursor.position, steps = plan.len(), ?mode, "replay started");
        }
        self.set_mode(mode);
    }

    /// Advance past disabled steps. True when nothing is left to run.
    fn skip_disabled(&mut self, plan: &ReplayPlan) -> bool {
        while let Some(step) = plan.steps.get(self.cursor.position) {
            if step.enabled {
                return false;
            }
            debug!(index = step.index, "skipping disabled step");
            self.stats.skipped += 1;
            self.emit(ReplayEvent::StepSkipped {
                position: self.cursor.position,
                index: step.index,
            });
            self.cursor.position += 1;
        }
        true
    }

    fn execute_at_cursor(
        &mut self,
        plan: &ReplayPlan,
        interrupts: &mut dyn Interrupts,
    ) -> Result<Option<Interrupt>> {
        let position = self.cursor.position;
        let Some(step) = plan.steps.get(position) else {
            return Ok(None);
        };
        self.emit(ReplayEvent::StepStarted {
            position,
            index: step.index,
            label: step.label.clone(),
        });

        let injected = match self.execute(step, plan) {
            Ok(injected) => injected,
            Err(e) => {
                let e = e.at_step(position, step.index, step.action.kind_name());
                warn!(error = %e, "replay faulted");
                self.fault = Some(e.clone());
                self.set_mode(RunMode::Faulted);
                self.emit(ReplayEvent::Faulted { error: e.clone() });
                return Err(e);
            }
        };

        self.stats.executed += 1;
        self.emit(ReplayEvent::StepCompleted {
            position,
            index: step.index,
            injected,
        });
        let interrupt = interrupts.settle(Duration::from_millis(self.config.settle_ms));
        self.cursor.position = position + 1;
        Ok(interrupt)
    }

    fn interrupted(&mut self, interrupt: Interrupt) {
        debug!(?interrupt, position = self.cursor.position, "replay interrupted");
        match interrupt {
            Interrupt::Pause => self.set_mode(RunMode::Paused),
            Interrupt::Abort => self.set_mode(RunMode::Idle),
            Interrupt::Reset => {
                self.cursor.position = 0;
                self.set_mode(RunMode::Idle);
            }
        }
    }

    /// Execute one step. Returns the screen point of an injected click.
    fn execute(&mut self, step: &Step, plan: &ReplayPlan) -> Result<Option<Point>> {
        match &step.action {
            StepAction::Click { x, y, button } | StepAction::DoubleClick { x, y, button } => {
                let target = self.prepare_target()?;
                let client = self
                    .desktop
                    .client_rect(target.handle)
                    .ok_or_else(|| Error::target_lost(&target.title))?;
                let at = to_screen(NormPoint::new(*x, *y), &client)
                    .ok_or_else(|| Error::target_lost(&target.title))?;
                let count = if matches!(step.action, StepAction::DoubleClick { .. }) { 2 } else { 1 };
                debug!(index = step.index, %at, %client, "injecting click");
                self.desktop.click(at, *button, count)?;
                self.stats.clicks += 1;
                Ok(Some(at))
            }
            StepAction::KeyPress { key } => {
                self.prepare_target()?;
                match key {
                    Key::Char(c) => self.desktop.type_text(&c.to_string())?,
                    other => self.desktop.press(&KeyChord::plain(*other))?,
                }
                self.stats.keys += 1;
                Ok(None)
            }
            StepAction::Hotkey { chord } => {
                self.prepare_target()?;
                self.desktop.press(chord)?;
                self.stats.keys += 1;
                Ok(None)
            }
            StepAction::TypeText { text, input } => {
                self.prepare_target()?;
                let text = match input {
                    Some(var) => match plan.inputs.get(var) {
                        Some(value) => value.as_str(),
                        None => {
                            warn!(variable = %var, "input variable not declared, typing recorded text");
                            text.as_str()
                        }
                    },
                    None => text.as_str(),
                };
                self.desktop.type_text(text)?;
                self.stats.text_chars += text.chars().count();
                Ok(None)
            }
            StepAction::ClipboardCopy { output, .. } => {
                let live = self.desktop.read_text()?.unwrap_or_default();
                match output {
                    Some(var) => {
                        debug!(variable = %var, len = live.len(), "clipboard captured");
                        self.outputs.insert(var.clone(), live);
                    }
                    None => debug!(len = live.len(), "clipboard checked"),
                }
                Ok(None)
            }
            StepAction::Wait { ms, until } => {
                if *ms > 0 {
                    thread::sleep(Duration::from_millis(*ms));
                }
                if let Some(condition) = until {
                    self.wait_for(condition)?;
                }
                Ok(None)
            }
            StepAction::Focus {} => {
                let target = self.acquire_target()?;
                self.desktop.focus(target.handle)?;
                if self.config.focus_delay_ms > 0 {
                    thread::sleep(Duration::from_millis(self.config.focus_delay_ms));
                }
                Ok(None)
            }
            StepAction::Unsupported { kind, .. } => Err(Error::invalid_step(format!(
                "step kind '{}' is not supported by this version",
                kind
            ))),
        }
    }

    /// Revalidate the target, bring it to the front and let it settle
    fn prepare_target(&mut self) -> Result<TargetWindow> {
        let target = self.acquire_target()?;
        if let Err(e) = self.desktop.focus(target.handle) {
            warn!(error = %e, title = %target.title, "could not bring target to front, injecting anyway");
        }
        if self.config.focus_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.focus_delay_ms));
        }
        Ok(target)
    }

    fn acquire_target(&mut self) -> Result<TargetWindow> {
        let desktop = self.desktop.clone();
        let windows = desktop.window_system();

        if let Some(fresh) = self
            .target
            .window
            .as_ref()
            .and_then(|w| windows.window_info(w.handle))
        {
            self.target.window = Some(fresh.clone());
            return Ok(fresh);
        }

        if self.config.reacquire_by_descriptor {
            if let Some(descriptor) = &self.target.descriptor {
                match WindowResolver::new(windows).resolve_by_descriptor(descriptor) {
                    Ok(window) => {
                        info!(title = %window.title, handle = %window.handle, "target re-acquired");
                        self.target.window = Some(window.clone());
                        return Ok(window);
                    }
                    Err(e) => debug!(error = %e, "re-acquisition failed"),
                }
            }
        }

        Err(Error::target_lost(&self.target.name()))
    }

    fn wait_for(&mut self, condition: &WaitCondition) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(condition.timeout_ms());
        let poll = Duration::from_millis(self.config.wait_poll_ms.max(1));
        loop {
            let met = match condition {
                WaitCondition::WindowTitleContains { text, .. } => self
                    .acquire_target()
                    .map(|w| w.title.to_lowercase().contains(&text.to_lowercase()))
                    .unwrap_or(false),
                // A busy clipboard reads as not there yet
                WaitCondition::ClipboardContains { text, .. } => self
                    .desktop
                    .read_text()
                    .ok()
                    .flatten()
                    .is_some_and(|clip| clip.contains(text.as_str())),
                WaitCondition::ProcessExists { process, .. } => {
                    self.desktop.window_system().process_running(process)
                }
            };
            if met {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::new(
                    ErrorCode::WaitTimedOut,
                    format!("condition not met within {} ms", condition.timeout_ms()),
                )
                .with_suggestions(vec!["Increase the wait timeout or check the target application".into()]));
            }
            thread::sleep(poll.min(deadline - now));
        }
    }

    fn set_mode(&mut self, mode: RunMode) {
        if self.cursor.mode == mode {
            return;
        }
        debug!(from = ?self.cursor.mode, to = ?mode, "replay mode");
        self.cursor.mode = mode;
        self.emit(ReplayEvent::ModeChanged {
            mode,
            position: self.cursor.position,
        });
    }

    fn emit(&mut self, event: ReplayEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steplock_core::sim::{Injected, VirtualDesktop};
    use steplock_core::{MouseButton, Rect, WindowHandle};

    const OWN_PID: u32 = 1;

    fn config() -> ReplayConfig {
        ReplayConfig {
            settle_ms: 0,
            focus_delay_ms: 0,
            wait_poll_ms: 5,
            ..Default::default()
        }
    }

    fn setup() -> (Arc<VirtualDesktop>, WindowHandle, ReplayEngine) {
        let desktop = Arc::new(VirtualDesktop::new(OWN_PID));
        let handle = desktop.open_window("Notes", "NotesWnd", "notes.exe", 42, Rect::new(100, 100, 400, 300));
        let mut engine = ReplayEngine::new(desktop.clone(), config());
        let window = desktop.window_info(handle).unwrap();
        engine.bind(TargetBinding::window(window));
        (desktop, handle, engine)
    }

    fn plan(actions: Vec<StepAction>) -> ReplayPlan {
        ReplayPlan {
            steps: actions
                .into_iter()
                .enumerate()
                .map(|(i, a)| Step::new(i as u32 + 1, a))
                .collect(),
            inputs: HashMap::new(),
        }
    }

    fn clicks(n: usize) -> ReplayPlan {
        plan(
            (0..n)
                .map(|i| StepAction::click(NormPoint::new(0.1 * i as f64, 0.5), MouseButton::Left))
                .collect(),
        )
    }

    #[test]
    fn click_lands_on_moved_window() {
        let (desktop, handle, mut engine) = setup();
        desktop.move_window(handle, 300, 300);
        let mode = engine
            .run(&plan(vec![StepAction::click(NormPoint::new(0.5, 0.5), MouseButton::Left)]), &mut Uninterrupted)
            .unwrap();
        assert_eq!(mode, RunMode::Completed);
        assert_eq!(desktop.clicked_points(), vec![Point::new(500, 450)]);
    }

    #[test]
    fn fault_keeps_cursor_on_failing_step() {
        let (desktop, _, mut engine) = setup();
        desktop.reject_injections_after(2);
        let err = engine.run(&clicks(5), &mut Uninterrupted).unwrap_err();
        assert_eq!(err.code, ErrorCode::InjectionRejected);
        let step = err.step.expect("fault names the step");
        assert_eq!((step.position, step.index, step.kind.as_str()), (2, 3, "Click"));
        assert_eq!(engine.cursor(), ReplayCursor { position: 2, mode: RunMode::Faulted });
        assert_eq!(desktop.clicked_points().len(), 2);
    }

    #[test]
    fn faulted_run_retries_the_failed_step() {
        let (desktop, _, mut engine) = setup();
        desktop.reject_injections_after(1);
        assert!(engine.run(&clicks(3), &mut Uninterrupted).is_err());
        desktop.accept_injections();
        assert_eq!(engine.run(&clicks(3), &mut Uninterrupted).unwrap(), RunMode::Completed);
        assert_eq!(desktop.clicked_points().len(), 3);
        assert!(engine.fault().is_none());
    }

    #[test]
    fn stepping_advances_one_at_a_time() {
        let (desktop, _, mut engine) = setup();
        let plan = clicks(2);
        assert_eq!(engine.step(&plan, &mut Uninterrupted).unwrap(), RunMode::Stepping);
        assert_eq!(engine.cursor().position, 1);
        assert_eq!(desktop.clicked_points().len(), 1);
        assert_eq!(engine.step(&plan, &mut Uninterrupted).unwrap(), RunMode::Completed);
        engine.reset_step();
        assert_eq!(engine.cursor(), ReplayCursor { position: 0, mode: RunMode::Idle });
        assert_eq!(desktop.clicked_points().len(), 2);
    }

    #[test]
    fn disabled_steps_are_skipped() {
        let (desktop, _, mut engine) = setup();
        let mut plan = clicks(3);
        plan.steps[1].enabled = false;
        engine.run(&plan, &mut Uninterrupted).unwrap();
        assert_eq!(desktop.clicked_points().len(), 2);
        assert_eq!(engine.stats().skipped, 1);
    }

    #[test]
    fn closed_target_is_reacquired_by_descriptor() {
        let (desktop, handle, mut engine) = setup();
        desktop.close_window(handle);
        desktop.open_window("Notes", "NotesWnd", "notes.exe", 43, Rect::new(0, 0, 200, 100));
        engine
            .run(&plan(vec![StepAction::click(NormPoint::new(0.5, 0.5), MouseButton::Left)]), &mut Uninterrupted)
            .unwrap();
        assert_eq!(desktop.clicked_points(), vec![Point::new(100, 50)]);
    }

    #[test]
    fn missing_target_faults_with_target_lost() {
        let (desktop, handle, mut engine) = setup();
        desktop.close_window(handle);
        let err = engine.run(&clicks(1), &mut Uninterrupted).unwrap_err();
        assert_eq!(err.code, ErrorCode::TargetLost);
        assert_eq!(engine.mode(), RunMode::Faulted);
    }

    #[test]
    fn text_uses_input_variables_and_clipboard_fills_outputs() {
        let (desktop, _, mut engine) = setup();
        desktop.set_clipboard("INV-001");
        let mut plan = plan(vec![
            StepAction::TypeText { text: "bob".into(), input: Some("user".into()) },
            StepAction::KeyPress { key: Key::Enter },
            StepAction::ClipboardCopy { text: "old".into(), output: Some("invoice".into()) },
        ]);
        plan.inputs.insert("user".into(), "alice".into());
        engine.run(&plan, &mut Uninterrupted).unwrap();
        assert_eq!(
            desktop.injected(),
            vec![
                Injected::Text("alice".into()),
                Injected::Press(KeyChord::plain(Key::Enter)),
            ]
        );
        assert_eq!(engine.take_outputs().get("invoice").map(String::as_str), Some("INV-001"));
    }

    #[test]
    fn conditional_wait_times_out() {
        let (_, _, mut engine) = setup();
        let plan = plan(vec![StepAction::Wait {
            ms: 0,
            until: Some(WaitCondition::WindowTitleContains { text: "Saved".into(), timeout_ms: 20 }),
        }]);
        let err = engine.run(&plan, &mut Uninterrupted).unwrap_err();
        assert_eq!(err.code, ErrorCode::WaitTimedOut);
    }

    #[test]
    fn title_wait_ignores_case() {
        let (desktop, handle, mut engine) = setup();
        desktop.set_title(handle, "Notes - SAVED");
        let plan = plan(vec![StepAction::Wait {
            ms: 0,
            until: Some(WaitCondition::WindowTitleContains { text: "Saved".into(), timeout_ms: 200 }),
        }]);
        assert_eq!(engine.run(&plan, &mut Uninterrupted).unwrap(), RunMode::Completed);
    }

    #[test]
    fn process_wait_sees_late_starts() {
        let (desktop, _, mut engine) = setup();
        let plan = plan(vec![StepAction::Wait {
            ms: 0,
            until: Some(WaitCondition::ProcessExists { process: "saplogon.exe".into(), timeout_ms: 20 }),
        }]);
        let err = engine.run(&plan, &mut Uninterrupted).unwrap_err();
        assert_eq!(err.code, ErrorCode::WaitTimedOut);

        desktop.start_process("SAPLOGON.EXE");
        engine.reset_step();
        assert_eq!(engine.run(&plan, &mut Uninterrupted).unwrap(), RunMode::Completed);
    }

    #[test]
    fn focus_step_raises_the_target_without_input() {
        let (desktop, handle, mut engine) = setup();
        let other = desktop.open_window("Mail", "MailWnd", "mail.exe", 43, Rect::new(0, 0, 800, 600));
        assert_eq!(desktop.foreground_window(), Some(other));

        engine.run(&plan(vec![StepAction::Focus {}]), &mut Uninterrupted).unwrap();
        assert_eq!(desktop.foreground_window(), Some(handle));
        assert_eq!(desktop.focus_requests(), vec![handle]);
        assert!(desktop.injected().is_empty());
    }

    #[test]
    fn refused_focus_faults_the_focus_step() {
        let (desktop, _, mut engine) = setup();
        desktop.refuse_focus(true);
        let err = engine.run(&plan(vec![StepAction::Focus {}]), &mut Uninterrupted).unwrap_err();
        assert_eq!(err.code, ErrorCode::InjectionRejected);
        assert_eq!(err.step.map(|s| s.kind), Some("Focus".to_string()));
    }

    #[test]
    fn unreadable_clipboard_faults_the_copy_step() {
        let (desktop, _, mut engine) = setup();
        desktop.set_clipboard("INV-001");
        desktop.break_clipboard(true);
        let plan = plan(vec![
            StepAction::KeyPress { key: Key::Enter },
            StepAction::ClipboardCopy { text: "old".into(), output: Some("invoice".into()) },
        ]);

        let err = engine.run(&plan, &mut Uninterrupted).unwrap_err();
        assert_eq!(err.code, ErrorCode::Io);
        let step = err.step.expect("fault names the step");
        assert_eq!((step.position, step.kind.as_str()), (1, "ClipboardCopy"));
        assert!(engine.take_outputs().is_empty());
        assert_eq!(engine.cursor(), ReplayCursor { position: 1, mode: RunMode::Faulted });
    }

    #[test]
    fn unsupported_steps_fault_when_enabled() {
        let (_, _, mut engine) = setup();
        let mut plan = plan(vec![StepAction::Unsupported {
            kind: "Scroll".into(),
            raw: serde_json::json!({"kind": "Scroll"}),
        }]);
        assert_eq!(engine.run(&plan, &mut Uninterrupted).unwrap(), RunMode::Completed);
        plan.steps[0].enabled = true;
        engine.reset_step();
        let err = engine.run(&plan, &mut Uninterrupted).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidStep);
    }

    struct PauseAfter(usize);

    impl Interrupts for PauseAfter {
        fn poll(&mut self) -> Option<Interrupt> {
            None
        }

        fn settle(&mut self, _: Duration) -> Option<Interrupt> {
            if self.0 == 0 {
                return Some(Interrupt::Pause);
            }
            self.0 -= 1;
            None
        }
    }

    #[test]
    fn pause_is_honored_at_the_next_boundary() {
        let (desktop, _, mut engine) = setup();
        let plan = clicks(4);
        assert_eq!(engine.run(&plan, &mut PauseAfter(1)).unwrap(), RunMode::Paused);
        assert_eq!(engine.cursor().position, 2);
        assert_eq!(engine.run(&plan, &mut Uninterrupted).unwrap(), RunMode::Completed);
        assert_eq!(desktop.clicked_points().len(), 4);
    }

    #[test]
    fn empty_plan_completes_immediately() {
        let (desktop, _, mut engine) = setup();
        assert_eq!(engine.run(&ReplayPlan::default(), &mut Uninterrupted).unwrap(), RunMode::Completed);
        assert!(desktop.injected().is_empty());
    }
}
