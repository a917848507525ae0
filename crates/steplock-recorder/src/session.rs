//! Session - the one owner of project, target and engines
//!
//! Recording, editing and replay all touch the same step list, so only one of
//! them may be active at a time. The session enforces that with a mode guard
//! instead of locking individual steps.

use parking_lot::RwLock;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use steplock_core::{Desktop, Error, ErrorCode, Result, TargetLock, TargetWindow, WindowResolver};

use crate::capture::{InputCapture, InputSource};
use crate::config::EngineConfig;
use crate::project::{Project, Variable};
use crate::recorder::{RecordingHandle, RecordingStatus};
use crate::replay::{RunMode, TargetBinding};
use crate::step::StepList;
use crate::storage;
use crate::worker::{ReplayHandle, ReplayStatus};

/// Long enough for queued resets and aborts to land
const COMMAND_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionMode {
    Idle,
    Recording,
    Replaying,
    Editing,
}

pub struct Session {
    desktop: Arc<dyn Desktop>,
    config: EngineConfig,
    project: Arc<RwLock<Project>>,
    /// `None` while a recording owns it
    lock: Option<TargetLock>,
    recording: Option<RecordingHandle>,
    replay: ReplayHandle,
    editing: bool,
}

impl Session {
    pub fn new(desktop: Arc<dyn Desktop>, config: EngineConfig) -> Result<Self> {
        Self::with_project(desktop, config, Project::new("untitled"))
    }

    pub fn with_project(desktop: Arc<dyn Desktop>, config: EngineConfig, project: Project) -> Result<Self> {
        let project = Arc::new(RwLock::new(project));
        let replay = ReplayHandle::spawn(desktop.clone(), project.clone(), config.replay.clone())?;
        let mut session = Self {
            desktop,
            config,
            project,
            lock: Some(TargetLock::new()),
            recording: None,
            replay,
            editing: false,
        };
        session.reacquire();
        Ok(session)
    }

    /// Session on the native desktop
    pub fn native(config: EngineConfig) -> Result<Self> {
        Self::new(steplock_core::native_desktop()?, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn desktop(&self) -> &Arc<dyn Desktop> {
        &self.desktop
    }

    /// Shared project. Mutate it through [`Session::edit`] to respect the mode guard.
    pub fn project(&self) -> Arc<RwLock<Project>> {
        self.project.clone()
    }

    pub fn snapshot(&self) -> Project {
        self.project.read().clone()
    }

    pub fn mode(&self) -> SessionMode {
        if self.recording.is_some() {
            SessionMode::Recording
        } else if self.replay.is_busy() || self.replay.mode().is_active() {
            SessionMode::Replaying
        } else if self.editing {
            SessionMode::Editing
        } else {
            SessionMode::Idle
        }
    }

    pub fn target(&self) -> Option<TargetWindow> {
        self.lock.as_ref().and_then(|l| l.target().cloned())
    }

    // ========================================================================
    // Target
    // ========================================================================

    /// Wait for a click on the window to lock onto. Clicks on nothing or on
    /// our own windows are reported and ignored.
    pub fn pick_target(&mut self, source: Box<dyn InputSource>, timeout: Option<Duration>) -> Result<TargetWindow> {
        self.require_quiet("Pick")?;
        let capture = InputCapture::start(source, &self.config.capture)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let events = capture.events_until(deadline).map(|e| e.event);
        let window = WindowResolver::new(self.desktop.window_system()).pick(events, |e| {
            info!(error = %e, "click on the window to record");
        })?;
        drop(capture);
        self.engage(window.clone());
        Ok(window)
    }

    /// Lock onto a window chosen elsewhere
    pub fn engage(&mut self, window: TargetWindow) {
        info!(title = %window.title, handle = %window.handle, "target locked");
        self.project.write().target = Some(window.descriptor());
        self.replay.bind(TargetBinding::window(window.clone()));
        self.lock.get_or_insert_with(TargetLock::new).engage(window);
    }

    // ========================================================================
    // Recording
    // ========================================================================

    pub fn start_recording(&mut self, source: Box<dyn InputSource>) -> Result<()> {
        if self.recording.is_some() {
            return Err(Error::mode_conflict("Recording", SessionMode::Recording));
        }
        self.require_quiet("Recording")?;
        self.require_replay_idle("Recording")?;
        let mut lock = self.lock.take().unwrap_or_default();
        if !lock.revalidate(self.desktop.window_system()) {
            let title = lock.target().map(|t| t.title.clone()).unwrap_or_default();
            self.lock = Some(lock);
            return Err(Error::target_lost(&title)
                .with_suggestions(vec!["Pick a target window before recording".into()]));
        }
        let capture = match InputCapture::start(source, &self.config.capture) {
            Ok(capture) => capture,
            Err(e) => {
                self.lock = Some(lock);
                return Err(e);
            }
        };
        self.recording = Some(RecordingHandle::spawn(
            capture,
            lock,
            self.desktop.clone(),
            self.project.clone(),
            self.config.recorder.clone(),
        ));
        info!("recording");
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<RecordingStatus> {
        let recording = self.recording.take().ok_or_else(|| not_recording("Stop"))?;
        let (lock, status) = recording.stop();
        if let Some(window) = lock.target().filter(|_| lock.is_locked()) {
            self.replay.bind(TargetBinding::window(window.clone()));
        }
        self.lock = Some(lock);
        info!(steps = status.steps_recorded, "recording finished");
        Ok(status)
    }

    pub fn pause_recording(&self) -> Result<()> {
        self.recording.as_ref().ok_or_else(|| not_recording("Pause"))?.pause()
    }

    pub fn resume_recording(&self) -> Result<()> {
        self.recording.as_ref().ok_or_else(|| not_recording("Resume"))?.resume()
    }

    /// Next click during the recording picks a new target
    pub fn repick(&self) -> Result<()> {
        self.recording.as_ref().ok_or_else(|| not_recording("Repick"))?.repick()
    }

    pub fn recording_status(&self) -> Option<RecordingStatus> {
        self.recording.as_ref().map(RecordingHandle::status)
    }

    // ========================================================================
    // Replay
    // ========================================================================

    pub fn run(&mut self) -> Result<()> {
        self.require_replayable("Run")?;
        self.replay.run();
        Ok(())
    }

    pub fn step(&mut self) -> Result<()> {
        self.require_replayable("Step")?;
        self.replay.step();
        Ok(())
    }

    pub fn reset_step(&self) {
        self.replay.reset_step();
    }

    pub fn pause(&self) {
        self.replay.pause();
    }

    pub fn abort(&self) {
        self.replay.abort();
    }

    pub fn replay_status(&self) -> ReplayStatus {
        self.replay.status()
    }

    pub fn replay(&self) -> &ReplayHandle {
        &self.replay
    }

    /// Wait until the replay worker has caught up with every command
    pub fn wait_replay(&self, timeout: Duration) -> Result<ReplayStatus> {
        self.replay.wait_settled(timeout)
    }

    // ========================================================================
    // Editing
    // ========================================================================

    pub fn begin_editing(&mut self) -> Result<()> {
        self.require_editable()?;
        self.editing = true;
        Ok(())
    }

    pub fn end_editing(&mut self) {
        self.editing = false;
    }

    /// Change the step list. Refused while recording or replaying.
    pub fn edit<R>(&mut self, f: impl FnOnce(&mut StepList) -> Result<R>) -> Result<R> {
        self.require_editable()?;
        let mut project = self.project.write();
        let result = f(&mut project.steps)?;
        project.touch();
        Ok(result)
    }

    pub fn set_variable(&mut self, variable: Variable) -> Result<()> {
        self.require_editable()?;
        let mut project = self.project.write();
        project.set_variable(variable);
        project.touch();
        Ok(())
    }

    // ========================================================================
    // Projects
    // ========================================================================

    /// Replace the project. The cursor goes back to 0 and the recorded target
    /// is looked up again; failing that, replay re-acquires it lazily.
    pub fn load_project(&mut self, project: Project) -> Result<Option<TargetWindow>> {
        self.require_quiet("Load")?;
        info!(name = %project.name, steps = project.steps.len(), "project loaded");
        *self.project.write() = project;
        self.replay.reset_step();
        Ok(self.reacquire())
    }

    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<Option<TargetWindow>> {
        let project = storage::load(bytes)?;
        self.load_project(project)
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<Option<TargetWindow>> {
        let project = storage::load_file(path)?;
        self.load_project(project)
    }

    pub fn save_project(&self) -> Result<Vec<u8>> {
        storage::save(&self.project.read())
    }

    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        storage::save_file(&self.project.read(), path)
    }

    pub fn export_template(&self) -> Result<Vec<u8>> {
        storage::export_template(&self.project.read())
    }

    // ========================================================================
    // Guards
    // ========================================================================

    fn require_quiet(&self, wanted: &str) -> Result<()> {
        match self.mode() {
            SessionMode::Idle => Ok(()),
            // Leaving the editor for another mode is implicit
            SessionMode::Editing if wanted != "Recording" => Ok(()),
            mode => Err(Error::mode_conflict(wanted, mode)),
        }
    }

    fn require_replayable(&self, wanted: &str) -> Result<()> {
        match self.mode() {
            SessionMode::Recording | SessionMode::Editing => Err(Error::mode_conflict(wanted, self.mode())),
            SessionMode::Idle | SessionMode::Replaying => Ok(()),
        }
    }

    /// Recording may only start from an idle replay: not paused, faulted or
    /// completed.
    fn require_replay_idle(&self, wanted: &str) -> Result<()> {
        if !self.replay.is_busy() {
            let status = self.replay.wait_settled(COMMAND_SETTLE)?;
            if status.cursor.mode == RunMode::Idle {
                return Ok(());
            }
        }
        Err(Error::mode_conflict(wanted, SessionMode::Replaying)
            .with_suggestions(vec!["Reset or abort the replay first".into()]))
    }

    fn require_editable(&self) -> Result<()> {
        if self.recording.is_some() || self.replay.is_busy() {
            return Err(Error::edit_locked());
        }
        Ok(())
    }

    /// Find the project's window again by descriptor
    fn reacquire(&mut self) -> Option<TargetWindow> {
        let descriptor = self.project.read().target.clone()?;
        match WindowResolver::new(self.desktop.window_system()).resolve_by_descriptor(&descriptor) {
            Ok(window) => {
                self.engage(window.clone());
                Some(window)
            }
            Err(e) => {
                debug!(error = %e, "target not open yet");
                warn!(target = %descriptor, "recorded target window not found, will retry at replay");
                if let Some(lock) = self.lock.as_mut() {
                    lock.disengage();
                }
                self.replay.bind(TargetBinding::descriptor(descriptor));
                None
            }
        }
    }
}

fn not_recording(wanted: &str) -> Error {
    Error::new(ErrorCode::ModeConflict, format!("{} requires an active recording", wanted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ScriptedSource;
    use crate::step::StepAction;
    use steplock_core::sim::VirtualDesktop;
    use steplock_core::{Key, MouseButton, Point, RawEvent, Rect};

    fn quiet_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.replay.settle_ms = 0;
        config.replay.focus_delay_ms = 0;
        config
    }

    fn session() -> (Arc<VirtualDesktop>, Session) {
        let desktop = Arc::new(VirtualDesktop::new(1));
        desktop.open_window("Form", "FormWnd", "form.exe", 9, Rect::new(100, 100, 400, 300));
        let session = Session::new(desktop.clone(), quiet_config()).unwrap();
        (desktop, session)
    }

    fn click_at(x: i32, y: i32) -> ScriptedSource {
        ScriptedSource::new([RawEvent::PointerDown {
            at: Point::new(x, y),
            button: MouseButton::Left,
        }])
    }

    #[test]
    fn new_session_starts_the_replay_worker() {
        let (_, session) = session();
        assert!(session.replay().is_running());
        assert!(session.wait_replay(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn recording_needs_a_target() {
        let (_, mut session) = session();
        let err = session.start_recording(Box::new(ScriptedSource::new(Vec::new()))).unwrap_err();
        assert_eq!(err.code, ErrorCode::TargetLost);
        assert_eq!(session.mode(), SessionMode::Idle);
    }

    #[test]
    fn pick_locks_and_describes_the_target() {
        let (_, mut session) = session();
        let window = session
            .pick_target(Box::new(click_at(300, 250)), Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(window.title, "Form");
        assert_eq!(session.snapshot().target.map(|d| d.process_name), Some("form.exe".into()));
    }

    #[test]
    fn pick_times_out_without_a_click() {
        let (_, mut session) = session();
        let err = session
            .pick_target(Box::new(ScriptedSource::new(Vec::new())), Some(Duration::from_millis(50)))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
    }

    #[test]
    fn replay_and_edits_are_refused_while_recording() {
        let (_, mut session) = session();
        session.pick_target(Box::new(click_at(300, 250)), None).unwrap();
        session.start_recording(Box::new(ScriptedSource::new(Vec::new()))).unwrap();
        assert_eq!(session.mode(), SessionMode::Recording);

        assert_eq!(session.run().unwrap_err().code, ErrorCode::ModeConflict);
        assert_eq!(session.step().unwrap_err().code, ErrorCode::ModeConflict);
        let err = session.edit(|steps| steps.append(StepAction::KeyPress { key: Key::Enter }));
        assert_eq!(err.unwrap_err().code, ErrorCode::EditLocked);

        session.stop_recording().unwrap();
        assert_eq!(session.mode(), SessionMode::Idle);
        assert!(session.edit(|steps| steps.append(StepAction::KeyPress { key: Key::Enter })).is_ok());
    }

    #[test]
    fn replay_is_refused_while_editing() {
        let (_, mut session) = session();
        session.begin_editing().unwrap();
        assert_eq!(session.run().unwrap_err().code, ErrorCode::ModeConflict);
        session.end_editing();
        assert!(session.run().is_ok());
    }

    #[test]
    fn edits_are_refused_as_soon_as_run_returns() {
        let (_, mut session) = session();
        session
            .edit(|steps| {
                for _ in 0..3 {
                    steps.append(StepAction::Wait { ms: 100, until: None })?;
                }
                Ok(())
            })
            .unwrap();

        session.run().unwrap();
        assert_eq!(session.mode(), SessionMode::Replaying);
        let err = session.edit(|steps| steps.append(StepAction::Focus {})).unwrap_err();
        assert_eq!(err.code, ErrorCode::EditLocked);
        let err = session.set_variable(Variable::input("user", "alice")).unwrap_err();
        assert_eq!(err.code, ErrorCode::EditLocked);
        let err = session.start_recording(Box::new(ScriptedSource::new(Vec::new()))).unwrap_err();
        assert_eq!(err.code, ErrorCode::ModeConflict);

        let status = session.wait_replay(Duration::from_secs(5)).unwrap();
        assert_eq!(status.cursor.mode, RunMode::Completed);
        assert_eq!(session.mode(), SessionMode::Idle);
        assert!(session.edit(|steps| steps.append(StepAction::Focus {})).is_ok());
    }

    #[test]
    fn recording_needs_the_replay_reset() {
        let (_, mut session) = session();
        session.pick_target(Box::new(click_at(300, 250)), None).unwrap();
        session.run().unwrap();
        assert_eq!(session.wait_replay(Duration::from_secs(5)).unwrap().cursor.mode, RunMode::Completed);

        let err = session.start_recording(Box::new(ScriptedSource::new(Vec::new()))).unwrap_err();
        assert_eq!(err.code, ErrorCode::ModeConflict);
        assert_eq!(session.mode(), SessionMode::Idle);

        session.reset_step();
        session.start_recording(Box::new(ScriptedSource::new(Vec::new()))).unwrap();
        assert_eq!(session.mode(), SessionMode::Recording);
        session.stop_recording().unwrap();
    }

    #[test]
    fn stop_without_recording_is_a_mode_conflict() {
        let (_, mut session) = session();
        assert_eq!(session.stop_recording().unwrap_err().code, ErrorCode::ModeConflict);
    }

    #[test]
    fn loading_reacquires_by_descriptor() {
        let (_, mut session) = session();
        let doc = r#"{"name": "form", "target": {"title": "Form", "class_name": "FormWnd", "process_name": "form.exe"}}"#;
        let window = session.load_bytes(doc.as_bytes()).unwrap();
        assert_eq!(window.map(|w| w.title), Some("Form".into()));
        assert!(session.target().is_some());
    }
}
