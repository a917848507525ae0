//! Record against the in-memory desktop, then replay what was recorded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use steplock_core::sim::{Injected, VirtualDesktop};
use steplock_core::{ErrorCode, Key, MouseButton, NormPoint, Point, RawEvent, Rect, WindowHandle};
use steplock_recorder::{
    EngineConfig, ProjectStore, RecordingState, ReplayCursor, RunMode, ScriptedSource, Session, SessionMode,
    StepAction,
};

const SETTLE: Duration = Duration::from_secs(5);

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.replay.settle_ms = 0;
    config.replay.focus_delay_ms = 0;
    config.replay.wait_poll_ms = 5;
    config
}

fn desktop() -> (Arc<VirtualDesktop>, WindowHandle) {
    let desktop = Arc::new(VirtualDesktop::new(1));
    let handle = desktop.open_window("Order Entry", "FormWnd", "orders.exe", 9, Rect::new(100, 100, 400, 300));
    (desktop, handle)
}

fn down(x: i32, y: i32) -> RawEvent {
    RawEvent::PointerDown {
        at: Point::new(x, y),
        button: MouseButton::Left,
    }
}

fn up(x: i32, y: i32) -> RawEvent {
    RawEvent::PointerUp {
        at: Point::new(x, y),
        button: MouseButton::Left,
    }
}

fn typed(c: char) -> RawEvent {
    RawEvent::KeyDown {
        key: Key::Char(c.to_ascii_uppercase()),
        text: Some(c),
    }
}

/// Pick the form and record a click in its middle, "hi" and Enter
fn recorded_session(desktop: &Arc<VirtualDesktop>) -> Session {
    let mut session = Session::new(desktop.clone(), config()).unwrap();
    session
        .pick_target(Box::new(ScriptedSource::new([down(300, 250)])), Some(SETTLE))
        .unwrap();
    session
        .start_recording(Box::new(ScriptedSource::timed([
            (0, down(300, 250)),
            (30, up(300, 250)),
            (1000, typed('h')),
            (1050, typed('i')),
            (
                1100,
                RawEvent::KeyDown {
                    key: Key::Enter,
                    text: None,
                },
            ),
        ])))
        .unwrap();
    let status = session.stop_recording().unwrap();
    assert_eq!(status.state, RecordingState::Stopped);
    session
}

fn wait_for(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + SETTLE;
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn recorded_steps_are_window_relative() {
    let (desktop, _) = desktop();
    let session = recorded_session(&desktop);

    let project = session.snapshot();
    let kinds: Vec<&str> = project.steps.iter().map(|s| s.action.kind_name()).collect();
    assert_eq!(kinds, vec!["Click", "TypeText", "KeyPress"]);
    assert_eq!(project.steps.get(0).and_then(|s| s.action.point()), Some(NormPoint::new(0.5, 0.5)));
    assert_eq!(
        project.steps.get(1).map(|s| s.action.clone()),
        Some(StepAction::TypeText {
            text: "hi".into(),
            input: None
        })
    );
    assert_eq!(project.target.map(|t| t.title), Some("Order Entry".into()));
}

#[test]
fn replay_follows_the_moved_window() {
    let (desktop, handle) = desktop();
    let mut session = recorded_session(&desktop);

    desktop.move_window(handle, 300, 300);
    session.run().unwrap();
    let status = session.wait_replay(SETTLE).unwrap();

    assert_eq!(status.cursor.mode, RunMode::Completed);
    assert!(status.fault.is_none());
    assert_eq!(desktop.clicked_points(), vec![Point::new(500, 450)]);
    assert!(desktop.injected().contains(&Injected::Text("hi".into())));
    assert_eq!(session.mode(), SessionMode::Idle);
}

#[test]
fn replaying_twice_injects_the_same_points() {
    let (desktop, handle) = desktop();
    let mut session = recorded_session(&desktop);
    desktop.move_window(handle, 40, 60);

    session.run().unwrap();
    session.wait_replay(SETTLE).unwrap();
    let first = desktop.injected();
    desktop.clear_injected();

    session.run().unwrap();
    session.wait_replay(SETTLE).unwrap();
    assert_eq!(desktop.injected(), first);
    assert_eq!(desktop.clicked_points(), vec![Point::new(240, 210)]);
}

#[test]
fn fault_names_the_step_and_retry_resumes_there() {
    let (desktop, _) = desktop();
    let mut session = recorded_session(&desktop);
    session
        .edit(|steps| {
            steps.clear();
            for i in 0..5 {
                steps.append(StepAction::click(NormPoint::new(0.1 * f64::from(i), 0.5), MouseButton::Left))?;
            }
            Ok(())
        })
        .unwrap();

    desktop.reject_injections_after(2);
    session.run().unwrap();
    let status = session.wait_replay(SETTLE).unwrap();

    let fault = status.fault.expect("replay faulted");
    assert_eq!(fault.code, ErrorCode::InjectionRejected);
    let step = fault.step.expect("fault names the step");
    assert_eq!((step.position, step.kind.as_str()), (2, "Click"));
    assert_eq!(
        status.cursor,
        ReplayCursor {
            position: 2,
            mode: RunMode::Faulted
        }
    );
    assert_eq!(desktop.clicked_points().len(), 2);

    desktop.accept_injections();
    session.run().unwrap();
    let status = session.wait_replay(SETTLE).unwrap();
    assert_eq!(status.cursor.mode, RunMode::Completed);
    assert_eq!(desktop.clicked_points().len(), 5);
}

#[test]
fn edits_wait_until_stepping_ends() {
    let (desktop, _) = desktop();
    let mut session = recorded_session(&desktop);

    session.step().unwrap();
    let status = session.wait_replay(SETTLE).unwrap();
    assert_eq!(
        status.cursor,
        ReplayCursor {
            position: 1,
            mode: RunMode::Stepping
        }
    );
    let err = session.edit(|steps| steps.set_enabled(0, false)).unwrap_err();
    assert_eq!(err.code, ErrorCode::EditLocked);

    session.reset_step();
    let status = session.wait_replay(SETTLE).unwrap();
    assert_eq!(status.cursor, ReplayCursor::default());
    assert!(session.edit(|steps| steps.set_enabled(0, false)).is_ok());
}

#[test]
fn empty_project_loads_idle_at_the_start() {
    let (desktop, _) = desktop();
    let mut session = Session::new(desktop.clone(), config()).unwrap();
    let doc = r#"{"format": 1, "name": "git-repos", "target": null, "variables": [], "steps": []}"#;

    assert!(session.load_bytes(doc.as_bytes()).unwrap().is_none());
    let status = session.wait_replay(SETTLE).unwrap();
    assert_eq!(status.cursor, ReplayCursor::default());
    assert_eq!(status.cursor.mode, RunMode::Idle);
    assert_eq!(session.mode(), SessionMode::Idle);
    assert!(session.snapshot().steps.is_empty());
    assert!(desktop.injected().is_empty());
}

#[test]
fn lost_target_can_be_repicked_mid_recording() {
    let (desktop, handle) = desktop();
    let mut session = Session::new(desktop.clone(), config()).unwrap();
    session
        .pick_target(Box::new(ScriptedSource::new([down(300, 250)])), Some(SETTLE))
        .unwrap();

    let source = ScriptedSource::new([down(200, 175), up(200, 175)]);
    let script = source.handle();
    session.start_recording(Box::new(source)).unwrap();
    wait_for(|| session.recording_status().is_some_and(|s| s.events_seen >= 2));

    desktop.close_window(handle);
    script.push(down(200, 175));
    wait_for(|| session.recording_status().is_some_and(|s| s.state == RecordingState::Lost));
    let notice = session.recording_status().and_then(|s| s.notice);
    assert_eq!(notice.map(|e| e.code), Some(ErrorCode::TargetLost));

    desktop.open_window("Order Entry", "FormWnd", "orders.exe", 9, Rect::new(600, 100, 200, 200));
    session.repick().unwrap();
    wait_for(|| session.recording_status().is_some_and(|s| s.state == RecordingState::Repicking));
    script.push(down(700, 200));
    wait_for(|| session.recording_status().is_some_and(|s| s.state == RecordingState::Armed));

    script.push(down(650, 150));
    script.push(up(650, 150));
    session.stop_recording().unwrap();

    let points: Vec<_> = session.snapshot().steps.iter().filter_map(|s| s.action.point()).collect();
    assert_eq!(points, vec![NormPoint::new(0.25, 0.25), NormPoint::new(0.25, 0.25)]);
}

#[test]
fn stored_projects_reopen_on_the_same_window() {
    let dir = tempfile::tempdir().unwrap();
    let store = ProjectStore::with_dir(dir.path()).unwrap();
    let (desktop, handle) = desktop();

    let mut recorded = recorded_session(&desktop);
    recorded
        .edit(|steps| steps.set_label(0, "Open the order"))
        .unwrap();
    let saved = recorded.snapshot();
    let path = store.save(&saved).unwrap();
    assert_eq!(store.list().unwrap(), vec!["untitled.json".to_string()]);
    drop(recorded);

    let mut session = Session::new(desktop.clone(), config()).unwrap();
    let window = session.load_file(&path).unwrap().expect("target found by descriptor");
    assert_eq!(window.handle, handle);

    let loaded = session.snapshot();
    assert_eq!(loaded.steps, saved.steps);
    assert_eq!(loaded.steps.get(0).map(|s| s.label.as_str()), Some("Open the order"));

    store.delete("untitled.json").unwrap();
    assert!(store.list().unwrap().is_empty());
}
