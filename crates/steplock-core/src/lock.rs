//! Target lock
//!
//! Decides, event by event, whether input belongs to the locked window. The
//! client rect is fetched fresh for every pointer event because the user is
//! free to drag the window around mid-recording.

use tracing::{debug, warn};

use crate::geometry::Rect;
use crate::input::RawEvent;
use crate::platform::WindowSystem;
use crate::window::TargetWindow;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum LockState {
    #[default]
    Unlocked,
    Locked(TargetWindow),
    /// The window was destroyed while locked. Keeps the last snapshot so the
    /// host can tell the user what went away.
    Lost(TargetWindow),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Unlocked,
    OutsideClient,
    NotFocused,
    /// Pointer landed on one of our own windows overlapping the target
    OwnWindow,
    /// Target has no client area right now (minimized)
    NoClientArea,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// `client` is the live client rect the event was checked against
    Accept { client: Option<Rect> },
    Reject(RejectReason),
    /// The lock just transitioned to (or already was) `Lost`
    Lost,
}

impl Verdict {
    pub fn accepted(&self) -> bool {
        matches!(self, Verdict::Accept { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TargetLock {
    state: LockState,
}

impl TargetLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engage(&mut self, window: TargetWindow) {
        debug!(handle = %window.handle, title = %window.title, "target locked");
        self.state = LockState::Locked(window);
    }

    pub fn disengage(&mut self) {
        self.state = LockState::Unlocked;
    }

    pub fn state(&self) -> &LockState {
        &self.state
    }

    /// Window currently or most recently locked
    pub fn target(&self) -> Option<&TargetWindow> {
        match &self.state {
            LockState::Locked(w) | LockState::Lost(w) => Some(w),
            LockState::Unlocked => None,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, LockState::Locked(_))
    }

    pub fn is_lost(&self) -> bool {
        matches!(self.state, LockState::Lost(_))
    }

    /// Re-check the handle. Moves `Locked` to `Lost` when the window is gone.
    pub fn revalidate(&mut self, windows: &dyn WindowSystem) -> bool {
        let gone = match &self.state {
            LockState::Locked(w) => !windows.is_window(w.handle),
            LockState::Lost(_) => return false,
            LockState::Unlocked => return false,
        };
        if gone {
            if let LockState::Locked(w) = std::mem::take(&mut self.state) {
                warn!(title = %w.title, "target window was destroyed");
                self.state = LockState::Lost(w);
            }
            return false;
        }
        true
    }

    pub fn should_capture(&mut self, event: &RawEvent, windows: &dyn WindowSystem) -> bool {
        self.evaluate(event, windows).accepted()
    }

    pub fn evaluate(&mut self, event: &RawEvent, windows: &dyn WindowSystem) -> Verdict {
        match self.state {
            LockState::Unlocked => return Verdict::Reject(RejectReason::Unlocked),
            LockState::Lost(_) => return Verdict::Lost,
            LockState::Locked(_) => {}
        }
        if !self.revalidate(windows) {
            return Verdict::Lost;
        }
        let Some(target) = self.target() else {
            return Verdict::Reject(RejectReason::Unlocked);
        };
        let handle = target.handle;
        let client = windows.client_rect(handle);

        match event.position() {
            Some(at) => {
                let Some(rect) = client else {
                    return Verdict::Reject(RejectReason::NoClientArea);
                };
                if !rect.contains(at) {
                    return Verdict::Reject(RejectReason::OutsideClient);
                }
                // Our own floating panel may sit on top of the target
                if let Some(hit) = windows.window_at(at) {
                    if hit.handle != handle && hit.pid == windows.current_process_id() {
                        return Verdict::Reject(RejectReason::OwnWindow);
                    }
                }
                Verdict::Accept { client: Some(rect) }
            }
            None => {
                if windows.foreground_window() != Some(handle) {
                    return Verdict::Reject(RejectReason::NotFocused);
                }
                Verdict::Accept { client }
            }
        }
    }
}
