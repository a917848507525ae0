//! In-memory desktop
//!
//! Deterministic stand-in for the native platform: windows are plain
//! rectangles in a z-ordered list, injected input is recorded instead of sent.
//! Used by the test suites and by headless hosts that want to dry-run a
//! project.

use parking_lot::Mutex;

use crate::geometry::{Point, Rect};
use crate::input::{KeyChord, MouseButton};
use crate::platform::{ClipboardAccess, InputInjector, WindowSystem};
use crate::window::{TargetWindow, WindowHandle};
use crate::{Error, ErrorCode, Result};

/// Non-client frame added around every simulated client area
pub const FRAME: i32 = 8;
pub const CAPTION: i32 = 31;

/// One recorded injection
#[derive(Debug, Clone, PartialEq)]
pub enum Injected {
    Click {
        at: Point,
        button: MouseButton,
        count: u8,
    },
    Press(KeyChord),
    Text(String),
}

#[derive(Debug, Clone)]
struct SimWindow {
    info: TargetWindow,
    client: Rect,
}

impl SimWindow {
    fn snapshot(&self) -> TargetWindow {
        TargetWindow {
            window_rect: frame_around(&self.client),
            client_rect: (!self.client.is_empty()).then_some(self.client),
            ..self.info.clone()
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    /// Front-most last
    windows: Vec<SimWindow>,
    next_handle: isize,
    foreground: Option<WindowHandle>,
    clipboard: Option<String>,
    injected: Vec<Injected>,
    focus_requests: Vec<WindowHandle>,
    /// Number of injections that still succeed before the desktop starts
    /// rejecting input
    accept_budget: Option<usize>,
    refuse_focus: bool,
    clipboard_broken: bool,
    /// Windowless processes; window owners count as running too
    processes: Vec<String>,
}

/// Desktop double. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct VirtualDesktop {
    pid: u32,
    state: Mutex<SimState>,
}

impl VirtualDesktop {
    pub fn new(own_pid: u32) -> Self {
        Self {
            pid: own_pid,
            state: Mutex::new(SimState {
                next_handle: 0x100,
                ..Default::default()
            }),
        }
    }

    /// Open a window on top of the stack and focus it
    pub fn open_window(&self, title: &str, class_name: &str, process_name: &str, pid: u32, client: Rect) -> WindowHandle {
        let mut s = self.state.lock();
        let handle = WindowHandle(s.next_handle);
        s.next_handle += 0x10;
        s.windows.push(SimWindow {
            info: TargetWindow {
                handle,
                pid,
                title: title.to_string(),
                class_name: class_name.to_string(),
                process_name: process_name.to_string(),
                window_rect: frame_around(&client),
                client_rect: Some(client),
            },
            client,
        });
        s.foreground = Some(handle);
        handle
    }

    /// Move the client area's origin to `(x, y)`
    pub fn move_window(&self, handle: WindowHandle, x: i32, y: i32) {
        self.with_window(handle, |w| {
            w.client.x = x;
            w.client.y = y;
        });
    }

    pub fn resize_window(&self, handle: WindowHandle, width: i32, height: i32) {
        self.with_window(handle, |w| {
            w.client.width = width;
            w.client.height = height;
        });
    }

    pub fn set_title(&self, handle: WindowHandle, title: &str) {
        self.with_window(handle, |w| w.info.title = title.to_string());
    }

    pub fn close_window(&self, handle: WindowHandle) {
        let mut s = self.state.lock();
        s.windows.retain(|w| w.info.handle != handle);
        if s.foreground == Some(handle) {
            s.foreground = s.windows.last().map(|w| w.info.handle);
        }
    }

    /// Give input focus without changing the z-order
    pub fn set_foreground(&self, handle: Option<WindowHandle>) {
        self.state.lock().foreground = handle;
    }

    pub fn set_clipboard(&self, text: &str) {
        self.state.lock().clipboard = Some(text.to_string());
    }

    /// Make clipboard reads fail, as when another process holds it open
    pub fn break_clipboard(&self, broken: bool) {
        self.state.lock().clipboard_broken = broken;
    }

    /// Start a process that owns no window
    pub fn start_process(&self, exe: &str) {
        self.state.lock().processes.push(exe.to_string());
    }

    pub fn stop_process(&self, exe: &str) {
        self.state.lock().processes.retain(|p| !p.eq_ignore_ascii_case(exe));
    }

    /// Let the next `n` injections through, then reject everything
    pub fn reject_injections_after(&self, n: usize) {
        self.state.lock().accept_budget = Some(n);
    }

    pub fn accept_injections(&self) {
        self.state.lock().accept_budget = None;
    }

    /// Make `focus` fail like a foreground lock would
    pub fn refuse_focus(&self, refuse: bool) {
        self.state.lock().refuse_focus = refuse;
    }

    pub fn injected(&self) -> Vec<Injected> {
        self.state.lock().injected.clone()
    }

    /// Screen points of every injected click, in order
    pub fn clicked_points(&self) -> Vec<Point> {
        self.state
            .lock()
            .injected
            .iter()
            .filter_map(|i| match i {
                Injected::Click { at, .. } => Some(*at),
                _ => None,
            })
            .collect()
    }

    pub fn clear_injected(&self) {
        self.state.lock().injected.clear();
    }

    pub fn focus_requests(&self) -> Vec<WindowHandle> {
        self.state.lock().focus_requests.clone()
    }

    fn with_window(&self, handle: WindowHandle, f: impl FnOnce(&mut SimWindow)) {
        let mut s = self.state.lock();
        if let Some(w) = s.windows.iter_mut().find(|w| w.info.handle == handle) {
            f(w);
        }
    }

    fn inject(&self, what: Injected) -> Result<()> {
        let mut s = self.state.lock();
        if let Some(budget) = s.accept_budget.as_mut() {
            if *budget == 0 {
                return Err(Error::injection_rejected(
                    "Synthetic input",
                    "the virtual desktop is rejecting input",
                ));
            }
            *budget -= 1;
        }
        s.injected.push(what);
        Ok(())
    }
}

impl WindowSystem for VirtualDesktop {
    fn window_at(&self, at: Point) -> Option<TargetWindow> {
        let s = self.state.lock();
        s.windows
            .iter()
            .rev()
            .find(|w| frame_around(&w.client).contains(at))
            .map(SimWindow::snapshot)
    }

    fn window_info(&self, handle: WindowHandle) -> Option<TargetWindow> {
        let s = self.state.lock();
        s.windows
            .iter()
            .find(|w| w.info.handle == handle)
            .map(SimWindow::snapshot)
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        self.state.lock().windows.iter().any(|w| w.info.handle == handle)
    }

    fn client_rect(&self, handle: WindowHandle) -> Option<Rect> {
        self.window_info(handle).and_then(|w| w.client_rect)
    }

    fn foreground_window(&self) -> Option<WindowHandle> {
        self.state.lock().foreground
    }

    fn windows(&self) -> Vec<TargetWindow> {
        let s = self.state.lock();
        s.windows.iter().rev().map(SimWindow::snapshot).collect()
    }

    fn focus(&self, handle: WindowHandle) -> Result<()> {
        let mut s = self.state.lock();
        let pos = s
            .windows
            .iter()
            .position(|w| w.info.handle == handle)
            .ok_or_else(|| Error::window_gone(handle))?;
        s.focus_requests.push(handle);
        if s.refuse_focus {
            return Err(Error::injection_rejected("Focus", "foreground change refused"));
        }
        let w = s.windows.remove(pos);
        s.windows.push(w);
        s.foreground = Some(handle);
        Ok(())
    }

    fn current_process_id(&self) -> u32 {
        self.pid
    }

    fn process_running(&self, exe: &str) -> bool {
        let s = self.state.lock();
        s.processes.iter().any(|p| p.eq_ignore_ascii_case(exe))
            || s.windows.iter().any(|w| w.info.process_name.eq_ignore_ascii_case(exe))
    }
}

impl InputInjector for VirtualDesktop {
    fn click(&self, at: Point, button: MouseButton, count: u8) -> Result<()> {
        self.inject(Injected::Click { at, button, count })
    }

    fn press(&self, chord: &KeyChord) -> Result<()> {
        self.inject(Injected::Press(*chord))
    }

    fn type_text(&self, text: &str) -> Result<()> {
        self.inject(Injected::Text(text.to_string()))
    }
}

impl ClipboardAccess for VirtualDesktop {
    fn read_text(&self) -> Result<Option<String>> {
        let s = self.state.lock();
        if s.clipboard_broken {
            return Err(Error::new(ErrorCode::Io, "Clipboard unavailable: held by another process"));
        }
        Ok(s.clipboard.clone())
    }
}

fn frame_around(client: &Rect) -> Rect {
    Rect::new(
        client.x - FRAME,
        client.y - CAPTION,
        client.width + 2 * FRAME,
        client.height + CAPTION + FRAME,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topmost_window_wins_hit_test() {
        let desk = VirtualDesktop::new(1);
        let back = desk.open_window("Back", "C", "back.exe", 10, Rect::new(0, 0, 500, 500));
        let front = desk.open_window("Front", "C", "front.exe", 11, Rect::new(100, 100, 100, 100));

        assert_eq!(desk.window_at(Point::new(150, 150)).unwrap().handle, front);
        assert_eq!(desk.window_at(Point::new(400, 400)).unwrap().handle, back);

        desk.focus(back).unwrap();
        assert_eq!(desk.window_at(Point::new(150, 150)).unwrap().handle, back);
    }

    #[test]
    fn rejection_budget_counts_down() {
        let desk = VirtualDesktop::new(1);
        desk.reject_injections_after(1);
        assert!(desk.type_text("a").is_ok());
        let err = desk.type_text("b").unwrap_err();
        assert_eq!(err.code, ErrorCode::InjectionRejected);
        assert_eq!(desk.injected(), vec![Injected::Text("a".into())]);
    }

    #[test]
    fn processes_run_with_or_without_windows() {
        let desk = VirtualDesktop::new(1);
        let h = desk.open_window("Logon", "C", "SapLogon.exe", 10, Rect::new(0, 0, 10, 10));
        desk.start_process("agent.exe");

        assert!(desk.process_running("saplogon.exe"));
        assert!(desk.process_running("AGENT.EXE"));
        desk.close_window(h);
        desk.stop_process("agent.exe");
        assert!(!desk.process_running("saplogon.exe"));
        assert!(!desk.process_running("agent.exe"));
    }

    #[test]
    fn broken_clipboard_reports_an_error() {
        let desk = VirtualDesktop::new(1);
        assert_eq!(desk.read_text().unwrap(), None);
        desk.set_clipboard("42");
        desk.break_clipboard(true);
        assert_eq!(desk.read_text().unwrap_err().code, ErrorCode::Io);
        desk.break_clipboard(false);
        assert_eq!(desk.read_text().unwrap(), Some("42".into()));
    }

    #[test]
    fn closed_window_is_gone() {
        let desk = VirtualDesktop::new(1);
        let h = desk.open_window("Doc", "C", "app.exe", 10, Rect::new(0, 0, 10, 10));
        desk.close_window(h);
        assert!(!desk.is_window(h));
        assert!(desk.client_rect(h).is_none());
        assert_eq!(desk.foreground_window(), None);
    }
}
