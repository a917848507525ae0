//! Window resolver
//!
//! Turns a pick gesture or a saved descriptor into a live window.

use tracing::{debug, info};

use crate::geometry::{Point, Rect};
use crate::input::RawEvent;
use crate::platform::WindowSystem;
use crate::window::{TargetDescriptor, TargetWindow, WindowHandle};
use crate::{Error, ErrorCode, Result};

pub struct WindowResolver<'a> {
    windows: &'a dyn WindowSystem,
}

impl<'a> WindowResolver<'a> {
    pub fn new(windows: &'a dyn WindowSystem) -> Self {
        Self { windows }
    }

    /// Resolve the top-level window under a screen point, refusing our own.
    pub fn resolve_point(&self, at: Point) -> Result<TargetWindow> {
        let window = self
            .windows
            .window_at(at)
            .ok_or_else(|| Error::no_window_under_cursor(at.x, at.y))?;
        if window.pid == self.windows.current_process_id() {
            return Err(Error::self_targeted(window.display_name()));
        }
        Ok(window)
    }

    /// Wait for the next pointer-down in `events` and resolve the window under
    /// it. Clicks on nothing or on our own UI are reported through `on_retry`
    /// and the pick keeps listening. Running out of events cancels the pick.
    pub fn pick<I>(&self, events: I, mut on_retry: impl FnMut(&Error)) -> Result<TargetWindow>
    where
        I: IntoIterator<Item = RawEvent>,
    {
        for event in events {
            let RawEvent::PointerDown { at, .. } = event else {
                continue;
            };
            match self.resolve_point(at) {
                Ok(window) => {
                    info!(title = %window.title, process = %window.process_name, "picked target");
                    return Ok(window);
                }
                Err(e) if matches!(e.code, ErrorCode::SelfTargeted | ErrorCode::NoWindowUnderCursor) => {
                    debug!(error = %e, "pick ignored, still waiting");
                    on_retry(&e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::new(ErrorCode::Cancelled, "Pick ended before a window was chosen"))
    }

    /// Best-effort re-acquisition after a reload: exact title first, then
    /// class name plus process name. Our own windows never match.
    pub fn resolve_by_descriptor(&self, descriptor: &TargetDescriptor) -> Result<TargetWindow> {
        let own = self.windows.current_process_id();
        let candidates: Vec<TargetWindow> = self
            .windows
            .windows()
            .into_iter()
            .filter(|w| w.pid != own)
            .collect();

        let same_process =
            |w: &TargetWindow| descriptor.process_name.is_empty() || w.process_name.eq_ignore_ascii_case(&descriptor.process_name);

        if !descriptor.title.is_empty() {
            let titled = || candidates.iter().filter(|w| w.title == descriptor.title);
            if let Some(w) = titled().find(|w| same_process(w)).or_else(|| titled().next()) {
                debug!(handle = %w.handle, "re-acquired target by title");
                return Ok(w.clone());
            }
        }

        if !descriptor.class_name.is_empty() && !descriptor.process_name.is_empty() {
            if let Some(w) = candidates
                .iter()
                .find(|w| w.class_name == descriptor.class_name && same_process(w))
            {
                debug!(handle = %w.handle, title = %w.title, "re-acquired target by class and process");
                return Ok(w.clone());
            }
        }

        Err(Error::target_not_found(&descriptor.to_string()))
    }

    /// Live client rect, or `WindowGone` for a stale handle
    pub fn current_rect(&self, handle: WindowHandle) -> Result<Rect> {
        if !self.windows.is_window(handle) {
            return Err(Error::window_gone(handle));
        }
        self.windows.client_rect(handle).ok_or_else(|| {
            Error::new(
                ErrorCode::WindowGone,
                format!("Window {} has no client area (minimized?)", handle),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::MouseButton;
    use crate::sim::VirtualDesktop;

    const OWN_PID: u32 = 9;

    fn click(x: i32, y: i32) -> RawEvent {
        RawEvent::PointerDown {
            at: Point::new(x, y),
            button: MouseButton::Left,
        }
    }

    #[test]
    fn pick_skips_own_ui_and_empty_desktop() {
        let desk = VirtualDesktop::new(OWN_PID);
        let target = desk.open_window("Invoice - Editor", "EditorMain", "editor.exe", 300, Rect::new(100, 100, 400, 300));
        desk.open_window("steplock", "Panel", "steplock.exe", OWN_PID, Rect::new(1000, 0, 200, 200));

        let events = vec![
            RawEvent::PointerMove { at: Point::new(5, 5) },
            click(1100, 100),
            click(3000, 3000),
            click(200, 200),
        ];
        let mut retries = Vec::new();
        let picked = WindowResolver::new(&desk)
            .pick(events, |e| retries.push(e.code))
            .unwrap();

        assert_eq!(picked.handle, target);
        assert_eq!(retries, vec![ErrorCode::SelfTargeted, ErrorCode::NoWindowUnderCursor]);
    }

    #[test]
    fn pick_without_a_click_is_cancelled() {
        let desk = VirtualDesktop::new(OWN_PID);
        let err = WindowResolver::new(&desk).pick(Vec::new(), |_| {}).unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
    }

    #[test]
    fn descriptor_prefers_exact_title_then_class_and_process() {
        let desk = VirtualDesktop::new(OWN_PID);
        desk.open_window("Other", "EditorMain", "editor.exe", 301, Rect::new(0, 0, 10, 10));
        let exact = desk.open_window("Report.txt", "EditorMain", "editor.exe", 302, Rect::new(0, 0, 10, 10));
        let resolver = WindowResolver::new(&desk);

        let mut d = TargetDescriptor {
            title: "Report.txt".into(),
            class_name: "EditorMain".into(),
            process_name: "EDITOR.EXE".into(),
        };
        assert_eq!(resolver.resolve_by_descriptor(&d).unwrap().handle, exact);

        // Title changed after reload, fall back to class + process
        d.title = "Report.txt (modified)".into();
        assert_eq!(resolver.resolve_by_descriptor(&d).unwrap().class_name, "EditorMain");

        d.process_name = "viewer.exe".into();
        let err = resolver.resolve_by_descriptor(&d).unwrap_err();
        assert_eq!(err.code, ErrorCode::TargetNotFound);
    }

    #[test]
    fn descriptor_never_matches_own_windows() {
        let desk = VirtualDesktop::new(OWN_PID);
        desk.open_window("steplock", "Panel", "steplock.exe", OWN_PID, Rect::new(0, 0, 10, 10));
        let d = TargetDescriptor {
            title: "steplock".into(),
            ..Default::default()
        };
        assert!(WindowResolver::new(&desk).resolve_by_descriptor(&d).is_err());
    }

    #[test]
    fn current_rect_reports_gone_handles() {
        let desk = VirtualDesktop::new(OWN_PID);
        let h = desk.open_window("A", "B", "c.exe", 1, Rect::new(5, 5, 50, 50));
        let resolver = WindowResolver::new(&desk);
        assert_eq!(resolver.current_rect(h).unwrap(), Rect::new(5, 5, 50, 50));
        desk.close_window(h);
        assert_eq!(resolver.current_rect(h).unwrap_err().code, ErrorCode::WindowGone);
    }
}
