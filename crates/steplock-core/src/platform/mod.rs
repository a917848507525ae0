//! Platform abstraction layer
//!
//! The engine only talks to the desktop through these traits. The native
//! implementation lives in `windows`; everything else reports
//! `PlatformUnavailable`. Tests use [`crate::sim::VirtualDesktop`].

use std::sync::Arc;

use crate::geometry::{Point, Rect};
use crate::input::{KeyChord, MouseButton};
use crate::window::{TargetWindow, WindowHandle};
use crate::Result;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(not(target_os = "windows"))]
pub mod unsupported;

// Re-export the current platform
#[cfg(target_os = "windows")]
pub use self::windows as current;

#[cfg(not(target_os = "windows"))]
pub use unsupported as current;

/// Window queries
pub trait WindowSystem: Send + Sync {
    /// Top-level window under a screen point
    fn window_at(&self, at: Point) -> Option<TargetWindow>;

    /// Fresh snapshot of a window, `None` if the handle is stale
    fn window_info(&self, handle: WindowHandle) -> Option<TargetWindow>;

    fn is_window(&self, handle: WindowHandle) -> bool;

    /// Live client rect in screen coordinates
    fn client_rect(&self, handle: WindowHandle) -> Option<Rect>;

    fn foreground_window(&self) -> Option<WindowHandle>;

    /// Visible top-level windows, front to back
    fn windows(&self) -> Vec<TargetWindow>;

    /// Restore and bring a window to the front
    fn focus(&self, handle: WindowHandle) -> Result<()>;

    fn current_process_id(&self) -> u32;

    /// Whether a process with this executable name is running, ignoring case
    fn process_running(&self, exe: &str) -> bool;
}

/// Synthetic input
pub trait InputInjector: Send + Sync {
    /// Move to `at` and click `count` times
    fn click(&self, at: Point, button: MouseButton, count: u8) -> Result<()>;

    /// Press and release a chord, modifiers first
    fn press(&self, chord: &KeyChord) -> Result<()>;

    /// Type text as unicode input, independent of keyboard layout
    fn type_text(&self, text: &str) -> Result<()>;
}

pub trait ClipboardAccess: Send + Sync {
    /// Text on the clipboard, `None` when it holds no text
    fn read_text(&self) -> Result<Option<String>>;
}

/// Everything the engine needs from a desktop
pub trait Desktop: WindowSystem + InputInjector + ClipboardAccess {
    fn window_system(&self) -> &dyn WindowSystem;
}

impl<T: WindowSystem + InputInjector + ClipboardAccess> Desktop for T {
    fn window_system(&self) -> &dyn WindowSystem {
        self
    }
}

/// The native desktop for this platform
pub fn native() -> Result<Arc<dyn Desktop>> {
    current::desktop()
}
