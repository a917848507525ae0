//! Windows desktop
//!
//! Window geometry through user32, synthetic input through SendInput and the
//! clipboard through arboard.

pub mod input;
pub mod window;

use std::sync::Arc;

use windows::Win32::System::Threading::GetCurrentProcessId;

use super::{ClipboardAccess, Desktop, InputInjector, WindowSystem};
use crate::geometry::{Point, Rect};
use crate::input::{KeyChord, MouseButton};
use crate::window::{TargetWindow, WindowHandle};
use crate::{Error, ErrorCode, Result};

pub fn desktop() -> Result<Arc<dyn Desktop>> {
    Ok(Arc::new(Win32Desktop::new()))
}

#[derive(Debug, Clone)]
pub struct Win32Desktop {
    pid: u32,
}

impl Win32Desktop {
    pub fn new() -> Self {
        Self {
            pid: unsafe { GetCurrentProcessId() },
        }
    }
}

impl Default for Win32Desktop {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowSystem for Win32Desktop {
    fn window_at(&self, at: Point) -> Option<TargetWindow> {
        window::root_window_at(at).and_then(window::describe)
    }

    fn window_info(&self, handle: WindowHandle) -> Option<TargetWindow> {
        window::describe(handle)
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        window::is_window(handle)
    }

    fn client_rect(&self, handle: WindowHandle) -> Option<Rect> {
        window::client_rect(handle)
    }

    fn foreground_window(&self) -> Option<WindowHandle> {
        window::foreground_window()
    }

    fn windows(&self) -> Vec<TargetWindow> {
        window::top_level_windows()
            .into_iter()
            .filter_map(window::describe)
            .collect()
    }

    fn focus(&self, handle: WindowHandle) -> Result<()> {
        window::focus(handle)
    }

    fn current_process_id(&self) -> u32 {
        self.pid
    }

    fn process_running(&self, exe: &str) -> bool {
        window::process_running(exe)
    }
}

impl InputInjector for Win32Desktop {
    fn click(&self, at: Point, button: MouseButton, count: u8) -> Result<()> {
        input::click(at, button, count)
    }

    fn press(&self, chord: &KeyChord) -> Result<()> {
        input::press(chord)
    }

    fn type_text(&self, text: &str) -> Result<()> {
        input::type_text(text)
    }
}

impl ClipboardAccess for Win32Desktop {
    fn read_text(&self) -> Result<Option<String>> {
        let mut clipboard = arboard::Clipboard::new().map_err(clipboard_error)?;
        match clipboard.get_text() {
            Ok(text) => Ok(Some(text)),
            // Empty, or holding an image
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(clipboard_error(e)),
        }
    }
}

fn clipboard_error(e: arboard::Error) -> Error {
    Error::new(ErrorCode::Io, format!("Clipboard unavailable: {}", e))
}
