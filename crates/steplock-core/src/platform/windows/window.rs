//! Win32 window queries

use std::ffi::c_void;

use windows::Win32::Foundation::{CloseHandle, BOOL, HWND, LPARAM, POINT, RECT};
use windows::Win32::Graphics::Gdi::ClientToScreen;
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetAncestor, GetClassNameW, GetClientRect, GetForegroundWindow,
    GetWindowRect, GetWindowTextW, GetWindowThreadProcessId, IsIconic, IsWindow,
    IsWindowVisible, SetForegroundWindow, ShowWindow, WindowFromPoint, GA_ROOT, SW_RESTORE,
};

use crate::geometry::{Point, Rect};
use crate::window::{TargetWindow, WindowHandle};
use crate::{Error, ErrorCode, Result};

pub(super) fn hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.0 as *mut c_void)
}

pub(super) fn handle(hwnd: HWND) -> WindowHandle {
    WindowHandle(hwnd.0 as isize)
}

pub fn root_window_at(at: Point) -> Option<WindowHandle> {
    unsafe {
        let hit = WindowFromPoint(POINT { x: at.x, y: at.y });
        if hit.0.is_null() {
            return None;
        }
        let root = GetAncestor(hit, GA_ROOT);
        let root = if root.0.is_null() { hit } else { root };
        Some(handle(root))
    }
}

pub fn is_window(h: WindowHandle) -> bool {
    unsafe { IsWindow(hwnd(h)).as_bool() }
}

/// Client area in screen coordinates. Zero-sized client areas (minimized
/// windows) come back as `None`.
pub fn client_rect(h: WindowHandle) -> Option<Rect> {
    unsafe {
        let hwnd = hwnd(h);
        let mut rc = RECT::default();
        GetClientRect(hwnd, &mut rc).ok()?;
        let mut origin = POINT { x: 0, y: 0 };
        if !ClientToScreen(hwnd, &mut origin).as_bool() {
            return None;
        }
        let rect = Rect::new(origin.x, origin.y, rc.right - rc.left, rc.bottom - rc.top);
        (!rect.is_empty()).then_some(rect)
    }
}

pub fn window_rect(h: WindowHandle) -> Option<Rect> {
    unsafe {
        let mut rc = RECT::default();
        GetWindowRect(hwnd(h), &mut rc).ok()?;
        Some(Rect::from_edges(rc.left, rc.top, rc.right, rc.bottom))
    }
}

pub fn window_text(h: WindowHandle) -> String {
    let mut buffer = [0u16; 512];
    let len = unsafe { GetWindowTextW(hwnd(h), &mut buffer) };
    String::from_utf16_lossy(&buffer[..len.max(0) as usize])
}

pub fn class_name(h: WindowHandle) -> String {
    let mut buffer = [0u16; 256];
    let len = unsafe { GetClassNameW(hwnd(h), &mut buffer) };
    String::from_utf16_lossy(&buffer[..len.max(0) as usize])
}

pub fn window_pid(h: WindowHandle) -> u32 {
    let mut pid: u32 = 0;
    unsafe {
        GetWindowThreadProcessId(hwnd(h), Some(&mut pid));
    }
    pid
}

pub fn foreground_window() -> Option<WindowHandle> {
    let fg = unsafe { GetForegroundWindow() };
    if fg.0.is_null() {
        None
    } else {
        Some(handle(fg))
    }
}

pub fn describe(h: WindowHandle) -> Option<TargetWindow> {
    if !is_window(h) {
        return None;
    }
    let pid = window_pid(h);
    Some(TargetWindow {
        handle: h,
        pid,
        title: window_text(h),
        class_name: class_name(h),
        process_name: process_name(pid).unwrap_or_default(),
        window_rect: window_rect(h)?,
        client_rect: client_rect(h),
    })
}

/// Visible top-level windows in z-order, front first
pub fn top_level_windows() -> Vec<WindowHandle> {
    unsafe extern "system" fn collect(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let found = &mut *(lparam.0 as *mut Vec<HWND>);
        if IsWindowVisible(hwnd).as_bool() {
            found.push(hwnd);
        }
        BOOL(1)
    }

    let mut found: Vec<HWND> = Vec::new();
    unsafe {
        let _ = EnumWindows(Some(collect), LPARAM(&mut found as *mut Vec<HWND> as isize));
    }
    found.into_iter().map(handle).collect()
}

pub fn focus(h: WindowHandle) -> Result<()> {
    unsafe {
        let hwnd = hwnd(h);
        if !IsWindow(hwnd).as_bool() {
            return Err(Error::window_gone(h));
        }
        if IsIconic(hwnd).as_bool() {
            let _ = ShowWindow(hwnd, SW_RESTORE);
        }
        if !SetForegroundWindow(hwnd).as_bool() {
            return Err(Error::new(
                ErrorCode::InjectionRejected,
                format!("Windows refused to bring {} to the front", h),
            ));
        }
    }
    Ok(())
}

/// Executable name for a process id
pub fn process_name(pid: u32) -> Option<String> {
    find_process(|id, _| id == pid)
}

/// Whether any process runs the named executable, ignoring case
pub fn process_running(exe: &str) -> bool {
    find_process(|_, name| name.eq_ignore_ascii_case(exe)).is_some()
}

/// Walk the process snapshot, returning the first matching executable name
fn find_process(mut matches: impl FnMut(u32, &str) -> bool) -> Option<String> {
    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0).ok()?;

        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };

        let mut found = None;
        if Process32FirstW(snapshot, &mut entry).is_ok() {
            loop {
                let end = entry
                    .szExeFile
                    .iter()
                    .position(|&c| c == 0)
                    .unwrap_or(entry.szExeFile.len());
                let name = String::from_utf16_lossy(&entry.szExeFile[..end]);
                if matches(entry.th32ProcessID, &name) {
                    found = Some(name);
                    break;
                }
                if Process32NextW(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }
        let _ = CloseHandle(snapshot);
        found
    }
}
