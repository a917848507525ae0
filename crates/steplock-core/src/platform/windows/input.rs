//! Windows input injection
//!
//! Uses SendInput for keyboard and mouse events.

use std::thread;
use std::time::Duration;

use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, VkKeyScanW, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT,
    KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP, KEYEVENTF_UNICODE, MOUSEINPUT, MOUSE_EVENT_FLAGS,
    MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP,
    MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, VIRTUAL_KEY,
};
use windows::Win32::UI::WindowsAndMessaging::SetCursorPos;

use crate::geometry::Point;
use crate::input::{Key, KeyChord, MouseButton};
use crate::{Error, Result};

const CLICK_GAP: Duration = Duration::from_millis(50);

pub fn click(at: Point, button: MouseButton, count: u8) -> Result<()> {
    unsafe {
        SetCursorPos(at.x, at.y)
            .map_err(|e| Error::injection_rejected("Cursor move", &format!("{:?}", e)))?;
    }
    thread::sleep(Duration::from_millis(10));

    let (down, up) = match button {
        MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
        MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
        MouseButton::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
    };
    for i in 0..count.max(1) {
        if i > 0 {
            thread::sleep(CLICK_GAP);
        }
        send_inputs("Click", &[make_mouse_input(down), make_mouse_input(up)])?;
    }
    Ok(())
}

pub fn press(chord: &KeyChord) -> Result<()> {
    let mods: Vec<u16> = chord
        .modifiers
        .keys()
        .iter()
        .filter_map(virtual_key)
        .collect();

    let mut inputs = Vec::new();
    for &m in &mods {
        inputs.push(make_key_input(m, false));
    }
    match virtual_key(&chord.key) {
        Some(vk) => {
            inputs.push(make_key_input(vk, false));
            inputs.push(make_key_input(vk, true));
        }
        // No key on the current layout produces it; type the character instead
        None => match chord.key {
            Key::Char(c) => push_unicode(&mut inputs, c),
            _ => {
                return Err(Error::injection_rejected(
                    "Key press",
                    &format!("no virtual key for {}", chord.key),
                ))
            }
        },
    }
    for &m in mods.iter().rev() {
        inputs.push(make_key_input(m, true));
    }

    send_inputs("Key press", &inputs)
}

pub fn type_text(text: &str) -> Result<()> {
    let mut inputs = Vec::new();
    for c in text.chars() {
        match c {
            '\n' => {
                inputs.push(make_key_input(vk::RETURN, false));
                inputs.push(make_key_input(vk::RETURN, true));
            }
            '\r' => {}
            _ => push_unicode(&mut inputs, c),
        }
    }
    if inputs.is_empty() {
        return Ok(());
    }
    send_inputs("Typing", &inputs)
}

fn virtual_key(key: &Key) -> Option<u16> {
    let code = match key {
        Key::Enter => vk::RETURN,
        Key::Tab => vk::TAB,
        Key::Escape => vk::ESCAPE,
        Key::Backspace => vk::BACKSPACE,
        Key::Delete => vk::DELETE,
        Key::Insert => vk::INSERT,
        Key::Space => vk::SPACE,
        Key::Home => vk::HOME,
        Key::End => vk::END,
        Key::PageUp => vk::PAGE_UP,
        Key::PageDown => vk::PAGE_DOWN,
        Key::Up => vk::UP,
        Key::Down => vk::DOWN,
        Key::Left => vk::LEFT,
        Key::Right => vk::RIGHT,
        Key::F(n) => vk::F1 + u16::from(n.saturating_sub(1)),
        Key::Shift => vk::SHIFT,
        Key::Control => vk::CONTROL,
        Key::Alt => vk::ALT,
        Key::Meta => vk::LWIN,
        Key::CapsLock => vk::CAPITAL,
        Key::Other(code) => u16::try_from(*code).ok()?,
        Key::Char(c) if c.is_ascii_alphanumeric() => c.to_ascii_uppercase() as u16,
        Key::Char(c) => {
            let mut units = [0u16; 2];
            if c.encode_utf16(&mut units).len() != 1 {
                return None;
            }
            let scan = unsafe { VkKeyScanW(units[0]) };
            if scan == -1 {
                return None;
            }
            (scan as u16) & 0xFF
        }
    };
    Some(code)
}

fn push_unicode(inputs: &mut Vec<INPUT>, c: char) {
    let mut units = [0u16; 2];
    for &unit in c.encode_utf16(&mut units).iter() {
        inputs.push(make_unicode_input(unit, false));
        inputs.push(make_unicode_input(unit, true));
    }
}

fn make_mouse_input(flags: MOUSE_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: 0,
                dy: 0,
                mouseData: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn make_key_input(vk: u16, key_up: bool) -> INPUT {
    let flags = if key_up {
        KEYEVENTF_KEYUP
    } else {
        KEYBD_EVENT_FLAGS(0)
    };

    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(vk),
                wScan: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn make_unicode_input(unit: u16, key_up: bool) -> INPUT {
    let mut flags = KEYEVENTF_UNICODE;
    if key_up {
        flags |= KEYEVENTF_KEYUP;
    }

    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(0),
                wScan: unit,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

/// SendInput reports how many events it inserted; anything short of all of
/// them means UIPI or a secure desktop blocked us.
fn send_inputs(action: &str, inputs: &[INPUT]) -> Result<()> {
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };

    if sent as usize != inputs.len() {
        return Err(Error::injection_rejected(
            action,
            &format!("SendInput sent {} of {} inputs", sent, inputs.len()),
        )
        .with_suggestions(vec![
            "The target may run elevated; run steplock with the same privileges".into(),
        ]));
    }

    Ok(())
}

mod vk {
    pub const BACKSPACE: u16 = 0x08;
    pub const TAB: u16 = 0x09;
    pub const RETURN: u16 = 0x0D;
    pub const SHIFT: u16 = 0x10;
    pub const CONTROL: u16 = 0x11;
    pub const ALT: u16 = 0x12;
    pub const CAPITAL: u16 = 0x14;
    pub const ESCAPE: u16 = 0x1B;
    pub const SPACE: u16 = 0x20;
    pub const PAGE_UP: u16 = 0x21;
    pub const PAGE_DOWN: u16 = 0x22;
    pub const END: u16 = 0x23;
    pub const HOME: u16 = 0x24;
    pub const LEFT: u16 = 0x25;
    pub const UP: u16 = 0x26;
    pub const RIGHT: u16 = 0x27;
    pub const DOWN: u16 = 0x28;
    pub const INSERT: u16 = 0x2D;
    pub const DELETE: u16 = 0x2E;
    pub const LWIN: u16 = 0x5B;
    pub const F1: u16 = 0x70;
}
