//! Global hook capture
//!
//! `rdev::listen` can only be installed once per process and never returns,
//! so a single listener thread is started lazily and forwards into whichever
//! sink is currently attached.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

use rdev::{Button, EventType};
use steplock_core::{Key, MouseButton, Point, RawEvent, Result};

use crate::capture::{CaptureConfig, EventSink, InputSource};

static ACTIVE_SINK: Mutex<Option<EventSink>> = Mutex::new(None);
static LISTENER: OnceLock<()> = OnceLock::new();

fn ensure_listener() {
    LISTENER.get_or_init(|| {
        thread::Builder::new()
            .name("steplock-hooks".into())
            .spawn(|| {
                let mut last = Point::default();
                if let Err(e) = rdev::listen(move |event| {
                    if let Some(raw) = translate(&event, &mut last) {
                        if let Some(sink) = ACTIVE_SINK.lock().as_ref() {
                            sink.emit_stamped(event.time, raw);
                        }
                    }
                }) {
                    error!("global input hook failed: {:?}", e);
                }
            })
            .map(|_| ())
            .unwrap_or_else(|e| error!(error = %e, "failed to spawn hook thread"));
    });
}

/// Mouse and keyboard from rdev, clipboard from a poller
pub struct NativeSource {
    clipboard_poll: Duration,
    poller: Option<(Arc<AtomicBool>, thread::JoinHandle<()>)>,
}

impl NativeSource {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            clipboard_poll: Duration::from_millis(config.clipboard_poll_ms.max(10)),
            poller: None,
        }
    }
}

impl InputSource for NativeSource {
    fn start(&mut self, sink: EventSink) -> Result<()> {
        ensure_listener();
        *ACTIVE_SINK.lock() = Some(sink.clone());

        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let period = self.clipboard_poll;
        let handle = thread::Builder::new()
            .name("steplock-clipboard".into())
            .spawn(move || poll_clipboard(sink, flag, period))?;
        self.poller = Some((stop, handle));
        info!("native capture started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        ACTIVE_SINK.lock().take();
        if let Some((stop, handle)) = self.poller.take() {
            stop.store(true, Ordering::SeqCst);
            let _ = handle.join();
        }
        debug!("native capture stopped");
        Ok(())
    }
}

/// Emit clipboard text whenever it changes. Whatever was on the clipboard
/// before capture started is not an event.
fn poll_clipboard(sink: EventSink, stop: Arc<AtomicBool>, period: Duration) {
    let mut clipboard = match arboard::Clipboard::new() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "clipboard unavailable, copy steps will not be recorded");
            return;
        }
    };
    let mut last = clipboard.get_text().ok();
    while !stop.load(Ordering::SeqCst) {
        thread::sleep(period);
        let Ok(text) = clipboard.get_text() else {
            continue;
        };
        if last.as_deref() != Some(text.as_str()) {
            last = Some(text.clone());
            if !text.is_empty() {
                sink.emit(RawEvent::ClipboardChanged { text });
            }
        }
    }
}

fn translate(event: &rdev::Event, last: &mut Point) -> Option<RawEvent> {
    match event.event_type {
        EventType::MouseMove { x, y } => {
            *last = Point::new(x.round() as i32, y.round() as i32);
            Some(RawEvent::PointerMove { at: *last })
        }
        EventType::ButtonPress(button) => Some(RawEvent::PointerDown {
            at: *last,
            button: mouse_button(button)?,
        }),
        EventType::ButtonRelease(button) => Some(RawEvent::PointerUp {
            at: *last,
            button: mouse_button(button)?,
        }),
        EventType::KeyPress(key) => {
            let text = event
                .name
                .as_deref()
                .and_then(single_char)
                .filter(|c| !c.is_control());
            Some(RawEvent::KeyDown {
                key: map_key(key),
                text,
            })
        }
        EventType::KeyRelease(key) => Some(RawEvent::KeyUp { key: map_key(key) }),
        EventType::Wheel { .. } => None,
    }
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

fn mouse_button(button: Button) -> Option<MouseButton> {
    match button {
        Button::Left => Some(MouseButton::Left),
        Button::Right => Some(MouseButton::Right),
        Button::Middle => Some(MouseButton::Middle),
        Button::Unknown(_) => None,
    }
}

fn map_key(key: rdev::Key) -> Key {
    use rdev::Key as K;
    match key {
        K::Return | K::KpReturn => Key::Enter,
        K::Tab => Key::Tab,
        K::Escape => Key::Escape,
        K::Backspace => Key::Backspace,
        K::Delete | K::KpDelete => Key::Delete,
        K::Insert => Key::Insert,
        K::Space => Key::Space,
        K::Home => Key::Home,
        K::End => Key::End,
        K::PageUp => Key::PageUp,
        K::PageDown => Key::PageDown,
        K::UpArrow => Key::Up,
        K::DownArrow => Key::Down,
        K::LeftArrow => Key::Left,
        K::RightArrow => Key::Right,
        K::ShiftLeft | K::ShiftRight => Key::Shift,
        K::ControlLeft | K::ControlRight => Key::Control,
        K::Alt | K::AltGr => Key::Alt,
        K::MetaLeft | K::MetaRight => Key::Meta,
        K::CapsLock => Key::CapsLock,
        K::F1 => Key::F(1),
        K::F2 => Key::F(2),
        K::F3 => Key::F(3),
        K::F4 => Key::F(4),
        K::F5 => Key::F(5),
        K::F6 => Key::F(6),
        K::F7 => Key::F(7),
        K::F8 => Key::F(8),
        K::F9 => Key::F(9),
        K::F10 => Key::F(10),
        K::F11 => Key::F(11),
        K::F12 => Key::F(12),
        K::KeyA => Key::Char('A'),
        K::KeyB => Key::Char('B'),
        K::KeyC => Key::Char('C'),
        K::KeyD => Key::Char('D'),
        K::KeyE => Key::Char('E'),
        K::KeyF => Key::Char('F'),
        K::KeyG => Key::Char('G'),
        K::KeyH => Key::Char('H'),
        K::KeyI => Key::Char('I'),
        K::KeyJ => Key::Char('J'),
        K::KeyK => Key::Char('K'),
        K::KeyL => Key::Char('L'),
        K::KeyM => Key::Char('M'),
        K::KeyN => Key::Char('N'),
        K::KeyO => Key::Char('O'),
        K::KeyP => Key::Char('P'),
        K::KeyQ => Key::Char('Q'),
        K::KeyR => Key::Char('R'),
        K::KeyS => Key::Char('S'),
        K::KeyT => Key::Char('T'),
        K::KeyU => Key::Char('U'),
        K::KeyV => Key::Char('V'),
        K::KeyW => Key::Char('W'),
        K::KeyX => Key::Char('X'),
        K::KeyY => Key::Char('Y'),
        K::KeyZ => Key::Char('Z'),
        K::Num0 | K::Kp0 => Key::Char('0'),
        K::Num1 | K::Kp1 => Key::Char('1'),
        K::Num2 | K::Kp2 => Key::Char('2'),
        K::Num3 | K::Kp3 => Key::Char('3'),
        K::Num4 | K::Kp4 => Key::Char('4'),
        K::Num5 | K::Kp5 => Key::Char('5'),
        K::Num6 | K::Kp6 => Key::Char('6'),
        K::Num7 | K::Kp7 => Key::Char('7'),
        K::Num8 | K::Kp8 => Key::Char('8'),
        K::Num9 | K::Kp9 => Key::Char('9'),
        K::Minus | K::KpMinus => Key::Char('-'),
        K::Equal => Key::Char('='),
        K::KpPlus => Key::Char('+'),
        K::KpMultiply => Key::Char('*'),
        K::KpDivide | K::Slash => Key::Char('/'),
        K::Comma => Key::Char(','),
        K::Dot => Key::Char('.'),
        K::SemiColon => Key::Char(';'),
        K::Quote => Key::Char('\''),
        K::BackQuote => Key::Char('`'),
        K::LeftBracket => Key::Char('['),
        K::RightBracket => Key::Char(']'),
        K::BackSlash | K::IntlBackslash => Key::Char('\\'),
        K::Unknown(code) => Key::Other(code),
        _ => Key::Other(0),
    }
}
