//! Raw input model shared by capture, recording and injection

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::geometry::Point;
use crate::{Error, ErrorCode, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        })
    }
}

/// A physical key, independent of keyboard layout where it matters for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Enter,
    Tab,
    Escape,
    Backspace,
    Delete,
    Insert,
    Space,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    F(u8),
    /// Character key. Hotkeys use the uppercase letter, single key presses
    /// keep the character that was typed.
    Char(char),
    Shift,
    Control,
    Alt,
    Meta,
    CapsLock,
    /// Native code we have no name for
    Other(u32),
}

impl Key {
    pub fn modifier(&self) -> Option<u8> {
        match self {
            Key::Shift => Some(Modifiers::SHIFT),
            Key::Control => Some(Modifiers::CTRL),
            Key::Alt => Some(Modifiers::ALT),
            Key::Meta => Some(Modifiers::META),
            _ => None,
        }
    }

    pub fn is_modifier(&self) -> bool {
        self.modifier().is_some()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Enter => f.write_str("ENTER"),
            Key::Tab => f.write_str("TAB"),
            Key::Escape => f.write_str("ESC"),
            Key::Backspace => f.write_str("BACKSPACE"),
            Key::Delete => f.write_str("DELETE"),
            Key::Insert => f.write_str("INSERT"),
            Key::Space => f.write_str("SPACE"),
            Key::Home => f.write_str("HOME"),
            Key::End => f.write_str("END"),
            Key::PageUp => f.write_str("PGUP"),
            Key::PageDown => f.write_str("PGDN"),
            Key::Up => f.write_str("UP"),
            Key::Down => f.write_str("DOWN"),
            Key::Left => f.write_str("LEFT"),
            Key::Right => f.write_str("RIGHT"),
            Key::F(n) => write!(f, "F{}", n),
            Key::Char('+') => f.write_str("PLUS"),
            // Would vanish when names are trimmed
            Key::Char(c) if c.is_whitespace() || c.is_control() => write!(f, "U{:04X}", u32::from(*c)),
            Key::Char(c) => write!(f, "{}", c),
            Key::Shift => f.write_str("SHIFT"),
            Key::Control => f.write_str("CTRL"),
            Key::Alt => f.write_str("ALT"),
            Key::Meta => f.write_str("WIN"),
            Key::CapsLock => f.write_str("CAPSLOCK"),
            Key::Other(code) => write!(f, "VK{}", code),
        }
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        let name = raw.to_ascii_uppercase();
        let key = match name.as_str() {
            "ENTER" | "RETURN" => Key::Enter,
            "TAB" => Key::Tab,
            "ESC" | "ESCAPE" => Key::Escape,
            "BACKSPACE" | "BACK" => Key::Backspace,
            "DELETE" | "DEL" => Key::Delete,
            "INSERT" | "INS" => Key::Insert,
            "SPACE" => Key::Space,
            "HOME" => Key::Home,
            "END" => Key::End,
            "PGUP" | "PAGEUP" | "PAGE_UP" => Key::PageUp,
            "PGDN" | "PAGEDOWN" | "PAGE_DOWN" => Key::PageDown,
            "UP" => Key::Up,
            "DOWN" => Key::Down,
            "LEFT" => Key::Left,
            "RIGHT" => Key::Right,
            "SHIFT" => Key::Shift,
            "CTRL" | "CONTROL" => Key::Control,
            "ALT" | "OPTION" => Key::Alt,
            "WIN" | "META" | "CMD" | "SUPER" => Key::Meta,
            "CAPSLOCK" => Key::CapsLock,
            "PLUS" => Key::Char('+'),
            _ => {
                let mut chars = raw.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Key::Char(c),
                    _ => parse_numbered(&name).ok_or_else(|| {
                        Error::new(ErrorCode::InvalidStep, format!("Unknown key: {}", s))
                    })?,
                }
            }
        };
        Ok(key)
    }
}

fn parse_numbered(name: &str) -> Option<Key> {
    if let Some(n) = name.strip_prefix('F') {
        let n: u8 = n.parse().ok()?;
        return (1..=24).contains(&n).then_some(Key::F(n));
    }
    if let Some(hex) = name.strip_prefix('U').filter(|h| (4..=6).contains(&h.len())) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32).map(Key::Char);
    }
    name.strip_prefix("VK")?.parse().ok().map(Key::Other)
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Modifier flags (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers(pub u8);

impl Modifiers {
    pub const SHIFT: u8 = 1;
    pub const CTRL: u8 = 2;
    pub const ALT: u8 = 4;
    pub const META: u8 = 8;

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn has(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u8, on: bool) {
        if on {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    /// True when a key pressed with these modifiers is a shortcut rather than text.
    /// Shift alone still types.
    pub fn is_command(&self) -> bool {
        self.has(Self::CTRL) || self.has(Self::ALT) || self.has(Self::META)
    }

    /// Modifier keys in press order
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        if self.has(Self::CTRL) {
            keys.push(Key::Control);
        }
        if self.has(Self::ALT) {
            keys.push(Key::Alt);
        }
        if self.has(Self::SHIFT) {
            keys.push(Key::Shift);
        }
        if self.has(Self::META) {
            keys.push(Key::Meta);
        }
        keys
    }
}

/// Key combination such as `CTRL+SHIFT+S`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyChord {
    pub modifiers: Modifiers,
    pub key: Key,
}

impl KeyChord {
    pub fn new(modifiers: Modifiers, key: Key) -> Self {
        Self { modifiers, key }
    }

    pub fn plain(key: Key) -> Self {
        Self::new(Modifiers::default(), key)
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in self.modifiers.keys() {
            write!(f, "{}+", m)?;
        }
        write!(f, "{}", self.key)
    }
}

impl FromStr for KeyChord {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('+').map(str::trim).collect();
        let (last, mods) = parts
            .split_last()
            .filter(|(last, _)| !last.is_empty())
            .ok_or_else(|| Error::new(ErrorCode::InvalidStep, format!("Empty hotkey: '{}'", s)))?;

        let mut modifiers = Modifiers::default();
        for part in mods {
            let key: Key = part.parse()?;
            let flag = key.modifier().ok_or_else(|| {
                Error::new(
                    ErrorCode::InvalidStep,
                    format!("'{}' is not a modifier in hotkey '{}'", part, s),
                )
            })?;
            modifiers.set(flag, true);
        }
        Ok(KeyChord::new(modifiers, last.parse()?))
    }
}

impl Serialize for KeyChord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KeyChord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One event as delivered by the OS listener, before any filtering
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    PointerDown { at: Point, button: MouseButton },
    PointerUp { at: Point, button: MouseButton },
    PointerMove { at: Point },
    /// `text` is the character the key produced, if any
    KeyDown { key: Key, text: Option<char> },
    KeyUp { key: Key },
    ClipboardChanged { text: String },
}

impl RawEvent {
    /// Screen position for pointer events
    pub fn position(&self) -> Option<Point> {
        match self {
            RawEvent::PointerDown { at, .. }
            | RawEvent::PointerUp { at, .. }
            | RawEvent::PointerMove { at } => Some(*at),
            _ => None,
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self, RawEvent::PointerMove { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RawEvent::PointerDown { .. } => "pointer_down",
            RawEvent::PointerUp { .. } => "pointer_up",
            RawEvent::PointerMove { .. } => "pointer_move",
            RawEvent::KeyDown { .. } => "key_down",
            RawEvent::KeyUp { .. } => "key_up",
            RawEvent::ClipboardChanged { .. } => "clipboard",
        }
    }
}
