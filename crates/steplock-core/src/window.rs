//! Window identity

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::Rect;

/// Opaque OS window handle. Only meaningful inside the current login session
/// and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WindowHandle(pub isize);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Snapshot of a top-level window. Geometry is as of the query; callers that
/// need the live rect ask the window system again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetWindow {
    pub handle: WindowHandle,
    pub pid: u32,
    pub title: String,
    pub class_name: String,
    pub process_name: String,
    pub window_rect: Rect,
    /// `None` when the client area has no size (minimized)
    pub client_rect: Option<Rect>,
}

impl TargetWindow {
    pub fn descriptor(&self) -> TargetDescriptor {
        TargetDescriptor {
            title: self.title.clone(),
            class_name: self.class_name.clone(),
            process_name: self.process_name.clone(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.title.is_empty() {
            &self.process_name
        } else {
            &self.title
        }
    }
}

/// What survives a restart: enough to find the window again, never the handle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TargetDescriptor {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub process_name: String,
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "title='{}' class='{}' process='{}'",
            self.title, self.class_name, self.process_name
        )
    }
}
