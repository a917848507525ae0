//! steplock-core - window-relative automation primitives
//!
//! Window identity and geometry, the target lock that decides which input
//! belongs to the locked window, the coordinate normalizer that keeps
//! recordings valid when the window moves, and input injection.
//!
//! ## Platform Support
//!
//! - **Windows**: Full support via user32 and SendInput
//! - **Other**: Only the in-memory [`sim::VirtualDesktop`]

pub mod error;
pub mod geometry;
pub mod input;
pub mod lock;
pub mod platform;
pub mod resolver;
pub mod sim;
pub mod window;

pub use error::{Error, ErrorCode, Result, StepRef};
pub use geometry::{to_normalized, to_screen, NormPoint, Normalized, Point, Rect};
pub use input::{Key, KeyChord, Modifiers, MouseButton, RawEvent};
pub use lock::{LockState, RejectReason, TargetLock, Verdict};
pub use platform::{ClipboardAccess, Desktop, InputInjector, WindowSystem};
pub use resolver::WindowResolver;
pub use window::{TargetDescriptor, TargetWindow, WindowHandle};

pub mod prelude {
    pub use crate::error::{Error, ErrorCode, Result};
    pub use crate::geometry::{NormPoint, Point, Rect};
    pub use crate::input::{Key, KeyChord, Modifiers, MouseButton, RawEvent};
    pub use crate::lock::TargetLock;
    pub use crate::platform::Desktop;
    pub use crate::resolver::WindowResolver;
    pub use crate::window::{TargetDescriptor, TargetWindow, WindowHandle};
}

/// Native desktop for this machine
pub fn native_desktop() -> Result<std::sync::Arc<dyn Desktop>> {
    platform::native()
}
