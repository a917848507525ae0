//! Platform abstraction layer for capture
//!
//! Provides the native [`InputSource`]. Only Windows has one; elsewhere the
//! engine runs against scripted sources.

use steplock_core::Result;

use crate::capture::{CaptureConfig, InputSource};

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(not(target_os = "windows"))]
pub mod unsupported;

// Re-export the current platform
#[cfg(target_os = "windows")]
pub use self::windows as current;

#[cfg(not(target_os = "windows"))]
pub use unsupported as current;

/// Global mouse, keyboard and clipboard listener for this machine
pub fn native_source(config: &CaptureConfig) -> Result<Box<dyn InputSource>> {
    current::source(config)
}
