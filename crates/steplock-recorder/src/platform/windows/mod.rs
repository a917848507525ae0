//! Windows capture implementation
//!
//! Uses rdev for global mouse and keyboard hooks and arboard to watch the
//! clipboard.

mod capture;

pub use capture::*;

use steplock_core::Result;

use crate::capture::{CaptureConfig, InputSource};

pub fn source(config: &CaptureConfig) -> Result<Box<dyn InputSource>> {
    Ok(Box::new(NativeSource::new(config)))
}
