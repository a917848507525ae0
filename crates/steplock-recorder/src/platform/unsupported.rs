use steplock_core::{Error, Result};

use crate::capture::{CaptureConfig, InputSource};

pub fn source(_config: &CaptureConfig) -> Result<Box<dyn InputSource>> {
    Err(Error::platform_unavailable("Global input capture"))
}
