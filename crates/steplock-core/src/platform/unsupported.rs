//! Stub for platforms without native injection

use std::sync::Arc;

use super::Desktop;
use crate::{Error, Result};

pub fn desktop() -> Result<Arc<dyn Desktop>> {
    Err(Error::platform_unavailable("Window capture and input injection")
        .with_suggestions(vec![
            "Use steplock_core::sim::VirtualDesktop for headless runs".into(),
        ]))
}
