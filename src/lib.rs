//! # STEPLOCK
//!
//! Record what you do in one window, replay it wherever that window is now.
//!
//! ## Features
//!
//! - **Target lock**: only input aimed at the picked window is recorded
//! - **Window-relative steps**: clicks are stored as fractions of the client area
//! - **Replay**: run, step through, pause and resume, with faults that name the step
//! - **Projects**: JSON project files plus a spreadsheet template export
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use steplock::prelude::*;
//! use steplock::recorder::platform::native_source;
//!
//! let config = EngineConfig::discover()?;
//! let mut session = Session::native(config.clone())?;
//! session.pick_target(native_source(&config.capture)?, None)?;
//! session.start_recording(native_source(&config.capture)?)?;
//! // ... interact with the window ...
//! session.stop_recording()?;
//! session.run()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Re-export core primitives
pub use steplock_core::*;

// Re-export recorder module
pub use steplock_recorder as recorder;

// Re-export common types
pub use steplock_recorder::{
    EngineConfig, Project, ProjectStore, RunMode, Session, SessionMode, Step, StepAction,
    StepKind, StepList, Variable,
};

pub mod prelude {
    pub use steplock_core::prelude::*;
    pub use steplock_recorder::prelude::*;
}
