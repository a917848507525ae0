//! steplock-recorder - record and replay steps against one locked window
//!
//! Captured input is filtered by the target lock, coalesced into steps and
//! stored with window-relative coordinates. Replay maps those coordinates back
//! onto wherever the window is now.
//!
//! ## Platform Support
//!
//! - **Windows**: Native capture via rdev hooks and an arboard clipboard watcher
//! - **Other**: Scripted sources and the in-memory desktop only

pub mod capture;
pub mod config;
pub mod events;
pub mod export;
pub mod platform;
pub mod project;
pub mod recorder;
pub mod replay;
pub mod session;
pub mod step;
pub mod storage;
pub mod worker;

pub use capture::{CaptureConfig, EventSink, InputCapture, InputSource, ScriptHandle, ScriptedSource};
pub use config::{ConfigError, EngineConfig};
pub use events::CapturedEvent;
pub use project::{Direction, Project, Variable, VariableKind, FORMAT_VERSION};
pub use recorder::{RecorderConfig, RecordingHandle, RecordingState, RecordingStatus, StepRecorder};
pub use replay::{
    Interrupt, Interrupts, ReplayConfig, ReplayCursor, ReplayEngine, ReplayEvent, ReplayPlan,
    ReplayStats, RunMode, TargetBinding, Uninterrupted,
};
pub use session::{Session, SessionMode};
pub use step::{Step, StepAction, StepKind, StepList, WaitCondition};
pub use storage::ProjectStore;
pub use worker::{ReplayCommand, ReplayHandle, ReplayStatus};

pub mod prelude {
    pub use crate::capture::{InputCapture, InputSource, ScriptedSource};
    pub use crate::config::EngineConfig;
    pub use crate::project::{Project, Variable};
    pub use crate::replay::{ReplayCursor, RunMode};
    pub use crate::session::{Session, SessionMode};
    pub use crate::step::{Step, StepAction, StepList};
    pub use crate::storage::ProjectStore;
}
