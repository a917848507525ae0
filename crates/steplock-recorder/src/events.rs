//! Captured event envelope

pub use steplock_core::RawEvent;

/// Raw event as it leaves the capture queue
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedEvent {
    /// Monotonic per capture session. Gaps mean the queue dropped events.
    pub seq: u64,
    /// Milliseconds since the capture session started
    pub t_ms: u64,
    pub event: RawEvent,
}
