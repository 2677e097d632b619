//! Device-driven flow control for the outbound audio path.
//!
//! The device signals a full receive buffer with a PAUSE frame on the
//! audio-out notification stream and a drained buffer with RESUME. The
//! [`FlowGate`] carries that state from the inbound task to the drain task.
//!
//! # Usage
//!
//! The gate is cheaply cloneable; every clone observes the same flag. The
//! inbound audio task calls [`pause`](FlowGate::pause) /
//! [`resume`](FlowGate::resume), the drain task checks
//! [`is_paused`](FlowGate::is_paused) on every tick, and the connection
//! manager calls [`reset`](FlowGate::reset) when the link is lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared pause flag set by the device.
#[derive(Debug, Clone, Default)]
pub struct FlowGate {
    paused: Arc<AtomicBool>,
}

impl FlowGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Device sent PAUSE.
    #[inline]
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            tracing::debug!("Outbound audio paused by device");
        }
    }

    /// Device sent RESUME.
    #[inline]
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            tracing::debug!("Outbound audio resumed by device");
        }
    }

    /// Whether the drain loop must hold back.
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Clear the flag after link loss; the next device session starts open.
    pub fn reset(&self) {
        self.paused.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_starts_open() {
        assert!(!FlowGate::new().is_paused());
    }

    #[test]
    fn test_pause_resume() {
        let gate = FlowGate::new();
        gate.pause();
        assert!(gate.is_paused());
        gate.pause();
        assert!(gate.is_paused());
        gate.resume();
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_clone_shares_state() {
        let gate = FlowGate::new();
        let observer = gate.clone();
        gate.pause();
        assert!(observer.is_paused());
        observer.reset();
        assert!(!gate.is_paused());
    }
}
