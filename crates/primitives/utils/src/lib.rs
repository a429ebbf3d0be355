#![allow(clippy::new_without_default)]

pub mod cache;
pub mod parsers;
pub mod service;

use std::sync::atomic::{AtomicU8, Ordering};

const UNSTARTED: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

/// Start-once / stop-once guard for long-running components.
///
/// [StartStopOnce::start] succeeds exactly once and [StartStopOnce::stop]
/// succeeds exactly once after a successful start. Every other call returns
/// `false` so callers can turn repeated calls into no-ops.
#[derive(Debug, Default)]
pub struct StartStopOnce(AtomicU8);

impl StartStopOnce {
    pub fn new() -> Self {
        Self(AtomicU8::new(UNSTARTED))
    }

    pub fn start(&self) -> bool {
        self.0.compare_exchange(UNSTARTED, STARTED, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn stop(&self) -> bool {
        self.0.compare_exchange(STARTED, STOPPED, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire) == STARTED
    }
}
